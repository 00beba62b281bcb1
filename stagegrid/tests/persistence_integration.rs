//! Integration tests for loading, saving and unloading cells.
//!
//! These tests verify:
//! - Unloaded cells are saved with their most advanced stage
//! - Revived cells load persisted content instead of regenerating it
//! - Shutdown flushes every live cell
//! - Corrupt data and failing storage start cells empty

use bytes::Bytes;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use stagegrid::content::{self, CellContent, ContentHandle};
use stagegrid::coord::CellPos;
use stagegrid::error::SchedulerError;
use stagegrid::lifecycle::StageFuture;
use stagegrid::priority::TicketType;
use stagegrid::scheduler::{SchedulerConfig, SchedulerHandle, SchedulerServices, StageScheduler};
use stagegrid::stage::{StageId, StagePipeline};
use stagegrid::storage::{CellStorage, MemoryStorage, StorageError};
use stagegrid::telemetry::{EventSink, SchedulerEvent};
use stagegrid::transform::{StageTransform, StepContext, TransformError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

// =============================================================================
// Test Helpers
// =============================================================================

const TIMEOUT: Duration = Duration::from_secs(10);
const STAGES: usize = 3;

fn s(index: usize) -> StageId {
    StageId::new(index)
}

fn pipeline() -> StagePipeline {
    StagePipeline::builder()
        .stage("s0", |s| s)
        .stage("s1", |s| s.requires("s0", 1))
        .stage("s2", |s| s.requires("s1", 1))
        .build()
        .unwrap()
}

fn config() -> SchedulerConfig {
    SchedulerConfig::default()
        .with_tick_interval(None)
        .with_full_level(4)
}

/// Appends the target stage to the payload.
#[derive(Default)]
struct StampTransform {
    runs: AtomicUsize,
}

impl StageTransform for StampTransform {
    fn apply(&self, ctx: StepContext) -> BoxFuture<'_, Result<ContentHandle, TransformError>> {
        Box::pin(async move {
            self.runs.fetch_add(1, Ordering::SeqCst);
            ctx.content.write().push(ctx.target().index() as u8);
            Ok(ctx.content)
        })
    }
}

#[derive(Default)]
struct EventRecorder {
    events: Mutex<Vec<SchedulerEvent>>,
}

impl EventRecorder {
    fn count(&self, event_type: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event_type() == event_type)
            .count()
    }

    fn loaded_stage(&self, pos: CellPos) -> Option<Option<StageId>> {
        self.events.lock().iter().rev().find_map(|e| match e {
            SchedulerEvent::CellLoaded { pos: p, stage } if *p == pos => Some(*stage),
            _ => None,
        })
    }
}

impl EventSink for EventRecorder {
    fn emit(&self, event: SchedulerEvent) {
        self.events.lock().push(event);
    }
}

struct Harness {
    handle: SchedulerHandle,
    shutdown: CancellationToken,
    driver: JoinHandle<Result<(), SchedulerError>>,
    transform: Arc<StampTransform>,
    events: Arc<EventRecorder>,
}

impl Harness {
    fn start(storage: Arc<dyn CellStorage>) -> Self {
        let transform = Arc::new(StampTransform::default());
        let events = Arc::new(EventRecorder::default());
        let services = SchedulerServices::new(storage, transform.clone()).with_events(events.clone());
        let (scheduler, handle) = StageScheduler::new(config(), pipeline(), services);
        let shutdown = CancellationToken::new();
        let driver = tokio::spawn(scheduler.run(shutdown.clone()));
        Self {
            handle,
            shutdown,
            driver,
            transform,
            events,
        }
    }

    async fn request(&self, pos: CellPos, stage: StageId) -> StageFuture {
        let future = self.handle.request_stage(pos, stage, false).await.unwrap();
        tokio::time::timeout(TIMEOUT, future.wait())
            .await
            .expect("stage future timed out");
        future
    }

    async fn wait_until_empty(&self) {
        tokio::time::timeout(TIMEOUT, async {
            loop {
                self.handle.sync().await.unwrap();
                if self.handle.live_cells() == 0 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("cells never unloaded");
    }

    async fn stop(self) {
        self.shutdown.cancel();
        self.driver.await.unwrap().unwrap();
    }
}

/// Storage whose reads always fail.
#[derive(Debug, Default)]
struct BrokenStorage;

impl CellStorage for BrokenStorage {
    fn load(&self, _pos: CellPos) -> BoxFuture<'_, Result<Option<Bytes>, StorageError>> {
        Box::pin(async { Err(StorageError::Unavailable("disk on fire".to_string())) })
    }

    fn save(&self, _pos: CellPos, _data: Bytes) -> BoxFuture<'_, Result<(), StorageError>> {
        Box::pin(async { Err(StorageError::Unavailable("disk on fire".to_string())) })
    }

    fn name(&self) -> &str {
        "broken"
    }
}

// =============================================================================
// Integration Tests
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unload_saves_and_revive_loads() {
    let storage = Arc::new(MemoryStorage::new());
    let harness = Harness::start(storage.clone());
    let origin = CellPos::ORIGIN;

    harness
        .handle
        .add_ticket(TicketType::START, origin, 4, "player")
        .await
        .unwrap();
    let future = harness.request(origin, s(2)).await;
    assert!(future.is_success());
    let generated = harness.transform.runs.load(Ordering::SeqCst);
    assert!(generated > 0);

    harness
        .handle
        .remove_ticket(TicketType::START, origin, 4, "player")
        .await
        .unwrap();
    harness.wait_until_empty().await;

    let saved = content::decode(origin, storage.get(origin).unwrap(), STAGES).unwrap();
    assert_eq!(saved.stage(), s(2));
    assert_eq!(&*saved.read(), &[1u8, 2]);
    assert_eq!(storage.len(), 25);
    assert_eq!(harness.events.count("cell_unloaded"), 25);

    harness
        .handle
        .add_ticket(TicketType::START, origin, 4, "player")
        .await
        .unwrap();
    let revived = harness.request(origin, s(2)).await;
    assert!(revived.is_success());
    assert!(!StageFuture::ptr_eq(&future, &revived));
    assert_eq!(harness.events.loaded_stage(origin), Some(Some(s(2))));
    assert_eq!(harness.transform.runs.load(Ordering::SeqCst), generated);

    let content = revived.result().unwrap().content().unwrap().clone();
    assert_eq!(&*content.read(), &[1u8, 2]);

    harness.stop().await;
}

#[tokio::test]
async fn test_shutdown_flushes_live_cells() {
    let storage = Arc::new(MemoryStorage::new());
    let harness = Harness::start(storage.clone());
    let origin = CellPos::new(7, -7);

    harness
        .handle
        .add_ticket(TicketType::FORCED, origin, 4, 1u64)
        .await
        .unwrap();
    assert!(harness.request(origin, s(2)).await.is_success());
    assert!(storage.is_empty());

    let events = Arc::clone(&harness.events);
    harness.stop().await;

    assert_eq!(storage.len(), 25);
    let saved = content::decode(origin, storage.get(origin).unwrap(), STAGES).unwrap();
    assert_eq!(saved.stage(), s(2));
    assert_eq!(events.count("cell_saved"), 25);
}

#[tokio::test]
async fn test_corrupt_data_starts_empty() {
    let storage = Arc::new(MemoryStorage::new());
    let origin = CellPos::ORIGIN;
    storage.insert(origin, Bytes::from_static(b"definitely not a cell"));

    // valid content for the wrong cell is corrupt too
    let elsewhere =
        content::encode(&CellContent::with_data(CellPos::new(9, 9), s(2), vec![7])).unwrap();
    storage.insert(CellPos::new(1, 0), elsewhere);

    let harness = Harness::start(storage.clone());
    harness
        .handle
        .add_ticket(TicketType::START, origin, 4, "player")
        .await
        .unwrap();
    let future = harness.request(origin, s(2)).await;

    assert!(future.is_success());
    assert_eq!(harness.events.count("corrupt_cell_data"), 2);
    assert_eq!(harness.events.loaded_stage(origin), Some(None));
    let content = future.result().unwrap().content().unwrap().clone();
    assert_eq!(&*content.read(), &[1u8, 2]);

    harness.stop().await;
}

#[tokio::test]
async fn test_failing_storage_reports_and_continues() {
    let harness = Harness::start(Arc::new(BrokenStorage));
    let origin = CellPos::ORIGIN;

    harness
        .handle
        .add_ticket(TicketType::START, origin, 4, "player")
        .await
        .unwrap();
    assert!(harness.request(origin, s(2)).await.is_success());
    assert_eq!(harness.events.count("storage_read_failed"), 25);

    let events = Arc::clone(&harness.events);
    harness.stop().await;
    assert_eq!(events.count("storage_write_failed"), 25);
    assert_eq!(events.count("cell_saved"), 0);
}
