//! Single-consumer serialized task queues.
//!
//! A [`Mailbox`] owns a piece of state and runs closures against it one at a
//! time on a dedicated tokio task. Closures are posted with a fixed priority;
//! lower numbers run first, FIFO within a priority.
//!
//! ```text
//!   tell(0, f) ──┐
//!   tell(2, g) ──┼──► [ p0 ][ p1 ][ p2 ] ──► worker task ──► f(&mut S)
//!   ask(1, h)  ──┘                           one at a time
//! ```
//!
//! Cross-mailbox interaction is always a post, never a direct call.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::debug;

/// Number of jobs between yield points.
pub(crate) const YIELD_EVERY_N_JOBS: u64 = 50;

type Job<S> = Box<dyn FnOnce(&mut S) + Send + 'static>;

struct Shared<S> {
    name: String,
    queues: Mutex<Vec<VecDeque<Job<S>>>>,
    notify: Notify,
    closed: AtomicBool,
}

impl<S> Shared<S> {
    fn pop(&self) -> Option<Job<S>> {
        self.queues.lock().iter_mut().find_map(VecDeque::pop_front)
    }
}

// =============================================================================
// Mailbox
// =============================================================================

/// Handle to a running mailbox. Cloning shares the same queue.
pub struct Mailbox<S> {
    shared: Arc<Shared<S>>,
}

impl<S> Clone for Mailbox<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S: Send + 'static> Mailbox<S> {
    /// Starts a mailbox owning `state` with `priorities` queues.
    ///
    /// The returned join handle yields the state once the mailbox is closed
    /// and drained.
    ///
    /// # Panics
    ///
    /// Panics if `priorities` is zero.
    pub fn spawn(name: impl Into<String>, state: S, priorities: usize) -> (Self, JoinHandle<S>) {
        Self::spawn_with(name, priorities, |_| state)
    }

    /// Like [`Mailbox::spawn`], but builds the state from a weak handle to
    /// the mailbox itself so the state can post follow-up work.
    pub fn spawn_with(
        name: impl Into<String>,
        priorities: usize,
        init: impl FnOnce(WeakMailbox<S>) -> S,
    ) -> (Self, JoinHandle<S>) {
        assert!(priorities > 0, "mailbox needs at least one priority");
        let shared = Arc::new(Shared {
            name: name.into(),
            queues: Mutex::new((0..priorities).map(|_| VecDeque::new()).collect()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        });
        let state = init(WeakMailbox {
            shared: Arc::downgrade(&shared),
        });
        let worker = tokio::spawn(run(Arc::clone(&shared), state));
        (Self { shared }, worker)
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Posts `job`. Returns false if the mailbox is closed.
    pub fn tell(&self, priority: usize, job: impl FnOnce(&mut S) + Send + 'static) -> bool {
        if self.is_closed() {
            return false;
        }
        {
            let mut queues = self.shared.queues.lock();
            let index = priority.min(queues.len() - 1);
            queues[index].push_back(Box::new(job));
        }
        self.shared.notify.notify_one();
        true
    }

    /// Posts `job` and returns a receiver for its result. The receiver errors
    /// if the mailbox is closed before the job runs.
    pub fn ask<R: Send + 'static>(
        &self,
        priority: usize,
        job: impl FnOnce(&mut S) -> R + Send + 'static,
    ) -> oneshot::Receiver<R> {
        let (tx, rx) = oneshot::channel();
        self.tell(priority, move |state| {
            let _ = tx.send(job(state));
        });
        rx
    }

    /// Stops accepting jobs. Already queued jobs still run.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.notify.notify_one();
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Number of queued, not yet started jobs.
    pub fn pending(&self) -> usize {
        self.shared.queues.lock().iter().map(VecDeque::len).sum()
    }

    pub fn downgrade(&self) -> WeakMailbox<S> {
        WeakMailbox {
            shared: Arc::downgrade(&self.shared),
        }
    }
}

impl<S> std::fmt::Debug for Mailbox<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mailbox")
            .field("name", &self.shared.name)
            .field("closed", &self.shared.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Non-owning mailbox handle, held by state that posts to its own mailbox.
pub struct WeakMailbox<S> {
    shared: Weak<Shared<S>>,
}

impl<S> Clone for WeakMailbox<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Weak::clone(&self.shared),
        }
    }
}

impl<S> WeakMailbox<S> {
    pub fn upgrade(&self) -> Option<Mailbox<S>> {
        self.shared.upgrade().map(|shared| Mailbox { shared })
    }
}

async fn run<S>(shared: Arc<Shared<S>>, mut state: S) -> S {
    let mut executed: u64 = 0;
    loop {
        match shared.pop() {
            Some(job) => {
                job(&mut state);
                executed += 1;
                if executed.is_multiple_of(YIELD_EVERY_N_JOBS) {
                    tokio::task::yield_now().await;
                }
            }
            None if shared.closed.load(Ordering::Acquire) => break,
            None => shared.notify.notified().await,
        }
    }
    debug!(mailbox = %shared.name, executed, "Mailbox drained");
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_jobs_run_in_order() {
        let (mailbox, worker) = Mailbox::spawn("test", Vec::new(), 1);
        for i in 0..5 {
            mailbox.tell(0, move |log: &mut Vec<i32>| log.push(i));
        }
        mailbox.close();

        let log = worker.await.unwrap();
        assert_eq!(log, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_priorities_are_served_first() {
        let (mailbox, worker) = Mailbox::spawn("test", Vec::new(), 3);
        let gate = Arc::new(Notify::new());

        // hold the worker so the rest queue up
        let g = Arc::clone(&gate);
        let (started_tx, started_rx) = oneshot::channel();
        mailbox.tell(0, move |_: &mut Vec<&'static str>| {
            let _ = started_tx.send(());
            futures::executor::block_on(g.notified());
        });
        started_rx.await.unwrap();

        mailbox.tell(2, |log| log.push("low"));
        mailbox.tell(1, |log| log.push("mid"));
        mailbox.tell(0, |log| log.push("high"));
        mailbox.tell(2, |log| log.push("low2"));
        gate.notify_one();
        mailbox.close();

        let log = worker.await.unwrap();
        assert_eq!(log, vec!["high", "mid", "low", "low2"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_ask_returns_result() {
        let (mailbox, _worker) = Mailbox::spawn("test", 41u32, 1);
        let answer = mailbox.ask(0, |n| {
            *n += 1;
            *n
        });
        let answer = tokio::time::timeout(Duration::from_secs(1), answer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(answer, 42);
    }

    #[tokio::test]
    async fn test_closed_mailbox_rejects_jobs() {
        let (mailbox, worker) = Mailbox::spawn("test", 0u32, 1);
        mailbox.close();
        assert!(!mailbox.tell(0, |n| *n += 1));
        assert!(mailbox.ask(0, |n| *n).await.is_err());
        assert_eq!(worker.await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_weak_handle_posts_follow_up() {
        struct State {
            me: WeakMailbox<State>,
            log: Vec<u32>,
        }

        let (mailbox, worker) = Mailbox::spawn_with("test", 1, |me| State {
            me,
            log: Vec::new(),
        });
        mailbox.tell(0, |state: &mut State| {
            state.log.push(1);
            if let Some(me) = state.me.upgrade() {
                me.tell(0, |state| state.log.push(2));
                me.close();
            }
        });

        let state = worker.await.unwrap();
        assert_eq!(state.log, vec![1, 2]);
    }
}
