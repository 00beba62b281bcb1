//! Completable, shareable stage futures.

use crate::content::ContentHandle;
use std::sync::{Arc, OnceLock};
use tokio::sync::Notify;

/// Outcome of a stage.
#[derive(Debug, Clone)]
pub enum StageResult {
    /// The stage completed; the cell's content at (at least) that stage.
    Ready(ContentHandle),
    /// The stage is not allowed under the cell's current priority, or its
    /// dependencies were withdrawn.
    Unloaded,
}

impl StageResult {
    #[inline]
    pub fn is_success(&self) -> bool {
        matches!(self, StageResult::Ready(_))
    }

    pub fn content(&self) -> Option<&ContentHandle> {
        match self {
            StageResult::Ready(content) => Some(content),
            StageResult::Unloaded => None,
        }
    }
}

struct Inner {
    result: OnceLock<StageResult>,
    notify: Notify,
}

/// A stage result that may not be available yet.
///
/// Clones share the same slot; identity is compared with
/// [`StageFuture::ptr_eq`].
#[derive(Clone)]
pub struct StageFuture {
    inner: Arc<Inner>,
}

impl StageFuture {
    /// Unresolved future.
    pub fn pending() -> Self {
        Self {
            inner: Arc::new(Inner {
                result: OnceLock::new(),
                notify: Notify::new(),
            }),
        }
    }

    /// Already-resolved future.
    pub fn ready(result: StageResult) -> Self {
        let future = Self::pending();
        let _ = future.inner.result.set(result);
        future
    }

    /// The canonical unloaded result.
    pub fn unloaded() -> Self {
        Self::ready(StageResult::Unloaded)
    }

    /// Resolves the future. Returns false if it was already resolved.
    pub fn complete(&self, result: StageResult) -> bool {
        if self.inner.result.set(result).is_err() {
            return false;
        }
        self.inner.notify.notify_waiters();
        true
    }

    /// The result, if resolved.
    #[inline]
    pub fn result(&self) -> Option<&StageResult> {
        self.inner.result.get()
    }

    #[inline]
    pub fn is_done(&self) -> bool {
        self.inner.result.get().is_some()
    }

    /// True when resolved successfully.
    pub fn is_success(&self) -> bool {
        self.result().is_some_and(StageResult::is_success)
    }

    pub fn ptr_eq(a: &StageFuture, b: &StageFuture) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    /// Waits for the result.
    pub async fn wait(&self) -> StageResult {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(result) = self.inner.result.get() {
                return result.clone();
            }
            notified.await;
        }
    }

    /// Short state label for diagnostics.
    pub fn state_label(&self) -> &'static str {
        match self.result() {
            None => "pending",
            Some(StageResult::Ready(_)) => "ready",
            Some(StageResult::Unloaded) => "unloaded",
        }
    }
}

impl std::fmt::Debug for StageFuture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("StageFuture").field(&self.state_label()).finish()
    }
}
