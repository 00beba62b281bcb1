//! Shared per-cell queue level.

use std::sync::atomic::{AtomicU32, Ordering};

/// Level at which the sorter files a cell's work.
///
/// Written only from inside the sorter mailbox; read anywhere.
#[derive(Debug)]
pub struct QueueLevel(AtomicU32);

impl QueueLevel {
    pub fn new(level: u32) -> Self {
        Self(AtomicU32::new(level))
    }

    #[inline]
    pub fn get(&self) -> u32 {
        self.0.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn set(&self, level: u32) {
        self.0.store(level, Ordering::Release);
    }
}
