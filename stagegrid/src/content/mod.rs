//! Cell content shared by a cell's stage futures.
//!
//! Stage transforms mutate one [`CellContent`] in place as the cell
//! advances; every successful stage future of a cell resolves to the same
//! handle. The content records the most advanced stage it has reached,
//! which is what gets persisted.

mod codec;

pub use codec::{decode, encode, CodecError, HEADER_LEN, MAGIC};

use crate::coord::CellPos;
use crate::stage::StageId;
use bytes::Bytes;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Shared handle to a cell's content.
pub type ContentHandle = Arc<CellContent>;

/// Opaque payload of one cell plus its reached stage.
pub struct CellContent {
    pos: CellPos,
    stage: AtomicU8,
    data: RwLock<Vec<u8>>,
}

impl CellContent {
    /// Fresh content at the base stage.
    pub fn empty(pos: CellPos) -> Self {
        Self::with_data(pos, StageId::BASE, Vec::new())
    }

    pub fn with_data(pos: CellPos, stage: StageId, data: Vec<u8>) -> Self {
        Self {
            pos,
            stage: AtomicU8::new(stage.raw()),
            data: RwLock::new(data),
        }
    }

    #[inline]
    pub fn pos(&self) -> CellPos {
        self.pos
    }

    /// Most advanced stage this content has reached.
    #[inline]
    pub fn stage(&self) -> StageId {
        StageId::from_raw(self.stage.load(Ordering::Acquire))
    }

    /// Records that the content reached `stage`. Never moves backwards.
    pub fn mark_stage(&self, stage: StageId) {
        self.stage.fetch_max(stage.raw(), Ordering::AcqRel);
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Vec<u8>> {
        self.data.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Vec<u8>> {
        self.data.write()
    }

    /// Copy of the payload.
    pub fn snapshot(&self) -> Bytes {
        Bytes::copy_from_slice(&self.data.read())
    }
}

impl std::fmt::Debug for CellContent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CellContent")
            .field("pos", &self.pos)
            .field("stage", &self.stage())
            .field("len", &self.data.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_stage_is_monotonic() {
        let content = CellContent::empty(CellPos::ORIGIN);
        content.mark_stage(StageId::new(3));
        content.mark_stage(StageId::new(1));
        assert_eq!(content.stage(), StageId::new(3));
    }

    #[test]
    fn test_write_then_snapshot() {
        let content = CellContent::empty(CellPos::new(1, 2));
        content.write().extend_from_slice(b"abc");
        assert_eq!(content.snapshot(), Bytes::from_static(b"abc"));
    }
}
