//! Authoritative map of live cell entries.
//!
//! Mutation happens only on the scheduler's driving task. A [`DashMap`]
//! mirror of the live entries is shared with other threads for read-only
//! inspection.

use super::entry::CellEntry;
use super::future::StageFuture;
use crate::content::ContentHandle;
use crate::coord::CellPos;
use crate::stage::StageId;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;

/// Read-only view of live entries, shareable across threads.
pub type VisibleCells = Arc<DashMap<CellPos, Arc<CellEntry>>>;

#[derive(Debug)]
pub struct CellStore {
    updating: HashMap<CellPos, Arc<CellEntry>>,
    pending_unloads: HashMap<CellPos, Arc<CellEntry>>,
    visible: VisibleCells,
    stage_count: usize,
    absent_level: u32,
}

impl CellStore {
    pub fn new(stage_count: usize, absent_level: u32) -> Self {
        Self {
            updating: HashMap::new(),
            pending_unloads: HashMap::new(),
            visible: Arc::new(DashMap::new()),
            stage_count,
            absent_level,
        }
    }

    pub fn visible(&self) -> VisibleCells {
        Arc::clone(&self.visible)
    }

    pub fn get(&self, pos: CellPos) -> Option<&Arc<CellEntry>> {
        self.updating.get(&pos)
    }

    pub fn len(&self) -> usize {
        self.updating.len()
    }

    pub fn is_empty(&self) -> bool {
        self.updating.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &Arc<CellEntry>> {
        self.updating.values()
    }

    /// Returns the entry for `pos`, reviving one awaiting unload or creating
    /// a fresh one.
    pub fn get_or_create(&mut self, pos: CellPos, level: u32) -> Arc<CellEntry> {
        if let Some(entry) = self.updating.get(&pos) {
            return Arc::clone(entry);
        }
        let entry = match self.pending_unloads.remove(&pos) {
            Some(entry) => entry,
            None => {
                let entry = Arc::new(CellEntry::new(
                    pos,
                    self.stage_count,
                    level,
                    self.absent_level,
                ));
                self.visible.insert(pos, Arc::clone(&entry));
                entry
            }
        };
        self.updating.insert(pos, Arc::clone(&entry));
        entry
    }

    /// Moves the entry at `pos` to the pending-unload set.
    pub fn begin_unload(&mut self, pos: CellPos) -> Option<Arc<CellEntry>> {
        let entry = self.updating.remove(&pos)?;
        self.pending_unloads.insert(pos, Arc::clone(&entry));
        Some(entry)
    }

    pub fn pending_unloads(&self) -> impl Iterator<Item = &Arc<CellEntry>> {
        self.pending_unloads.values()
    }

    pub fn pending_unload(&self, pos: CellPos) -> Option<&Arc<CellEntry>> {
        self.pending_unloads.get(&pos)
    }

    pub fn is_pending_unload(&self, entry: &Arc<CellEntry>) -> bool {
        self.pending_unloads
            .get(&entry.pos())
            .is_some_and(|e| Arc::ptr_eq(e, entry))
    }

    /// Drops `entry` for good if it is still awaiting unload. Returns false
    /// when it was revived in the meantime.
    pub fn finish_unload(&mut self, entry: &Arc<CellEntry>) -> bool {
        if !self.is_pending_unload(entry) {
            return false;
        }
        self.pending_unloads.remove(&entry.pos());
        self.visible
            .remove_if(&entry.pos(), |_, e| Arc::ptr_eq(e, entry));
        true
    }

    // -------------------------------------------------------------------------
    // Keyed operations
    // -------------------------------------------------------------------------

    /// Future for `stage` at `pos`; unloaded when the cell is not live.
    pub fn get_or_create_future(&self, pos: CellPos, stage: StageId) -> StageFuture {
        self.get(pos)
            .map_or_else(StageFuture::unloaded, |e| e.get_or_create_future(stage))
    }

    pub fn complete_stage(&self, pos: CellPos, stage: StageId, content: ContentHandle) -> bool {
        let Some(entry) = self.get(pos) else {
            return false;
        };
        entry.complete_stage(stage, content);
        true
    }

    /// Applies a new ceiling; returns true on downgrade.
    pub fn update_allowed_ceiling(&self, pos: CellPos, ceiling: Option<StageId>) -> bool {
        self.get(pos)
            .is_some_and(|e| e.update_highest_allowed(ceiling))
    }

    pub fn pin(&self, pos: CellPos) -> bool {
        let Some(entry) = self.get(pos) else {
            return false;
        };
        entry.pin();
        true
    }

    pub fn unpin(&self, pos: CellPos) -> bool {
        let Some(entry) = self.get(pos) else {
            return false;
        };
        entry.unpin();
        true
    }
}
