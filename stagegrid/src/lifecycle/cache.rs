//! Pinned square of cell entries read by one generation task.

use super::entry::CellEntry;
use crate::coord::{square_area, CellPos};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Entries within `radius` of `center`, pinned for the cache's lifetime.
pub struct CellCache {
    center: CellPos,
    radius: u32,
    entries: Vec<Arc<CellEntry>>,
    released: AtomicBool,
}

impl CellCache {
    /// Collects and pins every entry in the square. Returns the first
    /// missing position if `lookup` has no entry for it; nothing stays
    /// pinned in that case.
    pub fn build(
        center: CellPos,
        radius: u32,
        lookup: impl Fn(CellPos) -> Option<Arc<CellEntry>>,
    ) -> Result<Self, CellPos> {
        let mut entries = Vec::with_capacity(square_area(radius));
        for pos in center.square(radius) {
            match lookup(pos) {
                Some(entry) => entries.push(entry),
                None => return Err(pos),
            }
        }
        for entry in &entries {
            entry.pin();
        }
        Ok(Self {
            center,
            radius,
            entries,
            released: AtomicBool::new(false),
        })
    }

    #[inline]
    pub fn center(&self) -> CellPos {
        self.center
    }

    #[inline]
    pub fn radius(&self) -> u32 {
        self.radius
    }

    pub fn get(&self, pos: CellPos) -> Option<&Arc<CellEntry>> {
        let r = self.radius as i64;
        let dx = pos.x as i64 - self.center.x as i64 + r;
        let dz = pos.z as i64 - self.center.z as i64 + r;
        let side = 2 * r + 1;
        if !(0..side).contains(&dx) || !(0..side).contains(&dz) {
            return None;
        }
        self.entries.get((dz * side + dx) as usize)
    }

    pub fn entries(&self) -> &[Arc<CellEntry>] {
        &self.entries
    }

    /// Unpins every entry. Later calls do nothing.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        for entry in &self.entries {
            entry.unpin();
        }
    }
}

impl std::fmt::Debug for CellCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CellCache")
            .field("center", &self.center)
            .field("radius", &self.radius)
            .field("released", &self.released.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn entries_around(center: CellPos, radius: u32) -> HashMap<CellPos, Arc<CellEntry>> {
        center
            .square(radius)
            .map(|p| (p, Arc::new(CellEntry::new(p, 3, 0, 10))))
            .collect()
    }

    #[test]
    fn test_build_pins_and_release_unpins() {
        let center = CellPos::new(5, 5);
        let map = entries_around(center, 2);
        let cache = CellCache::build(center, 2, |p| map.get(&p).cloned()).unwrap();

        assert!(map.values().all(|e| e.pin_count() == 1));
        cache.release();
        cache.release();
        assert!(map.values().all(|e| e.pin_count() == 0));
    }

    #[test]
    fn test_get_by_position() {
        let center = CellPos::new(-1, 3);
        let map = entries_around(center, 1);
        let cache = CellCache::build(center, 1, |p| map.get(&p).cloned()).unwrap();

        assert_eq!(cache.get(CellPos::new(0, 4)).unwrap().pos(), CellPos::new(0, 4));
        assert!(cache.get(CellPos::new(1, 3)).is_none());
        cache.release();
    }

    #[test]
    fn test_missing_entry_reported() {
        let center = CellPos::ORIGIN;
        let mut map = entries_around(center, 1);
        map.remove(&CellPos::new(1, 1));

        let err = CellCache::build(center, 1, |p| map.get(&p).cloned()).unwrap_err();
        assert_eq!(err, CellPos::new(1, 1));
        assert!(map.values().all(|e| e.pin_count() == 0));
    }
}
