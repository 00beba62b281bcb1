//! Incremental min-fixed-point level propagation.
//!
//! Every cell's level converges to
//! `min(source_level(cell), 1 + min(level(n) for n in neighbors(cell)))`,
//! clamped to the absent level. Updates are processed from a bucket queue
//! ordered by `min(current, computed)` level.
//!
//! Lowering a level (a new or stronger source) is accepted as soon as the
//! cell is dequeued. Raising a level is never trusted: the cell's level is
//! recomputed from its remaining source and its other neighbors, it is
//! parked at the absent level, requeued at the recomputed value, and only
//! the neighbors that derived their level from it are re-examined.

use super::queue::LeveledQueue;
use crate::collections::LinkedMap;
use crate::coord::{CellPos, Neighbors};
use std::collections::HashMap;

/// Read-only view of the graph the propagator runs over.
pub trait PropagationGraph {
    /// Level injected at `pos` by its own sources (tickets), or any value
    /// at or above the absent level when there are none.
    fn source_level(&self, pos: CellPos) -> u32;

    /// Cells adjacent to `pos`. The cell itself must not be included.
    fn neighbors(&self, pos: CellPos) -> Neighbors {
        pos.neighbors()
    }
}

/// Origin of an edge during relaxation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRef {
    /// The virtual source node feeding every cell its own source level.
    Source,
    Cell(CellPos),
}

/// Net level change of one cell since the last drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelChange {
    pub pos: CellPos,
    pub old: u32,
    pub new: u32,
}

/// Generic level propagation engine.
///
/// The engine owns the level map; cells at the absent level are not stored.
pub struct LevelPropagator {
    level_count: u32,
    queue: LeveledQueue,
    computed: HashMap<CellPos, u32>,
    levels: HashMap<CellPos, u32>,
    changes: LinkedMap<CellPos, u32>,
}

impl LevelPropagator {
    /// Creates a propagator whose absent level is `level_count - 1`.
    ///
    /// # Panics
    ///
    /// Panics if `level_count` is less than 2.
    pub fn new(level_count: u32) -> Self {
        assert!(level_count >= 2, "level_count must be at least 2");
        Self {
            level_count,
            queue: LeveledQueue::new(level_count as usize),
            computed: HashMap::new(),
            levels: HashMap::new(),
            changes: LinkedMap::new(),
        }
    }

    /// The sentinel level meaning "absent".
    #[inline]
    pub fn absent_level(&self) -> u32 {
        self.level_count - 1
    }

    /// Current level of `pos`.
    #[inline]
    pub fn level(&self, pos: CellPos) -> u32 {
        self.levels
            .get(&pos)
            .copied()
            .unwrap_or_else(|| self.absent_level())
    }

    /// Number of cells below the absent level.
    pub fn tracked_count(&self) -> usize {
        self.levels.len()
    }

    pub fn has_pending_updates(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Cells with a level below the absent level.
    pub fn tracked(&self) -> impl Iterator<Item = (CellPos, u32)> + '_ {
        self.levels.iter().map(|(p, l)| (*p, *l))
    }

    /// Feeds a new source level for `pos`.
    ///
    /// `decrease` must be true when the source level went down (a ticket was
    /// added) and false when it went up (a ticket was removed or expired).
    pub fn update<G: PropagationGraph + ?Sized>(
        &mut self,
        graph: &G,
        pos: CellPos,
        level: u32,
        decrease: bool,
    ) {
        let level_to = self.level(pos);
        let computed_to = self.computed.get(&pos).copied();
        self.check_edge(graph, NodeRef::Source, pos, level, level_to, computed_to, decrease);
    }

    /// Processes at most `budget` queued cells. Returns the unused budget.
    pub fn run_updates<G: PropagationGraph + ?Sized>(&mut self, graph: &G, budget: usize) -> usize {
        let max = self.absent_level();
        let mut budget = budget;

        while budget > 0 {
            let Some(pos) = self.queue.pop_first() else {
                break;
            };
            budget -= 1;

            let level = self.level(pos).min(max);
            let Some(computed) = self.computed.remove(&pos) else {
                continue;
            };

            if computed < level {
                self.set_level(pos, computed);
                self.check_neighbors_after_update(graph, pos, computed, true);
            } else if computed > level {
                self.set_level(pos, max);
                if computed != max {
                    self.queue.enqueue(pos, priority(max, computed, max) as usize);
                    self.computed.insert(pos, computed);
                }
                self.check_neighbors_after_update(graph, pos, level, false);
            }
        }

        budget
    }

    /// Returns the net level changes since the previous drain.
    pub fn drain_changes(&mut self) -> Vec<LevelChange> {
        let mut changes = Vec::with_capacity(self.changes.len());
        while let Some((pos, old)) = self.changes.pop_front() {
            let new = self.level(pos);
            if new != old {
                changes.push(LevelChange { pos, old, new });
            }
        }
        changes
    }

    fn set_level(&mut self, pos: CellPos, level: u32) {
        let old = self.level(pos);
        if old == level {
            return;
        }
        self.changes.get_or_insert_with(pos, || old);
        if level >= self.absent_level() {
            self.levels.remove(&pos);
        } else {
            self.levels.insert(pos, level);
        }
    }

    fn check_neighbors_after_update<G: PropagationGraph + ?Sized>(
        &mut self,
        graph: &G,
        pos: CellPos,
        level: u32,
        decrease: bool,
    ) {
        // level + 1 would already be absent
        if decrease && level + 1 >= self.absent_level() {
            return;
        }
        for neighbor in graph.neighbors(pos) {
            self.check_neighbor(graph, pos, neighbor, level, decrease);
        }
    }

    fn check_neighbor<G: PropagationGraph + ?Sized>(
        &mut self,
        graph: &G,
        from: CellPos,
        to: CellPos,
        level: u32,
        decrease: bool,
    ) {
        let max = self.absent_level();
        let computed_to = self.computed.get(&to).copied();
        let propagated = (level + 1).min(max);
        let level_to = self.level(to);

        if decrease {
            self.check_edge(graph, NodeRef::Cell(from), to, propagated, level_to, computed_to, true);
            return;
        }

        // only cells that may have derived their level from `from`
        let current = computed_to.unwrap_or(level_to.min(max));
        if propagated == current {
            self.check_edge(graph, NodeRef::Cell(from), to, max, level_to, computed_to, false);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn check_edge<G: PropagationGraph + ?Sized>(
        &mut self,
        graph: &G,
        from: NodeRef,
        to: CellPos,
        new_level_from: u32,
        level_to: u32,
        computed_to: Option<u32>,
        decrease: bool,
    ) {
        let max = self.absent_level();
        let new_level_from = new_level_from.min(max);
        let level_to = level_to.min(max);
        let was_queued = computed_to.is_some();
        let computed_to = computed_to.unwrap_or(level_to);

        let new_computed = if decrease {
            computed_to.min(new_level_from)
        } else {
            self.computed_level(graph, to, from, new_level_from).min(max)
        };

        let old_priority = priority(level_to, computed_to, max);
        if level_to != new_computed {
            let new_priority = priority(level_to, new_computed, max);
            if old_priority != new_priority && was_queued {
                self.queue.dequeue(to, old_priority as usize);
            }
            self.queue.enqueue(to, new_priority as usize);
            self.computed.insert(to, new_computed);
        } else if was_queued {
            self.queue.dequeue(to, old_priority as usize);
            self.computed.remove(&to);
        }
    }

    /// Best level for `pos` from its source and all neighbors except
    /// `excluded`, starting from `level`.
    fn computed_level<G: PropagationGraph + ?Sized>(
        &self,
        graph: &G,
        pos: CellPos,
        excluded: NodeRef,
        level: u32,
    ) -> u32 {
        let mut best = level;
        if excluded != NodeRef::Source {
            best = best.min(graph.source_level(pos));
            if best == 0 {
                return 0;
            }
        }
        for neighbor in graph.neighbors(pos) {
            if NodeRef::Cell(neighbor) == excluded {
                continue;
            }
            best = best.min(self.level(neighbor).saturating_add(1));
            if best == 0 {
                return 0;
            }
        }
        best
    }
}

#[inline]
fn priority(level: u32, computed: u32, max: u32) -> u32 {
    level.min(computed).min(max)
}

impl std::fmt::Debug for LevelPropagator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LevelPropagator")
            .field("level_count", &self.level_count)
            .field("tracked", &self.levels.len())
            .field("queued", &self.queue.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Sources keyed by cell; absent cells report `u32::MAX`.
    #[derive(Default)]
    struct Sources(HashMap<CellPos, u32>);

    impl PropagationGraph for Sources {
        fn source_level(&self, pos: CellPos) -> u32 {
            self.0.get(&pos).copied().unwrap_or(u32::MAX)
        }
    }

    fn set(engine: &mut LevelPropagator, sources: &mut Sources, pos: CellPos, level: u32) {
        let old = sources.source_level(pos);
        sources.0.insert(pos, level);
        engine.update(sources, pos, level, level < old);
    }

    fn clear(engine: &mut LevelPropagator, sources: &mut Sources, pos: CellPos) {
        sources.0.remove(&pos);
        engine.update(sources, pos, engine.absent_level(), false);
    }

    fn reference_level(sources: &Sources, pos: CellPos, max: u32) -> u32 {
        sources
            .0
            .iter()
            .map(|(src, level)| level.saturating_add(src.distance(pos)))
            .min()
            .unwrap_or(max)
            .min(max)
    }

    #[test]
    fn test_single_source_spreads_by_distance() {
        let mut engine = LevelPropagator::new(11);
        let mut sources = Sources::default();

        set(&mut engine, &mut sources, CellPos::ORIGIN, 0);
        engine.run_updates(&sources, usize::MAX);

        assert_eq!(engine.level(CellPos::ORIGIN), 0);
        assert_eq!(engine.level(CellPos::new(3, -2)), 3);
        assert_eq!(engine.level(CellPos::new(9, 9)), 9);
        assert_eq!(engine.level(CellPos::new(10, 0)), 10);
        assert_eq!(engine.tracked_count(), 19 * 19);
    }

    #[test]
    fn test_removal_returns_cells_to_absent() {
        let mut engine = LevelPropagator::new(11);
        let mut sources = Sources::default();

        set(&mut engine, &mut sources, CellPos::ORIGIN, 0);
        engine.run_updates(&sources, usize::MAX);
        engine.drain_changes();

        clear(&mut engine, &mut sources, CellPos::ORIGIN);
        engine.run_updates(&sources, usize::MAX);

        assert_eq!(engine.tracked_count(), 0);
        assert!(!engine.has_pending_updates());
        let changes = engine.drain_changes();
        assert_eq!(changes.len(), 19 * 19);
        assert!(changes.iter().all(|c| c.new == 10));
    }

    #[test]
    fn test_increase_falls_back_to_next_best_source() {
        let mut engine = LevelPropagator::new(20);
        let mut sources = Sources::default();

        set(&mut engine, &mut sources, CellPos::new(0, 0), 2);
        set(&mut engine, &mut sources, CellPos::new(4, 0), 0);
        engine.run_updates(&sources, usize::MAX);
        assert_eq!(engine.level(CellPos::new(1, 0)), 3);

        clear(&mut engine, &mut sources, CellPos::new(4, 0));
        engine.run_updates(&sources, usize::MAX);

        assert_eq!(engine.level(CellPos::new(1, 0)), 3);
        assert_eq!(engine.level(CellPos::new(4, 0)), 6);
        assert_eq!(engine.level(CellPos::new(0, 0)), 2);
    }

    #[test]
    fn test_budget_limits_work() {
        let mut engine = LevelPropagator::new(11);
        let mut sources = Sources::default();
        set(&mut engine, &mut sources, CellPos::ORIGIN, 0);

        let remaining = engine.run_updates(&sources, 1);
        assert_eq!(remaining, 0);
        assert!(engine.has_pending_updates());
        assert_eq!(engine.level(CellPos::ORIGIN), 0);

        let remaining = engine.run_updates(&sources, usize::MAX);
        assert!(remaining > 0);
        assert!(!engine.has_pending_updates());
    }

    #[test]
    fn test_drain_changes_coalesces() {
        let mut engine = LevelPropagator::new(5);
        let mut sources = Sources::default();

        set(&mut engine, &mut sources, CellPos::ORIGIN, 1);
        engine.run_updates(&sources, usize::MAX);
        set(&mut engine, &mut sources, CellPos::ORIGIN, 0);
        engine.run_updates(&sources, usize::MAX);

        let changes = engine.drain_changes();
        let origin = changes.iter().find(|c| c.pos == CellPos::ORIGIN).unwrap();
        assert_eq!((origin.old, origin.new), (4, 0));
        assert!(engine.drain_changes().is_empty());
    }

    proptest! {
        #[test]
        fn prop_levels_match_brute_force(
            ops in proptest::collection::vec((-4i32..=4, -4i32..=4, 0u32..6, any::<bool>()), 1..25)
        ) {
            let max = 8;
            let mut engine = LevelPropagator::new(max + 1);
            let mut sources = Sources::default();

            for (x, z, level, remove) in ops {
                let pos = CellPos::new(x, z);
                if remove {
                    clear(&mut engine, &mut sources, pos);
                } else {
                    set(&mut engine, &mut sources, pos, level);
                }
                // interleave partial work with new updates
                engine.run_updates(&sources, 7);
            }
            engine.run_updates(&sources, usize::MAX);

            for pos in CellPos::ORIGIN.square(4 + max) {
                prop_assert_eq!(engine.level(pos), reference_level(&sources, pos, max), "at {}", pos);
            }
        }
    }
}
