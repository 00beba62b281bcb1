//! Stage identifiers and definitions.

use std::fmt;

/// Index of a stage in the pipeline's total order.
///
/// Stage 0 is the base stage: content loaded from storage (or created
/// empty). Every later stage has the preceding stage as its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StageId(u8);

impl StageId {
    /// The base stage.
    pub const BASE: StageId = StageId(0);

    /// Largest representable stage index.
    pub const MAX_INDEX: usize = u8::MAX as usize - 1;

    /// Creates a stage id from its index.
    ///
    /// # Panics
    ///
    /// Panics if `index` exceeds [`StageId::MAX_INDEX`].
    pub const fn new(index: usize) -> Self {
        assert!(index <= Self::MAX_INDEX, "stage index out of range");
        Self(index as u8)
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Parent stage, or `None` for the base stage.
    #[inline]
    pub fn parent(self) -> Option<StageId> {
        self.0.checked_sub(1).map(StageId)
    }

    /// Next stage in the total order. Bounds are checked by the pipeline.
    #[inline]
    pub fn next(self) -> StageId {
        StageId(self.0.saturating_add(1))
    }

    /// Raw encoding used by atomic markers.
    #[inline]
    pub(crate) const fn raw(self) -> u8 {
        self.0
    }

    #[inline]
    pub(crate) const fn from_raw(raw: u8) -> Self {
        Self(raw)
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Static description of one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageDef {
    pub id: StageId,
    pub name: String,
    /// Preceding stage; `None` for the base stage.
    pub parent: Option<StageId>,
    /// Rings of neighbor content the generation transform reads.
    pub transform_radius: u32,
    /// Rings of neighbor content the transform may mutate. `None` forbids
    /// neighbor writes entirely.
    pub write_radius: Option<u32>,
}

/// Which pyramid a step belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PyramidKind {
    /// Cells are assumed freshly generated.
    Generation,
    /// Cells may be loaded from storage instead of regenerated.
    Loading,
}

impl fmt::Display for PyramidKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PyramidKind::Generation => write!(f, "generation"),
            PyramidKind::Loading => write!(f, "loading"),
        }
    }
}

/// Work performed by a pyramid step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepTask {
    /// Read the cell from storage or start empty.
    Load,
    /// Run the opaque stage transform.
    Transform,
    /// Reuse the parent-stage content unchanged.
    Passthrough,
}
