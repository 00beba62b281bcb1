//! Cell coordinate type definitions

use std::fmt;

/// Position of a cell on the infinite 2-D grid.
///
/// A cell never owns progress data; lifecycle state is keyed by this
/// coordinate in [`crate::lifecycle::CellStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct CellPos {
    /// Column (east-west)
    pub x: i32,
    /// Row (north-south)
    pub z: i32,
}

impl CellPos {
    /// Origin cell.
    pub const ORIGIN: CellPos = CellPos { x: 0, z: 0 };

    #[inline]
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Packs the coordinate into a single `u64` (x in the low half).
    #[inline]
    pub const fn to_packed(self) -> u64 {
        (self.x as u32 as u64) | ((self.z as u32 as u64) << 32)
    }

    /// Inverse of [`CellPos::to_packed`].
    #[inline]
    pub const fn from_packed(packed: u64) -> Self {
        Self {
            x: packed as u32 as i32,
            z: (packed >> 32) as u32 as i32,
        }
    }

    /// Returns the cell displaced by `(dx, dz)`.
    #[inline]
    pub const fn offset(self, dx: i32, dz: i32) -> Self {
        Self {
            x: self.x.wrapping_add(dx),
            z: self.z.wrapping_add(dz),
        }
    }

    /// Chebyshev (chessboard) distance to another cell.
    #[inline]
    pub fn distance(self, other: CellPos) -> u32 {
        let dx = (self.x as i64 - other.x as i64).unsigned_abs();
        let dz = (self.z as i64 - other.z as i64).unsigned_abs();
        dx.max(dz).min(u32::MAX as u64) as u32
    }

    /// The 8 cells at Chebyshev distance 1. The cell itself is excluded.
    #[inline]
    pub fn neighbors(self) -> Neighbors {
        Neighbors {
            center: self,
            index: 0,
        }
    }

    /// All cells within `radius` of this cell, rows (z) outer and columns (x)
    /// inner, both ascending.
    #[inline]
    pub fn square(self, radius: u32) -> SquareIter {
        let r = radius as i32;
        SquareIter {
            min_x: self.x - r,
            max_x: self.x + r,
            max_z: self.z + r,
            x: self.x - r,
            z: self.z - r,
            done: false,
        }
    }
}

impl fmt::Display for CellPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.x, self.z)
    }
}

impl From<(i32, i32)> for CellPos {
    fn from((x, z): (i32, i32)) -> Self {
        Self::new(x, z)
    }
}

/// Offsets of the 8-neighborhood in scan order.
const NEIGHBOR_OFFSETS: [(i32, i32); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (-1, 0),
    (1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

/// Iterator over the 8 neighbors of a cell.
#[derive(Debug, Clone)]
pub struct Neighbors {
    center: CellPos,
    index: usize,
}

impl Iterator for Neighbors {
    type Item = CellPos;

    fn next(&mut self) -> Option<Self::Item> {
        let (dx, dz) = *NEIGHBOR_OFFSETS.get(self.index)?;
        self.index += 1;
        Some(self.center.offset(dx, dz))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = NEIGHBOR_OFFSETS.len() - self.index;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Neighbors {}

/// Iterator over a square of cells in fixed scan order.
#[derive(Debug, Clone)]
pub struct SquareIter {
    min_x: i32,
    max_x: i32,
    max_z: i32,
    x: i32,
    z: i32,
    done: bool,
}

impl Iterator for SquareIter {
    type Item = CellPos;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let pos = CellPos::new(self.x, self.z);
        if self.x < self.max_x {
            self.x += 1;
        } else if self.z < self.max_z {
            self.x = self.min_x;
            self.z += 1;
        } else {
            self.done = true;
        }
        Some(pos)
    }
}
