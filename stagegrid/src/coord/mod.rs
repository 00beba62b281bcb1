//! Cell coordinate module
//!
//! Grid positions, Chebyshev distance, the 8-neighborhood and square scans
//! used by propagation and stage scheduling.

mod types;

pub use types::{CellPos, Neighbors, SquareIter};

/// Number of cells in a square of the given radius.
#[inline]
pub fn square_area(radius: u32) -> usize {
    let side = 2 * radius as usize + 1;
    side * side
}

#[cfg(test)]
mod tests;
