//! Tests for cell coordinates

use super::*;

#[test]
fn test_packed_round_trip_negative_coordinates() {
    for pos in [
        CellPos::new(0, 0),
        CellPos::new(-1, -1),
        CellPos::new(i32::MIN, i32::MAX),
        CellPos::new(12345, -678),
    ] {
        assert_eq!(CellPos::from_packed(pos.to_packed()), pos);
    }
}

#[test]
fn test_packed_distinct_for_swapped_axes() {
    assert_ne!(
        CellPos::new(1, 2).to_packed(),
        CellPos::new(2, 1).to_packed()
    );
}

#[test]
fn test_chebyshev_distance() {
    let a = CellPos::new(0, 0);
    assert_eq!(a.distance(CellPos::new(3, -1)), 3);
    assert_eq!(a.distance(CellPos::new(-2, 2)), 2);
    assert_eq!(a.distance(a), 0);
}

#[test]
fn test_neighbors_exclude_self() {
    let center = CellPos::new(5, 5);
    let neighbors: Vec<_> = center.neighbors().collect();

    assert_eq!(neighbors.len(), 8);
    assert!(!neighbors.contains(&center));
    assert!(neighbors.iter().all(|n| n.distance(center) == 1));
}

#[test]
fn test_square_scan_order_rows_then_columns() {
    let cells: Vec<_> = CellPos::new(0, 0).square(1).collect();

    assert_eq!(cells.len(), square_area(1));
    assert_eq!(cells[0], CellPos::new(-1, -1));
    assert_eq!(cells[1], CellPos::new(0, -1));
    assert_eq!(cells[3], CellPos::new(-1, 0));
    assert_eq!(cells[8], CellPos::new(1, 1));
}

#[test]
fn test_square_radius_zero_is_center() {
    let cells: Vec<_> = CellPos::new(7, -3).square(0).collect();
    assert_eq!(cells, vec![CellPos::new(7, -3)]);
}

#[test]
fn test_display() {
    assert_eq!(CellPos::new(-4, 9).to_string(), "[-4, 9]");
}
