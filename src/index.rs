//! Bounding-box index over grid cells for candidate retrieval.

use crate::geometry::{expand, Polyline, Rect};
use geo::BoundingRect;
use crate::grid::GridAdapter;
use rstar::{RTree, RTreeObject, AABB};

/// Bounding box of one grid cell, keyed by node.
#[derive(Debug, Clone, Copy)]
struct CellEnvelope {
    node: usize,
    bbox: Rect<f64>,
}

impl RTreeObject for CellEnvelope {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        envelope_of(&self.bbox)
    }
}

fn envelope_of(rect: &Rect<f64>) -> AABB<[f64; 2]> {
    AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y])
}

/// An R-tree of cell bounding boxes.
///
/// Built once per run and shared read-only by the intersection workers.
/// Queries return a conservative superset of the cells a line can touch;
/// exact filtering happens in the clip.
pub struct SpatialIndex {
    tree: RTree<CellEnvelope>,
    len: usize,
}

impl SpatialIndex {
    /// Build an index over every cell of a grid.
    pub fn build<G: GridAdapter + ?Sized>(grid: &G) -> Self {
        let cells: Vec<CellEnvelope> = (0..grid.cell_count())
            .filter_map(|node| {
                grid.cell_polygon(node)
                    .and_then(|poly| poly.bounding_rect())
                    .map(|bbox| CellEnvelope { node, bbox })
            })
            .collect();
        let len = cells.len();
        Self {
            tree: RTree::bulk_load(cells),
            len,
        }
    }

    /// Nodes whose bounding box intersects `bbox`, ascending.
    pub fn query(&self, bbox: &Rect<f64>) -> Vec<usize> {
        let envelope = envelope_of(bbox);
        let mut nodes: Vec<usize> = self
            .tree
            .locate_in_envelope_intersecting(&envelope)
            .map(|cell| cell.node)
            .collect();
        nodes.sort_unstable();
        nodes
    }

    /// Candidate cells for a line. Degenerate lines have none.
    pub fn query_line(&self, line: &Polyline, tolerance: f64) -> Vec<usize> {
        if line.is_degenerate(tolerance) {
            return Vec::new();
        }
        match line.bbox() {
            Some(bbox) => self.query(&expand(&bbox, tolerance)),
            None => Vec::new(),
        }
    }

    /// Number of indexed cells.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if the index is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Point;
    use geo::coord;
    use crate::grid::StructuredGrid;

    fn sample_index() -> SpatialIndex {
        let grid = StructuredGrid::uniform(10, 10, 10.0, 0.0, 0.0).unwrap();
        SpatialIndex::build(&grid)
    }

    #[test]
    fn test_build_index() {
        let index = sample_index();
        assert_eq!(index.len(), 100);
        assert!(!index.is_empty());
    }

    #[test]
    fn test_query_interior_box() {
        let index = sample_index();
        // Strictly inside cell (row 9, col 0).
        let nodes = index.query(&Rect::new(coord! { x: 2.0, y: 2.0 }, coord! { x: 8.0, y: 8.0 }));
        assert_eq!(nodes, vec![90]);
    }

    #[test]
    fn test_query_line_spanning_cells() {
        let index = sample_index();
        let line = Polyline::new(vec![Point::new(5.0, 5.0), Point::new(25.0, 5.0)]);
        let nodes = index.query_line(&line, 1e-9);
        assert_eq!(nodes, vec![90, 91, 92]);
    }

    #[test]
    fn test_degenerate_line_has_no_candidates() {
        let index = sample_index();
        let line = Polyline::new(vec![Point::new(5.0, 5.0), Point::new(5.0, 5.0)]);
        assert!(index.query_line(&line, 1e-9).is_empty());
    }

    #[test]
    fn test_query_outside_grid() {
        let index = sample_index();
        let far = Rect::new(coord! { x: 500.0, y: 500.0 }, coord! { x: 600.0, y: 600.0 });
        assert!(index.query(&far).is_empty());
    }
}
