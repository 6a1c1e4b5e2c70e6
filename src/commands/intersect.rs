//! Intersection of flowline segments with grid cells.
//!
//! Each segment is clipped exactly against every candidate cell returned by
//! the spatial index. Runs inside a cell become [`LineFragment`]s; runs that
//! follow a shared cell edge are claimed by exactly one of the cells sharing
//! it, so the fragments of a segment never overlap and their lengths add up
//! to the part of the segment inside the grid.

use crate::diagnostics::{Diagnostic, DiagnosticSink};
use crate::geometry::{clip_polyline, Point};
use crate::grid::{CellId, GridAdapter};
use crate::index::SpatialIndex;
use crate::interval::ArcInterval;
use crate::network::{FlowlineSegment, SegmentId};
use crate::parallel::{map_ordered, ExecutionMode};
use std::fmt;

/// One clip of one segment to one cell.
#[derive(Debug, Clone, PartialEq)]
pub struct LineFragment {
    pub segment_id: SegmentId,
    pub node: usize,
    pub cell: CellId,
    /// Arc-length range along the parent segment, in grid units.
    pub arc: ArcInterval,
    pub points: Vec<Point>,
}

impl LineFragment {
    #[inline]
    pub fn length(&self) -> f64 {
        self.arc.len()
    }
}

/// Statistics from an intersection pass.
#[derive(Debug, Clone, Default)]
pub struct IntersectStats {
    pub mode_used: ExecutionMode,
    pub segments: usize,
    pub fragments: usize,
    pub candidates_tested: usize,
}

impl fmt::Display for IntersectStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Mode: {}, Segments: {}, Candidates: {}, Fragments: {}",
            self.mode_used, self.segments, self.candidates_tested, self.fragments
        )
    }
}

/// A run of a segment in one candidate cell, before boundary claims.
struct CellPiece {
    node: usize,
    arc: ArcInterval,
    on_boundary: bool,
}

/// Clips segments against a grid through a shared spatial index.
pub struct IntersectionEngine<'a, G: GridAdapter + ?Sized> {
    grid: &'a G,
    index: &'a SpatialIndex,
    tolerance: f64,
    min_overlap_length: f64,
}

impl<'a, G: GridAdapter + ?Sized> IntersectionEngine<'a, G> {
    pub fn new(grid: &'a G, index: &'a SpatialIndex, tolerance: f64) -> Self {
        Self {
            grid,
            index,
            tolerance,
            min_overlap_length: 0.0,
        }
    }

    /// Overlaps with a cell must be longer than this to count.
    pub fn with_min_overlap_length(mut self, length: f64) -> Self {
        self.min_overlap_length = length.max(0.0);
        self
    }

    /// Fragments of every segment, in input order.
    pub fn run(
        &self,
        segments: &[&FlowlineSegment],
        sink: &DiagnosticSink,
    ) -> (Vec<Vec<LineFragment>>, IntersectStats) {
        let results = map_ordered(segments, sink, |segment, sink| self.fragments(segment, sink));
        let stats = IntersectStats {
            mode_used: ExecutionMode::select(segments.len()),
            segments: segments.len(),
            fragments: results.iter().map(|(f, _)| f.len()).sum(),
            candidates_tested: results.iter().map(|(_, n)| n).sum(),
        };
        log::debug!("intersection: {}", stats);
        (results.into_iter().map(|(f, _)| f).collect(), stats)
    }

    /// Fragments of one segment ordered by arc-length, plus the number of
    /// candidate cells tested.
    pub fn fragments(
        &self,
        segment: &FlowlineSegment,
        sink: &DiagnosticSink,
    ) -> (Vec<LineFragment>, usize) {
        let line = &segment.geometry;
        if line.is_degenerate(self.tolerance) {
            sink.record(Diagnostic::DegenerateSegment { segment: segment.id });
            return (Vec::new(), 0);
        }

        let candidates = self.index.query_line(line, self.tolerance);
        let mut pieces = Vec::new();
        let mut tangential = 0usize;
        for &node in &candidates {
            let Some(polygon) = self.grid.cell_polygon(node) else {
                continue;
            };
            let clip = clip_polyline(line, &polygon, self.tolerance);
            let overlap = clip.total_length();
            if overlap <= self.min_overlap_length {
                if clip.touched || overlap > 0.0 {
                    tangential += 1;
                    sink.record(Diagnostic::TangentialContact {
                        segment: segment.id,
                        cell: self.grid.cell_id(node),
                        length: overlap,
                    });
                }
                continue;
            }
            pieces.extend(clip.pieces.into_iter().map(|p| CellPiece {
                node,
                arc: p.arc,
                on_boundary: p.on_boundary,
            }));
        }

        let owned = self.claim_boundary_runs(segment, pieces);
        if owned.is_empty() && tangential == 0 {
            sink.record(Diagnostic::OutsideGrid { segment: segment.id });
        }

        let fragments = owned
            .into_iter()
            .map(|(node, arc)| LineFragment {
                segment_id: segment.id,
                node,
                cell: self.grid.cell_id(node),
                arc,
                points: line.slice(&arc),
            })
            .collect();
        (fragments, candidates.len())
    }

    /// Resolve runs along shared edges to a single cell, then join runs that
    /// continue in the same cell.
    ///
    /// Boundary runs are first cut at the ends of every other boundary run,
    /// so each sub-run has one fixed set of claimants and exactly one owner.
    fn claim_boundary_runs(
        &self,
        segment: &FlowlineSegment,
        pieces: Vec<CellPiece>,
    ) -> Vec<(usize, ArcInterval)> {
        let boundary: Vec<&CellPiece> = pieces.iter().filter(|p| p.on_boundary).collect();
        let mut cuts: Vec<f64> = boundary
            .iter()
            .flat_map(|p| [p.arc.start, p.arc.end])
            .collect();
        cuts.sort_by(f64::total_cmp);
        cuts.dedup_by(|a, b| (*a - *b).abs() <= self.tolerance);

        let mut owned: Vec<(usize, ArcInterval)> = Vec::with_capacity(pieces.len());
        for piece in &pieces {
            if !piece.on_boundary {
                owned.push((piece.node, piece.arc));
                continue;
            }
            let (lo, hi) = (piece.arc.start + self.tolerance, piece.arc.end - self.tolerance);
            let inner = cuts.iter().copied().filter(|&c| c > lo && c < hi);
            let mut start = piece.arc.start;
            for end in inner.chain(std::iter::once(piece.arc.end)) {
                let run = ArcInterval::new(start, end);
                start = end;
                if self.owner_of(segment, &boundary, run.midpoint()) == Some(piece.node) {
                    owned.push((piece.node, run));
                }
            }
        }

        owned.sort_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(&b.0)));
        let mut joined: Vec<(usize, ArcInterval)> = Vec::with_capacity(owned.len());
        for (node, arc) in owned {
            if let Some((last_node, last_arc)) = joined.last_mut() {
                if *last_node == node {
                    if let Some(merged) = last_arc.join(&arc, self.tolerance) {
                        *last_arc = merged;
                        continue;
                    }
                }
            }
            joined.push((node, arc));
        }
        joined
    }

    /// The cell that owns the boundary point at arc-length `s`: the grid's own
    /// lookup when it names a claimant, else the lowest claimant node.
    fn owner_of(&self, segment: &FlowlineSegment, boundary: &[&CellPiece], s: f64) -> Option<usize> {
        let claimants: Vec<usize> = boundary
            .iter()
            .filter(|p| p.arc.start - self.tolerance <= s && s <= p.arc.end + self.tolerance)
            .map(|p| p.node)
            .collect();
        segment
            .geometry
            .point_at(s)
            .and_then(|p| self.grid.locate(p))
            .filter(|n| claimants.contains(n))
            .or_else(|| claimants.iter().copied().min())
    }
}
