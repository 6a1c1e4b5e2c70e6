//! Reach construction from line fragments.
//!
//! A reach is a fragment with a sequence number and attributes interpolated
//! along the parent segment by arc-length fraction. Lengths, widths and
//! elevations are reported in model units.

use crate::config::SfrConfig;
use crate::diagnostics::{Diagnostic, DiagnosticSink};
use crate::geometry::Point;
use crate::grid::CellId;
use crate::interval::{interpolate, ArcInterval};
use crate::network::{FlowlineSegment, SegmentId};
use crate::parallel::map_ordered;

use super::intersect::LineFragment;

/// Rise below which a reach is not reported as upslope.
const UPSLOPE_EPSILON: f64 = 1e-9;

/// One segment's passage through one cell.
#[derive(Debug, Clone, PartialEq)]
pub struct Reach {
    pub segment_id: SegmentId,
    pub node: usize,
    pub cell: CellId,
    /// 1-based position within the segment.
    pub seqno: usize,
    pub points: Vec<Point>,
    /// Arc-length range along the parent segment, in grid units.
    pub arc: ArcInterval,
    /// Length in model units.
    pub length: f64,
    /// Elevation at the upstream end.
    pub elevation_up: f64,
    /// Elevation at the downstream end.
    pub elevation_down: f64,
    /// Streambed top at the midpoint.
    pub strtop: f64,
    pub width: f64,
    pub slope: f64,
}

impl Reach {
    /// Elevation gained moving downstream; positive means upslope.
    #[inline]
    pub fn rise(&self) -> f64 {
        self.elevation_down - self.elevation_up
    }
}

/// Turns the fragments of a segment into numbered reaches.
pub struct ReachBuilder<'a> {
    config: &'a SfrConfig,
}

impl<'a> ReachBuilder<'a> {
    pub fn new(config: &'a SfrConfig) -> Self {
        Self { config }
    }

    /// Reaches of one segment in flow order.
    ///
    /// Fragments shorter than the tolerance are dropped; the survivors are
    /// numbered `1..=N` without gaps.
    pub fn build(
        &self,
        segment: &FlowlineSegment,
        fragments: &[LineFragment],
        sink: &DiagnosticSink,
    ) -> Vec<Reach> {
        let mut ordered: Vec<&LineFragment> = fragments.iter().collect();
        ordered.sort_by(|a, b| a.arc.cmp(&b.arc));

        let total = segment.length();
        let factor = self.config.length_factor();
        let (e0, e1) = segment.elevations_in(self.config.model_units);
        let (w0, w1) = segment.widths_in(self.config.model_units);

        let mut reaches = Vec::with_capacity(fragments.len());
        for fragment in ordered {
            let arc = fragment.arc;
            if arc.len() < self.config.tolerance {
                sink.record(Diagnostic::ZeroLengthReach {
                    segment: segment.id,
                    cell: fragment.cell,
                    length: arc.len(),
                });
                continue;
            }

            let length = arc.len() * factor;
            let mid = arc.midpoint();
            let elevation_up = interpolate(e0, e1, arc.start, total);
            let elevation_down = interpolate(e0, e1, arc.end, total);
            let reach = Reach {
                segment_id: segment.id,
                node: fragment.node,
                cell: fragment.cell,
                seqno: reaches.len() + 1,
                points: fragment.points.clone(),
                arc,
                length,
                elevation_up,
                elevation_down,
                strtop: interpolate(e0, e1, mid, total),
                width: interpolate(w0, w1, mid, total),
                slope: (elevation_up - elevation_down) / length,
            };
            if reach.rise() > UPSLOPE_EPSILON {
                sink.record(Diagnostic::UpslopeReach {
                    segment: segment.id,
                    seqno: reach.seqno,
                    rise: reach.rise(),
                });
            }
            reaches.push(reach);
        }
        reaches
    }

    /// Build reaches for many segments, pairing each with its fragments.
    pub fn build_all(
        &self,
        work: &[(&FlowlineSegment, Vec<LineFragment>)],
        sink: &DiagnosticSink,
    ) -> Vec<(SegmentId, Vec<Reach>)> {
        map_ordered(work, sink, |(segment, fragments), sink| {
            (segment.id, self.build(segment, fragments, sink))
        })
    }
}
