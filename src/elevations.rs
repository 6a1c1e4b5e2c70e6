//! Elevation smoothing.
//!
//! Two passes keep streambed elevations from rising downstream. The segment
//! pass runs on the flowline network before intersection; the reach pass
//! runs on routed reaches in id order, which is upstream-first.

use crate::commands::renumber::{ReachTarget, RoutedReach};
use crate::diagnostics::{Diagnostic, DiagnosticSink};
use crate::network::{upstream_first_order, FlowlineNetwork, SegmentId};
use rustc_hash::FxHashSet;

/// Changes smaller than this are not reported.
const ADJUSTMENT_EPSILON: f64 = 1e-9;

/// Lower segment end elevations so nothing rises across a confluence or
/// along a segment. Returns the number of segments changed.
///
/// Each segment starts no higher than the lowest end of the segments
/// draining into it and ends no higher than it starts.
pub fn smooth_segments(
    network: &mut FlowlineNetwork,
    excluded: &FxHashSet<SegmentId>,
    sink: &DiagnosticSink,
) -> usize {
    let ids: Vec<SegmentId> = network
        .segments()
        .iter()
        .map(|s| s.id)
        .filter(|id| !excluded.contains(id))
        .collect();
    let order = upstream_first_order(&ids, |id| network.downstream(id));

    let mut changed = 0;
    for id in order {
        let upstream_min = network
            .upstream(id)
            .iter()
            .filter_map(|&u| network.get(u))
            .map(|u| u.elevation_end)
            .fold(f64::INFINITY, f64::min);
        let Some(segment) = network.get_mut(id) else {
            continue;
        };
        let start = segment.elevation_start.min(upstream_min);
        let end = segment.elevation_end.min(start);
        let adjustment =
            (segment.elevation_start - start).max(segment.elevation_end - end);
        if adjustment > ADJUSTMENT_EPSILON {
            segment.elevation_start = start;
            segment.elevation_end = end;
            changed += 1;
            sink.record(Diagnostic::ElevationCorrected {
                segment: id,
                seqno: None,
                adjustment,
            });
        }
    }
    if changed > 0 {
        log::info!("smoothed elevations of {} segments", changed);
    }
    changed
}

/// Lower reach elevations so they never rise downstream and every slope is
/// at least `min_slope`. `reaches` must be ordered by id. Returns the number
/// of reaches changed.
pub fn smooth_reaches(reaches: &mut [RoutedReach], min_slope: f64, sink: &DiagnosticSink) -> usize {
    // Lowest downstream elevation among the reaches draining into each id.
    let mut cap = vec![f64::INFINITY; reaches.len() + 1];
    let mut changed = 0;

    for routed in reaches.iter_mut() {
        let reach = &mut routed.reach;
        let up = reach
            .elevation_up
            .min(cap.get(routed.id).copied().unwrap_or(f64::INFINITY));
        let down = reach
            .elevation_down
            .min(up - min_slope * reach.length);
        let adjustment = (reach.elevation_up - up).max(reach.elevation_down - down);
        if adjustment > ADJUSTMENT_EPSILON {
            reach.elevation_up = up;
            reach.elevation_down = down;
            reach.strtop = 0.5 * (up + down);
            reach.slope = (up - down) / reach.length;
            changed += 1;
            sink.record(Diagnostic::ElevationCorrected {
                segment: reach.segment_id,
                seqno: Some(reach.seqno),
                adjustment,
            });
        }
        if let ReachTarget::Reach(t) = routed.target {
            if let Some(c) = cap.get_mut(t) {
                *c = c.min(routed.reach.elevation_down);
            }
        }
    }
    if changed > 0 {
        log::info!("smoothed elevations of {} reaches", changed);
    }
    changed
}
