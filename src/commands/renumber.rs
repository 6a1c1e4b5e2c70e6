//! Global numbering and routing of reaches.
//!
//! Segments that produced reaches are ordered upstream-first and numbered
//! `1..=S`; their reaches get global ids `1..=N` in the same order. Segments
//! without reaches are removed and whatever drained into them is relinked
//! to the next segment downstream that still has reaches.

use crate::config::SfrConfig;
use crate::diagnostics::{Diagnostic, DiagnosticSink};
use crate::elevations;
use crate::network::{upstream_first_order, FlowlineNetwork, RoutingCheck, SegmentId};
use rustc_hash::FxHashMap;
use std::fmt;

use super::reaches::Reach;

/// Rise at a confluence below which nothing is reported.
const CONFLUENCE_EPSILON: f64 = 1e-9;

/// Where a reach sends its flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReachTarget {
    Reach(usize),
    Outlet,
}

impl ReachTarget {
    /// Downstream reach id, `0` for an outlet.
    pub fn id(&self) -> usize {
        match self {
            ReachTarget::Reach(id) => *id,
            ReachTarget::Outlet => 0,
        }
    }
}

impl fmt::Display for ReachTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReachTarget::Reach(id) => write!(f, "{}", id),
            ReachTarget::Outlet => f.write_str("outlet"),
        }
    }
}

/// A reach with its global id and routing.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedReach {
    /// Global 1-based reach id.
    pub id: usize,
    /// Renumbered segment the reach belongs to.
    pub segment_number: usize,
    pub reach: Reach,
    pub target: ReachTarget,
    /// Zero-based model layer, when layers were assigned.
    pub layer: Option<usize>,
}

/// A renumbered segment.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedSegment {
    pub number: usize,
    /// Id of the flowline the segment came from.
    pub source: SegmentId,
    /// Downstream segment number, `0` for an outlet.
    pub outseg: usize,
    pub first_reach: usize,
    pub reach_count: usize,
}

impl RoutedSegment {
    /// Global ids of the segment's reaches.
    pub fn reach_ids(&self) -> std::ops::Range<usize> {
        self.first_reach..self.first_reach + self.reach_count
    }
}

/// Counters handing out segment numbers and reach ids in order.
#[derive(Debug, Clone)]
pub struct NumberingContext {
    next_segment: usize,
    next_reach: usize,
}

impl Default for NumberingContext {
    fn default() -> Self {
        Self::new()
    }
}

impl NumberingContext {
    pub fn new() -> Self {
        Self {
            next_segment: 1,
            next_reach: 1,
        }
    }

    pub fn next_segment(&mut self) -> usize {
        let n = self.next_segment;
        self.next_segment += 1;
        n
    }

    pub fn next_reach(&mut self) -> usize {
        let n = self.next_reach;
        self.next_reach += 1;
        n
    }

    pub fn segments_assigned(&self) -> usize {
        self.next_segment - 1
    }

    pub fn reaches_assigned(&self) -> usize {
        self.next_reach - 1
    }
}

/// The routed reach network produced by a run.
#[derive(Debug, Clone, Default)]
pub struct ReachNetwork {
    reaches: Vec<RoutedReach>,
    segments: Vec<RoutedSegment>,
}

impl ReachNetwork {
    /// Reaches ordered by id (`reaches()[i].id == i + 1`).
    pub fn reaches(&self) -> &[RoutedReach] {
        &self.reaches
    }

    pub(crate) fn reaches_mut(&mut self) -> &mut [RoutedReach] {
        &mut self.reaches
    }

    /// Segments ordered by number.
    pub fn segments(&self) -> &[RoutedSegment] {
        &self.segments
    }

    pub fn reach(&self, id: usize) -> Option<&RoutedReach> {
        id.checked_sub(1).and_then(|i| self.reaches.get(i))
    }

    pub fn segment(&self, number: usize) -> Option<&RoutedSegment> {
        number.checked_sub(1).and_then(|i| self.segments.get(i))
    }

    /// The renumbered segment built from flowline `source`.
    pub fn segment_for(&self, source: SegmentId) -> Option<&RoutedSegment> {
        self.segments.iter().find(|s| s.source == source)
    }

    /// Reaches of flowline `source` in flow order.
    pub fn reaches_of(&self, source: SegmentId) -> &[RoutedReach] {
        match self.segment_for(source) {
            Some(seg) => &self.reaches[seg.first_reach - 1..seg.first_reach - 1 + seg.reach_count],
            None => &[],
        }
    }

    pub fn len(&self) -> usize {
        self.reaches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reaches.is_empty()
    }

    /// Total reach length in model units.
    pub fn total_length(&self) -> f64 {
        self.reaches.iter().map(|r| r.reach.length).sum()
    }

    /// Reaches draining out of the network.
    pub fn outlets(&self) -> impl Iterator<Item = &RoutedReach> {
        self.reaches
            .iter()
            .filter(|r| r.target == ReachTarget::Outlet)
    }
}

/// Numbers segments and reaches and wires reach routing.
pub struct Renumberer<'a> {
    network: &'a FlowlineNetwork,
    check: &'a RoutingCheck,
    config: &'a SfrConfig,
}

impl<'a> Renumberer<'a> {
    pub fn new(network: &'a FlowlineNetwork, check: &'a RoutingCheck, config: &'a SfrConfig) -> Self {
        Self {
            network,
            check,
            config,
        }
    }

    /// Build the routed network from per-segment reaches.
    ///
    /// Segments in a cyclic component are skipped even if reaches are
    /// supplied for them.
    pub fn renumber(
        &self,
        reaches: Vec<(SegmentId, Vec<Reach>)>,
        sink: &DiagnosticSink,
    ) -> ReachNetwork {
        let excluded = &self.check.excluded;
        for &(segment, missing) in &self.check.orphans {
            if !excluded.contains(&segment) {
                sink.record(Diagnostic::OrphanDownstream { segment, missing });
            }
        }

        let mut by_segment: FxHashMap<SegmentId, Vec<Reach>> = reaches
            .into_iter()
            .filter(|(id, r)| !r.is_empty() && !excluded.contains(id))
            .collect();

        let active: Vec<SegmentId> = self
            .network
            .segments()
            .iter()
            .map(|s| s.id)
            .filter(|id| !excluded.contains(id))
            .collect();

        let target_of = |id: SegmentId| -> Option<SegmentId> {
            let mut next = self.network.downstream(id);
            let mut steps = 0;
            while let Some(d) = next {
                if by_segment.contains_key(&d) {
                    return Some(d);
                }
                steps += 1;
                if steps > self.network.len() {
                    return None;
                }
                next = self.network.downstream(d);
            }
            None
        };

        let mut kept = Vec::with_capacity(by_segment.len());
        let mut targets: FxHashMap<SegmentId, SegmentId> = FxHashMap::default();
        for &id in &active {
            if by_segment.contains_key(&id) {
                kept.push(id);
                if let Some(t) = target_of(id) {
                    targets.insert(id, t);
                }
            } else {
                sink.record(Diagnostic::NoReaches {
                    segment: id,
                    relinked_to: target_of(id),
                });
            }
        }

        let order = upstream_first_order(&kept, |id| targets.get(&id).copied());

        let mut ctx = NumberingContext::new();
        let mut numbers: FxHashMap<SegmentId, usize> = FxHashMap::default();
        let mut first_reach: FxHashMap<SegmentId, usize> = FxHashMap::default();
        let mut segments = Vec::with_capacity(order.len());
        let mut routed = Vec::new();
        for &id in &order {
            let Some(seg_reaches) = by_segment.remove(&id) else {
                continue;
            };
            let number = ctx.next_segment();
            numbers.insert(id, number);
            let first = ctx.reaches_assigned() + 1;
            first_reach.insert(id, first);
            let count = seg_reaches.len();
            for reach in seg_reaches {
                let rid = ctx.next_reach();
                routed.push(RoutedReach {
                    id: rid,
                    segment_number: number,
                    reach,
                    target: ReachTarget::Outlet,
                    layer: None,
                });
            }
            segments.push(RoutedSegment {
                number,
                source: id,
                outseg: 0,
                first_reach: first,
                reach_count: count,
            });
        }

        for seg in &mut segments {
            let downstream = targets.get(&seg.source).copied();
            seg.outseg = downstream.and_then(|t| numbers.get(&t).copied()).unwrap_or(0);
            let downstream_first = downstream.and_then(|t| first_reach.get(&t).copied());
            let last = seg.first_reach + seg.reach_count - 1;
            for rid in seg.reach_ids() {
                routed[rid - 1].target = if rid < last {
                    ReachTarget::Reach(rid + 1)
                } else {
                    downstream_first.map_or(ReachTarget::Outlet, ReachTarget::Reach)
                };
            }
            if let Some(t_first) = downstream_first {
                let rise = routed[t_first - 1].reach.elevation_up - routed[last - 1].reach.elevation_down;
                if rise > CONFLUENCE_EPSILON {
                    sink.record(Diagnostic::ElevationRiseAtConfluence {
                        upstream: seg.source,
                        downstream: routed[t_first - 1].reach.segment_id,
                        rise,
                    });
                }
            }
        }

        log::debug!(
            "renumbered {} segments, {} reaches",
            ctx.segments_assigned(),
            ctx.reaches_assigned()
        );

        let mut network = ReachNetwork {
            reaches: routed,
            segments,
        };
        if self.config.elevation.auto_correct {
            elevations::smooth_reaches(
                network.reaches_mut(),
                self.config.elevation.min_slope,
                sink,
            );
        }
        network
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics;
    use crate::geometry::Point;
    use crate::grid::CellId;
    use crate::interval::ArcInterval;
    use crate::network::{FlowlineRecord, OUTLET};

    fn network(routing: &[(SegmentId, SegmentId)]) -> FlowlineNetwork {
        let records = routing
            .iter()
            .map(|&(id, to)| {
                FlowlineRecord::new(id, to, vec![Point::new(0.0, 0.0), Point::new(10.0, 0.0)])
                    .with_elevations(10.0, 0.0)
            })
            .collect();
        let (sink, _c) = diagnostics::channel();
        FlowlineNetwork::from_records(records, &SfrConfig::default(), &sink).unwrap()
    }

    fn reaches(segment: SegmentId, n: usize, up: f64, down: f64) -> Vec<Reach> {
        let step = (up - down) / n as f64;
        (0..n)
            .map(|i| Reach {
                segment_id: segment,
                node: i,
                cell: CellId { row: 0, col: i },
                seqno: i + 1,
                points: Vec::new(),
                arc: ArcInterval::new(i as f64, i as f64 + 1.0),
                length: 1.0,
                elevation_up: up - step * i as f64,
                elevation_down: up - step * (i + 1) as f64,
                strtop: up - step * (i as f64 + 0.5),
                width: 1.0,
                slope: step,
            })
            .collect()
    }

    #[test]
    fn test_numbering_upstream_first() {
        // 30 -> 20 -> 10 -> outlet, plus 5 -> 10.
        let net = network(&[(10, OUTLET), (20, 10), (30, 20), (5, 10)]);
        let check = net.check_routing();
        let config = SfrConfig::default();
        let (sink, _c) = diagnostics::channel();
        let routed = Renumberer::new(&net, &check, &config).renumber(
            vec![
                (10, reaches(10, 2, 4.0, 0.0)),
                (20, reaches(20, 1, 6.0, 4.0)),
                (30, reaches(30, 2, 10.0, 6.0)),
                (5, reaches(5, 1, 8.0, 4.0)),
            ],
            &sink,
        );
        let sources: Vec<SegmentId> = routed.segments().iter().map(|s| s.source).collect();
        assert_eq!(sources, vec![5, 30, 20, 10]);
        assert_eq!(routed.len(), 6);
        assert_eq!(routed.segment_for(10).unwrap().outseg, 0);
        assert_eq!(routed.segment_for(30).unwrap().outseg, 3);

        // 5 -> first reach of 10; 30's reaches chain into 20.
        assert_eq!(routed.reach(1).unwrap().target, ReachTarget::Reach(5));
        assert_eq!(routed.reach(2).unwrap().target, ReachTarget::Reach(3));
        assert_eq!(routed.reach(3).unwrap().target, ReachTarget::Reach(4));
        assert_eq!(routed.reach(6).unwrap().target, ReachTarget::Outlet);
        for r in routed.reaches() {
            if let ReachTarget::Reach(t) = r.target {
                assert!(t > r.id);
            }
        }
    }

    #[test]
    fn test_segment_without_reaches_is_relinked() {
        // 3 -> 2 -> 1; 2 produced no reaches.
        let net = network(&[(1, OUTLET), (2, 1), (3, 2)]);
        let check = net.check_routing();
        let config = SfrConfig::default();
        let (sink, collector) = diagnostics::channel();
        let routed = Renumberer::new(&net, &check, &config).renumber(
            vec![
                (1, reaches(1, 1, 2.0, 0.0)),
                (2, Vec::new()),
                (3, reaches(3, 1, 4.0, 2.0)),
            ],
            &sink,
        );
        drop(sink);
        assert_eq!(routed.segments().len(), 2);
        assert_eq!(routed.reach(1).unwrap().reach.segment_id, 3);
        assert_eq!(routed.reach(1).unwrap().target, ReachTarget::Reach(2));
        let report = collector.finish();
        assert_eq!(
            report.diagnostics()[0],
            Diagnostic::NoReaches {
                segment: 2,
                relinked_to: Some(1)
            }
        );
    }

    #[test]
    fn test_cyclic_component_skipped_and_orphan_reported() {
        let net = network(&[(1, 2), (2, 1), (3, OUTLET), (4, 99)]);
        let check = net.check_routing();
        let config = SfrConfig::default();
        let (sink, collector) = diagnostics::channel();
        let routed = Renumberer::new(&net, &check, &config).renumber(
            vec![
                (1, reaches(1, 1, 1.0, 0.0)),
                (2, reaches(2, 1, 1.0, 0.0)),
                (3, reaches(3, 2, 1.0, 0.0)),
                (4, reaches(4, 1, 1.0, 0.0)),
            ],
            &sink,
        );
        drop(sink);
        let sources: Vec<SegmentId> = routed.segments().iter().map(|s| s.source).collect();
        assert_eq!(sources, vec![3, 4]);
        assert_eq!(routed.outlets().count(), 2);
        assert_eq!(collector.finish().count("orphan_downstream"), 1);
    }

    #[test]
    fn test_confluence_rise_reported() {
        let net = network(&[(1, OUTLET), (2, 1)]);
        let check = net.check_routing();
        let config = SfrConfig::default();
        let (sink, collector) = diagnostics::channel();
        Renumberer::new(&net, &check, &config).renumber(
            vec![(1, reaches(1, 1, 9.0, 0.0)), (2, reaches(2, 1, 12.0, 5.0))],
            &sink,
        );
        drop(sink);
        let report = collector.finish();
        assert_eq!(
            report.diagnostics()[0],
            Diagnostic::ElevationRiseAtConfluence {
                upstream: 2,
                downstream: 1,
                rise: 4.0
            }
        );
    }

    #[test]
    fn test_numbering_context() {
        let mut ctx = NumberingContext::new();
        assert_eq!(ctx.next_segment(), 1);
        assert_eq!(ctx.next_reach(), 1);
        assert_eq!(ctx.next_reach(), 2);
        assert_eq!(ctx.segments_assigned(), 1);
        assert_eq!(ctx.reaches_assigned(), 2);
    }
}
