//! Flowline routing network.
//!
//! A [`FlowlineNetwork`] is built once from raw [`FlowlineRecord`]s and is
//! read-only afterwards. Construction resolves everything that depends on
//! attribute names, units or diversions, so later stages only see typed
//! [`FlowlineSegment`]s with exactly one downstream target each.
//!
//! Routing checks ([`FlowlineNetwork::check_routing`]) find cycles and
//! references to segments that are not in the network. A network with a
//! single downstream pointer per segment is a functional graph, so each
//! connected component holds at most one cycle and every segment of that
//! component drains into it.

use crate::config::{DiversionPolicy, LengthUnit, SfrConfig};
use crate::diagnostics::{Diagnostic, DiagnosticSink};
use crate::error::{Result, SfrError};
use crate::geometry::{Point, Polyline};
use rustc_hash::{FxHashMap, FxHashSet};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};
use std::fmt;

/// Identifier of a flowline segment (e.g. an NHDPlus COMID).
pub type SegmentId = i64;

/// Downstream id meaning "leaves the network".
pub const OUTLET: SegmentId = 0;

/// Value of an optional named attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Number(f64),
    Text(String),
}

impl AttrValue {
    /// Numeric when the text parses as a finite number.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().parse::<f64>() {
            Ok(v) if v.is_finite() => AttrValue::Number(v),
            _ => AttrValue::Text(raw.to_string()),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttrValue::Number(v) => Some(*v),
            AttrValue::Text(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Text(s) => Some(s),
            AttrValue::Number(_) => None,
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Number(v) => write!(f, "{}", v),
            AttrValue::Text(s) => f.write_str(s),
        }
    }
}

/// One input row: routing, vertices and named attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowlineRecord {
    pub id: SegmentId,
    /// Downstream targets; empty or `[OUTLET]` for an outlet, more than one
    /// for a diversion.
    pub downstream_ids: Vec<SegmentId>,
    pub points: Vec<Point>,
    /// Per-vertex elevations, when the geometry carries them.
    pub z: Option<Vec<f64>>,
    pub attributes: BTreeMap<String, AttrValue>,
}

impl FlowlineRecord {
    pub fn new(id: SegmentId, downstream_id: SegmentId, points: Vec<Point>) -> Self {
        Self {
            id,
            downstream_ids: vec![downstream_id],
            points,
            z: None,
            attributes: BTreeMap::new(),
        }
    }

    /// Set a named attribute.
    pub fn with_attr(mut self, key: impl Into<String>, value: AttrValue) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Set start/end elevations using the default attribute names.
    pub fn with_elevations(self, start: f64, end: f64) -> Self {
        self.with_attr("elevup", AttrValue::Number(start))
            .with_attr("elevdn", AttrValue::Number(end))
    }

    /// Set start/end widths using the default attribute names.
    pub fn with_widths(self, start: f64, end: f64) -> Self {
        self.with_attr("width1", AttrValue::Number(start))
            .with_attr("width2", AttrValue::Number(end))
    }

    fn number(&self, key: &str) -> Option<f64> {
        self.attributes.get(key).and_then(AttrValue::as_f64)
    }
}

/// A validated flowline with a single downstream target.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowlineSegment {
    pub id: SegmentId,
    pub geometry: Polyline,
    /// Next segment, or [`OUTLET`].
    pub downstream_id: SegmentId,
    pub name: Option<String>,
    pub width_start: f64,
    pub width_end: f64,
    pub elevation_start: f64,
    pub elevation_end: f64,
    /// Units of the width attributes.
    pub length_units: LengthUnit,
    /// Units of the elevation attributes.
    pub height_units: LengthUnit,
    /// False for minor distributaries cut off at a diversion.
    pub main_channel: bool,
    /// Total upstream channel length in kilometers. Restarts from zero at
    /// minor distributaries.
    pub arbolate_sum: Option<f64>,
    /// Attributes not consumed by construction.
    pub attributes: BTreeMap<String, AttrValue>,
}

impl FlowlineSegment {
    /// Arc-length of the geometry in grid units.
    #[inline]
    pub fn length(&self) -> f64 {
        self.geometry.length()
    }

    #[inline]
    pub fn is_outlet(&self) -> bool {
        self.downstream_id == OUTLET
    }

    /// Start and end elevations converted to `unit`.
    pub fn elevations_in(&self, unit: LengthUnit) -> (f64, f64) {
        let f = self.height_units.factor_to(unit);
        (self.elevation_start * f, self.elevation_end * f)
    }

    /// Start and end widths converted to `unit`.
    pub fn widths_in(&self, unit: LengthUnit) -> (f64, f64) {
        let f = self.length_units.factor_to(unit);
        (self.width_start * f, self.width_end * f)
    }
}

/// Channel width estimated from arbolate sum, in meters.
///
/// `width = a * asum^b` with the arbolate sum in meters, never below
/// `minimum_width_m`.
pub fn width_from_arbolate_sum(asum_km: f64, a: f64, b: f64, minimum_width_m: f64) -> f64 {
    let asum_m = (asum_km * 1000.0).max(0.0);
    (a * asum_m.powf(b)).max(minimum_width_m)
}

/// Result of [`FlowlineNetwork::check_routing`].
#[derive(Debug, Clone, Default)]
pub struct RoutingCheck {
    /// Each cycle in downstream order, starting at its lowest id.
    pub cycles: Vec<Vec<SegmentId>>,
    /// Every segment of a component that contains a cycle.
    pub excluded: FxHashSet<SegmentId>,
    /// `(segment, missing downstream id)` pairs.
    pub orphans: Vec<(SegmentId, SegmentId)>,
}

/// The directed graph of flowline segments.
#[derive(Debug, Clone)]
pub struct FlowlineNetwork {
    segments: Vec<FlowlineSegment>,
    index: FxHashMap<SegmentId, usize>,
    upstream: FxHashMap<SegmentId, Vec<SegmentId>>,
}

impl FlowlineNetwork {
    /// Build a network from raw records.
    ///
    /// Applies the configured edits, resolves attributes and diversions,
    /// restarts arbolate sums at minor distributaries, estimates widths and
    /// culls segments below the arbolate-sum threshold. Fails on structural
    /// problems: duplicate or reserved ids, edits naming unknown segments,
    /// missing elevations, unusable geometry, or diversions under
    /// [`DiversionPolicy::Reject`].
    pub fn from_records(
        records: Vec<FlowlineRecord>,
        config: &SfrConfig,
        sink: &DiagnosticSink,
    ) -> Result<Self> {
        let records = apply_edits(records, config)?;

        let mut seen = FxHashSet::default();
        let mut segments = Vec::with_capacity(records.len());
        let mut targets = Vec::with_capacity(records.len());
        let mut explicit_widths = Vec::with_capacity(records.len());
        for record in records {
            if record.id == OUTLET {
                return Err(SfrError::ReservedId(record.id));
            }
            if !seen.insert(record.id) {
                return Err(SfrError::DuplicateSegment(record.id));
            }
            let mut downstream: Vec<SegmentId> = record
                .downstream_ids
                .iter()
                .copied()
                .filter(|&d| d != OUTLET)
                .collect();
            downstream.dedup();
            targets.push(downstream);
            let (segment, widths) = resolve_segment(record, config)?;
            segments.push(segment);
            explicit_widths.push(widths);
        }

        resolve_diversions(&mut segments, targets, config, sink)?;
        restart_minor_arbolate_sums(&mut segments, config);
        for (segment, explicit) in segments.iter_mut().zip(explicit_widths) {
            (segment.width_start, segment.width_end) =
                resolve_widths(explicit, segment.arbolate_sum, segment.length(), config);
        }
        if let Some(threshold) = config.asum_thresh {
            segments = cull_by_arbolate_sum(segments, threshold, sink);
        }
        Ok(Self::from_segments(segments))
    }

    /// Index already validated segments.
    pub(crate) fn from_segments(segments: Vec<FlowlineSegment>) -> Self {
        let index: FxHashMap<SegmentId, usize> =
            segments.iter().enumerate().map(|(i, s)| (s.id, i)).collect();
        let mut upstream: FxHashMap<SegmentId, Vec<SegmentId>> = FxHashMap::default();
        for s in &segments {
            if s.downstream_id != OUTLET && index.contains_key(&s.downstream_id) {
                upstream.entry(s.downstream_id).or_default().push(s.id);
            }
        }
        for ups in upstream.values_mut() {
            ups.sort_unstable();
        }
        Self {
            segments,
            index,
            upstream,
        }
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Segments in input order.
    pub fn segments(&self) -> &[FlowlineSegment] {
        &self.segments
    }

    pub fn get(&self, id: SegmentId) -> Option<&FlowlineSegment> {
        self.index.get(&id).map(|&i| &self.segments[i])
    }

    pub(crate) fn get_mut(&mut self, id: SegmentId) -> Option<&mut FlowlineSegment> {
        self.index.get(&id).map(|&i| &mut self.segments[i])
    }

    pub fn contains(&self, id: SegmentId) -> bool {
        self.index.contains_key(&id)
    }

    /// The downstream segment, if it exists in the network.
    pub fn downstream(&self, id: SegmentId) -> Option<SegmentId> {
        let d = self.get(id)?.downstream_id;
        (d != OUTLET && self.contains(d)).then_some(d)
    }

    /// Segments routing directly into `id`, ascending.
    pub fn upstream(&self, id: SegmentId) -> &[SegmentId] {
        self.upstream.get(&id).map_or(&[], Vec::as_slice)
    }

    /// Segments leaving the network (outlet or orphan reference).
    pub fn outlets(&self) -> impl Iterator<Item = SegmentId> + '_ {
        self.segments
            .iter()
            .filter(|s| self.downstream(s.id).is_none())
            .map(|s| s.id)
    }

    /// Follow routing downstream from `start`, including it.
    ///
    /// Stops at an outlet, at a missing segment, before revisiting a segment,
    /// or after `limit` segments.
    pub fn find_path(&self, start: SegmentId, limit: Option<usize>) -> Vec<SegmentId> {
        let mut path = Vec::new();
        if !self.contains(start) {
            return path;
        }
        let mut visited = FxHashSet::default();
        let mut current = Some(start);
        while let Some(id) = current {
            if limit.is_some_and(|l| path.len() >= l) || !visited.insert(id) {
                break;
            }
            path.push(id);
            current = self.downstream(id);
        }
        path
    }

    /// Find routing cycles, the components they poison, and orphan references.
    pub fn check_routing(&self) -> RoutingCheck {
        let mut check = RoutingCheck::default();

        for s in &self.segments {
            if s.downstream_id != OUTLET && !self.contains(s.downstream_id) {
                check.orphans.push((s.id, s.downstream_id));
            }
        }

        // 0 = unvisited, 1 = on the current walk, 2 = finished.
        let mut state = vec![0u8; self.segments.len()];
        for start in 0..self.segments.len() {
            if state[start] != 0 {
                continue;
            }
            let mut walk = Vec::new();
            let mut current = Some(start);
            while let Some(i) = current {
                match state[i] {
                    0 => {
                        state[i] = 1;
                        walk.push(i);
                        current = self
                            .downstream(self.segments[i].id)
                            .and_then(|d| self.index.get(&d).copied());
                    }
                    1 => {
                        if let Some(pos) = walk.iter().position(|&w| w == i) {
                            let mut cycle: Vec<SegmentId> =
                                walk[pos..].iter().map(|&w| self.segments[w].id).collect();
                            let lowest = (0..cycle.len())
                                .min_by_key(|&k| cycle[k])
                                .unwrap_or(0);
                            cycle.rotate_left(lowest);
                            check.cycles.push(cycle);
                        }
                        break;
                    }
                    _ => break,
                }
            }
            for i in walk {
                state[i] = 2;
            }
        }

        for cycle in &check.cycles {
            let mut stack: Vec<SegmentId> = cycle.clone();
            while let Some(id) = stack.pop() {
                if check.excluded.insert(id) {
                    stack.extend_from_slice(self.upstream(id));
                }
            }
        }

        check.cycles.sort();
        check
    }

    /// Size of the component draining into `cycle` (after `check_routing`).
    pub fn component_size(&self, cycle: &[SegmentId]) -> usize {
        let mut seen = FxHashSet::default();
        let mut stack: Vec<SegmentId> = cycle.to_vec();
        while let Some(id) = stack.pop() {
            if seen.insert(id) {
                stack.extend_from_slice(self.upstream(id));
            }
        }
        seen.len()
    }
}

/// Order `ids` so every segment comes before the segment it routes to.
///
/// `downstream` maps a segment to its target within `ids`, if any. Ties are
/// broken by ascending id so the order is deterministic. Segments on a cycle
/// never become ready and are left out.
pub fn upstream_first_order<F>(ids: &[SegmentId], downstream: F) -> Vec<SegmentId>
where
    F: Fn(SegmentId) -> Option<SegmentId>,
{
    let members: FxHashSet<SegmentId> = ids.iter().copied().collect();
    let mut indegree: FxHashMap<SegmentId, usize> = ids.iter().map(|&id| (id, 0)).collect();
    for &id in ids {
        if let Some(d) = downstream(id).filter(|d| members.contains(d)) {
            *indegree.entry(d).or_default() += 1;
        }
    }

    let mut ready: BinaryHeap<Reverse<SegmentId>> = indegree
        .iter()
        .filter(|(_, &n)| n == 0)
        .map(|(&id, _)| Reverse(id))
        .collect();
    let mut order = Vec::with_capacity(ids.len());
    while let Some(Reverse(id)) = ready.pop() {
        order.push(id);
        if let Some(d) = downstream(id).filter(|d| members.contains(d)) {
            if let Some(n) = indegree.get_mut(&d) {
                *n -= 1;
                if *n == 0 {
                    ready.push(Reverse(d));
                }
            }
        }
    }
    order
}

fn apply_edits(records: Vec<FlowlineRecord>, config: &SfrConfig) -> Result<Vec<FlowlineRecord>> {
    let edits = &config.edits;
    if edits.drop.is_empty() && edits.reroute.is_empty() {
        return Ok(records);
    }
    let drop: FxHashSet<SegmentId> = edits.drop.iter().copied().collect();
    let present: FxHashSet<SegmentId> = records.iter().map(|r| r.id).collect();
    if let Some(&missing) = edits.reroute.keys().find(|id| !present.contains(id)) {
        return Err(SfrError::UnknownSegment(missing));
    }
    if let Some(&missing) = edits
        .reroute
        .values()
        .find(|&&to| to != OUTLET && (!present.contains(&to) || drop.contains(&to)))
    {
        return Err(SfrError::UnknownSegment(missing));
    }

    let mut kept = Vec::with_capacity(records.len());
    for mut record in records {
        if drop.contains(&record.id) {
            log::debug!("dropping segment {} by edit", record.id);
            continue;
        }
        if let Some(&to) = edits.reroute.get(&record.id) {
            log::debug!("rerouting segment {} to {}", record.id, to);
            record.downstream_ids = vec![to];
        }
        kept.push(record);
    }
    Ok(kept)
}

/// Start and end widths given as attributes, in width units.
type ExplicitWidths = (Option<f64>, Option<f64>);

/// Validate one record. Widths are left at zero; the explicit ones are
/// returned so they can be resolved once arbolate sums are final.
fn resolve_segment(
    record: FlowlineRecord,
    config: &SfrConfig,
) -> Result<(FlowlineSegment, ExplicitWidths)> {
    let id = record.id;
    if record.points.len() < 2 {
        return Err(SfrError::InvalidGeometry {
            segment: id,
            reason: format!("{} vertices, need at least 2", record.points.len()),
        });
    }
    if record
        .points
        .iter()
        .any(|p| !(p.x().is_finite() && p.y().is_finite()))
    {
        return Err(SfrError::InvalidGeometry {
            segment: id,
            reason: "non-finite coordinate".to_string(),
        });
    }
    if let Some(z) = &record.z {
        if z.len() != record.points.len() {
            return Err(SfrError::InvalidGeometry {
                segment: id,
                reason: format!("{} z values for {} vertices", z.len(), record.points.len()),
            });
        }
    }

    let fields = &config.fields;
    let z_first = record.z.as_ref().and_then(|z| z.first().copied());
    let z_last = record.z.as_ref().and_then(|z| z.last().copied());
    let elevation_start = record
        .number(&fields.elevation_start)
        .or(z_first)
        .ok_or(SfrError::MissingField {
            segment: id,
            field: "elevation_start",
        })?;
    let elevation_end = record
        .number(&fields.elevation_end)
        .or(z_last)
        .ok_or(SfrError::MissingField {
            segment: id,
            field: "elevation_end",
        })?;

    let explicit = (
        record.number(&fields.width_start),
        record.number(&fields.width_end),
    );
    let arbolate_sum = record.number(&fields.arbolate_sum);
    let geometry = Polyline::new(record.points);

    let name = record
        .attributes
        .get(&fields.name)
        .map(|v| v.to_string())
        .filter(|s| !s.is_empty());

    let mut attributes = record.attributes;
    for key in [
        &fields.name,
        &fields.width_start,
        &fields.width_end,
        &fields.elevation_start,
        &fields.elevation_end,
    ] {
        attributes.remove(key);
    }

    let segment = FlowlineSegment {
        id,
        geometry,
        downstream_id: OUTLET,
        name,
        width_start: 0.0,
        width_end: 0.0,
        elevation_start,
        elevation_end,
        length_units: config.width_units,
        height_units: config.elevation_units,
        main_channel: true,
        arbolate_sum,
        attributes,
    };
    Ok((segment, explicit))
}

/// Widths in the configured width units: explicit attributes, else the
/// arbolate-sum estimate, else the configured default.
fn resolve_widths(
    (w1, w2): ExplicitWidths,
    arbolate_sum: Option<f64>,
    length: f64,
    config: &SfrConfig,
) -> (f64, f64) {
    let to_width_units = config.model_units.factor_to(config.width_units);
    if let (Some(a), Some(b)) = (w1, w2) {
        return (a, b);
    }
    if let Some(asum) = arbolate_sum {
        let w = &config.width;
        let length_km = length * config.grid_units.factor_to(LengthUnit::Kilometers);
        let min_m = w.minimum_width * config.model_units.factor_to(LengthUnit::Meters);
        let m_to_width = LengthUnit::Meters.factor_to(config.width_units);
        let start = width_from_arbolate_sum(asum - length_km, w.asum_a, w.asum_b, min_m);
        let end = width_from_arbolate_sum(asum, w.asum_a, w.asum_b, min_m);
        return (
            w1.unwrap_or(start * m_to_width),
            w2.unwrap_or(end * m_to_width),
        );
    }
    let default = config.width.default_width * to_width_units;
    let start = w1.or(w2).unwrap_or(default);
    let end = w2.or(w1).unwrap_or(default);
    (start, end)
}

/// Pick one downstream target per segment.
fn resolve_diversions(
    segments: &mut [FlowlineSegment],
    targets: Vec<Vec<SegmentId>>,
    config: &SfrConfig,
    sink: &DiagnosticSink,
) -> Result<()> {
    let start_elevation: FxHashMap<SegmentId, f64> = segments
        .iter()
        .map(|s| (s.id, s.elevations_in(config.model_units).0))
        .collect();
    let mut minor: FxHashSet<SegmentId> = FxHashSet::default();

    for (segment, downstream) in segments.iter_mut().zip(targets) {
        segment.downstream_id = match downstream.len() {
            0 => OUTLET,
            1 => downstream[0],
            _ => {
                if config.diversions == DiversionPolicy::Reject {
                    return Err(SfrError::UnresolvedDiversion {
                        segment: segment.id,
                        targets: downstream,
                    });
                }
                let primary = config
                    .known_connections
                    .get(&segment.id)
                    .copied()
                    .unwrap_or_else(|| lowest_target(&downstream, &start_elevation));
                let others: Vec<SegmentId> =
                    downstream.into_iter().filter(|&d| d != primary).collect();
                minor.extend(others.iter().copied());
                sink.record(Diagnostic::Diversion {
                    segment: segment.id,
                    primary,
                    minor: others,
                });
                primary
            }
        };
    }

    for segment in segments.iter_mut() {
        if minor.contains(&segment.id) {
            segment.main_channel = false;
        }
    }
    Ok(())
}

/// Restart arbolate sums at minor distributaries that carry one.
///
/// A minor distributary and the segments below it accumulate their own
/// channel length from the point of divergence until the path meets a
/// confluence or leaves the network. Every other segment keeps its input sum.
fn restart_minor_arbolate_sums(segments: &mut [FlowlineSegment], config: &SfrConfig) {
    let index: FxHashMap<SegmentId, usize> =
        segments.iter().enumerate().map(|(i, s)| (s.id, i)).collect();
    let mut tributaries: FxHashMap<SegmentId, usize> = FxHashMap::default();
    for s in segments.iter() {
        if index.contains_key(&s.downstream_id) {
            *tributaries.entry(s.downstream_id).or_default() += 1;
        }
    }
    let to_km = config.grid_units.factor_to(LengthUnit::Kilometers);
    let starts: Vec<usize> = (0..segments.len())
        .filter(|&i| !segments[i].main_channel && segments[i].arbolate_sum.is_some())
        .collect();

    for start in starts {
        let mut sum = 0.0;
        let mut visited = FxHashSet::default();
        let mut current = Some(start);
        while let Some(i) = current {
            let id = segments[i].id;
            if tributaries.get(&id).copied().unwrap_or(0) > 1 || !visited.insert(id) {
                break;
            }
            sum += segments[i].length() * to_km;
            segments[i].arbolate_sum = Some(sum);
            current = index.get(&segments[i].downstream_id).copied();
        }
        log::debug!(
            "restarted arbolate sums below minor distributary {} ({} segments)",
            segments[start].id,
            visited.len()
        );
    }
}

/// Drop segments whose arbolate sum is below `threshold` kilometers.
///
/// Segments routing into a dropped one are passed on to its first surviving
/// downstream segment.
fn cull_by_arbolate_sum(
    segments: Vec<FlowlineSegment>,
    threshold: f64,
    sink: &DiagnosticSink,
) -> Vec<FlowlineSegment> {
    let culled: FxHashMap<SegmentId, SegmentId> = segments
        .iter()
        .filter(|s| s.arbolate_sum.is_some_and(|a| a < threshold))
        .map(|s| (s.id, s.downstream_id))
        .collect();
    if culled.is_empty() {
        return segments;
    }
    log::info!(
        "culling {} segments with arbolate sum below {} km",
        culled.len(),
        threshold
    );

    let mut kept = Vec::with_capacity(segments.len() - culled.len());
    for mut segment in segments {
        if culled.contains_key(&segment.id) {
            sink.record(Diagnostic::Culled {
                segment: segment.id,
                arbolate_sum: segment.arbolate_sum.unwrap_or(0.0),
            });
            continue;
        }
        let mut target = segment.downstream_id;
        let mut hops = 0;
        while let Some(&next) = culled.get(&target) {
            hops += 1;
            if hops > culled.len() {
                target = OUTLET;
                break;
            }
            target = next;
        }
        segment.downstream_id = target;
        kept.push(segment);
    }
    kept
}

/// Target with the lowest start elevation; targets outside the network rank last.
fn lowest_target(targets: &[SegmentId], start_elevation: &FxHashMap<SegmentId, f64>) -> SegmentId {
    targets
        .iter()
        .copied()
        .min_by(|a, b| {
            let ea = start_elevation.get(a).copied().unwrap_or(f64::INFINITY);
            let eb = start_elevation.get(b).copied().unwrap_or(f64::INFINITY);
            ea.total_cmp(&eb).then(a.cmp(b))
        })
        .unwrap_or(OUTLET)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics;

    fn straight(id: SegmentId, to: SegmentId, x0: f64, x1: f64) -> FlowlineRecord {
        FlowlineRecord::new(id, to, vec![Point::new(x0, 0.0), Point::new(x1, 0.0)])
            .with_elevations(10.0, 5.0)
    }

    fn build(records: Vec<FlowlineRecord>, config: &SfrConfig) -> Result<FlowlineNetwork> {
        let (sink, _collector) = diagnostics::channel();
        FlowlineNetwork::from_records(records, config, &sink)
    }

    #[test]
    fn test_upstream_and_outlets() {
        let net = build(
            vec![
                straight(1, 3, 0.0, 10.0),
                straight(2, 3, 0.0, 10.0),
                straight(3, OUTLET, 10.0, 20.0),
            ],
            &SfrConfig::default(),
        )
        .unwrap();
        assert_eq!(net.upstream(3), &[1, 2]);
        assert!(net.upstream(1).is_empty());
        assert_eq!(net.downstream(1), Some(3));
        assert_eq!(net.outlets().collect::<Vec<_>>(), vec![3]);
        assert_eq!(net.find_path(1, None), vec![1, 3]);
        assert_eq!(net.find_path(1, Some(1)), vec![1]);
    }

    #[test]
    fn test_duplicate_and_reserved_ids() {
        let config = SfrConfig::default();
        let err = build(vec![straight(1, 0, 0.0, 1.0), straight(1, 0, 0.0, 1.0)], &config);
        assert!(matches!(err, Err(SfrError::DuplicateSegment(1))));
        let err = build(vec![straight(0, 0, 0.0, 1.0)], &config);
        assert!(matches!(err, Err(SfrError::ReservedId(0))));
    }

    #[test]
    fn test_missing_elevation_falls_back_to_z() {
        let mut record = FlowlineRecord::new(1, 0, vec![Point::new(0.0, 0.0), Point::new(1.0, 0.0)]);
        record.z = Some(vec![12.0, 8.0]);
        let net = build(vec![record], &SfrConfig::default()).unwrap();
        let s = net.get(1).unwrap();
        assert_eq!((s.elevation_start, s.elevation_end), (12.0, 8.0));

        let bare = FlowlineRecord::new(2, 0, vec![Point::new(0.0, 0.0), Point::new(1.0, 0.0)]);
        let err = build(vec![bare], &SfrConfig::default());
        assert!(matches!(
            err,
            Err(SfrError::MissingField {
                segment: 2,
                field: "elevation_start"
            })
        ));
    }

    #[test]
    fn test_invalid_geometry() {
        let record = FlowlineRecord::new(1, 0, vec![Point::new(0.0, 0.0)]).with_elevations(1.0, 0.0);
        assert!(matches!(
            build(vec![record], &SfrConfig::default()),
            Err(SfrError::InvalidGeometry { segment: 1, .. })
        ));
    }

    #[test]
    fn test_cycle_detection_excludes_component() {
        let net = build(
            vec![
                straight(1, 2, 0.0, 1.0),
                straight(2, 1, 1.0, 2.0),
                straight(5, 1, 3.0, 4.0),
                straight(9, OUTLET, 5.0, 6.0),
            ],
            &SfrConfig::default(),
        )
        .unwrap();
        let check = net.check_routing();
        assert_eq!(check.cycles, vec![vec![1, 2]]);
        assert!(check.excluded.contains(&5));
        assert!(!check.excluded.contains(&9));
        assert_eq!(net.component_size(&[1, 2]), 3);
    }

    #[test]
    fn test_self_loop_is_a_cycle() {
        let net = build(vec![straight(4, 4, 0.0, 1.0)], &SfrConfig::default()).unwrap();
        assert_eq!(net.check_routing().cycles, vec![vec![4]]);
    }

    #[test]
    fn test_orphan_reference() {
        let net = build(vec![straight(1, 77, 0.0, 1.0)], &SfrConfig::default()).unwrap();
        let check = net.check_routing();
        assert_eq!(check.orphans, vec![(1, 77)]);
        assert_eq!(net.downstream(1), None);
        assert_eq!(net.outlets().count(), 1);
    }

    #[test]
    fn test_diversion_rejected_by_default() {
        let mut record = straight(1, 2, 0.0, 1.0);
        record.downstream_ids = vec![2, 3];
        let err = build(
            vec![record, straight(2, 0, 1.0, 2.0), straight(3, 0, 1.0, 2.0)],
            &SfrConfig::default(),
        );
        assert!(matches!(err, Err(SfrError::UnresolvedDiversion { segment: 1, .. })));
    }

    #[test]
    fn test_diversion_main_channel_picks_lowest() {
        let config = SfrConfig {
            diversions: DiversionPolicy::MainChannel,
            ..SfrConfig::default()
        };
        let mut record = straight(1, 2, 0.0, 1.0);
        record.downstream_ids = vec![2, 3];
        let high = straight(2, 0, 1.0, 2.0).with_elevations(9.0, 4.0);
        let low = straight(3, 0, 1.0, 2.0).with_elevations(4.5, 4.0);

        let (sink, collector) = diagnostics::channel();
        let net = FlowlineNetwork::from_records(vec![record, high, low], &config, &sink).unwrap();
        drop(sink);
        assert_eq!(net.get(1).unwrap().downstream_id, 3);
        assert!(!net.get(2).unwrap().main_channel);
        assert!(net.get(3).unwrap().main_channel);
        assert_eq!(collector.finish().count("diversion"), 1);
    }

    #[test]
    fn test_known_connection_overrides_elevation() {
        let mut config = SfrConfig {
            diversions: DiversionPolicy::MainChannel,
            ..SfrConfig::default()
        };
        config.known_connections.insert(1, 2);
        let mut record = straight(1, 2, 0.0, 1.0);
        record.downstream_ids = vec![2, 3];
        let net = build(
            vec![
                record,
                straight(2, 0, 1.0, 2.0).with_elevations(9.0, 4.0),
                straight(3, 0, 1.0, 2.0).with_elevations(4.5, 4.0),
            ],
            &config,
        )
        .unwrap();
        assert_eq!(net.get(1).unwrap().downstream_id, 2);
        assert!(!net.get(3).unwrap().main_channel);
    }

    #[test]
    fn test_edits_drop_and_reroute() {
        let mut config = SfrConfig::default();
        config.edits.drop.push(2);
        config.edits.reroute.insert(3, 1);
        let net = build(
            vec![
                straight(1, 0, 0.0, 1.0),
                straight(2, 1, 0.0, 1.0),
                straight(3, 2, 0.0, 1.0),
            ],
            &config,
        )
        .unwrap();
        assert!(!net.contains(2));
        assert_eq!(net.downstream(3), Some(1));

        config.edits.reroute.insert(42, 1);
        assert!(matches!(
            build(vec![straight(1, 0, 0.0, 1.0)], &config),
            Err(SfrError::UnknownSegment(42))
        ));
    }

    #[test]
    fn test_reroute_to_missing_or_dropped_target() {
        let mut config = SfrConfig::default();
        config.edits.reroute.insert(1, 42);
        let records = || vec![straight(1, 0, 0.0, 1.0), straight(2, 0, 0.0, 1.0)];
        assert!(matches!(
            build(records(), &config),
            Err(SfrError::UnknownSegment(42))
        ));

        config.edits.reroute.insert(1, 2);
        config.edits.drop.push(2);
        assert!(matches!(
            build(records(), &config),
            Err(SfrError::UnknownSegment(2))
        ));

        config.edits.drop.clear();
        config.edits.reroute.insert(1, OUTLET);
        let net = build(records(), &config).unwrap();
        assert!(net.get(1).unwrap().is_outlet());
    }

    /// 1 diverges to 2 (minor) and 3 (main); 2 -> 4 -> 5 and 3 -> 5.
    fn diverging_network() -> Vec<FlowlineRecord> {
        let asum = |r: FlowlineRecord, km: f64| r.with_attr("asum", AttrValue::Number(km));
        let mut first = asum(straight(1, 2, 0.0, 1000.0), 10.0);
        first.downstream_ids = vec![2, 3];
        vec![
            first,
            asum(straight(2, 4, 0.0, 2000.0).with_elevations(9.0, 4.0), 12.0),
            asum(straight(3, 5, 0.0, 1000.0).with_elevations(4.5, 4.0), 11.0),
            asum(straight(4, 5, 0.0, 500.0), 12.5),
            asum(straight(5, OUTLET, 0.0, 1000.0), 20.0),
        ]
    }

    #[test]
    fn test_minor_distributary_arbolate_sums_restart() {
        let config = SfrConfig {
            diversions: DiversionPolicy::MainChannel,
            ..SfrConfig::default()
        };
        let net = build(diverging_network(), &config).unwrap();
        let asum = |id| net.get(id).unwrap().arbolate_sum.unwrap();
        assert!((asum(2) - 2.0).abs() < 1e-12);
        assert!((asum(4) - 2.5).abs() < 1e-12);
        // The confluence and the main channel keep their input sums.
        assert_eq!(asum(5), 20.0);
        assert_eq!(asum(3), 11.0);

        let (w1, w2) = net.get(2).unwrap().widths_in(LengthUnit::Meters);
        assert_eq!(w1, 1.0);
        assert!((w2 - width_from_arbolate_sum(2.0, 0.1193, 0.5032, 1.0)).abs() < 1e-9);
        let (main_start, _) = net.get(3).unwrap().widths_in(LengthUnit::Meters);
        assert!((main_start - width_from_arbolate_sum(10.0, 0.1193, 0.5032, 1.0)).abs() < 1e-9);
    }

    #[test]
    fn test_cull_by_arbolate_sum() {
        let config = SfrConfig {
            diversions: DiversionPolicy::MainChannel,
            asum_thresh: Some(2.2),
            ..SfrConfig::default()
        };
        let mut records = diverging_network();
        // No arbolate sum: never culled, rerouted past the culled segment.
        records.push(straight(7, 2, 0.0, 10.0));

        let (sink, collector) = diagnostics::channel();
        let net = FlowlineNetwork::from_records(records, &config, &sink).unwrap();
        drop(sink);
        let report = collector.finish();

        assert!(!net.contains(2));
        assert!(net.contains(4));
        assert_eq!(net.get(7).unwrap().downstream_id, 4);
        assert_eq!(net.get(1).unwrap().downstream_id, 3);
        assert_eq!(report.count("culled"), 1);
        assert!(net.check_routing().orphans.is_empty());
    }

    #[test]
    fn test_cull_applies_to_input_sums() {
        let config = SfrConfig {
            asum_thresh: Some(5.0),
            ..SfrConfig::default()
        };
        let records = vec![
            straight(1, 2, 0.0, 1.0).with_attr("asum", AttrValue::Number(1.0)),
            straight(2, OUTLET, 0.0, 1.0).with_attr("asum", AttrValue::Number(6.0)),
        ];
        let net = build(records, &config).unwrap();
        assert_eq!(net.len(), 1);
        assert!(net.contains(2));
    }

    #[test]
    fn test_width_resolution() {
        let config = SfrConfig::default();
        let explicit = straight(1, 0, 0.0, 1000.0).with_widths(3.0, 6.0);
        let from_asum = straight(2, 0, 0.0, 1000.0).with_attr("asum", AttrValue::Number(101.0));
        let default = straight(3, 0, 0.0, 1000.0);
        let net = build(vec![explicit, from_asum, default], &config).unwrap();

        assert_eq!(net.get(1).unwrap().widths_in(LengthUnit::Meters), (3.0, 6.0));
        let (w1, w2) = net.get(2).unwrap().widths_in(LengthUnit::Meters);
        assert!((w1 - width_from_arbolate_sum(100.0, 0.1193, 0.5032, 1.0)).abs() < 1e-9);
        assert!((w2 - width_from_arbolate_sum(101.0, 0.1193, 0.5032, 1.0)).abs() < 1e-9);
        assert!(w2 > w1);
        assert_eq!(net.get(3).unwrap().widths_in(LengthUnit::Meters), (1.0, 1.0));
    }

    #[test]
    fn test_width_from_arbolate_sum_floor() {
        assert_eq!(width_from_arbolate_sum(0.0, 0.1193, 0.5032, 1.0), 1.0);
        let w = width_from_arbolate_sum(100.0, 0.1193, 0.5032, 1.0);
        assert!((w - 0.1193 * 100_000f64.powf(0.5032)).abs() < 1e-9);
    }

    #[test]
    fn test_upstream_first_order() {
        // 1 -> 3, 2 -> 3, 3 -> 4
        let routing: FxHashMap<SegmentId, SegmentId> = [(1, 3), (2, 3), (3, 4)].into_iter().collect();
        let order = upstream_first_order(&[4, 3, 2, 1], |id| routing.get(&id).copied());
        assert_eq!(order, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_unconsumed_attributes_kept() {
        let record = straight(1, 0, 0.0, 1.0)
            .with_attr("name", AttrValue::Text("Mill Creek".to_string()))
            .with_attr("fcode", AttrValue::Number(46006.0));
        let net = build(vec![record], &SfrConfig::default()).unwrap();
        let s = net.get(1).unwrap();
        assert_eq!(s.name.as_deref(), Some("Mill Creek"));
        assert!(!s.attributes.contains_key("elevup"));
        assert_eq!(s.attributes.get("fcode"), Some(&AttrValue::Number(46006.0)));
    }
}
