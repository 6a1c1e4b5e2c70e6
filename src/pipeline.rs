//! End-to-end run: flowline records and a grid in, routed reaches out.
//!
//! Stages run in order: network construction, routing checks, optional
//! segment smoothing, spatial indexing, intersection, reach building,
//! renumbering and optional layer assignment. Structural problems abort the
//! run with an [`SfrError`]; everything else lands in the [`Report`].

use crate::commands::intersect::IntersectionEngine;
use crate::commands::layers::{assign_layers, LayerAssignment};
use crate::commands::reaches::ReachBuilder;
use crate::commands::renumber::{ReachNetwork, Renumberer};
use crate::config::SfrConfig;
use crate::diagnostics::{self, Diagnostic, DiagnosticSink, Report, RunStatus};
use crate::elevations;
use crate::error::Result;
use crate::grid::GridAdapter;
use crate::index::SpatialIndex;
use crate::network::{FlowlineNetwork, FlowlineRecord, FlowlineSegment, RoutingCheck};
use crate::parallel::ExecutionMode;
use std::collections::BTreeMap;
use std::fmt;

/// Counts gathered over one run.
#[derive(Debug, Clone, Default)]
pub struct RunStats {
    pub mode_used: ExecutionMode,
    pub segments_in: usize,
    pub segments_excluded: usize,
    pub cells_indexed: usize,
    pub fragments: usize,
    pub segments_out: usize,
    pub reaches_out: usize,
}

impl fmt::Display for RunStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Mode: {}, Segments: {} in / {} excluded / {} out, Cells: {}, Fragments: {}, Reaches: {}",
            self.mode_used,
            self.segments_in,
            self.segments_excluded,
            self.segments_out,
            self.cells_indexed,
            self.fragments,
            self.reaches_out
        )
    }
}

/// Everything a completed run produces.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub network: ReachNetwork,
    /// New bottom of the lowest layer per node, where layer assignment had
    /// to lower it.
    pub lowered_bottoms: BTreeMap<usize, f64>,
    pub report: Report,
    pub stats: RunStats,
}

impl RunOutput {
    pub fn status(&self) -> RunStatus {
        self.report.status()
    }
}

/// Result of validating a network without intersecting it.
#[derive(Debug, Clone)]
pub struct CheckOutput {
    pub segments: usize,
    pub outlets: usize,
    pub routing: RoutingCheck,
    pub report: Report,
}

/// Drives every stage against one grid and configuration.
pub struct Pipeline<'a, G: GridAdapter + ?Sized> {
    grid: &'a G,
    config: &'a SfrConfig,
}

impl<'a, G: GridAdapter + ?Sized> Pipeline<'a, G> {
    pub fn new(grid: &'a G, config: &'a SfrConfig) -> Self {
        Self { grid, config }
    }

    /// Run all stages on raw records.
    pub fn run(&self, records: Vec<FlowlineRecord>) -> Result<RunOutput> {
        self.config.validate()?;
        let (sink, collector) = diagnostics::channel();
        let network = FlowlineNetwork::from_records(records, self.config, &sink)?;
        let (network, layers, stats) = self.run_network(network, &sink);
        drop(sink);

        let report = collector.finish();
        log::info!("{}: {}", report.status(), stats);
        Ok(RunOutput {
            network,
            lowered_bottoms: layers.lowered_bottoms,
            report,
            stats,
        })
    }

    fn run_network(
        &self,
        mut network: FlowlineNetwork,
        sink: &DiagnosticSink,
    ) -> (ReachNetwork, LayerAssignment, RunStats) {
        let config = self.config;
        let check = record_routing(&network, sink);
        if config.elevation.auto_correct {
            elevations::smooth_segments(&mut network, &check.excluded, sink);
        }

        let index = SpatialIndex::build(self.grid);
        log::debug!("indexed {} cells", index.len());

        let active: Vec<&FlowlineSegment> = network
            .segments()
            .iter()
            .filter(|s| !check.excluded.contains(&s.id))
            .collect();
        let engine = IntersectionEngine::new(self.grid, &index, config.tolerance)
            .with_min_overlap_length(config.min_overlap_length);
        let (fragments, intersect_stats) = engine.run(&active, sink);

        let work: Vec<(&FlowlineSegment, _)> = active.iter().copied().zip(fragments).collect();
        let reaches = ReachBuilder::new(config).build_all(&work, sink);

        let mut routed = Renumberer::new(&network, &check, config).renumber(reaches, sink);
        let layers = match &config.layers {
            Some(layers) => assign_layers(&mut routed, self.grid, layers, sink),
            None => LayerAssignment::default(),
        };

        let stats = RunStats {
            mode_used: intersect_stats.mode_used,
            segments_in: network.len(),
            segments_excluded: check.excluded.len(),
            cells_indexed: index.len(),
            fragments: intersect_stats.fragments,
            segments_out: routed.segments().len(),
            reaches_out: routed.len(),
        };
        (routed, layers, stats)
    }
}

/// Validate a network without a grid: construction errors, cycles and
/// orphan references.
pub fn check_network(records: Vec<FlowlineRecord>, config: &SfrConfig) -> Result<CheckOutput> {
    config.validate()?;
    let (sink, collector) = diagnostics::channel();
    let network = FlowlineNetwork::from_records(records, config, &sink)?;
    let routing = record_routing(&network, &sink);
    for &(segment, missing) in &routing.orphans {
        sink.record(Diagnostic::OrphanDownstream { segment, missing });
    }
    drop(sink);
    Ok(CheckOutput {
        segments: network.len(),
        outlets: network.outlets().count(),
        routing,
        report: collector.finish(),
    })
}

/// Run the routing check and record every cycle.
fn record_routing(network: &FlowlineNetwork, sink: &DiagnosticSink) -> RoutingCheck {
    let check = network.check_routing();
    for cycle in &check.cycles {
        let component = network.component_size(cycle);
        log::warn!(
            "routing cycle {:?}; excluding {} segments",
            cycle,
            component
        );
        sink.record(Diagnostic::RoutingCycle {
            cycle: cycle.clone(),
            component,
        });
    }
    check
}
