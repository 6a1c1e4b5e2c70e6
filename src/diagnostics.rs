//! Recoverable anomalies collected during a run.
//!
//! Workers record through a cloned [`DiagnosticSink`]; the pipeline drains
//! the paired [`DiagnosticCollector`] into a [`Report`] once every stage has
//! finished. Nothing recorded here is ever thrown away.

use crate::grid::CellId;
use crate::network::SegmentId;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::fmt;

/// How bad an anomaly is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    /// Recovered; the affected line or reach was dropped or corrected.
    Warning,
    /// A connected component of the network was excluded from the output.
    Error,
}

/// One recorded anomaly.
#[derive(Debug, Clone, PartialEq)]
pub enum Diagnostic {
    /// The segment lies entirely outside the grid.
    OutsideGrid { segment: SegmentId },
    /// The segment has no length.
    DegenerateSegment { segment: SegmentId },
    /// The segment meets a cell without a qualifying overlap.
    TangentialContact {
        segment: SegmentId,
        cell: CellId,
        length: f64,
    },
    /// A fragment was too short to become a reach.
    ZeroLengthReach {
        segment: SegmentId,
        cell: CellId,
        length: f64,
    },
    /// The segment produced no reaches; upstream segments now route to `relinked_to`.
    NoReaches {
        segment: SegmentId,
        relinked_to: Option<SegmentId>,
    },
    /// The downstream id does not exist; the segment became an outlet.
    OrphanDownstream {
        segment: SegmentId,
        missing: SegmentId,
    },
    /// Routing loops back on itself; `component` segments were excluded.
    RoutingCycle {
        cycle: Vec<SegmentId>,
        component: usize,
    },
    /// A diversion was resolved to its primary distributary.
    Diversion {
        segment: SegmentId,
        primary: SegmentId,
        minor: Vec<SegmentId>,
    },
    /// Elevation rises along the flow direction within a reach.
    UpslopeReach {
        segment: SegmentId,
        seqno: usize,
        rise: f64,
    },
    /// The downstream segment starts higher than the upstream one ends.
    ElevationRiseAtConfluence {
        upstream: SegmentId,
        downstream: SegmentId,
        rise: f64,
    },
    /// Smoothing changed the elevations of a segment or reach.
    ElevationCorrected {
        segment: SegmentId,
        seqno: Option<usize>,
        adjustment: f64,
    },
    /// The streambed bottom lies below the bottom of the model.
    BelowModelBottom {
        segment: SegmentId,
        seqno: usize,
        cell: CellId,
        streambed_bottom: f64,
        model_bottom: f64,
        /// Top of the cell, when the grid carries one.
        land_surface: Option<f64>,
        /// New model bottom, when the bottom was lowered to fit.
        adjusted_bottom: Option<f64>,
    },
    /// The segment's arbolate sum is below the culling threshold.
    Culled { segment: SegmentId, arbolate_sum: f64 },
}

impl Diagnostic {
    pub fn severity(&self) -> Severity {
        match self {
            Diagnostic::RoutingCycle { .. } => Severity::Error,
            _ => Severity::Warning,
        }
    }

    /// Segment the anomaly is attached to, used for stable report ordering.
    pub fn segment(&self) -> SegmentId {
        match self {
            Diagnostic::OutsideGrid { segment }
            | Diagnostic::DegenerateSegment { segment }
            | Diagnostic::TangentialContact { segment, .. }
            | Diagnostic::ZeroLengthReach { segment, .. }
            | Diagnostic::NoReaches { segment, .. }
            | Diagnostic::OrphanDownstream { segment, .. }
            | Diagnostic::Diversion { segment, .. }
            | Diagnostic::UpslopeReach { segment, .. }
            | Diagnostic::ElevationCorrected { segment, .. }
            | Diagnostic::BelowModelBottom { segment, .. }
            | Diagnostic::Culled { segment, .. } => *segment,
            Diagnostic::ElevationRiseAtConfluence { upstream, .. } => *upstream,
            Diagnostic::RoutingCycle { cycle, .. } => cycle.iter().copied().min().unwrap_or(0),
        }
    }

    /// Short machine-friendly name of the anomaly.
    pub fn code(&self) -> &'static str {
        match self {
            Diagnostic::OutsideGrid { .. } => "outside_grid",
            Diagnostic::DegenerateSegment { .. } => "degenerate_segment",
            Diagnostic::TangentialContact { .. } => "tangential_contact",
            Diagnostic::ZeroLengthReach { .. } => "zero_length_reach",
            Diagnostic::NoReaches { .. } => "no_reaches",
            Diagnostic::OrphanDownstream { .. } => "orphan_downstream",
            Diagnostic::RoutingCycle { .. } => "routing_cycle",
            Diagnostic::Diversion { .. } => "diversion",
            Diagnostic::UpslopeReach { .. } => "upslope_reach",
            Diagnostic::ElevationRiseAtConfluence { .. } => "elevation_rise_at_confluence",
            Diagnostic::ElevationCorrected { .. } => "elevation_corrected",
            Diagnostic::BelowModelBottom { .. } => "below_model_bottom",
            Diagnostic::Culled { .. } => "culled",
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::OutsideGrid { segment } => {
                write!(f, "segment {} lies outside the grid; dropped", segment)
            }
            Diagnostic::DegenerateSegment { segment } => {
                write!(f, "segment {} has zero length; dropped", segment)
            }
            Diagnostic::TangentialContact {
                segment,
                cell,
                length,
            } => write!(
                f,
                "segment {} only touches cell {} (overlap {}); ignored",
                segment, cell, length
            ),
            Diagnostic::ZeroLengthReach {
                segment,
                cell,
                length,
            } => write!(
                f,
                "segment {} fragment in cell {} is too short ({}); dropped",
                segment, cell, length
            ),
            Diagnostic::NoReaches {
                segment,
                relinked_to,
            } => match relinked_to {
                Some(target) => write!(
                    f,
                    "segment {} produced no reaches; upstream segments rerouted to {}",
                    segment, target
                ),
                None => write!(
                    f,
                    "segment {} produced no reaches; upstream segments now end at an outlet",
                    segment
                ),
            },
            Diagnostic::OrphanDownstream { segment, missing } => write!(
                f,
                "segment {} routes to missing segment {}; treated as outlet",
                segment, missing
            ),
            Diagnostic::RoutingCycle { cycle, component } => write!(
                f,
                "routing cycle {:?}; {} segments excluded",
                cycle, component
            ),
            Diagnostic::Diversion {
                segment,
                primary,
                minor,
            } => write!(
                f,
                "segment {} diverges; routed to {}, minor distributaries {:?}",
                segment, primary, minor
            ),
            Diagnostic::UpslopeReach {
                segment,
                seqno,
                rise,
            } => write!(
                f,
                "segment {} reach {} rises {} downstream",
                segment, seqno, rise
            ),
            Diagnostic::ElevationRiseAtConfluence {
                upstream,
                downstream,
                rise,
            } => write!(
                f,
                "segment {} starts {} above the end of upstream segment {}",
                downstream, rise, upstream
            ),
            Diagnostic::ElevationCorrected {
                segment,
                seqno,
                adjustment,
            } => match seqno {
                Some(seqno) => write!(
                    f,
                    "segment {} reach {} elevations lowered by {}",
                    segment, seqno, adjustment
                ),
                None => write!(
                    f,
                    "segment {} end elevations lowered by {}",
                    segment, adjustment
                ),
            },
            Diagnostic::BelowModelBottom {
                segment,
                seqno,
                cell,
                streambed_bottom,
                model_bottom,
                land_surface,
                adjusted_bottom,
            } => {
                write!(
                    f,
                    "segment {} reach {} in cell {}: streambed bottom {} below model bottom {}",
                    segment, seqno, cell, streambed_bottom, model_bottom
                )?;
                if let Some(top) = land_surface {
                    write!(f, " (land surface {})", top)?;
                }
                match adjusted_bottom {
                    Some(bottom) => write!(f, "; bottom lowered to {}", bottom),
                    None => Ok(()),
                }
            }
            Diagnostic::Culled {
                segment,
                arbolate_sum,
            } => write!(
                f,
                "segment {} arbolate sum {} km is below the threshold; dropped",
                segment, arbolate_sum
            ),
        }
    }
}

/// Append-only handle for recording diagnostics from any thread.
#[derive(Debug, Clone)]
pub struct DiagnosticSink {
    tx: Sender<Diagnostic>,
}

impl DiagnosticSink {
    /// Record one diagnostic.
    pub fn record(&self, diagnostic: Diagnostic) {
        log::debug!("{}: {}", diagnostic.code(), diagnostic);
        // The collector outlives every sink it hands out.
        let _ = self.tx.send(diagnostic);
    }
}

/// Receiving end of a diagnostic channel.
#[derive(Debug)]
pub struct DiagnosticCollector {
    rx: Receiver<Diagnostic>,
}

impl DiagnosticCollector {
    /// Drain everything recorded so far into a report.
    pub fn finish(self) -> Report {
        Report::new(self.rx.try_iter().collect())
    }
}

/// Create a connected sink/collector pair.
pub fn channel() -> (DiagnosticSink, DiagnosticCollector) {
    let (tx, rx) = unbounded();
    (DiagnosticSink { tx }, DiagnosticCollector { rx })
}

/// Outcome of a run that was not aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    CompletedWithWarnings,
    /// At least one connected component was excluded.
    CompletedWithErrors,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Completed => f.write_str("completed"),
            RunStatus::CompletedWithWarnings => f.write_str("completed with warnings"),
            RunStatus::CompletedWithErrors => f.write_str("completed with errors"),
        }
    }
}

/// Every diagnostic of a run, ordered by severity (errors first) then segment.
#[derive(Debug, Clone, Default)]
pub struct Report {
    diagnostics: Vec<Diagnostic>,
}

impl Report {
    pub fn new(mut diagnostics: Vec<Diagnostic>) -> Self {
        // Stable sort keeps recording order within a segment.
        diagnostics.sort_by(|a, b| {
            b.severity()
                .cmp(&a.severity())
                .then(a.segment().cmp(&b.segment()))
        });
        Self { diagnostics }
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn len(&self) -> usize {
        self.diagnostics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity() == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity() == Severity::Warning)
    }

    /// Number of diagnostics with a given code.
    pub fn count(&self, code: &str) -> usize {
        self.diagnostics.iter().filter(|d| d.code() == code).count()
    }

    pub fn status(&self) -> RunStatus {
        if self.errors().next().is_some() {
            RunStatus::CompletedWithErrors
        } else if self.diagnostics.is_empty() {
            RunStatus::Completed
        } else {
            RunStatus::CompletedWithWarnings
        }
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} ({} diagnostics)", self.status(), self.len())?;
        for d in &self.diagnostics {
            let level = match d.severity() {
                Severity::Error => "error",
                Severity::Warning => "warning",
            };
            writeln!(f, "  {} [{}] {}", level, d.code(), d)?;
        }
        Ok(())
    }
}
