// Clippy allows for the whole crate
#![allow(clippy::too_many_arguments)]

//! SFRGRID: stream flowlines to structured-grid SFR reaches
//!
//! This library intersects a routed drainage network with the cells of a
//! structured groundwater model grid and rebuilds it as numbered, routed
//! reaches with interpolated streambed elevations, slopes and widths.
//!
//! # Features
//!
//! - **Exact clipping**: polylines are clipped against cell polygons found
//!   through an R-tree, with shared cell edges claimed by one cell
//! - **Parallel processing**: Uses Rayon for per-segment parallelism
//! - **Diagnostics, not panics**: anomalies are collected into a report;
//!   only structural input errors abort a run
//!
//! # Example
//!
//! ```rust,no_run
//! use sfrgrid::{flowlines, Pipeline, SfrConfig, StructuredGrid};
//!
//! let grid = StructuredGrid::from_path("grid.json").unwrap();
//! let config = SfrConfig::from_path("config.json").unwrap();
//! let records = flowlines::read_flowlines("flowlines.tsv").unwrap();
//!
//! let output = Pipeline::new(&grid, &config).run(records).unwrap();
//! println!("{} reaches, {}", output.network.len(), output.status());
//! ```

pub mod commands;
pub mod config;
pub mod diagnostics;
pub mod elevations;
pub mod error;
pub mod flowlines;
pub mod geometry;
pub mod grid;
pub mod index;
pub mod interval;
pub mod network;
pub mod output;
pub mod parallel;
pub mod pipeline;

// Re-export commonly used types
pub use commands::{ReachNetwork, ReachTarget, RoutedReach, RoutedSegment};
pub use config::SfrConfig;
pub use diagnostics::{Diagnostic, Report, RunStatus, Severity};
pub use error::{Result, SfrError};
pub use grid::{GridAdapter, StructuredGrid};
pub use network::{FlowlineNetwork, FlowlineRecord, SegmentId, OUTLET};
pub use pipeline::{check_network, Pipeline, RunOutput};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::commands::{
        IntersectionEngine, Reach, ReachBuilder, ReachNetwork, ReachTarget, Renumberer,
        RoutedReach,
    };
    pub use crate::config::{DiversionPolicy, LengthUnit, SfrConfig};
    pub use crate::diagnostics::{Diagnostic, Report, RunStatus};
    pub use crate::geometry::{Point, Polyline};
    pub use crate::grid::{CellId, GridAdapter, StructuredGrid};
    pub use crate::index::SpatialIndex;
    pub use crate::network::{FlowlineNetwork, FlowlineRecord, SegmentId, OUTLET};
    pub use crate::pipeline::{Pipeline, RunOutput};
}
