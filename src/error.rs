//! Error types for structural failures that abort a run.
//!
//! Anything recoverable (geometry anomalies, upslope reaches, cycles confined
//! to one component) is reported through [`crate::diagnostics`] instead.

use crate::network::SegmentId;
use std::io;
use thiserror::Error;

/// Errors that abort a run before intersection begins.
#[derive(Error, Debug)]
pub enum SfrError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Duplicate segment id {0}")]
    DuplicateSegment(SegmentId),

    #[error("Segment id {0} is reserved for the outlet")]
    ReservedId(SegmentId),

    #[error("Segment {segment} is missing required field '{field}'")]
    MissingField {
        segment: SegmentId,
        field: &'static str,
    },

    #[error("Segment {segment} has invalid geometry: {reason}")]
    InvalidGeometry { segment: SegmentId, reason: String },

    #[error("Segment {segment} routes to multiple segments {targets:?}; diversion policy is 'reject'")]
    UnresolvedDiversion {
        segment: SegmentId,
        targets: Vec<SegmentId>,
    },

    #[error("Unknown segment {0} referenced by network edit")]
    UnknownSegment(SegmentId),

    #[error("Invalid grid: {0}")]
    InvalidGrid(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, SfrError>;
