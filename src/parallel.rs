//! Parallel processing utilities using Rayon.

use crate::diagnostics::DiagnosticSink;
use rayon::prelude::*;
use std::fmt;

/// Minimum number of segments before enabling parallelization.
/// Below this threshold, sequential processing is faster due to
/// thread spawn overhead.
pub const PARALLEL_THRESHOLD: usize = 256;

/// How per-segment work is scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    #[default]
    Sequential,
    Parallel,
}

impl ExecutionMode {
    /// Mode for a batch of `n` work items.
    pub fn select(n: usize) -> Self {
        if n < PARALLEL_THRESHOLD {
            ExecutionMode::Sequential
        } else {
            ExecutionMode::Parallel
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Sequential => f.write_str("sequential"),
            ExecutionMode::Parallel => f.write_str("parallel"),
        }
    }
}

/// Apply `f` to every item, in parallel for large batches.
///
/// Results keep input order regardless of scheduling. Each worker records
/// diagnostics through its own clone of `sink`.
pub fn map_ordered<T, R, F>(items: &[T], sink: &DiagnosticSink, f: F) -> Vec<R>
where
    T: Sync,
    R: Send,
    F: Fn(&T, &DiagnosticSink) -> R + Sync + Send,
{
    match ExecutionMode::select(items.len()) {
        ExecutionMode::Sequential => items.iter().map(|item| f(item, sink)).collect(),
        ExecutionMode::Parallel => items
            .par_iter()
            .map_with(sink.clone(), |sink, item| f(item, sink))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::{self, Diagnostic};

    #[test]
    fn test_mode_selection() {
        assert_eq!(ExecutionMode::select(0), ExecutionMode::Sequential);
        assert_eq!(
            ExecutionMode::select(PARALLEL_THRESHOLD - 1),
            ExecutionMode::Sequential
        );
        assert_eq!(
            ExecutionMode::select(PARALLEL_THRESHOLD),
            ExecutionMode::Parallel
        );
    }

    #[test]
    fn test_map_ordered_keeps_order() {
        let (sink, collector) = diagnostics::channel();
        let items: Vec<i64> = (1..=(PARALLEL_THRESHOLD as i64 * 4)).collect();
        let doubled = map_ordered(&items, &sink, |&id, sink| {
            if id % 100 == 0 {
                sink.record(Diagnostic::OutsideGrid { segment: id });
            }
            id * 2
        });
        assert_eq!(doubled.len(), items.len());
        assert!(doubled.windows(2).all(|w| w[0] < w[1]));
        drop(sink);
        assert_eq!(collector.finish().len(), items.len() / 100);
    }
}
