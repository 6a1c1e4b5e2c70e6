//! Model layer assignment for reaches.

use crate::config::LayerConfig;
use crate::diagnostics::{Diagnostic, DiagnosticSink};
use crate::grid::GridAdapter;
use std::collections::BTreeMap;

use super::renumber::ReachNetwork;

/// Outcome of [`assign_layers`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LayerAssignment {
    /// Reaches that received a layer.
    pub assigned: usize,
    /// New bottom of the lowest layer per node, where it had to be lowered
    /// to fit a streambed.
    pub lowered_bottoms: BTreeMap<usize, f64>,
}

/// Pick the layer for a streambed with top `strtop`.
///
/// Returns the uppermost layer whose bottom lies at or below
/// `strtop - thickness - buffer`, or `None` if even the lowest layer is
/// too shallow. `bottoms` is ordered top to bottom.
pub fn layer_for(strtop: f64, bottoms: &[f64], config: &LayerConfig) -> Option<usize> {
    let threshold = strtop - config.streambed_thickness - config.buffer;
    bottoms.iter().position(|&b| b <= threshold)
}

/// Assign a zero-based layer to every reach whose cell has layer bottoms.
///
/// Reaches whose streambed reaches below the model bottom go to the lowest
/// layer with a diagnostic. With `lower_model_bottom` set, the bottom of
/// that layer is lowered to the deepest such streambed in the cell and the
/// new value is returned. Elevations on the grid are taken to be in model
/// units.
pub fn assign_layers<G: GridAdapter + ?Sized>(
    network: &mut ReachNetwork,
    grid: &G,
    config: &LayerConfig,
    sink: &DiagnosticSink,
) -> LayerAssignment {
    let mut result = LayerAssignment::default();
    for routed in network.reaches_mut() {
        let reach = &routed.reach;
        let Some(bottoms) = grid.layer_bottoms(reach.node) else {
            continue;
        };
        let Some(&model_bottom) = bottoms.last() else {
            continue;
        };
        let layer = match layer_for(reach.strtop, &bottoms, config) {
            Some(k) => k,
            None => {
                let required = reach.strtop - config.streambed_thickness - config.buffer;
                let adjusted_bottom = config.lower_model_bottom.then(|| {
                    let lowered = result
                        .lowered_bottoms
                        .entry(reach.node)
                        .or_insert(model_bottom);
                    *lowered = lowered.min(required);
                    required
                });
                sink.record(Diagnostic::BelowModelBottom {
                    segment: reach.segment_id,
                    seqno: reach.seqno,
                    cell: reach.cell,
                    streambed_bottom: reach.strtop - config.streambed_thickness,
                    model_bottom,
                    land_surface: grid.cell_top(reach.node),
                    adjusted_bottom,
                });
                bottoms.len() - 1
            }
        };
        routed.layer = Some(layer);
        result.assigned += 1;
    }
    if !result.lowered_bottoms.is_empty() {
        log::info!(
            "lowered the model bottom in {} cells",
            result.lowered_bottoms.len()
        );
    }
    log::debug!("assigned layers to {} reaches", result.assigned);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(lower_model_bottom: bool) -> LayerConfig {
        LayerConfig {
            streambed_thickness: 1.0,
            buffer: 0.5,
            lower_model_bottom,
        }
    }

    #[test]
    fn test_layer_for() {
        let config = config(false);
        let bottoms = [90.0, 80.0, 50.0];
        // Threshold 98.5: the top layer bottom qualifies.
        assert_eq!(layer_for(100.0, &bottoms, &config), Some(0));
        // Threshold 88.5: first bottom below is layer 1.
        assert_eq!(layer_for(90.0, &bottoms, &config), Some(1));
        // Threshold 78.5.
        assert_eq!(layer_for(80.0, &bottoms, &config), Some(2));
        assert_eq!(layer_for(51.0, &bottoms, &config), None);
    }

    #[test]
    fn test_layer_for_bottom_equal_to_streambed_bottom() {
        let config = config(false);
        // Threshold 90.0 sits exactly on the top layer bottom.
        assert_eq!(layer_for(91.5, &[90.0, 80.0], &config), Some(0));
        assert_eq!(layer_for(81.5, &[90.0, 80.0], &config), Some(1));
        assert_eq!(layer_for(81.4, &[90.0, 80.0], &config), None);
    }
}
