//! Pipeline stages from flowline segments to routed reaches.

pub mod intersect;
pub mod layers;
pub mod reaches;
pub mod renumber;

pub use intersect::{IntersectStats, IntersectionEngine, LineFragment};
pub use layers::{assign_layers, layer_for};
pub use reaches::{Reach, ReachBuilder};
pub use renumber::{
    NumberingContext, ReachNetwork, ReachTarget, Renumberer, RoutedReach, RoutedSegment,
};
