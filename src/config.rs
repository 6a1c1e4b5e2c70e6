//! Run configuration.
//!
//! Every stage receives the same [`SfrConfig`] by reference; nothing is
//! stored in globals, so several pipelines can run side by side in one
//! process. Configurations load from JSON and every field has a default:
//!
//! ```json
//! {
//!   "tolerance": 1e-6,
//!   "grid_units": "meters",
//!   "model_units": "feet",
//!   "elevation": { "auto_correct": true, "min_slope": 0.0001 },
//!   "diversions": "main_channel"
//! }
//! ```

use crate::error::{Result, SfrError};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

/// Linear units understood for unit declarations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LengthUnit {
    #[default]
    #[serde(alias = "m", alias = "meter")]
    Meters,
    #[serde(alias = "ft", alias = "foot")]
    Feet,
    #[serde(alias = "cm", alias = "centimeter")]
    Centimeters,
    #[serde(alias = "km", alias = "kilometer")]
    Kilometers,
    #[serde(alias = "mi", alias = "mile")]
    Miles,
}

impl LengthUnit {
    /// Length of one unit in meters.
    pub fn meters(self) -> f64 {
        match self {
            LengthUnit::Meters => 1.0,
            LengthUnit::Feet => 0.3048,
            LengthUnit::Centimeters => 0.01,
            LengthUnit::Kilometers => 1000.0,
            LengthUnit::Miles => 1609.344,
        }
    }

    /// Multiplier converting a value in `self` to `to`.
    #[inline]
    pub fn factor_to(self, to: LengthUnit) -> f64 {
        if self == to {
            1.0
        } else {
            self.meters() / to.meters()
        }
    }
}

impl FromStr for LengthUnit {
    type Err = SfrError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "m" | "meter" | "meters" | "metres" => Ok(LengthUnit::Meters),
            "ft" | "foot" | "feet" => Ok(LengthUnit::Feet),
            "cm" | "centimeter" | "centimeters" => Ok(LengthUnit::Centimeters),
            "km" | "kilometer" | "kilometers" => Ok(LengthUnit::Kilometers),
            "mi" | "mile" | "miles" => Ok(LengthUnit::Miles),
            other => Err(SfrError::InvalidConfig(format!(
                "unknown length unit '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for LengthUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LengthUnit::Meters => "meters",
            LengthUnit::Feet => "feet",
            LengthUnit::Centimeters => "centimeters",
            LengthUnit::Kilometers => "kilometers",
            LengthUnit::Miles => "miles",
        };
        f.write_str(name)
    }
}

/// What to do with a segment that routes to more than one segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DiversionPolicy {
    /// Abort the run with [`SfrError::UnresolvedDiversion`].
    #[default]
    Reject,
    /// Keep one primary distributary and mark the others as minor.
    MainChannel,
}

/// Elevation plausibility handling.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ElevationConfig {
    /// Smooth elevations so they never rise downstream.
    pub auto_correct: bool,
    /// Slope floor applied when smoothing.
    pub min_slope: f64,
}

impl Default for ElevationConfig {
    fn default() -> Self {
        Self {
            auto_correct: false,
            min_slope: 1e-4,
        }
    }
}

/// Channel width estimation for segments without width attributes.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WidthConfig {
    /// Width used when no width or arbolate sum is available (model units).
    pub default_width: f64,
    /// `a` in `width = a * asum^b` (asum in meters, width in meters).
    pub asum_a: f64,
    /// `b` in `width = a * asum^b`.
    pub asum_b: f64,
    /// Lower bound on estimated widths (model units).
    pub minimum_width: f64,
}

impl Default for WidthConfig {
    fn default() -> Self {
        Self {
            default_width: 1.0,
            asum_a: 0.1193,
            asum_b: 0.5032,
            minimum_width: 1.0,
        }
    }
}

/// Streambed geometry used to pick a model layer for each reach.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LayerConfig {
    pub streambed_thickness: f64,
    /// Extra clearance below the streambed bottom before a layer qualifies.
    pub buffer: f64,
    /// Lower the bottom of the lowest layer wherever a streambed would
    /// otherwise sit below it.
    pub lower_model_bottom: bool,
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self {
            streambed_thickness: 1.0,
            buffer: 0.0,
            lower_model_bottom: false,
        }
    }
}

/// Edits applied to the flowline records before the network is built.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NetworkEdits {
    /// Segment ids to remove.
    pub drop: Vec<i64>,
    /// New downstream id per segment id.
    pub reroute: BTreeMap<i64, i64>,
}

/// Attribute names looked up once when the network is built.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FieldNames {
    pub name: String,
    pub width_start: String,
    pub width_end: String,
    pub elevation_start: String,
    pub elevation_end: String,
    /// Arbolate sum (total upstream channel length) in kilometers.
    pub arbolate_sum: String,
}

impl Default for FieldNames {
    fn default() -> Self {
        Self {
            name: "name".to_string(),
            width_start: "width1".to_string(),
            width_end: "width2".to_string(),
            elevation_start: "elevup".to_string(),
            elevation_end: "elevdn".to_string(),
            arbolate_sum: "asum".to_string(),
        }
    }
}

/// Configuration for one run of the pipeline.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SfrConfig {
    /// Absolute distance under which points and crossings coincide, in grid
    /// linear units. Reaches no longer than this are dropped.
    pub tolerance: f64,
    /// Overlaps between a line and a cell must be longer than this to form
    /// a fragment (grid units).
    pub min_overlap_length: f64,
    /// Linear units of the grid and flowline coordinates.
    pub grid_units: LengthUnit,
    /// Units of reach lengths, widths and elevations in the output.
    pub model_units: LengthUnit,
    /// Units of width attributes on the input segments.
    pub width_units: LengthUnit,
    /// Units of elevation attributes on the input segments.
    pub elevation_units: LengthUnit,
    pub elevation: ElevationConfig,
    pub diversions: DiversionPolicy,
    /// Primary distributary per diverting segment, overriding elevations.
    pub known_connections: BTreeMap<i64, i64>,
    pub edits: NetworkEdits,
    pub width: WidthConfig,
    /// Cull segments whose arbolate sum is below this many kilometers. Minor
    /// distributaries are measured from the point of divergence.
    pub asum_thresh: Option<f64>,
    pub fields: FieldNames,
    /// Assign model layers when the grid carries layer bottoms.
    pub layers: Option<LayerConfig>,
}

impl Default for SfrConfig {
    fn default() -> Self {
        Self {
            tolerance: 1e-6,
            min_overlap_length: 0.0,
            grid_units: LengthUnit::Meters,
            model_units: LengthUnit::Meters,
            width_units: LengthUnit::Meters,
            elevation_units: LengthUnit::Meters,
            elevation: ElevationConfig::default(),
            diversions: DiversionPolicy::Reject,
            known_connections: BTreeMap::new(),
            edits: NetworkEdits::default(),
            width: WidthConfig::default(),
            asum_thresh: None,
            fields: FieldNames::default(),
            layers: None,
        }
    }
}

impl SfrConfig {
    /// Load and validate a configuration from a JSON file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = fs::read_to_string(path)?;
        Self::from_json(&data)
    }

    /// Parse and validate a configuration from JSON text.
    pub fn from_json(data: &str) -> Result<Self> {
        let config: SfrConfig = serde_json::from_str(data)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(SfrError::InvalidConfig(
                "tolerance must be positive".to_string(),
            ));
        }
        if !(self.min_overlap_length.is_finite() && self.min_overlap_length >= 0.0) {
            return Err(SfrError::InvalidConfig(
                "min_overlap_length must be zero or positive".to_string(),
            ));
        }
        if !(self.elevation.min_slope.is_finite() && self.elevation.min_slope > 0.0) {
            return Err(SfrError::InvalidConfig(
                "elevation.min_slope must be positive".to_string(),
            ));
        }
        if self.width.default_width <= 0.0 || self.width.minimum_width < 0.0 {
            return Err(SfrError::InvalidConfig(
                "widths must be positive".to_string(),
            ));
        }
        if self.asum_thresh.is_some_and(|t| !(t.is_finite() && t >= 0.0)) {
            return Err(SfrError::InvalidConfig(
                "asum_thresh must be zero or positive".to_string(),
            ));
        }
        if let Some(layers) = &self.layers {
            if layers.streambed_thickness < 0.0 || layers.buffer < 0.0 {
                return Err(SfrError::InvalidConfig(
                    "layer streambed thickness and buffer must not be negative".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Factor converting grid lengths to model units.
    #[inline]
    pub fn length_factor(&self) -> f64 {
        self.grid_units.factor_to(self.model_units)
    }
}
