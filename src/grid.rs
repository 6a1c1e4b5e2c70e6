//! Structured model grids.
//!
//! The intersection pipeline only sees grids through [`GridAdapter`]: an
//! enumerable set of cell polygons with stable node numbers and a
//! coordinate-to-cell lookup. [`StructuredGrid`] implements it for
//! row/column grids with variable spacing, an origin and a rotation.
//!
//! Rows are numbered from the top of the grid (largest local y) and columns
//! from the left, so node `row * ncol + col` matches the usual groundwater
//! model ordering.

use crate::error::{Result, SfrError};
use crate::geometry::{Point, Polygon, Rect};
use geo::{BoundingRect, LineString, MultiPoint};
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::Path;

/// Row/column address of a cell (0-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellId {
    pub row: usize,
    pub col: usize,
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.row, self.col)
    }
}

/// Read-only view of a model grid used by the intersection pipeline.
///
/// Implementations are shared across worker threads.
pub trait GridAdapter: Sync {
    /// Number of cells; nodes are `0..cell_count()`.
    fn cell_count(&self) -> usize;

    /// Row/column address of a node.
    fn cell_id(&self, node: usize) -> CellId;

    /// Outline of a node, `None` when the node is out of range.
    fn cell_polygon(&self, node: usize) -> Option<Polygon<f64>>;

    /// Node containing `p`. Points on an edge shared by two cells resolve to
    /// one of them consistently; points outside the grid give `None`.
    fn locate(&self, p: Point) -> Option<usize>;

    /// Top elevation of a node, if the grid carries elevations.
    fn cell_top(&self, _node: usize) -> Option<f64> {
        None
    }

    /// Bottom elevation of each layer at a node, top layer first.
    fn layer_bottoms(&self, _node: usize) -> Option<Vec<f64>> {
        None
    }
}

/// JSON description of a structured grid.
#[derive(Debug, Clone, Deserialize)]
pub struct StructuredGridSpec {
    pub nrow: usize,
    pub ncol: usize,
    /// Column widths along local x (`ncol` values, or one value for all).
    pub delr: Vec<f64>,
    /// Row heights along local y (`nrow` values, or one value for all).
    pub delc: Vec<f64>,
    /// Lower-left corner in world coordinates.
    #[serde(default)]
    pub xoff: f64,
    #[serde(default)]
    pub yoff: f64,
    /// Counter-clockwise rotation about the lower-left corner, in degrees.
    #[serde(default)]
    pub angrot: f64,
    /// Model top per node.
    #[serde(default)]
    pub top: Option<Vec<f64>>,
    /// Layer bottoms, one array of `nrow * ncol` values per layer.
    #[serde(default)]
    pub botm: Option<Vec<Vec<f64>>>,
}

/// A rectilinear grid with optional rotation.
#[derive(Debug, Clone)]
pub struct StructuredGrid {
    nrow: usize,
    ncol: usize,
    /// Local x of column edges, `ncol + 1` values from 0.
    x_edges: Vec<f64>,
    /// Local y of row edges from the top, `nrow + 1` values descending to 0.
    y_edges: Vec<f64>,
    xoff: f64,
    yoff: f64,
    cos: f64,
    sin: f64,
    top: Option<Vec<f64>>,
    botm: Option<Vec<Vec<f64>>>,
}

impl StructuredGrid {
    /// Build a grid from column widths and row heights.
    pub fn new(delr: Vec<f64>, delc: Vec<f64>, xoff: f64, yoff: f64, angrot: f64) -> Result<Self> {
        if delr.is_empty() || delc.is_empty() {
            return Err(SfrError::InvalidGrid(
                "grid needs at least one row and one column".to_string(),
            ));
        }
        if delr.iter().chain(&delc).any(|d| !d.is_finite() || *d <= 0.0) {
            return Err(SfrError::InvalidGrid(
                "cell spacings must be positive and finite".to_string(),
            ));
        }

        let mut x_edges = Vec::with_capacity(delr.len() + 1);
        x_edges.push(0.0);
        for d in &delr {
            x_edges.push(x_edges[x_edges.len() - 1] + d);
        }

        let height: f64 = delc.iter().sum();
        let mut y_edges = Vec::with_capacity(delc.len() + 1);
        y_edges.push(height);
        for d in &delc {
            y_edges.push(y_edges[y_edges.len() - 1] - d);
        }
        // Pin the last edge so accumulated rounding cannot leave a sliver.
        if let Some(last) = y_edges.last_mut() {
            *last = 0.0;
        }

        let theta = angrot.to_radians();
        Ok(Self {
            nrow: delc.len(),
            ncol: delr.len(),
            x_edges,
            y_edges,
            xoff,
            yoff,
            cos: theta.cos(),
            sin: theta.sin(),
            top: None,
            botm: None,
        })
    }

    /// Uniform grid of `nrow × ncol` square cells of side `cell_size`.
    pub fn uniform(nrow: usize, ncol: usize, cell_size: f64, xoff: f64, yoff: f64) -> Result<Self> {
        Self::new(vec![cell_size; ncol], vec![cell_size; nrow], xoff, yoff, 0.0)
    }

    /// Build a grid from its JSON description.
    pub fn from_spec(spec: StructuredGridSpec) -> Result<Self> {
        let delr = expand_spacing(spec.delr, spec.ncol, "delr")?;
        let delc = expand_spacing(spec.delc, spec.nrow, "delc")?;
        let mut grid = Self::new(delr, delc, spec.xoff, spec.yoff, spec.angrot)?;
        let ncell = grid.nrow * grid.ncol;
        if let Some(top) = spec.top {
            if top.len() != ncell {
                return Err(SfrError::InvalidGrid(format!(
                    "top has {} values, expected {}",
                    top.len(),
                    ncell
                )));
            }
            grid.top = Some(top);
        }
        if let Some(botm) = spec.botm {
            if let Some(bad) = botm.iter().position(|layer| layer.len() != ncell) {
                return Err(SfrError::InvalidGrid(format!(
                    "botm layer {} has {} values, expected {}",
                    bad,
                    botm[bad].len(),
                    ncell
                )));
            }
            grid.botm = Some(botm);
        }
        Ok(grid)
    }

    /// Load a grid from a JSON file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = fs::read_to_string(path)?;
        let spec: StructuredGridSpec = serde_json::from_str(&data)?;
        Self::from_spec(spec)
    }

    /// Attach layer bottoms (one `nrow * ncol` array per layer).
    pub fn with_layers(mut self, top: Vec<f64>, botm: Vec<Vec<f64>>) -> Result<Self> {
        let ncell = self.nrow * self.ncol;
        if top.len() != ncell || botm.iter().any(|layer| layer.len() != ncell) {
            return Err(SfrError::InvalidGrid(format!(
                "layer arrays must have {} values",
                ncell
            )));
        }
        self.top = Some(top);
        self.botm = Some(botm);
        Ok(self)
    }

    pub fn nrow(&self) -> usize {
        self.nrow
    }

    pub fn ncol(&self) -> usize {
        self.ncol
    }

    pub fn nlay(&self) -> usize {
        self.botm.as_ref().map_or(0, Vec::len)
    }

    /// Linear node number of a row/column address.
    #[inline]
    pub fn node(&self, row: usize, col: usize) -> usize {
        row * self.ncol + col
    }

    /// World bounding box of the whole grid.
    pub fn bounds(&self) -> Option<Rect<f64>> {
        let w = self.x_edges[self.ncol];
        let h = self.y_edges[0];
        let corners = MultiPoint::new(vec![
            self.to_world(0.0, 0.0),
            self.to_world(w, 0.0),
            self.to_world(w, h),
            self.to_world(0.0, h),
        ]);
        corners.bounding_rect()
    }

    #[inline]
    fn to_world(&self, x: f64, y: f64) -> Point {
        Point::new(
            self.xoff + x * self.cos - y * self.sin,
            self.yoff + x * self.sin + y * self.cos,
        )
    }

    #[inline]
    fn to_local(&self, p: Point) -> (f64, f64) {
        let dx = p.x() - self.xoff;
        let dy = p.y() - self.yoff;
        (dx * self.cos + dy * self.sin, -dx * self.sin + dy * self.cos)
    }
}

fn expand_spacing(values: Vec<f64>, n: usize, name: &str) -> Result<Vec<f64>> {
    match values.len() {
        1 => Ok(vec![values[0]; n]),
        len if len == n => Ok(values),
        len => Err(SfrError::InvalidGrid(format!(
            "{} has {} values, expected 1 or {}",
            name, len, n
        ))),
    }
}

impl GridAdapter for StructuredGrid {
    fn cell_count(&self) -> usize {
        self.nrow * self.ncol
    }

    fn cell_id(&self, node: usize) -> CellId {
        CellId {
            row: node / self.ncol,
            col: node % self.ncol,
        }
    }

    fn cell_polygon(&self, node: usize) -> Option<Polygon<f64>> {
        if node >= self.cell_count() {
            return None;
        }
        let CellId { row, col } = self.cell_id(node);
        let (x0, x1) = (self.x_edges[col], self.x_edges[col + 1]);
        let (y_top, y_bot) = (self.y_edges[row], self.y_edges[row + 1]);
        let ring = LineString::from(vec![
            self.to_world(x0, y_bot),
            self.to_world(x1, y_bot),
            self.to_world(x1, y_top),
            self.to_world(x0, y_top),
        ]);
        Some(Polygon::new(ring, vec![]))
    }

    fn locate(&self, p: Point) -> Option<usize> {
        let (x, y) = self.to_local(p);
        let width = self.x_edges[self.ncol];
        let height = self.y_edges[0];
        if !(0.0..=width).contains(&x) || !(0.0..=height).contains(&y) {
            return None;
        }
        // Half-open cells [left, right) and (bottom, top]; the far grid edges
        // belong to the last column and row.
        let col = self
            .x_edges
            .partition_point(|&e| e <= x)
            .saturating_sub(1)
            .min(self.ncol - 1);
        let row = self
            .y_edges
            .partition_point(|&e| e >= y)
            .saturating_sub(1)
            .min(self.nrow - 1);
        Some(self.node(row, col))
    }

    fn cell_top(&self, node: usize) -> Option<f64> {
        self.top.as_ref()?.get(node).copied()
    }

    fn layer_bottoms(&self, node: usize) -> Option<Vec<f64>> {
        let botm = self.botm.as_ref()?;
        botm.iter().map(|layer| layer.get(node).copied()).collect()
    }
}
