//! Planar geometry for flowlines and grid cells, on top of `geo`.
//!
//! This module provides:
//! - [`Polyline`], a `LineString` with precomputed cumulative arc-length
//! - [`locate`], a tolerance-aware point/polygon classification
//! - [`clip_polyline`], the exact line/polygon clip used by the
//!   intersection engine
//!
//! # Clipping
//!
//! Each edge of the polyline is split at every crossing with the polygon
//! exterior. The pieces between consecutive crossings are classified by their
//! midpoint, so convex and non-convex cells are handled the same way.
//! Crossings closer than the tolerance are treated as one.

use crate::interval::ArcInterval;
use geo::algorithm::line_intersection::{line_intersection, LineIntersection};
use geo::{
    coord, BoundingRect, Closest, ClosestPoint, Contains, Euclidean, Intersects, Length,
    LineInterpolatePoint,
};

pub use geo::{Coord, Line, LineString, Polygon, Rect};

/// A point in grid coordinates.
pub type Point = geo::Point<f64>;

/// Grow `rect` by `margin` on every side.
pub fn expand(rect: &Rect<f64>, margin: f64) -> Rect<f64> {
    Rect::new(
        coord! { x: rect.min().x - margin, y: rect.min().y - margin },
        coord! { x: rect.max().x + margin, y: rect.max().y + margin },
    )
}

/// An ordered sequence of vertices with cumulative arc-length.
#[derive(Debug, Clone, PartialEq)]
pub struct Polyline {
    line: LineString<f64>,
    cumulative: Vec<f64>,
}

impl Polyline {
    /// Create a polyline, computing cumulative distances.
    pub fn new(points: Vec<Point>) -> Self {
        Self::from_line_string(points.into_iter().collect())
    }

    pub fn from_line_string(line: LineString<f64>) -> Self {
        let mut cumulative = Vec::with_capacity(line.0.len());
        let mut total = 0.0;
        if !line.0.is_empty() {
            cumulative.push(total);
        }
        for edge in line.lines() {
            total += edge.length::<Euclidean>();
            cumulative.push(total);
        }
        Self { line, cumulative }
    }

    #[inline]
    pub fn line_string(&self) -> &LineString<f64> {
        &self.line
    }

    /// Arc-length at each vertex.
    #[inline]
    pub fn cumulative(&self) -> &[f64] {
        &self.cumulative
    }

    /// Total arc-length.
    #[inline]
    pub fn length(&self) -> f64 {
        self.cumulative.last().copied().unwrap_or(0.0)
    }

    /// True for lines with fewer than two vertices or no length.
    #[inline]
    pub fn is_degenerate(&self, tolerance: f64) -> bool {
        self.line.0.len() < 2 || self.length() <= tolerance
    }

    pub fn bbox(&self) -> Option<Rect<f64>> {
        self.line.bounding_rect()
    }

    pub fn first(&self) -> Option<Point> {
        self.line.0.first().copied().map(Point::from)
    }

    pub fn last(&self) -> Option<Point> {
        self.line.0.last().copied().map(Point::from)
    }

    /// Point at arc-length `s` (clamped to the line).
    pub fn point_at(&self, s: f64) -> Option<Point> {
        let first = self.first()?;
        if self.line.0.len() == 1 || s <= 0.0 {
            return Some(first);
        }
        if s >= self.length() {
            return self.last();
        }
        // First vertex strictly beyond s; the edge ending there contains s.
        let hi = self.cumulative.partition_point(|&c| c <= s);
        let lo = hi - 1;
        let edge_len = self.cumulative[hi] - self.cumulative[lo];
        let t = if edge_len > 0.0 {
            (s - self.cumulative[lo]) / edge_len
        } else {
            0.0
        };
        Line::new(self.line.0[lo], self.line.0[hi]).line_interpolate_point(t)
    }

    /// Vertices of the part of the line covered by `arc`.
    ///
    /// The result starts and ends on the interpolated boundary points and
    /// keeps every original vertex strictly inside the range.
    pub fn slice(&self, arc: &ArcInterval) -> Vec<Point> {
        let mut out = Vec::new();
        let Some(start) = self.point_at(arc.start) else {
            return out;
        };
        out.push(start);
        for (c, &s) in self.line.0.iter().zip(&self.cumulative) {
            if s > arc.start && s < arc.end {
                out.push(Point::from(*c));
            }
        }
        if let Some(end) = self.point_at(arc.end) {
            out.push(end);
        }
        out
    }
}

/// Where a point lies relative to a polygon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    Inside,
    Boundary,
    Outside,
}

/// Classify `p` as inside `polygon`, on its exterior ring (within
/// `tolerance`), or outside.
pub fn locate(polygon: &Polygon<f64>, p: Point, tolerance: f64) -> Location {
    let Some(rect) = polygon.bounding_rect() else {
        return Location::Outside;
    };
    if !expand(&rect, tolerance).intersects(&p) {
        return Location::Outside;
    }
    let near_edge = polygon.exterior().lines().any(|edge| match edge.closest_point(&p) {
        Closest::Intersection(q) | Closest::SinglePoint(q) => {
            (q.x() - p.x()).hypot(q.y() - p.y()) <= tolerance
        }
        Closest::Indeterminate => false,
    });
    if near_edge {
        Location::Boundary
    } else if polygon.contains(&p) {
        Location::Inside
    } else {
        Location::Outside
    }
}

/// One run of a polyline lying in a polygon.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipPiece {
    pub arc: ArcInterval,
    /// The run follows the polygon outline rather than crossing its interior.
    pub on_boundary: bool,
}

/// Result of clipping one polyline against one polygon.
#[derive(Debug, Clone, Default)]
pub struct ClipResult {
    pub pieces: Vec<ClipPiece>,
    /// The line met the outline at least once, even if no piece has length.
    pub touched: bool,
}

impl ClipResult {
    pub fn total_length(&self) -> f64 {
        self.pieces.iter().map(|p| p.arc.len()).sum()
    }
}

/// Parameter of `c` along `edge`, as a fraction of its length.
#[inline]
fn param(edge: &Line<f64>, c: Coord<f64>) -> f64 {
    let d = edge.delta();
    let len2 = d.x * d.x + d.y * d.y;
    let r = c - edge.start;
    (r.x * d.x + r.y * d.y) / len2
}

/// Clip `line` against `polygon`, returning the runs of the line that lie in
/// the polygon as arc-length intervals, in line order.
pub fn clip_polyline(line: &Polyline, polygon: &Polygon<f64>, tolerance: f64) -> ClipResult {
    let mut result = ClipResult::default();
    let Some(poly_rect) = polygon.bounding_rect() else {
        return result;
    };
    let poly_box = expand(&poly_rect, tolerance);
    let cumulative = line.cumulative();

    for (i, edge) in line.line_string().lines().enumerate() {
        let edge_len = cumulative[i + 1] - cumulative[i];
        if edge_len <= 0.0 || !edge.bounding_rect().intersects(&poly_box) {
            continue;
        }

        let mut ts: Vec<f64> = Vec::new();
        for side in polygon.exterior().lines() {
            match line_intersection(edge, side) {
                Some(LineIntersection::SinglePoint { intersection, .. }) => {
                    ts.push(param(&edge, intersection).clamp(0.0, 1.0));
                    result.touched = true;
                }
                Some(LineIntersection::Collinear { intersection }) => {
                    ts.push(param(&edge, intersection.start).clamp(0.0, 1.0));
                    ts.push(param(&edge, intersection.end).clamp(0.0, 1.0));
                    result.touched = true;
                }
                None => {}
            }
        }
        ts.sort_by(f64::total_cmp);

        let mut cuts = Vec::with_capacity(ts.len() + 2);
        cuts.push(0.0);
        for t in ts {
            let last = cuts[cuts.len() - 1];
            if (t - last) * edge_len > tolerance && (1.0 - t) * edge_len > tolerance {
                cuts.push(t);
            }
        }
        cuts.push(1.0);

        for w in cuts.windows(2) {
            let (t0, t1) = (w[0], w[1]);
            let Some(mid) = edge.line_interpolate_point(0.5 * (t0 + t1)) else {
                continue;
            };
            let on_boundary = match locate(polygon, mid, tolerance) {
                Location::Inside => false,
                Location::Boundary => true,
                Location::Outside => continue,
            };
            let arc = ArcInterval::new(
                cumulative[i] + t0 * edge_len,
                cumulative[i] + t1 * edge_len,
            );
            push_piece(&mut result.pieces, ClipPiece { arc, on_boundary }, tolerance);
        }
    }

    result
}

/// Append a piece, extending the previous one when both cross the interior
/// and abut. Boundary runs stay split at every vertex so that each one lies on
/// a single side of the polygon.
fn push_piece(pieces: &mut Vec<ClipPiece>, piece: ClipPiece, tolerance: f64) {
    if let Some(last) = pieces.last_mut() {
        if !last.on_boundary && !piece.on_boundary && last.arc.abuts(&piece.arc, tolerance) {
            last.arc.end = piece.arc.end;
            return;
        }
    }
    pieces.push(piece);
}
