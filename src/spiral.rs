// src/spiral.rs - User-editable spiral paths (node storage + spline + exclusions)

use log::{debug, warn};
use serde::{Deserialize, Deserializer, Serialize};

use crate::errors::{CochleogramError, Result};
use crate::exclusion::{ExclusionIntervalSet, Interval};
use crate::path_algorithms::{argnearest, distance, normal_angles, shortest_path, Point};
use crate::spline::{arc_direction, nearest_point, SplineCurve, SplineParams};

/// Persisted form of a [`SpiralPath`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathState {
    #[serde(deserialize_with = "lenient_floats")]
    pub x: Vec<f64>,
    #[serde(deserialize_with = "lenient_floats")]
    pub y: Vec<f64>,
    #[serde(default)]
    pub origin: usize,
    #[serde(default)]
    pub exclude: Vec<Interval>,
}

/// JSON has no NaN; missing values come back as null and are kept as NaN so
/// that `set_state` can drop them.
fn lenient_floats<'de, D>(deserializer: D) -> std::result::Result<Vec<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let values: Vec<Option<f64>> = Vec::deserialize(deserializer)?;
    Ok(values.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect())
}

/// An ordered, spline-fitted curve through user-placed nodes, or a plain
/// collection of landmark points (cells) sharing the same editing surface.
///
/// Nodes are stored in insertion order; the traversal order is recomputed
/// from `origin` whenever it is needed. Exclusion intervals are re-snapped
/// after every edit to the node set.
#[derive(Debug, Clone, Default)]
pub struct SpiralPath {
    x: Vec<f64>,
    y: Vec<f64>,
    origin: usize,
    exclude: ExclusionIntervalSet,
    params: SplineParams,
}

impl SpiralPath {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_params(params: SplineParams) -> Self {
        Self { params, ..Self::default() }
    }

    pub fn params(&self) -> &SplineParams {
        &self.params
    }

    pub fn x(&self) -> &[f64] {
        &self.x
    }

    pub fn y(&self) -> &[f64] {
        &self.y
    }

    pub fn origin(&self) -> usize {
        self.origin
    }

    pub fn exclusions(&self) -> &ExclusionIntervalSet {
        &self.exclude
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Nodes in insertion order
    pub fn points(&self) -> Vec<Point> {
        self.x.iter().copied().zip(self.y.iter().copied()).collect()
    }

    /// Nodes in traversal order starting from the origin
    pub fn get_nodes(&self) -> Vec<Point> {
        shortest_path(&self.points(), self.origin)
    }

    /// Spline through the ordered nodes; `None` with fewer than four nodes
    pub fn spline(&self) -> Option<SplineCurve> {
        SplineCurve::fit(&self.get_nodes(), &self.params)
    }

    /// Dense curve samples; empty when the curve is undefined
    pub fn interpolate(&self, resolution: f64) -> Vec<Point> {
        self.spline().map(|s| s.sample(resolution)).unwrap_or_default()
    }

    /// Dense curve samples at the configured resolution
    pub fn curve(&self) -> Vec<Point> {
        self.interpolate(self.params.resolution)
    }

    /// First-derivative samples; empty when the curve is undefined
    pub fn derivative(&self, resolution: f64) -> Vec<Point> {
        self.spline().map(|s| s.sample_derivative(resolution)).unwrap_or_default()
    }

    /// Arc length of the curve, NaN when the curve is undefined
    pub fn length(&self, resolution: f64) -> f64 {
        self.spline().map(|s| s.length(resolution)).unwrap_or(f64::NAN)
    }

    /// +1 if the curve sweeps counter-clockwise around its center, -1 if
    /// clockwise. Errors if the sweep is not monotonic.
    pub fn direction(&self) -> Result<i32> {
        arc_direction(&self.curve())
    }

    /// Ordered nodes pushed perpendicular to the curve by `distance`.
    ///
    /// Each node takes the normal of the curve sample nearest to it.
    pub fn expand_nodes(&self, distance: f64) -> Option<Vec<Point>> {
        let curve = self.interpolate(0.01);
        if curve.len() < 2 {
            return None;
        }
        let angles = &normal_angles(&curve)[1..];
        let samples = &curve[1..];

        let expanded = self
            .get_nodes()
            .into_iter()
            .map(|(x, y)| {
                let i = argnearest((x, y), samples).unwrap_or(0);
                let a = angles[i];
                (x + distance * a.cos(), y + distance * a.sin())
            })
            .collect();
        Some(expanded)
    }

    /// Replace all nodes. Pairs where either coordinate is non-finite are
    /// dropped.
    pub fn set_nodes(&mut self, x: &[f64], y: &[f64]) -> Result<()> {
        if x.len() != y.len() {
            return Err(CochleogramError::NodeFormat(format!(
                "x has {} values but y has {}",
                x.len(),
                y.len()
            )));
        }

        let (x, y) = finite_pairs(x, y);
        self.x = x;
        self.y = y;
        self.update_exclude();
        Ok(())
    }

    /// Replace all nodes from a list of (x, y) pairs
    pub fn set_points(&mut self, points: &[Point]) -> Result<()> {
        let (x, y): (Vec<f64>, Vec<f64>) = points.iter().copied().unzip();
        self.set_nodes(&x, &y)
    }

    /// Add a node unless one already exists within `hit_threshold`.
    ///
    /// Returns whether the node was added.
    pub fn add_node(&mut self, x: f64, y: f64, hit_threshold: f64) -> Result<bool> {
        if !(x.is_finite() && y.is_finite()) {
            return Err(CochleogramError::NonFiniteCoordinate(x, y));
        }
        if self.has_node(x, y, hit_threshold) {
            return Ok(false);
        }

        self.x.push(x);
        self.y.push(y);
        self.update_exclude();
        Ok(true)
    }

    pub fn has_node(&self, x: f64, y: f64, hit_threshold: f64) -> bool {
        self.find_node(x, y, hit_threshold).is_ok()
    }

    /// Index of the node nearest to (x, y) if it lies within `hit_threshold`
    pub fn find_node(&self, x: f64, y: f64, hit_threshold: f64) -> Result<usize> {
        let points = self.points();
        match argnearest((x, y), &points) {
            Some(i) if distance(points[i], (x, y)) < hit_threshold => Ok(i),
            _ => Err(CochleogramError::NoNodeWithinThreshold { threshold: hit_threshold }),
        }
    }

    pub fn remove_node(&mut self, x: f64, y: f64, hit_threshold: f64) -> Result<()> {
        let i = self.find_node(x, y, hit_threshold)?;
        self.x.remove(i);
        self.y.remove(i);
        // Keep the traversal starting at the same node
        if i < self.origin {
            self.origin -= 1;
        } else if i == self.origin || self.origin >= self.x.len() {
            self.origin = 0;
        }
        self.update_exclude();
        Ok(())
    }

    /// Make the node nearest to (x, y) the start of the traversal
    pub fn set_origin(&mut self, x: f64, y: f64, hit_threshold: f64) -> Result<()> {
        self.origin = self.find_node(x, y, hit_threshold)?;
        self.update_exclude();
        Ok(())
    }

    /// Remove all nodes and exclusions
    pub fn clear(&mut self) {
        self.x.clear();
        self.y.clear();
        self.origin = 0;
        self.exclude.clear();
    }

    /// Curve sample nearest to (x, y); `None` when the curve is undefined
    pub fn nearest_point(&self, x: f64, y: f64) -> Option<Point> {
        nearest_point(&self.curve(), (x, y))
    }

    /// Exclude the stretch of curve between the samples nearest to `start`
    /// and `end`. Returns false when the curve is undefined.
    pub fn add_exclude(&mut self, start: Point, end: Point) -> bool {
        let curve = self.curve();
        self.exclude.add(&curve, start, end)
    }

    /// Re-snap exclusions onto the current curve
    pub fn update_exclude(&mut self) {
        if self.exclude.is_empty() {
            return;
        }
        let curve = self.curve();
        self.exclude.resnap(&curve);
    }

    /// Delete the exclusion that covers the curve sample nearest to (x, y)
    pub fn remove_exclude(&mut self, x: f64, y: f64) -> bool {
        let curve = self.curve();
        self.exclude.remove(&curve, (x, y))
    }

    /// Merge overlapping exclusions
    pub fn simplify_exclude(&mut self) {
        let curve = self.curve();
        self.exclude.simplify(&curve);
    }

    /// Curve segments covered by exclusions
    pub fn exclusion_regions(&self) -> Vec<Vec<Point>> {
        let curve = self.curve();
        self.exclude.regions(&curve)
    }

    pub fn get_state(&self) -> PathState {
        PathState {
            x: self.x.clone(),
            y: self.y.clone(),
            origin: self.origin,
            exclude: self.exclude.intervals().to_vec(),
        }
    }

    /// Restore from a persisted state. Non-finite pairs are dropped; stored
    /// exclusions are taken verbatim.
    pub fn set_state(&mut self, state: &PathState) {
        let n = state.x.len().min(state.y.len());
        if state.x.len() != state.y.len() {
            warn!("Path state has {} x and {} y values, truncating", state.x.len(), state.y.len());
        }
        let (x, y) = finite_pairs(&state.x[..n], &state.y[..n]);
        self.x = x;
        self.y = y;
        self.exclude = ExclusionIntervalSet::from_intervals(state.exclude.clone());
        self.origin = state.origin;
    }
}

fn finite_pairs(x: &[f64], y: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let (fx, fy): (Vec<f64>, Vec<f64>) = x
        .iter()
        .zip(y)
        .filter(|(a, b)| a.is_finite() && b.is_finite())
        .map(|(a, b)| (*a, *b))
        .unzip();

    if fx.len() != x.len() {
        debug!("Dropped {} non-finite node(s)", x.len() - fx.len());
    }
    (fx, fy)
}
