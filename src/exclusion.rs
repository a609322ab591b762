// src/exclusion.rs - Curve-anchored exclusion intervals

use log::warn;

use crate::path_algorithms::{argnearest, Point};
use crate::spline::nearest_point;

/// Start and end anchors of an excluded stretch of curve
pub type Interval = (Point, Point);

/// User-marked damaged segments of a curve.
///
/// Intervals are stored as anchors snapped onto the dense curve samples
/// rather than as sample indices, so they survive edits that change the
/// curve: after an edit, [`ExclusionIntervalSet::resnap`] moves every anchor
/// onto the recomputed curve.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExclusionIntervalSet {
    intervals: Vec<Interval>,
}

impl ExclusionIntervalSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap stored anchors as-is (no snapping)
    pub fn from_intervals(intervals: Vec<Interval>) -> Self {
        Self { intervals }
    }

    pub fn intervals(&self) -> &[Interval] {
        &self.intervals
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn clear(&mut self) {
        self.intervals.clear();
    }

    /// Snap both endpoints onto the curve and store the interval.
    ///
    /// Returns false (and stores nothing) when the curve is undefined.
    pub fn add(&mut self, curve: &[Point], start: Point, end: Point) -> bool {
        match (nearest_point(curve, start), nearest_point(curve, end)) {
            (Some(s), Some(e)) => {
                self.intervals.push((s, e));
                true
            }
            _ => false,
        }
    }

    /// Move every anchor onto the nearest sample of a recomputed curve.
    ///
    /// Intervals that can no longer be resolved, or that collapse to a
    /// single sample, are dropped.
    pub fn resnap(&mut self, curve: &[Point]) {
        let before = self.intervals.len();
        self.intervals = self
            .intervals
            .iter()
            .filter_map(|&(s, e)| {
                let s = nearest_point(curve, s)?;
                let e = nearest_point(curve, e)?;
                if s == e {
                    None
                } else {
                    Some((s, e))
                }
            })
            .collect();

        let dropped = before - self.intervals.len();
        if dropped > 0 {
            warn!("Dropped {} exclusion interval(s) that no longer fit the curve", dropped);
        }
    }

    /// Sorted sample-index range of every interval on the given curve
    pub fn index_ranges(&self, curve: &[Point]) -> Vec<(usize, usize)> {
        self.intervals
            .iter()
            .filter_map(|&(s, e)| {
                let si = argnearest(s, curve)?;
                let ei = argnearest(e, curve)?;
                Some((si.min(ei), si.max(ei)))
            })
            .collect()
    }

    /// Delete the first interval whose index range contains the sample
    /// nearest to `point`. Returns whether an interval was removed.
    pub fn remove(&mut self, curve: &[Point], point: Point) -> bool {
        let pi = match argnearest(point, curve) {
            Some(i) => i,
            None => return false,
        };

        let hit = self.intervals.iter().position(|&(s, e)| {
            match (argnearest(s, curve), argnearest(e, curve)) {
                (Some(si), Some(ei)) => si.min(ei) <= pi && pi <= si.max(ei),
                _ => false,
            }
        });

        match hit {
            Some(i) => {
                self.intervals.remove(i);
                true
            }
            None => false,
        }
    }

    /// Merge overlapping or touching intervals into maximal sorted runs
    pub fn simplify(&mut self, curve: &[Point]) {
        if curve.is_empty() {
            return;
        }

        let ranges = merge_intervals(self.index_ranges(curve));
        self.intervals = ranges
            .into_iter()
            .filter(|(si, ei)| si != ei)
            .map(|(si, ei)| (curve[si], curve[ei]))
            .collect();
    }

    /// Dense curve samples covered by each interval
    pub fn regions(&self, curve: &[Point]) -> Vec<Vec<Point>> {
        self.index_ranges(curve)
            .into_iter()
            .map(|(lb, ub)| curve[lb..ub].to_vec())
            .collect()
    }
}

/// Merge `[start, end]` ranges.
///
/// Ranges need not be ordered on input; the output is sorted by start and
/// no two output ranges overlap or touch.
pub fn merge_intervals<T: PartialOrd + Copy>(mut ranges: Vec<(T, T)>) -> Vec<(T, T)> {
    ranges.sort_by(|a, b| {
        a.0.partial_cmp(&b.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
    });

    let mut merged: Vec<(T, T)> = Vec::with_capacity(ranges.len());
    for (lb, ub) in ranges {
        match merged.last_mut() {
            Some(last) if lb <= last.1 => {
                if ub > last.1 {
                    last.1 = ub;
                }
            }
            _ => merged.push((lb, ub)),
        }
    }

    merged
}
