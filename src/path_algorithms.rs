// src/path_algorithms.rs - Point ordering and polyline helpers shared by spirals and detection

use log::debug;
use std::f64::consts::FRAC_PI_2;

/// A 2-D position in physical units (microns) unless stated otherwise
pub type Point = (f64, f64);

/// Number of parallel offset samples across a sampling band
pub const BAND_SAMPLES: usize = 100;

/// Calculate the Euclidean distance between two points
#[inline]
pub fn distance(p1: Point, p2: Point) -> f64 {
    let dx = p1.0 - p2.0;
    let dy = p1.1 - p2.1;

    (dx * dx + dy * dy).sqrt()
}

/// Order an unordered point set into an open traversal by repeatedly
/// stepping to the nearest unvisited point. Greedy, not an optimal tour.
///
/// # Arguments
/// * `points` - Unordered points
/// * `start` - Index of the point the traversal starts from
///
/// # Returns
/// The points in visiting order. Ties go to the first point encountered.
pub fn shortest_path(points: &[Point], start: usize) -> Vec<Point> {
    let mut nodes: Vec<Point> = points.to_vec();
    let mut path = Vec::with_capacity(nodes.len());

    let mut i = if start < nodes.len() {
        start
    } else {
        if !nodes.is_empty() {
            debug!("Origin index {} out of range for {} nodes, starting at 0", start, nodes.len());
        }
        0
    };

    while nodes.len() > 1 {
        let n = nodes.remove(i);
        path.push(n);
        i = argnearest(n, &nodes).unwrap_or(0);
    }
    path.extend(nodes);

    path
}

/// Index of the point in `candidates` nearest to `point` (first one wins on ties)
pub fn argnearest(point: Point, candidates: &[Point]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;

    for (i, &c) in candidates.iter().enumerate() {
        let d = distance(point, c);
        match best {
            Some((_, best_d)) if d >= best_d => {}
            _ => best = Some((i, d)),
        }
    }

    best.map(|(i, _)| i)
}

/// Angle of the line perpendicular to the curve at every sample.
///
/// The tangent is taken from successive point differences; the first sample
/// reuses the angle of the first segment.
pub fn normal_angles(curve: &[Point]) -> Vec<f64> {
    if curve.len() < 2 {
        return vec![FRAC_PI_2; curve.len()];
    }

    let mut angles: Vec<f64> = curve
        .windows(2)
        .map(|w| (w[1].1 - w[0].1).atan2(w[1].0 - w[0].0) + FRAC_PI_2)
        .collect();
    angles.insert(0, angles[0]);

    angles
}

/// Expand a curve into a band of parallel offset samples.
///
/// Row `r` of the result holds the curve shifted perpendicular to itself by
/// `-width + 2 * width * r / (n - 1)`, so the first and last rows lie at the
/// band edges and every column corresponds to one curve sample.
pub fn expand_path(curve: &[Point], width: f64, n: usize) -> Vec<Vec<Point>> {
    let angles = normal_angles(curve);
    let offsets: Vec<(f64, f64)> = angles
        .iter()
        .map(|a| (width * a.cos(), width * a.sin()))
        .collect();

    (0..n)
        .map(|r| {
            let t = if n > 1 { r as f64 / (n - 1) as f64 } else { 0.5 };
            let scale = 2.0 * t - 1.0;
            curve
                .iter()
                .zip(&offsets)
                .map(|(&(x, y), &(dx, dy))| (x + scale * dx, y + scale * dy))
                .collect()
        })
        .collect()
}

/// Calculate the total length of a polyline
pub fn path_length(path: &[Point]) -> f64 {
    if path.len() < 2 {
        return 0.0;
    }

    path.windows(2).map(|w| distance(w[0], w[1])).sum()
}

/// Cumulative distance along a polyline; the first sample is at zero
pub fn cumulative_distance(path: &[Point]) -> Vec<f64> {
    let mut total = 0.0;
    let mut out = Vec::with_capacity(path.len());

    for (i, &p) in path.iter().enumerate() {
        if i > 0 {
            total += distance(path[i - 1], p);
        }
        out.push(total);
    }

    out
}

/// Median spacing between successive samples of a polyline
pub fn median_step(path: &[Point]) -> f64 {
    let mut steps: Vec<f64> = path.windows(2).map(|w| distance(w[0], w[1])).collect();
    if steps.is_empty() {
        return f64::NAN;
    }
    steps.sort_by(|a, b| a.total_cmp(b));

    let mid = steps.len() / 2;
    if steps.len() % 2 == 0 {
        (steps[mid - 1] + steps[mid]) / 2.0
    } else {
        steps[mid]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn shortest_path_visits_every_point_once() {
        let points = vec![(5.0, 0.0), (0.0, 0.0), (2.0, 0.0), (9.0, 1.0), (1.0, 0.5)];
        let path = shortest_path(&points, 1);

        assert_eq!(path.len(), points.len());
        for p in &points {
            assert_eq!(path.iter().filter(|q| *q == p).count(), 1);
        }
        assert_eq!(path, vec![(0.0, 0.0), (1.0, 0.5), (2.0, 0.0), (5.0, 0.0), (9.0, 1.0)]);
    }

    #[test]
    fn shortest_path_handles_small_inputs() {
        assert!(shortest_path(&[], 0).is_empty());
        assert_eq!(shortest_path(&[(3.0, 4.0)], 0), vec![(3.0, 4.0)]);
    }

    #[test]
    fn shortest_path_breaks_ties_on_first_minimum() {
        let points = vec![(0.0, 0.0), (1.0, 0.0), (-1.0, 0.0)];
        let path = shortest_path(&points, 0);
        assert_eq!(path[1], (1.0, 0.0));
    }

    #[test]
    fn expand_path_spans_the_band() {
        let curve = vec![(0.0, 0.0), (1.0, 0.0), (2.0, 0.0)];
        let band = expand_path(&curve, 2.0, 5);

        assert_eq!(band.len(), 5);
        assert_approx_eq!(band[0][1].1, -2.0, 1e-12);
        assert_approx_eq!(band[2][1].1, 0.0, 1e-12);
        assert_approx_eq!(band[4][1].1, 2.0, 1e-12);
        assert_approx_eq!(band[4][1].0, 1.0, 1e-12);
    }

    #[test]
    fn cumulative_distance_starts_at_zero() {
        let d = cumulative_distance(&[(0.0, 0.0), (3.0, 4.0), (3.0, 5.0)]);
        assert_eq!(d, vec![0.0, 5.0, 6.0]);
        assert_approx_eq!(path_length(&[(0.0, 0.0), (3.0, 4.0), (3.0, 5.0)]), 6.0);
    }

    #[test]
    fn median_step_of_even_number_of_steps() {
        let m = median_step(&[(0.0, 0.0), (1.0, 0.0), (3.0, 0.0), (6.0, 0.0), (10.0, 0.0)]);
        assert_approx_eq!(m, 2.5);
    }
}
