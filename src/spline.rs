// src/spline.rs - Parametric B-spline fitting and evaluation for spiral curves

use log::debug;
use nalgebra::{DMatrix, Vector2};
use std::f64::consts::PI;

use crate::errors::{CochleogramError, Result};
use crate::path_algorithms::{argnearest, path_length, Point};

/// Fewest ordered points that define a curve
pub const MIN_SPLINE_POINTS: usize = 4;

/// Default sampling step along the normalized parameter domain
pub const DEFAULT_RESOLUTION: f64 = 0.001;

/// Spline fit parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplineParams {
    pub degree: usize,
    /// Zero interpolates the points exactly; larger values trade fidelity
    /// for a smoother curve. This is the weight of a second-difference
    /// penalty on the coefficients, not a bound on the residual.
    pub smoothing: f64,
    /// Sampling step along the normalized parameter for dense curves
    pub resolution: f64,
}

impl Default for SplineParams {
    fn default() -> Self {
        Self { degree: 3, smoothing: 0.0, resolution: DEFAULT_RESOLUTION }
    }
}

/// A clamped parametric B-spline over u in [0, 1]
#[derive(Debug, Clone)]
pub struct SplineCurve {
    degree: usize,
    knots: Vec<f64>,
    coeffs: Vec<Point>,
}

impl SplineCurve {
    /// Fit a curve through an ordered point sequence.
    ///
    /// Points are parameterized by normalized chord length. Consecutive
    /// duplicates are collapsed first; `None` is returned when fewer than
    /// four distinct points remain, when there are not enough points for
    /// the requested degree, or when the fit is singular.
    pub fn fit(points: &[Point], params: &SplineParams) -> Option<Self> {
        let mut nodes: Vec<Point> = Vec::with_capacity(points.len());
        for &p in points {
            if nodes.last() != Some(&p) {
                nodes.push(p);
            }
        }

        let n = nodes.len();
        let k = params.degree;
        if n < MIN_SPLINE_POINTS || k == 0 || n <= k {
            return None;
        }

        let total = path_length(&nodes);
        if total <= 0.0 || !total.is_finite() {
            return None;
        }

        let mut u = Vec::with_capacity(n);
        let mut acc = 0.0;
        u.push(0.0);
        for w in nodes.windows(2) {
            acc += crate::path_algorithms::distance(w[0], w[1]);
            u.push(acc / total);
        }
        u[n - 1] = 1.0;

        // Knot averaging keeps every basis function supported by at least
        // one parameter value.
        let mut knots = vec![0.0; n + k + 1];
        for j in 1..(n - k) {
            knots[j + k] = u[j..(j + k)].iter().sum::<f64>() / k as f64;
        }
        for t in knots.iter_mut().skip(n) {
            *t = 1.0;
        }

        let mut a = DMatrix::<f64>::zeros(n, n);
        for (i, &ui) in u.iter().enumerate() {
            let span = find_span(n, k, ui, &knots);
            let basis = basis_funs(span, ui, k, &knots);
            for (j, b) in basis.iter().enumerate() {
                a[(i, span - k + j)] = *b;
            }
        }

        let mut rhs = DMatrix::<f64>::zeros(n, 2);
        for (i, &(x, y)) in nodes.iter().enumerate() {
            rhs[(i, 0)] = x;
            rhs[(i, 1)] = y;
        }

        let solution = if params.smoothing > 0.0 && n >= 3 {
            let mut d = DMatrix::<f64>::zeros(n - 2, n);
            for i in 0..(n - 2) {
                d[(i, i)] = 1.0;
                d[(i, i + 1)] = -2.0;
                d[(i, i + 2)] = 1.0;
            }
            let lhs = a.transpose() * &a + params.smoothing * d.transpose() * d;
            let b = a.transpose() * rhs;
            lhs.lu().solve(&b)
        } else {
            a.lu().solve(&rhs)
        };

        let solution = match solution {
            Some(s) => s,
            None => {
                debug!("Spline collocation matrix is singular for {} points", n);
                return None;
            }
        };

        let coeffs = (0..n).map(|i| (solution[(i, 0)], solution[(i, 1)])).collect();
        Some(Self { degree: k, knots, coeffs })
    }

    pub fn degree(&self) -> usize {
        self.degree
    }

    /// Position on the curve at parameter `u` (clamped to [0, 1])
    pub fn evaluate(&self, u: f64) -> Point {
        let u = u.clamp(0.0, 1.0);
        let n = self.coeffs.len();
        let k = self.degree;
        let span = find_span(n, k, u, &self.knots);
        let basis = basis_funs(span, u, k, &self.knots);

        let mut x = 0.0;
        let mut y = 0.0;
        for (j, b) in basis.iter().enumerate() {
            let c = self.coeffs[span - k + j];
            x += b * c.0;
            y += b * c.1;
        }
        (x, y)
    }

    /// First derivative of the curve, itself a spline one degree lower
    pub fn derivative(&self) -> SplineCurve {
        let k = self.degree;
        let t = &self.knots;
        let coeffs = self
            .coeffs
            .windows(2)
            .enumerate()
            .map(|(i, w)| {
                let span = t[i + k + 1] - t[i + 1];
                if span > 0.0 {
                    let scale = k as f64 / span;
                    (scale * (w[1].0 - w[0].0), scale * (w[1].1 - w[0].1))
                } else {
                    (0.0, 0.0)
                }
            })
            .collect();

        SplineCurve {
            degree: k - 1,
            knots: t[1..t.len() - 1].to_vec(),
            coeffs,
        }
    }

    /// Positions at every step of the parameter grid
    pub fn sample(&self, resolution: f64) -> Vec<Point> {
        parameter_grid(resolution).into_iter().map(|u| self.evaluate(u)).collect()
    }

    /// First-derivative samples on the same grid as [`SplineCurve::sample`]
    pub fn sample_derivative(&self, resolution: f64) -> Vec<Point> {
        if self.degree == 0 {
            return vec![(0.0, 0.0); parameter_grid(resolution).len()];
        }
        self.derivative().sample(resolution)
    }

    /// Arc length of the curve approximated at the given resolution
    pub fn length(&self, resolution: f64) -> f64 {
        path_length(&self.sample(resolution))
    }
}

/// Normalized parameter values 0, r, 2r, ..., 1
pub fn parameter_grid(resolution: f64) -> Vec<f64> {
    if !(resolution > 0.0) {
        return vec![0.0, 1.0];
    }
    let steps = (1.0 / resolution).round().max(1.0) as usize;
    (0..=steps).map(|i| (i as f64 * resolution).min(1.0)).collect()
}

/// Index of the knot span containing `u`
fn find_span(n: usize, k: usize, u: f64, knots: &[f64]) -> usize {
    if u >= knots[n] {
        return n - 1;
    }
    if u <= knots[k] {
        return k;
    }

    let mut low = k;
    let mut high = n;
    let mut mid = (low + high) / 2;
    while u < knots[mid] || u >= knots[mid + 1] {
        if u < knots[mid] {
            high = mid;
        } else {
            low = mid;
        }
        mid = (low + high) / 2;
    }
    mid
}

/// Non-zero basis functions N[span-k..=span] at `u` (Cox-de Boor)
fn basis_funs(span: usize, u: f64, k: usize, knots: &[f64]) -> Vec<f64> {
    let mut n = vec![0.0; k + 1];
    let mut left = vec![0.0; k + 1];
    let mut right = vec![0.0; k + 1];
    n[0] = 1.0;

    for j in 1..=k {
        left[j] = u - knots[span + 1 - j];
        right[j] = knots[span + j] - u;
        let mut saved = 0.0;
        for r in 0..j {
            let denom = right[r + 1] + left[j - r];
            let temp = if denom != 0.0 { n[r] / denom } else { 0.0 };
            n[r] = saved + right[r + 1] * temp;
            saved = left[j - r] * temp;
        }
        n[j] = saved;
    }

    n
}

/// Curve sample nearest to an arbitrary point
pub fn nearest_point(curve: &[Point], point: Point) -> Option<Point> {
    argnearest(point, curve).map(|i| curve[i])
}

/// Most likely circular origin of an arc.
///
/// Minimizes the spread of radial distances from the candidate center to
/// all points, starting from the centroid.
pub fn arc_origin(points: &[Point]) -> Point {
    if points.is_empty() {
        return (0.0, 0.0);
    }

    let spread = |o: &Vector2<f64>| -> f64 {
        let d: Vec<f64> = points
            .iter()
            .map(|&(x, y)| ((x - o.x).powi(2) + (y - o.y).powi(2)).sqrt())
            .collect();
        let mean = d.iter().sum::<f64>() / d.len() as f64;
        d.iter().map(|v| (v - mean).abs()).sum()
    };

    let n = points.len() as f64;
    let centroid = Vector2::new(
        points.iter().map(|p| p.0).sum::<f64>() / n,
        points.iter().map(|p| p.1).sum::<f64>() / n,
    );

    let (xmin, xmax, ymin, ymax) = points.iter().fold(
        (f64::INFINITY, f64::NEG_INFINITY, f64::INFINITY, f64::NEG_INFINITY),
        |(a, b, c, d), &(x, y)| (a.min(x), b.max(x), c.min(y), d.max(y)),
    );
    let mut step = 0.1 * (xmax - xmin).max(ymax - ymin);
    if !(step > 0.0) {
        step = 1.0;
    }

    nelder_mead(spread, centroid, step, 2000, 1e-10)
}

/// Downhill simplex minimization in two dimensions
fn nelder_mead<F>(f: F, start: Vector2<f64>, step: f64, max_iter: usize, tol: f64) -> (f64, f64)
where
    F: Fn(&Vector2<f64>) -> f64,
{
    let mut simplex = [
        start,
        start + Vector2::new(step, 0.0),
        start + Vector2::new(0.0, step),
    ];
    let mut values = [f(&simplex[0]), f(&simplex[1]), f(&simplex[2])];

    for _ in 0..max_iter {
        let mut order = [0usize, 1, 2];
        order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
        let (best, mid, worst) = (order[0], order[1], order[2]);

        let size = (simplex[worst] - simplex[best]).norm().max((simplex[mid] - simplex[best]).norm());
        if (values[worst] - values[best]).abs() <= tol && size <= tol.sqrt() {
            break;
        }

        let centroid = (simplex[best] + simplex[mid]) / 2.0;
        let reflected = centroid + (centroid - simplex[worst]);
        let fr = f(&reflected);

        if fr < values[best] {
            let expanded = centroid + 2.0 * (centroid - simplex[worst]);
            let fe = f(&expanded);
            if fe < fr {
                simplex[worst] = expanded;
                values[worst] = fe;
            } else {
                simplex[worst] = reflected;
                values[worst] = fr;
            }
        } else if fr < values[mid] {
            simplex[worst] = reflected;
            values[worst] = fr;
        } else {
            let contracted = if fr < values[worst] {
                centroid + 0.5 * (reflected - centroid)
            } else {
                centroid + 0.5 * (simplex[worst] - centroid)
            };
            let fc = f(&contracted);
            if fc < values[worst].min(fr) {
                simplex[worst] = contracted;
                values[worst] = fc;
            } else {
                for i in [mid, worst] {
                    simplex[i] = simplex[best] + 0.5 * (simplex[i] - simplex[best]);
                    values[i] = f(&simplex[i]);
                }
            }
        }
    }

    let best = (0..3).min_by(|&a, &b| values[a].total_cmp(&values[b])).unwrap_or(0);
    (simplex[best].x, simplex[best].y)
}

/// Direction an arc sweeps around its fitted origin.
///
/// Returns -1 if the arc sweeps clockwise (angle of the vertices relative to
/// the origin decreases) and +1 if it sweeps counter-clockwise. An arc whose
/// sweep changes sign anywhere is an error.
pub fn arc_direction(points: &[Point]) -> Result<i32> {
    if points.len() < 2 {
        return Err(CochleogramError::ArcDirection);
    }

    let (xo, yo) = arc_origin(points);
    let angles: Vec<f64> = points.iter().map(|&(x, y)| (y - yo).atan2(x - xo)).collect();

    let signs: Vec<i32> = angles
        .windows(2)
        .map(|w| {
            let mut d = w[1] - w[0];
            while d > PI {
                d -= 2.0 * PI;
            }
            while d < -PI {
                d += 2.0 * PI;
            }
            if d > 0.0 {
                1
            } else if d < 0.0 {
                -1
            } else {
                0
            }
        })
        .collect();

    if signs.iter().any(|&s| s != signs[0]) {
        return Err(CochleogramError::ArcDirection);
    }
    Ok(signs[0])
}
