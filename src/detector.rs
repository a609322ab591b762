// src/detector.rs - Cell detection along a spiral: peak finding + centroid refinement

use log::{debug, info};
use ndarray::{s, Array2, Axis as NdAxis};

use crate::coordinates::Axis;
use crate::errors::Result;
use crate::path_algorithms::{median_step, Point};
use crate::spiral::SpiralPath;
use crate::volume::ImageVolume;

/// Parameters for [`CellDetector`]
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionParams {
    /// Half-width (microns) of the band searched either side of the spiral,
    /// also the centroid search radius
    pub width: f64,
    /// Minimum spacing (microns) between neighbouring cells
    pub spacing: f64,
    /// Radius (microns) of the smoothing template; `None` disables smoothing
    pub smooth_radius: Option<f64>,
    /// Exponent applied to intensities before taking the centroid
    pub centroid_power: i32,
    /// Sampling step along the normalized curve parameter
    pub resolution: f64,
}

impl Default for DetectionParams {
    fn default() -> Self {
        Self {
            width: 5.0,
            spacing: 5.0,
            smooth_radius: Some(2.5),
            centroid_power: 4,
            resolution: 0.0001,
        }
    }
}

/// Locates cell bodies along a spiral in one channel of a volume
#[derive(Debug, Clone, Default)]
pub struct CellDetector {
    pub params: DetectionParams,
}

impl CellDetector {
    pub fn new(params: DetectionParams) -> Self {
        Self { params }
    }

    /// Physical positions of the cells found along `spiral`.
    ///
    /// An undefined spiral or a trace without peaks yields no cells.
    pub fn detect(&self, volume: &ImageVolume, spiral: &SpiralPath, channel: &str) -> Result<Vec<Point>> {
        let p = &self.params;
        let curve = spiral.interpolate(p.resolution);
        if curve.is_empty() {
            debug!("Spiral is undefined, no cells to detect");
            return Ok(Vec::new());
        }

        let intensity = volume.map(&curve, channel, p.smooth_radius, Some(p.width))?;
        let nuclei = find_nuclei(&curve, &intensity, p.spacing);
        if nuclei.is_empty() {
            return Ok(Vec::new());
        }

        let indices: Vec<(f64, f64)> = nuclei.iter().map(|&(x, y)| volume.to_indices(x, y)).collect();
        let image: Array2<f32> = volume
            .get_image(channel, None)?
            .fold_axis(NdAxis(2), 0.0f32, |&a, &b| a.max(b));
        let x_radius = volume.to_indices_delta(p.width, Axis::X);
        let y_radius = volume.to_indices_delta(p.width, Axis::Y);
        info!(
            "Searching for centroid within {:.0}x{:.0} pixels of spiral",
            x_radius, y_radius
        );

        let refined = find_centroid(&indices, &image, x_radius, y_radius, p.centroid_power);
        let cells: Vec<Point> = refined.iter().map(|&(i, j)| volume.to_coords(i, j)).collect();

        let (max_dx, max_dy) = nuclei.iter().zip(&cells).fold((0.0f64, 0.0f64), |(mx, my), (a, b)| {
            (mx.max((a.0 - b.0).abs()), my.max((a.1 - b.1).abs()))
        });
        info!("Shifted points up to {:.0} x {:.0} microns", max_dx, max_dy);

        Ok(cells)
    }
}

/// Peaks whose prominence is below this fraction of the signal's largest
/// magnitude are rounding noise on a flat stretch, not maxima
pub const PROMINENCE_TOLERANCE: f64 = 1e-9;

/// Indices of local maxima at least `distance` samples apart.
///
/// Flat peaks report their middle sample. Maxima that barely rise above
/// their surroundings (see [`PROMINENCE_TOLERANCE`]) are ignored. When two
/// peaks are closer than `distance` the higher one wins.
pub fn find_peaks(signal: &[f64], distance: usize) -> Vec<usize> {
    let n = signal.len();
    let mut peaks = Vec::new();
    if n < 3 {
        return peaks;
    }

    let mut i = 1;
    while i < n - 1 {
        if signal[i - 1] < signal[i] {
            let mut ahead = i + 1;
            while ahead < n - 1 && signal[ahead] == signal[i] {
                ahead += 1;
            }
            if signal[ahead] < signal[i] {
                peaks.push((i + ahead - 1) / 2);
                i = ahead;
                continue;
            }
        }
        i += 1;
    }

    let scale = signal.iter().fold(0.0f64, |m, v| m.max(v.abs()));
    let tolerance = PROMINENCE_TOLERANCE * scale;
    peaks.retain(|&p| prominence(signal, p) > tolerance);

    let distance = distance.max(1);
    if distance == 1 || peaks.len() < 2 {
        return peaks;
    }

    let mut keep = vec![true; peaks.len()];
    let mut by_priority: Vec<usize> = (0..peaks.len()).collect();
    by_priority.sort_by(|&a, &b| signal[peaks[a]].total_cmp(&signal[peaks[b]]));

    for &j in by_priority.iter().rev() {
        if !keep[j] {
            continue;
        }
        let mut k = j;
        while k > 0 && peaks[j] - peaks[k - 1] < distance {
            k -= 1;
            keep[k] = false;
        }
        let mut k = j + 1;
        while k < peaks.len() && peaks[k] - peaks[j] < distance {
            keep[k] = false;
            k += 1;
        }
    }

    peaks.into_iter().zip(keep).filter(|(_, k)| *k).map(|(p, _)| p).collect()
}

/// Height of a peak above the higher of the two lowest points reached
/// before the signal climbs past the peak on either side
fn prominence(signal: &[f64], peak: usize) -> f64 {
    let height = signal[peak];

    let mut left_min = height;
    for &v in signal[..peak].iter().rev() {
        if v > height {
            break;
        }
        left_min = left_min.min(v);
    }

    let mut right_min = height;
    for &v in &signal[peak + 1..] {
        if v > height {
            break;
        }
        right_min = right_min.min(v);
    }

    height - left_min.max(right_min)
}

/// Curve positions of intensity peaks spaced at least `spacing` microns
/// apart (spacing is converted to samples using the median sample step)
pub fn find_nuclei(curve: &[Point], intensity: &[f64], spacing: f64) -> Vec<Point> {
    let step = median_step(curve);
    let distance = if step > 0.0 { (spacing / step).floor() } else { 1.0 };
    let distance = if distance.is_finite() && distance >= 1.0 { distance as usize } else { 1 };

    let peaks = find_peaks(intensity, distance);
    debug!("Found {} peaks with minimum separation of {} samples", peaks.len(), distance);
    peaks.into_iter().map(|i| curve[i]).collect()
}

/// Move each point to the intensity-weighted centroid of the window of
/// radius (rx, ry) around it, weighting by intensity raised to `power`.
///
/// Points and radii are in index units. A window with zero total weight
/// leaves its point where it is.
pub fn find_centroid(points: &[(f64, f64)], image: &Array2<f32>, rx: f64, ry: f64, power: i32) -> Vec<(f64, f64)> {
    let (nx, ny) = image.dim();

    points
        .iter()
        .map(|&(xi, yi)| {
            let xlb = ((xi - rx).round() as i64).clamp(0, nx as i64) as usize;
            let xub = ((xi + rx).round() as i64).clamp(0, nx as i64) as usize;
            let ylb = ((yi - ry).round() as i64).clamp(0, ny as i64) as usize;
            let yub = ((yi + ry).round() as i64).clamp(0, ny as i64) as usize;
            if xlb >= xub || ylb >= yub {
                return (xi, yi);
            }

            let window = image.slice(s![xlb..xub, ylb..yub]);
            let mut total = 0.0;
            let mut sx = 0.0;
            let mut sy = 0.0;
            for ((i, j), v) in window.indexed_iter() {
                let w = (*v as f64).powi(power);
                total += w;
                sx += w * i as f64;
                sy += w * j as f64;
            }

            if total > 0.0 {
                (xlb as f64 + sx / total, ylb as f64 + sy / total)
            } else {
                (xi, yi)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::{ChannelInfo, VolumeInfo};
    use assert_approx_eq::assert_approx_eq;
    use ndarray::Array4;
    use std::collections::BTreeMap;

    fn dapi_volume(image: Array4<f32>) -> ImageVolume {
        let info = VolumeInfo {
            lower: [0.0, 0.0, 0.0],
            voxel_size: [1.0, 1.0, 1.0],
            channels: vec![ChannelInfo { name: "DAPI".to_string(), display_color: Some("white".to_string()) }],
            extra: BTreeMap::new(),
        };
        ImageVolume::new(info, image, None)
    }

    fn line_spiral() -> SpiralPath {
        let mut spiral = SpiralPath::new();
        spiral.set_points(&[(0.0, 10.0), (15.0, 10.0), (30.0, 10.0), (55.0, 10.0)]).unwrap();
        spiral
    }

    #[test]
    fn peaks_respect_distance() {
        let signal = vec![0.0, 1.0, 0.0, 3.0, 0.0, 2.0, 2.0, 0.0, 5.0, 0.0];
        assert_eq!(find_peaks(&signal, 1), vec![1, 3, 5, 8]);
        assert_eq!(find_peaks(&signal, 3), vec![3, 8]);
        assert!(find_peaks(&vec![0.0; 20], 2).is_empty());
    }

    #[test]
    fn rounding_noise_in_a_flat_valley_is_not_a_peak() {
        // Two equal peaks with a flat floor between them, jittered by a few ULP
        let mut signal = vec![0.0, 0.2, 0.4, 0.6, 0.8, 1.0, 0.8, 0.6, 0.4, 0.2];
        signal.extend((0..10).map(|k| if k % 3 == 1 { 0.2 + 4.0 * f64::EPSILON } else { 0.2 }));
        signal.extend([0.2, 0.4, 0.6, 0.8, 1.0, 0.8, 0.6, 0.4, 0.2, 0.0]);

        assert_eq!(find_peaks(&signal, 1), vec![5, 24]);
    }

    #[test]
    fn symmetric_blobs_leave_no_peak_between_them() {
        // Bilinear sampling across two equal pixels gives a flat minimum
        let mut image = Array4::<f32>::zeros((40, 20, 1, 1));
        for cx in [10.0, 25.0] {
            for i in 0..40 {
                let d2 = (i as f64 - cx).powi(2);
                image[[i, 10, 0, 0]] += (100.0 * (-d2 / 4.5).exp()) as f32;
            }
        }
        let volume = dapi_volume(image);
        let curve: Vec<Point> = (0..=3900).map(|i| (i as f64 * 0.01, 10.0)).collect();
        let intensity = volume.map(&curve, "DAPI", None, None).unwrap();

        let nuclei = find_nuclei(&curve, &intensity, 5.0);
        assert_eq!(nuclei.len(), 2);
        assert!((nuclei[0].0 - 10.0).abs() < 0.05, "{:?}", nuclei);
        assert!((nuclei[1].0 - 25.0).abs() < 0.05, "{:?}", nuclei);
    }

    #[test]
    fn centroid_moves_towards_mass() {
        let mut image = Array2::<f32>::zeros((20, 20));
        image[[12, 9]] = 1.0;
        let refined = find_centroid(&[(10.0, 10.0)], &image, 3.0, 3.0, 4);
        assert_approx_eq!(refined[0].0, 12.0);
        assert_approx_eq!(refined[0].1, 9.0);
    }

    #[test]
    fn centroid_of_empty_window_stays_put() {
        let image = Array2::<f32>::zeros((20, 20));
        let refined = find_centroid(&[(10.3, 4.7)], &image, 3.0, 3.0, 4);
        assert_eq!(refined, vec![(10.3, 4.7)]);
    }

    #[test]
    fn detects_blobs_along_spiral() {
        let mut image = Array4::<f32>::zeros((60, 20, 1, 1));
        for cx in [10.0, 25.0, 40.0] {
            for i in 0..60 {
                for j in 0..20 {
                    let d2 = (i as f64 - cx).powi(2) + (j as f64 - 10.0).powi(2);
                    image[[i, j, 0, 0]] += (100.0 * (-d2 / 4.5).exp()) as f32;
                }
            }
        }
        let volume = dapi_volume(image);
        let detector = CellDetector::new(DetectionParams {
            width: 3.0,
            spacing: 5.0,
            smooth_radius: None,
            centroid_power: 4,
            resolution: 0.0001,
        });

        let cells = detector.detect(&volume, &line_spiral(), "DAPI").unwrap();
        assert_eq!(cells.len(), 3);
        for (cell, cx) in cells.iter().zip([10.0, 25.0, 40.0]) {
            assert!((cell.0 - cx).abs() < 0.5, "x {} vs {}", cell.0, cx);
            assert!((cell.1 - 10.0).abs() < 0.5, "y {}", cell.1);
        }
    }

    #[test]
    fn zero_volume_has_no_cells() {
        let volume = dapi_volume(Array4::zeros((60, 20, 1, 1)));
        let cells = CellDetector::default().detect(&volume, &line_spiral(), "DAPI").unwrap();
        assert!(cells.is_empty());
    }
}
