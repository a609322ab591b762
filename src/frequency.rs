// src/frequency.rs - Place-frequency mapping along the assembled cochlear spiral

use log::{debug, info};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::errors::{CochleogramError, Result};
use crate::piece::LandmarkType;
use crate::spiral::SpiralPath;

/// Maps normalized distance from the base (0..1) to frequency in kHz
pub type PlaceFrequencyFn = fn(f64) -> f64;

/// Greenwood-style place-frequency function for the mouse
pub fn mouse_place_frequency(distance_norm: f64) -> f64 {
    (10f64.powf((1.0 - distance_norm) * 0.92) - 0.680) * 9.8
}

/// Immutable lookup of place-frequency functions by species
#[derive(Debug, Clone)]
pub struct SpeciesRegistry {
    functions: BTreeMap<String, PlaceFrequencyFn>,
}

impl Default for SpeciesRegistry {
    fn default() -> Self {
        Self::empty().with_species("mouse", mouse_place_frequency)
    }
}

impl SpeciesRegistry {
    pub fn empty() -> Self {
        Self { functions: BTreeMap::new() }
    }

    /// Add (or replace) the function registered for `species`
    pub fn with_species(mut self, species: &str, function: PlaceFrequencyFn) -> Self {
        self.functions.insert(species.to_string(), function);
        self
    }

    pub fn contains(&self, species: &str) -> bool {
        self.functions.contains_key(species)
    }

    pub fn get(&self, species: &str) -> Result<PlaceFrequencyFn> {
        self.functions
            .get(species)
            .copied()
            .ok_or_else(|| CochleogramError::UnknownSpecies(species.to_string()))
    }

    pub fn species(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }
}

/// Octave-spaced frequencies from `start` to `end`.
///
/// Both bounds are converted to octaves and rounded to the nearest multiple
/// of `step` before spacing, so the result may start slightly below `start`
/// or end slightly above `end`.
pub fn octave_space(start: f64, end: f64, step: f64) -> Vec<f64> {
    if !(start > 0.0 && end > 0.0 && step > 0.0) {
        return Vec::new();
    }

    let lb = (start.log2() / step).round() * step;
    let ub = (end.log2() / step).round() * step;
    if ub < lb {
        return Vec::new();
    }

    let n = ((ub - lb) / step).round() as usize + 1;
    (0..n).map(|k| 2f64.powf(lb + k as f64 * step)).collect()
}

/// One spiral to chain into the frequency map
#[derive(Debug, Clone, Copy)]
pub struct PieceSpiral<'a> {
    pub piece: u32,
    pub name: &'a str,
    pub landmark: LandmarkType,
    pub spiral: &'a SpiralPath,
}

/// A single sample of the chained trace
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrequencyRecord {
    pub piece: u32,
    /// Fractional position within the piece's own samples
    pub i: f64,
    pub x: f64,
    pub y: f64,
    pub x_orig: f64,
    pub y_orig: f64,
    pub direction: i32,
    pub distance_mm: f64,
    pub distance_norm: f64,
    pub frequency: f64,
}

/// Builds a single distance axis from per-piece spirals and converts it to
/// frequency using a species function
#[derive(Debug, Clone, Default)]
pub struct FrequencyMapper {
    registry: SpeciesRegistry,
}

impl FrequencyMapper {
    pub fn new(registry: SpeciesRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &SpeciesRegistry {
        &self.registry
    }

    /// Chain the spirals end to end and compute distance and frequency at
    /// every sample.
    ///
    /// Each piece is translated so its first sample coincides with the last
    /// sample of the previous piece.
    pub fn trace(&self, spirals: &[PieceSpiral], species: &str) -> Result<Vec<FrequencyRecord>> {
        let place_frequency = self.registry.get(species)?;

        let mut records: Vec<FrequencyRecord> = Vec::new();
        let (mut xo, mut yo) = (0.0, 0.0);
        for ps in spirals {
            let curve = ps.spiral.curve();
            let (first, last) = match (curve.first(), curve.last()) {
                (Some(&f), Some(&l)) => (f, l),
                _ => {
                    return Err(CochleogramError::InsufficientPoints {
                        piece: ps.name.to_string(),
                        spiral: ps.landmark.to_string(),
                    })
                }
            };
            let direction = ps.spiral.direction()?;

            let (dx, dy) = (first.0 - xo, first.1 - yo);
            let n = curve.len() as f64;
            records.extend(curve.iter().enumerate().map(|(k, &(x, y))| FrequencyRecord {
                piece: ps.piece,
                i: k as f64 / n,
                x: x - dx,
                y: y - dy,
                x_orig: x,
                y_orig: y,
                direction,
                distance_mm: 0.0,
                distance_norm: 0.0,
                frequency: 0.0,
            }));
            xo = last.0 - dx;
            yo = last.1 - dy;
            debug!("Piece {} contributes {} samples", ps.name, curve.len());
        }

        let mut total = 0.0;
        for k in 1..records.len() {
            let (px, py) = (records[k - 1].x, records[k - 1].y);
            total += ((records[k].x - px).powi(2) + (records[k].y - py).powi(2)).sqrt() * 1e-3;
            records[k].distance_mm = total;
        }

        let max_distance = records.iter().fold(0.0f64, |m, r| m.max(r.distance_mm));
        for r in &mut records {
            r.distance_norm = if max_distance > 0.0 { r.distance_mm / max_distance } else { 0.0 };
            r.frequency = place_frequency(r.distance_norm);
        }

        info!(
            "Spiral trace of {} samples spans {:.3} mm",
            records.len(),
            max_distance
        );
        Ok(records)
    }

    /// For every requested frequency, the trace sample whose frequency is
    /// closest to it. Ties resolve to the earliest sample.
    pub fn make_frequency_map(
        &self,
        spirals: &[PieceSpiral],
        species: &str,
        frequencies: &[f64],
    ) -> Result<Vec<(f64, FrequencyRecord)>> {
        let trace = self.trace(spirals, species)?;
        if trace.is_empty() {
            return Ok(Vec::new());
        }

        let map = frequencies
            .iter()
            .filter_map(|&target| {
                let mut best: Option<(f64, &FrequencyRecord)> = None;
                for r in &trace {
                    let err = (r.frequency - target).abs();
                    if best.map_or(true, |(b, _)| err < b) {
                        best = Some((err, r));
                    }
                }
                best.map(|(_, r)| (target, r.clone()))
            })
            .collect();

        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use std::f64::consts::PI;

    fn arc(cx: f64, cy: f64, radius: f64, from: f64, to: f64, n: usize) -> SpiralPath {
        let points: Vec<(f64, f64)> = (0..n)
            .map(|k| {
                let a = from + (to - from) * k as f64 / (n - 1) as f64;
                (cx + radius * a.cos(), cy + radius * a.sin())
            })
            .collect();
        let mut spiral = SpiralPath::new();
        spiral.set_points(&points).unwrap();
        spiral
    }

    fn linear(d: f64) -> f64 {
        1.0 + 99.0 * d
    }

    #[test]
    fn octave_space_rounds_bounds() {
        let f = octave_space(4.0, 64.0, 0.5);
        assert_eq!(f.len(), 9);
        assert_approx_eq!(f[0], 4.0);
        assert_approx_eq!(f[1], 4.0 * 2f64.sqrt());
        assert_approx_eq!(f[8], 64.0);

        let f = octave_space(5.0, 40.0, 1.0);
        assert_approx_eq!(f[0], 4.0);
        assert_approx_eq!(*f.last().unwrap(), 32.0);
    }

    #[test]
    fn mouse_function_spans_hearing_range() {
        assert_approx_eq!(mouse_place_frequency(0.0), (10f64.powf(0.92) - 0.68) * 9.8);
        assert_approx_eq!(mouse_place_frequency(1.0), 0.32 * 9.8);
        assert!(mouse_place_frequency(0.2) > mouse_place_frequency(0.8));
        assert!(SpeciesRegistry::default().contains("mouse"));
        assert!(SpeciesRegistry::default().get("gerbil").is_err());
    }

    #[test]
    fn pieces_are_chained_end_to_end() {
        let a = arc(0.0, 0.0, 100.0, 0.0, PI, 8);
        let b = arc(500.0, 500.0, 60.0, 0.0, PI, 8);
        let spirals = [
            PieceSpiral { piece: 1, name: "c_piece_1", landmark: LandmarkType::Ihc, spiral: &a },
            PieceSpiral { piece: 2, name: "c_piece_2", landmark: LandmarkType::Ihc, spiral: &b },
        ];
        let trace = FrequencyMapper::default().trace(&spirals, "mouse").unwrap();

        let split = trace.iter().position(|r| r.piece == 2).unwrap();
        assert_approx_eq!(trace[split].x, trace[split - 1].x);
        assert_approx_eq!(trace[split].y, trace[split - 1].y);
        assert_approx_eq!(trace[split].x_orig, 560.0, 1e-6);
        assert_eq!(trace[0].distance_mm, 0.0);
        assert_approx_eq!(trace.last().unwrap().distance_norm, 1.0);
        assert!(trace.windows(2).all(|w| w[1].distance_mm >= w[0].distance_mm));
        assert!(trace.iter().all(|r| r.direction == 1));

        // Half circles of radius 100 and 60 microns.
        assert_approx_eq!(trace.last().unwrap().distance_mm, PI * 0.16, 1e-3);
    }

    #[test]
    fn increasing_requests_give_non_decreasing_distance() {
        let a = arc(0.0, 0.0, 100.0, 0.0, PI, 8);
        let b = arc(500.0, 500.0, 60.0, 0.0, PI, 8);
        let spirals = [
            PieceSpiral { piece: 1, name: "c_piece_1", landmark: LandmarkType::Ihc, spiral: &a },
            PieceSpiral { piece: 2, name: "c_piece_2", landmark: LandmarkType::Ihc, spiral: &b },
        ];
        let mapper = FrequencyMapper::new(SpeciesRegistry::empty().with_species("linear", linear));

        let requested = [2.0, 10.0, 50.0, 90.0];
        let map = mapper.make_frequency_map(&spirals, "linear", &requested).unwrap();
        assert_eq!(map.len(), 4);
        assert!(map.windows(2).all(|w| w[1].1.distance_norm >= w[0].1.distance_norm));
        for (target, record) in &map {
            assert!((record.frequency - target).abs() < 0.5);
        }

        // The mouse map runs from high to low frequency.
        let map = FrequencyMapper::default().make_frequency_map(&spirals, "mouse", &requested).unwrap();
        assert!(map.windows(2).all(|w| w[1].1.distance_norm <= w[0].1.distance_norm));
    }

    #[test]
    fn short_spiral_names_the_piece() {
        let a = arc(0.0, 0.0, 100.0, 0.0, PI, 8);
        let short = arc(0.0, 0.0, 50.0, 0.0, PI, 3);
        let spirals = [
            PieceSpiral { piece: 1, name: "c_piece_1", landmark: LandmarkType::Ihc, spiral: &a },
            PieceSpiral { piece: 2, name: "c_piece_2", landmark: LandmarkType::Ohc1, spiral: &short },
        ];

        match FrequencyMapper::default().trace(&spirals, "mouse") {
            Err(CochleogramError::InsufficientPoints { piece, spiral }) => {
                assert_eq!(piece, "c_piece_2");
                assert_eq!(spiral, "OHC1");
            }
            other => panic!("expected InsufficientPoints, got {:?}", other.map(|t| t.len())),
        }
    }
}
