// src/piece.rs - Tissue pieces, their tiles and landmark paths, and the whole cochlea

use log::{debug, info};
use rayon::prelude::*;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::detector::{CellDetector, DetectionParams};
use crate::errors::{CochleogramError, Result};
use crate::frequency::{FrequencyMapper, FrequencyRecord, PieceSpiral};
use crate::mosaic::merge_volumes;
use crate::spiral::{PathState, SpiralPath};
use crate::spline::SplineParams;
use crate::volume::{ImageVolume, VolumeState};

/// Cell rows tracked on every piece
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LandmarkType {
    #[serde(rename = "IHC")]
    Ihc,
    #[serde(rename = "OHC1")]
    Ohc1,
    #[serde(rename = "OHC2")]
    Ohc2,
    #[serde(rename = "OHC3")]
    Ohc3,
    #[serde(rename = "Extra")]
    Extra,
}

impl LandmarkType {
    pub const ALL: [LandmarkType; 5] = [
        LandmarkType::Ihc,
        LandmarkType::Ohc1,
        LandmarkType::Ohc2,
        LandmarkType::Ohc3,
        LandmarkType::Extra,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            LandmarkType::Ihc => "IHC",
            LandmarkType::Ohc1 => "OHC1",
            LandmarkType::Ohc2 => "OHC2",
            LandmarkType::Ohc3 => "OHC3",
            LandmarkType::Extra => "Extra",
        }
    }
}

impl fmt::Display for LandmarkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LandmarkType {
    type Err = CochleogramError;

    fn from_str(s: &str) -> Result<Self> {
        LandmarkType::ALL
            .into_iter()
            .find(|l| l.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| CochleogramError::Config(format!("Unknown landmark type: {}", s)))
    }
}

fn piece_pattern() -> Result<Regex> {
    Regex::new(r"piece_(\d+)").map_err(|e| CochleogramError::Config(e.to_string()))
}

fn piece_number(pattern: &Regex, path: &Path) -> Option<u32> {
    let stem = path.file_stem()?.to_str()?;
    pattern.captures(stem)?.get(1)?.as_str().parse().ok()
}

/// Sorted, unique piece numbers of the tile files in `dir`
pub fn list_pieces<P: AsRef<Path>>(dir: P) -> Result<Vec<u32>> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Err(CochleogramError::InvalidPath(dir.to_path_buf()));
    }

    let pattern = piece_pattern()?;
    let mut pieces = BTreeSet::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() || path.extension().map_or(false, |e| e == "json") {
            continue;
        }
        if let Some(n) = piece_number(&pattern, &path) {
            pieces.insert(n);
        }
    }

    Ok(pieces.into_iter().collect())
}

/// Tile arrays in `dir` belonging to `piece`, sorted by name
fn tile_files(dir: &Path, piece: u32) -> Result<Vec<PathBuf>> {
    let pattern = piece_pattern()?;
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().map_or(false, |e| e == "npy"))
        .filter(|p| piece_number(&pattern, p) == Some(piece))
        .collect();
    files.sort();
    Ok(files)
}

/// Persisted form of a [`Piece`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PieceState {
    #[serde(default)]
    pub tiles: BTreeMap<String, VolumeState>,
    #[serde(default)]
    pub spirals: BTreeMap<LandmarkType, PathState>,
    #[serde(default)]
    pub cells: BTreeMap<LandmarkType, PathState>,
}

/// One tissue section: its tiles plus a spiral and a cell set per landmark
#[derive(Debug, Clone)]
pub struct Piece {
    pub tiles: Vec<ImageVolume>,
    pub path: PathBuf,
    pub name: String,
    pub piece: u32,
    spirals: BTreeMap<LandmarkType, SpiralPath>,
    cells: BTreeMap<LandmarkType, SpiralPath>,
}

impl Piece {
    /// Build a piece from its tiles. Tiles are padded in z so they all span
    /// the same z range.
    pub fn new(mut tiles: Vec<ImageVolume>, path: PathBuf, piece: u32, params: &SplineParams) -> Self {
        align_z(&mut tiles);

        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
        let name = format!("{}_piece_{}", stem, piece);
        let spirals = LandmarkType::ALL
            .into_iter()
            .map(|l| (l, SpiralPath::with_params(*params)))
            .collect();
        let cells = LandmarkType::ALL
            .into_iter()
            .map(|l| (l, SpiralPath::with_params(*params)))
            .collect();

        Self { tiles, path, name, piece, spirals, cells }
    }

    /// Load every tile of `piece` found in `dir`
    pub fn from_path<P: AsRef<Path>>(dir: P, piece: u32, params: &SplineParams, parallel: bool) -> Result<Self> {
        let dir = dir.as_ref();
        let files = tile_files(dir, piece)?;
        if files.is_empty() {
            return Err(CochleogramError::PieceNotFound(piece));
        }
        info!(
            "Found tiles: {:?}",
            files.iter().filter_map(|f| f.file_stem()).collect::<Vec<_>>()
        );

        let tiles = if parallel {
            files.par_iter().map(ImageVolume::from_filename).collect::<Result<Vec<_>>>()?
        } else {
            files.iter().map(ImageVolume::from_filename).collect::<Result<Vec<_>>>()?
        };

        Ok(Self::new(tiles, dir.to_path_buf(), piece, params))
    }

    /// Channel names of the first tile; all tiles share one channel layout
    pub fn channel_names(&self) -> Vec<String> {
        self.tiles.first().map(|t| t.channel_names()).unwrap_or_default()
    }

    /// Union of the tiles' x/y extents
    pub fn get_image_extent(&self) -> [f64; 4] {
        let mut extent = [f64::INFINITY, f64::NEG_INFINITY, f64::INFINITY, f64::NEG_INFINITY];
        for tile in &self.tiles {
            let e = tile.image_extent();
            extent[0] = extent[0].min(e[0]);
            extent[1] = extent[1].max(e[1]);
            extent[2] = extent[2].min(e[2]);
            extent[3] = extent[3].max(e[3]);
        }
        extent
    }

    /// Single composite volume of all tiles
    pub fn merge_tiles(&self) -> Result<ImageVolume> {
        merge_volumes(&self.tiles, Some(self.path.clone()))
    }

    pub fn spiral(&self, landmark: LandmarkType) -> &SpiralPath {
        &self.spirals[&landmark]
    }

    pub fn spiral_mut(&mut self, landmark: LandmarkType) -> &mut SpiralPath {
        self.spirals.entry(landmark).or_default()
    }

    pub fn cells(&self, landmark: LandmarkType) -> &SpiralPath {
        &self.cells[&landmark]
    }

    /// Cell sets of every landmark, in landmark order
    pub fn all_cells(&self) -> impl Iterator<Item = (LandmarkType, &SpiralPath)> {
        self.cells.iter().map(|(k, v)| (*k, v))
    }

    /// Detect cells along the `landmark` spiral and replace that landmark's
    /// cell set. Returns the number of cells found.
    pub fn guess_cells(&mut self, landmark: LandmarkType, width: f64, spacing: f64, channel: &str) -> Result<usize> {
        let detector = CellDetector::new(DetectionParams { width, spacing, ..DetectionParams::default() });
        self.detect_cells(landmark, channel, &detector)
    }

    pub fn detect_cells(&mut self, landmark: LandmarkType, channel: &str, detector: &CellDetector) -> Result<usize> {
        info!(
            "Finding {} assuming within {} um of spiral and spaced {} microns on channel {}",
            landmark, detector.params.width, detector.params.spacing, channel
        );
        let merged = self.merge_tiles()?;
        let cells = detector.detect(&merged, self.spiral(landmark), channel)?;
        let n = cells.len();
        self.cells.entry(landmark).or_default().set_points(&cells)?;
        Ok(n)
    }

    pub fn clear_cells(&mut self, landmark: LandmarkType) {
        self.cells.entry(landmark).or_default().clear();
    }

    pub fn clear_spiral(&mut self, landmark: LandmarkType) {
        self.spiral_mut(landmark).clear();
    }

    pub fn get_state(&self) -> PieceState {
        PieceState {
            tiles: self.tiles.iter().map(|t| (t.key(), t.get_state())).collect(),
            spirals: self.spirals.iter().map(|(k, v)| (*k, v.get_state())).collect(),
            cells: self.cells.iter().map(|(k, v)| (*k, v.get_state())).collect(),
        }
    }

    /// Restore saved state. Entries absent from `state` leave the
    /// corresponding tile or path untouched.
    pub fn set_state(&mut self, state: &PieceState) {
        for (landmark, spiral) in self.spirals.iter_mut() {
            if let Some(s) = state.spirals.get(landmark) {
                spiral.set_state(s);
            }
        }
        for (landmark, cells) in self.cells.iter_mut() {
            if let Some(s) = state.cells.get(landmark) {
                cells.set_state(s);
            }
        }
        for tile in self.tiles.iter_mut() {
            match state.tiles.get(&tile.key()) {
                Some(s) => tile.set_state(s),
                None => debug!("No saved state for tile {}", tile.key()),
            }
        }
    }
}

/// Pad every tile in z so that slices line up across tiles
fn align_z(tiles: &mut [ImageVolume]) {
    let Some(first) = tiles.first() else {
        return;
    };
    let z_scale = first.voxel_size()[2];
    if z_scale <= 0.0 {
        return;
    }

    let z_min = tiles.iter().map(|t| t.extent()[4]).fold(f64::INFINITY, f64::min);
    let z_max = tiles.iter().map(|t| t.extent()[5]).fold(f64::NEG_INFINITY, f64::max);
    let z_n = ((z_max - z_min) / z_scale).ceil() as usize;

    for tile in tiles.iter_mut() {
        let slices = tile.shape().2;
        let bottom = ((tile.extent()[4] - z_min) / z_scale).round() as usize;
        let top = z_n.saturating_sub(bottom + slices);
        tile.pad_z(bottom, top, z_min, z_max);
    }
}

/// All pieces of one specimen
#[derive(Debug, Clone)]
pub struct Cochlea {
    pub pieces: Vec<Piece>,
    pub path: PathBuf,
    pub name: String,
}

impl Cochlea {
    pub fn new(pieces: Vec<Piece>, path: PathBuf) -> Self {
        let name = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default().to_string();
        Self { pieces, path, name }
    }

    pub fn from_path<P: AsRef<Path>>(dir: P, params: &SplineParams, parallel: bool) -> Result<Self> {
        let dir = dir.as_ref();
        info!("Loading cochlea from {}", dir.display());

        let numbers = list_pieces(dir)?;
        let pieces = if parallel {
            numbers
                .par_iter()
                .map(|&n| Piece::from_path(dir, n, params, false))
                .collect::<Result<Vec<_>>>()?
        } else {
            numbers
                .iter()
                .map(|&n| Piece::from_path(dir, n, params, false))
                .collect::<Result<Vec<_>>>()?
        };

        Ok(Self::new(pieces, dir.to_path_buf()))
    }

    pub fn piece(&self, n: u32) -> Result<&Piece> {
        self.pieces.iter().find(|p| p.piece == n).ok_or(CochleogramError::PieceNotFound(n))
    }

    pub fn piece_mut(&mut self, n: u32) -> Result<&mut Piece> {
        self.pieces.iter_mut().find(|p| p.piece == n).ok_or(CochleogramError::PieceNotFound(n))
    }

    pub fn get_state(&self) -> BTreeMap<u32, PieceState> {
        self.pieces.iter().map(|p| (p.piece, p.get_state())).collect()
    }

    pub fn set_state(&mut self, state: &BTreeMap<u32, PieceState>) {
        for piece in self.pieces.iter_mut() {
            if let Some(s) = state.get(&piece.piece) {
                piece.set_state(s);
            }
        }
    }

    /// Frequency map along the `landmark` spiral of every piece in order
    pub fn make_frequency_map(
        &self,
        mapper: &FrequencyMapper,
        landmark: LandmarkType,
        species: &str,
        frequencies: &[f64],
    ) -> Result<Vec<(f64, FrequencyRecord)>> {
        let spirals: Vec<PieceSpiral> = self
            .pieces
            .iter()
            .map(|p| PieceSpiral { piece: p.piece, name: &p.name, landmark, spiral: p.spiral(landmark) })
            .collect();
        mapper.make_frequency_map(&spirals, species, frequencies)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::tests::test_info;
    use assert_approx_eq::assert_approx_eq;
    use ndarray::Array4;
    use ndarray_npy::write_npy;
    use std::f64::consts::PI;

    fn tile(lower: [f64; 3], nz: usize) -> ImageVolume {
        ImageVolume::new(test_info(lower, [1.0, 1.0, 2.0]), Array4::from_elem((4, 4, nz, 2), 1.0), None)
    }

    fn write_tile(dir: &Path, stem: &str, lower: [f64; 3]) {
        let info = test_info(lower, [1.0, 1.0, 1.0]);
        fs::write(dir.join(format!("{}.json", stem)), serde_json::to_string(&info).unwrap()).unwrap();
        write_npy(dir.join(format!("{}.npy", stem)), &Array4::<f32>::ones((4, 4, 2, 2))).unwrap();
    }

    #[test]
    fn landmarks_serialize_by_short_name() {
        assert_eq!(serde_json::to_string(&LandmarkType::Ohc2).unwrap(), "\"OHC2\"");
        assert_eq!("ihc".parse::<LandmarkType>().unwrap(), LandmarkType::Ihc);
        assert!("OHC4".parse::<LandmarkType>().is_err());
    }

    #[test]
    fn tiles_are_padded_to_shared_z_range() {
        let a = tile([0.0, 0.0, 0.0], 3);
        let b = tile([0.0, 4.0, 4.0], 2);
        let piece = Piece::new(vec![a, b], PathBuf::from("/data/cochlea_01"), 3, &SplineParams::default());

        assert_eq!(piece.name, "cochlea_01_piece_3");
        // z spans 0..8 at 2 microns per slice
        assert_eq!(piece.tiles[0].shape().2, 4);
        assert_eq!(piece.tiles[1].shape().2, 4);
        assert_eq!(piece.tiles[1].image()[[0, 0, 1, 0]], 0.0);
        assert_eq!(piece.tiles[1].image()[[0, 0, 2, 0]], 1.0);
        assert_approx_eq!(piece.tiles[1].extent()[4], 0.0);
        assert_approx_eq!(piece.tiles[1].extent()[5], 8.0);

        let extent = piece.get_image_extent();
        assert_eq!(extent, [0.0, 4.0, 0.0, 8.0]);
    }

    #[test]
    fn state_round_trips_through_json() {
        let mut piece = Piece::new(vec![tile([0.0; 3], 1)], PathBuf::from("c"), 1, &SplineParams::default());
        let points: Vec<(f64, f64)> = (0..6).map(|k| (k as f64 * 10.0, (k as f64).sin())).collect();
        piece.spiral_mut(LandmarkType::Ohc1).set_points(&points).unwrap();

        let json = serde_json::to_string(&piece.get_state()).unwrap();
        let state: PieceState = serde_json::from_str(&json).unwrap();

        let mut restored = Piece::new(vec![tile([0.0; 3], 1)], PathBuf::from("c"), 1, &SplineParams::default());
        restored.set_state(&state);
        assert_eq!(restored.spiral(LandmarkType::Ohc1).points(), points);
        assert!(restored.spiral(LandmarkType::Ihc).is_empty());
        assert_eq!(restored.get_state(), piece.get_state());
    }

    #[test]
    fn pieces_are_listed_and_loaded_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        write_tile(dir.path(), "c1_piece_1a", [0.0, 0.0, 0.0]);
        write_tile(dir.path(), "c1_piece_1b", [3.0, 0.0, 0.0]);
        write_tile(dir.path(), "c1_piece_10", [0.0, 0.0, 0.0]);

        assert_eq!(list_pieces(dir.path()).unwrap(), vec![1, 10]);

        let piece = Piece::from_path(dir.path(), 1, &SplineParams::default(), false).unwrap();
        assert_eq!(piece.tiles.len(), 2);
        assert_eq!(piece.tiles[0].key(), "c1_piece_1a");
        assert_eq!(piece.merge_tiles().unwrap().shape(), (7, 4, 2, 2));

        let cochlea = Cochlea::from_path(dir.path(), &SplineParams::default(), true).unwrap();
        assert_eq!(cochlea.pieces.len(), 2);
        assert_eq!(cochlea.piece(10).unwrap().tiles.len(), 1);
        assert!(matches!(cochlea.piece(2), Err(CochleogramError::PieceNotFound(2))));
    }

    #[test]
    fn zero_intensity_clears_cells() {
        let volume = ImageVolume::new(
            test_info([0.0; 3], [1.0, 1.0, 1.0]),
            Array4::zeros((60, 40, 1, 2)),
            None,
        );
        let mut piece = Piece::new(vec![volume], PathBuf::from("c"), 1, &SplineParams::default());
        let spiral: Vec<(f64, f64)> = (0..6)
            .map(|k| {
                let a = PI * k as f64 / 5.0;
                (30.0 + 15.0 * a.cos(), 20.0 + 15.0 * a.sin())
            })
            .collect();
        piece.spiral_mut(LandmarkType::Ihc).set_points(&spiral).unwrap();
        piece.cells.get_mut(&LandmarkType::Ihc).unwrap().set_points(&[(1.0, 1.0)]).unwrap();

        let n = piece.guess_cells(LandmarkType::Ihc, 5.0, 5.0, "MyosinVIIa").unwrap();
        assert_eq!(n, 0);
        assert!(piece.cells(LandmarkType::Ihc).is_empty());

        piece.clear_spiral(LandmarkType::Ihc);
        assert!(piece.spiral(LandmarkType::Ihc).is_empty());
    }

    #[test]
    fn cochlea_frequency_map_uses_piece_order() {
        let mut pieces = Vec::new();
        for n in [1, 2] {
            let mut piece = Piece::new(vec![tile([0.0; 3], 1)], PathBuf::from("c"), n, &SplineParams::default());
            let arc: Vec<(f64, f64)> = (0..8)
                .map(|k| {
                    let a = PI * k as f64 / 7.0;
                    (100.0 * a.cos(), 100.0 * a.sin())
                })
                .collect();
            piece.spiral_mut(LandmarkType::Ihc).set_points(&arc).unwrap();
            pieces.push(piece);
        }
        let cochlea = Cochlea::new(pieces, PathBuf::from("/data/c"));

        let map = cochlea
            .make_frequency_map(&FrequencyMapper::default(), LandmarkType::Ihc, "mouse", &[70.0, 5.0])
            .unwrap();
        assert_eq!(map[0].1.piece, 1);
        assert_eq!(map[1].1.piece, 2);
    }
}
