// src/volume.rs - Multi-channel image volumes (tiles) with physical extents

use log::{debug, info};
use ndarray::{s, Array2, Array3, Array4, Axis as NdAxis};
use ndarray_npy::read_npy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::coordinates::{Axis, CoordinateTransform};
use crate::errors::{CochleogramError, Result};
use crate::image_utils::{collapse_template, convolve_same, parse_color, sample_bilinear, sphere_template};
use crate::path_algorithms::{expand_path, Point, BAND_SAMPLES};

/// Channel selector meaning every channel
pub const ALL_CHANNELS: &str = "All";

/// Per-channel metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_color: Option<String>,
}

impl ChannelInfo {
    pub fn display_color(&self) -> &str {
        self.display_color.as_deref().unwrap_or("white")
    }
}

/// Tile metadata as supplied by the loader. All units are microns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeInfo {
    /// XYZ origin (lower corner)
    pub lower: [f64; 3],
    /// XYZ voxel size
    pub voxel_size: [f64; 3],
    #[serde(default)]
    pub channels: Vec<ChannelInfo>,
    /// Any other keys (reader, system, version, ...) kept verbatim
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Persisted form of an [`ImageVolume`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeState {
    pub extent: [f64; 6],
}

/// One multi-channel 3-D tile. The array is indexed (x, y, z, channel).
#[derive(Debug, Clone)]
pub struct ImageVolume {
    info: VolumeInfo,
    image: Array4<f32>,
    source: Option<PathBuf>,
    extent: [f64; 6],
}

impl ImageVolume {
    pub fn new(info: VolumeInfo, image: Array4<f32>, source: Option<PathBuf>) -> Self {
        let extent = compute_extent(&info.lower, &info.voxel_size, image.dim());
        if info.channels.len() != image.dim().3 {
            debug!(
                "Volume has {} channel descriptors for {} channels",
                info.channels.len(),
                image.dim().3
            );
        }

        Self { info, image, source, extent }
    }

    /// Load a tile from `<stem>.npy` (u8 or f32, XYZC) and `<stem>.json`
    pub fn from_filename<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(CochleogramError::InvalidPath(path.to_path_buf()));
        }

        let info_path = path.with_extension("json");
        let info: VolumeInfo = serde_json::from_str(&fs::read_to_string(&info_path)?)?;

        let image: Array4<f32> = match read_npy::<_, Array4<u8>>(path) {
            Ok(data) => data.mapv(f32::from),
            Err(_) => read_npy::<_, Array4<f32>>(path)?,
        };
        info!("Loaded tile {} with shape {:?}", path.display(), image.dim());

        Ok(Self::new(info, image, Some(path.to_path_buf())))
    }

    pub fn info(&self) -> &VolumeInfo {
        &self.info
    }

    pub fn image(&self) -> &Array4<f32> {
        &self.image
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// File stem of the source, used as the tile key in saved state
    pub fn key(&self) -> String {
        self.source
            .as_ref()
            .and_then(|p| p.file_stem())
            .and_then(|s| s.to_str())
            .unwrap_or("merged")
            .to_string()
    }

    /// [xlb, xub, ylb, yub, zlb, zub]
    pub fn extent(&self) -> [f64; 6] {
        self.extent
    }

    /// [xlb, xub, ylb, yub]
    pub fn image_extent(&self) -> [f64; 4] {
        [self.extent[0], self.extent[1], self.extent[2], self.extent[3]]
    }

    pub fn shape(&self) -> (usize, usize, usize, usize) {
        self.image.dim()
    }

    pub fn n_channels(&self) -> usize {
        self.image.dim().3
    }

    pub fn voxel_size(&self) -> [f64; 3] {
        self.info.voxel_size
    }

    pub fn channel_names(&self) -> Vec<String> {
        self.info.channels.iter().map(|c| c.name.clone()).collect()
    }

    /// Fill in display colors for channels that were loaded without one
    pub fn apply_channel_colors(&mut self, colors: &BTreeMap<String, String>) {
        for channel in self.info.channels.iter_mut() {
            if channel.display_color.is_none() {
                channel.display_color = colors.get(&channel.name).cloned();
            }
        }
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        let contains_x = self.extent[0] <= x && x <= self.extent[1];
        let contains_y = self.extent[2] <= y && y <= self.extent[3];
        contains_x && contains_y
    }

    pub fn transform(&self) -> CoordinateTransform {
        CoordinateTransform::new(self.info.lower, self.info.voxel_size)
    }

    pub fn to_coords(&self, i: f64, j: f64) -> Point {
        self.transform().to_coords(i, j)
    }

    pub fn to_indices(&self, x: f64, y: f64) -> (f64, f64) {
        self.transform().to_indices(x, y)
    }

    pub fn to_indices_delta(&self, v: f64, axis: Axis) -> f64 {
        self.transform().to_indices_delta(v, axis)
    }

    /// Normalized spherical template roughly the size of a nucleus
    pub fn nuclei_template(&self, radius: f64) -> Array3<f32> {
        let pixel_radius = (radius / self.info.voxel_size[0]).round().max(0.0) as usize;
        sphere_template(pixel_radius)
    }

    /// Composite RGB image (x, y, rgb) of the requested channel.
    ///
    /// The z axis is collapsed by maximum projection unless `z_slice` is
    /// given. Each selected channel is tinted with its display color, the
    /// tinted images are combined by element-wise maximum, and every output
    /// color is scaled by its own maximum.
    pub fn get_image(&self, channel: &str, z_slice: Option<usize>) -> Result<Array3<f32>> {
        let (nx, ny, nz, nc) = self.image.dim();
        let data: Array3<f32> = match z_slice {
            None => self.image.fold_axis(NdAxis(2), f32::NEG_INFINITY, |&a, &b| a.max(b)),
            Some(z) if z < nz => self.image.index_axis(NdAxis(2), z).to_owned(),
            Some(z) => return Err(CochleogramError::ZSliceOutOfRange { index: z, depth: nz }),
        };

        let selected = self.select_channels(channel)?;
        let mut composite = Array3::<f32>::zeros((nx, ny, 3));
        for c in selected {
            if c >= nc {
                continue;
            }
            let rgb = parse_color(self.info.channels[c].display_color())?;
            let plane = data.slice(s![.., .., c]);
            for ((i, j), v) in plane.indexed_iter() {
                for (k, weight) in rgb.iter().enumerate() {
                    let tinted = v * weight;
                    if tinted > composite[[i, j, k]] {
                        composite[[i, j, k]] = tinted;
                    }
                }
            }
        }

        for k in 0..3 {
            let mut color = composite.slice_mut(s![.., .., k]);
            let max = color.fold(0.0f32, |a, &b| a.max(b));
            if max > 0.0 {
                color /= max;
            }
        }

        Ok(composite)
    }

    fn select_channels(&self, channel: &str) -> Result<Vec<usize>> {
        let selected: Vec<usize> = self
            .info
            .channels
            .iter()
            .enumerate()
            .filter(|(_, c)| channel == ALL_CHANNELS || c.name == channel)
            .map(|(i, _)| i)
            .collect();

        if selected.is_empty() {
            if channel.parse::<usize>().is_ok() {
                return Err(CochleogramError::ChannelIndex(channel.to_string()));
            }
            return Err(CochleogramError::UnknownChannel(channel.to_string()));
        }
        Ok(selected)
    }

    /// Intensity of `channel` along a physical-space path.
    ///
    /// With `smooth_radius` the channel image is first blurred with a flat
    /// nucleus-sized template. With `width` the path is widened into a band
    /// of parallel samples and the maximum across the band is returned for
    /// every path position.
    pub fn map(
        &self,
        points: &[Point],
        channel: &str,
        smooth_radius: Option<f64>,
        width: Option<f64>,
    ) -> Result<Vec<f64>> {
        // A channel may be split across several RGB colors depending on its
        // display color, so sum them back together.
        let mut image: Array2<f32> = self.get_image(channel, None)?.sum_axis(NdAxis(2));

        if let Some(radius) = smooth_radius.filter(|r| *r > 0.0) {
            let template = collapse_template(&self.nuclei_template(radius));
            image = convolve_same(&image, &template);
        }

        let rows = match width.filter(|w| *w > 0.0) {
            Some(w) => expand_path(points, w, BAND_SAMPLES),
            None => vec![points.to_vec()],
        };

        let transform = self.transform();
        let mut intensity = vec![f64::NEG_INFINITY; points.len()];
        for row in &rows {
            for (out, &(x, y)) in intensity.iter_mut().zip(row) {
                let (i, j) = transform.to_indices(x, y);
                let v = sample_bilinear(&image, i, j);
                if v > *out {
                    *out = v;
                }
            }
        }

        Ok(intensity)
    }

    /// Move the volume so its lower-left corner sits at (dx, dy).
    ///
    /// Used after registering tiles against each other; shape and voxel
    /// size are unchanged.
    pub fn center(&mut self, dx: f64, dy: f64) {
        let width = self.extent[1] - self.extent[0];
        let height = self.extent[3] - self.extent[2];
        self.extent[0] = dx;
        self.extent[1] = dx + width;
        self.extent[2] = dy;
        self.extent[3] = dy + height;
        self.info.lower[0] = dx;
        self.info.lower[1] = dy;
    }

    /// Pad the z axis with empty slices so the volume spans
    /// `z_min .. z_min + depth * voxel_size`
    pub(crate) fn pad_z(&mut self, bottom: usize, top: usize, z_min: f64, z_max: f64) {
        let (nx, ny, nz, nc) = self.image.dim();
        let mut padded = Array4::<f32>::zeros((nx, ny, bottom + nz + top, nc));
        padded.slice_mut(s![.., .., bottom..bottom + nz, ..]).assign(&self.image);

        self.image = padded;
        self.extent[4] = z_min;
        self.extent[5] = z_max;
        self.info.lower[2] = z_min;
    }

    pub fn get_state(&self) -> VolumeState {
        VolumeState { extent: self.extent }
    }

    pub fn set_state(&mut self, state: &VolumeState) {
        self.extent = state.extent;
        self.info.lower = [state.extent[0], state.extent[2], state.extent[4]];
    }
}

fn compute_extent(lower: &[f64; 3], voxel_size: &[f64; 3], shape: (usize, usize, usize, usize)) -> [f64; 6] {
    let (xpx, ypx, zpx, _) = shape;
    [
        lower[0],
        lower[0] + xpx as f64 * voxel_size[0],
        lower[1],
        lower[1] + ypx as f64 * voxel_size[1],
        lower[2],
        lower[2] + zpx as f64 * voxel_size[2],
    ]
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    pub(crate) fn test_info(lower: [f64; 3], voxel_size: [f64; 3]) -> VolumeInfo {
        VolumeInfo {
            lower,
            voxel_size,
            channels: vec![
                ChannelInfo { name: "CtBP2".to_string(), display_color: Some("red".to_string()) },
                ChannelInfo { name: "MyosinVIIa".to_string(), display_color: Some("blue".to_string()) },
            ],
            extra: BTreeMap::new(),
        }
    }

    fn volume() -> ImageVolume {
        let mut image = Array4::<f32>::zeros((10, 8, 3, 2));
        image[[2, 3, 1, 0]] = 50.0;
        image[[2, 3, 2, 0]] = 100.0;
        image[[5, 5, 0, 1]] = 20.0;
        ImageVolume::new(test_info([10.0, 20.0, 0.0], [0.5, 0.5, 1.0]), image, None)
    }

    #[test]
    fn extent_follows_shape_and_voxel_size() {
        let v = volume();
        assert_eq!(v.extent(), [10.0, 15.0, 20.0, 24.0, 0.0, 3.0]);
        assert!(v.contains(12.0, 21.0));
        assert!(!v.contains(16.0, 21.0));
    }

    #[test]
    fn get_image_projects_and_normalizes() {
        let v = volume();
        let img = v.get_image(ALL_CHANNELS, None).unwrap();
        assert_eq!(img.dim(), (10, 8, 3));
        assert_approx_eq!(img[[2, 3, 0]] as f64, 1.0);
        assert_approx_eq!(img[[5, 5, 2]] as f64, 1.0);
        assert_eq!(img[[5, 5, 0]], 0.0);

        let slice = v.get_image("CtBP2", Some(1)).unwrap();
        assert_approx_eq!(slice[[2, 3, 0]] as f64, 1.0);
        assert_eq!(slice[[5, 5, 2]], 0.0);
    }

    #[test]
    fn get_image_rejects_unknown_and_indexed_channels() {
        let v = volume();
        assert!(matches!(v.get_image("DAPI", None), Err(CochleogramError::UnknownChannel(_))));
        assert!(matches!(v.get_image("1", None), Err(CochleogramError::ChannelIndex(_))));
        assert!(matches!(
            v.get_image("CtBP2", Some(3)),
            Err(CochleogramError::ZSliceOutOfRange { .. })
        ));
    }

    #[test]
    fn map_samples_physical_positions() {
        let v = volume();
        let (x, y) = v.to_coords(2.0, 3.0);
        let i = v.map(&[(x, y), (x + 0.5, y)], "CtBP2", None, None).unwrap();
        assert_approx_eq!(i[0], 1.0);
        assert_approx_eq!(i[1], 0.0);

        // The band reaches the bright voxel from a path one voxel away.
        let path = vec![(x - 1.0, y + 0.5), (x, y + 0.5), (x + 1.0, y + 0.5)];
        let banded = v.map(&path, "CtBP2", None, Some(0.6)).unwrap();
        assert!(banded[1] > 0.9);
    }

    #[test]
    fn smoothed_map_spreads_a_point_source() {
        let v = volume();
        let at = |i: f64, j: f64| v.to_coords(i, j);
        let path = vec![at(2.0, 3.0), at(3.0, 3.0), at(2.0, 2.0), at(3.0, 4.0), at(7.0, 6.0)];

        // One-voxel radius: a 3-D cross, averaged over z
        let smoothed = v.map(&path, "CtBP2", Some(0.5), None).unwrap();
        assert_approx_eq!(smoothed[0], 1.0 / 7.0, 1e-5);
        assert_approx_eq!(smoothed[1], 1.0 / 21.0, 1e-5);
        assert_approx_eq!(smoothed[2], 1.0 / 21.0, 1e-5);
        assert!(smoothed[3].abs() < 1e-5);
        assert!(smoothed[4].abs() < 1e-5);
    }

    #[test]
    fn center_translates_extent() {
        let mut v = volume();
        v.center(-3.0, 4.0);
        assert_eq!(v.extent(), [-3.0, 2.0, 4.0, 8.0, 0.0, 3.0]);
        let (x, y) = v.to_coords(0.0, 0.0);
        assert_eq!((x, y), (-3.0, 4.0));
        assert_eq!(v.shape(), (10, 8, 3, 2));
    }

    #[test]
    fn loads_npy_and_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cochlea_piece_1_tile.npy");
        let data = Array4::<u8>::from_elem((4, 4, 2, 1), 7);
        ndarray_npy::write_npy(&path, &data).unwrap();
        fs::write(
            path.with_extension("json"),
            r#"{"lower": [0, 0, 5], "voxel_size": [1, 1, 2], "channels": [{"name": "DAPI"}], "reader": "lif"}"#,
        )
        .unwrap();

        let v = ImageVolume::from_filename(&path).unwrap();
        assert_eq!(v.extent(), [0.0, 4.0, 0.0, 4.0, 5.0, 9.0]);
        assert_eq!(v.key(), "cochlea_piece_1_tile");
        assert_eq!(v.info().extra.get("reader"), Some(&serde_json::json!("lif")));
        assert_eq!(v.image()[[1, 1, 1, 0]], 7.0);
    }

    #[test]
    fn state_round_trip() {
        let mut v = volume();
        let mut state = v.get_state();
        state.extent = [1.0, 6.0, 2.0, 6.0, 0.0, 3.0];
        v.set_state(&state);
        assert_eq!(v.get_state(), state);
        assert_eq!(v.to_coords(0.0, 0.0), (1.0, 2.0));
    }
}
