// src/mosaic.rs - Merging tiles into one padded composite volume

use log::debug;
use ndarray::{s, Array4};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::errors::{CochleogramError, Result};
use crate::volume::{ImageVolume, VolumeInfo};

/// Merge volumes sharing a voxel size into one volume covering the union of
/// their extents.
///
/// The union is rounded outward to whole voxels. Volumes are copied in the
/// order given and later volumes overwrite earlier ones where they overlap.
/// Metadata keys whose values agree across all volumes are carried over; a
/// key present in every volume with differing values is an error.
pub fn merge_volumes(volumes: &[ImageVolume], source: Option<PathBuf>) -> Result<ImageVolume> {
    let base = volumes.first().ok_or(CochleogramError::EmptyMerge)?;
    let voxel_size = base.voxel_size();

    if volumes.iter().any(|v| v.voxel_size() != voxel_size) {
        return Err(CochleogramError::VoxelSizeMismatch);
    }
    let n_channels = base.n_channels();
    if volumes.iter().any(|v| v.n_channels() != n_channels) {
        return Err(CochleogramError::MergeConflict { field: "channels".to_string() });
    }
    if volumes.iter().any(|v| v.info().channels != base.info().channels) {
        return Err(CochleogramError::MergeConflict { field: "channels".to_string() });
    }

    let mut lower = [f64::INFINITY; 3];
    let mut upper = [f64::NEG_INFINITY; 3];
    for v in volumes {
        let e = v.extent();
        for axis in 0..3 {
            lower[axis] = lower[axis].min(e[axis * 2]);
            upper[axis] = upper[axis].max(e[axis * 2 + 1]);
        }
    }

    let lb_pixels: [i64; 3] = std::array::from_fn(|a| (lower[a] / voxel_size[a]).floor() as i64);
    let ub_pixels: [i64; 3] = std::array::from_fn(|a| (upper[a] / voxel_size[a]).ceil() as i64);
    let shape: [usize; 3] = std::array::from_fn(|a| (ub_pixels[a] - lb_pixels[a]).max(0) as usize);

    let mut merged = Array4::<f32>::zeros((shape[0], shape[1], shape[2], n_channels));

    for v in volumes {
        let e = v.extent();
        let (nx, ny, nz, _) = v.shape();
        let size = [nx, ny, nz];

        let offset: [i64; 3] =
            std::array::from_fn(|a| (e[a * 2] / voxel_size[a] - lb_pixels[a] as f64).round() as i64);

        // Rounding can push a tile a voxel past the composite; clip it.
        let src_lb: [usize; 3] = std::array::from_fn(|a| (-offset[a]).max(0) as usize);
        let dst_lb: [usize; 3] = std::array::from_fn(|a| offset[a].max(0) as usize);
        let len: [usize; 3] = std::array::from_fn(|a| {
            let available_src = size[a].saturating_sub(src_lb[a]);
            let available_dst = shape[a].saturating_sub(dst_lb[a]);
            available_src.min(available_dst)
        });
        if len.iter().any(|&l| l == 0) {
            debug!("Tile {} does not overlap the merged volume", v.key());
            continue;
        }

        merged
            .slice_mut(s![
                dst_lb[0]..dst_lb[0] + len[0],
                dst_lb[1]..dst_lb[1] + len[1],
                dst_lb[2]..dst_lb[2] + len[2],
                ..
            ])
            .assign(&v.image().slice(s![
                src_lb[0]..src_lb[0] + len[0],
                src_lb[1]..src_lb[1] + len[1],
                src_lb[2]..src_lb[2] + len[2],
                ..
            ]));
    }

    let mut extra = BTreeMap::new();
    for (key, value) in &base.info().extra {
        let mut shared = true;
        for v in &volumes[1..] {
            match v.info().extra.get(key) {
                Some(other) if other != value => {
                    return Err(CochleogramError::MergeConflict { field: key.clone() });
                }
                Some(_) => {}
                None => shared = false,
            }
        }
        if shared {
            extra.insert(key.clone(), value.clone());
        }
    }

    let info = VolumeInfo {
        lower: std::array::from_fn(|a| lb_pixels[a] as f64 * voxel_size[a]),
        voxel_size,
        channels: base.info().channels.clone(),
        extra,
    };
    debug!("Merged {} tiles into volume of shape {:?}", volumes.len(), merged.dim());

    Ok(ImageVolume::new(info, merged, source))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::tests::test_info;
    use assert_approx_eq::assert_approx_eq;

    fn tile(lower: [f64; 3], shape: (usize, usize, usize), fill: f32) -> ImageVolume {
        let image = Array4::from_elem((shape.0, shape.1, shape.2, 2), fill);
        ImageVolume::new(test_info(lower, [0.5, 0.5, 1.0]), image, None)
    }

    #[test]
    fn merged_extent_covers_union() {
        let a = tile([0.0, 0.0, 0.0], (10, 10, 2), 1.0);
        let b = tile([4.2, 3.0, 0.0], (10, 6, 2), 2.0);
        let merged = merge_volumes(&[a, b], None).unwrap();

        let e = merged.extent();
        assert_approx_eq!(e[0], 0.0);
        assert_approx_eq!(e[1], 9.5);
        assert_approx_eq!(e[2], 0.0);
        assert_approx_eq!(e[3], 6.0);
        assert_approx_eq!(e[4], 0.0);
        assert_approx_eq!(e[5], 2.0);
        assert_eq!(merged.shape(), (19, 12, 2, 2));
    }

    #[test]
    fn later_tiles_overwrite_overlap() {
        let a = tile([0.0, 0.0, 0.0], (4, 4, 1), 1.0);
        let b = tile([1.0, 0.0, 0.0], (4, 4, 1), 2.0);
        let merged = merge_volumes(&[a, b], None).unwrap();

        assert_eq!(merged.shape(), (6, 4, 1, 2));
        assert_eq!(merged.image()[[0, 0, 0, 0]], 1.0);
        assert_eq!(merged.image()[[1, 0, 0, 0]], 1.0);
        assert_eq!(merged.image()[[2, 0, 0, 0]], 2.0);
        assert_eq!(merged.image()[[5, 3, 0, 1]], 2.0);
    }

    #[test]
    fn differing_metadata_is_a_conflict() {
        let a = tile([0.0, 0.0, 0.0], (2, 2, 1), 1.0);
        let mut info = test_info([1.0, 0.0, 0.0], [0.5, 0.5, 1.0]);
        info.extra.insert("system".to_string(), serde_json::json!("SP8 1"));
        let b = ImageVolume::new(info.clone(), Array4::zeros((2, 2, 1, 2)), None);
        info.extra.insert("system".to_string(), serde_json::json!("SP5 2"));
        let c = ImageVolume::new(info, Array4::zeros((2, 2, 1, 2)), None);

        // Key missing from one tile is simply not carried over.
        let merged = merge_volumes(&[a, b.clone()], None).unwrap();
        assert!(merged.info().extra.is_empty());

        let merged = merge_volumes(&[b.clone(), b.clone()], None).unwrap();
        assert_eq!(merged.info().extra.get("system"), Some(&serde_json::json!("SP8 1")));

        match merge_volumes(&[b, c], None) {
            Err(CochleogramError::MergeConflict { field }) => assert_eq!(field, "system"),
            other => panic!("expected conflict, got {:?}", other.map(|v| v.shape())),
        }
    }

    #[test]
    fn voxel_size_must_match() {
        let a = tile([0.0, 0.0, 0.0], (2, 2, 1), 1.0);
        let b = ImageVolume::new(
            test_info([0.0, 0.0, 0.0], [1.0, 1.0, 1.0]),
            Array4::zeros((2, 2, 1, 2)),
            None,
        );
        assert!(matches!(merge_volumes(&[a, b], None), Err(CochleogramError::VoxelSizeMismatch)));
        assert!(matches!(merge_volumes(&[], None), Err(CochleogramError::EmptyMerge)));
    }
}
