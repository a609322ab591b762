// src/output.rs - CSV tables, overlay images and saved state

use csv::Writer;
use image::{ImageFormat, RgbImage};
use log::info;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::errors::{CochleogramError, Result};
use crate::frequency::FrequencyRecord;
use crate::image_utils::{composite_to_rgb, draw_markers, draw_polyline};
use crate::piece::{Cochlea, LandmarkType, Piece, PieceState};

fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Write one row per requested frequency
pub fn write_frequency_csv<P: AsRef<Path>>(map: &[(f64, FrequencyRecord)], path: P) -> Result<()> {
    let path = path.as_ref();
    create_parent(path)?;

    let mut writer = Writer::from_path(path)?;
    writer.write_record([
        "Requested_kHz",
        "Piece",
        "I",
        "X",
        "Y",
        "X_Orig",
        "Y_Orig",
        "Direction",
        "Distance_mm",
        "Distance_Norm",
        "Frequency_kHz",
    ])?;

    for (requested, r) in map {
        writer.write_record(&[
            format!("{:.6}", requested),
            r.piece.to_string(),
            format!("{:.6}", r.i),
            format!("{:.6}", r.x),
            format!("{:.6}", r.y),
            format!("{:.6}", r.x_orig),
            format!("{:.6}", r.y_orig),
            r.direction.to_string(),
            format!("{:.6}", r.distance_mm),
            format!("{:.6}", r.distance_norm),
            format!("{:.6}", r.frequency),
        ])?;
    }

    writer.flush().map_err(|e| CochleogramError::CsvOutput(csv::Error::from(e)))?;
    info!("Wrote frequency map to {}", path.display());
    Ok(())
}

/// Write every detected cell of every piece
pub fn write_cells_csv<P: AsRef<Path>>(cochlea: &Cochlea, path: P) -> Result<()> {
    let path = path.as_ref();
    create_parent(path)?;

    let mut writer = Writer::from_path(path)?;
    writer.write_record(["Piece", "Landmark", "X", "Y"])?;

    for piece in &cochlea.pieces {
        for (landmark, cells) in piece.all_cells() {
            for (x, y) in cells.points() {
                writer.write_record(&[
                    piece.piece.to_string(),
                    landmark.to_string(),
                    format!("{:.6}", x),
                    format!("{:.6}", y),
                ])?;
            }
        }
    }

    writer.flush().map_err(|e| CochleogramError::CsvOutput(csv::Error::from(e)))?;
    Ok(())
}

fn landmark_color(landmark: LandmarkType) -> [u8; 3] {
    match landmark {
        LandmarkType::Ihc => [255, 140, 0],
        LandmarkType::Ohc1 => [0, 255, 255],
        LandmarkType::Ohc2 => [255, 0, 255],
        LandmarkType::Ohc3 => [255, 255, 0],
        LandmarkType::Extra => [255, 255, 255],
    }
}

/// Maximum projection of the merged piece with spirals and cells drawn on
/// top. Excluded stretches of each spiral are drawn in gray.
pub fn render_overlay(piece: &Piece, channel: &str) -> Result<RgbImage> {
    let merged = piece.merge_tiles()?;
    let mut image = composite_to_rgb(&merged.get_image(channel, None)?);
    let height = image.height() as f64;

    let to_pixels = |points: &[(f64, f64)]| -> Vec<(f64, f64)> {
        points
            .iter()
            .map(|&(x, y)| {
                let (i, j) = merged.to_indices(x, y);
                (i, height - 1.0 - j)
            })
            .collect()
    };

    for landmark in LandmarkType::ALL {
        let spiral = piece.spiral(landmark);
        let curve = spiral.curve();
        draw_polyline(&mut image, &to_pixels(&curve), landmark_color(landmark));
        for region in spiral.exclusion_regions() {
            draw_polyline(&mut image, &to_pixels(&region), [128, 128, 128]);
        }
        draw_markers(&mut image, &to_pixels(&piece.cells(landmark).points()), 3, landmark_color(landmark));
    }

    Ok(image)
}

pub fn save_overlay<P: AsRef<Path>>(image: &RgbImage, path: P) -> Result<()> {
    let path = path.as_ref();
    create_parent(path)?;
    image.save_with_format(path, ImageFormat::Png)?;
    Ok(())
}

/// Saved cochlea state keyed by piece number
pub fn load_state<P: AsRef<Path>>(path: P) -> Result<BTreeMap<u32, PieceState>> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

pub fn save_state<P: AsRef<Path>>(state: &BTreeMap<u32, PieceState>, path: P) -> Result<()> {
    let path = path.as_ref();
    create_parent(path)?;
    fs::write(path, serde_json::to_string_pretty(state)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spline::SplineParams;
    use crate::volume::tests::test_info;
    use crate::volume::ImageVolume;
    use ndarray::Array4;
    use std::path::PathBuf;

    fn piece() -> Piece {
        let mut image = Array4::<f32>::zeros((40, 30, 1, 2));
        image[[10, 10, 0, 1]] = 1.0;
        let volume = ImageVolume::new(test_info([0.0; 3], [1.0, 1.0, 1.0]), image, None);
        let mut piece = Piece::new(vec![volume], PathBuf::from("c"), 1, &SplineParams::default());
        piece
            .spiral_mut(LandmarkType::Ihc)
            .set_points(&[(5.0, 5.0), (15.0, 8.0), (25.0, 12.0), (35.0, 20.0)])
            .unwrap();
        piece
    }

    #[test]
    fn frequency_csv_has_one_row_per_request() {
        let dir = tempfile::tempdir().unwrap();
        let record = FrequencyRecord {
            piece: 2,
            i: 0.5,
            x: 1.0,
            y: 2.0,
            x_orig: 3.0,
            y_orig: 4.0,
            direction: -1,
            distance_mm: 0.25,
            distance_norm: 0.5,
            frequency: 16.0,
        };
        let path = dir.path().join("out").join("frequency.csv");
        write_frequency_csv(&[(16.0, record.clone()), (32.0, record)], &path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("Requested_kHz,Piece"));
        assert!(lines[2].starts_with("32.000000,2,"));
    }

    #[test]
    fn overlay_matches_merged_size() {
        let image = render_overlay(&piece(), "All").unwrap();
        assert_eq!(image.dimensions(), (40, 30));
        // Bright voxel at x=10, y=10 lands on the flipped row
        assert_eq!(image.get_pixel(10, 19).0, [0, 0, 255]);
    }

    #[test]
    fn state_file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let mut state = BTreeMap::new();
        state.insert(1, piece().get_state());

        save_state(&state, &path).unwrap();
        assert_eq!(load_state(&path).unwrap(), state);
    }
}
