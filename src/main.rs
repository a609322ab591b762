use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use clap::Parser;
use log::{info, warn};
use rayon::prelude::*;

use cochleogram_lib::detector::{CellDetector, DetectionParams};
use cochleogram_lib::{
    load_state, octave_space, render_overlay, save_overlay, save_state, write_cells_csv, write_frequency_csv,
    Cochlea, CochleogramError, Config, FrequencyMapper, Piece, SpeciesRegistry,
};

/// Command-line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about = "Cochleogram - Tonotopic mapping of cochlear hair cells")]
struct Args {
    /// Directory holding the tiles of one cochlea
    #[clap(short, long)]
    input: Option<String>,

    /// Path to output directory
    #[clap(short, long)]
    output: Option<String>,

    /// Path to configuration file
    #[clap(short, long, default_value = "config.toml")]
    config: String,

    /// Saved spirals, cells and tile positions to start from
    #[clap(short, long)]
    state: Option<String>,

    /// Detect cells along the configured landmark spirals
    #[clap(long)]
    detect: bool,

    /// Save an overlay image of every piece
    #[clap(long)]
    render: bool,

    /// Print more info
    #[clap(short, long)]
    debug: bool,
}

fn load_config(path: &str) -> anyhow::Result<Config> {
    if Path::new(path).exists() {
        return Ok(Config::from_file(path)?);
    }
    warn!("Config file {} not found, using defaults", path);
    Ok(Config::default())
}

fn detect_piece(piece: &mut Piece, config: &Config) -> cochleogram_lib::Result<()> {
    let detector = CellDetector::new(DetectionParams {
        width: config.detection_width,
        spacing: config.detection_spacing,
        smooth_radius: Some(config.smooth_radius).filter(|r| *r > 0.0),
        centroid_power: config.centroid_power,
        resolution: config.detection_resolution,
    });

    for &landmark in &config.detection_landmarks {
        if piece.spiral(landmark).spline().is_none() {
            info!("{}: no {} spiral, skipping detection", piece.name, landmark);
            continue;
        }
        let n = piece.detect_cells(landmark, &config.detection_channel, &detector)?;
        println!("{}: found {} {} cells", piece.name, n, landmark);
    }
    Ok(())
}

/// Frequency map failures caused by one piece's spiral geometry. These skip
/// the frequency table instead of aborting the run.
fn skips_frequency_map(error: &CochleogramError) -> bool {
    matches!(
        error,
        CochleogramError::InsufficientPoints { .. } | CochleogramError::ArcDirection
    )
}

fn main() -> anyhow::Result<()> {
    // Parse command-line arguments
    let args = Args::parse();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if args.debug { "debug" } else { "info" }),
    )
    .init();

    // Load configuration
    let mut config = load_config(&args.config)?;

    // Override config with command-line arguments
    if let Some(input) = args.input.clone() {
        config.input_path = input;
    }

    if let Some(output) = args.output.clone() {
        config.output_base_dir = output;
    }

    // Validate configuration
    config.validate()?;

    // Start timing
    let start_time = Instant::now();

    let input_path = PathBuf::from(&config.input_path);
    if !input_path.is_dir() {
        return Err(CochleogramError::InvalidPath(input_path).into());
    }
    println!("Processing directory: {}", input_path.display());

    let mut cochlea = Cochlea::from_path(&input_path, &config.spline_params(), config.use_parallel)
        .with_context(|| format!("loading tiles from {}", input_path.display()))?;
    println!("Found {} pieces", cochlea.pieces.len());

    for piece in cochlea.pieces.iter_mut() {
        for tile in piece.tiles.iter_mut() {
            tile.apply_channel_colors(&config.channel_colors);
        }
    }

    if let Some(state_path) = &args.state {
        let state = load_state(state_path).with_context(|| format!("reading state from {}", state_path))?;
        cochlea.set_state(&state);
        info!("Restored state for {} pieces", state.len());
    }

    let output_base = PathBuf::from(&config.output_base_dir);
    fs::create_dir_all(&output_base)?;

    if args.detect {
        if config.use_parallel {
            cochlea
                .pieces
                .par_iter_mut()
                .map(|piece| detect_piece(piece, &config))
                .collect::<cochleogram_lib::Result<Vec<_>>>()?;
        } else {
            for piece in cochlea.pieces.iter_mut() {
                detect_piece(piece, &config)?;
            }
        }
        write_cells_csv(&cochlea, output_base.join(format!("{}_cells.csv", cochlea.name)))?;
    }

    let mapper = FrequencyMapper::new(SpeciesRegistry::default());
    let frequencies = octave_space(config.freq_start, config.freq_end, config.freq_step);
    match cochlea.make_frequency_map(&mapper, config.frequency_spiral, &config.species, &frequencies) {
        Ok(map) => {
            write_frequency_csv(&map, output_base.join(format!("{}_frequency_map.csv", cochlea.name)))?;
        }
        Err(e) if skips_frequency_map(&e) => warn!("Skipping frequency map: {}", e),
        Err(e) => return Err(e.into()),
    }

    if args.render {
        for piece in &cochlea.pieces {
            let path = output_base.join(format!("{}.png", piece.name));
            save_overlay(&render_overlay(piece, "All")?, &path)?;
            println!("Saved overlay: {}", path.display());
        }
    }

    save_state(&cochlea.get_state(), output_base.join(format!("{}_state.json", cochlea.name)))?;

    // Report elapsed time
    let elapsed = start_time.elapsed();
    println!("Processing completed in {:.2} seconds", elapsed.as_secs_f64());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spiral_geometry_errors_skip_the_frequency_map() {
        assert!(skips_frequency_map(&CochleogramError::ArcDirection));
        assert!(skips_frequency_map(&CochleogramError::InsufficientPoints {
            piece: "cochlea_piece_1".to_string(),
            spiral: "IHC".to_string(),
        }));
        assert!(!skips_frequency_map(&CochleogramError::UnknownSpecies("gerbil".to_string())));
    }
}
