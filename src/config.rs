// src/config.rs - TOML configuration for the cochleogram CLI and analysis defaults

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::{CochleogramError, Result};
use crate::frequency::SpeciesRegistry;
use crate::piece::LandmarkType;
use crate::spline::SplineParams;

/// Configuration for cochleogram
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub input_path: String,
    pub output_base_dir: String,

    #[serde(default = "default_parallel")]
    pub use_parallel: bool,

    // Spline fitting
    #[serde(default = "default_spline_degree")]
    pub spline_degree: usize,

    /// Weight of the second-difference penalty; zero interpolates the
    /// nodes exactly. Not comparable to a residual-bound smoothing factor.
    #[serde(default)]
    pub spline_smoothing: f64,

    #[serde(default = "default_spline_resolution")]
    pub spline_resolution: f64,

    // Frequency map
    #[serde(default = "default_species")]
    pub species: String,

    #[serde(default = "default_frequency_spiral")]
    pub frequency_spiral: LandmarkType,

    #[serde(default = "default_freq_start")]
    pub freq_start: f64,

    #[serde(default = "default_freq_end")]
    pub freq_end: f64,

    #[serde(default = "default_freq_step")]
    pub freq_step: f64,

    // Cell detection
    #[serde(default = "default_detection_landmarks")]
    pub detection_landmarks: Vec<LandmarkType>,

    #[serde(default = "default_detection_channel")]
    pub detection_channel: String,

    #[serde(default = "default_detection_width")]
    pub detection_width: f64,

    #[serde(default = "default_detection_spacing")]
    pub detection_spacing: f64,

    #[serde(default = "default_smooth_radius")]
    pub smooth_radius: f64,

    #[serde(default = "default_centroid_power")]
    pub centroid_power: i32,

    #[serde(default = "default_detection_resolution")]
    pub detection_resolution: f64,

    // Display colors assigned to channels loaded without one
    #[serde(default = "default_channel_colors")]
    pub channel_colors: BTreeMap<String, String>,
}

fn default_parallel() -> bool {
    true
}

fn default_spline_degree() -> usize {
    3
}

fn default_spline_resolution() -> f64 {
    0.001
}

fn default_species() -> String {
    "mouse".to_string()
}

fn default_frequency_spiral() -> LandmarkType {
    LandmarkType::Ihc
}

fn default_freq_start() -> f64 {
    4.0
}

fn default_freq_end() -> f64 {
    64.0
}

fn default_freq_step() -> f64 {
    0.5 // octaves
}

fn default_detection_landmarks() -> Vec<LandmarkType> {
    vec![LandmarkType::Ihc]
}

fn default_detection_channel() -> String {
    "MyosinVIIa".to_string()
}

fn default_detection_width() -> f64 {
    5.0 // microns either side of the spiral
}

fn default_detection_spacing() -> f64 {
    5.0 // microns between neighbouring cells
}

fn default_smooth_radius() -> f64 {
    2.5 // approximate nucleus radius in microns
}

fn default_centroid_power() -> i32 {
    4
}

fn default_detection_resolution() -> f64 {
    0.0001
}

pub fn default_channel_colors() -> BTreeMap<String, String> {
    [
        ("CtBP2", "red"),
        ("MyosinVIIa", "blue"),
        ("GluR2", "green"),
        ("GlueR2", "green"),
        ("PMT", "white"),
        ("DAPI", "white"),
        // Channels are tagged as unknown when the channel information could
        // not be parsed from the file.
        ("Unknown 1", "red"),
        ("Unknown 2", "green"),
        ("Unknown 3", "blue"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input_path: "./input".to_string(),
            output_base_dir: "./output".to_string(),
            use_parallel: true,
            spline_degree: 3,
            spline_smoothing: 0.0,
            spline_resolution: 0.001,
            species: "mouse".to_string(),
            frequency_spiral: LandmarkType::Ihc,
            freq_start: 4.0,
            freq_end: 64.0,
            freq_step: 0.5,
            detection_landmarks: vec![LandmarkType::Ihc],
            detection_channel: "MyosinVIIa".to_string(),
            detection_width: 5.0,
            detection_spacing: 5.0,
            smooth_radius: 2.5,
            centroid_power: 4,
            detection_resolution: 0.0001,
            channel_colors: default_channel_colors(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            CochleogramError::Config(format!("Failed to read config file '{}': {}", path.display(), e))
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| {
            CochleogramError::Config(format!("Failed to parse config file '{}': {}", path.display(), e))
        })?;

        Ok(config)
    }

    /// Spline settings used for every spiral
    pub fn spline_params(&self) -> SplineParams {
        SplineParams {
            degree: self.spline_degree,
            smoothing: self.spline_smoothing,
            resolution: self.spline_resolution,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let input_path = PathBuf::from(&self.input_path);
        if !input_path.exists() {
            return Err(CochleogramError::InvalidPath(input_path));
        }

        if self.spline_degree == 0 || self.spline_degree > 5 {
            return Err(CochleogramError::Config(
                "spline_degree must be between 1 and 5".to_string(),
            ));
        }

        if self.spline_smoothing < 0.0 {
            return Err(CochleogramError::Config("spline_smoothing must be >= 0.0".to_string()));
        }

        for (name, value) in [
            ("spline_resolution", self.spline_resolution),
            ("detection_resolution", self.detection_resolution),
        ] {
            if value <= 0.0 || value > 1.0 {
                return Err(CochleogramError::Config(format!(
                    "{} must be > 0.0 and <= 1.0",
                    name
                )));
            }
        }

        if !SpeciesRegistry::default().contains(&self.species) {
            return Err(CochleogramError::UnknownSpecies(self.species.clone()));
        }

        if self.freq_start <= 0.0 || self.freq_step <= 0.0 {
            return Err(CochleogramError::Config(
                "freq_start and freq_step must be > 0.0".to_string(),
            ));
        }

        if self.freq_end < self.freq_start {
            return Err(CochleogramError::Config(
                "freq_end must be >= freq_start".to_string(),
            ));
        }

        if self.detection_width <= 0.0 || self.detection_spacing <= 0.0 {
            return Err(CochleogramError::Config(
                "detection_width and detection_spacing must be > 0.0".to_string(),
            ));
        }

        if self.smooth_radius < 0.0 {
            return Err(CochleogramError::Config("smooth_radius must be >= 0.0".to_string()));
        }

        if self.centroid_power < 1 {
            return Err(CochleogramError::Config("centroid_power must be >= 1".to_string()));
        }

        fs::create_dir_all(&self.output_base_dir)?;

        Ok(())
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| {
            CochleogramError::Config(format!("Failed to serialize config: {}", e))
        })?;

        fs::write(path, content)?;

        Ok(())
    }
}
