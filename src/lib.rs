// src/lib.rs - Library interface for cochleogram

pub mod config;
pub mod coordinates;
pub mod detector;
pub mod errors;
pub mod exclusion;
pub mod frequency;
pub mod image_utils;
pub mod mosaic;
pub mod output;
pub mod path_algorithms;
pub mod piece;
pub mod spiral;
pub mod spline;
pub mod volume;

// Re-export commonly used types and functions
pub use config::Config;
pub use errors::{CochleogramError, Result};

pub use coordinates::{Axis, CoordinateTransform};
pub use detector::{find_centroid, find_nuclei, find_peaks, CellDetector, DetectionParams};
pub use exclusion::{merge_intervals, ExclusionIntervalSet, Interval};
pub use frequency::{
    mouse_place_frequency, octave_space, FrequencyMapper, FrequencyRecord, PieceSpiral, SpeciesRegistry,
};
pub use mosaic::merge_volumes;
pub use path_algorithms::{expand_path, shortest_path, Point};
pub use piece::{list_pieces, Cochlea, LandmarkType, Piece, PieceState};
pub use spiral::{PathState, SpiralPath};
pub use spline::{SplineCurve, SplineParams};
pub use volume::{ChannelInfo, ImageVolume, VolumeInfo, VolumeState};

// Re-export output writers
pub use output::{
    load_state,
    render_overlay,
    save_overlay,
    save_state,
    write_cells_csv,
    write_frequency_csv,
};
