use thiserror::Error;
use std::io;
use std::path::PathBuf;

/// Custom error types for cochleogram
#[derive(Error, Debug)]
pub enum CochleogramError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("State serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to read tile array: {0}")]
    Npy(#[from] ndarray_npy::ReadNpyError),

    #[error("Array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("CSV output error: {0}")]
    CsvOutput(#[from] csv::Error),

    #[error("Point must be finite, got ({0}, {1})")]
    NonFiniteCoordinate(f64, f64),

    #[error("Unsupported axis: {0}")]
    UnknownAxis(String),

    #[error("Channel {0} does not exist")]
    UnknownChannel(String),

    #[error("Must provide name for channel, got index {0}")]
    ChannelIndex(String),

    #[error("Z slice {index} out of range for volume with {depth} slices")]
    ZSliceOutOfRange { index: usize, depth: usize },

    #[error("Unrecognized display color: {0}")]
    UnknownColor(String),

    #[error("Unrecognized node format: {0}")]
    NodeFormat(String),

    #[error("No frequency function registered for species {0}")]
    UnknownSpecies(String),

    #[error("Cannot determine direction of arc")]
    ArcDirection,

    #[error("Please check the {spiral} spiral on piece {piece} and try again")]
    InsufficientPoints { piece: String, spiral: String },

    #[error("Cannot merge tiles. {field} differs")]
    MergeConflict { field: String },

    #[error("Cannot merge tiles with different voxel sizes")]
    VoxelSizeMismatch,

    #[error("Nothing to merge")]
    EmptyMerge,

    #[error("No node within hit threshold of {threshold}")]
    NoNodeWithinThreshold { threshold: f64 },

    #[error("Piece {0} not found")]
    PieceNotFound(u32),

    #[error("Invalid input path: {0}")]
    InvalidPath(PathBuf),
}

/// Type alias for Result with our custom error type
pub type Result<T> = std::result::Result<T, CochleogramError>;
