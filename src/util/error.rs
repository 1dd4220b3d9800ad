//! Error types for changematrix.

use thiserror::Error;

/// Result alias for changematrix operations.
pub type ChangeMatrixResult<T> = std::result::Result<T, ChangeMatrixError>;

/// Result alias for device execution calls.
pub type DeviceResult<T> = std::result::Result<T, DeviceError>;

/// Errors that can occur while computing a change matrix.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ChangeMatrixError {
    /// A run parameter is invalid; the run fails before any tile is processed.
    #[error("invalid configuration: {reason}")]
    InvalidConfiguration { reason: String },
    /// Width or height is zero or overflows.
    #[error("invalid dimensions: {width}x{height}")]
    InvalidDimensions { width: usize, height: usize },
    /// Stride is smaller than the row width.
    #[error("invalid stride: width={width} stride={stride}")]
    InvalidStride { width: usize, stride: usize },
    /// Backing buffer is too small for the requested view.
    #[error("buffer too small: needed {needed} elements, got {got}")]
    BufferTooSmall { needed: usize, got: usize },
    /// The two tiles for one coordinate have different shapes.
    #[error("tile shape mismatch: reference {reference:?} vs current {current:?}")]
    TileShapeMismatch {
        reference: (usize, usize),
        current: (usize, usize),
    },
    /// A pixel label lies outside `[0, num_classes)`.
    ///
    /// Counters report `(x, y)` relative to the tile they were given; engine
    /// failures report the position in the full image.
    #[error("label {value} at ({x}, {y}) is outside [0, {num_classes})")]
    OutOfRangeLabel {
        value: u8,
        x: usize,
        y: usize,
        num_classes: usize,
    },
    /// Device sub-tiles do not evenly cover the tile.
    #[error(
        "tile {tile_width}x{tile_height} is not divisible into {sub_width}x{sub_height} sub-tiles"
    )]
    TileDimensionMismatch {
        tile_width: usize,
        tile_height: usize,
        sub_width: usize,
        sub_height: usize,
    },
    /// A device call failed; the invocation's resources were released.
    #[error("device execution failed: {0}")]
    DeviceExecution(#[from] DeviceError),
    /// The tile source could not produce a tile.
    #[error("tile source failed: {reason}")]
    TileSource { reason: String },
    /// A worker panicked while processing a tile.
    #[error("worker panicked: {reason}")]
    WorkerPanicked { reason: String },
    /// Image decoding failed.
    #[error("image io error: {reason}")]
    ImageIo { reason: String },
}

impl ChangeMatrixError {
    pub(crate) fn config(reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            reason: reason.into(),
        }
    }
}

/// Failures reported by an implementation of the device execution contract.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum DeviceError {
    #[error("context creation failed: {0}")]
    Context(String),
    #[error("allocation of {bytes} bytes failed: {reason}")]
    Alloc { bytes: usize, reason: String },
    #[error("memory copy failed: {0}")]
    Copy(String),
    #[error("module load failed: {0}")]
    Module(String),
    #[error("entry point `{0}` not found")]
    MissingFunction(String),
    #[error("kernel `{kernel}` launch failed: {reason}")]
    Launch { kernel: String, reason: String },
    #[error("synchronization failed: {0}")]
    Synchronize(String),
    #[error("unknown device handle {0}")]
    UnknownHandle(u64),
}
