//! changematrix computes class-transition matrices between two co-registered
//! label rasters.
//!
//! Both images are read tile by tile through [`TileSource`]s sharing one
//! [`TileLayout`]. Each tile pair is counted by a [`TileCounter`], either on
//! the host ([`CpuCounter`]) or through a device runtime ([`DeviceCounter`]),
//! and merged into a shared [`ChangeMatrix`] by a fixed-size worker pool.
//! Cell `(a, b)` of the final matrix is the number of pixels labelled `a` in
//! the reference image and `b` in the current one.
//!
//! Optional features: `tracing` for spans and events, `serde` for config and
//! matrix serialization, `image-io` for decoding label rasters from files, and
//! `cuda` for the CUDA driver backend.

pub mod counter;
pub mod device;
pub mod engine;
pub mod matrix;
pub mod raster;
pub mod scheduler;
pub mod source;
pub(crate) mod trace;
pub mod util;

pub use counter::{
    check_same_shape, validate_labels, CountConfig, CpuCounter, LabelPolicy, TileCount,
    TileCounter, SKIPPED_TRANSITION,
};
pub use device::{
    Device, DeviceConfig, DeviceContext, DeviceCounter, FaultPoint, HostDevice, HostDeviceStats,
    LaunchDims, ModuleSource, SubTilePlan, SubTileSize,
};
pub use engine::{
    compute_change_matrix, ChangeMatrixEngine, ChangeMatrixRun, EngineConfig, TransitionMap,
};
pub use matrix::{ChangeMatrix, CountMatrix, MergeOutcome, MAX_CLASSES};
pub use raster::{Label, LabelRaster, LabelView, Rect};
pub use scheduler::{
    RunReport, RunStatus, SchedulerConfig, SchedulerState, TileFailure, TileScheduler,
};
pub use source::{InMemoryTiles, LabelTile, TileCoord, TileLayout, TileSource};
pub use util::{ChangeMatrixError, ChangeMatrixResult, DeviceError, DeviceResult};

#[cfg(feature = "cuda")]
pub use device::cuda::CudaDevice;
