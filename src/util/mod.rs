//! Shared utility helpers.

pub mod error;
pub(crate) mod math;
pub(crate) mod sync;

pub use error::{ChangeMatrixError, ChangeMatrixResult, DeviceError, DeviceResult};
