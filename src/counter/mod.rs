//! Per-tile change counting.
//!
//! A [`TileCounter`] turns one tile's reference and current labels into a
//! partial [`CountMatrix`]. [`CpuCounter`] does a single linear pass on the
//! host; [`DeviceCounter`](crate::device::DeviceCounter) offloads the same
//! computation to a device runtime. Both validate labels once on the host with
//! [`validate_labels`] before counting.

mod cpu;

pub use cpu::CpuCounter;

use crate::matrix::{validate_num_classes, CountMatrix};
use crate::raster::{Label, LabelView};
use crate::util::{ChangeMatrixError, ChangeMatrixResult};

/// Sentinel written into transition maps for pixels skipped by `LabelPolicy::Skip`.
pub const SKIPPED_TRANSITION: u32 = u32::MAX;

/// Handling of labels outside `[0, num_classes)`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum LabelPolicy {
    /// Fail the tile with `OutOfRangeLabel`.
    #[default]
    Strict,
    /// Ignore pixels where either label is out of range.
    Skip,
}

/// Counting parameters shared by every counter implementation.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct CountConfig {
    /// Number of classes `C`; labels must lie in `[0, C)`.
    pub num_classes: usize,
    pub policy: LabelPolicy,
    /// Also return the per-pixel transition map.
    pub keep_transition_map: bool,
}

impl Default for CountConfig {
    fn default() -> Self {
        Self {
            num_classes: 45,
            policy: LabelPolicy::Strict,
            keep_transition_map: false,
        }
    }
}

impl CountConfig {
    pub fn new(num_classes: usize) -> Self {
        Self {
            num_classes,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> ChangeMatrixResult<()> {
        validate_num_classes(self.num_classes)
    }
}

/// Result of counting one tile.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TileCount {
    pub matrix: CountMatrix,
    /// Row-major `reference * C + current` per pixel, when requested.
    pub transition_map: Option<Vec<u32>>,
}

/// Computes a tile's partial change matrix.
pub trait TileCounter: Send + Sync {
    /// Counting parameters this counter was built with.
    fn config(&self) -> &CountConfig;

    /// Counts transitions between two equal-shaped label views.
    fn count(
        &self,
        reference: LabelView<'_>,
        current: LabelView<'_>,
    ) -> ChangeMatrixResult<TileCount>;
}

impl<T: TileCounter + ?Sized> TileCounter for std::sync::Arc<T> {
    fn config(&self) -> &CountConfig {
        (**self).config()
    }

    fn count(
        &self,
        reference: LabelView<'_>,
        current: LabelView<'_>,
    ) -> ChangeMatrixResult<TileCount> {
        (**self).count(reference, current)
    }
}

/// Fails with `TileShapeMismatch` unless both views have the same shape.
pub fn check_same_shape(reference: LabelView<'_>, current: LabelView<'_>) -> ChangeMatrixResult<()> {
    if reference.shape() != current.shape() {
        return Err(ChangeMatrixError::TileShapeMismatch {
            reference: reference.shape(),
            current: current.shape(),
        });
    }
    Ok(())
}

/// Host-side label check run before any counting.
///
/// Under `LabelPolicy::Strict` the first out-of-range label (reference image
/// first, then current, in row-major order) is reported with its tile-local
/// position. `LabelPolicy::Skip` accepts everything.
pub fn validate_labels(
    reference: LabelView<'_>,
    current: LabelView<'_>,
    cfg: &CountConfig,
) -> ChangeMatrixResult<()> {
    check_same_shape(reference, current)?;
    if cfg.policy == LabelPolicy::Skip || cfg.num_classes >= crate::matrix::MAX_CLASSES {
        return Ok(());
    }
    for view in [reference, current] {
        if let Some((x, y, value)) = first_out_of_range(view, cfg.num_classes) {
            return Err(ChangeMatrixError::OutOfRangeLabel {
                value,
                x,
                y,
                num_classes: cfg.num_classes,
            });
        }
    }
    Ok(())
}

fn first_out_of_range(view: LabelView<'_>, num_classes: usize) -> Option<(usize, usize, Label)> {
    view.rows().enumerate().find_map(|(y, row)| {
        row.iter()
            .position(|&v| v as usize >= num_classes)
            .map(|x| (x, y, row[x]))
    })
}

/// Transition code stored in the per-pixel map.
#[inline]
pub(crate) fn transition_code(from: Label, to: Label, num_classes: usize) -> u32 {
    (from as u32) * (num_classes as u32) + to as u32
}

#[cfg(test)]
mod tests {
    use super::{validate_labels, CountConfig, LabelPolicy};
    use crate::raster::LabelView;
    use crate::util::ChangeMatrixError;

    #[test]
    fn strict_policy_reports_first_bad_pixel() {
        let reference = [0u8, 1, 2, 1];
        let current = [0u8, 1, 1, 7];
        let r = LabelView::from_slice(&reference, 2, 2).unwrap();
        let c = LabelView::from_slice(&current, 2, 2).unwrap();
        let err = validate_labels(r, c, &CountConfig::new(2)).unwrap_err();
        assert_eq!(
            err,
            ChangeMatrixError::OutOfRangeLabel {
                value: 2,
                x: 0,
                y: 1,
                num_classes: 2,
            }
        );

        let lenient = CountConfig {
            policy: LabelPolicy::Skip,
            ..CountConfig::new(2)
        };
        assert!(validate_labels(r, c, &lenient).is_ok());
    }
}
