//! Sub-tile partitioning and launch sizing.

use crate::device::ModuleSource;
use crate::util::math::{ceil_sqrt, largest_divisor_at_most};
use crate::util::{ChangeMatrixError, ChangeMatrixResult};

/// How sub-tile dimensions are chosen for each tile.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum SubTileSize {
    /// Take the largest divisors of the tile dimensions not exceeding the bounds.
    Auto { max_width: usize, max_height: usize },
    /// Use exactly these dimensions; tiles they do not divide are rejected.
    Fixed { width: usize, height: usize },
}

impl Default for SubTileSize {
    fn default() -> Self {
        SubTileSize::Auto {
            max_width: 128,
            max_height: 128,
        }
    }
}

/// Device counting parameters.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct DeviceConfig {
    pub sub_tile: SubTileSize,
    /// Threads per block side; `None` uses `floor(sqrt(max_threads_per_block))`.
    pub block_side: Option<u32>,
    pub module: ModuleSource,
}

impl DeviceConfig {
    pub fn validate(&self) -> ChangeMatrixResult<()> {
        let (w, h) = match self.sub_tile {
            SubTileSize::Auto {
                max_width,
                max_height,
            } => (max_width, max_height),
            SubTileSize::Fixed { width, height } => (width, height),
        };
        if w == 0 || h == 0 {
            return Err(ChangeMatrixError::config(format!(
                "sub-tile size {w}x{h} is empty"
            )));
        }
        if self.block_side == Some(0) {
            return Err(ChangeMatrixError::config("block side must be positive"));
        }
        Ok(())
    }
}

/// Partition of one tile into equal sub-tiles.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubTilePlan {
    pub sub_width: usize,
    pub sub_height: usize,
    pub tiles_x: usize,
    pub tiles_y: usize,
}

impl SubTilePlan {
    /// Plans a `width x height` tile, failing when sub-tiles cannot cover it
    /// exactly.
    pub fn for_tile(width: usize, height: usize, size: SubTileSize) -> ChangeMatrixResult<Self> {
        if width == 0 || height == 0 {
            return Err(ChangeMatrixError::InvalidDimensions { width, height });
        }
        let dims = match size {
            SubTileSize::Auto {
                max_width,
                max_height,
            } => largest_divisor_at_most(width, max_width)
                .zip(largest_divisor_at_most(height, max_height)),
            SubTileSize::Fixed {
                width: sw,
                height: sh,
            } => Some((sw, sh)),
        };
        let (sub_width, sub_height) =
            dims.ok_or_else(|| ChangeMatrixError::config("sub-tile size is empty"))?;

        if sub_width == 0 || sub_height == 0 || width % sub_width != 0 || height % sub_height != 0
        {
            return Err(ChangeMatrixError::TileDimensionMismatch {
                tile_width: width,
                tile_height: height,
                sub_width,
                sub_height,
            });
        }
        let too_large = width
            .checked_mul(height)
            .map_or(true, |n| n > u32::MAX as usize);
        if too_large {
            return Err(ChangeMatrixError::InvalidDimensions { width, height });
        }
        Ok(Self {
            sub_width,
            sub_height,
            tiles_x: width / sub_width,
            tiles_y: height / sub_height,
        })
    }

    pub fn num_sub_tiles(&self) -> usize {
        self.tiles_x * self.tiles_y
    }

    /// Bytes expected in each input label buffer.
    pub fn input_len(&self) -> usize {
        self.sub_width * self.sub_height * self.num_sub_tiles()
    }
}

/// Grid and block dimension triples for one launch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LaunchDims {
    pub grid: (u32, u32, u32),
    pub block: (u32, u32, u32),
}

impl LaunchDims {
    /// Square grid of square blocks with at least `items` threads in total.
    pub fn covering(items: usize, block_side: u32) -> Self {
        let side = block_side.max(1);
        let per_block = (side as usize) * (side as usize);
        let blocks = items.div_ceil(per_block).max(1);
        let grid_side = ceil_sqrt(blocks) as u32;
        Self {
            grid: (grid_side, grid_side, 1),
            block: (side, side, 1),
        }
    }

    pub fn threads_per_block(&self) -> u64 {
        self.block.0 as u64 * self.block.1 as u64 * self.block.2 as u64
    }

    pub fn total_threads(&self) -> u64 {
        self.threads_per_block() * self.grid.0 as u64 * self.grid.1 as u64 * self.grid.2 as u64
    }
}

/// Block side derived from the device limit, as `floor(sqrt(max_threads))`.
pub(crate) fn default_block_side(max_threads_per_block: u32) -> u32 {
    ((max_threads_per_block as f64).sqrt().floor() as u32).max(1)
}

#[cfg(test)]
mod tests {
    use super::{default_block_side, LaunchDims, SubTilePlan, SubTileSize};
    use crate::util::ChangeMatrixError;

    #[test]
    fn auto_plan_uses_divisors() {
        let plan = SubTilePlan::for_tile(300, 256, SubTileSize::default()).unwrap();
        assert_eq!((plan.sub_width, plan.sub_height), (100, 128));
        assert_eq!((plan.tiles_x, plan.tiles_y), (3, 2));
        assert_eq!(plan.input_len(), 300 * 256);
    }

    #[test]
    fn fixed_plan_rejects_remainder() {
        let err = SubTilePlan::for_tile(
            130,
            128,
            SubTileSize::Fixed {
                width: 128,
                height: 128,
            },
        )
        .unwrap_err();
        assert_eq!(
            err,
            ChangeMatrixError::TileDimensionMismatch {
                tile_width: 130,
                tile_height: 128,
                sub_width: 128,
                sub_height: 128,
            }
        );
    }

    #[test]
    fn launch_covers_all_items() {
        for items in [1usize, 79, 1024, 1025, 1936, 100_000] {
            let dims = LaunchDims::covering(items, 32);
            assert!(dims.total_threads() >= items as u64);
        }
        assert_eq!(default_block_side(1024), 32);
        assert_eq!(default_block_side(512), 22);
    }
}
