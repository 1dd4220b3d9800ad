//! Tile grid and the tile source contract.
//!
//! A `TileLayout` is a regular grid of fixed-size cells over the image extent.
//! The last column and row may be partial; their bounds are clipped to the
//! extent. The engine reads the reference and the current image through two
//! `TileSource`s sharing one layout.

use crate::raster::{LabelRaster, LabelView, Rect};
use crate::util::{ChangeMatrixError, ChangeMatrixResult};

/// Zero-based tile index in the grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TileCoord {
    pub tile_x: usize,
    pub tile_y: usize,
}

impl TileCoord {
    pub fn new(tile_x: usize, tile_y: usize) -> Self {
        Self { tile_x, tile_y }
    }
}

/// Regular tile grid over an image extent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TileLayout {
    pub width: usize,
    pub height: usize,
    pub tile_width: usize,
    pub tile_height: usize,
}

impl TileLayout {
    /// Creates a layout, rejecting zero-sized extents or cells.
    pub fn new(
        width: usize,
        height: usize,
        tile_width: usize,
        tile_height: usize,
    ) -> ChangeMatrixResult<Self> {
        let layout = Self {
            width,
            height,
            tile_width,
            tile_height,
        };
        layout.validate()?;
        Ok(layout)
    }

    /// Checks that the extent and the cell size are non-zero.
    pub fn validate(&self) -> ChangeMatrixResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(ChangeMatrixError::config(format!(
                "image extent {}x{} is empty",
                self.width, self.height
            )));
        }
        if self.tile_width == 0 || self.tile_height == 0 {
            return Err(ChangeMatrixError::config(format!(
                "tile size {}x{} is empty",
                self.tile_width, self.tile_height
            )));
        }
        Ok(())
    }

    pub fn num_tiles_x(&self) -> usize {
        self.width.div_ceil(self.tile_width)
    }

    pub fn num_tiles_y(&self) -> usize {
        self.height.div_ceil(self.tile_height)
    }

    pub fn num_tiles(&self) -> usize {
        self.num_tiles_x() * self.num_tiles_y()
    }

    /// Whether `coord` lies inside the grid.
    pub fn contains(&self, coord: TileCoord) -> bool {
        coord.tile_x < self.num_tiles_x() && coord.tile_y < self.num_tiles_y()
    }

    /// Pixel bounds of a tile, clipped to the image extent.
    pub fn bounds(&self, coord: TileCoord) -> Option<Rect> {
        if !self.contains(coord) {
            return None;
        }
        let x = coord.tile_x * self.tile_width;
        let y = coord.tile_y * self.tile_height;
        Some(Rect::new(
            x,
            y,
            self.tile_width.min(self.width - x),
            self.tile_height.min(self.height - y),
        ))
    }

    /// All tile coordinates in row-major order.
    pub fn coords(&self) -> impl Iterator<Item = TileCoord> {
        let nx = self.num_tiles_x();
        let ny = self.num_tiles_y();
        (0..ny).flat_map(move |tile_y| (0..nx).map(move |tile_x| TileCoord::new(tile_x, tile_y)))
    }
}

/// One image's labels for one tile.
#[derive(Clone, Debug)]
pub struct LabelTile {
    pub labels: LabelRaster,
    pub bounds: Rect,
}

impl LabelTile {
    pub fn view(&self) -> LabelView<'_> {
        self.labels.view()
    }

    pub fn shape(&self) -> (usize, usize) {
        self.labels.shape()
    }
}

/// Provider of label tiles for one image.
pub trait TileSource: Send + Sync {
    /// Grid the source is tiled with.
    fn layout(&self) -> TileLayout;

    /// Fetches the labels of one tile.
    fn tile(&self, coord: TileCoord) -> ChangeMatrixResult<LabelTile>;
}

/// Tile source backed by an in-memory raster.
#[derive(Clone, Debug)]
pub struct InMemoryTiles {
    raster: LabelRaster,
    layout: TileLayout,
}

impl InMemoryTiles {
    /// Tiles `raster` with cells of `tile_width x tile_height`.
    pub fn new(
        raster: LabelRaster,
        tile_width: usize,
        tile_height: usize,
    ) -> ChangeMatrixResult<Self> {
        let layout = TileLayout::new(raster.width(), raster.height(), tile_width, tile_height)?;
        Ok(Self { raster, layout })
    }

    pub fn raster(&self) -> &LabelRaster {
        &self.raster
    }
}

impl TileSource for InMemoryTiles {
    fn layout(&self) -> TileLayout {
        self.layout
    }

    fn tile(&self, coord: TileCoord) -> ChangeMatrixResult<LabelTile> {
        let bounds = self
            .layout
            .bounds(coord)
            .ok_or_else(|| ChangeMatrixError::TileSource {
                reason: format!(
                    "tile ({}, {}) outside {}x{} grid",
                    coord.tile_x,
                    coord.tile_y,
                    self.layout.num_tiles_x(),
                    self.layout.num_tiles_y()
                ),
            })?;
        let view = self.raster.view().region(bounds)?;
        Ok(LabelTile {
            labels: LabelRaster::from_view(view),
            bounds,
        })
    }
}

impl<T: TileSource + ?Sized> TileSource for std::sync::Arc<T> {
    fn layout(&self) -> TileLayout {
        (**self).layout()
    }

    fn tile(&self, coord: TileCoord) -> ChangeMatrixResult<LabelTile> {
        (**self).tile(coord)
    }
}
