//! Label rasters and views.
//!
//! `LabelView` is a borrowed 2D view into a 1D buffer of class labels with an
//! explicit stride. The stride counts elements between the starts of
//! consecutive rows, so a stride larger than the width represents padded rows.
//! Region views are zero-copy and retain the original stride.

use crate::util::{ChangeMatrixError, ChangeMatrixResult};

#[cfg(feature = "image-io")]
pub mod io;

/// Class label stored in a categorical raster.
pub type Label = u8;

/// Pixel rectangle in image coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Rect {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

impl Rect {
    pub fn new(x: usize, y: usize, width: usize, height: usize) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Number of pixels covered by the rectangle.
    pub fn area(&self) -> usize {
        self.width * self.height
    }
}

/// Borrowed 2D label view with an explicit stride.
#[derive(Copy, Clone, Debug)]
pub struct LabelView<'a> {
    data: &'a [Label],
    width: usize,
    height: usize,
    stride: usize,
}

impl<'a> LabelView<'a> {
    /// Creates a contiguous view with `stride == width`.
    pub fn from_slice(data: &'a [Label], width: usize, height: usize) -> ChangeMatrixResult<Self> {
        Self::new(data, width, height, width)
    }

    /// Creates a view with an explicit stride.
    pub fn new(
        data: &'a [Label],
        width: usize,
        height: usize,
        stride: usize,
    ) -> ChangeMatrixResult<Self> {
        let needed = required_len(width, height, stride)?;
        if data.len() < needed {
            return Err(ChangeMatrixError::BufferTooSmall {
                needed,
                got: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
            stride,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Returns `(width, height)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    /// Number of pixels in the view.
    pub fn len(&self) -> usize {
        self.width * self.height
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the label at `(x, y)` if it is within bounds.
    pub fn get(&self, x: usize, y: usize) -> Option<Label> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.data.get(y * self.stride + x).copied()
    }

    /// Returns row `y` as a slice of length `width`.
    pub fn row(&self, y: usize) -> Option<&'a [Label]> {
        if y >= self.height {
            return None;
        }
        let start = y * self.stride;
        self.data.get(start..start + self.width)
    }

    /// Iterates over rows from top to bottom.
    pub fn rows(&self) -> impl Iterator<Item = &'a [Label]> + '_ {
        (0..self.height).filter_map(move |y| self.row(y))
    }

    /// Returns a zero-copy view of `rect` (coordinates relative to this view).
    pub fn region(&self, rect: Rect) -> ChangeMatrixResult<LabelView<'a>> {
        if rect.width == 0 || rect.height == 0 {
            return Err(ChangeMatrixError::InvalidDimensions {
                width: rect.width,
                height: rect.height,
            });
        }
        let fits_x = rect.x.checked_add(rect.width).is_some_and(|end| end <= self.width);
        let fits_y = rect
            .y
            .checked_add(rect.height)
            .is_some_and(|end| end <= self.height);
        if !fits_x || !fits_y {
            return Err(ChangeMatrixError::InvalidDimensions {
                width: rect.width,
                height: rect.height,
            });
        }
        let start = rect.y * self.stride + rect.x;
        let data = self
            .data
            .get(start..)
            .ok_or(ChangeMatrixError::BufferTooSmall {
                needed: start + 1,
                got: self.data.len(),
            })?;
        LabelView::new(data, rect.width, rect.height, self.stride)
    }

    /// Copies the view into a contiguous row-major buffer.
    pub fn to_contiguous(&self) -> Vec<Label> {
        if self.stride == self.width {
            return self.data[..self.len()].to_vec();
        }
        let mut out = Vec::with_capacity(self.len());
        for row in self.rows() {
            out.extend_from_slice(row);
        }
        out
    }
}

/// Owned contiguous label raster.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LabelRaster {
    data: Vec<Label>,
    width: usize,
    height: usize,
}

impl LabelRaster {
    /// Wraps a row-major buffer of exactly `width * height` labels.
    pub fn new(data: Vec<Label>, width: usize, height: usize) -> ChangeMatrixResult<Self> {
        let needed = required_len(width, height, width)?;
        if data.len() != needed {
            return Err(ChangeMatrixError::BufferTooSmall {
                needed,
                got: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
        })
    }

    /// Builds a raster from nested rows; all rows must have the same length.
    pub fn from_rows<R: AsRef<[Label]>>(rows: &[R]) -> ChangeMatrixResult<Self> {
        let height = rows.len();
        let width = rows.first().map_or(0, |row| row.as_ref().len());
        let mut data = Vec::with_capacity(width * height);
        for row in rows {
            let row = row.as_ref();
            if row.len() != width {
                return Err(ChangeMatrixError::InvalidDimensions {
                    width: row.len(),
                    height,
                });
            }
            data.extend_from_slice(row);
        }
        Self::new(data, width, height)
    }

    /// Creates a raster filled with one label.
    pub fn filled(width: usize, height: usize, label: Label) -> ChangeMatrixResult<Self> {
        let len = required_len(width, height, width)?;
        Self::new(vec![label; len], width, height)
    }

    /// Copies a view into an owned raster.
    pub fn from_view(view: LabelView<'_>) -> Self {
        Self {
            data: view.to_contiguous(),
            width: view.width(),
            height: view.height(),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    pub fn as_slice(&self) -> &[Label] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<Label> {
        self.data
    }

    pub fn view(&self) -> LabelView<'_> {
        LabelView {
            data: &self.data,
            width: self.width,
            height: self.height,
            stride: self.width,
        }
    }
}

fn required_len(width: usize, height: usize, stride: usize) -> ChangeMatrixResult<usize> {
    if width == 0 || height == 0 {
        return Err(ChangeMatrixError::InvalidDimensions { width, height });
    }
    if stride < width {
        return Err(ChangeMatrixError::InvalidStride { width, stride });
    }
    (height - 1)
        .checked_mul(stride)
        .and_then(|v| v.checked_add(width))
        .ok_or(ChangeMatrixError::InvalidDimensions { width, height })
}
