//! Convenience helpers for loading label rasters via the `image` crate.
//!
//! Available when the `image-io` feature is enabled. Samples are taken as
//! class labels without rescaling; multi-band inputs are reduced to their
//! first band. 16-bit samples must fit a [`Label`], and float images are
//! rejected.

use crate::raster::{Label, LabelRaster, LabelView};
use crate::util::{ChangeMatrixError, ChangeMatrixResult};
use image::{DynamicImage, ImageBuffer, Pixel};
use std::path::Path;

/// Creates a borrowed view from a single-band image buffer.
pub fn view_from_gray_image(img: &image::GrayImage) -> ChangeMatrixResult<LabelView<'_>> {
    LabelView::from_slice(img.as_raw(), img.width() as usize, img.height() as usize)
}

/// Creates an owned label raster from a dynamic image.
pub fn raster_from_dynamic_image(img: &DynamicImage) -> ChangeMatrixResult<LabelRaster> {
    let width = img.width() as usize;
    let height = img.height() as usize;
    let data = match img {
        DynamicImage::ImageLuma8(gray) => gray.as_raw().clone(),
        DynamicImage::ImageLumaA8(buf) => first_band(buf),
        DynamicImage::ImageRgb8(buf) => first_band(buf),
        DynamicImage::ImageRgba8(buf) => first_band(buf),
        DynamicImage::ImageLuma16(buf) => narrow_first_band(buf)?,
        DynamicImage::ImageLumaA16(buf) => narrow_first_band(buf)?,
        DynamicImage::ImageRgb16(buf) => narrow_first_band(buf)?,
        DynamicImage::ImageRgba16(buf) => narrow_first_band(buf)?,
        other => {
            return Err(ChangeMatrixError::ImageIo {
                reason: format!("unsupported sample format {:?}", other.color()),
            })
        }
    };
    LabelRaster::new(data, width, height)
}

/// Decodes a classification image from disk into a label raster.
pub fn load_label_raster<P: AsRef<Path>>(path: P) -> ChangeMatrixResult<LabelRaster> {
    let img = image::open(path).map_err(|err| ChangeMatrixError::ImageIo {
        reason: err.to_string(),
    })?;
    raster_from_dynamic_image(&img)
}

fn first_band<P: Pixel<Subpixel = u8>>(buf: &ImageBuffer<P, Vec<u8>>) -> Vec<Label> {
    buf.pixels().map(|px| px.channels()[0]).collect()
}

fn narrow_first_band<P: Pixel<Subpixel = u16>>(
    buf: &ImageBuffer<P, Vec<u16>>,
) -> ChangeMatrixResult<Vec<Label>> {
    buf.enumerate_pixels()
        .map(|(x, y, px)| {
            let value = px.channels()[0];
            Label::try_from(value).map_err(|_| ChangeMatrixError::ImageIo {
                reason: format!("sample {value} at ({x}, {y}) exceeds label range"),
            })
        })
        .collect()
}
