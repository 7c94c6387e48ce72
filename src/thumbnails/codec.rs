//! Decoding source media into thumbnail rasters.
//!
//! Also home to the raster post-processing shared by every thumbnail
//! source (rounded corners) and the synthetic tiles used for videos and
//! failures.

use std::fs;
use std::io::Cursor;
use std::path::Path;

use exif::{In, Tag};
use image::imageops::FilterType;
use image::metadata::Orientation;
use image::{GenericImageView, ImageFormat, Rgba, RgbaImage};
use tracing::{debug, trace};

use crate::error::CodecError;

const VIDEO_BACKGROUND: Rgba<u8> = Rgba([45, 45, 45, 255]);
const VIDEO_ICON: Rgba<u8> = Rgba([13, 115, 119, 255]);
const ERROR_BACKGROUND: Rgba<u8> = Rgba([60, 60, 60, 255]);
const ERROR_MARK: Rgba<u8> = Rgba([200, 100, 100, 255]);

/// Stroke width of the error cross, in pixels.
const ERROR_STROKE: f32 = 3.0;

/// Turns a source file into a raster no larger than `max_side` on either axis.
pub trait MediaCodec: Send + Sync {
    fn decode(&self, path: &Path, max_side: u32) -> Result<RgbaImage, CodecError>;
}

/// Still-image codec backed by the `image` crate.
///
/// Honours the EXIF orientation tag and never upscales.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageCodec;

impl MediaCodec for ImageCodec {
    fn decode(&self, path: &Path, max_side: u32) -> Result<RgbaImage, CodecError> {
        let bytes = fs::read(path).map_err(|source| CodecError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        // Content sniffing first; the extension only helps formats without magic bytes.
        let format = image::guess_format(&bytes)
            .ok()
            .or_else(|| ImageFormat::from_path(path).ok())
            .ok_or_else(|| CodecError::Unsupported(path.to_path_buf()))?;

        let mut img = image::load_from_memory_with_format(&bytes, format).map_err(|source| {
            CodecError::Decode {
                path: path.to_path_buf(),
                source,
            }
        })?;

        if let Some(orientation) = exif_orientation(&bytes) {
            trace!(?path, ?orientation, "Applying EXIF orientation");
            img.apply_orientation(orientation);
        }

        let (src_w, src_h) = img.dimensions();
        let (w, h) = fit_within(src_w, src_h, max_side);
        debug!(?path, src_w, src_h, w, h, "Decoded thumbnail source");

        if (w, h) == (src_w, src_h) {
            return Ok(img.into_rgba8());
        }
        Ok(img.resize_exact(w, h, FilterType::CatmullRom).into_rgba8())
    }
}

fn exif_orientation(bytes: &[u8]) -> Option<Orientation> {
    let exif = exif::Reader::new()
        .read_from_container(&mut Cursor::new(bytes))
        .ok()?;
    let value = exif
        .get_field(Tag::Orientation, In::PRIMARY)?
        .value
        .get_uint(0)?;
    Orientation::from_exif(u8::try_from(value).ok()?)
}

/// Dimensions that fit `width × height` inside a `max_side` square while
/// keeping the aspect ratio. Smaller sources are returned unchanged.
pub fn fit_within(width: u32, height: u32, max_side: u32) -> (u32, u32) {
    if width <= max_side && height <= max_side {
        return (width.max(1), height.max(1));
    }
    let scale = f64::from(max_side) / f64::from(width.max(height));
    let w = (f64::from(width) * scale).round() as u32;
    let h = (f64::from(height) * scale).round() as u32;
    (w.clamp(1, max_side), h.clamp(1, max_side))
}

/// Masks the four corners to quarter circles of `radius` pixels, with
/// antialiased edges. The radius is limited to half the shorter side.
pub fn round_corners(img: &mut RgbaImage, radius: u32) {
    let (w, h) = img.dimensions();
    let r = radius.min(w / 2).min(h / 2) as f32;
    if r <= 0.0 {
        return;
    }
    let (wf, hf) = (w as f32, h as f32);

    for (x, y, pixel) in img.enumerate_pixels_mut() {
        let px = x as f32 + 0.5;
        let py = y as f32 + 0.5;

        let cx = if px < r {
            r
        } else if px > wf - r {
            wf - r
        } else {
            continue;
        };
        let cy = if py < r {
            r
        } else if py > hf - r {
            hf - r
        } else {
            continue;
        };

        let dist = ((px - cx).powi(2) + (py - cy).powi(2)).sqrt();
        let coverage = (r - dist + 0.5).clamp(0.0, 1.0);
        if coverage < 1.0 {
            pixel[3] = (f32::from(pixel[3]) * coverage).round() as u8;
        }
    }
}

/// Dark tile with a play triangle, standing in for video frames.
pub fn video_placeholder(size: u32, radius: u32) -> RgbaImage {
    let mut img = RgbaImage::from_pixel(size, size, VIDEO_BACKGROUND);
    let s = size as f32;
    let left = s * 0.38;
    let right = s * 0.68;
    let mid = s * 0.5;
    let half_height = s * 0.2;

    for (x, y, pixel) in img.enumerate_pixels_mut() {
        let px = x as f32 + 0.5;
        let py = y as f32 + 0.5;
        if px < left || px > right {
            continue;
        }
        let allowed = (right - px) / (right - left) * half_height;
        if (py - mid).abs() <= allowed {
            *pixel = VIDEO_ICON;
        }
    }

    round_corners(&mut img, radius);
    img
}

/// Grey tile with a red cross, used when a thumbnail cannot be produced.
pub fn error_marker(size: u32, radius: u32) -> RgbaImage {
    let mut img = RgbaImage::from_pixel(size, size, ERROR_BACKGROUND);
    let s = size as f32;
    let inset = s / 4.0;
    let half_stroke = ERROR_STROKE / 2.0;

    for (x, y, pixel) in img.enumerate_pixels_mut() {
        let px = x as f32 + 0.5;
        let py = y as f32 + 0.5;
        if px < inset || px > s - inset || py < inset || py > s - inset {
            continue;
        }
        let on_diagonal = (px - py).abs() / std::f32::consts::SQRT_2 <= half_stroke;
        let on_anti_diagonal = (px + py - s).abs() / std::f32::consts::SQRT_2 <= half_stroke;
        if on_diagonal || on_anti_diagonal {
            *pixel = ERROR_MARK;
        }
    }

    round_corners(&mut img, radius);
    img
}
