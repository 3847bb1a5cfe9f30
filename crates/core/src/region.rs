//! Resolution-independent cropping of highlighted page regions.
//!
//! Bounding boxes are stored in the coordinate space of whatever canvas the
//! highlight was captured on (`bounding.width` x `bounding.height`). The page
//! is re-rendered at [`RENDER_SCALE`], the box is converted to relative
//! coordinates and mapped onto the fresh render, so the crop covers the same
//! part of the page regardless of either scale.

use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;

use crate::error::{AskPdfError, Result};
use crate::highlight::{BoundingBox, HighlightPosition};
use crate::pdf::PdfBackend;

pub const RENDER_SCALE: f32 = 2.0;
pub const MAX_IMAGE_PIXELS: u32 = 250_000;
pub const JPEG_QUALITY: u8 = 85;

#[derive(Debug, Clone, Copy)]
pub struct RegionOptions {
    pub render_scale: f32,
    pub max_pixels: u32,
    pub jpeg_quality: u8,
}

impl Default for RegionOptions {
    fn default() -> Self {
        Self {
            render_scale: RENDER_SCALE,
            max_pixels: MAX_IMAGE_PIXELS,
            jpeg_quality: JPEG_QUALITY,
        }
    }
}

/// Pixel rectangle inside a rendered page. Never smaller than 1x1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// A JPEG-encoded crop of one page.
#[derive(Debug, Clone)]
pub struct RenderedRegion {
    pub jpeg: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl RenderedRegion {
    /// `data:image/jpeg;base64,...`, the form handed to vision models.
    pub fn data_uri(&self) -> String {
        format!(
            "data:image/jpeg;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(&self.jpeg)
        )
    }
}

/// Maps `bounding` onto a canvas of `canvas_width` x `canvas_height` pixels.
pub fn crop_rect(bounding: &BoundingBox, canvas_width: u32, canvas_height: u32) -> CropRect {
    let (x, width) = project_span(
        bounding.x1,
        bounding.x2,
        bounding.width,
        canvas_width,
    );
    let (y, height) = project_span(
        bounding.y1,
        bounding.y2,
        bounding.height,
        canvas_height,
    );
    CropRect {
        x,
        y,
        width,
        height,
    }
}

fn project_span(start: f64, end: f64, reference: f64, canvas: u32) -> (u32, u32) {
    if canvas == 0 {
        return (0, 1);
    }
    if !(reference > 0.0) || !reference.is_finite() {
        return (0, 1);
    }
    let relative = |value: f64| {
        if value.is_finite() {
            (value / reference).clamp(0.0, 1.0)
        } else {
            0.0
        }
    };
    let extent = f64::from(canvas);
    let lo = (relative(start.min(end)) * extent).round() as u32;
    let hi = (relative(start.max(end)) * extent).round() as u32;
    let offset = lo.min(canvas - 1);
    let length = hi.saturating_sub(offset).clamp(1, canvas - offset);
    (offset, length)
}

/// Largest size with the same aspect ratio whose area fits `max_pixels`.
pub fn fit_within_budget(width: u32, height: u32, max_pixels: u32) -> (u32, u32) {
    let area = u64::from(width) * u64::from(height);
    if max_pixels == 0 || area <= u64::from(max_pixels) {
        return (width, height);
    }
    let aspect = f64::from(width) / f64::from(height);
    let scaled_width = (f64::from(max_pixels) * aspect).sqrt().floor().max(1.0);
    let scaled_height = (scaled_width / aspect).floor().max(1.0);
    let (mut width, mut height) = (scaled_width as u32, scaled_height as u32);
    // Extreme aspect ratios collapse one side to a single pixel.
    if u64::from(width) * u64::from(height) > u64::from(max_pixels) {
        if width == 1 {
            height = max_pixels;
        } else {
            width = max_pixels / height;
        }
    }
    (width, height)
}

pub fn extract_region(
    backend: &dyn PdfBackend,
    pdf: &[u8],
    position: &HighlightPosition,
) -> Result<RenderedRegion> {
    extract_region_with(backend, pdf, position, &RegionOptions::default())
}

pub fn extract_region_with(
    backend: &dyn PdfBackend,
    pdf: &[u8],
    position: &HighlightPosition,
    options: &RegionOptions,
) -> Result<RenderedRegion> {
    let page = backend.render_page(pdf, position.page, options.render_scale)?;
    if page.width() == 0 || page.height() == 0 {
        return Err(AskPdfError::Render(format!(
            "page {} rendered to an empty canvas",
            position.page
        )));
    }
    let rect = crop_rect(&position.bounding, page.width(), page.height());
    tracing::debug!(
        page = position.page,
        canvas_width = page.width(),
        canvas_height = page.height(),
        x = rect.x,
        y = rect.y,
        width = rect.width,
        height = rect.height,
        "cropping highlighted region"
    );
    let cropped = page.crop_imm(rect.x, rect.y, rect.width, rect.height);
    let (width, height) = fit_within_budget(cropped.width(), cropped.height(), options.max_pixels);
    let region = if (width, height) == (cropped.width(), cropped.height()) {
        cropped
    } else {
        cropped.resize_exact(width, height, FilterType::Triangle)
    };
    encode_jpeg(&region, options.jpeg_quality)
}

fn encode_jpeg(image: &DynamicImage, quality: u8) -> Result<RenderedRegion> {
    let rgb = image.to_rgb8();
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, quality).encode_image(&rgb)?;
    Ok(RenderedRegion {
        jpeg,
        width: rgb.width(),
        height: rgb.height(),
    })
}
