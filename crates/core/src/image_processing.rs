//! Crop rasterization and encoding.
//!
//! This module turns a crop selection made against a rendered image into a
//! standalone JPEG at the image's natural resolution.
//!
//! # Coordinate Mapping
//!
//! The selection is drawn on the image as laid out (e.g. 500x400) while the
//! decoded image may be much larger (e.g. 1000x800). [`PixelRect::from_crop`]
//! maps the selection into natural pixels; this module allocates a surface of
//! exactly that size and copies the pixels across without scaling.
//!
//! # Out-of-bounds selections
//!
//! The rectangle is not clamped to the image. Whatever part of it lies
//! outside the natural image stays at the surface's initial fill, opaque
//! black, so the output always has the requested dimensions.

use crate::crop::{CropRegion, PixelRect};
use crate::error::{AppError, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::{imageops, DynamicImage, Rgb, RgbImage};
use std::path::Path;
use std::sync::Arc;

/// MIME type of every [`ExtractedImage`].
pub const JPEG_MIME: &str = "image/jpeg";

/// Fixed encoder quality for cropped uploads.
pub const JPEG_QUALITY: u8 = 95;

/// Largest side a baseline JPEG can describe.
pub const MAX_JPEG_DIMENSION: u32 = 65_535;

/// Upper bound on surface area, about 800 MB of RGB.
pub const MAX_SURFACE_PIXELS: u64 = 1 << 28;

/// A decoded image together with the size it is rendered at.
#[derive(Clone, Debug)]
pub struct DisplayedImage {
    image: DynamicImage,
    rendered_width: f64,
    rendered_height: f64,
}

impl DisplayedImage {
    /// Wraps a decoded image laid out at `rendered_width` x `rendered_height`.
    pub fn new(image: DynamicImage, rendered_width: f64, rendered_height: f64) -> Self {
        Self { image, rendered_width, rendered_height }
    }

    /// Wraps a decoded image rendered at its natural size.
    pub fn natural(image: DynamicImage) -> Self {
        let (w, h) = (f64::from(image.width()), f64::from(image.height()));
        Self::new(image, w, h)
    }

    pub fn natural_size(&self) -> (u32, u32) {
        (self.image.width(), self.image.height())
    }

    pub fn rendered_size(&self) -> (f64, f64) {
        (self.rendered_width, self.rendered_height)
    }

    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    /// Maps a selection on this image to natural pixels without encoding.
    pub fn pixel_rect(&self, crop: &CropRegion) -> Result<PixelRect> {
        PixelRect::from_crop(self.natural_size(), self.rendered_size(), crop)
    }
}

/// A cropped image, JPEG encoded. Owned by the caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtractedImage {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl ExtractedImage {
    pub fn mime_type(&self) -> &'static str {
        JPEG_MIME
    }

    /// Base64 of the encoded bytes.
    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.bytes)
    }

    /// `data:` URL suitable for embedding in HTML.
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", JPEG_MIME, self.to_base64())
    }

    /// Writes the encoded bytes to `path`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, &self.bytes)?;
        Ok(())
    }
}

/// Crops displayed images into standalone JPEG buffers.
///
/// Holds no state besides the encoder quality, so one instance can serve
/// any number of concurrent calls. [`Default`] encodes at [`JPEG_QUALITY`].
#[derive(Clone, Copy, Debug)]
pub struct CropRasterizer {
    quality: u8,
}

impl Default for CropRasterizer {
    fn default() -> Self {
        Self { quality: JPEG_QUALITY }
    }
}

impl CropRasterizer {
    /// Creates a rasterizer encoding at `quality` (clamped to 1..=100).
    ///
    /// Uploads to the generation service always use [`Default`]; this is for
    /// library callers writing crops elsewhere.
    pub fn with_quality(quality: u8) -> Self {
        Self { quality: quality.clamp(1, 100) }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Crops `image` to `crop` and encodes the result as JPEG.
    ///
    /// # Errors
    ///
    /// - [`AppError::ImageNotReady`] if the image has no pixels or no layout size
    /// - [`AppError::InvalidCropRegion`] for a negative, non-finite or oversized selection
    /// - [`AppError::EmptyCropRegion`] if the selection rounds to zero area
    /// - [`AppError::EncodingFailure`] if the encoder fails or writes nothing
    pub fn rasterize(&self, image: &DisplayedImage, crop: &CropRegion) -> Result<ExtractedImage> {
        let rect = image.pixel_rect(crop)?;
        log::debug!(
            "Rasterizing {} (natural {:?}, rendered {:?}) -> {}",
            crop,
            image.natural_size(),
            image.rendered_size(),
            rect
        );

        let surface = Self::copy_region(image.image(), rect)?;
        let bytes = Self::encode_jpeg(&surface, self.quality)?;

        Ok(ExtractedImage {
            bytes,
            width: rect.width,
            height: rect.height,
        })
    }

    /// Same as [`rasterize`](Self::rasterize), run on the blocking pool so
    /// the pixel copy and encode do not stall the async executor.
    pub async fn rasterize_async(
        &self,
        image: Arc<DisplayedImage>,
        crop: CropRegion,
    ) -> Result<ExtractedImage> {
        let rasterizer = *self;
        tokio::task::spawn_blocking(move || rasterizer.rasterize(&image, &crop))
            .await
            .map_err(|e| AppError::encoding(format!("rasterization task failed: {}", e)))?
    }

    /// Copies `rect` out of `source` onto a fresh black surface of the same size.
    fn copy_region(source: &DynamicImage, rect: PixelRect) -> Result<RgbImage> {
        Self::check_surface(rect)?;

        let mut surface = RgbImage::new(rect.width, rect.height);

        if !rect.fits_within(source.width(), source.height()) {
            log::warn!(
                "Crop {} extends past the {}x{} image, uncovered area left black",
                rect,
                source.width(),
                source.height()
            );
        }

        // The visible part always starts at the rect origin, so it lands at (0, 0).
        if let Some(visible) = rect.intersect(source.width(), source.height()) {
            let part = flatten_onto_black(&source.crop_imm(visible.x, visible.y, visible.width, visible.height));
            imageops::replace(&mut surface, &part, 0, 0);
        }

        Ok(surface)
    }

    /// Rejects rectangles JPEG cannot encode or that are too big to allocate.
    fn check_surface(rect: PixelRect) -> Result<()> {
        if rect.width > MAX_JPEG_DIMENSION || rect.height > MAX_JPEG_DIMENSION {
            return Err(AppError::invalid_crop(format!(
                "{} exceeds the JPEG limit of {} pixels per side",
                rect, MAX_JPEG_DIMENSION
            )));
        }
        if u64::from(rect.width) * u64::from(rect.height) > MAX_SURFACE_PIXELS {
            return Err(AppError::invalid_crop(format!("{} is too large to allocate", rect)));
        }
        Ok(())
    }

    fn encode_jpeg(surface: &RgbImage, quality: u8) -> Result<Vec<u8>> {
        let mut buffer: Vec<u8> = Vec::new();
        JpegEncoder::new_with_quality(&mut buffer, quality)
            .encode_image(surface)
            .map_err(|e| AppError::encoding(e.to_string()))?;

        if buffer.is_empty() {
            return Err(AppError::encoding("encoder produced no output"));
        }
        Ok(buffer)
    }
}

/// Drops alpha by compositing over black, the way a canvas exports JPEG.
fn flatten_onto_black(image: &DynamicImage) -> RgbImage {
    if !image.color().has_alpha() {
        return image.to_rgb8();
    }
    let rgba = image.to_rgba8();
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let scale = |c: u8| ((u16::from(c) * u16::from(a) + 127) / 255) as u8;
        Rgb([scale(r), scale(g), scale(b)])
    })
}
