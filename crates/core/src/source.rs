//! Image acquisition.
//!
//! Images come in from a file on disk, an in-memory buffer (e.g. an upload),
//! or the system clipboard. Only the formats the generation front-end
//! accepts are let through: JPEG, PNG and GIF.
//!
//! # Example
//!
//! ```ignore
//! use kapros_core::source::ImageSource;
//!
//! let loaded = ImageSource::from_path("comic.png")?;
//! let displayed = loaded.display_at(500.0, 400.0);
//! ```

use crate::error::{AppError, Result};
use crate::image_processing::DisplayedImage;
use arboard::Clipboard;
use image::{DynamicImage, ImageFormat, RgbaImage};
use std::fs;
use std::path::Path;

/// Formats accepted as input.
pub const ACCEPTED_FORMATS: &[ImageFormat] = &[ImageFormat::Jpeg, ImageFormat::Png, ImageFormat::Gif];

/// Where a [`LoadedImage`] came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    File(String),
    Bytes,
    Clipboard,
}

/// A decoded input image, not yet laid out.
#[derive(Debug, Clone)]
pub struct LoadedImage {
    pub image: DynamicImage,
    /// `None` for clipboard images, which arrive as raw pixels.
    pub format: Option<ImageFormat>,
    pub origin: Origin,
}

impl LoadedImage {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Lays the image out at the given on-screen size.
    pub fn display_at(self, rendered_width: f64, rendered_height: f64) -> DisplayedImage {
        DisplayedImage::new(self.image, rendered_width, rendered_height)
    }

    /// Lays the image out at its natural size.
    pub fn display_natural(self) -> DisplayedImage {
        DisplayedImage::natural(self.image)
    }

    /// Lays the image out to fit inside a `max_width` x `max_height` box,
    /// keeping its aspect ratio and never scaling up.
    pub fn display_fit(self, max_width: u32, max_height: u32) -> DisplayedImage {
        let (w, h) = (f64::from(self.width()), f64::from(self.height()));
        let scale = (f64::from(max_width) / w).min(f64::from(max_height) / h).min(1.0);
        self.display_at(w * scale, h * scale)
    }
}

/// Entry points for acquiring images.
pub struct ImageSource;

impl ImageSource {
    /// Reads and decodes an image file.
    ///
    /// # Errors
    ///
    /// - [`AppError::Io`] if the file cannot be read
    /// - [`AppError::UnsupportedFormat`] if it is not JPEG, PNG or GIF
    /// - [`AppError::Decode`] if the contents are corrupt
    pub fn from_path(path: impl AsRef<Path>) -> Result<LoadedImage> {
        let path = path.as_ref();
        let bytes = fs::read(path)?;
        log::debug!("Read {} bytes from {}", bytes.len(), path.display());

        let mut loaded = Self::from_bytes(&bytes)?;
        loaded.origin = Origin::File(path.display().to_string());
        Ok(loaded)
    }

    /// Decodes an image from memory. The format is detected from content.
    pub fn from_bytes(bytes: &[u8]) -> Result<LoadedImage> {
        let format = detect_format(bytes)?;
        let image = image::load_from_memory_with_format(bytes, format)
            .map_err(|e| AppError::decode(e.to_string()))?;

        log::debug!("Decoded {:?} image {}x{}", format, image.width(), image.height());

        Ok(LoadedImage {
            image,
            format: Some(format),
            origin: Origin::Bytes,
        })
    }

    /// Takes the image currently on the system clipboard.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Clipboard`] if the clipboard is unavailable or
    /// holds no image.
    pub fn from_clipboard() -> Result<LoadedImage> {
        let mut clipboard = Clipboard::new()
            .map_err(|e| AppError::clipboard(format!("Could not access clipboard: {}", e)))?;
        let data = clipboard
            .get_image()
            .map_err(|e| AppError::clipboard(format!("No image on clipboard: {}", e)))?;

        let buffer = rgba_from_raw(data.width, data.height, data.bytes.into_owned())?;

        Ok(LoadedImage {
            image: DynamicImage::ImageRgba8(buffer),
            format: None,
            origin: Origin::Clipboard,
        })
    }
}

/// Builds an RGBA buffer from clipboard pixels, checking the size fits.
fn rgba_from_raw(width: usize, height: usize, bytes: Vec<u8>) -> Result<RgbaImage> {
    let width = u32::try_from(width)
        .map_err(|_| AppError::clipboard(format!("Clipboard image width {} is too large", width)))?;
    let height = u32::try_from(height)
        .map_err(|_| AppError::clipboard(format!("Clipboard image height {} is too large", height)))?;

    RgbaImage::from_raw(width, height, bytes)
        .ok_or_else(|| AppError::clipboard("Clipboard image has an inconsistent size"))
}

/// Identifies the format from magic bytes and checks it is accepted.
pub fn detect_format(bytes: &[u8]) -> Result<ImageFormat> {
    let format = image::guess_format(bytes)
        .map_err(|_| AppError::UnsupportedFormat("unrecognised image data".to_string()))?;

    if ACCEPTED_FORMATS.contains(&format) {
        Ok(format)
    } else {
        Err(AppError::UnsupportedFormat(format!(
            "{:?} (accepted: JPEG, PNG, GIF)",
            format
        )))
    }
}
