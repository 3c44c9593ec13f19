//! Crop selection geometry.
//!
//! A crop selection is made against the image as it is *rendered* (laid out
//! at some display size), but the pixels have to be taken from the image at
//! its *natural* resolution. This module owns that mapping.
//!
//! # Units
//!
//! - [`CropUnit::Percent`] regions are fractions of the image and therefore
//!   independent of the rendered size. They map straight onto natural
//!   dimensions.
//! - [`CropUnit::Pixel`] regions are rendered-space pixels and get scaled by
//!   `natural / rendered` on each axis.
//!
//! All four resulting values are rounded independently, so a square
//! selection may come out one pixel off square after scaling.

use crate::error::{AppError, Result};
use std::fmt;
use std::str::FromStr;

/// Width of the initial selection, as a percentage of the rendered width.
pub const DEFAULT_SELECTION_PERCENT: f64 = 90.0;

/// Aspect ratio (width / height) the generation models expect.
pub const SQUARE_ASPECT: f64 = 1.0;

/// Unit a [`CropRegion`] is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CropUnit {
    /// Percent of the image, 0..=100.
    #[default]
    Percent,
    /// Pixels of the rendered image.
    Pixel,
}

impl FromStr for CropUnit {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "%" | "percent" => Ok(Self::Percent),
            "px" | "pixel" | "pixels" => Ok(Self::Pixel),
            other => Err(AppError::invalid_crop(format!("unknown crop unit '{}'", other))),
        }
    }
}

impl fmt::Display for CropUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Percent => write!(f, "%"),
            Self::Pixel => write!(f, "px"),
        }
    }
}

/// A user selection relative to the rendered image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CropRegion {
    pub unit: CropUnit,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl CropRegion {
    pub fn percent(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { unit: CropUnit::Percent, x, y, width, height }
    }

    pub fn pixel(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { unit: CropUnit::Pixel, x, y, width, height }
    }

    /// The whole image.
    pub fn full() -> Self {
        Self::percent(0.0, 0.0, 100.0, 100.0)
    }

    /// Builds the initial selection shown when an image loads: a percent
    /// region `width_percent` wide with the given aspect ratio, shrunk until
    /// it fits the rendered bounds, then centered.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::ImageNotReady`] if the rendered size is not
    /// positive, and [`AppError::InvalidCropRegion`] for a non-positive
    /// width or aspect.
    pub fn centered_aspect(
        width_percent: f64,
        aspect: f64,
        rendered_width: f64,
        rendered_height: f64,
    ) -> Result<Self> {
        check_rendered(rendered_width, rendered_height)?;
        if !(width_percent.is_finite() && width_percent > 0.0) {
            return Err(AppError::invalid_crop(format!("selection width must be positive, got {}", width_percent)));
        }
        if !(aspect.is_finite() && aspect > 0.0) {
            return Err(AppError::invalid_crop(format!("aspect ratio must be positive, got {}", aspect)));
        }

        let mut px_width = width_percent / 100.0 * rendered_width;
        let mut px_height = px_width / aspect;

        if px_height > rendered_height {
            px_height = rendered_height;
            px_width = px_height * aspect;
        }
        if px_width > rendered_width {
            px_width = rendered_width;
            px_height = px_width / aspect;
        }

        let width = px_width / rendered_width * 100.0;
        let height = px_height / rendered_height * 100.0;

        Ok(Self::percent((100.0 - width) / 2.0, (100.0 - height) / 2.0, width, height))
    }

    /// The default 90% square selection.
    pub fn default_square(rendered_width: f64, rendered_height: f64) -> Result<Self> {
        Self::centered_aspect(DEFAULT_SELECTION_PERCENT, SQUARE_ASPECT, rendered_width, rendered_height)
    }

    fn validate(&self) -> Result<()> {
        let fields = [("x", self.x), ("y", self.y), ("width", self.width), ("height", self.height)];
        if let Some((name, value)) = fields.iter().find(|(_, v)| !v.is_finite()) {
            return Err(AppError::invalid_crop(format!("{} is not a finite number ({})", name, value)));
        }
        if self.x < 0.0 || self.y < 0.0 {
            return Err(AppError::invalid_crop(format!(
                "origin must be non-negative, got ({}, {})",
                self.x, self.y
            )));
        }
        Ok(())
    }
}

impl fmt::Display for CropRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{u},{}{u} {}{u}x{}{u}",
            self.x,
            self.y,
            self.width,
            self.height,
            u = self.unit
        )
    }
}

/// An integer rectangle in the image's natural coordinate space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    /// Maps a rendered-space selection onto natural pixels.
    ///
    /// # Arguments
    ///
    /// * `natural` - Full-resolution size of the image
    /// * `rendered` - Size the image is laid out at
    /// * `crop` - The user's selection
    ///
    /// # Errors
    ///
    /// - [`AppError::ImageNotReady`] if either size is zero, negative or not finite
    /// - [`AppError::InvalidCropRegion`] for a negative or non-finite selection
    /// - [`AppError::EmptyCropRegion`] if the width or height rounds to zero
    pub fn from_crop(natural: (u32, u32), rendered: (f64, f64), crop: &CropRegion) -> Result<Self> {
        let (natural_width, natural_height) = natural;
        if natural_width == 0 || natural_height == 0 {
            return Err(AppError::not_ready(format!(
                "natural size is {}x{}",
                natural_width, natural_height
            )));
        }
        check_rendered(rendered.0, rendered.1)?;
        crop.validate()?;

        let natural_width = f64::from(natural_width);
        let natural_height = f64::from(natural_height);

        let (x, y, width, height) = match crop.unit {
            CropUnit::Percent => (
                crop.x / 100.0 * natural_width,
                crop.y / 100.0 * natural_height,
                crop.width / 100.0 * natural_width,
                crop.height / 100.0 * natural_height,
            ),
            CropUnit::Pixel => {
                let scale_x = natural_width / rendered.0;
                let scale_y = natural_height / rendered.1;
                (crop.x * scale_x, crop.y * scale_y, crop.width * scale_x, crop.height * scale_y)
            }
        };

        let width = width.round();
        let height = height.round();
        if width <= 0.0 || height <= 0.0 {
            return Err(AppError::EmptyCropRegion);
        }

        Ok(Self {
            x: to_u32("x", x.round())?,
            y: to_u32("y", y.round())?,
            width: to_u32("width", width)?,
            height: to_u32("height", height)?,
        })
    }

    /// Right edge (exclusive), widened to avoid overflow.
    pub fn right(&self) -> u64 {
        u64::from(self.x) + u64::from(self.width)
    }

    /// Bottom edge (exclusive), widened to avoid overflow.
    pub fn bottom(&self) -> u64 {
        u64::from(self.y) + u64::from(self.height)
    }

    /// Whether the rectangle lies entirely inside an image of the given size.
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        self.right() <= u64::from(width) && self.bottom() <= u64::from(height)
    }

    /// The part of this rectangle covered by an image of the given size,
    /// or `None` if they do not overlap.
    pub fn intersect(&self, width: u32, height: u32) -> Option<PixelRect> {
        if self.x >= width || self.y >= height {
            return None;
        }
        let right = self.right().min(u64::from(width)) as u32;
        let bottom = self.bottom().min(u64::from(height)) as u32;
        Some(PixelRect {
            x: self.x,
            y: self.y,
            width: right - self.x,
            height: bottom - self.y,
        })
    }
}

impl fmt::Display for PixelRect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}+{}+{}", self.width, self.height, self.x, self.y)
    }
}

fn check_rendered(width: f64, height: f64) -> Result<()> {
    if width.is_finite() && height.is_finite() && width > 0.0 && height > 0.0 {
        Ok(())
    } else {
        Err(AppError::not_ready(format!("rendered size is {}x{}", width, height)))
    }
}

fn to_u32(name: &str, value: f64) -> Result<u32> {
    if value > f64::from(u32::MAX) {
        return Err(AppError::invalid_crop(format!("{} {} is out of range", name, value)));
    }
    Ok(value.max(0.0) as u32)
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Percent crops do not depend on how large the image is rendered.
        #[test]
        fn prop_percent_crop_ignores_rendered_size(
            (natural_w, natural_h) in (1u32..=4000, 1u32..=4000),
            (rendered_a, rendered_b) in ((1.0f64..=4000.0, 1.0f64..=4000.0), (1.0f64..=4000.0, 1.0f64..=4000.0)),
            (x, y, w, h) in (0.0f64..=50.0, 0.0f64..=50.0, 1.0f64..=50.0, 1.0f64..=50.0),
        ) {
            let crop = CropRegion::percent(x, y, w, h);
            let a = PixelRect::from_crop((natural_w, natural_h), rendered_a, &crop);
            let b = PixelRect::from_crop((natural_w, natural_h), rendered_b, &crop);
            match (a, b) {
                (Ok(a), Ok(b)) => prop_assert_eq!(a, b),
                (Err(AppError::EmptyCropRegion), Err(AppError::EmptyCropRegion)) => {}
                (a, b) => prop_assert!(false, "diverged: {:?} vs {:?}", a, b),
            }
        }

        /// At 1:1 scale a pixel crop keeps its rounded size.
        #[test]
        fn prop_unscaled_pixel_crop_keeps_size(
            (natural_w, natural_h) in (10u32..=2000, 10u32..=2000),
            (fx, fy, fw, fh) in (0.0f64..=0.5, 0.0f64..=0.5, 0.05f64..=0.5, 0.05f64..=0.5),
        ) {
            let crop = CropRegion::pixel(
                fx * f64::from(natural_w),
                fy * f64::from(natural_h),
                fw * f64::from(natural_w),
                fh * f64::from(natural_h),
            );
            let rendered = (f64::from(natural_w), f64::from(natural_h));
            if let Ok(rect) = PixelRect::from_crop((natural_w, natural_h), rendered, &crop) {
                prop_assert_eq!(rect.width, crop.width.round() as u32);
                prop_assert_eq!(rect.height, crop.height.round() as u32);
            }
        }

        /// The default selection always fits and is square in rendered pixels.
        #[test]
        fn prop_default_square_fits(
            (rw, rh) in (1.0f64..=5000.0, 1.0f64..=5000.0),
        ) {
            let crop = CropRegion::default_square(rw, rh).unwrap();
            prop_assert!(crop.x >= -1e-9 && crop.y >= -1e-9);
            prop_assert!(crop.x + crop.width <= 100.0 + 1e-9);
            prop_assert!(crop.y + crop.height <= 100.0 + 1e-9);
            let px_w = crop.width / 100.0 * rw;
            let px_h = crop.height / 100.0 * rh;
            prop_assert!((px_w - px_h).abs() < 1e-6 * rw.max(rh));
        }
    }
}
