//! Kapros Core Library
//!
//! Crops an image to a region selected on its on-screen rendering and sends
//! the crop to the Kapros generation service (face2comic / comic2face).
//!
//! # Overview
//!
//! - **Image Sources**: file, memory and clipboard input via [`source`]
//! - **Crop Geometry**: rendered-to-natural mapping via [`crop`]
//! - **Rasterization**: pixel copy and JPEG encoding via [`image_processing`]
//! - **Generation**: the remote model API via [`generation`]
//!
//! # Quick Start
//!
//! ```ignore
//! use kapros_core::{CropRegion, Kapros, Model, source::ImageSource};
//!
//! let app = Kapros::new()?;
//! let displayed = ImageSource::from_path("comic.png")?.display_at(500.0, 400.0);
//! let crop = CropRegion::default_square(500.0, 400.0)?;
//!
//! let cropped = app.rasterize(&displayed, &crop)?;
//! let result = app.generate(Model::Comic2Face, &cropped).await?;
//! result.save("face.jpg")?;
//! ```
//!
//! # Module Structure
//!
//! - [`config`]: Environment configuration
//! - [`crop`]: Crop units, regions and natural-space rectangles
//! - [`error`]: Error types and result aliases
//! - [`generation`]: HTTP client and wire types for the generation service
//! - [`image_processing`]: Crop rasterizer and encoded output
//! - [`settings`]: Persisted user preferences
//! - [`source`]: Image acquisition

pub mod config;
pub mod crop;
pub mod error;
pub mod generation;
pub mod image_processing;
pub mod settings;
pub mod source;

// Re-export primary types for convenience
pub use config::Config;
pub use crop::{CropRegion, CropUnit, PixelRect};
pub use error::{AppError, Result};
pub use generation::{GeneratedImage, GenerationClient, Model, ModelStatus};
pub use image_processing::{CropRasterizer, DisplayedImage, ExtractedImage};
pub use settings::Settings;

use std::sync::Arc;

/// Main entry point for the Kapros library.
///
/// Bundles the rasterizer and the service client built from one
/// [`Config`]. Each call is independent; nothing is cached between them.
pub struct Kapros {
    config: Config,
    rasterizer: CropRasterizer,
    client: GenerationClient,
}

impl Kapros {
    /// Creates an instance configured from the environment (including `.env`).
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the HTTP client
    /// cannot be built.
    pub fn new() -> Result<Self> {
        Self::with_config(Config::load()?)
    }

    /// Creates an instance with custom configuration.
    pub fn with_config(config: Config) -> Result<Self> {
        let client = GenerationClient::new(&config)?;
        let rasterizer = CropRasterizer::default();
        Ok(Self { config, rasterizer, client })
    }

    /// Crops `image` to `crop` and encodes the result.
    pub fn rasterize(&self, image: &DisplayedImage, crop: &CropRegion) -> Result<ExtractedImage> {
        self.rasterizer.rasterize(image, crop)
    }

    /// Submits an already-cropped image to `model`.
    pub async fn generate(&self, model: Model, image: &ExtractedImage) -> Result<GeneratedImage> {
        self.client.generate(model, image).await
    }

    /// Crops off the async executor, then submits the crop to `model`.
    ///
    /// Returns the uploaded crop alongside the result so callers can show both.
    pub async fn crop_and_generate(
        &self,
        model: Model,
        image: Arc<DisplayedImage>,
        crop: CropRegion,
    ) -> Result<(ExtractedImage, GeneratedImage)> {
        let cropped = self.rasterizer.rasterize_async(image, crop).await?;
        let generated = self.client.generate(model, &cropped).await?;
        Ok((cropped, generated))
    }

    /// Queries whether `model` is ready.
    pub async fn status(&self, model: Model) -> Result<ModelStatus> {
        self.client.status(model).await
    }

    /// Asks the service to load `model`.
    pub async fn setup(&self, model: Model) -> Result<serde_json::Value> {
        self.client.setup(model).await
    }

    /// Lists models known to the service.
    pub async fn models(&self) -> Result<serde_json::Value> {
        self.client.models().await
    }

    /// Returns a reference to the current configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn rasterizer(&self) -> &CropRasterizer {
        &self.rasterizer
    }
}

/// Initializes the library by loading environment variables.
///
/// Call this once at application startup. Loads `.env` files if present.
pub fn init() {
    let _ = dotenvy::dotenv();
}
