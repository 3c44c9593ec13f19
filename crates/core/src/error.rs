//! Error types for the kapros-core library.
//!
//! Every failure here is local and recoverable: the caller reports it to the
//! user as a short status message and lets them try again. Nothing in the
//! library retries on its own.

use thiserror::Error;

/// Errors that can occur within the kapros-core library.
#[derive(Error, Debug)]
pub enum AppError {
    /// The crop rectangle rounded to zero (or negative) width or height.
    #[error("Crop region is empty")]
    EmptyCropRegion,

    /// The crop region has negative or non-finite coordinates.
    #[error("Invalid crop region: {0}")]
    InvalidCropRegion(String),

    /// The source image has not been decoded or laid out yet.
    #[error("Image is not ready: {0}")]
    ImageNotReady(String),

    /// Encoding the cropped surface produced no output.
    #[error("Failed to encode cropped image: {0}")]
    EncodingFailure(String),

    /// The input bytes are not one of the accepted image formats.
    #[error("Unsupported image format: {0}")]
    UnsupportedFormat(String),

    /// The input bytes could not be decoded as an image.
    #[error("Failed to decode image: {0}")]
    Decode(String),

    /// Clipboard access failed or held no image.
    #[error("Clipboard error: {0}")]
    Clipboard(String),

    /// Configuration-related errors (invalid values, bad URLs).
    #[error("Configuration error: {0}")]
    Config(String),

    /// The request to the generation service could not be completed.
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The generation service answered with a non-success HTTP status.
    #[error("HTTP error! status: {status}")]
    Http {
        /// Numeric HTTP status code.
        status: u16,
    },

    /// The generation service answered, but not with a usable payload.
    #[error("Invalid response from generation service: {0}")]
    InvalidResponse(String),

    /// Standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The result image was not valid base64.
    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),
}

impl AppError {
    /// Creates a configuration error with the given message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates an invalid crop region error with the given message.
    pub fn invalid_crop(msg: impl Into<String>) -> Self {
        Self::InvalidCropRegion(msg.into())
    }

    /// Creates an image-not-ready error with the given message.
    pub fn not_ready(msg: impl Into<String>) -> Self {
        Self::ImageNotReady(msg.into())
    }

    /// Creates an encoding failure with the given message.
    pub fn encoding(msg: impl Into<String>) -> Self {
        Self::EncodingFailure(msg.into())
    }

    /// Creates a decode error with the given message.
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Creates a clipboard error with the given message.
    pub fn clipboard(msg: impl Into<String>) -> Self {
        Self::Clipboard(msg.into())
    }

    /// Creates an invalid response error with the given message.
    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }
}

/// A convenient alias for Result with [`AppError`].
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_error_matches_service_wording() {
        let err = AppError::Http { status: 503 };
        assert_eq!(err.to_string(), "HTTP error! status: 503");
    }

    #[test]
    fn helpers_build_expected_variants() {
        assert!(matches!(AppError::not_ready("x"), AppError::ImageNotReady(_)));
        assert!(matches!(AppError::encoding("x"), AppError::EncodingFailure(_)));
        assert!(matches!(AppError::invalid_crop("x"), AppError::InvalidCropRegion(_)));
    }
}
