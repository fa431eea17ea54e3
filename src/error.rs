//! Error taxonomy for the capture and streaming engine

use thiserror::Error;

/// Errors raised on the capture side of a feed.
///
/// Only `Configuration` changes the feed's state (it sends the feed to
/// degraded mode). `Capture` and `Encode` are transient and retried.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The sensor could not be opened or configured.
    #[error("sensor {index} unavailable: {reason}")]
    Configuration { index: u32, reason: String },

    /// A single frame could not be read from the sensor.
    #[error("capture failed: {0}")]
    Capture(String),

    /// A raw frame could not be compressed.
    #[error("encode failed: {0}")]
    Encode(String),
}

impl CaptureError {
    pub fn configuration(index: u32, reason: impl ToString) -> Self {
        Self::Configuration {
            index,
            reason: reason.to_string(),
        }
    }
}

impl From<image::ImageError> for CaptureError {
    fn from(err: image::ImageError) -> Self {
        Self::Encode(err.to_string())
    }
}

impl From<jpeg_decoder::Error> for CaptureError {
    fn from(err: jpeg_decoder::Error) -> Self {
        Self::Encode(format!("mjpeg decode: {err}"))
    }
}

/// Invalid or unreadable configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("unknown feed: {0}")]
    UnknownFeed(String),
}
