pub mod capture;
pub mod error;
pub mod pipeline;
pub mod server;
pub mod stats;
pub mod stream;
pub mod supervisor;

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use capture::{Frame, PixelFormat, RawFrame, Resolution};
pub use error::{CaptureError, ConfigError, SupervisorError};
pub use pipeline::{FeedState, FrameCache, RateGovernor};
pub use stats::FeedStats;
pub use stream::StreamBroadcaster;
pub use supervisor::{FeedHandle, FeedSupervisor, Health};

/// System configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub stream: StreamConfig,
    pub server: ServerConfig,
    pub feeds: Vec<FeedConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub backend: BackendKind,
    pub width: u32,
    pub height: u32,
    /// Sensor indices the synthetic backend reports as missing
    pub synthetic_unavailable: Vec<u32>,
    /// Simulated sensor readout time for the synthetic backend
    pub synthetic_latency_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Synthetic,
    V4l2,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub target_fps: u32,
    pub min_fps: u32,
    pub quality: u8,
    pub placeholder_quality: u8,
    pub poll_interval_ms: u64,
    pub error_backoff_ms: u64,
    /// Consecutive on-time cycles before the rate steps back up.
    /// `None` keeps the rate ratcheted down for the life of the feed.
    pub rate_recovery_cycles: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    pub name: String,
    pub sensor_index: u32,
    pub port: u16,
}

impl FeedConfig {
    pub fn new(name: impl Into<String>, sensor_index: u32, port: u16) -> Self {
        Self {
            name: name.into(),
            sensor_index,
            port,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capture: CaptureConfig::default(),
            stream: StreamConfig::default(),
            server: ServerConfig::default(),
            feeds: vec![
                FeedConfig::new("left", 0, 8081),
                FeedConfig::new("right", 1, 8082),
                FeedConfig::new("eye", 2, 8083),
            ],
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Synthetic,
            width: 1920,
            height: 1080,
            synthetic_unavailable: Vec::new(),
            synthetic_latency_ms: 0,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            target_fps: 10,
            min_fps: 5,
            quality: 80,
            placeholder_quality: 50,
            poll_interval_ms: 10,
            error_backoff_ms: 100,
            rate_recovery_cycles: None,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
        }
    }
}

impl CaptureConfig {
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }
}

impl StreamConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }
}

impl Config {
    /// Layer defaults, an optional TOML file and `TRICAM__*` environment
    /// variables, then validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let defaults = ::config::Config::try_from(&Config::default())?;
        let config: Config = ::config::Config::builder()
            .add_source(defaults)
            .add_source(::config::File::from(path.as_ref()).required(false))
            .add_source(
                ::config::Environment::with_prefix("TRICAM")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| -> Result<(), ConfigError> { Err(ConfigError::Invalid(msg)) };
        let stream = &self.stream;

        if stream.min_fps == 0 {
            return invalid("min_fps must be at least 1".into());
        }
        if stream.min_fps > stream.target_fps {
            return invalid(format!(
                "min_fps ({}) exceeds target_fps ({})",
                stream.min_fps, stream.target_fps
            ));
        }
        for quality in [stream.quality, stream.placeholder_quality] {
            if !(1..=100).contains(&quality) {
                return invalid(format!("jpeg quality {quality} outside 1..=100"));
            }
        }
        if stream.rate_recovery_cycles == Some(0) {
            return invalid("rate_recovery_cycles must be positive when set".into());
        }
        if self.capture.width == 0 || self.capture.height == 0 {
            return invalid("resolution must be non-zero".into());
        }
        if self.feeds.is_empty() {
            return invalid("at least one feed is required".into());
        }

        let mut names = HashSet::new();
        let mut ports = HashSet::new();
        for feed in &self.feeds {
            if feed.name.trim().is_empty() {
                return invalid("feed names must not be empty".into());
            }
            if !names.insert(feed.name.as_str()) {
                return invalid(format!("duplicate feed name '{}'", feed.name));
            }
            if !ports.insert(feed.port) {
                return invalid(format!("port {} assigned to more than one feed", feed.port));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_device() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.capture.resolution(), Resolution::new(1920, 1080));
        assert_eq!(config.stream.target_fps, 10);
        assert_eq!(config.stream.min_fps, 5);
        assert_eq!(config.stream.quality, 80);
        assert_eq!(config.stream.placeholder_quality, 50);
        assert_eq!(config.stream.rate_recovery_cycles, None);

        let names: Vec<_> = config.feeds.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["left", "right", "eye"]);
        let ports: Vec<_> = config.feeds.iter().map(|f| f.port).collect();
        assert_eq!(ports, [8081, 8082, 8083]);
    }

    #[test]
    fn test_rejects_inverted_rate_bounds() {
        let mut config = Config::default();
        config.stream.min_fps = 12;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.stream.min_fps = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_duplicate_feeds() {
        let mut config = Config::default();
        config.feeds.push(FeedConfig::new("left", 3, 8090));
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.feeds.push(FeedConfig::new("rear", 3, 8081));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_quality() {
        let mut config = Config::default();
        config.stream.quality = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.stream.placeholder_quality = 101;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let config = Config::load("/nonexistent/tricam.toml").unwrap();
        assert_eq!(config.feeds.len(), 3);
        assert_eq!(config.server.host, "0.0.0.0");
    }
}
