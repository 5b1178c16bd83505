//! Driver configuration using Figment
//!
//! Layers, later ones winning:
//! 1. Built-in defaults
//! 2. An optional TOML file
//! 3. Environment variables prefixed with `KSCAM_`
//!    (e.g. `KSCAM_IMAGE_BUFFER_COUNT=8`)
//!
//! ```toml
//! camera_name = "DS-Ri2 Simulator"
//! image_buffer_count = 5
//! stop_on_overflow = false
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::components::acquisition::AcquisitionSettings;
use crate::sdk::{IMAGE_BUFFER_NUM_DEFAULT, IMAGE_BUFFER_NUM_MAX, IMAGE_BUFFER_NUM_MIN};

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "KSCAM_";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Error types for config loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    /// File not found
    #[error("Config file not found: {0}")]
    NotFound(String),

    /// Invalid TOML or a field of the wrong type
    #[error("Failed to parse config: {0}")]
    Parse(String),

    /// A field is outside its accepted range
    #[error("Config validation failed: {0}")]
    Validation(String),
}

/// KsCam driver settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KsCamConfig {
    /// Camera to open; the first enumerated device when absent
    pub camera_name: Option<String>,
    /// Hardware buffers requested on start-transfer (1..=128)
    pub image_buffer_count: u32,
    /// Added to the exposure time when waiting for a snapshot frame
    pub snap_timeout_margin_ms: u64,
    /// Added to the exposure time when waiting for a sequence frame
    pub stream_timeout_margin_ms: u64,
    /// Abort a sequence when the sink overflows instead of clearing it
    pub stop_on_overflow: bool,
    /// Capacity of the in-memory sink used by the command-line front end
    pub sink_capacity: usize,
    /// Source label written into frame metadata
    pub camera_label: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for KsCamConfig {
    fn default() -> Self {
        Self {
            camera_name: None,
            image_buffer_count: IMAGE_BUFFER_NUM_DEFAULT,
            snap_timeout_margin_ms: 100,
            stream_timeout_margin_ms: 300,
            stop_on_overflow: false,
            sink_capacity: 16,
            camera_label: "KsCam".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl KsCamConfig {
    /// Defaults overridden by the environment.
    pub fn load() -> Result<Self, ConfigLoadError> {
        Self::extract(Self::base())
    }

    /// Defaults overridden by `path`, then by the environment.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigLoadError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigLoadError::NotFound(path.display().to_string()));
        }
        tracing::debug!(path = %path.display(), "loading config");
        Self::extract(
            Figment::from(Serialized::defaults(KsCamConfig::default()))
                .merge(Toml::file(path))
                .merge(Env::prefixed(ENV_PREFIX)),
        )
    }

    fn base() -> Figment {
        Figment::from(Serialized::defaults(KsCamConfig::default()))
            .merge(Env::prefixed(ENV_PREFIX))
    }

    fn extract(figment: Figment) -> Result<Self, ConfigLoadError> {
        let config: KsCamConfig = figment
            .extract()
            .map_err(|e| ConfigLoadError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check ranges and the log level.
    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        if !(IMAGE_BUFFER_NUM_MIN..=IMAGE_BUFFER_NUM_MAX).contains(&self.image_buffer_count) {
            return Err(ConfigLoadError::Validation(format!(
                "image_buffer_count {} out of range {}..={}",
                self.image_buffer_count, IMAGE_BUFFER_NUM_MIN, IMAGE_BUFFER_NUM_MAX
            )));
        }
        if self.sink_capacity == 0 {
            return Err(ConfigLoadError::Validation(
                "sink_capacity must be at least 1".into(),
            ));
        }
        if !LOG_LEVELS.contains(&self.log_level.to_ascii_lowercase().as_str()) {
            return Err(ConfigLoadError::Validation(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.log_level,
                LOG_LEVELS.join(", ")
            )));
        }
        Ok(())
    }

    /// Controller tunables derived from this config.
    pub fn acquisition_settings(&self) -> AcquisitionSettings {
        AcquisitionSettings {
            image_buffer_count: self.image_buffer_count,
            snap_timeout_margin: Duration::from_millis(self.snap_timeout_margin_ms),
            stream_timeout_margin: Duration::from_millis(self.stream_timeout_margin_ms),
            camera_label: self.camera_label.clone(),
        }
    }
}
