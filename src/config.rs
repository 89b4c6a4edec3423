//! # Configuration Management
//!
//! Settings come from several layers, highest priority first:
//! 1. `HOST` / `PORT` environment variables (deployment platforms set these)
//! 2. `APP_`-prefixed environment variables, `__` between levels
//!    (e.g. `APP_SPECTROGRAM__MAX_FFT_LENGTH=8192`)
//! 3. `config.toml` in the working directory, if present
//! 4. Built-in defaults (the `Default` impls below)
//!
//! ## Rust Concepts Used:
//! - **`#[serde(default)]`**: every section can be omitted or partially given
//! - **Builder pattern**: `config::Config::builder()` stacks the sources
//! - **Deep merge**: runtime updates are merged into the current values as
//!   JSON and then deserialized again, so partial updates stay type checked

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::env;
use std::path::PathBuf;

use crate::spectrogram::{
    DEFAULT_FFT_LENGTH, DEFAULT_MAX_FFT_LENGTH, DEFAULT_MAX_RESULT_BYTES, DEFAULT_OVERLAP_FRACTION,
    DEFAULT_PROGRESS_INTERVAL,
};

/// Main application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub spectrogram: SpectrogramConfig,
    pub audio: AudioConfig,
    pub performance: PerformanceConfig,
}

/// Where the HTTP/WebSocket server listens.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: localhost only (development)
/// - `host = "0.0.0.0"`: every interface (containers, production)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8888,
        }
    }
}

/// Analysis defaults and limits.
///
/// ## Fields:
/// - `default_fft_length`: block length when a request gives none
/// - `default_overlap_fraction`: block shift as a fraction of the block length
/// - `max_fft_length`: largest block length a client may ask for
/// - `progress_interval`: blocks between two `loading_progress` messages
/// - `max_result_bytes`: largest magnitude matrix one request may produce;
///   requests over it are answered with `invalid_parameters`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectrogramConfig {
    pub default_fft_length: usize,
    pub default_overlap_fraction: f64,
    pub max_fft_length: usize,
    pub progress_interval: usize,
    pub max_result_bytes: usize,
}

impl Default for SpectrogramConfig {
    fn default() -> Self {
        Self {
            default_fft_length: DEFAULT_FFT_LENGTH,
            default_overlap_fraction: DEFAULT_OVERLAP_FRACTION,
            max_fft_length: DEFAULT_MAX_FFT_LENGTH,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            max_result_bytes: DEFAULT_MAX_RESULT_BYTES,
        }
    }
}

/// Audio file access.
///
/// An empty `media_root` lets file requests name any path the server can read.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub media_root: String,
}

/// Capacity limits.
///
/// ## Fields:
/// - `max_concurrent_sessions`: WebSocket upgrades beyond this get HTTP 503
/// - `max_frame_bytes`: largest WebSocket message accepted (uploaded audio
///   files travel as one binary message)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    pub max_concurrent_sessions: usize,
    pub max_frame_bytes: usize,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            max_concurrent_sessions: 16,
            max_frame_bytes: 64 * 1024 * 1024,
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, `config.toml` and the environment.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=9000`
    /// - `APP_AUDIO__MEDIA_ROOT=/srv/recordings`
    /// - `APP_PERFORMANCE__MAX_CONCURRENT_SESSIONS=64`
    /// - `HOST=0.0.0.0`, `PORT=3000`
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Reject values the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        let spectrogram = &self.spectrogram;
        if spectrogram.max_fft_length < 2 {
            return Err(anyhow::anyhow!("max_fft_length must be at least 2"));
        }
        if spectrogram.default_fft_length < 2
            || spectrogram.default_fft_length > spectrogram.max_fft_length
        {
            return Err(anyhow::anyhow!(
                "default_fft_length must be between 2 and max_fft_length ({}), got {}",
                spectrogram.max_fft_length,
                spectrogram.default_fft_length
            ));
        }
        if !(0.0..1.0).contains(&spectrogram.default_overlap_fraction) {
            return Err(anyhow::anyhow!(
                "default_overlap_fraction must be in [0, 1), got {}",
                spectrogram.default_overlap_fraction
            ));
        }
        if spectrogram.progress_interval == 0 {
            return Err(anyhow::anyhow!("progress_interval must be greater than 0"));
        }
        if spectrogram.max_result_bytes == 0 {
            return Err(anyhow::anyhow!("max_result_bytes must be greater than 0"));
        }

        if self.performance.max_concurrent_sessions == 0 {
            return Err(anyhow::anyhow!("Max concurrent sessions must be greater than 0"));
        }
        if self.performance.max_frame_bytes == 0 {
            return Err(anyhow::anyhow!("max_frame_bytes must be greater than 0"));
        }

        Ok(())
    }

    /// Apply a partial update given as JSON, e.g. `{"server": {"port": 9000}}`.
    ///
    /// The update is merged into the current values and the result must still
    /// validate; on any error `self` is left untouched.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let patch: Value = serde_json::from_str(json_str)?;
        if !patch.is_object() {
            return Err(anyhow::anyhow!("Configuration update must be a JSON object"));
        }

        let mut merged = serde_json::to_value(&*self)?;
        merge_json(&mut merged, patch);

        let updated: AppConfig = serde_json::from_value(merged)?;
        updated.validate()?;
        *self = updated;
        Ok(())
    }

    /// The media root as a path, or `None` when unrestricted.
    pub fn media_root(&self) -> Option<PathBuf> {
        let root = self.audio.media_root.trim();
        if root.is_empty() {
            None
        } else {
            Some(PathBuf::from(root))
        }
    }
}

/// Recursively overlay `patch` onto `base`; objects merge, everything else replaces.
fn merge_json(base: &mut Value, patch: Value) {
    match (base, patch) {
        (Value::Object(base), Value::Object(patch)) => {
            for (key, value) in patch {
                match base.get_mut(&key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, patch) => *base = patch,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8888);
        assert_eq!(config.spectrogram.default_fft_length, 1024);
        assert_eq!(config.spectrogram.max_fft_length, 65536);
        assert_eq!(config.spectrogram.max_result_bytes, 64 * 1024 * 1024);
        assert_eq!(config.media_root(), None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.spectrogram.default_overlap_fraction = 1.0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.spectrogram.default_fft_length = 1;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.spectrogram.progress_interval = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.spectrogram.max_result_bytes = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_update() {
        let mut config = AppConfig::default();
        let json = r#"{"server": {"port": 9090}, "spectrogram": {"default_fft_length": 2048}}"#;
        assert!(config.update_from_json(json).is_ok());
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.spectrogram.default_fft_length, 2048);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.spectrogram.default_overlap_fraction, 0.5);
    }

    #[test]
    fn test_invalid_update_leaves_config_untouched() {
        let mut config = AppConfig::default();
        assert!(config
            .update_from_json(r#"{"performance": {"max_concurrent_sessions": 0}}"#)
            .is_err());
        assert!(config.update_from_json(r#"{"server": {"port": "high"}}"#).is_err());
        assert!(config.update_from_json("[1, 2]").is_err());
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [audio]
            media_root = "/srv/recordings"

            [spectrogram]
            progress_interval = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.media_root(), Some(PathBuf::from("/srv/recordings")));
        assert_eq!(config.spectrogram.progress_interval, 5);
        assert_eq!(config.spectrogram.default_fft_length, 1024);
        assert_eq!(config.server.port, 8888);
        assert!(config.validate().is_ok());
    }
}
