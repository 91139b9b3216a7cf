//! Configuration types for the live update loop.

use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use crate::error::ConfigError;
use crate::protocol::GenerationParams;
use crate::raster::ImageFormat;

/// Top-level loop configuration.
///
/// Loaded from JSON at runtime; every section falls back to its defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    /// Tick cadence in milliseconds
    pub tick_interval_ms: u64,

    /// Inference application endpoint (URL or application id)
    pub endpoint: String,

    /// Key that lets several clients share one realtime session
    pub connection_key: String,

    /// Rasterization settings
    pub raster: RasterConfig,

    /// Parameters sent with every request
    pub generation: GenerationParams,

    /// How region labels become prompts
    pub prompt: PromptConfig,

    /// Connection behavior
    pub connection: ConnectionConfig,
}

/// Rasterization settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RasterConfig {
    /// Pixel width every region is scaled to
    pub target_size: u32,

    /// Output container format
    pub format: ImageFormat,

    /// Encoder quality for lossy formats (1-100)
    pub jpeg_quality: u8,
}

/// Prompt construction from a region label.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    /// Appended to non-empty labels
    pub suffix: String,

    /// Used verbatim when the label is empty
    pub fallback: String,
}

impl PromptConfig {
    /// Turn a region label into the generation prompt.
    pub fn render(&self, label: &str) -> String {
        let label = label.trim();
        if label.is_empty() {
            self.fallback.clone()
        } else {
            format!("{}{}", label, self.suffix)
        }
    }
}

/// Connection manager settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Transmission attempts per request when the link drops before sending
    pub max_send_attempts: u32,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 64,
            endpoint: "fal-ai/sd-turbo-real-time-high-fps-msgpack".to_string(),
            connection_key: "draw-faster".to_string(),
            raster: RasterConfig::default(),
            generation: GenerationParams::default(),
            prompt: PromptConfig::default(),
            connection: ConnectionConfig::default(),
        }
    }
}

impl Default for RasterConfig {
    fn default() -> Self {
        Self {
            target_size: 512,
            format: ImageFormat::Jpeg,
            jpeg_quality: 100,
        }
    }
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            suffix: " hd award-winning impressive".to_string(),
            fallback: "A random image that is safe for work and not surprising, something boring \
                       like a city or shoe watercolor"
                .to_string(),
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_send_attempts: 2,
        }
    }
}

impl LiveConfig {
    /// Load a config from a JSON file and validate it.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: LiveConfig = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the loop cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::ZeroTickInterval);
        }
        if self.raster.target_size == 0 {
            return Err(ConfigError::ZeroTargetSize);
        }
        if !(0.0..=1.0).contains(&self.generation.strength) {
            return Err(ConfigError::StrengthOutOfRange(self.generation.strength));
        }
        if self.generation.num_inference_steps == 0 {
            return Err(ConfigError::ZeroSteps);
        }
        if self.connection.max_send_attempts == 0 {
            return Err(ConfigError::ZeroSendAttempts);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = LiveConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.tick_interval_ms, 64);
        assert_eq!(config.raster.target_size, 512);
    }

    #[test]
    fn test_partial_json_falls_back_to_defaults() {
        let config: LiveConfig =
            serde_json::from_str(r#"{"tick_interval_ms": 100, "generation": {"seed": null}}"#)
                .unwrap();
        assert_eq!(config.tick_interval_ms, 100);
        assert_eq!(config.generation.seed, None);
        assert_eq!(config.generation.num_inference_steps, 3);
        assert_eq!(config.connection.max_send_attempts, 2);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = LiveConfig::default();
        config.tick_interval_ms = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroTickInterval));

        let mut config = LiveConfig::default();
        config.generation.strength = 1.5;
        assert_eq!(config.validate(), Err(ConfigError::StrengthOutOfRange(1.5)));

        let mut config = LiveConfig::default();
        config.connection.max_send_attempts = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroSendAttempts));
    }

    #[test]
    fn test_prompt_rendering() {
        let prompt = PromptConfig::default();
        assert_eq!(prompt.render("a castle"), "a castle hd award-winning impressive");
        assert_eq!(prompt.render("   "), prompt.fallback);
        assert_eq!(prompt.render(""), prompt.fallback);
    }

    #[test]
    fn test_from_file_reports_path() {
        let err = LiveConfig::from_file(Path::new("/nonexistent/live.json")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/live.json"));
    }
}
