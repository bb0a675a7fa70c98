//! Application Configuration Module
//!
//! Loads the service settings from the environment (and a `.env` file when
//! present) so they can be handed to the session manager in one piece.

use secrecy::SecretString;
use std::env;
use tracing::Level;
use traffic_core::config::DEFAULT_MODEL;
use traffic_live_types::audio::Voice;

// --- Application Constants ---

/// Frames per block delivered by file and device microphones.
pub const INPUT_CHUNK_SIZE: usize = 1024;
/// Frames per callback requested from the output device.
pub const OUTPUT_CHUNK_SIZE: usize = 1024;
/// Capacity of the output ring buffer in milliseconds.
pub const OUTPUT_LATENCY_MS: usize = 30_000;
/// Accepted range for `--fps`.
pub const MIN_FPS: f32 = 0.02;
pub const MAX_FPS: f32 = 30.0;

/// Holds all configuration loaded from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub gemini_api_key: SecretString,
    pub model: String,
    pub voice: Voice,
    pub log_level: Level,
}

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid log level provided for RUST_LOG: {0}")]
    InvalidLogLevel(String),
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    // *   `GEMINI_API_KEY`: Your secret key for the Gemini API. Required.
    // *   `GEMINI_MODEL`: (Optional) Live model name. Defaults to the native audio model.
    // *   `GEMINI_VOICE`: (Optional) Prebuilt voice. Defaults to "Puck".
    // *   `RUST_LOG`: (Optional) The logging level. Defaults to "INFO".
    pub fn from_env() -> Result<Self, ConfigError> {
        // Ignored if not present.
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let gemini_api_key = lookup("GEMINI_API_KEY")
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingVar("GEMINI_API_KEY".to_string()))?;

        let model = lookup("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let voice = lookup("GEMINI_VOICE")
            .and_then(|v| v.parse::<Voice>().ok())
            .unwrap_or(Voice::Puck);

        let log_level_str = lookup("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str
            .parse::<Level>()
            .map_err(|_| ConfigError::InvalidLogLevel(log_level_str))?;

        Ok(Self {
            gemini_api_key: SecretString::from(gemini_api_key),
            model,
            voice,
            log_level,
        })
    }
}
