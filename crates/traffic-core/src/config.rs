//! Session configuration.
//!
//! `SessionSettings::default()` is the traffic-counting setup: native
//! audio model, one low-temperature voice, the `report_traffic` tool and
//! spoken-output transcription.

use crate::frame_sampler::FrameSamplerConfig;
use crate::logs::DEFAULT_LOG_CAPACITY;
use crate::tool_calls::report_traffic_declaration;
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use traffic_live_types::audio::{Voice, INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE};
use traffic_live_types::session::Modality;
use traffic_live_types::{Setup, SetupConfigurator};

pub const DEFAULT_MODEL: &str = "models/gemini-2.5-flash-native-audio-preview-09-2025";
pub const DEFAULT_TEMPERATURE: f32 = 0.2;
/// Pause between the stop and the re-start of a camera switch.
pub const TOGGLE_RESTART_DELAY: Duration = Duration::from_millis(500);
/// Volume meter cadence, about 30 Hz.
pub const VOLUME_INTERVAL: Duration = Duration::from_millis(33);

pub const DEFAULT_INSTRUCTIONS: &str = r#"You are a traffic monitoring assistant watching a live road camera.
A red guide line is drawn across every frame.
- Each time vehicles cross the guide line, call report_traffic with how many of each class crossed since your last report.
- Classes: two_wheeler (bicycles, motorcycles, scooters), three_wheeler (auto-rickshaws), four_wheeler (cars, vans, SUVs), heavy_vehicle (buses, trucks).
- Always include density: LOW, MEDIUM or HIGH for the whole scene. Report zero counts when only the density changed.
- Never count the same vehicle twice.
- Speak briefly and only when something notable happens."#;

/// Tokens that mean "the key was never filled in".
const PLACEHOLDER_KEYS: &[&str] = &[
    "your_api_key",
    "your-api-key",
    "your_api_key_here",
    "gemini_api_key",
    "placeholder",
    "changeme",
    "xxx",
];

/// True when `key` looks like a real credential.
pub fn credential_present(key: &SecretString) -> bool {
    let key = key.expose_secret().trim();
    if key.is_empty() || (key.starts_with('<') && key.ends_with('>')) {
        return false;
    }
    let lowered = key.to_ascii_lowercase();
    !PLACEHOLDER_KEYS.contains(&lowered.as_str())
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub credential: SecretString,
    pub model: String,
    pub voice: Voice,
    pub temperature: f32,
    pub instructions: String,
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    pub frame_sampler: FrameSamplerConfig,
    pub restart_delay: Duration,
    pub volume_interval: Duration,
    pub log_capacity: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            credential: SecretString::from(String::new()),
            model: DEFAULT_MODEL.to_string(),
            voice: Voice::Puck,
            temperature: DEFAULT_TEMPERATURE,
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
            input_sample_rate: INPUT_SAMPLE_RATE,
            output_sample_rate: OUTPUT_SAMPLE_RATE,
            frame_sampler: FrameSamplerConfig::default(),
            restart_delay: TOGGLE_RESTART_DELAY,
            volume_interval: VOLUME_INTERVAL,
            log_capacity: DEFAULT_LOG_CAPACITY,
        }
    }
}

impl SessionSettings {
    pub fn with_credential(mut self, credential: SecretString) -> Self {
        self.credential = credential;
        self
    }

    /// The `setup` frame that opens every session.
    pub fn setup(&self) -> Setup {
        SetupConfigurator::new(&self.model)
            .with_modalities(vec![Modality::Audio])
            .with_instructions(&self.instructions)
            .with_voice(self.voice.clone())
            .with_temperature(self.temperature)
            .with_function_declarations(vec![report_traffic_declaration()])
            .with_output_transcription_enable()
            .build()
    }
}
