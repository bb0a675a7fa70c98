use crate::audio::Voice;
use crate::content::{Content, Part};
use crate::tools::{FunctionDeclaration, Tool};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Modality {
    Text,
    Audio,
}

/// The first message of every session: model, generation parameters, tools
/// and system instruction.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    /// Fully qualified model name, ex: "models/gemini-2.0-flash-live-001"
    model: String,

    generation_config: GenerationConfig,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Tool>,

    /// Present (as an empty object) to receive transcripts of the model's speech.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    output_audio_transcription: Option<AudioTranscriptionConfig>,

    /// Present (as an empty object) to receive transcripts of the microphone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    input_audio_transcription: Option<AudioTranscriptionConfig>,
}

impl Setup {
    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn generation_config(&self) -> &GenerationConfig {
        &self.generation_config
    }

    pub fn system_instruction(&self) -> Option<&str> {
        self.system_instruction
            .as_ref()
            .and_then(|c| c.parts().first())
            .and_then(Part::as_text)
    }

    pub fn tools(&self) -> &[Tool] {
        &self.tools
    }

    pub fn function_declarations(&self) -> impl Iterator<Item = &FunctionDeclaration> {
        self.tools.iter().flat_map(|t| t.function_declarations())
    }
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AudioTranscriptionConfig {}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    response_modalities: Vec<Modality>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    speech_config: Option<SpeechConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

impl GenerationConfig {
    pub fn response_modalities(&self) -> &[Modality] {
        &self.response_modalities
    }

    pub fn voice(&self) -> Option<&Voice> {
        self.speech_config
            .as_ref()
            .map(|s| &s.voice_config.prebuilt_voice_config.voice_name)
    }

    pub fn temperature(&self) -> Option<f32> {
        self.temperature
    }

    pub fn top_p(&self) -> Option<f32> {
        self.top_p
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    voice_config: VoiceConfig,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct VoiceConfig {
    prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct PrebuiltVoiceConfig {
    voice_name: Voice,
}

impl SpeechConfig {
    pub fn new(voice: Voice) -> Self {
        Self {
            voice_config: VoiceConfig {
                prebuilt_voice_config: PrebuiltVoiceConfig { voice_name: voice },
            },
        }
    }
}

pub struct SetupConfigurator {
    setup: Setup,
}

impl SetupConfigurator {
    pub fn new(model: &str) -> Self {
        Self {
            setup: Setup {
                model: qualify_model(model),
                generation_config: GenerationConfig {
                    response_modalities: vec![Modality::Audio],
                    speech_config: None,
                    temperature: None,
                    top_p: None,
                    max_output_tokens: None,
                },
                system_instruction: None,
                tools: vec![],
                output_audio_transcription: None,
                input_audio_transcription: None,
            },
        }
    }

    pub fn with_modalities(mut self, modalities: Vec<Modality>) -> Self {
        self.setup.generation_config.response_modalities = modalities;
        self
    }

    pub fn with_instructions(mut self, instructions: &str) -> Self {
        self.setup.system_instruction = Some(Content::new(vec![Part::text(instructions)]));
        self
    }

    pub fn with_voice(mut self, voice: Voice) -> Self {
        self.setup.generation_config.speech_config = Some(SpeechConfig::new(voice));
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.setup.generation_config.temperature = Some(temperature);
        self
    }

    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.setup.generation_config.top_p = Some(top_p);
        self
    }

    pub fn with_max_output_tokens(mut self, max_output_tokens: u32) -> Self {
        self.setup.generation_config.max_output_tokens = Some(max_output_tokens);
        self
    }

    pub fn with_function_declarations(mut self, declarations: Vec<FunctionDeclaration>) -> Self {
        self.setup.tools = if declarations.is_empty() {
            vec![]
        } else {
            vec![Tool::new(declarations)]
        };
        self
    }

    pub fn with_output_transcription_enable(mut self) -> Self {
        self.setup.output_audio_transcription = Some(AudioTranscriptionConfig::default());
        self
    }

    pub fn with_input_transcription_enable(mut self) -> Self {
        self.setup.input_audio_transcription = Some(AudioTranscriptionConfig::default());
        self
    }

    pub fn build(self) -> Setup {
        self.setup
    }
}

/// The service rejects bare model ids; prefix them with `models/`.
fn qualify_model(model: &str) -> String {
    if model.starts_with("models/") || model.starts_with("projects/") {
        model.to_string()
    } else {
        format!("models/{}", model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn setup_serializes_to_live_api_shape() {
        let setup = SetupConfigurator::new("gemini-2.0-flash-live-001")
            .with_instructions("Count vehicles.")
            .with_voice(Voice::Zephyr)
            .with_temperature(0.1)
            .with_function_declarations(vec![FunctionDeclaration::new(
                "report_traffic",
                "Report vehicles",
                json!({"type": "OBJECT", "properties": {}}),
            )])
            .with_output_transcription_enable()
            .build();

        let value = serde_json::to_value(&setup).unwrap();
        assert_eq!(value["model"], "models/gemini-2.0-flash-live-001");
        assert_eq!(value["generationConfig"]["responseModalities"], json!(["AUDIO"]));
        assert_eq!(
            value["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]["voiceName"],
            "Zephyr"
        );
        assert_eq!(value["systemInstruction"]["parts"][0]["text"], "Count vehicles.");
        assert_eq!(value["tools"][0]["functionDeclarations"][0]["name"], "report_traffic");
        assert_eq!(value["outputAudioTranscription"], json!({}));
        assert!(value.get("inputAudioTranscription").is_none());
    }

    #[test]
    fn empty_declarations_omit_tools() {
        let setup = SetupConfigurator::new("models/x")
            .with_function_declarations(vec![])
            .build();
        let value = serde_json::to_value(&setup).unwrap();
        assert_eq!(value["model"], "models/x");
        assert!(value.get("tools").is_none());
        assert!(setup.system_instruction().is_none());
    }
}
