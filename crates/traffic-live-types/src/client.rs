use crate::audio::{pcm_mime_type, Base64EncodedBytes, JPEG_MIME_TYPE};
use crate::content::{Blob, Content, Part};
use crate::session::Setup;

/// A client frame. Serde's external tagging produces exactly the
/// single-key objects the service expects, ex: `{"realtimeInput": {...}}`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(Setup),
    RealtimeInput(RealtimeInput),
    ToolResponse(ToolResponse),
    ClientContent(ClientContent),
}

impl ClientMessage {
    /// Microphone PCM (16-bit little-endian, base64) at `sample_rate`.
    pub fn audio(data: Base64EncodedBytes, sample_rate: u32) -> Self {
        ClientMessage::RealtimeInput(RealtimeInput {
            audio: Some(Blob::new(&pcm_mime_type(sample_rate), data)),
            ..RealtimeInput::default()
        })
    }

    /// A JPEG still, base64 encoded.
    pub fn video(data: Base64EncodedBytes) -> Self {
        ClientMessage::RealtimeInput(RealtimeInput {
            video: Some(Blob::new(JPEG_MIME_TYPE, data)),
            ..RealtimeInput::default()
        })
    }

    pub fn tool_response(function_responses: Vec<FunctionResponse>) -> Self {
        ClientMessage::ToolResponse(ToolResponse { function_responses })
    }

    /// A complete user text turn.
    pub fn text(text: &str) -> Self {
        ClientMessage::ClientContent(ClientContent {
            turns: vec![Content::new(vec![Part::text(text)]).with_role("user")],
            turn_complete: true,
        })
    }

    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Setup(_) => "setup",
            ClientMessage::RealtimeInput(input) if input.audio.is_some() => "realtime_input.audio",
            ClientMessage::RealtimeInput(input) if input.video.is_some() => "realtime_input.video",
            ClientMessage::RealtimeInput(_) => "realtime_input",
            ClientMessage::ToolResponse(_) => "tool_response",
            ClientMessage::ClientContent(_) => "client_content",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    audio: Option<Blob>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    video: Option<Blob>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

impl RealtimeInput {
    pub fn audio(&self) -> Option<&Blob> {
        self.audio.as_ref()
    }

    pub fn video(&self) -> Option<&Blob> {
        self.video.as_ref()
    }

    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    function_responses: Vec<FunctionResponse>,
}

impl ToolResponse {
    pub fn function_responses(&self) -> &[FunctionResponse] {
        &self.function_responses
    }
}

/// Acknowledges one `FunctionCall`, echoing its id and name.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FunctionResponse {
    id: String,
    name: String,
    response: serde_json::Value,
}

impl FunctionResponse {
    pub fn new(id: &str, name: &str, response: serde_json::Value) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            response,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn response(&self) -> &serde_json::Value {
        &self.response
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientContent {
    turns: Vec<Content>,
    turn_complete: bool,
}

impl ClientContent {
    pub fn turns(&self) -> &[Content] {
        &self.turns
    }

    pub fn turn_complete(&self) -> bool {
        self.turn_complete
    }
}
