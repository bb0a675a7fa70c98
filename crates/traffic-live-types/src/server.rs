use crate::audio::is_pcm_mime_type;
use crate::content::{Blob, Content};

/// A server frame. Every section is optional; a single frame may carry
/// several (ex: model audio plus `turnComplete`).
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setup_complete: Option<SetupComplete>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_content: Option<ServerContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_cancellation: Option<ToolCallCancellation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub go_away: Option<GoAway>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_metadata: Option<UsageMetadata>,
}

impl ServerMessage {
    pub fn is_setup_complete(&self) -> bool {
        self.setup_complete.is_some()
    }

    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        if self.setup_complete.is_some() {
            "setup_complete"
        } else if self.tool_call.is_some() {
            "tool_call"
        } else if self.tool_call_cancellation.is_some() {
            "tool_call_cancellation"
        } else if self.server_content.is_some() {
            "server_content"
        } else if self.go_away.is_some() {
            "go_away"
        } else if self.usage_metadata.is_some() {
            "usage_metadata"
        } else {
            "unknown"
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SetupComplete {}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_turn: Option<Content>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_complete: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interrupted: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_complete: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_transcription: Option<Transcription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_transcription: Option<Transcription>,
}

impl ServerContent {
    pub fn is_turn_complete(&self) -> bool {
        self.turn_complete.unwrap_or(false)
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.unwrap_or(false)
    }

    /// Inline PCM payloads of the model turn, in part order.
    pub fn audio_blobs(&self) -> impl Iterator<Item = &Blob> {
        self.model_turn
            .iter()
            .flat_map(|turn| turn.parts())
            .filter_map(|part| part.inline_data())
            .filter(|blob| is_pcm_mime_type(blob.mime_type()))
    }

    /// Visible text parts of the model turn (reasoning parts excluded).
    pub fn text_parts(&self) -> impl Iterator<Item = &str> {
        self.model_turn
            .iter()
            .flat_map(|turn| turn.parts())
            .filter(|part| !part.is_thought())
            .filter_map(|part| part.as_text())
    }
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Transcription {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    #[serde(default)]
    pub function_calls: Vec<FunctionCall>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FunctionCall {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<serde_json::Value>,
}

impl FunctionCall {
    pub fn new(id: &str, name: &str, args: serde_json::Value) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            args: Some(args),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ToolCallCancellation {
    #[serde(default)]
    pub ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoAway {
    #[serde(default)]
    pub time_left: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetadata {
    #[serde(default)]
    pub prompt_token_count: Option<u32>,
    #[serde(default)]
    pub response_token_count: Option<u32>,
    #[serde(default)]
    pub total_token_count: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_setup_complete() {
        let msg: ServerMessage = serde_json::from_str(r#"{"setupComplete": {}}"#).unwrap();
        assert!(msg.is_setup_complete());
        assert_eq!(msg.kind(), "setup_complete");
    }

    #[test]
    fn parses_tool_call_batch_in_order() {
        let msg: ServerMessage = serde_json::from_value(json!({
            "toolCall": {"functionCalls": [
                {"id": "a", "name": "report_traffic", "args": {"two_wheeler": 2}},
                {"id": "b", "name": "report_traffic"}
            ]}
        }))
        .unwrap();
        let calls = msg.tool_call.unwrap().function_calls;
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "a");
        assert_eq!(calls[0].args.as_ref().unwrap()["two_wheeler"], 2);
        assert_eq!(calls[1].id, "b");
        assert!(calls[1].args.is_none());
    }

    #[test]
    fn server_content_exposes_audio_and_text() {
        let msg: ServerMessage = serde_json::from_value(json!({
            "serverContent": {
                "modelTurn": {"parts": [
                    {"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "AAAA"}},
                    {"text": "thinking", "thought": true},
                    {"text": "Two bikes"},
                    {"inlineData": {"mimeType": "image/png", "data": "xx"}}
                ]},
                "outputTranscription": {"text": "two bikes passed"},
                "turnComplete": true
            }
        }))
        .unwrap();
        let content = msg.server_content.unwrap();
        assert!(content.is_turn_complete());
        assert!(!content.is_interrupted());
        assert_eq!(content.audio_blobs().map(|b| b.data()).collect::<Vec<_>>(), vec!["AAAA"]);
        assert_eq!(content.text_parts().collect::<Vec<_>>(), vec!["Two bikes"]);
        assert_eq!(content.output_transcription.unwrap().text, "two bikes passed");
    }

    #[test]
    fn unknown_sections_are_ignored() {
        let msg: ServerMessage =
            serde_json::from_str(r#"{"sessionResumptionUpdate": {"newHandle": "h"}}"#).unwrap();
        assert_eq!(msg.kind(), "unknown");
    }
}
