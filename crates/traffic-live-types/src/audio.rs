use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::str::FromStr;

/// Base64 text of raw bytes as carried in `Blob::data`.
pub type Base64EncodedBytes = String;

/// Sample rate the service expects for microphone PCM.
pub const INPUT_SAMPLE_RATE: u32 = 16_000;
/// Sample rate of synthesized PCM returned by the service.
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

pub const JPEG_MIME_TYPE: &str = "image/jpeg";

/// `audio/pcm;rate=<rate>`, the mime type for 16-bit little-endian mono PCM.
pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("audio/pcm;rate={}", sample_rate)
}

/// Returns true for any `audio/pcm` mime type, with or without a rate suffix.
pub fn is_pcm_mime_type(mime_type: &str) -> bool {
    mime_type
        .split(';')
        .next()
        .is_some_and(|base| base.trim().eq_ignore_ascii_case("audio/pcm"))
}

/// Prebuilt voices of the native-audio models.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Voice {
    Puck,
    Charon,
    Kore,
    Fenrir,
    Aoede,
    Leda,
    Orus,
    Zephyr,
    Custom(String),
}

impl Voice {
    pub fn as_str(&self) -> &str {
        match self {
            Voice::Puck => "Puck",
            Voice::Charon => "Charon",
            Voice::Kore => "Kore",
            Voice::Fenrir => "Fenrir",
            Voice::Aoede => "Aoede",
            Voice::Leda => "Leda",
            Voice::Orus => "Orus",
            Voice::Zephyr => "Zephyr",
            Voice::Custom(s) => s,
        }
    }
}

impl Serialize for Voice {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl FromStr for Voice {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "puck" => Voice::Puck,
            "charon" => Voice::Charon,
            "kore" => Voice::Kore,
            "fenrir" => Voice::Fenrir,
            "aoede" => Voice::Aoede,
            "leda" => Voice::Leda,
            "orus" => Voice::Orus,
            "zephyr" => Voice::Zephyr,
            _ => Voice::Custom(s.to_string()),
        })
    }
}

impl<'de> Deserialize<'de> for Voice {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Voice::from_str(&s).unwrap_or_else(|never| match never {}))
    }
}

impl std::fmt::Display for Voice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcm_mime_type_carries_rate() {
        assert_eq!(pcm_mime_type(16_000), "audio/pcm;rate=16000");
        assert!(is_pcm_mime_type("audio/pcm;rate=24000"));
        assert!(is_pcm_mime_type("audio/pcm"));
        assert!(!is_pcm_mime_type("image/jpeg"));
    }

    #[test]
    fn voice_parses_case_insensitively_and_keeps_unknown_names() {
        assert_eq!("zephyr".parse::<Voice>().unwrap(), Voice::Zephyr);
        assert_eq!("Kore".parse::<Voice>().unwrap(), Voice::Kore);
        assert_eq!(
            "Sadachbia".parse::<Voice>().unwrap(),
            Voice::Custom("Sadachbia".to_string())
        );
        assert_eq!(serde_json::to_string(&Voice::Puck).unwrap(), "\"Puck\"");
    }
}
