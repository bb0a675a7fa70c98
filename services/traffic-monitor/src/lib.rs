pub mod config;
pub mod dashboard;
pub mod file_media;
pub mod gemini_adapter;
#[cfg(feature = "native-audio")]
pub mod native_audio;
pub mod prompt_loader;
