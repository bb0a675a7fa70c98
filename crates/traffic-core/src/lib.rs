//! Live traffic monitoring over a realtime multimodal session.
//!
//! The [`session::SessionManager`] actor owns the camera, microphone and
//! speaker, streams sampled frames and PCM to the model, and turns the
//! model's `report_traffic` calls into the running [`stats::TrafficStats`].

pub mod config;
pub mod error;
pub mod frame_sampler;
pub mod logs;
pub mod media;
pub mod meter;
pub mod playback;
pub mod realtime_api;
pub mod session;
pub mod stats;
pub mod stream_state;
pub mod tool_calls;

#[cfg(test)]
mod testing;

pub use config::SessionSettings;
pub use error::SessionError;
pub use frame_sampler::{EncodedFrame, FrameSampler, FrameSamplerConfig, GuideOverlay};
pub use logs::{LogBook, LogCategory, LogEntry};
pub use media::{AudioCapture, AudioOutput, FacingMode, MediaDevices, MediaError, MediaStream, VideoSource};
pub use playback::PlaybackScheduler;
pub use realtime_api::{RealtimeConnector, RealtimeSession, RemoteEvent, RemoteSession};
pub use session::{Dashboard, SessionHandle, SessionManager};
pub use stats::{Density, TrafficStats, VehicleClass, VehicleCounts};
pub use stream_state::{StreamState, StreamStateMachine};
pub use tool_calls::ToolCallInterpreter;
