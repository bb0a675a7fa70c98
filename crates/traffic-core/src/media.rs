//! Device seams: capture, playback output and the video source.
//!
//! The session actor only talks to these traits. The service binary
//! provides file and cpal backed implementations; tests use fakes.

use async_trait::async_trait;
use image::RgbImage;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use traffic_native_utils::AudioBuffer;

#[cfg(test)]
use mockall::automock;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    User,
    #[default]
    Environment,
}

impl FacingMode {
    pub fn toggled(self) -> Self {
        match self {
            FacingMode::User => FacingMode::Environment,
            FacingMode::Environment => FacingMode::User,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FacingMode::User => "user",
            FacingMode::Environment => "environment",
        }
    }
}

impl fmt::Display for FacingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MediaConstraints {
    pub facing_mode: FacingMode,
    /// Rate the microphone callback must deliver.
    pub audio_sample_rate: u32,
    pub audio_channels: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MediaError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("device not found: {0}")]
    NotFound(String),
    #[error("device in use: {0}")]
    InUse(String),
    #[error("device error: {0}")]
    Device(String),
}

/// Receives each captured block of mono samples.
pub type AudioCallback = Box<dyn FnMut(&[f32]) + Send>;

pub trait AudioCapture: Send + Sync {
    fn sample_rate(&self) -> u32;

    /// Begins delivering blocks to `callback` until [`AudioCapture::stop`].
    fn start(&self, callback: AudioCallback) -> Result<(), MediaError>;

    /// Releases the device and drops the callback. Idempotent.
    fn stop(&self);
}

#[cfg_attr(test, automock)]
pub trait VideoSource: Send + Sync {
    /// False until the source has produced its first frame.
    fn is_ready(&self) -> bool;

    fn grab_frame(&self) -> Option<RgbImage>;

    fn stop(&self);
}

/// The tracks granted by one acquisition. Tracks are stopped on drop.
pub struct MediaStream {
    pub audio: Box<dyn AudioCapture>,
    pub video: Arc<dyn VideoSource>,
}

impl MediaStream {
    pub fn new(audio: Box<dyn AudioCapture>, video: Arc<dyn VideoSource>) -> Self {
        Self { audio, video }
    }

    pub fn stop_tracks(&self) {
        self.audio.stop();
        self.video.stop();
    }
}

impl Drop for MediaStream {
    fn drop(&mut self) {
        self.stop_tracks();
    }
}

impl fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaStream")
            .field("sample_rate", &self.audio.sample_rate())
            .finish_non_exhaustive()
    }
}

/// A playback clock with scheduled buffers, like an output audio context.
#[cfg_attr(test, automock)]
pub trait AudioOutput: Send + Sync {
    /// Time elapsed on the output clock.
    fn current_time(&self) -> Duration;

    fn schedule(&self, buffer: Arc<AudioBuffer>, start_at: Duration) -> Result<(), MediaError>;

    /// Drops everything scheduled but not yet played.
    fn cancel_scheduled(&self);

    /// Idempotent.
    fn close(&self);

    fn is_closed(&self) -> bool;
}

#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn acquire(&self, constraints: &MediaConstraints) -> Result<MediaStream, MediaError>;

    async fn open_output(&self, sample_rate: u32) -> Result<Arc<dyn AudioOutput>, MediaError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingCapture(Arc<AtomicUsize>);

    impl AudioCapture for CountingCapture {
        fn sample_rate(&self) -> u32 {
            16_000
        }

        fn start(&self, _callback: AudioCallback) -> Result<(), MediaError> {
            Ok(())
        }

        fn stop(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn facing_mode_toggles() {
        assert_eq!(FacingMode::default(), FacingMode::Environment);
        assert_eq!(FacingMode::Environment.toggled(), FacingMode::User);
        assert_eq!(FacingMode::User.toggled().toggled(), FacingMode::User);
    }

    #[test]
    fn dropping_a_stream_stops_its_tracks() {
        let stops = Arc::new(AtomicUsize::new(0));
        let mut video = MockVideoSource::new();
        video.expect_stop().times(1).return_const(());
        let stream = MediaStream::new(Box::new(CountingCapture(stops.clone())), Arc::new(video));
        drop(stream);
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }
}
