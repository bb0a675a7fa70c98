//! In-memory collaborators for unit tests.

use crate::media::{
    AudioCallback, AudioCapture, AudioOutput, MediaConstraints, MediaDevices, MediaError,
    MediaStream, VideoSource,
};
use crate::realtime_api::{RealtimeConnector, RealtimeSession, RemoteEvent, RemoteSession};
use async_trait::async_trait;
use image::{Rgb, RgbImage};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use traffic_live_types::{ClientMessage, Setup};
use traffic_native_utils::AudioBuffer;

/// Output whose clock only moves when the test says so.
#[derive(Default)]
pub struct FakeOutput {
    time: Mutex<Duration>,
    scheduled: Mutex<Vec<Duration>>,
    cancellations: AtomicUsize,
    closed: AtomicBool,
}

impl FakeOutput {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_time(&self, time: Duration) {
        *self.time.lock().unwrap() = time;
    }

    pub fn scheduled_starts(&self) -> Vec<Duration> {
        self.scheduled.lock().unwrap().clone()
    }

    pub fn cancellations(&self) -> usize {
        self.cancellations.load(Ordering::SeqCst)
    }
}

impl AudioOutput for FakeOutput {
    fn current_time(&self) -> Duration {
        *self.time.lock().unwrap()
    }

    fn schedule(&self, _buffer: Arc<AudioBuffer>, start_at: Duration) -> Result<(), MediaError> {
        self.scheduled.lock().unwrap().push(start_at);
        Ok(())
    }

    fn cancel_scheduled(&self) {
        self.cancellations.fetch_add(1, Ordering::SeqCst);
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Session that records what was sent.
#[derive(Clone, Default)]
pub struct RecordingSession {
    sent: Arc<Mutex<Vec<ClientMessage>>>,
    closed: Arc<AtomicBool>,
    fail: Arc<AtomicBool>,
}

impl RecordingSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<ClientMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_kinds(&self) -> Vec<&'static str> {
        self.sent.lock().unwrap().iter().map(|m| m.kind()).collect()
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RealtimeSession for RecordingSession {
    async fn send(&self, message: ClientMessage) -> anyhow::Result<()> {
        if self.fail.load(Ordering::SeqCst) || self.is_closed() {
            anyhow::bail!("session unavailable");
        }
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct CaptureState {
    callback: Mutex<Option<AudioCallback>>,
    stopped: AtomicBool,
}

struct FakeCapture {
    state: Arc<CaptureState>,
    live: Arc<AtomicUsize>,
}

impl AudioCapture for FakeCapture {
    fn sample_rate(&self) -> u32 {
        16_000
    }

    fn start(&self, callback: AudioCallback) -> Result<(), MediaError> {
        *self.state.callback.lock().unwrap() = Some(callback);
        Ok(())
    }

    fn stop(&self) {
        if !self.state.stopped.swap(true, Ordering::SeqCst) {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
        self.state.callback.lock().unwrap().take();
    }
}

struct FakeVideo;

impl VideoSource for FakeVideo {
    fn is_ready(&self) -> bool {
        true
    }

    fn grab_frame(&self) -> Option<RgbImage> {
        Some(RgbImage::from_pixel(64, 48, Rgb([90, 90, 90])))
    }

    fn stop(&self) {}
}

/// Devices that count live capture streams.
#[derive(Default)]
pub struct FakeDevices {
    live: Arc<AtomicUsize>,
    acquisitions: AtomicUsize,
    captures: Mutex<Vec<Arc<CaptureState>>>,
    outputs: Mutex<Vec<Arc<FakeOutput>>>,
    constraints: Mutex<Vec<MediaConstraints>>,
    fail_with: Option<MediaError>,
    delay: Duration,
}

impl FakeDevices {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing(error: MediaError) -> Arc<Self> {
        Arc::new(Self {
            fail_with: Some(error),
            ..Self::default()
        })
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Self::default()
        })
    }

    /// Capture streams acquired and not yet stopped.
    pub fn live_tracks(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }

    pub fn last_constraints(&self) -> Option<MediaConstraints> {
        self.constraints.lock().unwrap().last().cloned()
    }

    pub fn last_output(&self) -> Option<Arc<FakeOutput>> {
        self.outputs.lock().unwrap().last().cloned()
    }

    /// Feeds a block to the most recent microphone, if it is running.
    pub fn emit_audio(&self, samples: &[f32]) {
        let state = self.captures.lock().unwrap().last().cloned();
        if let Some(state) = state {
            if let Some(callback) = state.callback.lock().unwrap().as_mut() {
                callback(samples);
            }
        }
    }
}

#[async_trait]
impl MediaDevices for FakeDevices {
    async fn acquire(&self, constraints: &MediaConstraints) -> Result<MediaStream, MediaError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.constraints.lock().unwrap().push(constraints.clone());
        if let Some(error) = &self.fail_with {
            return Err(error.clone());
        }
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        self.live.fetch_add(1, Ordering::SeqCst);
        let state = Arc::new(CaptureState::default());
        self.captures.lock().unwrap().push(state.clone());
        let capture = FakeCapture {
            state,
            live: self.live.clone(),
        };
        Ok(MediaStream::new(Box::new(capture), Arc::new(FakeVideo)))
    }

    async fn open_output(&self, _sample_rate: u32) -> Result<Arc<dyn AudioOutput>, MediaError> {
        let output = FakeOutput::new();
        self.outputs.lock().unwrap().push(output.clone());
        Ok(output)
    }
}

/// The test's side of a connected session.
pub struct OpenedSession {
    pub events: mpsc::Sender<RemoteEvent>,
    pub session: RecordingSession,
    pub setup: Setup,
}

pub struct FakeConnector {
    opened: mpsc::UnboundedSender<OpenedSession>,
    fail_with: Option<String>,
}

impl FakeConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<OpenedSession>) {
        let (opened, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                opened,
                fail_with: None,
            }),
            rx,
        )
    }

    pub fn failing(message: &str) -> (Arc<Self>, mpsc::UnboundedReceiver<OpenedSession>) {
        let (opened, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                opened,
                fail_with: Some(message.to_string()),
            }),
            rx,
        )
    }
}

#[async_trait]
impl RealtimeConnector for FakeConnector {
    async fn connect(&self, setup: Setup) -> anyhow::Result<RemoteSession> {
        if let Some(message) = &self.fail_with {
            anyhow::bail!("{message}");
        }
        let (events, rx) = mpsc::channel(64);
        let session = RecordingSession::new();
        let _ = self.opened.send(OpenedSession {
            events,
            session: session.clone(),
            setup,
        });
        Ok(RemoteSession {
            session: Box::new(session),
            events: rx,
        })
    }
}
