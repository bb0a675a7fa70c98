//! The session actor.
//!
//! One task owns the stream state, the statistics, the log and every media
//! resource. Commands from [`SessionHandle`], microphone blocks, sampled
//! frames, remote events and timer ticks all arrive on a single mailbox.
//!
//! Every asynchronous step is tagged with the generation that started it.
//! `stop` (and any teardown) bumps the generation, so a late acquisition
//! or connection is released on arrival instead of being activated.

use crate::config::{credential_present, SessionSettings};
use crate::error::SessionError;
use crate::frame_sampler::{EncodedFrame, FrameSampler};
use crate::logs::{LogBook, LogCategory, LogEntry};
use crate::media::{
    AudioCallback, AudioOutput, FacingMode, MediaConstraints, MediaDevices, MediaError,
    MediaStream,
};
use crate::playback::PlaybackScheduler;
use crate::realtime_api::{RealtimeConnector, RealtimeSession, RemoteEvent, RemoteSession};
use crate::stats::TrafficStats;
use crate::stream_state::{StreamEvent, StreamState, StreamStateMachine};
use crate::tool_calls::{PendingAcks, ToolCallInterpreter};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use traffic_live_types::{ClientMessage, ServerMessage};
use traffic_native_utils::audio;

const MAILBOX_CAPACITY: usize = 256;

/// Everything the presentation layer may observe.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Dashboard {
    pub stream_state: StreamState,
    pub stats: TrafficStats,
    /// Newest first.
    pub logs: Vec<LogEntry>,
    /// Output level, 0..=100.
    pub volume: u8,
    pub facing_mode: FacingMode,
    pub error: Option<String>,
}

type Reply<T> = oneshot::Sender<Result<T, SessionError>>;

enum Command {
    Start {
        facing: Option<FacingMode>,
        reply: Reply<()>,
    },
    Stop {
        reply: Reply<()>,
    },
    ToggleCamera {
        reply: Reply<FacingMode>,
    },
    Reset {
        reply: Reply<()>,
    },
    Shutdown {
        reply: Reply<()>,
    },
}

type Acquired = (MediaStream, Arc<dyn AudioOutput>);

enum Input {
    Command(Command),
    MediaAcquired {
        generation: u64,
        result: Result<Acquired, MediaError>,
    },
    Connected {
        generation: u64,
        result: anyhow::Result<RemoteSession>,
    },
    Remote {
        generation: u64,
        event: RemoteEvent,
    },
    MicAudio {
        generation: u64,
        data: String,
        sample_rate: u32,
    },
    Frame {
        generation: u64,
        frame: EncodedFrame,
    },
    VolumeTick {
        generation: u64,
    },
    Restart {
        generation: u64,
        facing: FacingMode,
    },
}

/// Cloneable front door to the session actor.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<Input>,
    dashboard: watch::Receiver<Dashboard>,
}

impl SessionHandle {
    /// Queues a start attempt. Returns once the attempt is underway;
    /// watch the dashboard for `Active` or `Error`.
    pub async fn start(&self, facing: Option<FacingMode>) -> Result<(), SessionError> {
        self.request(|reply| Command::Start { facing, reply }).await
    }

    pub async fn stop(&self) -> Result<(), SessionError> {
        self.request(|reply| Command::Stop { reply }).await
    }

    /// Switches cameras, restarting a running session. Returns the new facing.
    pub async fn toggle_camera(&self) -> Result<FacingMode, SessionError> {
        self.request(|reply| Command::ToggleCamera { reply }).await
    }

    /// Zeroes the statistics and clears the log.
    pub async fn reset(&self) -> Result<(), SessionError> {
        self.request(|reply| Command::Reset { reply }).await
    }

    /// Stops any session and ends the actor.
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        self.request(|reply| Command::Shutdown { reply }).await
    }

    pub fn subscribe(&self) -> watch::Receiver<Dashboard> {
        self.dashboard.clone()
    }

    pub fn snapshot(&self) -> Dashboard {
        self.dashboard.borrow().clone()
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Input::Command(make(reply)))
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)?
    }
}

pub struct SessionManager;

impl SessionManager {
    /// Spawns the actor on the current runtime.
    pub fn spawn(
        settings: SessionSettings,
        devices: Arc<dyn MediaDevices>,
        connector: Arc<dyn RealtimeConnector>,
    ) -> (SessionHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        let actor = SessionActor::new(settings, devices, connector, tx.downgrade());
        let dashboard = actor.dashboard.subscribe();
        let task = tokio::spawn(actor.run(rx));
        (SessionHandle { tx, dashboard }, task)
    }
}

/// Resources held by one generation.
struct Resources {
    stream: Option<MediaStream>,
    playback: Option<PlaybackScheduler>,
    session: Option<Box<dyn RealtimeSession>>,
    sampler: FrameSampler,
    ticker: Option<JoinHandle<()>>,
    tasks: Vec<JoinHandle<()>>,
}

impl Resources {
    fn is_held(&self) -> bool {
        self.stream.is_some() || self.playback.is_some() || self.session.is_some()
    }
}

struct SessionActor {
    settings: SessionSettings,
    devices: Arc<dyn MediaDevices>,
    connector: Arc<dyn RealtimeConnector>,
    mailbox: mpsc::WeakSender<Input>,
    dashboard: watch::Sender<Dashboard>,
    machine: StreamStateMachine,
    generation: u64,
    stats: TrafficStats,
    logs: LogBook,
    volume: u8,
    facing: FacingMode,
    error: Option<String>,
    interpreter: ToolCallInterpreter,
    acks: PendingAcks,
    transcript: String,
    resources: Resources,
    dirty: bool,
}

impl SessionActor {
    fn new(
        settings: SessionSettings,
        devices: Arc<dyn MediaDevices>,
        connector: Arc<dyn RealtimeConnector>,
        mailbox: mpsc::WeakSender<Input>,
    ) -> Self {
        let sampler = FrameSampler::new(settings.frame_sampler.clone());
        let logs = LogBook::new(settings.log_capacity);
        let mut actor = Self {
            settings,
            devices,
            connector,
            mailbox,
            dashboard: watch::channel(Dashboard {
                stream_state: StreamState::Idle,
                stats: TrafficStats::new(),
                logs: Vec::new(),
                volume: 0,
                facing_mode: FacingMode::default(),
                error: None,
            })
            .0,
            machine: StreamStateMachine::new(),
            generation: 0,
            stats: TrafficStats::new(),
            logs,
            volume: 0,
            facing: FacingMode::default(),
            error: None,
            interpreter: ToolCallInterpreter::new(),
            acks: PendingAcks::new(),
            transcript: String::new(),
            resources: Resources {
                stream: None,
                playback: None,
                session: None,
                sampler,
                ticker: None,
                tasks: Vec::new(),
            },
            dirty: false,
        };
        actor.publish();
        actor
    }

    async fn run(mut self, mut inbox: mpsc::Receiver<Input>) {
        tracing::debug!("session actor started");
        while let Some(input) = inbox.recv().await {
            let shutdown = self.handle(input).await;
            self.publish_if_dirty();
            if shutdown {
                break;
            }
        }
        self.release_resources().await;
        tracing::debug!("session actor stopped");
    }

    async fn handle(&mut self, input: Input) -> bool {
        match input {
            Input::Command(command) => return self.handle_command(command).await,
            Input::MediaAcquired { generation, result } => {
                self.on_media_acquired(generation, result).await
            }
            Input::Connected { generation, result } => self.on_connected(generation, result).await,
            Input::Remote { generation, event } => {
                if generation == self.generation {
                    self.on_remote(event).await;
                } else {
                    tracing::debug!("ignoring remote event from an old session");
                }
            }
            Input::MicAudio {
                generation,
                data,
                sample_rate,
            } => {
                if self.is_live(generation) {
                    self.forward(ClientMessage::audio(data, sample_rate)).await;
                }
            }
            Input::Frame { generation, frame } => {
                if self.is_live(generation) {
                    tracing::trace!("sending {}x{} frame", frame.width, frame.height);
                    self.forward(ClientMessage::video(frame.data)).await;
                }
            }
            Input::VolumeTick { generation } => {
                if self.is_live(generation) {
                    let volume = self
                        .resources
                        .playback
                        .as_ref()
                        .map_or(0, PlaybackScheduler::volume);
                    if volume != self.volume {
                        self.volume = volume;
                        self.dirty = true;
                    }
                }
            }
            Input::Restart { generation, facing } => {
                if generation == self.generation && !self.machine.state().is_running() {
                    if let Err(e) = self.start(Some(facing)).await {
                        tracing::warn!("camera restart failed: {}", e);
                    }
                }
            }
        }
        false
    }

    async fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Start { facing, reply } => {
                let result = self.start(facing).await;
                self.publish_if_dirty();
                let _ = reply.send(result);
            }
            Command::Stop { reply } => {
                self.stop().await;
                self.publish_if_dirty();
                let _ = reply.send(Ok(()));
            }
            Command::ToggleCamera { reply } => {
                let facing = self.toggle_camera().await;
                self.publish_if_dirty();
                let _ = reply.send(Ok(facing));
            }
            Command::Reset { reply } => {
                self.stats.reset();
                self.logs.clear();
                self.dirty = true;
                self.publish_if_dirty();
                let _ = reply.send(Ok(()));
            }
            Command::Shutdown { reply } => {
                self.stop().await;
                self.publish_if_dirty();
                let _ = reply.send(Ok(()));
                return true;
            }
        }
        false
    }

    async fn start(&mut self, facing: Option<FacingMode>) -> Result<(), SessionError> {
        if self.machine.state().is_running() || self.resources.is_held() {
            return Err(SessionError::AlreadyRunning);
        }
        if let Some(facing) = facing {
            self.facing = facing;
            self.dirty = true;
        }
        if !credential_present(&self.settings.credential) {
            self.fail(SessionError::CredentialMissing).await;
            return Err(SessionError::CredentialMissing);
        }
        let Some(tx) = self.mailbox.upgrade() else {
            return Err(SessionError::Closed);
        };

        self.error = None;
        self.generation += 1;
        self.resources.tasks.clear();
        self.transition(StreamEvent::Start);
        self.log(
            LogCategory::System,
            format!("Connecting with {} camera", self.facing),
        );
        tracing::info!(facing = %self.facing, "starting session");

        let devices = self.devices.clone();
        let constraints = MediaConstraints {
            facing_mode: self.facing,
            audio_sample_rate: self.settings.input_sample_rate,
            audio_channels: 1,
        };
        let output_rate = self.settings.output_sample_rate;
        let generation = self.generation;
        let task = tokio::spawn(async move {
            let result = async {
                let stream = devices.acquire(&constraints).await?;
                let output = devices.open_output(output_rate).await?;
                Ok::<_, MediaError>((stream, output))
            }
            .await;
            let _ = tx.send(Input::MediaAcquired { generation, result }).await;
        });
        self.resources.tasks.push(task);
        Ok(())
    }

    async fn on_media_acquired(&mut self, generation: u64, result: Result<Acquired, MediaError>) {
        if generation != self.generation || self.machine.state() != StreamState::Connecting {
            if let Ok((stream, output)) = result {
                tracing::debug!("releasing media acquired by an old session");
                stream.stop_tracks();
                output.close();
            }
            return;
        }
        let (stream, output) = match result {
            Ok(acquired) => acquired,
            Err(e) => {
                self.fail(SessionError::MediaAccess(e)).await;
                return;
            }
        };
        if stream.audio.sample_rate() != self.settings.input_sample_rate {
            tracing::warn!(
                "microphone delivers {} Hz instead of {} Hz",
                stream.audio.sample_rate(),
                self.settings.input_sample_rate
            );
        }
        self.resources.stream = Some(stream);
        self.resources.playback = Some(PlaybackScheduler::new(output, self.settings.output_sample_rate));

        let Some(tx) = self.mailbox.upgrade() else {
            return;
        };
        let connector = self.connector.clone();
        let setup = self.settings.setup();
        let task = tokio::spawn(async move {
            let result = connector.connect(setup).await;
            let _ = tx.send(Input::Connected { generation, result }).await;
        });
        self.resources.tasks.push(task);
    }

    async fn on_connected(&mut self, generation: u64, result: anyhow::Result<RemoteSession>) {
        if generation != self.generation || self.machine.state() != StreamState::Connecting {
            if let Ok(remote) = result {
                tracing::debug!("closing a session opened after stop");
                if let Err(e) = remote.session.close().await {
                    tracing::debug!("failed to close stale session: {}", e);
                }
            }
            return;
        }
        let RemoteSession { session, mut events } = match result {
            Ok(remote) => remote,
            Err(e) => {
                self.fail(SessionError::SessionOpen(format!("{e:#}"))).await;
                return;
            }
        };
        self.resources.session = Some(session);

        let Some(tx) = self.mailbox.upgrade() else {
            return;
        };
        let task = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let last = matches!(event, RemoteEvent::Close { .. } | RemoteEvent::Error(_));
                if tx.send(Input::Remote { generation, event }).await.is_err() || last {
                    return;
                }
            }
            let event = RemoteEvent::Close { reason: None };
            let _ = tx.send(Input::Remote { generation, event }).await;
        });
        self.resources.tasks.push(task);
    }

    async fn on_remote(&mut self, event: RemoteEvent) {
        match event {
            RemoteEvent::Open => self.on_open().await,
            RemoteEvent::Message(message) => self.on_message(*message).await,
            RemoteEvent::Close { reason } => match self.machine.state() {
                StreamState::Active => {
                    tracing::info!("session closed by remote: {:?}", reason);
                    self.release_resources().await;
                    self.transition(StreamEvent::Closed);
                    let message = match reason {
                        Some(reason) => format!("Session closed ({reason})"),
                        None => "Session closed".to_string(),
                    };
                    self.log(LogCategory::System, message);
                }
                StreamState::Connecting => {
                    let reason = reason.unwrap_or_else(|| "closed before setup completed".to_string());
                    self.fail(SessionError::SessionOpen(reason)).await;
                }
                _ => {}
            },
            RemoteEvent::Error(message) => {
                if self.machine.state().is_running() {
                    self.fail(SessionError::SessionRuntime(message)).await;
                }
            }
        }
    }

    async fn on_open(&mut self) {
        if self.machine.state() != StreamState::Connecting {
            return;
        }
        let Some(tx) = self.mailbox.upgrade() else {
            return;
        };
        let generation = self.generation;

        let mic_tx = tx.clone();
        let mut callback_rate = self.settings.input_sample_rate;
        let started = match &self.resources.stream {
            Some(stream) => {
                callback_rate = stream.audio.sample_rate();
                let callback: AudioCallback = Box::new(move |samples: &[f32]| {
                    let input = Input::MicAudio {
                        generation,
                        data: audio::encode_base64(samples),
                        sample_rate: callback_rate,
                    };
                    if let Err(e) = mic_tx.try_send(input) {
                        tracing::trace!("dropping microphone block: {}", e);
                    }
                });
                stream
                    .audio
                    .start(callback)
                    .map(|()| Some(stream.video.clone()))
            }
            None => Ok(None),
        };
        let video = match started {
            Ok(video) => video,
            Err(e) => {
                self.fail(SessionError::MediaAccess(e)).await;
                return;
            }
        };

        self.transition(StreamEvent::Opened);
        self.log(LogCategory::System, "Session active");
        tracing::info!(sample_rate = callback_rate, "session active");

        if let Some(video) = video {
            let frame_tx = tx.clone();
            self.resources.sampler.start(video, move |frame| {
                if let Err(e) = frame_tx.try_send(Input::Frame { generation, frame }) {
                    tracing::debug!("dropping frame: {}", e);
                }
            });
        }

        let interval = self.settings.volume_interval;
        self.resources.ticker = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                match tx.try_send(Input::VolumeTick { generation }) {
                    Ok(()) | Err(TrySendError::Full(_)) => {}
                    Err(TrySendError::Closed(_)) => break,
                }
            }
        }));
    }

    async fn on_message(&mut self, message: ServerMessage) {
        self.flush_acks().await;
        tracing::debug!("remote message: {}", message.kind());

        if let Some(tool_call) = &message.tool_call {
            self.interpreter.handle_batch(
                &tool_call.function_calls,
                &mut self.stats,
                &mut self.logs,
                &mut self.acks,
            );
            self.dirty = true;
        }
        if let Some(cancellation) = &message.tool_call_cancellation {
            self.log(
                LogCategory::System,
                format!("Model cancelled {} tool call(s)", cancellation.ids.len()),
            );
        }
        if let Some(content) = &message.server_content {
            if content.is_interrupted() {
                tracing::debug!("model interrupted, dropping queued speech");
                if let Some(playback) = self.resources.playback.as_mut() {
                    playback.interrupt();
                }
            }
            for blob in content.audio_blobs() {
                let Some(playback) = self.resources.playback.as_mut() else {
                    break;
                };
                match playback.enqueue_base64(blob.data()) {
                    Ok(chunk) => tracing::trace!("scheduled {:?} at {:?}", chunk.duration, chunk.start),
                    Err(e) => {
                        tracing::warn!("dropping audio chunk: {}", e);
                        self.log(LogCategory::Error, format!("Dropped audio chunk: {e}"));
                    }
                }
            }
            if let Some(transcription) = &content.output_transcription {
                self.transcript.push_str(&transcription.text);
            }
            for text in content.text_parts() {
                self.transcript.push_str(text);
            }
            if content.is_turn_complete() {
                let turn = std::mem::take(&mut self.transcript);
                let turn = turn.trim();
                if !turn.is_empty() {
                    self.log(LogCategory::Transcript, turn.to_string());
                }
            }
        }
        if let Some(go_away) = &message.go_away {
            tracing::warn!("server will close the session, time left {:?}", go_away.time_left);
            self.log(LogCategory::System, "Server is ending the session soon");
        }
        if let Some(usage) = &message.usage_metadata {
            tracing::debug!("token usage: {:?}", usage.total_token_count);
        }
        self.flush_acks().await;
    }

    async fn toggle_camera(&mut self) -> FacingMode {
        self.facing = self.facing.toggled();
        self.dirty = true;
        self.log(
            LogCategory::System,
            format!("Switched to {} camera", self.facing),
        );
        if self.machine.state().is_running() {
            self.stop().await;
            if let Some(tx) = self.mailbox.upgrade() {
                let generation = self.generation;
                let facing = self.facing;
                let delay = self.settings.restart_delay;
                self.resources.tasks.push(tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(Input::Restart { generation, facing }).await;
                }));
            }
        }
        self.facing
    }

    async fn stop(&mut self) {
        let was_running = self.machine.state().is_running();
        self.release_resources().await;
        self.error = None;
        self.transition(StreamEvent::Stop);
        if was_running {
            self.log(LogCategory::System, "Stopped");
            tracing::info!("session stopped");
        }
        self.dirty = true;
    }

    /// Fatal error: one log entry, the error message, full teardown.
    async fn fail(&mut self, error: SessionError) {
        tracing::error!("session failed: {}", error);
        self.release_resources().await;
        let message = error.to_string();
        self.log(LogCategory::Error, message.clone());
        self.error = Some(message);
        self.transition(StreamEvent::Failed);
    }

    async fn release_resources(&mut self) {
        self.generation += 1;
        for task in self.resources.tasks.drain(..) {
            task.abort();
        }
        self.resources.sampler.stop();
        if let Some(ticker) = self.resources.ticker.take() {
            ticker.abort();
        }
        if let Some(stream) = self.resources.stream.take() {
            stream.stop_tracks();
        }
        if let Some(mut playback) = self.resources.playback.take() {
            playback.close();
        }
        if let Some(session) = self.resources.session.take() {
            if let Err(e) = session.close().await {
                tracing::debug!("failed to close session: {}", e);
            }
        }
        self.acks.clear();
        self.transcript.clear();
        if self.volume != 0 {
            self.volume = 0;
            self.dirty = true;
        }
    }

    async fn forward(&mut self, message: ClientMessage) {
        if let Some(session) = self.resources.session.as_deref() {
            if let Err(e) = session.send(message).await {
                tracing::warn!("failed to send media: {}", e);
            }
        }
    }

    async fn flush_acks(&mut self) {
        if self.acks.is_empty() {
            return;
        }
        if let Some(session) = self.resources.session.as_deref() {
            if let Err(e) = self.acks.flush(session).await {
                tracing::warn!("failed to acknowledge tool calls: {}", e);
            }
        }
    }

    fn is_live(&self, generation: u64) -> bool {
        generation == self.generation && self.machine.state() == StreamState::Active
    }

    fn transition(&mut self, event: StreamEvent) {
        match self.machine.apply(event) {
            Ok(_) => self.dirty = true,
            Err(e) => tracing::warn!("{}", e),
        }
    }

    fn log(&mut self, category: LogCategory, message: impl Into<String>) {
        self.logs.push(category, message);
        self.dirty = true;
    }

    fn publish_if_dirty(&mut self) {
        if self.dirty {
            self.publish();
        }
    }

    fn publish(&mut self) {
        self.dashboard.send_replace(Dashboard {
            stream_state: self.machine.state(),
            stats: self.stats.clone(),
            logs: self.logs.to_vec(),
            volume: self.volume,
            facing_mode: self.facing,
            error: self.error.clone(),
        });
        self.dirty = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_sampler::FrameSamplerConfig;
    use crate::testing::{FakeConnector, FakeDevices, OpenedSession};
    use secrecy::SecretString;
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::timeout;
    use traffic_native_utils::audio::{encode, to_base64};

    fn settings() -> SessionSettings {
        SessionSettings {
            frame_sampler: FrameSamplerConfig {
                width: 32,
                ..FrameSamplerConfig::default()
            },
            restart_delay: Duration::from_millis(50),
            ..SessionSettings::default()
        }
        .with_credential(SecretString::from("test-key".to_string()))
    }

    async fn wait_until(
        dashboard: &mut watch::Receiver<Dashboard>,
        what: &str,
        check: impl FnMut(&Dashboard) -> bool,
    ) {
        let reached = timeout(Duration::from_secs(5), dashboard.wait_for(check))
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
            .is_ok();
        assert!(reached, "actor ended while waiting for {what}");
    }

    async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
        let waited = timeout(Duration::from_secs(5), async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(waited.is_ok(), "timed out waiting for {what}");
    }

    async fn send(remote: &OpenedSession, message: serde_json::Value) {
        let message: ServerMessage = serde_json::from_value(message).unwrap();
        remote
            .events
            .send(RemoteEvent::Message(Box::new(message)))
            .await
            .unwrap();
    }

    async fn active_session() -> (
        SessionHandle,
        watch::Receiver<Dashboard>,
        Arc<FakeDevices>,
        OpenedSession,
    ) {
        let devices = FakeDevices::new();
        let (connector, mut opened) = FakeConnector::new();
        let (handle, _task) = SessionManager::spawn(settings(), devices.clone(), connector);
        let mut dashboard = handle.subscribe();

        handle.start(None).await.unwrap();
        assert_eq!(handle.snapshot().stream_state, StreamState::Connecting);
        let remote = opened.recv().await.unwrap();
        remote.events.send(RemoteEvent::Open).await.unwrap();
        wait_until(&mut dashboard, "active", |d| d.stream_state == StreamState::Active).await;
        (handle, dashboard, devices, remote)
    }

    #[tokio::test]
    async fn start_streams_media_and_stop_releases_everything() {
        let (handle, mut dashboard, devices, remote) = active_session().await;
        assert_eq!(remote.setup.function_declarations().count(), 1);

        devices.emit_audio(&[0.25; 160]);
        eventually("microphone audio", || {
            remote.session.sent_kinds().contains(&"realtime_input.audio")
        })
        .await;
        eventually("a sampled frame", || {
            remote.session.sent_kinds().contains(&"realtime_input.video")
        })
        .await;

        send(
            &remote,
            json!({"toolCall": {"functionCalls": [
                {"id": "c1", "name": "report_traffic", "args": {"four_wheeler": 2, "density": "MEDIUM"}}
            ]}}),
        )
        .await;
        wait_until(&mut dashboard, "counted cars", |d| {
            d.stats.counts().four_wheeler == 2
        })
        .await;
        eventually("tool response", || {
            remote.session.sent_kinds().contains(&"tool_response")
        })
        .await;

        let speech = to_base64(&encode(&[0.1; 2400]));
        send(
            &remote,
            json!({"serverContent": {
                "modelTurn": {"parts": [{"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": speech}}]},
                "outputTranscription": {"text": "Two cars passed."},
                "turnComplete": true
            }}),
        )
        .await;
        wait_until(&mut dashboard, "transcript", |d| {
            d.logs
                .iter()
                .any(|e| e.category() == LogCategory::Transcript && e.message() == "Two cars passed.")
        })
        .await;
        let output = devices.last_output().unwrap();
        assert_eq!(output.scheduled_starts().len(), 1);

        handle.stop().await.unwrap();
        let snapshot = handle.snapshot();
        assert_eq!(snapshot.stream_state, StreamState::Idle);
        assert_eq!(snapshot.volume, 0);
        assert!(snapshot.error.is_none());
        assert_eq!(devices.live_tracks(), 0);
        assert!(output.is_closed());
        assert!(remote.session.is_closed());

        // A second stop is a no-op.
        handle.stop().await.unwrap();
        assert_eq!(handle.snapshot().stream_state, StreamState::Idle);
    }

    #[tokio::test]
    async fn stop_while_connecting_never_activates() {
        let devices = FakeDevices::new();
        let (connector, mut opened) = FakeConnector::new();
        let (handle, _task) = SessionManager::spawn(settings(), devices.clone(), connector);

        handle.start(None).await.unwrap();
        let remote = opened.recv().await.unwrap();
        handle.stop().await.unwrap();
        let _ = remote.events.send(RemoteEvent::Open).await;

        eventually("stale session closed", || remote.session.is_closed()).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        let snapshot = handle.snapshot();
        assert_eq!(snapshot.stream_state, StreamState::Idle);
        assert_eq!(devices.live_tracks(), 0);
        assert!(remote.session.sent().is_empty());
    }

    #[tokio::test]
    async fn stop_during_acquisition_holds_nothing() {
        let devices = FakeDevices::slow(Duration::from_millis(100));
        let (connector, mut opened) = FakeConnector::new();
        let (handle, _task) = SessionManager::spawn(settings(), devices.clone(), connector);

        handle.start(None).await.unwrap();
        handle.stop().await.unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;

        assert_eq!(handle.snapshot().stream_state, StreamState::Idle);
        assert_eq!(devices.acquisitions(), 0);
        assert_eq!(devices.live_tracks(), 0);
        assert!(opened.try_recv().is_err());
    }

    #[tokio::test]
    async fn missing_credential_fails_fast() {
        let devices = FakeDevices::new();
        let (connector, _opened) = FakeConnector::new();
        let settings = settings().with_credential(SecretString::from("YOUR_API_KEY".to_string()));
        let (handle, _task) = SessionManager::spawn(settings, devices.clone(), connector);

        assert_eq!(handle.start(None).await, Err(SessionError::CredentialMissing));
        let snapshot = handle.snapshot();
        assert_eq!(snapshot.stream_state, StreamState::Error);
        assert!(snapshot.error.is_some());
        assert_eq!(snapshot.logs.len(), 1);
        assert_eq!(snapshot.logs[0].category(), LogCategory::Error);
        assert_eq!(devices.acquisitions(), 0);
    }

    #[tokio::test]
    async fn denied_media_surfaces_as_error() {
        let devices = FakeDevices::failing(MediaError::PermissionDenied("camera".into()));
        let (connector, mut opened) = FakeConnector::new();
        let (handle, _task) = SessionManager::spawn(settings(), devices, connector);
        let mut dashboard = handle.subscribe();

        handle.start(None).await.unwrap();
        wait_until(&mut dashboard, "error", |d| d.stream_state == StreamState::Error).await;
        let snapshot = handle.snapshot();
        assert!(snapshot.error.unwrap().contains("permission denied"));
        assert!(opened.try_recv().is_err());

        // Error is a valid place to start again from.
        assert!(handle.start(None).await.is_ok());
    }

    #[tokio::test]
    async fn connect_failure_is_a_session_open_error() {
        let devices = FakeDevices::new();
        let (connector, _opened) = FakeConnector::failing("handshake refused");
        let (handle, _task) = SessionManager::spawn(settings(), devices.clone(), connector);
        let mut dashboard = handle.subscribe();

        handle.start(None).await.unwrap();
        wait_until(&mut dashboard, "error", |d| d.stream_state == StreamState::Error).await;
        assert!(handle.snapshot().error.unwrap().contains("handshake refused"));
        assert_eq!(devices.live_tracks(), 0);
        assert!(devices.last_output().unwrap().is_closed());
    }

    #[tokio::test]
    async fn remote_error_tears_down() {
        let (handle, mut dashboard, devices, remote) = active_session().await;
        remote
            .events
            .send(RemoteEvent::Error("quota exceeded".into()))
            .await
            .unwrap();
        wait_until(&mut dashboard, "error", |d| d.stream_state == StreamState::Error).await;

        let snapshot = handle.snapshot();
        assert!(snapshot.error.unwrap().contains("quota exceeded"));
        let errors = snapshot
            .logs
            .iter()
            .filter(|e| e.category() == LogCategory::Error)
            .count();
        assert_eq!(errors, 1);
        assert_eq!(devices.live_tracks(), 0);
        assert!(remote.session.is_closed());
    }

    #[tokio::test]
    async fn remote_close_returns_to_idle() {
        let (handle, mut dashboard, devices, remote) = active_session().await;
        remote
            .events
            .send(RemoteEvent::Close {
                reason: Some("1000 bye".into()),
            })
            .await
            .unwrap();
        wait_until(&mut dashboard, "idle", |d| d.stream_state == StreamState::Idle).await;
        assert!(handle.snapshot().error.is_none());
        assert_eq!(devices.live_tracks(), 0);
    }

    #[tokio::test]
    async fn second_start_is_rejected() {
        let (handle, _dashboard, devices, _remote) = active_session().await;
        assert_eq!(handle.start(None).await, Err(SessionError::AlreadyRunning));
        assert_eq!(devices.acquisitions(), 1);
        assert_eq!(handle.snapshot().stream_state, StreamState::Active);
    }

    #[tokio::test]
    async fn toggle_restarts_with_the_other_camera() {
        let devices = FakeDevices::new();
        let (connector, mut opened) = FakeConnector::new();
        let (handle, _task) = SessionManager::spawn(settings(), devices.clone(), connector);
        let mut dashboard = handle.subscribe();

        handle.start(Some(FacingMode::Environment)).await.unwrap();
        let first = opened.recv().await.unwrap();
        first.events.send(RemoteEvent::Open).await.unwrap();
        wait_until(&mut dashboard, "active", |d| d.stream_state == StreamState::Active).await;

        assert_eq!(handle.toggle_camera().await, Ok(FacingMode::User));
        assert_eq!(handle.snapshot().stream_state, StreamState::Idle);
        assert!(first.session.is_closed());

        let second = timeout(Duration::from_secs(5), opened.recv())
            .await
            .unwrap()
            .unwrap();
        second.events.send(RemoteEvent::Open).await.unwrap();
        wait_until(&mut dashboard, "active again", |d| {
            d.stream_state == StreamState::Active
        })
        .await;
        assert_eq!(handle.snapshot().facing_mode, FacingMode::User);
        assert_eq!(
            devices.last_constraints().unwrap().facing_mode,
            FacingMode::User
        );
        assert_eq!(devices.live_tracks(), 1);
    }

    #[tokio::test]
    async fn stop_cancels_a_pending_camera_restart() {
        let (handle, _dashboard, devices, _remote) = active_session().await;
        handle.toggle_camera().await.unwrap();
        handle.stop().await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(handle.snapshot().stream_state, StreamState::Idle);
        assert_eq!(devices.acquisitions(), 1);
    }

    #[tokio::test]
    async fn toggle_while_idle_only_flips_facing() {
        let devices = FakeDevices::new();
        let (connector, _opened) = FakeConnector::new();
        let (handle, _task) = SessionManager::spawn(settings(), devices.clone(), connector);
        assert_eq!(handle.toggle_camera().await, Ok(FacingMode::User));
        assert_eq!(handle.toggle_camera().await, Ok(FacingMode::Environment));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(devices.acquisitions(), 0);
    }

    #[tokio::test]
    async fn reset_clears_counts_but_keeps_streaming() {
        let (handle, mut dashboard, _devices, remote) = active_session().await;
        send(
            &remote,
            json!({"toolCall": {"functionCalls": [
                {"id": "1", "name": "report_traffic", "args": {"heavy_vehicle": 1, "density": "HIGH"}}
            ]}}),
        )
        .await;
        wait_until(&mut dashboard, "a detection", |d| {
            d.stats.counts().heavy_vehicle == 1
        })
        .await;

        handle.reset().await.unwrap();
        let snapshot = handle.snapshot();
        assert!(snapshot.stats.counts().is_zero());
        assert_eq!(snapshot.stats.density(), crate::stats::Density::Low);
        assert!(snapshot.logs.is_empty());
        assert_eq!(snapshot.stream_state, StreamState::Active);
    }

    #[tokio::test]
    async fn bad_audio_chunk_is_logged_and_skipped() {
        let (handle, mut dashboard, _devices, remote) = active_session().await;
        send(
            &remote,
            json!({"serverContent": {"modelTurn": {"parts": [
                {"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "AAAA"}}
            ]}}}),
        )
        .await;
        wait_until(&mut dashboard, "decode error log", |d| {
            d.logs.iter().any(|e| e.category() == LogCategory::Error)
        })
        .await;
        let snapshot = handle.snapshot();
        assert_eq!(snapshot.stream_state, StreamState::Active);
        assert!(snapshot.error.is_none());
    }

    #[tokio::test]
    async fn transcript_fragments_join_into_one_entry_per_turn() {
        let (handle, mut dashboard, _devices, remote) = active_session().await;
        send(&remote, json!({"serverContent": {"turnComplete": true}})).await;
        send(&remote, json!({"serverContent": {"outputTranscription": {"text": "Two "}}})).await;
        send(&remote, json!({"serverContent": {"outputTranscription": {"text": "cars."}}})).await;
        send(&remote, json!({"serverContent": {"turnComplete": true}})).await;
        wait_until(&mut dashboard, "transcript", |d| {
            d.logs.iter().any(|e| e.category() == LogCategory::Transcript)
        })
        .await;

        let transcripts: Vec<String> = handle
            .snapshot()
            .logs
            .iter()
            .filter(|e| e.category() == LogCategory::Transcript)
            .map(|e| e.message().to_string())
            .collect();
        assert_eq!(transcripts, vec!["Two cars.".to_string()]);
    }

    #[tokio::test]
    async fn shutdown_ends_the_actor() {
        let (handle, _dashboard, devices, _remote) = active_session().await;
        handle.shutdown().await.unwrap();
        assert_eq!(devices.live_tracks(), 0);
        eventually("actor exit", || handle.tx.is_closed()).await;
        assert_eq!(handle.stop().await, Err(SessionError::Closed));
    }
}
