//! File-backed media devices.
//!
//! The microphone replays a WAV file in real time, the camera cycles
//! through a directory of still images (`user/` and `environment/`
//! subfolders select the facing), and model speech is streamed to a WAV
//! file as the playback clock reaches it.

use crate::config::INPUT_CHUNK_SIZE;
use anyhow::Context;
use async_trait::async_trait;
use image::{Rgb, RgbImage};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use traffic_core::media::{
    AudioCallback, AudioCapture, AudioOutput, FacingMode, MediaConstraints, MediaDevices,
    MediaError, MediaStream, VideoSource,
};
use traffic_native_utils::audio::{downmix, resample};
use traffic_native_utils::AudioBuffer;

const FRAME_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];
const PATTERN_SIZE: (u32, u32) = (640, 360);

#[derive(Debug, Clone, Default)]
pub struct FileDevices {
    pub audio_in: Option<PathBuf>,
    pub frames: Option<PathBuf>,
    pub audio_out: Option<PathBuf>,
}

#[async_trait]
impl MediaDevices for FileDevices {
    async fn acquire(&self, constraints: &MediaConstraints) -> Result<MediaStream, MediaError> {
        let rate = constraints.audio_sample_rate;
        let samples = match &self.audio_in {
            Some(path) => {
                let path = path.clone();
                tokio::task::spawn_blocking(move || load_wav(&path, rate))
                    .await
                    .map_err(|e| MediaError::Device(e.to_string()))??
            }
            None => Vec::new(),
        };
        let video: Arc<dyn VideoSource> = match &self.frames {
            Some(dir) => Arc::new(FrameDirectory::open(dir, constraints.facing_mode)?),
            None => Arc::new(TestPattern::new(constraints.facing_mode)),
        };
        tracing::info!(
            facing = %constraints.facing_mode,
            samples = samples.len(),
            "acquired file media"
        );
        Ok(MediaStream::new(
            Box::new(FileCapture::new(samples, rate)),
            video,
        ))
    }

    async fn open_output(&self, sample_rate: u32) -> Result<Arc<dyn AudioOutput>, MediaError> {
        Ok(Arc::new(RecordingOutput::create(
            sample_rate,
            self.audio_out.clone(),
        )?))
    }
}

/// Reads a WAV file as mono samples at `sample_rate`.
pub fn load_wav(path: &Path, sample_rate: u32) -> Result<Vec<f32>, MediaError> {
    let mut reader = hound::WavReader::open(path).map_err(|e| match e {
        hound::Error::IoError(io) if io.kind() == std::io::ErrorKind::NotFound => {
            MediaError::NotFound(path.display().to_string())
        }
        other => MediaError::Device(format!("{}: {other}", path.display())),
    })?;
    let spec = reader.spec();
    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>(),
        hound::SampleFormat::Int => {
            let scale = 2f32.powi(i32::from(spec.bits_per_sample) - 1);
            reader
                .samples::<i32>()
                .map(|s| s.map(|s| s as f32 / scale))
                .collect::<Result<_, _>>()
        }
    }
    .map_err(|e| MediaError::Device(e.to_string()))?;

    let mono = downmix(&interleaved, usize::from(spec.channels));
    resample(&mono, spec.sample_rate, sample_rate).map_err(|e| MediaError::Device(format!("{e:#}")))
}

/// Replays samples in real-time blocks, looping; silence when empty.
pub struct FileCapture {
    samples: Arc<Vec<f32>>,
    sample_rate: u32,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl FileCapture {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples: Arc::new(samples),
            sample_rate,
            task: Mutex::new(None),
        }
    }

    fn block_interval(&self) -> Duration {
        Duration::from_secs_f64(INPUT_CHUNK_SIZE as f64 / f64::from(self.sample_rate.max(1)))
    }
}

impl AudioCapture for FileCapture {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn start(&self, mut callback: AudioCallback) -> Result<(), MediaError> {
        let samples = self.samples.clone();
        let interval = self.block_interval();
        let task = tokio::spawn(async move {
            let silence = vec![0.0; INPUT_CHUNK_SIZE];
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut position = 0;
            loop {
                ticker.tick().await;
                if samples.is_empty() {
                    callback(&silence);
                    continue;
                }
                let end = (position + INPUT_CHUNK_SIZE).min(samples.len());
                callback(&samples[position..end]);
                position = if end == samples.len() { 0 } else { end };
            }
        });
        let mut slot = self
            .task
            .lock()
            .map_err(|_| MediaError::Device("capture state poisoned".into()))?;
        if let Some(previous) = slot.replace(task) {
            previous.abort();
        }
        Ok(())
    }

    fn stop(&self) {
        if let Ok(mut slot) = self.task.lock() {
            if let Some(task) = slot.take() {
                task.abort();
            }
        }
    }
}

/// Cycles through the images of one directory.
pub struct FrameDirectory {
    frames: Vec<PathBuf>,
    next: AtomicUsize,
    stopped: AtomicBool,
}

impl FrameDirectory {
    /// Uses `dir/<facing>/` when it exists, `dir` otherwise.
    pub fn open(dir: &Path, facing: FacingMode) -> Result<Self, MediaError> {
        let facing_dir = dir.join(facing.as_str());
        let dir = if facing_dir.is_dir() { facing_dir } else { dir.to_path_buf() };
        let frames = list_frames(&dir)
            .map_err(|e| MediaError::NotFound(format!("{e:#}")))?;
        if frames.is_empty() {
            return Err(MediaError::NotFound(format!(
                "no {} images in {}",
                FRAME_EXTENSIONS.join("/"),
                dir.display()
            )));
        }
        tracing::debug!("camera {} has {} frames", dir.display(), frames.len());
        Ok(Self {
            frames,
            next: AtomicUsize::new(0),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }
}

fn list_frames(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut frames = Vec::new();
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read frames directory: {}", dir.display()))?
    {
        let path = entry?.path();
        let is_image = path
            .extension()
            .and_then(|s| s.to_str())
            .is_some_and(|ext| FRAME_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
        if path.is_file() && is_image {
            frames.push(path);
        }
    }
    frames.sort();
    Ok(frames)
}

impl VideoSource for FrameDirectory {
    fn is_ready(&self) -> bool {
        !self.stopped.load(Ordering::SeqCst)
    }

    fn grab_frame(&self) -> Option<RgbImage> {
        if self.stopped.load(Ordering::SeqCst) {
            return None;
        }
        let index = self.next.fetch_add(1, Ordering::SeqCst) % self.frames.len();
        let path = &self.frames[index];
        match image::open(path) {
            Ok(image) => Some(image.to_rgb8()),
            Err(e) => {
                tracing::warn!("skipping frame {}: {}", path.display(), e);
                None
            }
        }
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

/// Synthetic road: a grey lane with a block sliding across it.
pub struct TestPattern {
    tint: Rgb<u8>,
    tick: AtomicUsize,
    stopped: AtomicBool,
}

impl TestPattern {
    pub fn new(facing: FacingMode) -> Self {
        let tint = match facing {
            FacingMode::Environment => Rgb([70, 70, 70]),
            FacingMode::User => Rgb([110, 90, 80]),
        };
        Self {
            tint,
            tick: AtomicUsize::new(0),
            stopped: AtomicBool::new(false),
        }
    }
}

impl VideoSource for TestPattern {
    fn is_ready(&self) -> bool {
        !self.stopped.load(Ordering::SeqCst)
    }

    fn grab_frame(&self) -> Option<RgbImage> {
        if self.stopped.load(Ordering::SeqCst) {
            return None;
        }
        let (width, height) = PATTERN_SIZE;
        let step = self.tick.fetch_add(1, Ordering::SeqCst) as u32;
        let left = step.wrapping_mul(40) % width;
        let mut image = RgbImage::from_pixel(width, height, self.tint);
        for y in height / 2..height / 2 + 40 {
            for x in left..(left + 80).min(width) {
                image.put_pixel(x, y, Rgb([200, 200, 40]));
            }
        }
        Some(image)
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

type SpeechWriter = hound::WavWriter<BufWriter<File>>;

/// Scheduled audio not yet due, plus the file it drains into.
struct Recorder {
    writer: Option<SpeechWriter>,
    /// Frames already past the playhead.
    played: usize,
    /// Samples from `played` onwards, laid out by start time.
    pending: Vec<f32>,
}

impl Recorder {
    /// Moves everything before `frame` out of `pending`, writing it (and
    /// silence for the gaps) when a file is attached.
    fn play_until(&mut self, frame: usize) -> Result<(), hound::Error> {
        if frame <= self.played {
            return Ok(());
        }
        let due = frame - self.played;
        let ready = due.min(self.pending.len());
        let samples: Vec<f32> = self.pending.drain(..ready).collect();
        if let Some(writer) = self.writer.as_mut() {
            for sample in samples {
                writer.write_sample(to_pcm16(sample))?;
            }
            for _ in ready..due {
                writer.write_sample(0i16)?;
            }
        }
        self.played = frame;
        Ok(())
    }

    fn lay(&mut self, start: usize, samples: &[f32]) {
        let skip = self.played.saturating_sub(start).min(samples.len());
        let samples = &samples[skip..];
        let offset = start.max(self.played) - self.played;
        if self.pending.len() < offset + samples.len() {
            self.pending.resize(offset + samples.len(), 0.0);
        }
        self.pending[offset..offset + samples.len()].copy_from_slice(samples);
    }

    fn finish(&mut self) -> Result<(), hound::Error> {
        let end = self.played + self.pending.len();
        self.play_until(end)?;
        match self.writer.take() {
            Some(writer) => writer.finalize(),
            None => Ok(()),
        }
    }
}

fn to_pcm16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16
}

/// Output that follows a wall clock and streams the scheduled speech, with
/// silence in between, into an optional WAV file.
pub struct RecordingOutput {
    sample_rate: u32,
    origin: Instant,
    recorder: Mutex<Recorder>,
    closed: AtomicBool,
    path: Option<PathBuf>,
}

impl RecordingOutput {
    pub fn create(sample_rate: u32, path: Option<PathBuf>) -> Result<Self, MediaError> {
        let writer = match &path {
            Some(path) => {
                let spec = hound::WavSpec {
                    channels: 1,
                    sample_rate,
                    bits_per_sample: 16,
                    sample_format: hound::SampleFormat::Int,
                };
                let writer = hound::WavWriter::create(path, spec)
                    .map_err(|e| MediaError::Device(format!("{}: {e}", path.display())))?;
                Some(writer)
            }
            None => None,
        };
        Ok(Self {
            sample_rate,
            origin: Instant::now(),
            recorder: Mutex::new(Recorder {
                writer,
                played: 0,
                pending: Vec::new(),
            }),
            closed: AtomicBool::new(false),
            path,
        })
    }

    fn frame_at(&self, time: Duration) -> usize {
        (time.as_secs_f64() * f64::from(self.sample_rate)).round() as usize
    }

    /// Frames scheduled but not yet reached by the clock.
    pub fn queued_frames(&self) -> usize {
        self.recorder.lock().map(|r| r.pending.len()).unwrap_or(0)
    }

    fn recorder(&self) -> Result<std::sync::MutexGuard<'_, Recorder>, MediaError> {
        self.recorder
            .lock()
            .map_err(|_| MediaError::Device("output state poisoned".into()))
    }
}

impl AudioOutput for RecordingOutput {
    fn current_time(&self) -> Duration {
        self.origin.elapsed()
    }

    fn schedule(&self, buffer: Arc<AudioBuffer>, start_at: Duration) -> Result<(), MediaError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(MediaError::Device("output is closed".into()));
        }
        let samples = buffer.channel(0).unwrap_or(&[]);
        let samples = resample(samples, buffer.sample_rate(), self.sample_rate)
            .map_err(|e| MediaError::Device(format!("{e:#}")))?;
        let start = self.frame_at(start_at);
        let now = self.frame_at(self.current_time());
        let mut recorder = self.recorder()?;
        recorder
            .play_until(now.min(start))
            .map_err(|e| MediaError::Device(e.to_string()))?;
        recorder.lay(start, &samples);
        Ok(())
    }

    fn cancel_scheduled(&self) {
        let now = self.frame_at(self.current_time());
        if let Ok(mut recorder) = self.recorder() {
            if let Err(e) = recorder.play_until(now) {
                tracing::error!("failed to write model speech: {}", e);
            }
            recorder.pending.clear();
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let now = self.frame_at(self.current_time());
        let Ok(mut recorder) = self.recorder() else {
            return;
        };
        let result = recorder.play_until(now).and_then(|()| recorder.finish());
        match (result, &self.path) {
            (Ok(()), Some(path)) => tracing::info!("saved model speech to {}", path.display()),
            (Ok(()), None) => {}
            (Err(e), _) => tracing::error!("failed to save model speech: {}", e),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_wav(path: &Path, sample_rate: u32, channels: u16, frames: usize) {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for _ in 0..frames * usize::from(channels) {
            writer.write_sample(8192i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn wav_is_downmixed_and_resampled() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mic.wav");
        write_wav(&path, 32_000, 2, 32_000);

        let samples = load_wav(&path, 16_000).unwrap();
        assert!(samples.len() > 15_000 && samples.len() <= 16_000);
        assert!((samples[8_000] - 0.25).abs() < 0.01);

        let missing = load_wav(&dir.path().join("absent.wav"), 16_000);
        assert!(matches!(missing, Err(MediaError::NotFound(_))));
    }

    #[test]
    fn camera_prefers_the_facing_subfolder() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("user")).unwrap();
        RgbImage::from_pixel(8, 6, Rgb([1, 2, 3]))
            .save(dir.path().join("user").join("a.png"))
            .unwrap();
        for name in ["1.png", "2.png"] {
            RgbImage::from_pixel(4, 4, Rgb([9, 9, 9]))
                .save(dir.path().join(name))
                .unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), "skip").unwrap();

        let user = FrameDirectory::open(dir.path(), FacingMode::User).unwrap();
        assert_eq!(user.frame_count(), 1);
        assert_eq!(user.grab_frame().unwrap().dimensions(), (8, 6));

        let environment = FrameDirectory::open(dir.path(), FacingMode::Environment).unwrap();
        assert_eq!(environment.frame_count(), 2);
        environment.stop();
        assert!(!environment.is_ready());
        assert!(environment.grab_frame().is_none());
    }

    #[test]
    fn empty_camera_directory_is_not_found() {
        let dir = tempdir().unwrap();
        let result = FrameDirectory::open(dir.path(), FacingMode::Environment);
        assert!(matches!(result, Err(MediaError::NotFound(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn capture_delivers_blocks_until_stopped() {
        let capture = FileCapture::new(vec![0.5; INPUT_CHUNK_SIZE * 2 + 10], 16_000);
        let blocks = Arc::new(Mutex::new(Vec::new()));
        let sink = blocks.clone();
        capture
            .start(Box::new(move |samples: &[f32]| {
                sink.lock().unwrap().push(samples.len())
            }))
            .unwrap();

        tokio::time::sleep(capture.block_interval() * 3 + Duration::from_millis(1)).await;
        capture.stop();
        let seen = blocks.lock().unwrap().clone();
        assert_eq!(&seen[..3], &[INPUT_CHUNK_SIZE, INPUT_CHUNK_SIZE, 10]);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(blocks.lock().unwrap().len(), seen.len());
    }

    #[tokio::test(start_paused = true)]
    async fn recording_streams_played_speech_and_finalizes_on_close() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("speech.wav");
        let output = RecordingOutput::create(1_000, Some(path.clone())).unwrap();

        let chunk = Arc::new(AudioBuffer::mono(1_000, vec![0.5; 100]));
        output.schedule(chunk.clone(), Duration::from_millis(200)).unwrap();
        output.schedule(chunk, Duration::from_millis(300)).unwrap();
        assert_eq!(output.queued_frames(), 400);

        tokio::time::advance(Duration::from_millis(250)).await;
        output.cancel_scheduled();
        assert_eq!(output.queued_frames(), 0);

        output.close();
        output.close();
        assert!(output.is_closed());
        assert!(output
            .schedule(Arc::new(AudioBuffer::mono(1_000, vec![0.1])), Duration::ZERO)
            .is_err());

        let mut reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, 1_000);
        assert_eq!(reader.len(), 250);
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples[150], 0);
        assert_eq!(samples[220], to_pcm16(0.5));
    }

    #[tokio::test(start_paused = true)]
    async fn recording_without_a_file_holds_only_queued_speech() {
        let output = RecordingOutput::create(24_000, None).unwrap();
        tokio::time::advance(Duration::from_secs(3600)).await;

        let chunk = Arc::new(AudioBuffer::mono(24_000, vec![0.2; 2_400]));
        output.schedule(chunk.clone(), output.current_time()).unwrap();
        assert_eq!(output.queued_frames(), 2_400);

        tokio::time::advance(Duration::from_secs(1)).await;
        output.schedule(chunk, output.current_time()).unwrap();
        assert_eq!(output.queued_frames(), 2_400);

        output.close();
        assert_eq!(output.queued_frames(), 0);
    }

    #[tokio::test]
    async fn devices_fail_on_missing_microphone_file() {
        let devices = FileDevices {
            audio_in: Some(PathBuf::from("definitely/missing.wav")),
            ..FileDevices::default()
        };
        let constraints = MediaConstraints {
            facing_mode: FacingMode::Environment,
            audio_sample_rate: 16_000,
            audio_channels: 1,
        };
        let result = devices.acquire(&constraints).await;
        assert!(matches!(result, Err(MediaError::NotFound(_))));

        let stream = FileDevices::default().acquire(&constraints).await.unwrap();
        assert!(stream.video.grab_frame().is_some());
        stream.stop_tracks();
    }
}
