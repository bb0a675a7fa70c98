//! Microphone and speaker through cpal.
//!
//! cpal streams are not `Send`, so each one lives on its own thread and is
//! dropped when that thread is told to stop. The camera side reuses the
//! file-backed sources.

use crate::config::{INPUT_CHUNK_SIZE, OUTPUT_CHUNK_SIZE, OUTPUT_LATENCY_MS};
use crate::file_media::{FrameDirectory, TestPattern};
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{BufferSize, FrameCount, StreamConfig};
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::HeapProd;
use rubato::Resampler;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use traffic_core::media::{
    AudioCallback, AudioCapture, AudioOutput, MediaConstraints, MediaDevices, MediaError,
    MediaStream, VideoSource,
};
use traffic_native_utils::audio::{create_resampler, downmix, resample, shared_buffer};
use traffic_native_utils::{device, AudioBuffer};

#[derive(Debug, Clone, Default)]
pub struct NativeDevices {
    pub input: Option<String>,
    pub output: Option<String>,
    pub frames: Option<PathBuf>,
}

#[async_trait]
impl MediaDevices for NativeDevices {
    async fn acquire(&self, constraints: &MediaConstraints) -> Result<MediaStream, MediaError> {
        let video: Arc<dyn VideoSource> = match &self.frames {
            Some(dir) => Arc::new(FrameDirectory::open(dir, constraints.facing_mode)?),
            None => Arc::new(TestPattern::new(constraints.facing_mode)),
        };
        // Fail early when there is no microphone at all.
        device::get_or_default_input(self.input.as_deref())
            .map_err(|e| MediaError::NotFound(format!("{e:#}")))?;
        let capture = DeviceCapture {
            device_name: self.input.clone(),
            sample_rate: constraints.audio_sample_rate,
            stop: Mutex::new(None),
        };
        Ok(MediaStream::new(Box::new(capture), video))
    }

    async fn open_output(&self, sample_rate: u32) -> Result<Arc<dyn AudioOutput>, MediaError> {
        let output = DeviceOutput::open(self.output.clone(), sample_rate)?;
        Ok(Arc::new(output))
    }
}

fn device_error(e: impl std::fmt::Display) -> MediaError {
    MediaError::Device(e.to_string())
}

fn build_error(e: cpal::BuildStreamError) -> MediaError {
    match e {
        cpal::BuildStreamError::DeviceNotAvailable => MediaError::NotFound(e.to_string()),
        other => MediaError::Device(other.to_string()),
    }
}

/// Runs `build` on a dedicated thread that keeps the stream alive until
/// the returned sender is dropped.
fn spawn_stream_thread<T, F>(name: &str, build: F) -> Result<(std_mpsc::Sender<()>, T), MediaError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<(cpal::Stream, T), MediaError> + Send + 'static,
{
    let (ready_tx, ready_rx) = std_mpsc::channel();
    let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
    std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let (stream, value) = match build() {
                Ok(built) => built,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(device_error(e)));
                return;
            }
            let _ = ready_tx.send(Ok(value));
            // Returns once the sender is dropped.
            let _ = stop_rx.recv();
            drop(stream);
        })
        .map_err(device_error)?;
    let value = ready_rx
        .recv()
        .map_err(|_| MediaError::Device("audio thread exited".into()))??;
    Ok((stop_tx, value))
}

/// Default microphone, downmixed and resampled to the session rate.
pub struct DeviceCapture {
    device_name: Option<String>,
    sample_rate: u32,
    stop: Mutex<Option<std_mpsc::Sender<()>>>,
}

impl AudioCapture for DeviceCapture {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn start(&self, mut callback: AudioCallback) -> Result<(), MediaError> {
        let device_name = self.device_name.clone();
        let target_rate = self.sample_rate;
        let (stop, ()) = spawn_stream_thread("mic", move || {
            let input = device::get_or_default_input(device_name.as_deref())
                .map_err(|e| MediaError::NotFound(format!("{e:#}")))?;
            tracing::info!("Using input device: {:?}", input.name().map_err(device_error)?);
            let default = input.default_input_config().map_err(device_error)?;
            let config = StreamConfig {
                channels: default.channels(),
                sample_rate: default.sample_rate(),
                buffer_size: BufferSize::Fixed(FrameCount::from(INPUT_CHUNK_SIZE as u32)),
            };
            tracing::info!("Input stream config: {:?}", &config);
            let channels = usize::from(config.channels);
            let device_rate = config.sample_rate.0;
            let mut resampler = if device_rate == target_rate {
                None
            } else {
                let resampler = create_resampler(
                    f64::from(device_rate),
                    f64::from(target_rate),
                    INPUT_CHUNK_SIZE,
                )
                .map_err(|e| MediaError::Device(format!("{e:#}")))?;
                Some(resampler)
            };
            let mut pending: VecDeque<f32> = VecDeque::with_capacity(INPUT_CHUNK_SIZE * 4);

            let data_fn = move |data: &[f32], _: &cpal::InputCallbackInfo| {
                pending.extend(downmix(data, channels));
                while pending.len() >= INPUT_CHUNK_SIZE {
                    let chunk: Vec<f32> = pending.drain(..INPUT_CHUNK_SIZE).collect();
                    match resampler.as_mut() {
                        None => callback(&chunk),
                        Some(resampler) => match resampler.process(&[chunk], None) {
                            Ok(out) => {
                                if let Some(mono) = out.first() {
                                    callback(mono);
                                }
                            }
                            Err(e) => tracing::warn!("failed to resample microphone block: {}", e),
                        },
                    }
                }
            };
            let stream = input
                .build_input_stream(
                    &config,
                    data_fn,
                    |err| tracing::error!("An error occurred on input stream: {}", err),
                    None,
                )
                .map_err(build_error)?;
            Ok((stream, ()))
        })?;
        let mut slot = self
            .stop
            .lock()
            .map_err(|_| MediaError::Device("capture state poisoned".into()))?;
        // Replacing drops any previous sender, which ends that stream.
        *slot = Some(stop);
        Ok(())
    }

    fn stop(&self) {
        if let Ok(mut slot) = self.stop.lock() {
            slot.take();
        }
    }
}

/// Default speaker fed from a ring buffer. The clock counts frames the
/// device has consumed, silence included.
pub struct DeviceOutput {
    sample_rate: u32,
    device_rate: u32,
    producer: Mutex<HeapProd<f32>>,
    played: Arc<AtomicU64>,
    flush: Arc<AtomicBool>,
    queued_until: Mutex<u64>,
    closed: AtomicBool,
    stop: Mutex<Option<std_mpsc::Sender<()>>>,
}

impl DeviceOutput {
    pub fn open(device_name: Option<String>, sample_rate: u32) -> Result<Self, MediaError> {
        let played = Arc::new(AtomicU64::new(0));
        let flush = Arc::new(AtomicBool::new(false));
        let (thread_played, thread_flush) = (played.clone(), flush.clone());

        let (stop, (device_rate, producer)) = spawn_stream_thread("speaker", move || {
            let output = device::get_or_default_output(device_name.as_deref())
                .map_err(|e| MediaError::NotFound(format!("{e:#}")))?;
            tracing::info!("Using output device: {:?}", output.name().map_err(device_error)?);
            let default = output.default_output_config().map_err(device_error)?;
            let config = StreamConfig {
                channels: default.channels(),
                sample_rate: default.sample_rate(),
                buffer_size: BufferSize::Fixed(FrameCount::from(OUTPUT_CHUNK_SIZE as u32)),
            };
            tracing::info!("Output stream config: {:?}", &config);
            let channels = usize::from(config.channels);
            let device_rate = config.sample_rate.0;
            let capacity = device_rate as usize * OUTPUT_LATENCY_MS / 1000;
            let (producer, mut consumer) = shared_buffer(capacity).split();

            let data_fn = move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                if thread_flush.swap(false, Ordering::SeqCst) {
                    while consumer.try_pop().is_some() {}
                }
                for frame in data.chunks_mut(channels) {
                    let sample = consumer.try_pop().unwrap_or(0.0);
                    frame.fill(sample);
                }
                thread_played.fetch_add((data.len() / channels) as u64, Ordering::SeqCst);
            };
            let stream = output
                .build_output_stream(
                    &config,
                    data_fn,
                    |err| tracing::error!("An error occurred on output stream: {}", err),
                    None,
                )
                .map_err(build_error)?;
            Ok((stream, (device_rate, producer)))
        })?;

        Ok(Self {
            sample_rate,
            device_rate,
            producer: Mutex::new(producer),
            played,
            flush,
            queued_until: Mutex::new(0),
            closed: AtomicBool::new(false),
            stop: Mutex::new(Some(stop)),
        })
    }

    fn played_frames(&self) -> u64 {
        self.played.load(Ordering::SeqCst)
    }
}

impl AudioOutput for DeviceOutput {
    fn current_time(&self) -> Duration {
        Duration::from_secs_f64(self.played_frames() as f64 / f64::from(self.device_rate))
    }

    fn schedule(&self, buffer: Arc<AudioBuffer>, start_at: Duration) -> Result<(), MediaError> {
        if self.is_closed() {
            return Err(MediaError::Device("output is closed".into()));
        }
        let samples = buffer.channel(0).unwrap_or(&[]);
        let in_rate = if buffer.sample_rate() == 0 {
            self.sample_rate
        } else {
            buffer.sample_rate()
        };
        let samples = resample(samples, in_rate, self.device_rate)
            .map_err(|e| MediaError::Device(format!("{e:#}")))?;

        let mut queued_until = self
            .queued_until
            .lock()
            .map_err(|_| MediaError::Device("output state poisoned".into()))?;
        let mut producer = self
            .producer
            .lock()
            .map_err(|_| MediaError::Device("output state poisoned".into()))?;
        let queued = (*queued_until).max(self.played_frames());
        let start = (start_at.as_secs_f64() * f64::from(self.device_rate)) as u64;
        if start > queued {
            let gap = vec![0.0; (start - queued) as usize];
            producer.push_slice(&gap);
        }
        let pushed = producer.push_slice(&samples);
        if pushed < samples.len() {
            tracing::warn!("output buffer full, dropped {} samples", samples.len() - pushed);
        }
        *queued_until = start.max(queued) + pushed as u64;
        Ok(())
    }

    fn cancel_scheduled(&self) {
        self.flush.store(true, Ordering::SeqCst);
        if let Ok(mut queued_until) = self.queued_until.lock() {
            *queued_until = self.played_frames();
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.flush.store(true, Ordering::SeqCst);
        if let Ok(mut stop) = self.stop.lock() {
            stop.take();
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
