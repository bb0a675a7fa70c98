use crate::media::{AudioOutput, MediaError};
use crate::meter;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use traffic_native_utils::audio::{self, AudioBuffer, CodecError};

#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    #[error("undecodable audio chunk: {0}")]
    Decode(#[from] CodecError),
    #[error("output is closed")]
    Closed,
    #[error(transparent)]
    Output(#[from] MediaError),
}

/// Where a chunk landed on the output clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledChunk {
    pub start: Duration,
    pub duration: Duration,
}

impl ScheduledChunk {
    pub fn end(&self) -> Duration {
        self.start + self.duration
    }
}

struct Scheduled {
    start: Duration,
    buffer: Arc<AudioBuffer>,
}

/// Queues inbound PCM chunks back to back on an output clock.
///
/// Each chunk starts at `max(next_start, now)`, so arrival order is
/// preserved and consecutive chunks neither overlap nor leave gaps unless
/// the output ran dry in between.
pub struct PlaybackScheduler {
    output: Arc<dyn AudioOutput>,
    sample_rate: u32,
    next_start: Duration,
    scheduled: VecDeque<Scheduled>,
}

impl PlaybackScheduler {
    pub fn new(output: Arc<dyn AudioOutput>, sample_rate: u32) -> Self {
        let next_start = output.current_time();
        Self {
            output,
            sample_rate,
            next_start,
            scheduled: VecDeque::new(),
        }
    }

    pub fn next_start(&self) -> Duration {
        self.next_start
    }

    /// Decodes one mono PCM16 chunk and schedules it.
    ///
    /// On error nothing is scheduled and the cursor does not move.
    pub fn enqueue(&mut self, bytes: &[u8]) -> Result<ScheduledChunk, PlaybackError> {
        if self.output.is_closed() {
            return Err(PlaybackError::Closed);
        }
        let buffer = Arc::new(audio::decode(bytes, self.sample_rate, 1)?);
        let now = self.output.current_time();
        let start = self.next_start.max(now);
        let duration = buffer.duration();

        self.output.schedule(buffer.clone(), start)?;
        self.next_start = start + duration;
        self.prune(now);
        self.scheduled.push_back(Scheduled { start, buffer });

        Ok(ScheduledChunk { start, duration })
    }

    pub fn enqueue_base64(&mut self, data: &str) -> Result<ScheduledChunk, PlaybackError> {
        let bytes = audio::from_base64(data)?;
        self.enqueue(&bytes)
    }

    /// Drops queued speech and restarts the cursor at the current clock.
    pub fn interrupt(&mut self) {
        self.output.cancel_scheduled();
        self.scheduled.clear();
        self.next_start = self.output.current_time();
    }

    /// Level of whatever is audible right now, 0..=100.
    pub fn volume(&self) -> u8 {
        let now = self.output.current_time();
        let Some(playing) = self
            .scheduled
            .iter()
            .find(|s| s.start <= now && now < s.start + s.buffer.duration())
        else {
            return 0;
        };
        let Some(samples) = playing.buffer.channel(0) else {
            return 0;
        };
        let offset = ((now - playing.start).as_secs_f64() * f64::from(self.sample_rate)) as usize;
        let end = offset.min(samples.len());
        let begin = end.saturating_sub(meter::WINDOW_SIZE);
        meter::spectrum_level(&samples[begin..end])
    }

    pub fn reset(&mut self) {
        self.next_start = Duration::ZERO;
        self.scheduled.clear();
    }

    /// Cancels pending audio and closes the output. Idempotent.
    pub fn close(&mut self) {
        if !self.output.is_closed() {
            self.output.cancel_scheduled();
            self.output.close();
        }
        self.reset();
    }

    fn prune(&mut self, now: Duration) {
        while let Some(front) = self.scheduled.front() {
            if front.start + front.buffer.duration() <= now {
                self.scheduled.pop_front();
            } else {
                break;
            }
        }
    }
}
