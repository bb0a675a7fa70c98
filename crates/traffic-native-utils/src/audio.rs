use base64::Engine;
use ringbuf::HeapRb;
use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use std::time::Duration;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("PCM16 payload has odd length {0}")]
    OddLength(usize),
    #[error("{samples} samples cannot be split into {channels} channel(s) at {sample_rate} Hz")]
    ChannelMismatch {
        samples: usize,
        channels: usize,
        sample_rate: u32,
    },
    #[error("invalid base64: {0}")]
    Base64(String),
}

/// Decoded audio, one `Vec` of normalized samples per channel.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    sample_rate: u32,
    channels: Vec<Vec<f32>>,
}

impl AudioBuffer {
    pub fn new(sample_rate: u32, channels: Vec<Vec<f32>>) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    pub fn mono(sample_rate: u32, samples: Vec<f32>) -> Self {
        Self::new(sample_rate, vec![samples])
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> &[Vec<f32>] {
        &self.channels
    }

    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.channels.get(index).map(Vec::as_slice)
    }

    /// Number of sample frames (samples per channel).
    pub fn frames(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frames() as f64 / f64::from(self.sample_rate))
    }

    pub fn is_empty(&self) -> bool {
        self.frames() == 0
    }
}

/// Maps float samples to 16-bit little-endian PCM.
///
/// Non-finite input becomes silence; everything else is clamped to
/// `[-1.0, 1.0]`, scaled by 32768 and saturated to the `i16` range.
pub fn encode(samples: &[f32]) -> Vec<u8> {
    samples.to_binary()
}

/// Maps 16-bit little-endian PCM back to floats (`i16 / 32768`),
/// de-interleaving `channels` channels.
pub fn decode(bytes: &[u8], sample_rate: u32, channels: usize) -> Result<AudioBuffer, CodecError> {
    if bytes.len() % 2 != 0 {
        return Err(CodecError::OddLength(bytes.len()));
    }
    let samples = bytes.len() / 2;
    if channels == 0 || sample_rate == 0 || samples % channels != 0 {
        return Err(CodecError::ChannelMismatch {
            samples,
            channels,
            sample_rate,
        });
    }

    let frames = samples / channels;
    let mut out = vec![Vec::with_capacity(frames); channels];
    for (i, pair) in bytes.chunks_exact(2).enumerate() {
        let v = i16::from_le_bytes([pair[0], pair[1]]);
        out[i % channels].push(f32::from(v) / 32768.0);
    }
    Ok(AudioBuffer::new(sample_rate, out))
}

pub fn to_base64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

pub fn from_base64(text: &str) -> Result<Vec<u8>, CodecError> {
    base64::engine::general_purpose::STANDARD
        .decode(text)
        .map_err(|e| CodecError::Base64(e.to_string()))
}

/// Encodes float samples straight to the base64 text carried in
/// `realtimeInput.audio`.
pub fn encode_base64(samples: &[f32]) -> String {
    to_base64(&encode(samples))
}

/// Creates a resampler to convert between audio sample rates.
pub fn create_resampler(
    in_sampling_rate: f64,
    out_sampling_rate: f64,
    chunk_size: usize,
) -> anyhow::Result<FastFixedIn<f32>> {
    let resampler = FastFixedIn::<f32>::new(
        out_sampling_rate / in_sampling_rate,
        1.0,
        PolynomialDegree::Cubic,
        chunk_size,
        1,
    )?;
    Ok(resampler)
}

/// Resamples a whole mono signal. Returns the input untouched when the
/// rates already match.
pub fn resample(samples: &[f32], in_rate: u32, out_rate: u32) -> anyhow::Result<Vec<f32>> {
    if in_rate == out_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }
    let chunk_size = 1024;
    let mut resampler = create_resampler(f64::from(in_rate), f64::from(out_rate), chunk_size)?;
    let expected = (samples.len() as f64 * f64::from(out_rate) / f64::from(in_rate)).round() as usize;

    let mut out = Vec::with_capacity(expected + chunk_size);
    for chunk in split_for_chunks(samples, chunk_size) {
        let processed = resampler.process(&[chunk], None)?;
        if let Some(channel) = processed.into_iter().next() {
            out.extend(channel);
        }
    }
    out.truncate(expected);
    Ok(out)
}

/// Splits a slice of audio samples into fixed-size chunks, zero-padding
/// the last one.
pub fn split_for_chunks(samples: &[f32], chunk_size: usize) -> Vec<Vec<f32>> {
    samples
        .chunks(chunk_size)
        .map(|chunk| {
            let mut chunk = chunk.to_vec();
            chunk.resize(chunk_size, 0.0);
            chunk
        })
        .collect()
}

/// Averages interleaved frames down to one channel.
pub fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Creates a new ring buffer on the heap for shared audio data.
pub fn shared_buffer(size: usize) -> HeapRb<f32> {
    HeapRb::new(size)
}

/// Conversion of sample slices to little-endian PCM16 bytes.
pub trait ToBinary {
    fn to_binary(&self) -> Vec<u8>;
}

impl ToBinary for [i16] {
    fn to_binary(&self) -> Vec<u8> {
        self.iter().flat_map(|&sample| sample.to_le_bytes()).collect()
    }
}

impl ToBinary for [f32] {
    fn to_binary(&self) -> Vec<u8> {
        self.iter()
            .flat_map(|&sample| quantize(sample).to_le_bytes())
            .collect()
    }
}

fn quantize(sample: f32) -> i16 {
    if !sample.is_finite() {
        return 0;
    }
    let scaled = sample.clamp(-1.0, 1.0) * 32768.0;
    scaled.clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16
}
