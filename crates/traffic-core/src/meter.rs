//! Cosmetic output level meter.
//!
//! Mirrors the browser analyser convention: a windowed spectrum whose bin
//! magnitudes are mapped from decibels onto a byte range, then averaged.

use std::f32::consts::PI;

/// Samples inspected per reading.
pub const WINDOW_SIZE: usize = 256;

const MIN_DECIBELS: f32 = -100.0;
const MAX_DECIBELS: f32 = -30.0;

/// Level of `window` on a 0..=100 scale.
pub fn spectrum_level(window: &[f32]) -> u8 {
    let n = window.len();
    if n < 2 {
        return 0;
    }
    let windowed: Vec<f32> = window
        .iter()
        .enumerate()
        .map(|(i, x)| {
            let w = 0.5 * (1.0 - (2.0 * PI * i as f32 / (n - 1) as f32).cos());
            if x.is_finite() {
                x * w
            } else {
                0.0
            }
        })
        .collect();

    let bins = n / 2;
    let mut total = 0.0f32;
    for k in 0..bins {
        let (mut re, mut im) = (0.0f32, 0.0f32);
        for (i, x) in windowed.iter().enumerate() {
            let phase = 2.0 * PI * (k * i) as f32 / n as f32;
            re += x * phase.cos();
            im -= x * phase.sin();
        }
        let magnitude = (re * re + im * im).sqrt() / n as f32;
        total += to_byte(magnitude);
    }
    let average = total / bins as f32;
    (average / 255.0 * 100.0).round().clamp(0.0, 100.0) as u8
}

fn to_byte(magnitude: f32) -> f32 {
    if magnitude <= 0.0 {
        return 0.0;
    }
    let db = 20.0 * magnitude.log10();
    let scaled = (db - MIN_DECIBELS) / (MAX_DECIBELS - MIN_DECIBELS) * 255.0;
    scaled.clamp(0.0, 255.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(amplitude: f32) -> Vec<f32> {
        (0..WINDOW_SIZE)
            .map(|i| amplitude * (2.0 * PI * 440.0 * i as f32 / 24_000.0).sin())
            .collect()
    }

    #[test]
    fn silence_reads_zero() {
        assert_eq!(spectrum_level(&[0.0; WINDOW_SIZE]), 0);
        assert_eq!(spectrum_level(&[]), 0);
    }

    #[test]
    fn louder_reads_higher() {
        let quiet = spectrum_level(&tone(0.01));
        let loud = spectrum_level(&tone(0.9));
        assert!(loud > quiet, "loud {loud} quiet {quiet}");
        assert!(loud <= 100);
    }
}
