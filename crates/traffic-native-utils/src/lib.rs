//! Native audio helpers: the PCM16 codec used on the wire, resampling,
//! and (behind the `devices` feature) cpal device lookup.

pub mod audio;
#[cfg(feature = "devices")]
pub mod device;

pub use audio::{AudioBuffer, CodecError};
