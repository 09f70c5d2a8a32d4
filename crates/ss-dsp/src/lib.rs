//! ss-dsp: DSP layer for the SonicSplit separation engine
//!
//! Offline spectral processing for mono waveforms.
//!
//! ## Modules
//! - `stft` - Windowed short-time transform (forward/inverse, dB conversion)
//! - `resample` - Linear sample-rate conversion
//! - `time_stretch` - Phase vocoder time stretching
//! - `pitch` - Resampling-based pitch shift
//! - `analysis` - Tempo (onset autocorrelation) and key (chroma profile) estimation

pub mod analysis;
pub mod pitch;
pub mod resample;
pub mod stft;
pub mod time_stretch;

mod error;

pub use error::{DspError, DspResult};
pub use stft::{Spectrogram, Stft, to_decibel};

/// Window function used for all short-time transforms.
///
/// Periodic Hann, which satisfies the constant-overlap-add condition
/// at hop sizes of `size / 2^k`.
pub fn hann_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / size as f32).cos()))
        .collect()
}
