//! Windowed short-time transform
//!
//! Forward analysis produces a magnitude/phase pair; inverse synthesis
//! reconstructs a waveform by overlap-add. Magnitude times phase is the
//! original complex spectrum, so an unmodified round trip reproduces the
//! input within numerical tolerance.

use std::sync::Arc;

use ndarray::Array2;
use num_complex::Complex32;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};

use crate::error::{DspError, DspResult};
use crate::hann_window;

/// Magnitude below this is treated as silence when extracting phase.
const PHASE_EPSILON: f32 = 1e-12;

/// Time-frequency representation of a mono waveform.
///
/// Shape is `(fft_size / 2 + 1, n_frames)` for both planes. Phase entries
/// are unit-magnitude complex numbers.
#[derive(Debug, Clone)]
pub struct Spectrogram {
    /// Non-negative magnitude plane
    pub magnitude: Array2<f32>,
    /// Unit-magnitude phase plane, retained for reconstruction
    pub phase: Array2<Complex32>,
    /// FFT size used by the analysis
    pub fft_size: usize,
    /// Hop length in samples
    pub hop_length: usize,
    /// Sample rate of the analyzed waveform
    pub sample_rate: u32,
    /// Length of the analyzed waveform in samples
    pub num_samples: usize,
}

impl Spectrogram {
    /// Number of frequency bins
    pub fn num_bins(&self) -> usize {
        self.magnitude.nrows()
    }

    /// Number of time frames
    pub fn num_frames(&self) -> usize {
        self.magnitude.ncols()
    }

    /// Frequency in Hz of a given bin
    pub fn bin_frequency(&self, bin: usize) -> f32 {
        bin as f32 * self.sample_rate as f32 / self.fft_size as f32
    }
}

/// Short-time transform with cached FFT plans and a Hann window.
pub struct Stft {
    fft_size: usize,
    hop_length: usize,
    window: Vec<f32>,
    fft_forward: Arc<dyn RealToComplex<f32>>,
    fft_inverse: Arc<dyn ComplexToReal<f32>>,
}

impl Stft {
    /// Create a transform.
    ///
    /// `fft_size` must be a power of two and `hop_length` must be smaller
    /// than `fft_size`.
    pub fn new(fft_size: usize, hop_length: usize) -> DspResult<Self> {
        if !fft_size.is_power_of_two() || fft_size < 64 {
            return Err(DspError::InvalidParameter {
                reason: format!("fft_size must be a power of two >= 64, got {fft_size}"),
            });
        }
        if hop_length == 0 || hop_length >= fft_size {
            return Err(DspError::InvalidParameter {
                reason: format!("hop_length must be in 1..fft_size, got {hop_length}"),
            });
        }

        let mut planner = RealFftPlanner::new();
        Ok(Self {
            fft_size,
            hop_length,
            window: hann_window(fft_size),
            fft_forward: planner.plan_fft_forward(fft_size),
            fft_inverse: planner.plan_fft_inverse(fft_size),
        })
    }

    /// FFT size in samples
    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Hop length in samples
    pub fn hop_length(&self) -> usize {
        self.hop_length
    }

    /// Number of frequency bins produced by `forward`
    pub fn num_bins(&self) -> usize {
        self.fft_size / 2 + 1
    }

    /// Forward transform: waveform -> magnitude + phase.
    ///
    /// The waveform is zero-padded by half a window on both edges before
    /// framing, so `inverse` can reconstruct the edges exactly.
    pub fn forward(&self, waveform: &[f32], sample_rate: u32) -> DspResult<Spectrogram> {
        if waveform.is_empty() {
            return Err(DspError::InvalidAudio {
                reason: "empty waveform".into(),
            });
        }
        if waveform.len() < self.fft_size {
            return Err(DspError::InvalidAudio {
                reason: format!(
                    "waveform shorter than one analysis window ({} < {})",
                    waveform.len(),
                    self.fft_size
                ),
            });
        }

        let pad = self.fft_size / 2;
        let mut padded = vec![0.0f32; waveform.len() + 2 * pad];
        padded[pad..pad + waveform.len()].copy_from_slice(waveform);

        let n_frames = (padded.len() - self.fft_size) / self.hop_length + 1;
        let n_bins = self.num_bins();

        let mut magnitude = Array2::<f32>::zeros((n_bins, n_frames));
        let mut phase = Array2::<Complex32>::from_elem((n_bins, n_frames), Complex32::new(1.0, 0.0));

        let mut input = vec![0.0f32; self.fft_size];
        let mut spectrum = vec![Complex32::new(0.0, 0.0); n_bins];
        let mut scratch = vec![Complex32::new(0.0, 0.0); self.fft_forward.get_scratch_len()];

        for frame in 0..n_frames {
            let start = frame * self.hop_length;
            for (i, &sample) in padded[start..start + self.fft_size].iter().enumerate() {
                input[i] = sample * self.window[i];
            }

            self.fft_forward
                .process_with_scratch(&mut input, &mut spectrum, &mut scratch)
                .map_err(|e| DspError::InvalidAudio {
                    reason: format!("forward FFT failed: {e}"),
                })?;

            for (bin, &value) in spectrum.iter().enumerate() {
                let mag = value.norm();
                magnitude[[bin, frame]] = mag;
                if mag > PHASE_EPSILON {
                    phase[[bin, frame]] = value / mag;
                }
            }
        }

        Ok(Spectrogram {
            magnitude,
            phase,
            fft_size: self.fft_size,
            hop_length: self.hop_length,
            sample_rate,
            num_samples: waveform.len(),
        })
    }

    /// Inverse transform: masked magnitude + original phase -> waveform.
    ///
    /// Overlap-add synthesis with squared-window-sum normalization;
    /// `original_len` trims the edge padding added by `forward`.
    pub fn inverse(
        &self,
        magnitude: &Array2<f32>,
        phase: &Array2<Complex32>,
        original_len: usize,
    ) -> DspResult<Vec<f32>> {
        if magnitude.dim() != phase.dim() {
            return Err(DspError::InvalidParameter {
                reason: format!(
                    "magnitude shape {:?} does not match phase shape {:?}",
                    magnitude.dim(),
                    phase.dim()
                ),
            });
        }
        let (n_bins, n_frames) = magnitude.dim();
        if n_bins != self.num_bins() {
            return Err(DspError::InvalidParameter {
                reason: format!("expected {} bins, got {n_bins}", self.num_bins()),
            });
        }

        let pad = self.fft_size / 2;
        let padded_len = original_len + 2 * pad;
        let mut output = vec![0.0f32; padded_len];
        let mut window_sum = vec![0.0f32; padded_len];

        let mut spectrum = vec![Complex32::new(0.0, 0.0); n_bins];
        let mut frame_out = vec![0.0f32; self.fft_size];
        let mut scratch = vec![Complex32::new(0.0, 0.0); self.fft_inverse.get_scratch_len()];
        let norm = 1.0 / self.fft_size as f32;

        for frame in 0..n_frames {
            let start = frame * self.hop_length;
            if start + self.fft_size > padded_len {
                break;
            }

            for bin in 0..n_bins {
                spectrum[bin] = phase[[bin, frame]] * magnitude[[bin, frame]];
            }
            // Real transforms require purely real DC and Nyquist bins.
            spectrum[0].im = 0.0;
            spectrum[n_bins - 1].im = 0.0;

            self.fft_inverse
                .process_with_scratch(&mut spectrum, &mut frame_out, &mut scratch)
                .map_err(|e| DspError::InvalidParameter {
                    reason: format!("inverse FFT failed: {e}"),
                })?;

            for (i, &sample) in frame_out.iter().enumerate() {
                let w = self.window[i];
                output[start + i] += sample * norm * w;
                window_sum[start + i] += w * w;
            }
        }

        for (sample, &sum) in output.iter_mut().zip(&window_sum) {
            if sum > 1e-8 {
                *sample /= sum;
            }
        }

        Ok(output[pad..pad + original_len].to_vec())
    }
}

/// Log-compress a magnitude plane to decibels.
///
/// Display/analysis only; never fed back into reconstruction.
pub fn to_decibel(magnitude: &Array2<f32>) -> Array2<f32> {
    magnitude.mapv(|m| 20.0 * m.max(1e-10).log10())
}
