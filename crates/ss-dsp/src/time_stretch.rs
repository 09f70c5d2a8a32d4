//! Phase vocoder time stretching
//!
//! Changes playback speed without changing pitch:
//! - STFT analysis with Hann window, 75% overlap
//! - Per-bin instantaneous-frequency phase accumulation
//! - Overlap-add resynthesis at the scaled hop

use std::f32::consts::PI;
use std::sync::Arc;

use num_complex::Complex32;
use rustfft::{Fft, FftPlanner};

use crate::error::{DspError, DspResult};
use crate::hann_window;
use crate::resample::resample_to_len;

/// Default FFT size for a good quality/latency trade-off
const DEFAULT_FFT_SIZE: usize = 2048;

/// Analysis overlap factor (75% overlap)
const OVERLAP_FACTOR: usize = 4;

/// Phase vocoder for time stretching.
pub struct PhaseVocoder {
    fft_size: usize,
    hop_a: usize,
    window: Vec<f32>,
    omega: Vec<f32>,
    fft_forward: Arc<dyn Fft<f32>>,
    fft_inverse: Arc<dyn Fft<f32>>,
}

impl PhaseVocoder {
    /// Create a vocoder with the given FFT size (power of two).
    pub fn new(fft_size: usize) -> DspResult<Self> {
        if !fft_size.is_power_of_two() || fft_size < 256 {
            return Err(DspError::InvalidParameter {
                reason: format!("fft_size must be a power of two >= 256, got {fft_size}"),
            });
        }

        let hop_a = fft_size / OVERLAP_FACTOR;
        // Expected phase advance per analysis hop: 2π k hop / N
        let omega: Vec<f32> = (0..fft_size)
            .map(|k| 2.0 * PI * k as f32 * hop_a as f32 / fft_size as f32)
            .collect();

        let mut planner = FftPlanner::new();
        Ok(Self {
            fft_size,
            hop_a,
            window: hann_window(fft_size),
            omega,
            fft_forward: planner.plan_fft_forward(fft_size),
            fft_inverse: planner.plan_fft_inverse(fft_size),
        })
    }

    /// Create a vocoder with the default FFT size.
    pub fn new_default() -> Self {
        // Unwrap is fine: the default size is a valid power of two.
        Self::new(DEFAULT_FFT_SIZE).expect("default FFT size is valid")
    }

    /// Stretch input duration by `factor` (2.0 = twice as long, same pitch).
    pub fn stretch(&self, input: &[f32], factor: f64) -> Vec<f32> {
        if (factor - 1.0).abs() < f64::EPSILON {
            return input.to_vec();
        }

        let target_len = ((input.len() as f64) * factor).round().max(0.0) as usize;
        if input.len() < self.fft_size {
            // Degenerate input: too short for spectral processing.
            return resample_to_len(input, target_len);
        }

        let hop_s = ((self.hop_a as f64) * factor).round().max(1.0) as usize;
        let n = self.fft_size;
        let n_frames = (input.len() - n) / self.hop_a + 1;

        let out_alloc = (n_frames - 1) * hop_s + n;
        let mut output = vec![0.0f32; out_alloc];
        let mut window_sum = vec![0.0f32; out_alloc];

        let mut prev_phase = vec![0.0f32; n];
        let mut phase_acc = vec![0.0f32; n];
        let mut buffer = vec![Complex32::new(0.0, 0.0); n];
        let mut scratch =
            vec![Complex32::new(0.0, 0.0); self.fft_forward.get_inplace_scratch_len()];
        let rate = (hop_s as f32) / (self.hop_a as f32);

        for frame in 0..n_frames {
            let a_start = frame * self.hop_a;
            for i in 0..n {
                buffer[i] = Complex32::new(input[a_start + i] * self.window[i], 0.0);
            }
            self.fft_forward.process_with_scratch(&mut buffer, &mut scratch);

            for k in 0..n {
                let mag = buffer[k].norm();
                let phase = buffer[k].arg();

                if frame == 0 {
                    phase_acc[k] = phase;
                } else {
                    let delta = wrap_phase(phase - prev_phase[k] - self.omega[k]);
                    let instantaneous = self.omega[k] + delta;
                    phase_acc[k] = wrap_phase(phase_acc[k] + instantaneous * rate);
                }
                prev_phase[k] = phase;
                buffer[k] = Complex32::from_polar(mag, phase_acc[k]);
            }

            self.fft_inverse.process_with_scratch(&mut buffer, &mut scratch);

            let s_start = frame * hop_s;
            let norm = 1.0 / n as f32;
            for i in 0..n {
                let w = self.window[i];
                output[s_start + i] += buffer[i].re * norm * w;
                window_sum[s_start + i] += w * w;
            }
        }

        for (sample, &sum) in output.iter_mut().zip(&window_sum) {
            if sum > 1e-8 {
                *sample /= sum;
            }
        }

        output.resize(target_len, 0.0);
        output
    }
}

fn wrap_phase(phase: f32) -> f32 {
    let mut p = phase;
    while p > PI {
        p -= 2.0 * PI;
    }
    while p < -PI {
        p += 2.0 * PI;
    }
    p
}

/// Change playback speed by `rate` without changing pitch.
///
/// `rate > 1.0` is faster (shorter output); `rate == 1.0` returns the
/// input untouched.
pub fn time_stretch(waveform: &[f32], rate: f64) -> DspResult<Vec<f32>> {
    if !(rate.is_finite() && rate > 0.0) {
        return Err(DspError::InvalidParameter {
            reason: format!("stretch rate must be positive and finite, got {rate}"),
        });
    }
    if rate == 1.0 {
        return Ok(waveform.to_vec());
    }

    let vocoder = PhaseVocoder::new_default();
    Ok(vocoder.stretch(waveform, 1.0 / rate))
}
