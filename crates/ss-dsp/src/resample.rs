//! Linear sample-rate conversion
//!
//! Good enough for the memory-ceiling downsampling path and for the
//! resampling leg of the pitch shifter, where the phase vocoder has
//! already done the heavy lifting.

/// Resample by an arbitrary ratio (`output_len ~= input_len * ratio`).
pub fn resample_ratio(samples: &[f32], ratio: f64) -> Vec<f32> {
    if samples.is_empty() || ratio <= 0.0 {
        return Vec::new();
    }
    if (ratio - 1.0).abs() < f64::EPSILON {
        return samples.to_vec();
    }

    let new_len = ((samples.len() as f64) * ratio).round().max(1.0) as usize;
    resample_to_len(samples, new_len)
}

/// Resample to an exact output length.
pub fn resample_to_len(samples: &[f32], new_len: usize) -> Vec<f32> {
    if samples.is_empty() || new_len == 0 {
        return Vec::new();
    }
    if new_len == samples.len() {
        return samples.to_vec();
    }

    let step = samples.len() as f64 / new_len as f64;
    let mut output = Vec::with_capacity(new_len);
    for i in 0..new_len {
        let src_pos = i as f64 * step;
        let src_idx = src_pos.floor() as usize;
        let frac = (src_pos - src_idx as f64) as f32;

        let sample = if src_idx + 1 < samples.len() {
            samples[src_idx] * (1.0 - frac) + samples[src_idx + 1] * frac
        } else {
            samples[samples.len() - 1]
        };
        output.push(sample);
    }
    output
}

/// Resample between two sample rates.
pub fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate {
        return samples.to_vec();
    }
    resample_ratio(samples, to_rate as f64 / from_rate as f64)
}
