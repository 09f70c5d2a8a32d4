//! Resampling-based pitch shift
//!
//! Stretches time with the phase vocoder, then resamples back to the
//! original duration. The resample leg transposes the spectrum; the
//! vocoder leg compensates the duration change.

use crate::error::{DspError, DspResult};
use crate::resample::resample_to_len;
use crate::time_stretch::PhaseVocoder;

/// Shift pitch by a signed number of semitones without changing duration.
///
/// `semitones == 0` returns the input untouched. The musically useful
/// range is [-12, 12]; larger values are rejected.
pub fn pitch_shift(waveform: &[f32], sample_rate: u32, semitones: i32) -> DspResult<Vec<f32>> {
    if !(-12..=12).contains(&semitones) {
        return Err(DspError::InvalidParameter {
            reason: format!("semitones must be in [-12, 12], got {semitones}"),
        });
    }
    if semitones == 0 {
        return Ok(waveform.to_vec());
    }
    if sample_rate == 0 {
        return Err(DspError::InvalidParameter {
            reason: "sample_rate must be nonzero".into(),
        });
    }

    let factor = 2.0f64.powf(semitones as f64 / 12.0);

    // Stretch duration by the pitch factor, then resample back to the
    // original length. Playing the shorter/longer buffer at the original
    // rate transposes every partial by `factor`.
    let vocoder = PhaseVocoder::new_default();
    let stretched = vocoder.stretch(waveform, factor);
    Ok(resample_to_len(&stretched, waveform.len()))
}
