//! Track analysis: tempo and musical key estimation
//!
//! Tempo comes from autocorrelating a spectral-flux onset envelope;
//! key from correlating a chroma (pitch-class energy) profile against
//! Krumhansl-Kessler major/minor templates in all 12 transpositions.
//!
//! Both analyzers look at a bounded prefix of the input
//! ([`ANALYSIS_MAX_SECS`]), trading accuracy on very long tracks for
//! predictable cost.

use crate::error::DspResult;
use crate::stft::Stft;

/// Maximum analyzed duration in seconds
pub const ANALYSIS_MAX_SECS: f32 = 20.0;

const TEMPO_FFT_SIZE: usize = 2048;
const TEMPO_HOP: usize = 512;
const BPM_MIN: f64 = 60.0;
const BPM_MAX: f64 = 180.0;

const KEY_FFT_SIZE: usize = 4096;
const KEY_HOP: usize = 1024;
const CHROMA_FREQ_MIN: f32 = 55.0;
const CHROMA_FREQ_MAX: f32 = 5000.0;

const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Krumhansl-Kessler major key profile (probe-tone ratings, root first)
const MAJOR_PROFILE: [f32; 12] = [
    6.35, 2.23, 3.48, 2.33, 4.38, 4.09, 2.52, 5.19, 2.39, 3.66, 2.29, 2.88,
];

/// Krumhansl-Kessler minor key profile
const MINOR_PROFILE: [f32; 12] = [
    6.33, 2.68, 3.52, 5.38, 2.60, 3.53, 2.54, 4.75, 3.98, 2.69, 3.34, 3.17,
];

fn analysis_prefix(waveform: &[f32], sample_rate: u32) -> &[f32] {
    let max_samples = (ANALYSIS_MAX_SECS * sample_rate as f32) as usize;
    &waveform[..waveform.len().min(max_samples)]
}

/// Estimate tempo in beats per minute, rounded to the nearest integer.
///
/// Returns 0 for inputs with no detectable onsets (e.g. silence).
pub fn estimate_tempo(waveform: &[f32], sample_rate: u32) -> DspResult<u32> {
    let prefix = analysis_prefix(waveform, sample_rate);

    let stft = Stft::new(TEMPO_FFT_SIZE, TEMPO_HOP)?;
    let spec = stft.forward(prefix, sample_rate)?;
    let (n_bins, n_frames) = spec.magnitude.dim();

    // Spectral flux onset envelope: positive magnitude increases per frame.
    let mut envelope = vec![0.0f32; n_frames.saturating_sub(1)];
    for t in 1..n_frames {
        let mut flux = 0.0f32;
        for bin in 0..n_bins {
            let diff = spec.magnitude[[bin, t]] - spec.magnitude[[bin, t - 1]];
            if diff > 0.0 {
                flux += diff;
            }
        }
        envelope[t - 1] = flux;
    }

    let peak = envelope.iter().fold(0.0f32, |a, &b| a.max(b));
    if peak < 1e-9 {
        log::debug!("tempo: no onsets detected, reporting 0 BPM");
        return Ok(0);
    }

    let mean = envelope.iter().sum::<f32>() / envelope.len() as f32;
    let centered: Vec<f32> = envelope.iter().map(|&v| v - mean).collect();

    let env_rate = sample_rate as f64 / TEMPO_HOP as f64;
    let lag_min = ((60.0 / BPM_MAX) * env_rate).round().max(1.0) as usize;
    let lag_max = (((60.0 / BPM_MIN) * env_rate).round() as usize).min(centered.len() - 1);
    if lag_max <= lag_min {
        log::debug!("tempo: envelope too short for the BPM search range");
        return Ok(0);
    }

    // Mean-normalized autocorrelation over the candidate lag range.
    let autocorr = |lag: usize| -> f64 {
        let terms = centered.len() - lag;
        let sum: f64 = (0..terms)
            .map(|i| centered[i] as f64 * centered[i + lag] as f64)
            .sum();
        sum / terms as f64
    };

    let mut best_lag = lag_min;
    let mut best_value = f64::NEG_INFINITY;
    for lag in lag_min..=lag_max {
        let value = autocorr(lag);
        if value > best_value {
            best_value = value;
            best_lag = lag;
        }
    }

    // Parabolic refinement around the integer peak.
    let mut refined = best_lag as f64;
    if best_lag > lag_min && best_lag < lag_max {
        let a = autocorr(best_lag - 1);
        let b = best_value;
        let c = autocorr(best_lag + 1);
        let denom = a - 2.0 * b + c;
        if denom.abs() > 1e-12 {
            let delta = (0.5 * (a - c) / denom).clamp(-1.0, 1.0);
            refined += delta;
        }
    }

    let bpm = (60.0 * env_rate / refined).clamp(BPM_MIN, BPM_MAX);
    Ok(bpm.round() as u32)
}

/// Aggregate pitch-class energy over the analyzed prefix.
pub fn chroma_profile(waveform: &[f32], sample_rate: u32) -> DspResult<[f32; 12]> {
    let prefix = analysis_prefix(waveform, sample_rate);

    let stft = Stft::new(KEY_FFT_SIZE, KEY_HOP)?;
    let spec = stft.forward(prefix, sample_rate)?;
    let (n_bins, n_frames) = spec.magnitude.dim();

    let mut chroma = [0.0f32; 12];
    for bin in 1..n_bins {
        let freq = spec.bin_frequency(bin);
        if !(CHROMA_FREQ_MIN..=CHROMA_FREQ_MAX).contains(&freq) {
            continue;
        }
        let midi = 69.0 + 12.0 * (freq / 440.0).log2();
        let pitch_class = (midi.round() as i32).rem_euclid(12) as usize;

        let mut energy = 0.0f32;
        for frame in 0..n_frames {
            energy += spec.magnitude[[bin, frame]];
        }
        chroma[pitch_class] += energy;
    }
    Ok(chroma)
}

/// Estimate the musical key, formatted as `"{pitch} {Major|Minor}"`.
///
/// Candidates are scored by Pearson correlation. Tie-break is fixed and
/// documented: roots iterate C through B, major before minor, and only a
/// strictly greater score replaces the current best - so silent or
/// degenerate input stably reports "C Major".
pub fn estimate_key(waveform: &[f32], sample_rate: u32) -> DspResult<String> {
    let chroma = chroma_profile(waveform, sample_rate)?;

    let mut best_label = format!("{} Major", NOTE_NAMES[0]);
    let mut best_score = f64::NEG_INFINITY;

    for root in 0..12 {
        for (profile, mode) in [(&MAJOR_PROFILE, "Major"), (&MINOR_PROFILE, "Minor")] {
            let score = pearson_rotated(&chroma, profile, root);
            if score > best_score {
                best_score = score;
                best_label = format!("{} {}", NOTE_NAMES[root], mode);
            }
        }
    }

    Ok(best_label)
}

/// Pearson correlation between the chroma vector and a key profile
/// transposed so its tonic sits at `root`.
fn pearson_rotated(chroma: &[f32; 12], profile: &[f32; 12], root: usize) -> f64 {
    let chroma_mean = chroma.iter().sum::<f32>() as f64 / 12.0;
    let profile_mean = profile.iter().sum::<f32>() as f64 / 12.0;

    let mut numerator = 0.0f64;
    let mut chroma_var = 0.0f64;
    let mut profile_var = 0.0f64;
    for degree in 0..12 {
        let c = chroma[(root + degree) % 12] as f64 - chroma_mean;
        let p = profile[degree] as f64 - profile_mean;
        numerator += c * p;
        chroma_var += c * c;
        profile_var += p * p;
    }

    let denom = (chroma_var * profile_var).sqrt();
    if denom < 1e-12 {
        return 0.0;
    }
    numerator / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone_mix(freqs: &[f32], len: usize, sample_rate: f32) -> Vec<f32> {
        (0..len)
            .map(|i| {
                let t = i as f32 / sample_rate;
                freqs
                    .iter()
                    .map(|f| (2.0 * std::f32::consts::PI * f * t).sin())
                    .sum::<f32>()
                    / freqs.len() as f32
            })
            .collect()
    }

    fn click_track(bpm: f64, secs: f32, sample_rate: u32) -> Vec<f32> {
        let len = (secs * sample_rate as f32) as usize;
        let period = (60.0 / bpm * sample_rate as f64) as usize;
        let mut out = vec![0.0f32; len];
        let mut pos = 0;
        while pos < len {
            for i in 0..256.min(len - pos) {
                let decay = (-(i as f32) / 64.0).exp();
                out[pos + i] =
                    decay * (2.0 * std::f32::consts::PI * 1000.0 * i as f32 / sample_rate as f32)
                        .sin();
            }
            pos += period;
        }
        out
    }

    #[test]
    fn c_major_chord_reports_c_major() {
        // C4, E4, G4
        let input = tone_mix(&[261.63, 329.63, 392.0], 5 * 22050, 22050.0);
        let key = estimate_key(&input, 22050).unwrap();
        assert_eq!(key, "C Major");
    }

    #[test]
    fn a_minor_chord_reports_a_minor() {
        // A3, C4, E4
        let input = tone_mix(&[220.0, 261.63, 329.63], 5 * 22050, 22050.0);
        let key = estimate_key(&input, 22050).unwrap();
        assert_eq!(key, "A Minor");
    }

    #[test]
    fn silence_tie_breaks_to_c_major() {
        let input = vec![0.0f32; 4 * 22050];
        let key = estimate_key(&input, 22050).unwrap();
        assert_eq!(key, "C Major");
    }

    #[test]
    fn click_track_tempo_near_target() {
        let input = click_track(120.0, 12.0, 22050);
        let bpm = estimate_tempo(&input, 22050).unwrap();
        assert!(
            (114..=126).contains(&bpm),
            "expected ~120 BPM, got {bpm}"
        );
    }

    #[test]
    fn silence_reports_zero_bpm() {
        let input = vec![0.0f32; 4 * 22050];
        assert_eq!(estimate_tempo(&input, 22050).unwrap(), 0);
    }

    #[test]
    fn chroma_peaks_on_played_pitch_classes() {
        let input = tone_mix(&[261.63, 329.63, 392.0], 4 * 22050, 22050.0);
        let chroma = chroma_profile(&input, 22050).unwrap();

        // C (0), E (4), G (7) should dominate the remaining classes.
        let played = chroma[0].min(chroma[4]).min(chroma[7]);
        for (pc, &value) in chroma.iter().enumerate() {
            if ![0, 4, 7].contains(&pc) {
                assert!(value < played, "pitch class {pc} unexpectedly strong");
            }
        }
    }
}
