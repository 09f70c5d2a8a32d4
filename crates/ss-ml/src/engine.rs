//! Request-level engine facade
//!
//! Wraps the separator with request validation, track analysis (tempo
//! and key on the input mix), and target post-processing (pitch shift
//! then speed change on the requested stem).

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use ss_dsp::analysis::{estimate_key, estimate_tempo};
use ss_dsp::pitch::pitch_shift;
use ss_dsp::time_stretch::time_stretch;
use ss_dsp::DspError;

use crate::error::{SeparationError, SeparationResult};
use crate::model::{FileModelProvider, ModelCache, ModelVariant};
use crate::separation::{CancelToken, SeparationConfig, Separator, StemCollection, StemRole, TargetRole};

/// One processing request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EngineRequest {
    pub variant: ModelVariant,
    pub target: TargetRole,
    /// Semitone shift applied to the target stem, in [-12, 12]
    pub pitch_semitones: i32,
    /// Playback speed applied to the target stem, in [0.5, 2.0]
    pub speed_rate: f32,
}

impl Default for EngineRequest {
    fn default() -> Self {
        Self {
            variant: ModelVariant::TwoStem,
            target: TargetRole::Vocals,
            pitch_semitones: 0,
            speed_rate: 1.0,
        }
    }
}

impl EngineRequest {
    pub fn validate(&self) -> SeparationResult<()> {
        if !(-12..=12).contains(&self.pitch_semitones) {
            return Err(SeparationError::Config {
                reason: format!(
                    "pitch_semitones must be in [-12, 12], got {}",
                    self.pitch_semitones
                ),
            });
        }
        if !(0.5..=2.0).contains(&self.speed_rate) {
            return Err(SeparationError::Config {
                reason: format!("speed_rate must be in [0.5, 2.0], got {}", self.speed_rate),
            });
        }
        // Fail impossible stem/variant combinations before any work.
        self.target.resolve(self.variant)?;
        Ok(())
    }
}

/// Everything produced for one request.
#[derive(Debug, Clone)]
pub struct EngineOutput {
    /// All stems from the separation pass, untouched
    pub stems: StemCollection,
    /// Stem the target maps to on the chosen variant
    pub target_role: StemRole,
    /// Target stem after pitch and speed post-processing
    pub target: Vec<f32>,
    /// Sample rate of `stems` and `target`
    pub sample_rate: u32,
    /// Estimated tempo of the input mix, 0 when undetectable
    pub tempo_bpm: u32,
    /// Estimated key of the input mix, e.g. "A Minor"
    pub key: String,
}

/// Top-level entry point tying analysis, separation, and
/// post-processing together.
pub struct Engine {
    separator: Separator,
}

impl Engine {
    pub fn new(config: SeparationConfig, cache: Arc<ModelCache>) -> SeparationResult<Self> {
        Ok(Self {
            separator: Separator::new(config, cache)?,
        })
    }

    /// Engine with the default configuration, loading weights from
    /// `model_dir`.
    pub fn with_model_dir(model_dir: impl Into<std::path::PathBuf>) -> SeparationResult<Self> {
        let cache = Arc::new(ModelCache::new(Arc::new(FileModelProvider::new(model_dir))));
        Self::new(SeparationConfig::default(), cache)
    }

    pub fn process(
        &self,
        waveform: &[f32],
        sample_rate: u32,
        request: &EngineRequest,
    ) -> SeparationResult<EngineOutput> {
        self.process_cancellable(waveform, sample_rate, request, &CancelToken::new())
    }

    /// Decode an uploaded file and process it in one call.
    pub fn process_bytes(
        &self,
        bytes: Vec<u8>,
        extension_hint: Option<&str>,
        request: &EngineRequest,
    ) -> SeparationResult<EngineOutput> {
        let (mix, sample_rate) = crate::audio::decode_bytes(bytes, extension_hint)?;
        self.process(&mix, sample_rate, request)
    }

    pub fn process_cancellable(
        &self,
        waveform: &[f32],
        sample_rate: u32,
        request: &EngineRequest,
        token: &CancelToken,
    ) -> SeparationResult<EngineOutput> {
        request.validate()?;

        let (tempo_bpm, key) = analyze_input(waveform, sample_rate)?;
        log::info!("input analysis: {tempo_bpm} BPM, {key}");

        let stems =
            self.separator
                .separate_cancellable(waveform, sample_rate, request.variant, token)?;

        let target_role = request.target.resolve(request.variant)?;
        let stem = stems.get(target_role).ok_or_else(|| {
            SeparationError::Internal(format!("separation produced no {target_role} stem"))
        })?;
        let out_rate = stem.sample_rate;

        // Pitch first, then speed: the pitch leg is duration-neutral, so
        // the final length depends only on the speed rate.
        let mut target = stem.samples.clone();
        if request.pitch_semitones != 0 {
            target = pitch_shift(&target, out_rate, request.pitch_semitones)?;
        }
        if request.speed_rate != 1.0 {
            target = time_stretch(&target, request.speed_rate as f64)?;
        }

        Ok(EngineOutput {
            stems,
            target_role,
            target,
            sample_rate: out_rate,
            tempo_bpm,
            key,
        })
    }
}

/// Tempo and key of the input mix.
///
/// Inputs too short for the analysis windows report the neutral
/// defaults instead of failing the whole request.
fn analyze_input(waveform: &[f32], sample_rate: u32) -> SeparationResult<(u32, String)> {
    let tempo = match estimate_tempo(waveform, sample_rate) {
        Ok(bpm) => bpm,
        Err(DspError::InvalidAudio { .. }) => 0,
        Err(e) => return Err(e.into()),
    };
    let key = match estimate_key(waveform, sample_rate) {
        Ok(key) => key,
        Err(DspError::InvalidAudio { .. }) => "C Major".to_string(),
        Err(e) => return Err(e.into()),
    };
    Ok((tempo, key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_request_validates() {
        EngineRequest::default().validate().unwrap();
    }

    #[test]
    fn rejects_out_of_range_pitch_and_speed() {
        let mut request = EngineRequest::default();
        request.pitch_semitones = 13;
        assert!(request.validate().is_err());

        let mut request = EngineRequest::default();
        request.speed_rate = 3.0;
        assert!(request.validate().is_err());

        let mut request = EngineRequest::default();
        request.speed_rate = 0.25;
        assert!(request.validate().is_err());
    }

    #[test]
    fn rejects_unreachable_targets() {
        let request = EngineRequest {
            variant: ModelVariant::TwoStem,
            target: TargetRole::Drums,
            ..Default::default()
        };
        assert!(matches!(
            request.validate(),
            Err(SeparationError::Config { .. })
        ));

        let request = EngineRequest {
            variant: ModelVariant::FourStem,
            target: TargetRole::Karaoke,
            ..Default::default()
        };
        assert!(request.validate().is_err());
    }

    #[test]
    fn short_input_analysis_reports_neutral_defaults() {
        let (bpm, key) = analyze_input(&[0.1; 512], 22050).unwrap();
        assert_eq!(bpm, 0);
        assert_eq!(key, "C Major");
    }
}
