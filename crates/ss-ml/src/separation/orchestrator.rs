//! Separation orchestrator
//!
//! Drives one request end to end: budget the input, fetch the model,
//! transform to a magnitude/phase spectrogram, run the mask network
//! over fixed-width slices in parallel, reassemble full-length masks,
//! and invert each masked spectrogram back to samples with the mix's
//! original phase.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ndarray::{s, Array2};
use rayon::prelude::*;

use ss_dsp::resample::resample_linear;
use ss_dsp::Stft;

use crate::error::{SeparationError, SeparationResult};
use crate::model::{MaskPredictor, ModelCache, ModelVariant};
use crate::separation::config::{ResourceBudget, SeparationConfig};
use crate::separation::stems::{StemCollection, StemOutput, StemRole};

/// Cooperative cancellation flag, checked between pipeline stages and
/// between inference slices.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    fn check(&self) -> SeparationResult<()> {
        if self.is_cancelled() {
            Err(SeparationError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Runs separation requests against a shared model cache.
pub struct Separator {
    config: SeparationConfig,
    cache: Arc<ModelCache>,
}

impl Separator {
    pub fn new(config: SeparationConfig, cache: Arc<ModelCache>) -> SeparationResult<Self> {
        config.validate()?;
        Ok(Self { config, cache })
    }

    pub fn config(&self) -> &SeparationConfig {
        &self.config
    }

    /// Separate a mono mix into the variant's stems.
    pub fn separate(
        &self,
        waveform: &[f32],
        sample_rate: u32,
        variant: ModelVariant,
    ) -> SeparationResult<StemCollection> {
        self.separate_cancellable(waveform, sample_rate, variant, &CancelToken::new())
    }

    /// Like [`separate`](Self::separate), aborting with `Cancelled` as
    /// soon as the token trips.
    pub fn separate_cancellable(
        &self,
        waveform: &[f32],
        sample_rate: u32,
        variant: ModelVariant,
        token: &CancelToken,
    ) -> SeparationResult<StemCollection> {
        if waveform.is_empty() {
            return Err(SeparationError::InvalidAudio {
                reason: "empty input".into(),
            });
        }
        if sample_rate == 0 {
            return Err(SeparationError::InvalidAudio {
                reason: "sample rate must be nonzero".into(),
            });
        }
        token.check()?;

        let budget = self.config.budget_for(variant);
        let (audio, rate) = apply_budget(waveform, sample_rate, budget);
        log::debug!(
            "separate: {} samples @ {rate} Hz, variant {variant}",
            audio.len()
        );

        let model = match self.config.model_load_timeout {
            Some(timeout) => self.cache.get_or_load_timeout(variant, timeout)?,
            None => self.cache.get_or_load(variant)?,
        };
        if model.variant() != variant {
            return Err(SeparationError::Internal(format!(
                "cache returned a {} model for a {variant} request",
                model.variant()
            )));
        }
        let stem_count = variant.stem_count();
        let heads = model.mask_heads();
        if heads != stem_count && heads + 1 != stem_count {
            return Err(SeparationError::Internal(format!(
                "{variant} model exposes {heads} mask heads for {stem_count} stems"
            )));
        }
        token.check()?;

        let stft = Stft::new(self.config.fft_size, self.config.hop_length)?;
        let spec = stft.forward(&audio, rate)?;
        let (n_bins, n_frames) = spec.magnitude.dim();

        // Working set: magnitude + phase for the mix, one mask per stem.
        let estimated = n_bins * n_frames * 4 * (stem_count + 2);
        if estimated > self.config.max_spectrogram_bytes {
            return Err(SeparationError::ResourceExhausted {
                reason: format!(
                    "request needs ~{estimated} spectrogram bytes, limit is {}",
                    self.config.max_spectrogram_bytes
                ),
            });
        }
        token.check()?;

        let slice_frames = self.config.slice_frames;
        let model_bins = self.config.model_bins.min(n_bins);
        let n_slices = n_frames.div_ceil(slice_frames);
        log::debug!("separate: {n_bins}x{n_frames} spectrogram, {n_slices} slices");

        // Per-slice inference, order preserved by indexed collect.
        let per_slice: Vec<Vec<Array2<f32>>> = (0..n_slices)
            .into_par_iter()
            .map(|idx| {
                token.check()?;
                let start = idx * slice_frames;
                let take = (n_frames - start).min(slice_frames);

                // Crop to the trained frequency range, zero-pad the tail
                // slice out to full width.
                let mut slice = Array2::zeros((model_bins, slice_frames));
                slice
                    .slice_mut(s![.., 0..take])
                    .assign(&spec.magnitude.slice(s![0..model_bins, start..start + take]));

                let masks = model.predict_masks(&slice).map_err(|e| match e {
                    SeparationError::Inference { reason, .. } => {
                        SeparationError::Inference { slice: idx, reason }
                    }
                    other => other,
                })?;
                if masks.len() != heads {
                    return Err(SeparationError::Inference {
                        slice: idx,
                        reason: format!("model returned {} masks, expected {heads}", masks.len()),
                    });
                }
                Ok(masks)
            })
            .collect::<SeparationResult<_>>()?;
        token.check()?;

        let head_masks: Vec<Array2<f32>> = (0..heads)
            .map(|h| assemble_mask(&per_slice, h, n_bins, n_frames, model_bins, slice_frames))
            .collect();

        let mut stems = StemCollection::new();
        for (i, &role) in StemRole::for_variant(variant).iter().enumerate() {
            token.check()?;
            let masked = if i < heads {
                &spec.magnitude * &head_masks[i]
            } else {
                // Residual stem: whatever the predicted masks left behind.
                &spec.magnitude * &head_masks[0].mapv(|v| 1.0 - v)
            };
            let samples = stft.inverse(&masked, &spec.phase, audio.len())?;
            stems.insert(StemOutput {
                role,
                samples,
                sample_rate: rate,
            });
        }

        log::debug!("separate: produced {} stems", stems.len());
        Ok(stems)
    }
}

/// Truncate then downsample the input to fit the variant's budget.
fn apply_budget(waveform: &[f32], sample_rate: u32, budget: ResourceBudget) -> (Vec<f32>, u32) {
    let max_input = (budget.max_duration_secs * sample_rate as f32) as usize;
    let truncated = if waveform.len() > max_input {
        log::info!(
            "truncating input from {} to {max_input} samples ({}s budget)",
            waveform.len(),
            budget.max_duration_secs
        );
        &waveform[..max_input]
    } else {
        waveform
    };

    if sample_rate > budget.max_sample_rate {
        log::info!(
            "downsampling input from {sample_rate} to {} Hz",
            budget.max_sample_rate
        );
        (
            resample_linear(truncated, sample_rate, budget.max_sample_rate),
            budget.max_sample_rate,
        )
    } else {
        (truncated.to_vec(), sample_rate)
    }
}

/// Stitch per-slice masks for one head into a full-spectrogram mask.
///
/// Rows at or above the model's trained range reuse the topmost
/// predicted row rather than defaulting to pass-through or silence.
fn assemble_mask(
    per_slice: &[Vec<Array2<f32>>],
    head: usize,
    n_bins: usize,
    n_frames: usize,
    model_bins: usize,
    slice_frames: usize,
) -> Array2<f32> {
    let mut mask = Array2::zeros((n_bins, n_frames));
    for (idx, masks) in per_slice.iter().enumerate() {
        let start = idx * slice_frames;
        let take = (n_frames - start).min(slice_frames);
        mask.slice_mut(s![0..model_bins, start..start + take])
            .assign(&masks[head].slice(s![.., 0..take]));
    }
    if model_bins < n_bins {
        let top = mask.row(model_bins - 1).to_owned();
        for row in model_bins..n_bins {
            mask.row_mut(row).assign(&top);
        }
    }
    mask
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_truncates_then_downsamples() {
        let budget = ResourceBudget {
            max_sample_rate: 8000,
            max_duration_secs: 2.0,
        };
        let input = vec![0.1f32; 16000 * 10];
        let (out, rate) = apply_budget(&input, 16000, budget);
        assert_eq!(rate, 8000);
        assert_eq!(out.len(), 16000); // 2 s at 8 kHz
    }

    #[test]
    fn budget_passes_compliant_input_through() {
        let budget = ResourceBudget {
            max_sample_rate: 22050,
            max_duration_secs: 30.0,
        };
        let input = vec![0.5f32; 22050];
        let (out, rate) = apply_budget(&input, 22050, budget);
        assert_eq!(rate, 22050);
        assert_eq!(out, input);
    }

    #[test]
    fn assembled_mask_replicates_top_row_and_trims_padding() {
        // Two slices of 4 frames each covering 6 real frames, 2 model
        // rows under a 4-row spectrogram.
        let slice_a = Array2::from_elem((2, 4), 0.25f32);
        let mut slice_b = Array2::from_elem((2, 4), 0.75f32);
        slice_b[[1, 0]] = 0.5;
        let per_slice = vec![vec![slice_a], vec![slice_b]];

        let mask = assemble_mask(&per_slice, 0, 4, 6, 2, 4);
        assert_eq!(mask.dim(), (4, 6));
        assert_eq!(mask[[0, 0]], 0.25);
        assert_eq!(mask[[1, 4]], 0.5);
        // Rows 2 and 3 copy row 1.
        assert_eq!(mask[[2, 4]], 0.5);
        assert_eq!(mask[[3, 5]], mask[[1, 5]]);
    }

    #[test]
    fn cancel_token_trips_once() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
        assert!(matches!(token.check(), Err(SeparationError::Cancelled)));
    }
}
