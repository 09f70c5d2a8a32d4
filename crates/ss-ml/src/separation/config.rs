//! Separation configuration and per-variant resource budgets

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{SeparationError, SeparationResult};
use crate::model::ModelVariant;

/// Input ceiling applied before the forward transform.
///
/// Oversized input is truncated and downsampled to fit, never rejected;
/// the four-stem model gets a tighter budget because it runs four mask
/// heads over every slice.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceBudget {
    pub max_sample_rate: u32,
    pub max_duration_secs: f32,
}

impl ResourceBudget {
    pub fn for_variant(variant: ModelVariant) -> Self {
        match variant {
            ModelVariant::TwoStem => ResourceBudget {
                max_sample_rate: 22050,
                max_duration_secs: 30.0,
            },
            ModelVariant::FourStem => ResourceBudget {
                max_sample_rate: 16000,
                max_duration_secs: 20.0,
            },
        }
    }

    /// Sample count ceiling at the budget's own sample rate
    pub fn max_samples(&self) -> usize {
        (self.max_sample_rate as f32 * self.max_duration_secs) as usize
    }
}

/// Knobs for the separation pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeparationConfig {
    /// Forward transform size in samples (power of two)
    pub fft_size: usize,
    /// Hop between analysis frames in samples
    pub hop_length: usize,
    /// Time-axis width of one inference slice in frames
    pub slice_frames: usize,
    /// Frequency rows fed to the mask network; rows above this keep the
    /// topmost predicted mask value
    pub model_bins: usize,
    /// Give up on a cold model load after this long
    pub model_load_timeout: Option<Duration>,
    /// Upper bound on working-set bytes for one request
    pub max_spectrogram_bytes: usize,
}

impl Default for SeparationConfig {
    fn default() -> Self {
        Self {
            fft_size: 2048,
            hop_length: 512,
            slice_frames: 128,
            model_bins: 512,
            model_load_timeout: None,
            max_spectrogram_bytes: 256 << 20,
        }
    }
}

impl SeparationConfig {
    pub fn validate(&self) -> SeparationResult<()> {
        if !self.fft_size.is_power_of_two() || self.fft_size < 64 {
            return Err(SeparationError::Config {
                reason: format!("fft_size must be a power of two >= 64, got {}", self.fft_size),
            });
        }
        if self.hop_length == 0 || self.hop_length >= self.fft_size {
            return Err(SeparationError::Config {
                reason: format!(
                    "hop_length must be in (0, fft_size), got {}",
                    self.hop_length
                ),
            });
        }
        if self.slice_frames == 0 || self.slice_frames % 8 != 0 {
            return Err(SeparationError::Config {
                reason: format!(
                    "slice_frames must be a positive multiple of 8, got {}",
                    self.slice_frames
                ),
            });
        }
        let num_bins = self.fft_size / 2 + 1;
        if self.model_bins == 0 || self.model_bins % 8 != 0 || self.model_bins > num_bins {
            return Err(SeparationError::Config {
                reason: format!(
                    "model_bins must be a positive multiple of 8 no larger than {num_bins}, got {}",
                    self.model_bins
                ),
            });
        }
        if self.max_spectrogram_bytes == 0 {
            return Err(SeparationError::Config {
                reason: "max_spectrogram_bytes must be nonzero".into(),
            });
        }
        Ok(())
    }

    /// Budget applied to input audio for the given variant
    pub fn budget_for(&self, variant: ModelVariant) -> ResourceBudget {
        ResourceBudget::for_variant(variant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        SeparationConfig::default().validate().unwrap();
    }

    #[test]
    fn budgets_per_variant() {
        let two = ResourceBudget::for_variant(ModelVariant::TwoStem);
        assert_eq!(two.max_sample_rate, 22050);
        assert_eq!(two.max_samples(), 661_500);

        let four = ResourceBudget::for_variant(ModelVariant::FourStem);
        assert_eq!(four.max_sample_rate, 16000);
        assert_eq!(four.max_samples(), 320_000);
    }

    #[test]
    fn rejects_bad_geometry() {
        let mut config = SeparationConfig::default();
        config.fft_size = 1000;
        assert!(config.validate().is_err());

        let mut config = SeparationConfig::default();
        config.hop_length = 4096;
        assert!(config.validate().is_err());

        let mut config = SeparationConfig::default();
        config.slice_frames = 100;
        assert!(config.validate().is_err());

        let mut config = SeparationConfig::default();
        config.model_bins = 2048;
        assert!(config.validate().is_err());
    }
}
