//! Learned spectral-masking source separation
//!
//! Splits a mono mix into stems by predicting soft frequency masks with
//! a small U-Net, applying them to the mix's magnitude spectrogram, and
//! inverting with the original phase. On top of the separation pipeline
//! sit a resident-model cache, per-variant resource budgets, and a
//! request engine that adds input analysis (tempo, key) and target stem
//! post-processing (pitch shift, speed change).
//!
//! Typical use:
//!
//! ```no_run
//! use ss_ml::{Engine, EngineRequest};
//!
//! # fn main() -> Result<(), ss_ml::SeparationError> {
//! let engine = Engine::with_model_dir("models")?;
//! let (mix, sample_rate) = ss_ml::audio::decode_file("mix.mp3")?;
//! let output = engine.process(&mix, sample_rate, &EngineRequest::default())?;
//! println!("{} BPM, {}", output.tempo_bpm, output.key);
//! # Ok(())
//! # }
//! ```

pub mod audio;
pub mod engine;
pub mod error;
pub mod model;
pub mod separation;

pub use engine::{Engine, EngineOutput, EngineRequest};
pub use error::{SeparationError, SeparationResult};
pub use model::{FileModelProvider, MaskPredictor, ModelCache, ModelProvider, ModelVariant, UNet, UNetWeights};
pub use separation::{
    CancelToken, ResourceBudget, SeparationConfig, Separator, StemCollection, StemOutput,
    StemRole, TargetRole,
};
