//! Mask network, weight storage, and the resident-model cache

pub mod cache;
pub mod unet;
pub mod weights;

pub use cache::{FileModelProvider, ModelCache, ModelProvider};
pub use unet::UNet;
pub use weights::{ModelVariant, UNetWeights};

use ndarray::Array2;

use crate::error::SeparationResult;

/// Inference interface for a loaded mask model.
///
/// `mask_heads` may be smaller than the variant's stem count; the
/// missing stem is then reconstructed as the complement of the predicted
/// masks (two-stem accompaniment).
pub trait MaskPredictor: Send + Sync + std::fmt::Debug {
    /// Variant this model was trained for
    fn variant(&self) -> ModelVariant;

    /// Number of masks produced per slice
    fn mask_heads(&self) -> usize;

    /// Predict soft masks for one magnitude slice.
    ///
    /// Each returned mask has the same shape as the input, with values
    /// in [0, 1].
    fn predict_masks(&self, slice: &Array2<f32>) -> SeparationResult<Vec<Array2<f32>>>;
}
