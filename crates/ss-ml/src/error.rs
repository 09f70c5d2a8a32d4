//! Error types for the separation engine

use thiserror::Error;

/// Separation error taxonomy.
///
/// `ResourceExhausted` is the one kind callers are expected to handle by
/// down-scoping the request (shorter clip, fewer stems); everything else
/// is terminal for the request.
#[derive(Error, Debug)]
pub enum SeparationError {
    /// Malformed or too-short input audio
    #[error("Invalid audio: {reason}")]
    InvalidAudio { reason: String },

    /// Model weights missing or corrupt
    #[error("Model unavailable: {reason}")]
    ModelUnavailable { reason: String },

    /// Memory/time budget exceeded even after down-scoping
    #[error("Resource budget exceeded: {reason}")]
    ResourceExhausted { reason: String },

    /// Numerical or shape failure inside the mask network
    #[error("Inference failed on slice {slice}: {reason}")]
    Inference { slice: usize, reason: String },

    /// Invalid request configuration
    #[error("Invalid configuration: {reason}")]
    Config { reason: String },

    /// Audio decode failed
    #[error("Decode failed: {reason}")]
    Decode { reason: String },

    /// Request cancelled between slices
    #[error("Separation cancelled")]
    Cancelled,

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ss_dsp::DspError> for SeparationError {
    fn from(err: ss_dsp::DspError) -> Self {
        match err {
            ss_dsp::DspError::InvalidAudio { reason } => SeparationError::InvalidAudio { reason },
            ss_dsp::DspError::InvalidParameter { reason } => SeparationError::Config { reason },
        }
    }
}

/// Result type for separation operations
pub type SeparationResult<T> = Result<T, SeparationError>;
