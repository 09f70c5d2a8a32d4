//! Error types for DSP processing

use thiserror::Error;

/// DSP error types
#[derive(Error, Debug)]
pub enum DspError {
    /// Input waveform is unusable (empty, too short, non-finite)
    #[error("Invalid audio: {reason}")]
    InvalidAudio { reason: String },

    /// Transform or effect parameter out of range
    #[error("Invalid parameter: {reason}")]
    InvalidParameter { reason: String },
}

/// Result type for DSP operations
pub type DspResult<T> = Result<T, DspError>;
