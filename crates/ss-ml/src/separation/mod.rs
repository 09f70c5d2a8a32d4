//! Spectral-mask source separation

pub mod config;
pub mod orchestrator;
pub mod stems;

pub use config::{ResourceBudget, SeparationConfig};
pub use orchestrator::{CancelToken, Separator};
pub use stems::{StemCollection, StemOutput, StemRole, TargetRole};
