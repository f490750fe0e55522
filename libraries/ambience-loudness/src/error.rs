//! Error types for loudness measurement

use thiserror::Error;

/// Result type for loudness operations
pub type Result<T> = std::result::Result<T, LoudnessError>;

/// Errors that can occur while measuring or normalizing
///
/// None of these reach playback callers: the normalizer degrades to a
/// neutral gain instead.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LoudnessError {
    /// Measurement window captured no signal above the silence floor
    #[error("No usable samples captured ({captured} probes, all silent)")]
    NoUsableSamples { captured: usize },

    /// Invalid meter window length
    #[error("Invalid meter window: {0} samples")]
    InvalidWindow(usize),

    /// Operation cancelled by engine teardown
    #[error("Loudness operation cancelled")]
    Cancelled,
}
