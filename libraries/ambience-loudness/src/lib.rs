//! Loudness measurement and gain compensation for Ambience
//!
//! Scheduled content (ads, announcements) is mastered at wildly different
//! levels than the music bed. This crate measures both and computes the
//! gain that brings injected content to loudness parity with the bed.
//!
//! - RMS level measurement over a sliding window ([`LevelMeter`])
//! - Rolling reference level of the music bed ([`LoudnessNormalizer`])
//! - Gain computation clamped to [`MIN_GAIN`]..=[`MAX_GAIN`]
//! - Smoothed gain ramps, never instantaneous jumps ([`ramp_gain`])
//! - Dedicated and reused gain-stage normalization runs
//!
//! # Architecture
//!
//! ```text
//! During music playback:
//! ┌─────────────┐     ┌──────────────┐     ┌────────────────────┐
//! │ Bed samples │ ──► │  LevelMeter  │ ──► │ reference (avg 10) │
//! └─────────────┘     └──────────────┘     └────────────────────┘
//!
//! During injection:
//! ┌─────────────┐     ┌──────────────┐     ┌───────────────┐
//! │ Item probe  │ ──► │ 600ms window │ ──► │ gain ramp     │
//! └─────────────┘     └──────────────┘     └───────────────┘
//! ```
//!
//! # Example
//!
//! ```rust
//! use ambience_loudness::{LoudnessNormalizer, measure_level};
//!
//! let mut normalizer = LoudnessNormalizer::default();
//! normalizer.record_music_level(measure_level(&[0.2, -0.2, 0.2, -0.2]));
//!
//! // Quiet content gets boosted toward the bed level
//! let gain = normalizer.compute_gain(0.1);
//! assert!((gain - 2.0).abs() < 1e-4);
//! ```

#![deny(unsafe_code)]

mod error;
mod gain;
mod meter;
mod normalizer;

pub use error::{LoudnessError, Result};
pub use gain::{clamp_gain, ramp_gain, GainStage, LevelProbe};
pub use meter::{measure_level, LevelMeter};
pub use normalizer::{
    LoudnessNormalizer, NormalizationOutcome, NormalizationRequest, NormalizerConfig,
    ReusedGainStage,
};

/// Reference loudness (linear RMS) used before any music has been measured
pub const TARGET_LEVEL: f32 = 0.15;

/// Lowest compensating gain ever applied
pub const MIN_GAIN: f32 = 0.5;

/// Highest compensating gain ever applied
pub const MAX_GAIN: f32 = 4.0;

/// RMS at or below this is treated as silence
pub const SILENCE_THRESHOLD: f32 = 0.001;

/// Gain used when nothing usable could be measured
pub const NEUTRAL_GAIN: f32 = 1.0;
