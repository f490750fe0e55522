//! Loudness parity between injected content and the music bed
//!
//! The normalizer keeps a rolling reference of recent music levels. When
//! content starts, a [`NormalizationRequest`] snapshots that reference,
//! listens to the content for a short window, and ramps a gain stage to
//! `reference / item_level`.

use crate::gain::{ramp_gain, GainStage, LevelProbe};
use crate::{
    LoudnessError, Result, MAX_GAIN, MIN_GAIN, NEUTRAL_GAIN, SILENCE_THRESHOLD, TARGET_LEVEL,
};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Normalizer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerConfig {
    /// Reference RMS used until music has been measured
    pub target_level: f32,
    /// Lowest gain applied
    pub min_gain: f32,
    /// Highest gain applied
    pub max_gain: f32,
    /// Number of music measurements averaged into the reference
    pub history_len: usize,
    /// How long content is listened to before gain is computed
    pub measure_window_ms: u64,
    /// Spacing of level probes inside the window
    pub measure_interval_ms: u64,
    /// Duration of the gain ramp
    pub ramp_ms: u64,
    /// Number of gain writes in the ramp
    pub ramp_steps: u32,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            target_level: TARGET_LEVEL,
            min_gain: MIN_GAIN,
            max_gain: MAX_GAIN,
            history_len: 10,
            measure_window_ms: 600,
            measure_interval_ms: 50,
            ramp_ms: 500,
            ramp_steps: 10,
        }
    }
}

impl NormalizerConfig {
    /// Gain bounds, ordered and kept inside the global limits
    pub fn gain_bounds(&self) -> (f32, f32) {
        let lo = self.min_gain.min(self.max_gain);
        let hi = self.min_gain.max(self.max_gain);
        if lo.is_finite() && hi.is_finite() {
            (lo.clamp(MIN_GAIN, MAX_GAIN), hi.clamp(MIN_GAIN, MAX_GAIN))
        } else {
            (MIN_GAIN, MAX_GAIN)
        }
    }

    /// Number of level probes taken per measurement window
    pub fn probe_count(&self) -> usize {
        let interval = self.measure_interval_ms.max(1);
        (self.measure_window_ms / interval).max(1) as usize
    }

    pub fn measure_interval(&self) -> Duration {
        Duration::from_millis(self.measure_interval_ms.max(1))
    }

    pub fn ramp_duration(&self) -> Duration {
        Duration::from_millis(self.ramp_ms)
    }
}

/// Result of a normalization run
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NormalizationOutcome {
    /// Gain was computed and ramped in
    Applied {
        /// Gain reached at the end of the ramp
        gain: f32,
        /// Measured content level
        item_level: f32,
        /// Music reference it was matched against
        reference_level: f32,
    },
    /// Nothing usable was measured; the neutral gain was used
    Neutral {
        /// Probes taken before giving up
        captured: usize,
    },
    /// The run was cancelled by engine teardown
    Cancelled,
}

impl NormalizationOutcome {
    /// Gain the content ended up with
    pub fn gain(&self) -> f32 {
        match self {
            Self::Applied { gain, .. } => *gain,
            Self::Neutral { .. } | Self::Cancelled => NEUTRAL_GAIN,
        }
    }

    pub fn is_neutral(&self) -> bool {
        matches!(self, Self::Neutral { .. })
    }
}

/// Rolling loudness reference for the music bed
///
/// # Example
///
/// ```rust
/// use ambience_loudness::{LoudnessNormalizer, TARGET_LEVEL};
///
/// let mut normalizer = LoudnessNormalizer::default();
/// assert_eq!(normalizer.reference_level(), TARGET_LEVEL);
///
/// normalizer.record_music_level(0.2);
/// normalizer.record_music_level(0.0); // silence is ignored
/// assert!((normalizer.reference_level() - 0.2).abs() < 1e-6);
/// ```
#[derive(Debug, Clone)]
pub struct LoudnessNormalizer {
    config: NormalizerConfig,
    history: VecDeque<f32>,
}

impl Default for LoudnessNormalizer {
    fn default() -> Self {
        Self::new(NormalizerConfig::default())
    }
}

impl LoudnessNormalizer {
    pub fn new(config: NormalizerConfig) -> Self {
        let capacity = config.history_len.max(1);
        Self {
            config,
            history: VecDeque::with_capacity(capacity),
        }
    }

    pub fn config(&self) -> &NormalizerConfig {
        &self.config
    }

    /// Record a music measurement; silent or invalid levels are dropped
    pub fn record_music_level(&mut self, level: f32) {
        if !level.is_finite() || level <= SILENCE_THRESHOLD {
            return;
        }
        let limit = self.config.history_len.max(1);
        while self.history.len() >= limit {
            self.history.pop_front();
        }
        self.history.push_back(level);
    }

    /// Average of recent music levels, or the target when none exist
    pub fn reference_level(&self) -> f32 {
        if self.history.is_empty() {
            return self.fallback_reference();
        }
        let sum: f32 = self.history.iter().sum();
        sum / self.history.len() as f32
    }

    /// Number of measurements in the rolling reference
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    /// Gain that brings `item_level` to the current reference
    pub fn compute_gain(&self, item_level: f32) -> f32 {
        gain_for(&self.config, self.reference_level(), item_level)
    }

    /// Snapshot the reference for an injection about to start
    ///
    /// The request is detached from the normalizer so it can run while the
    /// engine keeps recording music levels.
    pub fn request(&self) -> NormalizationRequest {
        NormalizationRequest {
            reference_level: self.reference_level(),
            config: self.config.clone(),
        }
    }

    fn fallback_reference(&self) -> f32 {
        if self.config.target_level.is_finite() && self.config.target_level > SILENCE_THRESHOLD {
            self.config.target_level
        } else {
            TARGET_LEVEL
        }
    }
}

fn gain_for(config: &NormalizerConfig, reference: f32, item_level: f32) -> f32 {
    if !item_level.is_finite() || item_level <= SILENCE_THRESHOLD {
        return NEUTRAL_GAIN;
    }
    if !reference.is_finite() || reference <= 0.0 {
        return NEUTRAL_GAIN;
    }
    let (lo, hi) = config.gain_bounds();
    (reference / item_level).clamp(lo, hi)
}

/// A pending normalization for one content item
#[derive(Debug, Clone)]
pub struct NormalizationRequest {
    reference_level: f32,
    config: NormalizerConfig,
}

impl NormalizationRequest {
    /// Request against an explicit reference
    pub fn new(reference_level: f32, config: NormalizerConfig) -> Self {
        Self {
            reference_level,
            config,
        }
    }

    pub fn reference_level(&self) -> f32 {
        self.reference_level
    }

    /// Gain for a measured item level
    pub fn gain_for(&self, item_level: f32) -> f32 {
        gain_for(&self.config, self.reference_level, item_level)
    }

    /// Listen to `probe` for the measurement window
    ///
    /// Returns the mean of the non-silent probe readings. Stops early when
    /// the probe reports the signal has ended.
    pub async fn measure<P: LevelProbe + ?Sized>(
        &self,
        probe: &P,
        cancel: &CancellationToken,
    ) -> Result<f32> {
        let interval = self.config.measure_interval();
        let mut captured = 0;
        let mut levels = Vec::with_capacity(self.config.probe_count());

        for _ in 0..self.config.probe_count() {
            tokio::select! {
                () = cancel.cancelled() => return Err(LoudnessError::Cancelled),
                () = tokio::time::sleep(interval) => {}
            }
            let Some(level) = probe.level() else {
                break;
            };
            captured += 1;
            if level.is_finite() && level > SILENCE_THRESHOLD {
                levels.push(level);
            }
        }

        if levels.is_empty() {
            return Err(LoudnessError::NoUsableSamples { captured });
        }
        Ok(levels.iter().sum::<f32>() / levels.len() as f32)
    }

    /// Measure the content and ramp a dedicated gain stage to parity
    ///
    /// Never fails: an unusable measurement leaves the stage at the
    /// neutral gain.
    pub async fn run<P, G>(&self, probe: &P, stage: &G, cancel: &CancellationToken) -> NormalizationOutcome
    where
        P: LevelProbe + ?Sized,
        G: GainStage + ?Sized,
    {
        let outcome = match self.measure(probe, cancel).await {
            Ok(item_level) => NormalizationOutcome::Applied {
                gain: self.gain_for(item_level),
                item_level,
                reference_level: self.reference_level,
            },
            Err(LoudnessError::NoUsableSamples { captured }) => {
                debug!(captured, "No usable content level, using neutral gain");
                NormalizationOutcome::Neutral { captured }
            }
            Err(_) => return NormalizationOutcome::Cancelled,
        };

        let ramp = ramp_gain(
            stage,
            outcome.gain(),
            self.config.ramp_duration(),
            self.config.ramp_steps,
            cancel,
        )
        .await;
        if ramp.is_err() {
            return NormalizationOutcome::Cancelled;
        }

        if let NormalizationOutcome::Applied {
            gain,
            item_level,
            reference_level,
        } = outcome
        {
            info!(gain, item_level, reference_level, "Content normalized");
        }
        outcome
    }

    /// Same as [`run`](Self::run) but on a gain stage borrowed from the bed
    ///
    /// The returned [`ReusedGainStage`] remembers the bed's gain and must be
    /// restored once the content is done.
    pub async fn run_reused<P, G>(
        &self,
        probe: &P,
        stage: G,
        cancel: &CancellationToken,
    ) -> (NormalizationOutcome, ReusedGainStage<G>)
    where
        P: LevelProbe + ?Sized,
        G: GainStage,
    {
        let reused = ReusedGainStage::capture(stage);
        let outcome = self.run(probe, &reused.stage, cancel).await;
        (outcome, reused)
    }
}

/// A bed gain stage temporarily carrying content gain
#[derive(Debug)]
pub struct ReusedGainStage<G> {
    stage: G,
    original: f32,
}

impl<G: GainStage> ReusedGainStage<G> {
    /// Remember the stage's current gain
    pub fn capture(stage: G) -> Self {
        let original = stage.gain();
        Self { stage, original }
    }

    /// Gain the bed had before the content borrowed the stage
    pub fn original_gain(&self) -> f32 {
        self.original
    }

    pub fn stage(&self) -> &G {
        &self.stage
    }

    /// Ramp back to the bed's gain and release the stage
    pub async fn restore(self, config: &NormalizerConfig, cancel: &CancellationToken) -> Result<G> {
        ramp_gain(
            &self.stage,
            self.original,
            config.ramp_duration(),
            config.ramp_steps,
            cancel,
        )
        .await?;
        Ok(self.stage)
    }

    /// Put the bed's gain back without ramping
    pub fn restore_now(self) -> G {
        self.stage.set_gain(self.original);
        self.stage
    }
}
