//! Crossfade curves and ramp plans
//!
//! A crossfade is a fixed number of discrete gain steps. At every step the
//! outgoing track moves from its gain at the start of the fade toward
//! zero and the incoming track moves from zero toward its own target, both
//! following the same curve so the two gains are complementary.

use serde::{Deserialize, Serialize};
use std::f32::consts::PI;
use std::time::Duration;

/// Crossfade curve type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FadeCurve {
    /// Linear fade: simple and predictable
    #[default]
    Linear,

    /// S-Curve fade: slow start, fast middle, slow end
    SCurve,
}

impl FadeCurve {
    /// Calculate the fade gain at a given position
    ///
    /// # Arguments
    /// * `position` - Normalized position in the fade (0.0 to 1.0)
    /// * `fade_out` - If true, calculates fade-out gain; if false, fade-in gain
    ///
    /// Fade-in and fade-out gains at the same position always sum to 1.0.
    #[inline]
    pub fn calculate_gain(&self, position: f32, fade_out: bool) -> f32 {
        let position = if position.is_finite() {
            position.clamp(0.0, 1.0)
        } else {
            1.0
        };
        let fade_in = match self {
            FadeCurve::Linear => position,
            FadeCurve::SCurve => (1.0 - (PI * position).cos()) * 0.5,
        };
        if fade_out {
            1.0 - fade_in
        } else {
            fade_in
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            FadeCurve::Linear => "Linear",
            FadeCurve::SCurve => "S-Curve",
        }
    }
}

/// Crossfade settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrossfadeSettings {
    /// Crossfade duration in milliseconds
    pub duration_ms: u64,

    /// Number of discrete gain steps
    pub steps: u32,

    /// Extra time past `duration_ms` before the fade is forced to complete
    pub timeout_slack_ms: u64,

    /// Fade curve type
    pub curve: FadeCurve,
}

impl Default for CrossfadeSettings {
    fn default() -> Self {
        Self {
            duration_ms: 5000,
            steps: 60,
            timeout_slack_ms: 5000,
            curve: FadeCurve::Linear,
        }
    }
}

impl CrossfadeSettings {
    /// Create settings with a specific duration
    pub fn with_duration(duration_ms: u64) -> Self {
        Self {
            duration_ms,
            ..Self::default()
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }

    /// Hard deadline for the whole fade
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.duration_ms + self.timeout_slack_ms)
    }

    /// Delay between two gain steps
    pub fn step_delay(&self) -> Duration {
        self.duration() / self.steps.max(1)
    }
}

/// Gains of one crossfade step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CrossfadeStep {
    /// Outgoing track gain
    pub outgoing: f32,
    /// Incoming track gain
    pub incoming: f32,
}

/// Precomputed gains for one crossfade
///
/// # Example
///
/// ```rust
/// use ambience_playback::{CrossfadePlan, FadeCurve};
///
/// let plan = CrossfadePlan::new(0.8, 0.6, 60, FadeCurve::Linear);
/// let first = plan.step(0);
/// let last = plan.step(60);
/// assert_eq!((first.outgoing, first.incoming), (0.8, 0.0));
/// assert_eq!((last.outgoing, last.incoming), (0.0, 0.6));
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CrossfadePlan {
    from_gain: f32,
    to_gain: f32,
    steps: u32,
    curve: FadeCurve,
}

impl CrossfadePlan {
    /// Plan a fade from the outgoing track's current gain to the incoming
    /// track's target gain
    pub fn new(from_gain: f32, to_gain: f32, steps: u32, curve: FadeCurve) -> Self {
        Self {
            from_gain: sanitize(from_gain),
            to_gain: sanitize(to_gain),
            steps: steps.max(1),
            curve,
        }
    }

    pub fn steps(&self) -> u32 {
        self.steps
    }

    /// Gains at `step` (0 = before the first write, `steps` = final)
    pub fn step(&self, step: u32) -> CrossfadeStep {
        let position = step.min(self.steps) as f32 / self.steps as f32;
        CrossfadeStep {
            outgoing: self.from_gain * self.curve.calculate_gain(position, true),
            incoming: self.to_gain * self.curve.calculate_gain(position, false),
        }
    }

    /// Upper bound on the summed gain at any step
    pub fn peak_bound(&self) -> f32 {
        self.from_gain.max(self.to_gain)
    }
}

fn sanitize(gain: f32) -> f32 {
    if gain.is_finite() {
        gain.clamp(0.0, 1.0)
    } else {
        0.0
    }
}
