//! RMS level measurement

use crate::{LoudnessError, Result, SILENCE_THRESHOLD};
use std::collections::VecDeque;

/// Root-mean-square level of a block of samples
///
/// Returns 0.0 for empty input, silence, or anything that is not a finite
/// number, so callers never divide by a garbage level.
pub fn measure_level(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f64 = samples
        .iter()
        .filter(|s| s.is_finite())
        .map(|&s| f64::from(s) * f64::from(s))
        .sum();
    let rms = (sum_squares / samples.len() as f64).sqrt() as f32;

    if !rms.is_finite() || rms <= SILENCE_THRESHOLD {
        0.0
    } else {
        rms
    }
}

/// Sliding-window RMS meter
///
/// Keeps the squares of the last `window` samples and a running sum so
/// the level can be read at any time without rescanning the window.
#[derive(Debug, Clone)]
pub struct LevelMeter {
    squares: VecDeque<f64>,
    window: usize,
    sum: f64,
    /// Samples pushed since the last full recompute (bounds float drift)
    since_recompute: usize,
}

impl LevelMeter {
    /// Create a meter over `window` samples (interleaved samples, not frames)
    pub fn new(window: usize) -> Result<Self> {
        if window == 0 {
            return Err(LoudnessError::InvalidWindow(window));
        }
        Ok(Self {
            squares: VecDeque::with_capacity(window),
            window,
            sum: 0.0,
            since_recompute: 0,
        })
    }

    /// Meter sized for `duration_ms` of interleaved stereo audio
    pub fn for_duration(sample_rate: u32, duration_ms: u32) -> Self {
        let window = ((u64::from(sample_rate) * u64::from(duration_ms) * 2) / 1000).max(2) as usize;
        Self {
            squares: VecDeque::with_capacity(window),
            window,
            sum: 0.0,
            since_recompute: 0,
        }
    }

    /// Feed samples into the window
    pub fn push(&mut self, samples: &[f32]) {
        for &sample in samples {
            let sample = if sample.is_finite() { sample } else { 0.0 };
            let square = f64::from(sample) * f64::from(sample);
            if self.squares.len() == self.window {
                if let Some(old) = self.squares.pop_front() {
                    self.sum -= old;
                }
            }
            self.squares.push_back(square);
            self.sum += square;
        }

        self.since_recompute += samples.len();
        if self.since_recompute >= self.window * 16 {
            self.sum = self.squares.iter().sum();
            self.since_recompute = 0;
        }
    }

    /// Current RMS over the window (0.0 when silent or empty)
    pub fn level(&self) -> f32 {
        if self.squares.is_empty() {
            return 0.0;
        }
        let rms = (self.sum.max(0.0) / self.squares.len() as f64).sqrt() as f32;
        if rms <= SILENCE_THRESHOLD {
            0.0
        } else {
            rms
        }
    }

    /// Forget everything measured so far
    pub fn reset(&mut self) {
        self.squares.clear();
        self.sum = 0.0;
        self.since_recompute = 0;
    }

    /// Window length in samples
    pub fn window(&self) -> usize {
        self.window
    }
}
