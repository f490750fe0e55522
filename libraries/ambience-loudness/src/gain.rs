//! Gain stages, level probes and smoothed gain ramps

use crate::{LoudnessError, Result, MAX_GAIN, MIN_GAIN, NEUTRAL_GAIN};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// A controllable multiplier on an audio signal path
///
/// Implemented by the playback engine's per-channel normalization stage.
/// Writes must take effect on the next rendered block.
pub trait GainStage: Send + Sync {
    /// Current gain
    fn gain(&self) -> f32;

    /// Set a new gain
    fn set_gain(&self, gain: f32);
}

/// Live level reading of a signal path
pub trait LevelProbe: Send + Sync {
    /// Current pre-gain RMS level, or `None` once the signal has ended
    fn level(&self) -> Option<f32>;
}

impl<T: GainStage + ?Sized> GainStage for &T {
    fn gain(&self) -> f32 {
        (**self).gain()
    }

    fn set_gain(&self, gain: f32) {
        (**self).set_gain(gain);
    }
}

impl<T: GainStage + ?Sized> GainStage for Arc<T> {
    fn gain(&self) -> f32 {
        (**self).gain()
    }

    fn set_gain(&self, gain: f32) {
        (**self).set_gain(gain);
    }
}

impl<T: LevelProbe + ?Sized> LevelProbe for Arc<T> {
    fn level(&self) -> Option<f32> {
        (**self).level()
    }
}

/// Clamp a compensating gain to the global bounds
///
/// Non-finite values collapse to the neutral gain.
#[inline]
pub fn clamp_gain(gain: f32) -> f32 {
    if gain.is_finite() {
        gain.clamp(MIN_GAIN, MAX_GAIN)
    } else {
        NEUTRAL_GAIN
    }
}

/// Ramp `stage` linearly from its current gain to `target`
///
/// The ramp is split into `steps` writes spaced evenly over `duration`.
/// A zero duration or zero steps writes the target immediately.
/// Returns `Err(Cancelled)` if `cancel` fires mid-ramp; the stage keeps
/// whatever gain it reached.
pub async fn ramp_gain<G: GainStage + ?Sized>(
    stage: &G,
    target: f32,
    duration: Duration,
    steps: u32,
    cancel: &CancellationToken,
) -> Result<()> {
    if steps == 0 || duration.is_zero() {
        stage.set_gain(target);
        return Ok(());
    }

    let start = stage.gain();
    let step_delay = duration / steps;

    for step in 1..=steps {
        tokio::select! {
            () = cancel.cancelled() => return Err(LoudnessError::Cancelled),
            () = tokio::time::sleep(step_delay) => {}
        }
        let t = step as f32 / steps as f32;
        stage.set_gain(start + (target - start) * t);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingStage {
        writes: Mutex<Vec<f32>>,
    }

    impl GainStage for RecordingStage {
        fn gain(&self) -> f32 {
            self.writes.lock().unwrap().last().copied().unwrap_or(1.0)
        }

        fn set_gain(&self, gain: f32) {
            self.writes.lock().unwrap().push(gain);
        }
    }

    #[test]
    fn clamp_bounds_and_garbage() {
        assert_eq!(clamp_gain(10.0), MAX_GAIN);
        assert_eq!(clamp_gain(0.01), MIN_GAIN);
        assert_eq!(clamp_gain(2.0), 2.0);
        assert_eq!(clamp_gain(f32::NAN), NEUTRAL_GAIN);
        assert_eq!(clamp_gain(f32::INFINITY), NEUTRAL_GAIN);
    }

    #[tokio::test(start_paused = true)]
    async fn ramp_writes_every_step() {
        let stage = RecordingStage::default();
        let cancel = CancellationToken::new();

        ramp_gain(&stage, 2.0, Duration::from_millis(500), 10, &cancel)
            .await
            .unwrap();

        let writes = stage.writes.lock().unwrap().clone();
        assert_eq!(writes.len(), 10);
        assert!((writes[0] - 1.1).abs() < 1e-5);
        assert!((writes[9] - 2.0).abs() < 1e-5);
        assert!(writes.windows(2).all(|w| w[1] >= w[0]));
    }

    #[tokio::test(start_paused = true)]
    async fn ramp_stops_on_cancel() {
        let stage = Arc::new(RecordingStage::default());
        let cancel = CancellationToken::new();

        let task = {
            let stage = Arc::clone(&stage);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                ramp_gain(&stage, 3.0, Duration::from_secs(1), 10, &cancel).await
            })
        };

        tokio::time::sleep(Duration::from_millis(350)).await;
        cancel.cancel();

        assert_eq!(task.await.unwrap(), Err(LoudnessError::Cancelled));
        let writes = stage.writes.lock().unwrap().len();
        assert!(writes < 10, "ramp kept writing after cancel: {writes}");
    }

    #[tokio::test]
    async fn zero_duration_jumps() {
        let stage = RecordingStage::default();
        ramp_gain(&stage, 0.5, Duration::ZERO, 10, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(*stage.writes.lock().unwrap(), vec![0.5]);
    }
}
