//! Audio sources and media loaders
//!
//! The engine pulls interleaved stereo `f32` from an [`AudioSource`] once
//! per render block. A [`MediaLoader`] turns an [`AudioTrack`] into a
//! source; how the bytes are fetched and decoded is the loader's concern.

use crate::error::{LoadError, PlaybackError, Result};
use ambience_core::AudioTrack;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Pull-based audio source
///
/// Samples are interleaved stereo f32 in [-1.0, 1.0] at the engine's
/// sample rate.
pub trait AudioSource: Send {
    /// Read the next chunk of samples
    ///
    /// Returns the number of samples written. Fewer than `buffer.len()`
    /// means end of track or a buffering underrun (see [`is_buffering`]).
    ///
    /// [`is_buffering`]: AudioSource::is_buffering
    fn read_samples(&mut self, buffer: &mut [f32]) -> Result<usize>;

    /// Seek to a position from the start of the track
    fn seek(&mut self, position: Duration) -> Result<()>;

    /// Total duration, when known
    fn duration(&self) -> Option<Duration>;

    /// Current playback position
    fn position(&self) -> Duration;

    /// Whether the end of the track has been reached
    fn is_finished(&self) -> bool;

    /// Whether the source is waiting on data it does not have yet
    fn is_buffering(&self) -> bool {
        false
    }

    /// Whether enough data is available to play to the end without stalling
    fn can_play_through(&self) -> bool {
        true
    }

    /// Called when playback starts or resumes; a source may reject it
    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    /// Equivalent to `seek(Duration::ZERO)`
    fn reset(&mut self) -> Result<()> {
        self.seek(Duration::ZERO)
    }
}

/// Turns tracks into playable sources
#[async_trait]
pub trait MediaLoader: Send + Sync {
    /// Fetch and prepare `track` for playback
    async fn load(&self, track: &AudioTrack) -> std::result::Result<Box<dyn AudioSource>, LoadError>;
}

/// Fully decoded in-memory source
///
/// The sample buffer is shared, so cloning a `PcmSource` (e.g. to replay a
/// content item) does not copy audio.
#[derive(Debug, Clone)]
pub struct PcmSource {
    samples: Arc<[f32]>,
    sample_rate: u32,
    cursor: usize,
}

impl PcmSource {
    /// Create a source from interleaved stereo samples
    pub fn new(samples: impl Into<Arc<[f32]>>, sample_rate: u32) -> Self {
        Self {
            samples: samples.into(),
            sample_rate: sample_rate.max(1),
            cursor: 0,
        }
    }

    /// Silence of the given length
    pub fn silence(duration: Duration, sample_rate: u32) -> Self {
        let len = (duration.as_secs_f64() * f64::from(sample_rate)) as usize * 2;
        Self::new(vec![0.0f32; len], sample_rate)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of stereo frames
    pub fn frames(&self) -> usize {
        self.samples.len() / 2
    }

    fn samples_per_second(&self) -> f64 {
        f64::from(self.sample_rate) * 2.0
    }
}

impl AudioSource for PcmSource {
    fn read_samples(&mut self, buffer: &mut [f32]) -> Result<usize> {
        let remaining = self.samples.len().saturating_sub(self.cursor);
        let to_read = remaining.min(buffer.len());
        buffer[..to_read].copy_from_slice(&self.samples[self.cursor..self.cursor + to_read]);
        self.cursor += to_read;
        Ok(to_read)
    }

    fn seek(&mut self, position: Duration) -> Result<()> {
        let sample = (position.as_secs_f64() * self.samples_per_second()) as usize;
        // Keep frame alignment
        let sample = sample - sample % 2;
        if sample > self.samples.len() {
            return Err(PlaybackError::InvalidSeekPosition(position));
        }
        self.cursor = sample;
        Ok(())
    }

    fn duration(&self) -> Option<Duration> {
        Some(Duration::from_secs_f64(
            self.samples.len() as f64 / self.samples_per_second(),
        ))
    }

    fn position(&self) -> Duration {
        Duration::from_secs_f64(self.cursor as f64 / self.samples_per_second())
    }

    fn is_finished(&self) -> bool {
        self.cursor >= self.samples.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcm_reads_until_exhausted() {
        let mut source = PcmSource::new(vec![0.5f32; 10], 1);
        let mut buf = [0.0f32; 4];

        assert_eq!(source.read_samples(&mut buf).unwrap(), 4);
        assert_eq!(source.read_samples(&mut buf).unwrap(), 4);
        assert_eq!(source.read_samples(&mut buf).unwrap(), 2);
        assert!(source.is_finished());
        assert_eq!(source.read_samples(&mut buf).unwrap(), 0);
    }

    #[test]
    fn pcm_position_and_seek() {
        // 8 Hz stereo, 2 seconds
        let mut source = PcmSource::new(vec![0.1f32; 32], 8);
        assert_eq!(source.duration(), Some(Duration::from_secs(2)));

        source.seek(Duration::from_secs(1)).unwrap();
        assert_eq!(source.position(), Duration::from_secs(1));

        assert!(source.seek(Duration::from_secs(3)).is_err());
        source.reset().unwrap();
        assert_eq!(source.position(), Duration::ZERO);
    }

    #[test]
    fn silence_has_requested_length() {
        let source = PcmSource::silence(Duration::from_millis(500), 8000);
        assert_eq!(source.frames(), 4000);
    }
}
