//! Playback channels and the block mixer

use crate::source::AudioSource;
use crate::volume::{clamp_normalization, clamp_volume, TrackGain};
use ambience_core::AudioTrack;
use ambience_loudness::LevelMeter;
use std::time::Duration;
use tracing::warn;

/// One loaded track with its two gain stages
pub(crate) struct Channel {
    /// Unique per load; lets async tasks detect that a slot was reused
    pub serial: u64,
    pub track: AudioTrack,
    pub source: Box<dyn AudioSource>,
    volume: f32,
    normalization: f32,
    /// Effective gain at the end of the previous block
    applied: f32,
    pub playing: bool,
    pub ended: bool,
    /// Pre-gain level of recently rendered audio
    pub meter: LevelMeter,
}

impl Channel {
    pub fn new(
        serial: u64,
        track: AudioTrack,
        source: Box<dyn AudioSource>,
        gain: TrackGain,
        meter: LevelMeter,
    ) -> Self {
        let volume = clamp_volume(gain.volume);
        let normalization = clamp_normalization(gain.normalization);
        Self {
            serial,
            track,
            source,
            volume,
            normalization,
            applied: volume * normalization,
            playing: false,
            ended: false,
            meter,
        }
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.volume = clamp_volume(volume);
    }

    pub fn normalization(&self) -> f32 {
        self.normalization
    }

    pub fn set_normalization(&mut self, gain: f32) {
        self.normalization = clamp_normalization(gain);
    }

    /// Volume stage times normalization stage
    pub fn effective_gain(&self) -> f32 {
        self.volume * self.normalization
    }

    /// Set the volume stage and skip interpolation toward it
    pub fn jump_volume(&mut self, volume: f32) {
        self.set_volume(volume);
        self.applied = self.effective_gain();
    }

    pub fn position(&self) -> Duration {
        self.source.position()
    }

    /// Source duration, falling back to the catalog's value
    pub fn duration(&self) -> Option<Duration> {
        self.source.duration().or_else(|| self.track.duration())
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.duration()
            .map(|duration| duration.saturating_sub(self.position()))
    }

    /// Pre-gain level of the audio rendered over the last meter window
    pub fn level(&self) -> f32 {
        self.meter.level()
    }

    /// Pull one block from the source and add it to `out`
    ///
    /// Gain is interpolated across the block from the previous block's
    /// gain to the current one.
    fn render_into(&mut self, scratch: &mut [f32], out: &mut [f32]) {
        if !self.playing || self.ended {
            return;
        }

        scratch.fill(0.0);
        let read = match self.source.read_samples(scratch) {
            Ok(read) => read.min(scratch.len()),
            Err(e) => {
                warn!(track_id = %self.track.id, "Source read failed, ending track: {}", e);
                self.ended = true;
                return;
            }
        };

        if read == 0 && self.source.is_finished() {
            self.ended = true;
            return;
        }

        self.meter.push(&scratch[..read]);

        let target = self.effective_gain();
        let start = self.applied;
        let frames = (read / 2).max(1);
        for (i, frame) in scratch[..read].chunks(2).enumerate() {
            let gain = start + (target - start) * ((i + 1) as f32 / frames as f32);
            for (o, s) in out[i * 2..].iter_mut().zip(frame) {
                *o += s * gain;
            }
        }
        self.applied = target;

        if self.source.is_finished() {
            self.ended = true;
        }
    }
}

/// Sums playing channels into fixed-size blocks
pub(crate) struct Mixer {
    scratch: Vec<f32>,
    block: Vec<f32>,
}

impl Mixer {
    /// Mixer for blocks of `frames` stereo frames
    pub fn new(frames: usize) -> Self {
        let len = frames.max(1) * 2;
        Self {
            scratch: vec![0.0; len],
            block: vec![0.0; len],
        }
    }

    /// Render one block from `channels`, clamped to [-1, 1]
    pub fn render<'a>(&mut self, channels: impl IntoIterator<Item = &'a mut Channel>) -> &[f32] {
        self.block.fill(0.0);
        for channel in channels {
            channel.render_into(&mut self.scratch, &mut self.block);
        }
        for sample in &mut self.block {
            *sample = sample.clamp(-1.0, 1.0);
        }
        &self.block
    }

    /// Samples per block
    pub fn block_len(&self) -> usize {
        self.block.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::PcmSource;

    fn channel(value: f32, frames: usize, gain: f32) -> Channel {
        Channel::new(
            1,
            AudioTrack::music("t", "mem"),
            Box::new(PcmSource::new(vec![value; frames * 2], 100)),
            TrackGain {
                volume: gain,
                normalization: 1.0,
            },
            LevelMeter::for_duration(100, 100),
        )
    }

    #[test]
    fn paused_channels_are_silent() {
        let mut mixer = Mixer::new(4);
        let mut ch = channel(0.5, 8, 1.0);
        let block = mixer.render([&mut ch]).to_vec();
        assert!(block.iter().all(|s| *s == 0.0));
        assert_eq!(ch.position(), Duration::ZERO);
    }

    #[test]
    fn sums_and_clamps() {
        let mut mixer = Mixer::new(4);
        let mut a = channel(0.75, 8, 1.0);
        let mut b = channel(0.75, 8, 1.0);
        a.playing = true;
        b.playing = true;

        let block = mixer.render([&mut a, &mut b]).to_vec();
        assert!(block.iter().all(|s| *s == 1.0));
    }

    #[test]
    fn gain_changes_are_interpolated() {
        let mut mixer = Mixer::new(4);
        let mut ch = channel(1.0, 16, 1.0);
        ch.playing = true;
        mixer.render([&mut ch]);

        ch.set_volume(0.0);
        let block = mixer.render([&mut ch]).to_vec();
        // Left channel of each frame steps down toward zero
        let lefts: Vec<f32> = block.iter().step_by(2).copied().collect();
        assert!(lefts.windows(2).all(|w| w[1] < w[0]));
        assert_eq!(*lefts.last().unwrap(), 0.0);
    }

    #[test]
    fn end_of_source_marks_channel_ended() {
        let mut mixer = Mixer::new(4);
        let mut ch = channel(0.1, 6, 1.0);
        ch.playing = true;

        mixer.render([&mut ch]);
        assert!(!ch.ended);
        mixer.render([&mut ch]);
        assert!(ch.ended);
        assert!(ch.level() > 0.0);
    }
}
