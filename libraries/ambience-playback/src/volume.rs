//! Volume scalars and per-track target gain
//!
//! Every channel has two gain stages: a volume stage in [0, 1] driven by
//! the user volumes and fades, and a normalization stage in
//! [0.5, 4.0] driven by loudness compensation. The effective
//! gain is their product.

use ambience_core::{AudioTrack, TrackCategory};
use ambience_loudness::{clamp_gain, NEUTRAL_GAIN, SILENCE_THRESHOLD, TARGET_LEVEL};
use serde::Serialize;

/// Clamp a volume-stage value to [0, 1]
#[inline]
pub fn clamp_volume(volume: f32) -> f32 {
    if volume.is_finite() {
        volume.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Clamp a normalization-stage value to [0.5, 4.0]
#[inline]
pub fn clamp_normalization(gain: f32) -> f32 {
    clamp_gain(gain)
}

/// Master, music and content volume, each clamped to [0, 1] on every write
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VolumeScalars {
    master: f32,
    music: f32,
    content: f32,
}

impl Default for VolumeScalars {
    fn default() -> Self {
        Self {
            master: 1.0,
            music: 1.0,
            content: 1.0,
        }
    }
}

impl VolumeScalars {
    pub fn new(master: f32, music: f32, content: f32) -> Self {
        Self {
            master: clamp_volume(master),
            music: clamp_volume(music),
            content: clamp_volume(content),
        }
    }

    pub fn master(&self) -> f32 {
        self.master
    }

    pub fn music(&self) -> f32 {
        self.music
    }

    pub fn content(&self) -> f32 {
        self.content
    }

    pub fn set_master(&mut self, volume: f32) {
        self.master = clamp_volume(volume);
    }

    pub fn set_music(&mut self, volume: f32) {
        self.music = clamp_volume(volume);
    }

    pub fn set_content(&mut self, volume: f32) {
        self.content = clamp_volume(volume);
    }

    /// Volume for a track category, including master
    pub fn category_volume(&self, category: TrackCategory) -> f32 {
        let category = match category {
            TrackCategory::Music => self.music,
            TrackCategory::Content => self.content,
        };
        clamp_volume(self.master * category)
    }

    /// Target gain for `track`
    ///
    /// The pre-measured reference loudness, when present, is compensated
    /// toward [`TARGET_LEVEL`].
    pub fn calculate_volume(&self, track: &AudioTrack) -> TrackGain {
        let normalization = match track.reference_loudness {
            Some(rms) if rms.is_finite() && rms > SILENCE_THRESHOLD => clamp_gain(TARGET_LEVEL / rms),
            _ => NEUTRAL_GAIN,
        };
        TrackGain {
            volume: self.category_volume(track.category),
            normalization,
        }
    }
}

/// Target gain split over the two stages
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackGain {
    /// Volume stage, [0, 1]
    pub volume: f32,
    /// Normalization stage, [0.5, 4.0]
    pub normalization: f32,
}

impl TrackGain {
    /// Effective multiplier
    pub fn total(&self) -> f32 {
        self.volume * self.normalization
    }
}
