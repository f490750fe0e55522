//! Playback status machine and session snapshot

use crate::error::{PlaybackError, Result};
use crate::slot::SlotId;
use crate::volume::VolumeScalars;
use ambience_core::AudioTrack;
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

/// Status of the active slot
///
/// ```text
/// IDLE ─► LOADING ─► READY ─► PLAYING ◄─► PAUSED
///            │                   │
///            ▼                   ▼
///          ERROR             (ended) IDLE
///
/// any ─stop─► STOPPED (until the next load)
/// ```
///
/// Crossfades and injections do not change the status; they are tracked by
/// [`SessionMode`] while the status stays `Playing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackStatus {
    /// Nothing loaded
    Idle,
    /// A track is being loaded into the active slot
    Loading,
    /// Loaded and able to play through
    Ready,
    /// Producing audio
    Playing,
    /// Paused mid-track
    Paused,
    /// Last load or play failed; caller must retry or skip
    Error,
    /// Stopped; only a new load leaves this state
    Stopped,
}

/// Inputs to the status machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    LoadStarted,
    LoadSucceeded,
    LoadFailed,
    Play,
    PlayFailed,
    Pause,
    TrackEnded,
    Stop,
}

impl PlaybackStatus {
    /// Next status for `trigger`, or `InvalidTransition`
    pub fn apply(self, trigger: Trigger) -> Result<PlaybackStatus> {
        use PlaybackStatus as S;
        use Trigger as T;

        let next = match (self, trigger) {
            (_, T::LoadStarted) => S::Loading,
            (_, T::Stop) => S::Stopped,
            (S::Loading, T::LoadSucceeded) => S::Ready,
            (S::Loading, T::LoadFailed) => S::Error,
            (S::Ready | S::Paused | S::Playing, T::Play) => S::Playing,
            (S::Ready | S::Paused | S::Playing | S::Loading, T::PlayFailed) => S::Error,
            (S::Playing | S::Paused, T::Pause) => S::Paused,
            (S::Playing | S::Paused | S::Ready, T::TrackEnded) => S::Idle,
            (from, trigger) => return Err(PlaybackError::InvalidTransition { from, trigger }),
        };
        Ok(next)
    }

    /// Whether `trigger` is accepted from this status
    pub fn accepts(self, trigger: Trigger) -> bool {
        self.apply(trigger).is_ok()
    }
}

/// What the session is doing besides plain playback
///
/// A single enum so crossfade and injection are mutually exclusive by
/// construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    #[default]
    Idle,
    /// Ramping between the two slots
    Crossfading,
    /// Content playing on its own channel
    Injecting,
    /// Content swapped into the bed's channel
    InjectingReused,
}

impl SessionMode {
    pub fn is_idle(self) -> bool {
        self == SessionMode::Idle
    }

    pub fn is_injecting(self) -> bool {
        matches!(self, SessionMode::Injecting | SessionMode::InjectingReused)
    }
}

/// Side-effect-free snapshot returned by `get_state()`
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackState {
    pub status: PlaybackStatus,
    pub mode: SessionMode,
    pub is_playing: bool,
    pub is_paused: bool,
    pub is_loading: bool,
    pub is_crossfading: bool,
    pub is_injecting: bool,
    /// Source of the active slot reports a buffering underrun
    pub is_buffering: bool,
    pub active_slot: SlotId,
    pub current_track: Option<AudioTrack>,
    pub current_time: Duration,
    pub duration: Option<Duration>,
    pub volumes: VolumeScalars,
    /// Last time the active position advanced (or playback was (re)started)
    pub last_progress_at: Instant,
    /// Last time a crossfade or injection completed
    pub last_transition_at: Option<Instant>,
}

impl PlaybackState {
    /// Time left in the current track, when its duration is known
    pub fn remaining(&self) -> Option<Duration> {
        self.duration
            .map(|duration| duration.saturating_sub(self.current_time))
    }
}
