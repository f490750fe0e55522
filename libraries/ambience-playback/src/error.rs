//! Error types for the playback engine

use ambience_core::TrackId;
use std::time::Duration;
use thiserror::Error;

use crate::state::{PlaybackStatus, SessionMode, Trigger};

/// Failure to turn a track into a playable source
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    /// The source locator points at nothing
    #[error("Media not found: {0}")]
    NotFound(String),

    /// Container or codec not supported
    #[error("Unsupported media: {0}")]
    Unsupported(String),

    /// Transport failure while fetching bytes
    #[error("Network error: {0}")]
    Network(String),

    /// Media was found but could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// The source never reported it could play through
    #[error("Load timed out after {0:?}")]
    Timeout(Duration),
}

/// Playback errors
#[derive(Debug, Error)]
pub enum PlaybackError {
    /// Loading failed
    #[error(transparent)]
    Load(#[from] LoadError),

    /// `play()` was rejected even after a reload
    #[error("Playback of {track_id} rejected: {reason}")]
    Playback { track_id: TrackId, reason: String },

    /// The source stopped producing audio
    #[error("Playback of {track_id} stalled for {stalled_for:?}")]
    Stall {
        track_id: TrackId,
        stalled_for: Duration,
    },

    /// Status transition not allowed by the state machine
    #[error("Cannot apply {trigger:?} while {from:?}")]
    InvalidTransition {
        from: PlaybackStatus,
        trigger: Trigger,
    },

    /// A crossfade or injection is already in flight
    #[error("Engine busy: {0:?} in progress")]
    Busy(SessionMode),

    /// Command needs a loaded track
    #[error("No track loaded")]
    NoTrackLoaded,

    /// Command not valid in the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Seeking the source failed
    #[error("Invalid seek position: {0:?}")]
    InvalidSeekPosition(Duration),

    /// Operation cancelled by `stop()` or `destroy()`
    #[error("Operation cancelled")]
    Cancelled,

    /// Output or file I/O failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PlaybackError {
    /// Create a playback rejection error
    pub fn playback(track_id: TrackId, reason: impl Into<String>) -> Self {
        Self::Playback {
            track_id,
            reason: reason.into(),
        }
    }

    /// Whether the error came from `stop()`/`destroy()` rather than a fault
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Result type for playback operations
pub type Result<T> = std::result::Result<T, PlaybackError>;
