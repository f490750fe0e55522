//! Error types for schedule evaluation and persistence

use ambience_core::{CoreError, ScheduleId};
use ambience_playback::PlaybackError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for scheduling operations
pub type Result<T> = std::result::Result<T, ScheduleError>;

/// Errors raised by providers, stores and the orchestrator
#[derive(Error, Debug)]
pub enum ScheduleError {
    /// Schedule definition rejected by validation
    #[error(transparent)]
    Invalid(#[from] CoreError),

    /// Schedule has nothing to draw from
    #[error("Schedule {0} has an empty content pool")]
    EmptyPool(ScheduleId),

    /// Catalog or execution file could not be read or written
    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Catalog or execution file is malformed
    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Serializing the execution records failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Injection was rejected or failed
    #[error(transparent)]
    Playback(#[from] PlaybackError),
}

impl ScheduleError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn parse(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Parse {
            path: path.into(),
            source,
        }
    }
}
