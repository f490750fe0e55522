//! Ambience Core
//!
//! Value types shared by every Ambience crate.
//!
//! The catalog/schedule provider hands these to the playback and scheduling
//! layers; the core crates treat them as read-only.
//!
//! # Example
//!
//! ```rust
//! use ambience_core::{AudioTrack, TrackCategory};
//!
//! let track = AudioTrack::music("song-1", "file:///music/song.flac").with_duration(180.0);
//! assert_eq!(track.category, TrackCategory::Music);
//! assert_eq!(track.duration().map(|d| d.as_secs()), Some(180));
//! ```

#![forbid(unsafe_code)]

pub mod error;
pub mod types;

pub use error::{CoreError, Result};
pub use types::{
    AnnualSpan, AudioMode, AudioTrack, DateRange, ExecutionRecord, MonthDay, Periodicity,
    ScheduleDefinition, ScheduleId, TimeWindow, TrackCategory, TrackId,
};
