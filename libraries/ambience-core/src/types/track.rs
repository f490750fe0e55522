/// Audio track value type
use crate::types::TrackId;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What kind of audio a track carries
///
/// Music forms the continuous bed; content is scheduled non-music audio
/// (ads, announcements) injected over or in place of the bed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackCategory {
    /// Music bed
    Music,
    /// Scheduled non-music content
    Content,
}

/// A playable track as supplied by the catalog provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioTrack {
    /// Unique track identifier
    pub id: TrackId,

    /// Where the audio bytes live (path, `file://` or remote URI)
    pub source_uri: String,

    /// Duration in seconds, when the catalog knows it before loading
    #[serde(default)]
    pub duration_seconds: Option<f64>,

    /// Music bed or scheduled content
    pub category: TrackCategory,

    /// Display title
    #[serde(default)]
    pub title: Option<String>,

    /// Display artist
    #[serde(default)]
    pub artist: Option<String>,

    /// Pre-measured RMS loudness of the track (linear, 0.0-1.0)
    #[serde(default)]
    pub reference_loudness: Option<f32>,
}

impl AudioTrack {
    /// Create a track with the minimal fields
    pub fn new(id: impl Into<TrackId>, source_uri: impl Into<String>, category: TrackCategory) -> Self {
        Self {
            id: id.into(),
            source_uri: source_uri.into(),
            duration_seconds: None,
            category,
            title: None,
            artist: None,
            reference_loudness: None,
        }
    }

    /// Create a music track
    pub fn music(id: impl Into<TrackId>, source_uri: impl Into<String>) -> Self {
        Self::new(id, source_uri, TrackCategory::Music)
    }

    /// Create a content (ad/announcement) track
    pub fn content(id: impl Into<TrackId>, source_uri: impl Into<String>) -> Self {
        Self::new(id, source_uri, TrackCategory::Content)
    }

    /// Set the known duration in seconds
    #[must_use]
    pub fn with_duration(mut self, seconds: f64) -> Self {
        self.duration_seconds = Some(seconds);
        self
    }

    /// Set the title
    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Set the artist
    #[must_use]
    pub fn with_artist(mut self, artist: impl Into<String>) -> Self {
        self.artist = Some(artist.into());
        self
    }

    /// Set the pre-measured reference loudness
    #[must_use]
    pub fn with_reference_loudness(mut self, rms: f32) -> Self {
        self.reference_loudness = Some(rms);
        self
    }

    /// Known duration, if any and if it is a finite positive number
    pub fn duration(&self) -> Option<Duration> {
        self.duration_seconds
            .filter(|s| s.is_finite() && *s > 0.0)
            .map(Duration::from_secs_f64)
    }

    /// Whether this track is part of the music bed
    pub fn is_music(&self) -> bool {
        self.category == TrackCategory::Music
    }

    /// "Artist - Title", falling back to the id
    pub fn display_name(&self) -> String {
        match (&self.artist, &self.title) {
            (Some(artist), Some(title)) => format!("{} - {}", artist, title),
            (None, Some(title)) => title.clone(),
            _ => self.id.to_string(),
        }
    }
}
