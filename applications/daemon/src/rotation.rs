//! Music bed rotation
//!
//! Shuffles the catalog's music, hands the engine its next track when it
//! asks for one, and restarts the bed when a track ends with nothing
//! queued.

use ambience_core::AudioTrack;
use ambience_playback::{EndReason, PlaybackEngine, PlaybackEvent};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

/// Endless shuffled pass over the music catalog
pub struct MusicRotation<R = StdRng> {
    tracks: Vec<AudioTrack>,
    upcoming: VecDeque<AudioTrack>,
    avoid_same_artist: bool,
    last_artist: Option<String>,
    rng: R,
}

impl MusicRotation<StdRng> {
    pub fn new(tracks: Vec<AudioTrack>, avoid_same_artist: bool, seed: Option<u64>) -> Self {
        let rng = seed.map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);
        Self::with_rng(tracks, avoid_same_artist, rng)
    }
}

impl<R: Rng> MusicRotation<R> {
    pub fn with_rng(tracks: Vec<AudioTrack>, avoid_same_artist: bool, rng: R) -> Self {
        Self {
            tracks,
            upcoming: VecDeque::new(),
            avoid_same_artist,
            last_artist: None,
            rng,
        }
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Next track, reshuffling once a pass is exhausted
    pub fn next_track(&mut self) -> Option<AudioTrack> {
        if self.upcoming.is_empty() {
            self.reshuffle();
        }

        let track = self.upcoming.pop_front()?;
        self.last_artist = track.artist.clone();
        Some(track)
    }

    fn reshuffle(&mut self) {
        let mut order = self.tracks.clone();
        if self.avoid_same_artist {
            shuffle_smart(&mut order, &mut self.rng);
        } else {
            order.shuffle(&mut self.rng);
        }

        // Don't open a pass with the artist that closed the previous one
        if let Some(last) = &self.last_artist {
            if let Some(pos) = order.iter().position(|t| t.artist.as_ref() != Some(last)) {
                order.rotate_left(pos);
            }
        }

        debug!(tracks = order.len(), "Music rotation reshuffled");
        self.upcoming = order.into();
    }
}

/// Interleave artists so the same artist rarely plays twice in a row
///
/// Groups tracks by artist, shuffles each group and the group order, then
/// takes one track per artist per round.
pub fn shuffle_smart<R: Rng>(tracks: &mut [AudioTrack], rng: &mut R) {
    if tracks.len() <= 2 {
        tracks.shuffle(rng);
        return;
    }

    let mut by_artist: BTreeMap<String, Vec<AudioTrack>> = BTreeMap::new();
    for track in tracks.iter() {
        let artist = track.artist.clone().unwrap_or_default();
        by_artist.entry(artist).or_default().push(track.clone());
    }

    let mut groups: Vec<Vec<AudioTrack>> = by_artist.into_values().collect();
    for group in &mut groups {
        group.shuffle(rng);
    }
    groups.shuffle(rng);

    let mut round = 0;
    let mut out = 0;
    while out < tracks.len() {
        for group in &groups {
            if let Some(track) = group.get(round) {
                tracks[out] = track.clone();
                out += 1;
            }
        }
        round += 1;
    }
}

pub type SharedRotation = Arc<Mutex<MusicRotation>>;

fn next_from(rotation: &SharedRotation) -> Option<AudioTrack> {
    rotation
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .next_track()
}

/// Load and play the next track in the active slot
///
/// Tracks that fail to load are skipped, up to one full pass.
pub async fn advance(engine: &PlaybackEngine, rotation: &SharedRotation) -> bool {
    let attempts = rotation
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .len();

    for _ in 0..attempts {
        let Some(track) = next_from(rotation) else {
            break;
        };
        let name = track.display_name();

        if let Err(e) = engine.load(track, engine.active_slot()).await {
            warn!(track = %name, error = %e, "Skipping track that failed to load");
            continue;
        }
        match engine.play().await {
            Ok(()) => {
                info!(track = %name, "Now playing");
                return true;
            }
            Err(e) => warn!(track = %name, error = %e, "Skipping track that failed to play"),
        }
    }

    warn!("No playable music in the catalog");
    false
}

/// Wire the rotation to the engine's preload and end events
pub fn attach(engine: &PlaybackEngine, rotation: SharedRotation) {
    let queue_engine = engine.clone();
    let queue_rotation = Arc::clone(&rotation);
    engine.events().on_request_preload(move |_| {
        if let Some(next) = next_from(&queue_rotation) {
            debug!(track = %next.id, "Queueing next track");
            queue_engine.queue_next(next);
        }
    });

    let end_engine = engine.clone();
    engine.events().on_end(move |event| {
        let PlaybackEvent::End { track_id, reason } = event else {
            return;
        };
        // A timed-out crossfade still has its new track playing
        if end_engine.get_state().is_playing {
            debug!(track = %track_id, ?reason, "Track ended while another plays");
            return;
        }
        if *reason == EndReason::Stalled {
            info!(track = %track_id, "Stalled track skipped");
        }

        let engine = end_engine.clone();
        let rotation = Arc::clone(&rotation);
        tokio::spawn(async move {
            advance(&engine, &rotation).await;
        });
    });
}
