//! Playback Events
//!
//! The engine reports every state change through an [`EventBus`]: a typed
//! callback registry keyed by [`EventKind`]. Handlers run synchronously on
//! the emitting task, after the engine has released its internal lock, so
//! they may call back into the engine's read-only methods. Commands that
//! await (load, play) should be spawned from a handler.

use crate::slot::SlotId;
use ambience_core::{AudioMode, TrackId};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;

/// Why a track stopped being the current track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// Played to the end
    Completed,
    /// Skipped by a caller
    Skipped,
    /// Skipped by stall recovery
    Stalled,
    /// A transition did not finish in time and was forced
    Timeout,
}

/// Failure category carried by [`PlaybackEvent::Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad locator, unsupported format or transport failure
    Load,
    /// `play()` rejected after retry
    Playback,
}

/// Events emitted by the playback engine
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlaybackEvent {
    /// Playback started or resumed
    Play { track_id: TrackId },

    /// Playback paused
    Pause { track_id: TrackId },

    /// Engine stopped; every channel released
    Stop,

    /// The current track ended
    End { track_id: TrackId, reason: EndReason },

    /// A caller-actionable failure
    Error {
        track_id: Option<TrackId>,
        kind: ErrorKind,
        message: String,
    },

    /// Periodic position report for the current track
    TimeUpdate {
        track_id: TrackId,
        position: Duration,
        duration: Option<Duration>,
    },

    /// A track started loading into a slot
    LoadStart { track_id: TrackId, slot: SlotId },

    /// A track finished loading and can play through
    LoadEnd { track_id: TrackId, slot: SlotId },

    /// The current track changed after a completed crossfade
    SongChange {
        track_id: TrackId,
        previous: Option<TrackId>,
    },

    /// The current track is close to its end; supply the next one
    RequestPreload {
        track_id: TrackId,
        remaining: Duration,
    },

    /// Scheduled content is about to interrupt the bed
    InterruptionStart { content_id: TrackId, mode: AudioMode },

    /// Scheduled content finished
    InterruptionEnd {
        content_id: TrackId,
        bed_restored: bool,
    },

    /// Something was absorbed internally (rejected command, recovery, fallback)
    Warning { message: String },
}

/// Discriminant of [`PlaybackEvent`] used for subscriptions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Play,
    Pause,
    Stop,
    End,
    Error,
    TimeUpdate,
    LoadStart,
    LoadEnd,
    SongChange,
    RequestPreload,
    InterruptionStart,
    InterruptionEnd,
    Warning,
}

impl EventKind {
    /// Every kind, in declaration order
    pub const ALL: [EventKind; 13] = [
        EventKind::Play,
        EventKind::Pause,
        EventKind::Stop,
        EventKind::End,
        EventKind::Error,
        EventKind::TimeUpdate,
        EventKind::LoadStart,
        EventKind::LoadEnd,
        EventKind::SongChange,
        EventKind::RequestPreload,
        EventKind::InterruptionStart,
        EventKind::InterruptionEnd,
        EventKind::Warning,
    ];
}

impl PlaybackEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Play { .. } => EventKind::Play,
            Self::Pause { .. } => EventKind::Pause,
            Self::Stop => EventKind::Stop,
            Self::End { .. } => EventKind::End,
            Self::Error { .. } => EventKind::Error,
            Self::TimeUpdate { .. } => EventKind::TimeUpdate,
            Self::LoadStart { .. } => EventKind::LoadStart,
            Self::LoadEnd { .. } => EventKind::LoadEnd,
            Self::SongChange { .. } => EventKind::SongChange,
            Self::RequestPreload { .. } => EventKind::RequestPreload,
            Self::InterruptionStart { .. } => EventKind::InterruptionStart,
            Self::InterruptionEnd { .. } => EventKind::InterruptionEnd,
            Self::Warning { .. } => EventKind::Warning,
        }
    }

    /// Track the event is about, when it has one
    pub fn track_id(&self) -> Option<&TrackId> {
        match self {
            Self::Play { track_id }
            | Self::Pause { track_id }
            | Self::End { track_id, .. }
            | Self::TimeUpdate { track_id, .. }
            | Self::LoadStart { track_id, .. }
            | Self::LoadEnd { track_id, .. }
            | Self::SongChange { track_id, .. }
            | Self::RequestPreload { track_id, .. } => Some(track_id),
            Self::InterruptionStart { content_id, .. } | Self::InterruptionEnd { content_id, .. } => {
                Some(content_id)
            }
            Self::Error { track_id, .. } => track_id.as_ref(),
            Self::Stop | Self::Warning { .. } => None,
        }
    }

    pub(crate) fn warning(message: impl Into<String>) -> Self {
        Self::Warning {
            message: message.into(),
        }
    }
}

/// Handle returned by [`EventBus::on`], used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler = Arc<dyn Fn(&PlaybackEvent) + Send + Sync>;

/// Typed callback registry
///
/// Cloning is cheap; clones share the same registry.
#[derive(Clone, Default)]
pub struct EventBus {
    handlers: Arc<Mutex<HashMap<EventKind, Vec<(SubscriptionId, Handler)>>>>,
    next_id: Arc<AtomicU64>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for events of `kind`
    pub fn on<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&PlaybackEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Register `handler` for every event kind
    pub fn on_any<F>(&self, handler: F) -> Vec<SubscriptionId>
    where
        F: Fn(&PlaybackEvent) + Send + Sync + 'static,
    {
        let handler: Handler = Arc::new(handler);
        EventKind::ALL
            .iter()
            .map(|kind| {
                let handler = Arc::clone(&handler);
                self.on(*kind, move |event| handler(event))
            })
            .collect()
    }

    /// Remove a subscription; returns whether it existed
    pub fn off(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.lock().unwrap_or_else(PoisonError::into_inner);
        let mut removed = false;
        for list in handlers.values_mut() {
            let before = list.len();
            list.retain(|(sub, _)| *sub != id);
            removed |= list.len() != before;
        }
        removed
    }

    /// Deliver `event` to every handler registered for its kind
    ///
    /// The handler list is snapshotted first, so handlers may subscribe or
    /// unsubscribe while being called.
    pub fn emit(&self, event: &PlaybackEvent) {
        let snapshot: Vec<Handler> = {
            let handlers = self.handlers.lock().unwrap_or_else(PoisonError::into_inner);
            handlers
                .get(&event.kind())
                .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
                .unwrap_or_default()
        };
        for handler in snapshot {
            handler(event);
        }
    }

    /// Stream of every event, for async consumers
    pub fn channel(&self) -> mpsc::UnboundedReceiver<PlaybackEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.on_any(move |event| {
            // Receiver dropped means nobody is listening any more
            let _ = tx.send(event.clone());
        });
        rx
    }

    /// Total number of registered handlers
    pub fn listener_count(&self) -> usize {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(Vec::len)
            .sum()
    }

    /// Drop every handler
    pub fn clear(&self) {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn on_play<F: Fn(&PlaybackEvent) + Send + Sync + 'static>(&self, f: F) -> SubscriptionId {
        self.on(EventKind::Play, f)
    }

    pub fn on_pause<F: Fn(&PlaybackEvent) + Send + Sync + 'static>(&self, f: F) -> SubscriptionId {
        self.on(EventKind::Pause, f)
    }

    pub fn on_stop<F: Fn(&PlaybackEvent) + Send + Sync + 'static>(&self, f: F) -> SubscriptionId {
        self.on(EventKind::Stop, f)
    }

    pub fn on_end<F: Fn(&PlaybackEvent) + Send + Sync + 'static>(&self, f: F) -> SubscriptionId {
        self.on(EventKind::End, f)
    }

    pub fn on_error<F: Fn(&PlaybackEvent) + Send + Sync + 'static>(&self, f: F) -> SubscriptionId {
        self.on(EventKind::Error, f)
    }

    pub fn on_time_update<F: Fn(&PlaybackEvent) + Send + Sync + 'static>(&self, f: F) -> SubscriptionId {
        self.on(EventKind::TimeUpdate, f)
    }

    pub fn on_load_start<F: Fn(&PlaybackEvent) + Send + Sync + 'static>(&self, f: F) -> SubscriptionId {
        self.on(EventKind::LoadStart, f)
    }

    pub fn on_load_end<F: Fn(&PlaybackEvent) + Send + Sync + 'static>(&self, f: F) -> SubscriptionId {
        self.on(EventKind::LoadEnd, f)
    }

    pub fn on_song_change<F: Fn(&PlaybackEvent) + Send + Sync + 'static>(&self, f: F) -> SubscriptionId {
        self.on(EventKind::SongChange, f)
    }

    pub fn on_request_preload<F: Fn(&PlaybackEvent) + Send + Sync + 'static>(
        &self,
        f: F,
    ) -> SubscriptionId {
        self.on(EventKind::RequestPreload, f)
    }

    pub fn on_interruption_start<F: Fn(&PlaybackEvent) + Send + Sync + 'static>(
        &self,
        f: F,
    ) -> SubscriptionId {
        self.on(EventKind::InterruptionStart, f)
    }

    pub fn on_interruption_end<F: Fn(&PlaybackEvent) + Send + Sync + 'static>(
        &self,
        f: F,
    ) -> SubscriptionId {
        self.on(EventKind::InterruptionEnd, f)
    }

    pub fn on_warning<F: Fn(&PlaybackEvent) + Send + Sync + 'static>(&self, f: F) -> SubscriptionId {
        self.on(EventKind::Warning, f)
    }
}
