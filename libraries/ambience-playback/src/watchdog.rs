//! Stall detection and recovery
//!
//! The watchdog polls the engine's snapshot on a fixed interval. When
//! playback claims to be running but the position has not moved for longer
//! than the stall threshold it picks exactly one action for that stall:
//!
//! 1. position within the end tolerance of the duration: report a natural
//!    end
//! 2. source still buffering: restart the progress clock
//! 3. first stall at this position: soft resume (pause, seek, play)
//! 4. stalled again at the same position, or the resume failed: force a
//!    skip
//!
//! Checks are skipped during crossfades and injections and for a grace
//! period after either completes.

use crate::engine::PlaybackEngine;
use crate::error::Result;
use crate::events::EndReason;
use crate::state::PlaybackState;
use ambience_core::TrackId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// The subset of engine commands the watchdog needs
#[async_trait]
pub trait PlaybackControl: Send + Sync {
    fn get_state(&self) -> PlaybackState;
    async fn pause(&self) -> Result<()>;
    async fn seek(&self, position: Duration) -> Result<()>;
    async fn play(&self) -> Result<()>;
    async fn end_current(&self, reason: EndReason) -> Result<()>;
}

#[async_trait]
impl PlaybackControl for PlaybackEngine {
    fn get_state(&self) -> PlaybackState {
        PlaybackEngine::get_state(self)
    }

    async fn pause(&self) -> Result<()> {
        PlaybackEngine::pause(self)
    }

    async fn seek(&self, position: Duration) -> Result<()> {
        PlaybackEngine::seek(self, position)
    }

    async fn play(&self) -> Result<()> {
        PlaybackEngine::play(self).await
    }

    async fn end_current(&self, reason: EndReason) -> Result<()> {
        PlaybackEngine::end_current(self, reason)
    }
}

/// Watchdog timing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    pub poll_interval_ms: u64,
    /// How long the position may stand still before it counts as a stall
    pub stall_threshold_ms: u64,
    /// Quiet period after a crossfade or injection completes
    pub transition_grace_ms: u64,
    /// A stall this close to the end is a natural end
    pub end_tolerance_ms: u64,
    /// Quiet period after the watchdog itself acted
    pub recovery_grace_ms: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 10_000,
            stall_threshold_ms: 8_000,
            transition_grace_ms: 12_000,
            end_tolerance_ms: 500,
            recovery_grace_ms: 12_000,
        }
    }
}

impl WatchdogConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn stall_threshold(&self) -> Duration {
        Duration::from_millis(self.stall_threshold_ms)
    }

    pub fn transition_grace(&self) -> Duration {
        Duration::from_millis(self.transition_grace_ms)
    }

    pub fn end_tolerance(&self) -> Duration {
        Duration::from_millis(self.end_tolerance_ms)
    }

    pub fn recovery_grace(&self) -> Duration {
        Duration::from_millis(self.recovery_grace_ms)
    }
}

/// What one check decided
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    /// Crossfade or injection in flight
    SkippedTransition,
    /// Within the grace period after a transition
    InGrace,
    NotPlaying,
    Healthy,
    /// Stalled at the end of the track; reported as completed
    NaturalEnd,
    /// Source is buffering; progress clock restarted
    TimerReset,
    /// Paused, re-seeked and restarted at the stalled position
    SoftResume,
    /// Reported as stalled so the caller moves on
    ForcedSkip,
    /// This stall was already acted on
    AlreadyHandled,
}

/// One stall, identified by the track and the position it stuck at
#[derive(Debug, Clone)]
struct Episode {
    track_id: Option<TrackId>,
    position: Duration,
    soft_resumed: bool,
    finished: bool,
    acted_at: Instant,
}

impl Episode {
    fn matches(&self, state: &PlaybackState) -> bool {
        self.position == state.current_time
            && self.track_id.as_ref() == state.current_track.as_ref().map(|t| &t.id)
    }
}

/// Stall watchdog over a [`PlaybackControl`]
pub struct RecoveryWatchdog<C> {
    control: C,
    config: WatchdogConfig,
    episode: Option<Episode>,
    /// Progress clock override set while the source buffers
    timer_reset_at: Option<Instant>,
}

impl<C: PlaybackControl> RecoveryWatchdog<C> {
    pub fn new(control: C, config: WatchdogConfig) -> Self {
        Self {
            control,
            config,
            episode: None,
            timer_reset_at: None,
        }
    }

    pub fn config(&self) -> &WatchdogConfig {
        &self.config
    }

    pub fn control(&self) -> &C {
        &self.control
    }

    /// Run one check at `now`
    pub async fn check(&mut self, now: Instant) -> CheckOutcome {
        let state = self.control.get_state();

        if state.is_crossfading || state.is_injecting {
            return CheckOutcome::SkippedTransition;
        }
        if let Some(at) = state.last_transition_at {
            if now.saturating_duration_since(at) < self.config.transition_grace() {
                return CheckOutcome::InGrace;
            }
        }
        if !state.is_playing {
            self.episode = None;
            self.timer_reset_at = None;
            return CheckOutcome::NotPlaying;
        }

        let progress_at = match self.timer_reset_at {
            Some(reset) if reset > state.last_progress_at => reset,
            _ => state.last_progress_at,
        };
        let stalled_for = now.saturating_duration_since(progress_at);

        if stalled_for <= self.config.stall_threshold() {
            if self.episode.as_ref().is_some_and(|e| !e.matches(&state)) {
                debug!("Playback moved on, stall episode closed");
                self.episode = None;
            }
            return CheckOutcome::Healthy;
        }

        let track_id = state.current_track.as_ref().map(|t| t.id.clone());
        let track_name = track_id.as_ref().map_or_else(|| "<none>".to_string(), ToString::to_string);

        let soft_resumed = match self.episode.as_ref().filter(|e| e.matches(&state)) {
            Some(episode) => {
                if episode.finished
                    || now.saturating_duration_since(episode.acted_at) < self.config.recovery_grace()
                {
                    return CheckOutcome::AlreadyHandled;
                }
                episode.soft_resumed
            }
            None => false,
        };

        warn!(
            track = %track_name,
            position = ?state.current_time,
            ?stalled_for,
            "Playback stalled"
        );

        let near_end = state
            .remaining()
            .is_some_and(|remaining| remaining <= self.config.end_tolerance());
        if near_end {
            info!(track = %track_name, "Stall at end of track, treating as completed");
            self.act(&state, now, true, soft_resumed);
            if let Err(e) = self.control.end_current(EndReason::Completed).await {
                warn!("Could not report natural end: {}", e);
            }
            return CheckOutcome::NaturalEnd;
        }

        if state.is_buffering {
            debug!(track = %track_name, "Source still buffering, restarting progress clock");
            self.timer_reset_at = Some(now);
            return CheckOutcome::TimerReset;
        }

        if !soft_resumed {
            info!(track = %track_name, position = ?state.current_time, "Attempting soft resume");
            match self.soft_resume(state.current_time).await {
                Ok(()) => {
                    self.act(&state, now, false, true);
                    return CheckOutcome::SoftResume;
                }
                Err(e) => warn!(track = %track_name, "Soft resume failed: {}", e),
            }
        }

        warn!(track = %track_name, "Forcing skip of stalled track");
        self.act(&state, now, true, true);
        if let Err(e) = self.control.end_current(EndReason::Stalled).await {
            warn!("Could not skip stalled track: {}", e);
        }
        CheckOutcome::ForcedSkip
    }

    fn act(&mut self, state: &PlaybackState, now: Instant, finished: bool, soft_resumed: bool) {
        self.timer_reset_at = None;
        self.episode = Some(Episode {
            track_id: state.current_track.as_ref().map(|t| t.id.clone()),
            position: state.current_time,
            soft_resumed,
            finished,
            acted_at: now,
        });
    }

    async fn soft_resume(&self, position: Duration) -> Result<()> {
        self.control.pause().await?;
        self.control.seek(position).await?;
        self.control.play().await
    }
}

impl<C: PlaybackControl + 'static> RecoveryWatchdog<C> {
    /// Poll until `cancel` fires
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately
        ticker.tick().await;

        info!(poll = ?self.config.poll_interval(), "Recovery watchdog started");
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let outcome = self.check(Instant::now()).await;
            debug!(?outcome, "Watchdog check");
        }
        info!("Recovery watchdog stopped");
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }
}
