//! Schedule orchestrator
//!
//! On every poll tick: fetch the definitions, find the due ones, fire the
//! first, record the firing. Definitions are evaluated in declaration
//! order and at most one fires per tick; the others are looked at again on
//! the next tick.

use crate::error::{Result, ScheduleError};
use crate::evaluator;
use crate::provider::ScheduleProvider;
use crate::selector::ContentSelector;
use crate::store::ExecutionStore;
use ambience_core::{AudioMode, AudioTrack, ExecutionRecord, ScheduleId, TrackId};
use ambience_playback::{PlaybackEngine, PlaybackError};
use async_trait::async_trait;
use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Orchestrator settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Seconds between ticks
    pub poll_interval_secs: u64,
    /// Execution records older than this many days are pruned
    pub retention_days: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            retention_days: 7,
        }
    }
}

impl OrchestratorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.retention_days))
    }
}

/// What the orchestrator needs from the playback side
#[async_trait]
pub trait ContentPlayer: Send + Sync {
    /// Whether a crossfade or injection is running
    fn is_busy(&self) -> bool;

    /// Start injecting `item`; resolves once the content is audible
    async fn start_content(
        &self,
        item: AudioTrack,
        mode: AudioMode,
    ) -> std::result::Result<(), PlaybackError>;
}

#[async_trait]
impl ContentPlayer for PlaybackEngine {
    fn is_busy(&self) -> bool {
        PlaybackEngine::is_busy(self)
    }

    async fn start_content(
        &self,
        item: AudioTrack,
        mode: AudioMode,
    ) -> std::result::Result<(), PlaybackError> {
        let handle = self.begin_injection(item, mode).await?;
        let content = handle.content_id().clone();
        tokio::spawn(async move {
            match handle.finished().await {
                Ok(outcome) => info!(
                    content = %content,
                    bed_restored = outcome.bed_restored,
                    normalization = ?outcome.normalization,
                    "Injection finished"
                ),
                Err(PlaybackError::Cancelled) => debug!(content = %content, "Injection cancelled"),
                Err(e) => warn!(content = %content, error = %e, "Injection failed"),
            }
        });
        Ok(())
    }
}

/// Result of one tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing due
    Idle,
    /// A schedule fired and its content started
    Fired {
        schedule_id: ScheduleId,
        content_id: TrackId,
    },
    /// A schedule was due but the engine was crossfading or injecting
    Deferred { schedule_id: ScheduleId },
    /// A schedule was due but its content could not be started
    Failed { schedule_id: ScheduleId, reason: String },
}

/// Fires due schedules against a [`ContentPlayer`]
pub struct ScheduleOrchestrator<P, S, C> {
    provider: P,
    store: S,
    player: C,
    selector: ContentSelector,
    config: OrchestratorConfig,
}

impl<P, S, C> ScheduleOrchestrator<P, S, C>
where
    P: ScheduleProvider,
    S: ExecutionStore,
    C: ContentPlayer,
{
    pub fn new(provider: P, store: S, player: C, config: OrchestratorConfig) -> Self {
        Self::with_selector(provider, store, player, config, ContentSelector::new())
    }

    pub fn with_selector(
        provider: P,
        store: S,
        player: C,
        config: OrchestratorConfig,
        selector: ContentSelector,
    ) -> Self {
        Self {
            provider,
            store,
            player,
            selector,
            config,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn selector(&self) -> &ContentSelector {
        &self.selector
    }

    /// One tick at the current local time
    pub async fn tick(&mut self) -> Result<TickOutcome> {
        self.tick_at(Local::now().naive_local()).await
    }

    /// One tick at `now`
    pub async fn tick_at(&mut self, now: NaiveDateTime) -> Result<TickOutcome> {
        let schedules = self.provider.schedules().await?;
        self.selector.retain_schedules(schedules.iter().map(|s| &s.id));

        let mut due = Vec::new();
        for def in &schedules {
            if !evaluator::matches_window(def, now) {
                continue;
            }
            let last = self.store.last_execution(&def.id).await?;
            if evaluator::should_fire_now(def, now, last) {
                due.push(def);
            }
        }

        let Some((first, rest)) = due.split_first() else {
            return Ok(TickOutcome::Idle);
        };
        if !rest.is_empty() {
            let skipped: Vec<&str> = rest.iter().map(|d| d.id.as_str()).collect();
            info!(
                fired = %first.id,
                skipped = ?skipped,
                "Schedule conflict: first match fires, the rest wait for the next tick"
            );
        }

        if self.player.is_busy() {
            info!(schedule = %first.id, "Engine busy, deferring schedule");
            return Ok(TickOutcome::Deferred {
                schedule_id: first.id.clone(),
            });
        }

        let Some(item) = self.selector.draw(first) else {
            let err = ScheduleError::EmptyPool(first.id.clone());
            warn!(error = %err, "Cannot fire schedule");
            return Ok(TickOutcome::Failed {
                schedule_id: first.id.clone(),
                reason: err.to_string(),
            });
        };

        let content_id = item.id.clone();
        info!(
            schedule = %first.id,
            name = %first.name,
            content = %content_id,
            mode = ?first.audio_mode,
            "Firing schedule"
        );

        match self.player.start_content(item, first.audio_mode).await {
            Ok(()) => {
                if let Err(e) = self.store.record(ExecutionRecord::new(first.id.clone(), now)).await {
                    error!(schedule = %first.id, error = %e, "Failed to persist execution record");
                }
                Ok(TickOutcome::Fired {
                    schedule_id: first.id.clone(),
                    content_id,
                })
            }
            Err(e) => {
                warn!(schedule = %first.id, content = %content_id, error = %e, "Injection failed to start");
                Ok(TickOutcome::Failed {
                    schedule_id: first.id.clone(),
                    reason: e.to_string(),
                })
            }
        }
    }
}

impl<P, S, C> ScheduleOrchestrator<P, S, C>
where
    P: ScheduleProvider + 'static,
    S: ExecutionStore + 'static,
    C: ContentPlayer + 'static,
{
    /// Tick until `cancel` fires
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(poll = ?self.config.poll_interval(), "Schedule orchestrator started");
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            match self.tick().await {
                Ok(outcome) => debug!(?outcome, "Schedule tick"),
                Err(e) => error!(error = %e, "Schedule tick failed"),
            }
        }
        info!("Schedule orchestrator stopped");
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }
}
