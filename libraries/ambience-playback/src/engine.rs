//! Playback engine
//!
//! Owns the two alternating playback slots, the content-injection channel,
//! the volume scalars and the loudness reference. Everything runs as
//! cooperative tokio tasks:
//!
//! - render loop: one mixed block per `block_ms` to the [`AudioOutput`]
//! - progress monitor: time updates, preload requests, automatic
//!   crossfades and end-of-track detection every `time_update_ms`
//! - one task per crossfade or injection, cancelled by [`stop`] and
//!   [`destroy`]
//!
//! The session state sits behind a single mutex that is never held across
//! an await point. Events are collected while the lock is held and emitted
//! after it is released.
//!
//! [`stop`]: PlaybackEngine::stop
//! [`destroy`]: PlaybackEngine::destroy

use crate::crossfade::{CrossfadePlan, CrossfadeSettings};
use crate::error::{LoadError, PlaybackError, Result};
use crate::events::{EndReason, ErrorKind, EventBus, PlaybackEvent};
use crate::mixer::{Channel, Mixer};
use crate::output::AudioOutput;
use crate::slot::{SlotArena, SlotId};
use crate::source::{AudioSource, MediaLoader};
use crate::state::{PlaybackState, PlaybackStatus, SessionMode, Trigger};
use crate::volume::{TrackGain, VolumeScalars};
use ambience_core::AudioTrack;
use ambience_loudness::{
    GainStage, LevelMeter, LevelProbe, LoudnessNormalizer, NormalizerConfig, NEUTRAL_GAIN,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Output sample rate (stereo)
    pub sample_rate: u32,
    /// Render block length
    pub block_ms: u64,
    pub crossfade: CrossfadeSettings,
    /// Bed fade-out/fade-in duration around `fade_out` injections
    pub injection_fade_ms: u64,
    pub injection_fade_steps: u32,
    /// Bed volume during `background` injections, relative to its volume
    pub duck_ratio: f32,
    /// Duck and unduck duration for `background` injections
    pub duck_ms: u64,
    /// How long before the end of a track `RequestPreload` fires
    pub preload_lead_ms: u64,
    /// Progress monitor interval
    pub time_update_ms: u64,
    /// Upper bound for a load to reach can-play-through
    pub load_timeout_ms: u64,
    /// Poll interval while waiting for can-play-through
    pub play_through_poll_ms: u64,
    /// Swap injected content into the bed's channel instead of opening a
    /// new one (for outputs that cannot open a second path mid-session)
    pub reuse_output_path: bool,
    pub normalizer: NormalizerConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            block_ms: 20,
            crossfade: CrossfadeSettings::default(),
            injection_fade_ms: 3000,
            injection_fade_steps: 30,
            duck_ratio: 0.20,
            duck_ms: 1000,
            preload_lead_ms: 20_000,
            time_update_ms: 250,
            load_timeout_ms: 15_000,
            play_through_poll_ms: 50,
            reuse_output_path: false,
            normalizer: NormalizerConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn block(&self) -> Duration {
        Duration::from_millis(self.block_ms.max(1))
    }

    /// Stereo frames per render block
    pub fn block_frames(&self) -> usize {
        ((u64::from(self.sample_rate) * self.block_ms.max(1)) / 1000).max(1) as usize
    }

    pub fn time_update(&self) -> Duration {
        Duration::from_millis(self.time_update_ms.max(1))
    }

    pub fn preload_lead(&self) -> Duration {
        Duration::from_millis(self.preload_lead_ms)
    }

    pub fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.load_timeout_ms)
    }

    pub fn injection_fade(&self) -> Duration {
        Duration::from_millis(self.injection_fade_ms)
    }

    pub fn duck(&self) -> Duration {
        Duration::from_millis(self.duck_ms)
    }

    pub fn duck_ratio(&self) -> f32 {
        if self.duck_ratio.is_finite() {
            self.duck_ratio.clamp(0.0, 1.0)
        } else {
            0.20
        }
    }
}

/// Mutable session state
pub(crate) struct State {
    pub status: PlaybackStatus,
    pub mode: SessionMode,
    pub slots: SlotArena,
    /// Dedicated content channel during non-reused injections
    pub injection: Option<Channel>,
    pub volumes: VolumeScalars,
    pub normalizer: LoudnessNormalizer,
    /// Track the caller supplied for the next automatic crossfade
    pub queued: Option<AudioTrack>,
    pub preload_requested: bool,
    pub last_position: Duration,
    pub last_progress_at: Instant,
    pub last_transition_at: Option<Instant>,
    /// Cancelled by `stop()`; replaced with a fresh child of the root token
    pub ops: CancellationToken,
    pub destroyed: bool,
}

impl State {
    /// Channel with `serial`, wherever it lives
    pub fn channel_mut(&mut self, serial: u64) -> Option<&mut Channel> {
        if self.injection.as_ref().is_some_and(|c| c.serial == serial) {
            return self.injection.as_mut();
        }
        let slot = self.slots.find(serial)?;
        self.slots.get_mut(slot)
    }

    pub fn channel(&self, serial: u64) -> Option<&Channel> {
        if let Some(channel) = self.injection.as_ref().filter(|c| c.serial == serial) {
            return Some(channel);
        }
        self.slots.find(serial).and_then(|slot| self.slots.get(slot))
    }

    /// Release every channel and return to an idle session
    fn release_all(&mut self) {
        self.slots.clear();
        self.injection = None;
        self.mode = SessionMode::Idle;
        self.queued = None;
        self.preload_requested = false;
    }
}

pub(crate) struct Inner {
    pub config: EngineConfig,
    pub events: EventBus,
    loader: Arc<dyn MediaLoader>,
    output: Mutex<Box<dyn AudioOutput>>,
    state: Mutex<State>,
    root: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    next_serial: AtomicU64,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

impl Inner {
    pub fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn emit(&self, events: Vec<PlaybackEvent>) {
        for event in &events {
            self.events.emit(event);
        }
    }

    pub fn ensure_alive(state: &State) -> Result<()> {
        if state.destroyed {
            Err(PlaybackError::InvalidState("engine destroyed".to_string()))
        } else {
            Ok(())
        }
    }

    /// Wrap a freshly loaded source in a channel
    pub fn new_channel(&self, track: AudioTrack, source: Box<dyn AudioSource>, gain: TrackGain) -> Channel {
        let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
        let meter = LevelMeter::for_duration(
            self.config.sample_rate,
            self.config.normalizer.measure_interval_ms.max(self.config.block_ms) as u32,
        );
        Channel::new(serial, track, source, gain, meter)
    }

    /// Load `track` and wait until it can play through
    pub async fn fetch(&self, track: &AudioTrack, cancel: &CancellationToken) -> Result<Box<dyn AudioSource>> {
        let limit = self.config.load_timeout();
        let poll = Duration::from_millis(self.config.play_through_poll_ms.max(1));

        let work = async {
            let source = self.loader.load(track).await?;
            while !source.can_play_through() {
                tokio::time::sleep(poll).await;
            }
            Ok::<_, PlaybackError>(source)
        };

        tokio::select! {
            () = cancel.cancelled() => Err(PlaybackError::Cancelled),
            result = tokio::time::timeout(limit, work) => match result {
                Ok(result) => result,
                Err(_) => Err(LoadError::Timeout(limit).into()),
            },
        }
    }

    fn load_error_event(track: &AudioTrack, error: &PlaybackError) -> Option<PlaybackEvent> {
        match error {
            PlaybackError::Cancelled => None,
            PlaybackError::Playback { .. } => Some(PlaybackEvent::Error {
                track_id: Some(track.id.clone()),
                kind: ErrorKind::Playback,
                message: error.to_string(),
            }),
            _ => Some(PlaybackEvent::Error {
                track_id: Some(track.id.clone()),
                kind: ErrorKind::Load,
                message: error.to_string(),
            }),
        }
    }

    /// Mix one block and hand it to the output
    fn render_block(&self, mixer: &mut Mixer) -> Result<()> {
        let block = {
            let mut guard = self.lock();
            let state = &mut *guard;
            mixer.render(state.slots.iter_mut().chain(state.injection.iter_mut()))
        };
        self.output
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .write(block)
    }

    /// One progress-monitor pass
    ///
    /// Returns the events to emit and the queued track to crossfade to, if
    /// the active track is inside the crossfade window.
    fn monitor_tick(&self) -> (Vec<PlaybackEvent>, Option<AudioTrack>) {
        let mut events = Vec::new();
        let mut crossfade = None;
        let now = Instant::now();

        let mut state = self.lock();
        if state.destroyed || state.status != PlaybackStatus::Playing {
            return (events, crossfade);
        }
        let mode = state.mode;
        let active_slot = state.slots.active_id();
        let Some(active) = state.slots.active() else {
            return (events, crossfade);
        };

        let track_id = active.track.id.clone();
        let is_music = active.track.is_music();
        let position = active.position();
        let duration = active.duration();
        let remaining = active.remaining();
        let playing = active.playing;
        let ended = active.ended;
        let level = active.level() * active.normalization();

        if playing && position != state.last_position {
            state.last_position = position;
            state.last_progress_at = now;
        }

        if ended {
            // Transitions handle their own slot's end
            if mode.is_idle() {
                state.slots.release(active_slot);
                state.status = state
                    .status
                    .apply(Trigger::TrackEnded)
                    .unwrap_or(PlaybackStatus::Idle);
                state.preload_requested = false;
                debug!(track_id = %track_id, "Track completed");
                events.push(PlaybackEvent::End {
                    track_id,
                    reason: EndReason::Completed,
                });
            }
            return (events, crossfade);
        }

        if mode.is_idle() && playing && is_music {
            state.normalizer.record_music_level(level);
        }

        events.push(PlaybackEvent::TimeUpdate {
            track_id: track_id.clone(),
            position,
            duration,
        });

        if let Some(remaining) = remaining {
            // Swapped-in content is not the bed; its own request comes after the restore
            if mode != SessionMode::InjectingReused
                && !state.preload_requested
                && remaining <= self.config.preload_lead()
            {
                state.preload_requested = true;
                events.push(PlaybackEvent::RequestPreload {
                    track_id,
                    remaining,
                });
            }

            if mode.is_idle()
                && playing
                && !remaining.is_zero()
                && remaining <= self.config.crossfade.duration()
            {
                crossfade = state.queued.take();
            }
        }

        (events, crossfade)
    }
}

/// Audio playback engine
///
/// Cheap to clone; clones drive the same session.
///
/// # Example
///
/// ```rust,no_run
/// use ambience_core::AudioTrack;
/// use ambience_playback::{EngineConfig, NullOutput, PlaybackEngine, SlotId, SymphoniaLoader};
/// use std::sync::Arc;
///
/// # async fn run() -> ambience_playback::Result<()> {
/// let config = EngineConfig::default();
/// let loader = Arc::new(SymphoniaLoader::new(config.sample_rate));
/// let engine = PlaybackEngine::start(config, loader, Box::new(NullOutput));
///
/// engine.events().on_end(|event| println!("ended: {:?}", event));
/// engine.load(AudioTrack::music("song", "/music/song.flac"), SlotId::A).await?;
/// engine.play().await?;
/// # engine.destroy().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct PlaybackEngine {
    pub(crate) inner: Arc<Inner>,
}

impl std::fmt::Debug for PlaybackEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("PlaybackEngine")
            .field("status", &state.status)
            .field("mode", &state.mode)
            .field("active_slot", &state.slots.active_id())
            .finish()
    }
}

impl PlaybackEngine {
    /// Create the session and spawn the render loop and progress monitor
    ///
    /// # Panics
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(config: EngineConfig, loader: Arc<dyn MediaLoader>, output: Box<dyn AudioOutput>) -> Self {
        let root = CancellationToken::new();
        let normalizer = LoudnessNormalizer::new(config.normalizer.clone());
        let state = State {
            status: PlaybackStatus::Idle,
            mode: SessionMode::Idle,
            slots: SlotArena::default(),
            injection: None,
            volumes: VolumeScalars::default(),
            normalizer,
            queued: None,
            preload_requested: false,
            last_position: Duration::ZERO,
            last_progress_at: Instant::now(),
            last_transition_at: None,
            ops: root.child_token(),
            destroyed: false,
        };

        let inner = Arc::new(Inner {
            config,
            events: EventBus::new(),
            loader,
            output: Mutex::new(output),
            state: Mutex::new(state),
            root: root.clone(),
            tasks: Mutex::new(Vec::new()),
            next_serial: AtomicU64::new(1),
        });

        let render = tokio::spawn(render_loop(Arc::downgrade(&inner), root.clone()));
        let monitor = tokio::spawn(monitor_loop(Arc::downgrade(&inner), root));
        inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend([render, monitor]);

        info!(
            sample_rate = inner.config.sample_rate,
            block_ms = inner.config.block_ms,
            reuse_output_path = inner.config.reuse_output_path,
            "Playback engine started"
        );
        Self { inner }
    }

    /// Event registry for this engine
    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Load `track` into `slot`
    ///
    /// Resolves once the source can play through. Loading the active slot
    /// releases whatever it held and moves the status through `Loading`;
    /// loading the standby slot preloads it for the next crossfade.
    pub async fn load(&self, track: AudioTrack, slot: SlotId) -> Result<()> {
        let (token, is_active) = {
            let mut state = self.inner.lock();
            Inner::ensure_alive(&state)?;
            if !state.mode.is_idle() {
                return Err(PlaybackError::Busy(state.mode));
            }
            let is_active = slot == state.slots.active_id();
            if is_active {
                state.status = state.status.apply(Trigger::LoadStarted)?;
                state.slots.release(slot);
                state.preload_requested = false;
            }
            (state.ops.clone(), is_active)
        };

        debug!(track_id = %track.id, %slot, "Loading track");
        self.inner.emit(vec![PlaybackEvent::LoadStart {
            track_id: track.id.clone(),
            slot,
        }]);

        let fetched = self.inner.fetch(&track, &token).await;

        let events = {
            let mut state = self.inner.lock();
            if token.is_cancelled() {
                return Err(PlaybackError::Cancelled);
            }
            match fetched {
                Ok(source) => {
                    let gain = state.volumes.calculate_volume(&track);
                    let channel = self.inner.new_channel(track.clone(), source, gain);
                    state.slots.insert(slot, channel);
                    if is_active {
                        state.status = state
                            .status
                            .apply(Trigger::LoadSucceeded)
                            .unwrap_or(PlaybackStatus::Ready);
                        state.last_position = Duration::ZERO;
                        state.last_progress_at = Instant::now();
                    }
                    vec![PlaybackEvent::LoadEnd {
                        track_id: track.id.clone(),
                        slot,
                    }]
                }
                Err(e) => {
                    warn!(track_id = %track.id, %slot, "Load failed: {}", e);
                    if is_active {
                        state.status = state
                            .status
                            .apply(Trigger::LoadFailed)
                            .unwrap_or(PlaybackStatus::Error);
                    }
                    drop(state);
                    self.inner
                        .emit(Inner::load_error_event(&track, &e).into_iter().collect());
                    return Err(e);
                }
            }
        };

        self.inner.emit(events);
        Ok(())
    }

    /// Start or resume the active slot
    ///
    /// If the source rejects the start, the track is reloaded at the same
    /// position and started once more before the failure is reported.
    pub async fn play(&self) -> Result<()> {
        let rejected = match self.try_start() {
            Ok(events) => {
                self.inner.emit(events);
                return Ok(());
            }
            Err(StartFailure::Fatal(e)) => return Err(e),
            Err(StartFailure::Rejected { track, position, reason }) => {
                warn!(track_id = %track.id, "Play rejected ({}), reloading", reason);
                (track, position)
            }
        };

        let (track, position) = rejected;
        let slot = self.active_slot();
        self.load(track.clone(), slot).await?;
        if !position.is_zero() {
            if let Err(e) = self.seek(position) {
                debug!(track_id = %track.id, "Could not restore position after reload: {}", e);
            }
        }

        match self.try_start() {
            Ok(events) => {
                info!(track_id = %track.id, "Play succeeded after reload");
                self.inner.emit(events);
                Ok(())
            }
            Err(StartFailure::Fatal(e)) => Err(e),
            Err(StartFailure::Rejected { track, reason, .. }) => {
                error!(track_id = %track.id, "Play rejected after reload: {}", reason);
                let err = PlaybackError::playback(track.id.clone(), reason);
                {
                    let mut state = self.inner.lock();
                    state.status = state
                        .status
                        .apply(Trigger::PlayFailed)
                        .unwrap_or(PlaybackStatus::Error);
                    if let Some(channel) = state.slots.active_mut() {
                        channel.playing = false;
                    }
                }
                self.inner
                    .emit(Inner::load_error_event(&track, &err).into_iter().collect());
                Err(err)
            }
        }
    }

    fn try_start(&self) -> std::result::Result<Vec<PlaybackEvent>, StartFailure> {
        let mut state = self.inner.lock();
        Inner::ensure_alive(&state).map_err(StartFailure::Fatal)?;
        if !state.mode.is_idle() {
            return Err(StartFailure::Fatal(PlaybackError::Busy(state.mode)));
        }
        let next = state.status.apply(Trigger::Play).map_err(StartFailure::Fatal)?;

        let channel = state
            .slots
            .active_mut()
            .ok_or(StartFailure::Fatal(PlaybackError::NoTrackLoaded))?;
        if channel.playing && !channel.ended {
            return Ok(Vec::new());
        }
        if let Err(e) = channel.source.start() {
            return Err(StartFailure::Rejected {
                track: channel.track.clone(),
                position: channel.position(),
                reason: e.to_string(),
            });
        }
        channel.playing = true;
        let track_id = channel.track.id.clone();
        let position = channel.position();

        state.status = next;
        state.last_position = position;
        state.last_progress_at = Instant::now();
        debug!(track_id = %track_id, ?position, "Playing");
        Ok(vec![PlaybackEvent::Play { track_id }])
    }

    /// Pause the active slot
    pub fn pause(&self) -> Result<()> {
        let events = {
            let mut state = self.inner.lock();
            Inner::ensure_alive(&state)?;
            if !state.mode.is_idle() {
                return Err(PlaybackError::Busy(state.mode));
            }
            let next = state.status.apply(Trigger::Pause)?;
            let channel = state.slots.active_mut().ok_or(PlaybackError::NoTrackLoaded)?;
            let was_playing = channel.playing;
            channel.playing = false;
            let track_id = channel.track.id.clone();
            state.status = next;
            if was_playing {
                vec![PlaybackEvent::Pause { track_id }]
            } else {
                Vec::new()
            }
        };
        self.inner.emit(events);
        Ok(())
    }

    /// Cancel every ramp and transition and release all channels
    ///
    /// `Stopped` lasts until the next `load()`.
    pub fn stop(&self) {
        let events = {
            let mut state = self.inner.lock();
            if state.destroyed {
                return;
            }
            state.ops.cancel();
            state.ops = self.inner.root.child_token();
            state.release_all();
            let was = state.status;
            state.status = PlaybackStatus::Stopped;
            if was == PlaybackStatus::Stopped {
                Vec::new()
            } else {
                vec![PlaybackEvent::Stop]
            }
        };
        info!("Playback stopped");
        self.inner.emit(events);
    }

    /// Seek the active slot
    pub fn seek(&self, position: Duration) -> Result<()> {
        let mut state = self.inner.lock();
        Inner::ensure_alive(&state)?;
        let channel = state.slots.active_mut().ok_or(PlaybackError::NoTrackLoaded)?;
        channel.source.seek(position)?;
        channel.ended = false;
        let position = channel.position();
        state.last_position = position;
        state.last_progress_at = Instant::now();
        Ok(())
    }

    pub fn set_master_volume(&self, volume: f32) {
        self.update_volumes(|v| v.set_master(volume));
    }

    pub fn set_music_volume(&self, volume: f32) {
        self.update_volumes(|v| v.set_music(volume));
    }

    pub fn set_content_volume(&self, volume: f32) {
        self.update_volumes(|v| v.set_content(volume));
    }

    /// Apply a volume change to channels not under a ramp
    ///
    /// During a crossfade or injection the bed channels are owned by the
    /// running ramps, which read the new targets when they finish.
    fn update_volumes(&self, change: impl FnOnce(&mut VolumeScalars)) {
        let mut guard = self.inner.lock();
        let state = &mut *guard;
        change(&mut state.volumes);
        let volumes = state.volumes;

        if state.mode.is_idle() {
            for channel in state.slots.iter_mut() {
                let gain = volumes.calculate_volume(&channel.track);
                channel.set_volume(gain.volume);
            }
        }
        if let Some(channel) = state.injection.as_mut() {
            channel.set_volume(volumes.category_volume(channel.track.category));
        }
    }

    pub fn volumes(&self) -> VolumeScalars {
        self.inner.lock().volumes
    }

    /// Target gain for `track` at the current volumes
    pub fn calculate_volume(&self, track: &AudioTrack) -> TrackGain {
        self.inner.lock().volumes.calculate_volume(track)
    }

    /// Snapshot of the session
    pub fn get_state(&self) -> PlaybackState {
        let state = self.inner.lock();
        let active = state.slots.active();
        PlaybackState {
            status: state.status,
            mode: state.mode,
            is_playing: state.status == PlaybackStatus::Playing,
            is_paused: state.status == PlaybackStatus::Paused,
            is_loading: state.status == PlaybackStatus::Loading,
            is_crossfading: state.mode == SessionMode::Crossfading,
            is_injecting: state.mode.is_injecting(),
            is_buffering: active.is_some_and(|c| c.source.is_buffering()),
            active_slot: state.slots.active_id(),
            current_track: active.map(|c| c.track.clone()),
            current_time: active.map_or(Duration::ZERO, Channel::position),
            duration: active.and_then(Channel::duration),
            volumes: state.volumes,
            last_progress_at: state.last_progress_at,
            last_transition_at: state.last_transition_at,
        }
    }

    pub fn active_slot(&self) -> SlotId {
        self.inner.lock().slots.active_id()
    }

    /// Current music reference level of the normalizer
    pub fn reference_level(&self) -> f32 {
        self.inner.lock().normalizer.reference_level()
    }

    /// Whether a crossfade or injection is in flight
    pub fn is_busy(&self) -> bool {
        !self.inner.lock().mode.is_idle()
    }

    /// Supply the next track; the monitor crossfades to it automatically
    /// once the current track is inside the crossfade window
    pub fn queue_next(&self, track: AudioTrack) {
        debug!(track_id = %track.id, "Next track queued");
        self.inner.lock().queued = Some(track);
    }

    pub fn queued(&self) -> Option<AudioTrack> {
        self.inner.lock().queued.clone()
    }

    /// End the current track now and report it with `reason`
    pub fn end_current(&self, reason: EndReason) -> Result<()> {
        let events = {
            let mut state = self.inner.lock();
            Inner::ensure_alive(&state)?;
            if !state.mode.is_idle() {
                return Err(PlaybackError::Busy(state.mode));
            }
            let slot = state.slots.active_id();
            let channel = state.slots.release(slot).ok_or(PlaybackError::NoTrackLoaded)?;
            state.status = state
                .status
                .apply(Trigger::TrackEnded)
                .unwrap_or(PlaybackStatus::Idle);
            state.preload_requested = false;

            let track_id = channel.track.id.clone();
            let mut events = Vec::new();
            if reason == EndReason::Stalled {
                events.push(PlaybackEvent::warning(format!(
                    "playback of {} stalled at {:?}; skipping",
                    track_id,
                    channel.position()
                )));
            }
            events.push(PlaybackEvent::End { track_id, reason });
            events
        };
        info!(?reason, "Current track ended");
        self.inner.emit(events);
        Ok(())
    }

    /// Crossfade from the active slot to `next`
    ///
    /// No-op with a warning if a crossfade or injection is already running.
    /// If nothing is audible, `next` is simply loaded and played.
    pub async fn crossfade_to(&self, next: AudioTrack) -> Result<()> {
        let settings = self.inner.config.crossfade.clone();

        let claim = {
            let mut state = self.inner.lock();
            Inner::ensure_alive(&state)?;
            if state.mode.is_idle() {
                let audible = state.status == PlaybackStatus::Playing
                    && state.slots.active().is_some_and(|c| c.playing && !c.ended);
                if audible {
                    state.mode = SessionMode::Crossfading;
                    let to = state.slots.standby_id();
                    let preloaded = state.slots.get(to).is_some_and(|c| c.track.id == next.id);
                    if !preloaded {
                        state.slots.release(to);
                    }
                    if state.queued.as_ref().is_some_and(|q| q.id == next.id) {
                        state.queued = None;
                    }
                    Claim::Crossfade {
                        from: state.slots.active_id(),
                        to,
                        token: state.ops.clone(),
                        preloaded,
                    }
                } else {
                    Claim::Direct(state.slots.active_id())
                }
            } else {
                Claim::Busy(state.mode)
            }
        };

        let (from, to, token, preloaded) = match claim {
            Claim::Busy(mode) => {
                warn!(track_id = %next.id, ?mode, "Crossfade rejected");
                self.inner.emit(vec![PlaybackEvent::warning(format!(
                    "crossfade to {} rejected: {:?} in progress",
                    next.id, mode
                ))]);
                return Ok(());
            }
            Claim::Direct(slot) => {
                self.load(next, slot).await?;
                return self.play().await;
            }
            Claim::Crossfade {
                from,
                to,
                token,
                preloaded,
            } => (from, to, token, preloaded),
        };

        if !preloaded {
            self.inner.emit(vec![PlaybackEvent::LoadStart {
                track_id: next.id.clone(),
                slot: to,
            }]);
            let fetched = self.inner.fetch(&next, &token).await;
            let mut state = self.inner.lock();
            if token.is_cancelled() {
                return Err(PlaybackError::Cancelled);
            }
            match fetched {
                Ok(source) => {
                    let gain = state.volumes.calculate_volume(&next);
                    let channel = self.inner.new_channel(next.clone(), source, gain);
                    state.slots.insert(to, channel);
                    drop(state);
                    self.inner.emit(vec![PlaybackEvent::LoadEnd {
                        track_id: next.id.clone(),
                        slot: to,
                    }]);
                }
                Err(e) => {
                    state.mode = SessionMode::Idle;
                    drop(state);
                    warn!(track_id = %next.id, "Crossfade load failed: {}", e);
                    self.inner
                        .emit(Inner::load_error_event(&next, &e).into_iter().collect());
                    return Err(e);
                }
            }
        }

        // Start the incoming slot silent
        let (plan, from_serial, to_serial) = {
            let mut guard = self.inner.lock();
            let state = &mut *guard;
            if token.is_cancelled() {
                return Err(PlaybackError::Cancelled);
            }
            let volumes = state.volumes;
            let from_gain = state.slots.get(from).map_or(0.0, Channel::volume);
            let from_serial = state.slots.get(from).map_or(0, |c| c.serial);

            let started = match state.slots.get_mut(to) {
                Some(incoming) => {
                    let target = volumes.calculate_volume(&incoming.track);
                    incoming.set_normalization(target.normalization);
                    incoming.jump_volume(0.0);
                    match incoming.source.start() {
                        Ok(()) => {
                            incoming.playing = true;
                            Ok((target.volume, incoming.serial))
                        }
                        Err(e) => Err(PlaybackError::playback(next.id.clone(), e.to_string())),
                    }
                }
                None => Err(PlaybackError::InvalidState("standby slot emptied".to_string())),
            };

            match started {
                Ok((to_gain, to_serial)) => (
                    CrossfadePlan::new(from_gain, to_gain, settings.steps, settings.curve),
                    from_serial,
                    to_serial,
                ),
                Err(e) => {
                    state.slots.release(to);
                    state.mode = SessionMode::Idle;
                    drop(guard);
                    self.inner
                        .emit(Inner::load_error_event(&next, &e).into_iter().collect());
                    return Err(e);
                }
            }
        };

        info!(track_id = %next.id, %from, %to, "Crossfade started");

        let timed_out = match tokio::time::timeout(
            settings.timeout(),
            self.run_crossfade(plan, from_serial, to_serial, &token),
        )
        .await
        {
            Ok(Ok(())) => false,
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                warn!(track_id = %next.id, "Crossfade timed out, forcing completion");
                true
            }
        };

        let events = {
            let mut state = self.inner.lock();
            if token.is_cancelled() {
                return Err(PlaybackError::Cancelled);
            }
            let previous = state.slots.release(from).map(|c| c.track.id);
            state.slots.flip();
            let final_gain = plan.step(plan.steps()).incoming;
            let position = match state.slots.active_mut() {
                Some(channel) => {
                    channel.set_volume(final_gain);
                    channel.position()
                }
                None => Duration::ZERO,
            };
            let now = Instant::now();
            state.mode = SessionMode::Idle;
            state.last_transition_at = Some(now);
            state.last_progress_at = now;
            state.last_position = position;
            state.preload_requested = false;

            let mut events = vec![PlaybackEvent::SongChange {
                track_id: next.id.clone(),
                previous: previous.clone(),
            }];
            if timed_out {
                if let Some(previous) = previous {
                    events.push(PlaybackEvent::End {
                        track_id: previous,
                        reason: EndReason::Timeout,
                    });
                }
            }
            events
        };

        info!(track_id = %next.id, active = %to, "Crossfade complete");
        self.inner.emit(events);
        Ok(())
    }

    async fn run_crossfade(
        &self,
        plan: CrossfadePlan,
        from_serial: u64,
        to_serial: u64,
        token: &CancellationToken,
    ) -> Result<()> {
        let delay = self.inner.config.crossfade.step_delay();
        for step in 1..=plan.steps() {
            tokio::select! {
                () = token.cancelled() => return Err(PlaybackError::Cancelled),
                () = tokio::time::sleep(delay) => {}
            }
            let gains = plan.step(step);
            let mut state = self.inner.lock();
            if let Some(channel) = state.channel_mut(from_serial) {
                channel.set_volume(gains.outgoing);
            }
            if let Some(channel) = state.channel_mut(to_serial) {
                channel.set_volume(gains.incoming);
            }
        }
        Ok(())
    }

    /// Cancel everything, release all channels and stop the engine tasks
    ///
    /// The engine rejects every command afterwards.
    pub async fn destroy(&self) {
        let events = {
            let mut state = self.inner.lock();
            if state.destroyed {
                return;
            }
            state.destroyed = true;
            state.ops.cancel();
            state.release_all();
            let was = state.status;
            state.status = PlaybackStatus::Stopped;
            if was == PlaybackStatus::Stopped {
                Vec::new()
            } else {
                vec![PlaybackEvent::Stop]
            }
        };
        self.inner.root.cancel();
        self.inner.emit(events);

        let handles: Vec<JoinHandle<()>> = std::mem::take(
            &mut *self.inner.tasks.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Engine task ended abnormally: {}", e);
            }
        }

        if let Err(e) = self
            .inner
            .output
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .flush()
        {
            warn!("Output flush failed: {}", e);
        }
        info!("Playback engine destroyed");
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.lock().destroyed
    }
}

enum StartFailure {
    Rejected {
        track: AudioTrack,
        position: Duration,
        reason: String,
    },
    Fatal(PlaybackError),
}

enum Claim {
    Busy(SessionMode),
    Direct(SlotId),
    Crossfade {
        from: SlotId,
        to: SlotId,
        token: CancellationToken,
        preloaded: bool,
    },
}

async fn render_loop(inner: Weak<Inner>, root: CancellationToken) {
    let (block, frames) = match inner.upgrade() {
        Some(inner) => (inner.config.block(), inner.config.block_frames()),
        None => return,
    };
    let mut mixer = Mixer::new(frames);
    let mut ticker = tokio::time::interval(block);
    let mut output_failed = false;

    loop {
        tokio::select! {
            () = root.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let Some(inner) = inner.upgrade() else {
            break;
        };
        match inner.render_block(&mut mixer) {
            Ok(()) => output_failed = false,
            Err(e) => {
                if !output_failed {
                    error!("Audio output failed: {}", e);
                }
                output_failed = true;
            }
        }
    }
    debug!(block_len = mixer.block_len(), "Render loop exited");
}

async fn monitor_loop(inner: Weak<Inner>, root: CancellationToken) {
    let period = match inner.upgrade() {
        Some(inner) => inner.config.time_update(),
        None => return,
    };
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = root.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let Some(inner) = inner.upgrade() else {
            break;
        };

        let (events, crossfade) = inner.monitor_tick();
        inner.emit(events);

        if let Some(next) = crossfade {
            let engine = PlaybackEngine {
                inner: Arc::clone(&inner),
            };
            tokio::spawn(async move {
                if let Err(e) = engine.crossfade_to(next).await {
                    if !e.is_cancelled() {
                        warn!("Automatic crossfade failed: {}", e);
                    }
                }
            });
        }
    }
    debug!("Progress monitor exited");
}

/// Volume stage of one channel, addressed by serial
pub(crate) struct ChannelVolume {
    inner: Arc<Inner>,
    serial: u64,
}

impl ChannelVolume {
    pub fn new(inner: &Arc<Inner>, serial: u64) -> Self {
        Self {
            inner: Arc::clone(inner),
            serial,
        }
    }
}

impl GainStage for ChannelVolume {
    fn gain(&self) -> f32 {
        self.inner
            .lock()
            .channel(self.serial)
            .map_or(0.0, Channel::volume)
    }

    fn set_gain(&self, gain: f32) {
        if let Some(channel) = self.inner.lock().channel_mut(self.serial) {
            channel.set_volume(gain);
        }
    }
}

/// Normalization stage of one channel, addressed by serial
pub(crate) struct ChannelNormalization {
    inner: Arc<Inner>,
    serial: u64,
}

impl ChannelNormalization {
    pub fn new(inner: &Arc<Inner>, serial: u64) -> Self {
        Self {
            inner: Arc::clone(inner),
            serial,
        }
    }
}

impl GainStage for ChannelNormalization {
    fn gain(&self) -> f32 {
        self.inner
            .lock()
            .channel(self.serial)
            .map_or(NEUTRAL_GAIN, Channel::normalization)
    }

    fn set_gain(&self, gain: f32) {
        if let Some(channel) = self.inner.lock().channel_mut(self.serial) {
            channel.set_normalization(gain);
        }
    }
}

/// Pre-gain level of one channel; `None` once it ended or was released
pub(crate) struct ChannelProbe {
    inner: Arc<Inner>,
    serial: u64,
}

impl ChannelProbe {
    pub fn new(inner: &Arc<Inner>, serial: u64) -> Self {
        Self {
            inner: Arc::clone(inner),
            serial,
        }
    }
}

impl LevelProbe for ChannelProbe {
    fn level(&self) -> Option<f32> {
        self.inner
            .lock()
            .channel(self.serial)
            .filter(|c| !c.ended)
            .map(Channel::level)
    }
}
