//! Content injection
//!
//! Temporarily overlays or replaces the music bed with a content item:
//!
//! - `fade_out`: the bed fades to silence and pauses, the content plays,
//!   then the bed resumes from where it paused with a symmetric fade-in
//! - `background`: the bed is ducked and keeps playing under the content,
//!   then returns to its *current* target volume
//!
//! With [`EngineConfig::reuse_output_path`](crate::EngineConfig) the content
//! is swapped into the bed's own channel instead of a dedicated one; the
//! bed's source and position are saved and restored around the swap.
//! Background mode degrades to a swap there, since one channel cannot
//! carry both signals.
//!
//! The bed is not restored if it finished while the content played. The
//! engine then reports the bed's end and leaves the next track to the
//! caller.

use crate::engine::{ChannelNormalization, ChannelProbe, ChannelVolume, Inner, PlaybackEngine};
use crate::error::{PlaybackError, Result};
use crate::events::{EndReason, ErrorKind, PlaybackEvent};
use crate::source::AudioSource;
use crate::state::{PlaybackStatus, SessionMode, Trigger};
use crate::volume::TrackGain;
use ambience_core::{AudioMode, AudioTrack, TrackId};
use ambience_loudness::{
    ramp_gain, GainStage, NormalizationOutcome, ReusedGainStage, NEUTRAL_GAIN,
};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Result of a completed injection
#[derive(Debug, Clone, PartialEq)]
pub struct InjectionOutcome {
    pub content_id: TrackId,
    pub mode: AudioMode,
    /// Content was swapped into the bed's channel
    pub reused: bool,
    /// Bed resumed after the content; false if there was no bed or it
    /// finished during the injection
    pub bed_restored: bool,
    pub normalization: NormalizationOutcome,
}

/// A running injection
///
/// Returned once the content is audible. Dropping the handle does not
/// cancel the injection.
#[derive(Debug)]
pub struct InjectionHandle {
    content_id: TrackId,
    mode: AudioMode,
    reused: bool,
    outcome: oneshot::Receiver<Result<InjectionOutcome>>,
}

impl InjectionHandle {
    pub fn content_id(&self) -> &TrackId {
        &self.content_id
    }

    pub fn mode(&self) -> AudioMode {
        self.mode
    }

    pub fn is_reused(&self) -> bool {
        self.reused
    }

    /// Wait until the content ended and the bed was restored (or not)
    ///
    /// Resolves to `Err(Cancelled)` if the engine was stopped meanwhile.
    pub async fn finished(self) -> Result<InjectionOutcome> {
        self.outcome.await.unwrap_or(Err(PlaybackError::Cancelled))
    }
}

/// The bed channel at injection start
struct Bed {
    serial: u64,
    track: AudioTrack,
}

/// Bed source parked while content occupies its channel
struct SavedBed {
    track: AudioTrack,
    source: Box<dyn AudioSource>,
    position: Duration,
    ended: bool,
}

struct InjectionRun {
    token: CancellationToken,
    content: AudioTrack,
    content_serial: u64,
    mode: AudioMode,
    bed: Option<Bed>,
    saved: Option<SavedBed>,
    start_error: Option<PlaybackError>,
}

impl PlaybackEngine {
    /// Play `item` over the bed and return once it is audible
    ///
    /// Fails with `Busy` while a crossfade or another injection runs, and
    /// with the load error if the content cannot be loaded (the bed is left
    /// untouched then).
    pub async fn begin_injection(&self, item: AudioTrack, mode: AudioMode) -> Result<InjectionHandle> {
        let claim = {
            let mut state = self.inner.lock();
            Inner::ensure_alive(&state)?;
            if state.mode.is_idle() {
                let bed = state
                    .slots
                    .active()
                    .filter(|c| c.playing && !c.ended)
                    .map(|c| Bed {
                        serial: c.serial,
                        track: c.track.clone(),
                    });
                let reused = self.inner.config.reuse_output_path && bed.is_some();
                state.mode = if reused {
                    SessionMode::InjectingReused
                } else {
                    SessionMode::Injecting
                };
                Ok((state.ops.clone(), bed, reused))
            } else {
                Err(state.mode)
            }
        };

        let (token, bed, reused) = match claim {
            Ok(claim) => claim,
            Err(busy) => {
                warn!(content_id = %item.id, ?busy, "Injection rejected");
                self.inner.emit(vec![PlaybackEvent::warning(format!(
                    "injection of {} rejected: {:?} in progress",
                    item.id, busy
                ))]);
                return Err(PlaybackError::Busy(busy));
            }
        };

        info!(
            content_id = %item.id,
            ?mode,
            reused,
            bed = bed.as_ref().map(|b| b.track.id.to_string()),
            "Injection starting"
        );

        let source = match self.inner.fetch(&item, &token).await {
            Ok(source) => source,
            Err(e) => {
                {
                    let mut state = self.inner.lock();
                    if !token.is_cancelled() {
                        state.mode = SessionMode::Idle;
                    }
                }
                warn!(content_id = %item.id, "Content load failed: {}", e);
                if !e.is_cancelled() {
                    self.inner.emit(vec![PlaybackEvent::Error {
                        track_id: Some(item.id.clone()),
                        kind: ErrorKind::Load,
                        message: e.to_string(),
                    }]);
                }
                return Err(e);
            }
        };

        let fade = self.inner.config.injection_fade();
        let steps = self.inner.config.injection_fade_steps;

        // Silence the bed before the content takes over
        if let Some(bed) = bed.as_ref().filter(|_| reused || mode == AudioMode::FadeOut) {
            self.fade_bed_out(bed, fade, steps, &token).await?;
        }

        let (content_serial, saved, start_error) = if reused {
            let bed = bed.as_ref().ok_or(PlaybackError::InvalidState(
                "reused injection without a bed".to_string(),
            ))?;
            self.swap_in_content(bed, &item, source, &token)?
        } else {
            let (serial, error) = self.start_dedicated(&item, source, &token)?;
            (serial, None, error)
        };

        // Content is audible now
        self.inner.emit(vec![PlaybackEvent::InterruptionStart {
            content_id: item.id.clone(),
            mode,
        }]);

        if let Some(e) = &start_error {
            self.inner.emit(vec![PlaybackEvent::Error {
                track_id: Some(item.id.clone()),
                kind: ErrorKind::Playback,
                message: e.to_string(),
            }]);
        }

        if !reused && mode == AudioMode::Background {
            if let Some(bed) = &bed {
                let volume = ChannelVolume::new(&self.inner, bed.serial);
                let ducked = volume.gain() * self.inner.config.duck_ratio();
                debug!(bed = %bed.track.id, ducked, "Ducking bed");
                ramp_gain(&volume, ducked, self.inner.config.duck(), steps, &token)
                    .await
                    .map_err(|_| PlaybackError::Cancelled)?;
            }
        }

        let (tx, rx) = oneshot::channel();
        let run = InjectionRun {
            token,
            content: item.clone(),
            content_serial,
            mode,
            bed,
            saved,
            start_error,
        };
        let engine = self.clone();
        tokio::spawn(async move {
            let result = engine.complete_injection(run).await;
            if let Err(e) = &result {
                debug!("Injection ended early: {}", e);
            }
            // Receiver may have been dropped
            let _ = tx.send(result);
        });

        Ok(InjectionHandle {
            content_id: item.id,
            mode,
            reused,
            outcome: rx,
        })
    }

    /// Inject `item` and wait for the bed to come back
    pub async fn inject_content(&self, item: AudioTrack, mode: AudioMode) -> Result<InjectionOutcome> {
        self.begin_injection(item, mode).await?.finished().await
    }

    async fn fade_bed_out(&self, bed: &Bed, fade: Duration, steps: u32, token: &CancellationToken) -> Result<()> {
        debug!(bed = %bed.track.id, ?fade, "Fading bed out");
        ramp_gain(&ChannelVolume::new(&self.inner, bed.serial), 0.0, fade, steps, token)
            .await
            .map_err(|_| PlaybackError::Cancelled)?;

        let mut state = self.inner.lock();
        if token.is_cancelled() {
            return Err(PlaybackError::Cancelled);
        }
        if let Some(channel) = state.channel_mut(bed.serial) {
            channel.playing = false;
        }
        Ok(())
    }

    /// Put the content on its own channel
    fn start_dedicated(
        &self,
        item: &AudioTrack,
        source: Box<dyn AudioSource>,
        token: &CancellationToken,
    ) -> Result<(u64, Option<PlaybackError>)> {
        let mut state = self.inner.lock();
        if token.is_cancelled() {
            return Err(PlaybackError::Cancelled);
        }
        let gain = TrackGain {
            volume: state.volumes.calculate_volume(item).volume,
            normalization: NEUTRAL_GAIN,
        };
        let mut channel = self.inner.new_channel(item.clone(), source, gain);
        let serial = channel.serial;

        match channel.source.start() {
            Ok(()) => {
                channel.playing = true;
                state.injection = Some(channel);
                Ok((serial, None))
            }
            Err(e) => Ok((serial, Some(PlaybackError::playback(item.id.clone(), e.to_string())))),
        }
    }

    /// Park the bed's source and play the content through its channel
    fn swap_in_content(
        &self,
        bed: &Bed,
        item: &AudioTrack,
        source: Box<dyn AudioSource>,
        token: &CancellationToken,
    ) -> Result<(u64, Option<SavedBed>, Option<PlaybackError>)> {
        let mut state = self.inner.lock();
        if token.is_cancelled() {
            return Err(PlaybackError::Cancelled);
        }
        let volume = state.volumes.calculate_volume(item).volume;
        let Some(channel) = state.channel_mut(bed.serial) else {
            state.mode = SessionMode::Idle;
            return Err(PlaybackError::InvalidState("bed channel released".to_string()));
        };

        let position = channel.position();
        let saved = SavedBed {
            track: std::mem::replace(&mut channel.track, item.clone()),
            source: std::mem::replace(&mut channel.source, source),
            position,
            ended: channel.ended,
        };
        channel.ended = false;
        channel.meter.reset();
        channel.jump_volume(volume);

        let error = match channel.source.start() {
            Ok(()) => {
                channel.playing = true;
                None
            }
            Err(e) => {
                channel.ended = true;
                Some(PlaybackError::playback(item.id.clone(), e.to_string()))
            }
        };
        debug!(bed = %bed.track.id, ?position, "Content swapped into bed channel");
        Ok((bed.serial, Some(saved), error))
    }

    async fn complete_injection(&self, run: InjectionRun) -> Result<InjectionOutcome> {
        let InjectionRun {
            token,
            content,
            content_serial,
            mode,
            bed,
            saved,
            start_error,
        } = run;
        let reused = saved.is_some();

        let mut reused_stage = None;
        let normalization = if start_error.is_some() {
            NormalizationOutcome::Neutral { captured: 0 }
        } else {
            let request = self.inner.lock().normalizer.request();
            let probe = ChannelProbe::new(&self.inner, content_serial);
            let stage = ChannelNormalization::new(&self.inner, content_serial);
            if reused {
                let (outcome, stage) = request.run_reused(&probe, stage, &token).await;
                reused_stage = Some(stage);
                outcome
            } else {
                request.run(&probe, &stage, &token).await
            }
        };

        if normalization == NormalizationOutcome::Cancelled {
            return Err(PlaybackError::Cancelled);
        }
        if normalization.is_neutral() && start_error.is_none() {
            self.inner.emit(vec![PlaybackEvent::warning(format!(
                "no usable level measured for {}; playing at neutral gain",
                content.id
            ))]);
        }

        self.wait_for_content(content_serial, &content.id, &token).await?;
        debug!(content_id = %content.id, "Content finished");

        let bed_restored = match (&bed, saved) {
            (Some(bed), Some(saved)) => {
                self.restore_reused(bed, saved, reused_stage, &token).await?
            }
            (Some(bed), None) => self.restore_dedicated(bed, mode, content_serial, &token).await?,
            (None, _) => {
                self.release_injection(content_serial);
                false
            }
        };

        let events = {
            let mut guard = self.inner.lock();
            let state = &mut *guard;
            if token.is_cancelled() {
                return Err(PlaybackError::Cancelled);
            }
            let now = Instant::now();
            state.mode = SessionMode::Idle;
            state.last_transition_at = Some(now);
            state.last_progress_at = now;
            if let Some(position) = state.slots.active().map(|c| c.position()) {
                state.last_position = position;
            }

            let mut events = vec![PlaybackEvent::InterruptionEnd {
                content_id: content.id.clone(),
                bed_restored,
            }];
            if let Some(bed) = bed.as_ref().filter(|_| !bed_restored) {
                if let Some(slot) = state.slots.find(bed.serial) {
                    state.slots.release(slot);
                }
                state.status = state
                    .status
                    .apply(Trigger::TrackEnded)
                    .unwrap_or(PlaybackStatus::Idle);
                state.preload_requested = false;
                events.push(PlaybackEvent::End {
                    track_id: bed.track.id.clone(),
                    reason: EndReason::Completed,
                });
            }
            events
        };

        info!(content_id = %content.id, bed_restored, "Injection complete");
        self.inner.emit(events);

        match start_error {
            Some(e) => Err(e),
            None => Ok(InjectionOutcome {
                content_id: content.id,
                mode,
                reused,
                bed_restored,
                normalization,
            }),
        }
    }

    async fn wait_for_content(&self, serial: u64, content_id: &TrackId, token: &CancellationToken) -> Result<()> {
        let poll = self.inner.config.time_update();
        loop {
            let playing = self
                .inner
                .lock()
                .channel(serial)
                .is_some_and(|c| !c.ended && c.track.id == *content_id);
            if !playing {
                return Ok(());
            }
            tokio::select! {
                () = token.cancelled() => return Err(PlaybackError::Cancelled),
                () = tokio::time::sleep(poll) => {}
            }
        }
    }

    fn release_injection(&self, serial: u64) {
        let mut state = self.inner.lock();
        if state.injection.as_ref().is_some_and(|c| c.serial == serial) {
            state.injection = None;
        }
    }

    /// Bring the bed back after dedicated-channel content
    async fn restore_dedicated(
        &self,
        bed: &Bed,
        mode: AudioMode,
        content_serial: u64,
        token: &CancellationToken,
    ) -> Result<bool> {
        self.release_injection(content_serial);

        let target = {
            let mut guard = self.inner.lock();
            let state = &mut *guard;
            if token.is_cancelled() {
                return Err(PlaybackError::Cancelled);
            }
            let volumes = state.volumes;
            match state.channel_mut(bed.serial) {
                Some(channel) if !channel.ended => {
                    if !channel.playing {
                        match channel.source.start() {
                            Ok(()) => channel.playing = true,
                            Err(e) => {
                                warn!(bed = %bed.track.id, "Bed refused to resume: {}", e);
                                channel.ended = true;
                            }
                        }
                    }
                    channel
                        .playing
                        .then(|| volumes.calculate_volume(&channel.track).volume)
                }
                _ => None,
            }
        };

        let Some(target) = target else {
            debug!(bed = %bed.track.id, "Bed ended during injection");
            return Ok(false);
        };

        let duration = match mode {
            AudioMode::Background => self.inner.config.duck(),
            AudioMode::FadeOut => self.inner.config.injection_fade(),
        };
        ramp_gain(
            &ChannelVolume::new(&self.inner, bed.serial),
            target,
            duration,
            self.inner.config.injection_fade_steps,
            token,
        )
        .await
        .map_err(|_| PlaybackError::Cancelled)?;
        Ok(true)
    }

    /// Swap the parked bed back into its channel and fade it in
    async fn restore_reused(
        &self,
        bed: &Bed,
        saved: SavedBed,
        stage: Option<ReusedGainStage<ChannelNormalization>>,
        token: &CancellationToken,
    ) -> Result<bool> {
        // Content is silent now; the bed's normalization goes back untouched
        if let Some(stage) = stage {
            stage.restore_now();
        }

        let target = {
            let mut guard = self.inner.lock();
            let state = &mut *guard;
            if token.is_cancelled() {
                return Err(PlaybackError::Cancelled);
            }
            let volumes = state.volumes;
            let Some(channel) = state.channel_mut(bed.serial) else {
                return Ok(false);
            };

            let SavedBed {
                track,
                mut source,
                position,
                ended,
            } = saved;
            let mut restorable = !ended && source.duration().map_or(true, |d| position < d);
            if restorable {
                if let Err(e) = source.seek(position) {
                    warn!(bed = %track.id, "Could not restore bed position: {}", e);
                    restorable = false;
                }
            }

            channel.source = source;
            channel.track = track;
            channel.meter.reset();
            channel.jump_volume(0.0);
            channel.playing = false;
            channel.ended = !restorable;

            if restorable {
                match channel.source.start() {
                    Ok(()) => {
                        channel.playing = true;
                        Some(volumes.calculate_volume(&channel.track).volume)
                    }
                    Err(e) => {
                        warn!(bed = %bed.track.id, "Bed refused to resume: {}", e);
                        channel.ended = true;
                        None
                    }
                }
            } else {
                None
            }
        };

        let Some(target) = target else {
            return Ok(false);
        };

        ramp_gain(
            &ChannelVolume::new(&self.inner, bed.serial),
            target,
            self.inner.config.injection_fade(),
            self.inner.config.injection_fade_steps,
            token,
        )
        .await
        .map_err(|_| PlaybackError::Cancelled)?;
        Ok(true)
    }
}
