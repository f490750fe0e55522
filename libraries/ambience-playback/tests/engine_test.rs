//! Engine lifecycle, transport and crossfade tests, mostly on virtual time

mod common;

use ambience_core::AudioTrack;
use ambience_playback::{
    CrossfadeSettings, EndReason, ErrorKind, LoadError, PlaybackError, PlaybackEvent,
    PlaybackStatus, SessionMode, SlotId,
};
use common::{advance, config, Harness, Tone};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn load_and_play_emits_lifecycle_events() {
    let h = Harness::start(config());
    let track = h.music("a", Tone::new(0.5, 30.0));

    h.engine.load(track, SlotId::A).await.unwrap();
    assert_eq!(h.engine.get_state().status, PlaybackStatus::Ready);

    h.engine.play().await.unwrap();
    advance(1.0).await;

    let state = h.engine.get_state();
    assert!(state.is_playing);
    assert!(state.current_time >= Duration::from_millis(900));
    assert_eq!(state.duration, Some(Duration::from_secs(30)));

    let events = h.events();
    assert!(matches!(events[0], PlaybackEvent::LoadStart { slot: SlotId::A, .. }));
    assert!(matches!(events[1], PlaybackEvent::LoadEnd { slot: SlotId::A, .. }));
    assert!(matches!(events[2], PlaybackEvent::Play { .. }));

    assert!((h.output.recent_peak(200) - 0.5).abs() < 1e-4);
}

#[tokio::test(start_paused = true)]
async fn load_failure_moves_to_error() {
    let h = Harness::start(config());
    let missing = AudioTrack::music("missing", "mem://missing");

    let err = h.engine.load(missing, SlotId::A).await.unwrap_err();
    assert!(matches!(err, PlaybackError::Load(LoadError::NotFound(_))));
    assert_eq!(h.engine.get_state().status, PlaybackStatus::Error);
    assert_eq!(
        h.count(|e| matches!(e, PlaybackEvent::Error { kind: ErrorKind::Load, .. })),
        1
    );

    // Caller has to load something else first
    assert!(h.engine.play().await.is_err());
}

#[tokio::test(start_paused = true)]
async fn play_retries_once_after_rejection() {
    let h = Harness::start(config());
    let track = h.music("a", Tone::new(0.5, 30.0).rejecting(1));

    h.engine.load(track, SlotId::A).await.unwrap();
    h.engine.play().await.unwrap();

    assert_eq!(h.loader.loads(), 2);
    assert_eq!(h.engine.get_state().status, PlaybackStatus::Playing);
    assert_eq!(h.count(|e| matches!(e, PlaybackEvent::Play { .. })), 1);
}

#[tokio::test(start_paused = true)]
async fn play_fails_when_retry_is_rejected_too() {
    let h = Harness::start(config());
    let track = h.music("a", Tone::new(0.5, 30.0).rejecting(2));

    h.engine.load(track, SlotId::A).await.unwrap();
    let err = h.engine.play().await.unwrap_err();

    assert!(matches!(err, PlaybackError::Playback { .. }));
    assert_eq!(h.engine.get_state().status, PlaybackStatus::Error);
    assert_eq!(
        h.count(|e| matches!(e, PlaybackEvent::Error { kind: ErrorKind::Playback, .. })),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn pause_holds_position() {
    let h = Harness::start(config());
    h.engine.load(h.music("a", Tone::new(0.5, 30.0)), SlotId::A).await.unwrap();
    h.engine.play().await.unwrap();
    advance(2.0).await;

    h.engine.pause().unwrap();
    let paused_at = h.engine.get_state().current_time;
    advance(2.0).await;
    assert_eq!(h.engine.get_state().current_time, paused_at);
    assert!(h.engine.get_state().is_paused);

    h.engine.play().await.unwrap();
    advance(1.0).await;
    assert!(h.engine.get_state().current_time > paused_at);
    assert_eq!(h.count(|e| matches!(e, PlaybackEvent::Pause { .. })), 1);
}

#[tokio::test(start_paused = true)]
async fn track_end_is_reported_once() {
    let h = Harness::start(config());
    h.engine.load(h.music("a", Tone::new(0.5, 2.0)), SlotId::A).await.unwrap();
    h.engine.play().await.unwrap();
    advance(3.0).await;

    let ends: Vec<_> = h
        .events()
        .into_iter()
        .filter(|e| matches!(e, PlaybackEvent::End { .. }))
        .collect();
    assert_eq!(ends.len(), 1);
    assert!(matches!(&ends[0], PlaybackEvent::End { reason: EndReason::Completed, .. }));

    let state = h.engine.get_state();
    assert_eq!(state.status, PlaybackStatus::Idle);
    assert!(state.current_track.is_none());
}

#[tokio::test(start_paused = true)]
async fn preload_is_requested_once() {
    let h = Harness::start(config());
    h.engine.load(h.music("a", Tone::new(0.5, 30.0)), SlotId::A).await.unwrap();
    h.engine.play().await.unwrap();

    advance(9.0).await;
    assert_eq!(h.count(|e| matches!(e, PlaybackEvent::RequestPreload { .. })), 0);
    advance(6.0).await;
    assert_eq!(h.count(|e| matches!(e, PlaybackEvent::RequestPreload { .. })), 1);
    advance(5.0).await;
    assert_eq!(h.count(|e| matches!(e, PlaybackEvent::RequestPreload { .. })), 1);
}

#[tokio::test(start_paused = true)]
async fn queued_track_crossfades_before_the_end() {
    let h = Harness::start(config());
    let a = h.music("a", Tone::new(0.5, 180.0));
    let b = h.music("b", Tone::new(0.5, 180.0));

    h.engine.load(a, SlotId::A).await.unwrap();
    h.engine.play().await.unwrap();
    h.engine.queue_next(b);

    advance(174.0).await;
    assert_eq!(h.current_id().as_deref(), Some("a"));
    assert_eq!(h.engine.get_state().mode, SessionMode::Idle);

    advance(3.0).await;
    assert!(h.engine.get_state().is_crossfading);

    advance(4.0).await;
    let state = h.engine.get_state();
    assert_eq!(h.current_id().as_deref(), Some("b"));
    assert_eq!(state.active_slot, SlotId::B);
    assert_eq!(state.mode, SessionMode::Idle);
    assert!(state.last_transition_at.is_some());
    assert!(h.engine.queued().is_none());

    let events = h.events();
    let change = events
        .iter()
        .find_map(|e| match e {
            PlaybackEvent::SongChange { track_id, previous } => Some((track_id.clone(), previous.clone())),
            _ => None,
        })
        .unwrap();
    assert_eq!(change.0.as_str(), "b");
    assert_eq!(change.1.as_ref().map(|p| p.as_str()), Some("a"));
    assert_eq!(h.count(|e| matches!(e, PlaybackEvent::End { .. })), 0);

    // Summed gain never exceeds the louder target
    let peak = h.output.samples().iter().fold(0.0f32, |p, s| p.max(s.abs()));
    assert!(peak <= 0.5 + 1e-4, "peak {peak}");
    assert!((h.output.recent_peak(200) - 0.5).abs() < 1e-4);
}

#[tokio::test(start_paused = true)]
async fn crossfade_is_rejected_while_one_runs() {
    let h = Harness::start(config());
    h.engine.load(h.music("a", Tone::new(0.5, 60.0)), SlotId::A).await.unwrap();
    h.engine.play().await.unwrap();
    let b = h.music("b", Tone::new(0.5, 60.0));
    let c = h.music("c", Tone::new(0.5, 60.0));

    let engine = h.engine.clone();
    let fade = tokio::spawn(async move { engine.crossfade_to(b).await });
    advance(1.0).await;
    assert!(h.engine.get_state().is_crossfading);

    h.engine.crossfade_to(c).await.unwrap();
    assert_eq!(h.count(|e| matches!(e, PlaybackEvent::Warning { .. })), 1);

    fade.await.unwrap().unwrap();
    assert_eq!(h.current_id().as_deref(), Some("b"));
    assert_eq!(h.count(|e| matches!(e, PlaybackEvent::SongChange { .. })), 1);
}

#[tokio::test(start_paused = true)]
async fn crossfade_with_nothing_playing_just_plays() {
    let h = Harness::start(config());
    let b = h.music("b", Tone::new(0.5, 60.0));

    h.engine.crossfade_to(b).await.unwrap();

    let state = h.engine.get_state();
    assert!(state.is_playing);
    assert_eq!(state.active_slot, SlotId::A);
    assert_eq!(h.current_id().as_deref(), Some("b"));
}

#[tokio::test(start_paused = true)]
async fn stop_cancels_a_running_crossfade() {
    let h = Harness::start(config());
    h.engine.load(h.music("a", Tone::new(0.5, 60.0)), SlotId::A).await.unwrap();
    h.engine.play().await.unwrap();
    let b = h.music("b", Tone::new(0.5, 60.0));

    let engine = h.engine.clone();
    let fade = tokio::spawn(async move { engine.crossfade_to(b).await });
    advance(2.0).await;

    h.engine.stop();
    let result = fade.await.unwrap();
    assert!(matches!(result, Err(PlaybackError::Cancelled)));

    let state = h.engine.get_state();
    assert_eq!(state.status, PlaybackStatus::Stopped);
    assert_eq!(state.mode, SessionMode::Idle);
    assert!(state.current_track.is_none());
    assert_eq!(h.count(|e| matches!(e, PlaybackEvent::SongChange { .. })), 0);
    assert_eq!(h.count(|e| matches!(e, PlaybackEvent::Stop)), 1);

    h.output.clear();
    advance(1.0).await;
    assert!(h.output.samples().iter().all(|s| *s == 0.0));

    // Stopped until the next load
    h.engine.load(h.music("c", Tone::new(0.5, 60.0)), SlotId::A).await.unwrap();
    assert_eq!(h.engine.get_state().status, PlaybackStatus::Ready);
}

#[tokio::test(start_paused = true)]
async fn end_current_reports_stall() {
    let h = Harness::start(config());
    h.engine.load(h.music("a", Tone::new(0.5, 60.0)), SlotId::A).await.unwrap();
    h.engine.play().await.unwrap();
    advance(1.0).await;

    h.engine.end_current(EndReason::Stalled).unwrap();

    let events = h.events();
    let warning = events.iter().position(|e| matches!(e, PlaybackEvent::Warning { .. }));
    let end = events
        .iter()
        .position(|e| matches!(e, PlaybackEvent::End { reason: EndReason::Stalled, .. }));
    assert!(warning.is_some() && end.is_some());
    assert!(warning < end);
    assert_eq!(h.engine.get_state().status, PlaybackStatus::Idle);

    assert!(matches!(
        h.engine.end_current(EndReason::Skipped),
        Err(PlaybackError::NoTrackLoaded)
    ));
}

#[tokio::test(start_paused = true)]
async fn volume_changes_reach_the_playing_track() {
    let h = Harness::start(config());
    h.engine.load(h.music("a", Tone::new(0.5, 60.0)), SlotId::A).await.unwrap();
    h.engine.play().await.unwrap();
    advance(1.0).await;

    h.engine.set_music_volume(0.5);
    advance(0.5).await;
    assert!((h.output.recent_peak(200) - 0.25).abs() < 1e-3);

    h.engine.set_master_volume(2.0);
    h.engine.set_content_volume(-1.0);
    let volumes = h.engine.get_state().volumes;
    assert_eq!(volumes.master(), 1.0);
    assert_eq!(volumes.music(), 0.5);
    assert_eq!(volumes.content(), 0.0);
}

#[tokio::test(start_paused = true)]
async fn destroy_rejects_later_commands() {
    let h = Harness::start(config());
    h.engine.load(h.music("a", Tone::new(0.5, 60.0)), SlotId::A).await.unwrap();
    h.engine.play().await.unwrap();
    advance(1.0).await;

    h.engine.destroy().await;
    assert!(h.engine.is_destroyed());
    assert_eq!(h.count(|e| matches!(e, PlaybackEvent::Stop)), 1);

    let err = h
        .engine
        .load(h.music("b", Tone::new(0.5, 60.0)), SlotId::A)
        .await
        .unwrap_err();
    assert!(matches!(err, PlaybackError::InvalidState(_)));

    // Second destroy is a no-op
    h.engine.destroy().await;
    assert_eq!(h.count(|e| matches!(e, PlaybackEvent::Stop)), 1);
}

// Wall-clock time: the stall is a blocking decoder read, which virtual time cannot model
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stalled_crossfade_is_forced_to_complete() {
    let mut config = config();
    config.crossfade = CrossfadeSettings {
        duration_ms: 200,
        steps: 4,
        timeout_slack_ms: 100,
        ..CrossfadeSettings::default()
    };
    let h = Harness::start(config);
    let outgoing = Tone::new(0.5, 60.0);
    let hang = Arc::clone(&outgoing.hang_ms);
    h.engine.load(h.music("a", outgoing), SlotId::A).await.unwrap();
    h.engine.play().await.unwrap();
    let b = h.music("b", Tone::new(0.5, 60.0));
    h.engine.load(b.clone(), SlotId::B).await.unwrap();

    let engine = h.engine.clone();
    let fade = tokio::spawn(async move { engine.crossfade_to(b).await });
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(h.engine.get_state().mode, SessionMode::Crossfading);

    // Render pass blocks well past duration + slack with the engine locked
    hang.store(600, Ordering::SeqCst);
    fade.await.unwrap().unwrap();

    let state = h.engine.get_state();
    assert_eq!(state.mode, SessionMode::Idle);
    assert_eq!(state.active_slot, SlotId::B);
    assert_eq!(h.current_id().as_deref(), Some("b"));

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(h.count(|e| matches!(e, PlaybackEvent::SongChange { .. })), 1);
    let ends: Vec<(String, EndReason)> = h
        .events()
        .iter()
        .filter_map(|e| match e {
            PlaybackEvent::End { track_id, reason } => Some((track_id.to_string(), *reason)),
            _ => None,
        })
        .collect();
    assert_eq!(ends, vec![("a".to_string(), EndReason::Timeout)]);

    h.engine.destroy().await;
}
