//! Shared helpers for scheduling tests

#![allow(dead_code)]

use ambience_core::{
    AudioMode, AudioTrack, DateRange, Periodicity, ScheduleDefinition, ScheduleId, TimeWindow,
};
use ambience_playback::PlaybackError;
use ambience_schedule::ContentPlayer;
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

pub fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d)
        .unwrap()
        .and_hms_opt(h, min, 0)
        .unwrap()
}

/// Daily schedule over a window, starting 2025-01-01
pub fn daily(id: &str, start: &str, end: &str, pool: &[&str]) -> ScheduleDefinition {
    ScheduleDefinition {
        id: ScheduleId::new(id),
        name: format!("{id} schedule"),
        periodicity_type: Periodicity::Daily,
        frequency_minutes: None,
        time_window: TimeWindow::parse(start, end).unwrap(),
        date_range: DateRange::from(NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()),
        days_of_week: None,
        annual_span: None,
        audio_mode: AudioMode::FadeOut,
        content_pool: pool
            .iter()
            .map(|item| AudioTrack::content(*item, format!("mem://{item}")))
            .collect(),
        enabled: true,
    }
}

pub fn every(minutes: u32, mut def: ScheduleDefinition) -> ScheduleDefinition {
    def.frequency_minutes = Some(minutes);
    def
}

/// Records started content instead of playing it; clones share state
#[derive(Clone, Default)]
pub struct FakePlayer {
    busy: Arc<AtomicBool>,
    fail: Arc<AtomicBool>,
    started: Arc<Mutex<Vec<(String, AudioMode)>>>,
}

impl FakePlayer {
    pub fn started_ids(&self) -> Vec<String> {
        self.started
            .lock()
            .unwrap()
            .iter()
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn started(&self) -> Vec<(String, AudioMode)> {
        self.started.lock().unwrap().clone()
    }

    pub fn set_busy(&self, busy: bool) {
        self.busy.store(busy, Ordering::SeqCst);
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ContentPlayer for FakePlayer {
    fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    async fn start_content(&self, item: AudioTrack, mode: AudioMode) -> Result<(), PlaybackError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(PlaybackError::InvalidState("output unavailable".to_string()));
        }
        self.started
            .lock()
            .unwrap()
            .push((item.id.as_str().to_string(), mode));
        Ok(())
    }
}
