//! Shared helpers for engine integration tests

#![allow(dead_code)]

use ambience_core::AudioTrack;
use ambience_playback::{
    AudioSource, CaptureOutput, EngineConfig, LoadError, MediaLoader, PlaybackEngine,
    PlaybackError, PlaybackEvent, Result,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const RATE: u32 = 4000;

/// Recipe for a synthetic track
#[derive(Debug, Clone)]
pub struct Tone {
    pub amplitude: f32,
    pub seconds: f64,
    /// Position where the source stops producing samples without finishing
    pub stall_at: Option<f64>,
    /// Report buffering while stalled
    pub buffering: bool,
    /// Number of `start()` calls to reject (shared across reloads)
    pub reject_starts: Arc<AtomicUsize>,
    /// Milliseconds the next read blocks for, then resets (shared across reloads)
    pub hang_ms: Arc<AtomicU64>,
}

impl Tone {
    pub fn new(amplitude: f32, seconds: f64) -> Self {
        Self {
            amplitude,
            seconds,
            stall_at: None,
            buffering: false,
            reject_starts: Arc::new(AtomicUsize::new(0)),
            hang_ms: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn stalling_at(mut self, seconds: f64) -> Self {
        self.stall_at = Some(seconds);
        self
    }

    pub fn rejecting(self, starts: usize) -> Self {
        self.reject_starts.store(starts, Ordering::SeqCst);
        self
    }
}

/// Square wave, so the RMS level equals the amplitude
pub struct ToneSource {
    amplitude: f32,
    total_frames: u64,
    cursor: u64,
    stall_frame: Option<u64>,
    buffering: bool,
    reject_starts: Arc<AtomicUsize>,
    hang_ms: Arc<AtomicU64>,
}

impl ToneSource {
    pub fn new(tone: &Tone) -> Self {
        let frames = |seconds: f64| (seconds * f64::from(RATE)) as u64;
        Self {
            amplitude: tone.amplitude,
            total_frames: frames(tone.seconds),
            cursor: 0,
            stall_frame: tone.stall_at.map(frames),
            buffering: tone.buffering,
            reject_starts: Arc::clone(&tone.reject_starts),
            hang_ms: Arc::clone(&tone.hang_ms),
        }
    }

    fn stalled(&self) -> bool {
        self.stall_frame.is_some_and(|frame| self.cursor >= frame)
    }
}

impl AudioSource for ToneSource {
    fn read_samples(&mut self, buffer: &mut [f32]) -> Result<usize> {
        let hang = self.hang_ms.swap(0, Ordering::SeqCst);
        if hang > 0 {
            // Blocking decoder: holds up the whole render pass
            std::thread::sleep(Duration::from_millis(hang));
        }
        let limit = self.stall_frame.unwrap_or(self.total_frames).min(self.total_frames);
        let frames = ((buffer.len() / 2) as u64).min(limit.saturating_sub(self.cursor));
        for (i, frame) in buffer.chunks_mut(2).take(frames as usize).enumerate() {
            let sign = if (self.cursor + i as u64) % 2 == 0 { 1.0 } else { -1.0 };
            frame.fill(self.amplitude * sign);
        }
        self.cursor += frames;
        Ok(frames as usize * 2)
    }

    fn seek(&mut self, position: Duration) -> Result<()> {
        let frame = (position.as_secs_f64() * f64::from(RATE)) as u64;
        if frame > self.total_frames {
            return Err(PlaybackError::InvalidSeekPosition(position));
        }
        self.cursor = frame;
        Ok(())
    }

    fn duration(&self) -> Option<Duration> {
        Some(Duration::from_secs_f64(self.total_frames as f64 / f64::from(RATE)))
    }

    fn position(&self) -> Duration {
        Duration::from_secs_f64(self.cursor as f64 / f64::from(RATE))
    }

    fn is_finished(&self) -> bool {
        self.cursor >= self.total_frames
    }

    fn is_buffering(&self) -> bool {
        self.buffering && self.stalled()
    }

    fn start(&mut self) -> Result<()> {
        let pending = self.reject_starts.load(Ordering::SeqCst);
        if pending > 0 {
            self.reject_starts.store(pending - 1, Ordering::SeqCst);
            return Err(PlaybackError::InvalidState("decoder not ready".to_string()));
        }
        Ok(())
    }
}

/// Loader serving registered tones by track id
#[derive(Default)]
pub struct ToneLoader {
    tones: Mutex<HashMap<String, Tone>>,
    loads: AtomicUsize,
}

impl ToneLoader {
    pub fn add(&self, id: &str, tone: Tone) {
        self.tones.lock().unwrap().insert(id.to_string(), tone);
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaLoader for ToneLoader {
    async fn load(&self, track: &AudioTrack) -> std::result::Result<Box<dyn AudioSource>, LoadError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let tone = self
            .tones
            .lock()
            .unwrap()
            .get(track.id.as_str())
            .cloned()
            .ok_or_else(|| LoadError::NotFound(track.source_uri.clone()))?;
        Ok(Box::new(ToneSource::new(&tone)))
    }
}

pub fn config() -> EngineConfig {
    EngineConfig {
        sample_rate: RATE,
        ..EngineConfig::default()
    }
}

pub struct Harness {
    pub engine: PlaybackEngine,
    pub loader: Arc<ToneLoader>,
    pub output: CaptureOutput,
    pub events: Arc<Mutex<Vec<PlaybackEvent>>>,
}

impl Harness {
    pub fn start(config: EngineConfig) -> Self {
        let loader = Arc::new(ToneLoader::default());
        let output = CaptureOutput::new();
        let engine = PlaybackEngine::start(
            config,
            Arc::clone(&loader) as Arc<dyn MediaLoader>,
            Box::new(output.clone()),
        );

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        engine.events().on_any(move |event| {
            if !matches!(event, PlaybackEvent::TimeUpdate { .. }) {
                sink.lock().unwrap().push(event.clone());
            }
        });

        Self {
            engine,
            loader,
            output,
            events,
        }
    }

    pub fn events(&self) -> Vec<PlaybackEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, predicate: impl Fn(&PlaybackEvent) -> bool) -> usize {
        self.events().iter().filter(|e| predicate(e)).count()
    }

    /// Register a tone and return a matching music track
    pub fn music(&self, id: &str, tone: Tone) -> AudioTrack {
        let seconds = tone.seconds;
        self.loader.add(id, tone);
        AudioTrack::music(id, format!("mem://{id}")).with_duration(seconds)
    }

    pub fn content(&self, id: &str, tone: Tone) -> AudioTrack {
        let seconds = tone.seconds;
        self.loader.add(id, tone);
        AudioTrack::content(id, format!("mem://{id}")).with_duration(seconds)
    }

    pub fn current_id(&self) -> Option<String> {
        self.engine
            .get_state()
            .current_track
            .map(|t| t.id.as_str().to_string())
    }
}

pub async fn advance(seconds: f64) {
    tokio::time::sleep(Duration::from_secs_f64(seconds)).await;
}
