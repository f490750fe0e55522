//! Ambience - Playback Engine
//!
//! Continuous music playback for ambient/background music with scheduled
//! content injected on top.
//!
//! This crate provides:
//! - Two alternating playback slots with gapless crossfades
//! - Content injection (`fade_out` and `background` modes, with an
//!   output-path reuse variant)
//! - Loudness parity for injected content via `ambience-loudness`
//! - Master/music/content volume scalars
//! - A stall watchdog that soft-resumes or skips stuck tracks
//! - A synchronous event registry
//!
//! # Architecture
//!
//! ```text
//!              ┌───────────────── PlaybackEngine ─────────────────┐
//! MediaLoader ─►  slot A ─┐                                        │
//!              │  slot B ─┼─► Mixer (per-block gain) ─► AudioOutput │
//!              │  content ┘                                        │
//!              └─────┬──────────────────────────────┬─────────────┘
//!                    │ EventBus                     ▲ PlaybackControl
//!                    ▼                              │
//!               subscribers                 RecoveryWatchdog
//! ```
//!
//! Device backends stay outside the engine: the caller provides an
//! [`AudioOutput`] and a [`MediaLoader`]. [`SymphoniaLoader`] decodes local
//! files; [`WriterOutput`] streams PCM to any writer.
//!
//! # Example: crossfade plan
//!
//! ```rust
//! use ambience_playback::{CrossfadePlan, FadeCurve};
//!
//! let plan = CrossfadePlan::new(0.8, 0.6, 60, FadeCurve::Linear);
//! let halfway = plan.step(30);
//! assert!((halfway.outgoing - 0.4).abs() < 1e-4);
//! assert!((halfway.incoming - 0.3).abs() < 1e-4);
//! assert!(halfway.outgoing + halfway.incoming <= plan.peak_bound() + 1e-6);
//! ```

#![deny(unsafe_code)]

pub mod crossfade;
mod decoder;
mod engine;
pub mod error;
pub mod events;
mod injection;
mod mixer;
mod output;
mod slot;
mod source;
pub mod state;
mod volume;
pub mod watchdog;

pub use crossfade::{CrossfadePlan, CrossfadeSettings, CrossfadeStep, FadeCurve};
pub use decoder::SymphoniaLoader;
pub use engine::{EngineConfig, PlaybackEngine};
pub use error::{LoadError, PlaybackError, Result};
pub use events::{EndReason, ErrorKind, EventBus, EventKind, PlaybackEvent, SubscriptionId};
pub use injection::{InjectionHandle, InjectionOutcome};
pub use output::{AudioOutput, CaptureOutput, NullOutput, WriterOutput};
pub use slot::SlotId;
pub use source::{AudioSource, MediaLoader, PcmSource};
pub use state::{PlaybackState, PlaybackStatus, SessionMode, Trigger};
pub use volume::{clamp_volume, TrackGain, VolumeScalars};
pub use watchdog::{CheckOutcome, PlaybackControl, RecoveryWatchdog, WatchdogConfig};
