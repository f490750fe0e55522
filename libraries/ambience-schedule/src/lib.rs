//! Ambience - Scheduling
//!
//! Decides when scheduled content plays and what plays:
//! - [`evaluator`]: time window, calendar and frequency rules
//! - [`ContentSelector`]: non-repeating random draws per schedule
//! - [`ExecutionStore`]: last firing per schedule, persisted across restarts
//! - [`ScheduleProvider`]: where definitions come from
//! - [`ScheduleOrchestrator`]: the poll loop tying them to the engine
//!
//! # Example
//!
//! ```rust
//! use ambience_core::ScheduleDefinition;
//! use ambience_schedule::evaluator;
//! use chrono::NaiveDate;
//!
//! let def: ScheduleDefinition = serde_json::from_str(r#"{
//!     "id": "promo", "name": "Promo", "periodicityType": "daily",
//!     "timeWindow": { "start": "10:00", "end": "18:00" },
//!     "dateRange": { "start": "2025-01-01" },
//!     "audioMode": "background",
//!     "contentPool": [{ "id": "ad", "sourceUri": "ad.mp3", "category": "content" }]
//! }"#).unwrap();
//!
//! let now = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap().and_hms_opt(10, 5, 0).unwrap();
//! assert!(evaluator::is_due(&def, now, None));
//! assert!(!evaluator::is_due(&def, now, Some(now)));
//! ```

#![deny(unsafe_code)]

pub mod error;
pub mod evaluator;
pub mod orchestrator;
pub mod provider;
pub mod selector;
pub mod store;

pub use error::{Result, ScheduleError};
pub use orchestrator::{ContentPlayer, OrchestratorConfig, ScheduleOrchestrator, TickOutcome};
pub use provider::{Catalog, JsonCatalogProvider, ScheduleProvider, StaticScheduleProvider};
pub use selector::{ContentBag, ContentSelector};
pub use store::{ExecutionStore, JsonExecutionStore, MemoryExecutionStore};
