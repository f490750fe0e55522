//! Core error types

use thiserror::Error;

/// Result type alias using `CoreError`
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised while validating or parsing core values
#[derive(Error, Debug)]
pub enum CoreError {
    /// A time-of-day string could not be parsed
    #[error("Invalid time of day: {0} (expected HH:MM or HH:MM:SS)")]
    InvalidTime(String),

    /// A month/day string could not be parsed
    #[error("Invalid month and day: {0} (expected MM-DD)")]
    InvalidMonthDay(String),

    /// Date range ends before it starts
    #[error("Invalid date range: end {end} is before start {start}")]
    InvalidDateRange {
        start: chrono::NaiveDate,
        end: chrono::NaiveDate,
    },

    /// Schedule definition failed validation
    #[error("Invalid schedule {id}: {reason}")]
    InvalidSchedule { id: String, reason: String },

    /// JSON (de)serialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoreError {
    /// Create an invalid schedule error
    pub fn invalid_schedule(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSchedule {
            id: id.into(),
            reason: reason.into(),
        }
    }
}
