/// Schedule execution record
use crate::types::ScheduleId;
use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Last time a schedule fired, in local wall-clock time
///
/// Persisted across restarts so once-per-day schedules do not fire again
/// after a reboot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    /// Schedule that fired
    pub schedule_id: ScheduleId,
    /// Local timestamp of the firing
    pub last_fired: NaiveDateTime,
}

impl ExecutionRecord {
    /// Create a record
    pub fn new(schedule_id: impl Into<ScheduleId>, last_fired: NaiveDateTime) -> Self {
        Self {
            schedule_id: schedule_id.into(),
            last_fired,
        }
    }

    /// Whether the record is older than `retention` relative to `now`
    pub fn is_expired(&self, now: NaiveDateTime, retention: Duration) -> bool {
        now.signed_duration_since(self.last_fired) > retention
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn expiry_uses_retention_window() {
        let fired = NaiveDate::from_ymd_opt(2025, 1, 1)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        let record = ExecutionRecord::new("s1", fired);

        let six_days = fired + Duration::days(6);
        let eight_days = fired + Duration::days(8);
        assert!(!record.is_expired(six_days, Duration::days(7)));
        assert!(record.is_expired(eight_days, Duration::days(7)));
    }
}
