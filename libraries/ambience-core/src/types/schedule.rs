/// Schedule definition value types
use crate::error::{CoreError, Result};
use crate::types::{AudioTrack, ScheduleId};
use chrono::{Datelike, NaiveDate, NaiveTime, Weekday};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// How often a schedule repeats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Periodicity {
    /// Every day inside the date range
    Daily,
    /// On the listed weekdays
    Weekly,
    /// Every year on the month/day span of the date range
    Annual,
    /// On the start date only
    Once,
}

/// How injected content is combined with the music bed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioMode {
    /// Fade the bed out, play the content alone, fade the bed back in
    FadeOut,
    /// Duck the bed and play the content over it
    Background,
}

/// Time-of-day window, inclusive on both ends
///
/// A window whose start is after its end wraps past midnight
/// (e.g. 22:00-02:00).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    /// Window start
    #[serde(with = "time_of_day")]
    pub start: NaiveTime,
    /// Window end
    #[serde(with = "time_of_day")]
    pub end: NaiveTime,
}

impl TimeWindow {
    /// Create a window
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    /// Parse a window from two `HH:MM` strings
    pub fn parse(start: &str, end: &str) -> Result<Self> {
        Ok(Self {
            start: time_of_day::parse(start)?,
            end: time_of_day::parse(end)?,
        })
    }

    /// Whole day
    pub fn all_day() -> Self {
        Self {
            start: NaiveTime::MIN,
            end: NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN),
        }
    }

    /// Whether the window wraps past midnight
    pub fn wraps_midnight(&self) -> bool {
        self.start > self.end
    }

    /// Whether `time` falls inside the window
    pub fn contains(&self, time: NaiveTime) -> bool {
        if self.wraps_midnight() {
            time >= self.start || time <= self.end
        } else {
            time >= self.start && time <= self.end
        }
    }
}

/// Calendar date range, inclusive; an absent end is open-ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    /// First day
    pub start: NaiveDate,
    /// Last day (open-ended when absent)
    #[serde(default)]
    pub end: Option<NaiveDate>,
}

impl DateRange {
    /// Open-ended range starting at `start`
    pub fn from(start: NaiveDate) -> Self {
        Self { start, end: None }
    }

    /// Closed range
    pub fn between(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            start,
            end: Some(end),
        }
    }

    /// Whether `date` falls inside the range
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && self.end.map_or(true, |end| date <= end)
    }
}

/// Calendar day without a year, written `MM-DD`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MonthDay {
    month: u32,
    day: u32,
}

impl MonthDay {
    /// Any day that exists in a leap year, so 02-29 is accepted
    pub fn new(month: u32, day: u32) -> Result<Self> {
        NaiveDate::from_ymd_opt(2000, month, day)
            .map(|_| Self { month, day })
            .ok_or_else(|| CoreError::InvalidMonthDay(format!("{:02}-{:02}", month, day)))
    }

    /// Month and day of `date`
    pub fn of(date: NaiveDate) -> Self {
        Self {
            month: date.month(),
            day: date.day(),
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let invalid = || CoreError::InvalidMonthDay(s.to_string());
        let (month, day) = s.split_once('-').ok_or_else(invalid)?;
        let month = month.parse().map_err(|_| invalid())?;
        let day = day.parse().map_err(|_| invalid())?;
        Self::new(month, day).map_err(|_| invalid())
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn day(&self) -> u32 {
        self.day
    }
}

impl std::fmt::Display for MonthDay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}-{:02}", self.month, self.day)
    }
}

impl Serialize for MonthDay {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MonthDay {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Days of the year an `annual` schedule recurs on, inclusive
///
/// A span whose end precedes its start wraps over new year
/// (e.g. 12-20 to 01-06).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnualSpan {
    pub start: MonthDay,
    pub end: MonthDay,
}

impl AnnualSpan {
    pub fn new(start: MonthDay, end: MonthDay) -> Self {
        Self { start, end }
    }

    /// A single day every year
    pub fn day(day: MonthDay) -> Self {
        Self {
            start: day,
            end: day,
        }
    }

    /// Whether the month and day of `date` fall inside the span
    pub fn contains(&self, date: NaiveDate) -> bool {
        let day = MonthDay::of(date);
        if self.start <= self.end {
            day >= self.start && day <= self.end
        } else {
            day >= self.start || day <= self.end
        }
    }
}

/// Declarative rule describing when content is injected
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleDefinition {
    /// Unique schedule identifier
    pub id: ScheduleId,

    /// Human-readable name
    pub name: String,

    /// Repetition rule
    pub periodicity_type: Periodicity,

    /// Fire every N minutes inside the window; absent or 0 means once per day
    #[serde(default)]
    pub frequency_minutes: Option<u32>,

    /// Time-of-day window
    pub time_window: TimeWindow,

    /// Calendar range
    pub date_range: DateRange,

    /// Weekday filter (absent or empty means every day)
    #[serde(default, with = "weekdays")]
    pub days_of_week: Option<Vec<Weekday>>,

    /// Yearly span of `annual` schedules; the date range still bounds it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annual_span: Option<AnnualSpan>,

    /// How the content meets the music bed
    pub audio_mode: AudioMode,

    /// Content drawn from on each firing, in declaration order
    pub content_pool: Vec<AudioTrack>,

    /// Disabled schedules are never evaluated
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl ScheduleDefinition {
    /// Effective frequency: `None` for absent or zero
    pub fn frequency(&self) -> Option<u32> {
        self.frequency_minutes.filter(|m| *m > 0)
    }

    /// Whether the weekday filter admits `day`
    pub fn allows_weekday(&self, day: Weekday) -> bool {
        match &self.days_of_week {
            Some(days) if !days.is_empty() => days.contains(&day),
            _ => true,
        }
    }

    /// Span an `annual` schedule recurs on: the explicit one, or the month
    /// and day of the range start
    pub fn recurrence_span(&self) -> AnnualSpan {
        self.annual_span
            .unwrap_or_else(|| AnnualSpan::day(MonthDay::of(self.date_range.start)))
    }

    /// Check the definition for values the evaluator cannot honour
    pub fn validate(&self) -> Result<()> {
        if let Some(end) = self.date_range.end {
            if end < self.date_range.start {
                return Err(CoreError::InvalidDateRange {
                    start: self.date_range.start,
                    end,
                });
            }
        }
        if let Some(freq) = self.frequency() {
            if freq > 24 * 60 {
                return Err(CoreError::invalid_schedule(
                    self.id.as_str(),
                    format!("frequency of {} minutes exceeds one day", freq),
                ));
            }
        }
        if self.content_pool.is_empty() {
            return Err(CoreError::invalid_schedule(
                self.id.as_str(),
                "content pool is empty",
            ));
        }
        Ok(())
    }
}

/// `HH:MM` / `HH:MM:SS` (de)serialization for `NaiveTime`
mod time_of_day {
    use super::*;

    pub fn parse(s: &str) -> Result<NaiveTime> {
        let s = s.trim();
        NaiveTime::parse_from_str(s, "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
            .map_err(|_| CoreError::InvalidTime(s.to_string()))
    }

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let formatted = if chrono::Timelike::second(time) == 0 {
            time.format("%H:%M").to_string()
        } else {
            time.format("%H:%M:%S").to_string()
        };
        serializer.serialize_str(&formatted)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<NaiveTime, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Weekdays as names ("mon", "Monday") or numbers (0 = Sunday ... 6 = Saturday)
mod weekdays {
    use super::*;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum WeekdayRepr {
        Index(u8),
        Name(String),
    }

    fn from_index(index: u8) -> Option<Weekday> {
        match index {
            0 | 7 => Some(Weekday::Sun),
            1 => Some(Weekday::Mon),
            2 => Some(Weekday::Tue),
            3 => Some(Weekday::Wed),
            4 => Some(Weekday::Thu),
            5 => Some(Weekday::Fri),
            6 => Some(Weekday::Sat),
            _ => None,
        }
    }

    pub fn serialize<S: Serializer>(
        days: &Option<Vec<Weekday>>,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        match days {
            Some(days) => {
                let names: Vec<String> = days.iter().map(ToString::to_string).collect();
                serializer.collect_seq(names)
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Option<Vec<Weekday>>, D::Error> {
        let raw: Option<Vec<WeekdayRepr>> = Option::deserialize(deserializer)?;
        let Some(raw) = raw else {
            return Ok(None);
        };

        raw.into_iter()
            .map(|repr| match repr {
                WeekdayRepr::Index(i) => from_index(i)
                    .ok_or_else(|| serde::de::Error::custom(format!("invalid weekday index {}", i))),
                WeekdayRepr::Name(name) => name
                    .parse::<Weekday>()
                    .map_err(|_| serde::de::Error::custom(format!("invalid weekday {}", name))),
            })
            .collect::<std::result::Result<Vec<_>, _>>()
            .map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn window_contains_inclusive_bounds() {
        let window = TimeWindow::parse("10:00", "18:00").unwrap();
        assert!(window.contains(time(10, 0)));
        assert!(window.contains(time(18, 0)));
        assert!(!window.contains(time(9, 59)));
        assert!(!window.contains(time(18, 1)));
    }

    #[test]
    fn overnight_window_wraps() {
        let window = TimeWindow::parse("22:00", "02:00").unwrap();
        assert!(window.wraps_midnight());
        assert!(window.contains(time(23, 30)));
        assert!(window.contains(time(1, 0)));
        assert!(!window.contains(time(12, 0)));
    }

    #[test]
    fn open_ended_date_range() {
        let range = DateRange::from(date(2025, 1, 1));
        assert!(range.contains(date(2030, 6, 1)));
        assert!(!range.contains(date(2024, 12, 31)));

        let closed = DateRange::between(date(2025, 1, 1), date(2025, 1, 31));
        assert!(!closed.contains(date(2025, 2, 1)));
    }

    #[test]
    fn parses_provider_schedule() {
        let json = r#"{
            "id": "lunch",
            "name": "Lunch promos",
            "periodicityType": "weekly",
            "frequencyMinutes": 15,
            "timeWindow": { "start": "11:30", "end": "14:00:30" },
            "dateRange": { "start": "2025-03-01" },
            "daysOfWeek": ["mon", 5, "Saturday"],
            "audioMode": "background",
            "contentPool": [
                { "id": "ad-1", "sourceUri": "ad-1.mp3", "category": "content" }
            ]
        }"#;

        let def: ScheduleDefinition = serde_json::from_str(json).unwrap();
        assert_eq!(def.periodicity_type, Periodicity::Weekly);
        assert_eq!(def.frequency(), Some(15));
        assert_eq!(def.audio_mode, AudioMode::Background);
        assert_eq!(
            def.days_of_week,
            Some(vec![Weekday::Mon, Weekday::Fri, Weekday::Sat])
        );
        assert!(def.enabled);
        assert!(def.date_range.end.is_none());
        assert_eq!(def.time_window.end, NaiveTime::from_hms_opt(14, 0, 30).unwrap());
        def.validate().unwrap();

        let round_trip = serde_json::to_string(&def).unwrap();
        assert!(round_trip.contains("\"11:30\""));
    }

    #[test]
    fn zero_frequency_means_once_per_day() {
        let json = r#"{
            "id": "s", "name": "s", "periodicityType": "daily", "frequencyMinutes": 0,
            "timeWindow": { "start": "00:00", "end": "23:59" },
            "dateRange": { "start": "2025-01-01" },
            "audioMode": "fade_out",
            "contentPool": [{ "id": "a", "sourceUri": "a.mp3", "category": "content" }]
        }"#;
        let def: ScheduleDefinition = serde_json::from_str(json).unwrap();
        assert_eq!(def.frequency(), None);
    }

    #[test]
    fn validate_rejects_inverted_range_and_empty_pool() {
        let mut def: ScheduleDefinition = serde_json::from_str(
            r#"{
            "id": "s", "name": "s", "periodicityType": "daily",
            "timeWindow": { "start": "08:00", "end": "09:00" },
            "dateRange": { "start": "2025-05-10", "end": "2025-05-01" },
            "audioMode": "fade_out",
            "contentPool": []
        }"#,
        )
        .unwrap();

        assert!(matches!(def.validate(), Err(CoreError::InvalidDateRange { .. })));

        def.date_range.end = None;
        assert!(matches!(def.validate(), Err(CoreError::InvalidSchedule { .. })));
    }

    #[test]
    fn missing_weekday_filter_admits_every_day() {
        let mut def: ScheduleDefinition = serde_json::from_str(
            r#"{
            "id": "w", "name": "w", "periodicityType": "weekly",
            "timeWindow": { "start": "08:00", "end": "09:00" },
            "dateRange": { "start": "2025-06-02" },
            "audioMode": "fade_out",
            "contentPool": [{ "id": "a", "sourceUri": "a.mp3", "category": "content" }]
        }"#,
        )
        .unwrap();

        assert!(def.allows_weekday(Weekday::Mon));
        assert!(def.allows_weekday(Weekday::Tue));

        def.days_of_week = Some(Vec::new());
        assert!(def.allows_weekday(Weekday::Sun));

        def.days_of_week = Some(vec![Weekday::Mon]);
        assert!(!def.allows_weekday(Weekday::Tue));
    }

    #[test]
    fn annual_span_parses_and_wraps() {
        let def: ScheduleDefinition = serde_json::from_str(
            r#"{
            "id": "h", "name": "h", "periodicityType": "annual",
            "timeWindow": { "start": "08:00", "end": "20:00" },
            "dateRange": { "start": "2025-01-01" },
            "annualSpan": { "start": "12-20", "end": "01-06" },
            "audioMode": "fade_out",
            "contentPool": [{ "id": "a", "sourceUri": "a.mp3", "category": "content" }]
        }"#,
        )
        .unwrap();

        let span = def.recurrence_span();
        assert_eq!(span.start.to_string(), "12-20");
        assert!(span.contains(date(2031, 12, 31)));
        assert!(span.contains(date(2032, 1, 6)));
        assert!(!span.contains(date(2032, 1, 7)));

        let round_trip = serde_json::to_string(&def).unwrap();
        assert!(round_trip.contains(r#""annualSpan":{"start":"12-20","end":"01-06"}"#));
    }

    #[test]
    fn recurrence_defaults_to_range_start_day() {
        let def: ScheduleDefinition = serde_json::from_str(
            r#"{
            "id": "h", "name": "h", "periodicityType": "annual",
            "timeWindow": { "start": "08:00", "end": "20:00" },
            "dateRange": { "start": "2025-07-04" },
            "audioMode": "fade_out",
            "contentPool": [{ "id": "a", "sourceUri": "a.mp3", "category": "content" }]
        }"#,
        )
        .unwrap();
        assert_eq!(def.recurrence_span(), AnnualSpan::day(MonthDay::new(7, 4).unwrap()));
        assert!(!serde_json::to_string(&def).unwrap().contains("annualSpan"));
    }

    #[test]
    fn month_day_validation() {
        assert!(MonthDay::parse("02-29").is_ok());
        assert!(matches!(MonthDay::parse("02-30"), Err(CoreError::InvalidMonthDay(_))));
        assert!(matches!(MonthDay::parse("13-01"), Err(CoreError::InvalidMonthDay(_))));
        assert!(matches!(MonthDay::parse("1201"), Err(CoreError::InvalidMonthDay(_))));
    }

    #[test]
    fn rejects_bad_time() {
        assert!(matches!(TimeWindow::parse("25:00", "10:00"), Err(CoreError::InvalidTime(_))));
    }
}
