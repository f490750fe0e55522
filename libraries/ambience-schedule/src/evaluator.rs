//! Schedule evaluation
//!
//! Pure functions over local wall-clock time. A schedule is *due* when its
//! window matches ([`matches_window`]) and its firing rule agrees
//! ([`should_fire_now`]).
//!
//! Overnight windows (22:00-02:00) belong to the day they start on: at
//! 01:00 the window is evaluated against yesterday's date, and a
//! once-per-day schedule that fired at 23:00 does not fire again after
//! midnight.

use ambience_core::{Periodicity, ScheduleDefinition, TimeWindow};
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Timelike};

/// How far ahead [`next_fire_after`] searches (four years plus a leap day)
const LOOKAHEAD_DAYS: i64 = 4 * 366;

/// Calendar date the window occurrence containing `now` started on
pub fn anchor_date(window: &TimeWindow, now: NaiveDateTime) -> NaiveDate {
    let date = now.date();
    if window.wraps_midnight() && now.time() <= window.end {
        date.pred_opt().unwrap_or(date)
    } else {
        date
    }
}

/// Whether the calendar filters admit a window starting on `date`
///
/// The date range bounds every periodicity; `annual` schedules are further
/// limited to their recurrence span.
pub fn matches_date(def: &ScheduleDefinition, date: NaiveDate) -> bool {
    let range = &def.date_range;
    match def.periodicity_type {
        Periodicity::Daily | Periodicity::Weekly => {
            range.contains(date) && def.allows_weekday(date.weekday())
        }
        Periodicity::Annual => {
            range.contains(date)
                && def.recurrence_span().contains(date)
                && def.allows_weekday(date.weekday())
        }
        Periodicity::Once => date == range.start,
    }
}

/// Whether `def` is enabled and `now` falls inside its date, weekday and
/// time-of-day filters
pub fn matches_window(def: &ScheduleDefinition, now: NaiveDateTime) -> bool {
    def.enabled
        && def.time_window.contains(now.time())
        && matches_date(def, anchor_date(&def.time_window, now))
}

/// Firing rule, given the previous firing
///
/// Without a frequency the schedule fires at most once per window day.
/// With a frequency of N minutes it fires on minutes of the day divisible
/// by N, never twice within the same minute. `once` schedules never fire a
/// second time.
///
/// This does not check the window; see [`is_due`].
pub fn should_fire_now(
    def: &ScheduleDefinition,
    now: NaiveDateTime,
    last: Option<NaiveDateTime>,
) -> bool {
    if def.periodicity_type == Periodicity::Once && last.is_some() {
        return false;
    }

    match def.frequency() {
        None => last.map_or(true, |last| {
            anchor_date(&def.time_window, last) != anchor_date(&def.time_window, now)
        }),
        Some(every) => {
            let minute_of_day = now.hour() * 60 + now.minute();
            minute_of_day % every == 0 && last.map_or(true, |last| !same_minute(last, now))
        }
    }
}

fn same_minute(a: NaiveDateTime, b: NaiveDateTime) -> bool {
    a.date() == b.date() && a.hour() == b.hour() && a.minute() == b.minute()
}

/// [`matches_window`] and [`should_fire_now`] together
pub fn is_due(def: &ScheduleDefinition, now: NaiveDateTime, last: Option<NaiveDateTime>) -> bool {
    matches_window(def, now) && should_fire_now(def, now, last)
}

/// First whole minute strictly after `after` at which `def` would fire,
/// assuming `last` stays the most recent firing
///
/// Returns `None` for disabled schedules, spent `once` schedules and
/// schedules with no firing in the next four years.
pub fn next_fire_after(
    def: &ScheduleDefinition,
    after: NaiveDateTime,
    last: Option<NaiveDateTime>,
) -> Option<NaiveDateTime> {
    if !def.enabled || (def.periodicity_type == Periodicity::Once && last.is_some()) {
        return None;
    }

    let first = floor_minute(after) + Duration::minutes(1);
    let window = def.time_window;
    let first_day = first.date().pred_opt().unwrap_or(first.date());

    for offset in 0..=LOOKAHEAD_DAYS {
        let day = first_day + Duration::days(offset);
        if !matches_date(def, day) {
            continue;
        }

        let opens = day.and_time(window.start);
        let closes = if window.wraps_midnight() {
            day.succ_opt()?.and_time(window.end)
        } else {
            day.and_time(window.end)
        };

        let mut candidate = ceil_minute(opens.max(first));
        while candidate <= closes {
            if is_due(def, candidate, last) {
                return Some(candidate);
            }
            if def.frequency().is_none() {
                // Once-per-day: if the opening minute is not due, no later minute will be
                break;
            }
            candidate += Duration::minutes(1);
        }
    }

    None
}

fn floor_minute(t: NaiveDateTime) -> NaiveDateTime {
    t.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(t)
}

fn ceil_minute(t: NaiveDateTime) -> NaiveDateTime {
    let floor = floor_minute(t);
    if floor < t {
        floor + Duration::minutes(1)
    } else {
        floor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ambience_core::{AnnualSpan, AudioMode, AudioTrack, DateRange, MonthDay, ScheduleId};
    use chrono::Weekday;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        date(y, m, d).and_hms_opt(h, min, 0).unwrap()
    }

    fn schedule(periodicity: Periodicity, start: &str, end: &str) -> ScheduleDefinition {
        ScheduleDefinition {
            id: ScheduleId::new("s"),
            name: "test".to_string(),
            periodicity_type: periodicity,
            frequency_minutes: None,
            time_window: TimeWindow::parse(start, end).unwrap(),
            date_range: DateRange::from(date(2025, 1, 1)),
            days_of_week: None,
            annual_span: None,
            audio_mode: AudioMode::FadeOut,
            content_pool: vec![AudioTrack::content("ad", "ad.mp3")],
            enabled: true,
        }
    }

    #[test]
    fn once_per_day_fires_until_recorded() {
        let def = schedule(Periodicity::Daily, "10:00", "18:00");
        let now = at(2025, 6, 2, 10, 5);

        assert!(matches_window(&def, now));
        assert!(should_fire_now(&def, now, None));
        // Yesterday's firing does not count
        assert!(should_fire_now(&def, now, Some(at(2025, 6, 1, 17, 0))));
        assert!(!should_fire_now(&def, at(2025, 6, 2, 15, 0), Some(now)));
    }

    #[test]
    fn frequency_aligns_to_minute_of_day() {
        let mut def = schedule(Periodicity::Daily, "00:00", "23:59");
        def.frequency_minutes = Some(15);

        assert!(should_fire_now(&def, at(2025, 6, 2, 10, 15), None));
        assert!(!should_fire_now(&def, at(2025, 6, 2, 10, 16), None));
        assert!(should_fire_now(&def, at(2025, 6, 2, 0, 0), None));

        let fired = at(2025, 6, 2, 10, 15);
        let jitter = fired + Duration::seconds(30);
        assert!(!should_fire_now(&def, jitter, Some(fired)));
        assert!(should_fire_now(&def, at(2025, 6, 2, 10, 30), Some(fired)));
        // Same minute of day on another date is a new slot
        assert!(should_fire_now(&def, at(2025, 6, 3, 10, 15), Some(fired)));
    }

    #[test]
    fn window_bounds_are_inclusive() {
        let def = schedule(Periodicity::Daily, "10:00", "18:00");
        assert!(matches_window(&def, at(2025, 6, 2, 10, 0)));
        assert!(matches_window(&def, at(2025, 6, 2, 18, 0)));
        assert!(!matches_window(&def, at(2025, 6, 2, 18, 1)));
        assert!(!matches_window(&def, at(2025, 6, 2, 9, 59)));
    }

    #[test]
    fn disabled_and_out_of_range_never_match() {
        let mut def = schedule(Periodicity::Daily, "00:00", "23:59");
        def.date_range = DateRange::between(date(2025, 3, 1), date(2025, 3, 31));
        assert!(matches_window(&def, at(2025, 3, 15, 12, 0)));
        assert!(!matches_window(&def, at(2025, 4, 1, 12, 0)));
        assert!(!matches_window(&def, at(2025, 2, 28, 12, 0)));

        def.enabled = false;
        assert!(!matches_window(&def, at(2025, 3, 15, 12, 0)));
    }

    #[test]
    fn weekday_filter() {
        let mut def = schedule(Periodicity::Weekly, "09:00", "17:00");
        def.days_of_week = Some(vec![Weekday::Mon, Weekday::Wed]);

        // 2025-06-02 is a Monday
        assert!(matches_window(&def, at(2025, 6, 2, 12, 0)));
        assert!(!matches_window(&def, at(2025, 6, 3, 12, 0)));
        assert!(matches_window(&def, at(2025, 6, 4, 12, 0)));
    }

    #[test]
    fn overnight_window_belongs_to_its_start_day() {
        let mut def = schedule(Periodicity::Weekly, "22:00", "02:00");
        def.days_of_week = Some(vec![Weekday::Fri]);

        // Friday 23:00 and the following Saturday 01:00 are the same occurrence
        let friday = at(2025, 6, 6, 23, 0);
        let after_midnight = at(2025, 6, 7, 1, 0);
        assert!(matches_window(&def, friday));
        assert!(matches_window(&def, after_midnight));
        assert!(!matches_window(&def, at(2025, 6, 7, 23, 0)));

        assert!(!should_fire_now(&def, after_midnight, Some(friday)));
        assert!(should_fire_now(&def, at(2025, 6, 13, 22, 0), Some(friday)));
    }

    #[test]
    fn weekly_without_days_matches_every_day() {
        let mut def = schedule(Periodicity::Weekly, "10:00", "18:00");
        // Starts on a Monday
        def.date_range = DateRange::from(date(2025, 6, 2));

        assert!(matches_window(&def, at(2025, 6, 2, 12, 0)));
        assert!(matches_window(&def, at(2025, 6, 3, 12, 0)));
        assert!(matches_window(&def, at(2025, 6, 8, 12, 0)));
    }

    #[test]
    fn annual_span_wraps_new_year() {
        let mut def = schedule(Periodicity::Annual, "08:00", "20:00");
        def.date_range = DateRange::from(date(2024, 12, 20));
        def.annual_span = Some(AnnualSpan::new(
            MonthDay::new(12, 20).unwrap(),
            MonthDay::new(1, 6).unwrap(),
        ));

        assert!(matches_window(&def, at(2026, 12, 24, 12, 0)));
        assert!(matches_window(&def, at(2027, 1, 3, 12, 0)));
        assert!(!matches_window(&def, at(2026, 7, 1, 12, 0)));
        // Nothing before the range starts
        assert!(!matches_window(&def, at(2024, 1, 3, 12, 0)));
    }

    #[test]
    fn annual_stops_at_range_end() {
        let mut def = schedule(Periodicity::Annual, "08:00", "20:00");
        def.date_range = DateRange::between(date(2025, 3, 1), date(2026, 12, 31));
        def.annual_span = Some(AnnualSpan::new(
            MonthDay::new(3, 1).unwrap(),
            MonthDay::new(3, 31).unwrap(),
        ));

        assert!(matches_window(&def, at(2025, 3, 15, 12, 0)));
        assert!(matches_window(&def, at(2026, 3, 15, 12, 0)));
        assert!(!matches_window(&def, at(2026, 4, 1, 12, 0)));
        assert!(!matches_window(&def, at(2027, 3, 15, 12, 0)));
    }

    #[test]
    fn annual_without_span_recurs_on_start_day() {
        let mut def = schedule(Periodicity::Annual, "08:00", "20:00");
        def.date_range = DateRange::from(date(2025, 7, 4));

        assert!(matches_window(&def, at(2025, 7, 4, 12, 0)));
        assert!(matches_window(&def, at(2028, 7, 4, 12, 0)));
        assert!(!matches_window(&def, at(2028, 7, 5, 12, 0)));
        assert_eq!(
            next_fire_after(&def, at(2025, 7, 4, 21, 0), None),
            Some(at(2026, 7, 4, 8, 0))
        );
    }

    #[test]
    fn once_fires_on_start_date_only() {
        let mut def = schedule(Periodicity::Once, "12:00", "13:00");
        def.date_range = DateRange::from(date(2025, 7, 4));

        let noon = at(2025, 7, 4, 12, 0);
        assert!(is_due(&def, noon, None));
        assert!(!matches_window(&def, at(2025, 7, 5, 12, 0)));
        assert!(!should_fire_now(&def, at(2026, 7, 4, 12, 0), Some(noon)));
    }

    #[test]
    fn next_fire_with_frequency() {
        let mut def = schedule(Periodicity::Daily, "10:00", "18:00");
        def.frequency_minutes = Some(15);

        assert_eq!(
            next_fire_after(&def, at(2025, 6, 2, 10, 7), None),
            Some(at(2025, 6, 2, 10, 15))
        );
        // An aligned minute counts as "after" only once it has passed
        assert_eq!(
            next_fire_after(&def, at(2025, 6, 2, 10, 15), None),
            Some(at(2025, 6, 2, 10, 30))
        );
        // Window end is inclusive
        assert_eq!(
            next_fire_after(&def, at(2025, 6, 2, 17, 50), None),
            Some(at(2025, 6, 2, 18, 0))
        );
        assert_eq!(
            next_fire_after(&def, at(2025, 6, 2, 18, 0), None),
            Some(at(2025, 6, 3, 10, 0))
        );
    }

    #[test]
    fn next_fire_once_per_day_skips_spent_day() {
        let def = schedule(Periodicity::Daily, "10:00", "18:00");
        let fired = at(2025, 6, 2, 10, 5);

        assert_eq!(
            next_fire_after(&def, at(2025, 6, 2, 8, 0), None),
            Some(at(2025, 6, 2, 10, 0))
        );
        assert_eq!(
            next_fire_after(&def, at(2025, 6, 2, 12, 0), Some(fired)),
            Some(at(2025, 6, 3, 10, 0))
        );
    }

    #[test]
    fn next_fire_overnight_after_midnight() {
        let def = schedule(Periodicity::Daily, "22:00", "02:00");
        assert_eq!(
            next_fire_after(&def, at(2025, 6, 2, 0, 30), None),
            Some(at(2025, 6, 2, 0, 31))
        );
    }

    #[test]
    fn next_fire_none_when_spent_or_disabled() {
        let mut def = schedule(Periodicity::Once, "12:00", "13:00");
        def.date_range = DateRange::from(date(2025, 7, 4));
        assert_eq!(next_fire_after(&def, at(2025, 7, 5, 0, 0), None), None);
        assert_eq!(
            next_fire_after(&def, at(2025, 7, 1, 0, 0), Some(at(2025, 7, 4, 12, 0))),
            None
        );

        let mut daily = schedule(Periodicity::Daily, "10:00", "11:00");
        daily.enabled = false;
        assert_eq!(next_fire_after(&daily, at(2025, 7, 1, 0, 0), None), None);
    }
}
