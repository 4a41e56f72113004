use std::collections::HashSet;

use chrono::{Datelike, Duration, NaiveDate};

use crate::config::{ConfigError, WeekSchedule};
use crate::models::{ExpectedSlot, WeekType};

/// Sunday..Saturday bounds of the week containing `today`.
pub fn default_week(today: NaiveDate) -> (NaiveDate, NaiveDate) {
    let days_back = today.weekday().num_days_from_sunday() as i64;
    let start = today - Duration::days(days_back);
    (start, start + Duration::days(6))
}

/// Expand a weekly plan over a date range into concrete slots.
///
/// Dates are visited chronologically; off days are skipped; weekdays
/// with no sessions in the active plan produce nothing. Sessions keep
/// their schedule-file order within a day.
pub fn expand(
    schedule: &WeekSchedule,
    week: WeekType,
    start: NaiveDate,
    end: NaiveDate,
    off_days: &HashSet<NaiveDate>,
) -> Result<Vec<ExpectedSlot>, ConfigError> {
    let plan = schedule.plan(week)?;
    let mut slots = Vec::new();
    let mut date = start;
    while date <= end {
        if !off_days.contains(&date) {
            if let Some(sessions) = plan.get(&date.weekday()) {
                for session in sessions {
                    slots.push(ExpectedSlot {
                        date,
                        weekday: date.weekday(),
                        session_id: session.id.clone(),
                        time_window: session.time_window(),
                        expected_fellows: session.fellows.clone(),
                    });
                }
            }
        }
        date = date + Duration::days(1);
    }
    Ok(slots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_schedule;
    use std::path::Path;

    fn sample_schedule() -> WeekSchedule {
        parse_schedule(
            r#"{
                "blue": {
                    "tuesday": [
                        {"id": "1", "start": "19:30", "end": "20:30", "fellows": ["Alice Chen", "Bob Park"]},
                        {"id": "2", "start": "20:30", "end": "21:30", "fellows": ["Jerry Liu"]}
                    ],
                    "thursday": [
                        {"id": "1", "start": "19:30", "end": "20:30", "fellows": ["Dana Reyes"]}
                    ]
                },
                "gold": {
                    "sunday": [
                        {"id": "1", "start": "18:00", "end": "19:00", "fellows": ["Alice Chen"]}
                    ]
                }
            }"#,
            Path::new("schedule.json"),
        )
        .unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn expands_one_week_in_chronological_and_schedule_order() {
        // 2026-02-01 is a Sunday.
        let slots = expand(
            &sample_schedule(),
            WeekType::Blue,
            date(2026, 2, 1),
            date(2026, 2, 7),
            &HashSet::new(),
        )
        .unwrap();

        assert_eq!(slots.len(), 3);
        assert_eq!(slots[0].date, date(2026, 2, 3));
        assert_eq!(slots[0].session_id, "1");
        assert_eq!(slots[0].expected_fellows, vec!["Alice Chen", "Bob Park"]);
        assert_eq!(slots[1].date, date(2026, 2, 3));
        assert_eq!(slots[1].session_id, "2");
        assert_eq!(slots[2].date, date(2026, 2, 5));
        assert_eq!(slots[2].day_name(), "Thursday");
    }

    #[test]
    fn slot_count_per_date_matches_session_defs() {
        let slots = expand(
            &sample_schedule(),
            WeekType::Blue,
            date(2026, 2, 3),
            date(2026, 2, 3),
            &HashSet::new(),
        )
        .unwrap();
        assert_eq!(slots.len(), 2);
        assert!(slots.iter().all(|s| s.date == date(2026, 2, 3)));
    }

    #[test]
    fn off_days_are_never_expanded() {
        let off: HashSet<NaiveDate> = [date(2026, 2, 3)].into_iter().collect();
        let slots = expand(
            &sample_schedule(),
            WeekType::Blue,
            date(2026, 2, 1),
            date(2026, 2, 7),
            &off,
        )
        .unwrap();
        assert!(slots.iter().all(|s| s.date != date(2026, 2, 3)));
        assert_eq!(slots.len(), 1);
    }

    #[test]
    fn weekdays_without_sessions_produce_nothing() {
        // Gold week only has Sunday sessions; a Tuesday-only range is empty.
        let slots = expand(
            &sample_schedule(),
            WeekType::Gold,
            date(2026, 2, 3),
            date(2026, 2, 4),
            &HashSet::new(),
        )
        .unwrap();
        assert!(slots.is_empty());
    }

    #[test]
    fn expansion_is_deterministic() {
        let a = expand(
            &sample_schedule(),
            WeekType::Blue,
            date(2026, 2, 1),
            date(2026, 2, 14),
            &HashSet::new(),
        )
        .unwrap();
        let b = expand(
            &sample_schedule(),
            WeekType::Blue,
            date(2026, 2, 1),
            date(2026, 2, 14),
            &HashSet::new(),
        )
        .unwrap();
        let keys = |slots: &[ExpectedSlot]| {
            slots
                .iter()
                .map(|s| (s.date, s.session_id.clone()))
                .collect::<Vec<_>>()
        };
        assert_eq!(keys(&a), keys(&b));
    }

    #[test]
    fn default_week_is_sunday_to_saturday() {
        // A Wednesday.
        let (start, end) = default_week(date(2026, 2, 4));
        assert_eq!(start, date(2026, 2, 1));
        assert_eq!(end, date(2026, 2, 7));

        // A Sunday is its own week start.
        let (start, end) = default_week(date(2026, 2, 1));
        assert_eq!(start, date(2026, 2, 1));
        assert_eq!(end, date(2026, 2, 7));

        // A Saturday closes the same week.
        let (start, end) = default_week(date(2026, 2, 7));
        assert_eq!(start, date(2026, 2, 1));
        assert_eq!(end, date(2026, 2, 7));
    }
}
