use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Timelike, Weekday};

use logwarden_types::{Frequency, TimeOfDay};

/// How far past the configured minute a check still counts as on time
pub const MATCH_TOLERANCE_MINUTES: u32 = 5;

const MINUTES_PER_DAY: u32 = 24 * 60;

/// Whether a send is due at `now`.
///
/// The configured time matches for [`MATCH_TOLERANCE_MINUTES`] minutes,
/// across hour and midnight boundaries. Hourly reports look at the minute
/// only. Weekly (Sunday) and monthly (the 1st) reports check the day the
/// matched time fell on, so 23:58 matched at 00:01 still counts for the
/// previous day.
pub fn is_due<Tz: TimeZone>(frequency: Frequency, at: TimeOfDay, now: &DateTime<Tz>) -> bool {
    if frequency == Frequency::Hourly {
        let late = (now.minute() + 60 - at.minute) % 60;
        return late < MATCH_TOLERANCE_MINUTES;
    }

    let current = now.hour() * 60 + now.minute();
    let late = (current + MINUTES_PER_DAY - at.minute_of_day()) % MINUTES_PER_DAY;
    if late >= MATCH_TOLERANCE_MINUTES {
        return false;
    }

    let scheduled_day = (now.naive_local() - Duration::minutes(i64::from(late))).date();
    day_matches(frequency, scheduled_day)
}

fn day_matches(frequency: Frequency, date: NaiveDate) -> bool {
    match frequency {
        Frequency::Hourly | Frequency::Daily => true,
        Frequency::Weekly => date.weekday() == Weekday::Sun,
        Frequency::Monthly => date.day() == 1,
    }
}

/// The next instant strictly after `after` at which the cron trigger fires
pub fn next_fire_after<Tz: TimeZone>(
    frequency: Frequency,
    at: TimeOfDay,
    after: &DateTime<Tz>,
) -> Option<DateTime<Tz>> {
    let tz = after.timezone();
    let local = after.naive_local();

    if frequency == Frequency::Hourly {
        let base = local.date().and_hms_opt(local.hour(), at.minute, 0)?;
        return (0..=25)
            .map(|h| base + Duration::hours(h))
            .filter_map(|candidate| tz.from_local_datetime(&candidate).earliest())
            .find(|fire| fire > after);
    }

    // Long enough to reach the next 1st of the month from anywhere
    (0..=62)
        .map(|d| local.date() + Duration::days(d))
        .filter(|date| day_matches(frequency, *date))
        .filter_map(|date| date.and_hms_opt(at.hour, at.minute, 0))
        .filter_map(|candidate| tz.from_local_datetime(&candidate).earliest())
        .find(|fire| fire > after)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn tod(h: u32, m: u32) -> TimeOfDay {
        TimeOfDay::new(h, m).unwrap()
    }

    #[test]
    fn test_daily_tolerance() {
        let nine = tod(9, 0);
        assert!(is_due(Frequency::Daily, nine, &at(2024, 3, 13, 9, 0)));
        assert!(is_due(Frequency::Daily, nine, &at(2024, 3, 13, 9, 4)));
        assert!(!is_due(Frequency::Daily, nine, &at(2024, 3, 13, 9, 5)));
        assert!(!is_due(Frequency::Daily, nine, &at(2024, 3, 13, 8, 59)));
    }

    #[test]
    fn test_rollover() {
        assert!(is_due(Frequency::Daily, tod(10, 58), &at(2024, 3, 13, 11, 1)));
        assert!(is_due(Frequency::Daily, tod(23, 58), &at(2024, 3, 14, 0, 1)));
        assert!(is_due(Frequency::Hourly, tod(0, 58), &at(2024, 3, 13, 17, 2)));
        assert!(!is_due(Frequency::Hourly, tod(0, 58), &at(2024, 3, 13, 17, 3)));
    }

    #[test]
    fn test_weekly_and_monthly_days() {
        // 2024-03-10 is a Sunday
        assert!(is_due(Frequency::Weekly, tod(9, 0), &at(2024, 3, 10, 9, 2)));
        assert!(!is_due(Frequency::Weekly, tod(9, 0), &at(2024, 3, 11, 9, 2)));
        // Sunday 23:58 matched early on Monday
        assert!(is_due(Frequency::Weekly, tod(23, 58), &at(2024, 3, 11, 0, 1)));

        assert!(is_due(Frequency::Monthly, tod(6, 30), &at(2024, 4, 1, 6, 30)));
        assert!(!is_due(Frequency::Monthly, tod(6, 30), &at(2024, 4, 2, 6, 30)));
        assert!(is_due(Frequency::Monthly, tod(23, 58), &at(2024, 4, 2, 0, 1)));
        assert!(!is_due(Frequency::Monthly, tod(23, 58), &at(2024, 4, 1, 0, 1)));
    }

    #[test]
    fn test_next_fire() {
        let now = at(2024, 3, 13, 9, 0);
        assert_eq!(
            next_fire_after(Frequency::Daily, tod(9, 0), &now),
            Some(at(2024, 3, 14, 9, 0))
        );
        assert_eq!(
            next_fire_after(Frequency::Daily, tod(18, 15), &now),
            Some(at(2024, 3, 13, 18, 15))
        );
        assert_eq!(
            next_fire_after(Frequency::Hourly, tod(0, 30), &now),
            Some(at(2024, 3, 13, 9, 30))
        );
        assert_eq!(
            next_fire_after(Frequency::Weekly, tod(8, 0), &now),
            Some(at(2024, 3, 17, 8, 0))
        );
        assert_eq!(
            next_fire_after(Frequency::Monthly, tod(0, 5), &at(2024, 1, 31, 23, 0)),
            Some(at(2024, 2, 1, 0, 5))
        );
    }
}
