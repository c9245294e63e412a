use chrono::prelude::*;
use chrono::Duration;
use getset::Getters;

/// How far in the future `next_after` looks for a matching minute before giving up.
/// Expressions such as `0 0 31 2 *` never match and would otherwise loop forever.
const SEARCH_HORIZON_DAYS: i64 = 5 * 366;

/// A cron value can be a number, a range, a step or any value
/// It is used to represent a cron value for a specific field (hour, day, month, etc.)
/// Values are expected to be valid for the field (e.g. 0-59 for minutes, 0-23 for hours, etc.)
#[derive(Debug, PartialEq, Eq, Default, Clone)]
pub enum CronValue {
    Number(u32),
    Range(u32, u32),
    /// `*/n`, every n-th value starting at the first valid value of the field
    Step(u32),
    /// `a-b/n` or `a/n`, every n-th value from `a` up to `b`
    RangeStep(u32, u32, u32),
    #[default]
    Any,
}

impl CronValue {
    /// Check if the value match the cron value
    /// `field_min` is the lowest valid value of the field, steps are counted from it
    pub fn match_value(&self, value: u32, field_min: u32) -> bool {
        match self {
            CronValue::Number(n) => value == *n,
            CronValue::Range(low, high) => value >= *low && value <= *high,
            CronValue::Step(n) => *n > 0 && value >= field_min && (value - field_min) % n == 0,
            CronValue::RangeStep(low, high, n) => {
                *n > 0 && value >= *low && value <= *high && (value - low) % n == 0
            }
            CronValue::Any => true,
        }
    }
}

/// A cron timer is a set of cron values for each field (minutes, hours, days, months, days of week)
#[derive(Debug, PartialEq, Eq, Clone, Getters)]
#[getset(get = "pub")]
pub struct CronTimer {
    pub minutes: Vec<CronValue>,
    pub hours: Vec<CronValue>,
    /// Days of month
    pub days: Vec<CronValue>,
    pub months: Vec<CronValue>,
    /// Days of week, 0 and 7 are both Sunday
    pub dows: Vec<CronValue>,
}

impl Default for CronTimer {
    fn default() -> Self {
        Self {
            minutes: vec![CronValue::default()],
            hours: vec![CronValue::default()],
            days: vec![CronValue::default()],
            months: vec![CronValue::default()],
            dows: vec![CronValue::default()],
        }
    }
}

/// Only a bare `*` leaves a field unrestricted, `*/n` restricts it
fn is_unrestricted(values: &[CronValue]) -> bool {
    values.iter().any(|v| matches!(v, CronValue::Any))
}

fn round_date_minute(datetime: NaiveDateTime) -> Option<NaiveDateTime> {
    datetime.with_second(0)?.with_nanosecond(0)
}

fn first_day_of_next_month(date: NaiveDate) -> Option<NaiveDate> {
    match date.month() {
        12 => NaiveDate::from_ymd_opt(date.year() + 1, 1, 1),
        m => NaiveDate::from_ymd_opt(date.year(), m + 1, 1),
    }
}

impl CronTimer {
    fn month_matches(&self, date: NaiveDate) -> bool {
        self.months().iter().any(|v| v.match_value(date.month(), 1))
    }

    /// Day of month and day of week are OR-ed when both are restricted, like cron does
    fn day_matches(&self, date: NaiveDate) -> bool {
        let dow = date.weekday().num_days_from_sunday();
        let dom_match = self.days().iter().any(|v| v.match_value(date.day(), 1));
        let dow_match = self
            .dows()
            .iter()
            .any(|v| v.match_value(dow, 0) || (dow == 0 && v.match_value(7, 0)));

        match (is_unrestricted(self.days()), is_unrestricted(self.dows())) {
            (false, false) => dom_match || dow_match,
            (true, false) => dow_match,
            (false, true) => dom_match,
            (true, true) => true,
        }
    }

    fn hour_matches(&self, at: &NaiveDateTime) -> bool {
        self.hours().iter().any(|v| v.match_value(at.hour(), 0))
    }

    fn minute_matches(&self, at: &NaiveDateTime) -> bool {
        self.minutes().iter().any(|v| v.match_value(at.minute(), 0))
    }

    /// Check if the timer should run at specifed date
    ///
    /// ```rust
    /// use taskqueue_cron_types::{CronValue, CronTimer};
    ///
    /// let cron_timer = CronTimer {
    ///     minutes: vec![CronValue::Number(30)],
    ///     hours: vec![CronValue::Range(8, 10)],
    ///     days: vec![CronValue::Step(4)],
    ///     ..Default::default()
    /// };
    /// assert!(cron_timer.should_run_at(&"2012-12-17T08:30:12".parse().unwrap()));
    /// assert!(cron_timer.should_run_at(&"2015-02-05T09:30:00".parse().unwrap()));
    ///
    /// assert!(!cron_timer.should_run_at(&"2012-12-17T11:30:59".parse().unwrap()));
    /// assert!(!cron_timer.should_run_at(&"2015-02-05T09:31:00".parse().unwrap()));
    /// ```
    pub fn should_run_at(&self, at: &NaiveDateTime) -> bool {
        self.minute_matches(at)
            && self.hour_matches(at)
            && self.month_matches(at.date())
            && self.day_matches(at.date())
    }

    /// Computes the first minute strictly after `after` at which the timer fires, in UTC.
    ///
    /// Returns `None` when nothing matches within five years.
    ///
    /// ```rust
    /// use chrono::prelude::*;
    /// use taskqueue_cron_types::{CronValue, CronTimer};
    ///
    /// let hourly = CronTimer {
    ///     minutes: vec![CronValue::Number(0)],
    ///     ..Default::default()
    /// };
    /// let after = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
    /// assert_eq!(
    ///     hourly.next_after(&after),
    ///     Some(Utc.with_ymd_and_hms(2024, 3, 1, 11, 0, 0).unwrap())
    /// );
    /// ```
    pub fn next_after<Tz: TimeZone>(&self, after: &DateTime<Tz>) -> Option<DateTime<Utc>> {
        let after = after.naive_utc();
        let limit = after + Duration::days(SEARCH_HORIZON_DAYS);
        let mut ts = round_date_minute(after)? + Duration::minutes(1);

        while ts <= limit {
            if !self.month_matches(ts.date()) {
                ts = first_day_of_next_month(ts.date())?.and_time(NaiveTime::MIN);
                continue;
            }
            if !self.day_matches(ts.date()) {
                ts = ts.date().succ_opt()?.and_time(NaiveTime::MIN);
                continue;
            }
            if !self.hour_matches(&ts) {
                ts = ts.with_minute(0)? + Duration::hours(1);
                continue;
            }
            if !self.minute_matches(&ts) {
                ts += Duration::minutes(1);
                continue;
            }

            return Some(Utc.from_utc_datetime(&ts));
        }

        None
    }
}
