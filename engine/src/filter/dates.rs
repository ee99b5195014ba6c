//! Date parsing and period arithmetic
//!
//! Relative periods and truncation targets lower to half-open
//! `[start, end)` ranges. Weeks are ISO weeks starting on Monday.

use chrono::{
    DateTime, Datelike, Days, Duration, Months, NaiveDate, NaiveDateTime, NaiveTime, Timelike,
};

use super::ast::DatePrecision;
use super::operators::Operator;

/// Canonical timestamp format bound as a store parameter
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Canonical date format bound as a store parameter
pub const DATE_FORMAT: &str = "%Y-%m-%d";

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, DATE_FORMAT)
        .ok()
        .or_else(|| parse_datetime(s).map(|dt| dt.date()))
}

/// Accepts RFC 3339 (converted to UTC), `YYYY-MM-DD HH:MM:SS[.f]`,
/// `YYYY-MM-DDTHH:MM:SS[.f]` and plain dates (midnight).
pub fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(s, DATE_FORMAT)
        .ok()
        .map(|d| d.and_time(NaiveTime::MIN))
}

pub fn format_timestamp(dt: NaiveDateTime) -> String {
    dt.format(TIMESTAMP_FORMAT).to_string()
}

pub fn format_date(d: NaiveDate) -> String {
    d.format(DATE_FORMAT).to_string()
}

/// Half-open range of instants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl DateRange {
    fn from_dates(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            start: start.and_time(NaiveTime::MIN),
            end: end.and_time(NaiveTime::MIN),
        }
    }
}

/// Period at `precision` containing `at`
pub fn period_containing(precision: DatePrecision, at: NaiveDateTime) -> Option<DateRange> {
    let date = at.date();
    match precision {
        DatePrecision::Year => {
            let start = NaiveDate::from_ymd_opt(date.year(), 1, 1)?;
            Some(DateRange::from_dates(start, start.checked_add_months(Months::new(12))?))
        }
        DatePrecision::Quarter => {
            let month = (date.month0() / 3) * 3 + 1;
            let start = NaiveDate::from_ymd_opt(date.year(), month, 1)?;
            Some(DateRange::from_dates(start, start.checked_add_months(Months::new(3))?))
        }
        DatePrecision::Month => {
            let start = NaiveDate::from_ymd_opt(date.year(), date.month(), 1)?;
            Some(DateRange::from_dates(start, start.checked_add_months(Months::new(1))?))
        }
        DatePrecision::Week => {
            let offset = u64::from(date.weekday().num_days_from_monday());
            let start = date.checked_sub_days(Days::new(offset))?;
            Some(DateRange::from_dates(start, start.checked_add_days(Days::new(7))?))
        }
        DatePrecision::Day => Some(DateRange::from_dates(date, date.checked_add_days(Days::new(1))?)),
        DatePrecision::Hour => {
            let start = date.and_hms_opt(at.hour(), 0, 0)?;
            Some(DateRange {
                start,
                end: start.checked_add_signed(Duration::hours(1))?,
            })
        }
        DatePrecision::Minute => {
            let start = date.and_hms_opt(at.hour(), at.minute(), 0)?;
            Some(DateRange {
                start,
                end: start.checked_add_signed(Duration::minutes(1))?,
            })
        }
    }
}

/// Period at `precision` immediately before the one containing `at`
pub fn previous_period(precision: DatePrecision, at: NaiveDateTime) -> Option<DateRange> {
    let current = period_containing(precision, at)?;
    let just_before = current.start.checked_sub_signed(Duration::seconds(1))?;
    period_containing(precision, just_before)
}

/// Range for the relative-period operators (`today`, `pastMonth`, ...)
pub fn relative_period(operator: Operator, now: NaiveDateTime) -> Option<DateRange> {
    match operator {
        Operator::Today => period_containing(DatePrecision::Day, now),
        Operator::Yesterday => previous_period(DatePrecision::Day, now),
        Operator::ThisWeek => period_containing(DatePrecision::Week, now),
        Operator::PastWeek => previous_period(DatePrecision::Week, now),
        Operator::ThisMonth => period_containing(DatePrecision::Month, now),
        Operator::PastMonth => previous_period(DatePrecision::Month, now),
        Operator::ThisYear => period_containing(DatePrecision::Year, now),
        Operator::PastYear => previous_period(DatePrecision::Year, now),
        _ => None,
    }
}

pub fn year_range(year: i32) -> Option<DateRange> {
    let start = NaiveDate::from_ymd_opt(year, 1, 1)?;
    Some(DateRange::from_dates(start, start.checked_add_months(Months::new(12))?))
}

pub fn quarter_range(year: i32, quarter: u32) -> Option<DateRange> {
    if !(1..=4).contains(&quarter) {
        return None;
    }
    let start = NaiveDate::from_ymd_opt(year, (quarter - 1) * 3 + 1, 1)?;
    Some(DateRange::from_dates(start, start.checked_add_months(Months::new(3))?))
}

pub fn month_range(year: i32, month: u32) -> Option<DateRange> {
    let start = NaiveDate::from_ymd_opt(year, month, 1)?;
    Some(DateRange::from_dates(start, start.checked_add_months(Months::new(1))?))
}

/// ISO week `week` of ISO year `year`
pub fn iso_week_range(year: i32, week: u32) -> Option<DateRange> {
    let start = NaiveDate::from_isoywd_opt(year, week, chrono::Weekday::Mon)?;
    Some(DateRange::from_dates(start, start.checked_add_days(Days::new(7))?))
}
