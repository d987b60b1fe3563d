//! UTC calendar periods behind diary keys.
//!
//! Key formats: daily `YYYY-MM-DD`, weekly `YYYY-Www` (ISO 8601 week-year),
//! monthly `YYYY-MM`, quarterly `YYYY-Qn`, yearly `YYYY`.

use chrono::{Datelike, Days, NaiveDate, Weekday};

pub fn day_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// ISO week key of `date`. Early January days can belong to the previous
/// week-year and late December days to the next.
pub fn week_key(date: NaiveDate) -> String {
    let week = date.iso_week();
    format!("{}-W{:02}", week.year(), week.week())
}

pub fn month_key(year: i32, month: u32) -> String {
    format!("{year}-{month:02}")
}

pub fn quarter_key(year: i32, quarter: u32) -> String {
    format!("{year}-Q{quarter}")
}

pub fn year_key(year: i32) -> String {
    year.to_string()
}

pub fn yesterday(today: NaiveDate) -> NaiveDate {
    today - Days::new(1)
}

/// The ISO week containing the day one week before `today`.
pub fn last_week_key(today: NaiveDate) -> String {
    week_key(today - Days::new(7))
}

pub fn previous_month(today: NaiveDate) -> (i32, u32) {
    if today.month() == 1 {
        (today.year() - 1, 12)
    } else {
        (today.year(), today.month() - 1)
    }
}

pub fn previous_quarter(today: NaiveDate) -> (i32, u32) {
    let current = quarter_of(today.month());
    if current == 1 {
        (today.year() - 1, 4)
    } else {
        (today.year(), current - 1)
    }
}

pub fn quarter_of(month: u32) -> u32 {
    (month - 1) / 3 + 1
}

/// Monday through Sunday of the week named by `key`, or `None` if the key is
/// malformed or names a week the year does not have.
pub fn days_in_week(key: &str) -> Option<Vec<NaiveDate>> {
    let (year, week) = key.split_once("-W")?;
    let year: i32 = year.parse().ok()?;
    let week: u32 = week.parse().ok()?;
    let monday = NaiveDate::from_isoywd_opt(year, week, Weekday::Mon)?;
    Some((0..7).map(|i| monday + Days::new(i)).collect())
}

/// Keys of every ISO week that overlaps the given month, in calendar order.
pub fn weeks_overlapping_month(year: i32, month: u32) -> Vec<String> {
    let Some(mut day) = NaiveDate::from_ymd_opt(year, month, 1) else {
        return Vec::new();
    };
    let mut keys: Vec<String> = Vec::new();
    while day.month() == month {
        let key = week_key(day);
        if keys.last() != Some(&key) {
            keys.push(key);
        }
        day = day + Days::new(1);
    }
    keys
}

pub fn months_in_quarter(year: i32, quarter: u32) -> Vec<String> {
    let first = (quarter - 1) * 3 + 1;
    (first..first + 3).map(|m| month_key(year, m)).collect()
}

pub fn quarters_in_year(year: i32) -> Vec<String> {
    (1..=4).map(|q| quarter_key(year, q)).collect()
}
