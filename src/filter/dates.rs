//! Relative date-period windows.
//!
//! Resolves named periods (today, last_7_days, this_month, ...) and age
//! expressions into half-open `[start, end)` windows computed in the
//! caller's timezone. Comparison happens after the timezone shift, never
//! before.

use chrono::{
    DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc,
};
use serde_json::Value;

use super::FilterError;

/// Parses a session timezone string: "UTC", "+03:00", "-0430", "+05".
pub fn parse_tz(tz: &str) -> FixedOffset {
    let trimmed = tz.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0).unwrap();
    }
    let (sign, rest) = match trimmed.split_at(1) {
        ("+", rest) => (1i32, rest),
        ("-", rest) => (-1i32, rest),
        _ => return FixedOffset::east_opt(0).unwrap(),
    };
    let digits: String = rest.chars().filter(|c| c.is_ascii_digit()).collect();
    let (hours, minutes) = match digits.len() {
        1 | 2 => (digits.parse().unwrap_or(0), 0),
        3 | 4 => {
            let split = digits.len() - 2;
            (
                digits[..split].parse().unwrap_or(0),
                digits[split..].parse().unwrap_or(0),
            )
        }
        _ => (0, 0),
    };
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
        .unwrap_or_else(|| FixedOffset::east_opt(0).unwrap())
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    };
    next.unwrap()
        .signed_duration_since(NaiveDate::from_ymd_opt(year, month, 1).unwrap())
        .num_days() as u32
}

/// Month arithmetic with day-of-month clamping (Jan 31 - 1 month = Dec 31,
/// Mar 31 - 1 month = Feb 28/29).
pub fn shift_months(date: NaiveDate, months: i32) -> NaiveDate {
    let total = date.year() * 12 + date.month0() as i32 + months;
    let year = total.div_euclid(12);
    let month = total.rem_euclid(12) as u32 + 1;
    let day = date.day().min(days_in_month(year, month));
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}

pub fn shift_years(date: NaiveDate, years: i32) -> NaiveDate {
    shift_months(date, years * 12)
}

/// Half-open datetime window.
pub type Window = (NaiveDateTime, NaiveDateTime);

/// Period resolver anchored at "now" in a fixed timezone.
#[derive(Debug, Clone)]
pub struct DateSpan {
    now: NaiveDateTime,
}

impl DateSpan {
    pub fn new(tz: FixedOffset) -> Self {
        Self::anchored(Utc::now().with_timezone(&tz), tz)
    }

    /// Anchor at an explicit instant; converts to local wall-clock time.
    pub fn anchored(now: DateTime<FixedOffset>, _tz: FixedOffset) -> Self {
        Self {
            now: now.naive_local(),
        }
    }

    pub fn from_naive(now: NaiveDateTime) -> Self {
        Self { now }
    }

    pub fn now(&self) -> NaiveDateTime {
        self.now
    }

    fn day_start(&self) -> NaiveDateTime {
        self.now.date().and_time(NaiveTime::MIN)
    }

    /// Resolves a named period operator; None when the name is not a period.
    pub fn period(&self, name: &str) -> Option<Window> {
        Some(match name {
            "today" => self.today(0),
            "yesterday" => self.today(1),
            "tomorrow" => self.today(-1),
            "this_week" => self.this_week(0),
            "last_week" => self.this_week(1),
            "next_week" => self.this_week(-1),
            "this_month" => self.this_month(0),
            "last_month" => self.this_month(1),
            "next_month" => self.this_month(-1),
            "this_year" => self.this_year(0),
            "last_year" => self.this_year(1),
            "next_year" => self.this_year(-1),
            "last_7_days" => self.last_delta_days(7),
            "last_30_days" => self.last_delta_days(30),
            "last_60_days" => self.last_delta_days(60),
            "last_90_days" => self.last_delta_days(90),
            "next_7_days" => self.next_delta_days(7),
            "next_30_days" => self.next_delta_days(30),
            "next_60_days" => self.next_delta_days(60),
            "next_90_days" => self.next_delta_days(90),
            _ => return None,
        })
    }

    pub fn is_period(name: &str) -> bool {
        DateSpan::from_naive(NaiveDateTime::default())
            .period(name)
            .is_some()
    }

    /// Day window shifted `delta` days into the past.
    pub fn today(&self, delta: i64) -> Window {
        let start = self.day_start() - Duration::days(delta);
        (start, start + Duration::days(1))
    }

    /// Calendar week (Monday-based) shifted `delta` weeks into the past.
    pub fn this_week(&self, delta: i64) -> Window {
        let weekday = self.now.date().weekday().num_days_from_monday() as i64;
        let start = self.day_start() - Duration::days(weekday + delta * 7);
        (start, start + Duration::days(7))
    }

    /// Calendar month shifted `delta` months into the past.
    pub fn this_month(&self, delta: i32) -> Window {
        let first = self.now.date().with_day(1).unwrap();
        let start = shift_months(first, -delta).and_time(NaiveTime::MIN);
        (start, shift_months(start.date(), 1).and_time(NaiveTime::MIN))
    }

    /// Calendar year shifted `delta` years into the past.
    pub fn this_year(&self, delta: i32) -> Window {
        let first = NaiveDate::from_ymd_opt(self.now.year(), 1, 1).unwrap();
        let start = shift_years(first, -delta).and_time(NaiveTime::MIN);
        (start, shift_years(start.date(), 1).and_time(NaiveTime::MIN))
    }

    /// The previous `n` days including today: `[today-n, tomorrow)`.
    pub fn last_delta_days(&self, n: i64) -> Window {
        let (today_start, today_end) = self.today(0);
        (today_start - Duration::days(n), today_end)
    }

    /// The coming `n` days including today: `[today, today+n+1)`.
    pub fn next_delta_days(&self, n: i64) -> Window {
        let (today_start, _) = self.today(0);
        (today_start, today_start + Duration::days(n + 1))
    }

    /// Translates an age expression into a birthdate window.
    ///
    /// `values` is `{type, value}` for gte/lte/exact or
    /// `{min_value: {type, value}, max_value: {type, value}}` for range.
    /// Units are days, months or years. Inverted bounds are swapped so
    /// start <= end always holds.
    pub fn age(&self, values: &Value, operator: &str) -> Result<(NaiveDate, NaiveDate), FilterError> {
        let today = self.now.date();
        let mut start = today;
        let mut end = today;

        let shift = |date: NaiveDate, unit: &str, amount: i64| -> NaiveDate {
            match unit {
                "days" => date - Duration::days(amount),
                "months" => shift_months(date, -(amount as i32)),
                "years" => shift_years(date, -(amount as i32)),
                _ => date,
            }
        };
        let unit_of = |v: &Value| -> Option<(String, i64)> {
            let unit = v.get("type")?.as_str()?.to_string();
            let amount = match v.get("value")? {
                Value::String(s) => s.parse().ok()?,
                Value::Number(n) => n.as_i64()?,
                _ => return None,
            };
            Some((unit, amount))
        };
        let invalid = || FilterError::InvalidRule("malformed age expression".to_string());

        match operator {
            "range" => {
                let min = values.get("min_value").and_then(unit_of).ok_or_else(invalid)?;
                let max = values.get("max_value").and_then(unit_of).ok_or_else(invalid)?;
                // Older age bound maps to the earlier birthdate
                start = shift(start, &max.0, max.1);
                end = shift(end, &min.0, min.1);
            }
            "gte" => {
                let (unit, amount) = unit_of(values).ok_or_else(invalid)?;
                start = shift(start, &unit, amount);
            }
            "lte" => {
                let (unit, amount) = unit_of(values).ok_or_else(invalid)?;
                end = shift(end, &unit, amount);
            }
            "exact" => {
                let (unit, amount) = unit_of(values).ok_or_else(invalid)?;
                start = shift(start, &unit, amount + 1);
                end = shift(end, &unit, amount);
            }
            other => {
                return Err(FilterError::UnsupportedOperator(format!("age_{}", other)));
            }
        }

        if start > end {
            std::mem::swap(&mut start, &mut end);
        }
        Ok((start, end))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn span() -> DateSpan {
        // Friday 2024-03-15, 14:30 local
        DateSpan::from_naive(
            NaiveDate::from_ymd_opt(2024, 3, 15)
                .unwrap()
                .and_hms_opt(14, 30, 0)
                .unwrap(),
        )
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, day).unwrap().and_time(NaiveTime::MIN)
    }

    #[test]
    fn day_windows() {
        let s = span();
        assert_eq!(s.period("today").unwrap(), (d(2024, 3, 15), d(2024, 3, 16)));
        assert_eq!(s.period("yesterday").unwrap(), (d(2024, 3, 14), d(2024, 3, 15)));
        assert_eq!(s.period("tomorrow").unwrap(), (d(2024, 3, 16), d(2024, 3, 17)));
    }

    #[test]
    fn week_windows_are_monday_based() {
        let s = span();
        assert_eq!(s.period("this_week").unwrap(), (d(2024, 3, 11), d(2024, 3, 18)));
        assert_eq!(s.period("last_week").unwrap(), (d(2024, 3, 4), d(2024, 3, 11)));
        assert_eq!(s.period("next_week").unwrap(), (d(2024, 3, 18), d(2024, 3, 25)));
    }

    #[test]
    fn month_and_year_windows() {
        let s = span();
        assert_eq!(s.period("this_month").unwrap(), (d(2024, 3, 1), d(2024, 4, 1)));
        assert_eq!(s.period("last_month").unwrap(), (d(2024, 2, 1), d(2024, 3, 1)));
        assert_eq!(s.period("this_year").unwrap(), (d(2024, 1, 1), d(2025, 1, 1)));
        assert_eq!(s.period("last_year").unwrap(), (d(2023, 1, 1), d(2024, 1, 1)));
    }

    #[test]
    fn delta_day_windows_include_today() {
        let s = span();
        assert_eq!(s.period("last_7_days").unwrap(), (d(2024, 3, 8), d(2024, 3, 16)));
        assert_eq!(s.period("next_7_days").unwrap(), (d(2024, 3, 15), d(2024, 3, 23)));
    }

    #[test]
    fn month_shift_clamps_day() {
        let jan31 = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();
        assert_eq!(shift_months(jan31, 1), NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());
        assert_eq!(shift_months(jan31, -1), NaiveDate::from_ymd_opt(2023, 12, 31).unwrap());
    }

    #[test]
    fn age_exact_is_one_year_window() {
        let s = span();
        let (start, end) = s
            .age(&json!({"type": "years", "value": 30}), "exact")
            .unwrap();
        assert_eq!(start, NaiveDate::from_ymd_opt(1993, 3, 15).unwrap());
        assert_eq!(end, NaiveDate::from_ymd_opt(1994, 3, 15).unwrap());
    }

    #[test]
    fn age_range_swaps_inverted_bounds() {
        let s = span();
        let (start, end) = s
            .age(
                &json!({
                    "min_value": {"type": "years", "value": 40},
                    "max_value": {"type": "years", "value": 20}
                }),
                "range",
            )
            .unwrap();
        // min_value=40 pushes the end back further than max_value=20 pushes
        // the start; the swap restores start <= end
        assert!(start <= end);
        assert_eq!(start, NaiveDate::from_ymd_opt(1984, 3, 15).unwrap());
        assert_eq!(end, NaiveDate::from_ymd_opt(2004, 3, 15).unwrap());
    }

    #[test]
    fn tz_parsing() {
        assert_eq!(parse_tz("UTC").local_minus_utc(), 0);
        assert_eq!(parse_tz("+03:00").local_minus_utc(), 3 * 3600);
        assert_eq!(parse_tz("-0430").local_minus_utc(), -(4 * 3600 + 30 * 60));
        assert_eq!(parse_tz("garbage").local_minus_utc(), 0);
    }
}
