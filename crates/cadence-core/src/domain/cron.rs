//! Cron expression normalizer.
//!
//! Five whitespace separated fields: `MIN HOUR DOM MON DOW`. Each field is a
//! comma separated list of `*`, `N`, `A-B`, `*/S`, `A-B/S` or `A/S`. Month and
//! weekday fields also accept English names (`jan`, `mon`, ...), weekday `7`
//! is Sunday, and the `@yearly`-style aliases expand to their five-field
//! form. Everything is evaluated in UTC.
//!
//! When both day-of-month and day-of-week are restricted a day matches if
//! either does; when one of them starts with `*` both must match.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How far ahead [`CronExpression::next_match`] searches before giving up.
pub const SEARCH_HORIZON_YEARS: i64 = 5;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CronError {
    #[error("expected 5 fields (minute hour day-of-month month day-of-week), got {0}")]
    FieldCount(usize),
    #[error("unknown alias `{0}`")]
    UnknownAlias(String),
    #[error("{field}: empty list element")]
    EmptyElement { field: &'static str },
    #[error("{field}: `{value}` is not a number")]
    NotANumber { field: &'static str, value: String },
    #[error("{field}: {value} is outside {min}-{max}")]
    OutOfRange {
        field: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },
    #[error("{field}: range {start}-{end} runs backwards")]
    ReversedRange {
        field: &'static str,
        start: u32,
        end: u32,
    },
    #[error("{field}: step must be greater than zero")]
    ZeroStep { field: &'static str },
    #[error("no matching time within {0} years")]
    NoMatch(i64),
}

struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
    names: &'static [&'static str],
    /// Numeric value of `names[0]`.
    names_base: u32,
}

const MINUTE: FieldSpec = FieldSpec {
    name: "minute",
    min: 0,
    max: 59,
    names: &[],
    names_base: 0,
};
const HOUR: FieldSpec = FieldSpec {
    name: "hour",
    min: 0,
    max: 23,
    names: &[],
    names_base: 0,
};
const DAY_OF_MONTH: FieldSpec = FieldSpec {
    name: "day-of-month",
    min: 1,
    max: 31,
    names: &[],
    names_base: 0,
};
const MONTH: FieldSpec = FieldSpec {
    name: "month",
    min: 1,
    max: 12,
    names: &[
        "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
    ],
    names_base: 1,
};
const DAY_OF_WEEK: FieldSpec = FieldSpec {
    name: "day-of-week",
    min: 0,
    max: 7,
    names: &["sun", "mon", "tue", "wed", "thu", "fri", "sat"],
    names_base: 0,
};

fn expand_alias(alias: &str) -> Result<&'static str, CronError> {
    match alias.to_ascii_lowercase().as_str() {
        "@yearly" | "@annually" => Ok("0 0 1 1 *"),
        "@monthly" => Ok("0 0 1 * *"),
        "@weekly" => Ok("0 0 * * 0"),
        "@daily" | "@midnight" => Ok("0 0 * * *"),
        "@hourly" => Ok("0 * * * *"),
        _ => Err(CronError::UnknownAlias(alias.to_string())),
    }
}

/// A parsed, normalized cron expression.
///
/// Serializes as its normalized source string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CronExpression {
    source: String,
    minutes: u64,
    hours: u64,
    days_of_month: u64,
    months: u64,
    days_of_week: u64,
    dom_star: bool,
    dow_star: bool,
}

impl CronExpression {
    pub fn parse(expression: &str) -> Result<Self, CronError> {
        let trimmed = expression.trim();
        let expanded = if trimmed.starts_with('@') {
            expand_alias(trimmed)?
        } else {
            trimmed
        };

        let fields: Vec<&str> = expanded.split_whitespace().collect();
        let [minute, hour, dom, month, dow] = fields.as_slice() else {
            return Err(CronError::FieldCount(fields.len()));
        };

        let normalized = [
            normalize_names(minute, &MINUTE),
            normalize_names(hour, &HOUR),
            normalize_names(dom, &DAY_OF_MONTH),
            normalize_names(month, &MONTH),
            normalize_names(dow, &DAY_OF_WEEK),
        ];

        let mut days_of_week = parse_field(&normalized[4], &DAY_OF_WEEK)?;
        if days_of_week & (1 << 7) != 0 {
            days_of_week = (days_of_week & !(1 << 7)) | 1;
        }

        Ok(Self {
            minutes: parse_field(&normalized[0], &MINUTE)?,
            hours: parse_field(&normalized[1], &HOUR)?,
            days_of_month: parse_field(&normalized[2], &DAY_OF_MONTH)?,
            months: parse_field(&normalized[3], &MONTH)?,
            days_of_week,
            dom_star: normalized[2].starts_with('*'),
            dow_star: normalized[4].starts_with('*'),
            source: normalized.join(" "),
        })
    }

    /// The normalized form: aliases expanded, names replaced by numbers.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether `at` (ignoring seconds) is a firing minute.
    pub fn matches(&self, at: DateTime<Utc>) -> bool {
        bit(self.minutes, at.minute())
            && bit(self.hours, at.hour())
            && bit(self.months, at.month())
            && self.day_matches(at)
    }

    fn day_matches(&self, at: DateTime<Utc>) -> bool {
        let dom = bit(self.days_of_month, at.day());
        let dow = bit(self.days_of_week, at.weekday().num_days_from_sunday());
        if self.dom_star || self.dow_star {
            dom && dow
        } else {
            dom || dow
        }
    }

    /// Smallest minute-aligned instant strictly after `after` that matches.
    pub fn next_match(&self, after: DateTime<Utc>) -> Result<DateTime<Utc>, CronError> {
        let no_match = CronError::NoMatch(SEARCH_HORIZON_YEARS);
        let limit = after + Duration::days(366 * SEARCH_HORIZON_YEARS);
        let mut candidate = truncate_to_minute(after).ok_or(no_match.clone())? + Duration::minutes(1);

        while candidate <= limit {
            let next = if !bit(self.months, candidate.month()) {
                start_of_next_month(candidate)
            } else if !self.day_matches(candidate) {
                start_of_next_day(candidate)
            } else if !bit(self.hours, candidate.hour()) {
                start_of_next_hour(candidate)
            } else if !bit(self.minutes, candidate.minute()) {
                Some(candidate + Duration::minutes(1))
            } else {
                return Ok(candidate);
            };
            candidate = next.ok_or(no_match.clone())?;
        }
        Err(no_match)
    }
}

impl fmt::Display for CronExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl FromStr for CronExpression {
    type Err = CronError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for CronExpression {
    type Error = CronError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<CronExpression> for String {
    fn from(value: CronExpression) -> Self {
        value.source
    }
}

fn bit(set: u64, value: u32) -> bool {
    set & (1u64 << value) != 0
}

/// Lowercases the field and replaces month/weekday names with numbers.
fn normalize_names(field: &str, spec: &FieldSpec) -> String {
    let lowered = field.to_ascii_lowercase();
    if spec.names.is_empty() {
        return lowered;
    }

    let mut out = String::with_capacity(lowered.len());
    let mut word = String::new();
    for c in lowered.chars().chain(std::iter::once(',')) {
        if c.is_ascii_alphabetic() {
            word.push(c);
            continue;
        }
        if !word.is_empty() {
            match spec.names.iter().position(|name| *name == word) {
                Some(index) => out.push_str(&(spec.names_base + index as u32).to_string()),
                None => out.push_str(&word),
            }
            word.clear();
        }
        out.push(c);
    }
    out.pop();
    out
}

fn parse_field(field: &str, spec: &FieldSpec) -> Result<u64, CronError> {
    let mut set = 0u64;
    for element in field.split(',') {
        if element.is_empty() {
            return Err(CronError::EmptyElement { field: spec.name });
        }

        let (range, step) = match element.split_once('/') {
            Some((range, step)) => {
                let step = parse_number(step, spec)?;
                if step == 0 {
                    return Err(CronError::ZeroStep { field: spec.name });
                }
                (range, Some(step))
            }
            None => (element, None),
        };

        let (start, end) = if range == "*" {
            (spec.min, spec.max)
        } else if let Some((start, end)) = range.split_once('-') {
            let start = parse_value(start, spec)?;
            let end = parse_value(end, spec)?;
            if start > end {
                return Err(CronError::ReversedRange {
                    field: spec.name,
                    start,
                    end,
                });
            }
            (start, end)
        } else {
            let value = parse_value(range, spec)?;
            match step {
                Some(_) => (value, spec.max),
                None => (value, value),
            }
        };

        for value in (start..=end).step_by(step.unwrap_or(1) as usize) {
            set |= 1u64 << value;
        }
    }
    Ok(set)
}

fn parse_number(raw: &str, spec: &FieldSpec) -> Result<u32, CronError> {
    raw.parse::<u32>().map_err(|_| CronError::NotANumber {
        field: spec.name,
        value: raw.to_string(),
    })
}

fn parse_value(raw: &str, spec: &FieldSpec) -> Result<u32, CronError> {
    let value = parse_number(raw, spec)?;
    if value < spec.min || value > spec.max {
        return Err(CronError::OutOfRange {
            field: spec.name,
            value,
            min: spec.min,
            max: spec.max,
        });
    }
    Ok(value)
}

fn truncate_to_minute(at: DateTime<Utc>) -> Option<DateTime<Utc>> {
    at.with_second(0)?.with_nanosecond(0)
}

fn midnight(date: NaiveDate) -> Option<DateTime<Utc>> {
    Some(date.and_hms_opt(0, 0, 0)?.and_utc())
}

fn start_of_next_day(at: DateTime<Utc>) -> Option<DateTime<Utc>> {
    midnight(at.date_naive().succ_opt()?)
}

fn start_of_next_month(at: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let (year, month) = match at.month() {
        12 => (at.year() + 1, 1),
        m => (at.year(), m + 1),
    };
    midnight(NaiveDate::from_ymd_opt(year, month, 1)?)
}

fn start_of_next_hour(at: DateTime<Utc>) -> Option<DateTime<Utc>> {
    Some(at.with_minute(0)? + Duration::hours(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn every_fifteen_minutes_from_seven_past() {
        let cron = CronExpression::parse("*/15 * * * *").unwrap();
        let next = cron.next_match(utc(2026, 1, 1, 0, 7)).unwrap();
        assert_eq!(next, utc(2026, 1, 1, 0, 15));
    }

    #[test]
    fn next_match_is_strictly_after_the_input() {
        let cron = CronExpression::parse("0 8 * * *").unwrap();
        assert_eq!(
            cron.next_match(utc(2026, 2, 22, 8, 0)).unwrap(),
            utc(2026, 2, 23, 8, 0)
        );
    }

    #[test]
    fn seconds_are_ignored_when_searching() {
        let cron = CronExpression::parse("* * * * *").unwrap();
        let after = Utc.with_ymd_and_hms(2026, 3, 1, 10, 30, 59).unwrap();
        assert_eq!(cron.next_match(after).unwrap(), utc(2026, 3, 1, 10, 31));
    }

    #[rstest]
    #[case::hourly("@hourly", "0 * * * *")]
    #[case::daily("@daily", "0 0 * * *")]
    #[case::midnight("@MIDNIGHT", "0 0 * * *")]
    #[case::weekly("@weekly", "0 0 * * 0")]
    #[case::monthly("@monthly", "0 0 1 * *")]
    #[case::annually("@annually", "0 0 1 1 *")]
    #[case::names("30 6 * jan-mar MON-fri", "30 6 * 1-3 1-5")]
    #[case::name_list("0 0 * * sat,sun", "0 0 * * 6,0")]
    #[case::extra_whitespace("  5   4 * *  * ", "5 4 * * *")]
    fn expressions_normalize(#[case] input: &str, #[case] normalized: &str) {
        assert_eq!(CronExpression::parse(input).unwrap().as_str(), normalized);
    }

    #[rstest]
    #[case::too_few("* * * *")]
    #[case::too_many("* * * * * *")]
    #[case::minute_range("60 * * * *")]
    #[case::hour_range("0 24 * * *")]
    #[case::day_zero("0 0 0 * *")]
    #[case::month_range("0 0 1 13 *")]
    #[case::weekday_range("0 0 * * 8")]
    #[case::zero_step("*/0 * * * *")]
    #[case::reversed("0 5-1 * * *")]
    #[case::empty_element("0,,5 * * * *")]
    #[case::unknown_name("0 0 * * funday")]
    #[case::unknown_alias("@fortnightly")]
    fn malformed_expressions_are_rejected(#[case] input: &str) {
        assert!(CronExpression::parse(input).is_err(), "{input} should fail");
    }

    #[test]
    fn weekday_seven_is_sunday() {
        let cron = CronExpression::parse("0 12 * * 7").unwrap();
        // 2026-03-01 is a Sunday.
        assert!(cron.matches(utc(2026, 3, 1, 12, 0)));
        assert!(!cron.matches(utc(2026, 3, 2, 12, 0)));
    }

    #[test]
    fn restricted_day_fields_combine_with_or() {
        // The 13th of any month, or any Friday.
        let cron = CronExpression::parse("0 0 13 * 5").unwrap();
        assert!(cron.matches(utc(2026, 3, 13, 0, 0))); // Friday the 13th
        assert!(cron.matches(utc(2026, 4, 13, 0, 0))); // Monday the 13th
        assert!(cron.matches(utc(2026, 4, 17, 0, 0))); // plain Friday
        assert!(!cron.matches(utc(2026, 4, 14, 0, 0)));
    }

    #[test]
    fn starred_day_field_combines_with_and() {
        let cron = CronExpression::parse("0 0 */2 * 1").unwrap();
        // 2026-03-02 is a Monday on an even day, 2026-03-09 a Monday on an odd day.
        assert!(!cron.matches(utc(2026, 3, 2, 0, 0)));
        assert!(cron.matches(utc(2026, 3, 9, 0, 0)));
    }

    #[rstest]
    #[case::range_step("0-30/10 * * * *", utc(2026, 1, 1, 0, 21), utc(2026, 1, 1, 0, 30))]
    #[case::offset_step("5/20 * * * *", utc(2026, 1, 1, 0, 26), utc(2026, 1, 1, 0, 45))]
    #[case::skips_to_next_month("0 0 1 * *", utc(2026, 1, 15, 9, 0), utc(2026, 2, 1, 0, 0))]
    #[case::year_rollover("0 0 1 1 *", utc(2026, 6, 1, 0, 0), utc(2027, 1, 1, 0, 0))]
    #[case::leap_day("0 0 29 2 *", utc(2026, 1, 1, 0, 0), utc(2028, 2, 29, 0, 0))]
    fn next_match_finds_the_first_firing_minute(
        #[case] expression: &str,
        #[case] after: DateTime<Utc>,
        #[case] expected: DateTime<Utc>,
    ) {
        let cron = CronExpression::parse(expression).unwrap();
        assert_eq!(cron.next_match(after).unwrap(), expected);
    }

    #[test]
    fn impossible_dates_exhaust_the_search_horizon() {
        let cron = CronExpression::parse("0 0 30 2 *").unwrap();
        assert_eq!(
            cron.next_match(utc(2026, 1, 1, 0, 0)),
            Err(CronError::NoMatch(SEARCH_HORIZON_YEARS))
        );
    }

    #[test]
    fn serializes_as_the_normalized_string() {
        let cron = CronExpression::parse("@daily").unwrap();
        assert_eq!(serde_json::to_string(&cron).unwrap(), "\"0 0 * * *\"");
        let back: CronExpression = serde_json::from_str("\"0 0 * * *\"").unwrap();
        assert_eq!(back, cron);
        assert!(serde_json::from_str::<CronExpression>("\"0 0 * *\"").is_err());
    }
}
