//! Extended cron rule grammar and matching.
//!
//! A rule is six whitespace-separated fields: `second minute hour
//! dayOfMonth month dayOfWeek`. When only five fields are given, `0` is
//! prepended as the seconds field. Each field parses to an integer set;
//! an empty set means "any value". Matching is pure set membership.

use std::collections::BTreeSet;

use chrono::{DateTime, Datelike, TimeZone, Timelike};
use thiserror::Error;

/// Errors produced by the scheduler and the rule parser.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CronError {
    /// The rule text could not be parsed.
    #[error("invalid cron rule: {0}")]
    Parse(String),
    /// The scheduler has been cancelled and accepts no further jobs.
    #[error("scheduler stopped")]
    Stopped,
}

/// Inclusive bounds and optional three-letter names for one field.
struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
    names: Option<&'static [&'static str]>,
}

const MONTH_NAMES: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];
const DOW_NAMES: [&str; 7] = ["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

const FIELD_SPECS: [FieldSpec; 6] = [
    FieldSpec { name: "second", min: 0, max: 59, names: None },
    FieldSpec { name: "minute", min: 0, max: 59, names: None },
    FieldSpec { name: "hour", min: 0, max: 23, names: None },
    FieldSpec { name: "day of month", min: 1, max: 31, names: None },
    FieldSpec { name: "month", min: 1, max: 12, names: Some(&MONTH_NAMES) },
    FieldSpec { name: "day of week", min: 0, max: 6, names: Some(&DOW_NAMES) },
];

/// A parsed cron rule: six ordered integer sets. An empty set matches any
/// value; a rule with all six sets empty matches every second.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rule {
    /// Seconds, 0-59.
    pub second: BTreeSet<u32>,
    /// Minutes, 0-59.
    pub minute: BTreeSet<u32>,
    /// Hours, 0-23.
    pub hour: BTreeSet<u32>,
    /// Days of month, 1-31.
    pub day_of_month: BTreeSet<u32>,
    /// Months, 1-12.
    pub month: BTreeSet<u32>,
    /// Days of week, 0-6 with Sunday = 0.
    pub day_of_week: BTreeSet<u32>,
}

impl Rule {
    /// Parse rule text: six (or five, with `0` seconds prepended) fields,
    /// a bare `*`/empty string, or a `@` macro.
    ///
    /// # Errors
    ///
    /// [`CronError::Parse`] on out-of-range values or unparseable tokens.
    pub fn parse(text: &str) -> Result<Self, CronError> {
        let text = text.trim();
        if text.is_empty() || text == "*" {
            return Ok(Self::default());
        }
        if text.starts_with('@') {
            return expand_macro(text);
        }

        let mut fields: Vec<&str> = text.split_whitespace().collect();
        if fields.len() == 5 {
            fields.insert(0, "0");
        }
        if fields.len() != 6 {
            return Err(CronError::Parse(format!(
                "expected 5 or 6 fields, got {}: {text:?}",
                fields.len()
            )));
        }

        let mut rule = Self::default();
        let sets = [
            &mut rule.second,
            &mut rule.minute,
            &mut rule.hour,
            &mut rule.day_of_month,
            &mut rule.month,
            &mut rule.day_of_week,
        ];
        for ((field, spec), set) in fields.iter().zip(&FIELD_SPECS).zip(sets) {
            *set = parse_field(field, spec)?;
        }
        Ok(rule)
    }

    /// Whether the rule matches the given instant: for every non-empty
    /// set, the corresponding component must be an element.
    pub fn is_due<Tz: TimeZone>(&self, at: &DateTime<Tz>) -> bool {
        member(&self.second, at.second())
            && member(&self.minute, at.minute())
            && member(&self.hour, at.hour())
            && member(&self.day_of_month, at.day())
            && member(&self.month, at.month())
            && member(&self.day_of_week, at.weekday().num_days_from_sunday())
    }
}

fn member(set: &BTreeSet<u32>, value: u32) -> bool {
    set.is_empty() || set.contains(&value)
}

/// Parse one field: `*`, an exact value, `a-b`, `*/k`, a name, or a
/// comma-separated list of those.
fn parse_field(text: &str, spec: &FieldSpec) -> Result<BTreeSet<u32>, CronError> {
    let mut set = BTreeSet::new();
    if text == "*" {
        return Ok(set);
    }
    for part in text.split(',') {
        if let Some(step) = part.strip_prefix("*/") {
            let k: u32 = step.parse().map_err(|_| {
                CronError::Parse(format!("bad step in {} field: {part:?}", spec.name))
            })?;
            if k == 0 {
                return Err(CronError::Parse(format!(
                    "zero step in {} field: {part:?}",
                    spec.name
                )));
            }
            // */1 is equivalent to "any value".
            if k == 1 {
                continue;
            }
            let mut v = spec.min;
            while v <= spec.max {
                set.insert(v);
                v += k;
            }
        } else if let Some((a, b)) = part.split_once('-') {
            let mut lo = parse_value(a, spec)?;
            let mut hi = parse_value(b, spec)?;
            if lo > hi {
                std::mem::swap(&mut lo, &mut hi);
            }
            set.extend(lo..=hi);
        } else {
            set.insert(parse_value(part, spec)?);
        }
    }
    Ok(set)
}

/// Parse a single value: an integer within the field's bounds, or a
/// case-insensitive three-letter name where the field allows names.
fn parse_value(text: &str, spec: &FieldSpec) -> Result<u32, CronError> {
    if let Some(names) = spec.names {
        let lowered = text.to_ascii_lowercase();
        if let Some(idx) = names.iter().position(|n| *n == lowered) {
            return Ok(spec.min + idx as u32);
        }
    }
    let v: u32 = text.parse().map_err(|_| {
        CronError::Parse(format!("bad value in {} field: {text:?}", spec.name))
    })?;
    if v < spec.min || v > spec.max {
        return Err(CronError::Parse(format!(
            "{} out of range {}-{}: {v}",
            spec.name, spec.min, spec.max
        )));
    }
    Ok(v)
}

/// Expand a leading-`@` macro into a rule.
fn expand_macro(text: &str) -> Result<Rule, CronError> {
    let lowered = text.to_ascii_lowercase();
    match lowered.as_str() {
        "@yearly" | "@annually" => Rule::parse("0 0 0 1 1 *"),
        "@monthly" => Rule::parse("0 0 0 1 * *"),
        "@weekly" => Rule::parse("0 0 0 * * 0"),
        "@daily" | "@midnight" => Rule::parse("0 0 0 * * *"),
        "@hourly" => Rule::parse("0 0 * * * *"),
        _ => {
            let mut tokens = lowered.split_whitespace();
            if tokens.next() != Some("@every") {
                return Err(CronError::Parse(format!("unknown macro: {text:?}")));
            }
            let (n, unit) = match (tokens.next(), tokens.next(), tokens.next()) {
                (Some(unit), None, _) => (1u32, unit),
                (Some(n), Some(unit), None) => {
                    let n: u32 = n.parse().map_err(|_| {
                        CronError::Parse(format!("bad @every count: {text:?}"))
                    })?;
                    (n, unit)
                }
                _ => return Err(CronError::Parse(format!("bad @every rule: {text:?}"))),
            };
            expand_every(n, unit, text)
        }
    }
}

/// Build the rule for `@every N <unit>` with per-unit upper bounds.
fn expand_every(n: u32, unit: &str, text: &str) -> Result<Rule, CronError> {
    let out_of_range = |max: u32| {
        CronError::Parse(format!("@every {unit} count must be 1-{max}: {text:?}"))
    };
    if n == 0 {
        return Err(CronError::Parse(format!("@every count must be >= 1: {text:?}")));
    }
    let template = match unit {
        "second" => {
            if n >= 60 {
                return Err(out_of_range(59));
            }
            format!("*/{n} * * * * *")
        }
        "minute" => {
            if n >= 60 {
                return Err(out_of_range(59));
            }
            format!("0 */{n} * * * *")
        }
        "hour" => {
            if n >= 24 {
                return Err(out_of_range(23));
            }
            format!("0 0 */{n} * * *")
        }
        "day" => {
            if n >= 31 {
                return Err(out_of_range(30));
            }
            format!("0 0 0 */{n} * *")
        }
        "month" => {
            if n >= 12 {
                return Err(out_of_range(11));
            }
            format!("0 0 0 1 */{n} *")
        }
        "dayofweek" => {
            if n >= 7 {
                return Err(out_of_range(6));
            }
            format!("0 0 0 * * */{n}")
        }
        "week" => {
            if n != 1 {
                return Err(out_of_range(1));
            }
            "0 0 0 * * 0".to_string()
        }
        "year" => {
            if n != 1 {
                return Err(out_of_range(1));
            }
            "0 0 0 1 1 *".to_string()
        }
        _ => return Err(CronError::Parse(format!("unknown @every unit: {unit:?}"))),
    };
    Rule::parse(&template)
}
