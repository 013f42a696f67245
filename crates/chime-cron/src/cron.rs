//! 5-field cron expression parsing and matching.
//!
//! Supports the standard field syntax: `*`, single values, ranges (`a-b`),
//! lists (`a,b,c`), steps (`*/n`, `a-b/n`), and 3-letter month/weekday
//! names. Day-of-week accepts both `0` and `7` for Sunday. When both
//! day-of-month and day-of-week are restricted, a date matches if either
//! field matches (classic vixie-cron behaviour).

use thiserror::Error;

const MONTH_NAMES: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];
const DAY_NAMES: [&str; 7] = ["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

/// Error produced when a cron expression fails to parse.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CronParseError {
    #[error("expected 5 fields (minute hour day-of-month month day-of-week), got {0}")]
    FieldCount(usize),

    #[error("invalid {field} field '{value}': {reason}")]
    Field {
        field: &'static str,
        value: String,
        reason: String,
    },
}

/// One parsed field: a bitmask over the field's value range, plus whether
/// the field was restricted (anything other than a bare `*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CronField {
    mask: u64,
    restricted: bool,
}

impl CronField {
    fn contains(&self, value: u32) -> bool {
        self.mask & (1u64 << value) != 0
    }
}

/// A parsed 5-field cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpr {
    minute: CronField,
    hour: CronField,
    dom: CronField,
    month: CronField,
    dow: CronField,
}

impl CronExpr {
    pub fn minute_matches(&self, minute: u32) -> bool {
        self.minute.contains(minute)
    }

    pub fn hour_matches(&self, hour: u32) -> bool {
        self.hour.contains(hour)
    }

    pub fn month_matches(&self, month: u32) -> bool {
        self.month.contains(month)
    }

    /// Day matching: when both day-of-month and day-of-week are restricted,
    /// either one matching is enough; otherwise both must match (an
    /// unrestricted field matches everything). `dow` is 0-6, Sunday = 0.
    pub fn day_matches(&self, dom: u32, dow: u32) -> bool {
        if self.dom.restricted && self.dow.restricted {
            self.dom.contains(dom) || self.dow.contains(dow)
        } else {
            self.dom.contains(dom) && self.dow.contains(dow)
        }
    }

    /// Full wall-clock match for one candidate minute.
    pub fn matches(&self, minute: u32, hour: u32, dom: u32, month: u32, dow: u32) -> bool {
        self.minute_matches(minute)
            && self.hour_matches(hour)
            && self.month_matches(month)
            && self.day_matches(dom, dow)
    }
}

impl std::str::FromStr for CronExpr {
    type Err = CronParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(CronParseError::FieldCount(fields.len()));
        }

        Ok(CronExpr {
            minute: parse_field(fields[0], "minute", 0, 59, None)?,
            hour: parse_field(fields[1], "hour", 0, 23, None)?,
            dom: parse_field(fields[2], "day-of-month", 1, 31, None)?,
            month: parse_field(fields[3], "month", 1, 12, Some(&MONTH_NAMES))?,
            dow: parse_field(fields[4], "day-of-week", 0, 7, Some(&DAY_NAMES))?,
        })
    }
}

/// Parse one comma-separated field into a bitmask.
///
/// `names`, when given, maps 3-letter names onto values starting at `min`
/// (months) or 0 (weekdays). For day-of-week, value 7 is folded onto 0.
fn parse_field(
    spec: &str,
    field: &'static str,
    min: u32,
    max: u32,
    names: Option<&[&str]>,
) -> Result<CronField, CronParseError> {
    let err = |reason: String| CronParseError::Field {
        field,
        value: spec.to_string(),
        reason,
    };

    let is_dow = field == "day-of-week";
    let mut mask = 0u64;
    let mut restricted = false;

    for item in spec.split(',') {
        if item.is_empty() {
            return Err(err("empty list item".to_string()));
        }

        // Split off an optional /step suffix.
        let (range_part, step) = match item.split_once('/') {
            Some((range, step_str)) => {
                let step: u32 = step_str
                    .parse()
                    .map_err(|_| err(format!("bad step '{step_str}'")))?;
                if step == 0 {
                    return Err(err("step must be > 0".to_string()));
                }
                (range, step)
            }
            None => (item, 1),
        };

        // Resolve the range part to [lo, hi].
        let (lo, hi, plain_value) = if range_part == "*" {
            (min, max, false)
        } else if let Some((lo_str, hi_str)) = range_part.split_once('-') {
            let lo = parse_value(lo_str, min, max, names).ok_or_else(|| {
                err(format!("bad range start '{lo_str}'"))
            })?;
            let hi = parse_value(hi_str, min, max, names).ok_or_else(|| {
                err(format!("bad range end '{hi_str}'"))
            })?;
            if lo > hi {
                return Err(err(format!("range {lo}-{hi} is reversed")));
            }
            (lo, hi, false)
        } else {
            let v = parse_value(range_part, min, max, names)
                .ok_or_else(|| err(format!("bad value '{range_part}'")))?;
            (v, v, true)
        };

        if plain_value && step > 1 {
            return Err(err("step requires a range or '*'".to_string()));
        }

        if range_part != "*" || step > 1 || spec.contains(',') {
            restricted = true;
        }

        let mut v = lo;
        while v <= hi {
            mask |= 1u64 << v;
            v += step;
        }
    }

    // Day-of-week 7 is an alias for Sunday: fold bit 7 onto bit 0 so that
    // plain values, ranges like `5-7`, and steps all land on 0-6.
    if is_dow && mask & (1u64 << 7) != 0 {
        mask = (mask | 1) & !(1u64 << 7);
    }

    Ok(CronField { mask, restricted })
}

/// Parse a single numeric or named value within [min, max].
fn parse_value(s: &str, min: u32, max: u32, names: Option<&[&str]>) -> Option<u32> {
    if let Some(names) = names {
        let lower = s.to_ascii_lowercase();
        if let Some(idx) = names.iter().position(|n| *n == lower) {
            // Month names start at 1, day names at 0.
            return Some(if min == 0 { idx as u32 } else { idx as u32 + 1 });
        }
    }
    let v: u32 = s.parse().ok()?;
    if v < min || v > max {
        return None;
    }
    Some(v)
}
