//! Next-fire computation for every schedule kind.
//!
//! Calendar schedules search in wall-clock space for the earliest matching
//! minute strictly after the reference, then map it back to an absolute
//! instant. DST rules:
//! - a wall-clock match skipped by a spring-forward gap fires at the first
//!   valid instant after the gap;
//! - a wall-clock match repeated by a fall-back overlap fires on its first
//!   occurrence only.

use chrono::{
    DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc,
};
use chrono_tz::Tz;
use tracing::warn;

use crate::cron::CronExpr;
use crate::types::Schedule;

/// Give up searching a calendar expression after this many wall-clock steps.
/// Coarse field stepping makes a year a few thousand steps at worst, so this
/// covers well over five years — enough for `0 0 29 2 *`-style expressions.
const MAX_SEARCH_STEPS: u32 = 100_000;

/// Longest DST gap worth scanning across, in minutes.
const MAX_GAP_SCAN_MINUTES: u32 = 240;

/// Compute the next UTC fire time for `schedule` strictly after `from`.
///
/// Returns `None` when the schedule is exhausted (a `Once` whose instant has
/// already passed) or when a calendar expression has no matching occurrence
/// within the search horizon.
pub fn next_fire(schedule: &Schedule, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match schedule {
        Schedule::Interval { every_seconds } => {
            Some(from + Duration::seconds(*every_seconds as i64))
        }

        Schedule::Once { at } => {
            // Fire only if the instant is still in the future.
            if *at > from {
                Some(*at)
            } else {
                None
            }
        }

        Schedule::Calendar { expr, tz } => {
            // Expressions are validated at creation time; a parse failure
            // here means the stored record was edited out from under us.
            let parsed: CronExpr = match expr.parse() {
                Ok(e) => e,
                Err(e) => {
                    warn!(%expr, "unparseable cron expression in stored job: {e}");
                    return None;
                }
            };
            match tz {
                Some(name) => {
                    let zone: Tz = match name.parse() {
                        Ok(z) => z,
                        Err(_) => {
                            warn!(tz = %name, "unknown timezone in stored job");
                            return None;
                        }
                    };
                    next_calendar_fire(&parsed, &zone, from)
                }
                None => next_calendar_fire(&parsed, &chrono::Local, from),
            }
        }
    }
}

/// Find the earliest instant strictly after `from` whose wall-clock time in
/// `zone` matches `expr`.
///
/// Fields are checked coarse-to-fine so mismatches skip whole months, days,
/// or hours instead of stepping minute by minute.
fn next_calendar_fire<Z: TimeZone>(
    expr: &CronExpr,
    zone: &Z,
    from: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let local = from.with_timezone(zone).naive_local();
    let mut t = local.with_second(0)?.with_nanosecond(0)? + Duration::minutes(1);

    for _ in 0..MAX_SEARCH_STEPS {
        if !expr.month_matches(t.month()) {
            t = start_of_next_month(&t)?;
            continue;
        }
        if !expr.day_matches(t.day(), t.weekday().num_days_from_sunday()) {
            t = (t.date() + Duration::days(1)).and_hms_opt(0, 0, 0)?;
            continue;
        }
        if !expr.hour_matches(t.hour()) {
            t = t.with_minute(0)? + Duration::hours(1);
            continue;
        }
        if !expr.minute_matches(t.minute()) {
            t += Duration::minutes(1);
            continue;
        }

        // Wall-clock match — map it to an absolute instant under the DST
        // rules. A fall-back duplicate resolves to its first occurrence,
        // which may already be behind `from`; keep searching in that case.
        if let Some(instant) = resolve_local(zone, t) {
            if instant > from {
                return Some(instant);
            }
        }
        t += Duration::minutes(1);
    }

    warn!("calendar search exhausted without a match");
    None
}

/// Map a wall-clock time to an absolute instant.
///
/// Spring-forward gaps resolve to the first valid instant after the gap;
/// fall-back overlaps resolve to the earlier of the two occurrences.
fn resolve_local<Z: TimeZone>(zone: &Z, t: NaiveDateTime) -> Option<DateTime<Utc>> {
    match zone.from_local_datetime(&t) {
        LocalResult::Single(dt) => Some(dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(first, _second) => Some(first.with_timezone(&Utc)),
        LocalResult::None => {
            // Inside a spring-forward gap: scan forward for the gap's end.
            let mut probe = t;
            for _ in 0..MAX_GAP_SCAN_MINUTES {
                probe += Duration::minutes(1);
                match zone.from_local_datetime(&probe) {
                    LocalResult::Single(dt) => return Some(dt.with_timezone(&Utc)),
                    LocalResult::Ambiguous(first, _) => return Some(first.with_timezone(&Utc)),
                    LocalResult::None => {}
                }
            }
            None
        }
    }
}

fn start_of_next_month(t: &NaiveDateTime) -> Option<NaiveDateTime> {
    let (year, month) = if t.month() == 12 {
        (t.year() + 1, 1)
    } else {
        (t.year(), t.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)?.and_hms_opt(0, 0, 0)
}
