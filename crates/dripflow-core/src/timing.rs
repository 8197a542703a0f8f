//! Time Rule Evaluator — computes the next valid send instant for a step.
//!
//! Pure chrono arithmetic, no I/O: apply the step's raw delay, then correct
//! forward until the instant lands on an allowed weekday inside the time
//! window. Correction is bounded at 14 rounds (two full weeks covers any
//! weekly pattern); exhausting the bound means the step's schedule is
//! unsatisfiable and is reported as a configuration error.

use chrono::{DateTime, Datelike, NaiveTime, TimeZone, Utc};

use crate::error::{DripflowError, Result};
use crate::types::{DelayUnit, StepDelay, WeeklySchedule};

/// Fallback window start when a day is disallowed and no window is set.
const DEFAULT_DAY_START: (u32, u32) = (9, 0);

/// Upper bound on forward corrections; covers any weekly pattern twice over.
const MAX_CORRECTIONS: usize = 14;

/// Earliest instant `>= reference + delay` satisfying `schedule`.
pub fn next_eligible(
    delay: StepDelay,
    schedule: &WeeklySchedule,
    reference: DateTime<Utc>,
) -> Result<DateTime<Utc>> {
    let mut candidate = apply_delay(delay, reference)?;

    let day_start = schedule.window.map(|w| w.start).unwrap_or_else(|| {
        NaiveTime::from_hms_opt(DEFAULT_DAY_START.0, DEFAULT_DAY_START.1, 0)
            .unwrap_or(NaiveTime::MIN)
    });

    for _ in 0..MAX_CORRECTIONS {
        if !schedule.allows_day(candidate.weekday()) {
            candidate = next_day_at(candidate, day_start);
            continue;
        }
        if let Some(window) = schedule.window {
            let time = candidate.time();
            if time < window.start {
                candidate = same_day_at(candidate, window.start);
                continue;
            }
            if time > window.end {
                candidate = next_day_at(candidate, window.start);
                continue;
            }
        }
        return Ok(candidate);
    }

    Err(DripflowError::Schedule(format!(
        "no valid slot within {} corrections (days={:?}, window={:?})",
        MAX_CORRECTIONS, schedule.days, schedule.window
    )))
}

/// Apply the raw delay; `Immediately` is a no-op. The amount is
/// tenant-supplied, so an out-of-range value is a configuration error,
/// never a panic.
fn apply_delay(delay: StepDelay, reference: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let span = match delay.unit {
        DelayUnit::Immediately => return Ok(reference),
        DelayUnit::Minutes => chrono::Duration::try_minutes(delay.amount),
        DelayUnit::Hours => chrono::Duration::try_hours(delay.amount),
        DelayUnit::Days => chrono::Duration::try_days(delay.amount),
    };
    span.and_then(|s| reference.checked_add_signed(s))
        .ok_or_else(|| {
            DripflowError::Schedule(format!(
                "delay of {} {:?} is out of range",
                delay.amount, delay.unit
            ))
        })
}

fn same_day_at(instant: DateTime<Utc>, time: NaiveTime) -> DateTime<Utc> {
    Utc.from_utc_datetime(&instant.date_naive().and_time(time))
}

fn next_day_at(instant: DateTime<Utc>, time: NaiveTime) -> DateTime<Utc> {
    let next = instant.date_naive() + chrono::Duration::days(1);
    Utc.from_utc_datetime(&next.and_time(time))
}
