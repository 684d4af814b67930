// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Five-field cron matching with a minute-by-minute catch-up walk.
//!
//! Standard `m h dom mon dow` form. Each field is `*`, an integer, a comma
//! list, a range `lo-hi`, or a step `*/n` / `lo-hi/n`. `dow` is Sunday-0,
//! no name abbreviations. Invalid expressions are logged and never due.

use chrono::{DateTime, Datelike, Duration, DurationRound, Timelike, Utc};
use tracing::warn;

/// Catch-up walks are capped to one day of missed minutes.
const MAX_LOOKBACK: Duration = Duration::hours(24);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CronPart {
    Any,
    Exact(u32),
    Range(u32, u32),
    Step { lo: u32, hi: u32, step: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CronField {
    parts: Vec<CronPart>,
}

impl CronField {
    fn parse(field: &str, min: u32, max: u32) -> Option<Self> {
        let mut parts = Vec::new();
        for piece in field.split(',') {
            parts.push(Self::parse_part(piece, min, max)?);
        }
        if parts.is_empty() {
            return None;
        }
        Some(Self { parts })
    }

    fn parse_part(piece: &str, min: u32, max: u32) -> Option<CronPart> {
        if let Some((base, step)) = piece.split_once('/') {
            let step: u32 = step.parse().ok()?;
            if step == 0 {
                return None;
            }
            let (lo, hi) = if base == "*" {
                (min, max)
            } else {
                let (lo, hi) = base.split_once('-')?;
                (lo.parse().ok()?, hi.parse().ok()?)
            };
            return (lo <= hi && hi <= max).then_some(CronPart::Step { lo, hi, step });
        }

        if piece == "*" {
            return Some(CronPart::Any);
        }

        if let Some((lo, hi)) = piece.split_once('-') {
            let lo: u32 = lo.parse().ok()?;
            let hi: u32 = hi.parse().ok()?;
            return (lo <= hi && hi <= max).then_some(CronPart::Range(lo, hi));
        }

        let value: u32 = piece.parse().ok()?;
        (min <= value && value <= max).then_some(CronPart::Exact(value))
    }

    fn matches(&self, value: u32) -> bool {
        self.parts.iter().any(|part| match *part {
            CronPart::Any => true,
            CronPart::Exact(v) => value == v,
            CronPart::Range(lo, hi) => lo <= value && value <= hi,
            CronPart::Step { lo, hi, step } => {
                lo <= value && value <= hi && (value - lo) % step == 0
            }
        })
    }
}

/// A parsed five-field cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
struct CronExpr {
    minute: CronField,
    hour: CronField,
    dom: CronField,
    month: CronField,
    dow: CronField,
}

impl CronExpr {
    fn parse(expr: &str) -> Option<Self> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return None;
        }
        Some(Self {
            minute: CronField::parse(fields[0], 0, 59)?,
            hour: CronField::parse(fields[1], 0, 23)?,
            dom: CronField::parse(fields[2], 1, 31)?,
            month: CronField::parse(fields[3], 1, 12)?,
            dow: CronField::parse(fields[4], 0, 6)?,
        })
    }

    fn matches(&self, at: DateTime<Utc>) -> bool {
        self.minute.matches(at.minute())
            && self.hour.matches(at.hour())
            && self.dom.matches(at.day())
            && self.month.matches(at.month())
            && self.dow.matches(at.weekday().num_days_from_sunday())
    }
}

/// True when `expr` has a matching minute in `(last_run, now]`.
///
/// Walks minute-by-minute so ticks missed during brief downtime still fire;
/// the walk is capped at 24 hours to bound catch-up work after long outages.
pub fn cron_due(expr: &str, last_run: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    let Some(parsed) = CronExpr::parse(expr) else {
        warn!(cron = expr, "invalid cron expression, treating as never due");
        return false;
    };

    if now - last_run < Duration::minutes(1) {
        return false;
    }

    let start = last_run.max(now - MAX_LOOKBACK);
    // First whole minute after `start`, walking up to the minute of `now`
    let Ok(trunc) = start.duration_trunc(Duration::minutes(1)) else {
        return false;
    };
    let mut check = trunc + Duration::minutes(1);
    let Ok(end) = now.duration_trunc(Duration::minutes(1)) else {
        return false;
    };

    while check <= end {
        if parsed.matches(check) {
            return true;
        }
        check += Duration::minutes(1);
    }

    false
}

#[cfg(test)]
#[path = "cron_tests.rs"]
mod tests;
