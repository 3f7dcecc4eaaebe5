//! Recurrence expression parsing and matching
//!
//! Schedule entries use the classic 5-field cron grammar
//! (`minute hour day-of-month month day-of-week`). The finest unit is one
//! minute, which is also the scheduler loop's tick granularity: a tick
//! fires an entry exactly when its expression matches the tick's minute.

use std::str::FromStr;

use chrono::{DateTime, Timelike, Utc};
use cron::Schedule;
use thiserror::Error;

/// Invalid recurrence expression
#[derive(Debug, Error)]
#[error("invalid cron expression '{expr}': {reason}")]
pub struct ScheduleParseError {
    pub expr: String,
    pub reason: String,
}

/// A parsed 5-field cron expression
#[derive(Debug, Clone)]
pub struct Recurrence {
    expr: String,
    schedule: Schedule,
}

impl Recurrence {
    /// Parse a 5-field cron expression.
    ///
    /// The underlying schedule grammar carries a seconds field; the
    /// expression is anchored at second zero so matching stays on minute
    /// boundaries.
    pub fn parse(expr: &str) -> Result<Self, ScheduleParseError> {
        let fields = expr.split_whitespace().count();
        if fields != 5 {
            return Err(ScheduleParseError {
                expr: expr.to_string(),
                reason: format!(
                    "expected 5 fields (minute hour day-of-month month day-of-week), got {}",
                    fields
                ),
            });
        }

        let schedule = Schedule::from_str(&format!("0 {}", expr)).map_err(|e| ScheduleParseError {
            expr: expr.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            expr: expr.to_string(),
            schedule,
        })
    }

    /// Whether the expression fires at the given tick.
    ///
    /// The timestamp is truncated to its minute first, so callers may pass
    /// any instant within the minute being evaluated.
    pub fn matches(&self, tick: DateTime<Utc>) -> bool {
        self.schedule.includes(truncate_to_minute(tick))
    }

    /// The original expression text
    pub fn expr(&self) -> &str {
        &self.expr
    }
}

impl std::fmt::Display for Recurrence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.expr)
    }
}

/// Zero out the sub-minute part of a timestamp
pub fn truncate_to_minute(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(ts)
}
