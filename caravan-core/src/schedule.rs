//! Cron-style schedule expressions.
//!
//! Tasks use classic 5-field expressions (minute, hour, day-of-month,
//! month, weekday) with `*` wildcards and comma lists. Expressions are
//! parsed once per definition change; the scheduler only ever asks an
//! already-parsed [`Schedule`] for the next due time.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// A parse failure for a schedule expression.
#[derive(Debug, Error)]
#[error("invalid schedule expression '{expression}': {detail}")]
pub struct ScheduleError {
    pub expression: String,
    pub detail: String,
}

/// A parsed, reusable schedule.
#[derive(Debug, Clone)]
pub struct Schedule {
    inner: cron::Schedule,
    expression: String,
}

impl Schedule {
    /// Parse a 5-field cron expression.
    ///
    /// The underlying `cron` crate wants a seconds field, so `30 2 * * *`
    /// is normalized to `0 30 2 * * *` before parsing — every firing lands
    /// on second zero.
    pub fn parse(expression: &str) -> Result<Self, ScheduleError> {
        let fields = expression.split_whitespace().count();
        if fields != 5 {
            return Err(ScheduleError {
                expression: expression.to_string(),
                detail: format!("expected 5 fields (minute hour day month weekday), got {fields}"),
            });
        }
        let normalized = format!("0 {}", expression.trim());
        let inner = cron::Schedule::from_str(&normalized).map_err(|e| ScheduleError {
            expression: expression.to_string(),
            detail: e.to_string(),
        })?;
        Ok(Self {
            inner,
            expression: expression.trim().to_string(),
        })
    }

    /// The first firing strictly after `after`, or `None` if the
    /// expression never fires again.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.inner.after(&after).next()
    }

    /// The original 5-field expression, as written.
    pub fn expression(&self) -> &str {
        &self.expression
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
