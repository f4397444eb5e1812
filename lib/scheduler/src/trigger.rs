//! Trigger types describing when a job fires.
//!
//! Triggers are transient scheduling instructions: they are validated when
//! a job is scheduled and handed to the executor, not persisted verbatim.
//! A one-shot trigger fires exactly once and carries a misfire threshold;
//! a unix-cron trigger fires repeatedly per a seconds-granularity cron
//! expression, never before its start instant.

use crate::error::SchedulingError;
use chrono::{DateTime, Duration, Utc};
use cron::Schedule;
use std::str::FromStr;

/// Fires exactly once at a target instant.
///
/// If the scheduler cannot start the firing within `misfire_threshold` of
/// `fire_at` (it was down, stopped, or paused), the firing is skipped
/// entirely rather than run late.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OneShotTrigger {
    /// Trigger name, used for logging.
    pub name: String,
    /// The instant to fire at. An instant in the past fires immediately,
    /// best-effort, subject to the misfire threshold.
    pub fire_at: DateTime<Utc>,
    /// Longest acceptable delay past `fire_at` before the firing counts as
    /// misfired.
    pub misfire_threshold: Duration,
}

impl OneShotTrigger {
    /// Creates a one-shot trigger.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        fire_at: DateTime<Utc>,
        misfire_threshold: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            fire_at,
            misfire_threshold,
        }
    }

    /// Returns true when a firing starting at `now` would be too late.
    #[must_use]
    pub fn is_misfired(&self, now: DateTime<Utc>) -> bool {
        now > self.fire_at + self.misfire_threshold
    }
}

/// Fires repeatedly per a cron expression.
///
/// Expressions use 6 or 7 whitespace-separated fields with seconds
/// granularity (`sec min hour day-of-month month day-of-week [year]`), so
/// `"0/1 * * * * *"` fires every second. Ticks are computed strictly after
/// "now"; a tick that could not run on time is skipped, not run late.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnixCronTrigger {
    /// Trigger name, used for logging.
    pub name: String,
    /// Earliest activation instant.
    pub start_at: DateTime<Utc>,
    /// Cron expression with seconds granularity.
    pub expression: String,
}

impl UnixCronTrigger {
    /// Creates a cron trigger.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        start_at: DateTime<Utc>,
        expression: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            start_at,
            expression: expression.into(),
        }
    }

    /// Parses the cron expression.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulingError::InvalidCronExpression`] when the
    /// expression does not parse.
    pub fn schedule(&self) -> Result<Schedule, SchedulingError> {
        Schedule::from_str(&self.expression).map_err(|e| SchedulingError::InvalidCronExpression {
            expression: self.expression.clone(),
            reason: e.to_string(),
        })
    }

    /// Computes the next fire instant strictly after `after`, honoring the
    /// trigger's start instant.
    ///
    /// Returns `None` when the schedule produces no further instants.
    #[must_use]
    pub fn next_fire_after(&self, schedule: &Schedule, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        // `Schedule::after` is exclusive; nudge the lower bound so a
        // start instant that is itself a cron match still fires.
        let lower = if after < self.start_at {
            self.start_at - Duration::milliseconds(1)
        } else {
            after
        };
        schedule.after(&lower).next()
    }
}

/// Broad shape of a trigger, used by retry flows to decide whether a job
/// re-executes immediately or rides its existing recurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    /// Fires exactly once.
    OneShot,
    /// Fires repeatedly.
    Recurring,
}

/// When a job fires.
#[derive(Debug, Clone, PartialEq)]
pub enum Trigger {
    /// Fires exactly once at a target instant.
    OneShot(OneShotTrigger),
    /// Fires repeatedly per a cron expression.
    UnixCron(UnixCronTrigger),
}

impl Trigger {
    /// Returns the trigger name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::OneShot(t) => &t.name,
            Self::UnixCron(t) => &t.name,
        }
    }

    /// Returns the trigger's broad shape.
    #[must_use]
    pub fn kind(&self) -> TriggerKind {
        match self {
            Self::OneShot(_) => TriggerKind::OneShot,
            Self::UnixCron(_) => TriggerKind::Recurring,
        }
    }

    /// Validates the trigger at schedule time.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulingError::InvalidCronExpression`] for a cron
    /// trigger whose expression does not parse.
    pub fn validate(&self) -> Result<(), SchedulingError> {
        match self {
            Self::OneShot(_) => Ok(()),
            Self::UnixCron(t) => t.schedule().map(|_| ()),
        }
    }
}
