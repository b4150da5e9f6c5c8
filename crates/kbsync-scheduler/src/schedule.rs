//! When a ticker fires.

use std::fmt;
use std::time::Duration;

use crate::SchedulerError;

/// Firing rule of a ticker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickSchedule {
    /// Fixed period, counted from scheduler start
    Interval(Duration),
    /// 6-field cron expression (sec min hour day-of-month month day-of-week)
    Cron(String),
}

impl TickSchedule {
    pub fn every_hours(hours: u32) -> Self {
        TickSchedule::Interval(Duration::from_secs(u64::from(hours) * 3600))
    }

    /// Cron expression if given, otherwise the hourly interval.
    pub fn from_parts(check_interval_hours: u32, cron: Option<&str>) -> Self {
        match cron {
            Some(expr) => TickSchedule::Cron(expr.to_string()),
            None => TickSchedule::every_hours(check_interval_hours),
        }
    }

    pub(crate) fn validate(&self) -> Result<(), SchedulerError> {
        match self {
            TickSchedule::Interval(d) if d.is_zero() => Err(SchedulerError::InvalidInterval(
                "interval must be positive".to_string(),
            )),
            TickSchedule::Interval(_) => Ok(()),
            TickSchedule::Cron(expr) => crate::validate_cron_expression(expr),
        }
    }
}

impl fmt::Display for TickSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TickSchedule::Interval(d) if d.as_secs() % 3600 == 0 && !d.is_zero() => {
                write!(f, "every {}h", d.as_secs() / 3600)
            }
            TickSchedule::Interval(d) => write!(f, "every {}s", d.as_secs()),
            TickSchedule::Cron(expr) => write!(f, "cron {}", expr),
        }
    }
}
