//! Interval → recurring schedule derivation

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use super::SchedulerError;

/// Recurring schedule derived from a monitor interval
///
/// Intervals are bucketed into the coarsest whole unit: below a minute they
/// run every `n` seconds, below an hour every `n` minutes and beyond that
/// every `n` hours. The division truncates, so 90s runs every minute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "unit", content = "every", rename_all = "lowercase")]
pub enum ScheduleSpec {
    Seconds(u64),
    Minutes(u64),
    Hours(u64),
}

impl ScheduleSpec {
    pub fn from_interval(interval_secs: u64) -> Result<Self, SchedulerError> {
        match interval_secs {
            0 => Err(SchedulerError::InvalidSchedule(
                "interval of 0 seconds cannot be scheduled".to_string(),
            )),
            i if i < 60 => Ok(ScheduleSpec::Seconds(i)),
            i if i < 3600 => Ok(ScheduleSpec::Minutes(i / 60)),
            i => Ok(ScheduleSpec::Hours(i / 3600)),
        }
    }

    /// Time between two firings
    pub fn period(&self) -> Duration {
        match *self {
            ScheduleSpec::Seconds(n) => Duration::from_secs(n),
            ScheduleSpec::Minutes(n) => Duration::from_secs(n * 60),
            ScheduleSpec::Hours(n) => Duration::from_secs(n * 3600),
        }
    }
}

impl fmt::Display for ScheduleSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduleSpec::Seconds(n) => write!(f, "@every {n}s"),
            ScheduleSpec::Minutes(n) => write!(f, "@every {n}m"),
            ScheduleSpec::Hours(n) => write!(f, "@every {n}h"),
        }
    }
}
