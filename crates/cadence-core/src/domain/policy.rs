//! Execution policy: when a task is due.
//!
//! # Rules
//! - **Single**: due once at `run_at`; nothing after a run at or past it.
//! - **Recurring / interval**: `start` first, then last run + interval.
//! - **Recurring / cron**: first match strictly after `start`, then after
//!   the last run.
//! - Either recurring form yields no further run once the candidate passes `end`.

use crate::domain::cron::CronExpression;
use crate::domain::errors::SchedulerError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How often a recurring task fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Frequency {
    Interval { seconds: u64 },
    Cron { expression: CronExpression },
}

impl Frequency {
    /// Parses an admin-entered frequency: all digits is an interval in
    /// seconds, anything else is a cron expression.
    pub fn parse(input: &str) -> Result<Self, SchedulerError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(SchedulerError::validation("missing frequency"));
        }
        if input.bytes().all(|b| b.is_ascii_digit()) {
            let seconds = input
                .parse::<u64>()
                .map_err(|_| SchedulerError::validation(format!("interval `{input}` is too large")))?;
            return Ok(Self::Interval { seconds });
        }
        CronExpression::parse(input)
            .map(|expression| Self::Cron { expression })
            .map_err(|source| SchedulerError::InvalidExpression {
                expression: input.to_string(),
                source,
            })
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interval { seconds } => write!(f, "every {seconds}s"),
            Self::Cron { expression } => write!(f, "cron `{expression}`"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionPolicy {
    /// Due once, at `run_at`.
    Single { run_at: DateTime<Utc> },
    /// Due from `start` on, by interval or cron, until the optional `end`.
    Recurring {
        start: DateTime<Utc>,
        #[serde(default)]
        end: Option<DateTime<Utc>>,
        frequency: Frequency,
        #[serde(default)]
        allow_multiple: bool,
    },
}

impl ExecutionPolicy {
    pub fn single(run_at: DateTime<Utc>) -> Self {
        Self::Single { run_at }
    }

    pub fn every(start: DateTime<Utc>, seconds: u64) -> Self {
        Self::Recurring {
            start,
            end: None,
            frequency: Frequency::Interval { seconds },
            allow_multiple: false,
        }
    }

    pub fn cron(start: DateTime<Utc>, expression: &str) -> Result<Self, SchedulerError> {
        let expression =
            CronExpression::parse(expression).map_err(|source| SchedulerError::InvalidExpression {
                expression: expression.to_string(),
                source,
            })?;
        Ok(Self::Recurring {
            start,
            end: None,
            frequency: Frequency::Cron { expression },
            allow_multiple: false,
        })
    }

    /// Sets the end of a recurring policy. Single policies have no end and
    /// are returned unchanged.
    pub fn until(mut self, at: DateTime<Utc>) -> Self {
        if let Self::Recurring { end, .. } = &mut self {
            *end = Some(at);
        }
        self
    }

    /// Allows overlapping runs of a recurring policy.
    pub fn allowing_multiple(mut self) -> Self {
        if let Self::Recurring { allow_multiple, .. } = &mut self {
            *allow_multiple = true;
        }
        self
    }

    pub fn is_single(&self) -> bool {
        matches!(self, Self::Single { .. })
    }

    pub fn allows_multiple(&self) -> bool {
        matches!(
            self,
            Self::Recurring {
                allow_multiple: true,
                ..
            }
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Single { .. } => "single",
            Self::Recurring { .. } => "recurring",
        }
    }

    /// Cron source or interval seconds, as shown in listings.
    pub fn frequency_label(&self) -> Option<String> {
        match self {
            Self::Single { .. } => None,
            Self::Recurring {
                frequency: Frequency::Interval { seconds },
                ..
            } => Some(seconds.to_string()),
            Self::Recurring {
                frequency: Frequency::Cron { expression },
                ..
            } => Some(expression.to_string()),
        }
    }

    pub fn validate(&self) -> Result<(), SchedulerError> {
        let Self::Recurring {
            start,
            end,
            frequency,
            ..
        } = self
        else {
            return Ok(());
        };
        if let Some(end) = end
            && end < start
        {
            return Err(SchedulerError::validation(format!(
                "end {end} is before start {start}"
            )));
        }
        if let Frequency::Interval { seconds: 0 } = frequency {
            return Err(SchedulerError::validation("interval must be at least one second"));
        }
        Ok(())
    }

    /// Next due time given the start of the last run.
    ///
    /// `None` means the policy will never fire again: a single task that
    /// already ran, or a recurring task whose next slot is past its end.
    pub fn compute_next_due(
        &self,
        last_run: Option<DateTime<Utc>>,
    ) -> Result<Option<DateTime<Utc>>, SchedulerError> {
        match self {
            Self::Single { run_at } => Ok(match last_run {
                Some(last) if last >= *run_at => None,
                _ => Some(*run_at),
            }),
            Self::Recurring {
                start,
                end,
                frequency,
                ..
            } => {
                let candidate = match frequency {
                    Frequency::Interval { seconds } => match last_run {
                        None => *start,
                        Some(last) => {
                            let next = i64::try_from(*seconds)
                                .ok()
                                .and_then(Duration::try_seconds)
                                .and_then(|interval| last.checked_add_signed(interval))
                                .ok_or_else(|| {
                                    SchedulerError::validation(format!(
                                        "interval of {seconds}s is out of range"
                                    ))
                                })?;
                            next.max(*start)
                        }
                    },
                    Frequency::Cron { expression } => {
                        let after = last_run.unwrap_or(*start);
                        expression.next_match(after).map_err(|source| {
                            SchedulerError::InvalidExpression {
                                expression: expression.to_string(),
                                source,
                            }
                        })?
                    }
                };
                Ok(match end {
                    Some(end) if candidate > *end => None,
                    _ => Some(candidate),
                })
            }
        }
    }
}
