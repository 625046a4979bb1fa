//! Cron expressions in the six-field form
//! `minute hour day-of-month month day-of-week year`, evaluated in UTC.
//!
//! `?` marks "no specific value" in one of the day fields. Both day fields
//! may not be `*` at the same time.

use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use cron::Schedule;

use herald_common::error::AppError;

const FIELD_COUNT: usize = 6;
const DAY_OF_MONTH: usize = 2;
const DAY_OF_WEEK: usize = 4;

#[derive(Debug, Clone)]
pub struct CronExpression {
    source: String,
    schedule: Schedule,
}

impl CronExpression {
    pub fn parse(expression: &str) -> Result<Self, AppError> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != FIELD_COUNT {
            return Err(invalid(format!(
                "expected {FIELD_COUNT} fields, got {}",
                fields.len()
            )));
        }
        if fields[DAY_OF_MONTH] == "*" && fields[DAY_OF_WEEK] == "*" {
            return Err(invalid(
                "day-of-month and day-of-week cannot both be '*'".to_string(),
            ));
        }

        let normalized: Vec<&str> = fields
            .iter()
            .map(|f| if *f == "?" { "*" } else { f })
            .collect();
        // The cron crate wants a leading seconds field.
        let schedule = Schedule::from_str(&format!("0 {}", normalized.join(" ")))
            .map_err(|e| invalid(e.to_string()))?;

        Ok(Self {
            source: fields.join(" "),
            schedule,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Next occurrence strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }

    /// Latest occurrence in `(start, end]`.
    pub fn latest_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        if end <= start {
            return None;
        }
        // Look at the last day first to keep dense schedules cheap after a long outage.
        let recent = (end - Duration::days(1)).max(start);
        let scan = |from: DateTime<Utc>| {
            self.schedule
                .after(&from)
                .take_while(|t| *t <= end)
                .last()
        };
        scan(recent).or_else(|| if recent > start { scan(start) } else { None })
    }
}

impl FromStr for CronExpression {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl std::fmt::Display for CronExpression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.source)
    }
}

fn invalid(reason: String) -> AppError {
    AppError::Validation(format!("Invalid cron expression: {reason}"))
}
