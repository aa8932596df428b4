// Cron expression parsing and next-occurrence evaluation

use crate::errors::ScheduleError;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule as CronSchedule;
use std::str::FromStr;

/// Parse and validate a 6-field cron expression (seconds precision, optional
/// 7th year field).
///
/// Day-of-week ordinals follow standard crontab numbering: 0-7 where both 0
/// and 7 mean Sunday. The `cron` crate numbers days 1-7 with 1 = Sunday, so
/// the field is normalized before parsing.
pub fn parse_cron_expression(expression: &str) -> Result<CronSchedule, ScheduleError> {
    let normalized = normalize_days_of_week(expression)?;
    CronSchedule::from_str(&normalized).map_err(|e| ScheduleError::InvalidCronExpression {
        expression: expression.to_string(),
        reason: e.to_string(),
    })
}

/// Compute the first occurrence of `expression` strictly after `after`,
/// evaluated in `timezone` and returned in UTC.
///
/// An exhausted schedule or a computed occurrence that fails to advance past
/// `after` is a configuration error: it is raised here so a broken expression
/// can never produce an immediately-due trigger loop.
pub fn next_occurrence(
    expression: &str,
    timezone: Tz,
    after: DateTime<Utc>,
) -> Result<DateTime<Utc>, ScheduleError> {
    let schedule = parse_cron_expression(expression)?;
    let after_in_tz = after.with_timezone(&timezone);

    let next_in_tz =
        schedule
            .after(&after_in_tz)
            .next()
            .ok_or_else(|| ScheduleError::NoFutureOccurrence {
                expression: expression.to_string(),
                after,
            })?;

    let next_utc = next_in_tz.with_timezone(&Utc);
    if next_utc <= after {
        return Err(ScheduleError::NonAdvancingNextRun {
            expression: expression.to_string(),
            after,
            computed: next_utc,
        });
    }

    Ok(next_utc)
}

fn normalize_days_of_week(expression: &str) -> Result<String, ScheduleError> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    if fields.len() != 6 && fields.len() != 7 {
        return Err(ScheduleError::InvalidCronExpression {
            expression: expression.to_string(),
            reason: format!("expected 6 or 7 fields, got {}", fields.len()),
        });
    }

    let mut normalized: Vec<String> = fields.iter().map(|f| f.to_string()).collect();
    normalized[5] = map_day_of_week_field(fields[5]);
    Ok(normalized.join(" "))
}

fn map_day_of_week_field(field: &str) -> String {
    field
        .split(',')
        .map(|part| {
            let (base, step) = match part.split_once('/') {
                Some((base, step)) => (base, Some(step)),
                None => (part, None),
            };
            let mapped = if base == "*" || base == "?" {
                base.to_string()
            } else if let Some((lo, hi)) = base.split_once('-') {
                format!("{}-{}", map_day_of_week_ordinal(lo), map_day_of_week_ordinal(hi))
            } else {
                map_day_of_week_ordinal(base)
            };
            match step {
                Some(step) => format!("{}/{}", mapped, step),
                None => mapped,
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

fn map_day_of_week_ordinal(token: &str) -> String {
    // Named days (SUN, MON, ...) pass through untouched.
    match token.trim().parse::<u32>() {
        Ok(n) => ((n % 7) + 1).to_string(),
        Err(_) => token.to_string(),
    }
}
