use crate::error::{Result, RetryError};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

/// Date arithmetic for planned retries and batch cutoffs.
///
/// Business-day shifting is not done here; the local calendar date of the
/// rejection plus the policy delay is the planned date.
#[derive(Debug, Clone, Copy)]
pub struct RetryCalendar {
    pub timezone: Tz,
    pub retry_time: NaiveTime,
}

impl RetryCalendar {
    pub fn new(timezone: Tz, retry_time: NaiveTime) -> Self {
        Self { timezone, retry_time }
    }

    pub fn from_names(timezone: &str, retry_time: &str) -> Result<Self> {
        Ok(Self::new(parse_timezone(timezone)?, parse_time_of_day(retry_time)?))
    }

    /// Planned instant of the retry following `attempts_made` attempts, or `None`
    /// once the delay table is exhausted.
    pub fn retry_instant(
        &self,
        rejection_date: DateTime<Utc>,
        delays_days: &[i32],
        attempts_made: usize,
    ) -> Option<DateTime<Utc>> {
        let delay = *delays_days.get(attempts_made)?;
        if delay < 0 {
            return None;
        }
        let local_date = rejection_date.with_timezone(&self.timezone).date_naive();
        let planned = local_date.checked_add_signed(Duration::days(i64::from(delay)))?;
        Some(local_to_utc(self.timezone, planned.and_time(self.retry_time)))
    }

    pub fn local_date(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.timezone).date_naive()
    }
}

/// Inclusive upper bound of the due set for a batch run.
pub fn cutoff_instant(target_date: NaiveDate, timezone: &str, cutoff_time: &str) -> Result<DateTime<Utc>> {
    let tz = parse_timezone(timezone)?;
    let time = parse_time_of_day(cutoff_time)?;
    Ok(local_to_utc(tz, target_date.and_time(time)))
}

/// First occurrence of `run_time` in `tz` strictly after `now`.
pub fn next_daily_run(now: DateTime<Utc>, tz: Tz, run_time: NaiveTime) -> DateTime<Utc> {
    let today = now.with_timezone(&tz).date_naive();
    let candidate = local_to_utc(tz, today.and_time(run_time));
    if candidate > now {
        return candidate;
    }
    let tomorrow = today.succ_opt().unwrap_or(today);
    local_to_utc(tz, tomorrow.and_time(run_time))
}

pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.trim()
        .parse::<Tz>()
        .map_err(|_| RetryError::InvalidRequest(format!("unknown timezone: {name}")))
}

pub fn parse_time_of_day(value: &str) -> Result<NaiveTime> {
    let value = value.trim();
    NaiveTime::parse_from_str(value, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M"))
        .map_err(|_| RetryError::InvalidRequest(format!("invalid time of day: {value}")))
}

// Ambiguous wall-clock times take the earlier instant; times skipped by a DST
// jump move forward by the gap.
fn local_to_utc(tz: Tz, local: NaiveDateTime) -> DateTime<Utc> {
    match tz.from_local_datetime(&local).earliest() {
        Some(dt) => dt.with_timezone(&Utc),
        None => tz
            .from_local_datetime(&(local + Duration::hours(1)))
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|| Utc.from_utc_datetime(&local)),
    }
}
