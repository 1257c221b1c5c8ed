use crate::domain::audit::AuditActorType;
use crate::domain::dates::parse_time_of_day;
use crate::error::RetryError;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RetryJobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Partial,
}

impl RetryJobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetryJobStatus::Pending => "PENDING",
            RetryJobStatus::Running => "RUNNING",
            RetryJobStatus::Completed => "COMPLETED",
            RetryJobStatus::Failed => "FAILED",
            RetryJobStatus::Partial => "PARTIAL",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, RetryJobStatus::Pending | RetryJobStatus::Running)
    }

    pub fn from_counts(successful: i32, failed: i32) -> Self {
        if failed == 0 {
            RetryJobStatus::Completed
        } else if successful == 0 {
            RetryJobStatus::Failed
        } else {
            RetryJobStatus::Partial
        }
    }
}

impl FromStr for RetryJobStatus {
    type Err = RetryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(RetryJobStatus::Pending),
            "RUNNING" => Ok(RetryJobStatus::Running),
            "COMPLETED" => Ok(RetryJobStatus::Completed),
            "FAILED" => Ok(RetryJobStatus::Failed),
            "PARTIAL" => Ok(RetryJobStatus::Partial),
            other => Err(RetryError::InvalidValue {
                kind: "job status",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunTrigger {
    Scheduler,
    Manual,
}

/// Single input of the batch orchestrator; the timer and operators both produce these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRunRequest {
    pub organisation_id: String,
    pub target_date: NaiveDate,
    pub timezone: String,
    pub cutoff_time: String,
    #[serde(default)]
    pub dry_run: bool,
    pub triggered_by: String,
    pub trigger: RunTrigger,
    #[serde(default)]
    pub schedule_id: Option<Uuid>,
}

impl BatchRunRequest {
    pub fn scheduled(
        organisation_id: impl Into<String>,
        target_date: NaiveDate,
        timezone: impl Into<String>,
        cutoff_time: impl Into<String>,
    ) -> Self {
        Self {
            organisation_id: organisation_id.into(),
            target_date,
            timezone: timezone.into(),
            cutoff_time: cutoff_time.into(),
            dry_run: false,
            triggered_by: "SCHEDULER".to_string(),
            trigger: RunTrigger::Scheduler,
            schedule_id: None,
        }
    }

    /// Rewrites the cutoff as `HH:MM:SS` so equal cutoffs share one job key.
    pub fn normalized(mut self) -> crate::error::Result<Self> {
        self.cutoff_time = parse_time_of_day(&self.cutoff_time)?
            .format("%H:%M:%S")
            .to_string();
        Ok(self)
    }

    pub fn idempotency_key(&self) -> String {
        let base = format!(
            "{}:{}:{}",
            self.organisation_id,
            self.target_date.format("%Y-%m-%d"),
            self.cutoff_time
        );
        match self.schedule_id {
            Some(id) => format!("{base}:{id}"),
            None => base,
        }
    }

    pub fn actor_type(&self) -> AuditActorType {
        match self.trigger {
            RunTrigger::Scheduler => AuditActorType::Scheduler,
            RunTrigger::Manual => AuditActorType::Manual,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryJob {
    pub id: Uuid,
    pub organisation_id: String,
    pub target_date: NaiveDate,
    pub timezone: String,
    pub cutoff_time: String,
    pub status: RetryJobStatus,
    pub idempotency_key: String,
    pub triggered_by: String,
    pub is_manual: bool,
    pub is_dry_run: bool,
    pub total_attempts: i32,
    pub successful_attempts: i32,
    pub failed_attempts: i32,
    pub skipped_attempts: i32,
    pub failed_schedule_ids: Vec<Uuid>,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RetryJob {
    pub fn start(req: &BatchRunRequest, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            organisation_id: req.organisation_id.clone(),
            target_date: req.target_date,
            timezone: req.timezone.clone(),
            cutoff_time: req.cutoff_time.clone(),
            status: RetryJobStatus::Running,
            idempotency_key: req.idempotency_key(),
            triggered_by: req.triggered_by.clone(),
            is_manual: req.trigger == RunTrigger::Manual,
            is_dry_run: req.dry_run,
            total_attempts: 0,
            successful_attempts: 0,
            failed_attempts: 0,
            skipped_attempts: 0,
            failed_schedule_ids: Vec::new(),
            error_message: None,
            started_at: Some(now),
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn finish(&mut self, tally: &BatchTally, total: i32, now: DateTime<Utc>) {
        self.status = RetryJobStatus::from_counts(tally.successful, tally.failed);
        self.total_attempts = total;
        self.successful_attempts = tally.successful;
        self.failed_attempts = tally.failed;
        self.skipped_attempts = tally.skipped;
        self.failed_schedule_ids = tally.failed_schedule_ids.clone();
        self.completed_at = Some(now);
        self.updated_at = now;
    }

    pub fn abort(&mut self, message: impl Into<String>, now: DateTime<Utc>) {
        self.status = RetryJobStatus::Failed;
        self.error_message = Some(message.into());
        self.completed_at = Some(now);
        self.updated_at = now;
    }
}

#[derive(Debug, Clone, Default)]
pub struct BatchTally {
    pub successful: i32,
    pub failed: i32,
    pub skipped: i32,
    pub failed_schedule_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchRunResult {
    pub job_id: Uuid,
    pub status: RetryJobStatus,
    pub total_processed: i32,
    pub successful: i32,
    pub failed: i32,
    pub skipped: i32,
    /// True when an already-active job with the same key was returned instead.
    pub deduplicated: bool,
    pub message: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobFilter {
    #[serde(default)]
    pub organisation_id: String,
    pub status: Option<RetryJobStatus>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_follows_counts() {
        assert_eq!(RetryJobStatus::from_counts(3, 0), RetryJobStatus::Completed);
        assert_eq!(RetryJobStatus::from_counts(0, 0), RetryJobStatus::Completed);
        assert_eq!(RetryJobStatus::from_counts(0, 2), RetryJobStatus::Failed);
        assert_eq!(RetryJobStatus::from_counts(1, 2), RetryJobStatus::Partial);
    }

    #[test]
    fn key_is_org_date_cutoff() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 12).unwrap();
        let mut req = BatchRunRequest::scheduled("org-1", date, "Europe/Paris", "10:00:00");
        assert_eq!(req.idempotency_key(), "org-1:2024-01-12:10:00:00");

        req.schedule_id = Some(Uuid::nil());
        assert_eq!(
            req.idempotency_key(),
            "org-1:2024-01-12:10:00:00:00000000-0000-0000-0000-000000000000"
        );
    }

    #[test]
    fn short_and_long_cutoffs_share_a_key() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 12).unwrap();
        let short = BatchRunRequest::scheduled("org-1", date, "Europe/Paris", "23:59")
            .normalized()
            .unwrap();
        let long = BatchRunRequest::scheduled("org-1", date, "Europe/Paris", " 23:59:00")
            .normalized()
            .unwrap();
        assert_eq!(short.cutoff_time, "23:59:00");
        assert_eq!(short.idempotency_key(), long.idempotency_key());

        let bad = BatchRunRequest::scheduled("org-1", date, "Europe/Paris", "25:00").normalized();
        assert!(matches!(bad, Err(RetryError::InvalidRequest(_))));
    }
}
