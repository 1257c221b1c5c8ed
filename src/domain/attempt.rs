use crate::error::RetryError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RetryAttemptStatus {
    Scheduled,
    InProgress,
    Succeeded,
    Failed,
}

impl RetryAttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetryAttemptStatus::Scheduled => "SCHEDULED",
            RetryAttemptStatus::InProgress => "IN_PROGRESS",
            RetryAttemptStatus::Succeeded => "SUCCEEDED",
            RetryAttemptStatus::Failed => "FAILED",
        }
    }

    /// A SCHEDULED placeholder is a reservation, not an execution.
    pub fn is_executed(&self) -> bool {
        !matches!(self, RetryAttemptStatus::Scheduled)
    }
}

impl FromStr for RetryAttemptStatus {
    type Err = RetryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SCHEDULED" => Ok(RetryAttemptStatus::Scheduled),
            "IN_PROGRESS" => Ok(RetryAttemptStatus::InProgress),
            "SUCCEEDED" => Ok(RetryAttemptStatus::Succeeded),
            "FAILED" => Ok(RetryAttemptStatus::Failed),
            other => Err(RetryError::InvalidValue {
                kind: "attempt status",
                value: other.to_string(),
            }),
        }
    }
}

pub const EXECUTION_ERROR_CODE: &str = "EXECUTION_ERROR";

pub fn attempt_idempotency_key(schedule_id: Uuid, attempt_number: i32) -> String {
    format!("{schedule_id}:{attempt_number}")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryAttempt {
    pub id: Uuid,
    pub retry_schedule_id: Uuid,
    pub attempt_number: i32,
    pub planned_date: DateTime<Utc>,
    pub status: RetryAttemptStatus,
    pub retry_job_id: Option<Uuid>,
    pub idempotency_key: String,
    pub executed_at: Option<DateTime<Utc>>,
    pub psp_payment_id: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub new_rejection_code: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RetryAttempt {
    fn new(
        schedule_id: Uuid,
        attempt_number: i32,
        planned_date: DateTime<Utc>,
        status: RetryAttemptStatus,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            retry_schedule_id: schedule_id,
            attempt_number,
            planned_date,
            status,
            retry_job_id: None,
            idempotency_key: attempt_idempotency_key(schedule_id, attempt_number),
            executed_at: None,
            psp_payment_id: None,
            error_code: None,
            error_message: None,
            new_rejection_code: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn placeholder(schedule_id: Uuid, attempt_number: i32, planned_date: DateTime<Utc>) -> Self {
        Self::new(
            schedule_id,
            attempt_number,
            planned_date,
            RetryAttemptStatus::Scheduled,
            Utc::now(),
        )
    }

    pub fn in_progress(
        schedule_id: Uuid,
        attempt_number: i32,
        planned_date: DateTime<Utc>,
        retry_job_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut attempt = Self::new(
            schedule_id,
            attempt_number,
            planned_date,
            RetryAttemptStatus::InProgress,
            now,
        );
        attempt.retry_job_id = retry_job_id;
        attempt.executed_at = Some(now);
        attempt
    }

    pub fn succeed(&mut self, psp_payment_id: Option<String>, now: DateTime<Utc>) {
        self.status = RetryAttemptStatus::Succeeded;
        self.psp_payment_id = psp_payment_id;
        self.updated_at = now;
    }

    pub fn fail(
        &mut self,
        error_code: Option<String>,
        error_message: Option<String>,
        new_rejection_code: Option<String>,
        now: DateTime<Utc>,
    ) {
        self.status = RetryAttemptStatus::Failed;
        self.error_code = error_code;
        self.error_message = error_message;
        self.new_rejection_code = new_rejection_code;
        self.updated_at = now;
    }
}

/// Result of trying to take ownership of an attempt number.
#[derive(Debug, Clone)]
pub enum BeginAttempt {
    Started(RetryAttempt),
    AlreadyExecuted(RetryAttempt),
}
