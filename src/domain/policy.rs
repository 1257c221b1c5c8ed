use crate::error::{Result, RetryError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub id: Uuid,
    pub organisation_id: String,
    pub scope_id: Option<String>,
    pub name: String,
    pub max_attempts: i32,
    /// Index = attempts already made, value = days after the original rejection.
    pub retry_delays_days: Vec<i32>,
    pub retryable_codes: Vec<String>,
    pub non_retryable_codes: Vec<String>,
    pub retry_on_am04: bool,
    pub is_active: bool,
    pub is_default: bool,
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpsertRetryPolicy {
    pub id: Option<Uuid>,
    pub organisation_id: String,
    pub scope_id: Option<String>,
    pub name: String,
    pub max_attempts: i32,
    pub retry_delays_days: Vec<i32>,
    #[serde(default)]
    pub retryable_codes: Vec<String>,
    #[serde(default)]
    pub non_retryable_codes: Vec<String>,
    #[serde(default)]
    pub retry_on_am04: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub priority: i32,
}

fn default_true() -> bool {
    true
}

impl UpsertRetryPolicy {
    pub fn validate(&self) -> Result<()> {
        if self.organisation_id.trim().is_empty() {
            return Err(RetryError::InvalidRequest("organisation_id is required".to_string()));
        }
        if self.max_attempts < 0 {
            return Err(RetryError::InvalidRequest("max_attempts must be >= 0".to_string()));
        }
        if self.retry_delays_days.iter().any(|d| *d < 0) {
            return Err(RetryError::InvalidRequest(
                "retry_delays_days must not contain negative delays".to_string(),
            ));
        }
        if self.retry_delays_days.windows(2).any(|w| w[1] < w[0]) {
            return Err(RetryError::InvalidRequest(
                "retry_delays_days must be non-decreasing".to_string(),
            ));
        }
        Ok(())
    }

    pub fn into_policy(self, now: DateTime<Utc>, created_at: Option<DateTime<Utc>>) -> RetryPolicy {
        RetryPolicy {
            id: self.id.unwrap_or_else(Uuid::new_v4),
            organisation_id: self.organisation_id,
            scope_id: self.scope_id.filter(|s| !s.trim().is_empty()),
            name: self.name,
            max_attempts: self.max_attempts,
            retry_delays_days: self.retry_delays_days,
            retryable_codes: normalize_codes(self.retryable_codes),
            non_retryable_codes: normalize_codes(self.non_retryable_codes),
            retry_on_am04: self.retry_on_am04,
            is_active: self.is_active,
            is_default: self.is_default,
            priority: self.priority,
            created_at: created_at.unwrap_or(now),
            updated_at: now,
        }
    }
}

fn normalize_codes(codes: Vec<String>) -> Vec<String> {
    codes
        .into_iter()
        .map(|c| c.trim().to_uppercase())
        .filter(|c| !c.is_empty())
        .collect()
}
