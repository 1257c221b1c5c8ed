use crate::error::RetryError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RetryEligibility {
    Eligible,
    NotEligibleReasonCode,
    NotEligibleMaxAttempts,
    NotEligibleManualCancel,
}

impl RetryEligibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetryEligibility::Eligible => "ELIGIBLE",
            RetryEligibility::NotEligibleReasonCode => "NOT_ELIGIBLE_REASON_CODE",
            RetryEligibility::NotEligibleMaxAttempts => "NOT_ELIGIBLE_MAX_ATTEMPTS",
            RetryEligibility::NotEligibleManualCancel => "NOT_ELIGIBLE_MANUAL_CANCEL",
        }
    }

    pub fn is_eligible(&self) -> bool {
        matches!(self, RetryEligibility::Eligible)
    }
}

impl FromStr for RetryEligibility {
    type Err = RetryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ELIGIBLE" => Ok(RetryEligibility::Eligible),
            "NOT_ELIGIBLE_REASON_CODE" => Ok(RetryEligibility::NotEligibleReasonCode),
            "NOT_ELIGIBLE_MAX_ATTEMPTS" => Ok(RetryEligibility::NotEligibleMaxAttempts),
            "NOT_ELIGIBLE_MANUAL_CANCEL" => Ok(RetryEligibility::NotEligibleManualCancel),
            other => Err(RetryError::InvalidValue {
                kind: "eligibility",
                value: other.to_string(),
            }),
        }
    }
}

pub const RESOLUTION_RETRY_SUCCEEDED: &str = "RETRY_SUCCEEDED";
pub const RESOLUTION_MAX_ATTEMPTS: &str = "MAX_ATTEMPTS_REACHED";
pub const RESOLUTION_NOT_ELIGIBLE: &str = "NOT_ELIGIBLE_AT_INTAKE";

/// Aggregate root of one rejected debit and its retry lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySchedule {
    pub id: Uuid,
    pub organisation_id: String,
    pub scope_id: Option<String>,
    pub client_id: String,
    pub contract_id: Option<String>,
    pub invoice_id: Option<String>,
    pub payment_schedule_id: String,
    pub original_payment_id: String,
    pub rejection_code: String,
    pub rejection_raw_code: String,
    pub rejection_message: Option<String>,
    pub rejection_date: DateTime<Utc>,
    pub retry_policy_id: Uuid,
    pub amount_cents: i64,
    pub currency: String,
    pub eligibility: RetryEligibility,
    pub eligibility_reason: String,
    pub current_attempt: i32,
    pub max_attempts: i32,
    pub next_retry_date: Option<DateTime<Utc>>,
    pub is_resolved: bool,
    pub resolution_reason: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub idempotency_key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RetrySchedule {
    pub fn is_open(&self) -> bool {
        !self.is_resolved && self.eligibility.is_eligible()
    }

    pub fn next_attempt_number(&self) -> i32 {
        self.current_attempt + 1
    }

    /// Terminal transition; clears the planned date so the row is never due again.
    pub fn resolve(
        &mut self,
        eligibility: Option<RetryEligibility>,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) {
        if let Some(eligibility) = eligibility {
            self.eligibility = eligibility;
        }
        self.is_resolved = true;
        self.resolution_reason = Some(reason.into());
        self.resolved_at = Some(now);
        self.next_retry_date = None;
        self.updated_at = now;
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScheduleFilter {
    #[serde(default)]
    pub organisation_id: String,
    pub scope_id: Option<String>,
    pub client_id: Option<String>,
    pub contract_id: Option<String>,
    pub eligibility: Option<RetryEligibility>,
    pub is_resolved: Option<bool>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl ScheduleFilter {
    pub fn matches(&self, s: &RetrySchedule) -> bool {
        s.organisation_id == self.organisation_id
            && self.scope_id.as_ref().map_or(true, |v| s.scope_id.as_ref() == Some(v))
            && self.client_id.as_ref().map_or(true, |v| &s.client_id == v)
            && self.contract_id.as_ref().map_or(true, |v| s.contract_id.as_ref() == Some(v))
            && self.eligibility.map_or(true, |v| s.eligibility == v)
            && self.is_resolved.map_or(true, |v| s.is_resolved == v)
    }
}

pub const DEFAULT_PAGE_LIMIT: u32 = 20;
pub const MAX_PAGE_LIMIT: u32 = 200;

/// Normalizes optional paging input into `(page, limit, offset)`.
pub fn paging(page: Option<u32>, limit: Option<u32>) -> (u32, u32, u32) {
    let page = page.unwrap_or(1).max(1);
    let limit = limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT);
    (page, limit, (page - 1).saturating_mul(limit))
}

#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: u32,
    pub limit: u32,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EligibilityCount {
    pub eligibility: RetryEligibility,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScheduleStatistics {
    pub total: i64,
    pub eligible_open: i64,
    pub resolved: i64,
    pub pending: i64,
    pub by_eligibility: Vec<EligibilityCount>,
    pub avg_attempts_before_success: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paging_clamps_limits() {
        assert_eq!(paging(None, None), (1, 20, 0));
        assert_eq!(paging(Some(0), Some(1000)), (1, 200, 0));
        assert_eq!(paging(Some(3), Some(10)), (3, 10, 20));
        assert_eq!(paging(Some(u32::MAX), Some(200)), (u32::MAX, 200, u32::MAX));
    }

    #[test]
    fn eligibility_round_trips_through_text() {
        for e in [
            RetryEligibility::Eligible,
            RetryEligibility::NotEligibleReasonCode,
            RetryEligibility::NotEligibleMaxAttempts,
            RetryEligibility::NotEligibleManualCancel,
        ] {
            assert_eq!(e.as_str().parse::<RetryEligibility>().unwrap(), e);
        }
        assert!("MAYBE".parse::<RetryEligibility>().is_err());
    }
}
