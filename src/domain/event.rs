use crate::domain::schedule::RetryEligibility;
use crate::error::{Result, RetryError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Inbound rejection of a recurring debit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRejectedEvent {
    pub payment_id: String,
    pub organisation_id: String,
    #[serde(default)]
    pub scope_id: Option<String>,
    /// The debit schedule the rejected payment belongs to.
    pub schedule_id: String,
    #[serde(default)]
    pub invoice_id: Option<String>,
    #[serde(default)]
    pub contract_id: Option<String>,
    pub client_id: String,
    pub reason_code: String,
    #[serde(default)]
    pub reason_message: Option<String>,
    pub amount_cents: i64,
    pub currency: String,
    pub idempotency_key: String,
    pub rejected_at: DateTime<Utc>,
}

impl PaymentRejectedEvent {
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("payment_id", &self.payment_id),
            ("organisation_id", &self.organisation_id),
            ("schedule_id", &self.schedule_id),
            ("client_id", &self.client_id),
            ("reason_code", &self.reason_code),
            ("idempotency_key", &self.idempotency_key),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(RetryError::InvalidRequest(format!("{name} is required")));
            }
        }
        if self.amount_cents <= 0 {
            return Err(RetryError::InvalidRequest("amount_cents must be > 0".to_string()));
        }
        if self.currency.trim().len() != 3 {
            return Err(RetryError::InvalidRequest(
                "currency must be an ISO 4217 code".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HandleRejectionOutcome {
    pub processed: bool,
    pub schedule_id: Option<Uuid>,
    pub eligibility: RetryEligibility,
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EligibilityCheckRequest {
    pub payment_id: String,
    pub reason_code: String,
    pub organisation_id: String,
    #[serde(default)]
    pub scope_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EligibilityCheckResult {
    pub eligibility: RetryEligibility,
    pub reason: String,
    pub canonical_code: Option<String>,
    pub applicable_policy_id: Option<Uuid>,
    pub first_retry_date: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event() -> PaymentRejectedEvent {
        PaymentRejectedEvent {
            payment_id: "pay-1".to_string(),
            organisation_id: "org-1".to_string(),
            scope_id: None,
            schedule_id: "sched-1".to_string(),
            invoice_id: None,
            contract_id: None,
            client_id: "client-1".to_string(),
            reason_code: "AM04".to_string(),
            reason_message: None,
            amount_cents: 1999,
            currency: "EUR".to_string(),
            idempotency_key: "evt-1".to_string(),
            rejected_at: Utc::now(),
        }
    }

    #[test]
    fn accepts_well_formed_event() {
        assert!(event().validate().is_ok());
    }

    #[test]
    fn rejects_missing_idempotency_key_and_bad_amount() {
        let mut e = event();
        e.idempotency_key = " ".to_string();
        assert!(e.validate().is_err());

        let mut e = event();
        e.amount_cents = 0;
        assert!(e.validate().is_err());
    }
}
