#![allow(dead_code)]

use chrono::{DateTime, Duration, NaiveDate, Utc};
use payments_retry::domain::dates::RetryCalendar;
use payments_retry::domain::event::PaymentRejectedEvent;
use payments_retry::domain::job::{BatchRunRequest, RunTrigger};
use payments_retry::domain::policy::RetryPolicy;
use payments_retry::eligibility::taxonomy::ReasonCodeTaxonomy;
use payments_retry::gateways::mock::{MockBehavior, MockPaymentExecutor};
use payments_retry::repo::memory::InMemoryRetryStore;
use payments_retry::repo::ports::RetryStores;
use payments_retry::service::engine::RetryEngine;
use std::sync::Arc;
use uuid::Uuid;

pub const ORG: &str = "org-1";
pub const TZ: &str = "Europe/Paris";

pub struct Harness {
    pub engine: RetryEngine,
    pub stores: RetryStores,
    pub payments: Arc<MockPaymentExecutor>,
}

impl Harness {
    pub fn new(mock: MockPaymentExecutor) -> Self {
        Self::over(RetryStores::in_memory(InMemoryRetryStore::new()), mock)
    }

    pub fn over(stores: RetryStores, mock: MockPaymentExecutor) -> Self {
        let payments = Arc::new(mock);
        let calendar = RetryCalendar::from_names(TZ, "10:00:00").unwrap();
        let engine = RetryEngine::new(
            stores.clone(),
            ReasonCodeTaxonomy::default(),
            calendar,
            payments.clone(),
            std::time::Duration::from_secs(900),
            TZ,
        );
        Self {
            engine,
            stores,
            payments,
        }
    }

    pub fn with(behavior: MockBehavior) -> Self {
        Self::new(MockPaymentExecutor::new(behavior))
    }

    pub async fn add_policy(&self, policy: RetryPolicy) -> RetryPolicy {
        self.stores.policies.upsert(&policy).await.unwrap();
        policy
    }

    /// Intake of a rejection that must produce a new schedule.
    pub async fn intake(&self, event: PaymentRejectedEvent) -> Uuid {
        let outcome = self.engine.schedule_manager.handle_rejection(event).await.unwrap();
        assert!(outcome.processed, "{}", outcome.message);
        outcome.schedule_id.unwrap()
    }
}

pub fn policy(max_attempts: i32, delays: &[i32], retryable: &[&str], retry_on_am04: bool) -> RetryPolicy {
    let now = Utc::now();
    RetryPolicy {
        id: Uuid::new_v4(),
        organisation_id: ORG.to_string(),
        scope_id: None,
        name: "standard".to_string(),
        max_attempts,
        retry_delays_days: delays.to_vec(),
        retryable_codes: retryable.iter().map(|c| c.to_string()).collect(),
        non_retryable_codes: Vec::new(),
        retry_on_am04,
        is_active: true,
        is_default: true,
        priority: 0,
        created_at: now,
        updated_at: now,
    }
}

pub fn rejection(payment_id: &str, reason_code: &str, rejected_at: DateTime<Utc>) -> PaymentRejectedEvent {
    PaymentRejectedEvent {
        payment_id: payment_id.to_string(),
        organisation_id: ORG.to_string(),
        scope_id: None,
        schedule_id: format!("sched-{payment_id}"),
        invoice_id: Some(format!("inv-{payment_id}")),
        contract_id: None,
        client_id: "client-1".to_string(),
        reason_code: reason_code.to_string(),
        reason_message: Some("rejected by bank".to_string()),
        amount_cents: 4_990,
        currency: "eur".to_string(),
        idempotency_key: format!("rejected:{payment_id}"),
        rejected_at,
    }
}

/// A rejection whose first retry is already due.
pub fn due_rejection(payment_id: &str) -> PaymentRejectedEvent {
    rejection(payment_id, "MS02_NOT_SPECIFIED_REASON", Utc::now() - Duration::days(30))
}

pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

/// Manual run whose cutoff covers everything already due.
pub fn run_request(dry_run: bool) -> BatchRunRequest {
    BatchRunRequest {
        organisation_id: ORG.to_string(),
        target_date: today() + Duration::days(1),
        timezone: TZ.to_string(),
        cutoff_time: "23:59:59".to_string(),
        dry_run,
        triggered_by: "ops@example.com".to_string(),
        trigger: RunTrigger::Manual,
        schedule_id: None,
    }
}
