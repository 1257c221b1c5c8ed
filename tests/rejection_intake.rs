mod common;

use chrono::{Duration, TimeZone, Utc};
use common::*;
use payments_retry::domain::attempt::RetryAttemptStatus;
use payments_retry::domain::audit::{AuditFilter, ACTION_CREATED};
use payments_retry::domain::event::EligibilityCheckRequest;
use payments_retry::domain::schedule::{RetryEligibility, ScheduleFilter};
use payments_retry::error::RetryError;
use payments_retry::gateways::mock::MockBehavior;

fn org_filter() -> ScheduleFilter {
    ScheduleFilter {
        organisation_id: ORG.to_string(),
        ..ScheduleFilter::default()
    }
}

#[tokio::test]
async fn replayed_event_creates_one_schedule() {
    let h = Harness::with(MockBehavior::AlwaysSuccess);
    h.add_policy(policy(3, &[2, 5, 10], &[], false)).await;
    let event = rejection("pay-1", "MS02_NOT_SPECIFIED_REASON", Utc::now());

    let first = h.engine.schedule_manager.handle_rejection(event.clone()).await.unwrap();
    assert!(first.processed);

    for _ in 0..3 {
        let replay = h.engine.schedule_manager.handle_rejection(event.clone()).await.unwrap();
        assert!(!replay.processed);
        assert_eq!(replay.schedule_id, first.schedule_id);
    }

    let page = h.engine.schedule_manager.list_schedules(&org_filter()).await.unwrap();
    assert_eq!(page.total, 1);
}

#[tokio::test]
async fn concurrent_deliveries_create_one_schedule() {
    let h = Harness::with(MockBehavior::AlwaysSuccess);
    h.add_policy(policy(3, &[2, 5, 10], &[], false)).await;
    let event = rejection("pay-1", "MS02_NOT_SPECIFIED_REASON", Utc::now());

    let manager = &h.engine.schedule_manager;
    let (a, b) = tokio::join!(
        manager.handle_rejection(event.clone()),
        manager.handle_rejection(event.clone())
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert!(a.processed ^ b.processed);
    assert_eq!(a.schedule_id, b.schedule_id);
    assert_eq!(manager.list_schedules(&org_filter()).await.unwrap().total, 1);
}

#[tokio::test]
async fn missing_policy_is_a_terminal_outcome() {
    let h = Harness::with(MockBehavior::AlwaysSuccess);

    let outcome = h
        .engine
        .schedule_manager
        .handle_rejection(rejection("pay-1", "MS02_NOT_SPECIFIED_REASON", Utc::now()))
        .await
        .unwrap();

    assert!(!outcome.processed);
    assert!(outcome.schedule_id.is_none());
    assert_eq!(outcome.eligibility, RetryEligibility::NotEligibleReasonCode);
    assert_eq!(h.engine.schedule_manager.list_schedules(&org_filter()).await.unwrap().total, 0);
}

#[tokio::test]
async fn eligible_schedule_reserves_first_attempt() {
    let h = Harness::with(MockBehavior::AlwaysSuccess);
    h.add_policy(policy(3, &[2, 5, 10], &[], false)).await;
    let rejected_at = Utc.with_ymd_and_hms(2024, 1, 10, 15, 0, 0).unwrap();

    let id = h.intake(rejection("pay-1", "ms02_not_specified_reason", rejected_at)).await;
    let schedule = h.engine.schedule_manager.get_schedule(id).await.unwrap();

    assert_eq!(schedule.eligibility, RetryEligibility::Eligible);
    assert_eq!(schedule.rejection_code, "MS02_NOT_SPECIFIED_REASON");
    assert_eq!(schedule.currency, "EUR");
    assert_eq!(schedule.current_attempt, 0);
    assert_eq!(
        schedule.next_retry_date,
        Some(Utc.with_ymd_and_hms(2024, 1, 12, 9, 0, 0).unwrap())
    );

    let attempts = h.engine.schedule_manager.list_attempts(id).await.unwrap();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].attempt_number, 1);
    assert_eq!(attempts[0].status, RetryAttemptStatus::Scheduled);
    assert_eq!(Some(attempts[0].planned_date), schedule.next_retry_date);

    let audit = h
        .engine
        .schedule_manager
        .audit
        .list(&AuditFilter {
            organisation_id: ORG.to_string(),
            entity_id: Some(id),
            ..AuditFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].action, ACTION_CREATED);
}

#[tokio::test]
async fn non_retryable_code_is_resolved_at_intake() {
    let h = Harness::with(MockBehavior::AlwaysSuccess);
    h.add_policy(policy(3, &[2, 5, 10], &["AC01_IBAN_INVALID"], false)).await;

    let id = h.intake(rejection("pay-1", "INCORRECT_IBAN", Utc::now())).await;
    let schedule = h.engine.schedule_manager.get_schedule(id).await.unwrap();

    // The built-in non-retryable list beats the policy's retryable list.
    assert_eq!(schedule.eligibility, RetryEligibility::NotEligibleReasonCode);
    assert!(schedule.is_resolved);
    assert!(schedule.next_retry_date.is_none());
    assert!(h.engine.schedule_manager.list_attempts(id).await.unwrap().is_empty());
}

#[tokio::test]
async fn unknown_code_is_denied_by_default() {
    let h = Harness::with(MockBehavior::AlwaysSuccess);
    h.add_policy(policy(3, &[2, 5, 10], &[], false)).await;

    let id = h.intake(rejection("pay-1", "ZZ42_SOMETHING_NEW", Utc::now())).await;
    let schedule = h.engine.schedule_manager.get_schedule(id).await.unwrap();

    assert_eq!(schedule.eligibility, RetryEligibility::NotEligibleReasonCode);
    assert!(schedule.is_resolved);
}

#[tokio::test]
async fn policy_without_attempts_never_plans_a_retry() {
    let h = Harness::with(MockBehavior::AlwaysSuccess);
    h.add_policy(policy(0, &[2], &[], false)).await;

    let id = h.intake(rejection("pay-1", "MS02_NOT_SPECIFIED_REASON", Utc::now())).await;
    let schedule = h.engine.schedule_manager.get_schedule(id).await.unwrap();

    assert_eq!(schedule.eligibility, RetryEligibility::NotEligibleMaxAttempts);
    assert!(schedule.is_resolved);
    assert!(schedule.next_retry_date.is_none());
}

#[tokio::test]
async fn invalid_event_is_rejected() {
    let h = Harness::with(MockBehavior::AlwaysSuccess);
    h.add_policy(policy(3, &[2, 5, 10], &[], false)).await;
    let mut event = rejection("pay-1", "MS02_NOT_SPECIFIED_REASON", Utc::now());
    event.amount_cents = 0;

    let err = h.engine.schedule_manager.handle_rejection(event).await.unwrap_err();
    assert!(matches!(err, RetryError::InvalidRequest(_)));
}

#[tokio::test]
async fn eligibility_check_writes_nothing() {
    let h = Harness::with(MockBehavior::AlwaysSuccess);
    let p = h.add_policy(policy(3, &[2, 5, 10], &[], true)).await;

    let result = h
        .engine
        .schedule_manager
        .check_eligibility(EligibilityCheckRequest {
            payment_id: "pay-1".to_string(),
            reason_code: "AM04".to_string(),
            organisation_id: ORG.to_string(),
            scope_id: None,
        })
        .await
        .unwrap();

    assert_eq!(result.eligibility, RetryEligibility::Eligible);
    assert_eq!(result.applicable_policy_id, Some(p.id));
    assert_eq!(result.canonical_code.as_deref(), Some("AM04_ACCOUNT_CLOSED"));
    let first = result.first_retry_date.unwrap();
    assert!(first > Utc::now() + Duration::days(1));
    assert_eq!(h.engine.schedule_manager.list_schedules(&org_filter()).await.unwrap().total, 0);
}
