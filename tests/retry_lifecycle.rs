mod common;

use chrono::{TimeZone, Utc};
use common::*;
use payments_retry::domain::attempt::RetryAttemptStatus;
use payments_retry::domain::audit::AuditActor;
use payments_retry::domain::schedule::{
    RetryEligibility, RESOLUTION_MAX_ATTEMPTS, RESOLUTION_RETRY_SUCCEEDED,
};
use payments_retry::gateways::mock::{MockBehavior, MockPaymentExecutor};
use uuid::Uuid;

async fn run_attempt(h: &Harness, id: Uuid) {
    let schedule = h.engine.schedule_manager.get_schedule(id).await.unwrap();
    h.engine
        .executor
        .execute(&schedule, None, &AuditActor::scheduler())
        .await
        .unwrap();
}

fn paris_ten(y: i32, m: u32, d: u32) -> chrono::DateTime<Utc> {
    // 10:00 in Paris during winter.
    Utc.with_ymd_and_hms(y, m, d, 9, 0, 0).unwrap()
}

#[tokio::test]
async fn closed_account_walks_the_delay_table_until_max_attempts() {
    let h = Harness::with(MockBehavior::AlwaysFailure);
    h.add_policy(policy(3, &[2, 5, 10], &["AM04_ACCOUNT_CLOSED"], true)).await;
    let rejected_at = Utc.with_ymd_and_hms(2024, 1, 10, 8, 0, 0).unwrap();

    let id = h.intake(rejection("pay-1", "ACCOUNT_CLOSED", rejected_at)).await;
    let schedule = h.engine.schedule_manager.get_schedule(id).await.unwrap();
    assert_eq!(schedule.eligibility, RetryEligibility::Eligible);
    assert_eq!(schedule.next_retry_date, Some(paris_ten(2024, 1, 12)));

    run_attempt(&h, id).await;
    let schedule = h.engine.schedule_manager.get_schedule(id).await.unwrap();
    assert_eq!(schedule.current_attempt, 1);
    assert_eq!(schedule.next_retry_date, Some(paris_ten(2024, 1, 15)));

    run_attempt(&h, id).await;
    let schedule = h.engine.schedule_manager.get_schedule(id).await.unwrap();
    assert_eq!(schedule.current_attempt, 2);
    assert_eq!(schedule.next_retry_date, Some(paris_ten(2024, 1, 20)));

    run_attempt(&h, id).await;
    let schedule = h.engine.schedule_manager.get_schedule(id).await.unwrap();
    assert_eq!(schedule.current_attempt, 3);
    assert!(schedule.is_resolved);
    assert_eq!(schedule.eligibility, RetryEligibility::NotEligibleMaxAttempts);
    assert_eq!(schedule.resolution_reason.as_deref(), Some(RESOLUTION_MAX_ATTEMPTS));
    assert!(schedule.next_retry_date.is_none());

    let attempts = h.engine.schedule_manager.list_attempts(id).await.unwrap();
    let numbers: Vec<i32> = attempts.iter().map(|a| a.attempt_number).collect();
    assert_eq!(numbers, vec![1, 2, 3]);
    assert!(attempts.iter().all(|a| a.status == RetryAttemptStatus::Failed));
    assert_eq!(h.payments.calls(), 3);

    // Resolved schedules are never executed again.
    run_attempt(&h, id).await;
    assert_eq!(h.payments.calls(), 3);
}

#[tokio::test]
async fn short_delay_table_leaves_schedule_open_without_a_date() {
    let h = Harness::with(MockBehavior::AlwaysFailure);
    h.add_policy(policy(5, &[1, 2], &[], false)).await;
    let id = h
        .intake(rejection(
            "pay-1",
            "MS03_AGENT_REASON",
            Utc.with_ymd_and_hms(2024, 1, 10, 8, 0, 0).unwrap(),
        ))
        .await;

    run_attempt(&h, id).await;
    assert_eq!(
        h.engine.schedule_manager.get_schedule(id).await.unwrap().next_retry_date,
        Some(paris_ten(2024, 1, 12))
    );

    run_attempt(&h, id).await;
    let schedule = h.engine.schedule_manager.get_schedule(id).await.unwrap();
    assert_eq!(schedule.current_attempt, 2);
    assert!(!schedule.is_resolved);
    assert_eq!(schedule.eligibility, RetryEligibility::Eligible);
    assert!(schedule.resolution_reason.is_none());
    assert!(schedule.next_retry_date.is_none());

    // Without a planned date no batch ever picks it up again.
    let result = h.engine.orchestrator.run(run_request(false)).await.unwrap();
    assert_eq!(result.total_processed, 0);
    assert_eq!(h.payments.calls(), 2);
    assert!(!h.engine.schedule_manager.get_schedule(id).await.unwrap().is_resolved);
}

#[tokio::test]
async fn success_on_second_attempt_feeds_statistics() {
    let h = Harness::new(
        MockPaymentExecutor::new(MockBehavior::AlwaysFailure)
            .script("pay-1", vec![MockBehavior::AlwaysFailure, MockBehavior::AlwaysSuccess]),
    );
    h.add_policy(policy(3, &[0, 1, 2], &[], false)).await;
    let id = h.intake(due_rejection("pay-1")).await;
    h.intake(due_rejection("pay-2")).await;

    run_attempt(&h, id).await;
    run_attempt(&h, id).await;

    let schedule = h.engine.schedule_manager.get_schedule(id).await.unwrap();
    assert!(schedule.is_resolved);
    assert_eq!(schedule.current_attempt, 2);
    assert_eq!(schedule.eligibility, RetryEligibility::Eligible);
    assert_eq!(schedule.resolution_reason.as_deref(), Some(RESOLUTION_RETRY_SUCCEEDED));

    let stats = h.engine.schedule_manager.statistics(ORG).await.unwrap();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.resolved, 1);
    assert_eq!(stats.pending, 1);
    assert_eq!(stats.eligible_open, 1);
    assert_eq!(stats.avg_attempts_before_success, 2.0);
}
