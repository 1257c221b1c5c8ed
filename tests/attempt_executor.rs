mod common;

use chrono::Utc;
use common::*;
use payments_retry::domain::attempt::{RetryAttempt, RetryAttemptStatus, EXECUTION_ERROR_CODE};
use payments_retry::domain::audit::AuditActor;
use payments_retry::domain::schedule::RESOLUTION_RETRY_SUCCEEDED;
use payments_retry::error::RetryError;
use payments_retry::gateways::mock::{MockBehavior, MockPaymentExecutor};
use payments_retry::service::attempt_executor::AttemptOutcome;
use std::time::Duration;

#[tokio::test]
async fn reserved_first_attempt_still_reaches_the_collaborator() {
    let h = Harness::with(MockBehavior::AlwaysSuccess);
    h.add_policy(policy(3, &[0, 5, 10], &[], false)).await;
    let id = h.intake(due_rejection("pay-1")).await;
    let placeholder = h.engine.schedule_manager.list_attempts(id).await.unwrap().remove(0);

    let schedule = h.engine.schedule_manager.get_schedule(id).await.unwrap();
    let execution = h
        .engine
        .executor
        .execute(&schedule, None, &AuditActor::scheduler())
        .await
        .unwrap();

    assert_eq!(execution.status, AttemptOutcome::Succeeded);
    assert_eq!(execution.attempt_id, Some(placeholder.id));
    assert_eq!(h.payments.calls(), 1);

    let attempt = h.engine.schedule_manager.get_attempt(placeholder.id).await.unwrap();
    assert_eq!(attempt.status, RetryAttemptStatus::Succeeded);
    assert!(attempt.psp_payment_id.is_some());

    let schedule = h.engine.schedule_manager.get_schedule(id).await.unwrap();
    assert!(schedule.is_resolved);
    assert_eq!(schedule.current_attempt, 1);
    assert_eq!(schedule.resolution_reason.as_deref(), Some(RESOLUTION_RETRY_SUCCEEDED));
    assert!(schedule.next_retry_date.is_none());
}

#[tokio::test]
async fn concurrent_execution_calls_the_collaborator_once() {
    let h = Harness::new(
        MockPaymentExecutor::new(MockBehavior::AlwaysSuccess).with_latency(Duration::from_millis(50)),
    );
    h.add_policy(policy(3, &[0, 5, 10], &[], false)).await;
    let id = h.intake(due_rejection("pay-1")).await;
    let schedule = h.engine.schedule_manager.get_schedule(id).await.unwrap();
    let actor = AuditActor::scheduler();

    let (a, b) = tokio::join!(
        h.engine.executor.execute(&schedule, None, &actor),
        h.engine.executor.execute(&schedule, None, &actor)
    );
    let mut outcomes = vec![a.unwrap().status, b.unwrap().status];
    outcomes.sort_by_key(|o| format!("{o:?}"));

    assert_eq!(outcomes, vec![AttemptOutcome::Skipped, AttemptOutcome::Succeeded]);
    assert_eq!(h.payments.calls(), 1);
}

#[tokio::test]
async fn attempt_already_in_progress_is_not_repeated() {
    let h = Harness::with(MockBehavior::AlwaysSuccess);
    h.add_policy(policy(3, &[0, 5, 10], &[], false)).await;
    let id = h.intake(due_rejection("pay-1")).await;
    let schedule = h.engine.schedule_manager.get_schedule(id).await.unwrap();

    // A previous run took attempt #1 and never finished.
    let planned = schedule.next_retry_date.unwrap();
    h.stores
        .attempts
        .begin(&RetryAttempt::in_progress(id, 1, planned, None, Utc::now()))
        .await
        .unwrap();

    let execution = h
        .engine
        .executor
        .execute(&schedule, None, &AuditActor::scheduler())
        .await
        .unwrap();

    assert_eq!(execution.status, AttemptOutcome::Skipped);
    assert!(execution.attempt_id.is_some());
    assert_eq!(h.payments.calls(), 0);
    assert!(!h.engine.schedule_manager.get_schedule(id).await.unwrap().is_resolved);
}

#[tokio::test]
async fn stale_snapshot_is_skipped() {
    let h = Harness::with(MockBehavior::AlwaysFailure);
    h.add_policy(policy(3, &[0, 5, 10], &[], false)).await;
    let id = h.intake(due_rejection("pay-1")).await;
    let snapshot = h.engine.schedule_manager.get_schedule(id).await.unwrap();
    let actor = AuditActor::scheduler();

    h.engine.executor.execute(&snapshot, None, &actor).await.unwrap();
    let again = h.engine.executor.execute(&snapshot, None, &actor).await.unwrap();

    assert_eq!(again.status, AttemptOutcome::Skipped);
    assert_eq!(h.payments.calls(), 1);
}

#[tokio::test]
async fn collaborator_error_is_recorded_as_failed_attempt() {
    let h = Harness::with(MockBehavior::AlwaysError);
    h.add_policy(policy(3, &[0, 5, 10], &[], false)).await;
    let id = h.intake(due_rejection("pay-1")).await;
    let schedule = h.engine.schedule_manager.get_schedule(id).await.unwrap();

    let err = h
        .engine
        .executor
        .execute(&schedule, None, &AuditActor::scheduler())
        .await
        .unwrap_err();
    assert!(matches!(err, RetryError::Execution(_)));

    let attempts = h.engine.schedule_manager.list_attempts(id).await.unwrap();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].status, RetryAttemptStatus::Failed);
    assert_eq!(attempts[0].error_code.as_deref(), Some(EXECUTION_ERROR_CODE));

    let after = h.engine.schedule_manager.get_schedule(id).await.unwrap();
    assert_eq!(after.current_attempt, schedule.current_attempt);
    assert_eq!(after.next_retry_date, schedule.next_retry_date);
    assert!(!after.is_resolved);
}

#[tokio::test]
async fn unknown_outcome_is_never_charged_again() {
    let h = Harness::new(
        MockPaymentExecutor::new(MockBehavior::AlwaysSuccess)
            .script("pay-1", vec![MockBehavior::AlwaysError, MockBehavior::AlwaysSuccess]),
    );
    h.add_policy(policy(3, &[0, 5, 10], &[], false)).await;
    let id = h.intake(due_rejection("pay-1")).await;

    let first = h.engine.orchestrator.run(run_request(false)).await.unwrap();
    assert_eq!(first.failed, 1);
    assert_eq!(h.payments.calls(), 1);

    let mut second = run_request(false);
    second.cutoff_time = "23:59:58".to_string();
    let second = h.engine.orchestrator.run(second).await.unwrap();
    assert_eq!(second.skipped, 1);
    assert_eq!(h.payments.calls(), 1);
    assert_eq!(h.payments.seen().len(), 1);

    let schedule = h.engine.schedule_manager.get_schedule(id).await.unwrap();
    assert_eq!(schedule.current_attempt, 0);
    assert!(!schedule.is_resolved);
    assert!(schedule.next_retry_date.is_some());
}

#[tokio::test]
async fn decline_keeps_collaborator_details() {
    let h = Harness::with(MockBehavior::AlwaysFailure);
    h.add_policy(policy(3, &[0, 5, 10], &[], false)).await;
    let id = h.intake(due_rejection("pay-1")).await;
    let schedule = h.engine.schedule_manager.get_schedule(id).await.unwrap();

    let execution = h
        .engine
        .executor
        .execute(&schedule, None, &AuditActor::scheduler())
        .await
        .unwrap();
    assert_eq!(execution.status, AttemptOutcome::Failed);

    let seen = h.payments.seen();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].idempotency_key, format!("{id}:1"));
    assert_eq!(seen[0].amount_cents, 4_990);

    let attempt = h
        .engine
        .schedule_manager
        .get_attempt(execution.attempt_id.unwrap())
        .await
        .unwrap();
    assert_eq!(attempt.error_code.as_deref(), Some("MOCK_DECLINED"));
    assert_eq!(attempt.new_rejection_code.as_deref(), Some("AM04"));
}
