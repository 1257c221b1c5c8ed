use crate::domain::attempt::{BeginAttempt, RetryAttempt, EXECUTION_ERROR_CODE};
use crate::domain::audit::{
    AuditActor, AuditLogEntry, ACTION_FAILED, ACTION_RESCHEDULED, ACTION_RESOLVED, ACTION_STARTED,
    ACTION_SUCCEEDED, ENTITY_ATTEMPT, ENTITY_SCHEDULE,
};
use crate::domain::dates::RetryCalendar;
use crate::domain::policy::RetryPolicy;
use crate::domain::schedule::{
    RetryEligibility, RetrySchedule, RESOLUTION_MAX_ATTEMPTS, RESOLUTION_RETRY_SUCCEEDED,
};
use crate::error::{Result, RetryError};
use crate::gateways::{PaymentExecutionResult, PaymentExecutor, RetryPaymentContext};
use crate::repo::ports::RetryStores;
use crate::service::audit_logger::AuditLogger;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttemptOutcome {
    Succeeded,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttemptExecution {
    pub status: AttemptOutcome,
    pub attempt_id: Option<Uuid>,
}

impl AttemptExecution {
    fn skipped(attempt_id: Option<Uuid>) -> Self {
        Self {
            status: AttemptOutcome::Skipped,
            attempt_id,
        }
    }
}

/// Runs the next attempt of one schedule against the payment collaborator.
///
/// The attempt row is taken before the collaborator is called, so the same
/// `(schedule, attempt number)` reaches the collaborator at most once no
/// matter how many times this is invoked.
#[derive(Clone)]
pub struct RetryAttemptExecutor {
    pub stores: RetryStores,
    pub calendar: RetryCalendar,
    pub payments: Arc<dyn PaymentExecutor>,
    pub audit: AuditLogger,
}

impl RetryAttemptExecutor {
    pub fn new(stores: RetryStores, calendar: RetryCalendar, payments: Arc<dyn PaymentExecutor>) -> Self {
        Self {
            audit: AuditLogger::new(stores.audit.clone()),
            stores,
            calendar,
            payments,
        }
    }

    pub async fn execute(
        &self,
        schedule: &RetrySchedule,
        job_id: Option<Uuid>,
        actor: &AuditActor,
    ) -> Result<AttemptExecution> {
        let mut current = self
            .stores
            .schedules
            .get(schedule.id)
            .await?
            .ok_or(RetryError::ScheduleNotFound(schedule.id))?;

        // The caller's snapshot may be stale: someone else already moved it on.
        let Some(planned_date) = current.next_retry_date else {
            return Ok(AttemptExecution::skipped(None));
        };
        if !current.is_open() || current.current_attempt != schedule.current_attempt {
            tracing::warn!(schedule_id = %current.id, "schedule no longer due, attempt skipped");
            return Ok(AttemptExecution::skipped(None));
        }

        let policy = self
            .stores
            .policies
            .get(current.retry_policy_id)
            .await?
            .ok_or(RetryError::PolicyNotFound(current.retry_policy_id))?;

        let attempt_number = current.next_attempt_number();
        if attempt_number > current.max_attempts {
            let before = current.clone();
            current.resolve(
                Some(RetryEligibility::NotEligibleMaxAttempts),
                RESOLUTION_MAX_ATTEMPTS,
                Utc::now(),
            );
            self.stores.schedules.save(&current).await?;
            self.audit_schedule(&before, &current, ACTION_RESOLVED, actor).await;
            return Ok(AttemptExecution::skipped(None));
        }

        let now = Utc::now();
        let candidate = RetryAttempt::in_progress(current.id, attempt_number, planned_date, job_id, now);
        let mut attempt = match self.stores.attempts.begin(&candidate).await? {
            BeginAttempt::Started(attempt) => attempt,
            BeginAttempt::AlreadyExecuted(existing) => {
                tracing::warn!(
                    schedule_id = %current.id,
                    attempt_number,
                    status = existing.status.as_str(),
                    "attempt already executed, skipping"
                );
                return Ok(AttemptExecution::skipped(Some(existing.id)));
            }
        };
        self.audit
            .record(
                AuditLogEntry::new(&current.organisation_id, ENTITY_ATTEMPT, attempt.id, ACTION_STARTED, actor.kind)
                    .with_values(None::<&RetryAttempt>, &attempt)
                    .for_schedule(current.id)
                    .for_attempt(attempt.id)
                    .payment(&current.original_payment_id)
                    .by(actor),
            )
            .await;

        let context = RetryPaymentContext {
            retry_schedule_id: current.id,
            attempt_number,
            idempotency_key: attempt.idempotency_key.clone(),
            organisation_id: current.organisation_id.clone(),
            client_id: current.client_id.clone(),
            contract_id: current.contract_id.clone(),
            invoice_id: current.invoice_id.clone(),
            original_payment_id: current.original_payment_id.clone(),
            amount_cents: current.amount_cents,
            currency: current.currency.clone(),
        };

        tracing::info!(
            schedule_id = %current.id,
            attempt_number,
            executor = self.payments.name(),
            "executing retry attempt"
        );

        match self.payments.execute(&context).await {
            Ok(result) if result.success => {
                let attempt_id = attempt.id;
                self.on_success(current, attempt, result, actor).await?;
                Ok(AttemptExecution {
                    status: AttemptOutcome::Succeeded,
                    attempt_id: Some(attempt_id),
                })
            }
            Ok(result) => {
                let attempt_id = attempt.id;
                let started = attempt.clone();
                attempt.fail(
                    result.error_code.clone(),
                    result.error_message.clone(),
                    result.new_rejection_code.clone(),
                    Utc::now(),
                );
                self.on_failure(current, started, attempt, &policy, actor).await?;
                Ok(AttemptExecution {
                    status: AttemptOutcome::Failed,
                    attempt_id: Some(attempt_id),
                })
            }
            Err(err) => {
                let message = err.to_string();
                tracing::error!(
                    schedule_id = %current.id,
                    attempt_number,
                    "payment executor error: {}",
                    message
                );
                // Outcome unknown: the schedule keeps its attempt count and date,
                // and the FAILED row blocks this attempt number from running again.
                let started = attempt.clone();
                attempt.fail(
                    Some(EXECUTION_ERROR_CODE.to_string()),
                    Some(message.clone()),
                    None,
                    Utc::now(),
                );
                self.stores.attempts.save(&attempt).await?;
                self.audit_attempt(&current, &started, &attempt, ACTION_FAILED, actor)
                    .await;
                Err(RetryError::Execution(message))
            }
        }
    }

    async fn on_success(
        &self,
        mut schedule: RetrySchedule,
        mut attempt: RetryAttempt,
        result: PaymentExecutionResult,
        actor: &AuditActor,
    ) -> Result<()> {
        let now = Utc::now();
        let attempt_before = attempt.clone();
        attempt.succeed(result.psp_payment_id, now);
        self.stores.attempts.save(&attempt).await?;
        self.audit_attempt(&schedule, &attempt_before, &attempt, ACTION_SUCCEEDED, actor)
            .await;

        let before = schedule.clone();
        schedule.current_attempt = attempt.attempt_number;
        schedule.resolve(None, RESOLUTION_RETRY_SUCCEEDED, now);
        self.stores.schedules.save(&schedule).await?;
        self.audit_schedule(&before, &schedule, ACTION_RESOLVED, actor).await;

        tracing::info!(
            schedule_id = %schedule.id,
            attempt_number = attempt.attempt_number,
            "retry attempt succeeded, schedule resolved"
        );
        Ok(())
    }

    async fn on_failure(
        &self,
        mut schedule: RetrySchedule,
        started: RetryAttempt,
        attempt: RetryAttempt,
        policy: &RetryPolicy,
        actor: &AuditActor,
    ) -> Result<()> {
        let now = Utc::now();
        self.stores.attempts.save(&attempt).await?;
        self.audit_attempt(&schedule, &started, &attempt, ACTION_FAILED, actor)
            .await;

        let before = schedule.clone();
        let next = next_date(&self.calendar, &schedule, policy, attempt.attempt_number);
        let action = advance_after_failure(&mut schedule, attempt.attempt_number, next, now);
        self.stores.schedules.save(&schedule).await?;
        self.audit_schedule(&before, &schedule, action, actor).await;

        tracing::info!(
            schedule_id = %schedule.id,
            attempt_number = attempt.attempt_number,
            resolved = schedule.is_resolved,
            next_retry_date = ?schedule.next_retry_date,
            "retry attempt failed"
        );
        Ok(())
    }

    async fn audit_attempt(
        &self,
        schedule: &RetrySchedule,
        before: &RetryAttempt,
        after: &RetryAttempt,
        action: &str,
        actor: &AuditActor,
    ) {
        self.audit
            .record(
                AuditLogEntry::new(&schedule.organisation_id, ENTITY_ATTEMPT, after.id, action, actor.kind)
                    .with_values(Some(before), after)
                    .for_schedule(schedule.id)
                    .for_attempt(after.id)
                    .payment(&schedule.original_payment_id)
                    .by(actor),
            )
            .await;
    }

    async fn audit_schedule(&self, before: &RetrySchedule, after: &RetrySchedule, action: &str, actor: &AuditActor) {
        self.audit
            .record(
                AuditLogEntry::new(&after.organisation_id, ENTITY_SCHEDULE, after.id, action, actor.kind)
                    .with_values(Some(before), after)
                    .for_schedule(after.id)
                    .payment(&after.original_payment_id)
                    .by(actor),
            )
            .await;
    }
}

fn next_date(
    calendar: &RetryCalendar,
    schedule: &RetrySchedule,
    policy: &RetryPolicy,
    attempts_made: i32,
) -> Option<DateTime<Utc>> {
    let attempts_made = usize::try_from(attempts_made).ok()?;
    calendar.retry_instant(schedule.rejection_date, &policy.retry_delays_days, attempts_made)
}

/// Applies a failed attempt to its schedule and returns the audit action.
///
/// The schedule resolves as `NOT_ELIGIBLE_MAX_ATTEMPTS` once attempts run
/// out. Otherwise it stays open, with no planned date when the delay table
/// has no entry for the next attempt.
pub fn advance_after_failure(
    schedule: &mut RetrySchedule,
    attempt_number: i32,
    next_retry_date: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> &'static str {
    schedule.current_attempt = attempt_number;
    schedule.updated_at = now;
    if attempt_number >= schedule.max_attempts {
        schedule.resolve(Some(RetryEligibility::NotEligibleMaxAttempts), RESOLUTION_MAX_ATTEMPTS, now);
        return ACTION_RESOLVED;
    }
    schedule.next_retry_date = next_retry_date;
    ACTION_RESCHEDULED
}
