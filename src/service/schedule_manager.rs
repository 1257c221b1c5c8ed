use crate::domain::attempt::RetryAttempt;
use crate::domain::audit::{
    AuditActor, AuditActorType, AuditLogEntry, ACTION_CANCELLED, ACTION_CREATED, ACTION_REPLANNED,
    ENTITY_SCHEDULE,
};
use crate::domain::dates::RetryCalendar;
use crate::domain::event::{
    EligibilityCheckRequest, EligibilityCheckResult, HandleRejectionOutcome, PaymentRejectedEvent,
};
use crate::domain::policy::RetryPolicy;
use crate::domain::schedule::{
    Page, RetryEligibility, RetrySchedule, ScheduleFilter, ScheduleStatistics, RESOLUTION_NOT_ELIGIBLE,
};
use crate::eligibility::classifier::{normalize_reason_code, EligibilityClassifier};
use crate::error::{Result, RetryError};
use crate::repo::ports::RetryStores;
use crate::service::audit_logger::AuditLogger;
use crate::service::policy_resolver::RetryPolicyResolver;
use chrono::{DateTime, Utc};
use serde_json::json;
use uuid::Uuid;

pub const NO_POLICY_MESSAGE: &str = "no applicable retry policy";

/// Intake of rejection events and operator-facing access to schedules.
#[derive(Clone)]
pub struct RetryScheduleManager {
    pub stores: RetryStores,
    pub resolver: RetryPolicyResolver,
    pub classifier: EligibilityClassifier,
    pub calendar: RetryCalendar,
    pub audit: AuditLogger,
}

struct InitialPlan {
    eligibility: RetryEligibility,
    reason: String,
    canonical_code: String,
    first_retry_date: Option<DateTime<Utc>>,
}

impl RetryScheduleManager {
    pub fn new(
        stores: RetryStores,
        classifier: EligibilityClassifier,
        calendar: RetryCalendar,
    ) -> Self {
        Self {
            resolver: RetryPolicyResolver::new(stores.policies.clone()),
            audit: AuditLogger::new(stores.audit.clone()),
            stores,
            classifier,
            calendar,
        }
    }

    // An eligible code still needs a first planned date; a policy that allows
    // no attempts (or has no delays) cannot produce one.
    fn plan(&self, reason_code: &str, policy: &RetryPolicy, from: DateTime<Utc>) -> InitialPlan {
        let decision = self.classifier.classify(reason_code, policy);
        if !decision.eligibility.is_eligible() {
            return InitialPlan {
                eligibility: decision.eligibility,
                reason: decision.reason,
                canonical_code: decision.canonical_code,
                first_retry_date: None,
            };
        }

        let first = if policy.max_attempts > 0 {
            self.calendar.retry_instant(from, &policy.retry_delays_days, 0)
        } else {
            None
        };
        match first {
            Some(date) => InitialPlan {
                eligibility: RetryEligibility::Eligible,
                reason: decision.reason,
                canonical_code: decision.canonical_code,
                first_retry_date: Some(date),
            },
            None => InitialPlan {
                eligibility: RetryEligibility::NotEligibleMaxAttempts,
                reason: format!("retry policy {} allows no retry attempts", policy.id),
                canonical_code: decision.canonical_code,
                first_retry_date: None,
            },
        }
    }

    pub async fn handle_rejection(&self, event: PaymentRejectedEvent) -> Result<HandleRejectionOutcome> {
        event.validate()?;

        if let Some(existing) = self
            .stores
            .schedules
            .find_by_idempotency_key(&event.idempotency_key)
            .await?
        {
            tracing::warn!(
                idempotency_key = %event.idempotency_key,
                schedule_id = %existing.id,
                "duplicate rejection event ignored"
            );
            return Ok(duplicate(&existing));
        }

        let Some(policy) = self
            .resolver
            .resolve(&event.organisation_id, event.scope_id.as_deref())
            .await?
        else {
            tracing::warn!(
                organisation_id = %event.organisation_id,
                payment_id = %event.payment_id,
                "no retry policy for rejected payment"
            );
            return Ok(HandleRejectionOutcome {
                processed: false,
                schedule_id: None,
                eligibility: RetryEligibility::NotEligibleReasonCode,
                message: NO_POLICY_MESSAGE.to_string(),
            });
        };

        let plan = self.plan(&event.reason_code, &policy, event.rejected_at);
        let now = Utc::now();
        let eligible = plan.eligibility.is_eligible();

        let schedule = RetrySchedule {
            id: Uuid::new_v4(),
            organisation_id: event.organisation_id.clone(),
            scope_id: event.scope_id.clone(),
            client_id: event.client_id.clone(),
            contract_id: event.contract_id.clone(),
            invoice_id: event.invoice_id.clone(),
            payment_schedule_id: event.schedule_id.clone(),
            original_payment_id: event.payment_id.clone(),
            rejection_code: plan.canonical_code,
            rejection_raw_code: event.reason_code.clone(),
            rejection_message: event.reason_message.clone(),
            rejection_date: event.rejected_at,
            retry_policy_id: policy.id,
            amount_cents: event.amount_cents,
            currency: event.currency.trim().to_uppercase(),
            eligibility: plan.eligibility,
            eligibility_reason: plan.reason,
            current_attempt: 0,
            max_attempts: policy.max_attempts,
            next_retry_date: plan.first_retry_date,
            is_resolved: !eligible,
            resolution_reason: (!eligible).then(|| RESOLUTION_NOT_ELIGIBLE.to_string()),
            resolved_at: (!eligible).then_some(now),
            idempotency_key: event.idempotency_key.clone(),
            created_at: now,
            updated_at: now,
        };
        let placeholder = schedule
            .next_retry_date
            .map(|planned| RetryAttempt::placeholder(schedule.id, 1, planned));

        let Some(created) = self
            .stores
            .schedules
            .insert_if_absent(&schedule, placeholder.as_ref())
            .await?
        else {
            // Lost the race to a concurrent delivery of the same event.
            let existing = self
                .stores
                .schedules
                .find_by_idempotency_key(&event.idempotency_key)
                .await?
                .ok_or_else(|| RetryError::Store(format!("schedule {} vanished", event.idempotency_key)))?;
            tracing::warn!(schedule_id = %existing.id, "concurrent duplicate rejection event ignored");
            return Ok(duplicate(&existing));
        };

        self.audit
            .record(
                AuditLogEntry::new(
                    &created.organisation_id,
                    ENTITY_SCHEDULE,
                    created.id,
                    ACTION_CREATED,
                    AuditActorType::Webhook,
                )
                .with_values(None::<&RetrySchedule>, &created)
                .for_schedule(created.id)
                .payment(&created.original_payment_id),
            )
            .await;

        tracing::info!(
            schedule_id = %created.id,
            organisation_id = %created.organisation_id,
            eligibility = created.eligibility.as_str(),
            next_retry_date = ?created.next_retry_date,
            "retry schedule created"
        );

        Ok(HandleRejectionOutcome {
            processed: true,
            schedule_id: Some(created.id),
            eligibility: created.eligibility,
            message: created.eligibility_reason.clone(),
        })
    }

    /// Resolves and classifies without writing anything.
    pub async fn check_eligibility(&self, req: EligibilityCheckRequest) -> Result<EligibilityCheckResult> {
        if req.organisation_id.trim().is_empty() || req.reason_code.trim().is_empty() {
            return Err(RetryError::InvalidRequest(
                "organisation_id and reason_code are required".to_string(),
            ));
        }

        let Some(policy) = self
            .resolver
            .resolve(&req.organisation_id, req.scope_id.as_deref())
            .await?
        else {
            return Ok(EligibilityCheckResult {
                eligibility: RetryEligibility::NotEligibleReasonCode,
                reason: NO_POLICY_MESSAGE.to_string(),
                canonical_code: Some(normalize_reason_code(&req.reason_code)),
                applicable_policy_id: None,
                first_retry_date: None,
            });
        };

        let plan = self.plan(&req.reason_code, &policy, Utc::now());
        tracing::debug!(
            payment_id = %req.payment_id,
            eligibility = plan.eligibility.as_str(),
            "eligibility simulated"
        );
        Ok(EligibilityCheckResult {
            eligibility: plan.eligibility,
            reason: plan.reason,
            canonical_code: Some(plan.canonical_code),
            applicable_policy_id: Some(policy.id),
            first_retry_date: plan.first_retry_date,
        })
    }

    async fn open_schedule(&self, id: Uuid) -> Result<RetrySchedule> {
        let schedule = self.get_schedule(id).await?;
        if schedule.is_resolved {
            return Err(RetryError::AlreadyResolved(id));
        }
        Ok(schedule)
    }

    pub async fn cancel(&self, id: Uuid, reason: Option<&str>, cancelled_by: Option<&str>) -> Result<RetrySchedule> {
        let before = self.open_schedule(id).await?;
        let reason = reason
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or("cancelled by operator");

        let mut after = before.clone();
        after.eligibility_reason = reason.to_string();
        after.resolve(
            Some(RetryEligibility::NotEligibleManualCancel),
            RetryEligibility::NotEligibleManualCancel.as_str(),
            Utc::now(),
        );
        self.stores.schedules.save_unclaimed(&after).await?;

        let actor = AuditActor::new(AuditActorType::Manual, cancelled_by);
        self.audit
            .record(
                AuditLogEntry::new(&after.organisation_id, ENTITY_SCHEDULE, id, ACTION_CANCELLED, actor.kind)
                    .with_values(Some(&before), &after)
                    .for_schedule(id)
                    .payment(&after.original_payment_id)
                    .by(&actor),
            )
            .await;
        tracing::info!(schedule_id = %id, "retry schedule cancelled");
        Ok(after)
    }

    pub async fn replan(
        &self,
        id: Uuid,
        new_retry_date: DateTime<Utc>,
        reason: Option<&str>,
        replanned_by: Option<&str>,
    ) -> Result<RetrySchedule> {
        let before = self.open_schedule(id).await?;
        let mut after = before.clone();
        after.next_retry_date = Some(new_retry_date);
        after.updated_at = Utc::now();
        self.stores.schedules.save_unclaimed(&after).await?;

        let actor = AuditActor::new(AuditActorType::Manual, replanned_by);
        self.audit
            .record(
                AuditLogEntry::new(&after.organisation_id, ENTITY_SCHEDULE, id, ACTION_REPLANNED, actor.kind)
                    .with_values(
                        Some(&json!({ "next_retry_date": before.next_retry_date })),
                        &json!({ "next_retry_date": after.next_retry_date, "reason": reason }),
                    )
                    .for_schedule(id)
                    .payment(&after.original_payment_id)
                    .by(&actor),
            )
            .await;
        tracing::info!(schedule_id = %id, next_retry_date = %new_retry_date, "retry schedule replanned");
        Ok(after)
    }

    pub async fn get_schedule(&self, id: Uuid) -> Result<RetrySchedule> {
        self.stores
            .schedules
            .get(id)
            .await?
            .ok_or(RetryError::ScheduleNotFound(id))
    }

    pub async fn list_schedules(&self, filter: &ScheduleFilter) -> Result<Page<RetrySchedule>> {
        if filter.organisation_id.trim().is_empty() {
            return Err(RetryError::InvalidRequest("organisation_id is required".to_string()));
        }
        self.stores.schedules.list(filter).await
    }

    pub async fn list_attempts(&self, schedule_id: Uuid) -> Result<Vec<RetryAttempt>> {
        self.get_schedule(schedule_id).await?;
        self.stores.attempts.list_by_schedule(schedule_id).await
    }

    pub async fn get_attempt(&self, id: Uuid) -> Result<RetryAttempt> {
        self.stores
            .attempts
            .get(id)
            .await?
            .ok_or(RetryError::AttemptNotFound(id))
    }

    pub async fn statistics(&self, organisation_id: &str) -> Result<ScheduleStatistics> {
        self.stores.schedules.statistics(organisation_id).await
    }
}

fn duplicate(existing: &RetrySchedule) -> HandleRejectionOutcome {
    HandleRejectionOutcome {
        processed: false,
        schedule_id: Some(existing.id),
        eligibility: existing.eligibility,
        message: "rejection event already processed".to_string(),
    }
}
