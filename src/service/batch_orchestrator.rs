use crate::domain::audit::{AuditActor, AuditLogEntry, ACTION_COMPLETED, ACTION_STARTED, ENTITY_JOB};
use crate::domain::dates::{cutoff_instant, parse_timezone};
use crate::domain::job::{
    BatchRunRequest, BatchRunResult, BatchTally, JobFilter, RetryJob, RunTrigger,
};
use crate::domain::schedule::{Page, RetrySchedule};
use crate::error::{Result, RetryError};
use crate::repo::ports::RetryStores;
use crate::service::attempt_executor::{AttemptOutcome, RetryAttemptExecutor};
use crate::service::audit_logger::AuditLogger;
use chrono::{DateTime, NaiveDate, Utc};
use std::time::Duration;
use tracing::Instrument;
use uuid::Uuid;

/// Drives one batch run: dedups on the job key, claims the due set, and
/// feeds it through the attempt executor one schedule at a time.
#[derive(Clone)]
pub struct BatchOrchestrator {
    pub stores: RetryStores,
    pub executor: RetryAttemptExecutor,
    pub audit: AuditLogger,
    pub claim_ttl: Duration,
    pub timezone: String,
}

fn result_of(job: &RetryJob, deduplicated: bool, message: impl Into<String>) -> BatchRunResult {
    BatchRunResult {
        job_id: job.id,
        status: job.status,
        total_processed: job.total_attempts,
        successful: job.successful_attempts,
        failed: job.failed_attempts,
        skipped: job.skipped_attempts,
        deduplicated,
        message: message.into(),
    }
}

impl BatchOrchestrator {
    pub fn new(
        stores: RetryStores,
        executor: RetryAttemptExecutor,
        claim_ttl: Duration,
        timezone: impl Into<String>,
    ) -> Self {
        Self {
            audit: AuditLogger::new(stores.audit.clone()),
            stores,
            executor,
            claim_ttl,
            timezone: timezone.into(),
        }
    }

    pub async fn run(&self, req: BatchRunRequest) -> Result<BatchRunResult> {
        if req.organisation_id.trim().is_empty() {
            return Err(RetryError::InvalidRequest("organisation_id is required".to_string()));
        }
        let req = req.normalized()?;
        let cutoff = cutoff_instant(req.target_date, &req.timezone, &req.cutoff_time)?;
        let key = req.idempotency_key();

        if let Some(active) = self.stores.jobs.find_active(&key).await? {
            tracing::warn!(job_id = %active.id, idempotency_key = %key, "batch run already in progress");
            return Ok(result_of(&active, true, "a job with this key is already running"));
        }

        let job = RetryJob::start(&req, Utc::now());
        let Some(job) = self.stores.jobs.insert_if_no_active(&job).await? else {
            return match self.stores.jobs.find_active(&key).await? {
                Some(active) => {
                    tracing::warn!(job_id = %active.id, idempotency_key = %key, "batch run already in progress");
                    Ok(result_of(&active, true, "a job with this key is already running"))
                }
                None => Err(RetryError::ClaimConflict(format!(
                    "job {key} finished while this run was starting"
                ))),
            };
        };

        let actor = AuditActor::new(req.actor_type(), Some(req.triggered_by.as_str()));
        self.audit_job(&job, None, ACTION_STARTED, &actor).await;

        let span = tracing::info_span!(
            "batch_run",
            job_id = %job.id,
            organisation_id = %job.organisation_id,
            dry_run = req.dry_run
        );
        self.execute_job(job, &req, cutoff, &actor).instrument(span).await
    }

    async fn execute_job(
        &self,
        mut job: RetryJob,
        req: &BatchRunRequest,
        cutoff: DateTime<Utc>,
        actor: &AuditActor,
    ) -> Result<BatchRunResult> {
        tracing::info!(cutoff = %cutoff, "batch run started");

        if req.dry_run {
            return self.finish_dry_run(job, req, cutoff, actor).await;
        }

        let claimed = match self
            .stores
            .schedules
            .claim_due(&req.organisation_id, cutoff, job.id, self.claim_ttl, req.schedule_id)
            .await
        {
            Ok(claimed) => claimed,
            Err(RetryError::ClaimConflict(msg)) => {
                tracing::warn!("claim conflict, leaving due set for the next run: {}", msg);
                let before = job.clone();
                job.abort(format!("claim conflict: {msg}"), Utc::now());
                self.save_finished(&job).await?;
                self.audit_job(&job, Some(&before), ACTION_COMPLETED, actor).await;
                return Ok(result_of(&job, false, "claim conflict; retry on the next run"));
            }
            Err(err) => {
                tracing::error!("claiming due schedules failed: {}", err);
                let before = job.clone();
                job.abort(err.to_string(), Utc::now());
                if let Err(save_err) = self.save_finished(&job).await {
                    tracing::error!("could not mark job failed: {}", save_err);
                } else {
                    self.audit_job(&job, Some(&before), ACTION_COMPLETED, actor).await;
                }
                return Err(err);
            }
        };

        let tally = self.process(&claimed, job.id, actor).await;

        let before = job.clone();
        job.finish(&tally, claimed.len() as i32, Utc::now());
        self.save_finished(&job).await?;
        self.audit_job(&job, Some(&before), ACTION_COMPLETED, actor).await;

        tracing::info!(
            status = job.status.as_str(),
            total = job.total_attempts,
            successful = job.successful_attempts,
            failed = job.failed_attempts,
            skipped = job.skipped_attempts,
            "batch run finished"
        );
        let message = format!(
            "processed {} schedules: {} succeeded, {} failed, {} skipped",
            job.total_attempts, job.successful_attempts, job.failed_attempts, job.skipped_attempts
        );
        Ok(result_of(&job, false, message))
    }

    // Sequential; a failing schedule is counted and the loop moves on.
    async fn process(&self, claimed: &[RetrySchedule], job_id: Uuid, actor: &AuditActor) -> BatchTally {
        let mut tally = BatchTally::default();
        for schedule in claimed {
            match self.executor.execute(schedule, Some(job_id), actor).await {
                Ok(execution) => match execution.status {
                    AttemptOutcome::Succeeded => tally.successful += 1,
                    AttemptOutcome::Failed => {
                        tally.failed += 1;
                        tally.failed_schedule_ids.push(schedule.id);
                    }
                    AttemptOutcome::Skipped => tally.skipped += 1,
                },
                Err(err) => {
                    tracing::error!(schedule_id = %schedule.id, "retry attempt failed: {}", err);
                    tally.failed += 1;
                    tally.failed_schedule_ids.push(schedule.id);
                }
            }

            if let Err(err) = self.stores.schedules.release_claim(schedule.id, job_id).await {
                tracing::warn!(schedule_id = %schedule.id, "releasing claim failed: {}", err);
            }
        }
        tally
    }

    async fn finish_dry_run(
        &self,
        mut job: RetryJob,
        req: &BatchRunRequest,
        cutoff: DateTime<Utc>,
        actor: &AuditActor,
    ) -> Result<BatchRunResult> {
        let candidates = self
            .stores
            .schedules
            .find_due(&req.organisation_id, cutoff, req.schedule_id)
            .await?;
        let tally = BatchTally {
            skipped: candidates.len() as i32,
            ..BatchTally::default()
        };

        let before = job.clone();
        job.finish(&tally, candidates.len() as i32, Utc::now());
        self.save_finished(&job).await?;
        self.audit_job(&job, Some(&before), ACTION_COMPLETED, actor).await;

        tracing::info!(candidates = candidates.len(), "dry run finished");
        Ok(result_of(
            &job,
            false,
            format!("dry run: {} schedules due", candidates.len()),
        ))
    }

    /// Ad-hoc run for today up to the current local time, optionally limited
    /// to one schedule. A targeted schedule planned later than now is pulled
    /// forward by moving the cutoff to its planned instant.
    pub async fn run_now(
        &self,
        organisation_id: &str,
        schedule_id: Option<Uuid>,
        triggered_by: &str,
        dry_run: bool,
    ) -> Result<BatchRunResult> {
        let tz = parse_timezone(&self.timezone)?;
        let mut until = Utc::now();

        if let Some(id) = schedule_id {
            let schedule = self
                .stores
                .schedules
                .get(id)
                .await?
                .ok_or(RetryError::ScheduleNotFound(id))?;
            if schedule.organisation_id != organisation_id {
                return Err(RetryError::ScheduleNotFound(id));
            }
            if let Some(planned) = schedule.next_retry_date {
                until = until.max(planned);
            }
        }

        let local = until.with_timezone(&tz);
        let req = BatchRunRequest {
            organisation_id: organisation_id.to_string(),
            target_date: local.date_naive(),
            timezone: self.timezone.clone(),
            cutoff_time: local.format("%H:%M:%S").to_string(),
            dry_run,
            triggered_by: triggered_by.to_string(),
            trigger: RunTrigger::Manual,
            schedule_id,
        };
        self.run(req).await
    }

    /// The daily timer's entry point: one scheduled run per organisation with
    /// open schedules. A failing organisation is logged and does not stop the rest.
    pub async fn run_scheduled(&self, target_date: NaiveDate, cutoff_time: &str) -> Result<Vec<BatchRunResult>> {
        let organisations = self.stores.schedules.organisations_with_open_schedules().await?;
        let mut results = Vec::with_capacity(organisations.len());
        for organisation_id in organisations {
            let req = BatchRunRequest::scheduled(&organisation_id, target_date, &self.timezone, cutoff_time);
            match self.run(req).await {
                Ok(result) => results.push(result),
                Err(err) => {
                    tracing::error!(organisation_id = %organisation_id, "scheduled batch run failed: {}", err);
                }
            }
        }
        Ok(results)
    }

    pub async fn get_job(&self, id: Uuid) -> Result<RetryJob> {
        self.stores.jobs.get(id).await?.ok_or(RetryError::JobNotFound(id))
    }

    pub async fn list_jobs(&self, filter: &JobFilter) -> Result<Page<RetryJob>> {
        if filter.organisation_id.trim().is_empty() {
            return Err(RetryError::InvalidRequest("organisation_id is required".to_string()));
        }
        self.stores.jobs.list(filter).await
    }

    // A RUNNING job blocks its key, so the terminal write gets a second try.
    async fn save_finished(&self, job: &RetryJob) -> Result<()> {
        let Err(err) = self.stores.jobs.save(job).await else {
            return Ok(());
        };
        tracing::warn!(job_id = %job.id, "saving finished job failed, retrying: {}", err);
        if let Err(err) = self.stores.jobs.save(job).await {
            tracing::error!(job_id = %job.id, status = job.status.as_str(), "job left RUNNING: {}", err);
            return Err(err);
        }
        Ok(())
    }

    async fn audit_job(&self, job: &RetryJob, before: Option<&RetryJob>, action: &str, actor: &AuditActor) {
        self.audit
            .record(
                AuditLogEntry::new(&job.organisation_id, ENTITY_JOB, job.id, action, actor.kind)
                    .with_values(before, job)
                    .by(actor),
            )
            .await;
    }
}
