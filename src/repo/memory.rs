use crate::domain::attempt::{BeginAttempt, RetryAttempt, RetryAttemptStatus};
use crate::domain::audit::{AuditFilter, AuditLogEntry};
use crate::domain::job::{JobFilter, RetryJob};
use crate::domain::policy::RetryPolicy;
use crate::domain::schedule::{
    paging, EligibilityCount, Page, RetrySchedule, ScheduleFilter, ScheduleStatistics,
    RESOLUTION_RETRY_SUCCEEDED,
};
use crate::error::{Result, RetryError};
use crate::repo::ports::{AttemptStore, AuditStore, JobStore, PolicyStore, ScheduleStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
struct Claim {
    job_id: Uuid,
    expires_at: DateTime<Utc>,
}

impl Claim {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

#[derive(Default)]
struct State {
    policies: HashMap<Uuid, RetryPolicy>,
    schedules: HashMap<Uuid, RetrySchedule>,
    claims: HashMap<Uuid, Claim>,
    attempts: HashMap<Uuid, RetryAttempt>,
    jobs: HashMap<Uuid, RetryJob>,
    audit: Vec<AuditLogEntry>,
    next_seq: i64,
}

impl State {
    fn claimed_by_other(&self, schedule_id: Uuid, job_id: Option<Uuid>, now: DateTime<Utc>) -> bool {
        self.claims
            .get(&schedule_id)
            .is_some_and(|c| c.is_live(now) && Some(c.job_id) != job_id)
    }

    fn due(
        &self,
        organisation_id: &str,
        cutoff: DateTime<Utc>,
        only: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Vec<RetrySchedule> {
        let mut due: Vec<RetrySchedule> = self
            .schedules
            .values()
            .filter(|s| s.organisation_id == organisation_id)
            .filter(|s| only.map_or(true, |id| s.id == id))
            .filter(|s| s.is_open() && s.next_retry_date.is_some_and(|d| d <= cutoff))
            .filter(|s| !self.claimed_by_other(s.id, None, now))
            .cloned()
            .collect();
        due.sort_by_key(|s| (s.next_retry_date, s.created_at));
        due
    }
}

/// Process-local implementation of every store port.
///
/// One lock guards all tables so the multi-row primitives (claim, begin,
/// insert-if-absent) are atomic in the same way the Postgres statements are.
#[derive(Default, Clone)]
pub struct InMemoryRetryStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryRetryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn page_of<T: Clone>(items: Vec<T>, page: Option<u32>, limit: Option<u32>) -> Page<T> {
    let (page, limit, offset) = paging(page, limit);
    let total = items.len() as i64;
    let items = items
        .into_iter()
        .skip(offset as usize)
        .take(limit as usize)
        .collect();
    Page { items, total, page, limit }
}

#[async_trait]
impl PolicyStore for InMemoryRetryStore {
    async fn list_active(&self, organisation_id: &str) -> Result<Vec<RetryPolicy>> {
        let state = self.state.read().await;
        Ok(state
            .policies
            .values()
            .filter(|p| p.organisation_id == organisation_id && p.is_active)
            .cloned()
            .collect())
    }

    async fn list_all(&self, organisation_id: &str) -> Result<Vec<RetryPolicy>> {
        let state = self.state.read().await;
        let mut policies: Vec<RetryPolicy> = state
            .policies
            .values()
            .filter(|p| p.organisation_id == organisation_id)
            .cloned()
            .collect();
        policies.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.name.cmp(&b.name)));
        Ok(policies)
    }

    async fn get(&self, id: Uuid) -> Result<Option<RetryPolicy>> {
        Ok(self.state.read().await.policies.get(&id).cloned())
    }

    async fn upsert(&self, policy: &RetryPolicy) -> Result<()> {
        let mut state = self.state.write().await;
        state.policies.insert(policy.id, policy.clone());
        Ok(())
    }
}

#[async_trait]
impl ScheduleStore for InMemoryRetryStore {
    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<RetrySchedule>> {
        let state = self.state.read().await;
        Ok(state
            .schedules
            .values()
            .find(|s| s.idempotency_key == key)
            .cloned())
    }

    async fn insert_if_absent(
        &self,
        schedule: &RetrySchedule,
        placeholder: Option<&RetryAttempt>,
    ) -> Result<Option<RetrySchedule>> {
        let mut state = self.state.write().await;
        if state
            .schedules
            .values()
            .any(|s| s.idempotency_key == schedule.idempotency_key)
        {
            return Ok(None);
        }
        state.schedules.insert(schedule.id, schedule.clone());
        if let Some(attempt) = placeholder {
            state.attempts.insert(attempt.id, attempt.clone());
        }
        Ok(Some(schedule.clone()))
    }

    async fn get(&self, id: Uuid) -> Result<Option<RetrySchedule>> {
        Ok(self.state.read().await.schedules.get(&id).cloned())
    }

    async fn list(&self, filter: &ScheduleFilter) -> Result<Page<RetrySchedule>> {
        let state = self.state.read().await;
        let mut items: Vec<RetrySchedule> = state
            .schedules
            .values()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(page_of(items, filter.page, filter.limit))
    }

    async fn find_due(
        &self,
        organisation_id: &str,
        cutoff: DateTime<Utc>,
        only: Option<Uuid>,
    ) -> Result<Vec<RetrySchedule>> {
        let state = self.state.read().await;
        Ok(state.due(organisation_id, cutoff, only, Utc::now()))
    }

    async fn claim_due(
        &self,
        organisation_id: &str,
        cutoff: DateTime<Utc>,
        job_id: Uuid,
        ttl: Duration,
        only: Option<Uuid>,
    ) -> Result<Vec<RetrySchedule>> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| RetryError::InvalidRequest(format!("claim ttl out of range: {e}")))?;
        let due = state.due(organisation_id, cutoff, only, now);
        for schedule in &due {
            state.claims.insert(
                schedule.id,
                Claim {
                    job_id,
                    expires_at: now + ttl,
                },
            );
        }
        Ok(due)
    }

    async fn release_claim(&self, id: Uuid, job_id: Uuid) -> Result<()> {
        let mut state = self.state.write().await;
        if state.claims.get(&id).is_some_and(|c| c.job_id == job_id) {
            state.claims.remove(&id);
        }
        Ok(())
    }

    async fn save(&self, schedule: &RetrySchedule) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.schedules.contains_key(&schedule.id) {
            return Err(RetryError::ScheduleNotFound(schedule.id));
        }
        state.schedules.insert(schedule.id, schedule.clone());
        Ok(())
    }

    async fn save_unclaimed(&self, schedule: &RetrySchedule) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.schedules.contains_key(&schedule.id) {
            return Err(RetryError::ScheduleNotFound(schedule.id));
        }
        if state.claimed_by_other(schedule.id, None, Utc::now()) {
            return Err(RetryError::ClaimConflict(format!(
                "retry schedule {} is held by a running job",
                schedule.id
            )));
        }
        state.schedules.insert(schedule.id, schedule.clone());
        Ok(())
    }

    async fn organisations_with_open_schedules(&self) -> Result<Vec<String>> {
        let state = self.state.read().await;
        let mut orgs: Vec<String> = state
            .schedules
            .values()
            .filter(|s| s.is_open())
            .map(|s| s.organisation_id.clone())
            .collect();
        orgs.sort();
        orgs.dedup();
        Ok(orgs)
    }

    async fn statistics(&self, organisation_id: &str) -> Result<ScheduleStatistics> {
        let state = self.state.read().await;
        let rows: Vec<&RetrySchedule> = state
            .schedules
            .values()
            .filter(|s| s.organisation_id == organisation_id)
            .collect();

        let total = rows.len() as i64;
        let eligible_open = rows.iter().filter(|s| s.is_open()).count() as i64;
        let resolved = rows.iter().filter(|s| s.is_resolved).count() as i64;

        let mut counts: BTreeMap<&'static str, EligibilityCount> = BTreeMap::new();
        for s in &rows {
            counts
                .entry(s.eligibility.as_str())
                .or_insert(EligibilityCount {
                    eligibility: s.eligibility,
                    count: 0,
                })
                .count += 1;
        }

        let succeeded: Vec<i32> = rows
            .iter()
            .filter(|s| s.is_resolved && s.resolution_reason.as_deref() == Some(RESOLUTION_RETRY_SUCCEEDED))
            .map(|s| s.current_attempt)
            .collect();
        let avg_attempts_before_success = if succeeded.is_empty() {
            0.0
        } else {
            succeeded.iter().map(|n| f64::from(*n)).sum::<f64>() / succeeded.len() as f64
        };

        Ok(ScheduleStatistics {
            total,
            eligible_open,
            resolved,
            pending: total - resolved,
            by_eligibility: counts.into_values().collect(),
            avg_attempts_before_success,
        })
    }
}

#[async_trait]
impl AttemptStore for InMemoryRetryStore {
    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<RetryAttempt>> {
        let state = self.state.read().await;
        Ok(state
            .attempts
            .values()
            .find(|a| a.idempotency_key == key)
            .cloned())
    }

    async fn begin(&self, attempt: &RetryAttempt) -> Result<BeginAttempt> {
        let mut state = self.state.write().await;
        let existing = state
            .attempts
            .values_mut()
            .find(|a| a.idempotency_key == attempt.idempotency_key);

        match existing {
            Some(row) if row.status.is_executed() => Ok(BeginAttempt::AlreadyExecuted(row.clone())),
            Some(row) => {
                row.status = RetryAttemptStatus::InProgress;
                row.planned_date = attempt.planned_date;
                row.retry_job_id = attempt.retry_job_id;
                row.executed_at = attempt.executed_at;
                row.updated_at = attempt.updated_at;
                Ok(BeginAttempt::Started(row.clone()))
            }
            None => {
                state.attempts.insert(attempt.id, attempt.clone());
                Ok(BeginAttempt::Started(attempt.clone()))
            }
        }
    }

    async fn save(&self, attempt: &RetryAttempt) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.attempts.contains_key(&attempt.id) {
            return Err(RetryError::AttemptNotFound(attempt.id));
        }
        state.attempts.insert(attempt.id, attempt.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<RetryAttempt>> {
        Ok(self.state.read().await.attempts.get(&id).cloned())
    }

    async fn list_by_schedule(&self, schedule_id: Uuid) -> Result<Vec<RetryAttempt>> {
        let state = self.state.read().await;
        let mut attempts: Vec<RetryAttempt> = state
            .attempts
            .values()
            .filter(|a| a.retry_schedule_id == schedule_id)
            .cloned()
            .collect();
        attempts.sort_by_key(|a| a.attempt_number);
        Ok(attempts)
    }
}

#[async_trait]
impl JobStore for InMemoryRetryStore {
    async fn find_active(&self, idempotency_key: &str) -> Result<Option<RetryJob>> {
        let state = self.state.read().await;
        Ok(state
            .jobs
            .values()
            .find(|j| j.idempotency_key == idempotency_key && j.status.is_active())
            .cloned())
    }

    async fn insert_if_no_active(&self, job: &RetryJob) -> Result<Option<RetryJob>> {
        let mut state = self.state.write().await;
        if state
            .jobs
            .values()
            .any(|j| j.idempotency_key == job.idempotency_key && j.status.is_active())
        {
            return Ok(None);
        }
        state.jobs.insert(job.id, job.clone());
        Ok(Some(job.clone()))
    }

    async fn save(&self, job: &RetryJob) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.jobs.contains_key(&job.id) {
            return Err(RetryError::JobNotFound(job.id));
        }
        state.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<RetryJob>> {
        Ok(self.state.read().await.jobs.get(&id).cloned())
    }

    async fn list(&self, filter: &JobFilter) -> Result<Page<RetryJob>> {
        let state = self.state.read().await;
        let mut items: Vec<RetryJob> = state
            .jobs
            .values()
            .filter(|j| j.organisation_id == filter.organisation_id)
            .filter(|j| filter.status.map_or(true, |s| j.status == s))
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(page_of(items, filter.page, filter.limit))
    }
}

#[async_trait]
impl AuditStore for InMemoryRetryStore {
    async fn append(&self, entry: &AuditLogEntry) -> Result<()> {
        let mut state = self.state.write().await;
        state.next_seq += 1;
        let mut entry = entry.clone();
        entry.seq = state.next_seq;
        state.audit.push(entry);
        Ok(())
    }

    async fn list(&self, filter: &AuditFilter) -> Result<Vec<AuditLogEntry>> {
        let state = self.state.read().await;
        let limit = filter.limit.unwrap_or(100).clamp(1, 1000) as usize;
        // Newest first, as operators read it.
        Ok(state
            .audit
            .iter()
            .rev()
            .filter(|e| filter.matches(e))
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::job::{BatchRunRequest, RetryJobStatus};
    use crate::domain::schedule::RetryEligibility;
    use chrono::{NaiveDate, TimeZone};

    fn schedule(org: &str, key: &str, next: DateTime<Utc>) -> RetrySchedule {
        let now = Utc::now();
        RetrySchedule {
            id: Uuid::new_v4(),
            organisation_id: org.to_string(),
            scope_id: None,
            client_id: "client-1".to_string(),
            contract_id: None,
            invoice_id: None,
            payment_schedule_id: "ps-1".to_string(),
            original_payment_id: format!("pay-{key}"),
            rejection_code: "AM04_ACCOUNT_CLOSED".to_string(),
            rejection_raw_code: "AM04".to_string(),
            rejection_message: None,
            rejection_date: now,
            retry_policy_id: Uuid::new_v4(),
            amount_cents: 1000,
            currency: "EUR".to_string(),
            eligibility: RetryEligibility::Eligible,
            eligibility_reason: "test".to_string(),
            current_attempt: 0,
            max_attempts: 3,
            next_retry_date: Some(next),
            is_resolved: false,
            resolution_reason: None,
            resolved_at: None,
            idempotency_key: key.to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    fn past() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 12, 9, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn insert_if_absent_keeps_first_writer() {
        let store = InMemoryRetryStore::new();
        let a = schedule("org-1", "evt-1", past());
        let b = schedule("org-1", "evt-1", past());

        assert!(store.insert_if_absent(&a, None).await.unwrap().is_some());
        assert!(store.insert_if_absent(&b, None).await.unwrap().is_none());
        let found = ScheduleStore::find_by_idempotency_key(&store, "evt-1").await.unwrap().unwrap();
        assert_eq!(found.id, a.id);
    }

    #[tokio::test]
    async fn claimed_rows_are_invisible_to_other_jobs() {
        let store = InMemoryRetryStore::new();
        let s = schedule("org-1", "evt-1", past());
        store.insert_if_absent(&s, None).await.unwrap();

        let ttl = Duration::from_secs(60);
        let first = store.claim_due("org-1", Utc::now(), Uuid::new_v4(), ttl, None).await.unwrap();
        let second = store.claim_due("org-1", Utc::now(), Uuid::new_v4(), ttl, None).await.unwrap();
        assert_eq!(first.len(), 1);
        assert!(second.is_empty());

        let mut changed = s.clone();
        changed.next_retry_date = None;
        assert!(matches!(
            store.save_unclaimed(&changed).await,
            Err(RetryError::ClaimConflict(_))
        ));
    }

    #[tokio::test]
    async fn released_claim_makes_row_due_again() {
        let store = InMemoryRetryStore::new();
        let s = schedule("org-1", "evt-1", past());
        store.insert_if_absent(&s, None).await.unwrap();
        let job = Uuid::new_v4();
        let ttl = Duration::from_secs(60);

        store.claim_due("org-1", Utc::now(), job, ttl, None).await.unwrap();
        store.release_claim(s.id, Uuid::new_v4()).await.unwrap();
        assert!(store.find_due("org-1", Utc::now(), None).await.unwrap().is_empty());

        store.release_claim(s.id, job).await.unwrap();
        assert_eq!(store.find_due("org-1", Utc::now(), None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn expired_claim_is_ignored() {
        let store = InMemoryRetryStore::new();
        let s = schedule("org-1", "evt-1", past());
        store.insert_if_absent(&s, None).await.unwrap();

        store
            .claim_due("org-1", Utc::now(), Uuid::new_v4(), Duration::ZERO, None)
            .await
            .unwrap();
        assert_eq!(store.find_due("org-1", Utc::now(), None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn begin_promotes_placeholder_once() {
        let store = InMemoryRetryStore::new();
        let schedule_id = Uuid::new_v4();
        let placeholder = RetryAttempt::placeholder(schedule_id, 1, past());
        let s = schedule("org-1", "evt-1", past());
        store.insert_if_absent(&s, Some(&placeholder)).await.unwrap();

        let attempt = RetryAttempt::in_progress(schedule_id, 1, past(), None, Utc::now());
        match store.begin(&attempt).await.unwrap() {
            BeginAttempt::Started(row) => {
                assert_eq!(row.id, placeholder.id);
                assert_eq!(row.status, RetryAttemptStatus::InProgress);
            }
            other => panic!("expected Started, got {other:?}"),
        }
        assert!(matches!(
            store.begin(&attempt).await.unwrap(),
            BeginAttempt::AlreadyExecuted(_)
        ));
    }

    #[tokio::test]
    async fn only_one_active_job_per_key() {
        let store = InMemoryRetryStore::new();
        let date = NaiveDate::from_ymd_opt(2024, 1, 12).unwrap();
        let req = BatchRunRequest::scheduled("org-1", date, "Europe/Paris", "10:00:00");

        let mut first = RetryJob::start(&req, Utc::now());
        assert!(store.insert_if_no_active(&first).await.unwrap().is_some());
        assert!(store.insert_if_no_active(&RetryJob::start(&req, Utc::now())).await.unwrap().is_none());

        first.status = RetryJobStatus::Completed;
        JobStore::save(&store, &first).await.unwrap();
        assert!(store.insert_if_no_active(&RetryJob::start(&req, Utc::now())).await.unwrap().is_some());
    }
}
