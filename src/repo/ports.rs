use crate::domain::attempt::{BeginAttempt, RetryAttempt};
use crate::domain::audit::{AuditFilter, AuditLogEntry};
use crate::domain::job::{JobFilter, RetryJob};
use crate::domain::policy::RetryPolicy;
use crate::domain::schedule::{Page, RetrySchedule, ScheduleFilter, ScheduleStatistics};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[async_trait]
pub trait PolicyStore: Send + Sync {
    async fn list_active(&self, organisation_id: &str) -> Result<Vec<RetryPolicy>>;
    async fn list_all(&self, organisation_id: &str) -> Result<Vec<RetryPolicy>>;
    async fn get(&self, id: Uuid) -> Result<Option<RetryPolicy>>;
    async fn upsert(&self, policy: &RetryPolicy) -> Result<()>;
}

#[async_trait]
pub trait ScheduleStore: Send + Sync {
    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<RetrySchedule>>;

    /// Inserts the schedule (and its reserved first attempt) atomically.
    /// Returns `None` when another writer already holds the idempotency key.
    async fn insert_if_absent(
        &self,
        schedule: &RetrySchedule,
        placeholder: Option<&RetryAttempt>,
    ) -> Result<Option<RetrySchedule>>;

    async fn get(&self, id: Uuid) -> Result<Option<RetrySchedule>>;
    async fn list(&self, filter: &ScheduleFilter) -> Result<Page<RetrySchedule>>;

    /// Open, eligible, unclaimed schedules due at `cutoff`. Does not claim.
    async fn find_due(
        &self,
        organisation_id: &str,
        cutoff: DateTime<Utc>,
        only: Option<Uuid>,
    ) -> Result<Vec<RetrySchedule>>;

    /// Claims due schedules for `job_id`, skipping rows another run holds.
    async fn claim_due(
        &self,
        organisation_id: &str,
        cutoff: DateTime<Utc>,
        job_id: Uuid,
        ttl: Duration,
        only: Option<Uuid>,
    ) -> Result<Vec<RetrySchedule>>;

    async fn release_claim(&self, id: Uuid, job_id: Uuid) -> Result<()>;

    /// Write-back by the run that holds the claim.
    async fn save(&self, schedule: &RetrySchedule) -> Result<()>;

    /// Write-back outside a run; `ClaimConflict` while a run holds the row.
    async fn save_unclaimed(&self, schedule: &RetrySchedule) -> Result<()>;

    async fn organisations_with_open_schedules(&self) -> Result<Vec<String>>;
    async fn statistics(&self, organisation_id: &str) -> Result<ScheduleStatistics>;
}

#[async_trait]
pub trait AttemptStore: Send + Sync {
    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<RetryAttempt>>;

    /// Takes ownership of an attempt number: inserts the IN_PROGRESS row or
    /// promotes a SCHEDULED placeholder. Executed rows are never taken twice.
    async fn begin(&self, attempt: &RetryAttempt) -> Result<BeginAttempt>;

    async fn save(&self, attempt: &RetryAttempt) -> Result<()>;
    async fn get(&self, id: Uuid) -> Result<Option<RetryAttempt>>;
    async fn list_by_schedule(&self, schedule_id: Uuid) -> Result<Vec<RetryAttempt>>;
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn find_active(&self, idempotency_key: &str) -> Result<Option<RetryJob>>;

    /// `None` when a PENDING/RUNNING job with the same key already exists.
    async fn insert_if_no_active(&self, job: &RetryJob) -> Result<Option<RetryJob>>;

    async fn save(&self, job: &RetryJob) -> Result<()>;
    async fn get(&self, id: Uuid) -> Result<Option<RetryJob>>;
    async fn list(&self, filter: &JobFilter) -> Result<Page<RetryJob>>;
}

#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append(&self, entry: &AuditLogEntry) -> Result<()>;
    async fn list(&self, filter: &AuditFilter) -> Result<Vec<AuditLogEntry>>;
}

#[derive(Clone)]
pub struct RetryStores {
    pub policies: Arc<dyn PolicyStore>,
    pub schedules: Arc<dyn ScheduleStore>,
    pub attempts: Arc<dyn AttemptStore>,
    pub jobs: Arc<dyn JobStore>,
    pub audit: Arc<dyn AuditStore>,
}

impl RetryStores {
    pub fn postgres(pool: sqlx::PgPool) -> Self {
        use crate::repo::{
            audit_log_repo::AuditLogRepo, retry_attempt_repo::RetryAttemptRepo,
            retry_job_repo::RetryJobRepo, retry_policy_repo::RetryPolicyRepo,
            retry_schedule_repo::RetryScheduleRepo,
        };
        Self {
            policies: Arc::new(RetryPolicyRepo { pool: pool.clone() }),
            schedules: Arc::new(RetryScheduleRepo { pool: pool.clone() }),
            attempts: Arc::new(RetryAttemptRepo { pool: pool.clone() }),
            jobs: Arc::new(RetryJobRepo { pool: pool.clone() }),
            audit: Arc::new(AuditLogRepo { pool }),
        }
    }

    pub fn in_memory(store: crate::repo::memory::InMemoryRetryStore) -> Self {
        let store = Arc::new(store);
        Self {
            policies: store.clone(),
            schedules: store.clone(),
            attempts: store.clone(),
            jobs: store.clone(),
            audit: store,
        }
    }
}
