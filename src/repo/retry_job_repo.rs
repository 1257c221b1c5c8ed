use crate::domain::job::{JobFilter, RetryJob};
use crate::domain::schedule::{paging, Page};
use crate::error::{Result, RetryError};
use crate::repo::ports::JobStore;
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

#[derive(Clone)]
pub struct RetryJobRepo {
    pub pool: PgPool,
}

const JOB_COLUMNS: &str = "id, organisation_id, target_date, timezone, cutoff_time, status, idempotency_key, \
     triggered_by, is_manual, is_dry_run, total_attempts, successful_attempts, failed_attempts, \
     skipped_attempts, failed_schedule_ids, error_message, started_at, completed_at, created_at, updated_at";

fn job_from_row(row: &PgRow) -> Result<RetryJob> {
    Ok(RetryJob {
        id: row.get("id"),
        organisation_id: row.get("organisation_id"),
        target_date: row.get("target_date"),
        timezone: row.get("timezone"),
        cutoff_time: row.get("cutoff_time"),
        status: row.get::<String, _>("status").parse()?,
        idempotency_key: row.get("idempotency_key"),
        triggered_by: row.get("triggered_by"),
        is_manual: row.get("is_manual"),
        is_dry_run: row.get("is_dry_run"),
        total_attempts: row.get("total_attempts"),
        successful_attempts: row.get("successful_attempts"),
        failed_attempts: row.get("failed_attempts"),
        skipped_attempts: row.get("skipped_attempts"),
        failed_schedule_ids: row.get("failed_schedule_ids"),
        error_message: row.get("error_message"),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[async_trait]
impl JobStore for RetryJobRepo {
    async fn find_active(&self, idempotency_key: &str) -> Result<Option<RetryJob>> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM retry_job WHERE idempotency_key=$1 AND status IN ('PENDING','RUNNING')"
        ))
        .bind(idempotency_key)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn insert_if_no_active(&self, job: &RetryJob) -> Result<Option<RetryJob>> {
        // Arbitrates on the partial unique index over active jobs.
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO retry_job (
                id, organisation_id, target_date, timezone, cutoff_time, status, idempotency_key,
                triggered_by, is_manual, is_dry_run, total_attempts, successful_attempts,
                failed_attempts, skipped_attempts, failed_schedule_ids, error_message,
                started_at, completed_at, created_at, updated_at
            )
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18,$19,$20)
            ON CONFLICT (idempotency_key) WHERE status IN ('PENDING','RUNNING') DO NOTHING
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(job.id)
        .bind(&job.organisation_id)
        .bind(job.target_date)
        .bind(&job.timezone)
        .bind(&job.cutoff_time)
        .bind(job.status.as_str())
        .bind(&job.idempotency_key)
        .bind(&job.triggered_by)
        .bind(job.is_manual)
        .bind(job.is_dry_run)
        .bind(job.total_attempts)
        .bind(job.successful_attempts)
        .bind(job.failed_attempts)
        .bind(job.skipped_attempts)
        .bind(&job.failed_schedule_ids)
        .bind(&job.error_message)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(job.created_at)
        .bind(job.updated_at)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn save(&self, job: &RetryJob) -> Result<()> {
        let res = sqlx::query(
            r#"
            UPDATE retry_job SET
                status=$2,
                total_attempts=$3,
                successful_attempts=$4,
                failed_attempts=$5,
                skipped_attempts=$6,
                failed_schedule_ids=$7,
                error_message=$8,
                completed_at=$9,
                updated_at=$10
            WHERE id=$1
            "#,
        )
        .bind(job.id)
        .bind(job.status.as_str())
        .bind(job.total_attempts)
        .bind(job.successful_attempts)
        .bind(job.failed_attempts)
        .bind(job.skipped_attempts)
        .bind(&job.failed_schedule_ids)
        .bind(&job.error_message)
        .bind(job.completed_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await?;

        if res.rows_affected() == 0 {
            return Err(RetryError::JobNotFound(job.id));
        }
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<RetryJob>> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM retry_job WHERE id=$1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn list(&self, filter: &JobFilter) -> Result<Page<RetryJob>> {
        let (page, limit, offset) = paging(filter.page, filter.limit);
        let status = filter.status.map(|s| s.as_str());

        let total: i64 = sqlx::query(
            "SELECT COUNT(*) AS n FROM retry_job WHERE organisation_id=$1 AND ($2::text IS NULL OR status=$2)",
        )
        .bind(&filter.organisation_id)
        .bind(status)
        .fetch_one(&self.pool)
        .await?
        .get("n");

        let rows = sqlx::query(&format!(
            r#"
            SELECT {JOB_COLUMNS} FROM retry_job
            WHERE organisation_id=$1 AND ($2::text IS NULL OR status=$2)
            ORDER BY created_at DESC
            LIMIT $3 OFFSET $4
            "#
        ))
        .bind(&filter.organisation_id)
        .bind(status)
        .bind(i64::from(limit))
        .bind(i64::from(offset))
        .fetch_all(&self.pool)
        .await?;

        Ok(Page {
            items: rows.iter().map(job_from_row).collect::<Result<Vec<_>>>()?,
            total,
            page,
            limit,
        })
    }
}
