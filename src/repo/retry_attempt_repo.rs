use crate::domain::attempt::{BeginAttempt, RetryAttempt};
use crate::error::{Result, RetryError};
use crate::repo::ports::AttemptStore;
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

#[derive(Clone)]
pub struct RetryAttemptRepo {
    pub pool: PgPool,
}

const ATTEMPT_COLUMNS: &str = "id, retry_schedule_id, attempt_number, planned_date, status, retry_job_id, \
     idempotency_key, executed_at, psp_payment_id, error_code, error_message, new_rejection_code, \
     created_at, updated_at";

fn attempt_from_row(row: &PgRow) -> Result<RetryAttempt> {
    Ok(RetryAttempt {
        id: row.get("id"),
        retry_schedule_id: row.get("retry_schedule_id"),
        attempt_number: row.get("attempt_number"),
        planned_date: row.get("planned_date"),
        status: row.get::<String, _>("status").parse()?,
        retry_job_id: row.get("retry_job_id"),
        idempotency_key: row.get("idempotency_key"),
        executed_at: row.get("executed_at"),
        psp_payment_id: row.get("psp_payment_id"),
        error_code: row.get("error_code"),
        error_message: row.get("error_message"),
        new_rejection_code: row.get("new_rejection_code"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

impl RetryAttemptRepo {
    /// Writes the reserved attempt alongside its schedule.
    pub async fn insert_tx(tx: &mut Transaction<'_, Postgres>, attempt: &RetryAttempt) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO retry_attempt (
                id, retry_schedule_id, attempt_number, planned_date, status, retry_job_id,
                idempotency_key, executed_at, created_at, updated_at
            )
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10)
            ON CONFLICT (idempotency_key) DO NOTHING
            "#,
        )
        .bind(attempt.id)
        .bind(attempt.retry_schedule_id)
        .bind(attempt.attempt_number)
        .bind(attempt.planned_date)
        .bind(attempt.status.as_str())
        .bind(attempt.retry_job_id)
        .bind(&attempt.idempotency_key)
        .bind(attempt.executed_at)
        .bind(attempt.created_at)
        .bind(attempt.updated_at)
        .execute(tx.as_mut())
        .await?;
        Ok(())
    }
}

#[async_trait]
impl AttemptStore for RetryAttemptRepo {
    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<RetryAttempt>> {
        let row = sqlx::query(&format!(
            "SELECT {ATTEMPT_COLUMNS} FROM retry_attempt WHERE idempotency_key=$1"
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(attempt_from_row).transpose()
    }

    async fn begin(&self, attempt: &RetryAttempt) -> Result<BeginAttempt> {
        // The conflict branch only fires for a SCHEDULED placeholder, so an
        // empty RETURNING means somebody already executed this number.
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO retry_attempt (
                id, retry_schedule_id, attempt_number, planned_date, status, retry_job_id,
                idempotency_key, executed_at, created_at, updated_at
            )
            VALUES ($1,$2,$3,$4,'IN_PROGRESS',$5,$6,$7,$8,$9)
            ON CONFLICT (idempotency_key) DO UPDATE SET
                status='IN_PROGRESS',
                planned_date=EXCLUDED.planned_date,
                retry_job_id=EXCLUDED.retry_job_id,
                executed_at=EXCLUDED.executed_at,
                updated_at=EXCLUDED.updated_at
            WHERE retry_attempt.status='SCHEDULED'
            RETURNING {ATTEMPT_COLUMNS}
            "#
        ))
        .bind(attempt.id)
        .bind(attempt.retry_schedule_id)
        .bind(attempt.attempt_number)
        .bind(attempt.planned_date)
        .bind(attempt.retry_job_id)
        .bind(&attempt.idempotency_key)
        .bind(attempt.executed_at)
        .bind(attempt.created_at)
        .bind(attempt.updated_at)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            return Ok(BeginAttempt::Started(attempt_from_row(&row)?));
        }

        let existing = self
            .find_by_idempotency_key(&attempt.idempotency_key)
            .await?
            .ok_or_else(|| RetryError::Store(format!("attempt {} vanished", attempt.idempotency_key)))?;
        Ok(BeginAttempt::AlreadyExecuted(existing))
    }

    async fn save(&self, attempt: &RetryAttempt) -> Result<()> {
        let res = sqlx::query(
            r#"
            UPDATE retry_attempt SET
                status=$2,
                retry_job_id=$3,
                executed_at=$4,
                psp_payment_id=$5,
                error_code=$6,
                error_message=$7,
                new_rejection_code=$8,
                updated_at=$9
            WHERE id=$1
            "#,
        )
        .bind(attempt.id)
        .bind(attempt.status.as_str())
        .bind(attempt.retry_job_id)
        .bind(attempt.executed_at)
        .bind(&attempt.psp_payment_id)
        .bind(&attempt.error_code)
        .bind(&attempt.error_message)
        .bind(&attempt.new_rejection_code)
        .bind(attempt.updated_at)
        .execute(&self.pool)
        .await?;

        if res.rows_affected() == 0 {
            return Err(RetryError::AttemptNotFound(attempt.id));
        }
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<RetryAttempt>> {
        let row = sqlx::query(&format!("SELECT {ATTEMPT_COLUMNS} FROM retry_attempt WHERE id=$1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(attempt_from_row).transpose()
    }

    async fn list_by_schedule(&self, schedule_id: Uuid) -> Result<Vec<RetryAttempt>> {
        let rows = sqlx::query(&format!(
            "SELECT {ATTEMPT_COLUMNS} FROM retry_attempt WHERE retry_schedule_id=$1 ORDER BY attempt_number ASC"
        ))
        .bind(schedule_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(attempt_from_row).collect()
    }
}
