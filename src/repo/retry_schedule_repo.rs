use crate::domain::attempt::RetryAttempt;
use crate::domain::schedule::{
    paging, EligibilityCount, Page, RetrySchedule, ScheduleFilter, ScheduleStatistics,
    RESOLUTION_RETRY_SUCCEEDED,
};
use crate::error::{Result, RetryError};
use crate::repo::ports::ScheduleStore;
use crate::repo::retry_attempt_repo::RetryAttemptRepo;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use std::time::Duration;
use uuid::Uuid;

#[derive(Clone)]
pub struct RetryScheduleRepo {
    pub pool: PgPool,
}

const SCHEDULE_COLUMNS: &str = "id, organisation_id, scope_id, client_id, contract_id, invoice_id, \
     payment_schedule_id, original_payment_id, rejection_code, rejection_raw_code, rejection_message, \
     rejection_date, retry_policy_id, amount_cents, currency, eligibility, eligibility_reason, \
     current_attempt, max_attempts, next_retry_date, is_resolved, resolution_reason, resolved_at, \
     idempotency_key, created_at, updated_at";

fn schedule_from_row(row: &PgRow) -> Result<RetrySchedule> {
    Ok(RetrySchedule {
        id: row.get("id"),
        organisation_id: row.get("organisation_id"),
        scope_id: row.get("scope_id"),
        client_id: row.get("client_id"),
        contract_id: row.get("contract_id"),
        invoice_id: row.get("invoice_id"),
        payment_schedule_id: row.get("payment_schedule_id"),
        original_payment_id: row.get("original_payment_id"),
        rejection_code: row.get("rejection_code"),
        rejection_raw_code: row.get("rejection_raw_code"),
        rejection_message: row.get("rejection_message"),
        rejection_date: row.get("rejection_date"),
        retry_policy_id: row.get("retry_policy_id"),
        amount_cents: row.get("amount_cents"),
        currency: row.get("currency"),
        eligibility: row.get::<String, _>("eligibility").parse()?,
        eligibility_reason: row.get("eligibility_reason"),
        current_attempt: row.get("current_attempt"),
        max_attempts: row.get("max_attempts"),
        next_retry_date: row.get("next_retry_date"),
        is_resolved: row.get("is_resolved"),
        resolution_reason: row.get("resolution_reason"),
        resolved_at: row.get("resolved_at"),
        idempotency_key: row.get("idempotency_key"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn push_filter<'a>(qb: &mut QueryBuilder<'a, Postgres>, filter: &'a ScheduleFilter) {
    qb.push(" WHERE organisation_id = ").push_bind(&filter.organisation_id);
    if let Some(scope) = &filter.scope_id {
        qb.push(" AND scope_id = ").push_bind(scope);
    }
    if let Some(client) = &filter.client_id {
        qb.push(" AND client_id = ").push_bind(client);
    }
    if let Some(contract) = &filter.contract_id {
        qb.push(" AND contract_id = ").push_bind(contract);
    }
    if let Some(eligibility) = filter.eligibility {
        qb.push(" AND eligibility = ").push_bind(eligibility.as_str());
    }
    if let Some(resolved) = filter.is_resolved {
        qb.push(" AND is_resolved = ").push_bind(resolved);
    }
}

impl RetryScheduleRepo {
    async fn write(&self, schedule: &RetrySchedule, only_unclaimed: bool) -> Result<u64> {
        let guard = if only_unclaimed {
            " AND (claimed_by_job_id IS NULL OR claim_expires_at <= now())"
        } else {
            ""
        };
        let res = sqlx::query(&format!(
            r#"
            UPDATE retry_schedule SET
                eligibility=$2,
                eligibility_reason=$3,
                current_attempt=$4,
                next_retry_date=$5,
                is_resolved=$6,
                resolution_reason=$7,
                resolved_at=$8,
                rejection_code=$9,
                updated_at=$10
            WHERE id=$1{guard}
            "#
        ))
        .bind(schedule.id)
        .bind(schedule.eligibility.as_str())
        .bind(&schedule.eligibility_reason)
        .bind(schedule.current_attempt)
        .bind(schedule.next_retry_date)
        .bind(schedule.is_resolved)
        .bind(&schedule.resolution_reason)
        .bind(schedule.resolved_at)
        .bind(&schedule.rejection_code)
        .bind(schedule.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected())
    }
}

#[async_trait]
impl ScheduleStore for RetryScheduleRepo {
    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<RetrySchedule>> {
        let row = sqlx::query(&format!(
            "SELECT {SCHEDULE_COLUMNS} FROM retry_schedule WHERE idempotency_key=$1"
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(schedule_from_row).transpose()
    }

    async fn insert_if_absent(
        &self,
        schedule: &RetrySchedule,
        placeholder: Option<&RetryAttempt>,
    ) -> Result<Option<RetrySchedule>> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO retry_schedule (
                id, organisation_id, scope_id, client_id, contract_id, invoice_id,
                payment_schedule_id, original_payment_id, rejection_code, rejection_raw_code,
                rejection_message, rejection_date, retry_policy_id, amount_cents, currency,
                eligibility, eligibility_reason, current_attempt, max_attempts, next_retry_date,
                is_resolved, resolution_reason, resolved_at, idempotency_key, created_at, updated_at
            )
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18,$19,$20,$21,$22,$23,$24,$25,$26)
            ON CONFLICT (idempotency_key) DO NOTHING
            RETURNING {SCHEDULE_COLUMNS}
            "#
        ))
        .bind(schedule.id)
        .bind(&schedule.organisation_id)
        .bind(&schedule.scope_id)
        .bind(&schedule.client_id)
        .bind(&schedule.contract_id)
        .bind(&schedule.invoice_id)
        .bind(&schedule.payment_schedule_id)
        .bind(&schedule.original_payment_id)
        .bind(&schedule.rejection_code)
        .bind(&schedule.rejection_raw_code)
        .bind(&schedule.rejection_message)
        .bind(schedule.rejection_date)
        .bind(schedule.retry_policy_id)
        .bind(schedule.amount_cents)
        .bind(&schedule.currency)
        .bind(schedule.eligibility.as_str())
        .bind(&schedule.eligibility_reason)
        .bind(schedule.current_attempt)
        .bind(schedule.max_attempts)
        .bind(schedule.next_retry_date)
        .bind(schedule.is_resolved)
        .bind(&schedule.resolution_reason)
        .bind(schedule.resolved_at)
        .bind(&schedule.idempotency_key)
        .bind(schedule.created_at)
        .bind(schedule.updated_at)
        .fetch_optional(tx.as_mut())
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(None);
        };
        let inserted = schedule_from_row(&row)?;

        if let Some(attempt) = placeholder {
            RetryAttemptRepo::insert_tx(&mut tx, attempt).await?;
        }
        tx.commit().await?;
        Ok(Some(inserted))
    }

    async fn get(&self, id: Uuid) -> Result<Option<RetrySchedule>> {
        let row = sqlx::query(&format!("SELECT {SCHEDULE_COLUMNS} FROM retry_schedule WHERE id=$1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(schedule_from_row).transpose()
    }

    async fn list(&self, filter: &ScheduleFilter) -> Result<Page<RetrySchedule>> {
        let (page, limit, offset) = paging(filter.page, filter.limit);

        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) AS n FROM retry_schedule");
        push_filter(&mut count, filter);
        let total: i64 = count.build().fetch_one(&self.pool).await?.get("n");

        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {SCHEDULE_COLUMNS} FROM retry_schedule"));
        push_filter(&mut qb, filter);
        qb.push(" ORDER BY created_at DESC LIMIT ")
            .push_bind(i64::from(limit))
            .push(" OFFSET ")
            .push_bind(i64::from(offset));
        let rows = qb.build().fetch_all(&self.pool).await?;

        Ok(Page {
            items: rows.iter().map(schedule_from_row).collect::<Result<Vec<_>>>()?,
            total,
            page,
            limit,
        })
    }

    async fn find_due(
        &self,
        organisation_id: &str,
        cutoff: DateTime<Utc>,
        only: Option<Uuid>,
    ) -> Result<Vec<RetrySchedule>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {SCHEDULE_COLUMNS} FROM retry_schedule
            WHERE organisation_id = $1
              AND eligibility = 'ELIGIBLE'
              AND is_resolved = false
              AND next_retry_date <= $2
              AND ($3::uuid IS NULL OR id = $3)
              AND (claimed_by_job_id IS NULL OR claim_expires_at <= now())
            ORDER BY next_retry_date ASC, created_at ASC
            "#
        ))
        .bind(organisation_id)
        .bind(cutoff)
        .bind(only)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(schedule_from_row).collect()
    }

    async fn claim_due(
        &self,
        organisation_id: &str,
        cutoff: DateTime<Utc>,
        job_id: Uuid,
        ttl: Duration,
        only: Option<Uuid>,
    ) -> Result<Vec<RetrySchedule>> {
        let ttl_secs = ttl.as_secs_f64();
        // Rows locked by a concurrent claimer are skipped, never waited on.
        let rows = sqlx::query(&format!(
            r#"
            WITH due AS (
                SELECT id AS due_id FROM retry_schedule
                WHERE organisation_id = $1
                  AND eligibility = 'ELIGIBLE'
                  AND is_resolved = false
                  AND next_retry_date <= $2
                  AND ($5::uuid IS NULL OR id = $5)
                  AND (claimed_by_job_id IS NULL OR claim_expires_at <= now())
                ORDER BY next_retry_date ASC, created_at ASC
                FOR UPDATE SKIP LOCKED
            )
            UPDATE retry_schedule s
            SET claimed_by_job_id = $3,
                claim_expires_at = now() + make_interval(secs => $4)
            FROM due
            WHERE s.id = due.due_id
            RETURNING {SCHEDULE_COLUMNS}
            "#
        ))
        .bind(organisation_id)
        .bind(cutoff)
        .bind(job_id)
        .bind(ttl_secs)
        .bind(only)
        .fetch_all(&self.pool)
        .await
        .map_err(RetryError::from_lock_error)?;

        let mut claimed = rows.iter().map(schedule_from_row).collect::<Result<Vec<_>>>()?;
        claimed.sort_by_key(|s| (s.next_retry_date, s.created_at));
        Ok(claimed)
    }

    async fn release_claim(&self, id: Uuid, job_id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE retry_schedule SET claimed_by_job_id=NULL, claim_expires_at=NULL WHERE id=$1 AND claimed_by_job_id=$2",
        )
        .bind(id)
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn save(&self, schedule: &RetrySchedule) -> Result<()> {
        if self.write(schedule, false).await? == 0 {
            return Err(RetryError::ScheduleNotFound(schedule.id));
        }
        Ok(())
    }

    async fn save_unclaimed(&self, schedule: &RetrySchedule) -> Result<()> {
        if self.write(schedule, true).await? > 0 {
            return Ok(());
        }
        match ScheduleStore::get(self, schedule.id).await? {
            Some(_) => Err(RetryError::ClaimConflict(format!(
                "retry schedule {} is held by a running job",
                schedule.id
            ))),
            None => Err(RetryError::ScheduleNotFound(schedule.id)),
        }
    }

    async fn organisations_with_open_schedules(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT organisation_id FROM retry_schedule
            WHERE eligibility = 'ELIGIBLE' AND is_resolved = false
            ORDER BY organisation_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|r| r.get("organisation_id")).collect())
    }

    async fn statistics(&self, organisation_id: &str) -> Result<ScheduleStatistics> {
        let totals = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                COUNT(*) FILTER (WHERE eligibility = 'ELIGIBLE' AND is_resolved = false) AS eligible_open,
                COUNT(*) FILTER (WHERE is_resolved = true) AS resolved,
                COALESCE(AVG(current_attempt) FILTER (
                    WHERE is_resolved = true AND resolution_reason = $2
                ), 0)::float8 AS avg_success
            FROM retry_schedule
            WHERE organisation_id = $1
            "#,
        )
        .bind(organisation_id)
        .bind(RESOLUTION_RETRY_SUCCEEDED)
        .fetch_one(&self.pool)
        .await?;

        let rows = sqlx::query(
            r#"
            SELECT eligibility, COUNT(*) AS n FROM retry_schedule
            WHERE organisation_id = $1
            GROUP BY eligibility
            ORDER BY eligibility
            "#,
        )
        .bind(organisation_id)
        .fetch_all(&self.pool)
        .await?;

        let mut by_eligibility = Vec::with_capacity(rows.len());
        for row in rows {
            by_eligibility.push(EligibilityCount {
                eligibility: row.get::<String, _>("eligibility").parse()?,
                count: row.get("n"),
            });
        }

        let total: i64 = totals.get("total");
        let resolved: i64 = totals.get("resolved");
        Ok(ScheduleStatistics {
            total,
            eligible_open: totals.get("eligible_open"),
            resolved,
            pending: total - resolved,
            by_eligibility,
            avg_attempts_before_success: totals.get("avg_success"),
        })
    }
}
