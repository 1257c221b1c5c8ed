use crate::domain::policy::RetryPolicy;
use crate::error::Result;
use crate::repo::ports::PolicyStore;
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

#[derive(Clone)]
pub struct RetryPolicyRepo {
    pub pool: PgPool,
}

const POLICY_COLUMNS: &str = "id, organisation_id, scope_id, name, max_attempts, retry_delays_days, \
     retryable_codes, non_retryable_codes, retry_on_am04, is_active, is_default, priority, \
     created_at, updated_at";

fn policy_from_row(row: &PgRow) -> RetryPolicy {
    RetryPolicy {
        id: row.get("id"),
        organisation_id: row.get("organisation_id"),
        scope_id: row.get("scope_id"),
        name: row.get("name"),
        max_attempts: row.get("max_attempts"),
        retry_delays_days: row.get("retry_delays_days"),
        retryable_codes: row.get("retryable_codes"),
        non_retryable_codes: row.get("non_retryable_codes"),
        retry_on_am04: row.get("retry_on_am04"),
        is_active: row.get("is_active"),
        is_default: row.get("is_default"),
        priority: row.get("priority"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

#[async_trait]
impl PolicyStore for RetryPolicyRepo {
    async fn list_active(&self, organisation_id: &str) -> Result<Vec<RetryPolicy>> {
        let rows = sqlx::query(&format!(
            "SELECT {POLICY_COLUMNS} FROM retry_policy WHERE organisation_id=$1 AND is_active = true"
        ))
        .bind(organisation_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(policy_from_row).collect())
    }

    async fn list_all(&self, organisation_id: &str) -> Result<Vec<RetryPolicy>> {
        let rows = sqlx::query(&format!(
            "SELECT {POLICY_COLUMNS} FROM retry_policy WHERE organisation_id=$1 ORDER BY priority DESC, name ASC"
        ))
        .bind(organisation_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(policy_from_row).collect())
    }

    async fn get(&self, id: Uuid) -> Result<Option<RetryPolicy>> {
        let row = sqlx::query(&format!("SELECT {POLICY_COLUMNS} FROM retry_policy WHERE id=$1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(policy_from_row))
    }

    async fn upsert(&self, policy: &RetryPolicy) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO retry_policy (
                id, organisation_id, scope_id, name, max_attempts, retry_delays_days,
                retryable_codes, non_retryable_codes, retry_on_am04, is_active, is_default,
                priority, created_at, updated_at
            )
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14)
            ON CONFLICT (id) DO UPDATE SET
                scope_id=EXCLUDED.scope_id,
                name=EXCLUDED.name,
                max_attempts=EXCLUDED.max_attempts,
                retry_delays_days=EXCLUDED.retry_delays_days,
                retryable_codes=EXCLUDED.retryable_codes,
                non_retryable_codes=EXCLUDED.non_retryable_codes,
                retry_on_am04=EXCLUDED.retry_on_am04,
                is_active=EXCLUDED.is_active,
                is_default=EXCLUDED.is_default,
                priority=EXCLUDED.priority,
                updated_at=EXCLUDED.updated_at
            "#,
        )
        .bind(policy.id)
        .bind(&policy.organisation_id)
        .bind(&policy.scope_id)
        .bind(&policy.name)
        .bind(policy.max_attempts)
        .bind(&policy.retry_delays_days)
        .bind(&policy.retryable_codes)
        .bind(&policy.non_retryable_codes)
        .bind(policy.retry_on_am04)
        .bind(policy.is_active)
        .bind(policy.is_default)
        .bind(policy.priority)
        .bind(policy.created_at)
        .bind(policy.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
