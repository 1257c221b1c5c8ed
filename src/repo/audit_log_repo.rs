use crate::domain::audit::{AuditFilter, AuditLogEntry};
use crate::error::Result;
use crate::repo::ports::AuditStore;
use async_trait::async_trait;
use sqlx::{PgPool, Row};

#[derive(Clone)]
pub struct AuditLogRepo {
    pub pool: PgPool,
}

#[async_trait]
impl AuditStore for AuditLogRepo {
    async fn append(&self, entry: &AuditLogEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO retry_audit_log (
                id, organisation_id, entity_type, entity_id, action, old_value, new_value,
                retry_schedule_id, retry_attempt_id, payment_id, actor_type, actor_id, timestamp
            )
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13)
            "#,
        )
        .bind(entry.id)
        .bind(&entry.organisation_id)
        .bind(&entry.entity_type)
        .bind(entry.entity_id)
        .bind(&entry.action)
        .bind(&entry.old_value)
        .bind(&entry.new_value)
        .bind(entry.retry_schedule_id)
        .bind(entry.retry_attempt_id)
        .bind(&entry.payment_id)
        .bind(entry.actor_type.as_str())
        .bind(&entry.actor_id)
        .bind(entry.timestamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list(&self, filter: &AuditFilter) -> Result<Vec<AuditLogEntry>> {
        let limit = i64::from(filter.limit.unwrap_or(100).clamp(1, 1000));
        let rows = sqlx::query(
            r#"
            SELECT seq, id, organisation_id, entity_type, entity_id, action, old_value, new_value,
                   retry_schedule_id, retry_attempt_id, payment_id, actor_type, actor_id, timestamp
            FROM retry_audit_log
            WHERE organisation_id = $1
              AND ($2::text IS NULL OR entity_type = $2)
              AND ($3::uuid IS NULL OR entity_id = $3)
              AND ($4::text IS NULL OR action = $4)
            ORDER BY seq DESC
            LIMIT $5
            "#,
        )
        .bind(&filter.organisation_id)
        .bind(&filter.entity_type)
        .bind(filter.entity_id)
        .bind(&filter.action)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for r in rows {
            entries.push(AuditLogEntry {
                id: r.get("id"),
                seq: r.get("seq"),
                organisation_id: r.get("organisation_id"),
                entity_type: r.get("entity_type"),
                entity_id: r.get("entity_id"),
                action: r.get("action"),
                old_value: r.get("old_value"),
                new_value: r.get("new_value"),
                retry_schedule_id: r.get("retry_schedule_id"),
                retry_attempt_id: r.get("retry_attempt_id"),
                payment_id: r.get("payment_id"),
                actor_type: r.get::<String, _>("actor_type").parse()?,
                actor_id: r.get("actor_id"),
                timestamp: r.get("timestamp"),
            });
        }
        Ok(entries)
    }
}
