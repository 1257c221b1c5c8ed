use crate::domain::audit::{AuditFilter, AuditLogEntry};
use crate::error::{Result, RetryError};
use crate::repo::ports::AuditStore;
use std::sync::Arc;

#[derive(Clone)]
pub struct AuditLogger {
    pub store: Arc<dyn AuditStore>,
}

impl AuditLogger {
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self { store }
    }

    /// Appends an entry. A failed write is logged and swallowed; the state
    /// change it describes has already been committed.
    pub async fn record(&self, entry: AuditLogEntry) {
        if let Err(err) = self.store.append(&entry).await {
            tracing::warn!(
                entity_type = %entry.entity_type,
                entity_id = %entry.entity_id,
                action = %entry.action,
                "audit append failed: {}",
                err
            );
        }
    }

    pub async fn list(&self, filter: &AuditFilter) -> Result<Vec<AuditLogEntry>> {
        if filter.organisation_id.trim().is_empty() {
            return Err(RetryError::InvalidRequest("organisation_id is required".to_string()));
        }
        self.store.list(filter).await
    }
}
