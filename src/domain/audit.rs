use crate::error::RetryError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditActorType {
    Webhook,
    Scheduler,
    Manual,
    Api,
}

impl AuditActorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditActorType::Webhook => "WEBHOOK",
            AuditActorType::Scheduler => "SCHEDULER",
            AuditActorType::Manual => "MANUAL",
            AuditActorType::Api => "API",
        }
    }
}

impl FromStr for AuditActorType {
    type Err = RetryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "WEBHOOK" => Ok(AuditActorType::Webhook),
            "SCHEDULER" => Ok(AuditActorType::Scheduler),
            "MANUAL" => Ok(AuditActorType::Manual),
            "API" => Ok(AuditActorType::Api),
            other => Err(RetryError::InvalidValue {
                kind: "actor type",
                value: other.to_string(),
            }),
        }
    }
}

/// Who caused a transition: the actor kind plus an optional operator/source id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditActor {
    pub kind: AuditActorType,
    pub id: Option<String>,
}

impl AuditActor {
    pub fn new(kind: AuditActorType, id: Option<&str>) -> Self {
        Self {
            kind,
            id: id.map(str::to_string),
        }
    }

    pub fn scheduler() -> Self {
        Self::new(AuditActorType::Scheduler, None)
    }
}

pub const ENTITY_SCHEDULE: &str = "RETRY_SCHEDULE";
pub const ENTITY_ATTEMPT: &str = "RETRY_ATTEMPT";
pub const ENTITY_JOB: &str = "RETRY_JOB";

pub const ACTION_CREATED: &str = "CREATED";
pub const ACTION_STARTED: &str = "STARTED";
pub const ACTION_SUCCEEDED: &str = "SUCCEEDED";
pub const ACTION_FAILED: &str = "FAILED";
pub const ACTION_RESCHEDULED: &str = "RESCHEDULED";
pub const ACTION_RESOLVED: &str = "RESOLVED";
pub const ACTION_CANCELLED: &str = "CANCELLED";
pub const ACTION_REPLANNED: &str = "REPLANNED";
pub const ACTION_COMPLETED: &str = "COMPLETED";

/// Append-only; `seq` is assigned by the store and orders entries per entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub seq: i64,
    pub organisation_id: String,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub action: String,
    pub old_value: Option<serde_json::Value>,
    pub new_value: serde_json::Value,
    pub retry_schedule_id: Option<Uuid>,
    pub retry_attempt_id: Option<Uuid>,
    pub payment_id: Option<String>,
    pub actor_type: AuditActorType,
    pub actor_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl AuditLogEntry {
    pub fn new(
        organisation_id: &str,
        entity_type: &str,
        entity_id: Uuid,
        action: &str,
        actor_type: AuditActorType,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            seq: 0,
            organisation_id: organisation_id.to_string(),
            entity_type: entity_type.to_string(),
            entity_id,
            action: action.to_string(),
            old_value: None,
            new_value: serde_json::Value::Null,
            retry_schedule_id: None,
            retry_attempt_id: None,
            payment_id: None,
            actor_type,
            actor_id: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_values<B: Serialize, A: Serialize>(mut self, before: Option<&B>, after: &A) -> Self {
        self.old_value = before.and_then(|b| serde_json::to_value(b).ok());
        self.new_value = serde_json::to_value(after).unwrap_or(serde_json::Value::Null);
        self
    }

    pub fn for_schedule(mut self, schedule_id: Uuid) -> Self {
        self.retry_schedule_id = Some(schedule_id);
        self
    }

    pub fn for_attempt(mut self, attempt_id: Uuid) -> Self {
        self.retry_attempt_id = Some(attempt_id);
        self
    }

    pub fn payment(mut self, payment_id: &str) -> Self {
        self.payment_id = Some(payment_id.to_string());
        self
    }

    pub fn actor(mut self, actor_id: Option<&str>) -> Self {
        self.actor_id = actor_id.map(str::to_string);
        self
    }

    pub fn by(mut self, actor: &AuditActor) -> Self {
        self.actor_type = actor.kind;
        self.actor_id = actor.id.clone();
        self
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditFilter {
    #[serde(default)]
    pub organisation_id: String,
    pub entity_type: Option<String>,
    pub entity_id: Option<Uuid>,
    pub action: Option<String>,
    pub limit: Option<u32>,
}

impl AuditFilter {
    pub fn matches(&self, e: &AuditLogEntry) -> bool {
        e.organisation_id == self.organisation_id
            && self.entity_type.as_ref().map_or(true, |v| &e.entity_type == v)
            && self.entity_id.map_or(true, |v| e.entity_id == v)
            && self.action.as_ref().map_or(true, |v| &e.action == v)
    }
}
