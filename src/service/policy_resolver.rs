use crate::domain::policy::{RetryPolicy, UpsertRetryPolicy};
use crate::error::{Result, RetryError};
use crate::repo::ports::PolicyStore;
use chrono::Utc;
use std::cmp::Reverse;
use std::sync::Arc;
use uuid::Uuid;

/// Picks the policy that governs a rejection in `scope_id`.
///
/// Candidates are the scope's own policies and the organisation-wide ones.
/// A scoped policy beats an unscoped one; ties go to higher `priority`, then
/// `is_default`, then the most recently updated.
pub fn select_applicable<'a>(policies: &'a [RetryPolicy], scope_id: Option<&str>) -> Option<&'a RetryPolicy> {
    policies
        .iter()
        .filter(|p| p.is_active)
        .filter(|p| match (&p.scope_id, scope_id) {
            (None, _) => true,
            (Some(own), Some(wanted)) => own == wanted,
            (Some(_), None) => false,
        })
        .min_by_key(|p| {
            (
                p.scope_id.is_none(),
                Reverse(p.priority),
                !p.is_default,
                Reverse(p.updated_at),
            )
        })
}

#[derive(Clone)]
pub struct RetryPolicyResolver {
    pub policies: Arc<dyn PolicyStore>,
}

impl RetryPolicyResolver {
    pub fn new(policies: Arc<dyn PolicyStore>) -> Self {
        Self { policies }
    }

    pub async fn resolve(&self, organisation_id: &str, scope_id: Option<&str>) -> Result<Option<RetryPolicy>> {
        let candidates = self.policies.list_active(organisation_id).await?;
        Ok(select_applicable(&candidates, scope_id).cloned())
    }

    pub async fn get(&self, id: Uuid) -> Result<RetryPolicy> {
        self.policies.get(id).await?.ok_or(RetryError::PolicyNotFound(id))
    }

    pub async fn list(&self, organisation_id: &str) -> Result<Vec<RetryPolicy>> {
        self.policies.list_all(organisation_id).await
    }

    pub async fn upsert(&self, input: UpsertRetryPolicy) -> Result<RetryPolicy> {
        input.validate()?;
        let created_at = match input.id {
            Some(id) => match self.policies.get(id).await? {
                Some(existing) if existing.organisation_id != input.organisation_id => {
                    return Err(RetryError::InvalidRequest(format!(
                        "retry policy {id} belongs to another organisation"
                    )));
                }
                Some(existing) => Some(existing.created_at),
                None => None,
            },
            None => None,
        };

        let policy = input.into_policy(Utc::now(), created_at);
        self.policies.upsert(&policy).await?;
        tracing::info!(
            policy_id = %policy.id,
            organisation_id = %policy.organisation_id,
            "retry policy saved"
        );
        Ok(policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn policy(name: &str, scope: Option<&str>, priority: i32, is_default: bool) -> RetryPolicy {
        let now = Utc::now();
        RetryPolicy {
            id: Uuid::new_v4(),
            organisation_id: "org-1".to_string(),
            scope_id: scope.map(str::to_string),
            name: name.to_string(),
            max_attempts: 3,
            retry_delays_days: vec![2, 5, 10],
            retryable_codes: vec![],
            non_retryable_codes: vec![],
            retry_on_am04: false,
            is_active: true,
            is_default,
            priority,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn scoped_policy_beats_higher_priority_unscoped() {
        let policies = vec![
            policy("org-wide", None, 100, true),
            policy("shop", Some("shop-1"), 0, false),
        ];
        assert_eq!(select_applicable(&policies, Some("shop-1")).unwrap().name, "shop");
        assert_eq!(select_applicable(&policies, Some("shop-2")).unwrap().name, "org-wide");
        assert_eq!(select_applicable(&policies, None).unwrap().name, "org-wide");
    }

    #[test]
    fn ties_fall_back_to_priority_then_default_then_recency() {
        let mut older = policy("older", None, 1, false);
        older.updated_at = Utc::now() - Duration::days(1);
        let newer = policy("newer", None, 1, false);
        let default = policy("default", None, 1, true);
        let top = policy("top", None, 5, false);

        let mut policies = vec![older.clone(), newer.clone()];
        assert_eq!(select_applicable(&policies, None).unwrap().name, "newer");
        policies.push(default);
        assert_eq!(select_applicable(&policies, None).unwrap().name, "default");
        policies.push(top);
        assert_eq!(select_applicable(&policies, None).unwrap().name, "top");
    }

    #[test]
    fn inactive_and_foreign_scoped_policies_never_apply() {
        let mut inactive = policy("inactive", None, 0, true);
        inactive.is_active = false;
        let policies = vec![inactive, policy("other-shop", Some("shop-9"), 0, false)];
        assert!(select_applicable(&policies, Some("shop-1")).is_none());
    }
}
