use anyhow::Result;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod http;
pub mod mock;

/// What the payment collaborator needs to re-present one rejected debit.
#[derive(Debug, Clone, Serialize)]
pub struct RetryPaymentContext {
    pub retry_schedule_id: Uuid,
    pub attempt_number: i32,
    pub idempotency_key: String,
    pub organisation_id: String,
    pub client_id: String,
    pub contract_id: Option<String>,
    pub invoice_id: Option<String>,
    pub original_payment_id: String,
    pub amount_cents: i64,
    pub currency: String,
}

/// Business outcome of a charge; transport failures are `Err` instead.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaymentExecutionResult {
    pub success: bool,
    #[serde(default)]
    pub psp_payment_id: Option<String>,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub new_rejection_code: Option<String>,
}

impl PaymentExecutionResult {
    pub fn succeeded(psp_payment_id: impl Into<String>) -> Self {
        Self {
            success: true,
            psp_payment_id: Some(psp_payment_id.into()),
            error_code: None,
            error_message: None,
            new_rejection_code: None,
        }
    }

    pub fn declined(
        error_code: impl Into<String>,
        error_message: impl Into<String>,
        new_rejection_code: Option<String>,
    ) -> Self {
        Self {
            success: false,
            psp_payment_id: None,
            error_code: Some(error_code.into()),
            error_message: Some(error_message.into()),
            new_rejection_code,
        }
    }
}

#[async_trait::async_trait]
pub trait PaymentExecutor: Send + Sync {
    fn name(&self) -> &'static str;

    async fn execute(&self, context: &RetryPaymentContext) -> Result<PaymentExecutionResult>;
}

/// Builds the collaborator selected by `PAYMENT_EXECUTOR_MODE`.
pub fn from_config(cfg: &crate::config::AppConfig) -> crate::error::Result<std::sync::Arc<dyn PaymentExecutor>> {
    use crate::config::ExecutorMode;
    Ok(match cfg.executor_mode {
        ExecutorMode::Mock => {
            let behavior = cfg.mock_behavior.parse::<mock::MockBehavior>()?;
            tracing::warn!(behavior = ?behavior, "using mock payment executor");
            std::sync::Arc::new(mock::MockPaymentExecutor::new(behavior))
        }
        ExecutorMode::Http => std::sync::Arc::new(http::HttpPaymentExecutor {
            base_url: cfg.executor_url.clone(),
            api_key: cfg.executor_api_key.clone(),
            timeout_ms: cfg.executor_timeout_ms,
            client: reqwest::Client::new(),
        }),
    })
}
