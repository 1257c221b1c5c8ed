use crate::gateways::{PaymentExecutionResult, PaymentExecutor, RetryPaymentContext};
use anyhow::{anyhow, Result};
use serde_json::json;

pub struct HttpPaymentExecutor {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout_ms: u64,
    pub client: reqwest::Client,
}

#[async_trait::async_trait]
impl PaymentExecutor for HttpPaymentExecutor {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn execute(&self, context: &RetryPaymentContext) -> Result<PaymentExecutionResult> {
        let url = format!("{}/v1/retry-charges", self.base_url.trim_end_matches('/'));
        let body = json!({
            "retry_schedule_id": context.retry_schedule_id,
            "attempt_number": context.attempt_number,
            "organisation_id": context.organisation_id,
            "client_id": context.client_id,
            "contract_id": context.contract_id,
            "invoice_id": context.invoice_id,
            "original_payment_id": context.original_payment_id,
            "amount_cents": context.amount_cents,
            "currency": context.currency,
        });

        let mut req = self
            .client
            .post(url)
            .header("Idempotency-Key", &context.idempotency_key)
            .json(&body)
            .timeout(std::time::Duration::from_millis(self.timeout_ms));
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        // Timeouts and transport errors leave the charge outcome unknown, so
        // they surface as errors rather than declines.
        let resp = req.send().await.map_err(|e| {
            if e.is_timeout() {
                anyhow!("payment executor timed out after {}ms", self.timeout_ms)
            } else {
                anyhow!("payment executor unreachable: {e}")
            }
        })?;

        let status = resp.status();
        if status.is_success() {
            let result: PaymentExecutionResult = resp.json().await?;
            return Ok(result);
        }

        let text = resp.text().await.unwrap_or_default();
        if status.is_client_error() {
            let rejection = serde_json::from_str::<serde_json::Value>(&text)
                .ok()
                .and_then(|v| v.get("rejection_code").and_then(|c| c.as_str()).map(str::to_string));
            return Ok(PaymentExecutionResult::declined(
                format!("HTTP_{}", status.as_u16()),
                text.chars().take(200).collect::<String>(),
                rejection,
            ));
        }

        Err(anyhow!(
            "payment executor returned HTTP {}: {}",
            status.as_u16(),
            text.chars().take(200).collect::<String>()
        ))
    }
}
