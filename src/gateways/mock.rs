use crate::error::RetryError;
use crate::gateways::{PaymentExecutionResult, PaymentExecutor, RetryPaymentContext};
use anyhow::{anyhow, Result};
use std::collections::{HashMap, VecDeque};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockBehavior {
    AlwaysSuccess,
    AlwaysFailure,
    AlwaysError,
}

impl FromStr for MockBehavior {
    type Err = RetryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "ALWAYS_SUCCESS" => Ok(MockBehavior::AlwaysSuccess),
            "ALWAYS_FAILURE" => Ok(MockBehavior::AlwaysFailure),
            "ALWAYS_ERROR" => Ok(MockBehavior::AlwaysError),
            other => Err(RetryError::InvalidValue {
                kind: "mock behavior",
                value: other.to_string(),
            }),
        }
    }
}

/// In-process stand-in for the payment collaborator.
///
/// Behaviour can be overridden per original payment id with a script; the last
/// scripted step repeats once the script is used up.
pub struct MockPaymentExecutor {
    behavior: MockBehavior,
    scripts: Mutex<HashMap<String, VecDeque<MockBehavior>>>,
    latency: Option<Duration>,
    calls: AtomicUsize,
    seen: Mutex<Vec<RetryPaymentContext>>,
}

impl MockPaymentExecutor {
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            scripts: Mutex::new(HashMap::new()),
            latency: None,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn script(self, original_payment_id: &str, steps: Vec<MockBehavior>) -> Self {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts.insert(original_payment_id.to_string(), steps.into());
        }
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<RetryPaymentContext> {
        self.seen.lock().map(|s| s.clone()).unwrap_or_default()
    }

    fn next_behavior(&self, payment_id: &str) -> MockBehavior {
        let Ok(mut scripts) = self.scripts.lock() else {
            return self.behavior;
        };
        match scripts.get_mut(payment_id) {
            Some(steps) if steps.len() > 1 => steps.pop_front().unwrap_or(self.behavior),
            Some(steps) => steps.front().copied().unwrap_or(self.behavior),
            None => self.behavior,
        }
    }
}

#[async_trait::async_trait]
impl PaymentExecutor for MockPaymentExecutor {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn execute(&self, context: &RetryPaymentContext) -> Result<PaymentExecutionResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(context.clone());
        }
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        match self.next_behavior(&context.original_payment_id) {
            MockBehavior::AlwaysSuccess => Ok(PaymentExecutionResult::succeeded(format!(
                "mock_psp_{}",
                uuid::Uuid::new_v4()
            ))),
            MockBehavior::AlwaysFailure => Ok(PaymentExecutionResult::declined(
                "MOCK_DECLINED",
                "mock decline",
                Some("AM04".to_string()),
            )),
            MockBehavior::AlwaysError => Err(anyhow!("mock executor crashed")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_behaviour_names() {
        assert_eq!("always_failure".parse::<MockBehavior>().unwrap(), MockBehavior::AlwaysFailure);
        assert!("SOMETIMES".parse::<MockBehavior>().is_err());
    }

    #[test]
    fn script_steps_then_repeats_last() {
        let mock = MockPaymentExecutor::new(MockBehavior::AlwaysSuccess).script(
            "pay-1",
            vec![MockBehavior::AlwaysFailure, MockBehavior::AlwaysError],
        );
        assert_eq!(mock.next_behavior("pay-1"), MockBehavior::AlwaysFailure);
        assert_eq!(mock.next_behavior("pay-1"), MockBehavior::AlwaysError);
        assert_eq!(mock.next_behavior("pay-1"), MockBehavior::AlwaysError);
        assert_eq!(mock.next_behavior("pay-2"), MockBehavior::AlwaysSuccess);
    }
}
