use crate::domain::policy::RetryPolicy;
use crate::domain::schedule::RetryEligibility;
use crate::eligibility::taxonomy::ReasonCodeTaxonomy;
use serde::Serialize;
use std::sync::Arc;

pub const ACCOUNT_CLOSED_CODE: &str = "AM04_ACCOUNT_CLOSED";
pub const IBAN_INVALID_CODE: &str = "AC01_IBAN_INVALID";

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EligibilityDecision {
    pub eligibility: RetryEligibility,
    pub reason: String,
    pub canonical_code: String,
    pub taxonomy_version: String,
}

/// Maps a raw bank/PSP rejection code onto its canonical form.
pub fn normalize_reason_code(raw: &str) -> String {
    let code = raw.trim().to_uppercase();
    if code == "AM04" || code.contains("ACCOUNT_CLOSED") || code.contains("CLOSED") {
        return ACCOUNT_CLOSED_CODE.to_string();
    }
    if code == "AC01" || code.contains("IBAN_INVALID") || code.contains("INCORRECT_IBAN") {
        return IBAN_INVALID_CODE.to_string();
    }
    code
}

#[derive(Debug, Clone, Default)]
pub struct EligibilityClassifier {
    taxonomy: Arc<ReasonCodeTaxonomy>,
}

impl EligibilityClassifier {
    pub fn new(taxonomy: ReasonCodeTaxonomy) -> Self {
        Self {
            taxonomy: Arc::new(taxonomy),
        }
    }

    pub fn taxonomy(&self) -> &ReasonCodeTaxonomy {
        &self.taxonomy
    }

    /// First matching rule wins; anything not explicitly retryable is denied.
    pub fn classify(&self, raw_code: &str, policy: &RetryPolicy) -> EligibilityDecision {
        let code = normalize_reason_code(raw_code);
        let listed = |codes: &[String]| codes.iter().any(|c| c == &code);

        let (eligibility, reason) =
            if listed(&policy.non_retryable_codes) || self.taxonomy.is_non_retryable(&code) {
                (
                    RetryEligibility::NotEligibleReasonCode,
                    format!("rejection code {raw_code} is non-retryable"),
                )
            } else if code == ACCOUNT_CLOSED_CODE && policy.retry_on_am04 {
                (
                    RetryEligibility::Eligible,
                    "closed-account rejection is eligible for retry per policy".to_string(),
                )
            } else if listed(&policy.retryable_codes) || self.taxonomy.is_retryable(&code) {
                (
                    RetryEligibility::Eligible,
                    format!("rejection code {raw_code} is configured as retryable"),
                )
            } else {
                (
                    RetryEligibility::NotEligibleReasonCode,
                    format!("rejection code {raw_code} is not configured for retry"),
                )
            };

        EligibilityDecision {
            eligibility,
            reason,
            canonical_code: code,
            taxonomy_version: self.taxonomy.version.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_closed_and_iban_variants() {
        assert_eq!(normalize_reason_code("account_closed"), ACCOUNT_CLOSED_CODE);
        assert_eq!(normalize_reason_code(" AM04 "), ACCOUNT_CLOSED_CODE);
        assert_eq!(normalize_reason_code("AC04_CLOSED"), ACCOUNT_CLOSED_CODE);
        assert_eq!(normalize_reason_code("incorrect_iban"), IBAN_INVALID_CODE);
        assert_eq!(normalize_reason_code("AC01"), IBAN_INVALID_CODE);
        assert_eq!(normalize_reason_code(" ms02_not_specified_reason"), "MS02_NOT_SPECIFIED_REASON");
    }
}
