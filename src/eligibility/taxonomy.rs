use crate::error::{Result, RetryError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

pub const DEFAULT_TAXONOMY_VERSION: &str = "2024-01";

/// System-wide fallback lists of retryable and non-retryable reason codes.
///
/// Policies add to these lists; they never remove from them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReasonCodeTaxonomy {
    pub version: String,
    pub retryable: BTreeSet<String>,
    pub non_retryable: BTreeSet<String>,
}

impl Default for ReasonCodeTaxonomy {
    fn default() -> Self {
        Self {
            version: DEFAULT_TAXONOMY_VERSION.to_string(),
            retryable: [
                "AM04_ACCOUNT_CLOSED",
                "AC04_ACCOUNT_CLOSED",
                "AC06_ACCOUNT_BLOCKED",
                "AG01_TRANSACTION_FORBIDDEN",
                "MS02_NOT_SPECIFIED_REASON",
                "MS03_AGENT_REASON",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
            non_retryable: [
                "AC01_IBAN_INVALID",
                "AC13_DEBTOR_ACCOUNT_TYPE",
                "CNOR_CREDITOR_NOT_ON_WHITELIST",
                "DNOR_DEBTOR_NOT_ON_WHITELIST",
                "FF05_DUPLICATE_ENTRY",
                "FOCR_FOLLOWING_CANCELLATION",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
        }
    }
}

impl ReasonCodeTaxonomy {
    pub fn empty(version: &str) -> Self {
        Self {
            version: version.to_string(),
            retryable: BTreeSet::new(),
            non_retryable: BTreeSet::new(),
        }
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let mut taxonomy: ReasonCodeTaxonomy = serde_json::from_str(raw)?;
        taxonomy.retryable = canonical(taxonomy.retryable);
        taxonomy.non_retryable = canonical(taxonomy.non_retryable);
        if let Some(code) = taxonomy.retryable.intersection(&taxonomy.non_retryable).next() {
            return Err(RetryError::InvalidRequest(format!(
                "reason code {code} is listed as both retryable and non-retryable"
            )));
        }
        Ok(taxonomy)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            RetryError::InvalidRequest(format!(
                "cannot read taxonomy {}: {e}",
                path.as_ref().display()
            ))
        })?;
        Self::from_json(&raw)
    }

    /// Loads the override named by `path`, or the built-in table.
    pub fn load(path: Option<&str>) -> Result<Self> {
        match path {
            Some(p) if !p.trim().is_empty() => Self::from_file(p),
            _ => Ok(Self::default()),
        }
    }

    pub fn is_retryable(&self, code: &str) -> bool {
        self.retryable.contains(code)
    }

    pub fn is_non_retryable(&self, code: &str) -> bool {
        self.non_retryable.contains(code)
    }
}

fn canonical(codes: BTreeSet<String>) -> BTreeSet<String> {
    codes.into_iter().map(|c| c.trim().to_uppercase()).collect()
}
