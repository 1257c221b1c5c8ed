mod common;

use common::policy;
use payments_retry::domain::schedule::RetryEligibility;
use payments_retry::eligibility::classifier::EligibilityClassifier;
use payments_retry::eligibility::taxonomy::ReasonCodeTaxonomy;
use std::io::Write;

#[test]
fn unlisted_code_is_denied() {
    let classifier = EligibilityClassifier::new(ReasonCodeTaxonomy::default());
    let decision = classifier.classify("XT99_SOMETHING_ELSE", &policy(3, &[1], &[], false));

    assert_eq!(decision.eligibility, RetryEligibility::NotEligibleReasonCode);
    assert_eq!(decision.canonical_code, "XT99_SOMETHING_ELSE");
}

#[test]
fn default_retryable_table_applies_without_policy_lists() {
    let classifier = EligibilityClassifier::new(ReasonCodeTaxonomy::default());
    let decision = classifier.classify("ms03_agent_reason", &policy(3, &[1], &[], false));

    assert_eq!(decision.eligibility, RetryEligibility::Eligible);
    assert_eq!(decision.taxonomy_version, "2024-01");
}

#[test]
fn non_retryable_beats_every_allow_rule() {
    let classifier = EligibilityClassifier::new(ReasonCodeTaxonomy::empty("test"));
    let mut p = policy(3, &[1], &["AM04_ACCOUNT_CLOSED"], true);
    p.non_retryable_codes = vec!["AM04_ACCOUNT_CLOSED".to_string()];

    let decision = classifier.classify("ACCOUNT_CLOSED", &p);
    assert_eq!(decision.eligibility, RetryEligibility::NotEligibleReasonCode);
}

#[test]
fn closed_account_needs_explicit_opt_in() {
    let classifier = EligibilityClassifier::new(ReasonCodeTaxonomy::empty("test"));

    let denied = classifier.classify("AM04", &policy(3, &[1], &[], false));
    assert_eq!(denied.eligibility, RetryEligibility::NotEligibleReasonCode);

    let allowed = classifier.classify("AM04", &policy(3, &[1], &[], true));
    assert_eq!(allowed.eligibility, RetryEligibility::Eligible);
    assert_eq!(allowed.canonical_code, "AM04_ACCOUNT_CLOSED");
}

#[test]
fn policy_retryable_list_extends_the_table() {
    let classifier = EligibilityClassifier::new(ReasonCodeTaxonomy::empty("test"));
    let decision = classifier.classify(" md07_end_customer_deceased ", &policy(3, &[1], &["MD07_END_CUSTOMER_DECEASED"], false));
    assert_eq!(decision.eligibility, RetryEligibility::Eligible);
}

#[test]
fn taxonomy_loads_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{"version":"2025-03","retryable":["ms02_not_specified_reason"],"non_retryable":["AM05_DUPLICATION"]}}"#
    )
    .unwrap();

    let taxonomy = ReasonCodeTaxonomy::load(file.path().to_str()).unwrap();
    assert_eq!(taxonomy.version, "2025-03");
    assert!(taxonomy.is_retryable("MS02_NOT_SPECIFIED_REASON"));

    let classifier = EligibilityClassifier::new(taxonomy);
    let decision = classifier.classify("MS03_AGENT_REASON", &policy(3, &[1], &[], false));
    assert_eq!(decision.eligibility, RetryEligibility::NotEligibleReasonCode);
    assert_eq!(decision.taxonomy_version, "2025-03");
}

#[test]
fn taxonomy_with_overlapping_lists_is_rejected() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{"version":"bad","retryable":["AC06"],"non_retryable":["ac06"]}}"#
    )
    .unwrap();

    assert!(ReasonCodeTaxonomy::from_file(file.path()).is_err());
    assert!(ReasonCodeTaxonomy::load(Some("/nonexistent/taxonomy.json")).is_err());
    assert_eq!(ReasonCodeTaxonomy::load(None).unwrap(), ReasonCodeTaxonomy::default());
}
