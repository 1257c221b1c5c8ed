use crate::config::AppConfig;
use crate::domain::dates::RetryCalendar;
use crate::eligibility::classifier::EligibilityClassifier;
use crate::eligibility::taxonomy::ReasonCodeTaxonomy;
use crate::error::Result;
use crate::gateways::PaymentExecutor;
use crate::repo::ports::RetryStores;
use crate::service::attempt_executor::RetryAttemptExecutor;
use crate::service::batch_orchestrator::BatchOrchestrator;
use crate::service::schedule_manager::RetryScheduleManager;
use std::sync::Arc;
use std::time::Duration;

/// The services of the retry engine wired over one set of stores.
#[derive(Clone)]
pub struct RetryEngine {
    pub stores: RetryStores,
    pub schedule_manager: RetryScheduleManager,
    pub executor: RetryAttemptExecutor,
    pub orchestrator: BatchOrchestrator,
}

impl RetryEngine {
    pub fn new(
        stores: RetryStores,
        taxonomy: ReasonCodeTaxonomy,
        calendar: RetryCalendar,
        payments: Arc<dyn PaymentExecutor>,
        claim_ttl: Duration,
        timezone: &str,
    ) -> Self {
        let schedule_manager =
            RetryScheduleManager::new(stores.clone(), EligibilityClassifier::new(taxonomy), calendar);
        let executor = RetryAttemptExecutor::new(stores.clone(), calendar, payments);
        let orchestrator = BatchOrchestrator::new(stores.clone(), executor.clone(), claim_ttl, timezone);
        Self {
            stores,
            schedule_manager,
            executor,
            orchestrator,
        }
    }

    pub fn from_config(cfg: &AppConfig, stores: RetryStores, payments: Arc<dyn PaymentExecutor>) -> Result<Self> {
        let taxonomy = ReasonCodeTaxonomy::load(cfg.taxonomy_path.as_deref())?;
        let calendar = RetryCalendar::from_names(&cfg.retry_timezone, &cfg.retry_time_of_day)?;
        tracing::info!(
            taxonomy_version = %taxonomy.version,
            timezone = %cfg.retry_timezone,
            executor = payments.name(),
            "retry engine configured"
        );
        Ok(Self::new(
            stores,
            taxonomy,
            calendar,
            payments,
            cfg.claim_ttl(),
            &cfg.retry_timezone,
        ))
    }
}
