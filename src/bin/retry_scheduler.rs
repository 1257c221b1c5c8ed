use anyhow::Result;
use chrono::Utc;
use payments_retry::config::AppConfig;
use payments_retry::domain::dates::{next_daily_run, parse_time_of_day, parse_timezone};
use payments_retry::repo::ports::RetryStores;
use payments_retry::service::engine::RetryEngine;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cfg = AppConfig::from_env();
    let tz = parse_timezone(&cfg.retry_timezone)?;
    let run_time = parse_time_of_day(&cfg.daily_run_time)?;
    let cutoff_time = run_time.format("%H:%M:%S").to_string();

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&cfg.database_url)
        .await?;

    let payments = payments_retry::gateways::from_config(&cfg)?;
    let engine = RetryEngine::from_config(&cfg, RetryStores::postgres(pool), payments)?;

    loop {
        let now = Utc::now();
        let next = next_daily_run(now, tz, run_time);
        tracing::info!(next_run = %next, timezone = %cfg.retry_timezone, "retry scheduler waiting");
        let wait = (next - now).to_std().unwrap_or_default();
        tokio::time::sleep(wait).await;

        let target_date = next.with_timezone(&tz).date_naive();
        match engine.orchestrator.run_scheduled(target_date, &cutoff_time).await {
            Ok(results) => {
                for r in &results {
                    tracing::info!(
                        job_id = %r.job_id,
                        status = r.status.as_str(),
                        processed = r.total_processed,
                        deduplicated = r.deduplicated,
                        "scheduled run done"
                    );
                }
            }
            Err(e) => tracing::error!("listing organisations for the daily run failed: {}", e),
        }
    }
}
