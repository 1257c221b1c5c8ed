use payments_retry::config::AppConfig;
use payments_retry::http::routes::router;
use payments_retry::repo::ports::RetryStores;
use payments_retry::service::engine::RetryEngine;
use payments_retry::AppState;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cfg = AppConfig::from_env();

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&cfg.database_url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    let payments = payments_retry::gateways::from_config(&cfg)?;
    let engine = RetryEngine::from_config(&cfg, RetryStores::postgres(pool.clone()), payments)?;

    let state = AppState {
        engine,
        pool: Some(pool),
    };
    let app = router(state, cfg.internal_api_key.clone());

    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr).await?;
    tracing::info!("listening on {}", cfg.bind_addr);
    axum::serve(listener, app).await?;
    Ok(())
}
