use anyhow::Result;
use payments_retry::config::AppConfig;
use payments_retry::repo::ports::RetryStores;
use payments_retry::service::engine::RetryEngine;
use payments_retry::service::rejection_stream::{
    process_entry, read_backlog_next, stream_cursor, EntryDisposition, EVENT_FIELD,
};
use redis::streams::StreamReadReply;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cfg = AppConfig::from_env();

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&cfg.database_url)
        .await?;

    let payments = payments_retry::gateways::from_config(&cfg)?;
    let engine = RetryEngine::from_config(&cfg, RetryStores::postgres(pool), payments)?;

    let redis_client = redis::Client::open(cfg.redis_url.clone())?;
    let mut conn = redis_client.get_multiplexed_async_connection().await?;

    let _: redis::RedisResult<String> = redis::cmd("XGROUP")
        .arg("CREATE")
        .arg(&cfg.rejection_stream_key)
        .arg(&cfg.rejection_stream_group)
        .arg("0")
        .arg("MKSTREAM")
        .query_async(&mut conn)
        .await;

    tracing::info!(stream = %cfg.rejection_stream_key, "rejection consumer started");

    // Start with this consumer's own unacknowledged entries, then new ones.
    let mut backlog = true;
    loop {
        let cursor = stream_cursor(backlog);
        let reply: StreamReadReply = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&cfg.rejection_stream_group)
            .arg(&cfg.rejection_consumer_name)
            .arg("COUNT")
            .arg(100)
            .arg("BLOCK")
            .arg(2000)
            .arg("STREAMS")
            .arg(&cfg.rejection_stream_key)
            .arg(cursor)
            .query_async(&mut conn)
            .await
            .unwrap_or(StreamReadReply { keys: vec![] });

        let mut seen = 0usize;
        let mut left_pending = false;
        for stream_key in reply.keys {
            for id in stream_key.ids {
                seen += 1;
                let raw = id
                    .map
                    .get(EVENT_FIELD)
                    .and_then(|v| redis::from_redis_value::<String>(v).ok());
                let ack = process_entry(&engine.schedule_manager, &id.id, raw.as_deref()).await
                    == EntryDisposition::Ack;

                left_pending |= !ack;
                if ack {
                    let _: i64 = redis::cmd("XACK")
                        .arg(&cfg.rejection_stream_key)
                        .arg(&cfg.rejection_stream_group)
                        .arg(&id.id)
                        .query_async(&mut conn)
                        .await
                        .unwrap_or(0);
                }
            }
        }

        backlog = read_backlog_next(backlog, seen, left_pending);
        if left_pending {
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
        }
    }
}
