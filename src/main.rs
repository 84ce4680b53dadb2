use std::sync::Arc;

mod config;
mod domain;
mod engine;
mod error;
mod redis_client;
mod resampler;
mod server;
mod telemetry;
mod upstream;
mod ws;

use engine::LiveStreamingEngine;
use upstream::{HistoricalClient, TickCacheClient};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init();

    let settings = config::Settings::load()?;

    let (redis_commands, redis_client) = redis_client::connect(&settings.redis_url).await;
    tracing::info!(url = %settings.redis_url, "connected to redis");

    let influx = influxdb2::Client::new(&settings.influx_url, &settings.influx_org, &settings.influx_token);
    tracing::info!(url = %settings.influx_url, bucket = %settings.influx_bucket, "connected to influxdb");

    let tick_cache = TickCacheClient::new(redis_commands, redis_client);
    let historical = Arc::new(HistoricalClient::new(influx, settings.influx_bucket.clone()));

    let engine = Arc::new(LiveStreamingEngine::new(tick_cache, historical));
    let _sweeper = engine.spawn_sweeper();

    let app = server::create_router(engine);

    let listener = tokio::net::TcpListener::bind(&settings.bind_addr).await.unwrap_or_else(|error| {
        tracing::error!(addr = %settings.bind_addr, %error, "failed to bind");
        std::process::exit(1);
    });
    tracing::info!(addr = %settings.bind_addr, "listening");

    axum::serve(listener, app).await?;

    Ok(())
}
