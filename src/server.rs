use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::engine::LiveStreamingEngine;
use crate::ws;

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
    redis: bool,
    influxdb: bool,
    active_groups: usize,
    active_regression_contexts: usize,
}

/// Liveness/readiness probe reporting upstream connectivity and active
/// group/context counts, in the style of every `health_check()` the
/// original's per-port services exposed (`SPEC_FULL.md` §6).
async fn health(State(engine): State<Arc<LiveStreamingEngine>>) -> Json<HealthBody> {
    let redis = engine.tick_cache.ping().await;
    let influxdb = engine.regression.historical_ping().await;
    let status = if redis && influxdb { "ok" } else { "degraded" };

    Json(HealthBody {
        status,
        redis,
        influxdb,
        active_groups: engine.groups.group_count(),
        active_regression_contexts: engine.regression.context_count(),
    })
}

#[derive(Serialize)]
struct GroupMetric {
    instrument: String,
    clients: usize,
    resamplers: usize,
}

#[derive(Serialize)]
struct MetricsBody {
    groups: Vec<GroupMetric>,
    regression_contexts: usize,
    regression_feeds: usize,
}

async fn metrics_groups(State(engine): State<Arc<LiveStreamingEngine>>) -> Json<MetricsBody> {
    let groups = engine
        .groups
        .snapshot()
        .into_iter()
        .map(|(instrument, clients, resamplers)| GroupMetric { instrument, clients, resamplers })
        .collect();

    Json(MetricsBody {
        groups,
        regression_contexts: engine.regression.context_count(),
        regression_feeds: engine.regression.feed_count(),
    })
}

/// Builds the full router: the three live WebSocket routes (`spec.md` §6)
/// plus the ambient `/health` and `/metrics/groups` surface
/// (`SPEC_FULL.md` §7). No CORS layer and no static file serving — this
/// process has no browser-facing HTTP surface of its own, just the
/// WebSocket fan-out and a couple of operational endpoints.
pub fn create_router(engine: Arc<LiveStreamingEngine>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics/groups", get(metrics_groups))
        .route("/ws/live/:instrument/:interval/*timezone", get(ws::live_raw::handler))
        .route("/ws-ha/live/:instrument/:interval/*timezone", get(ws::live_ha::handler))
        .route("/ws/live-regression/:instrument/:exchange", get(ws::live_regression::handler))
        .with_state(engine)
}
