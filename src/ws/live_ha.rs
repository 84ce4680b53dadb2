use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use futures::SinkExt;

use crate::domain::view::SubscriptionView;
use crate::engine::connection_manager::Attachment;
use crate::engine::LiveStreamingEngine;
use crate::resampler::heikin_ashi::{self, HaIncremental};

use super::support::split_and_watch;

/// `GET /ws-ha/live/{instrument}/{interval}/{timezone}` — live Heikin-Ashi
/// (`spec.md` §6). Same backfill-then-live handshake as the raw route,
/// with the HA recurrence (`spec.md` §4.2) applied on top: backfill bars
/// are transformed in one batch and the last HA candle seeds an
/// `HaIncremental` that carries the recurrence into the live stream, so
/// the transition is bit-identical to computing HA over the whole history
/// at once.
pub async fn handler(
    ws: WebSocketUpgrade,
    Path((instrument, interval, timezone)): Path<(String, String, String)>,
    State(engine): State<Arc<LiveStreamingEngine>>,
) -> Response {
    ws.on_upgrade(move |socket| run(socket, engine, instrument, interval, timezone))
}

async fn run(socket: WebSocket, engine: Arc<LiveStreamingEngine>, instrument: String, interval: String, timezone: String) {
    let view = match SubscriptionView::parse_heikin_ashi(instrument, &interval, &timezone) {
        Ok(view) => view,
        Err(error) => {
            tracing::warn!(%error, "rejecting live HA connection: invalid view");
            return;
        }
    };

    let (mut sink, connected, mut closed) = split_and_watch(socket);
    let still_connected = {
        let connected = connected.clone();
        move || connected.load(Ordering::Relaxed)
    };

    let attachment = engine.connection_manager.attach(&view, &engine.tick_cache, still_connected).await;

    let (group, client_id, backfill, mut live) = match attachment {
        Ok(Attachment::Live { group, client_id, backfill, live }) => (group, client_id, backfill, live),
        Ok(Attachment::ClientGone) => return,
        Err(error) => {
            tracing::warn!(%error, instrument = %view.instrument, "failed to attach live HA client");
            return;
        }
    };

    let ha_backfill = heikin_ashi::transform(&backfill, None);
    let mut incremental = HaIncremental::seed_from(ha_backfill.last().copied());

    if sink.send(Message::Text(serde_json::to_string(&ha_backfill).expect("HA candles serialize"))).await.is_err() {
        engine.connection_manager.detach(&group, client_id);
        return;
    }

    loop {
        tokio::select! {
            payload = live.recv() => {
                match payload {
                    Some(payload) => {
                        let (completed_ha, current_ha) = incremental.step(payload.completed_bar, payload.current_bar);
                        let frame = serde_json::json!({
                            "completed_bar": completed_ha,
                            "current_bar": current_ha,
                        });
                        if sink.send(Message::Text(frame.to_string())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            _ = &mut closed => break,
        }
    }

    engine.connection_manager.detach(&group, client_id);
}
