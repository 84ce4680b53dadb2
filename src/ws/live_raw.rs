use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use futures::SinkExt;

use crate::domain::view::SubscriptionView;
use crate::engine::connection_manager::Attachment;
use crate::engine::LiveStreamingEngine;

use super::support::split_and_watch;

/// `GET /ws/live/{instrument}/{interval}/{timezone}` — live regular OHLC
/// (`spec.md` §6). Axum percent-decodes path segments before they reach
/// `Path`, so an instrument such as `@NQ#` arrives already decoded
/// (`spec.md` §6 "Instrument path segments may contain URL-reserved
/// characters").
pub async fn handler(
    ws: WebSocketUpgrade,
    Path((instrument, interval, timezone)): Path<(String, String, String)>,
    State(engine): State<Arc<LiveStreamingEngine>>,
) -> Response {
    ws.on_upgrade(move |socket| run(socket, engine, instrument, interval, timezone))
}

async fn run(socket: WebSocket, engine: Arc<LiveStreamingEngine>, instrument: String, interval: String, timezone: String) {
    let view = match SubscriptionView::parse_raw(instrument, &interval, &timezone) {
        Ok(view) => view,
        Err(error) => {
            tracing::warn!(%error, "rejecting live connection: invalid view");
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
            tracing::warn!(%error, instrument = %view.instrument, "failed to attach live client");
            return;
        }
    };

    if sink.send(Message::Text(serde_json::to_string(&backfill).expect("candles serialize"))).await.is_err() {
        engine.connection_manager.detach(&group, client_id);
        return;
    }

    loop {
        tokio::select! {
            payload = live.recv() => {
                match payload {
                    Some(payload) => {
                        let frame = serde_json::json!({
                            "completed_bar": payload.completed_bar,
                            "current_bar": payload.current_bar,
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
