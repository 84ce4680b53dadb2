use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::Response;
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::domain::interval::Interval;
use crate::domain::timezone::parse_timezone;
use crate::engine::regression_service::{RegressionMessage, RegressionRequest};
use crate::engine::LiveStreamingEngine;
use crate::error::EngineError;

/// The exact timeframe strings the original's `Interval(str, Enum)` accepted
/// (`examples/original_source/Microservices/Port8007.py`) — stricter than
/// `domain::interval::Interval::parse`'s permissive tick-count fallback,
/// because an unrecognized timeframe here must be a client-visible
/// validation error (`spec.md` §6), not a silent default.
const VALID_TIMEFRAMES: &[&str] = &[
    "1tick", "10tick", "100tick", "1000tick", "1s", "5s", "10s", "15s", "30s", "45s", "1m", "5m", "10m", "15m", "30m",
    "45m", "1h", "1d",
];

#[derive(Debug, Deserialize)]
pub struct RegressionQuery {
    timeframes: String,
    #[serde(default = "default_timezone")]
    timezone: String,
    regression_length: i64,
    lookback_periods: String,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

/// `GET /ws/live-regression/{instrument}/{exchange}?timeframes=...` —
/// rolling regressions (`spec.md` §6, §4.6). Path segments are
/// percent-decoded by Axum's router before reaching `Path`.
pub async fn handler(
    ws: WebSocketUpgrade,
    Path((instrument, exchange)): Path<(String, String)>,
    Query(query): Query<RegressionQuery>,
    State(engine): State<Arc<LiveStreamingEngine>>,
) -> Response {
    ws.on_upgrade(move |socket| run(socket, engine, instrument, exchange, query))
}

async fn run(socket: WebSocket, engine: Arc<LiveStreamingEngine>, instrument: String, exchange: String, query: RegressionQuery) {
    let (mut sink, mut stream) = socket.split();

    let request = match validate(instrument, exchange, query) {
        Ok(request) => request,
        Err(error) => {
            let _ = sink.send(error_frame(&error.to_string())).await;
            let _ = sink.close().await;
            return;
        }
    };

    let (tx, mut rx) = mpsc::unbounded_channel::<RegressionMessage>();
    let handle = match engine.regression.subscribe(request, tx).await {
        Ok(handle) => handle,
        Err(error) => {
            let _ = sink.send(error_frame(&error.to_string())).await;
            let _ = sink.close().await;
            return;
        }
    };

    loop {
        tokio::select! {
            outgoing = rx.recv() => {
                match outgoing {
                    Some(message) => {
                        let text = serde_json::to_string(&message).expect("regression message serializes");
                        if sink.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = stream.next() => {
                match incoming {
                    // Inbound frames are keepalive/no-ops, echoed back as a
                    // `heartbeat` frame (`spec.md` §6 "heartbeat/pong echoes").
                    Some(Ok(Message::Text(text))) => {
                        let heartbeat = serde_json::json!({
                            "type": "heartbeat",
                            "received": text,
                            "timestamp": Utc::now().to_rfc3339(),
                        });
                        if sink.send(Message::Text(heartbeat.to_string())).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => continue,
                }
            }
        }
    }

    engine.regression.unsubscribe(handle);
}

fn error_frame(message: &str) -> Message {
    Message::Text(serde_json::json!({ "type": "error", "message": message }).to_string())
}

/// Validates a raw query against `spec.md` §6's rules, in the original's
/// check order: timeframes, lookback periods, regression length, then
/// per-timeframe validity.
fn validate(instrument: String, exchange: String, query: RegressionQuery) -> Result<RegressionRequest, EngineError> {
    let timeframe_strs: Vec<&str> = query.timeframes.split(',').map(str::trim).filter(|s| !s.is_empty()).collect();
    if timeframe_strs.is_empty() {
        return Err(EngineError::UnknownTimeframe("(none specified)".to_string()));
    }

    let lookback_periods: Vec<i64> = query
        .lookback_periods
        .split(',')
        .map(|s| s.trim().parse::<i64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| EngineError::MalformedLookbackList(query.lookback_periods.clone()))?;

    if let Some(&negative) = lookback_periods.iter().find(|&&v| v < 0) {
        return Err(EngineError::NegativeLookback(negative));
    }

    if query.regression_length < 2 || query.regression_length > 1000 {
        return Err(EngineError::InvalidRegressionLength(query.regression_length.max(0) as u32));
    }

    let invalid_timeframes: Vec<&str> = timeframe_strs.iter().copied().filter(|tf| !VALID_TIMEFRAMES.contains(tf)).collect();
    if !invalid_timeframes.is_empty() {
        return Err(EngineError::UnknownTimeframe(invalid_timeframes.join(", ")));
    }

    let timeframes = timeframe_strs
        .iter()
        .map(|tf| Interval::parse(tf).expect("pre-validated against VALID_TIMEFRAMES"))
        .collect();

    Ok(RegressionRequest {
        instrument,
        exchange,
        timeframes,
        timezone: parse_timezone(&query.timezone),
        regression_length: query.regression_length as u32,
        lookback_periods: lookback_periods.into_iter().map(|v| v as u32).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(timeframes: &str, regression_length: i64, lookback_periods: &str) -> RegressionQuery {
        RegressionQuery {
            timeframes: timeframes.to_string(),
            timezone: default_timezone(),
            regression_length,
            lookback_periods: lookback_periods.to_string(),
        }
    }

    #[test]
    fn accepts_a_well_formed_request() {
        let request = validate("X".to_string(), "NASDAQ".to_string(), query("1m,5m", 20, "0,5")).unwrap();
        assert_eq!(request.timeframes.len(), 2);
        assert_eq!(request.lookback_periods, vec![0, 5]);
    }

    #[test]
    fn rejects_unknown_timeframe() {
        let err = validate("X".to_string(), "NASDAQ".to_string(), query("3m", 20, "0")).unwrap_err();
        assert!(matches!(err, EngineError::UnknownTimeframe(_)));
    }

    #[test]
    fn rejects_negative_lookback() {
        let err = validate("X".to_string(), "NASDAQ".to_string(), query("1m", 20, "-1")).unwrap_err();
        assert!(matches!(err, EngineError::NegativeLookback(-1)));
    }

    #[test]
    fn rejects_malformed_lookback_list() {
        let err = validate("X".to_string(), "NASDAQ".to_string(), query("1m", 20, "abc")).unwrap_err();
        assert!(matches!(err, EngineError::MalformedLookbackList(_)));
    }

    #[test]
    fn rejects_regression_length_out_of_range() {
        assert!(matches!(
            validate("X".to_string(), "NASDAQ".to_string(), query("1m", 1, "0")).unwrap_err(),
            EngineError::InvalidRegressionLength(_)
        ));
        assert!(matches!(
            validate("X".to_string(), "NASDAQ".to_string(), query("1m", 1001, "0")).unwrap_err(),
            EngineError::InvalidRegressionLength(_)
        ));
    }
}
