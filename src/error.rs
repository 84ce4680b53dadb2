use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

/// One variant per row of `spec.md` §7's error table. Every fallible path
/// inside the engine returns one of these; handlers log-and-continue per
/// the "recover locally" propagation principle rather than bubbling these
/// up as process failures.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown time interval unit in {0:?}")]
    UnknownTimeUnit(String),

    #[error("unknown timeframe requested: {0}")]
    UnknownTimeframe(String),

    #[error("invalid regression length {0} (must be 2..=1000)")]
    InvalidRegressionLength(u32),

    #[error("negative lookback period: {0}")]
    NegativeLookback(i64),

    #[error("malformed lookback_periods list: {0}")]
    MalformedLookbackList(String),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("historical store error: {0}")]
    Historical(String),
}

/// HTTP-facing mapping, generalized from the teacher's `handlers::AppError`.
/// Only reachable from the plain HTTP surface (`/health`, `/metrics/groups`);
/// WebSocket routes translate `EngineError` into `{type:"error", message}`
/// frames themselves (`spec.md` §6) rather than an HTTP status.
impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = match &self {
            EngineError::UnknownTimeUnit(_)
            | EngineError::UnknownTimeframe(_)
            | EngineError::InvalidRegressionLength(_)
            | EngineError::NegativeLookback(_)
            | EngineError::MalformedLookbackList(_) => StatusCode::BAD_REQUEST,
            EngineError::Redis(_) | EngineError::Historical(_) => StatusCode::SERVICE_UNAVAILABLE,
        };

        #[derive(Serialize)]
        struct Body {
            error: String,
        }

        (status, axum::Json(Body { error: self.to_string() })).into_response()
    }
}
