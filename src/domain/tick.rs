use serde::Deserialize;

/// A single trade print as it arrives on the tick bus or the intraday cache.
///
/// Ticks are decoded with `serde_json::from_str` into this struct directly;
/// a malformed payload (missing/non-numeric `price`, `volume`, or
/// `timestamp`) fails to deserialize and is dropped by the caller with a
/// warning rather than panicking the group's upstream loop.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Tick {
    pub price: f64,
    pub volume: i64,
    /// Seconds since epoch, microsecond precision.
    pub timestamp: f64,
}

impl Tick {
    /// Decode one JSON tick payload, returning `None` (never an error) on
    /// any malformed shape — missing field, wrong type, negative volume.
    /// Matches the source's `all(k in tick_data for k in [...])` guard.
    pub fn decode(raw: &str) -> Option<Self> {
        let tick: Tick = serde_json::from_str(raw).ok()?;
        if tick.volume < 0 || !tick.price.is_finite() || !tick.timestamp.is_finite() {
            return None;
        }
        Some(tick)
    }
}
