use serde::{Deserialize, Serialize};

/// An OHLCV bar. `unix_timestamp` is a "display-local" (fake-UTC) instant —
/// see `domain::timezone::display_local` for the conversion that produces it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
    pub unix_timestamp: f64,
}

impl Candle {
    pub fn first_tick(price: f64, unix_timestamp: f64) -> Self {
        Self {
            open: price,
            high: price,
            low: price,
            close: price,
            volume: 0,
            unix_timestamp,
        }
    }

    pub fn fold_tick(&mut self, price: f64, volume: i64) {
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.close = price;
        self.volume += volume;
    }
}

/// A Heikin-Ashi candle: same OHLCV shape, plus the source OHLC open/close
/// the HA recurrence was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeikinAshiCandle {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
    pub unix_timestamp: f64,
    pub regular_open: f64,
    pub regular_close: f64,
}
