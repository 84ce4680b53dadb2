use chrono_tz::Tz;

use super::interval::Interval;
use super::timezone::parse_timezone;
use crate::error::EngineError;

/// The derived series a client wants layered on top of the raw resampled
/// bars: nothing, a Heikin-Ashi transform, or a rolling regression.
#[derive(Debug, Clone, PartialEq)]
pub enum Transform {
    Raw,
    HeikinAshi,
    Regression { length: u32, lookbacks: Vec<u32> },
}

/// A client's requested slice of the market: one instrument, one bar
/// interval, one display timezone, and an optional derived transform
/// (`spec.md` §3 "Subscription view").
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionView {
    pub instrument: String,
    pub interval: Interval,
    pub timezone: Tz,
    pub transform: Transform,
}

impl SubscriptionView {
    pub fn raw(instrument: impl Into<String>, interval: Interval, timezone: Tz) -> Self {
        Self {
            instrument: instrument.into(),
            interval,
            timezone,
            transform: Transform::Raw,
        }
    }

    pub fn heikin_ashi(instrument: impl Into<String>, interval: Interval, timezone: Tz) -> Self {
        Self {
            instrument: instrument.into(),
            interval,
            timezone,
            transform: Transform::HeikinAshi,
        }
    }

    /// Parses the `{interval}`/`{timezone}` path segments shared by both
    /// live WebSocket routes (`spec.md` §4.5 step 1 "Validate view"): an
    /// unknown interval rejects the connection outright, an unknown
    /// timezone only warns and falls back to UTC.
    pub fn parse_raw(instrument: impl Into<String>, interval: &str, timezone: &str) -> Result<Self, EngineError> {
        Ok(Self::raw(instrument, Interval::parse(interval)?, parse_timezone(timezone)))
    }

    pub fn parse_heikin_ashi(instrument: impl Into<String>, interval: &str, timezone: &str) -> Result<Self, EngineError> {
        Ok(Self::heikin_ashi(instrument, Interval::parse(interval)?, parse_timezone(timezone)))
    }

    /// The key a `SubscriptionGroup` uses to route a tick-derived payload
    /// to a Resampler: `(interval, timezone)`, independent of transform —
    /// HA is derived downstream of the raw bar, not a distinct Resampler.
    pub fn resampler_key(&self) -> (Interval, Tz) {
        (self.interval, self.timezone)
    }
}
