use std::fmt;
use std::time::Duration;

use tracing::warn;

use crate::error::EngineError;

/// The set of wall-clock durations a `TimeInterval` may name. Anything else
/// is an unrecognized time unit and construction fails (`spec.md` §7).
const VALID_TIME_SECONDS: &[u64] = &[1, 5, 10, 15, 30, 45, 60, 300, 600, 900, 1800, 2700, 3600, 86400];

/// The set of tick counts a `TickInterval` may name. A count outside this
/// set is still accepted (the source never validated it beyond parsing),
/// only the *parse* failure path falls back to 1000.
const KNOWN_TICK_COUNTS: &[u32] = &[1, 10, 100, 1000];

/// Either a wall-clock duration or a tick count used to close a bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interval {
    TimeInterval(Duration),
    TickInterval(u32),
}

impl Interval {
    /// Parse the `{interval}` path segment used throughout §6's WebSocket
    /// routes: `"1s","5s","10s","15s","30s","45s","1m","5m","10m","15m",
    /// "30m","45m","1h","1d"` for time intervals, or a bare integer (or
    /// `"<n>tick"`) for tick intervals.
    ///
    /// An unparsable tick count (e.g. `"abctick"`) is accepted with a
    /// warning and defaults to `n=1000` — "strange but matches the source
    /// and is specified" (`spec.md` §9). An unrecognized *time* unit fails
    /// construction outright.
    pub fn parse(raw: &str) -> Result<Self, EngineError> {
        let raw = raw.trim();

        // Check the "tick" suffix before any single-letter unit: the digits
        // ahead of it (e.g. "abc" in "abctick") are themselves free to be
        // unparsable, which is the tick-count fallback path, not an unknown
        // time unit.
        if let Some(digits) = raw.strip_suffix("tick") {
            return Ok(Self::parse_tick_count(digits));
        }

        match raw.chars().last() {
            Some(unit @ ('s' | 'm' | 'h' | 'd')) => Self::parse_time(raw, &unit.to_string()),
            Some(c) if c.is_ascii_alphabetic() => Err(EngineError::UnknownTimeUnit(raw.to_string())),
            // Bare integer: a tick-count interval with no suffix.
            _ => Ok(Self::parse_tick_count(raw)),
        }
    }

    fn parse_time(raw: &str, unit: &str) -> Result<Self, EngineError> {
        let digits = &raw[..raw.len() - unit.len()];
        let n: u64 = digits
            .parse()
            .map_err(|_| EngineError::UnknownTimeUnit(raw.to_string()))?;
        let seconds = match unit {
            "s" => n,
            "m" => n * 60,
            "h" => n * 3600,
            "d" => n * 86400,
            _ => unreachable!(),
        };
        if !VALID_TIME_SECONDS.contains(&seconds) {
            return Err(EngineError::UnknownTimeUnit(raw.to_string()));
        }
        Ok(Interval::TimeInterval(Duration::from_secs(seconds)))
    }

    /// Never fails: an unparsable count warns and falls back to 1000,
    /// matching the historical client-observed behavior (`spec.md` §4.1).
    fn parse_tick_count(digits: &str) -> Self {
        match digits.parse::<u32>() {
            Ok(n) if n > 0 => {
                if !KNOWN_TICK_COUNTS.contains(&n) {
                    warn!(count = n, "tick interval count outside the known set {1,10,100,1000}, accepting as-is");
                }
                Interval::TickInterval(n)
            }
            _ => {
                warn!(raw = digits, "unparsable tick interval count, falling back to 1000");
                Interval::TickInterval(1000)
            }
        }
    }

    pub fn seconds(&self) -> Option<f64> {
        match self {
            Interval::TimeInterval(d) => Some(d.as_secs_f64()),
            Interval::TickInterval(_) => None,
        }
    }

    /// The high-frequency historical fetch strategy (`spec.md` §4.7) applies
    /// to sub-minute time intervals and all tick intervals.
    pub fn is_high_frequency(&self) -> bool {
        match self {
            Interval::TimeInterval(d) => d.as_secs() < 60,
            Interval::TickInterval(_) => true,
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interval::TimeInterval(d) => {
                let secs = d.as_secs();
                if secs % 86400 == 0 {
                    write!(f, "{}d", secs / 86400)
                } else if secs % 3600 == 0 {
                    write!(f, "{}h", secs / 3600)
                } else if secs % 60 == 0 {
                    write!(f, "{}m", secs / 60)
                } else {
                    write!(f, "{}s", secs)
                }
            }
            Interval::TickInterval(n) => write!(f, "{}tick", n),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_time_intervals() {
        assert_eq!(Interval::parse("1s").unwrap(), Interval::TimeInterval(Duration::from_secs(1)));
        assert_eq!(Interval::parse("5m").unwrap(), Interval::TimeInterval(Duration::from_secs(300)));
        assert_eq!(Interval::parse("1h").unwrap(), Interval::TimeInterval(Duration::from_secs(3600)));
        assert_eq!(Interval::parse("1d").unwrap(), Interval::TimeInterval(Duration::from_secs(86400)));
    }

    #[test]
    fn unrecognized_time_unit_fails() {
        assert!(Interval::parse("7w").is_err());
        assert!(Interval::parse("3m30s").is_err());
    }

    #[test]
    fn parses_tick_intervals() {
        assert_eq!(Interval::parse("100").unwrap(), Interval::TickInterval(100));
        assert_eq!(Interval::parse("100tick").unwrap(), Interval::TickInterval(100));
    }

    #[test]
    fn bad_tick_count_falls_back_to_1000() {
        assert_eq!(Interval::parse("abctick").unwrap(), Interval::TickInterval(1000));
    }

    #[test]
    fn high_frequency_classification() {
        assert!(Interval::parse("1s").unwrap().is_high_frequency());
        assert!(Interval::parse("45s").unwrap().is_high_frequency());
        assert!(!Interval::parse("1m").unwrap().is_high_frequency());
        assert!(Interval::parse("100tick").unwrap().is_high_frequency());
    }
}
