use chrono::{NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

/// Implements the "display-local" (fake-UTC) timestamp convention from
/// `spec.md` §3: take the UTC instant, convert to wall-clock in `zone`,
/// then reinterpret those wall-clock fields *as if they were UTC* and
/// emit that seconds-since-epoch. Historical and live paths both call
/// this function so they agree bit-for-bit on the same instant.
pub fn display_local(unix_seconds: f64, zone: Tz) -> f64 {
    let secs = unix_seconds.floor() as i64;
    let nanos = ((unix_seconds - secs as f64) * 1_000_000_000.0).round() as u32;
    let instant = Utc.timestamp_opt(secs, nanos).single().expect("valid unix timestamp");
    let local = instant.with_timezone(&zone);
    let naive: NaiveDateTime = local.naive_local();
    Utc.from_utc_datetime(&naive).timestamp() as f64
        + Utc.from_utc_datetime(&naive).timestamp_subsec_nanos() as f64 / 1_000_000_000.0
}

/// Parses an IANA timezone name, defaulting to UTC with a warning on an
/// unknown name rather than rejecting the client (`spec.md` §4.5 step 1).
pub fn parse_timezone(raw: &str) -> Tz {
    raw.parse::<Tz>().unwrap_or_else(|_| {
        tracing::warn!(timezone = raw, "unknown timezone, defaulting to UTC");
        chrono_tz::UTC
    })
}

/// Floor `unix_seconds` to the most recent multiple of `interval_seconds`.
/// `TimeBarResampler` boundary alignment (`spec.md` §4.1) floors the raw
/// UTC instant *before* any timezone shift is applied — the fake-UTC
/// conversion happens exactly once, afterward, against the already-floored
/// boundary (matching `Port8003.py`'s `BarResampler.add_bar`: floor the raw
/// epoch, then convert that floored instant through the timezone once).
/// Flooring the already-shifted value instead would only agree with this
/// when the zone's UTC offset happens to be an exact multiple of
/// `interval_seconds`.
pub fn floor_to_boundary(unix_seconds: f64, interval_seconds: f64) -> f64 {
    (unix_seconds / interval_seconds).floor() * interval_seconds
}
