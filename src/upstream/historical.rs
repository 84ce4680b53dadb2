use chrono::{Duration as ChronoDuration, NaiveDate, TimeZone};
use chrono_tz::Tz;
use influxdb2::models::Query;
use influxdb2::Client;

use crate::domain::candle::Candle;
use crate::domain::interval::Interval;
use crate::error::EngineError;

/// The timezone the per-day measurement scheme is partitioned on
/// (`spec.md` §4.7) — independent of any client's *display* timezone.
const MEASUREMENT_DAY_ZONE: Tz = chrono_tz::America::New_York;

/// Client for the historical OHLC store (`spec.md` §6, C5). Range queries
/// are partitioned on a per-day measurement naming scheme
/// (`ohlc_{instrument}_{YYYYMMDD}_{interval}`) and dispatch to one of two
/// fetch strategies depending on the interval's frequency (`spec.md` §4.7).
pub struct HistoricalClient {
    client: Client,
    bucket: String,
}

impl HistoricalClient {
    pub fn new(client: Client, bucket: impl Into<String>) -> Self {
        Self { client, bucket: bucket.into() }
    }

    /// Liveness probe for the ambient `/health` endpoint.
    pub async fn ping(&self) -> bool {
        self.client.health().await.is_ok()
    }

    /// Returns candles newest-first, matching the Regression Context's
    /// historical vector (`spec.md` §3). Pagination beyond `limit` is out
    /// of scope (see `DESIGN.md`'s Open Question decision).
    pub async fn fetch(
        &self,
        instrument: &str,
        interval: Interval,
        window_start: f64,
        window_end: f64,
        limit: usize,
    ) -> Result<Vec<Candle>, EngineError> {
        if interval.is_high_frequency() {
            self.fetch_day_by_day(instrument, interval, window_start, window_end, limit).await
        } else {
            self.fetch_full_range(instrument, interval, window_start, window_end, limit).await
        }
    }

    /// Low-frequency strategy: one range query over the full window,
    /// matching every daily measurement via regex (`spec.md` §4.7).
    async fn fetch_full_range(
        &self,
        instrument: &str,
        interval: Interval,
        window_start: f64,
        window_end: f64,
        limit: usize,
    ) -> Result<Vec<Candle>, EngineError> {
        let sanitized = sanitize(instrument);
        let start_day = day_of(window_start);
        let end_day = day_of(window_end);
        let date_regex_part = date_range_regex(start_day, end_day);
        let measurement_regex = format!("^ohlc_{sanitized}_({date_regex_part})_{interval}$");

        let flux = format!(
            r#"from(bucket: "{bucket}")
              |> range(start: {start}, stop: {stop})
              |> filter(fn: (r) => r._measurement =~ /{regex}/ and r.symbol == "{symbol}")
              |> drop(columns: ["_measurement", "_start", "_stop"])
              |> pivot(rowKey:["_time"], columnKey: ["_field"], valueColumn: "_value")
              |> sort(columns: ["_time"], desc: true)
              |> limit(n: {limit})"#,
            bucket = self.bucket,
            start = rfc3339(window_start),
            stop = rfc3339(window_end),
            regex = measurement_regex,
            symbol = instrument,
            limit = limit,
        );

        self.run(&flux).await
    }

    /// High-frequency strategy: walk backward day-by-day, newest-first,
    /// querying one measurement at a time until `limit` candles have been
    /// collected (`spec.md` §4.7).
    async fn fetch_day_by_day(
        &self,
        instrument: &str,
        interval: Interval,
        window_start: f64,
        window_end: f64,
        limit: usize,
    ) -> Result<Vec<Candle>, EngineError> {
        let mut collected = Vec::new();
        let mut day = day_of(window_end);
        let earliest_day = day_of(window_start);

        loop {
            if collected.len() >= limit || day < earliest_day {
                break;
            }

            let day_start = day_start_unix(day);
            let day_end = day_start + 86_400.0;
            let start = day_start.max(window_start);
            let stop = day_end.min(window_end);
            let remaining = limit - collected.len();

            let measurement_name = format!("ohlc_{}_{}_{interval}", instrument, day.format("%Y%m%d"));
            let flux = format!(
                r#"from(bucket: "{bucket}")
                  |> range(start: {start}, stop: {stop})
                  |> filter(fn: (r) => r._measurement == "{measurement}" and r.symbol == "{symbol}")
                  |> drop(columns: ["_measurement", "_start", "_stop"])
                  |> pivot(rowKey:["_time"], columnKey: ["_field"], valueColumn: "_value")
                  |> sort(columns: ["_time"], desc: true)
                  |> limit(n: {remaining})"#,
                bucket = self.bucket,
                start = rfc3339(start),
                stop = rfc3339(stop),
                measurement = measurement_name,
                symbol = instrument,
                remaining = remaining,
            );

            let mut page = self.run(&flux).await?;
            collected.append(&mut page);
            day -= ChronoDuration::days(1);
        }

        Ok(collected)
    }

    async fn run(&self, flux: &str) -> Result<Vec<Candle>, EngineError> {
        tracing::debug!(flux, "executing historical Flux query");
        let records = self
            .client
            .query_raw(Some(Query::new(flux.to_string())))
            .await
            .map_err(|e| EngineError::Historical(e.to_string()))?;

        let mut candles = Vec::with_capacity(records.len());
        for record in records {
            if let Some(candle) = record_to_candle(&record) {
                candles.push(candle);
            }
        }
        Ok(candles)
    }
}

fn record_to_candle(record: &influxdb2::models::FluxRecord) -> Option<Candle> {
    let values = record.values();
    let open = field_f64(values, "open")?;
    let high = field_f64(values, "high")?;
    let low = field_f64(values, "low")?;
    let close = field_f64(values, "close")?;
    let volume = field_f64(values, "volume").unwrap_or(0.0) as i64;
    let time = values.get("_time")?;
    let unix_timestamp = match time {
        influxdb2::models::data_point::FieldValue::String(s) => {
            chrono::DateTime::parse_from_rfc3339(s).ok()?.timestamp_millis() as f64 / 1000.0
        }
        _ => return None,
    };

    Some(Candle { open, high, low, close, volume, unix_timestamp })
}

fn field_f64(values: &std::collections::BTreeMap<String, influxdb2::models::data_point::FieldValue>, key: &str) -> Option<f64> {
    use influxdb2::models::data_point::FieldValue;
    match values.get(key)? {
        FieldValue::F64(v) => Some(*v),
        FieldValue::I64(v) => Some(*v as f64),
        FieldValue::U64(v) => Some(*v as f64),
        _ => None,
    }
}

fn sanitize(instrument: &str) -> String {
    instrument.chars().map(|c| if c.is_ascii_alphanumeric() { c } else { '_' }).collect()
}

fn day_of(unix_seconds: f64) -> NaiveDate {
    chrono::Utc
        .timestamp_opt(unix_seconds as i64, 0)
        .single()
        .expect("valid unix timestamp")
        .with_timezone(&MEASUREMENT_DAY_ZONE)
        .date_naive()
}

fn day_start_unix(day: NaiveDate) -> f64 {
    MEASUREMENT_DAY_ZONE
        .from_local_datetime(&day.and_hms_opt(0, 0, 0).expect("midnight is valid"))
        .single()
        .expect("unambiguous local midnight")
        .timestamp() as f64
}

fn rfc3339(unix_seconds: f64) -> String {
    chrono::Utc
        .timestamp_opt(unix_seconds as i64, 0)
        .single()
        .expect("valid unix timestamp")
        .to_rfc3339()
}

/// Builds the `(YYYYMMDD|YYYYMMDD|...)` alternation Flux regex expects,
/// one alternative per day in `[start, end]` inclusive.
fn date_range_regex(start: NaiveDate, end: NaiveDate) -> String {
    let mut days = Vec::new();
    let mut d = start;
    while d <= end {
        days.push(d.format("%Y%m%d").to_string());
        d += ChronoDuration::days(1);
    }
    days.join("|")
}
