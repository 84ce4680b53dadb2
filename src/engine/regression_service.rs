use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use chrono_tz::Tz;
use dashmap::DashMap;
use futures::StreamExt;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::domain::candle::Candle;
use crate::domain::interval::Interval;
use crate::domain::tick::Tick;
use crate::error::EngineError;
use crate::resampler::{regression, resample_backfill, Resampler};
use crate::upstream::{HistoricalClient, TickCacheClient};

/// How far back a freshly-created Context reaches into the historical
/// store (`spec.md` §4.6 step 1, "last ~30 days").
const HISTORICAL_WINDOW: Duration = Duration::from_secs(30 * 86_400);
/// Upper bound on the number of candles fetched per Context init.
const HISTORICAL_LIMIT: usize = 1_000;
/// Cadence of each Context's periodic recalculation task.
const CALCULATION_INTERVAL: Duration = Duration::from_secs(1);
/// Slack kept beyond `length + max(lookback)` when trimming the live
/// vector on every completed bar (`spec.md` §4.6 "Per-tick processing").
const LIVE_VECTOR_MARGIN: usize = 100;

pub type RegressionClientId = u64;

/// `{instrument, exchange, timeframes, timezone, regression_length, lookback_periods}`
/// as parsed off `/ws/live-regression/{instrument}/{exchange}` (`spec.md` §6).
/// Validation (unknown timeframe, `L` out of range, negative lookback,
/// malformed lookback list) happens before a request reaches the service —
/// see `ws::live_regression` — so every field here is already well-formed.
#[derive(Debug, Clone)]
pub struct RegressionRequest {
    pub instrument: String,
    pub exchange: String,
    pub timeframes: Vec<Interval>,
    pub timezone: Tz,
    pub regression_length: u32,
    pub lookback_periods: Vec<u32>,
}

/// One frame the live-regression WebSocket route sends a client
/// (`spec.md` §6, §4.6 "Broadcast" / "Initialization progress messages").
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum RegressionMessage {
    #[serde(rename = "initialization_progress")]
    InitializationProgress { symbol: String, timeframe: String, message: String },
    #[serde(rename = "subscription_confirmed")]
    SubscriptionConfirmed {
        symbol: String,
        exchange: String,
        timeframes: Vec<String>,
        regression_length: u32,
        lookback_periods: Vec<u32>,
        timezone: String,
        timestamp: String,
    },
    #[serde(rename = "live_regression_update")]
    LiveRegressionUpdate {
        symbol: String,
        timeframe: String,
        context: String,
        results: HashMap<String, regression::RegressionResult>,
        timestamp: String,
    },
    #[serde(rename = "error")]
    Error { message: String },
}

/// What the service hands back to the WebSocket handler on a successful
/// subscribe: enough to unsubscribe cleanly on disconnect.
pub struct ClientHandle {
    id: RegressionClientId,
    instrument: String,
    timeframes: Vec<Interval>,
}

type ContextKey = (String, Interval);

struct ContextState {
    historical: Vec<Candle>,
    live: Vec<Candle>,
    resampler: Resampler,
}

/// One `(instrument, interval)` rolling regression context (`spec.md` §3
/// "Regression Context (entity)"). `length`/`lookbacks` are fixed at
/// creation by whichever client's subscription created the context first —
/// matching the original's `calculation_contexts[symbol:timeframe]` keying,
/// which never updates an existing context's parameters for a later
/// subscriber requesting a different length (`DESIGN.md` open question).
struct Context {
    instrument: String,
    interval: Interval,
    length: u32,
    lookbacks: Vec<u32>,
    state: Mutex<ContextState>,
    subscribers: DashMap<RegressionClientId, mpsc::UnboundedSender<RegressionMessage>>,
    calc_task: JoinHandle<()>,
}

impl Context {
    /// Composes `live ++ historical_strictly_older_than_oldest_live`,
    /// newest-first, then fits the kernel over every configured lookback
    /// (`spec.md` §4.6 "Composition" / "Per-lookback computation").
    fn calculate(&self) -> Option<HashMap<String, regression::RegressionResult>> {
        let all = {
            let state = self.state.lock();
            let mut all = state.live.clone();
            if !state.historical.is_empty() {
                let live_oldest = state.live.last().map(|c| c.unix_timestamp).unwrap_or(f64::INFINITY);
                all.extend(state.historical.iter().filter(|c| c.unix_timestamp < live_oldest).copied());
            }
            all
        };
        if (all.len() as u32) < self.length {
            return None;
        }
        let mut all = all;
        all.sort_by(|a, b| b.unix_timestamp.partial_cmp(&a.unix_timestamp).unwrap());

        let mut results = HashMap::new();
        for &k in &self.lookbacks {
            if let Some(r) = regression::fit_lookback(&all, k, self.length) {
                results.insert(k.to_string(), r);
            }
        }
        if results.is_empty() {
            None
        } else {
            Some(results)
        }
    }

    fn broadcast(&self, results: HashMap<String, regression::RegressionResult>) {
        if self.subscribers.is_empty() {
            return;
        }
        let timeframe = self.interval.to_string();
        let msg = RegressionMessage::LiveRegressionUpdate {
            symbol: self.instrument.clone(),
            timeframe: timeframe.clone(),
            context: format!("{}:{}", self.instrument, timeframe),
            results,
            timestamp: Utc::now().to_rfc3339(),
        };
        for entry in self.subscribers.iter() {
            // A closed receiver means that client's handler has already
            // exited; it unregisters itself on its own teardown path
            // (`spec.md` §4.6 "Closed/erroring clients are logged and
            // skipped").
            let _ = entry.value().send(msg.clone());
        }
    }

    fn calculate_and_broadcast(&self) {
        if let Some(results) = self.calculate() {
            self.broadcast(results);
        }
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.calc_task.abort();
    }
}

/// Per-instrument upstream tick subscription shared across every Context
/// for that instrument (`spec.md` §4.6 step 3, `SPEC_FULL.md` §4 — mirrors
/// the Subscription Group's single-upstream-per-instrument sharing, but
/// this service owns its own independent subscription rather than reusing
/// `engine::subscription_group`'s).
struct InstrumentFeed {
    listener: JoinHandle<()>,
}

impl Drop for InstrumentFeed {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

/// The Live Regression Service (`spec.md` §4.6, component C8): maintains
/// rolling linear-regression contexts per `(instrument, interval)` and
/// fans slope/intercept/r/stddev updates out to subscribed clients.
pub struct RegressionService {
    historical: Arc<HistoricalClient>,
    tick_cache: TickCacheClient,
    contexts: DashMap<ContextKey, Arc<Context>>,
    feeds: DashMap<String, InstrumentFeed>,
    next_client_id: AtomicU64,
}

impl RegressionService {
    pub fn new(historical: Arc<HistoricalClient>, tick_cache: TickCacheClient) -> Self {
        Self {
            historical,
            tick_cache,
            contexts: DashMap::new(),
            feeds: DashMap::new(),
            next_client_id: AtomicU64::new(0),
        }
    }

    pub fn context_count(&self) -> usize {
        self.contexts.len()
    }

    /// Liveness probe for the ambient `/health` endpoint.
    pub async fn historical_ping(&self) -> bool {
        self.historical.ping().await
    }

    pub fn feed_count(&self) -> usize {
        self.feeds.len()
    }

    /// Runs the full subscribe flow for one client connection (`spec.md`
    /// §4.6 "Subscription model"): ensure a Context per requested
    /// timeframe (sending `initialization_progress` frames while doing
    /// so), compute and send an immediate result for each, then confirm.
    pub async fn subscribe(
        self: &Arc<Self>,
        request: RegressionRequest,
        sender: mpsc::UnboundedSender<RegressionMessage>,
    ) -> Result<ClientHandle, EngineError> {
        let client_id = self.next_client_id.fetch_add(1, Ordering::Relaxed);

        for &timeframe in &request.timeframes {
            let _ = sender.send(RegressionMessage::InitializationProgress {
                symbol: request.instrument.clone(),
                timeframe: timeframe.to_string(),
                message: "loading historical and live candles".to_string(),
            });

            let context = self
                .ensure_context(
                    &request.instrument,
                    timeframe,
                    request.timezone,
                    request.regression_length,
                    request.lookback_periods.clone(),
                )
                .await?;

            context.subscribers.insert(client_id, sender.clone());
            context.calculate_and_broadcast();
        }

        let _ = sender.send(RegressionMessage::SubscriptionConfirmed {
            symbol: request.instrument.clone(),
            exchange: request.exchange.clone(),
            timeframes: request.timeframes.iter().map(|tf| tf.to_string()).collect(),
            regression_length: request.regression_length,
            lookback_periods: request.lookback_periods.clone(),
            timezone: request.timezone.to_string(),
            timestamp: Utc::now().to_rfc3339(),
        });

        Ok(ClientHandle { id: client_id, instrument: request.instrument, timeframes: request.timeframes })
    }

    /// Tears a client down (`spec.md` §4.6 "Cleanup"): drop it from every
    /// Context it subscribed to; drop Contexts that reach zero
    /// subscribers; drop the per-instrument feed once no Context for that
    /// instrument remains.
    pub fn unsubscribe(&self, handle: ClientHandle) {
        for timeframe in &handle.timeframes {
            let key = (handle.instrument.clone(), *timeframe);
            if let Some(context) = self.contexts.get(&key) {
                context.subscribers.remove(&handle.id);
                if context.subscribers.is_empty() {
                    drop(context);
                    self.contexts.remove(&key);
                    tracing::info!(instrument = %handle.instrument, timeframe = %timeframe, "dropped regression context");
                }
            }
        }

        let any_context_left = self.contexts.iter().any(|entry| entry.key().0 == handle.instrument);
        if !any_context_left {
            if self.feeds.remove(&handle.instrument).is_some() {
                tracing::info!(instrument = %handle.instrument, "cancelled regression upstream feed");
            }
        }
    }

    /// Finds or creates the Context for `(instrument, interval)`
    /// (`spec.md` §4.6 "Context initialization"). A pre-existing Context
    /// is returned as-is; its `length`/`lookbacks` are not updated to
    /// match a later caller's request.
    async fn ensure_context(
        self: &Arc<Self>,
        instrument: &str,
        interval: Interval,
        timezone: Tz,
        length: u32,
        lookbacks: Vec<u32>,
    ) -> Result<Arc<Context>, EngineError> {
        let key = (instrument.to_string(), interval);
        if let Some(existing) = self.contexts.get(&key) {
            return Ok(existing.clone());
        }

        let now = Utc::now().timestamp() as f64;
        let window_start = now - HISTORICAL_WINDOW.as_secs_f64();
        let historical = match self.historical.fetch(instrument, interval, window_start, now, HISTORICAL_LIMIT).await {
            Ok(candles) => candles,
            Err(error) => {
                // "proceed with empty historical window" (`spec.md` §7).
                tracing::warn!(instrument, %error, "historical store unavailable for regression context init, proceeding live-only");
                Vec::new()
            }
        };

        let ticks = self.tick_cache.read_intraday(instrument).await?;
        let mut live = resample_backfill(interval, timezone, &ticks).await;
        live.reverse(); // resample_backfill returns oldest-first; contexts hold newest-first.

        let context = Arc::new(Context {
            instrument: instrument.to_string(),
            interval,
            length,
            lookbacks,
            state: Mutex::new(ContextState { historical, live, resampler: Resampler::new(interval, timezone) }),
            subscribers: DashMap::new(),
            calc_task: spawn_calculation_loop(key.clone(), self.clone()),
        });

        self.contexts.insert(key, context.clone());
        self.ensure_feed(instrument);
        Ok(context)
    }

    /// Installs the shared per-instrument upstream subscription if this is
    /// the first Context created for `instrument` (`spec.md` §4.6 step 3).
    fn ensure_feed(self: &Arc<Self>, instrument: &str) {
        if self.feeds.contains_key(instrument) {
            return;
        }
        let service = self.clone();
        let instrument_owned = instrument.to_string();
        let tick_cache = self.tick_cache.clone();
        let listener = tokio::spawn(async move {
            let mut pubsub = match tick_cache.subscribe(&instrument_owned).await {
                Ok(pubsub) => pubsub,
                Err(error) => {
                    tracing::error!(instrument = %instrument_owned, %error, "failed to open regression upstream subscription");
                    return;
                }
            };
            let mut stream = pubsub.on_message();
            while let Some(message) = stream.next().await {
                let raw: String = match message.get_payload() {
                    Ok(payload) => payload,
                    Err(error) => {
                        tracing::warn!(instrument = %instrument_owned, %error, "malformed regression pubsub payload");
                        continue;
                    }
                };
                match Tick::decode(&raw) {
                    Some(tick) => service.feed_tick(&instrument_owned, &tick),
                    None => tracing::warn!(instrument = %instrument_owned, "dropping malformed tick in regression feed"),
                }
            }
            tracing::info!(instrument = %instrument_owned, "regression upstream listener exiting");
        });
        self.feeds.insert(instrument.to_string(), InstrumentFeed { listener });
    }

    /// Feeds one tick into every Context whose instrument matches
    /// (`spec.md` §4.6 "its handler feeds each tick into every Context
    /// whose instrument matches, using that Context's own Resampler").
    fn feed_tick(&self, instrument: &str, tick: &Tick) {
        for entry in self.contexts.iter() {
            if entry.key().0 != instrument {
                continue;
            }
            let context = entry.value();
            let completed = {
                let mut state = context.state.lock();
                let (completed, _current) = state.resampler.add(tick);
                if let Some(bar) = completed {
                    state.live.insert(0, bar);
                    let cap = (context.length as usize) + context.lookbacks.iter().copied().max().unwrap_or(0) as usize + LIVE_VECTOR_MARGIN;
                    state.live.truncate(cap);
                }
                completed
            };
            if completed.is_some() {
                context.calculate_and_broadcast();
            }
        }
    }
}

fn spawn_calculation_loop(key: ContextKey, service: Arc<RegressionService>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(CALCULATION_INTERVAL);
        loop {
            ticker.tick().await;
            match service.contexts.get(&key) {
                Some(context) => context.calculate_and_broadcast(),
                None => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle_at(ts: f64, close: f64) -> Candle {
        Candle { open: close, high: close, low: close, close, volume: 1, unix_timestamp: ts }
    }

    fn test_context(length: u32, lookbacks: Vec<u32>, historical: Vec<Candle>, live: Vec<Candle>) -> Context {
        Context {
            instrument: "TEST".to_string(),
            interval: Interval::TimeInterval(Duration::from_secs(60)),
            length,
            lookbacks,
            state: Mutex::new(ContextState { historical, live, resampler: Resampler::new(Interval::TimeInterval(Duration::from_secs(60)), chrono_tz::UTC) }),
            subscribers: DashMap::new(),
            calc_task: tokio::spawn(async {}),
        }
    }

    /// Composition (`spec.md` §4.6): historical candles at or after the
    /// oldest live candle's timestamp must not double-count alongside the
    /// live reconstruction of that same bar.
    #[tokio::test]
    async fn composition_drops_historical_overlapping_the_live_window() {
        // Live holds the 5 most recent minutes, newest-first.
        let live: Vec<Candle> = (0..5).rev().map(|i| candle_at(100.0 + i as f64 * 60.0, 10.0 + i as f64)).collect();
        let oldest_live_ts = live.last().unwrap().unix_timestamp;

        // Historical holds 10 candles, some overlapping the live window
        // (same or newer timestamp) and some strictly older.
        let mut historical: Vec<Candle> = Vec::new();
        for i in 0..10 {
            let ts = oldest_live_ts - (i as f64) * 60.0;
            historical.push(candle_at(ts, 1.0 + i as f64));
        }

        let context = test_context(5, vec![0], historical, live.clone());
        let results = context.calculate().expect("enough candles for length 5");
        assert!(results.contains_key("0"));

        // Directly verify the dedup rule the composition step applies.
        let state = context.state.lock();
        let mut all = state.live.clone();
        all.extend(state.historical.iter().filter(|c| c.unix_timestamp < oldest_live_ts).copied());
        assert!(all.iter().filter(|c| c.unix_timestamp == oldest_live_ts).count() == 1);
    }

    /// Scenario 6 (`spec.md` §8): `L=20, K=[0,5]` over a 200-candle
    /// historical window plus a short live tail yields both `"0"` and
    /// `"5"` keys in a single calculation.
    #[tokio::test]
    async fn scenario_6_multiple_lookbacks_present_in_one_result() {
        let live: Vec<Candle> = (0..10).rev().map(|i| candle_at(1000.0 + i as f64 * 60.0, 200.0 - i as f64)).collect();
        let oldest_live_ts = live.last().unwrap().unix_timestamp;
        let historical: Vec<Candle> = (0..200)
            .map(|i| candle_at(oldest_live_ts - 60.0 - i as f64 * 60.0, 100.0 - i as f64 * 0.1))
            .collect();

        let context = test_context(20, vec![0, 5], historical, live);
        let results = context.calculate().expect("enough candles for both lookbacks");
        assert!(results.contains_key("0"));
        assert!(results.contains_key("5"));
    }

    /// Degenerate case (`spec.md` §7): fewer candles than `length` yields
    /// no results at all rather than a panic.
    #[tokio::test]
    async fn too_few_candles_yields_no_results() {
        let context = test_context(50, vec![0], Vec::new(), vec![candle_at(0.0, 1.0)]);
        assert!(context.calculate().is_none());
    }
}
