use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono_tz::Tz;
use dashmap::DashMap;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::domain::candle::Candle;
use crate::domain::interval::Interval;
use crate::domain::tick::Tick;
use crate::error::EngineError;
use crate::resampler::Resampler;
use crate::upstream::TickCacheClient;

/// A group sweeps and tears itself down once this long has passed with
/// zero attached clients (`spec.md` §4.4 "Cleanup task").
const SWEEP_GRACE: Duration = Duration::from_secs(60);

pub type ClientId = u64;
pub type ResamplerKey = (Interval, Tz);

/// What a group sends its live clients for one tick on one `(interval,
/// timezone)` key (`spec.md` §4.4 step 2).
#[derive(Debug, Clone, Copy)]
pub struct LivePayload {
    pub completed_bar: Option<Candle>,
    /// `None` on the tick that completes a tick-count bar, matching
    /// `current_bar: null` in the original's wire payload
    /// (`examples/original_source/Microservices/Port8003.py:371-376`).
    pub current_bar: Option<Candle>,
}

struct ClientHandle {
    key: ResamplerKey,
    sender: mpsc::UnboundedSender<LivePayload>,
}

struct Inner {
    resamplers: HashMap<ResamplerKey, Resampler>,
    clients: HashMap<ClientId, ClientHandle>,
    next_client_id: ClientId,
}

/// Per-instrument multiplexer: one upstream tick subscription driving N
/// Resamplers, fanned out to M attached clients (`spec.md` §4.4). Created
/// lazily by `GroupRegistry::get_or_create`, torn down by `GroupRegistry::sweep`.
pub struct SubscriptionGroup {
    pub instrument: String,
    inner: Arc<Mutex<Inner>>,
    listener: JoinHandle<()>,
}

impl SubscriptionGroup {
    async fn spawn(instrument: String, tick_cache: TickCacheClient) -> Result<Self, EngineError> {
        let mut pubsub = tick_cache.subscribe(&instrument).await?;

        let inner = Arc::new(Mutex::new(Inner {
            resamplers: HashMap::new(),
            clients: HashMap::new(),
            next_client_id: 0,
        }));

        let loop_inner = inner.clone();
        let loop_instrument = instrument.clone();
        let listener = tokio::spawn(async move {
            let mut stream = pubsub.on_message();
            while let Some(msg) = stream.next().await {
                let raw: String = match msg.get_payload() {
                    Ok(payload) => payload,
                    Err(error) => {
                        tracing::warn!(instrument = %loop_instrument, %error, "malformed pubsub payload");
                        continue;
                    }
                };
                match Tick::decode(&raw) {
                    Some(tick) => dispatch_tick(&loop_inner, &tick),
                    None => tracing::warn!(instrument = %loop_instrument, "dropping malformed tick"),
                }
            }
            tracing::info!(instrument = %loop_instrument, "upstream listener exiting");
        });

        Ok(Self { instrument, inner, listener })
    }

    /// Ensures a Resampler exists for `key`, creating one with fresh state
    /// if this is the first client requesting this `(interval, timezone)`.
    pub fn ensure_resampler(&self, key: ResamplerKey) {
        self.inner
            .lock()
            .resamplers
            .entry(key)
            .or_insert_with(|| Resampler::new(key.0, key.1));
    }

    /// Registers a client's live-payload channel under `key`. The caller
    /// (the Connection Manager) only calls this after backfill completes
    /// and the client is confirmed still connected (`spec.md` §4.5 step 5).
    pub fn register_client(&self, key: ResamplerKey, sender: mpsc::UnboundedSender<LivePayload>) -> ClientId {
        let mut inner = self.inner.lock();
        let id = inner.next_client_id;
        inner.next_client_id += 1;
        inner.clients.insert(id, ClientHandle { key, sender });
        id
    }

    /// Removes a client from the live set (`spec.md` §4.4 `detach`).
    pub fn unregister_client(&self, id: ClientId) {
        self.inner.lock().clients.remove(&id);
    }

    pub fn client_count(&self) -> usize {
        self.inner.lock().clients.len()
    }

    pub fn resampler_count(&self) -> usize {
        self.inner.lock().resamplers.len()
    }
}

impl Drop for SubscriptionGroup {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

/// One incoming tick, fanned through every Resampler in the group, then
/// routed to clients whose view matches the Resampler's key
/// (`spec.md` §4.4 "Upstream loop" steps 1–3). Runs with the group lock
/// held for the duration — the hot path does not yield mid-dispatch
/// (`spec.md` §5).
fn dispatch_tick(inner: &Arc<Mutex<Inner>>, tick: &Tick) {
    let mut guard = inner.lock();
    let Inner { resamplers, clients, .. } = &mut *guard;

    let mut payloads: HashMap<ResamplerKey, LivePayload> = HashMap::with_capacity(resamplers.len());
    for (key, resampler) in resamplers.iter_mut() {
        let (completed_bar, current_bar) = resampler.add(tick);
        payloads.insert(*key, LivePayload { completed_bar, current_bar });
    }

    for client in clients.values() {
        if let Some(payload) = payloads.get(&client.key) {
            // Unbounded channel: send never blocks, so one slow client
            // cannot stall dispatch to the others (`spec.md` §4.4
            // "Isolation"). A closed receiver just means the client's
            // handler has already exited; it'll be unregistered on its
            // own teardown path.
            let _ = client.sender.send(*payload);
        }
    }
}

/// Owns the instrument → `SubscriptionGroup` map and the idle-group
/// sweeper (`spec.md` §3 "Subscription Group (entity)", §4.4 "Cleanup task").
pub struct GroupRegistry {
    groups: DashMap<String, Arc<SubscriptionGroup>>,
    empty_since: DashMap<String, Instant>,
    tick_cache: TickCacheClient,
}

impl GroupRegistry {
    pub fn new(tick_cache: TickCacheClient) -> Self {
        Self {
            groups: DashMap::new(),
            empty_since: DashMap::new(),
            tick_cache,
        }
    }

    pub async fn get_or_create(&self, instrument: &str) -> Result<Arc<SubscriptionGroup>, EngineError> {
        if let Some(existing) = self.groups.get(instrument) {
            return Ok(existing.clone());
        }
        let group = Arc::new(SubscriptionGroup::spawn(instrument.to_string(), self.tick_cache.clone()).await?);
        self.groups.insert(instrument.to_string(), group.clone());
        self.empty_since.remove(instrument);
        Ok(group)
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// `(instrument, client_count, resampler_count)` per live group, for
    /// the ambient `/metrics/groups` endpoint (`SPEC_FULL.md` §7).
    pub fn snapshot(&self) -> Vec<(String, usize, usize)> {
        self.groups
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().client_count(), entry.value().resampler_count()))
            .collect()
    }

    /// One cleanup sweep: groups with zero clients for a full grace
    /// interval are released (`spec.md` §4.4). Intended to run on a
    /// ~60 s `tokio::time::interval` ticker owned by the engine.
    pub fn sweep(&self) {
        let now = Instant::now();
        let mut to_remove = Vec::new();

        for entry in self.groups.iter() {
            let instrument = entry.key().clone();
            if entry.value().client_count() == 0 {
                let since = *self.empty_since.entry(instrument.clone()).or_insert(now);
                if now.duration_since(since) >= SWEEP_GRACE {
                    to_remove.push(instrument);
                }
            } else {
                self.empty_since.remove(&instrument);
            }
        }

        for instrument in to_remove {
            self.groups.remove(&instrument);
            self.empty_since.remove(&instrument);
            tracing::info!(instrument, "swept idle subscription group");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    fn fresh_inner() -> Arc<Mutex<Inner>> {
        Arc::new(Mutex::new(Inner { resamplers: HashMap::new(), clients: HashMap::new(), next_client_id: 0 }))
    }

    fn register(inner: &Arc<Mutex<Inner>>, key: ResamplerKey) -> (ClientId, mpsc::UnboundedReceiver<LivePayload>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut guard = inner.lock();
        let id = guard.next_client_id;
        guard.next_client_id += 1;
        guard.clients.insert(id, ClientHandle { key, sender: tx });
        (id, rx)
    }

    fn tick(price: f64, volume: i64, timestamp: f64) -> Tick {
        Tick { price, volume, timestamp }
    }

    /// Scenario 5 (`spec.md` §8): one group, two clients on `(1m,UTC)` and
    /// `(5m,UTC)`. Ten ticks straddling a 1-minute boundary complete at
    /// least one bar for the 1m client and none for the 5m client.
    #[test]
    fn scenario_5_multiplexer_fan_out_respects_view_boundaries() {
        let inner = fresh_inner();
        let one_min = (Interval::TimeInterval(StdDuration::from_secs(60)), chrono_tz::UTC);
        let five_min = (Interval::TimeInterval(StdDuration::from_secs(300)), chrono_tz::UTC);
        inner.lock().resamplers.insert(one_min, Resampler::new(one_min.0, one_min.1));
        inner.lock().resamplers.insert(five_min, Resampler::new(five_min.0, five_min.1));

        let (_id1, mut rx1) = register(&inner, one_min);
        let (_id2, mut rx2) = register(&inner, five_min);

        for i in 0..10 {
            dispatch_tick(&inner, &tick(100.0 + i as f64, 1, 55.0 + i as f64));
        }

        let mut client1_saw_completed = false;
        while let Ok(payload) = rx1.try_recv() {
            if payload.completed_bar.is_some() {
                client1_saw_completed = true;
            }
        }
        assert!(client1_saw_completed, "1m client should see at least one completed bar crossing the 60s boundary");

        let mut client2_saw_completed = false;
        while let Ok(payload) = rx2.try_recv() {
            if payload.completed_bar.is_some() {
                client2_saw_completed = true;
            }
        }
        assert!(!client2_saw_completed, "5m client should not complete a bar within a 10-second span");
    }

    /// Isolation (`spec.md` §4.4): a client that never drains its channel
    /// must not prevent the other client's payloads from being delivered —
    /// an unbounded channel send never blocks regardless of receiver state.
    #[test]
    fn slow_client_does_not_block_delivery_to_others() {
        let inner = fresh_inner();
        let key = (Interval::TickInterval(1), chrono_tz::UTC);
        inner.lock().resamplers.insert(key, Resampler::new(key.0, key.1));

        let (_slow_id, _slow_rx_never_drained) = register(&inner, key);
        let (_fast_id, mut fast_rx) = register(&inner, key);

        for i in 0..50 {
            dispatch_tick(&inner, &tick(100.0, 1, i as f64));
        }

        let mut received = 0;
        while fast_rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, 50, "the fast client must receive every payload regardless of the slow client's backlog");
    }
}
