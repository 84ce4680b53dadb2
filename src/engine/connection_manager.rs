use std::sync::Arc;

use tokio::sync::mpsc;

use crate::domain::candle::Candle;
use crate::domain::view::SubscriptionView;
use crate::error::EngineError;
use crate::resampler::resample_backfill;
use crate::upstream::TickCacheClient;

use super::subscription_group::{ClientId, GroupRegistry, LivePayload, SubscriptionGroup};

/// Outcome of `ConnectionManager::attach`: either the client vanished
/// somewhere during backfill (`spec.md` §4.5 step 4 — never enters the
/// live set), or it's now registered and the caller owns its live-payload
/// receiver plus the one-shot backfill frame to send first.
pub enum Attachment {
    ClientGone,
    Live {
        group: Arc<SubscriptionGroup>,
        client_id: ClientId,
        backfill: Vec<Candle>,
        live: mpsc::UnboundedReceiver<LivePayload>,
    },
}

/// Runs the Backfill-then-Live Handshake for one client
/// (`spec.md` §4.5). The explicit state machine named in the design notes
/// (`Accepted → BackfillSending → Live → Closing`) is realized as this
/// function's control flow plus the `Attachment` it returns: the ws
/// handler that calls it is itself the `Closing` transition on exit.
pub struct ConnectionManager {
    groups: Arc<GroupRegistry>,
}

impl ConnectionManager {
    pub fn new(groups: Arc<GroupRegistry>) -> Self {
        Self { groups }
    }

    /// `still_connected` is polled before every emission so an aborted
    /// transport never receives a stale backfill or joins the live set
    /// (`spec.md` §4.5 steps 3e, 4).
    pub async fn attach(
        &self,
        view: &SubscriptionView,
        tick_cache: &TickCacheClient,
        still_connected: impl Fn() -> bool,
    ) -> Result<Attachment, EngineError> {
        let group = self.groups.get_or_create(&view.instrument).await?;
        let key = view.resampler_key();
        group.ensure_resampler(key);

        // A throwaway Resampler, deliberately not the group's live one —
        // historical ticks must never perturb live Resampler state
        // (`spec.md` §9).
        let ticks = tick_cache.read_intraday(&view.instrument).await?;
        let backfill = resample_backfill(view.interval, view.timezone, &ticks).await;

        if !still_connected() {
            return Ok(Attachment::ClientGone);
        }

        let (sender, live) = mpsc::unbounded_channel();

        if !still_connected() {
            return Ok(Attachment::ClientGone);
        }

        let client_id = group.register_client(key, sender);
        Ok(Attachment::Live { group, client_id, backfill, live })
    }

    /// Teardown: always safe to call, regardless of which state the
    /// client reached (`spec.md` §4.5 step 7 — "on any exit path").
    pub fn detach(&self, group: &SubscriptionGroup, client_id: ClientId) {
        group.unregister_client(client_id);
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::interval::Interval;
    use crate::domain::tick::Tick;
    use crate::resampler::{resample_backfill, Resampler};

    fn tick(price: f64, volume: i64, timestamp: f64) -> Tick {
        Tick { price, volume, timestamp }
    }

    /// Backfill+live no-duplicate invariant (`spec.md` §8): the group's
    /// live Resampler keeps running from before a client attaches, oblivious
    /// to that client's existence. A fresh backfill Resampler folds only the
    /// cache snapshot taken at attach time. No completed-bar timestamp from
    /// the snapshot reappears among the bars the live Resampler completes
    /// *after* the snapshot was taken, because the live Resampler had
    /// already emitted (and delivered to earlier clients) anything it
    /// completed before that point.
    #[tokio::test]
    async fn backfill_and_live_never_repeat_a_completed_timestamp() {
        let interval = Interval::TickInterval(3);
        let zone = chrono_tz::UTC;

        // The group's live resampler has been running since group creation,
        // long before this client attaches.
        let mut live_resampler = Resampler::new(interval, zone);
        let pre_attach_ticks: Vec<Tick> = (0..9).map(|i| tick(100.0 + i as f64, 1, i as f64)).collect();
        for t in &pre_attach_ticks {
            live_resampler.add(t);
        }

        // Cache snapshot taken at attach time: identical history, folded
        // through a throwaway Resampler (never the group's live one).
        let backfill = resample_backfill(interval, zone, &pre_attach_ticks).await;
        let backfill_timestamps: Vec<f64> = backfill.iter().map(|c| c.unix_timestamp).collect();

        // Ticks arriving between the cache read and the client joining the
        // live set, plus ordinary post-attach ticks, all flow into the
        // *same* live resampler the group has always used.
        let post_attach_ticks: Vec<Tick> = (9..18).map(|i| tick(100.0 + i as f64, 1, i as f64)).collect();
        let mut live_completed_after_attach = Vec::new();
        for t in &post_attach_ticks {
            let (completed, _current) = live_resampler.add(t);
            if let Some(bar) = completed {
                live_completed_after_attach.push(bar.unix_timestamp);
            }
        }

        for ts in &backfill_timestamps {
            assert!(
                !live_completed_after_attach.contains(ts),
                "timestamp {ts} appeared in both the backfill payload and a post-attach live payload"
            );
        }
    }
}

