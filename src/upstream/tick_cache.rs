use redis::aio::{ConnectionManager, PubSub};
use redis::AsyncCommands;

use crate::domain::tick::Tick;
use crate::error::EngineError;

/// Client for the two Redis surfaces the tick ingestion pipeline exposes
/// (`spec.md` §6, C4): the capped intraday tick list, and the live pub/sub
/// channel. Command reads go through the shared `ConnectionManager`;
/// subscriptions get their own dedicated connection, since `redis-rs`
/// doesn't let pub/sub and request/response share one connection
/// (`SPEC_FULL.md` §4).
#[derive(Clone)]
pub struct TickCacheClient {
    commands: ConnectionManager,
    client: redis::Client,
}

impl TickCacheClient {
    pub fn new(commands: ConnectionManager, client: redis::Client) -> Self {
        Self { commands, client }
    }

    /// Reads the full intraday tick list for `instrument`, oldest-to-newest,
    /// decoding each element and dropping malformed entries silently
    /// (`spec.md` §4.5 step 3a, §7 "Malformed tick").
    pub async fn read_intraday(&self, instrument: &str) -> Result<Vec<Tick>, EngineError> {
        let key = format!("intraday_ticks:{instrument}");
        let raw: Vec<String> = self.commands.clone().lrange(&key, 0, -1).await?;
        let ticks = raw
            .iter()
            .filter_map(|entry| match Tick::decode(entry) {
                Some(tick) => Some(tick),
                None => {
                    tracing::warn!(instrument, "dropping malformed tick from intraday cache");
                    None
                }
            })
            .collect();
        Ok(ticks)
    }

    /// Liveness probe for the ambient `/health` endpoint: a Redis `PING`
    /// over the shared command connection.
    pub async fn ping(&self) -> bool {
        redis::cmd("PING").query_async::<_, String>(&mut self.commands.clone()).await.is_ok()
    }

    /// Opens a dedicated pub/sub connection subscribed to
    /// `live_ticks:{instrument}`. The caller owns the handle and is
    /// responsible for unsubscribing on teardown (`spec.md` §5
    /// "Cancelling a group's upstream listener MUST unsubscribe").
    pub async fn subscribe(&self, instrument: &str) -> Result<PubSub, EngineError> {
        let conn = self.client.get_async_connection().await?;
        let mut pubsub = conn.into_pubsub();
        pubsub.subscribe(format!("live_ticks:{instrument}")).await?;
        Ok(pubsub)
    }
}
