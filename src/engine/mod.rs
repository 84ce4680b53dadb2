pub mod connection_manager;
pub mod regression_service;
pub mod subscription_group;

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

pub use connection_manager::ConnectionManager;
pub use regression_service::RegressionService;
pub use subscription_group::GroupRegistry;

use crate::upstream::{HistoricalClient, TickCacheClient};

/// The single injected value threaded through every WebSocket handler
/// (`spec.md` §9 "Global mutable state" design note — replaces the
/// original's module-level service singletons with one explicit value
/// built once in `main` and passed via Axum's `State`).
pub struct LiveStreamingEngine {
    pub connection_manager: ConnectionManager,
    pub groups: Arc<GroupRegistry>,
    pub regression: Arc<RegressionService>,
    pub tick_cache: TickCacheClient,
}

impl LiveStreamingEngine {
    pub fn new(tick_cache: TickCacheClient, historical: Arc<HistoricalClient>) -> Self {
        let groups = Arc::new(GroupRegistry::new(tick_cache.clone()));
        let connection_manager = ConnectionManager::new(groups.clone());
        let regression = Arc::new(RegressionService::new(historical, tick_cache.clone()));

        Self { connection_manager, groups, regression, tick_cache }
    }

    /// The idle-group sweeper named in `spec.md` §4.4 "Cleanup task":
    /// released groups are swept out roughly every 60 seconds.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let groups = self.groups.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(60));
            loop {
                ticker.tick().await;
                groups.sweep();
            }
        })
    }
}
