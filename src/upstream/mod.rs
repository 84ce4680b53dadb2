pub mod historical;
pub mod tick_cache;

pub use historical::HistoricalClient;
pub use tick_cache::TickCacheClient;
