use redis::aio::ConnectionManager;
use redis::Client;

/// Opens the command-path `ConnectionManager` plus the raw `Client` every
/// dedicated pub/sub connection is built from (`upstream::TickCacheClient`
/// needs both — `redis-rs` doesn't let pub/sub and request/response share
/// one connection). A bad URL or an unreachable server is the one fatal
/// startup condition this crate halts the process for (`spec.md` §7); every
/// other failure is recovered locally once the process is up.
pub async fn connect(url: &str) -> (ConnectionManager, Client) {
    let client = Client::open(url).unwrap_or_else(|error| {
        tracing::error!(url, %error, "invalid Redis URL");
        std::process::exit(1);
    });

    let commands = ConnectionManager::new(client.clone()).await.unwrap_or_else(|error| {
        tracing::error!(url, %error, "cannot connect to Redis");
        std::process::exit(1);
    });

    (commands, client)
}
