use tracing_subscriber::EnvFilter;

/// Structured, env-filtered logging (`RUST_LOG`), standing in for the
/// original's per-service `logging_config.setup_logging(name)` (`SPEC_FULL.md`
/// §2 `telemetry`). Call once at process start, before anything else logs.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}
