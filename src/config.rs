use serde::Deserialize;

/// Process configuration, loaded from the environment (with an optional
/// `.env` file) the way the original's `pydantic_settings.BaseSettings`
/// subclasses did per `Port800x.py` — one `Settings` struct per process,
/// read once at startup (`SPEC_FULL.md` §2 `config`).
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    pub influx_url: String,
    pub influx_token: String,
    pub influx_org: String,
    #[serde(default = "default_influx_bucket")]
    pub influx_bucket: String,

    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379/0".to_string()
}

fn default_influx_bucket() -> String {
    "trading_data".to_string()
}

fn default_bind_addr() -> String {
    "0.0.0.0:8000".to_string()
}

impl Settings {
    /// Loads `REDIS_URL`, `INFLUX_URL`, `INFLUX_TOKEN`, `INFLUX_ORG`,
    /// `INFLUX_BUCKET`, and `BIND_ADDR` from the process environment,
    /// falling back to a local `.env` file if present. Failure here is a
    /// fatal startup condition — the one place this crate exits the
    /// process on error rather than recovering locally (`spec.md` §7).
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let cfg = config::Config::builder()
            .set_default("redis_url", default_redis_url())?
            .set_default("influx_bucket", default_influx_bucket())?
            .set_default("bind_addr", default_bind_addr())?
            .add_source(config::Environment::default())
            .build()?;

        Ok(cfg.try_deserialize()?)
    }
}
