//! Boot-time configuration, loaded once from environment variables via
//! `clap`'s `env` feature and handed down explicitly to the pieces that
//! need it — no hidden globals on the request path.

use crate::error::LumbermillError;
use clap::Parser;

/// Root configuration for one Lumbermill process.
///
/// Every field is overridable by the environment variable named in its
/// `env` attribute. Call [`AppConfig::parse_and_validate`] once at startup;
/// a malformed value is a fatal boot error, never a runtime one.
#[derive(Debug, Clone, Parser)]
#[command(name = "lumbermill", about = "Log-drain ingestion service")]
pub struct AppConfig {
    /// HTTP listen port.
    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Comma-separated list of backend sink hosts. Empty selects the null sink.
    #[arg(long, env = "SINK_HOSTS", default_value = "")]
    pub sink_hosts: String,

    #[arg(long, env = "SINK_USER", default_value = "")]
    pub sink_user: String,

    #[arg(long, env = "SINK_PASSWORD", default_value = "")]
    pub sink_password: String,

    #[arg(long, env = "SINK_DATABASE", default_value = "")]
    pub sink_database: String,

    #[arg(long, env = "SINK_INSECURE", default_value_t = false)]
    pub sink_insecure: bool,

    #[arg(long, env = "SINK_SKIP_VERIFY", default_value_t = false)]
    pub sink_skip_verify: bool,

    /// Optional secondary poster, mirrored to every destination's batches
    /// with retry-with-backoff. Empty disables it.
    #[arg(long, env = "SECONDARY_SINK_HOST", default_value = "")]
    pub secondary_sink_host: String,

    /// `user:pass|user:pass|...`. Empty selects the allow-all authenticator.
    #[arg(long, env = "CRED_STORE", default_value = "")]
    pub cred_store: String,

    #[arg(long, env = "METRICS_USER", default_value = "")]
    pub metrics_user: String,

    #[arg(long, env = "METRICS_PASSWORD", default_value = "")]
    pub metrics_password: String,

    /// Enables verbose unknown-line logging.
    #[arg(long, env = "DEBUG", default_value_t = false)]
    pub debug: bool,

    /// P: concurrent workers per destination.
    #[arg(long, env = "WORKERS_PER_DESTINATION", default_value_t = 6)]
    pub workers_per_destination: usize,

    /// Per-destination bounded queue capacity.
    #[arg(long, env = "QUEUE_CAPACITY", default_value_t = 500_000)]
    pub queue_capacity: usize,

    /// Connection-recycle tick interval, in seconds.
    #[arg(long, env = "RECYCLE_INTERVAL_SECS", default_value_t = 300)]
    pub recycle_interval_secs: u64,
}

impl AppConfig {
    /// Parse from `std::env` / CLI args and validate. This is the only entry
    /// point `main` should use.
    pub fn parse_and_validate() -> Result<Self, LumbermillError> {
        let config = Self::parse();
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), LumbermillError> {
        if self.workers_per_destination == 0 {
            return Err(LumbermillError::Config(
                "workers_per_destination must be >= 1".into(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(LumbermillError::Config("queue_capacity must be >= 1".into()));
        }
        // Parsed for the side effect of surfacing a malformed CRED_STORE early.
        CredStore::parse(&self.cred_store)?;
        Ok(())
    }

    /// Destination names derived from `SINK_HOSTS`. Empty input yields a
    /// single unnamed "null" destination.
    pub fn destination_names(&self) -> Vec<String> {
        let trimmed = self.sink_hosts.trim();
        if trimmed.is_empty() {
            return vec!["null".to_string()];
        }
        trimmed.split(',').map(|s| s.trim().to_string()).collect()
    }
}

/// Parsed `user:pass|user:pass|...` credential list. Multiple passwords per
/// user are permitted; any match admits.
#[derive(Debug, Clone, Default)]
pub struct CredStore {
    entries: Vec<(String, String)>,
}

impl CredStore {
    pub fn parse(raw: &str) -> Result<Self, LumbermillError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(Self::default());
        }
        let mut entries = Vec::new();
        for entry in raw.split('|') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            let (user, pass) = entry.split_once(':').ok_or_else(|| {
                LumbermillError::Config(format!("CRED_STORE entry missing ':': {entry:?}"))
            })?;
            entries.push((user.to_string(), pass.to_string()));
        }
        Ok(Self { entries })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn admits(&self, user: &str, pass: &str) -> bool {
        self.entries
            .iter()
            .any(|(u, p)| u == user && p == pass)
    }
}
