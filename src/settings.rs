// =============================================================================
// Process Settings — environment-driven bootstrap configuration
// =============================================================================
//
// Everything needed to wire the engine to the outside world: bus URL and
// topics, queue group, document-store URI, API bind address, and the
// config-cache TTL.  All values carry defaults so the engine starts in a
// dev environment with nothing but a local NATS server.
//
// Per-strategy parameters do NOT live here — they are resolved through the
// ConfigManager priority chain (db-symbol > db-global > env > defaults).
// =============================================================================

use std::time::Duration;

use anyhow::{bail, Result};
use tracing::info;

/// Engine-level settings resolved once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    /// NATS server URL, e.g. `nats://localhost:4222`.
    pub bus_url: String,
    /// Inbound subject carrying normalised exchange events.
    pub input_topic: String,
    /// Outbound subject for trading signals.
    pub output_topic: String,
    /// Queue group name. Mandatory: losing it causes duplicate processing
    /// across replicas.
    pub queue_group: String,
    /// MongoDB connection string. Empty disables the document store and the
    /// engine runs on env/default parameters only.
    pub mongo_uri: String,
    /// Database name holding the strategy config collections.
    pub mongo_database: String,
    /// REST API bind address.
    pub bind_addr: String,
    /// TTL for resolved strategy parameters in the config cache.
    pub config_cache_ttl: Duration,
    /// Deadline applied to every document-store and publish operation.
    pub io_deadline: Duration,
    /// Interval between heartbeat log lines.
    pub heartbeat_interval: Duration,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_secs_or(key: &str, default: u64) -> Duration {
    let secs = std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default);
    Duration::from_secs(secs)
}

impl Settings {
    /// Resolve settings from the process environment.
    pub fn from_env() -> Result<Self> {
        let settings = Self {
            bus_url: env_or("BUS_URL", "nats://localhost:4222"),
            input_topic: env_or("INPUT_TOPIC", "binance.websocket.data"),
            output_topic: env_or("OUTPUT_TOPIC", "signals.trading"),
            queue_group: env_or("QUEUE_GROUP", "realtime-strategies-group"),
            mongo_uri: env_or("MONGO_URI", ""),
            mongo_database: env_or("MONGO_DATABASE", "aurora_signals"),
            bind_addr: env_or("BIND_ADDR", "0.0.0.0:8080"),
            config_cache_ttl: env_secs_or("CONFIG_CACHE_TTL_SECONDS", 60),
            io_deadline: env_secs_or("IO_DEADLINE_SECONDS", 5),
            heartbeat_interval: env_secs_or("HEARTBEAT_INTERVAL_SECONDS", 60),
        };

        if settings.queue_group.trim().is_empty() {
            bail!("QUEUE_GROUP must not be empty: load balancing across replicas requires it");
        }

        info!(
            bus_url = %settings.bus_url,
            input_topic = %settings.input_topic,
            output_topic = %settings.output_topic,
            queue_group = %settings.queue_group,
            mongo = !settings.mongo_uri.is_empty(),
            "settings resolved"
        );

        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_env() {
        // Scoped to variables this test does not set.
        let s = Settings {
            bus_url: env_or("AURORA_TEST_UNSET_BUS", "nats://localhost:4222"),
            input_topic: env_or("AURORA_TEST_UNSET_IN", "binance.websocket.data"),
            output_topic: env_or("AURORA_TEST_UNSET_OUT", "signals.trading"),
            queue_group: env_or("AURORA_TEST_UNSET_QG", "realtime-strategies-group"),
            mongo_uri: String::new(),
            mongo_database: "aurora_signals".into(),
            bind_addr: "0.0.0.0:8080".into(),
            config_cache_ttl: env_secs_or("AURORA_TEST_UNSET_TTL", 60),
            io_deadline: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(60),
        };
        assert_eq!(s.bus_url, "nats://localhost:4222");
        assert_eq!(s.queue_group, "realtime-strategies-group");
        assert_eq!(s.config_cache_ttl, Duration::from_secs(60));
    }

    #[test]
    fn env_secs_parses_and_falls_back() {
        std::env::set_var("AURORA_TEST_SECS", "120");
        assert_eq!(env_secs_or("AURORA_TEST_SECS", 60), Duration::from_secs(120));
        std::env::set_var("AURORA_TEST_SECS", "not-a-number");
        assert_eq!(env_secs_or("AURORA_TEST_SECS", 60), Duration::from_secs(60));
        std::env::remove_var("AURORA_TEST_SECS");
    }
}
