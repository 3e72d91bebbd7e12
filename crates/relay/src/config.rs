//! Relay configuration loaded from environment variables.

use std::collections::HashMap;
use std::time::Duration;

use outbox::OutboxConfig;

/// Pool connections reserved per publisher worker, plus one for the HTTP API.
const CONNECTIONS_PER_WORKER: u32 = 2;

/// Relay configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `DATABASE_URL`: PostgreSQL url; the in-memory store is used when unset
/// - `OUTBOX_WORKERS`: publisher workers (default: `1`)
/// - `OUTBOX_MAX_RETRIES`, `OUTBOX_BACKOFF_BASE_MS`, `OUTBOX_BACKOFF_CAP_MS`,
///   `OUTBOX_BATCH_SIZE`, `OUTBOX_POLL_INTERVAL_MS`, `OUTBOX_CLAIM_TIMEOUT_MS`
/// - `OUTBOX_ROUTING_KEYS`: `Type=key,Type=key`
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub database_url: Option<String>,
    pub workers: usize,
    pub outbox: OutboxConfig,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from `lookup`, falling back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());
        let millis = |key: &str, default: Duration| {
            parsed(key).map(Duration::from_millis).unwrap_or(default)
        };

        let outbox_defaults = defaults.outbox;
        let outbox = OutboxConfig {
            max_retries: parsed("OUTBOX_MAX_RETRIES")
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(outbox_defaults.max_retries),
            backoff_base: millis("OUTBOX_BACKOFF_BASE_MS", outbox_defaults.backoff_base),
            backoff_cap: millis("OUTBOX_BACKOFF_CAP_MS", outbox_defaults.backoff_cap),
            batch_size: parsed("OUTBOX_BATCH_SIZE")
                .and_then(|v| usize::try_from(v).ok())
                .unwrap_or(outbox_defaults.batch_size),
            poll_interval: millis("OUTBOX_POLL_INTERVAL_MS", outbox_defaults.poll_interval),
            claim_timeout: millis("OUTBOX_CLAIM_TIMEOUT_MS", outbox_defaults.claim_timeout),
            routing_keys: lookup("OUTBOX_ROUTING_KEYS")
                .map(|v| parse_routing_keys(&v))
                .unwrap_or_default(),
        };

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            workers: parsed("OUTBOX_WORKERS")
                .and_then(|v| usize::try_from(v).ok())
                .filter(|w| *w > 0)
                .unwrap_or(defaults.workers),
            outbox,
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Size of the PostgreSQL pool for the configured worker count.
    pub fn max_connections(&self) -> u32 {
        u32::try_from(self.workers)
            .unwrap_or(u32::MAX)
            .saturating_mul(CONNECTIONS_PER_WORKER)
            .saturating_add(1)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            database_url: None,
            workers: 1,
            outbox: OutboxConfig::default(),
        }
    }
}

/// Parses `Type=key,Type=key`; malformed pairs are skipped.
fn parse_routing_keys(value: &str) -> HashMap<String, String> {
    value
        .split(',')
        .filter_map(|pair| {
            let (data_type, key) = pair.split_once('=')?;
            let (data_type, key) = (data_type.trim(), key.trim());
            (!data_type.is_empty() && !key.is_empty())
                .then(|| (data_type.to_string(), key.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.log_level, "info");
        assert!(config.database_url.is_none());
        assert_eq!(config.workers, 1);
        assert_eq!(config.outbox, OutboxConfig::default());
    }

    #[test]
    fn test_addr_formatting() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Config::default()
        };
        assert_eq!(config.addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_outbox_settings_from_lookup() {
        let config = Config::from_lookup(lookup_from(&[
            ("OUTBOX_WORKERS", "4"),
            ("OUTBOX_MAX_RETRIES", "8"),
            ("OUTBOX_BACKOFF_BASE_MS", "250"),
            ("OUTBOX_BACKOFF_CAP_MS", "10000"),
            ("OUTBOX_BATCH_SIZE", "20"),
            ("OUTBOX_POLL_INTERVAL_MS", "50"),
            ("OUTBOX_CLAIM_TIMEOUT_MS", "45000"),
            ("OUTBOX_ROUTING_KEYS", "OrderPlacedV1=orders.placed, Bad, =x"),
            ("DATABASE_URL", "postgres://localhost/relay"),
        ]));

        assert_eq!(config.workers, 4);
        assert_eq!(config.outbox.max_retries, 8);
        assert_eq!(config.outbox.backoff_base, Duration::from_millis(250));
        assert_eq!(config.outbox.backoff_cap, Duration::from_secs(10));
        assert_eq!(config.outbox.batch_size, 20);
        assert_eq!(config.outbox.poll_interval, Duration::from_millis(50));
        assert_eq!(config.outbox.claim_timeout, Duration::from_secs(45));
        assert_eq!(config.outbox.routing_keys.len(), 1);
        assert_eq!(
            config.outbox.routing_keys["OrderPlacedV1"],
            "orders.placed".to_string()
        );
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://localhost/relay")
        );
    }

    #[test]
    fn test_unparseable_values_fall_back() {
        let config = Config::from_lookup(lookup_from(&[
            ("PORT", "http"),
            ("OUTBOX_WORKERS", "0"),
            ("OUTBOX_BATCH_SIZE", "-1"),
            ("DATABASE_URL", " "),
        ]));
        assert_eq!(config.port, 3000);
        assert_eq!(config.workers, 1);
        assert_eq!(config.outbox.batch_size, 100);
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_max_connections_saturates() {
        let config = Config {
            workers: 4,
            ..Config::default()
        };
        assert_eq!(config.max_connections(), 9);

        let config = Config::from_lookup(lookup_from(&[(
            "OUTBOX_WORKERS",
            "18446744073709551615",
        )]));
        assert_eq!(config.max_connections(), u32::MAX);
    }
}
