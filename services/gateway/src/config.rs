use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use live_state::LiveStateConfig;
use live_state::config::ConfigError;
use live_state::ingestion::ReplayConfig;

use crate::rate_limit::{CONNECTION_BURST, CONNECTION_REFILL_PER_SEC};

/// Gateway settings, read from `LIVE_*` environment variables.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub bind_addr: SocketAddr,
    /// Recorded session to replay instead of waiting for `/v1/ingest`.
    pub replay_file: Option<PathBuf>,
    pub replay: ReplayConfig,
    pub live: LiveStateConfig,
    /// Capacity of the ingest queue feeding the pipeline.
    pub ingest_queue: usize,
    /// Stream connection attempts allowed in a burst per client IP.
    pub connect_burst: u32,
    /// Sustained stream connection attempts per second per client IP.
    pub connect_per_sec: f64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 4000)),
            replay_file: None,
            replay: ReplayConfig::default(),
            live: LiveStateConfig::default(),
            ingest_queue: 1024,
            connect_burst: CONNECTION_BURST,
            connect_per_sec: CONNECTION_REFILL_PER_SEC,
        }
    }
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(addr) = parse(&lookup, "LIVE_BIND_ADDR")? {
            config.bind_addr = addr;
        }
        config.replay_file = lookup("LIVE_REPLAY_FILE")
            .filter(|path| !path.trim().is_empty())
            .map(PathBuf::from);
        if let Some(ms) = parse::<u64, _>(&lookup, "LIVE_REPLAY_INTERVAL_MS")? {
            config.replay.interval = Duration::from_millis(ms);
        }
        if let Some(secs) = parse(&lookup, "LIVE_MAX_DELAY_SECS")? {
            config.live.max_delay_secs = secs;
        }
        if let Some(capacity) = parse(&lookup, "LIVE_QUEUE_CAPACITY")? {
            config.live.backpressure.queue_capacity = capacity;
        }
        if let Some(limit) = parse(&lookup, "LIVE_MAX_SUBSCRIBERS")? {
            config.live.backpressure.max_subscribers = limit;
        }
        if let Some(publish_raw) = parse(&lookup, "LIVE_PUBLISH_RAW")? {
            config.live.publish_raw = publish_raw;
        }
        if let Some(burst) = parse(&lookup, "LIVE_CONNECT_BURST")? {
            config.connect_burst = burst;
        }
        if let Some(rate) = parse::<f64, _>(&lookup, "LIVE_CONNECT_PER_SEC")? {
            if !rate.is_finite() || rate < 0.0 {
                return Err(ConfigError::Invalid {
                    field: "connect_per_sec",
                    reason: format!("must be a finite non-negative number, got {}", rate),
                });
            }
            config.connect_per_sec = rate;
        }

        config.live.validate()?;
        Ok(config)
    }
}

fn parse<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let Some(value) = lookup(key) else {
        return Ok(None);
    };
    value
        .trim()
        .parse()
        .map(Some)
        .map_err(|e: T::Err| ConfigError::Unparsable {
            key: key.to_string(),
            value,
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.bind_addr.to_string(), "0.0.0.0:4000");
        assert!(config.replay_file.is_none());
        assert_eq!(config.replay.interval, Duration::from_millis(100));
        assert_eq!(config.live.max_delay_secs, 300.0);
        assert!(!config.live.publish_raw);
        assert_eq!(config.connect_burst, CONNECTION_BURST);
    }

    #[test]
    fn test_overrides() {
        let config = GatewayConfig::from_lookup(lookup(&[
            ("LIVE_BIND_ADDR", "127.0.0.1:9000"),
            ("LIVE_REPLAY_FILE", "/data/race.jsonl"),
            ("LIVE_REPLAY_INTERVAL_MS", "0"),
            ("LIVE_MAX_DELAY_SECS", "60"),
            ("LIVE_QUEUE_CAPACITY", "64"),
            ("LIVE_MAX_SUBSCRIBERS", "5"),
            ("LIVE_PUBLISH_RAW", "true"),
            ("LIVE_CONNECT_BURST", "3"),
            ("LIVE_CONNECT_PER_SEC", "0.5"),
        ]))
        .unwrap();

        assert_eq!(config.bind_addr.port(), 9000);
        assert_eq!(config.replay_file, Some(PathBuf::from("/data/race.jsonl")));
        assert_eq!(config.replay.interval, Duration::ZERO);
        assert_eq!(config.live.max_delay_secs, 60.0);
        assert_eq!(config.live.backpressure.queue_capacity, 64);
        assert_eq!(config.live.backpressure.max_subscribers, 5);
        assert!(config.live.publish_raw);
        assert_eq!(config.connect_burst, 3);
        assert_eq!(config.connect_per_sec, 0.5);
    }

    #[test]
    fn test_invalid_values() {
        let err = GatewayConfig::from_lookup(lookup(&[("LIVE_QUEUE_CAPACITY", "lots")])).unwrap_err();
        assert!(matches!(err, ConfigError::Unparsable { ref key, .. } if key == "LIVE_QUEUE_CAPACITY"));

        let err = GatewayConfig::from_lookup(lookup(&[("LIVE_MAX_DELAY_SECS", "-5")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "max_delay_secs", .. }));
    }
}
