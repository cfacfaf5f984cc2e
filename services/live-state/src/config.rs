//! Service configuration
//!
//! Plain structs with `Default`; `validate` rejects values the core cannot
//! run with. The gateway fills these from the environment.

use std::time::Duration;

use thiserror::Error;

use crate::backpressure::BackpressureConfig;
use crate::delay::DelayBufferConfig;
use crate::normalize::NormalizerConfig;

/// Invalid configuration value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("cannot parse {key}={value}: {reason}")]
    Unparsable {
        key: String,
        value: String,
        reason: String,
    },
}

/// Configuration of the live state core.
#[derive(Debug, Clone)]
pub struct LiveStateConfig {
    pub normalizer: NormalizerConfig,
    pub delay_buffer: DelayBufferConfig,
    pub backpressure: BackpressureConfig,
    /// Largest delay a subscriber may request; also the cleanup horizon.
    pub max_delay_secs: f64,
    /// Period of delay buffer cleanup.
    pub cleanup_interval: Duration,
    /// Republish every raw upstream message to subscribers.
    pub publish_raw: bool,
}

impl Default for LiveStateConfig {
    fn default() -> Self {
        Self {
            normalizer: NormalizerConfig::default(),
            delay_buffer: DelayBufferConfig::default(),
            backpressure: BackpressureConfig::default(),
            max_delay_secs: 300.0,
            cleanup_interval: Duration::from_secs(10),
            publish_raw: false,
        }
    }
}

impl LiveStateConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.max_delay_secs.is_finite() || self.max_delay_secs < 0.0 {
            return Err(ConfigError::Invalid {
                field: "max_delay_secs",
                reason: format!("must be a finite non-negative number, got {}", self.max_delay_secs),
            });
        }
        if self.delay_buffer.max_frames == 0 {
            return Err(ConfigError::Invalid {
                field: "delay_buffer.max_frames",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.delay_buffer.retention_margin_ms < 0 {
            return Err(ConfigError::Invalid {
                field: "delay_buffer.retention_margin_ms",
                reason: "must not be negative".to_string(),
            });
        }
        if self.backpressure.queue_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "backpressure.queue_capacity",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.backpressure.max_subscribers == 0 {
            return Err(ConfigError::Invalid {
                field: "backpressure.max_subscribers",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.normalizer.max_inflated_bytes == 0 {
            return Err(ConfigError::Invalid {
                field: "normalizer.max_inflated_bytes",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.cleanup_interval.is_zero() {
            return Err(ConfigError::Invalid {
                field: "cleanup_interval",
                reason: "must be non-zero".to_string(),
            });
        }
        Ok(())
    }

    /// Whether a requested delay is servable.
    pub fn accepts_delay(&self, delay_secs: f64) -> bool {
        delay_secs.is_finite() && delay_secs >= 0.0 && delay_secs <= self.max_delay_secs
    }
}
