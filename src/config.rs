//! Configuration module

use crate::error::ConfigError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable naming a JSON config file
pub const CONFIG_ENV: &str = "PIPELINE_CONFIG";

/// Main configuration struct
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Number of producer units
    pub producers: usize,

    /// Number of consumer units
    pub consumers: usize,

    /// Items emitted by each producer
    pub messages_per_producer: usize,

    /// Bounded channel capacity
    pub channel_capacity: usize,

    /// Simulated production cost per item
    pub producer_delay: DelayRange,

    /// Simulated consumption cost per item
    pub consumer_delay: DelayRange,

    /// Bounded wait of a single consumer `take`
    pub take_timeout_ms: u64,

    /// Maximum time the coordinator waits for workers before forcing cancellation
    pub shutdown_grace_ms: u64,

    /// Interval of periodic stats events, `None` disables them
    pub stats_interval_ms: Option<u64>,
}

/// Uniform delay interval `[min, max)` in milliseconds.
/// `min == max` is a fixed delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayRange {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl DelayRange {
    pub const fn from_millis(min_ms: u64, max_ms: u64) -> Self {
        Self { min_ms, max_ms }
    }

    pub const fn fixed(ms: u64) -> Self {
        Self::from_millis(ms, ms)
    }

    pub const fn zero() -> Self {
        Self::fixed(0)
    }

    pub fn min(&self) -> Duration {
        Duration::from_millis(self.min_ms)
    }

    pub fn max(&self) -> Duration {
        Duration::from_millis(self.max_ms)
    }

    /// Draw a delay uniformly from the interval
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        if self.max_ms <= self.min_ms {
            return self.min();
        }
        rng.gen_range(self.min()..self.max())
    }

    fn validate(&self, which: &'static str) -> Result<(), ConfigError> {
        if self.min_ms > self.max_ms {
            return Err(ConfigError::InvalidDelay {
                which,
                min: self.min(),
                max: self.max(),
            });
        }
        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            producers: 10,
            consumers: 5,
            messages_per_producer: 5,
            channel_capacity: 100,
            producer_delay: DelayRange::from_millis(100, 500),
            consumer_delay: DelayRange::from_millis(200, 600),
            take_timeout_ms: 1_000,
            shutdown_grace_ms: 60_000,
            stats_interval_ms: Some(5_000),
        }
    }
}

impl PipelineConfig {
    /// Defaults with the three worker counts overridden
    pub fn with_counts(producers: usize, consumers: usize, messages_per_producer: usize) -> Self {
        Self {
            producers,
            consumers,
            messages_per_producer,
            ..Self::default()
        }
    }

    /// Reject anything the coordinator cannot run. Nothing is clamped.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.producers == 0 {
            return Err(ConfigError::ZeroProducers);
        }
        if self.consumers == 0 {
            return Err(ConfigError::ZeroConsumers);
        }
        if self.messages_per_producer == 0 {
            return Err(ConfigError::ZeroMessages);
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.take_timeout_ms == 0 {
            return Err(ConfigError::ZeroTakeTimeout);
        }
        self.producer_delay.validate("producer")?;
        self.consumer_delay.validate("consumer")?;
        Ok(())
    }

    /// Total items a complete run delivers
    pub fn expected_items(&self) -> usize {
        self.producers.saturating_mul(self.messages_per_producer)
    }

    pub fn take_timeout(&self) -> Duration {
        Duration::from_millis(self.take_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn stats_interval(&self) -> Option<Duration> {
        self.stats_interval_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    /// Load config from environment
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var(CONFIG_ENV) {
            Ok(path) if Path::new(&path).exists() => Self::load(path),
            _ => Ok(Self::default()),
        }
    }

    /// Load config from a JSON file; missing fields take their defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: PipelineConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save config to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
