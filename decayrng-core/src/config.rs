//! Configuration management for DecayRNG components

use crate::calibrator::{bucket_count_for, symbol_width};
use crate::symbol::Symbol;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// What happens to still-queued symbols of an epoch judged to have drifted
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DriftPolicy {
    /// Keep them: they were valid output when produced
    #[default]
    Retain,
    /// Remove them from the output queue on drift
    Retract,
}

/// Engine configuration, fixed at construction
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Intervals collected per calibration baseline
    #[serde(default = "default_baseline_capacity")]
    pub baseline_capacity: usize,

    /// Accepted post-baseline intervals between drift checks
    #[serde(default = "default_batch_length")]
    pub batch_length: u64,

    /// Threshold on Welch's |t| above which the stream counts as drifted
    #[serde(default = "default_critical_value")]
    pub critical_value: f64,

    /// Handling of queued symbols when drift is detected
    #[serde(default)]
    pub drift_policy: DriftPolicy,

    /// Optional soft cap on queued symbols (oldest evicted first)
    #[serde(default)]
    pub max_queued_symbols: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            baseline_capacity: default_baseline_capacity(),
            batch_length: default_batch_length(),
            critical_value: default_critical_value(),
            drift_policy: DriftPolicy::default(),
            max_queued_symbols: None,
        }
    }
}

impl EngineConfig {
    /// Config with the given baseline size and batch length, defaults elsewhere
    pub fn new(baseline_capacity: usize, batch_length: u64) -> Self {
        Self {
            baseline_capacity,
            batch_length,
            ..Self::default()
        }
    }

    /// `round(sqrt(baseline_capacity))`
    pub fn bucket_count(&self) -> usize {
        bucket_count_for(self.baseline_capacity)
    }

    /// `ceil(log2(bucket_count))`
    pub fn symbol_width(&self) -> u8 {
        symbol_width(self.bucket_count())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let buckets = self.bucket_count();
        if buckets < 2 {
            return Err(Error::Config(format!(
                "baseline_capacity {} yields {} bucket(s); need at least 3 samples for 2 buckets",
                self.baseline_capacity, buckets
            )));
        }

        if buckets > Symbol::MAX_BUCKETS {
            return Err(Error::Config(format!(
                "baseline_capacity {} yields {} buckets; at most {} are supported",
                self.baseline_capacity,
                buckets,
                Symbol::MAX_BUCKETS
            )));
        }

        // the drift test needs a sample variance on both sides
        if self.batch_length < 2 {
            return Err(Error::Config("batch_length must be >= 2".to_string()));
        }

        if !self.critical_value.is_finite() || self.critical_value <= 0.0 {
            return Err(Error::Config(
                "critical_value must be a positive finite number".to_string(),
            ));
        }

        if self.max_queued_symbols == Some(0) {
            return Err(Error::Config("max_queued_symbols must be > 0 when set".to_string()));
        }

        Ok(())
    }
}

/// Gateway configuration
///
/// Kept flat so it loads identically from YAML and from `DECAYRNG_*`
/// environment variables.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayConfig {
    /// Bind address for HTTP server
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Address of the capture server streaming timestamps
    #[serde(default = "default_capture_address")]
    pub capture_address: String,

    /// Bounded queue between the capture link and the engine
    #[serde(default = "default_capture_queue_size")]
    pub capture_queue_size: usize,

    /// Initial reconnect backoff in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub reconnect_initial_backoff_ms: u64,

    /// Reconnect backoff ceiling in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub reconnect_max_backoff_ms: u64,

    /// Largest single export request in bytes or symbols
    #[serde(default = "default_max_request_size")]
    pub max_request_size: usize,

    /// Timer resolution of the capture source, in microseconds
    #[serde(default = "default_timer_resolution_micros")]
    pub timer_resolution_micros: f64,

    /// Fraction (0..1] of the theoretical bucket limit considered safe
    #[serde(default = "default_safety_factor")]
    pub bucket_safety_factor: f64,

    #[serde(default = "default_baseline_capacity")]
    pub baseline_capacity: usize,

    #[serde(default = "default_batch_length")]
    pub batch_length: u64,

    #[serde(default = "default_critical_value")]
    pub critical_value: f64,

    #[serde(default)]
    pub drift_policy: DriftPolicy,

    #[serde(default)]
    pub max_queued_symbols: Option<usize>,

    /// Enable Prometheus metrics
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            capture_address: default_capture_address(),
            capture_queue_size: default_capture_queue_size(),
            reconnect_initial_backoff_ms: default_initial_backoff_ms(),
            reconnect_max_backoff_ms: default_max_backoff_ms(),
            max_request_size: default_max_request_size(),
            timer_resolution_micros: default_timer_resolution_micros(),
            bucket_safety_factor: default_safety_factor(),
            baseline_capacity: default_baseline_capacity(),
            batch_length: default_batch_length(),
            critical_value: default_critical_value(),
            drift_policy: DriftPolicy::default(),
            max_queued_symbols: None,
            metrics_enabled: true,
        }
    }
}

impl GatewayConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let config: Self = envy::prefixed("DECAYRNG_")
            .from_env()
            .map_err(|e| Error::Config(format!("Failed to parse environment variables: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML (or any `config`-supported) file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let config: Self = ::config::Config::builder()
            .add_source(::config::File::from(path.as_ref()))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Engine settings carried by this gateway config
    pub fn engine(&self) -> EngineConfig {
        EngineConfig {
            baseline_capacity: self.baseline_capacity,
            batch_length: self.batch_length,
            critical_value: self.critical_value,
            drift_policy: self.drift_policy,
            max_queued_symbols: self.max_queued_symbols,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.engine().validate()?;

        if self.capture_address.trim().is_empty() {
            return Err(Error::Config("capture_address cannot be empty".to_string()));
        }

        if self.capture_queue_size == 0 {
            return Err(Error::Config("capture_queue_size must be > 0".to_string()));
        }

        if self.max_request_size == 0 || self.max_request_size > crate::MAX_REQUEST_SIZE {
            return Err(Error::Config(format!(
                "max_request_size must be between 1 and {}",
                crate::MAX_REQUEST_SIZE
            )));
        }

        if self.reconnect_initial_backoff_ms == 0
            || self.reconnect_max_backoff_ms < self.reconnect_initial_backoff_ms
        {
            return Err(Error::Config(
                "reconnect backoff must satisfy 0 < initial <= max".to_string(),
            ));
        }

        if !(self.timer_resolution_micros > 0.0) || !self.timer_resolution_micros.is_finite() {
            return Err(Error::Config(
                "timer_resolution_micros must be a positive finite number".to_string(),
            ));
        }

        if !(self.bucket_safety_factor > 0.0 && self.bucket_safety_factor <= 1.0) {
            return Err(Error::Config(
                "bucket_safety_factor must be in (0, 1]".to_string(),
            ));
        }

        Ok(())
    }

    pub fn reconnect_initial_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_initial_backoff_ms)
    }

    pub fn reconnect_max_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_backoff_ms)
    }
}

// Default value functions
fn default_baseline_capacity() -> usize {
    crate::DEFAULT_BASELINE_CAPACITY
}

fn default_batch_length() -> u64 {
    crate::DEFAULT_BATCH_LENGTH
}

fn default_critical_value() -> f64 {
    crate::drift::DEFAULT_CRITICAL_VALUE
}

fn default_listen_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_capture_address() -> String {
    "127.0.0.1:25565".to_string()
}

fn default_capture_queue_size() -> usize {
    8192
}

fn default_initial_backoff_ms() -> u64 {
    100
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_max_request_size() -> usize {
    crate::MAX_REQUEST_SIZE
}

fn default_timer_resolution_micros() -> f64 {
    1.0
}

fn default_safety_factor() -> f64 {
    0.7
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_engine_defaults() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.bucket_count(), 100);
        assert_eq!(config.symbol_width(), 7);
        assert_eq!(config.drift_policy, DriftPolicy::Retain);
    }

    #[test]
    fn test_engine_validation() {
        assert!(EngineConfig::new(4, 2).validate().is_ok());
        assert!(EngineConfig::new(3, 2).validate().is_ok());
        assert!(EngineConfig::new(2, 2).validate().is_err());
        assert!(EngineConfig::new(100, 1).validate().is_err());

        let mut config = EngineConfig::new(100, 10);
        config.critical_value = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::new(100, 10);
        config.max_queued_symbols = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_gateway_config_validation() {
        let config = GatewayConfig::default();
        assert!(config.validate().is_ok());

        let config = GatewayConfig {
            capture_queue_size: 0,
            ..GatewayConfig::default()
        };
        assert!(config.validate().is_err());

        let config = GatewayConfig {
            bucket_safety_factor: 1.5,
            ..GatewayConfig::default()
        };
        assert!(config.validate().is_err());

        let config = GatewayConfig {
            reconnect_initial_backoff_ms: 500,
            reconnect_max_backoff_ms: 100,
            ..GatewayConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_gateway_config_from_yaml_file() {
        let dir = std::env::temp_dir().join(format!("decayrng-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("gateway.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "listen_address: \"127.0.0.1:9000\"\n\
             capture_address: \"10.0.0.2:25565\"\n\
             baseline_capacity: 400\n\
             batch_length: 50\n\
             drift_policy: retract"
        )
        .unwrap();

        let config = GatewayConfig::from_file(&path).unwrap();
        assert_eq!(config.listen_address, "127.0.0.1:9000");
        assert_eq!(config.capture_address, "10.0.0.2:25565");
        assert_eq!(config.engine().bucket_count(), 20);
        assert_eq!(config.engine().drift_policy, DriftPolicy::Retract);
        assert_eq!(config.capture_queue_size, 8192);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
