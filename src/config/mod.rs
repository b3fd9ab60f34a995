//! # Configuration Management Module
//!
//! Central configuration for the telemetry node, loaded from a TOML file
//! with sensible defaults for every value so a minimal (or empty) file
//! still yields a runnable node.
//!
//! ## Configuration Structure
//!
//! - [`DeviceConfig`] - identity reported in every payload
//! - [`NetworkConfig`] - local network reachability probe and its backoff
//! - [`MqttConfig`] - broker session, topics, and its backoff
//! - [`SamplingConfig`] - sample/status cadence and flush batch size
//! - [`StorageConfig`] - data directory and backlog bound
//! - [`WatchdogConfig`] - loop stall deadline
//! - [`LoggingConfig`] - level and optional log file
//!
//! ## Configuration File Format
//!
//! ```toml
//! [device]
//! id = "FIELD-NODE-01"
//! location = "North greenhouse, strawberry section"
//!
//! [mqtt]
//! host = "broker.example.org"
//! port = 8883
//! ca_cert_path = "/etc/terralog/ca.pem"
//!
//! [sampling]
//! sensor_interval_secs = 60
//! status_interval_secs = 300
//! ```

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Stable device identifier; also hashed into message ids.
    pub id: String,
    pub location: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            id: "FIELD-NODE-01".to_string(),
            location: "unspecified".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Reachability probe target. A public resolver on port 53 answers a
    /// bare TCP connect cheaply and from almost any network.
    pub probe_host: String,
    pub probe_port: u16,
    pub probe_timeout_secs: u64,
    /// How often to re-verify reachability while the link is up.
    pub recheck_secs: u64,
    pub backoff_base_secs: u64,
    pub backoff_cap_secs: u64,
    pub max_retries: u32,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            probe_host: "1.1.1.1".to_string(),
            probe_port: 53,
            probe_timeout_secs: 5,
            recheck_secs: 30,
            backoff_base_secs: 2,
            backoff_cap_secs: 30,
            max_retries: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    pub client_id: String,
    pub topic_data: String,
    pub topic_status: String,
    pub topic_error: String,
    pub keepalive_secs: u64,
    pub connect_timeout_secs: u64,
    /// PEM CA certificate for TLS; plain TCP when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_cert_path: Option<String>,
    /// Broker reconnects are more expensive than a network probe, so the
    /// base wait is larger than the network link's.
    pub backoff_base_secs: u64,
    pub backoff_cap_secs: u64,
    pub max_retries: u32,
}

impl Default for MqttConfig {
    fn default() -> Self {
        MqttConfig {
            host: "localhost".to_string(),
            port: 1883,
            username: None,
            password: None,
            client_id: "terralog-node".to_string(),
            topic_data: "telemetry/field/sensors".to_string(),
            topic_status: "telemetry/field/status".to_string(),
            topic_error: "telemetry/field/errors".to_string(),
            keepalive_secs: 60,
            connect_timeout_secs: 5,
            ca_cert_path: None,
            backoff_base_secs: 5,
            backoff_cap_secs: 60,
            max_retries: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingConfig {
    pub sensor_interval_secs: u64,
    pub status_interval_secs: u64,
    /// Maximum backlog records attempted per reconciliation pass, keeping
    /// tick latency bounded while a large backlog flushes.
    pub flush_batch: usize,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        SamplingConfig {
            sensor_interval_secs: 60,
            status_interval_secs: 300,
            flush_batch: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: String,
    /// Backlog bound; appends beyond it are rejected (loss of the newest
    /// reading, logged) rather than rewriting away already-durable data.
    pub max_backlog: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            data_dir: "./data".to_string(),
            max_backlog: 50_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchdogConfig {
    /// Seconds without a completed tick before the process is killed so
    /// the service manager restarts it. 0 disables the watchdog.
    pub timeout_secs: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        WatchdogConfig { timeout_secs: 120 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            file: Some("terralog.log".to_string()),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub sampling: SamplingConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub watchdog: WatchdogConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_runnable() {
        let config = Config::default();
        assert_eq!(config.sampling.sensor_interval_secs, 60);
        assert_eq!(config.sampling.status_interval_secs, 300);
        assert_eq!(config.sampling.flush_batch, 10);
        assert_eq!(config.watchdog.timeout_secs, 120);
        assert!(config.storage.max_backlog > 0);
    }

    #[test]
    fn broker_backoff_base_exceeds_network_base() {
        let config = Config::default();
        assert!(config.mqtt.backoff_base_secs > config.network.backoff_base_secs);
        assert!(config.mqtt.backoff_cap_secs >= config.mqtt.backoff_base_secs);
        assert!(config.network.backoff_cap_secs >= config.network.backoff_base_secs);
    }

    #[test]
    fn empty_toml_falls_back_to_defaults() {
        let config: Config = toml::from_str("").expect("empty config should parse");
        assert_eq!(config.device.id, "FIELD-NODE-01");
        assert_eq!(config.mqtt.port, 1883);
    }

    #[test]
    fn partial_toml_overrides_only_named_fields() {
        let config: Config = toml::from_str(
            r#"
            [mqtt]
            host = "broker.example.org"
            port = 8883
            client_id = "gh-01"
            topic_data = "site/a/sensors"
            topic_status = "site/a/status"
            topic_error = "site/a/errors"
            keepalive_secs = 30
            connect_timeout_secs = 5
            backoff_base_secs = 5
            backoff_cap_secs = 60
            max_retries = 10
            "#,
        )
        .expect("parse");
        assert_eq!(config.mqtt.host, "broker.example.org");
        assert_eq!(config.mqtt.port, 8883);
        assert_eq!(config.sampling.sensor_interval_secs, 60);
    }

    #[test]
    fn config_round_trips_through_toml() {
        let config = Config::default();
        let serialized = toml::to_string_pretty(&config).expect("serialize");
        let parsed: Config = toml::from_str(&serialized).expect("reparse");
        assert_eq!(parsed.device.id, config.device.id);
        assert_eq!(parsed.mqtt.topic_data, config.mqtt.topic_data);
        assert_eq!(parsed.storage.max_backlog, config.storage.max_backlog);
    }
}
