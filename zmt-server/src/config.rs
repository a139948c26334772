//! Server configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via ZMT_CONFIG or --config)
//! 3. Environment variables

use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use zmt_core::{DeviceConfig, EngineConfig, RpcConfig};
use zmt_protocol::{Subsystem, DEFAULT_MAX_PAYLOAD, DEFAULT_PORT, MAX_FRAME_PAYLOAD};

/// Server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Network configuration.
    pub network: NetworkConfig,
    /// MT framing and dispatch.
    pub mt: MtConfig,
    /// Internal RPC engine.
    pub rpc: RpcSection,
    /// Identity and network parameters of the simulated device.
    pub device: DeviceConfig,
    /// Metrics configuration.
    pub metrics: MetricsConfig,
}

impl Config {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("ZMT_CONFIG") {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        self.network.apply_env_overrides();
        self.mt.apply_env_overrides();
        self.rpc.apply_env_overrides();
        self.device.apply_env_overrides();
        self.metrics.apply_env_overrides();
    }

    /// Checks values that deserialize fine but cannot be served.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.mt.validate()?;
        if self.rpc.queue_capacity == 0 || self.rpc.inbox_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "rpc queue and inbox capacities must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        Ok(())
    }
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address to bind to.
    #[serde(with = "socket_addr_serde")]
    pub bind_addr: SocketAddr,
    /// Idle connection timeout in seconds.
    pub idle_timeout_secs: u64,
    /// Maximum concurrent host connections.
    pub max_connections: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            idle_timeout_secs: 300,
            max_connections: 8,
        }
    }
}

impl NetworkConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("ZMT_BIND") {
            if let Ok(parsed) = addr.parse() {
                self.bind_addr = parsed;
            }
        }

        if let Ok(timeout) = std::env::var("ZMT_IDLE_TIMEOUT") {
            if let Ok(secs) = timeout.parse() {
                self.idle_timeout_secs = secs;
            }
        }

        if let Ok(max) = std::env::var("ZMT_MAX_CONNECTIONS") {
            if let Ok(n) = max.parse() {
                self.max_connections = n;
            }
        }
    }

    /// Returns idle timeout as Duration.
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

fn default_subsystems() -> Vec<Subsystem> {
    vec![
        Subsystem::Sys,
        Subsystem::Mac,
        Subsystem::Af,
        Subsystem::Zdo,
        Subsystem::Util,
    ]
}

/// MT framing and dispatch configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MtConfig {
    /// Largest payload accepted before dispatch; longer frames get ERR_LENGTH.
    pub max_payload: usize,
    /// Subsystems given a dispatch slot. Anything else answers ERR_SUBSYSTEM.
    pub subsystems: Vec<Subsystem>,
    /// Subsystems whose callbacks are forwarded to the host at startup.
    pub callbacks: Vec<Subsystem>,
}

impl Default for MtConfig {
    fn default() -> Self {
        Self {
            max_payload: DEFAULT_MAX_PAYLOAD,
            subsystems: default_subsystems(),
            callbacks: default_subsystems(),
        }
    }
}

impl MtConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(max) = std::env::var("ZMT_MAX_PAYLOAD") {
            if let Ok(n) = max.parse() {
                self.max_payload = n;
            }
        }

        if let Ok(list) = std::env::var("ZMT_SUBSYSTEMS") {
            if let Some(parsed) = parse_subsystem_list(&list) {
                self.subsystems = parsed;
            }
        }

        if let Ok(list) = std::env::var("ZMT_CALLBACKS") {
            if let Some(parsed) = parse_subsystem_list(&list) {
                self.callbacks = parsed;
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_payload == 0 || self.max_payload > MAX_FRAME_PAYLOAD {
            return Err(ConfigError::ValidationError(format!(
                "mt.max_payload must be within 1..={}, got {}",
                MAX_FRAME_PAYLOAD, self.max_payload
            )));
        }
        Ok(())
    }
}

/// Parses a comma-separated list such as `SYS,UTIL,AF`.
///
/// Returns `None` if any entry is not a subsystem name.
fn parse_subsystem_list(list: &str) -> Option<Vec<Subsystem>> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|name| {
            Subsystem::ALL
                .iter()
                .copied()
                .find(|s| s.name().eq_ignore_ascii_case(name))
        })
        .collect()
}

/// Internal RPC engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcSection {
    /// Reply wait bound in milliseconds; absent means wait forever.
    pub timeout_ms: Option<u64>,
    /// Envelopes the engine queue holds.
    pub queue_capacity: usize,
    /// Items each task inbox holds.
    pub inbox_capacity: usize,
    /// Bytes available to in-flight envelopes.
    pub envelope_budget: usize,
}

impl Default for RpcSection {
    fn default() -> Self {
        let engine = EngineConfig::default();
        Self {
            timeout_ms: engine.rpc.timeout.map(|t| t.as_millis() as u64),
            queue_capacity: engine.queue_capacity,
            inbox_capacity: engine.inbox_capacity,
            envelope_budget: engine.envelope_budget,
        }
    }
}

impl RpcSection {
    fn apply_env_overrides(&mut self) {
        if let Ok(timeout) = std::env::var("ZMT_RPC_TIMEOUT_MS") {
            match timeout.trim() {
                "" | "none" | "0" => self.timeout_ms = None,
                ms => {
                    if let Ok(ms) = ms.parse() {
                        self.timeout_ms = Some(ms);
                    }
                }
            }
        }

        if let Ok(budget) = std::env::var("ZMT_RPC_ENVELOPE_BUDGET") {
            if let Ok(n) = budget.parse() {
                self.envelope_budget = n;
            }
        }
    }

    /// Builds the engine configuration.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            queue_capacity: self.queue_capacity,
            inbox_capacity: self.inbox_capacity,
            envelope_budget: self.envelope_budget,
            rpc: RpcConfig {
                timeout: self.timeout_ms.map(Duration::from_millis),
            },
        }
    }
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Enable metrics HTTP server.
    #[serde(default)]
    pub enabled: bool,
    /// Address to bind the metrics server to.
    #[serde(with = "socket_addr_serde")]
    pub bind_addr: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 9090)),
        }
    }
}

impl MetricsConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(enabled) = std::env::var("ZMT_METRICS_ENABLED") {
            self.enabled = enabled == "1" || enabled.to_lowercase() == "true";
        }
        if let Ok(addr) = std::env::var("ZMT_METRICS_BIND") {
            if let Ok(parsed) = addr.parse() {
                self.bind_addr = parsed;
            }
        }
    }
}

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {err}", path = .0.display(), err = .1)]
    IoError(PathBuf, std::io::Error),

    #[error("failed to parse config file '{path}': {err}", path = .0.display(), err = .1)]
    ParseError(PathBuf, String),

    #[error("configuration validation failed: {0}")]
    ValidationError(String),
}

/// Custom serde module for SocketAddr (to handle as string in YAML).
mod socket_addr_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::net::SocketAddr;

    pub fn serialize<S>(addr: &SocketAddr, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&addr.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SocketAddr, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
