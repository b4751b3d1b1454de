//! Agent configuration loaded from `agent.toml`.
//!
//! Every field has a default, so a missing file yields a usable configuration
//! as long as a device name is supplied. The `DEVICE_NAME` environment
//! variable takes precedence over the file; the `--device-name` flag takes
//! precedence over both.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::AgentError;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Name of the device this agent runs on.
    #[serde(default)]
    pub device_name: String,

    #[serde(default)]
    pub broker: BrokerConfig,

    #[serde(default)]
    pub firmware: FirmwareConfig,
}

/// Connection parameters for the message broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,

    /// Start a fresh broker session instead of resuming the previous one.
    #[serde(default)]
    pub clean_session: bool,

    /// Fixed delay between reconnection attempts.
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,

    /// Connect with mutual TLS.
    #[serde(default = "default_tls")]
    pub tls: bool,

    /// Root directory of the device certificates.
    #[serde(default = "default_cert_root")]
    pub cert_root: PathBuf,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_path: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert_path: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_path: Option<PathBuf>,

    /// Capacity of the MQTT client's request queue.
    #[serde(default = "default_request_capacity")]
    pub request_capacity: usize,
}

/// How firmware containers are pulled and run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirmwareConfig {
    #[serde(default = "default_registry")]
    pub registry: String,

    #[serde(default = "default_image")]
    pub image: String,

    /// Docker network mode for the firmware container.
    #[serde(default = "default_network")]
    pub network: String,

    /// Where the firmware certificates are mounted inside the container.
    #[serde(default = "default_cert_mount")]
    pub cert_mount: String,

    #[serde(default = "default_timer_period")]
    pub timer_period: String,

    /// Extra environment passed to the firmware container.
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
}

/// Resolved TLS material for the agent thing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub ca_path: PathBuf,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    8883
}

fn default_keep_alive_secs() -> u64 {
    30
}

fn default_reconnect_delay_secs() -> u64 {
    10
}

fn default_tls() -> bool {
    true
}

fn default_cert_root() -> PathBuf {
    PathBuf::from("/certs")
}

fn default_request_capacity() -> usize {
    16
}

fn default_registry() -> String {
    "registry:5000".to_string()
}

fn default_image() -> String {
    "firmware".to_string()
}

fn default_network() -> String {
    "host".to_string()
}

fn default_cert_mount() -> String {
    "/certs".to_string()
}

fn default_timer_period() -> String {
    "5".to_string()
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            keep_alive_secs: default_keep_alive_secs(),
            clean_session: false,
            reconnect_delay_secs: default_reconnect_delay_secs(),
            tls: default_tls(),
            cert_root: default_cert_root(),
            ca_path: None,
            cert_path: None,
            key_path: None,
            request_capacity: default_request_capacity(),
        }
    }
}

impl Default for FirmwareConfig {
    fn default() -> Self {
        Self {
            registry: default_registry(),
            image: default_image(),
            network: default_network(),
            cert_mount: default_cert_mount(),
            timer_period: default_timer_period(),
            environment: BTreeMap::new(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            device_name: String::new(),
            broker: BrokerConfig::default(),
            firmware: FirmwareConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Load from `path` (defaults if absent) and apply `DEVICE_NAME`.
    pub fn load(path: &Path) -> Result<Self, AgentError> {
        Self::load_with(path, std::env::var("DEVICE_NAME").ok())
    }

    /// Load from `path`, letting a non-empty `device_name` override the file.
    pub fn load_with(path: &Path, device_name: Option<String>) -> Result<Self, AgentError> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<AgentConfig>(&contents)?
        } else {
            Self::default()
        };

        if let Some(name) = device_name.filter(|n| !n.is_empty()) {
            config.device_name = name;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AgentError> {
        if self.device_name.trim().is_empty() {
            return Err(AgentError::MissingDeviceName);
        }
        if self.broker.host.is_empty() {
            return Err(AgentError::Config("broker.host must not be empty".into()));
        }
        if self.broker.request_capacity == 0 {
            return Err(AgentError::Config(
                "broker.request_capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Thing (and MQTT client id) of this agent.
    pub fn agent_thing_name(&self) -> String {
        format!("{}-agent", self.device_name)
    }

    /// Thing the firmware container connects as.
    pub fn firmware_thing_name(&self) -> String {
        format!("{}-firmware", self.device_name)
    }

    /// TLS files of the agent thing, or `None` when TLS is disabled.
    pub fn credentials(&self) -> Option<Credentials> {
        if !self.broker.tls {
            return None;
        }
        let root = &self.broker.cert_root;
        let thing_dir = root.join(self.agent_thing_name());
        Some(Credentials {
            ca_path: self
                .broker
                .ca_path
                .clone()
                .unwrap_or_else(|| root.join("AmazonRootCA1.pem")),
            cert_path: self
                .broker
                .cert_path
                .clone()
                .unwrap_or_else(|| thing_dir.join("device.pem.crt")),
            key_path: self
                .broker
                .key_path
                .clone()
                .unwrap_or_else(|| thing_dir.join("private.pem.key")),
        })
    }

    /// Host directory holding the firmware thing's certificates.
    pub fn firmware_cert_dir(&self) -> PathBuf {
        self.broker.cert_root.join(self.firmware_thing_name())
    }
}
