use thiserror::Error;

use crate::jobs::JobsError;
use crate::transport::TransportError;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("No device name configured. Set DEVICE_NAME or pass --device-name.")]
    MissingDeviceName,

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Job queue error: {0}")]
    Jobs(#[from] JobsError),

    #[error("Container runtime error: {0:#}")]
    Runtime(#[from] anyhow::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML encode error: {0}")]
    TomlEncode(#[from] toml::ser::Error),
}
