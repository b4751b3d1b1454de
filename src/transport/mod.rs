//! Publish/subscribe transport used by the job-queue client.
//!
//! [`Transport`] is the narrow seam the rest of the agent depends on: every
//! operation completes only once the broker has acknowledged it. Incoming
//! publishes are not delivered through per-topic callbacks; the session
//! forwards them as [`IncomingMessage`]s on a single channel and the
//! coordinator routes them.

pub mod error;
#[cfg(test)]
pub mod memory;
pub mod mqtt;

use async_trait::async_trait;

pub use error::TransportError;
pub use mqtt::MqttSession;

/// A publish received from the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl IncomingMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// One logical connection to the messaging broker.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Subscribe to `topic`, resolving once the broker confirms it.
    async fn subscribe(&self, topic: &str) -> Result<(), TransportError>;

    /// Publish `payload` at least once, resolving once the broker confirms it.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Close the session.
    async fn disconnect(&self) -> Result<(), TransportError>;
}
