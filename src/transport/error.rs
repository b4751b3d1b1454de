//! Errors raised by the broker session.

use thiserror::Error;

/// Failures of the publish/subscribe transport.
///
/// Connection drops are not represented here: the session retries them
/// internally and callers simply wait longer for their acknowledgement.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The request could not be queued with the MQTT client.
    #[error("client error: {0}")]
    Client(#[from] rumqttc::ClientError),

    /// The broker answered the subscription with a failure return code.
    #[error("subscription to {topic} refused by broker")]
    SubscribeRefused { topic: String },

    /// The session driver has stopped; no acknowledgement will ever arrive.
    #[error("session closed")]
    Closed,

    /// Reading TLS material failed.
    #[error("failed to read {path}: {source}")]
    Credentials {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
