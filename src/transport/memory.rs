//! In-memory [`Transport`] that records every call, for tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{Transport, TransportError};

/// A call made against the transport, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Subscribe(String),
    Publish(String),
    Disconnect,
}

/// A publish as seen by the "broker".
#[derive(Debug, Clone)]
pub struct Published {
    pub topic: String,
    pub payload: serde_json::Value,
}

pub struct MemoryTransport {
    calls: Mutex<Vec<Call>>,
    published: mpsc::UnboundedSender<Published>,
    failing_suffixes: Mutex<Vec<String>>,
    disconnects: AtomicUsize,
}

impl MemoryTransport {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Published>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Self {
            calls: Mutex::new(Vec::new()),
            published: tx,
            failing_suffixes: Mutex::new(Vec::new()),
            disconnects: AtomicUsize::new(0),
        };
        (Arc::new(transport), rx)
    }

    /// Make every publish to a topic ending in `suffix` fail.
    pub fn fail_publishes_to(&self, suffix: &str) {
        self.failing_suffixes.lock().unwrap().push(suffix.to_string());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.calls
            .lock()
            .unwrap()
            .push(Call::Subscribe(topic.to_string()));
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        self.calls
            .lock()
            .unwrap()
            .push(Call::Publish(topic.to_string()));
        let failing = self
            .failing_suffixes
            .lock()
            .unwrap()
            .iter()
            .any(|suffix| topic.ends_with(suffix.as_str()));
        if failing {
            return Err(TransportError::Closed);
        }
        let payload = serde_json::from_slice(&payload).unwrap_or(serde_json::Value::Null);
        let _ = self.published.send(Published {
            topic: topic.to_string(),
            payload,
        });
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.calls.lock().unwrap().push(Call::Disconnect);
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
