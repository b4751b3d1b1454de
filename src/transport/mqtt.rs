use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS, SubAck,
    SubscribeReasonCode, Transport as MqttTransport,
};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use super::{IncomingMessage, Transport, TransportError};
use crate::config::{BrokerConfig, Credentials};

type Ack = oneshot::Sender<Result<(), TransportError>>;

/// Correlates queued requests with the broker acknowledgements for them.
///
/// The event loop reports the packet id of each outgoing SUBSCRIBE/PUBLISH in
/// the order the requests were queued, so a request is bound to its packet id
/// by popping the front of the matching queue.
#[derive(Default)]
struct Acks {
    queued_subscribes: VecDeque<(String, Ack)>,
    queued_publishes: VecDeque<Ack>,
    subscribes: HashMap<u16, (String, Ack)>,
    publishes: HashMap<u16, Ack>,
}

impl Acks {
    fn on_outgoing_subscribe(&mut self, pkid: u16) {
        // Already bound: this is a retransmission after reconnect.
        if self.subscribes.contains_key(&pkid) {
            return;
        }
        if let Some(waiter) = self.queued_subscribes.pop_front() {
            self.subscribes.insert(pkid, waiter);
        }
    }

    fn on_outgoing_publish(&mut self, pkid: u16) {
        if self.publishes.contains_key(&pkid) {
            return;
        }
        if let Some(waiter) = self.queued_publishes.pop_front() {
            self.publishes.insert(pkid, waiter);
        }
    }

    fn on_suback(&mut self, ack: &SubAck) {
        let Some((topic, waiter)) = self.subscribes.remove(&ack.pkid) else {
            return;
        };
        let refused = ack
            .return_codes
            .iter()
            .any(|code| matches!(code, SubscribeReasonCode::Failure));
        let result = if refused {
            Err(TransportError::SubscribeRefused { topic })
        } else {
            Ok(())
        };
        let _ = waiter.send(result);
    }

    fn on_puback(&mut self, pkid: u16) {
        if let Some(waiter) = self.publishes.remove(&pkid) {
            let _ = waiter.send(Ok(()));
        }
    }

    /// Drops every waiter; their receivers observe [`TransportError::Closed`].
    fn close(&mut self) {
        self.queued_subscribes.clear();
        self.queued_publishes.clear();
        self.subscribes.clear();
        self.publishes.clear();
    }
}

fn lock(acks: &Mutex<Acks>) -> MutexGuard<'_, Acks> {
    acks.lock().unwrap_or_else(PoisonError::into_inner)
}

/// MQTT session backed by `rumqttc`.
///
/// A background driver polls the event loop for the whole life of the
/// session. Connection failures never surface to callers: the driver logs
/// them and reconnects after a fixed delay, forever, until [`disconnect`] is
/// called.
///
/// [`disconnect`]: Transport::disconnect
pub struct MqttSession {
    client: AsyncClient,
    acks: Arc<Mutex<Acks>>,
    // Held while a request is queued so packet ids follow queue order.
    send_lock: tokio::sync::Mutex<()>,
    closing: Arc<AtomicBool>,
    closed: CancellationToken,
}

impl MqttSession {
    /// Open a session and wait for the first CONNACK.
    ///
    /// Returns the session together with the channel carrying every publish
    /// the broker delivers.
    pub async fn connect(
        client_id: &str,
        broker: &BrokerConfig,
        credentials: Option<&Credentials>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<IncomingMessage>), TransportError> {
        let mut options = MqttOptions::new(client_id, broker.host.clone(), broker.port);
        options.set_keep_alive(Duration::from_secs(broker.keep_alive_secs));
        options.set_clean_session(broker.clean_session);

        if let Some(credentials) = credentials {
            let ca = read_pem(&credentials.ca_path)?;
            let cert = read_pem(&credentials.cert_path)?;
            let key = read_pem(&credentials.key_path)?;
            options.set_transport(MqttTransport::tls(ca, Some((cert, key)), None));
        }

        tracing::info!(
            client_id,
            host = %broker.host,
            port = broker.port,
            tls = credentials.is_some(),
            "Connecting to broker"
        );

        let (client, eventloop) = AsyncClient::new(options, broker.request_capacity);
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (connected_tx, mut connected_rx) = watch::channel(false);
        let acks = Arc::new(Mutex::new(Acks::default()));
        let closing = Arc::new(AtomicBool::new(false));
        let closed = CancellationToken::new();

        let driver = Driver {
            eventloop,
            acks: acks.clone(),
            inbox: inbox_tx,
            connected: connected_tx,
            closing: closing.clone(),
            closed: closed.clone(),
            reconnect_delay: Duration::from_secs(broker.reconnect_delay_secs),
        };
        tokio::spawn(driver.run());

        connected_rx
            .wait_for(|up| *up)
            .await
            .map_err(|_| TransportError::Closed)?;

        let session = Self {
            client,
            acks,
            send_lock: tokio::sync::Mutex::new(()),
            closing,
            closed,
        };
        Ok((session, inbox_rx))
    }
}

fn read_pem(path: &std::path::Path) -> Result<Vec<u8>, TransportError> {
    std::fs::read(path).map_err(|source| TransportError::Credentials {
        path: path.display().to_string(),
        source,
    })
}

#[async_trait]
impl Transport for MqttSession {
    async fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        let (tx, rx) = oneshot::channel();
        {
            let _order = self.send_lock.lock().await;
            lock(&self.acks)
                .queued_subscribes
                .push_back((topic.to_string(), tx));
            if let Err(e) = self.client.subscribe(topic, QoS::AtLeastOnce).await {
                lock(&self.acks).queued_subscribes.pop_back();
                return Err(e.into());
            }
        }
        tracing::debug!(topic, "Subscription queued");
        rx.await.map_err(|_| TransportError::Closed)?
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        let (tx, rx) = oneshot::channel();
        {
            let _order = self.send_lock.lock().await;
            lock(&self.acks).queued_publishes.push_back(tx);
            if let Err(e) = self
                .client
                .publish(topic, QoS::AtLeastOnce, false, payload)
                .await
            {
                lock(&self.acks).queued_publishes.pop_back();
                return Err(e.into());
            }
        }
        rx.await.map_err(|_| TransportError::Closed)?
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.closing.store(true, Ordering::SeqCst);
        {
            let _order = self.send_lock.lock().await;
            self.client.disconnect().await?;
        }
        self.closed.cancelled().await;
        Ok(())
    }
}

struct Driver {
    eventloop: EventLoop,
    acks: Arc<Mutex<Acks>>,
    inbox: mpsc::UnboundedSender<IncomingMessage>,
    connected: watch::Sender<bool>,
    closing: Arc<AtomicBool>,
    closed: CancellationToken,
    reconnect_delay: Duration,
}

impl Driver {
    async fn run(mut self) {
        let mut ever_connected = false;
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ever_connected {
                        tracing::info!(session_present = ack.session_present, "Connection resumed");
                    } else {
                        tracing::info!(session_present = ack.session_present, "Connected");
                    }
                    ever_connected = true;
                    self.connected.send_replace(true);
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let message = IncomingMessage::new(publish.topic, publish.payload.to_vec());
                    if self.inbox.send(message).is_err() {
                        tracing::debug!("Inbox dropped, discarding publish");
                    }
                }
                Ok(Event::Incoming(Packet::SubAck(ack))) => lock(&self.acks).on_suback(&ack),
                Ok(Event::Incoming(Packet::PubAck(ack))) => lock(&self.acks).on_puback(ack.pkid),
                Ok(Event::Outgoing(Outgoing::Subscribe(pkid))) => {
                    lock(&self.acks).on_outgoing_subscribe(pkid)
                }
                Ok(Event::Outgoing(Outgoing::Publish(pkid))) => {
                    lock(&self.acks).on_outgoing_publish(pkid)
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    tracing::info!("Disconnected");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    if self.closing.load(Ordering::SeqCst) {
                        tracing::info!(error = %e, "Connection closed while disconnecting");
                        break;
                    }
                    self.connected.send_replace(false);
                    tracing::warn!(
                        error = %e,
                        retry_in_secs = self.reconnect_delay.as_secs(),
                        "Connection interrupted, retrying"
                    );
                    tokio::time::sleep(self.reconnect_delay).await;
                }
            }
        }
        lock(&self.acks).close();
        self.closed.cancel();
    }
}
