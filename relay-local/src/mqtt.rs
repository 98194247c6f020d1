use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::{
    AsyncClient, ConnectionError, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS, SubAck,
    SubscribeReasonCode,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::broker::{LocalBroker, LocalMessage, LocalSink};
use crate::connector::{Connect, Session};
use crate::error::LocalError;
use crate::util::http::Uri;

const DEFAULT_PORT: u16 = 1883;
const CHANNEL_CAPACITY: usize = 100;

/// Local broker connection configuration
#[derive(Clone, Debug)]
pub struct MqttConfig {
    /// Broker address, eg. `mqtt://127.0.0.1:1883`
    pub address: Uri,
    pub client_id: String,
    pub keep_alive: Duration,
    /// How long to wait for the broker to accept the connection
    pub connect_timeout: Duration,
    /// How long to wait for the broker to acknowledge a subscription
    pub ack_timeout: Duration,
}

impl MqttConfig {
    pub fn new(address: Uri) -> Self {
        Self {
            address,
            client_id: "cloud-relay".to_string(),
            keep_alive: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            ack_timeout: Duration::from_secs(10),
        }
    }
}

pub struct MqttConnector {
    config: MqttConfig,
}

impl MqttConnector {
    pub fn new(config: MqttConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Connect for MqttConnector {
    type Session = MqttSession;

    async fn connect(&self) -> Result<MqttSession, LocalError> {
        let address = &self.config.address;
        let host = address
            .host()
            .ok_or_else(|| LocalError::Address(address.to_string()))?;
        let port = address.port().unwrap_or(DEFAULT_PORT);

        let mut options = MqttOptions::new(self.config.client_id.clone(), host, port);
        options.set_keep_alive(self.config.keep_alive);

        let (client, mut eventloop) = AsyncClient::new(options, CHANNEL_CAPACITY);

        // The event loop only connects when polled, so drive it here until
        // the broker accepts us before handing it to the background task
        tokio::time::timeout(self.config.connect_timeout, wait_for_connack(&mut eventloop))
            .await
            .map_err(|_| LocalError::Timeout)??;
        debug!("connected to {address}");

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (acks_tx, acks_rx) = mpsc::unbounded_channel();
        tokio::spawn(drive(eventloop, tx, acks_tx));

        Ok(MqttSession {
            client,
            messages: rx,
            acks: acks_rx,
            ack_timeout: self.config.ack_timeout,
        })
    }
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<(), LocalError> {
    loop {
        if let Event::Incoming(Packet::ConnAck(_)) = eventloop.poll().await? {
            return Ok(());
        }
    }
}

/// Subscription progress reported by the event loop
#[derive(Debug)]
enum SubscribeEvent {
    Sent(u16),
    Acked(SubAck),
}

/// Run the event loop, forwarding incoming messages in the order they are
/// received until either side goes away.
///
/// A broker that reconnects would not restore our subscriptions, so the
/// first connection error ends the loop. That closes the message channel
/// and with it the current relay run.
async fn drive(
    mut eventloop: EventLoop,
    messages: mpsc::Sender<LocalMessage>,
    acks: mpsc::UnboundedSender<SubscribeEvent>,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                trace!(topic = %publish.topic, "received message");
                let message = LocalMessage {
                    topic: publish.topic,
                    payload: publish.payload,
                };
                if messages.send(message).await.is_err() {
                    debug!("local message receiver dropped");
                    break;
                }
            }
            // nobody listens for these once the session became a broker
            Ok(Event::Outgoing(Outgoing::Subscribe(pkid))) => {
                let _ = acks.send(SubscribeEvent::Sent(pkid));
            }
            Ok(Event::Incoming(Packet::SubAck(ack))) => {
                let _ = acks.send(SubscribeEvent::Acked(ack));
            }
            Ok(_) => {}
            Err(ConnectionError::RequestsDone) => {
                debug!("local broker client dropped");
                break;
            }
            Err(err) => {
                warn!("local broker connection lost: {err}");
                break;
            }
        }
    }
}

pub struct MqttSession {
    client: AsyncClient,
    messages: mpsc::Receiver<LocalMessage>,
    acks: mpsc::UnboundedReceiver<SubscribeEvent>,
    ack_timeout: Duration,
}

impl MqttSession {
    /// Wait for the SUBACK matching the next SUBSCRIBE sent by the event loop
    async fn wait_for_suback(&mut self, topic: &str) -> Result<(), LocalError> {
        let mut pkid = None;
        while let Some(event) = self.acks.recv().await {
            match event {
                SubscribeEvent::Sent(id) => pkid = Some(id),
                SubscribeEvent::Acked(ack) if Some(ack.pkid) == pkid => {
                    if ack
                        .return_codes
                        .iter()
                        .any(|code| matches!(code, SubscribeReasonCode::Failure))
                    {
                        return Err(LocalError::Rejected(topic.to_string()));
                    }
                    return Ok(());
                }
                SubscribeEvent::Acked(ack) => {
                    trace!("ignoring stale subscription ack {}", ack.pkid);
                }
            }
        }

        // the event loop has stopped
        Err(LocalError::Disconnected)
    }
}

#[async_trait]
impl Session for MqttSession {
    async fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), LocalError> {
        // drop anything left over from a subscription that timed out
        while self.acks.try_recv().is_ok() {}

        self.client.subscribe(topic, qos).await?;
        tokio::time::timeout(self.ack_timeout, self.wait_for_suback(topic))
            .await
            .map_err(|_| LocalError::Timeout)?
    }

    fn into_broker(self) -> LocalBroker {
        let sink = MqttSink {
            client: self.client,
        };
        LocalBroker::new(Arc::new(sink), self.messages)
    }
}

struct MqttSink {
    client: AsyncClient,
}

#[async_trait]
impl LocalSink for MqttSink {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), LocalError> {
        self.client
            .publish(topic, QoS::AtMostOnce, false, payload.to_vec())
            .await?;
        Ok(())
    }
}
