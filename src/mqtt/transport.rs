//! The pub/sub transport seam and its rumqttc implementation.

use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, trace};
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS, SubscribeFilter,
};
use std::time::Duration;

use crate::config::MqttConfig;
use crate::error::TransportError;

/// A source of `(topic, payload)` messages.
///
/// `connect` is called again after every failure, so implementations must
/// tear down whatever session they held and start fresh.
#[async_trait]
pub trait Transport: Send {
    /// Establish a session and subscribe to every topic filter.
    async fn connect(&mut self, topics: &[String]) -> Result<(), TransportError>;

    /// Wait for the next published message.
    async fn recv(&mut self) -> Result<(String, Bytes), TransportError>;
}

/// Capacity of the request channel between `AsyncClient` and its event loop.
const REQUEST_CAPACITY: usize = 64;

/// MQTT transport backed by rumqttc.
pub struct RumqttTransport {
    client_id: String,
    host: String,
    port: u16,
    credentials: Option<(String, String)>,
    keep_alive: Duration,
    session: Option<(AsyncClient, EventLoop)>,
}

impl RumqttTransport {
    /// The client id is chosen here, once, and reused on every reconnect.
    pub fn from_config(cfg: &MqttConfig) -> Self {
        Self {
            client_id: cfg.session_client_id(),
            host: cfg.server.clone(),
            port: cfg.port,
            credentials: cfg.credentials(),
            // rumqttc rejects keep-alive intervals under five seconds
            keep_alive: Duration::from_secs(cfg.keep_alive_secs.max(5)),
            session: None,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(self.client_id.clone(), self.host.clone(), self.port);
        options.set_keep_alive(self.keep_alive);
        options.set_clean_session(true);
        if let Some((user, pass)) = &self.credentials {
            options.set_credentials(user.clone(), pass.clone());
        }
        options
    }
}

#[async_trait]
impl Transport for RumqttTransport {
    async fn connect(&mut self, topics: &[String]) -> Result<(), TransportError> {
        self.session = None;
        let (client, mut eventloop) = AsyncClient::new(self.options(), REQUEST_CAPACITY);

        // Queued until the event loop has a connection.
        client
            .subscribe_many(
                topics
                    .iter()
                    .map(|t| SubscribeFilter::new(t.clone(), QoS::AtMostOnce)),
            )
            .await?;

        loop {
            match eventloop.poll().await? {
                Event::Incoming(Packet::ConnAck(ack)) => {
                    if ack.code != ConnectReturnCode::Success {
                        return Err(TransportError::Other(format!(
                            "broker refused connection: {:?}",
                            ack.code
                        )));
                    }
                    debug!(
                        "Connected to {}:{} as {}",
                        self.host, self.port, self.client_id
                    );
                    break;
                }
                other => trace!("pre-connack event: {:?}", other),
            }
        }

        self.session = Some((client, eventloop));
        Ok(())
    }

    async fn recv(&mut self) -> Result<(String, Bytes), TransportError> {
        let (_, eventloop) = self.session.as_mut().ok_or(TransportError::NotConnected)?;
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    return Ok((publish.topic, publish.payload));
                }
                Ok(Event::Incoming(Packet::SubAck(ack))) => {
                    debug!("Subscription acknowledged: {:?}", ack.return_codes);
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    self.session = None;
                    return Err(TransportError::Other("broker sent DISCONNECT".to_string()));
                }
                Ok(_) => {}
                Err(e) => {
                    self.session = None;
                    return Err(e.into());
                }
            }
        }
    }
}
