use anyhow::{anyhow, Context, Result};
use rumqttc::{Client, Connection, Event, MqttOptions, Packet, Publish, QoS};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

const KEEP_ALIVE: Duration = Duration::from_secs(60);
const EVENT_CHANNEL_CAPACITY: usize = 10;

/// One message taken off the request queue. The token is what gets passed
/// back to [`QueueTransport::ack`] or [`QueueTransport::nack`].
pub struct Delivery<T> {
    pub payload: Vec<u8>,
    pub token: T,
}

/// Broker-facing transport for the worker: serial consumption of requests
/// with explicit acknowledgement, plus result publishing.
///
/// The worker never receives a second delivery before settling the first, so
/// at most one message is in flight at any time.
pub trait QueueTransport: Send {
    type Token;

    /// Waits up to `timeout` for the next request. `Ok(None)` means the
    /// timeout elapsed quietly; errors mean the broker connection is broken.
    fn receive(&mut self, timeout: Duration) -> Result<Option<Delivery<Self::Token>>>;

    /// Settles a delivery as successfully processed.
    fn ack(&mut self, token: Self::Token) -> Result<()>;

    /// Settles a delivery as failed. With `requeue` the message returns to
    /// the queue for redelivery; without it the message is discarded.
    fn nack(&mut self, token: Self::Token, requeue: bool) -> Result<()>;

    /// Publishes a payload to a named channel with at-least-once delivery.
    fn publish(&mut self, channel: &str, payload: &[u8]) -> Result<()>;
}

/// MQTT-backed transport over a persistent session with manual acks.
///
/// QoS 1 plus `clean_session(false)` gives the redelivery contract: a request
/// that was received but never acked comes back when the session resumes, so
/// a crash mid-processing loses nothing. "Requeue" maps to deliberately not
/// acking and letting session redelivery return the message.
pub struct MqttQueue {
    client: Client,
    connection: Connection,
}

impl MqttQueue {
    pub fn connect(
        broker_addr: &str,
        client_id: &str,
        request_topic: &str,
        username: Option<&str>,
        password: Option<&str>,
    ) -> Result<Self> {
        let (host, port) = split_host_port(broker_addr)?;
        let mut options = MqttOptions::new(client_id, host, port);
        options.set_keep_alive(KEEP_ALIVE);
        options.set_clean_session(false);
        options.set_manual_acks(true);
        if let Some(user) = username {
            options.set_credentials(user, password.unwrap_or_default());
        }

        let (client, connection) = Client::new(options, EVENT_CHANNEL_CAPACITY);
        client
            .subscribe(request_topic, QoS::AtLeastOnce)
            .with_context(|| format!("failed to subscribe to {}", request_topic))?;
        log::info!(
            "connected to MQTT broker {} (requests: {})",
            broker_addr,
            request_topic
        );
        Ok(Self { client, connection })
    }
}

impl QueueTransport for MqttQueue {
    type Token = Publish;

    fn receive(&mut self, timeout: Duration) -> Result<Option<Delivery<Publish>>> {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            match self.connection.recv_timeout(remaining) {
                Ok(Ok(Event::Incoming(Packet::Publish(publish)))) => {
                    return Ok(Some(Delivery {
                        payload: publish.payload.to_vec(),
                        token: publish,
                    }));
                }
                // Pings, acks for our own publishes, connack on reconnect.
                Ok(Ok(_)) => continue,
                Ok(Err(e)) => return Err(anyhow!("MQTT connection error: {}", e)),
                Err(rumqttc::RecvTimeoutError::Timeout) => return Ok(None),
                Err(rumqttc::RecvTimeoutError::Disconnected) => {
                    return Err(anyhow!("MQTT event loop disconnected"));
                }
            }
        }
    }

    fn ack(&mut self, token: Publish) -> Result<()> {
        self.client
            .ack(&token)
            .context("failed to ack MQTT delivery")
    }

    fn nack(&mut self, token: Publish, requeue: bool) -> Result<()> {
        if requeue {
            // Leave the delivery unacked: the persistent session redelivers
            // it when the session resumes.
            log::debug!("leaving pkid {} unacked for redelivery", token.pkid);
            Ok(())
        } else {
            self.client
                .ack(&token)
                .context("failed to discard MQTT delivery")
        }
    }

    fn publish(&mut self, channel: &str, payload: &[u8]) -> Result<()> {
        self.client
            .publish(channel, QoS::AtLeastOnce, false, payload.to_vec())
            .with_context(|| format!("failed to publish to {}", channel))
    }
}

fn split_host_port(addr: &str) -> Result<(String, u16)> {
    if let Some(rest) = addr.strip_prefix('[') {
        let (host, rest) = rest
            .split_once(']')
            .ok_or_else(|| anyhow!("invalid broker address: {}", addr))?;
        let port = rest
            .strip_prefix(':')
            .ok_or_else(|| anyhow!("missing broker port in {}", addr))?;
        let port: u16 = port.parse().context("invalid broker port")?;
        return Ok((host.to_string(), port));
    }

    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("missing broker port in {}", addr))?;
    let port: u16 = port.parse().context("invalid broker port")?;
    Ok((host.to_string(), port))
}

/// In-memory transport for tests and local development. Requests come off an
/// inbox queue; published payloads are collected per channel for inspection.
#[derive(Default)]
pub struct InMemoryQueue {
    inbox: VecDeque<Vec<u8>>,
    published: HashMap<String, Vec<Vec<u8>>>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, payload: impl Into<Vec<u8>>) {
        self.inbox.push_back(payload.into());
    }

    pub fn inbox_len(&self) -> usize {
        self.inbox.len()
    }

    pub fn published(&self, channel: &str) -> &[Vec<u8>] {
        self.published
            .get(channel)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

impl QueueTransport for InMemoryQueue {
    type Token = Vec<u8>;

    fn receive(&mut self, _timeout: Duration) -> Result<Option<Delivery<Vec<u8>>>> {
        Ok(self.inbox.pop_front().map(|payload| Delivery {
            payload: payload.clone(),
            token: payload,
        }))
    }

    fn ack(&mut self, _token: Vec<u8>) -> Result<()> {
        Ok(())
    }

    fn nack(&mut self, token: Vec<u8>, requeue: bool) -> Result<()> {
        if requeue {
            self.inbox.push_front(token);
        }
        Ok(())
    }

    fn publish(&mut self, channel: &str, payload: &[u8]) -> Result<()> {
        self.published
            .entry(channel.to_string())
            .or_default()
            .push(payload.to_vec());
        Ok(())
    }
}
