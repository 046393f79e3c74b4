//! Broker connection lifecycle for the sensor topic.
//!
//! ```text
//! Disconnected -> Connecting -> Connected
//!       ^              |            |
//!       +--------------+------------+   (on failure, after a fixed backoff)
//! ```

use std::{future::Future, time::Duration};

use rumqttc::{
    AsyncClient, ConnectionError, Event, MqttOptions, Packet, QoS, SubAck, SubscribeReasonCode,
};
use serde::Serialize;
use thiserror::Error;
use tokio::{
    sync::{mpsc, watch},
    time::{Instant, sleep, sleep_until},
};
use tracing::{debug, info, warn};

pub const DEFAULT_TOPIC: &str = "maison/energie";

const REQUEST_CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SubscriptionConfig {
    pub host: String,

    pub port: u16,

    pub client_id: String,

    pub credentials: Option<(String, String)>,

    pub topic: String,

    pub keep_alive: Duration,

    /// Constant delay between a connection or subscription failure and the
    /// next attempt.
    pub reconnect_interval: Duration,
}

impl SubscriptionConfig {
    pub fn mqtt_options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options
            .set_keep_alive(self.keep_alive)
            .set_clean_session(true);
        if let Some((username, password)) = &self.credentials {
            options.set_credentials(username, password);
        }
        options
    }
}

#[derive(Debug, Error)]
#[error("cannot reach MQTT broker at {host}:{port}")]
pub struct ConnectivityError {
    pub host: String,

    pub port: u16,

    #[source]
    pub source: ConnectionError,
}

/// Owns the broker connection and hands every received payload to a sink.
///
/// Validation is left to the consumer of the sink.
#[derive(Debug)]
pub struct SubscriptionManager {
    config: SubscriptionConfig,
    state: watch::Sender<ConnectionState>,
}

impl SubscriptionManager {
    pub fn new(config: SubscriptionConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self { config, state }
    }

    pub fn config(&self) -> &SubscriptionConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Receiver for state changes, for health reporting.
    pub fn watch(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Polls the broker until `shutdown` resolves or the sink is closed.
    ///
    /// Payloads are sent to `sink` one at a time in delivery order. Connection
    /// failures are never fatal; the next attempt follows after
    /// `reconnect_interval`. A refused or unsent subscription is requested
    /// again after the same interval while the connection stays up.
    pub async fn run(&self, sink: mpsc::Sender<Vec<u8>>, shutdown: impl Future<Output = ()>) {
        let (client, mut eventloop) =
            AsyncClient::new(self.config.mqtt_options(), REQUEST_CHANNEL_CAPACITY);
        tokio::pin!(shutdown);

        self.transition(ConnectionState::Connecting);
        let mut resubscribe_at: Option<Instant> = None;

        loop {
            let event = tokio::select! {
                _ = &mut shutdown => break,
                _ = sleep_until(resubscribe_at.unwrap_or_else(Instant::now)), if resubscribe_at.is_some() => {
                    resubscribe_at = self.request_subscription(&client);
                    continue;
                }
                event = eventloop.poll() => event,
            };

            match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    self.transition(ConnectionState::Connected);
                    resubscribe_at = self.request_subscription(&client);
                }
                Ok(Event::Incoming(Packet::SubAck(ack))) => {
                    if subscription_refused(&ack) {
                        warn!(
                            topic = %self.config.topic,
                            retry_in = ?self.config.reconnect_interval,
                            "broker refused subscription"
                        );
                        resubscribe_at = Some(self.retry_deadline());
                    } else {
                        info!(topic = %self.config.topic, "subscribed");
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    debug!(topic = %publish.topic, bytes = publish.payload.len(), "message received");
                    if sink.send(publish.payload.to_vec()).await.is_err() {
                        warn!("ingest queue closed, stopping subscription");
                        break;
                    }
                }
                Ok(_) => {}
                Err(source) => {
                    let err = ConnectivityError {
                        host: self.config.host.clone(),
                        port: self.config.port,
                        source,
                    };
                    warn!(
                        error = %err,
                        cause = %err.source,
                        retry_in = ?self.config.reconnect_interval,
                        "broker connection lost"
                    );
                    self.transition(ConnectionState::Disconnected);
                    // The next ConnAck subscribes again.
                    resubscribe_at = None;

                    tokio::select! {
                        _ = &mut shutdown => break,
                        _ = sleep(self.config.reconnect_interval) => {}
                    }
                    self.transition(ConnectionState::Connecting);
                }
            }
        }

        if let Err(err) = client.try_disconnect() {
            debug!(error = %err, "failed to queue disconnect");
        }
        self.transition(ConnectionState::Disconnected);
    }

    /// Queues a subscription to the configured topic. Returns when to try
    /// again if the request could not be queued.
    fn request_subscription(&self, client: &AsyncClient) -> Option<Instant> {
        // try_ variant: the request queue is drained by the polling loop.
        match client.try_subscribe(&self.config.topic, QoS::AtMostOnce) {
            Ok(()) => None,
            Err(err) => {
                warn!(
                    topic = %self.config.topic,
                    error = %err,
                    retry_in = ?self.config.reconnect_interval,
                    "failed to request subscription"
                );
                Some(self.retry_deadline())
            }
        }
    }

    fn retry_deadline(&self) -> Instant {
        Instant::now() + self.config.reconnect_interval
    }

    fn transition(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            info!(from = previous.as_str(), to = next.as_str(), "broker connection state changed");
        }
    }
}

fn subscription_refused(ack: &SubAck) -> bool {
    ack.return_codes
        .iter()
        .any(|code| matches!(code, SubscribeReasonCode::Failure))
}
