//! MQTT message bus client using rumqttc.
//!
//! Startup is a two-step handshake done on the caller's task so failures can
//! be reported before any command is processed:
//!
//! 1. [`MqttBus::connect`] polls the event loop until CONNACK.
//! 2. [`MqttBus::subscribe`] sends SUBSCRIBE and polls until SUBACK.
//!
//! [`MqttBus::payloads`] then hands the event loop to a background task that
//! forwards every PUBLISH payload into a bounded channel, exposed as a stream.

use hubctrl_core::BridgeError;
use hubctrl_core::config::{ConfigError, defaults, parse_broker_address};
use parking_lot::Mutex;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet,
    SubscribeReasonCode,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};

/// Result type for bus operations.
pub type BusResult<T> = std::result::Result<T, BusError>;

/// Stream of raw payloads received on the subscribed topics.
pub type PayloadStream = ReceiverStream<Vec<u8>>;

/// Requests buffered between the client handle and the event loop.
const REQUEST_CAPACITY: usize = 10;

/// Time allowed for the pump task to finish after DISCONNECT.
const PUMP_STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Message bus errors.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// Broker unreachable or refused the connection.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Handshake did not complete in time.
    #[error("Timed out waiting for {what} after {after_secs}s")]
    Timeout { what: &'static str, after_secs: u64 },

    /// Broker rejected a subscription.
    #[error("Subscription to {0} rejected by broker")]
    Subscribe(String),

    /// Request could not be queued on the client.
    #[error("MQTT client error: {0}")]
    Client(String),

    /// The event loop already belongs to the payload pump.
    #[error("Payload stream already started")]
    AlreadyStreaming,

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl From<ConfigError> for BusError {
    fn from(e: ConfigError) -> Self {
        Self::InvalidConfiguration(e.to_string())
    }
}

impl From<BusError> for BridgeError {
    fn from(e: BusError) -> Self {
        BridgeError::BusConnection(e.to_string())
    }
}

/// MQTT QoS level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum Qos {
    #[default]
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl From<Qos> for rumqttc::QoS {
    fn from(qos: Qos) -> Self {
        match qos {
            Qos::AtMostOnce => rumqttc::QoS::AtMostOnce,
            Qos::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
            Qos::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
        }
    }
}

impl TryFrom<u8> for Qos {
    type Error = BusError;

    fn try_from(value: u8) -> BusResult<Self> {
        match value {
            0 => Ok(Self::AtMostOnce),
            1 => Ok(Self::AtLeastOnce),
            2 => Ok(Self::ExactlyOnce),
            other => Err(BusError::InvalidConfiguration(format!(
                "QoS must be 0, 1 or 2, got {}",
                other
            ))),
        }
    }
}

/// MQTT client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    /// Broker host.
    pub broker: String,

    /// Broker port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Client ID (generated if not set).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    /// Username.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Password.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Keep-alive interval in seconds.
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,

    /// Clean session flag.
    #[serde(default = "default_clean_session")]
    pub clean_session: bool,

    /// QoS for subscriptions.
    #[serde(default)]
    pub qos: Qos,

    /// Time allowed for CONNACK and SUBACK, in seconds.
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_secs: u64,

    /// Delay before polling again after an error, in milliseconds.
    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval_ms: u64,

    /// Consecutive connection errors tolerated before giving up; 0 = never.
    #[serde(default)]
    pub max_reconnects: u32,

    /// Buffered payloads between the pump and the consumer.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_port() -> u16 {
    defaults::MQTT_PORT
}

fn default_keep_alive() -> u64 {
    defaults::KEEP_ALIVE_SECS
}

fn default_clean_session() -> bool {
    true
}

fn default_connection_timeout() -> u64 {
    defaults::CONNECT_TIMEOUT_SECS
}

fn default_reconnect_interval() -> u64 {
    defaults::RECONNECT_INTERVAL_MS
}

fn default_channel_capacity() -> usize {
    defaults::CHANNEL_CAPACITY
}

impl MqttConfig {
    /// Create a new MQTT configuration.
    pub fn new(broker: impl Into<String>) -> Self {
        Self {
            broker: broker.into(),
            port: default_port(),
            client_id: None,
            username: None,
            password: None,
            keep_alive_secs: default_keep_alive(),
            clean_session: default_clean_session(),
            qos: Qos::default(),
            connection_timeout_secs: default_connection_timeout(),
            reconnect_interval_ms: default_reconnect_interval(),
            max_reconnects: 0,
            channel_capacity: default_channel_capacity(),
        }
    }

    /// Build from a `host[:port]` or `tcp://host:port` address.
    pub fn from_address(address: &str) -> BusResult<Self> {
        let (host, port) = parse_broker_address(address)?;
        Ok(Self::new(host).with_port(port))
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn with_qos(mut self, qos: Qos) -> Self {
        self.qos = qos;
        self
    }

    pub fn with_keep_alive(mut self, secs: u64) -> Self {
        self.keep_alive_secs = secs;
        self
    }

    pub fn with_connection_timeout(mut self, secs: u64) -> Self {
        self.connection_timeout_secs = secs;
        self
    }

    pub fn with_max_reconnects(mut self, attempts: u32) -> Self {
        self.max_reconnects = attempts;
        self
    }

    /// Full broker address.
    pub fn broker_addr(&self) -> String {
        format!("{}:{}", self.broker, self.port)
    }

    /// Credentials, applied only when both are non-empty.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(user), Some(pass)) if !user.is_empty() && !pass.is_empty() => Some((user, pass)),
            _ => None,
        }
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn validate(&self) -> BusResult<()> {
        if self.broker.trim().is_empty() {
            return Err(BusError::InvalidConfiguration("broker is empty".to_string()));
        }
        if self.connection_timeout_secs == 0 {
            return Err(BusError::InvalidConfiguration(
                "connection timeout must be greater than zero".to_string(),
            ));
        }
        if self.channel_capacity == 0 {
            return Err(BusError::InvalidConfiguration(
                "channel capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    fn mqtt_options(&self) -> MqttOptions {
        let client_id = self.client_id.clone().unwrap_or_else(|| {
            format!("{}-{}", defaults::CLIENT_ID_PREFIX, uuid::Uuid::new_v4())
        });

        let mut options = MqttOptions::new(client_id, &self.broker, self.port);
        options.set_keep_alive(Duration::from_secs(self.keep_alive_secs));
        options.set_clean_session(self.clean_session);
        if let Some((user, pass)) = self.credentials() {
            options.set_credentials(user, pass);
        }
        options
    }
}

/// Connected MQTT client.
pub struct MqttBus {
    config: MqttConfig,
    client: AsyncClient,
    event_loop: Option<EventLoop>,
    /// Payloads that arrived while waiting for a SUBACK.
    pending: Vec<Vec<u8>>,
    topics: Arc<Mutex<Vec<String>>>,
    running: Arc<AtomicBool>,
    pump: Option<JoinHandle<()>>,
}

impl MqttBus {
    /// Connect to the broker and wait for CONNACK.
    pub async fn connect(config: MqttConfig) -> BusResult<Self> {
        config.validate()?;

        let (client, mut event_loop) = AsyncClient::new(config.mqtt_options(), REQUEST_CAPACITY);

        tokio::time::timeout(config.connection_timeout(), wait_for_connack(&mut event_loop))
            .await
            .map_err(|_| BusError::Timeout {
                what: "CONNACK",
                after_secs: config.connection_timeout_secs,
            })??;

        info!(broker = %config.broker_addr(), "Connected to MQTT broker");

        Ok(Self {
            config,
            client,
            event_loop: Some(event_loop),
            pending: Vec::new(),
            topics: Arc::new(Mutex::new(Vec::new())),
            running: Arc::new(AtomicBool::new(true)),
            pump: None,
        })
    }

    /// Subscribe to `topic` and wait for SUBACK.
    ///
    /// Must be called before [`payloads`](Self::payloads).
    pub async fn subscribe(&mut self, topic: &str) -> BusResult<()> {
        let event_loop = self.event_loop.as_mut().ok_or(BusError::AlreadyStreaming)?;

        self.client
            .subscribe(topic, self.config.qos.into())
            .await
            .map_err(|e| BusError::Client(e.to_string()))?;

        tokio::time::timeout(
            self.config.connection_timeout(),
            wait_for_suback(event_loop, topic, &mut self.pending),
        )
        .await
        .map_err(|_| BusError::Timeout {
            what: "SUBACK",
            after_secs: self.config.connection_timeout_secs,
        })??;

        self.topics.lock().push(topic.to_string());
        info!(topic, qos = ?self.config.qos, "Subscribed to topic");
        Ok(())
    }

    /// Start forwarding received payloads.
    pub fn payloads(&mut self) -> BusResult<PayloadStream> {
        let event_loop = self.event_loop.take().ok_or(BusError::AlreadyStreaming)?;
        let (tx, rx) = mpsc::channel(self.config.channel_capacity);

        let pump = Pump {
            client: self.client.clone(),
            config: self.config.clone(),
            topics: self.topics.clone(),
            running: self.running.clone(),
        };
        let pending = std::mem::take(&mut self.pending);
        self.pump = Some(tokio::spawn(pump.run(event_loop, tx, pending)));

        Ok(ReceiverStream::new(rx))
    }

    /// Send DISCONNECT and stop the pump.
    pub async fn disconnect(mut self) -> BusResult<()> {
        self.running.store(false, Ordering::SeqCst);
        let result = self
            .client
            .disconnect()
            .await
            .map_err(|e| BusError::Client(e.to_string()));

        if let Some(mut pump) = self.pump.take() {
            if tokio::time::timeout(PUMP_STOP_TIMEOUT, &mut pump).await.is_err() {
                warn!("MQTT pump did not stop in time, aborting");
                pump.abort();
            }
        }

        info!(broker = %self.config.broker_addr(), "Disconnected from MQTT broker");
        result
    }
}

async fn wait_for_connack(event_loop: &mut EventLoop) -> BusResult<()> {
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                return if ack.code == ConnectReturnCode::Success {
                    Ok(())
                } else {
                    Err(BusError::Connection(format!(
                        "broker refused connection: {:?}",
                        ack.code
                    )))
                };
            }
            Ok(_) => {}
            Err(e) => return Err(BusError::Connection(e.to_string())),
        }
    }
}

async fn wait_for_suback(
    event_loop: &mut EventLoop,
    topic: &str,
    pending: &mut Vec<Vec<u8>>,
) -> BusResult<()> {
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::SubAck(ack))) => {
                return if ack
                    .return_codes
                    .iter()
                    .any(|code| matches!(code, SubscribeReasonCode::Failure))
                {
                    Err(BusError::Subscribe(topic.to_string()))
                } else {
                    Ok(())
                };
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                pending.push(publish.payload.to_vec());
            }
            Ok(_) => {}
            Err(e) => return Err(BusError::Connection(e.to_string())),
        }
    }
}

/// Background task owning the event loop once streaming starts.
struct Pump {
    client: AsyncClient,
    config: MqttConfig,
    topics: Arc<Mutex<Vec<String>>>,
    running: Arc<AtomicBool>,
}

impl Pump {
    async fn run(self, mut event_loop: EventLoop, tx: mpsc::Sender<Vec<u8>>, pending: Vec<Vec<u8>>) {
        for payload in pending {
            if tx.send(payload).await.is_err() {
                return;
            }
        }

        let mut failures: u32 = 0;
        while self.running.load(Ordering::SeqCst) {
            match event_loop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    failures = 0;
                    debug!(
                        topic = %publish.topic,
                        bytes = publish.payload.len(),
                        "MQTT publish received"
                    );
                    if tx.send(publish.payload.to_vec()).await.is_err() {
                        debug!("Payload receiver dropped");
                        break;
                    }
                }
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    failures = 0;
                    info!(broker = %self.config.broker_addr(), "Reconnected to MQTT broker");
                    if !ack.session_present {
                        self.resubscribe();
                    }
                }
                Ok(Event::Incoming(Packet::SubAck(ack))) => {
                    if ack
                        .return_codes
                        .iter()
                        .any(|code| matches!(code, SubscribeReasonCode::Failure))
                    {
                        error!("Broker rejected re-subscription");
                    }
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
                Ok(_) => {}
                Err(e) => {
                    if !self.running.load(Ordering::SeqCst) {
                        break;
                    }
                    failures += 1;
                    if self.config.max_reconnects > 0 && failures > self.config.max_reconnects {
                        error!(
                            "MQTT broker {} error count reached {}, stopping: {}",
                            self.config.broker_addr(),
                            self.config.max_reconnects,
                            e
                        );
                        break;
                    }
                    warn!(
                        "MQTT broker {} error ({}): {}",
                        self.config.broker_addr(),
                        failures,
                        e
                    );
                    tokio::time::sleep(self.config.reconnect_interval()).await;
                }
            }
        }

        info!("MQTT connection closed");
    }

    fn resubscribe(&self) {
        let qos = self.config.qos.into();
        for topic in self.topics.lock().iter() {
            match self.client.try_subscribe(topic.clone(), qos) {
                Ok(()) => debug!(topic = %topic, "Re-subscribed"),
                Err(e) => warn!(topic = %topic, "Failed to re-subscribe: {}", e),
            }
        }
    }
}
