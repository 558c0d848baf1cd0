//! # homie-adapter-mqtt
//!
//! MQTT adapter — implements the `Transport` port against a real broker.
//!
//! ## Responsibilities
//! - Connect to an MQTT broker with the configured credentials, keep-alive
//!   and last will, bounded by a connect timeout
//! - Drive the rumqttc event loop in a background task and forward every
//!   inbound publish to the subscribers of [`Transport::messages`]
//! - Restore subscriptions after the client reconnects on its own
//! - Flush the before-disconnect hooks on a graceful disconnect
//!
//! ## Dependency rule
//! Same as other adapters: depends on `homie-app` and `homie-domain`.

pub mod config;
pub mod error;

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, LastWill, MqttOptions, Outgoing, Packet, QoS};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;

use homie_app::ports::{BeforeDisconnectHook, InboundMessage, Message, Qos, Transport};
use homie_domain::error::HomieError;

pub use config::MqttConfig;
pub use error::MqttError;

const RECONNECT_DELAY: Duration = Duration::from_secs(1);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

fn to_rumqttc(qos: Qos) -> QoS {
    match qos {
        Qos::AtMostOnce => QoS::AtMostOnce,
        Qos::AtLeastOnce => QoS::AtLeastOnce,
        Qos::ExactlyOnce => QoS::ExactlyOnce,
    }
}

fn utf8<B: AsRef<[u8]>>(bytes: &B) -> Option<&str> {
    std::str::from_utf8(bytes.as_ref()).ok()
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Connection {
    client: AsyncClient,
    event_loop: JoinHandle<()>,
}

/// [`Transport`] backed by a rumqttc [`AsyncClient`].
pub struct MqttTransport {
    config: MqttConfig,
    connection: Mutex<Option<Connection>>,
    subscriptions: Arc<Mutex<BTreeSet<String>>>,
    hooks: Mutex<Vec<BeforeDisconnectHook>>,
    last_will: Mutex<Option<Message>>,
    sender: broadcast::Sender<InboundMessage>,
}

impl std::fmt::Debug for MqttTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttTransport")
            .field("broker_host", &self.config.broker_host)
            .field("broker_port", &self.config.broker_port)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl MqttTransport {
    #[must_use]
    pub fn new(config: MqttConfig) -> Self {
        let (sender, _) = broadcast::channel(config.channel_capacity.max(1));
        Self {
            config,
            connection: Mutex::new(None),
            subscriptions: Arc::default(),
            hooks: Mutex::new(Vec::new()),
            last_will: Mutex::new(None),
            sender,
        }
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        lock(&self.connection)
            .as_ref()
            .is_some_and(|connection| !connection.event_loop.is_finished())
    }

    fn client(&self) -> Result<AsyncClient, MqttError> {
        lock(&self.connection)
            .as_ref()
            .map(|connection| connection.client.clone())
            .ok_or(MqttError::NotConnected)
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(
            self.config.client_id(),
            self.config.broker_host.clone(),
            self.config.broker_port,
        );
        options.set_keep_alive(self.config.keep_alive());
        if let (Some(username), Some(password)) = (&self.config.username, &self.config.password) {
            options.set_credentials(username.clone(), password.clone());
        }
        if let Some(will) = lock(&self.last_will).clone() {
            options.set_last_will(LastWill::new(
                will.topic,
                will.payload.into_bytes(),
                to_rumqttc(will.qos),
                will.retained,
            ));
        }
        options
    }

    fn spawn_event_loop(
        &self,
        client: AsyncClient,
        mut event_loop: EventLoop,
        connected: oneshot::Sender<Result<(), MqttError>>,
    ) -> JoinHandle<()> {
        let sender = self.sender.clone();
        let subscriptions = Arc::clone(&self.subscriptions);
        let mut connected = Some(connected);

        tokio::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        if let Some(connected) = connected.take() {
                            let _ = connected.send(Ok(()));
                            continue;
                        }
                        tracing::info!("reconnected to broker, restoring subscriptions");
                        for pattern in lock(&subscriptions).iter() {
                            if let Err(err) = client.try_subscribe(pattern.clone(), QoS::ExactlyOnce) {
                                tracing::warn!(%pattern, %err, "failed to restore subscription");
                            }
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        match (utf8(&publish.topic), utf8(&publish.payload)) {
                            (Some(topic), Some(payload)) => {
                                let _ = sender.send(InboundMessage {
                                    topic: topic.to_string(),
                                    payload: payload.to_string(),
                                });
                            }
                            _ => tracing::warn!("dropping inbound message that is not valid UTF-8"),
                        }
                    }
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                        tracing::debug!("disconnect sent, stopping event loop");
                        break;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        if let Some(connected) = connected.take() {
                            let _ = connected.send(Err(MqttError::Connection(err)));
                            break;
                        }
                        tracing::warn!(%err, "MQTT connection error, retrying");
                        drop(err);
                        tokio::time::sleep(RECONNECT_DELAY).await;
                    }
                }
            }
        })
    }
}

impl Transport for MqttTransport {
    #[tracing::instrument(skip(self), fields(host = %self.config.broker_host, port = self.config.broker_port))]
    async fn connect(&self) -> Result<(), HomieError> {
        let (client, event_loop) = AsyncClient::new(self.options(), self.config.channel_capacity.max(1));
        let (connected_tx, connected_rx) = oneshot::channel();
        let handle = self.spawn_event_loop(client.clone(), event_loop, connected_tx);

        let acknowledged = tokio::time::timeout(self.config.connect_timeout(), connected_rx).await;
        let outcome = match acknowledged {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(MqttError::NotConnected),
            Err(_) => Err(MqttError::Timeout(self.config.connect_timeout_secs)),
        };
        if let Err(err) = outcome {
            handle.abort();
            return Err(err.into());
        }

        let previous = lock(&self.connection).replace(Connection {
            client,
            event_loop: handle,
        });
        if let Some(previous) = previous {
            previous.event_loop.abort();
        }
        tracing::info!("connected to broker");
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn disconnect(&self) -> Result<(), HomieError> {
        let client = self.client()?;
        let flushed: Vec<Message> = lock(&self.hooks).iter().flat_map(|hook| hook()).collect();
        for message in flushed {
            self.publish(message).await?;
        }
        client.disconnect().await.map_err(MqttError::Client)?;

        let connection = lock(&self.connection).take();
        if let Some(connection) = connection {
            if tokio::time::timeout(SHUTDOWN_GRACE, connection.event_loop)
                .await
                .is_err()
            {
                tracing::warn!("event loop did not stop in time");
            }
        }
        lock(&self.subscriptions).clear();
        tracing::info!("disconnected from broker");
        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> Result<(), HomieError> {
        let client = self.client()?;
        client
            .subscribe(pattern, QoS::ExactlyOnce)
            .await
            .map_err(MqttError::Client)?;
        lock(&self.subscriptions).insert(pattern.to_string());
        tracing::debug!(%pattern, "subscribed");
        Ok(())
    }

    async fn unsubscribe(&self, pattern: &str) -> Result<(), HomieError> {
        let client = self.client()?;
        client
            .unsubscribe(pattern)
            .await
            .map_err(MqttError::Client)?;
        lock(&self.subscriptions).remove(pattern);
        tracing::debug!(%pattern, "unsubscribed");
        Ok(())
    }

    async fn publish(&self, message: Message) -> Result<(), HomieError> {
        let client = self.client()?;
        client
            .publish(
                message.topic,
                to_rumqttc(message.qos),
                message.retained,
                message.payload.into_bytes(),
            )
            .await
            .map_err(MqttError::Client)?;
        Ok(())
    }

    fn messages(&self) -> broadcast::Receiver<InboundMessage> {
        self.sender.subscribe()
    }

    fn on_before_disconnect(&self, hook: BeforeDisconnectHook) {
        lock(&self.hooks).push(hook);
    }

    fn set_last_will(&self, message: Message) {
        *lock(&self.last_will) = Some(message);
    }
}
