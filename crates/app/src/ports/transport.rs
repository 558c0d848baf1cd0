//! Transport port — the publish/subscribe channel to the broker.
//!
//! The device tree never talks MQTT directly. It publishes [`Message`]s and
//! consumes [`InboundMessage`]s through this trait. Adapters implement it
//! (`homie-adapter-mqtt` against a real broker, `homie-adapter-memory` as an
//! in-process loopback).

use std::future::Future;
use std::sync::Arc;

use tokio::sync::broadcast;

use homie_domain::error::HomieError;

/// MQTT delivery guarantee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Qos {
    AtMostOnce,
    AtLeastOnce,
    #[default]
    ExactlyOnce,
}

impl Qos {
    /// Numeric level as used on the wire.
    #[must_use]
    pub fn level(self) -> u8 {
        match self {
            Self::AtMostOnce => 0,
            Self::AtLeastOnce => 1,
            Self::ExactlyOnce => 2,
        }
    }
}

/// An outbound publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub payload: String,
    pub qos: Qos,
    pub retained: bool,
}

impl Message {
    /// A qos 2, retained message, the default for Homie attribute topics.
    pub fn retained(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos: Qos::ExactlyOnce,
            retained: true,
        }
    }

    /// An empty retained message, which removes the topic from the broker.
    pub fn clear(topic: impl Into<String>) -> Self {
        Self::retained(topic, String::new())
    }
}

/// A message received on a subscribed topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: String,
}

/// Produces the messages to flush right before a graceful disconnect.
pub type BeforeDisconnectHook = Box<dyn Fn() -> Vec<Message> + Send + Sync>;

/// Connection to a publish/subscribe broker.
pub trait Transport: Send + Sync {
    /// Open the connection.
    fn connect(&self) -> impl Future<Output = Result<(), HomieError>> + Send;

    /// Flush the before-disconnect hooks, then close the connection.
    fn disconnect(&self) -> impl Future<Output = Result<(), HomieError>> + Send;

    /// Subscribe to a topic pattern (`+` and `#` wildcards allowed).
    fn subscribe(&self, pattern: &str) -> impl Future<Output = Result<(), HomieError>> + Send;

    fn unsubscribe(&self, pattern: &str) -> impl Future<Output = Result<(), HomieError>> + Send;

    fn publish(&self, message: Message) -> impl Future<Output = Result<(), HomieError>> + Send;

    /// Receive every message delivered on a subscribed topic from now on.
    ///
    /// Dropping the receiver stops the delivery to that consumer.
    fn messages(&self) -> broadcast::Receiver<InboundMessage>;

    /// Register a hook run by [`disconnect`](Self::disconnect) before the
    /// connection is closed.
    fn on_before_disconnect(&self, hook: BeforeDisconnectHook);

    /// Message the broker publishes on our behalf if the connection is lost.
    ///
    /// Takes effect on the next [`connect`](Self::connect).
    fn set_last_will(&self, message: Message);
}

impl<T: Transport> Transport for Arc<T> {
    fn connect(&self) -> impl Future<Output = Result<(), HomieError>> + Send {
        (**self).connect()
    }

    fn disconnect(&self) -> impl Future<Output = Result<(), HomieError>> + Send {
        (**self).disconnect()
    }

    fn subscribe(&self, pattern: &str) -> impl Future<Output = Result<(), HomieError>> + Send {
        (**self).subscribe(pattern)
    }

    fn unsubscribe(&self, pattern: &str) -> impl Future<Output = Result<(), HomieError>> + Send {
        (**self).unsubscribe(pattern)
    }

    fn publish(&self, message: Message) -> impl Future<Output = Result<(), HomieError>> + Send {
        (**self).publish(message)
    }

    fn messages(&self) -> broadcast::Receiver<InboundMessage> {
        (**self).messages()
    }

    fn on_before_disconnect(&self, hook: BeforeDisconnectHook) {
        (**self).on_before_disconnect(hook);
    }

    fn set_last_will(&self, message: Message) {
        (**self).set_last_will(message);
    }
}
