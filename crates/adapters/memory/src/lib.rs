//! # homie-adapter-memory
//!
//! In-process implementation of the `Transport` port.
//!
//! [`MemoryTransport`] behaves like a single-client broker: it keeps retained
//! messages, delivers publishes that match an active subscription back to the
//! client, replays retained messages on subscribe, and publishes the last will
//! when the connection is dropped without a graceful disconnect. Every
//! publish is also recorded so tests can assert on the exact sequence.
//!
//! ## Dependency rule
//! Same as other adapters: depends on `homie-app` and `homie-domain`.

pub mod error;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;

use homie_app::ports::{BeforeDisconnectHook, InboundMessage, Message, Transport};
use homie_domain::error::HomieError;
use homie_domain::topic::matches;

pub use error::MemoryError;

const DEFAULT_CAPACITY: usize = 64;

#[derive(Debug, Default)]
struct State {
    connected: bool,
    subscriptions: BTreeSet<String>,
    retained: BTreeMap<String, Message>,
    published: Vec<Message>,
    last_will: Option<Message>,
}

/// Loopback transport.
pub struct MemoryTransport {
    state: Mutex<State>,
    hooks: Mutex<Vec<BeforeDisconnectHook>>,
    sender: broadcast::Sender<InboundMessage>,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("state", &*self.state())
            .finish_non_exhaustive()
    }
}

fn valid_pattern(pattern: &str) -> bool {
    let levels: Vec<&str> = pattern.split('/').collect();
    levels.iter().enumerate().all(|(index, level)| match *level {
        "#" => index == levels.len() - 1,
        "+" => true,
        other => !other.contains(['+', '#']),
    })
}

impl MemoryTransport {
    /// Create a transport whose inbound channel buffers `capacity` messages
    /// per receiver.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            state: Mutex::new(State::default()),
            hooks: Mutex::new(Vec::new()),
            sender,
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state().connected
    }

    /// Every message published so far, in order.
    #[must_use]
    pub fn published(&self) -> Vec<Message> {
        self.state().published.clone()
    }

    /// Forget the recorded publishes. Retained messages are kept.
    pub fn clear_published(&self) {
        self.state().published.clear();
    }

    /// The retained payload currently stored for `topic`.
    #[must_use]
    pub fn retained(&self, topic: &str) -> Option<String> {
        self.state()
            .retained
            .get(topic)
            .map(|message| message.payload.clone())
    }

    /// Topics that currently hold a retained message, sorted.
    #[must_use]
    pub fn retained_topics(&self) -> Vec<String> {
        self.state().retained.keys().cloned().collect()
    }

    #[must_use]
    pub fn subscriptions(&self) -> Vec<String> {
        self.state().subscriptions.iter().cloned().collect()
    }

    #[must_use]
    pub fn last_will(&self) -> Option<Message> {
        self.state().last_will.clone()
    }

    /// Simulate another client publishing `payload` on `topic`.
    ///
    /// The message is delivered if it matches an active subscription.
    pub fn inject(&self, topic: &str, payload: &str) {
        let state = self.state();
        self.deliver(&state, topic, payload);
    }

    /// Simulate a broken connection: the last will is published and stored
    /// like any other message, and the hooks are not run.
    pub fn drop_connection(&self) {
        let mut state = self.state();
        if !state.connected {
            return;
        }
        state.connected = false;
        if let Some(will) = state.last_will.clone() {
            tracing::debug!(topic = %will.topic, "publishing last will");
            Self::store(&mut state, will);
        }
    }

    fn store(state: &mut State, message: Message) {
        if message.retained {
            if message.payload.is_empty() {
                state.retained.remove(&message.topic);
            } else {
                state.retained.insert(message.topic.clone(), message.clone());
            }
        }
        state.published.push(message);
    }

    fn deliver(&self, state: &State, topic: &str, payload: &str) {
        let subscribed = state
            .subscriptions
            .iter()
            .any(|pattern| matches(pattern, topic));
        if subscribed {
            // No receiver only means nobody listens yet.
            let _ = self.sender.send(InboundMessage {
                topic: topic.to_string(),
                payload: payload.to_string(),
            });
        }
    }

    fn publish_now(&self, message: Message) -> Result<(), MemoryError> {
        let mut state = self.state();
        if !state.connected {
            return Err(MemoryError::NotConnected);
        }
        self.deliver(&state, &message.topic, &message.payload);
        Self::store(&mut state, message);
        Ok(())
    }
}

impl Transport for MemoryTransport {
    async fn connect(&self) -> Result<(), HomieError> {
        self.state().connected = true;
        tracing::debug!("memory transport connected");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), HomieError> {
        let flushed: Vec<Message> = self
            .hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .flat_map(|hook| hook())
            .collect();
        for message in flushed {
            self.publish_now(message)?;
        }
        let mut state = self.state();
        state.connected = false;
        state.subscriptions.clear();
        tracing::debug!("memory transport disconnected");
        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> Result<(), HomieError> {
        if !valid_pattern(pattern) {
            return Err(MemoryError::InvalidPattern(pattern.to_string()).into());
        }
        let mut state = self.state();
        if !state.connected {
            return Err(MemoryError::NotConnected.into());
        }
        state.subscriptions.insert(pattern.to_string());
        for message in state.retained.values() {
            if matches(pattern, &message.topic) {
                let _ = self.sender.send(InboundMessage {
                    topic: message.topic.clone(),
                    payload: message.payload.clone(),
                });
            }
        }
        Ok(())
    }

    async fn unsubscribe(&self, pattern: &str) -> Result<(), HomieError> {
        let mut state = self.state();
        if !state.connected {
            return Err(MemoryError::NotConnected.into());
        }
        state.subscriptions.remove(pattern);
        Ok(())
    }

    async fn publish(&self, message: Message) -> Result<(), HomieError> {
        Ok(self.publish_now(message)?)
    }

    fn messages(&self) -> broadcast::Receiver<InboundMessage> {
        self.sender.subscribe()
    }

    fn on_before_disconnect(&self, hook: BeforeDisconnectHook) {
        self.hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(hook);
    }

    fn set_last_will(&self, message: Message) {
        self.state().last_will = Some(message);
    }
}
