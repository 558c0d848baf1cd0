//! In-process transport and fixtures shared by the unit tests.

use std::collections::BTreeSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tokio::sync::{broadcast, watch};

use homie_domain::config::{DeviceConfig, NodeConfig, PropertyConfig};
use homie_domain::datatype::Datatype;
use homie_domain::error::HomieError;
use homie_domain::topic::matches;

use crate::ports::{BeforeDisconnectHook, InboundMessage, Message, Transport};

#[derive(Debug, thiserror::Error)]
#[error("publish refused by test transport")]
struct Refused;

/// Records every successful publish and subscription.
pub(crate) struct RecordingTransport {
    published: Mutex<Vec<Message>>,
    subscriptions: Mutex<BTreeSet<String>>,
    hooks: Mutex<Vec<BeforeDisconnectHook>>,
    last_will: Mutex<Option<Message>>,
    fail_all: AtomicBool,
    fail_pattern: Mutex<Option<String>>,
    connected: AtomicBool,
    hold: Mutex<Option<(String, watch::Receiver<bool>)>>,
    release: watch::Sender<bool>,
    held: AtomicUsize,
    sender: broadcast::Sender<InboundMessage>,
}

impl Default for RecordingTransport {
    fn default() -> Self {
        let (sender, _) = broadcast::channel(16);
        let (release, _) = watch::channel(false);
        Self {
            published: Mutex::default(),
            subscriptions: Mutex::default(),
            hooks: Mutex::default(),
            last_will: Mutex::default(),
            fail_all: AtomicBool::new(false),
            fail_pattern: Mutex::default(),
            connected: AtomicBool::new(false),
            hold: Mutex::default(),
            release,
            held: AtomicUsize::new(0),
            sender,
        }
    }
}

impl RecordingTransport {
    pub fn published(&self) -> Vec<Message> {
        self.published.lock().unwrap().clone()
    }

    pub fn published_topics(&self) -> Vec<String> {
        self.published().into_iter().map(|m| m.topic).collect()
    }

    pub fn reset(&self) {
        self.published.lock().unwrap().clear();
    }

    pub fn is_subscribed(&self, pattern: &str) -> bool {
        self.subscriptions.lock().unwrap().contains(pattern)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn last_will(&self) -> Option<Message> {
        self.last_will.lock().unwrap().clone()
    }

    pub fn fail_publishes(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::SeqCst);
    }

    pub fn fail_matching(&self, pattern: Option<&str>) {
        *self.fail_pattern.lock().unwrap() = pattern.map(str::to_string);
    }

    /// Stall every publish whose topic matches `pattern` until [`release`]
    /// is called.
    ///
    /// [`release`]: Self::release
    pub fn hold_matching(&self, pattern: &str) {
        self.release.send_replace(false);
        *self.hold.lock().unwrap() = Some((pattern.to_string(), self.release.subscribe()));
    }

    /// Let the stalled publishes through and stop holding new ones.
    pub fn release(&self) {
        self.hold.lock().unwrap().take();
        self.release.send_replace(true);
    }

    /// Yield to other tasks until at least one publish is stalled.
    pub async fn wait_until_held(&self) {
        while self.held.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
    }

    async fn pass_hold(&self, topic: &str) {
        let gate = self
            .hold
            .lock()
            .unwrap()
            .as_ref()
            .filter(|(pattern, _)| matches(pattern, topic))
            .map(|(_, gate)| gate.clone());
        if let Some(mut gate) = gate {
            self.held.fetch_add(1, Ordering::SeqCst);
            let _ = gate.wait_for(|released| *released).await;
            self.held.fetch_sub(1, Ordering::SeqCst);
        }
    }

    pub fn inject(&self, topic: &str, payload: &str) {
        let _ = self.sender.send(InboundMessage {
            topic: topic.to_string(),
            payload: payload.to_string(),
        });
    }

    fn record(&self, message: Message) -> Result<(), HomieError> {
        let refused = self.fail_all.load(Ordering::SeqCst)
            || self
                .fail_pattern
                .lock()
                .unwrap()
                .as_deref()
                .is_some_and(|pattern| matches(pattern, &message.topic));
        if refused {
            return Err(HomieError::transport(Refused));
        }
        self.published.lock().unwrap().push(message);
        Ok(())
    }
}

impl Transport for RecordingTransport {
    async fn connect(&self) -> Result<(), HomieError> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), HomieError> {
        let messages: Vec<Message> = self.hooks.lock().unwrap().iter().flat_map(|hook| hook()).collect();
        for message in messages {
            self.record(message)?;
        }
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> Result<(), HomieError> {
        self.subscriptions.lock().unwrap().insert(pattern.to_string());
        Ok(())
    }

    async fn unsubscribe(&self, pattern: &str) -> Result<(), HomieError> {
        self.subscriptions.lock().unwrap().remove(pattern);
        Ok(())
    }

    async fn publish(&self, message: Message) -> Result<(), HomieError> {
        self.pass_hold(&message.topic).await;
        self.record(message)
    }

    fn messages(&self) -> broadcast::Receiver<InboundMessage> {
        self.sender.subscribe()
    }

    fn on_before_disconnect(&self, hook: BeforeDisconnectHook) {
        self.hooks.lock().unwrap().push(hook);
    }

    fn set_last_will(&self, message: Message) {
        *self.last_will.lock().unwrap() = Some(message);
    }
}

fn integer_property() -> PropertyConfig {
    PropertyConfig::builder(Datatype::Integer)
        .name("Test Property")
        .format("0:100")
        .settable(true)
        .build()
}

/// One node with two settable integer properties.
pub(crate) fn test_config() -> DeviceConfig {
    DeviceConfig::builder()
        .name("Test Device")
        .node(
            "node-1",
            NodeConfig::builder()
                .name("Test Node")
                .property("property-1", integer_property())
                .property("property-2", integer_property())
                .build()
                .unwrap(),
        )
        .build()
        .unwrap()
}

/// A lamp with a settable boolean `relay/power`.
pub(crate) fn lamp_config() -> DeviceConfig {
    DeviceConfig::builder()
        .name("Lamp")
        .node(
            "relay",
            NodeConfig::builder()
                .name("Relay")
                .property(
                    "power",
                    PropertyConfig::builder(Datatype::Boolean)
                        .settable(true)
                        .build(),
                )
                .build()
                .unwrap(),
        )
        .build()
        .unwrap()
}
