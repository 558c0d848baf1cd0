//! Inbound `/set` commands and their callbacks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use homie_domain::config::DeviceConfig;
use homie_domain::id::HomieId;
use homie_domain::topic::CommandTopic;
use homie_domain::value::{Value, validate_value};

use crate::device::Device;
use crate::ports::Transport;

/// A validated request to change a settable property.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub device_id: HomieId,
    pub node_id: HomieId,
    pub property_id: HomieId,
    /// The payload coerced to the property's datatype.
    pub value: Value,
    /// The payload as received.
    pub raw: String,
}

pub type CommandCallback = Arc<dyn Fn(&Command) + Send + Sync>;

/// Callbacks registered on one device.
#[derive(Default)]
pub(crate) struct CommandCallbacks {
    next_id: AtomicU64,
    callbacks: Mutex<Vec<(u64, CommandCallback)>>,
}

impl CommandCallbacks {
    fn entries(&self) -> std::sync::MutexGuard<'_, Vec<(u64, CommandCallback)>> {
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register(self: &Arc<Self>, callback: CommandCallback) -> CommandSubscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries().push((id, callback));
        CommandSubscription {
            callbacks: Arc::downgrade(self),
            id,
        }
    }

    pub fn snapshot(&self) -> Vec<CommandCallback> {
        self.entries()
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect()
    }

    fn remove(&self, id: u64) {
        self.entries().retain(|(entry_id, _)| *entry_id != id);
    }
}

/// Handle returned by [`Device::on_command`].
///
/// The callback stays registered until [`unsubscribe`](Self::unsubscribe) is
/// called, even if the handle is dropped.
#[must_use]
#[derive(Debug)]
pub struct CommandSubscription {
    callbacks: Weak<CommandCallbacks>,
    id: u64,
}

impl CommandSubscription {
    /// Remove the callback this subscription was created for.
    pub fn unsubscribe(self) {
        if let Some(callbacks) = self.callbacks.upgrade() {
            callbacks.remove(self.id);
        }
    }
}

impl std::fmt::Debug for CommandCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandCallbacks")
            .field("count", &self.entries().len())
            .finish_non_exhaustive()
    }
}

/// Turn a command topic and payload into a [`Command`] against `config`.
fn resolve(config: &DeviceConfig, topic: &CommandTopic, payload: &str) -> Option<Command> {
    let Some(property) = config.property(topic.node_id.as_str(), topic.property_id.as_str())
    else {
        tracing::debug!(
            device = %topic.device_id,
            node = %topic.node_id,
            property = %topic.property_id,
            "command for unknown property ignored"
        );
        return None;
    };
    if !property.settable {
        tracing::debug!(
            device = %topic.device_id,
            node = %topic.node_id,
            property = %topic.property_id,
            "command for read-only property ignored"
        );
        return None;
    }
    match validate_value(property.datatype, property.format.as_deref(), payload) {
        Ok(value) => Some(Command {
            device_id: topic.device_id.clone(),
            node_id: topic.node_id.clone(),
            property_id: topic.property_id.clone(),
            value,
            raw: payload.to_string(),
        }),
        Err(err) => {
            tracing::debug!(
                device = %topic.device_id,
                node = %topic.node_id,
                property = %topic.property_id,
                %err,
                "invalid command payload ignored"
            );
            None
        }
    }
}

impl<T: Transport> Device<T> {
    /// Register a callback invoked for every valid command on this device.
    ///
    /// # Errors
    ///
    /// Returns [`HomieError::NotFound`](homie_domain::error::HomieError::NotFound)
    /// if the device was removed from its tree.
    pub fn on_command(
        &self,
        callback: impl Fn(&Command) + Send + Sync + 'static,
    ) -> Result<CommandSubscription, homie_domain::error::HomieError> {
        let callbacks = Arc::clone(&self.shared.registry().get(&self.id)?.callbacks);
        Ok(callbacks.register(Arc::new(callback)))
    }

    /// Validate a command addressed to this device and run its callbacks.
    pub(crate) async fn handle_command(&self, topic: &CommandTopic, payload: &str) -> Option<Command> {
        let sequencer = self.sequencer().ok()?;
        let _guard = sequencer.lock().await;

        let (command, callbacks) = {
            let registry = self.shared.registry();
            let entry = registry.get(&self.id).ok()?;
            let command = resolve(&entry.config, topic, payload)?;
            (command, Arc::clone(&entry.callbacks))
        };

        let callbacks = callbacks.snapshot();
        tracing::debug!(
            device = %self.id,
            node = %command.node_id,
            property = %command.property_id,
            callbacks = callbacks.len(),
            "dispatching command"
        );
        for callback in callbacks {
            callback(&command);
        }
        Some(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use homie_domain::config::{NodeConfig, PropertyConfig};
    use homie_domain::datatype::Datatype;
    use homie_domain::topic::DEFAULT_PREFIX;

    fn config() -> DeviceConfig {
        DeviceConfig::builder()
            .node(
                "relay",
                NodeConfig::builder()
                    .property(
                        "power",
                        PropertyConfig::builder(Datatype::Boolean)
                            .settable(true)
                            .build(),
                    )
                    .property(
                        "energy",
                        PropertyConfig::builder(Datatype::Float).build(),
                    )
                    .build()
                    .unwrap(),
            )
            .build()
            .unwrap()
    }

    fn topic(raw: &str) -> CommandTopic {
        CommandTopic::parse(DEFAULT_PREFIX, raw).unwrap()
    }

    #[test]
    fn should_resolve_valid_command() {
        let command = resolve(&config(), &topic("homie/5/lamp/relay/power/set"), "true").unwrap();
        assert_eq!(command.value, Value::Boolean(true));
        assert_eq!(command.raw, "true");
        assert_eq!(command.node_id.as_str(), "relay");
    }

    #[test]
    fn should_ignore_invalid_payload() {
        assert!(resolve(&config(), &topic("homie/5/lamp/relay/power/set"), "on").is_none());
    }

    #[test]
    fn should_ignore_unknown_property() {
        assert!(resolve(&config(), &topic("homie/5/lamp/relay/level/set"), "1").is_none());
    }

    #[test]
    fn should_ignore_read_only_property() {
        assert!(resolve(&config(), &topic("homie/5/lamp/relay/energy/set"), "1.5").is_none());
    }

    #[test]
    fn should_stop_calling_unsubscribed_callback() {
        let callbacks = Arc::new(CommandCallbacks::default());
        let first = callbacks.register(Arc::new(|_: &Command| {}));
        let _second = callbacks.register(Arc::new(|_: &Command| {}));
        assert_eq!(callbacks.snapshot().len(), 2);

        first.unsubscribe();
        assert_eq!(callbacks.snapshot().len(), 1);
    }

    #[test]
    fn should_tolerate_unsubscribe_after_device_is_gone() {
        let callbacks = Arc::new(CommandCallbacks::default());
        let subscription = callbacks.register(Arc::new(|_: &Command| {}));
        drop(callbacks);
        subscription.unsubscribe();
    }
}
