//! Device handles and their lifecycle operations.
//!
//! A [`Device`] is a cheap, cloneable handle to one entry of a device tree.
//! All handles of a tree share the registry and the transport owned by the
//! [`RootDevice`](crate::root::RootDevice).

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use homie_domain::config::DeviceConfig;
use homie_domain::description::Description;
use homie_domain::error::{HomieError, NotFoundError};
use homie_domain::id::HomieId;
use homie_domain::state::DeviceState;
use homie_domain::topic::{DeviceTopics, LogLevel};
use homie_domain::value::validate_value;

use crate::ports::{Message, Qos, Transport};
use crate::tree::{Shared, warn_format_issues};

/// Handle to a device of a tree.
pub struct Device<T> {
    pub(crate) id: HomieId,
    pub(crate) shared: Arc<Shared<T>>,
}

impl<T> Clone for Device<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> fmt::Debug for Device<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.id)
            .field("prefix", &self.shared.prefix)
            .finish_non_exhaustive()
    }
}

/// Which topic of a property a payload is published on.
#[derive(Debug, Clone, Copy)]
enum PropertyTopic {
    Value,
    Target,
}

impl<T> Device<T> {
    pub(crate) fn handle(&self, id: HomieId) -> Self {
        Self {
            id,
            shared: Arc::clone(&self.shared),
        }
    }

    #[must_use]
    pub fn id(&self) -> &HomieId {
        &self.id
    }

    /// Current lifecycle state. A removed device reports `disconnected`.
    #[must_use]
    pub fn state(&self) -> DeviceState {
        self.shared
            .registry()
            .get(&self.id)
            .map(|entry| entry.state)
            .unwrap_or_default()
    }

    /// Snapshot of the current configuration.
    #[must_use]
    pub fn config(&self) -> Option<DeviceConfig> {
        self.shared
            .registry()
            .get(&self.id)
            .ok()
            .map(|entry| entry.config.clone())
    }

    #[must_use]
    pub fn parent(&self) -> Option<HomieId> {
        self.shared
            .registry()
            .get(&self.id)
            .ok()
            .and_then(|entry| entry.parent.clone())
    }

    /// Id of the tree's root device.
    #[must_use]
    pub fn root(&self) -> HomieId {
        self.shared.registry().root_id().clone()
    }

    /// Ids of the attached children, sorted.
    #[must_use]
    pub fn children(&self) -> Vec<HomieId> {
        self.shared
            .registry()
            .get(&self.id)
            .map(|entry| entry.children.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Last value published for a property.
    #[must_use]
    pub fn value(&self, node_id: &str, property_id: &str) -> Option<String> {
        let key = (HomieId::new(node_id).ok()?, HomieId::new(property_id).ok()?);
        self.shared
            .registry()
            .get(&self.id)
            .ok()?
            .values
            .get(&key)
            .cloned()
    }

    /// The versioned description for the current configuration and children.
    ///
    /// # Errors
    ///
    /// Returns [`HomieError::NotFound`] if the device was removed, or
    /// [`HomieError::Serialization`] if the description cannot be encoded.
    pub fn description(&self) -> Result<Description, HomieError> {
        self.shared.registry().description(&self.id)
    }

    pub(crate) fn sequencer(&self) -> Result<Arc<tokio::sync::Mutex<()>>, NotFoundError> {
        let registry = self.shared.registry();
        Ok(Arc::clone(&registry.get(&self.id)?.sequencer))
    }

    pub(crate) fn topics(&self) -> DeviceTopics<'_> {
        self.shared.topics(&self.id)
    }
}

impl<T: Transport> Device<T> {
    pub(crate) async fn publish(&self, message: Message) -> Result<(), HomieError> {
        tracing::trace!(topic = %message.topic, retained = message.retained, "publish");
        self.shared.transport.publish(message).await
    }

    pub(crate) async fn publish_description(&self) -> Result<(), HomieError> {
        let payload = self.description()?.to_json()?;
        self.publish(Message::retained(self.topics().description(), payload))
            .await
    }

    /// Move to `state` and publish it. Setting the current state is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`HomieError::NotFound`] if the device was removed, or the
    /// transport error if the publish fails.
    #[tracing::instrument(skip(self), fields(device = %self.id))]
    pub async fn set_state(&self, state: DeviceState) -> Result<(), HomieError> {
        let changed = {
            let mut registry = self.shared.registry();
            let entry = registry.get_mut(&self.id)?;
            let changed = entry.state != state;
            entry.state = state;
            changed
        };
        if !changed {
            return Ok(());
        }
        self.publish(Message::retained(self.topics().state(), state.as_str()))
            .await
    }

    /// Announce the device and all its children.
    ///
    /// Publishes `$state=init`, starts every child, subscribes to the
    /// device's command topics, publishes `$description` and finally
    /// `$state=ready`.
    ///
    /// # Errors
    ///
    /// Returns the first transport error. Children that already started
    /// stay started.
    #[tracing::instrument(skip(self), fields(device = %self.id))]
    pub async fn start(&self) -> Result<(), HomieError> {
        let sequencer = self.sequencer()?;
        let _guard = sequencer.lock().await;
        self.start_locked().await
    }

    fn start_locked(&self) -> Pin<Box<dyn Future<Output = Result<(), HomieError>> + Send + '_>> {
        Box::pin(async move {
            self.set_state(DeviceState::Init).await?;

            for child_id in self.children() {
                self.handle(child_id).start().await?;
            }

            self.shared
                .transport
                .subscribe(&self.topics().commands())
                .await?;
            self.publish_description().await?;
            self.set_state(DeviceState::Ready).await?;
            tracing::info!(device = %self.id, "device ready");
            Ok(())
        })
    }

    /// Create a child device under this one.
    ///
    /// When this device is started, the child is started right away and this
    /// device's `$description` is republished with the new child. Otherwise
    /// the child is only attached and starts together with its parent.
    ///
    /// # Errors
    ///
    /// Returns [`HomieError::Validation`] for an invalid id,
    /// [`HomieError::Structure`] if the id is already used in the tree, or
    /// the transport error raised while starting the child.
    #[tracing::instrument(skip(self, config), fields(parent = %self.id))]
    pub async fn create_device(
        &self,
        id: &str,
        config: DeviceConfig,
    ) -> Result<Device<T>, HomieError> {
        let sequencer = self.sequencer()?;
        let _guard = sequencer.lock().await;

        let child_id = HomieId::new(id)?;
        warn_format_issues(&child_id, &config);
        let parent_started = {
            let mut registry = self.shared.registry();
            registry.insert(child_id.clone(), &self.id, config)?;
            registry.get(&self.id)?.state.is_started()
        };
        let child = self.handle(child_id.clone());

        if parent_started {
            if let Err(err) = child.start().await {
                self.shared.registry().remove(&child_id);
                child.withdraw().await;
                return Err(err);
            }
        }
        self.shared.registry().attach(&self.id, &child_id)?;
        if parent_started {
            self.publish_description().await?;
        }
        tracing::info!(device = %child_id, started = parent_started, "child device created");
        Ok(child)
    }

    /// Best-effort cleanup of a device whose start failed part way: drop its
    /// command subscription and its retained `$state`.
    async fn withdraw(&self) {
        let topics = self.topics();
        let commands = topics.commands();
        if let Err(err) = self.shared.transport.unsubscribe(&commands).await {
            tracing::warn!(device = %self.id, %err, "failed to unsubscribe abandoned device");
        }
        if let Err(err) = self.publish(Message::clear(topics.state())).await {
            tracing::warn!(device = %self.id, %err, "failed to clear state of abandoned device");
        }
    }

    /// Remove a direct child and its whole subtree.
    ///
    /// Every removed device that was announced is unsubscribed from its
    /// command topics and has its retained topics cleared, deepest devices
    /// first. This device's `$description` is then republished.
    ///
    /// # Errors
    ///
    /// Returns [`HomieError::NotFound`] for an unknown id,
    /// [`HomieError::Structure`] if it is not a direct child, or the first
    /// transport error.
    #[tracing::instrument(skip(self), fields(parent = %self.id))]
    pub async fn remove_device(&self, id: &str) -> Result<(), HomieError> {
        let sequencer = self.sequencer()?;
        let _guard = sequencer.lock().await;

        let child_id = HomieId::new(id)?;
        let (removed, parent_started) = {
            let mut registry = self.shared.registry();
            let removed = registry.detach_subtree(&self.id, &child_id)?;
            (removed, registry.get(&self.id)?.state.is_started())
        };

        for (device_id, entry) in removed {
            if entry.state == DeviceState::Disconnected {
                continue;
            }
            let topics = self.shared.topics(&device_id);
            self.shared.transport.unsubscribe(&topics.commands()).await?;
            for (node_id, node) in &entry.config.nodes {
                for property_id in node.properties.keys() {
                    let (node_id, property_id) = (node_id.as_str(), property_id.as_str());
                    self.publish(Message::clear(topics.value(node_id, property_id)))
                        .await?;
                    self.publish(Message::clear(topics.target(node_id, property_id)))
                        .await?;
                }
            }
            self.publish(Message::clear(topics.description())).await?;
            self.publish(Message::clear(topics.state())).await?;
            tracing::info!(device = %device_id, "device removed");
        }

        if parent_started {
            self.publish_description().await?;
        }
        Ok(())
    }

    /// Publish a new value for a property.
    ///
    /// Unknown properties and payloads refused by the validator are logged
    /// and dropped. An unchanged value of a retained property is not
    /// published again. Waits for any transition of the device in progress,
    /// so the value is checked against the configuration it leads to.
    ///
    /// # Errors
    ///
    /// Returns [`HomieError::NotFound`] if the device was removed, or the
    /// transport error if the publish fails.
    pub async fn set_value(
        &self,
        node_id: &str,
        property_id: &str,
        raw: &str,
    ) -> Result<(), HomieError> {
        self.publish_property(PropertyTopic::Value, node_id, property_id, raw)
            .await
    }

    /// Publish the value a property is transitioning to on its `$target`
    /// topic. Validation follows [`set_value`](Self::set_value).
    ///
    /// # Errors
    ///
    /// Same as [`set_value`](Self::set_value).
    pub async fn set_target(
        &self,
        node_id: &str,
        property_id: &str,
        raw: &str,
    ) -> Result<(), HomieError> {
        self.publish_property(PropertyTopic::Target, node_id, property_id, raw)
            .await
    }

    async fn publish_property(
        &self,
        kind: PropertyTopic,
        node_id: &str,
        property_id: &str,
        raw: &str,
    ) -> Result<(), HomieError> {
        let sequencer = self.sequencer()?;
        let _guard = sequencer.lock().await;

        let message = {
            let mut registry = self.shared.registry();
            let entry = registry.get_mut(&self.id)?;
            let Some(property) = entry.config.property(node_id, property_id) else {
                tracing::warn!(device = %self.id, node_id, property_id, raw, "unknown property");
                return Ok(());
            };
            let value = match validate_value(property.datatype, property.format.as_deref(), raw) {
                Ok(value) => value,
                Err(err) => {
                    tracing::warn!(device = %self.id, node_id, property_id, raw, %err, "invalid value");
                    return Ok(());
                }
            };
            let retained = property.retained;
            let payload = value.to_payload();
            let topics = self.topics();

            let topic = match kind {
                PropertyTopic::Value => {
                    let key = (HomieId::new(node_id)?, HomieId::new(property_id)?);
                    if retained && entry.values.get(&key) == Some(&payload) {
                        tracing::debug!(device = %self.id, node_id, property_id, "value unchanged");
                        return Ok(());
                    }
                    entry.values.insert(key, payload.clone());
                    topics.value(node_id, property_id)
                }
                PropertyTopic::Target => topics.target(node_id, property_id),
            };
            Message {
                topic,
                payload,
                qos: Qos::ExactlyOnce,
                retained,
            }
        };
        self.publish(message).await
    }

    /// Publish a message on `$log/<level>`.
    ///
    /// # Errors
    ///
    /// Returns the transport error if the publish fails.
    pub async fn log(&self, level: LogLevel, message: impl Into<String>) -> Result<(), HomieError> {
        self.publish(Message {
            topic: self.topics().log(level),
            payload: message.into(),
            qos: Qos::AtMostOnce,
            retained: false,
        })
        .await
    }
}
