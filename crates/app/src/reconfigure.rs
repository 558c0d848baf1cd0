//! Live reconfiguration of a started device.

use homie_domain::config::DeviceConfig;
use homie_domain::error::HomieError;
use homie_domain::patch::{Patch, diff, stale_properties};
use homie_domain::state::DeviceState;

use crate::device::Device;
use crate::ports::{Message, Transport};
use crate::tree::warn_format_issues;

impl<T: Transport> Device<T> {
    /// Apply `update` to a copy of the configuration and publish the result.
    ///
    /// Nothing happens when `update` leaves the configuration unchanged. On a
    /// started device the sequence is `$state=init`, empty retained payloads
    /// on the value and `$target` topics of every removed property, the new
    /// `$description`, then `$state=ready`. Clearing publishes are best
    /// effort. A device that is not started only swaps its configuration.
    ///
    /// Returns the patches that were applied.
    ///
    /// # Errors
    ///
    /// Returns [`HomieError::NotFound`] if the device was removed, or the
    /// transport error raised while publishing the state or description.
    #[tracing::instrument(skip(self, update), fields(device = %self.id))]
    pub async fn reconfigure(
        &self,
        update: impl FnOnce(&mut DeviceConfig) + Send,
    ) -> Result<Vec<Patch>, HomieError> {
        let sequencer = self.sequencer()?;
        let _guard = sequencer.lock().await;

        let (old, started) = {
            let registry = self.shared.registry();
            let entry = registry.get(&self.id)?;
            (entry.config.clone(), entry.state.is_started())
        };
        let mut new = old.clone();
        update(&mut new);

        let patches = diff(&old, &new);
        if patches.is_empty() {
            tracing::debug!("configuration unchanged");
            return Ok(patches);
        }
        for patch in &patches {
            tracing::debug!(%patch, "configuration patch");
        }
        warn_format_issues(&self.id, &new);

        if !started {
            self.shared.registry().get_mut(&self.id)?.config = new;
            return Ok(patches);
        }

        self.set_state(DeviceState::Init).await?;

        let stale = stale_properties(&patches, &old);
        let topics = self.topics();
        let clearing: Vec<Message> = stale
            .iter()
            .flat_map(|(node_id, property_id)| {
                let (node_id, property_id) = (node_id.as_str(), property_id.as_str());
                [
                    Message::clear(topics.value(node_id, property_id)),
                    Message::clear(topics.target(node_id, property_id)),
                ]
            })
            .collect();

        {
            let mut registry = self.shared.registry();
            let entry = registry.get_mut(&self.id)?;
            entry.config = new;
            entry.values.retain(|key, _| !stale.contains(key));
        }

        for message in clearing {
            let topic = message.topic.clone();
            if let Err(err) = self.publish(message).await {
                tracing::warn!(%topic, %err, "failed to clear stale topic");
            }
        }

        self.publish_description().await?;
        self.set_state(DeviceState::Ready).await?;
        tracing::info!(patches = patches.len(), "device reconfigured");
        Ok(patches)
    }
}
