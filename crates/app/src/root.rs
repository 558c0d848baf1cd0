//! Root device — owner of the transport and of the command dispatcher.

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use homie_domain::config::DeviceConfig;
use homie_domain::error::HomieError;
use homie_domain::id::HomieId;
use homie_domain::state::DeviceState;
use homie_domain::topic::{CommandTopic, DEFAULT_PREFIX};

use crate::command::Command;
use crate::device::Device;
use crate::ports::{InboundMessage, Message, Transport};
use crate::tree::{Registry, Shared, warn_format_issues};

/// The top device of a tree.
///
/// It dereferences to its own [`Device`] handle, so every device operation is
/// available on it. On top of that it registers the last will and the
/// before-disconnect hook with the transport, routes inbound commands to the
/// devices of the tree, and disconnects gracefully.
pub struct RootDevice<T> {
    device: Device<T>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl<T> Deref for RootDevice<T> {
    type Target = Device<T>;

    fn deref(&self) -> &Self::Target {
        &self.device
    }
}

impl<T> std::fmt::Debug for RootDevice<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootDevice")
            .field("device", &self.device)
            .finish_non_exhaustive()
    }
}

impl<T> Drop for RootDevice<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.take_dispatcher() {
            handle.abort();
        }
    }
}

impl<T> RootDevice<T> {
    fn take_dispatcher(&self) -> Option<JoinHandle<()>> {
        self.dispatcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Topic prefix shared by every device of the tree.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.shared.prefix
    }

    /// Handle to any device of the tree, the root included.
    #[must_use]
    pub fn device(&self, id: &str) -> Option<Device<T>> {
        let id = HomieId::new(id).ok()?;
        self.shared
            .registry()
            .contains(&id)
            .then(|| self.device.handle(id))
    }

    /// The `$state=lost` message the broker should publish if the
    /// connection drops.
    #[must_use]
    pub fn last_will(&self) -> Message {
        Message::retained(self.topics().state(), DeviceState::Lost.as_str())
    }
}

impl<T: Transport + 'static> RootDevice<T> {
    /// Create a builder for a root device publishing through `transport`.
    pub fn builder(transport: T) -> RootDeviceBuilder<T> {
        RootDeviceBuilder {
            transport,
            id: None,
            config: DeviceConfig::default(),
            prefix: DEFAULT_PREFIX.to_string(),
        }
    }

    /// Start routing inbound commands and announce the whole tree.
    ///
    /// # Errors
    ///
    /// See [`Device::start`].
    pub async fn start(&self) -> Result<(), HomieError> {
        self.spawn_dispatcher();
        self.device.start().await
    }

    fn spawn_dispatcher(&self) {
        let mut slot = self
            .dispatcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let mut messages = self.shared.transport.messages();
        let mut dispatcher = Dispatcher::new(self.device.clone());
        *slot = Some(tokio::spawn(async move {
            loop {
                match messages.recv().await {
                    Ok(message) => dispatcher.dispatch(message),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "command dispatcher lagging, messages dropped");
                    }
                    Err(RecvError::Closed) => {
                        tracing::debug!("inbound message stream closed");
                        break;
                    }
                }
            }
        }));
    }

    /// Route one inbound message to the device it addresses.
    ///
    /// Returns the command handed to the device's callbacks, or `None` when
    /// the message was ignored.
    pub async fn handle_message(&self, message: &InboundMessage) -> Option<Command> {
        route(&self.device, message).await
    }

    /// Announce `$state=disconnected` for every started device, children
    /// first, then close the transport.
    ///
    /// # Errors
    ///
    /// Returns the first transport error.
    #[tracing::instrument(skip(self), fields(device = %self.id))]
    pub async fn disconnect(&self) -> Result<(), HomieError> {
        if let Some(handle) = self.take_dispatcher() {
            handle.abort();
        }
        for message in self.shared.take_disconnect_messages() {
            self.device.publish(message).await?;
        }
        self.shared.transport.disconnect().await?;
        tracing::info!("disconnected");
        Ok(())
    }
}

async fn route<T: Transport>(root: &Device<T>, message: &InboundMessage) -> Option<Command> {
    let topic = parse_command(root, message)?;
    let device = {
        let registry = root.shared.registry();
        registry
            .contains(&topic.device_id)
            .then(|| root.handle(topic.device_id.clone()))
    };
    let Some(device) = device else {
        tracing::debug!(device = %topic.device_id, "command for unknown device");
        return None;
    };
    device.handle_command(&topic, &message.payload).await
}

fn parse_command<T>(root: &Device<T>, message: &InboundMessage) -> Option<CommandTopic> {
    let topic = CommandTopic::parse(&root.shared.prefix, &message.topic);
    if topic.is_none() {
        tracing::debug!(topic = %message.topic, "not a command topic");
    }
    topic
}

type Job = (CommandTopic, String);

/// Fans inbound commands out to one worker per device.
///
/// Each worker handles the commands of its device in arrival order, so a
/// device busy with a transition only delays its own commands.
struct Dispatcher<T> {
    root: Device<T>,
    queues: HashMap<HomieId, mpsc::UnboundedSender<Job>>,
}

impl<T: Transport + 'static> Dispatcher<T> {
    fn new(root: Device<T>) -> Self {
        Self {
            root,
            queues: HashMap::new(),
        }
    }

    fn dispatch(&mut self, message: InboundMessage) {
        let Some(topic) = parse_command(&self.root, &message) else {
            return;
        };
        let device_id = topic.device_id.clone();
        if !self.root.shared.registry().contains(&device_id) {
            tracing::debug!(device = %device_id, "command for unknown device");
            self.queues.remove(&device_id);
            return;
        }

        let root = &self.root;
        let queue = self
            .queues
            .entry(device_id.clone())
            .or_insert_with(|| spawn_worker(root.handle(device_id.clone())));
        if let Err(mpsc::error::SendError(job)) = queue.send((topic, message.payload)) {
            // The worker died with a panicking callback.
            tracing::warn!(device = %device_id, "command worker stopped, restarting it");
            let queue = spawn_worker(root.handle(device_id.clone()));
            let _ = queue.send(job);
            self.queues.insert(device_id, queue);
        }
    }
}

fn spawn_worker<T: Transport + 'static>(device: Device<T>) -> mpsc::UnboundedSender<Job> {
    let (sender, mut jobs) = mpsc::unbounded_channel::<Job>();
    tokio::spawn(async move {
        while let Some((topic, payload)) = jobs.recv().await {
            device.handle_command(&topic, &payload).await;
        }
    });
    sender
}

/// Step-by-step builder for [`RootDevice`].
pub struct RootDeviceBuilder<T> {
    transport: T,
    id: Option<String>,
    config: DeviceConfig,
    prefix: String,
}

impl<T: Transport + 'static> RootDeviceBuilder<T> {
    #[must_use]
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    #[must_use]
    pub fn config(mut self, config: DeviceConfig) -> Self {
        self.config = config;
        self
    }

    /// Topic prefix, `homie/5` by default.
    #[must_use]
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Validate the id, register the last will and the before-disconnect
    /// hook with the transport, and return the [`RootDevice`].
    ///
    /// # Errors
    ///
    /// Returns [`HomieError::Validation`] if the id is missing or invalid.
    pub fn build(self) -> Result<RootDevice<T>, HomieError> {
        let id = HomieId::new(self.id.unwrap_or_default())?;
        warn_format_issues(&id, &self.config);

        let registry = Registry::new(id.clone(), self.config);
        let shared = Arc::new(Shared::new(self.transport, self.prefix, registry));
        let device = Device { id, shared };

        let root = RootDevice {
            device,
            dispatcher: Mutex::new(None),
        };
        root.shared.transport.set_last_will(root.last_will());

        let shared = Arc::downgrade(&root.shared);
        root.shared
            .transport
            .on_before_disconnect(Box::new(move || {
                shared
                    .upgrade()
                    .map(|shared| shared.take_disconnect_messages())
                    .unwrap_or_default()
            }));

        Ok(root)
    }
}
