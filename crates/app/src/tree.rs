//! Arena of every device in a tree, shared by all device handles.
//!
//! The [`Registry`] is guarded by a `std::sync::Mutex` that is only ever held
//! for short synchronous sections. Callers copy what they need out of it and
//! release the guard before awaiting the transport.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use homie_domain::config::DeviceConfig;
use homie_domain::description::{Description, DescriptionCache, Lineage};
use homie_domain::error::{HomieError, NotFoundError, StructureError};
use homie_domain::id::HomieId;
use homie_domain::state::DeviceState;
use homie_domain::topic::DeviceTopics;

use crate::command::CommandCallbacks;
use crate::ports::Message;

/// Everything the engine tracks about one device.
pub(crate) struct DeviceEntry {
    pub config: DeviceConfig,
    pub parent: Option<HomieId>,
    pub children: BTreeSet<HomieId>,
    pub state: DeviceState,
    /// Last published payload per `(node, property)`.
    pub values: HashMap<(HomieId, HomieId), String>,
    pub callbacks: Arc<CommandCallbacks>,
    pub descriptions: DescriptionCache,
    /// Serializes lifecycle operations and command handling on this device.
    pub sequencer: Arc<tokio::sync::Mutex<()>>,
}

impl DeviceEntry {
    fn new(config: DeviceConfig, parent: Option<HomieId>) -> Self {
        Self {
            config,
            parent,
            children: BTreeSet::new(),
            state: DeviceState::default(),
            values: HashMap::new(),
            callbacks: Arc::default(),
            descriptions: DescriptionCache::default(),
            sequencer: Arc::default(),
        }
    }
}

pub(crate) struct Registry {
    root_id: HomieId,
    devices: HashMap<HomieId, DeviceEntry>,
}

fn not_found(id: &HomieId) -> NotFoundError {
    NotFoundError {
        entity: "device",
        id: id.to_string(),
    }
}

impl Registry {
    pub fn new(root_id: HomieId, config: DeviceConfig) -> Self {
        let mut devices = HashMap::new();
        devices.insert(root_id.clone(), DeviceEntry::new(config, None));
        Self { root_id, devices }
    }

    pub fn root_id(&self) -> &HomieId {
        &self.root_id
    }

    pub fn contains(&self, id: &HomieId) -> bool {
        self.devices.contains_key(id)
    }

    pub fn get(&self, id: &HomieId) -> Result<&DeviceEntry, NotFoundError> {
        self.devices.get(id).ok_or_else(|| not_found(id))
    }

    pub fn get_mut(&mut self, id: &HomieId) -> Result<&mut DeviceEntry, NotFoundError> {
        self.devices.get_mut(id).ok_or_else(|| not_found(id))
    }

    /// Register a new device under `parent` without attaching it to the
    /// parent's children yet.
    pub fn insert(
        &mut self,
        id: HomieId,
        parent: &HomieId,
        config: DeviceConfig,
    ) -> Result<(), HomieError> {
        if self.devices.contains_key(&id) {
            return Err(StructureError::DuplicateDevice(id).into());
        }
        self.get(parent)?;
        self.devices
            .insert(id, DeviceEntry::new(config, Some(parent.clone())));
        Ok(())
    }

    pub fn attach(&mut self, parent: &HomieId, child: &HomieId) -> Result<(), NotFoundError> {
        self.get_mut(parent)?.children.insert(child.clone());
        Ok(())
    }

    pub fn remove(&mut self, id: &HomieId) -> Option<DeviceEntry> {
        self.devices.remove(id)
    }

    /// Detach `child` from `parent` and remove its whole subtree, deepest
    /// devices first.
    pub fn detach_subtree(
        &mut self,
        parent: &HomieId,
        child: &HomieId,
    ) -> Result<Vec<(HomieId, DeviceEntry)>, HomieError> {
        if !self.devices.contains_key(child) {
            return Err(not_found(child).into());
        }
        let parent_entry = self.get_mut(parent)?;
        if !parent_entry.children.remove(child) {
            return Err(StructureError::NotAChild {
                parent: parent.clone(),
                child: child.clone(),
            }
            .into());
        }
        Ok(self
            .post_order(child)
            .into_iter()
            .filter_map(|id| self.devices.remove(&id).map(|entry| (id, entry)))
            .collect())
    }

    /// `id` and all its attached descendants, children before parents.
    pub fn post_order(&self, id: &HomieId) -> Vec<HomieId> {
        let mut order = Vec::new();
        self.collect_post_order(id, &mut order);
        order
    }

    fn collect_post_order(&self, id: &HomieId, order: &mut Vec<HomieId>) {
        if let Some(entry) = self.devices.get(id) {
            for child in &entry.children {
                self.collect_post_order(child, order);
            }
            order.push(id.clone());
        }
    }

    pub fn lineage(&self, id: &HomieId) -> Result<Lineage, NotFoundError> {
        let entry = self.get(id)?;
        Ok(Lineage {
            root: (*id != self.root_id).then(|| self.root_id.clone()),
            parent: entry.parent.clone(),
            children: entry.children.clone(),
        })
    }

    /// The memoized description of `id` for its current configuration and
    /// children.
    pub fn description(&mut self, id: &HomieId) -> Result<Description, HomieError> {
        let lineage = self.lineage(id)?;
        let entry = self.get_mut(id)?;
        Ok(entry.descriptions.get_or_build(&entry.config, &lineage)?)
    }
}

/// State shared by every [`Device`](crate::device::Device) handle of a tree.
pub(crate) struct Shared<T> {
    pub transport: T,
    pub prefix: String,
    registry: Mutex<Registry>,
}

impl<T> Shared<T> {
    pub fn new(transport: T, prefix: String, registry: Registry) -> Self {
        Self {
            transport,
            prefix,
            registry: Mutex::new(registry),
        }
    }

    pub fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn topics<'a>(&'a self, device_id: &'a HomieId) -> DeviceTopics<'a> {
        DeviceTopics::new(&self.prefix, device_id)
    }

    /// Mark every started device as disconnected, children first, and return
    /// the `$state` messages announcing it.
    pub fn take_disconnect_messages(&self) -> Vec<Message> {
        let mut registry = self.registry();
        let order = registry.post_order(&registry.root_id().clone());
        order
            .into_iter()
            .filter_map(|id| {
                let entry = registry.get_mut(&id).ok()?;
                if !entry.state.is_started() {
                    return None;
                }
                entry.state = DeviceState::Disconnected;
                Some(Message::retained(
                    self.topics(&id).state(),
                    DeviceState::Disconnected.as_str(),
                ))
            })
            .collect()
    }
}

/// Log every malformed format declared by `config`.
pub(crate) fn warn_format_issues(device_id: &HomieId, config: &DeviceConfig) {
    for issue in config.format_issues() {
        tracing::warn!(
            device = %device_id,
            node = %issue.node_id,
            property = %issue.property_id,
            error = %issue.error,
            "invalid property format"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(value: &str) -> HomieId {
        HomieId::new(value).unwrap()
    }

    fn tree() -> Registry {
        let mut registry = Registry::new(id("root"), DeviceConfig::default());
        registry
            .insert(id("child"), &id("root"), DeviceConfig::default())
            .unwrap();
        registry.attach(&id("root"), &id("child")).unwrap();
        registry
            .insert(id("grandchild"), &id("child"), DeviceConfig::default())
            .unwrap();
        registry.attach(&id("child"), &id("grandchild")).unwrap();
        registry
    }

    #[test]
    fn should_reject_duplicate_device() {
        let mut registry = tree();
        let result = registry.insert(id("child"), &id("root"), DeviceConfig::default());
        assert!(matches!(
            result,
            Err(HomieError::Structure(StructureError::DuplicateDevice(_)))
        ));
    }

    #[test]
    fn should_reject_unknown_parent() {
        let mut registry = tree();
        let result = registry.insert(id("orphan"), &id("nobody"), DeviceConfig::default());
        assert!(matches!(result, Err(HomieError::NotFound(_))));
    }

    #[test]
    fn should_list_descendants_children_first() {
        let registry = tree();
        assert_eq!(
            registry.post_order(&id("root")),
            vec![id("grandchild"), id("child"), id("root")]
        );
    }

    #[test]
    fn should_compute_lineage() {
        let registry = tree();
        let root = registry.lineage(&id("root")).unwrap();
        assert_eq!(root.root, None);
        assert_eq!(root.parent, None);
        assert!(root.children.contains(&id("child")));

        let grandchild = registry.lineage(&id("grandchild")).unwrap();
        assert_eq!(grandchild.root, Some(id("root")));
        assert_eq!(grandchild.parent, Some(id("child")));
    }

    #[test]
    fn should_detach_subtree_deepest_first() {
        let mut registry = tree();
        let removed = registry.detach_subtree(&id("root"), &id("child")).unwrap();
        let ids: Vec<_> = removed.into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![id("grandchild"), id("child")]);
        assert!(!registry.contains(&id("grandchild")));
        assert!(registry.get(&id("root")).unwrap().children.is_empty());
    }

    #[test]
    fn should_refuse_to_detach_non_child() {
        let mut registry = tree();
        let result = registry.detach_subtree(&id("root"), &id("grandchild"));
        assert!(matches!(
            result,
            Err(HomieError::Structure(StructureError::NotAChild { .. }))
        ));
        assert!(registry.contains(&id("grandchild")));
    }

    #[test]
    fn should_refuse_to_detach_root() {
        let mut registry = tree();
        assert!(registry.detach_subtree(&id("root"), &id("root")).is_err());
        assert!(registry.contains(&id("root")));
    }

    #[test]
    fn should_announce_disconnect_for_started_devices_only() {
        let mut registry = tree();
        registry.get_mut(&id("root")).unwrap().state = DeviceState::Ready;
        registry.get_mut(&id("grandchild")).unwrap().state = DeviceState::Ready;
        let shared = Shared::new((), "homie/5".to_string(), registry);

        let messages = shared.take_disconnect_messages();
        let topics: Vec<_> = messages.iter().map(|m| m.topic.as_str()).collect();
        assert_eq!(
            topics,
            vec!["homie/5/grandchild/$state", "homie/5/root/$state"]
        );
        assert!(messages.iter().all(|m| m.payload == "disconnected"));
        assert!(shared.take_disconnect_messages().is_empty());
    }
}
