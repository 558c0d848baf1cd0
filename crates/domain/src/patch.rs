//! Structural differences between two device configurations.
//!
//! [`diff`] walks both configurations and emits one [`Patch`] per changed
//! attribute, or per added/removed node or property. Paths follow the shape
//! of the description: `name`, `nodes/<node>`, `nodes/<node>/name`,
//! `nodes/<node>/properties/<property>`, and
//! `nodes/<node>/properties/<property>/<attribute>`.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::config::{DeviceConfig, NodeConfig, PropertyConfig};
use crate::id::HomieId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOp {
    Add,
    Remove,
    Replace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceAttribute {
    Name,
    Type,
    Extensions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeAttribute {
    Name,
    Type,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyAttribute {
    Name,
    Datatype,
    Format,
    Settable,
    Retained,
    Unit,
}

/// Location of a change inside a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchPath {
    Device(DeviceAttribute),
    Node(HomieId),
    NodeAttribute(HomieId, NodeAttribute),
    Property(HomieId, HomieId),
    PropertyAttribute(HomieId, HomieId, PropertyAttribute),
}

/// A single structural difference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patch {
    pub op: PatchOp,
    pub path: PatchPath,
}

impl Patch {
    fn new(op: PatchOp, path: PatchPath) -> Self {
        Self { op, path }
    }

    /// The node this patch touches, if it lives under `nodes`.
    #[must_use]
    pub fn node_id(&self) -> Option<&HomieId> {
        match &self.path {
            PatchPath::Device(_) => None,
            PatchPath::Node(node)
            | PatchPath::NodeAttribute(node, _)
            | PatchPath::Property(node, _)
            | PatchPath::PropertyAttribute(node, _, _) => Some(node),
        }
    }

    /// The property this patch touches, if its path names one.
    #[must_use]
    pub fn property_id(&self) -> Option<&HomieId> {
        match &self.path {
            PatchPath::Property(_, property) | PatchPath::PropertyAttribute(_, property, _) => {
                Some(property)
            }
            _ => None,
        }
    }
}

impl fmt::Display for PatchOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Add => "add",
            Self::Remove => "remove",
            Self::Replace => "replace",
        })
    }
}

impl fmt::Display for PatchPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Device(attribute) => f.write_str(match attribute {
                DeviceAttribute::Name => "name",
                DeviceAttribute::Type => "type",
                DeviceAttribute::Extensions => "extensions",
            }),
            Self::Node(node) => write!(f, "nodes/{node}"),
            Self::NodeAttribute(node, attribute) => {
                let attribute = match attribute {
                    NodeAttribute::Name => "name",
                    NodeAttribute::Type => "type",
                };
                write!(f, "nodes/{node}/{attribute}")
            }
            Self::Property(node, property) => write!(f, "nodes/{node}/properties/{property}"),
            Self::PropertyAttribute(node, property, attribute) => {
                let attribute = match attribute {
                    PropertyAttribute::Name => "name",
                    PropertyAttribute::Datatype => "datatype",
                    PropertyAttribute::Format => "format",
                    PropertyAttribute::Settable => "settable",
                    PropertyAttribute::Retained => "retained",
                    PropertyAttribute::Unit => "unit",
                };
                write!(f, "nodes/{node}/properties/{property}/{attribute}")
            }
        }
    }
}

impl fmt::Display for Patch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.op, self.path)
    }
}

/// Compute the patches that turn `old` into `new`.
#[must_use]
pub fn diff(old: &DeviceConfig, new: &DeviceConfig) -> Vec<Patch> {
    let mut patches = Vec::new();

    let mut device = |op: Option<PatchOp>, attribute| {
        if let Some(op) = op {
            patches.push(Patch::new(op, PatchPath::Device(attribute)));
        }
    };
    device(option_op(&old.name, &new.name), DeviceAttribute::Name);
    device(
        option_op(&old.device_type, &new.device_type),
        DeviceAttribute::Type,
    );
    device(
        list_op(&old.extensions, &new.extensions),
        DeviceAttribute::Extensions,
    );

    diff_maps(
        &old.nodes,
        &new.nodes,
        &mut patches,
        |node| PatchPath::Node(node.clone()),
        diff_node,
    );

    patches
}

fn diff_node(node_id: &HomieId, old: &NodeConfig, new: &NodeConfig, patches: &mut Vec<Patch>) {
    let attributes = [
        (option_op(&old.name, &new.name), NodeAttribute::Name),
        (option_op(&old.node_type, &new.node_type), NodeAttribute::Type),
    ];
    for (op, attribute) in attributes {
        if let Some(op) = op {
            patches.push(Patch::new(
                op,
                PatchPath::NodeAttribute(node_id.clone(), attribute),
            ));
        }
    }

    diff_maps(
        &old.properties,
        &new.properties,
        patches,
        |property| PatchPath::Property(node_id.clone(), property.clone()),
        |property_id, old, new, patches| diff_property(node_id, property_id, old, new, patches),
    );
}

fn diff_property(
    node_id: &HomieId,
    property_id: &HomieId,
    old: &PropertyConfig,
    new: &PropertyConfig,
    patches: &mut Vec<Patch>,
) {
    let attributes = [
        (option_op(&old.name, &new.name), PropertyAttribute::Name),
        (value_op(&old.datatype, &new.datatype), PropertyAttribute::Datatype),
        (option_op(&old.format, &new.format), PropertyAttribute::Format),
        (value_op(&old.settable, &new.settable), PropertyAttribute::Settable),
        (value_op(&old.retained, &new.retained), PropertyAttribute::Retained),
        (option_op(&old.unit, &new.unit), PropertyAttribute::Unit),
    ];
    for (op, attribute) in attributes {
        if let Some(op) = op {
            patches.push(Patch::new(
                op,
                PatchPath::PropertyAttribute(node_id.clone(), property_id.clone(), attribute),
            ));
        }
    }
}

/// Emit remove/add patches for keys present on one side only, and recurse
/// into keys present on both.
fn diff_maps<T>(
    old: &BTreeMap<HomieId, T>,
    new: &BTreeMap<HomieId, T>,
    patches: &mut Vec<Patch>,
    path: impl Fn(&HomieId) -> PatchPath,
    mut nested: impl FnMut(&HomieId, &T, &T, &mut Vec<Patch>),
) {
    for (id, old_item) in old {
        match new.get(id) {
            None => patches.push(Patch::new(PatchOp::Remove, path(id))),
            Some(new_item) => nested(id, old_item, new_item, patches),
        }
    }
    for id in new.keys().filter(|id| !old.contains_key(*id)) {
        patches.push(Patch::new(PatchOp::Add, path(id)));
    }
}

fn option_op<T: PartialEq>(old: &Option<T>, new: &Option<T>) -> Option<PatchOp> {
    match (old, new) {
        (None, Some(_)) => Some(PatchOp::Add),
        (Some(_), None) => Some(PatchOp::Remove),
        (Some(a), Some(b)) if a != b => Some(PatchOp::Replace),
        _ => None,
    }
}

fn value_op<T: PartialEq>(old: &T, new: &T) -> Option<PatchOp> {
    (old != new).then_some(PatchOp::Replace)
}

fn list_op<T: PartialEq>(old: &[T], new: &[T]) -> Option<PatchOp> {
    match (old.is_empty(), new.is_empty()) {
        (true, false) => Some(PatchOp::Add),
        (false, true) => Some(PatchOp::Remove),
        _ if old != new => Some(PatchOp::Replace),
        _ => None,
    }
}

/// Properties whose value and `$target` topics become stale after `patches`.
///
/// Only `remove` patches under `nodes` count. A patch that names a property
/// contributes that property; a patch that only names a node contributes
/// every property `old` declared for that node.
#[must_use]
pub fn stale_properties(patches: &[Patch], old: &DeviceConfig) -> BTreeSet<(HomieId, HomieId)> {
    let mut stale = BTreeSet::new();
    for patch in patches.iter().filter(|p| p.op == PatchOp::Remove) {
        let Some(node_id) = patch.node_id() else {
            continue;
        };
        match patch.property_id() {
            Some(property_id) => {
                stale.insert((node_id.clone(), property_id.clone()));
            }
            None => {
                let declared = old
                    .nodes
                    .get(node_id)
                    .into_iter()
                    .flat_map(|node| node.properties.keys());
                for property_id in declared {
                    stale.insert((node_id.clone(), property_id.clone()));
                }
            }
        }
    }
    stale
}
