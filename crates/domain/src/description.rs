//! Device description — the `$description` document and its content version.
//!
//! The `version` field is a 32-bit FNV-1a hash of the canonical JSON form of
//! the description (with `version` itself set to zero). Field order is fixed by
//! the struct, maps are ordered by id and children are sorted, so the same
//! configuration and the same set of children always produce the same version.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::config::{DeviceConfig, NodeConfig};
use crate::id::HomieId;

/// Convention version published in the `homie` field.
pub const HOMIE_VERSION: &str = "5.0";

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// The published `$description` of a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Description {
    pub homie: String,
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub device_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<HomieId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<HomieId>,
    #[serde(default)]
    pub children: Vec<HomieId>,
    #[serde(default)]
    pub nodes: BTreeMap<HomieId, NodeConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extensions: Vec<String>,
}

/// Position of a device in its tree, as needed by its description.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Lineage {
    /// Id of the tree root, `None` for the root itself.
    pub root: Option<HomieId>,
    pub parent: Option<HomieId>,
    pub children: BTreeSet<HomieId>,
}

impl Description {
    /// Build the versioned description of a device.
    ///
    /// # Errors
    ///
    /// Returns a [`serde_json::Error`] if the canonical form cannot be
    /// serialized.
    pub fn build(config: &DeviceConfig, lineage: &Lineage) -> Result<Self, serde_json::Error> {
        let mut description = Self {
            homie: HOMIE_VERSION.to_string(),
            version: 0,
            name: config.name.clone(),
            device_type: config.device_type.clone(),
            root: lineage.root.clone(),
            parent: lineage.parent.clone(),
            children: lineage.children.iter().cloned().collect(),
            nodes: config.nodes.clone(),
            extensions: config.extensions.clone(),
        };
        description.version = description.content_version()?;
        Ok(description)
    }

    /// Hash of the canonical form with `version` zeroed.
    ///
    /// # Errors
    ///
    /// Returns a [`serde_json::Error`] if serialization fails.
    pub fn content_version(&self) -> Result<u32, serde_json::Error> {
        let canonical = Self {
            version: 0,
            ..self.clone()
        };
        let bytes = serde_json::to_vec(&canonical)?;
        Ok(fnv1a_32(&bytes))
    }

    /// Serialize to the JSON payload published on `$description`.
    ///
    /// # Errors
    ///
    /// Returns a [`serde_json::Error`] if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// 32-bit FNV-1a over `bytes`.
#[must_use]
pub fn fnv1a_32(bytes: &[u8]) -> u32 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u32::from(*byte)).wrapping_mul(FNV_PRIME)
    })
}

/// Memoizes the last description built for a device.
///
/// The cache key is the structural fingerprint of the inputs (configuration
/// and lineage compared by value), so equal snapshots reuse the cached
/// description without rehashing.
#[derive(Debug, Default)]
pub struct DescriptionCache {
    last: Option<(DeviceConfig, Lineage, Description)>,
}

impl DescriptionCache {
    /// Return the cached description for these inputs, building it on a miss.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`Description::build`].
    pub fn get_or_build(
        &mut self,
        config: &DeviceConfig,
        lineage: &Lineage,
    ) -> Result<Description, serde_json::Error> {
        if let Some((cached_config, cached_lineage, description)) = &self.last {
            if cached_config == config && cached_lineage == lineage {
                return Ok(description.clone());
            }
        }
        let description = Description::build(config, lineage)?;
        self.last = Some((config.clone(), lineage.clone(), description.clone()));
        Ok(description)
    }

    #[cfg(test)]
    fn is_fresh(&self, config: &DeviceConfig, lineage: &Lineage) -> bool {
        self.last
            .as_ref()
            .is_some_and(|(c, l, _)| c == config && l == lineage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PropertyConfig;
    use crate::datatype::Datatype;

    fn id(value: &str) -> HomieId {
        HomieId::new(value).unwrap()
    }

    fn config() -> DeviceConfig {
        DeviceConfig::builder()
            .name("Test Device")
            .node(
                "test-node",
                NodeConfig::builder()
                    .name("Test Node")
                    .property(
                        "property-1",
                        PropertyConfig::builder(Datatype::Integer)
                            .format("0:100")
                            .settable(true)
                            .build(),
                    )
                    .build()
                    .unwrap(),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn should_match_reference_fnv1a_vectors() {
        assert_eq!(fnv1a_32(b""), 0x811c_9dc5);
        assert_eq!(fnv1a_32(b"a"), 0xe40c_292c);
        assert_eq!(fnv1a_32(b"foobar"), 0xbf9c_f968);
    }

    #[test]
    fn should_produce_stable_version_across_builds() {
        let lineage = Lineage::default();
        let a = Description::build(&config(), &lineage).unwrap();
        let b = Description::build(&config(), &lineage).unwrap();
        assert_eq!(a.version, b.version);
        assert_ne!(a.version, 0);
    }

    #[test]
    fn should_ignore_key_order_of_input_configuration() {
        let a: DeviceConfig = serde_json::from_str(
            r#"{"name":"X","nodes":{"b":{"properties":{}},"a":{"name":"A","properties":{"p":{"datatype":"string","settable":true}}}}}"#,
        )
        .unwrap();
        let b: DeviceConfig = serde_json::from_str(
            r#"{"nodes":{"a":{"properties":{"p":{"settable":true,"datatype":"string"}},"name":"A"},"b":{"properties":{}}},"name":"X"}"#,
        )
        .unwrap();

        let lineage = Lineage::default();
        let va = Description::build(&a, &lineage).unwrap().version;
        let vb = Description::build(&b, &lineage).unwrap().version;
        assert_eq!(va, vb);
    }

    #[test]
    fn should_change_version_when_configuration_changes() {
        let lineage = Lineage::default();
        let before = Description::build(&config(), &lineage).unwrap();
        let mut renamed = config();
        renamed.name = Some("New Name".to_string());
        let after = Description::build(&renamed, &lineage).unwrap();
        assert_ne!(before.version, after.version);
    }

    #[test]
    fn should_sort_children_and_change_version_with_them() {
        let mut lineage = Lineage::default();
        let alone = Description::build(&config(), &lineage).unwrap();

        lineage.children.insert(id("zeta"));
        lineage.children.insert(id("alpha"));
        let with_children = Description::build(&config(), &lineage).unwrap();

        assert_eq!(with_children.children, vec![id("alpha"), id("zeta")]);
        assert_ne!(alone.version, with_children.version);
    }

    #[test]
    fn should_omit_root_and_parent_for_root_device() {
        let description = Description::build(&config(), &Lineage::default()).unwrap();
        let json: serde_json::Value = serde_json::from_str(&description.to_json().unwrap()).unwrap();
        assert_eq!(json["homie"], "5.0");
        assert!(json.get("root").is_none());
        assert!(json.get("parent").is_none());
        assert_eq!(json["children"], serde_json::json!([]));
        assert_eq!(json["version"], description.version);
    }

    #[test]
    fn should_include_root_and_parent_for_child_device() {
        let lineage = Lineage {
            root: Some(id("hub")),
            parent: Some(id("hub")),
            children: BTreeSet::new(),
        };
        let description = Description::build(&config(), &lineage).unwrap();
        assert_eq!(description.root, Some(id("hub")));
        assert_eq!(description.parent, Some(id("hub")));
    }

    #[test]
    fn should_verify_own_version() {
        let description = Description::build(&config(), &Lineage::default()).unwrap();
        assert_eq!(description.content_version().unwrap(), description.version);
    }

    #[test]
    fn should_reuse_cached_description_for_equal_inputs() {
        let mut cache = DescriptionCache::default();
        let lineage = Lineage::default();
        assert!(!cache.is_fresh(&config(), &lineage));

        let first = cache.get_or_build(&config(), &lineage).unwrap();
        assert!(cache.is_fresh(&config(), &lineage));
        let second = cache.get_or_build(&config(), &lineage).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn should_rebuild_when_inputs_change() {
        let mut cache = DescriptionCache::default();
        let mut lineage = Lineage::default();
        let first = cache.get_or_build(&config(), &lineage).unwrap();

        lineage.children.insert(id("child"));
        assert!(!cache.is_fresh(&config(), &lineage));
        let second = cache.get_or_build(&config(), &lineage).unwrap();
        assert_ne!(first.version, second.version);
    }
}
