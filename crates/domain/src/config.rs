//! Device configuration — the nodes and properties a device declares.
//!
//! A [`DeviceConfig`] is everything a device description contains except the
//! fields the engine manages itself (`homie`, `version`, `root`, `parent`,
//! `children`). Maps are ordered by id so that serialization is canonical.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::datatype::Datatype;
use crate::error::ValidationError;
use crate::format::{FormatError, validate_format};
use crate::id::HomieId;

/// User-declared part of a device description.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub device_type: Option<String>,
    #[serde(default)]
    pub nodes: BTreeMap<HomieId, NodeConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extensions: Vec<String>,
}

/// A named group of properties inside a device.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub node_type: Option<String>,
    #[serde(default)]
    pub properties: BTreeMap<HomieId, PropertyConfig>,
}

/// A single value exposed by a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub datatype: Datatype,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default)]
    pub settable: bool,
    #[serde(default = "default_retained")]
    pub retained: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

fn default_retained() -> bool {
    true
}

/// A property whose format does not follow its datatype's grammar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatIssue {
    pub node_id: HomieId,
    pub property_id: HomieId,
    pub error: FormatError,
}

impl DeviceConfig {
    /// Create a builder for constructing a [`DeviceConfig`].
    #[must_use]
    pub fn builder() -> DeviceConfigBuilder {
        DeviceConfigBuilder::default()
    }

    /// Look up a property by node and property id.
    #[must_use]
    pub fn property(&self, node_id: &str, property_id: &str) -> Option<&PropertyConfig> {
        self.nodes.get(node_id)?.properties.get(property_id)
    }

    /// Every property whose format is malformed for its datatype.
    #[must_use]
    pub fn format_issues(&self) -> Vec<FormatIssue> {
        self.nodes
            .iter()
            .flat_map(|(node_id, node)| {
                node.properties.iter().filter_map(move |(property_id, property)| {
                    property.validate_format().err().map(|error| FormatIssue {
                        node_id: node_id.clone(),
                        property_id: property_id.clone(),
                        error,
                    })
                })
            })
            .collect()
    }
}

impl NodeConfig {
    /// Create a builder for constructing a [`NodeConfig`].
    #[must_use]
    pub fn builder() -> NodeConfigBuilder {
        NodeConfigBuilder::default()
    }
}

impl PropertyConfig {
    /// Create a builder for a property of the given datatype.
    #[must_use]
    pub fn builder(datatype: Datatype) -> PropertyConfigBuilder {
        PropertyConfigBuilder {
            property: Self {
                name: None,
                datatype,
                format: None,
                settable: false,
                retained: true,
                unit: None,
            },
        }
    }

    /// Check the format against the datatype's grammar.
    ///
    /// # Errors
    ///
    /// Returns the [`FormatError`] found by [`validate_format`].
    pub fn validate_format(&self) -> Result<(), FormatError> {
        validate_format(self.datatype, self.format.as_deref())
    }
}

/// Step-by-step builder for [`DeviceConfig`].
#[derive(Debug, Default)]
pub struct DeviceConfigBuilder {
    name: Option<String>,
    device_type: Option<String>,
    nodes: Vec<(String, NodeConfig)>,
    extensions: Vec<String>,
}

impl DeviceConfigBuilder {
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn device_type(mut self, device_type: impl Into<String>) -> Self {
        self.device_type = Some(device_type.into());
        self
    }

    #[must_use]
    pub fn node(mut self, id: impl Into<String>, node: NodeConfig) -> Self {
        self.nodes.push((id.into(), node));
        self
    }

    #[must_use]
    pub fn extension(mut self, extension: impl Into<String>) -> Self {
        self.extensions.push(extension.into());
        self
    }

    /// Consume the builder, validate node ids, and return a [`DeviceConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] if a node id is not a valid Homie id.
    pub fn build(self) -> Result<DeviceConfig, ValidationError> {
        let nodes = self
            .nodes
            .into_iter()
            .map(|(id, node)| HomieId::new(id).map(|id| (id, node)))
            .collect::<Result<_, _>>()?;
        Ok(DeviceConfig {
            name: self.name,
            device_type: self.device_type,
            nodes,
            extensions: self.extensions,
        })
    }
}

/// Step-by-step builder for [`NodeConfig`].
#[derive(Debug, Default)]
pub struct NodeConfigBuilder {
    name: Option<String>,
    node_type: Option<String>,
    properties: Vec<(String, PropertyConfig)>,
}

impl NodeConfigBuilder {
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn node_type(mut self, node_type: impl Into<String>) -> Self {
        self.node_type = Some(node_type.into());
        self
    }

    #[must_use]
    pub fn property(mut self, id: impl Into<String>, property: PropertyConfig) -> Self {
        self.properties.push((id.into(), property));
        self
    }

    /// Consume the builder, validate property ids, and return a [`NodeConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] if a property id is not a valid Homie id.
    pub fn build(self) -> Result<NodeConfig, ValidationError> {
        let properties = self
            .properties
            .into_iter()
            .map(|(id, property)| HomieId::new(id).map(|id| (id, property)))
            .collect::<Result<_, _>>()?;
        Ok(NodeConfig {
            name: self.name,
            node_type: self.node_type,
            properties,
        })
    }
}

/// Step-by-step builder for [`PropertyConfig`].
#[derive(Debug)]
pub struct PropertyConfigBuilder {
    property: PropertyConfig,
}

impl PropertyConfigBuilder {
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.property.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn format(mut self, format: impl Into<String>) -> Self {
        self.property.format = Some(format.into());
        self
    }

    #[must_use]
    pub fn settable(mut self, settable: bool) -> Self {
        self.property.settable = settable;
        self
    }

    #[must_use]
    pub fn retained(mut self, retained: bool) -> Self {
        self.property.retained = retained;
        self
    }

    #[must_use]
    pub fn unit(mut self, unit: impl Into<String>) -> Self {
        self.property.unit = Some(unit.into());
        self
    }

    #[must_use]
    pub fn build(self) -> PropertyConfig {
        self.property
    }
}
