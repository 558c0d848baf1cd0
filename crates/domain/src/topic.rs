//! Topic layout of the Homie namespace and MQTT-style pattern matching.
//!
//! Every device-scoped topic has the shape `<prefix>/<device>/<subtopic>`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::id::HomieId;

/// Root of the Homie v5 namespace.
pub const DEFAULT_PREFIX: &str = "homie/5";

pub const STATE: &str = "$state";
pub const DESCRIPTION: &str = "$description";
pub const LOG: &str = "$log";
pub const TARGET: &str = "$target";
pub const SET: &str = "set";

/// Severity of a `$log` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl LogLevel {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Fatal => "fatal",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown log level: {0}")]
pub struct UnknownLogLevel(pub String);

impl FromStr for LogLevel {
    type Err = UnknownLogLevel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            "fatal" => Ok(Self::Fatal),
            other => Err(UnknownLogLevel(other.to_string())),
        }
    }
}

/// Builds the topics of a single device.
#[derive(Debug, Clone, Copy)]
pub struct DeviceTopics<'a> {
    prefix: &'a str,
    device_id: &'a HomieId,
}

impl<'a> DeviceTopics<'a> {
    #[must_use]
    pub fn new(prefix: &'a str, device_id: &'a HomieId) -> Self {
        Self { prefix, device_id }
    }

    /// `<prefix>/<device>/<subtopic>`
    #[must_use]
    pub fn topic(&self, subtopic: &str) -> String {
        format!("{}/{}/{subtopic}", self.prefix, self.device_id)
    }

    #[must_use]
    pub fn state(&self) -> String {
        self.topic(STATE)
    }

    #[must_use]
    pub fn description(&self) -> String {
        self.topic(DESCRIPTION)
    }

    #[must_use]
    pub fn log(&self, level: LogLevel) -> String {
        self.topic(&format!("{LOG}/{level}"))
    }

    #[must_use]
    pub fn value(&self, node_id: &str, property_id: &str) -> String {
        self.topic(&format!("{node_id}/{property_id}"))
    }

    #[must_use]
    pub fn target(&self, node_id: &str, property_id: &str) -> String {
        self.topic(&format!("{node_id}/{property_id}/{TARGET}"))
    }

    /// Wildcard covering every command topic of the device.
    #[must_use]
    pub fn commands(&self) -> String {
        self.topic(&format!("+/+/{SET}"))
    }
}

/// A parsed `<prefix>/<device>/<node>/<property>/set` topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTopic {
    pub device_id: HomieId,
    pub node_id: HomieId,
    pub property_id: HomieId,
}

impl CommandTopic {
    /// Parse a command topic under `prefix`. Returns `None` for anything
    /// else, including segments that are not valid ids.
    #[must_use]
    pub fn parse(prefix: &str, topic: &str) -> Option<Self> {
        let rest = topic.strip_prefix(prefix)?.strip_prefix('/')?;
        let mut segments = rest.split('/');
        let device_id = segments.next()?;
        let node_id = segments.next()?;
        let property_id = segments.next()?;
        if segments.next()? != SET || segments.next().is_some() {
            return None;
        }
        Some(Self {
            device_id: HomieId::new(device_id).ok()?,
            node_id: HomieId::new(node_id).ok()?,
            property_id: HomieId::new(property_id).ok()?,
        })
    }
}

/// Whether `topic` matches the subscription `pattern`.
///
/// `+` matches exactly one level. `#` must be the last level of the pattern
/// and matches any remainder, including none (`a/#` matches `a`).
#[must_use]
pub fn matches(pattern: &str, topic: &str) -> bool {
    let mut pattern = pattern.split('/');
    let mut topic = topic.split('/');
    loop {
        match (pattern.next(), topic.next()) {
            (Some("#"), _) => return pattern.next().is_none(),
            (Some("+"), Some(_)) => {}
            (Some(expected), Some(actual)) if expected == actual => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(value: &str) -> HomieId {
        HomieId::new(value).unwrap()
    }

    #[test]
    fn should_build_device_topics() {
        let device = id("lamp");
        let topics = DeviceTopics::new(DEFAULT_PREFIX, &device);
        assert_eq!(topics.state(), "homie/5/lamp/$state");
        assert_eq!(topics.description(), "homie/5/lamp/$description");
        assert_eq!(topics.log(LogLevel::Warn), "homie/5/lamp/$log/warn");
        assert_eq!(topics.value("relay", "power"), "homie/5/lamp/relay/power");
        assert_eq!(
            topics.target("relay", "power"),
            "homie/5/lamp/relay/power/$target"
        );
        assert_eq!(topics.commands(), "homie/5/lamp/+/+/set");
    }

    #[test]
    fn should_honor_custom_prefix() {
        let device = id("lamp");
        let topics = DeviceTopics::new("acme/5", &device);
        assert_eq!(topics.state(), "acme/5/lamp/$state");
    }

    #[test]
    fn should_parse_command_topic() {
        let command = CommandTopic::parse(DEFAULT_PREFIX, "homie/5/lamp/relay/power/set").unwrap();
        assert_eq!(command.device_id, id("lamp"));
        assert_eq!(command.node_id, id("relay"));
        assert_eq!(command.property_id, id("power"));
    }

    #[test]
    fn should_reject_non_command_topics() {
        for topic in [
            "homie/5/lamp/relay/power",
            "homie/5/lamp/relay/power/$target",
            "homie/5/lamp/relay/power/set/extra",
            "homie/5/lamp/$state",
            "homie/4/lamp/relay/power/set",
            "homie/5/Lamp/relay/power/set",
            "homie/5x/lamp/relay/power/set",
        ] {
            assert!(
                CommandTopic::parse(DEFAULT_PREFIX, topic).is_none(),
                "topic {topic:?}"
            );
        }
    }

    #[test]
    fn should_match_single_level_wildcard() {
        assert!(matches("a/+/c", "a/b/c"));
        assert!(!matches("a/+/c", "a/b/c/d"));
        assert!(!matches("a/+/c", "a/c"));
        assert!(matches("homie/5/lamp/+/+/set", "homie/5/lamp/relay/power/set"));
    }

    #[test]
    fn should_match_multi_level_wildcard() {
        assert!(matches("a/#", "a/b/c"));
        assert!(matches("a/#", "a"));
        assert!(matches("#", "anything/at/all"));
        assert!(!matches("a/#", "b/c"));
    }

    #[test]
    fn should_only_accept_trailing_multi_level_wildcard() {
        assert!(!matches("a/#/c", "a/b/c"));
    }

    #[test]
    fn should_match_literal_topics_exactly() {
        assert!(matches("a/b", "a/b"));
        assert!(!matches("a/b", "a/b/c"));
        assert!(!matches("a/b/c", "a/b"));
    }

    #[test]
    fn should_parse_log_levels() {
        assert_eq!("fatal".parse::<LogLevel>().unwrap(), LogLevel::Fatal);
        assert!("trace".parse::<LogLevel>().is_err());
    }
}
