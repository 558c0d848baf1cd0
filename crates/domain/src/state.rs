//! Device lifecycle state, as published on the `$state` topic.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceState {
    #[default]
    Disconnected,
    Init,
    Ready,
    Sleeping,
    Lost,
}

impl DeviceState {
    /// The payload published on `$state`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Init => "init",
            Self::Ready => "ready",
            Self::Sleeping => "sleeping",
            Self::Lost => "lost",
        }
    }

    /// Whether the device has been started and not yet disconnected.
    #[must_use]
    pub fn is_started(self) -> bool {
        !matches!(self, Self::Disconnected | Self::Lost)
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown state literal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown device state {0:?}")]
pub struct UnknownStateError(String);

impl FromStr for DeviceState {
    type Err = UnknownStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "disconnected" => Ok(Self::Disconnected),
            "init" => Ok(Self::Init),
            "ready" => Ok(Self::Ready),
            "sleeping" => Ok(Self::Sleeping),
            "lost" => Ok(Self::Lost),
            other => Err(UnknownStateError(other.to_string())),
        }
    }
}
