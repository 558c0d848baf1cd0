//! Configuration loading — TOML file with environment variable overrides.
//!
//! Looks for `homie.toml` in the working directory. Every field has a
//! sensible default so the file is optional. Environment variables take
//! precedence over file values.

use std::collections::BTreeMap;

use serde::Deserialize;

use homie_adapter_mqtt::MqttConfig;
use homie_domain::config::DeviceConfig;
use homie_domain::id::validate_id;
use homie_domain::topic::DEFAULT_PREFIX;

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Broker connection.
    pub mqtt: MqttConfig,
    /// The device tree to announce.
    pub device: DeviceSettings,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Root device and its children.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    /// Id of the root device.
    pub id: String,
    /// Topic prefix of the Homie namespace.
    pub prefix: String,
    /// Publish the value of every accepted command back as the property's
    /// new value.
    pub echo_commands: bool,
    /// Name, type, nodes and extensions of the root device.
    #[serde(flatten)]
    pub config: DeviceConfig,
    /// Child devices keyed by id.
    pub children: BTreeMap<String, DeviceConfig>,
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive (`RUST_LOG` syntax).
    pub filter: String,
}

impl Config {
    /// Load configuration from `homie.toml` (if present) then apply
    /// environment-variable overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML file exists but is malformed, or if the
    /// resulting configuration is invalid.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::from_file("homie.toml")?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(ConfigError::Parse),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(ConfigError::Io(err)),
        }
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(val) = lookup("HOMIE_MQTT_HOST") {
            self.mqtt.broker_host = val;
        }
        if let Some(port) = lookup("HOMIE_MQTT_PORT").and_then(|val| val.parse().ok()) {
            self.mqtt.broker_port = port;
        }
        if let Some(val) = lookup("HOMIE_DEVICE_ID") {
            self.device.id = val;
        }
        if let Some(val) = lookup("HOMIE_LOG") {
            self.logging.filter = val;
        }
        if let Some(val) = lookup("RUST_LOG") {
            self.logging.filter = val;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.mqtt.broker_port == 0 {
            return Err(ConfigError::Validation(
                "mqtt broker port must be non-zero".to_string(),
            ));
        }
        validate_id(&self.device.id).map_err(|err| {
            ConfigError::Validation(format!("device id {:?}: {err}", self.device.id))
        })?;
        for id in self.device.children.keys() {
            validate_id(id)
                .map_err(|err| ConfigError::Validation(format!("child id {id:?}: {err}")))?;
        }
        if self.device.children.contains_key(&self.device.id) {
            return Err(ConfigError::Validation(format!(
                "child id {:?} is already used by the root device",
                self.device.id
            )));
        }
        let prefix = &self.device.prefix;
        if prefix.is_empty() || prefix.ends_with('/') || prefix.contains(['+', '#']) {
            return Err(ConfigError::Validation(format!(
                "topic prefix {prefix:?} must be a non-empty topic without wildcards"
            )));
        }
        Ok(())
    }
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            id: "homied".to_string(),
            prefix: DEFAULT_PREFIX.to_string(),
            echo_commands: true,
            config: DeviceConfig {
                name: Some("Homie daemon".to_string()),
                ..DeviceConfig::default()
            },
            children: BTreeMap::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "homied=info,homie_app=info,homie_adapter_mqtt=info".to_string(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parse failure.
    #[error("failed to parse config file")]
    Parse(#[from] toml::de::Error),
    /// File I/O failure.
    #[error("failed to read config file")]
    Io(#[from] std::io::Error),
    /// Semantic validation failure.
    #[error("invalid configuration: {0}")]
    Validation(String),
}
