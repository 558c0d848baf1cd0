//! MQTT adapter error types.

use homie_domain::error::HomieError;

/// Errors specific to the MQTT adapter.
#[derive(Debug, thiserror::Error)]
pub enum MqttError {
    /// No connection has been established yet, or it was closed.
    #[error("MQTT client not connected")]
    NotConnected,

    /// The broker did not acknowledge the connection in time.
    #[error("timed out after {0}s waiting for the broker")]
    Timeout(u64),

    /// The rumqttc client returned an error.
    #[error("MQTT client error")]
    Client(#[source] rumqttc::ClientError),

    /// The connection to the broker failed.
    #[error("MQTT connection error")]
    Connection(#[source] rumqttc::ConnectionError),
}

impl MqttError {
    /// Convert into a [`HomieError::Transport`] for propagation across port
    /// boundaries.
    pub fn into_domain(self) -> HomieError {
        HomieError::transport(self)
    }
}

impl From<MqttError> for HomieError {
    fn from(err: MqttError) -> Self {
        err.into_domain()
    }
}
