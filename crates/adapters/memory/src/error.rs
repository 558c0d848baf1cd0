//! Memory transport error types.

use homie_domain::error::HomieError;

/// Errors raised by [`MemoryTransport`](crate::MemoryTransport).
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    /// An operation that needs a connection was called while disconnected.
    #[error("memory transport not connected")]
    NotConnected,

    /// A subscription pattern that MQTT would refuse.
    #[error("invalid subscription pattern {0:?}")]
    InvalidPattern(String),
}

impl MemoryError {
    /// Convert into a [`HomieError::Transport`] for propagation across port
    /// boundaries.
    pub fn into_domain(self) -> HomieError {
        HomieError::transport(self)
    }
}

impl From<MemoryError> for HomieError {
    fn from(err: MemoryError) -> Self {
        err.into_domain()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_display_not_connected_error() {
        assert_eq!(
            MemoryError::NotConnected.to_string(),
            "memory transport not connected"
        );
    }

    #[test]
    fn should_convert_into_transport_error() {
        let err: HomieError = MemoryError::InvalidPattern("a/#/b".to_string()).into();
        assert!(matches!(err, HomieError::Transport(_)));
    }
}
