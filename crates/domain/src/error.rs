//! Common error types used across the workspace.
//!
//! Each layer defines its own typed errors and converts into [`HomieError`]
//! via `#[from]`. Errors raised while validating a value payload are not part
//! of this hierarchy: they live in [`crate::value::ValueError`] because the
//! engine recovers from them locally instead of returning them.

use crate::id::HomieId;

/// Base error of the Homie engine.
#[derive(Debug, thiserror::Error)]
pub enum HomieError {
    #[error("validation error")]
    Validation(#[from] ValidationError),

    #[error("not found")]
    NotFound(#[from] NotFoundError),

    #[error("invalid device tree")]
    Structure(#[from] StructureError),

    #[error("serialization error")]
    Serialization(#[from] serde_json::Error),

    /// A publish/subscribe operation failed in the transport adapter.
    #[error("transport error")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl HomieError {
    /// Wrap any adapter error as a [`HomieError::Transport`].
    pub fn transport<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Transport(Box::new(err))
    }
}

/// Malformed input that breaks a domain invariant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("id must not be empty")]
    EmptyId,

    #[error("invalid characters in id {0:?}")]
    InvalidId(String),
}

/// A device, node, or property that does not exist.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{entity} not found: {id}")]
pub struct NotFoundError {
    pub entity: &'static str,
    pub id: String,
}

/// Misuse of the device tree. These are programmer errors and fail fast.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StructureError {
    #[error("device {0} already exists in the tree")]
    DuplicateDevice(HomieId),

    #[error("device {child} is not a child of {parent}")]
    NotAChild { parent: HomieId, child: HomieId },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_convert_validation_error_into_homie_error() {
        let err: HomieError = ValidationError::EmptyId.into();
        assert!(matches!(err, HomieError::Validation(ValidationError::EmptyId)));
    }

    #[test]
    fn should_display_not_found_error() {
        let err = NotFoundError {
            entity: "Device",
            id: "lamp".to_string(),
        };
        assert_eq!(err.to_string(), "Device not found: lamp");
    }

    #[test]
    fn should_display_duplicate_device_error() {
        let id: HomieId = "lamp".parse().unwrap();
        let err = StructureError::DuplicateDevice(id);
        assert_eq!(err.to_string(), "device lamp already exists in the tree");
    }

    #[test]
    fn should_keep_source_of_transport_error() {
        let io = std::io::Error::other("broker unreachable");
        let err = HomieError::transport(io);
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "broker unreachable");
    }
}
