//! Validated Homie identifiers.
//!
//! Devices, nodes, and properties share one id grammar: lowercase ASCII
//! letters, digits, and hyphens (`^[a-z0-9-]+$`).

use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Identifier of a device, node, or property.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HomieId(String);

impl HomieId {
    /// Validate and wrap an identifier.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::EmptyId`] for an empty string and
    /// [`ValidationError::InvalidId`] when it contains anything other than
    /// `a-z`, `0-9` or `-`.
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into();
        validate_id(&value)?;
        Ok(Self(value))
    }

    /// Borrow the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Check a raw string against the Homie id grammar.
///
/// # Errors
///
/// See [`HomieId::new`].
pub fn validate_id(value: &str) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::EmptyId);
    }
    let valid = value
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-');
    if !valid {
        return Err(ValidationError::InvalidId(value.to_string()));
    }
    Ok(())
}

impl fmt::Display for HomieId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for HomieId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for HomieId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<HomieId> for String {
    fn from(id: HomieId) -> Self {
        id.0
    }
}

impl AsRef<str> for HomieId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for HomieId {
    fn borrow(&self) -> &str {
        &self.0
    }
}
