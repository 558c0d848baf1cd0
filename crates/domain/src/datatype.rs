//! Property datatypes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Datatype declared by a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Datatype {
    Integer,
    Float,
    Boolean,
    String,
    Enum,
    Color,
    Datetime,
    Duration,
    Json,
}

impl Datatype {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Boolean => "boolean",
            Self::String => "string",
            Self::Enum => "enum",
            Self::Color => "color",
            Self::Datetime => "datetime",
            Self::Duration => "duration",
            Self::Json => "json",
        }
    }
}

impl fmt::Display for Datatype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned for a datatype name outside the convention.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("datatype not supported: {0}")]
pub struct UnsupportedDatatype(pub String);

impl FromStr for Datatype {
    type Err = UnsupportedDatatype;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "integer" => Ok(Self::Integer),
            "float" => Ok(Self::Float),
            "boolean" => Ok(Self::Boolean),
            "string" => Ok(Self::String),
            "enum" => Ok(Self::Enum),
            "color" => Ok(Self::Color),
            "datetime" => Ok(Self::Datetime),
            "duration" => Ok(Self::Duration),
            "json" => Ok(Self::Json),
            other => Err(UnsupportedDatatype(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_parse_known_datatypes() {
        assert_eq!("integer".parse::<Datatype>().unwrap(), Datatype::Integer);
        assert_eq!("json".parse::<Datatype>().unwrap(), Datatype::Json);
    }

    #[test]
    fn should_reject_unknown_datatype() {
        let err = "decimal".parse::<Datatype>().unwrap_err();
        assert_eq!(err.to_string(), "datatype not supported: decimal");
    }

    #[test]
    fn should_serialize_lowercase() {
        let json = serde_json::to_string(&Datatype::Color).unwrap();
        assert_eq!(json, "\"color\"");
    }
}
