//! Property values — validation and coercion of raw payloads.
//!
//! Every payload that enters the engine (a local `set_value` or an inbound
//! `/set` command) goes through [`validate_value`] with the property's
//! datatype and format. The result is either a typed [`Value`] or a
//! [`ValueError`] describing why the payload was refused.

use std::fmt;

use serde::Serialize;

use crate::datatype::{Datatype, UnsupportedDatatype};
use crate::format::{FormatError, Range, enum_values};

/// Longest string payload accepted, in characters.
pub const MAX_STRING_LENGTH: usize = 268_435_456;

/// A validated, typed property value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Integer(i64),
    Float(f64),
    Boolean(bool),
    String(String),
    Enum(String),
    Color(String),
}

impl Value {
    /// The normalized payload to publish for this value.
    #[must_use]
    pub fn to_payload(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Boolean(v) => write!(f, "{v}"),
            Self::String(v) | Self::Enum(v) | Self::Color(v) => f.write_str(v),
        }
    }
}

/// Why a raw payload was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValueError {
    #[error("invalid integer")]
    InvalidInteger,

    #[error("invalid float")]
    InvalidFloat,

    #[error("value too low")]
    TooLow,

    #[error("value too high")]
    TooHigh,

    #[error("invalid boolean")]
    InvalidBoolean,

    #[error("string too long, maximum allowed length is 268,435,456 characters")]
    StringTooLong,

    #[error("invalid enum value")]
    InvalidEnum,

    #[error("invalid color")]
    InvalidColor,

    #[error("{0} values are not yet supported")]
    NotYetSupported(Datatype),

    #[error(transparent)]
    UnsupportedDatatype(#[from] UnsupportedDatatype),

    #[error("invalid format")]
    InvalidFormat(#[from] FormatError),
}

/// Validate and coerce `raw` against `datatype` and its optional `format`.
///
/// # Errors
///
/// Returns a [`ValueError`] describing the first rule the payload breaks.
/// `datetime`, `duration` and `json` payloads are always refused with
/// [`ValueError::NotYetSupported`].
pub fn validate_value(
    datatype: Datatype,
    format: Option<&str>,
    raw: &str,
) -> Result<Value, ValueError> {
    match datatype {
        Datatype::Integer => validate_integer(raw, format).map(Value::Integer),
        Datatype::Float => validate_float(raw, format).map(Value::Float),
        Datatype::Boolean => match raw {
            "true" => Ok(Value::Boolean(true)),
            "false" => Ok(Value::Boolean(false)),
            _ => Err(ValueError::InvalidBoolean),
        },
        Datatype::String => {
            if raw.len() > MAX_STRING_LENGTH && raw.chars().count() > MAX_STRING_LENGTH {
                return Err(ValueError::StringTooLong);
            }
            Ok(Value::String(raw.to_string()))
        }
        Datatype::Enum => {
            let allowed = format.is_some_and(|format| enum_values(format).any(|v| v == raw));
            if !allowed {
                return Err(ValueError::InvalidEnum);
            }
            Ok(Value::Enum(raw.to_string()))
        }
        Datatype::Color => {
            if !is_hex_color(raw) {
                return Err(ValueError::InvalidColor);
            }
            Ok(Value::Color(raw.to_string()))
        }
        Datatype::Datetime | Datatype::Duration | Datatype::Json => {
            Err(ValueError::NotYetSupported(datatype))
        }
    }
}

fn is_hex_color(raw: &str) -> bool {
    raw.strip_prefix('#')
        .is_some_and(|hex| hex.len() == 6 && hex.bytes().all(|b| b.is_ascii_hexdigit()))
}

fn validate_integer(raw: &str, format: Option<&str>) -> Result<i64, ValueError> {
    let value: i64 = raw.parse().map_err(|_| ValueError::InvalidInteger)?;
    let Some(format) = format else {
        return Ok(value);
    };
    let range = Range::<i64>::parse(format)?;
    let value = snap_integer(value, &range)?;
    check_bounds(value, &range)?;
    Ok(value)
}

/// Snap `value` to the nearest multiple of `step` counted from the base.
///
/// The base is `min`, else `max`, else the value itself, lowered by whole
/// steps until it no longer exceeds the value. Halves round up.
fn snap_integer(value: i64, range: &Range<i64>) -> Result<i64, ValueError> {
    let Some(step) = range.step else {
        return Ok(value);
    };
    let step = i128::from(step);
    let target = i128::from(value);
    let mut base = i128::from(range.min.or(range.max).unwrap_or(value));
    if base > target {
        let gap = base - target;
        base -= (gap + step - 1) / step * step;
    }
    let offset = target - base;
    let snapped = base + (2 * offset + step) / (2 * step) * step;
    i64::try_from(snapped).map_err(|_| {
        if snapped > 0 {
            ValueError::TooHigh
        } else {
            ValueError::TooLow
        }
    })
}

fn validate_float(raw: &str, format: Option<&str>) -> Result<f64, ValueError> {
    let value: f64 = raw.parse().map_err(|_| ValueError::InvalidFloat)?;
    if !value.is_finite() {
        return Err(ValueError::InvalidFloat);
    }
    let Some(format) = format else {
        return Ok(value);
    };
    let range = Range::<f64>::parse(format)?;
    let value = snap_float(value, &range)?;
    check_bounds(value, &range)?;
    Ok(value)
}

/// Float counterpart of [`snap_integer`]. A snap that leaves the finite
/// range is refused like an out-of-range value.
fn snap_float(value: f64, range: &Range<f64>) -> Result<f64, ValueError> {
    let Some(step) = range.step else {
        return Ok(value);
    };
    let mut base = range.min.or(range.max).unwrap_or(value);
    if base > value {
        base -= ((base - value) / step).ceil() * step;
    }
    let snapped = ((value - base) / step).round() * step + base;
    if snapped.is_finite() {
        Ok(snapped)
    } else if value > 0.0 {
        Err(ValueError::TooHigh)
    } else {
        Err(ValueError::TooLow)
    }
}

fn check_bounds<T: PartialOrd + Copy>(value: T, range: &Range<T>) -> Result<(), ValueError> {
    if range.min.is_some_and(|min| value < min) {
        return Err(ValueError::TooLow);
    }
    if range.max.is_some_and(|max| value > max) {
        return Err(ValueError::TooHigh);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_accept_integer_within_range() {
        let value = validate_value(Datatype::Integer, Some("0:100"), "50").unwrap();
        assert_eq!(value, Value::Integer(50));
    }

    #[test]
    fn should_reject_integer_above_max() {
        let err = validate_value(Datatype::Integer, Some("0:100"), "150").unwrap_err();
        assert_eq!(err, ValueError::TooHigh);
        assert!(err.to_string().contains("too high"));
    }

    #[test]
    fn should_reject_integer_below_min() {
        let err = validate_value(Datatype::Integer, Some("0:100"), "-5").unwrap_err();
        assert_eq!(err, ValueError::TooLow);
        assert!(err.to_string().contains("too low"));
    }

    #[test]
    fn should_snap_integer_to_step_from_min() {
        let value = validate_value(Datatype::Integer, Some("0::10"), "23").unwrap();
        assert_eq!(value, Value::Integer(20));
    }

    #[test]
    fn should_round_half_step_up() {
        let value = validate_value(Datatype::Integer, Some("0::10"), "25").unwrap();
        assert_eq!(value, Value::Integer(30));
    }

    #[test]
    fn should_snap_from_offset_min() {
        let value = validate_value(Datatype::Integer, Some("3:100:5"), "12").unwrap();
        assert_eq!(value, Value::Integer(13));
    }

    #[test]
    fn should_snap_from_max_when_min_is_unset() {
        let value = validate_value(Datatype::Integer, Some(":98:10"), "61").unwrap();
        assert_eq!(value, Value::Integer(58));
    }

    #[test]
    fn should_snap_below_base_by_lowering_it() {
        let value = validate_value(Datatype::Integer, Some("::3"), "7").unwrap();
        assert_eq!(value, Value::Integer(7));

        let value = validate_value(Datatype::Integer, Some(":10:4"), "-3").unwrap();
        assert_eq!(value, Value::Integer(-2));
    }

    #[test]
    fn should_reject_value_snapped_above_max() {
        let err = validate_value(Datatype::Integer, Some("0:100:40"), "100").unwrap_err();
        assert_eq!(err, ValueError::TooHigh);
    }

    #[test]
    fn should_reject_unparseable_integer() {
        for raw in ["", "abc", "1.5", "12abc", " 1"] {
            assert_eq!(
                validate_value(Datatype::Integer, None, raw),
                Err(ValueError::InvalidInteger),
                "raw {raw:?}"
            );
        }
    }

    #[test]
    fn should_reject_integer_with_invalid_format() {
        let err = validate_value(Datatype::Integer, Some("0:10:0"), "5").unwrap_err();
        assert_eq!(err, ValueError::InvalidFormat(FormatError::NonPositiveStep));
    }

    #[test]
    fn should_accept_float_and_apply_range() {
        assert_eq!(
            validate_value(Datatype::Float, None, "21.5"),
            Ok(Value::Float(21.5))
        );
        assert_eq!(
            validate_value(Datatype::Float, Some("0:1"), "1.5"),
            Err(ValueError::TooHigh)
        );
        assert_eq!(
            validate_value(Datatype::Float, Some("0::0.5"), "1.3"),
            Ok(Value::Float(1.5))
        );
    }

    #[test]
    fn should_reject_non_finite_float() {
        assert_eq!(
            validate_value(Datatype::Float, None, "NaN"),
            Err(ValueError::InvalidFloat)
        );
        assert_eq!(
            validate_value(Datatype::Float, None, "inf"),
            Err(ValueError::InvalidFloat)
        );
    }

    #[test]
    fn should_refuse_float_snapped_out_of_finite_range() {
        assert_eq!(
            validate_value(Datatype::Float, Some("-1e308::1e307"), "1e308"),
            Err(ValueError::TooHigh)
        );
        assert_eq!(
            validate_value(Datatype::Float, Some(":1e308:1e307"), "-1e308"),
            Err(ValueError::TooLow)
        );
    }

    #[test]
    fn should_accept_only_boolean_literals() {
        assert_eq!(
            validate_value(Datatype::Boolean, None, "true"),
            Ok(Value::Boolean(true))
        );
        assert_eq!(
            validate_value(Datatype::Boolean, None, "false"),
            Ok(Value::Boolean(false))
        );
        for raw in ["True", "1", "yes", ""] {
            assert_eq!(
                validate_value(Datatype::Boolean, None, raw),
                Err(ValueError::InvalidBoolean)
            );
        }
    }

    #[test]
    fn should_accept_any_string() {
        assert_eq!(
            validate_value(Datatype::String, None, ""),
            Ok(Value::String(String::new()))
        );
        assert_eq!(
            validate_value(Datatype::String, None, "hello world"),
            Ok(Value::String("hello world".to_string()))
        );
    }

    #[test]
    fn should_accept_listed_enum_value_only() {
        assert_eq!(
            validate_value(Datatype::Enum, Some("a,b,c"), "b"),
            Ok(Value::Enum("b".to_string()))
        );
        assert_eq!(
            validate_value(Datatype::Enum, Some("a,b,c"), "d"),
            Err(ValueError::InvalidEnum)
        );
        assert_eq!(
            validate_value(Datatype::Enum, None, "a"),
            Err(ValueError::InvalidEnum)
        );
    }

    #[test]
    fn should_accept_six_digit_hex_color() {
        assert_eq!(
            validate_value(Datatype::Color, None, "#A0ff3c"),
            Ok(Value::Color("#A0ff3c".to_string()))
        );
        for raw in ["A0ff3c", "#fff", "#12345g", "#1234567"] {
            assert_eq!(
                validate_value(Datatype::Color, None, raw),
                Err(ValueError::InvalidColor),
                "raw {raw:?}"
            );
        }
    }

    #[test]
    fn should_refuse_unimplemented_datatypes_explicitly() {
        for datatype in [Datatype::Datetime, Datatype::Duration, Datatype::Json] {
            let err = validate_value(datatype, None, "{}").unwrap_err();
            assert_eq!(err, ValueError::NotYetSupported(datatype));
        }
    }

    #[test]
    fn should_refuse_unknown_datatype() {
        let err = ValueError::from("decimal".parse::<Datatype>().unwrap_err());
        assert!(matches!(err, ValueError::UnsupportedDatatype(_)));
        assert!(err.to_string().contains("datatype not supported"));
    }

    #[test]
    fn should_publish_normalized_payload() {
        assert_eq!(Value::Integer(20).to_payload(), "20");
        assert_eq!(Value::Boolean(true).to_payload(), "true");
        assert_eq!(Value::Float(1.5).to_payload(), "1.5");
    }
}
