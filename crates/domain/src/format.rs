//! Format grammars attached to property datatypes.
//!
//! | Datatype | Grammar |
//! |----------|---------|
//! | `integer`, `float` | `min:max:step`, every segment optional |
//! | `boolean` | `false-label,true-label` |
//! | `enum` | comma-separated list of allowed values |
//! | others | free-form, not checked |

use std::str::FromStr;

use crate::datatype::Datatype;

/// Reasons a format string does not follow its datatype's grammar.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    #[error("format is required for this datatype")]
    Missing,

    #[error("range format has more than three segments: {0:?}")]
    TooManySegments(String),

    #[error("range segment is not a number: {0:?}")]
    InvalidNumber(String),

    #[error("range minimum is greater than its maximum")]
    InvertedRange,

    #[error("range step must be greater than zero")]
    NonPositiveStep,

    #[error("boolean format must list two distinct non-empty labels")]
    BooleanLabels,

    #[error("enum format contains an empty value")]
    EmptyEnumValue,
}

/// Parsed `min:max:step` range of a numeric property.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Range<T> {
    pub min: Option<T>,
    pub max: Option<T>,
    pub step: Option<T>,
}

impl<T> Range<T>
where
    T: FromStr + PartialOrd + Default + Copy,
{
    /// Parse a `min:max:step` range. Empty or missing segments are unset.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError`] when there are more than three segments, a
    /// segment is not a number, `min > max`, or `step <= 0`.
    pub fn parse(format: &str) -> Result<Self, FormatError> {
        let segments: Vec<&str> = format.split(':').collect();
        if segments.len() > 3 {
            return Err(FormatError::TooManySegments(format.to_string()));
        }

        let mut parsed = segments.into_iter().map(parse_segment::<T>);
        let range = Self {
            min: parsed.next().transpose()?.flatten(),
            max: parsed.next().transpose()?.flatten(),
            step: parsed.next().transpose()?.flatten(),
        };

        if let (Some(min), Some(max)) = (range.min, range.max) {
            if min > max {
                return Err(FormatError::InvertedRange);
            }
        }
        if let Some(step) = range.step {
            if step <= T::default() {
                return Err(FormatError::NonPositiveStep);
            }
        }
        Ok(range)
    }
}

fn parse_segment<T: FromStr>(segment: &str) -> Result<Option<T>, FormatError> {
    if segment.is_empty() {
        return Ok(None);
    }
    segment
        .parse()
        .map(Some)
        .map_err(|_| FormatError::InvalidNumber(segment.to_string()))
}

/// Split an enum format into its allowed values.
pub fn enum_values(format: &str) -> impl Iterator<Item = &str> {
    format.split(',')
}

/// Check that `format` follows the grammar of `datatype`.
///
/// # Errors
///
/// Returns the first [`FormatError`] found.
pub fn validate_format(datatype: Datatype, format: Option<&str>) -> Result<(), FormatError> {
    match (datatype, format) {
        (Datatype::Integer, Some(format)) => Range::<i64>::parse(format).map(|_| ()),
        (Datatype::Float, Some(format)) => Range::<f64>::parse(format).map(|_| ()),
        (Datatype::Boolean, Some(format)) => {
            let labels: Vec<&str> = format.split(',').collect();
            if labels.len() != 2 || labels.iter().any(|l| l.is_empty()) || labels[0] == labels[1]
            {
                return Err(FormatError::BooleanLabels);
            }
            Ok(())
        }
        (Datatype::Enum, None) => Err(FormatError::Missing),
        (Datatype::Enum, Some(format)) => {
            if enum_values(format).any(str::is_empty) {
                return Err(FormatError::EmptyEnumValue);
            }
            Ok(())
        }
        _ => Ok(()),
    }
}
