use serde::{Deserialize, Serialize};

/// Malformed entity or view input. Always raised before any state changes.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("{field} contains a non-finite value at index {index}")]
    NonFinite { field: &'static str, index: usize },
    #[error("{field} has {actual} values, expected {expected}")]
    LengthMismatch {
        field: String,
        expected: usize,
        actual: usize,
    },
    #[error("color must have 4 components, got {0}")]
    ColorComponents(usize),
    #[error("color type must be one of SIMPLE_RGB, SDSS_TRUE_COLOR, got {0:?}")]
    UnknownColorType(String),
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// An RGBA color with components in the frontend's 0..1 range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Rgba(pub [f64; 4]);

impl Rgba {
    pub const DEFAULT_CATALOG: Rgba = Rgba([0.0, 1.0, 0.0, 0.5]);
    pub const DEFAULT_MARKER: Rgba = Rgba([0.0, 1.0, 1.0, 1.0]);

    pub fn new(components: [f64; 4]) -> Result<Self, ValidationError> {
        check_finite("color", &components)?;
        Ok(Self(components))
    }
}

impl TryFrom<Vec<f64>> for Rgba {
    type Error = ValidationError;

    fn try_from(components: Vec<f64>) -> Result<Self, Self::Error> {
        let array: [f64; 4] = components
            .as_slice()
            .try_into()
            .map_err(|_| ValidationError::ColorComponents(components.len()))?;
        Rgba::new(array)
    }
}

pub fn check_finite(field: &'static str, values: &[f64]) -> Result<(), ValidationError> {
    match values.iter().position(|v| !v.is_finite()) {
        Some(index) => Err(ValidationError::NonFinite { field, index }),
        None => Ok(()),
    }
}

pub fn check_len(field: &str, expected: usize, actual: usize) -> Result<(), ValidationError> {
    if expected != actual {
        return Err(ValidationError::LengthMismatch {
            field: field.to_string(),
            expected,
            actual,
        });
    }
    Ok(())
}

/// Validate a pair of equal-length, finite coordinate arrays.
pub fn check_coords(ra: &[f64], dec: &[f64]) -> Result<(), ValidationError> {
    check_len("dec", ra.len(), dec.len())?;
    check_finite("ra", ra)?;
    check_finite("dec", dec)
}
