//! Data models for the packing dashboard session.
//!
//! This module defines the fundamental data structures shared by every
//! component of the session core:
//! - `Dimensions`: length/width/height of an item or bin
//! - `Item`: one requested box instance, expanded from a request group
//! - `PlacedItem`: an item positioned by the packing service
//! - `LeftoverItem`: an item the packing service could not place
//! - `PackingSession`: the immutable result of one packing run

use serde::{Deserialize, Serialize};
#[allow(unused_imports)]
use serde_json::json;
use utoipa::ToSchema;

use crate::types::{Dimensional, Vec3};
use crate::weights::WeightSet;

/// One offending record of a bulk import.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct RecordIssue {
    /// Zero-based position of the record in the imported collection.
    pub index: usize,
    pub reason: String,
}

impl std::fmt::Display for RecordIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "record {}: {}", self.index, self.reason)
    }
}

/// Validation error for user supplied data.
///
/// Always recoverable: the session stays intact and the caller reports the
/// offending field or record.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    InvalidDimension(String),
    InvalidQuantity(String),
    DuplicateRequestGroup(i64),
    InvalidRotationAxisCount(i64),
    UnknownWeightKey(String),
    InvalidWeightValue(String),
    InvalidImport(Vec<RecordIssue>),
    InvalidConfiguration(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::InvalidDimension(msg) => write!(f, "Invalid dimension: {}", msg),
            ValidationError::InvalidQuantity(msg) => write!(f, "Invalid quantity: {}", msg),
            ValidationError::DuplicateRequestGroup(id) => {
                write!(f, "Item with request ID {} already exists", id)
            }
            ValidationError::InvalidRotationAxisCount(value) => {
                write!(f, "Invalid rotation axis count {}: expected 2, 4 or 6", value)
            }
            ValidationError::UnknownWeightKey(key) => write!(f, "Invalid weight key: {}", key),
            ValidationError::InvalidWeightValue(msg) => write!(f, "Invalid weight value: {}", msg),
            ValidationError::InvalidImport(issues) => {
                write!(f, "Invalid import ({} offending records)", issues.len())?;
                for issue in issues {
                    write!(f, "; {}", issue)?;
                }
                Ok(())
            }
            ValidationError::InvalidConfiguration(msg) => {
                write!(f, "Invalid configuration: {}", msg)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Helper function to validate a single dimension.
pub(crate) fn validate_dimension(value: f64, name: &str) -> Result<(), String> {
    if value.is_nan() || value.is_infinite() || value <= 0.0 {
        return Err(format!("{} must be positive, got: {}", name, value));
    }
    Ok(())
}

/// Length, width and height of an item or bin.
///
/// Deserializes from either `length/width/height` or the legacy `L/W/H`
/// spelling.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({"length": 10.0, "width": 8.0, "height": 6.0}))]
pub struct Dimensions {
    #[serde(alias = "L")]
    pub length: f64,
    #[serde(alias = "W")]
    pub width: f64,
    #[serde(alias = "H")]
    pub height: f64,
}

impl Dimensions {
    pub const fn new(length: f64, width: f64, height: f64) -> Self {
        Self {
            length,
            width,
            height,
        }
    }

    /// Checks that every axis is positive and finite.
    ///
    /// `label` prefixes the axis name in the error message, e.g. `"Bin"`.
    pub fn validate(&self, label: &str) -> Result<(), ValidationError> {
        validate_dimension(self.length, &format!("{} length", label))
            .and_then(|_| validate_dimension(self.width, &format!("{} width", label)))
            .and_then(|_| validate_dimension(self.height, &format!("{} height", label)))
            .map_err(ValidationError::InvalidDimension)
    }

    pub fn max_axis(&self) -> f64 {
        self.length.max(self.width).max(self.height)
    }

    pub fn min_axis(&self) -> f64 {
        self.length.min(self.width).min(self.height)
    }
}

/// Number of axes the packing service may rotate an item around.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u8")]
pub enum RotationAxisCount {
    #[default]
    Two,
    Four,
    Six,
}

impl RotationAxisCount {
    pub fn as_u8(self) -> u8 {
        match self {
            RotationAxisCount::Two => 2,
            RotationAxisCount::Four => 4,
            RotationAxisCount::Six => 6,
        }
    }
}

impl TryFrom<i64> for RotationAxisCount {
    type Error = ValidationError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            2 => Ok(RotationAxisCount::Two),
            4 => Ok(RotationAxisCount::Four),
            6 => Ok(RotationAxisCount::Six),
            other => Err(ValidationError::InvalidRotationAxisCount(other)),
        }
    }
}

impl From<RotationAxisCount> for u8 {
    fn from(value: RotationAxisCount) -> Self {
        value.as_u8()
    }
}

/// One requested box instance.
///
/// # Fields
/// * `id` - Process-unique identifier, assigned by the item registry
/// * `request_group_id` - User supplied identifier shared by identical requests
/// * `dimensions` - Length, width and height
/// * `rotation_axis_count` - Allowed rotation axes (2, 4 or 6)
#[derive(Clone, Debug, PartialEq, Serialize, ToSchema)]
pub struct Item {
    pub id: u64,
    pub request_group_id: i64,
    pub dimensions: Dimensions,
    #[schema(value_type = u8, example = 2)]
    pub rotation_axis_count: RotationAxisCount,
}

impl Dimensional for Item {
    fn dimensions(&self) -> Dimensions {
        self.dimensions
    }
}

/// An item positioned inside the bin by the packing service.
///
/// `dimensions` are the rotated dimensions; `position` is the lower corner in
/// bin space. `pack_order` is the 1-based placement sequence number.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PlacedItem {
    pub id: u64,
    pub request_group_id: Option<i64>,
    pub dimensions: Dimensions,
    pub position: Vec3,
    pub rotation: Option<i64>,
    pub pack_order: u32,
}

impl Dimensional for PlacedItem {
    fn dimensions(&self) -> Dimensions {
        self.dimensions
    }
}

/// An item the packing service could not place within the bin.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct LeftoverItem {
    pub id: u64,
    pub request_group_id: Option<i64>,
    pub dimensions: Dimensions,
}

/// Result of one packing run.
///
/// Immutable once built; a newer run replaces the whole value.
#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct PackingSession {
    /// Submit generation this result belongs to.
    pub generation: u64,
    pub bin: Dimensions,
    /// Item registry snapshot sent with the request.
    pub items: Vec<Item>,
    #[schema(value_type = Object)]
    pub weights: WeightSet,
    /// Placements ordered by `pack_order`.
    pub placed: Vec<PlacedItem>,
    pub leftover: Vec<LeftoverItem>,
    /// Used bin volume in percent.
    pub utilization: f64,
    pub packing_time_secs: Option<f64>,
}

impl PackingSession {
    pub fn placed_count(&self) -> usize {
        self.placed.len()
    }

    pub fn leftover_count(&self) -> usize {
        self.leftover.len()
    }

    pub fn is_complete(&self) -> bool {
        self.leftover.is_empty()
    }
}

/// Calculates the used bin volume in percent.
pub fn utilization_percent(placed: &[PlacedItem], bin: &Dimensions) -> f64 {
    let total = bin.volume();
    if placed.is_empty() || total <= 0.0 {
        return 0.0;
    }
    let used: f64 = placed.iter().map(|p| p.volume()).sum();
    (used / total) * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EPSILON_GENERAL;

    #[test]
    fn dimensions_accept_both_spellings() {
        let long: Dimensions =
            serde_json::from_str(r#"{"length": 10, "width": 8, "height": 6}"#).unwrap();
        let short: Dimensions = serde_json::from_str(r#"{"L": 10, "W": 8, "H": 6}"#).unwrap();
        assert_eq!(long, short);
        assert_eq!(long, Dimensions::new(10.0, 8.0, 6.0));
    }

    #[test]
    fn dimensions_validation_names_the_axis() {
        assert!(Dimensions::new(1.0, 2.0, 3.0).validate("Bin").is_ok());

        let err = Dimensions::new(1.0, 0.0, 3.0).validate("Bin").unwrap_err();
        assert!(
            err.to_string().contains("Bin width"),
            "unexpected message: {}",
            err
        );
        assert!(Dimensions::new(f64::NAN, 1.0, 1.0).validate("Item").is_err());
        assert!(Dimensions::new(1.0, 1.0, f64::INFINITY).validate("Item").is_err());
    }

    #[test]
    fn rotation_axis_count_accepts_only_known_values() {
        let four: RotationAxisCount = serde_json::from_str("4").unwrap();
        assert_eq!(four, RotationAxisCount::Four);
        assert_eq!(serde_json::to_string(&RotationAxisCount::Six).unwrap(), "6");
        assert!(serde_json::from_str::<RotationAxisCount>("3").is_err());
        assert_eq!(
            RotationAxisCount::try_from(5),
            Err(ValidationError::InvalidRotationAxisCount(5))
        );
    }

    #[test]
    fn invalid_import_lists_every_record() {
        let err = ValidationError::InvalidImport(vec![
            RecordIssue {
                index: 0,
                reason: "missing length".to_string(),
            },
            RecordIssue {
                index: 3,
                reason: "missing request_id".to_string(),
            },
        ]);
        let text = err.to_string();
        assert!(text.contains("record 0: missing length"));
        assert!(text.contains("record 3: missing request_id"));
    }

    #[test]
    fn utilization_uses_bin_volume() {
        let bin = Dimensions::new(10.0, 10.0, 10.0);
        let placed = vec![PlacedItem {
            id: 1,
            request_group_id: Some(1),
            dimensions: Dimensions::new(5.0, 10.0, 10.0),
            position: Vec3::new(0.0, 0.0, 0.0),
            rotation: None,
            pack_order: 1,
        }];
        assert!((utilization_percent(&placed, &bin) - 50.0).abs() < EPSILON_GENERAL);
        assert_eq!(utilization_percent(&[], &bin), 0.0);
    }
}
