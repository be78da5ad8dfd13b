//! JSON import and export documents.
//!
//! Item collections and bin sizes arrive in two spellings: the current
//! `length/width/height` + `number_axis` and the legacy `L/W/H` + `num_axis`.
//! Both are accepted on input; output always uses the current spelling.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::model::{
    Dimensions, Item, LeftoverItem, PackingSession, PlacedItem, RotationAxisCount,
};
use crate::registry::{GroupedView, ItemGroupSpec};
use crate::types::Vec3;
use crate::weights::WeightSet;

/// One record of a bulk item collection, in either spelling.
///
/// `request_id` falls back to `id`, `quantity` defaults to 1 and the rotation
/// axis count defaults to 2.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct BulkItemRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<f64>,
    #[serde(default, rename = "L", skip_serializing_if = "Option::is_none")]
    pub length_short: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(default, rename = "W", skip_serializing_if = "Option::is_none")]
    pub width_short: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    #[serde(default, rename = "H", skip_serializing_if = "Option::is_none")]
    pub height_short: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number_axis: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_axis: Option<i64>,
}

impl BulkItemRecord {
    /// Normalizes both spellings into a validated group description.
    ///
    /// Every problem of the record is reported, joined into one message.
    pub fn normalize(&self) -> Result<ItemGroupSpec, String> {
        let mut problems = Vec::new();

        let length = self.length.or(self.length_short);
        let width = self.width.or(self.width_short);
        let height = self.height.or(self.height_short);
        for (value, name) in [(length, "length/L"), (width, "width/W"), (height, "height/H")] {
            if value.is_none() {
                problems.push(format!("{} is required", name));
            }
        }

        let request_group_id = self.request_id.or(self.id);
        if request_group_id.is_none() {
            problems.push("request_id is required".to_string());
        }

        let quantity = self.quantity.unwrap_or(1);
        if quantity < 1 {
            problems.push(format!("quantity must be at least 1, got: {}", quantity));
        } else if quantity > i64::from(u32::MAX) {
            problems.push(format!(
                "quantity must be at most {}, got: {}",
                u32::MAX,
                quantity
            ));
        }

        let rotation = RotationAxisCount::try_from(self.number_axis.or(self.num_axis).unwrap_or(2));
        if let Err(err) = &rotation {
            problems.push(err.to_string());
        }

        let dimensions = match (length, width, height) {
            (Some(l), Some(w), Some(h)) => {
                let dims = Dimensions::new(l, w, h);
                if let Err(err) = dims.validate("Item") {
                    problems.push(err.to_string());
                }
                Some(dims)
            }
            _ => None,
        };

        match (dimensions, request_group_id, rotation) {
            (Some(dimensions), Some(request_group_id), Ok(rotation_axis_count))
                if problems.is_empty() =>
            {
                Ok(ItemGroupSpec {
                    dimensions,
                    request_group_id,
                    rotation_axis_count,
                    quantity: quantity as u32,
                })
            }
            _ => Err(problems.join(", ")),
        }
    }
}

/// Reads the bin size of an import document, if it carries one.
///
/// Accepts `bin_size` with either spelling.
pub fn bin_size_from_document(document: &Value) -> Option<Result<Dimensions, String>> {
    let raw = document.get("bin_size")?;
    Some(
        serde_json::from_value::<Dimensions>(raw.clone())
            .map_err(|err| format!("bin_size must contain (length, width, height) or (L, W, H): {}", err)),
    )
}

/// Export metadata appended to every document.
#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct ExportInfo {
    pub export_type: String,
    /// Seconds since the Unix epoch.
    pub exported_at: u64,
}

impl ExportInfo {
    fn now(export_type: &str) -> Self {
        let exported_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self {
            export_type: export_type.to_string(),
            exported_at,
        }
    }
}

/// One request group in the item export format.
#[derive(Clone, Debug, PartialEq, Serialize, ToSchema)]
pub struct ExportedItemGroup {
    pub length: f64,
    pub width: f64,
    pub height: f64,
    pub request_id: i64,
    pub quantity: usize,
    pub number_axis: u8,
}

#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct ItemsExportStatistics {
    pub total_items: usize,
    pub unique_types: usize,
}

/// Exported item list, re-importable through the bulk import.
#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct ItemsExport {
    pub items: Vec<ExportedItemGroup>,
    pub statistics: ItemsExportStatistics,
    pub export_info: ExportInfo,
}

impl ItemsExport {
    pub fn from_grouped(view: &GroupedView) -> Self {
        let items: Vec<ExportedItemGroup> = view
            .iter()
            .map(|group| ExportedItemGroup {
                length: group.dimensions.length,
                width: group.dimensions.width,
                height: group.dimensions.height,
                request_id: group.request_group_id,
                quantity: group.count,
                number_axis: group.rotation_axis_count.as_u8(),
            })
            .collect();
        let total_items = items.iter().map(|g| g.quantity).sum();
        Self {
            statistics: ItemsExportStatistics {
                total_items,
                unique_types: items.len(),
            },
            items,
            export_info: ExportInfo::now("items_list"),
        }
    }
}

/// Exported weight configuration.
#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct WeightsExport {
    #[schema(value_type = Object)]
    pub algorithm_weights: WeightSet,
    pub export_info: ExportInfo,
}

impl WeightsExport {
    pub fn new(weights: WeightSet) -> Self {
        Self {
            algorithm_weights: weights,
            export_info: ExportInfo::now("algorithm_weights"),
        }
    }
}

/// Item as the packing service returns it: flat fields, `x/y/z` position.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct WirePlacedItem {
    pub id: u64,
    #[serde(default)]
    pub request_id: Option<i64>,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    #[serde(alias = "L")]
    pub length: f64,
    #[serde(alias = "W")]
    pub width: f64,
    #[serde(alias = "H")]
    pub height: f64,
    #[serde(default)]
    pub rotation: Option<i64>,
    #[serde(default, alias = "packing_order", skip_serializing_if = "Option::is_none")]
    pub pack_order: Option<u32>,
}

impl WirePlacedItem {
    pub fn into_placed(self, pack_order: u32) -> PlacedItem {
        PlacedItem {
            id: self.id,
            request_group_id: self.request_id,
            dimensions: Dimensions::new(self.length, self.width, self.height),
            position: Vec3::new(self.x, self.y, self.z),
            rotation: self.rotation,
            pack_order,
        }
    }
}

impl From<&PlacedItem> for WirePlacedItem {
    fn from(item: &PlacedItem) -> Self {
        Self {
            id: item.id,
            request_id: item.request_group_id,
            x: item.position.x,
            y: item.position.y,
            z: item.position.z,
            length: item.dimensions.length,
            width: item.dimensions.width,
            height: item.dimensions.height,
            rotation: item.rotation,
            pack_order: Some(item.pack_order),
        }
    }
}

/// Unplaced item as the packing service returns it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct WireLeftoverItem {
    pub id: u64,
    #[serde(default)]
    pub request_id: Option<i64>,
    #[serde(alias = "L")]
    pub length: f64,
    #[serde(alias = "W")]
    pub width: f64,
    #[serde(alias = "H")]
    pub height: f64,
}

impl From<WireLeftoverItem> for LeftoverItem {
    fn from(item: WireLeftoverItem) -> Self {
        LeftoverItem {
            id: item.id,
            request_group_id: item.request_id,
            dimensions: Dimensions::new(item.length, item.width, item.height),
        }
    }
}

impl From<&LeftoverItem> for WireLeftoverItem {
    fn from(item: &LeftoverItem) -> Self {
        Self {
            id: item.id,
            request_id: item.request_group_id,
            length: item.dimensions.length,
            width: item.dimensions.width,
            height: item.dimensions.height,
        }
    }
}

/// Item as it is sent to the packing service.
#[derive(Clone, Debug, PartialEq, Serialize, ToSchema)]
pub struct WireRequestItem {
    pub id: u64,
    pub request_id: i64,
    pub length: f64,
    pub width: f64,
    pub height: f64,
    pub number_axis: u8,
}

impl From<&Item> for WireRequestItem {
    fn from(item: &Item) -> Self {
        Self {
            id: item.id,
            request_id: item.request_group_id,
            length: item.dimensions.length,
            width: item.dimensions.width,
            height: item.dimensions.height,
            number_axis: item.rotation_axis_count.as_u8(),
        }
    }
}

#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct PackingResultsBody {
    pub packed_items: Vec<WirePlacedItem>,
    pub leftover_items: Vec<WireLeftoverItem>,
    pub utilization: f64,
    pub bin_size: Dimensions,
    #[schema(value_type = Object)]
    pub algorithm_weights: WeightSet,
    pub packing_time: Option<f64>,
}

#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct PackingResultsStatistics {
    pub total_items: usize,
    pub packed_count: usize,
    pub leftover_count: usize,
    pub utilization_percentage: f64,
}

/// Exported packing run, including the original import document if any.
#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct PackingResultsExport {
    pub packing_results: PackingResultsBody,
    pub statistics: PackingResultsStatistics,
    #[schema(value_type = Object, nullable = true)]
    pub original_input: Option<Value>,
    pub export_info: ExportInfo,
}

impl PackingResultsExport {
    pub fn from_session(session: &PackingSession, original_input: Option<&Value>) -> Self {
        Self {
            packing_results: PackingResultsBody {
                packed_items: session.placed.iter().map(WirePlacedItem::from).collect(),
                leftover_items: session.leftover.iter().map(WireLeftoverItem::from).collect(),
                utilization: session.utilization,
                bin_size: session.bin,
                algorithm_weights: session.weights,
                packing_time: session.packing_time_secs,
            },
            statistics: PackingResultsStatistics {
                total_items: session.placed_count() + session.leftover_count(),
                packed_count: session.placed_count(),
                leftover_count: session.leftover_count(),
                utilization_percentage: session.utilization,
            },
            original_input: original_input.cloned(),
            export_info: ExportInfo::now("packing_results"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn record_accepts_legacy_spelling() {
        let record: BulkItemRecord = serde_json::from_value(json!({
            "L": 3, "W": 2, "H": 1, "id": 7, "quantity": 2, "num_axis": 6
        }))
        .unwrap();
        let spec = record.normalize().unwrap();
        assert_eq!(spec.dimensions, Dimensions::new(3.0, 2.0, 1.0));
        assert_eq!(spec.request_group_id, 7);
        assert_eq!(spec.quantity, 2);
        assert_eq!(spec.rotation_axis_count, RotationAxisCount::Six);
    }

    #[test]
    fn record_prefers_request_id_over_id() {
        let record: BulkItemRecord = serde_json::from_value(json!({
            "length": 3, "width": 2, "height": 1, "id": 7, "request_id": 9
        }))
        .unwrap();
        let spec = record.normalize().unwrap();
        assert_eq!(spec.request_group_id, 9);
        assert_eq!(spec.quantity, 1);
        assert_eq!(spec.rotation_axis_count, RotationAxisCount::Two);
    }

    #[test]
    fn record_reports_all_problems_at_once() {
        let record: BulkItemRecord =
            serde_json::from_value(json!({"length": 3, "quantity": 0, "number_axis": 5})).unwrap();
        let reason = record.normalize().unwrap_err();
        for expected in ["width/W", "height/H", "request_id", "quantity", "rotation axis"] {
            assert!(reason.contains(expected), "'{}' missing in '{}'", expected, reason);
        }
    }

    #[test]
    fn oversized_quantity_is_reported_as_too_large() {
        let record: BulkItemRecord = serde_json::from_value(json!({
            "length": 3, "width": 2, "height": 1, "request_id": 1,
            "quantity": i64::from(u32::MAX) + 1
        }))
        .unwrap();
        let reason = record.normalize().unwrap_err();
        assert!(reason.contains("at most"), "unexpected reason: {}", reason);
        assert!(!reason.contains("at least"), "unexpected reason: {}", reason);
    }

    #[test]
    fn bin_size_accepts_both_spellings() {
        let short = bin_size_from_document(&json!({"bin_size": {"L": 10, "W": 8, "H": 6}}));
        assert_eq!(short, Some(Ok(Dimensions::new(10.0, 8.0, 6.0))));
        assert_eq!(bin_size_from_document(&json!({"items": []})), None);
        assert!(matches!(
            bin_size_from_document(&json!({"bin_size": {"depth": 1}})),
            Some(Err(_))
        ));
    }

    #[test]
    fn wire_placed_item_reads_packing_order_alias() {
        let item: WirePlacedItem = serde_json::from_value(json!({
            "id": 4, "request_id": 1, "x": 0, "y": 1, "z": 2,
            "length": 3, "width": 2, "height": 1, "rotation": 1, "packing_order": 5
        }))
        .unwrap();
        assert_eq!(item.pack_order, Some(5));
        let placed = item.into_placed(5);
        assert_eq!(placed.position, Vec3::new(0.0, 1.0, 2.0));
        assert_eq!(placed.request_group_id, Some(1));
    }
}
