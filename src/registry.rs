//! Item registry.
//!
//! Owns the requested items of a session. A request group (`request_group_id`)
//! with quantity `q` expands into `q` items with distinct process-unique ids.
//! The id counter only ever moves forward, even across `clear()` and imports.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;
use utoipa::ToSchema;

use crate::formats::BulkItemRecord;
use crate::model::{Dimensions, Item, RecordIssue, RotationAxisCount, ValidationError};
use crate::types::Dimensional;

/// A validated request group, ready for expansion.
#[derive(Clone, Debug, PartialEq)]
pub struct ItemGroupSpec {
    pub dimensions: Dimensions,
    pub request_group_id: i64,
    pub rotation_axis_count: RotationAxisCount,
    pub quantity: u32,
}

/// Display projection of one request group.
///
/// `dimensions` and `rotation_axis_count` are those of the first item of the
/// group in insertion order.
#[derive(Clone, Debug, PartialEq, Serialize, ToSchema)]
pub struct GroupSummary {
    pub request_group_id: i64,
    pub dimensions: Dimensions,
    #[schema(value_type = u8)]
    pub rotation_axis_count: RotationAxisCount,
    pub count: usize,
}

/// Request groups ordered by first appearance.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GroupedView {
    groups: Vec<GroupSummary>,
}

impl GroupedView {
    pub fn get(&self, request_group_id: i64) -> Option<&GroupSummary> {
        self.groups
            .iter()
            .find(|g| g.request_group_id == request_group_id)
    }

    pub fn contains(&self, request_group_id: i64) -> bool {
        self.get(request_group_id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &GroupSummary> {
        self.groups.iter()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn into_groups(self) -> Vec<GroupSummary> {
        self.groups
    }
}

/// Items that exceed the bin along at least one axis.
#[derive(Clone, Debug, PartialEq, Serialize, ToSchema)]
pub struct BinValidationReport {
    pub oversized: Vec<Item>,
}

impl BinValidationReport {
    pub fn is_valid(&self) -> bool {
        self.oversized.is_empty()
    }
}

/// Result of a bulk import.
#[derive(Clone, Debug, PartialEq, Serialize, ToSchema)]
pub struct ImportSummary {
    pub items_added: usize,
    pub groups: usize,
}

/// The canonical set of requested items.
#[derive(Clone, Debug)]
pub struct ItemRegistry {
    items: Vec<Item>,
    next_item_id: u64,
    original_input: Option<Value>,
}

impl Default for ItemRegistry {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            next_item_id: 1,
            original_input: None,
        }
    }
}

impl ItemRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a request group and expands it into `quantity` items.
    ///
    /// Fails if a dimension is not positive, `quantity` is zero or the
    /// request group is already present.
    pub fn add_group(
        &mut self,
        dimensions: Dimensions,
        request_group_id: i64,
        rotation_axis_count: RotationAxisCount,
        quantity: u32,
    ) -> Result<Vec<Item>, ValidationError> {
        dimensions.validate("Item")?;
        if quantity < 1 {
            return Err(ValidationError::InvalidQuantity(format!(
                "quantity must be at least 1, got: {}",
                quantity
            )));
        }
        if self.contains_group(request_group_id) {
            return Err(ValidationError::DuplicateRequestGroup(request_group_id));
        }

        let added = self.expand(&ItemGroupSpec {
            dimensions,
            request_group_id,
            rotation_axis_count,
            quantity,
        });
        self.items.extend(added.iter().cloned());
        Ok(added)
    }

    /// Removes every item of a request group and returns how many were removed.
    pub fn remove_group(&mut self, request_group_id: i64) -> usize {
        let before = self.items.len();
        self.items
            .retain(|item| item.request_group_id != request_group_id);
        before - self.items.len()
    }

    /// Removes a single item by its unique id.
    pub fn remove_item(&mut self, id: u64) -> bool {
        let before = self.items.len();
        self.items.retain(|item| item.id != id);
        before != self.items.len()
    }

    /// Empties the registry. The id counter is left untouched.
    pub fn clear(&mut self) {
        self.items.clear();
        self.original_input = None;
    }

    /// Replaces the registry contents with a bulk item collection.
    ///
    /// Every offending record is reported; on failure nothing changes.
    pub fn load_from_bulk_description(
        &mut self,
        records: &[BulkItemRecord],
    ) -> Result<ImportSummary, ValidationError> {
        self.load_records(records.iter().cloned().map(Ok), None)
    }

    /// Imports a JSON document with an `items` array.
    ///
    /// Records that do not even deserialize are reported together with the
    /// records that miss fields. The document is kept for re-export.
    pub fn load_from_json(&mut self, document: &Value) -> Result<ImportSummary, ValidationError> {
        let records = document
            .get("items")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                ValidationError::InvalidImport(vec![RecordIssue {
                    index: 0,
                    reason: "items array is required".to_string(),
                }])
            })?;

        let parsed = records.iter().map(|raw| {
            serde_json::from_value::<BulkItemRecord>(raw.clone()).map_err(|err| err.to_string())
        });
        self.load_records(parsed, Some(document.clone()))
    }

    fn load_records(
        &mut self,
        records: impl Iterator<Item = Result<BulkItemRecord, String>>,
        original_input: Option<Value>,
    ) -> Result<ImportSummary, ValidationError> {
        let mut specs = Vec::new();
        let mut issues = Vec::new();
        for (index, record) in records.enumerate() {
            match record.and_then(|r| r.normalize()) {
                Ok(spec) => specs.push(spec),
                Err(reason) => issues.push(RecordIssue { index, reason }),
            }
        }
        if !issues.is_empty() {
            return Err(ValidationError::InvalidImport(issues));
        }

        warn_inconsistent_groups(&specs);

        self.items.clear();
        for spec in &specs {
            let added = self.expand(spec);
            self.items.extend(added);
        }
        self.original_input = original_input;

        let summary = ImportSummary {
            items_added: self.items.len(),
            groups: self.grouped_view().len(),
        };
        println!(
            "📥 Imported {} items in {} request groups",
            summary.items_added, summary.groups
        );
        Ok(summary)
    }

    /// Groups items by request group in order of first appearance.
    pub fn grouped_view(&self) -> GroupedView {
        let mut groups: Vec<GroupSummary> = Vec::new();
        let mut index: HashMap<i64, usize> = HashMap::new();

        for item in &self.items {
            match index.get(&item.request_group_id) {
                Some(&pos) => groups[pos].count += 1,
                None => {
                    index.insert(item.request_group_id, groups.len());
                    groups.push(GroupSummary {
                        request_group_id: item.request_group_id,
                        dimensions: item.dimensions,
                        rotation_axis_count: item.rotation_axis_count,
                        count: 1,
                    });
                }
            }
        }

        GroupedView { groups }
    }

    /// Reports items larger than the bin along any axis. Pure query.
    pub fn validate_against(&self, bin: &Dimensions) -> BinValidationReport {
        BinValidationReport {
            oversized: self
                .items
                .iter()
                .filter(|item| item.exceeds(bin))
                .cloned()
                .collect(),
        }
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn next_item_id(&self) -> u64 {
        self.next_item_id
    }

    /// The last imported document, if the registry was loaded from JSON.
    pub fn original_input(&self) -> Option<&Value> {
        self.original_input.as_ref()
    }

    fn contains_group(&self, request_group_id: i64) -> bool {
        self.items
            .iter()
            .any(|item| item.request_group_id == request_group_id)
    }

    fn expand(&mut self, spec: &ItemGroupSpec) -> Vec<Item> {
        (0..spec.quantity)
            .map(|_| {
                let id = self.next_item_id;
                self.next_item_id += 1;
                Item {
                    id,
                    request_group_id: spec.request_group_id,
                    dimensions: spec.dimensions,
                    rotation_axis_count: spec.rotation_axis_count,
                }
            })
            .collect()
    }
}

/// Logs request groups whose records disagree on dimensions.
///
/// The import still proceeds; the grouped view shows the first record.
fn warn_inconsistent_groups(specs: &[ItemGroupSpec]) {
    let mut first: HashMap<i64, &ItemGroupSpec> = HashMap::new();
    for spec in specs {
        match first.get(&spec.request_group_id) {
            Some(seen)
                if seen.dimensions != spec.dimensions
                    || seen.rotation_axis_count != spec.rotation_axis_count =>
            {
                eprintln!(
                    "⚠️ Request group {} has records with differing dimensions; grouped view uses the first record",
                    spec.request_group_id
                );
            }
            Some(_) => {}
            None => {
                first.insert(spec.request_group_id, spec);
            }
        }
    }
}
