//! Training parameters and scenario collections.
//!
//! Training itself runs in the packing service. This module only validates
//! what is sent there and summarizes the scenarios a user loaded or generated.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::formats::BulkItemRecord;
use crate::model::{Dimensions, RecordIssue, ValidationError};
use crate::weights::WeightSet;

/// Metric the service optimizes the weights for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum EvaluationMetric {
    #[default]
    Efficiency,
    Utilization,
    Cost,
}

/// Parameters of one training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct TrainingConfig {
    pub num_steps: u32,
    pub max_change: f64,
    pub evaluation_metric: EvaluationMetric,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            num_steps: 3,
            max_change: 0.3,
            evaluation_metric: EvaluationMetric::default(),
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !(1..=20).contains(&self.num_steps) {
            return Err(ValidationError::InvalidConfiguration(format!(
                "num_steps must be between 1 and 20, got: {}",
                self.num_steps
            )));
        }
        if !(0.1..=1.0).contains(&self.max_change) {
            return Err(ValidationError::InvalidConfiguration(format!(
                "max_change must be between 0.1 and 1.0, got: {}",
                self.max_change
            )));
        }
        Ok(())
    }
}

/// Parameters for synthetic scenario generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SyntheticParams {
    #[serde(default = "default_scenarios")]
    pub scenarios: u32,
    #[serde(default = "default_num_items")]
    pub num_items: u32,
    #[serde(default = "default_n_unique")]
    pub n_unique: u32,
    #[serde(default)]
    pub seed: Option<u64>,
    pub bin_size: Dimensions,
    #[serde(default)]
    pub include_weights: bool,
}

fn default_scenarios() -> u32 {
    3
}

fn default_num_items() -> u32 {
    10
}

fn default_n_unique() -> u32 {
    3
}

impl SyntheticParams {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let invalid = |msg: String| Err(ValidationError::InvalidConfiguration(msg));
        if !(1..=50).contains(&self.scenarios) {
            return invalid(format!(
                "Number of scenarios must be between 1 and 50, got: {}",
                self.scenarios
            ));
        }
        if !(1..=100).contains(&self.num_items) {
            return invalid(format!(
                "Items per scenario must be between 1 and 100, got: {}",
                self.num_items
            ));
        }
        if !(1..=20).contains(&self.n_unique) {
            return invalid(format!(
                "Unique item types must be between 1 and 20, got: {}",
                self.n_unique
            ));
        }
        if self.n_unique > self.num_items {
            return invalid("Unique item types cannot exceed total items per scenario".to_string());
        }
        self.bin_size.validate("Bin")
    }
}

/// Summary of a scenario collection.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct TrainingStatistics {
    pub scenario_count: usize,
    pub total_items: usize,
    /// Rounded to one decimal.
    pub average_items_per_scenario: f64,
    pub unique_request_ids: usize,
}

/// Training scenarios, kept as sent by the user or the service.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ScenarioCollection {
    scenarios: Vec<Value>,
}

impl ScenarioCollection {
    /// Accepts `{"training_data": [...]}` or a bare array.
    pub fn from_document(document: &Value) -> Result<Self, ValidationError> {
        let scenarios = document
            .get("training_data")
            .and_then(Value::as_array)
            .or_else(|| document.as_array())
            .ok_or_else(|| {
                ValidationError::InvalidConfiguration(
                    "No valid training scenarios found".to_string(),
                )
            })?;
        Ok(Self {
            scenarios: scenarios.clone(),
        })
    }

    pub fn len(&self) -> usize {
        self.scenarios.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenarios.is_empty()
    }

    pub fn as_slice(&self) -> &[Value] {
        &self.scenarios
    }

    /// Checks every scenario; all problems are reported, one issue per scenario.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.scenarios.is_empty() {
            return Err(ValidationError::InvalidConfiguration(
                "No training data available".to_string(),
            ));
        }

        let issues: Vec<RecordIssue> = self
            .scenarios
            .iter()
            .enumerate()
            .filter_map(|(index, scenario)| {
                let problems = scenario_problems(scenario);
                (!problems.is_empty()).then(|| RecordIssue {
                    index,
                    reason: problems.join(", "),
                })
            })
            .collect();

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::InvalidImport(issues))
        }
    }

    pub fn statistics(&self) -> TrainingStatistics {
        let mut total_items = 0;
        let mut request_ids = HashSet::new();
        for item in self.scenarios.iter().flat_map(scenario_items) {
            total_items += 1;
            if let Some(id) = item.get("request_id").filter(|id| !id.is_null()) {
                request_ids.insert(id.to_string());
            }
        }

        let average = if self.scenarios.is_empty() {
            0.0
        } else {
            (total_items as f64 / self.scenarios.len() as f64 * 10.0).round() / 10.0
        };

        TrainingStatistics {
            scenario_count: self.scenarios.len(),
            total_items,
            average_items_per_scenario: average,
            unique_request_ids: request_ids.len(),
        }
    }
}

fn scenario_items(scenario: &Value) -> impl Iterator<Item = &Value> {
    scenario
        .get("items")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

fn scenario_problems(scenario: &Value) -> Vec<String> {
    let mut problems = Vec::new();

    match scenario.get("items").and_then(Value::as_array) {
        Some(items) if !items.is_empty() => {
            for (index, raw) in items.iter().enumerate() {
                let normalized = serde_json::from_value::<BulkItemRecord>(raw.clone())
                    .map_err(|err| err.to_string())
                    .and_then(|record| record.normalize());
                if let Err(reason) = normalized {
                    problems.push(format!("item {}: {}", index, reason));
                }
            }
        }
        _ => problems.push("scenario must have at least one item".to_string()),
    }

    match scenario.get("bin_size") {
        Some(raw) => {
            let valid = serde_json::from_value::<Dimensions>(raw.clone())
                .map_err(|err| err.to_string())
                .and_then(|bin| bin.validate("Bin").map_err(|err| err.to_string()));
            if let Err(reason) = valid {
                problems.push(format!("bin_size: {}", reason));
            }
        }
        None => problems.push("scenario must have bin_size".to_string()),
    }

    problems
}

/// Result of a training run in the service.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct TrainingOutcome {
    #[schema(value_type = Object)]
    pub optimized_weights: WeightSet,
    /// Keys of the returned weights that were not recognized.
    pub rejected_keys: Vec<String>,
    #[schema(value_type = Object, nullable = true)]
    pub training_history: Option<Value>,
}

/// Scenarios generated by the service.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct SyntheticScenarios {
    #[schema(value_type = Vec<Object>)]
    pub training_data: ScenarioCollection,
    pub statistics: TrainingStatistics,
    #[schema(value_type = Object, nullable = true)]
    pub training_config: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn example_document() -> Value {
        json!({
            "training_data": [
                {
                    "items": [
                        {"length": 3, "width": 2, "height": 1, "request_id": 1, "quantity": 2},
                        {"length": 2, "width": 2, "height": 2, "request_id": 2, "number_axis": 6}
                    ],
                    "bin_size": {"length": 10, "width": 8, "height": 6}
                },
                {
                    "items": [
                        {"length": 4, "width": 3, "height": 2, "request_id": 1}
                    ],
                    "bin_size": {"L": 10, "W": 8, "H": 6}
                }
            ]
        })
    }

    #[test]
    fn training_config_defaults_and_bounds() {
        let config: TrainingConfig = serde_json::from_value(json!({})).unwrap();
        assert_eq!(config, TrainingConfig::default());
        assert!(config.validate().is_ok());

        let metric: TrainingConfig =
            serde_json::from_value(json!({"evaluation_metric": "cost"})).unwrap();
        assert_eq!(metric.evaluation_metric, EvaluationMetric::Cost);

        for bad in [json!({"num_steps": 0}), json!({"num_steps": 21}), json!({"max_change": 0.05})] {
            let config: TrainingConfig = serde_json::from_value(bad.clone()).unwrap();
            assert!(config.validate().is_err(), "{} should be rejected", bad);
        }
    }

    #[test]
    fn synthetic_params_reject_more_unique_types_than_items() {
        let params: SyntheticParams = serde_json::from_value(json!({
            "num_items": 2, "n_unique": 3, "bin_size": {"length": 10, "width": 8, "height": 6}
        }))
        .unwrap();
        assert_eq!(params.scenarios, 3);
        assert!(params.validate().is_err());

        let ok = SyntheticParams { n_unique: 2, ..params };
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn collection_accepts_wrapped_and_bare_arrays() {
        let wrapped = ScenarioCollection::from_document(&example_document()).unwrap();
        assert_eq!(wrapped.len(), 2);

        let bare = ScenarioCollection::from_document(&example_document()["training_data"]).unwrap();
        assert_eq!(bare, wrapped);

        assert!(ScenarioCollection::from_document(&json!({"scenarios": 3})).is_err());
    }

    #[test]
    fn statistics_count_items_and_request_ids() {
        let collection = ScenarioCollection::from_document(&example_document()).unwrap();
        assert!(collection.validate().is_ok());

        let stats = collection.statistics();
        assert_eq!(stats.scenario_count, 2);
        assert_eq!(stats.total_items, 3);
        assert_eq!(stats.average_items_per_scenario, 1.5);
        assert_eq!(stats.unique_request_ids, 2);
    }

    #[test]
    fn validation_reports_every_broken_scenario() {
        let collection = ScenarioCollection::from_document(&json!([
            {"items": [], "bin_size": {"length": 10, "width": 8, "height": 6}},
            {"items": [{"length": 1, "width": 1, "height": 1, "request_id": 1}],
             "bin_size": {"length": 10, "width": 8, "height": 6}},
            {"items": [{"length": 1, "width": 1, "height": 0}]}
        ]))
        .unwrap();

        match collection.validate() {
            Err(ValidationError::InvalidImport(issues)) => {
                let indices: Vec<usize> = issues.iter().map(|i| i.index).collect();
                assert_eq!(indices, vec![0, 2]);
                assert!(issues[1].reason.contains("request_id"));
                assert!(issues[1].reason.contains("bin_size"));
            }
            other => panic!("expected an import error, got {:?}", other),
        }
    }
}
