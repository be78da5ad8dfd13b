//! Client for the external packing algorithm service.
//!
//! The service speaks JSON over HTTP. Non-2xx status codes, non-JSON bodies
//! and `success: false` answers are all reported as `GatewayFailure`.

use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use utoipa::ToSchema;

use crate::formats::{WireLeftoverItem, WirePlacedItem, WireRequestItem};
use crate::model::{Dimensions, Item, LeftoverItem, PlacedItem};
use crate::training::{
    ScenarioCollection, SyntheticParams, SyntheticScenarios, TrainingConfig, TrainingOutcome,
};
use crate::weights::WeightSet;

pub const DEFAULT_GATEWAY_URL: &str = "localhost:3000";
pub const DEFAULT_GATEWAY_TIMEOUT_SECS: u64 = 30;

/// Length of the body excerpt quoted for unexpected content types.
const BODY_EXCERPT_LEN: usize = 200;

/// The service could not be reached or rejected the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayFailure {
    pub message: String,
}

impl GatewayFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for GatewayFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Algorithm service failure: {}", self.message)
    }
}

impl std::error::Error for GatewayFailure {}

impl From<reqwest::Error> for GatewayFailure {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayFailure::new("Request timeout")
        } else if err.is_connect() {
            GatewayFailure::new(format!("Unable to connect to the algorithm service: {err}"))
        } else {
            GatewayFailure::new(err.to_string())
        }
    }
}

/// Snapshot of everything a packing run needs.
#[derive(Debug, Clone, PartialEq)]
pub struct PackRequest {
    pub bin: Dimensions,
    pub items: Vec<Item>,
    pub weights: WeightSet,
}

impl PackRequest {
    /// Request body as the service expects it.
    pub fn to_body(&self) -> Value {
        let items: Vec<WireRequestItem> = self.items.iter().map(WireRequestItem::from).collect();
        json!({
            "items": items,
            "bin_size": self.bin,
            "algorithm_weights": self.weights,
            "algorithm_steps": true,
        })
    }
}

/// Placements returned by the service, ordered by `pack_order`.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayPackResult {
    pub placed: Vec<PlacedItem>,
    pub leftover: Vec<LeftoverItem>,
    pub utilization: Option<f64>,
    pub packing_time_secs: Option<f64>,
}

/// Outcome of an availability check. Never an error.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ProbeResult {
    pub available: bool,
    pub message: String,
    #[schema(value_type = Object, nullable = true)]
    pub info: Option<Value>,
}

/// Operations offered by the packing algorithm service.
#[allow(async_fn_in_trait)]
pub trait AlgorithmGateway {
    async fn pack(&self, request: &PackRequest) -> Result<GatewayPackResult, GatewayFailure>;

    async fn train(
        &self,
        scenarios: &ScenarioCollection,
        initial_weights: &WeightSet,
        config: &TrainingConfig,
    ) -> Result<TrainingOutcome, GatewayFailure>;

    async fn generate_synthetic_scenarios(
        &self,
        params: &SyntheticParams,
    ) -> Result<SyntheticScenarios, GatewayFailure>;

    async fn probe(&self, base_url: &str) -> ProbeResult;
}

/// Adds `http://` when no scheme is given and strips trailing slashes.
pub fn normalize_base_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    }
}

fn user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("packing-dashboard/{version}")
}

/// `AlgorithmGateway` over reqwest.
#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: reqwest::Client,
    base_url: String,
}

impl HttpGateway {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, GatewayFailure> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent())
            .build()?;
        Ok(Self {
            client,
            base_url: normalize_base_url(base_url),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post_json(&self, base_url: &str, path: &str, body: &Value) -> Result<Value, GatewayFailure> {
        let url = format!("{}{}", base_url, path);
        let response = self
            .client
            .post(&url)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayFailure::new(format!(
                "HTTP {}: {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown status")
            )));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if !content_type.contains("application/json") {
            let text = response.text().await.unwrap_or_default();
            let excerpt: String = text.chars().take(BODY_EXCERPT_LEN).collect();
            return Err(GatewayFailure::new(format!(
                "Expected JSON response, got: {}. Response: {}",
                if content_type.is_empty() { "none" } else { content_type.as_str() },
                excerpt
            )));
        }

        let value: Value = response
            .json()
            .await
            .map_err(|err| GatewayFailure::new(format!("Invalid JSON response: {err}")))?;
        reject_unsuccessful(value)
    }
}

/// Turns `success: false` answers into failures.
fn reject_unsuccessful(value: Value) -> Result<Value, GatewayFailure> {
    if value.get("success").and_then(Value::as_bool) == Some(false) {
        let message = value
            .get("message")
            .or_else(|| value.get("error"))
            .and_then(Value::as_str)
            .unwrap_or("Request failed");
        return Err(GatewayFailure::new(message));
    }
    Ok(value)
}

impl AlgorithmGateway for HttpGateway {
    async fn pack(&self, request: &PackRequest) -> Result<GatewayPackResult, GatewayFailure> {
        let value = self
            .post_json(&self.base_url, "/pack", &request.to_body())
            .await?;
        parse_pack_response(value)
    }

    async fn train(
        &self,
        scenarios: &ScenarioCollection,
        initial_weights: &WeightSet,
        config: &TrainingConfig,
    ) -> Result<TrainingOutcome, GatewayFailure> {
        let body = json!({
            "training_data": scenarios,
            "initial_weights": initial_weights,
            "training_config": config,
        });
        let value = self.post_json(&self.base_url, "/training", &body).await?;
        parse_training_response(value)
    }

    async fn generate_synthetic_scenarios(
        &self,
        params: &SyntheticParams,
    ) -> Result<SyntheticScenarios, GatewayFailure> {
        let body = json!({
            "scenarios": params.scenarios,
            "num_items": params.num_items,
            "bin_size": params.bin_size,
            "n_unique": params.n_unique,
            "seed": params.seed,
            "include_weights": params.include_weights,
        });
        let value = self.post_json(&self.base_url, "/fake_data", &body).await?;
        parse_synthetic_response(value)
    }

    async fn probe(&self, base_url: &str) -> ProbeResult {
        let base_url = normalize_base_url(base_url);
        let body = json!({ "base_url": base_url });
        match self.post_json(&base_url, "/check_endpoint", &body).await {
            Ok(value) => ProbeResult {
                available: value
                    .get("success")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
                message: value
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("Endpoint check completed")
                    .to_string(),
                info: value.get("endpoint_info").filter(|v| !v.is_null()).cloned(),
            },
            Err(failure) => ProbeResult {
                available: false,
                message: failure.message,
                info: None,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct PackResponseBody {
    packed_items: Vec<WirePlacedItem>,
    #[serde(default)]
    leftover_items: Vec<WireLeftoverItem>,
    #[serde(default)]
    utilization: Option<f64>,
    #[serde(default)]
    packing_time: Option<f64>,
    #[serde(default)]
    packing_steps: Vec<PackingStepRecord>,
}

#[derive(Debug, Deserialize)]
struct PackingStepRecord {
    #[serde(default)]
    item_id: Option<u64>,
}

/// Parses a `/pack` answer and assigns the pack order of every placement.
pub fn parse_pack_response(value: Value) -> Result<GatewayPackResult, GatewayFailure> {
    let body: PackResponseBody = serde_json::from_value(value)
        .map_err(|err| GatewayFailure::new(format!("Invalid packing response: {err}")))?;

    let step_ids: Vec<Option<u64>> = body.packing_steps.iter().map(|s| s.item_id).collect();
    let mut placed: Vec<PlacedItem> = body
        .packed_items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            let order = resolve_pack_order(&item, index, &step_ids);
            item.into_placed(order)
        })
        .collect();
    placed.sort_by_key(|item| (item.pack_order, item.id));

    Ok(GatewayPackResult {
        placed,
        leftover: body.leftover_items.into_iter().map(LeftoverItem::from).collect(),
        utilization: body.utilization.filter(|u| u.is_finite()),
        packing_time_secs: body.packing_time.filter(|t| t.is_finite()),
    })
}

/// Explicit order first, then the position in `packing_steps`, then the list position.
fn resolve_pack_order(item: &WirePlacedItem, index: usize, step_ids: &[Option<u64>]) -> u32 {
    item.pack_order
        .filter(|order| *order > 0)
        .or_else(|| {
            step_ids
                .iter()
                .position(|id| *id == Some(item.id))
                .map(|pos| pos as u32 + 1)
        })
        .unwrap_or(index as u32 + 1)
}

fn parse_training_response(value: Value) -> Result<TrainingOutcome, GatewayFailure> {
    let weights = value
        .get("optimized_weights")
        .and_then(Value::as_object)
        .ok_or_else(|| GatewayFailure::new("Missing required fields: optimized_weights"))?;
    let update = WeightSet::from_partial(weights);
    Ok(TrainingOutcome {
        optimized_weights: update.accepted,
        rejected_keys: update.rejected_keys,
        training_history: value.get("training_history").cloned(),
    })
}

fn parse_synthetic_response(value: Value) -> Result<SyntheticScenarios, GatewayFailure> {
    let scenarios = value
        .get("training_data")
        .or_else(|| value.get("scenarios"))
        .filter(|v| v.is_array())
        .ok_or_else(|| GatewayFailure::new("API response does not contain training_data"))?;
    let training_data = ScenarioCollection::from_document(scenarios)
        .map_err(|err| GatewayFailure::new(err.to_string()))?;
    Ok(SyntheticScenarios {
        statistics: training_data.statistics(),
        training_data,
        training_config: value.get("training_config").cloned(),
    })
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Gateway answering from canned results.
    #[derive(Default)]
    pub struct StubGateway {
        pub pack_result: Mutex<Option<Result<GatewayPackResult, GatewayFailure>>>,
        pub requests: Mutex<Vec<PackRequest>>,
    }

    impl StubGateway {
        pub fn answering(result: Result<GatewayPackResult, GatewayFailure>) -> Self {
            Self {
                pack_result: Mutex::new(Some(result)),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    impl AlgorithmGateway for StubGateway {
        async fn pack(&self, request: &PackRequest) -> Result<GatewayPackResult, GatewayFailure> {
            self.requests.lock().unwrap().push(request.clone());
            self.pack_result
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(|| Err(GatewayFailure::new("no canned result")))
        }

        async fn train(
            &self,
            _scenarios: &ScenarioCollection,
            initial_weights: &WeightSet,
            _config: &TrainingConfig,
        ) -> Result<TrainingOutcome, GatewayFailure> {
            let mut optimized = *initial_weights;
            optimized.set(crate::weights::WeightKey::Lifo, 12.0);
            Ok(TrainingOutcome {
                optimized_weights: optimized,
                rejected_keys: Vec::new(),
                training_history: None,
            })
        }

        async fn generate_synthetic_scenarios(
            &self,
            params: &SyntheticParams,
        ) -> Result<SyntheticScenarios, GatewayFailure> {
            let scenarios: Vec<Value> = (0..params.scenarios)
                .map(|_| json!({"items": [], "bin_size": params.bin_size}))
                .collect();
            let training_data = ScenarioCollection::from_document(&Value::from(scenarios))
                .map_err(|err| GatewayFailure::new(err.to_string()))?;
            Ok(SyntheticScenarios {
                statistics: training_data.statistics(),
                training_data,
                training_config: None,
            })
        }

        async fn probe(&self, base_url: &str) -> ProbeResult {
            ProbeResult {
                available: true,
                message: format!("stub at {}", normalize_base_url(base_url)),
                info: None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RotationAxisCount;
    use crate::weights::WeightKey;

    #[test]
    fn base_url_gets_scheme_and_loses_trailing_slash() {
        assert_eq!(normalize_base_url("localhost:3000"), "http://localhost:3000");
        assert_eq!(normalize_base_url("http://example.org/"), "http://example.org");
        assert_eq!(normalize_base_url(" https://api.example.org// "), "https://api.example.org");
    }

    #[test]
    fn pack_body_uses_wire_format() {
        let request = PackRequest {
            bin: Dimensions::new(10.0, 8.0, 6.0),
            items: vec![Item {
                id: 1,
                request_group_id: 5,
                dimensions: Dimensions::new(3.0, 2.0, 1.0),
                rotation_axis_count: RotationAxisCount::Four,
            }],
            weights: WeightSet::defaults(),
        };
        let body = request.to_body();
        assert_eq!(body["items"][0]["request_id"], json!(5));
        assert_eq!(body["items"][0]["number_axis"], json!(4));
        assert_eq!(body["bin_size"]["length"], json!(10.0));
        assert_eq!(body["algorithm_weights"]["W_lifo"], json!(10.0));
        assert_eq!(body["algorithm_steps"], json!(true));
    }

    #[test]
    fn pack_order_falls_back_to_steps_then_position() {
        let value = json!({
            "success": true,
            "packed_items": [
                {"id": 10, "x": 0, "y": 0, "z": 0, "length": 1, "width": 1, "height": 1},
                {"id": 11, "x": 1, "y": 0, "z": 0, "length": 1, "width": 1, "height": 1},
                {"id": 12, "x": 2, "y": 0, "z": 0, "length": 1, "width": 1, "height": 1, "pack_order": 7}
            ],
            "leftover_items": [{"id": 13, "request_id": 2, "length": 20, "width": 1, "height": 1}],
            "utilization": 42.5,
            "packing_steps": [{"item_id": 11}, {"item_id": 99}]
        });
        let result = parse_pack_response(value).unwrap();
        let orders: Vec<(u64, u32)> = result.placed.iter().map(|p| (p.id, p.pack_order)).collect();
        assert_eq!(orders, vec![(10, 1), (11, 1), (12, 7)]);
        assert_eq!(result.leftover.len(), 1);
        assert_eq!(result.utilization, Some(42.5));
        assert_eq!(result.packing_time_secs, None);
    }

    #[test]
    fn pack_response_without_packed_items_is_a_failure() {
        let err = parse_pack_response(json!({"success": true})).unwrap_err();
        assert!(err.message.contains("packed_items"), "unexpected message: {}", err.message);
    }

    #[test]
    fn unsuccessful_answers_become_failures() {
        let err = reject_unsuccessful(json!({"success": false, "message": "No items to pack"}))
            .unwrap_err();
        assert_eq!(err.message, "No items to pack");
        assert!(reject_unsuccessful(json!({"packed_items": []})).is_ok());
    }

    #[test]
    fn training_response_maps_weights() {
        let outcome = parse_training_response(json!({
            "optimized_weights": {"W_lifo": 11.0, "W_unknown": 1.0},
            "training_history": [{"step": 1}]
        }))
        .unwrap();
        assert_eq!(outcome.optimized_weights.get(WeightKey::Lifo), 11.0);
        assert_eq!(outcome.rejected_keys, vec!["W_unknown".to_string()]);
        assert!(outcome.training_history.is_some());

        assert!(parse_training_response(json!({"training_history": []})).is_err());
    }

    #[test]
    fn synthetic_response_accepts_both_array_names() {
        let scenario = json!({"items": [{"length": 1, "width": 1, "height": 1, "request_id": 1}],
                              "bin_size": {"length": 5, "width": 5, "height": 5}});
        let a = parse_synthetic_response(json!({"training_data": [scenario.clone()]})).unwrap();
        let b = parse_synthetic_response(json!({"scenarios": [scenario]})).unwrap();
        assert_eq!(a.training_data, b.training_data);
        assert_eq!(a.statistics.total_items, 1);
        assert!(parse_synthetic_response(json!({"message": "ok"})).is_err());
    }

    #[tokio::test]
    async fn probe_of_unreachable_service_reports_unavailable() {
        let gateway = HttpGateway::new("127.0.0.1:9", Duration::from_millis(500)).unwrap();
        let result = gateway.probe("127.0.0.1:9/").await;
        assert!(!result.available);
        assert!(result.info.is_none());
    }
}
