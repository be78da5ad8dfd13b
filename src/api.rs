//! REST API for the packing dashboard.
//!
//! Exposes the session facade over HTTP: item management, weights, packing
//! runs, step playback, camera state and the training helpers of the packing
//! service. Frames of the playback are streamed to the browser as Server-Sent
//! Events. Uses Axum as the web framework and supports CORS.

use std::convert::Infallible;
use std::sync::{Arc, OnceLock};

use axum::extract::rejection::JsonRejection;
use axum::extract::{Json, Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::{
    Router,
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{delete, get, patch, post},
};
use serde::{Deserialize, Serialize};
#[allow(unused_imports)]
use serde_json::json;
use serde_json::{Map, Value};
use tokio::sync::{Mutex, broadcast};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tower_http::cors::{Any, CorsLayer};
use utoipa::{OpenApi, ToSchema};

use crate::config::ApiConfig;
use crate::formats::{
    BulkItemRecord, ExportInfo, ExportedItemGroup, ItemsExport, ItemsExportStatistics,
    PackingResultsBody, PackingResultsExport, PackingResultsStatistics, WeightsExport,
    WireLeftoverItem, WirePlacedItem, WireRequestItem,
};
use crate::gateway::{AlgorithmGateway, HttpGateway, ProbeResult, normalize_base_url};
use crate::model::{
    Dimensions, Item, LeftoverItem, PackingSession, PlacedItem, RecordIssue, ValidationError,
};
use crate::playback::{PlaybackCursor, PlaybackError, PlaybackStatistics};
use crate::registry::{BinValidationReport, GroupSummary, ImportSummary};
use crate::render::{Frame, LiveCamera, SceneDescription};
use crate::session::{ItemImportOutcome, SessionError, SessionFacade, SubmitOutcome};
use crate::training::{
    EvaluationMetric, ScenarioCollection, SyntheticParams, SyntheticScenarios, TrainingConfig,
    TrainingOutcome, TrainingStatistics,
};
use crate::types::Vec3;
use crate::viewport::CameraTransform;
use crate::weights::{WeightDifference, WeightSet, WeightUpdate};

/// Shared state of all handlers.
#[derive(Clone)]
pub struct ApiState {
    facade: Arc<Mutex<SessionFacade>>,
    gateway: Arc<HttpGateway>,
    live_camera: LiveCamera,
    frames: broadcast::Sender<Frame>,
    randomize_max_change: f64,
}

impl ApiState {
    pub fn new(
        facade: Arc<Mutex<SessionFacade>>,
        gateway: HttpGateway,
        live_camera: LiveCamera,
        frames: broadcast::Sender<Frame>,
        randomize_max_change: f64,
    ) -> Self {
        Self {
            facade,
            gateway: Arc::new(gateway),
            live_camera,
            frames,
            randomize_max_change,
        }
    }
}

static OPENAPI_DOC: OnceLock<utoipa::openapi::OpenApi> = OnceLock::new();

// SRI hashes verified against https://unpkg.com/swagger-ui-dist@5.17.14/ on 2025-10-29.
const SWAGGER_UI_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
    <head>
        <meta charset="utf-8" />
        <title>packing-dashboard API Docs</title>
        <link
            rel="stylesheet"
            href="https://unpkg.com/swagger-ui-dist@5.17.14/swagger-ui.css"
            integrity="sha384-wxLW6kwyHktdDGr6Pv1zgm/VGJh99lfUbzSn6HNHBENZlCN7W602k9VkGdxuFvPn"
            crossorigin="anonymous"
        />
    </head>
    <body>
        <div id="swagger-ui"></div>
        <script
            src="https://unpkg.com/swagger-ui-dist@5.17.14/swagger-ui-bundle.js"
            integrity="sha384-wmyclcVGX/WhUkdkATwhaK1X1JtiNrr2EoYJ+diV3vj4v6OC5yCeSu+yW13SYJep"
            crossorigin="anonymous"
        ></script>
        <script
            src="https://unpkg.com/swagger-ui-dist@5.17.14/swagger-ui-standalone-preset.js"
            integrity="sha384-2YH8WDRaj7V2OqU/trsmzSagmk/E2SutiCsGkdgoQwC9pNUJV1u/141DHB6jgs8t"
            crossorigin="anonymous"
        ></script>
        <script>
            window.onload = function () {
                const ui = SwaggerUIBundle({
                    url: "/docs/openapi.json",
                    dom_id: "#swagger-ui",
                    presets: [SwaggerUIBundle.presets.apis, SwaggerUIStandalonePreset],
                    layout: "StandaloneLayout",
                });
                window.ui = ui;
            };
        </script>
    </body>
    </html>"##;

fn openapi_doc() -> &'static utoipa::openapi::OpenApi {
    OPENAPI_DOC.get_or_init(ApiDoc::openapi)
}

/// Current items, grouped by request ID.
#[derive(Serialize, ToSchema)]
pub struct ItemsResponse {
    pub items: Vec<Item>,
    pub groups: Vec<GroupSummary>,
    pub next_item_id: u64,
}

#[derive(Serialize, ToSchema)]
pub struct RemovedResponse {
    pub removed: usize,
}

#[derive(Deserialize, ToSchema)]
#[schema(example = json!({ "bin_size": { "length": 120.0, "width": 100.0, "height": 80.0 } }))]
pub struct PackBody {
    pub bin_size: Dimensions,
}

/// Body of `PATCH /weights/{key}`. Numbers and numeric strings are accepted.
#[derive(Deserialize, ToSchema)]
#[schema(example = json!({ "value": 4.5 }))]
pub struct WeightValueBody {
    #[schema(value_type = Object)]
    pub value: Value,
}

#[derive(Deserialize, ToSchema)]
#[schema(example = json!({ "max_change": 0.3, "seed": 42, "apply": true }))]
pub struct RandomizeBody {
    #[serde(default)]
    #[schema(nullable = true)]
    pub max_change: Option<f64>,
    #[serde(default)]
    #[schema(nullable = true)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub apply: bool,
}

#[derive(Serialize, ToSchema)]
pub struct WeightDiffResponse {
    pub differences: Vec<WeightDifference>,
    pub rejected_keys: Vec<String>,
}

/// Cursor and progress of the step playback.
#[derive(Serialize, ToSchema)]
pub struct PlaybackState {
    pub cursor: PlaybackCursor,
    pub statistics: PlaybackStatistics,
}

#[derive(Deserialize, ToSchema)]
pub struct StepBody {
    pub delta: i64,
}

#[derive(Deserialize, ToSchema)]
pub struct SeekBody {
    pub index: i64,
}

#[derive(Deserialize, ToSchema)]
pub struct SpeedBody {
    pub step_interval_ms: u64,
}

#[derive(Serialize, ToSchema)]
pub struct CameraRecorded {
    pub recorded: bool,
}

#[derive(Deserialize, ToSchema)]
pub struct ProbeBody {
    /// Defaults to the configured service URL.
    #[serde(default)]
    #[schema(nullable = true)]
    pub base_url: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct TrainingBody {
    #[schema(value_type = Vec<Object>)]
    pub training_data: Vec<Value>,
    #[serde(default)]
    pub training_config: TrainingConfig,
}

#[derive(Serialize, ToSchema)]
struct ErrorResponse {
    error: String,
    details: String,
}

impl ErrorResponse {
    fn new(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: details.into(),
        }
    }
}

fn error_response(
    status: StatusCode,
    error: impl Into<String>,
    details: impl Into<String>,
) -> Response {
    (status, Json(ErrorResponse::new(error, details))).into_response()
}

fn json_deserialize_error(err: JsonRejection) -> Response {
    error_response(
        StatusCode::UNPROCESSABLE_ENTITY,
        "Invalid JSON data",
        err.to_string(),
    )
}

fn validation_error(details: impl Into<String>) -> Response {
    error_response(
        StatusCode::UNPROCESSABLE_ENTITY,
        "Invalid input data",
        details,
    )
}

fn playback_error(err: PlaybackError) -> Response {
    error_response(
        StatusCode::BAD_REQUEST,
        "Playback not available",
        err.to_string(),
    )
}

fn not_found(details: impl Into<String>) -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found", details)
}

fn session_error(err: SessionError) -> Response {
    match err {
        SessionError::Validation(err) => validation_error(err.to_string()),
        SessionError::Gateway(err) => {
            error_response(StatusCode::BAD_GATEWAY, "Algorithm service error", err.message)
        }
        // Superseded runs are expected; the client drops the answer silently.
        SessionError::StaleResponse { .. } => StatusCode::CONFLICT.into_response(),
    }
}

fn parse_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, Response> {
    payload
        .map(|Json(body)| body)
        .map_err(json_deserialize_error)
}

fn ok_json<T: Serialize>(body: T) -> Response {
    (StatusCode::OK, Json(body)).into_response()
}

async fn playback_state(state: &ApiState) -> PlaybackState {
    let facade = state.facade.lock().await;
    PlaybackState {
        cursor: facade.cursor(),
        statistics: facade.playback_statistics(),
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        handle_list_items,
        handle_add_items,
        handle_clear_items,
        handle_remove_item,
        handle_remove_group,
        handle_import_items,
        handle_export_items,
        handle_validate_items,
        handle_get_weights,
        handle_set_weights,
        handle_update_weight,
        handle_reset_weights,
        handle_randomize_weights,
        handle_diff_weights,
        handle_import_weights,
        handle_pack,
        handle_get_session,
        handle_export_session,
        handle_get_playback,
        handle_step,
        handle_seek,
        handle_play,
        handle_pause,
        handle_speed,
        handle_playback_stream,
        handle_record_camera,
        handle_clear_camera,
        handle_reset_camera,
        handle_probe,
        handle_training,
        handle_synthetic
    ),
    components(
        schemas(
            ItemsResponse,
            RemovedResponse,
            PackBody,
            WeightValueBody,
            RandomizeBody,
            WeightDiffResponse,
            PlaybackState,
            StepBody,
            SeekBody,
            SpeedBody,
            CameraRecorded,
            ProbeBody,
            TrainingBody,
            ErrorResponse,
            BulkItemRecord,
            Dimensions,
            Vec3,
            Item,
            PlacedItem,
            LeftoverItem,
            PackingSession,
            RecordIssue,
            GroupSummary,
            ImportSummary,
            BinValidationReport,
            ItemImportOutcome,
            ExportInfo,
            ExportedItemGroup,
            ItemsExport,
            ItemsExportStatistics,
            WeightsExport,
            WirePlacedItem,
            WireLeftoverItem,
            WireRequestItem,
            PackingResultsBody,
            PackingResultsStatistics,
            PackingResultsExport,
            WeightUpdate,
            WeightDifference,
            SubmitOutcome,
            PlaybackCursor,
            PlaybackStatistics,
            SceneDescription,
            Frame,
            CameraTransform,
            ProbeResult,
            EvaluationMetric,
            TrainingConfig,
            SyntheticParams,
            TrainingStatistics,
            TrainingOutcome,
            SyntheticScenarios
        )
    ),
    tags(
        (name = "items", description = "Item registry"),
        (name = "weights", description = "Algorithm weights"),
        (name = "packing", description = "Packing runs and their results"),
        (name = "playback", description = "Step-by-step replay of a packing run"),
        (name = "camera", description = "Camera state of the 3-D view"),
        (name = "service", description = "Packing service helpers")
    )
)]
struct ApiDoc;

/// Builds the router with all dashboard endpoints.
pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    Router::new()
        // Items
        .route(
            "/items",
            get(handle_list_items)
                .post(handle_add_items)
                .delete(handle_clear_items),
        )
        .route("/items/{id}", delete(handle_remove_item))
        .route("/items/groups/{request_group_id}", delete(handle_remove_group))
        .route("/items/import", post(handle_import_items))
        .route("/items/export", get(handle_export_items))
        .route("/items/validate", post(handle_validate_items))
        // Weights
        .route("/weights", get(handle_get_weights).put(handle_set_weights))
        .route("/weights/{key}", patch(handle_update_weight))
        .route("/weights/reset", post(handle_reset_weights))
        .route("/weights/randomize", post(handle_randomize_weights))
        .route("/weights/diff", post(handle_diff_weights))
        .route("/weights/import", post(handle_import_weights))
        // Packing
        .route("/pack", post(handle_pack))
        .route("/session", get(handle_get_session))
        .route("/session/export", get(handle_export_session))
        // Playback
        .route("/playback", get(handle_get_playback))
        .route("/playback/step", post(handle_step))
        .route("/playback/seek", post(handle_seek))
        .route("/playback/play", post(handle_play))
        .route("/playback/pause", post(handle_pause))
        .route("/playback/speed", post(handle_speed))
        .route("/playback/stream", get(handle_playback_stream))
        // Camera
        .route(
            "/camera",
            post(handle_record_camera).delete(handle_clear_camera),
        )
        .route("/camera/reset", post(handle_reset_camera))
        // Packing service
        .route("/gateway/probe", post(handle_probe))
        .route("/training", post(handle_training))
        .route("/training/synthetic", post(handle_synthetic))
        // API documentation
        .route("/docs/openapi.json", get(serve_openapi_json))
        .route("/docs", get(serve_openapi_ui))
        .layer(cors)
        .with_state(state)
}

/// Starts the API server.
///
/// Configures CORS for cross-origin requests from the frontend.
/// Blocks until the server is terminated.
pub async fn start_api_server(config: ApiConfig, state: ApiState) {
    let gateway_url = state.gateway.base_url().to_string();
    let app = router(state);

    let addr = config.socket_addr();
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            eprintln!("❌ Could not bind API server to {}: {}", addr, err);
            return;
        }
    };

    println!(
        "🚀 Server running on http://{}:{}",
        config.display_host(),
        config.port()
    );
    if config.binds_to_all_interfaces() {
        println!("💡 Local access: http://localhost:{}", config.port());
    }
    println!("🔗 Packing service: {}", gateway_url);
    println!("📦 API Endpoints:");
    println!("   - GET|POST|DELETE /items");
    println!("   - POST /items/import, GET /items/export, POST /items/validate");
    println!("   - GET|PUT /weights, PATCH /weights/{{key}}");
    println!("   - POST /pack, GET /session, GET /session/export");
    println!("   - GET /playback, GET /playback/stream");
    println!("   - POST|DELETE /camera, POST /camera/reset");
    println!("   - POST /gateway/probe, POST /training, POST /training/synthetic");
    println!("📑 Documentation:");
    println!("   - GET /docs");
    println!("   - GET /docs/openapi.json");

    if let Err(err) = axum::serve(listener, app).await {
        eprintln!("❌ API server terminated with an error: {err}");
    }
}

/// Handler for GET /items.
#[utoipa::path(
    get,
    path = "/items",
    responses((status = 200, description = "Current items", body = ItemsResponse)),
    tag = "items"
)]
async fn handle_list_items(State(state): State<ApiState>) -> Response {
    let facade = state.facade.lock().await;
    let registry = facade.registry();
    ok_json(ItemsResponse {
        items: registry.items().to_vec(),
        groups: facade.grouped_view().into_groups(),
        next_item_id: registry.next_item_id(),
    })
}

/// Handler for POST /items.
///
/// Adds `quantity` identical items sharing one request ID.
#[utoipa::path(
    post,
    path = "/items",
    request_body = BulkItemRecord,
    responses(
        (status = 201, description = "Items added", body = Vec<Item>),
        (status = UNPROCESSABLE_ENTITY, description = "Invalid item", body = ErrorResponse)
    ),
    tag = "items"
)]
async fn handle_add_items(
    State(state): State<ApiState>,
    payload: Result<Json<BulkItemRecord>, JsonRejection>,
) -> Response {
    let record = match parse_body(payload) {
        Ok(record) => record,
        Err(response) => return response,
    };
    let spec = match record.normalize() {
        Ok(spec) => spec,
        Err(reason) => return validation_error(reason),
    };

    let mut facade = state.facade.lock().await;
    match facade.add_group(
        spec.dimensions,
        spec.request_group_id,
        spec.rotation_axis_count,
        spec.quantity,
    ) {
        Ok(items) => {
            println!(
                "➕ Added {} items with request ID {}",
                items.len(),
                spec.request_group_id
            );
            (StatusCode::CREATED, Json(items)).into_response()
        }
        Err(err) => validation_error(err.to_string()),
    }
}

/// Handler for DELETE /items.
#[utoipa::path(
    delete,
    path = "/items",
    responses((status = 204, description = "All items removed")),
    tag = "items"
)]
async fn handle_clear_items(State(state): State<ApiState>) -> Response {
    state.facade.lock().await.clear_items();
    StatusCode::NO_CONTENT.into_response()
}

/// Handler for DELETE /items/{id}.
#[utoipa::path(
    delete,
    path = "/items/{id}",
    params(("id" = u64, Path, description = "Item ID")),
    responses(
        (status = 204, description = "Item removed"),
        (status = 404, description = "Unknown item", body = ErrorResponse)
    ),
    tag = "items"
)]
async fn handle_remove_item(State(state): State<ApiState>, Path(id): Path<u64>) -> Response {
    if state.facade.lock().await.remove_item(id) {
        StatusCode::NO_CONTENT.into_response()
    } else {
        not_found(format!("Item {} does not exist", id))
    }
}

/// Handler for DELETE /items/groups/{request_group_id}.
#[utoipa::path(
    delete,
    path = "/items/groups/{request_group_id}",
    params(("request_group_id" = i64, Path, description = "Request ID of the group")),
    responses(
        (status = 200, description = "Group removed, `removed` is 0 for an unknown request ID", body = RemovedResponse)
    ),
    tag = "items"
)]
async fn handle_remove_group(
    State(state): State<ApiState>,
    Path(request_group_id): Path<i64>,
) -> Response {
    let removed = state.facade.lock().await.remove_group(request_group_id);
    ok_json(RemovedResponse { removed })
}

/// Handler for POST /items/import.
///
/// Replaces all items with the ones of the document. Every offending record
/// is reported and nothing is changed in that case.
#[utoipa::path(
    post,
    path = "/items/import",
    request_body(content = Object, description = "Item document with an `items` array"),
    responses(
        (status = 200, description = "Items imported", body = ItemImportOutcome),
        (status = UNPROCESSABLE_ENTITY, description = "Invalid document", body = ErrorResponse)
    ),
    tag = "items"
)]
async fn handle_import_items(
    State(state): State<ApiState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Response {
    let document = match parse_body(payload) {
        Ok(document) => document,
        Err(response) => return response,
    };
    match state.facade.lock().await.import_items(&document) {
        Ok(outcome) => ok_json(outcome),
        Err(err) => validation_error(err.to_string()),
    }
}

/// Handler for GET /items/export.
#[utoipa::path(
    get,
    path = "/items/export",
    responses((status = 200, description = "Item document", body = ItemsExport)),
    tag = "items"
)]
async fn handle_export_items(State(state): State<ApiState>) -> Response {
    ok_json(state.facade.lock().await.export_items())
}

/// Handler for POST /items/validate.
///
/// Lists the items that do not fit into the given bin.
#[utoipa::path(
    post,
    path = "/items/validate",
    request_body = Dimensions,
    responses(
        (status = 200, description = "Oversized items", body = BinValidationReport),
        (status = UNPROCESSABLE_ENTITY, description = "Invalid bin", body = ErrorResponse)
    ),
    tag = "items"
)]
async fn handle_validate_items(
    State(state): State<ApiState>,
    payload: Result<Json<Dimensions>, JsonRejection>,
) -> Response {
    let bin = match parse_body(payload) {
        Ok(bin) => bin,
        Err(response) => return response,
    };
    if let Err(err) = bin.validate("Bin") {
        return validation_error(err.to_string());
    }
    ok_json(state.facade.lock().await.validate_against(&bin))
}

/// Handler for GET /weights.
#[utoipa::path(
    get,
    path = "/weights",
    responses((status = 200, description = "Current weights", body = Object)),
    tag = "weights"
)]
async fn handle_get_weights(State(state): State<ApiState>) -> Response {
    ok_json(state.facade.lock().await.weights())
}

/// Handler for PUT /weights.
///
/// Replaces all weights; missing keys fall back to their defaults.
#[utoipa::path(
    put,
    path = "/weights",
    request_body(content = Object, example = json!({ "W_lifo": 4.0, "W_sim_L": -2.0 })),
    responses(
        (status = 200, description = "Accepted weights and rejected keys", body = WeightUpdate)
    ),
    tag = "weights"
)]
async fn handle_set_weights(
    State(state): State<ApiState>,
    payload: Result<Json<Map<String, Value>>, JsonRejection>,
) -> Response {
    let partial = match parse_body(payload) {
        Ok(partial) => partial,
        Err(response) => return response,
    };
    ok_json(state.facade.lock().await.set_weights(&partial))
}

/// Handler for PATCH /weights/{key}.
#[utoipa::path(
    patch,
    path = "/weights/{key}",
    params(("key" = String, Path, description = "Weight key, e.g. W_lifo")),
    request_body = WeightValueBody,
    responses(
        (status = 200, description = "Updated weights", body = Object),
        (status = UNPROCESSABLE_ENTITY, description = "Unknown key or invalid value", body = ErrorResponse)
    ),
    tag = "weights"
)]
async fn handle_update_weight(
    State(state): State<ApiState>,
    Path(key): Path<String>,
    payload: Result<Json<WeightValueBody>, JsonRejection>,
) -> Response {
    let body = match parse_body(payload) {
        Ok(body) => body,
        Err(response) => return response,
    };
    let raw = match body.value {
        Value::String(text) => text,
        other => other.to_string(),
    };
    match state.facade.lock().await.update_weight(&key, &raw) {
        Ok(weights) => ok_json(weights),
        Err(err) => validation_error(err.to_string()),
    }
}

/// Handler for POST /weights/reset.
#[utoipa::path(
    post,
    path = "/weights/reset",
    responses((status = 200, description = "Default weights", body = Object)),
    tag = "weights"
)]
async fn handle_reset_weights(State(state): State<ApiState>) -> Response {
    ok_json(state.facade.lock().await.reset_weights())
}

/// Handler for POST /weights/randomize.
///
/// Returns a randomized candidate; it replaces the current weights only when
/// `apply` is set.
#[utoipa::path(
    post,
    path = "/weights/randomize",
    request_body = RandomizeBody,
    responses(
        (status = 200, description = "Randomized weights", body = Object),
        (status = UNPROCESSABLE_ENTITY, description = "Invalid change limit", body = ErrorResponse)
    ),
    tag = "weights"
)]
async fn handle_randomize_weights(
    State(state): State<ApiState>,
    payload: Result<Json<RandomizeBody>, JsonRejection>,
) -> Response {
    let body = match parse_body(payload) {
        Ok(body) => body,
        Err(response) => return response,
    };
    let max_change = body.max_change.unwrap_or(state.randomize_max_change);
    match state
        .facade
        .lock()
        .await
        .randomize_weights(max_change, body.seed, body.apply)
    {
        Ok(weights) => ok_json(weights),
        Err(err) => validation_error(err.to_string()),
    }
}

/// Handler for POST /weights/diff.
///
/// Compares the current weights with the given ones.
#[utoipa::path(
    post,
    path = "/weights/diff",
    request_body(content = Object, example = json!({ "W_lifo": 4.0 })),
    responses((status = 200, description = "Differing keys", body = WeightDiffResponse)),
    tag = "weights"
)]
async fn handle_diff_weights(
    State(state): State<ApiState>,
    payload: Result<Json<Map<String, Value>>, JsonRejection>,
) -> Response {
    let partial = match parse_body(payload) {
        Ok(partial) => partial,
        Err(response) => return response,
    };
    let other = WeightSet::from_partial(&partial);
    let differences = state.facade.lock().await.diff_weights(&other.accepted);
    ok_json(WeightDiffResponse {
        differences,
        rejected_keys: other.rejected_keys,
    })
}

/// Handler for POST /weights/import.
#[utoipa::path(
    post,
    path = "/weights/import",
    request_body(content = Object, description = "Weights document"),
    responses(
        (status = 200, description = "Imported weights", body = WeightUpdate),
        (status = UNPROCESSABLE_ENTITY, description = "No weights found", body = ErrorResponse)
    ),
    tag = "weights"
)]
async fn handle_import_weights(
    State(state): State<ApiState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Response {
    let document = match parse_body(payload) {
        Ok(document) => document,
        Err(response) => return response,
    };
    match state.facade.lock().await.import_weights(&document) {
        Ok(update) => ok_json(update),
        Err(err) => validation_error(err.to_string()),
    }
}

/// Handler for POST /pack.
///
/// Sends the current items and weights to the packing service. The session is
/// not held while waiting for the service; an answer that was overtaken by a
/// newer run is discarded.
#[utoipa::path(
    post,
    path = "/pack",
    request_body = PackBody,
    responses(
        (status = 200, description = "Packing applied", body = SubmitOutcome),
        (status = UNPROCESSABLE_ENTITY, description = "Invalid bin or no items", body = ErrorResponse),
        (status = CONFLICT, description = "A newer packing run was started, empty body"),
        (status = BAD_GATEWAY, description = "Packing service failed", body = ErrorResponse)
    ),
    tag = "packing"
)]
async fn handle_pack(
    State(state): State<ApiState>,
    payload: Result<Json<PackBody>, JsonRejection>,
) -> Response {
    let body = match parse_body(payload) {
        Ok(body) => body,
        Err(response) => return response,
    };

    let pending = match state.facade.lock().await.begin_submit(body.bin_size) {
        Ok(pending) => pending,
        Err(err) => return validation_error(err.to_string()),
    };
    let response = state.gateway.pack(&pending.request).await;

    match state.facade.lock().await.complete_submit(pending, response) {
        Ok(outcome) => ok_json(outcome),
        Err(err) => session_error(err),
    }
}

/// Handler for GET /session.
#[utoipa::path(
    get,
    path = "/session",
    responses(
        (status = 200, description = "Last packing run", body = PackingSession),
        (status = 404, description = "Nothing packed yet", body = ErrorResponse)
    ),
    tag = "packing"
)]
async fn handle_get_session(State(state): State<ApiState>) -> Response {
    match state.facade.lock().await.session() {
        Some(session) => ok_json(session),
        None => not_found("No packing results available"),
    }
}

/// Handler for GET /session/export.
#[utoipa::path(
    get,
    path = "/session/export",
    responses(
        (status = 200, description = "Packing results document", body = PackingResultsExport),
        (status = 404, description = "Nothing packed yet", body = ErrorResponse)
    ),
    tag = "packing"
)]
async fn handle_export_session(State(state): State<ApiState>) -> Response {
    match state.facade.lock().await.export_results() {
        Some(export) => ok_json(export),
        None => not_found("No packing results available"),
    }
}

/// Handler for GET /playback.
#[utoipa::path(
    get,
    path = "/playback",
    responses((status = 200, description = "Playback state", body = PlaybackState)),
    tag = "playback"
)]
async fn handle_get_playback(State(state): State<ApiState>) -> Response {
    ok_json(playback_state(&state).await)
}

/// Handler for POST /playback/step.
#[utoipa::path(
    post,
    path = "/playback/step",
    request_body = StepBody,
    responses(
        (status = 200, description = "Playback state", body = PlaybackState),
        (status = BAD_REQUEST, description = "Nothing to play", body = ErrorResponse)
    ),
    tag = "playback"
)]
async fn handle_step(
    State(state): State<ApiState>,
    payload: Result<Json<StepBody>, JsonRejection>,
) -> Response {
    let body = match parse_body(payload) {
        Ok(body) => body,
        Err(response) => return response,
    };
    if let Err(err) = state.facade.lock().await.step(body.delta) {
        return playback_error(err);
    }
    ok_json(playback_state(&state).await)
}

/// Handler for POST /playback/seek.
#[utoipa::path(
    post,
    path = "/playback/seek",
    request_body = SeekBody,
    responses(
        (status = 200, description = "Playback state", body = PlaybackState),
        (status = BAD_REQUEST, description = "Nothing to play", body = ErrorResponse)
    ),
    tag = "playback"
)]
async fn handle_seek(
    State(state): State<ApiState>,
    payload: Result<Json<SeekBody>, JsonRejection>,
) -> Response {
    let body = match parse_body(payload) {
        Ok(body) => body,
        Err(response) => return response,
    };
    if let Err(err) = state.facade.lock().await.seek(body.index) {
        return playback_error(err);
    }
    ok_json(playback_state(&state).await)
}

/// Handler for POST /playback/play.
#[utoipa::path(
    post,
    path = "/playback/play",
    responses(
        (status = 200, description = "Playback state", body = PlaybackState),
        (status = BAD_REQUEST, description = "Nothing to play", body = ErrorResponse)
    ),
    tag = "playback"
)]
async fn handle_play(State(state): State<ApiState>) -> Response {
    if let Err(err) = state.facade.lock().await.play() {
        return playback_error(err);
    }
    ok_json(playback_state(&state).await)
}

/// Handler for POST /playback/pause.
#[utoipa::path(
    post,
    path = "/playback/pause",
    responses((status = 200, description = "Playback state", body = PlaybackState)),
    tag = "playback"
)]
async fn handle_pause(State(state): State<ApiState>) -> Response {
    state.facade.lock().await.pause();
    ok_json(playback_state(&state).await)
}

/// Handler for POST /playback/speed.
#[utoipa::path(
    post,
    path = "/playback/speed",
    request_body = SpeedBody,
    responses(
        (status = 200, description = "Playback state", body = PlaybackState),
        (status = UNPROCESSABLE_ENTITY, description = "Invalid interval", body = ErrorResponse)
    ),
    tag = "playback"
)]
async fn handle_speed(
    State(state): State<ApiState>,
    payload: Result<Json<SpeedBody>, JsonRejection>,
) -> Response {
    let body = match parse_body(payload) {
        Ok(body) => body,
        Err(response) => return response,
    };
    if let Err(err) = state.facade.lock().await.set_speed(body.step_interval_ms) {
        return validation_error(err.to_string());
    }
    ok_json(playback_state(&state).await)
}

/// Handler for GET /playback/stream (SSE).
///
/// Sends the current frame first, then every newly drawn frame as a `frame`
/// event. Frames a slow client missed are skipped.
#[utoipa::path(
    get,
    path = "/playback/stream",
    responses(
        (
            status = 200,
            description = "Streams drawn frames in real-time",
            content_type = "text/event-stream",
            body = String
        )
    ),
    tag = "playback"
)]
async fn handle_playback_stream(State(state): State<ApiState>) -> Response {
    let receiver = state.frames.subscribe();
    let current = state.facade.lock().await.frame();

    let frames = tokio_stream::iter(current)
        .chain(BroadcastStream::new(receiver).filter_map(|frame| frame.ok()));
    let stream = frames
        .filter_map(|frame| Event::default().event("frame").json_data(frame).ok())
        .map(Ok::<_, Infallible>);

    Sse::new(stream)
        .keep_alive(
            KeepAlive::new()
                .interval(std::time::Duration::from_secs(10))
                .text("keep-alive"),
        )
        .into_response()
}

/// Handler for POST /camera.
///
/// The browser reports the camera after the user moved it.
#[utoipa::path(
    post,
    path = "/camera",
    request_body = CameraTransform,
    responses(
        (status = 200, description = "Camera recorded", body = CameraRecorded),
        (status = UNPROCESSABLE_ENTITY, description = "Non-finite camera values", body = ErrorResponse)
    ),
    tag = "camera"
)]
async fn handle_record_camera(
    State(state): State<ApiState>,
    payload: Result<Json<CameraTransform>, JsonRejection>,
) -> Response {
    let camera = match parse_body(payload) {
        Ok(camera) => camera,
        Err(response) => return response,
    };
    if !state.live_camera.report(camera) {
        return validation_error("Camera values must be finite");
    }
    let recorded = state.facade.lock().await.record_camera(camera);
    ok_json(CameraRecorded { recorded })
}

/// Handler for DELETE /camera.
#[utoipa::path(
    delete,
    path = "/camera",
    responses((status = 204, description = "Saved camera cleared")),
    tag = "camera"
)]
async fn handle_clear_camera(State(state): State<ApiState>) -> Response {
    state.live_camera.clear();
    state.facade.lock().await.clear_camera();
    StatusCode::NO_CONTENT.into_response()
}

/// Handler for POST /camera/reset.
#[utoipa::path(
    post,
    path = "/camera/reset",
    responses((status = 200, description = "Default camera for the current bin", body = CameraTransform)),
    tag = "camera"
)]
async fn handle_reset_camera(State(state): State<ApiState>) -> Response {
    ok_json(state.facade.lock().await.reset_camera())
}

/// Handler for POST /gateway/probe.
///
/// Always answers 200; availability is part of the body.
#[utoipa::path(
    post,
    path = "/gateway/probe",
    request_body = ProbeBody,
    responses((status = 200, description = "Availability of the packing service", body = ProbeResult)),
    tag = "service"
)]
async fn handle_probe(
    State(state): State<ApiState>,
    payload: Result<Json<ProbeBody>, JsonRejection>,
) -> Response {
    let body = match parse_body(payload) {
        Ok(body) => body,
        Err(response) => return response,
    };
    let base_url = body
        .base_url
        .filter(|url| !url.trim().is_empty())
        .map(|url| normalize_base_url(&url))
        .unwrap_or_else(|| state.gateway.base_url().to_string());
    ok_json(state.gateway.probe(&base_url).await)
}

/// Handler for POST /training.
///
/// Starts from the current weights. The optimized weights are returned, not
/// applied.
#[utoipa::path(
    post,
    path = "/training",
    request_body = TrainingBody,
    responses(
        (status = 200, description = "Optimized weights", body = TrainingOutcome),
        (status = UNPROCESSABLE_ENTITY, description = "Invalid scenarios or configuration", body = ErrorResponse),
        (status = BAD_GATEWAY, description = "Packing service failed", body = ErrorResponse)
    ),
    tag = "service"
)]
async fn handle_training(
    State(state): State<ApiState>,
    payload: Result<Json<TrainingBody>, JsonRejection>,
) -> Response {
    let body = match parse_body(payload) {
        Ok(body) => body,
        Err(response) => return response,
    };
    let scenarios = match ScenarioCollection::from_document(&Value::Array(body.training_data)) {
        Ok(scenarios) => scenarios,
        Err(err) => return validation_error(err.to_string()),
    };
    let initial = match state
        .facade
        .lock()
        .await
        .prepare_training(&scenarios, &body.training_config)
    {
        Ok(initial) => initial,
        Err(err) => return validation_error(err.to_string()),
    };

    println!(
        "🎯 Training on {} scenarios ({} steps)",
        scenarios.len(),
        body.training_config.num_steps
    );
    match state
        .gateway
        .train(&scenarios, &initial, &body.training_config)
        .await
    {
        Ok(outcome) => ok_json(outcome),
        Err(err) => session_error(SessionError::Gateway(err)),
    }
}

/// Handler for POST /training/synthetic.
#[utoipa::path(
    post,
    path = "/training/synthetic",
    request_body = SyntheticParams,
    responses(
        (status = 200, description = "Generated scenarios", body = SyntheticScenarios),
        (status = UNPROCESSABLE_ENTITY, description = "Invalid parameters", body = ErrorResponse),
        (status = BAD_GATEWAY, description = "Packing service failed", body = ErrorResponse)
    ),
    tag = "service"
)]
async fn handle_synthetic(
    State(state): State<ApiState>,
    payload: Result<Json<SyntheticParams>, JsonRejection>,
) -> Response {
    let params = match parse_body(payload) {
        Ok(params) => params,
        Err(response) => return response,
    };
    if let Err(err) = params.validate() {
        return validation_error(err.to_string());
    }
    match state.gateway.generate_synthetic_scenarios(&params).await {
        Ok(generated) => ok_json(generated),
        Err(err) => session_error(SessionError::Gateway(err)),
    }
}

async fn serve_openapi_json(State(_state): State<ApiState>) -> impl IntoResponse {
    Json(openapi_doc())
}

async fn serve_openapi_ui(State(_state): State<ApiState>) -> impl IntoResponse {
    Html(SWAGGER_UI_HTML)
}
