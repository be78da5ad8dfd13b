//! Session facade.
//!
//! Owns the item registry, the weight store and the playback engine (which in
//! turn owns the viewport state). Callers get read-only views and go through
//! the facade for every change.
//!
//! A packing run is split into `begin_submit` and `complete_submit` so the
//! network call can happen without holding the session. Every submit gets a
//! new generation; only the answer to the latest generation is applied.

use serde::Serialize;
use serde_json::{Map, Value};
use utoipa::ToSchema;

use crate::formats::{
    BulkItemRecord, ItemsExport, PackingResultsExport, WeightsExport, bin_size_from_document,
};
use crate::gateway::{AlgorithmGateway, GatewayFailure, GatewayPackResult, PackRequest, ProbeResult};
use crate::model::{
    Dimensions, Item, PackingSession, RotationAxisCount, ValidationError, utilization_percent,
};
use crate::playback::{
    PlaybackCursor, PlaybackEngine, PlaybackError, PlaybackStatistics, StepScheduler, TimerTicket,
};
use crate::registry::{BinValidationReport, GroupedView, ImportSummary, ItemRegistry};
use crate::render::{Frame, RenderSurface};
use crate::training::{
    ScenarioCollection, SyntheticParams, SyntheticScenarios, TrainingConfig, TrainingOutcome,
};
use crate::viewport::{CameraTransform, ViewportPreserver};
use crate::weights::{WeightDifference, WeightSet, WeightStore, WeightUpdate};

#[derive(Debug, Clone, PartialEq)]
pub enum SessionError {
    Validation(ValidationError),
    Gateway(GatewayFailure),
    /// A newer submit was started before this answer arrived.
    StaleResponse { generation: u64, latest: u64 },
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::Validation(err) => write!(f, "{}", err),
            SessionError::Gateway(err) => write!(f, "{}", err),
            SessionError::StaleResponse { generation, latest } => write!(
                f,
                "Discarded response of submit {} because submit {} is newer",
                generation, latest
            ),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SessionError::Validation(err) => Some(err),
            SessionError::Gateway(err) => Some(err),
            SessionError::StaleResponse { .. } => None,
        }
    }
}

impl From<ValidationError> for SessionError {
    fn from(err: ValidationError) -> Self {
        SessionError::Validation(err)
    }
}

impl From<GatewayFailure> for SessionError {
    fn from(err: GatewayFailure) -> Self {
        SessionError::Gateway(err)
    }
}

/// A started submit, to be completed with the gateway's answer.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingSubmit {
    pub generation: u64,
    pub request: PackRequest,
}

/// Summary of an applied packing run.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct SubmitOutcome {
    pub generation: u64,
    pub placed_count: usize,
    pub leftover_count: usize,
    pub utilization: f64,
    pub total_steps: u32,
    /// The saved camera was dropped because the bin changed too much.
    pub camera_reset: bool,
}

/// Result of an item import.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ItemImportOutcome {
    #[serde(flatten)]
    pub summary: ImportSummary,
    /// Bin size carried by the document, if any.
    pub bin_size: Option<Dimensions>,
}

pub struct SessionFacade {
    registry: ItemRegistry,
    weights: WeightStore,
    engine: PlaybackEngine,
    session: Option<PackingSession>,
    generation: u64,
}

impl SessionFacade {
    pub fn new(
        surface: Box<dyn RenderSurface>,
        scheduler: Box<dyn StepScheduler>,
        step_interval_ms: u64,
    ) -> Self {
        Self {
            registry: ItemRegistry::new(),
            weights: WeightStore::new(),
            engine: PlaybackEngine::new(surface, scheduler, step_interval_ms),
            session: None,
            generation: 0,
        }
    }

    pub fn registry(&self) -> &ItemRegistry {
        &self.registry
    }

    pub fn weight_store(&self) -> &WeightStore {
        &self.weights
    }

    pub fn playback(&self) -> &PlaybackEngine {
        &self.engine
    }

    pub fn viewport(&self) -> &ViewportPreserver {
        self.engine.viewport()
    }

    /// The last applied packing run.
    pub fn session(&self) -> Option<&PackingSession> {
        self.session.as_ref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    // Items

    pub fn add_group(
        &mut self,
        dimensions: Dimensions,
        request_group_id: i64,
        rotation_axis_count: RotationAxisCount,
        quantity: u32,
    ) -> Result<Vec<Item>, ValidationError> {
        self.registry
            .add_group(dimensions, request_group_id, rotation_axis_count, quantity)
    }

    pub fn remove_group(&mut self, request_group_id: i64) -> usize {
        self.registry.remove_group(request_group_id)
    }

    pub fn remove_item(&mut self, id: u64) -> bool {
        self.registry.remove_item(id)
    }

    pub fn clear_items(&mut self) {
        self.registry.clear();
    }

    pub fn load_from_bulk_description(
        &mut self,
        records: &[BulkItemRecord],
    ) -> Result<ImportSummary, ValidationError> {
        self.registry.load_from_bulk_description(records)
    }

    /// Imports an item document. A `bin_size` in the document is validated
    /// before anything is loaded and handed back to the caller.
    pub fn import_items(&mut self, document: &Value) -> Result<ItemImportOutcome, ValidationError> {
        let bin_size = match bin_size_from_document(document) {
            Some(Ok(bin)) => {
                bin.validate("Bin")?;
                Some(bin)
            }
            Some(Err(reason)) => return Err(ValidationError::InvalidDimension(reason)),
            None => None,
        };
        let summary = self.registry.load_from_json(document)?;
        Ok(ItemImportOutcome { summary, bin_size })
    }

    pub fn grouped_view(&self) -> GroupedView {
        self.registry.grouped_view()
    }

    pub fn validate_against(&self, bin: &Dimensions) -> BinValidationReport {
        self.registry.validate_against(bin)
    }

    pub fn export_items(&self) -> ItemsExport {
        ItemsExport::from_grouped(&self.registry.grouped_view())
    }

    // Weights

    pub fn weights(&self) -> WeightSet {
        self.weights.get()
    }

    pub fn set_weights(&mut self, partial: &Map<String, Value>) -> WeightUpdate {
        self.weights.set(partial)
    }

    pub fn update_weight(&mut self, key: &str, raw_value: &str) -> Result<WeightSet, ValidationError> {
        self.weights.update_one(key, raw_value)
    }

    pub fn reset_weights(&mut self) -> WeightSet {
        self.weights.reset_to_defaults()
    }

    /// Randomizes the current weights; with `apply` the candidate replaces them.
    pub fn randomize_weights(
        &mut self,
        max_fractional_change: f64,
        seed: Option<u64>,
        apply: bool,
    ) -> Result<WeightSet, ValidationError> {
        let candidate = self.weights.randomize(max_fractional_change, seed)?;
        if apply {
            self.weights.set(&candidate.to_map());
        }
        Ok(candidate)
    }

    pub fn diff_weights(&self, other: &WeightSet) -> Vec<WeightDifference> {
        self.weights.diff(other)
    }

    pub fn import_weights(&mut self, document: &Value) -> Result<WeightUpdate, ValidationError> {
        self.weights.import_document(document)
    }

    pub fn export_weights(&self) -> WeightsExport {
        WeightsExport::new(self.weights.get())
    }

    // Camera

    pub fn record_camera(&mut self, camera: CameraTransform) -> bool {
        self.engine.record_camera(camera)
    }

    pub fn snapshot_camera(&mut self) -> bool {
        self.engine.snapshot_viewport()
    }

    pub fn clear_camera(&mut self) {
        self.engine.clear_viewport();
    }

    pub fn reset_camera(&mut self) -> CameraTransform {
        self.engine.reset_viewport()
    }

    // Playback

    pub fn step(&mut self, delta: i64) -> Result<bool, PlaybackError> {
        self.engine.step(delta)
    }

    pub fn seek(&mut self, index: i64) -> Result<bool, PlaybackError> {
        self.engine.seek(index)
    }

    pub fn play(&mut self) -> Result<bool, PlaybackError> {
        self.engine.play()
    }

    pub fn pause(&mut self) -> bool {
        self.engine.pause()
    }

    pub fn set_speed(&mut self, step_interval_ms: u64) -> Result<(), ValidationError> {
        self.engine.set_speed(step_interval_ms)
    }

    pub fn on_tick(&mut self, ticket: TimerTicket) -> bool {
        self.engine.on_tick(ticket)
    }

    pub fn cursor(&self) -> PlaybackCursor {
        self.engine.cursor()
    }

    pub fn playback_statistics(&self) -> PlaybackStatistics {
        self.engine.statistics()
    }

    pub fn frame(&self) -> Option<Frame> {
        self.engine.frame()
    }

    pub fn render_current(&mut self) {
        self.engine.render_current();
    }

    // Packing

    /// Validates the bin and snapshots items and weights for a packing run.
    pub fn begin_submit(&mut self, bin: Dimensions) -> Result<PendingSubmit, ValidationError> {
        bin.validate("Bin")?;
        if self.registry.is_empty() {
            return Err(ValidationError::InvalidConfiguration(
                "No items to pack".to_string(),
            ));
        }

        let report = self.registry.validate_against(&bin);
        if !report.is_valid() {
            eprintln!(
                "⚠️ {} items exceed the bin dimensions and will likely be left over",
                report.oversized.len()
            );
        }

        self.generation += 1;
        println!(
            "📦 Submitting {} items (generation {})",
            self.registry.len(),
            self.generation
        );
        Ok(PendingSubmit {
            generation: self.generation,
            request: PackRequest {
                bin,
                items: self.registry.items().to_vec(),
                weights: self.weights.get(),
            },
        })
    }

    /// Applies the gateway's answer to a started submit.
    ///
    /// Stale answers and failures leave session, playback and camera as they were.
    pub fn complete_submit(
        &mut self,
        pending: PendingSubmit,
        response: Result<GatewayPackResult, GatewayFailure>,
    ) -> Result<SubmitOutcome, SessionError> {
        if pending.generation != self.generation {
            eprintln!(
                "⚠️ Discarding stale packing response (generation {}, latest {})",
                pending.generation, self.generation
            );
            return Err(SessionError::StaleResponse {
                generation: pending.generation,
                latest: self.generation,
            });
        }

        let result = response.map_err(|failure| {
            eprintln!("❌ Packing failed: {}", failure.message);
            SessionError::Gateway(failure)
        })?;

        let PackRequest {
            bin,
            items,
            weights,
        } = pending.request;
        let mut placed = result.placed;
        placed.sort_by_key(|item| (item.pack_order, item.id));
        let utilization = result
            .utilization
            .unwrap_or_else(|| utilization_percent(&placed, &bin));

        let camera_reset = self
            .session
            .as_ref()
            .is_some_and(|previous| ViewportPreserver::should_reset_on_resize(&previous.bin, &bin));
        if camera_reset {
            println!("ℹ️ Bin size changed significantly, resetting camera");
            self.engine.clear_viewport();
        }

        self.engine.load(bin, placed.clone());
        if self.engine.is_available() {
            let terminal = i64::from(self.engine.total_steps()) - 1;
            // `load` rewinds to -1, so seeking to the last step always draws.
            let _ = self.engine.seek(terminal);
        } else {
            self.engine.render_current();
        }

        let session = PackingSession {
            generation: pending.generation,
            bin,
            items,
            weights,
            placed,
            leftover: result.leftover,
            utilization,
            packing_time_secs: result.packing_time_secs,
        };
        let outcome = SubmitOutcome {
            generation: session.generation,
            placed_count: session.placed_count(),
            leftover_count: session.leftover_count(),
            utilization,
            total_steps: self.engine.total_steps(),
            camera_reset,
        };
        println!(
            "✅ Packing applied: {} placed, {} left over, {:.1}% utilization",
            outcome.placed_count, outcome.leftover_count, outcome.utilization
        );
        self.session = Some(session);
        Ok(outcome)
    }

    /// Runs a whole packing round trip.
    pub async fn submit<G: AlgorithmGateway>(
        &mut self,
        bin: Dimensions,
        gateway: &G,
    ) -> Result<SubmitOutcome, SessionError> {
        let pending = self.begin_submit(bin)?;
        let response = gateway.pack(&pending.request).await;
        self.complete_submit(pending, response)
    }

    pub fn export_results(&self) -> Option<PackingResultsExport> {
        self.session.as_ref().map(|session| {
            PackingResultsExport::from_session(session, self.registry.original_input())
        })
    }

    // Service helpers

    pub async fn probe<G: AlgorithmGateway>(&self, gateway: &G, base_url: &str) -> ProbeResult {
        gateway.probe(base_url).await
    }

    /// Trains from the current weights. The optimized weights are returned,
    /// not applied.
    pub async fn train<G: AlgorithmGateway>(
        &self,
        gateway: &G,
        scenarios: &ScenarioCollection,
        config: &TrainingConfig,
    ) -> Result<TrainingOutcome, SessionError> {
        let initial = self.prepare_training(scenarios, config)?;
        Ok(gateway.train(scenarios, &initial, config).await?)
    }

    /// Validates a training run and returns the initial weights for it.
    pub fn prepare_training(
        &self,
        scenarios: &ScenarioCollection,
        config: &TrainingConfig,
    ) -> Result<WeightSet, ValidationError> {
        config.validate()?;
        scenarios.validate()?;
        Ok(self.weights.get())
    }

    pub async fn generate_synthetic<G: AlgorithmGateway>(
        &self,
        gateway: &G,
        params: &SyntheticParams,
    ) -> Result<SyntheticScenarios, SessionError> {
        params.validate()?;
        Ok(gateway.generate_synthetic_scenarios(params).await?)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::gateway::testing::StubGateway;
    use crate::model::PlacedItem;
    use crate::playback::testing::ManualScheduler;
    use crate::render::testing::RecordingSurface;
    use crate::types::Vec3;
    use crate::weights::WeightKey;

    fn facade() -> (SessionFacade, RecordingSurface) {
        let surface = RecordingSurface::default();
        let facade = SessionFacade::new(
            Box::new(surface.clone()),
            Box::new(ManualScheduler::default()),
            1000,
        );
        (facade, surface)
    }

    fn placed(id: u64, pack_order: u32) -> PlacedItem {
        PlacedItem {
            id,
            request_group_id: Some(1),
            dimensions: Dimensions::new(2.0, 2.0, 2.0),
            position: Vec3::new(0.0, 0.0, 2.0 * f64::from(pack_order - 1)),
            rotation: Some(0),
            pack_order,
        }
    }

    fn three_placed() -> GatewayPackResult {
        GatewayPackResult {
            placed: vec![placed(3, 3), placed(1, 1), placed(2, 2)],
            leftover: Vec::new(),
            utilization: None,
            packing_time_secs: Some(0.2),
        }
    }

    fn bin() -> Dimensions {
        Dimensions::new(10.0, 8.0, 6.0)
    }

    fn user_camera() -> CameraTransform {
        CameraTransform {
            eye: Vec3::new(3.0, 4.0, 5.0),
            ..CameraTransform::default()
        }
    }

    #[test]
    fn submit_with_empty_registry_is_rejected() {
        let (mut facade, _) = facade();
        let err = facade.begin_submit(bin()).unwrap_err();
        assert!(err.to_string().contains("No items to pack"));
        assert_eq!(facade.generation(), 0);

        facade
            .add_group(Dimensions::new(1.0, 1.0, 1.0), 1, RotationAxisCount::Two, 1)
            .unwrap();
        assert!(facade.begin_submit(Dimensions::new(0.0, 1.0, 1.0)).is_err());
    }

    #[tokio::test]
    async fn successful_submit_shows_fully_packed_bin_first() {
        let (mut facade, surface) = facade();
        facade
            .add_group(Dimensions::new(2.0, 2.0, 2.0), 1, RotationAxisCount::Two, 3)
            .unwrap();
        let gateway = StubGateway::answering(Ok(three_placed()));

        let outcome = facade.submit(bin(), &gateway).await.unwrap();
        assert_eq!(outcome.placed_count, 3);
        assert_eq!(outcome.total_steps, 3);
        assert!(!outcome.camera_reset);
        assert_eq!(facade.cursor().step_index, 2);
        assert_eq!(surface.last_frame().unwrap().scene.items.len(), 3);

        let session = facade.session().unwrap();
        let orders: Vec<u32> = session.placed.iter().map(|p| p.pack_order).collect();
        assert_eq!(orders, vec![1, 2, 3]);
        assert_eq!(session.items.len(), 3);
        assert!(session.utilization > 0.0, "utilization is computed when missing");

        let sent = gateway.requests.lock().unwrap();
        assert_eq!(sent[0].weights, WeightSet::defaults());

        drop(sent);
        facade.seek(1).unwrap();
        let visible: Vec<u32> = surface
            .last_frame()
            .unwrap()
            .scene
            .items
            .iter()
            .map(|p| p.pack_order)
            .collect();
        assert_eq!(visible, vec![1, 2]);
    }

    #[test]
    fn stale_response_is_discarded() {
        let (mut facade, _) = facade();
        facade
            .add_group(Dimensions::new(2.0, 2.0, 2.0), 1, RotationAxisCount::Two, 3)
            .unwrap();

        let first = facade.begin_submit(bin()).unwrap();
        let second = facade.begin_submit(bin()).unwrap();

        let stale = facade.complete_submit(first, Ok(three_placed()));
        assert_eq!(
            stale.unwrap_err(),
            SessionError::StaleResponse {
                generation: 1,
                latest: 2
            }
        );
        assert!(facade.session().is_none());

        let applied = facade.complete_submit(second, Ok(three_placed())).unwrap();
        assert_eq!(applied.generation, 2);
    }

    #[test]
    fn gateway_failure_keeps_previous_state() {
        let (mut facade, surface) = facade();
        facade
            .add_group(Dimensions::new(2.0, 2.0, 2.0), 1, RotationAxisCount::Two, 3)
            .unwrap();
        let pending = facade.begin_submit(bin()).unwrap();
        facade.complete_submit(pending, Ok(three_placed())).unwrap();
        facade.seek(0).unwrap();
        facade.record_camera(user_camera());
        let frames = surface.frame_count();

        let pending = facade.begin_submit(Dimensions::new(30.0, 30.0, 30.0)).unwrap();
        let err = facade
            .complete_submit(pending, Err(GatewayFailure::new("HTTP 500: Internal Server Error")))
            .unwrap_err();
        assert!(matches!(err, SessionError::Gateway(_)));

        assert_eq!(facade.session().unwrap().bin, bin());
        assert_eq!(facade.cursor().step_index, 0);
        assert_eq!(facade.viewport().saved(), Some(user_camera()));
        assert_eq!(surface.frame_count(), frames, "failure must not redraw");
    }

    #[test]
    fn large_bin_change_resets_camera() {
        let (mut facade, surface) = facade();
        facade
            .add_group(Dimensions::new(2.0, 2.0, 2.0), 1, RotationAxisCount::Two, 3)
            .unwrap();

        let pending = facade.begin_submit(bin()).unwrap();
        facade.complete_submit(pending, Ok(three_placed())).unwrap();
        surface.live_camera.report(user_camera());
        facade.record_camera(user_camera());

        let pending = facade.begin_submit(Dimensions::new(11.0, 8.0, 6.0)).unwrap();
        let kept = facade.complete_submit(pending, Ok(three_placed())).unwrap();
        assert!(!kept.camera_reset);
        assert_eq!(surface.last_frame().unwrap().camera, user_camera());

        let bigger = Dimensions::new(30.0, 8.0, 6.0);
        let pending = facade.begin_submit(bigger).unwrap();
        let reset = facade.complete_submit(pending, Ok(three_placed())).unwrap();
        assert!(reset.camera_reset);
        assert_eq!(
            surface.last_frame().unwrap().camera,
            ViewportPreserver::derive_default(&bigger)
        );
    }

    #[test]
    fn empty_result_draws_empty_bin_and_disables_playback() {
        let (mut facade, surface) = facade();
        facade
            .add_group(Dimensions::new(20.0, 20.0, 20.0), 1, RotationAxisCount::Two, 1)
            .unwrap();
        let pending = facade.begin_submit(bin()).unwrap();
        let result = GatewayPackResult {
            placed: Vec::new(),
            leftover: Vec::new(),
            utilization: Some(0.0),
            packing_time_secs: None,
        };
        let outcome = facade.complete_submit(pending, Ok(result)).unwrap();
        assert_eq!(outcome.total_steps, 0);
        assert_eq!(surface.last_frame().unwrap().scene.title, "Empty bin");
        assert_eq!(facade.play(), Err(PlaybackError::NotAvailable));
    }

    #[test]
    fn import_returns_document_bin_size() {
        let (mut facade, _) = facade();
        let outcome = facade
            .import_items(&json!({
                "bin_size": {"length": 12, "width": 10, "height": 8},
                "items": [{"L": 3, "W": 2, "H": 1, "id": 1, "quantity": 2}]
            }))
            .unwrap();
        assert_eq!(outcome.bin_size, Some(Dimensions::new(12.0, 10.0, 8.0)));
        assert_eq!(outcome.summary.items_added, 2);

        let err = facade
            .import_items(&json!({
                "bin_size": {"length": -1, "width": 10, "height": 8},
                "items": []
            }))
            .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidDimension(_)));
        assert_eq!(facade.registry().len(), 2);
    }

    #[test]
    fn randomize_applies_only_on_request() {
        let (mut facade, _) = facade();
        let candidate = facade.randomize_weights(0.3, Some(42), false).unwrap();
        assert_eq!(facade.weights(), WeightSet::defaults());

        let applied = facade.randomize_weights(0.3, Some(42), true).unwrap();
        assert_eq!(applied, candidate);
        assert_eq!(facade.weights(), candidate);
    }

    #[tokio::test]
    async fn training_returns_weights_without_applying_them() {
        let (mut facade, _) = facade();
        facade.update_weight("W_lifo", "8").unwrap();
        let scenarios = ScenarioCollection::from_document(&json!([{
            "items": [{"length": 1, "width": 1, "height": 1, "request_id": 1}],
            "bin_size": {"length": 5, "width": 5, "height": 5}
        }]))
        .unwrap();

        let gateway = StubGateway::default();
        let outcome = facade
            .train(&gateway, &scenarios, &TrainingConfig::default())
            .await
            .unwrap();
        assert_eq!(outcome.optimized_weights.get(WeightKey::Lifo), 12.0);
        assert_eq!(outcome.optimized_weights.get(WeightKey::SimL), -1.0);
        assert_eq!(facade.weights().get(WeightKey::Lifo), 8.0);

        let bad = TrainingConfig {
            num_steps: 0,
            ..TrainingConfig::default()
        };
        assert!(matches!(
            facade.train(&gateway, &scenarios, &bad).await,
            Err(SessionError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn synthetic_generation_validates_params() {
        let (facade, _) = facade();
        let gateway = StubGateway::default();
        let params = SyntheticParams {
            scenarios: 2,
            num_items: 5,
            n_unique: 2,
            seed: Some(1),
            bin_size: bin(),
            include_weights: false,
        };
        let generated = facade.generate_synthetic(&gateway, &params).await.unwrap();
        assert_eq!(generated.statistics.scenario_count, 2);

        let too_many = SyntheticParams { scenarios: 51, ..params };
        assert!(facade.generate_synthetic(&gateway, &too_many).await.is_err());
    }

    #[test]
    fn results_export_includes_original_document() {
        let (mut facade, _) = facade();
        let document = json!({"items": [{"length": 2, "width": 2, "height": 2, "request_id": 1, "quantity": 3}]});
        facade.import_items(&document).unwrap();
        assert!(facade.export_results().is_none());

        let pending = facade.begin_submit(bin()).unwrap();
        facade.complete_submit(pending, Ok(three_placed())).unwrap();
        let export = facade.export_results().unwrap();
        assert_eq!(export.statistics.packed_count, 3);
        assert_eq!(export.original_input, Some(document));
        assert_eq!(export.packing_results.packed_items[0].pack_order, Some(1));
    }
}
