// src/main.rs
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use packing_dashboard::api::{self, ApiState};
use packing_dashboard::config::AppConfig;
use packing_dashboard::gateway::{AlgorithmGateway, HttpGateway};
use packing_dashboard::playback::{TimerTicket, TokioStepScheduler};
use packing_dashboard::render::{BroadcastSurface, LiveCamera};
use packing_dashboard::session::SessionFacade;

/// Frames a slow SSE client may lag behind before frames are skipped.
const FRAME_CHANNEL_CAPACITY: usize = 64;

#[tokio::main]
async fn main() {
    if let Err(err) = dotenvy::dotenv() {
        if !matches!(err, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
        {
            eprintln!("⚠️ Konnte .env nicht laden: {}", err);
        }
    }

    let app_config = AppConfig::from_env();
    let api_config = app_config.api.clone();
    let gateway_config = app_config.gateway.clone();
    let playback_config = app_config.playback.clone();

    println!("🚀 Packing Dashboard startet...");

    let gateway = match HttpGateway::new(gateway_config.base_url(), gateway_config.timeout()) {
        Ok(gateway) => gateway,
        Err(err) => {
            eprintln!("❌ Could not create packing service client: {}", err);
            return;
        }
    };

    let live_camera = LiveCamera::new();
    let surface = BroadcastSurface::new(FRAME_CHANNEL_CAPACITY, live_camera.clone());
    let frames = surface.sender();
    let (scheduler, ticks) = TokioStepScheduler::new();
    let facade = Arc::new(Mutex::new(SessionFacade::new(
        Box::new(surface),
        Box::new(scheduler),
        playback_config.step_interval_ms(),
    )));

    let _tick_task = pump_playback_ticks(facade.clone(), ticks);
    let _snapshot_task =
        snapshot_camera_periodically(facade.clone(), playback_config.camera_snapshot_interval());
    let _probe_task = gateway_config
        .probe_on_start()
        .then(|| probe_in_background(gateway.clone()));

    let state = ApiState::new(
        facade,
        gateway,
        live_camera,
        frames,
        playback_config.randomize_max_change(),
    );
    api::start_api_server(api_config, state).await;
}

/// Forwards playback timer ticks to the session.
fn pump_playback_ticks(
    facade: Arc<Mutex<SessionFacade>>,
    mut ticks: mpsc::UnboundedReceiver<TimerTicket>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(ticket) = ticks.recv().await {
            facade.lock().await.on_tick(ticket);
        }
    })
}

/// Copies the camera the browser last reported into the session at a fixed rate.
fn snapshot_camera_periodically(
    facade: Arc<Mutex<SessionFacade>>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick completes immediately.
        interval.tick().await;
        loop {
            interval.tick().await;
            facade.lock().await.snapshot_camera();
        }
    })
}

fn probe_in_background(gateway: HttpGateway) -> JoinHandle<()> {
    tokio::spawn(async move {
        let result = gateway.probe(gateway.base_url()).await;
        if result.available {
            println!("✅ Packing service reachable at {}", gateway.base_url());
        } else {
            eprintln!(
                "⚠️ Packing service at {} not reachable: {}",
                gateway.base_url(),
                result.message
            );
        }
    })
}
