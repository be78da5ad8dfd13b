//! Step playback engine.
//!
//! A cursor over the placements of a packing run. Step `k` shows every item
//! with `pack_order <= k + 1`; step `-1` shows the empty bin. The number of
//! steps is the highest `pack_order`, so gaps in the sequence are kept and a
//! step may add no new item.
//!
//! Playing is driven by a `StepScheduler`. Every schedule carries a fresh
//! `TimerTicket`; ticks with any other ticket are ignored, so a tick that was
//! already queued when the user paused, reloaded or changed speed never moves
//! the cursor.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use utoipa::ToSchema;

use crate::model::{Dimensions, PlacedItem, ValidationError};
use crate::render::{Frame, RenderSurface, SceneDescription};
use crate::viewport::{CameraTransform, ViewportPreserver};

/// Default time between two automatic steps.
pub const DEFAULT_STEP_INTERVAL_MS: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackError {
    /// No placements are loaded.
    NotAvailable,
}

impl std::fmt::Display for PlaybackError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackError::NotAvailable => write!(f, "No packing steps available"),
        }
    }
}

impl std::error::Error for PlaybackError {}

/// Position and mode of playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct PlaybackCursor {
    /// `-1` is the empty bin, `total_steps - 1` the fully packed bin.
    pub step_index: i64,
    pub is_playing: bool,
    pub step_interval_ms: u64,
}

/// Tag of one timer schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerTicket(pub u64);

/// Delivers periodic ticks for playback.
pub trait StepScheduler: Send {
    /// Starts ticking with `ticket` every `interval`, replacing any running schedule.
    fn schedule(&mut self, ticket: TimerTicket, interval: Duration);

    fn cancel(&mut self);
}

/// Ticks from a tokio interval task, delivered through an mpsc channel.
///
/// The receiver side is pumped by the owner of the engine, which calls
/// `PlaybackEngine::on_tick` for every ticket.
pub struct TokioStepScheduler {
    ticks: mpsc::UnboundedSender<TimerTicket>,
    task: Option<JoinHandle<()>>,
}

impl TokioStepScheduler {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TimerTicket>) {
        let (ticks, rx) = mpsc::unbounded_channel();
        (Self { ticks, task: None }, rx)
    }
}

impl StepScheduler for TokioStepScheduler {
    fn schedule(&mut self, ticket: TimerTicket, interval: Duration) {
        self.cancel();

        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                eprintln!("⚠️ No tokio runtime available, playback timer not started");
                return;
            }
        };

        let ticks = self.ticks.clone();
        self.task = Some(handle.spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut timer = tokio::time::interval_at(start, interval);
            loop {
                timer.tick().await;
                if ticks.send(ticket).is_err() {
                    break;
                }
            }
        }));
    }

    fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for TokioStepScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Progress summary of the current playback position.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct PlaybackStatistics {
    pub total_steps: u32,
    /// 1-based; 0 when nothing is shown.
    pub current_step: u32,
    pub progress_percent: f64,
    pub items_visible: usize,
}

pub struct PlaybackEngine {
    bin: Option<Dimensions>,
    placed: Vec<PlacedItem>,
    total_steps: u32,
    cursor: PlaybackCursor,
    viewport: ViewportPreserver,
    surface: Box<dyn RenderSurface>,
    scheduler: Box<dyn StepScheduler>,
    active_ticket: Option<TimerTicket>,
    next_ticket: u64,
    notify: watch::Sender<PlaybackCursor>,
}

impl PlaybackEngine {
    pub fn new(
        surface: Box<dyn RenderSurface>,
        scheduler: Box<dyn StepScheduler>,
        step_interval_ms: u64,
    ) -> Self {
        let cursor = PlaybackCursor {
            step_index: -1,
            is_playing: false,
            step_interval_ms: step_interval_ms.max(1),
        };
        let (notify, _) = watch::channel(cursor);
        Self {
            bin: None,
            placed: Vec::new(),
            total_steps: 0,
            cursor,
            viewport: ViewportPreserver::new(),
            surface,
            scheduler,
            active_ticket: None,
            next_ticket: 0,
            notify,
        }
    }

    /// Replaces the placements. Stops playback and rewinds to the empty bin.
    ///
    /// Loading no placements disables playback.
    pub fn load(&mut self, bin: Dimensions, mut placed: Vec<PlacedItem>) {
        self.cancel_timer();
        placed.sort_by_key(|item| (item.pack_order, item.id));
        self.total_steps = placed.iter().map(|item| item.pack_order).max().unwrap_or(0);
        self.placed = placed;
        self.bin = Some(bin);
        self.cursor.step_index = -1;
        self.cursor.is_playing = false;
        self.publish();
    }

    pub fn is_available(&self) -> bool {
        self.total_steps > 0
    }

    /// Moves by `delta` steps, clamped to `[-1, total_steps - 1]`.
    ///
    /// Returns whether the cursor moved.
    pub fn step(&mut self, delta: i64) -> Result<bool, PlaybackError> {
        self.ensure_available()?;
        Ok(self.move_to(self.cursor.step_index.saturating_add(delta)))
    }

    /// Jumps to `index`, clamped to `[-1, total_steps - 1]`.
    pub fn seek(&mut self, index: i64) -> Result<bool, PlaybackError> {
        self.ensure_available()?;
        Ok(self.move_to(index))
    }

    /// Starts automatic stepping. From the last step playback restarts at the
    /// empty bin. Returns `false` if already playing.
    pub fn play(&mut self) -> Result<bool, PlaybackError> {
        self.ensure_available()?;
        if self.cursor.is_playing {
            return Ok(false);
        }
        if self.cursor.step_index >= self.terminal_index() {
            self.cursor.step_index = -1;
            self.render_current();
        }
        self.cursor.is_playing = true;
        self.start_timer();
        self.publish();
        Ok(true)
    }

    /// Stops automatic stepping. Returns `false` if not playing.
    pub fn pause(&mut self) -> bool {
        if !self.cursor.is_playing {
            return false;
        }
        self.cancel_timer();
        self.cursor.is_playing = false;
        self.publish();
        true
    }

    /// Changes the step interval, rescheduling a running timer.
    pub fn set_speed(&mut self, step_interval_ms: u64) -> Result<(), ValidationError> {
        if step_interval_ms == 0 {
            return Err(ValidationError::InvalidConfiguration(
                "step interval must be greater than 0 ms".to_string(),
            ));
        }
        self.cursor.step_interval_ms = step_interval_ms;
        if self.cursor.is_playing {
            self.cancel_timer();
            self.start_timer();
        }
        self.publish();
        Ok(())
    }

    /// Handles one timer tick. Stale tickets are ignored.
    ///
    /// Returns whether the cursor moved.
    pub fn on_tick(&mut self, ticket: TimerTicket) -> bool {
        if !self.cursor.is_playing || self.active_ticket != Some(ticket) {
            return false;
        }
        let moved = self.move_to(self.cursor.step_index + 1);
        if self.cursor.step_index >= self.terminal_index() {
            self.pause();
        }
        moved
    }

    /// Rebuilds the scene for the current cursor. Draws the empty bin when
    /// nothing is loaded but a bin is known.
    pub fn render_current(&mut self) {
        self.viewport
            .snapshot_from_live_surface(self.surface.as_ref());
        if let Some(frame) = self.frame() {
            self.surface.draw(&frame.scene, frame.camera);
        }
    }

    /// Copies the live surface camera into the preserver.
    pub fn snapshot_viewport(&mut self) -> bool {
        self.viewport
            .snapshot_from_live_surface(self.surface.as_ref())
    }

    /// Stores a camera reported by the user.
    pub fn record_camera(&mut self, camera: CameraTransform) -> bool {
        self.viewport.record_external_change(camera)
    }

    /// Forgets both the saved and the live camera; the next frame uses the
    /// bin default.
    pub fn clear_viewport(&mut self) {
        self.viewport.clear();
        self.surface.forget_camera();
    }

    /// Saves the bin default camera and redraws with it.
    pub fn reset_viewport(&mut self) -> CameraTransform {
        self.surface.forget_camera();
        let camera = match self.bin {
            Some(bin) => self.viewport.reset_to_default(&bin),
            None => {
                self.viewport.clear();
                CameraTransform::default()
            }
        };
        self.render_current();
        camera
    }

    /// The frame for the current cursor, without drawing it.
    pub fn frame(&self) -> Option<Frame> {
        let bin = self.bin?;
        let visible = self.cursor.step_index + 1;
        let items: Vec<PlacedItem> = self
            .placed
            .iter()
            .filter(|item| i64::from(item.pack_order) <= visible)
            .cloned()
            .collect();
        let title = if self.is_available() {
            format!("Step {} of {}", visible, self.total_steps)
        } else {
            "Empty bin".to_string()
        };
        Some(Frame {
            scene: SceneDescription {
                bin,
                items,
                step_index: self.cursor.step_index,
                total_steps: self.total_steps,
                title,
            },
            camera: self.viewport.camera_for_rebuild(&bin),
        })
    }

    pub fn statistics(&self) -> PlaybackStatistics {
        let current_step = (self.cursor.step_index + 1).max(0) as u32;
        let progress_percent = if self.total_steps == 0 {
            0.0
        } else {
            f64::from(current_step) / f64::from(self.total_steps) * 100.0
        };
        let items_visible = self
            .placed
            .iter()
            .filter(|item| item.pack_order <= current_step)
            .count();
        PlaybackStatistics {
            total_steps: self.total_steps,
            current_step,
            progress_percent,
            items_visible,
        }
    }

    pub fn cursor(&self) -> PlaybackCursor {
        self.cursor
    }

    pub fn total_steps(&self) -> u32 {
        self.total_steps
    }

    pub fn bin(&self) -> Option<Dimensions> {
        self.bin
    }

    /// Receives every cursor change.
    pub fn subscribe(&self) -> watch::Receiver<PlaybackCursor> {
        self.notify.subscribe()
    }

    pub fn viewport(&self) -> &ViewportPreserver {
        &self.viewport
    }

    pub fn viewport_mut(&mut self) -> &mut ViewportPreserver {
        &mut self.viewport
    }

    fn terminal_index(&self) -> i64 {
        i64::from(self.total_steps) - 1
    }

    fn ensure_available(&self) -> Result<(), PlaybackError> {
        if self.is_available() {
            Ok(())
        } else {
            Err(PlaybackError::NotAvailable)
        }
    }

    fn move_to(&mut self, target: i64) -> bool {
        let target = target.clamp(-1, self.terminal_index());
        if target == self.cursor.step_index {
            return false;
        }
        self.cursor.step_index = target;
        self.render_current();
        self.publish();
        true
    }

    fn start_timer(&mut self) {
        self.next_ticket += 1;
        let ticket = TimerTicket(self.next_ticket);
        self.active_ticket = Some(ticket);
        self.scheduler.schedule(
            ticket,
            Duration::from_millis(self.cursor.step_interval_ms),
        );
    }

    fn cancel_timer(&mut self) {
        self.active_ticket = None;
        self.scheduler.cancel();
    }

    fn publish(&self) {
        self.notify.send_replace(self.cursor);
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::{StepScheduler, TimerTicket};

    /// Records schedules; ticks are delivered by the test.
    #[derive(Clone, Default)]
    pub struct ManualScheduler {
        pub scheduled: Arc<Mutex<Vec<(TimerTicket, Duration)>>>,
        pub active: Arc<Mutex<Option<TimerTicket>>>,
    }

    impl ManualScheduler {
        pub fn active(&self) -> Option<TimerTicket> {
            *self.active.lock().unwrap()
        }

        pub fn last_interval(&self) -> Option<Duration> {
            self.scheduled.lock().unwrap().last().map(|(_, d)| *d)
        }
    }

    impl StepScheduler for ManualScheduler {
        fn schedule(&mut self, ticket: TimerTicket, interval: Duration) {
            self.scheduled.lock().unwrap().push((ticket, interval));
            *self.active.lock().unwrap() = Some(ticket);
        }

        fn cancel(&mut self) {
            *self.active.lock().unwrap() = None;
        }
    }
}
