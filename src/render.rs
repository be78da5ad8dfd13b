//! Render surface abstraction.
//!
//! The session never draws anything itself. It hands a `SceneDescription` and
//! a camera to a `RenderSurface`; the service binary publishes those frames to
//! the browser, which reports its live camera back.

use std::sync::{Arc, RwLock};

use serde::Serialize;
use tokio::sync::broadcast;
use utoipa::ToSchema;

use crate::model::{Dimensions, PlacedItem};
use crate::viewport::CameraTransform;

/// Everything needed to draw one playback frame.
#[derive(Clone, Debug, PartialEq, Serialize, ToSchema)]
pub struct SceneDescription {
    pub bin: Dimensions,
    /// Items with `pack_order <= step_index + 1`, in pack order.
    pub items: Vec<PlacedItem>,
    pub step_index: i64,
    pub total_steps: u32,
    pub title: String,
}

/// A drawn frame as published to subscribers.
#[derive(Clone, Debug, PartialEq, Serialize, ToSchema)]
pub struct Frame {
    pub scene: SceneDescription,
    pub camera: CameraTransform,
}

/// Draws frames and reports the camera the user is currently looking through.
pub trait RenderSurface: Send {
    fn draw(&mut self, scene: &SceneDescription, camera: CameraTransform);

    /// The live camera, if the surface knows one.
    fn current_camera(&self) -> Option<CameraTransform>;

    /// Drops the live camera so the next frame's camera is adopted.
    fn forget_camera(&mut self) {}
}

/// Last camera reported by the browser, shared between the HTTP handlers and
/// the surface.
#[derive(Clone, Debug, Default)]
pub struct LiveCamera {
    inner: Arc<RwLock<Option<CameraTransform>>>,
}

impl LiveCamera {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a reported camera. Non-finite transforms are rejected.
    pub fn report(&self, camera: CameraTransform) -> bool {
        if !camera.is_finite() {
            return false;
        }
        self.replace(Some(camera));
        true
    }

    pub fn clear(&self) {
        self.replace(None);
    }

    pub fn get(&self) -> Option<CameraTransform> {
        match self.inner.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn replace(&self, camera: Option<CameraTransform>) {
        match self.inner.write() {
            Ok(mut guard) => *guard = camera,
            Err(poisoned) => *poisoned.into_inner() = camera,
        }
    }
}

/// Publishes frames over a broadcast channel for the SSE stream.
pub struct BroadcastSurface {
    frames: broadcast::Sender<Frame>,
    live_camera: LiveCamera,
}

impl BroadcastSurface {
    pub fn new(capacity: usize, live_camera: LiveCamera) -> Self {
        let (frames, _) = broadcast::channel(capacity.max(1));
        Self {
            frames,
            live_camera,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Frame> {
        self.frames.subscribe()
    }

    /// Sender handle for creating new subscriptions without the surface.
    pub fn sender(&self) -> broadcast::Sender<Frame> {
        self.frames.clone()
    }
}

impl RenderSurface for BroadcastSurface {
    fn draw(&mut self, scene: &SceneDescription, camera: CameraTransform) {
        let frame = Frame {
            scene: scene.clone(),
            camera,
        };
        // No subscribers is fine; the frame is simply dropped.
        let _ = self.frames.send(frame);
    }

    fn current_camera(&self) -> Option<CameraTransform> {
        self.live_camera.get()
    }

    fn forget_camera(&mut self) {
        self.live_camera.clear();
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::{Arc, Mutex};

    use super::*;

    /// Records every drawn frame. Clones share frames and live camera.
    #[derive(Clone, Default)]
    pub struct RecordingSurface {
        pub frames: Arc<Mutex<Vec<Frame>>>,
        pub live_camera: LiveCamera,
    }

    impl RecordingSurface {
        pub fn last_frame(&self) -> Option<Frame> {
            self.frames.lock().unwrap().last().cloned()
        }

        pub fn frame_count(&self) -> usize {
            self.frames.lock().unwrap().len()
        }
    }

    impl RenderSurface for RecordingSurface {
        fn draw(&mut self, scene: &SceneDescription, camera: CameraTransform) {
            self.frames.lock().unwrap().push(Frame {
                scene: scene.clone(),
                camera,
            });
        }

        fn current_camera(&self) -> Option<CameraTransform> {
            self.live_camera.get()
        }

        fn forget_camera(&mut self) {
            self.live_camera.clear();
        }
    }
}
