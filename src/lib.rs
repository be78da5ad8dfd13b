//! Packing dashboard: item registry, weights, step playback and camera state
//! around an external 3-D bin packing service.

pub mod api;
pub mod config;
pub mod formats;
pub mod gateway;
pub mod model;
pub mod playback;
pub mod registry;
pub mod render;
pub mod session;
pub mod training;
pub mod types;
pub mod viewport;
pub mod weights;
