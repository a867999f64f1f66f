//! Facial expression tracking inference runtime
//!
//! Ingests zone-tagged camera frames, resamples them into model input
//! tensors, dispatches asynchronous per-zone inference, and exposes the most
//! recent blendshape parameters under a defined locking discipline.

pub mod config;
pub mod engine;
pub mod params;
pub mod utils;
pub mod zones;

pub use config::Config;
pub use engine::{DataView, ImageFrame, ImagePlane, Runtime};
pub use params::Param;
pub use zones::{Timestamp, Zone, Zones, TIMESTAMP_INVALID};
