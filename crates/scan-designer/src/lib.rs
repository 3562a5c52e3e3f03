//! Signal synthesis for raster scanning.
//!
//! This crate turns validated scan parameters into the sample buffers a
//! data-acquisition card plays out: analog positioning trajectories for
//! stage or galvanometer scanners, and digital pulse trains that gate
//! lasers and camera triggers pixel-for-pixel against those trajectories.
//!
//! The entry point is [`ScanManager`], which pairs a trajectory designer
//! with the TTL designers and merges their outputs into a single
//! [`scan_core::SignalSet`] ready for hardware playback.

pub mod galvo;
pub mod manager;
pub mod stage;
pub mod ttl;
mod waveform;

pub use galvo::{GalvoScanDesigner, GalvoTuning, GALVO_EXPECTED_PARAMETERS};
pub use manager::{DesignerSelection, ScanManager, TrajectoryDesigner};
pub use stage::{StageScanDesigner, STAGE_EXPECTED_PARAMETERS};
pub use ttl::{PointScanTtlCycleDesigner, TtlCycleDesigner, TTL_EXPECTED_PARAMETERS};
