//! # microscan
//!
//! Scan-signal synthesis and synchronized DAQ triggering for laser-scanning
//! microscopes. The library turns a handful of scan parameters into the
//! per-sample analog trajectories and digital pulse trains one frame needs,
//! then plays them out phase-locked on a multifunction DAQ card.
//!
//! ## Crate structure
//!
//! The stack is split into four member crates, re-exported here so a single
//! dependency pulls in the whole pipeline:
//!
//! - **`scan_core`**: shared vocabulary. Parameter sets with fail-fast key
//!   checking, the [`scan_core::ScanInfo`] alignment contract, the
//!   [`scan_core::SignalSet`] sample buffers, the hardware task abstraction
//!   and the device channel map.
//! - **`scan_designer`**: the signal designers. Stepwise stage scans, smooth
//!   galvo rasters, TTL dwell cycles and line tiling, and the
//!   [`scan_designer::ScanManager`] that combines them into one scan.
//! - **`scan_engine`**: the execution actor. Owns the counter, analog and
//!   digital tasks, sequences their triggers, and reports lifecycle events
//!   over a broadcast stream.
//! - **`scan_driver_sim`**: an in-memory DAQ card for tests and demos, with
//!   a journal of every hardware call.
//!
//! The [`request`] module at this level binds the pieces together: one TOML
//! file describing a scan job, parsed into the designer inputs.

pub mod request;

pub use request::ScanRequest;
pub use scan_core;
pub use scan_core::{
    DeviceConfig, ParameterSet, Result, ScanError, ScanInfo, SignalSet,
};
pub use scan_designer;
pub use scan_designer::{DesignerSelection, GalvoTuning, ScanManager};
pub use scan_driver_sim;
pub use scan_driver_sim::SimDaqDevice;
pub use scan_engine;
pub use scan_engine::{DaqExecutor, EngineState, ScanEvent};
