//! `scan-core`
//!
//! Shared vocabulary for the microscan stack: the types that the signal
//! designers, the scan orchestrator and the hardware execution engine agree
//! on.
//!
//! ## Key types
//!
//! - [`ParameterSet`]: string-keyed scan/TTL parameters as delivered by the
//!   controlling layer, with fail-fast key-set checking
//! - [`ScanInfo`] / [`ScanThrows`]: the alignment contract between the
//!   trajectory and TTL generators, down to exact pixel, line and padding
//!   sample counts
//! - [`SignalSet`]: the per-target analog/digital sample sequences for one
//!   scan execution
//! - [`hardware`]: the device/task abstraction the execution engine drives
//!   (counter, analog-output and digital-output tasks, trigger and clock
//!   routing, voltage ranges)
//! - [`DeviceConfig`]: the target-to-physical-channel map supplied by the
//!   installation's TOML configuration
//! - [`ScanError`]: the error type shared across the stack

pub mod config;
pub mod error;
pub mod hardware;
pub mod params;
pub mod scan_info;
pub mod signal;

pub use config::{AnalogChannelSpec, DeviceConfig, DigitalLineSpec};
pub use error::{Result, ScanError};
pub use params::{ParameterSet, ParameterValue, PulseWindow, ScanParameters, TtlParameters};
pub use scan_info::{ScanInfo, ScanThrows};
pub use signal::SignalSet;
