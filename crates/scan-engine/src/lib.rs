//! Synchronized execution of scan signals on DAQ hardware.
//!
//! [`DaqExecutor`] owns the hardware for the lifetime of the process: it
//! is an actor task holding the device handle and every output task,
//! driven over a command channel and reporting through a broadcast event
//! stream. One scan at a time moves through the engine's state machine;
//! overlapping requests are refused while the hardware is in use, and an
//! abort parks the outputs with a short ramp-down instead of leaving the
//! scanner wherever the buffer happened to stop. Outside a scan the same
//! busy guard covers the direct single-channel writes
//! ([`DaqExecutor::set_digital_line`], [`DaqExecutor::set_analog_channel`])
//! used to toggle shutters and park positioners.
//!
//! ```text
//! ┌──────┐  build()  ┌───────┐  start()  ┌───────┐         ┌─────────┐
//! │ Idle │──────────▶│ Built │──────────▶│ Armed │────────▶│ Running │
//! └──────┘           └───────┘           └───────┘         └────┬────┘
//!    ▲                                                          │
//!    │           all tasks done          ┌──────────┐  first    │
//!    │◀──────────────────────────────────│ Draining │◀──────────┤
//!    │                                   └──────────┘  task done│
//!    │           outputs parked          ┌──────────┐           │
//!    │◀──────────────────────────────────│ Aborting │◀──────────┘
//!    │                                   └──────────┘   abort()
//! ```

pub mod executor;
pub mod state;

pub use executor::DaqExecutor;
pub use state::{EngineState, ScanEvent};
