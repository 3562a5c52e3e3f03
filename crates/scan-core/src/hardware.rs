//! Hardware abstraction for synchronized output tasks.
//!
//! The execution engine drives a DAQ device through three task families,
//! one per physical interface:
//!
//! - a **counter** task generating the master sample clock,
//! - an **analog output** task playing position waveforms,
//! - a **digital output** task playing TTL pulse trains.
//!
//! Tasks are created fresh for every scan from typed configs, have their
//! buffers staged with [`AnalogOutputTask::write`] /
//! [`DigitalOutputTask::write`] before any task starts, and are released
//! with [`OutputTask::clear`] when the scan ends or aborts. Trigger and
//! clock routing between the tasks is expressed as data
//! ([`StartTrigger`], [`ClockSource`]) so a backend can wire the physical
//! terminals however its hardware names them.
//!
//! Completion is reported through a one-shot [`CompletionWaiter`] taken
//! from a started task; the engine hands each waiter to a watcher that
//! posts a message back when the hardware reports done.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::oneshot;

use crate::config::{AnalogChannelSpec, DigitalLineSpec};

/// Convenience alias for results using [`DaqError`].
pub type DaqResult<T> = std::result::Result<T, DaqError>;

// =============================================================================
// Errors
// =============================================================================

/// Hardware-level errors raised by a DAQ backend or the execution engine.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DaqError {
    /// A scan or direct write is already in flight.
    #[error("Device is busy (a scan or direct write is in flight)")]
    DeviceBusy,

    /// No physical channel is mapped for a requested target.
    #[error("No physical channel mapped for target '{target}'")]
    UnknownTarget {
        /// The unmapped target id.
        target: String,
    },

    /// A staged sample lies outside the channel's configured range.
    #[error("Voltage {voltage:.3} V outside {range} on channel ao{channel}")]
    VoltageOutOfRange {
        /// Physical analog channel index.
        channel: u32,
        /// Offending sample value, volts.
        voltage: f64,
        /// Configured output range.
        range: VoltageRange,
    },

    /// Signal buffers disagree on sample count or channel count.
    #[error("Signal buffers disagree: {details}")]
    BufferMismatch {
        /// What disagreed.
        details: String,
    },

    /// An operation was attempted in the wrong task state.
    #[error("{kind} task cannot {operation} in its current state")]
    TaskState {
        /// Task family.
        kind: TaskKind,
        /// Operation that was refused.
        operation: &'static str,
    },

    /// The one-shot completion waiter was already taken.
    #[error("Completion waiter for {kind} task already taken")]
    WaiterTaken {
        /// Task family.
        kind: TaskKind,
    },

    /// A task configuration failed validation.
    #[error("Invalid task configuration: {message}")]
    InvalidTaskConfig {
        /// What was wrong.
        message: String,
    },

    /// The backend or the engine went away.
    #[error("Device disconnected: {message}")]
    Disconnected {
        /// What was lost.
        message: String,
    },
}

impl DaqError {
    /// True when the error is the busy guard refusing an overlapping
    /// operation.
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::DeviceBusy)
    }
}

// =============================================================================
// Task identity and routing
// =============================================================================

/// The three hardware task families of one scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// Counter/timer generating the master sample clock.
    Counter,
    /// Analog position outputs.
    AnalogOutput,
    /// Digital TTL outputs.
    DigitalOutput,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TaskKind::Counter => "counter",
            TaskKind::AnalogOutput => "analog-output",
            TaskKind::DigitalOutput => "digital-output",
        };
        write!(f, "{label}")
    }
}

/// Sample clock feeding an output task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClockSource {
    /// The device's internal timebase at the configured rate.
    #[default]
    Internal,
    /// The counter task's pulse output, the shared master clock.
    CounterOutput,
    /// The analog-output task's exported sample clock. Keeps digital
    /// samples phase-locked to the analog ones.
    AnalogSampleClock,
}

/// Start condition of an output task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartTrigger {
    /// Start as soon as the task is committed.
    #[default]
    Immediate,
    /// Arm and wait for the analog-output task's start trigger.
    AnalogStart,
}

// =============================================================================
// Voltage ranges
// =============================================================================

/// Output voltage range of an analog channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VoltageRange {
    /// -10 V to +10 V.
    #[default]
    #[serde(rename = "bipolar_10v")]
    Bipolar10V,
    /// -5 V to +5 V.
    #[serde(rename = "bipolar_5v")]
    Bipolar5V,
    /// 0 V to +10 V.
    #[serde(rename = "unipolar_10v")]
    Unipolar10V,
    /// 0 V to +5 V.
    #[serde(rename = "unipolar_5v")]
    Unipolar5V,
}

impl VoltageRange {
    /// Lower bound, volts.
    pub fn min(&self) -> f64 {
        match self {
            Self::Bipolar10V => -10.0,
            Self::Bipolar5V => -5.0,
            Self::Unipolar10V | Self::Unipolar5V => 0.0,
        }
    }

    /// Upper bound, volts.
    pub fn max(&self) -> f64 {
        match self {
            Self::Bipolar10V | Self::Unipolar10V => 10.0,
            Self::Bipolar5V | Self::Unipolar5V => 5.0,
        }
    }

    /// Whether `voltage` lies inside the range (bounds included).
    pub fn contains(&self, voltage: f64) -> bool {
        voltage >= self.min() && voltage <= self.max()
    }
}

impl fmt::Display for VoltageRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            VoltageRange::Bipolar10V => "±10V",
            VoltageRange::Bipolar5V => "±5V",
            VoltageRange::Unipolar10V => "0-10V",
            VoltageRange::Unipolar5V => "0-5V",
        };
        write!(f, "{label}")
    }
}

// =============================================================================
// Task configurations
// =============================================================================

/// Configuration of the counter/timer master-clock task.
#[derive(Debug, Clone, PartialEq)]
pub struct CounterTaskConfig {
    /// Counter channel index on the device.
    pub channel: u32,
    /// Pulse rate, hertz.
    pub sample_rate_hz: f64,
    /// Pulses to generate (scan total plus margin).
    pub sample_count: usize,
    /// Start condition.
    pub trigger: StartTrigger,
}

/// Configuration of the analog-output task.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalogTaskConfig {
    /// Channels to drive, sorted by physical channel index.
    pub channels: Vec<AnalogChannelSpec>,
    /// Sample rate, hertz.
    pub sample_rate_hz: f64,
    /// Samples per channel.
    pub sample_count: usize,
    /// Sample clock selection.
    pub clock: ClockSource,
    /// Start condition.
    pub trigger: StartTrigger,
}

/// Configuration of the digital-output task.
#[derive(Debug, Clone, PartialEq)]
pub struct DigitalTaskConfig {
    /// Lines to drive, sorted by physical line index.
    pub lines: Vec<DigitalLineSpec>,
    /// Sample rate, hertz.
    pub sample_rate_hz: f64,
    /// Samples per line.
    pub sample_count: usize,
    /// Sample clock selection.
    pub clock: ClockSource,
    /// Start condition.
    pub trigger: StartTrigger,
}

impl CounterTaskConfig {
    /// Validate rate and sample count.
    pub fn validate(&self) -> DaqResult<()> {
        validate_timing(self.sample_rate_hz, self.sample_count)
    }
}

impl AnalogTaskConfig {
    /// Validate channels, rate and sample count.
    pub fn validate(&self) -> DaqResult<()> {
        if self.channels.is_empty() {
            return Err(DaqError::InvalidTaskConfig {
                message: "analog task has no channels".to_string(),
            });
        }
        validate_timing(self.sample_rate_hz, self.sample_count)
    }
}

impl DigitalTaskConfig {
    /// Validate lines, rate and sample count.
    pub fn validate(&self) -> DaqResult<()> {
        if self.lines.is_empty() {
            return Err(DaqError::InvalidTaskConfig {
                message: "digital task has no lines".to_string(),
            });
        }
        validate_timing(self.sample_rate_hz, self.sample_count)
    }
}

fn validate_timing(sample_rate_hz: f64, sample_count: usize) -> DaqResult<()> {
    if sample_rate_hz <= 0.0 {
        return Err(DaqError::InvalidTaskConfig {
            message: format!("sample rate must be positive, got {sample_rate_hz}"),
        });
    }
    if sample_count == 0 {
        return Err(DaqError::InvalidTaskConfig {
            message: "sample count must be positive".to_string(),
        });
    }
    Ok(())
}

// =============================================================================
// Completion signalling
// =============================================================================

/// Receiving half of a task's one-shot completion notification.
#[derive(Debug)]
pub struct CompletionWaiter {
    kind: TaskKind,
    rx: oneshot::Receiver<DaqResult<()>>,
}

impl CompletionWaiter {
    /// Create a connected handle/waiter pair for `kind`.
    pub fn channel(kind: TaskKind) -> (CompletionHandle, CompletionWaiter) {
        let (tx, rx) = oneshot::channel();
        (
            CompletionHandle {
                kind,
                tx: Some(tx),
            },
            CompletionWaiter { kind, rx },
        )
    }

    /// Task family this waiter belongs to.
    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    /// Wait for the hardware to report done (or the task to be torn down).
    pub async fn wait(self) -> DaqResult<()> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(DaqError::Disconnected {
                message: format!("{} task dropped before completing", self.kind),
            }),
        }
    }
}

/// Firing half of a task's completion notification. Fires at most once;
/// later calls are ignored.
#[derive(Debug)]
pub struct CompletionHandle {
    kind: TaskKind,
    tx: Option<oneshot::Sender<DaqResult<()>>>,
}

impl CompletionHandle {
    /// Task family this handle belongs to.
    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    /// Report completion. Only the first call delivers.
    pub fn fire(&mut self, result: DaqResult<()>) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(result);
        }
    }

    /// Whether [`CompletionHandle::fire`] already delivered.
    pub fn is_fired(&self) -> bool {
        self.tx.is_none()
    }
}

// =============================================================================
// Device and task traits
// =============================================================================

/// Operations common to all output tasks.
#[async_trait]
pub trait OutputTask: Send {
    /// Task family.
    fn kind(&self) -> TaskKind;

    /// Samples per channel this task generates.
    fn sample_count(&self) -> usize;

    /// Commit and start (or arm, when waiting on a trigger) the task.
    async fn start(&mut self) -> DaqResult<()>;

    /// Stop generation early.
    async fn stop(&mut self) -> DaqResult<()>;

    /// Release the hardware resources. Idempotent.
    async fn clear(&mut self) -> DaqResult<()>;

    /// Take the one-shot completion waiter. Fails with
    /// [`DaqError::WaiterTaken`] on a second call.
    fn take_waiter(&mut self) -> DaqResult<CompletionWaiter>;

    /// Samples generated so far, as reported by the hardware.
    fn samples_generated(&self) -> DaqResult<u64>;
}

/// Counter/timer output task (master sample clock).
pub trait CounterOutputTask: OutputTask {}

/// Analog output task with staged buffered writes.
#[async_trait]
pub trait AnalogOutputTask: OutputTask {
    /// Stage one buffer per configured channel, in channel order. Must be
    /// called before [`OutputTask::start`]; fails without touching the
    /// hardware outputs if any sample violates its channel's range.
    async fn write(&mut self, buffers: &[Vec<f64>]) -> DaqResult<usize>;
}

/// Digital output task with staged buffered writes.
#[async_trait]
pub trait DigitalOutputTask: OutputTask {
    /// Stage one buffer per configured line, in line order.
    async fn write(&mut self, buffers: &[Vec<bool>]) -> DaqResult<usize>;
}

/// A DAQ device that can create the three output task families.
#[async_trait]
pub trait DaqDevice: Send + Sync + 'static {
    /// Device name (for logs).
    fn name(&self) -> &str;

    /// Create a counter/timer task.
    async fn counter_task(
        &self,
        config: &CounterTaskConfig,
    ) -> DaqResult<Box<dyn CounterOutputTask>>;

    /// Create an analog-output task.
    async fn analog_task(&self, config: &AnalogTaskConfig)
        -> DaqResult<Box<dyn AnalogOutputTask>>;

    /// Create a digital-output task.
    async fn digital_task(
        &self,
        config: &DigitalTaskConfig,
    ) -> DaqResult<Box<dyn DigitalOutputTask>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn voltage_range_bounds() {
        assert!(VoltageRange::Bipolar10V.contains(-10.0));
        assert!(VoltageRange::Bipolar10V.contains(10.0));
        assert!(!VoltageRange::Bipolar10V.contains(10.1));

        assert!(VoltageRange::Unipolar5V.contains(0.0));
        assert!(!VoltageRange::Unipolar5V.contains(-0.1));
        assert_eq!(VoltageRange::Bipolar5V.to_string(), "±5V");
    }

    #[test]
    fn task_config_validation() {
        let counter = CounterTaskConfig {
            channel: 0,
            sample_rate_hz: 100_000.0,
            sample_count: 1000,
            trigger: StartTrigger::AnalogStart,
        };
        assert!(counter.validate().is_ok());

        let bad = CounterTaskConfig {
            sample_rate_hz: 0.0,
            ..counter
        };
        assert!(matches!(
            bad.validate(),
            Err(DaqError::InvalidTaskConfig { .. })
        ));

        let analog = AnalogTaskConfig {
            channels: Vec::new(),
            sample_rate_hz: 100_000.0,
            sample_count: 10,
            clock: ClockSource::Internal,
            trigger: StartTrigger::Immediate,
        };
        assert!(analog.validate().is_err());
    }

    #[tokio::test]
    async fn completion_fires_at_most_once() {
        let (mut handle, waiter) = CompletionWaiter::channel(TaskKind::AnalogOutput);
        assert!(!handle.is_fired());
        handle.fire(Ok(()));
        handle.fire(Err(DaqError::DeviceBusy));
        assert!(handle.is_fired());
        assert!(waiter.wait().await.is_ok());
    }

    #[tokio::test]
    async fn dropped_handle_reports_disconnect() {
        let (handle, waiter) = CompletionWaiter::channel(TaskKind::Counter);
        drop(handle);
        let err = waiter.wait().await.unwrap_err();
        assert!(matches!(err, DaqError::Disconnected { .. }));
    }
}
