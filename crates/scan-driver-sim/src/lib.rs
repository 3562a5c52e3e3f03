//! Simulated DAQ backend.
//!
//! [`SimDaqDevice`] implements [`scan_core::hardware::DaqDevice`] entirely
//! in memory: tasks validate their configs, enforce channel voltage
//! ranges on staged writes, and record everything they are asked to do in
//! an event journal tests can interrogate. Completion is driven either
//! manually ([`SimDaqDevice::complete`] / [`SimDaqDevice::fail`]) or on a
//! timer when auto-completion is enabled, so engine tests can exercise
//! both orderly finishes and hardware faults without a card installed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use scan_core::hardware::{
    AnalogOutputTask, AnalogTaskConfig, CompletionHandle, CompletionWaiter, CounterOutputTask,
    CounterTaskConfig, DaqDevice, DaqError, DaqResult, DigitalOutputTask, DigitalTaskConfig,
    OutputTask, TaskKind,
};
use scan_core::{AnalogChannelSpec, DigitalLineSpec};
use tracing::debug;

/// One recorded device interaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimEvent {
    /// A task was created from a validated config.
    TaskCreated {
        kind: TaskKind,
    },
    /// Buffers were staged successfully.
    Wrote {
        kind: TaskKind,
        channels: usize,
        samples: usize,
    },
    /// The task was committed and started (or armed on its trigger).
    Started {
        kind: TaskKind,
    },
    /// Generation was stopped early.
    Stopped {
        kind: TaskKind,
    },
    /// The task released its resources.
    Cleared {
        kind: TaskKind,
    },
}

struct SimShared {
    name: String,
    auto_complete: Mutex<Option<Duration>>,
    journal: Mutex<Vec<SimEvent>>,
    pending: Mutex<HashMap<TaskKind, CompletionHandle>>,
    progress: Mutex<HashMap<TaskKind, u64>>,
    active: AtomicUsize,
    last_counter: Mutex<Option<CounterTaskConfig>>,
    last_analog: Mutex<Option<AnalogTaskConfig>>,
    last_digital: Mutex<Option<DigitalTaskConfig>>,
    last_analog_write: Mutex<Option<Vec<Vec<f64>>>>,
    last_digital_write: Mutex<Option<Vec<Vec<bool>>>>,
}

impl SimShared {
    fn record(&self, event: SimEvent) {
        self.journal.lock().push(event);
    }

    fn finish(&self, kind: TaskKind, result: DaqResult<()>, generated: u64) {
        self.progress.lock().insert(kind, generated);
        if let Some(mut handle) = self.pending.lock().remove(&kind) {
            handle.fire(result);
        }
    }
}

/// In-memory DAQ device.
///
/// Clones share the same simulated hardware, so tests keep one clone for
/// inspection while the engine owns another.
#[derive(Clone)]
pub struct SimDaqDevice {
    shared: Arc<SimShared>,
}

impl SimDaqDevice {
    /// Fresh simulated card with an empty journal.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(SimShared {
                name: name.into(),
                auto_complete: Mutex::new(None),
                journal: Mutex::new(Vec::new()),
                pending: Mutex::new(HashMap::new()),
                progress: Mutex::new(HashMap::new()),
                active: AtomicUsize::new(0),
                last_counter: Mutex::new(None),
                last_analog: Mutex::new(None),
                last_digital: Mutex::new(None),
                last_analog_write: Mutex::new(None),
                last_digital_write: Mutex::new(None),
            }),
        }
    }

    /// Completes every started task `delay` after its start call, as real
    /// hardware would once the buffer plays out.
    pub fn set_auto_complete(&self, delay: Option<Duration>) {
        *self.shared.auto_complete.lock() = delay;
    }

    /// Reports `kind` done with the full buffer generated. Returns false
    /// when no such task is waiting.
    pub fn complete(&self, kind: TaskKind) -> bool {
        let generated = self
            .shared
            .progress
            .lock()
            .get(&kind)
            .copied()
            .unwrap_or_default();
        let had = self.shared.pending.lock().contains_key(&kind);
        self.shared.finish(kind, Ok(()), generated);
        had
    }

    /// Reports `kind` failed with `error`.
    pub fn fail(&self, kind: TaskKind, error: DaqError) -> bool {
        let had = self.shared.pending.lock().contains_key(&kind);
        self.shared.finish(kind, Err(error), 0);
        had
    }

    /// Sets the generated-sample progress the task reports.
    pub fn advance(&self, kind: TaskKind, samples: u64) {
        self.shared.progress.lock().insert(kind, samples);
    }

    /// Everything the device has been asked to do, in order.
    pub fn journal(&self) -> Vec<SimEvent> {
        self.shared.journal.lock().clone()
    }

    /// Forget the journal so a test can scope assertions to what follows.
    pub fn clear_journal(&self) {
        self.shared.journal.lock().clear();
    }

    /// Task kinds in the order their start calls arrived.
    pub fn started_order(&self) -> Vec<TaskKind> {
        self.journal()
            .into_iter()
            .filter_map(|event| match event {
                SimEvent::Started { kind } => Some(kind),
                _ => None,
            })
            .collect()
    }

    /// How many tasks of `kind` have been created.
    pub fn created_count(&self, kind: TaskKind) -> usize {
        self.journal()
            .into_iter()
            .filter(|event| matches!(event, SimEvent::TaskCreated { kind: k } if *k == kind))
            .count()
    }

    /// Tasks currently alive (created and not yet dropped).
    pub fn active_tasks(&self) -> usize {
        self.shared.active.load(Ordering::SeqCst)
    }

    /// Config of the most recently created counter task.
    pub fn last_counter_config(&self) -> Option<CounterTaskConfig> {
        self.shared.last_counter.lock().clone()
    }

    /// Config of the most recently created analog task.
    pub fn last_analog_config(&self) -> Option<AnalogTaskConfig> {
        self.shared.last_analog.lock().clone()
    }

    /// Config of the most recently created digital task.
    pub fn last_digital_config(&self) -> Option<DigitalTaskConfig> {
        self.shared.last_digital.lock().clone()
    }

    /// Buffers of the most recent successful analog write, channel order.
    pub fn last_analog_write(&self) -> Option<Vec<Vec<f64>>> {
        self.shared.last_analog_write.lock().clone()
    }

    /// Buffers of the most recent successful digital write, line order.
    pub fn last_digital_write(&self) -> Option<Vec<Vec<bool>>> {
        self.shared.last_digital_write.lock().clone()
    }
}

#[async_trait]
impl DaqDevice for SimDaqDevice {
    fn name(&self) -> &str {
        &self.shared.name
    }

    async fn counter_task(
        &self,
        config: &CounterTaskConfig,
    ) -> DaqResult<Box<dyn CounterOutputTask>> {
        config.validate()?;
        *self.shared.last_counter.lock() = Some(config.clone());
        Ok(Box::new(SimCounterTask {
            task: SimTask::new(
                TaskKind::Counter,
                config.sample_count,
                Arc::clone(&self.shared),
            ),
        }))
    }

    async fn analog_task(
        &self,
        config: &AnalogTaskConfig,
    ) -> DaqResult<Box<dyn AnalogOutputTask>> {
        config.validate()?;
        *self.shared.last_analog.lock() = Some(config.clone());
        Ok(Box::new(SimAnalogTask {
            channels: config.channels.clone(),
            task: SimTask::new(
                TaskKind::AnalogOutput,
                config.sample_count,
                Arc::clone(&self.shared),
            ),
        }))
    }

    async fn digital_task(
        &self,
        config: &DigitalTaskConfig,
    ) -> DaqResult<Box<dyn DigitalOutputTask>> {
        config.validate()?;
        *self.shared.last_digital.lock() = Some(config.clone());
        Ok(Box::new(SimDigitalTask {
            lines: config.lines.clone(),
            task: SimTask::new(
                TaskKind::DigitalOutput,
                config.sample_count,
                Arc::clone(&self.shared),
            ),
        }))
    }
}

struct SimTask {
    kind: TaskKind,
    sample_count: usize,
    started: bool,
    cleared: bool,
    waiter: Option<CompletionWaiter>,
    shared: Arc<SimShared>,
}

impl SimTask {
    fn new(kind: TaskKind, sample_count: usize, shared: Arc<SimShared>) -> Self {
        let (handle, waiter) = CompletionWaiter::channel(kind);
        shared.pending.lock().insert(kind, handle);
        shared.progress.lock().insert(kind, 0);
        shared.active.fetch_add(1, Ordering::SeqCst);
        shared.record(SimEvent::TaskCreated { kind });
        debug!(device = %shared.name, task = %kind, "sim task created");
        Self {
            kind,
            sample_count,
            started: false,
            cleared: false,
            waiter: Some(waiter),
            shared,
        }
    }

    fn start(&mut self) -> DaqResult<()> {
        if self.cleared || self.started {
            return Err(DaqError::TaskState {
                kind: self.kind,
                operation: "start",
            });
        }
        self.started = true;
        self.shared.record(SimEvent::Started { kind: self.kind });
        debug!(device = %self.shared.name, task = %self.kind, "sim task started");
        if let Some(delay) = *self.shared.auto_complete.lock() {
            let shared = Arc::clone(&self.shared);
            let kind = self.kind;
            let generated = self.sample_count as u64;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                shared.finish(kind, Ok(()), generated);
            });
        }
        Ok(())
    }

    fn stop(&mut self) -> DaqResult<()> {
        if self.cleared {
            return Err(DaqError::TaskState {
                kind: self.kind,
                operation: "stop",
            });
        }
        if self.started {
            self.shared.record(SimEvent::Stopped { kind: self.kind });
            self.started = false;
        }
        Ok(())
    }

    fn clear(&mut self) {
        if !self.cleared {
            self.cleared = true;
            self.started = false;
            self.shared.pending.lock().remove(&self.kind);
            self.shared.record(SimEvent::Cleared { kind: self.kind });
            debug!(device = %self.shared.name, task = %self.kind, "sim task cleared");
        }
    }

    fn check_can_write(&self) -> DaqResult<()> {
        if self.cleared || self.started {
            return Err(DaqError::TaskState {
                kind: self.kind,
                operation: "write",
            });
        }
        Ok(())
    }

    fn take_waiter(&mut self) -> DaqResult<CompletionWaiter> {
        self.waiter.take().ok_or(DaqError::WaiterTaken { kind: self.kind })
    }

    fn samples_generated(&self) -> u64 {
        self.shared
            .progress
            .lock()
            .get(&self.kind)
            .copied()
            .unwrap_or_default()
    }
}

impl Drop for SimTask {
    fn drop(&mut self) {
        self.clear();
        self.shared.active.fetch_sub(1, Ordering::SeqCst);
    }
}

macro_rules! impl_output_task {
    ($type:ty) => {
        #[async_trait]
        impl OutputTask for $type {
            fn kind(&self) -> TaskKind {
                self.task.kind
            }

            fn sample_count(&self) -> usize {
                self.task.sample_count
            }

            async fn start(&mut self) -> DaqResult<()> {
                self.task.start()
            }

            async fn stop(&mut self) -> DaqResult<()> {
                self.task.stop()
            }

            async fn clear(&mut self) -> DaqResult<()> {
                self.task.clear();
                Ok(())
            }

            fn take_waiter(&mut self) -> DaqResult<CompletionWaiter> {
                self.task.take_waiter()
            }

            fn samples_generated(&self) -> DaqResult<u64> {
                Ok(self.task.samples_generated())
            }
        }
    };
}

struct SimCounterTask {
    task: SimTask,
}

impl_output_task!(SimCounterTask);
impl CounterOutputTask for SimCounterTask {}

struct SimAnalogTask {
    channels: Vec<AnalogChannelSpec>,
    task: SimTask,
}

impl_output_task!(SimAnalogTask);

#[async_trait]
impl AnalogOutputTask for SimAnalogTask {
    async fn write(&mut self, buffers: &[Vec<f64>]) -> DaqResult<usize> {
        self.task.check_can_write()?;
        if buffers.len() != self.channels.len() {
            return Err(DaqError::BufferMismatch {
                details: format!(
                    "{} buffers staged for {} analog channels",
                    buffers.len(),
                    self.channels.len()
                ),
            });
        }
        for (spec, buffer) in self.channels.iter().zip(buffers) {
            if buffer.len() != self.task.sample_count {
                return Err(DaqError::BufferMismatch {
                    details: format!(
                        "channel ao{} staged {} samples, task expects {}",
                        spec.channel,
                        buffer.len(),
                        self.task.sample_count
                    ),
                });
            }
            for &voltage in buffer {
                if !spec.range.contains(voltage) {
                    return Err(DaqError::VoltageOutOfRange {
                        channel: spec.channel,
                        voltage,
                        range: spec.range,
                    });
                }
            }
        }
        *self.task.shared.last_analog_write.lock() = Some(buffers.to_vec());
        self.task.shared.record(SimEvent::Wrote {
            kind: TaskKind::AnalogOutput,
            channels: buffers.len(),
            samples: self.task.sample_count,
        });
        Ok(self.task.sample_count)
    }
}

struct SimDigitalTask {
    lines: Vec<DigitalLineSpec>,
    task: SimTask,
}

impl_output_task!(SimDigitalTask);

#[async_trait]
impl DigitalOutputTask for SimDigitalTask {
    async fn write(&mut self, buffers: &[Vec<bool>]) -> DaqResult<usize> {
        self.task.check_can_write()?;
        if buffers.len() != self.lines.len() {
            return Err(DaqError::BufferMismatch {
                details: format!(
                    "{} buffers staged for {} digital lines",
                    buffers.len(),
                    self.lines.len()
                ),
            });
        }
        for (spec, buffer) in self.lines.iter().zip(buffers) {
            if buffer.len() != self.task.sample_count {
                return Err(DaqError::BufferMismatch {
                    details: format!(
                        "line do{} staged {} samples, task expects {}",
                        spec.line,
                        buffer.len(),
                        self.task.sample_count
                    ),
                });
            }
        }
        *self.task.shared.last_digital_write.lock() = Some(buffers.to_vec());
        self.task.shared.record(SimEvent::Wrote {
            kind: TaskKind::DigitalOutput,
            channels: buffers.len(),
            samples: self.task.sample_count,
        });
        Ok(self.task.sample_count)
    }
}
