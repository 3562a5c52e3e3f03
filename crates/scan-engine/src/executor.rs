//! The DAQ execution actor.
//!
//! All hardware ownership lives inside one tokio task. Callers hold a
//! cheap [`DaqExecutor`] handle that passes commands over an mpsc channel
//! and reads progress from a broadcast stream, so nothing outside the
//! actor ever touches a task object and no lock is held across a
//! hardware call. Task completion flows back the same way: a watcher
//! task per started output awaits the hardware's one-shot waiter and
//! posts a message, which keeps the actor free to accept an abort while
//! a scan is playing out.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use scan_core::hardware::{
    AnalogOutputTask, AnalogTaskConfig, ClockSource, CompletionWaiter, CounterOutputTask,
    CounterTaskConfig, DaqDevice, DaqError, DaqResult, DigitalOutputTask, DigitalTaskConfig,
    StartTrigger, TaskKind,
};
use scan_core::{AnalogChannelSpec, DeviceConfig, DigitalLineSpec, ScanInfo, SignalSet};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::state::{EngineState, ScanEvent};

/// Extra master-clock pulses generated past the end of the buffers, so
/// the slave tasks never starve on the last samples.
const CLOCK_MARGIN_SAMPLES: usize = 100;

/// Length of the park playback an abort uses to bring the outputs to
/// zero smoothly.
const ABORT_RAMP_SAMPLES: usize = 100;

/// Length of the constant buffer a direct single-channel write plays.
const DIRECT_WRITE_SAMPLES: usize = 100;

const EVENT_CHANNEL_CAPACITY: usize = 1024;
const COMMAND_CHANNEL_CAPACITY: usize = 32;

enum Command {
    Build {
        signals: SignalSet,
        reply: oneshot::Sender<DaqResult<()>>,
    },
    Start {
        reply: oneshot::Sender<DaqResult<()>>,
    },
    Abort {
        reply: oneshot::Sender<DaqResult<()>>,
    },
    SetDigital {
        target: String,
        level: bool,
        reply: oneshot::Sender<DaqResult<()>>,
    },
    SetAnalog {
        target: String,
        voltage: f64,
        reply: oneshot::Sender<DaqResult<()>>,
    },
    Query {
        reply: oneshot::Sender<EngineState>,
    },
}

struct TaskDone {
    kind: TaskKind,
    generation: u64,
    result: DaqResult<()>,
}

/// Handle to the execution actor.
///
/// Clone freely; all clones drive the same engine. The actor exits and
/// releases the hardware when the last handle is dropped.
#[derive(Clone)]
pub struct DaqExecutor {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<ScanEvent>,
    busy: Arc<AtomicBool>,
}

impl DaqExecutor {
    /// Spawns the engine actor on the current tokio runtime.
    pub fn spawn(device: Arc<dyn DaqDevice>, config: DeviceConfig) -> Self {
        let (commands, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (done_tx, done_rx) = mpsc::channel(8);
        let busy = Arc::new(AtomicBool::new(false));

        let actor = EngineActor {
            device,
            config,
            state: EngineState::Idle,
            busy: Arc::clone(&busy),
            events: events.clone(),
            done_tx,
            tasks: None,
            pending: 0,
            generation: 0,
            signal_sent: false,
        };
        tokio::spawn(actor.run(command_rx, done_rx));

        Self {
            commands,
            events,
            busy,
        }
    }

    /// Subscribe to the engine's event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.events.subscribe()
    }

    /// Whether a scan currently holds the hardware. Safe to poll from
    /// any thread without disturbing the engine.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Create the scan's tasks and stage every buffer.
    pub async fn build(&self, signals: SignalSet) -> DaqResult<()> {
        self.request(|reply| Command::Build { signals, reply })
            .await?
    }

    /// Start a built scan: arm the slaves, then release the trigger.
    pub async fn start(&self) -> DaqResult<()> {
        self.request(|reply| Command::Start { reply }).await?
    }

    /// Build and immediately start a scan.
    ///
    /// When the synthesis geometry is passed along, every buffer is
    /// cross-checked against its total sample count before any hardware
    /// task exists.
    pub async fn run_scan(&self, signals: SignalSet, info: Option<&ScanInfo>) -> DaqResult<()> {
        if let Some(info) = info {
            for (target, samples) in signals.buffer_lengths() {
                if samples != info.total_samples {
                    return Err(DaqError::BufferMismatch {
                        details: format!(
                            "target '{target}' has {samples} samples, scan geometry expects {}",
                            info.total_samples
                        ),
                    });
                }
            }
        }
        self.build(signals).await?;
        self.start().await
    }

    /// Abort the scan in flight, ramping the outputs to zero.
    pub async fn abort(&self) -> DaqResult<()> {
        self.request(|reply| Command::Abort { reply }).await?
    }

    /// Hold one digital line at a constant level, outside any scan.
    ///
    /// Plays a short finite task and waits for it to finish before
    /// returning, so the line is guaranteed settled. Refused with
    /// [`DaqError::DeviceBusy`] while a scan holds the hardware.
    pub async fn set_digital_line(
        &self,
        target: impl Into<String>,
        level: bool,
    ) -> DaqResult<()> {
        let target = target.into();
        self.request(|reply| Command::SetDigital {
            target,
            level,
            reply,
        })
        .await?
    }

    /// Hold one analog channel at a constant voltage, outside any scan.
    ///
    /// Same finite-task pattern and busy guard as
    /// [`DaqExecutor::set_digital_line`].
    pub async fn set_analog_channel(
        &self,
        target: impl Into<String>,
        voltage: f64,
    ) -> DaqResult<()> {
        let target = target.into();
        self.request(|reply| Command::SetAnalog {
            target,
            voltage,
            reply,
        })
        .await?
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> DaqResult<EngineState> {
        self.request(|reply| Command::Query { reply }).await
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> DaqResult<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| engine_gone())?;
        response.await.map_err(|_| engine_gone())
    }
}

fn engine_gone() -> DaqError {
    DaqError::Disconnected {
        message: "execution engine task is gone".to_string(),
    }
}

/// The scan's live hardware tasks, owned by the actor.
struct ScanTasks {
    counter: Option<Box<dyn CounterOutputTask>>,
    analog: Option<Box<dyn AnalogOutputTask>>,
    digital: Option<Box<dyn DigitalOutputTask>>,
    /// Channel specs in staged buffer order, kept for the abort ramp.
    analog_channels: Vec<AnalogChannelSpec>,
    /// Staged analog buffers, kept to read the position an abort froze
    /// the scanner at.
    analog_buffers: Vec<Vec<f64>>,
    digital_lines: Vec<DigitalLineSpec>,
    sample_rate_hz: f64,
    total_samples: usize,
    /// Task whose completion carries the public scan-done signal: the
    /// analog trajectory when one exists, the pulse train otherwise.
    primary: TaskKind,
}

struct EngineActor {
    device: Arc<dyn DaqDevice>,
    config: DeviceConfig,
    state: EngineState,
    busy: Arc<AtomicBool>,
    events: broadcast::Sender<ScanEvent>,
    done_tx: mpsc::Sender<TaskDone>,
    tasks: Option<ScanTasks>,
    /// Started tasks that have not yet posted a completion.
    pending: usize,
    /// Bumped on every build and abort; watcher messages from an older
    /// generation are stale and dropped.
    generation: u64,
    /// Once-only latch for [`ScanEvent::Done`] within one scan.
    signal_sent: bool,
}

impl EngineActor {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut done: mpsc::Receiver<TaskDone>,
    ) {
        info!(device = self.device.name(), "execution engine up");
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Build { signals, reply }) => {
                        let _ = reply.send(self.handle_build(signals).await);
                    }
                    Some(Command::Start { reply }) => {
                        let _ = reply.send(self.handle_start().await);
                    }
                    Some(Command::Abort { reply }) => {
                        let _ = reply.send(self.handle_abort().await);
                    }
                    Some(Command::SetDigital { target, level, reply }) => {
                        let _ = reply.send(self.handle_set_digital(&target, level).await);
                    }
                    Some(Command::SetAnalog { target, voltage, reply }) => {
                        let _ = reply.send(self.handle_set_analog(&target, voltage).await);
                    }
                    Some(Command::Query { reply }) => {
                        let _ = reply.send(self.state);
                    }
                    None => break,
                },
                Some(message) = done.recv() => {
                    self.handle_task_done(message).await;
                }
            }
        }
        self.release_tasks().await;
        debug!("execution engine down");
    }

    fn set_state(&mut self, to: EngineState) {
        if self.state != to {
            debug!(from = %self.state, to = %to, "engine state");
            self.state = to;
            self.busy.store(to.is_busy(), Ordering::Release);
        }
    }

    fn emit(&self, event: ScanEvent) {
        let _ = self.events.send(event);
    }

    fn spawn_watcher(&self, waiter: CompletionWaiter) {
        let done_tx = self.done_tx.clone();
        let generation = self.generation;
        tokio::spawn(async move {
            let kind = waiter.kind();
            let result = waiter.wait().await;
            let _ = done_tx.send(TaskDone {
                kind,
                generation,
                result,
            })
            .await;
        });
    }

    // ===== Build =====

    async fn handle_build(&mut self, signals: SignalSet) -> DaqResult<()> {
        if self.state != EngineState::Idle {
            warn!(state = %self.state, "scan request rejected, engine busy");
            return Err(DaqError::DeviceBusy);
        }
        self.busy.store(true, Ordering::Release);
        self.generation += 1;
        self.signal_sent = false;

        match self.build_tasks(signals).await {
            Ok(tasks) => {
                self.emit(ScanEvent::Built {
                    total_samples: tasks.total_samples,
                    analog_targets: tasks.analog_channels.len(),
                    digital_targets: tasks.digital_lines.len(),
                });
                self.tasks = Some(tasks);
                self.set_state(EngineState::Built);
                Ok(())
            }
            Err(error) => {
                warn!(%error, "scan build failed, tasks released");
                self.busy.store(false, Ordering::Release);
                self.emit(ScanEvent::Failed {
                    error: error.clone(),
                });
                Err(error)
            }
        }
    }

    async fn build_tasks(&mut self, signals: SignalSet) -> DaqResult<ScanTasks> {
        let SignalSet {
            sample_rate_hz,
            analog,
            digital,
        } = signals;
        if analog.is_empty() && digital.is_empty() {
            return Err(DaqError::InvalidTaskConfig {
                message: "scan carries no signals".to_string(),
            });
        }

        let mut total: Option<usize> = None;
        for (target, samples) in analog
            .iter()
            .map(|(t, s)| (t.as_str(), s.len()))
            .chain(digital.iter().map(|(t, s)| (t.as_str(), s.len())))
        {
            match total {
                None => total = Some(samples),
                Some(expected) if expected != samples => {
                    return Err(DaqError::BufferMismatch {
                        details: format!(
                            "target '{target}' has {samples} samples, others have {expected}"
                        ),
                    });
                }
                Some(_) => {}
            }
        }
        let total_samples = total.unwrap_or_default();
        if total_samples == 0 {
            return Err(DaqError::InvalidTaskConfig {
                message: "signal buffers are empty".to_string(),
            });
        }

        // Map logical targets to physical channels, then order the
        // buffers the way the hardware scans its channel list.
        let mut analog_pairs = Vec::with_capacity(analog.len());
        for (target, samples) in analog {
            let spec = self
                .config
                .analog_for_target(&target)
                .ok_or_else(|| DaqError::UnknownTarget {
                    target: target.clone(),
                })?
                .clone();
            analog_pairs.push((spec, samples));
        }
        analog_pairs.sort_by_key(|(spec, _)| spec.channel);

        let mut digital_pairs = Vec::with_capacity(digital.len());
        for (target, samples) in digital {
            let spec = self
                .config
                .digital_for_target(&target)
                .ok_or_else(|| DaqError::UnknownTarget {
                    target: target.clone(),
                })?
                .clone();
            digital_pairs.push((spec, samples));
        }
        digital_pairs.sort_by_key(|(spec, _)| spec.line);

        let has_analog = !analog_pairs.is_empty();

        // The counter runs unconditionally as the master timebase, a
        // little past the buffers so the slaves never starve. It arms on
        // the analog start trigger so its margin pulses only begin once
        // the scan is actually rolling.
        let counter_config = CounterTaskConfig {
            channel: self.config.counter_channel,
            sample_rate_hz,
            sample_count: total_samples + CLOCK_MARGIN_SAMPLES,
            trigger: if has_analog {
                StartTrigger::AnalogStart
            } else {
                StartTrigger::Immediate
            },
        };
        let counter = self.device.counter_task(&counter_config).await?;

        let mut analog_task = None;
        let mut analog_channels = Vec::new();
        let mut analog_buffers = Vec::new();
        if has_analog {
            let channels: Vec<AnalogChannelSpec> =
                analog_pairs.iter().map(|(spec, _)| spec.clone()).collect();
            let analog_config = AnalogTaskConfig {
                channels: channels.clone(),
                sample_rate_hz,
                sample_count: total_samples,
                clock: ClockSource::Internal,
                trigger: StartTrigger::Immediate,
            };
            let mut task = self.device.analog_task(&analog_config).await?;
            let buffers: Vec<Vec<f64>> =
                analog_pairs.into_iter().map(|(_, samples)| samples).collect();
            task.write(&buffers).await?;
            analog_task = Some(task);
            analog_channels = channels;
            analog_buffers = buffers;
        }

        let mut digital_task = None;
        let mut digital_lines = Vec::new();
        if !digital_pairs.is_empty() {
            let lines: Vec<DigitalLineSpec> =
                digital_pairs.iter().map(|(spec, _)| spec.clone()).collect();
            // With analog in play the digital task slaves to its clock
            // and start trigger, keeping the pulse trains phase-locked
            // to the trajectory. Alone, it runs free on internal timing.
            let digital_config = DigitalTaskConfig {
                lines: lines.clone(),
                sample_rate_hz,
                sample_count: total_samples,
                clock: if has_analog {
                    ClockSource::AnalogSampleClock
                } else {
                    ClockSource::Internal
                },
                trigger: if has_analog {
                    StartTrigger::AnalogStart
                } else {
                    StartTrigger::Immediate
                },
            };
            let mut task = self.device.digital_task(&digital_config).await?;
            let buffers: Vec<Vec<bool>> =
                digital_pairs.into_iter().map(|(_, samples)| samples).collect();
            task.write(&buffers).await?;
            digital_task = Some(task);
            digital_lines = lines;
        }

        info!(
            total = total_samples,
            analog = analog_channels.len(),
            digital = digital_lines.len(),
            rate = sample_rate_hz,
            "scan tasks built and buffers staged"
        );
        Ok(ScanTasks {
            counter: Some(counter),
            analog: analog_task,
            digital: digital_task,
            analog_channels,
            analog_buffers,
            digital_lines,
            sample_rate_hz,
            total_samples,
            primary: if has_analog {
                TaskKind::AnalogOutput
            } else {
                TaskKind::DigitalOutput
            },
        })
    }

    // ===== Start =====

    async fn handle_start(&mut self) -> DaqResult<()> {
        match self.state {
            EngineState::Built => {}
            EngineState::Idle => {
                return Err(DaqError::InvalidTaskConfig {
                    message: "no scan built to start".to_string(),
                });
            }
            _ => {
                warn!(state = %self.state, "start rejected, engine busy");
                return Err(DaqError::DeviceBusy);
            }
        }
        self.set_state(EngineState::Armed);

        let waiters = {
            let Some(tasks) = self.tasks.as_mut() else {
                return Err(DaqError::InvalidTaskConfig {
                    message: "no scan built to start".to_string(),
                });
            };
            match gather_waiters(tasks) {
                Ok(waiters) => waiters,
                Err(error) => {
                    self.teardown_after_failure(error.clone()).await;
                    return Err(error);
                }
            }
        };
        self.pending = waiters.len();
        for waiter in waiters {
            self.spawn_watcher(waiter);
        }

        let start_result = match self.tasks.as_mut() {
            Some(tasks) => start_in_order(tasks).await,
            None => Err(DaqError::InvalidTaskConfig {
                message: "no scan built to start".to_string(),
            }),
        };
        if let Err(error) = start_result {
            error!(%error, "task start failed, tearing down");
            self.teardown_after_failure(error.clone()).await;
            return Err(error);
        }

        self.set_state(EngineState::Running);
        self.emit(ScanEvent::Started);
        info!("scan running");
        Ok(())
    }

    // ===== Completion =====

    async fn handle_task_done(&mut self, message: TaskDone) {
        if message.generation != self.generation {
            debug!(task = %message.kind, "stale completion ignored");
            return;
        }

        if self.state == EngineState::Aborting {
            if let Err(error) = &message.result {
                debug!(task = %message.kind, %error, "completion during abort");
            }
            self.pending = self.pending.saturating_sub(1);
            if self.pending == 0 {
                self.release_tasks().await;
                self.set_state(EngineState::Idle);
                self.emit(ScanEvent::Aborted);
                info!("scan aborted, outputs parked");
            }
            return;
        }

        match message.result {
            Ok(()) => {
                debug!(task = %message.kind, "task completed");
                self.emit(ScanEvent::TaskFinished { kind: message.kind });
                // The primary task's completion is the scan-done signal;
                // the clock and secondary outputs only release resources.
                let primary = self.tasks.as_ref().map(|tasks| tasks.primary);
                if primary == Some(message.kind) && !self.signal_sent {
                    self.signal_sent = true;
                    self.emit(ScanEvent::Done);
                    info!("scan complete");
                }
                self.pending = self.pending.saturating_sub(1);
                if self.pending == 0 {
                    self.release_tasks().await;
                    self.set_state(EngineState::Idle);
                    debug!("scan tasks released");
                } else if self.state == EngineState::Running {
                    self.set_state(EngineState::Draining);
                }
            }
            Err(error) => {
                error!(task = %message.kind, %error, "task failed, tearing down scan");
                self.teardown_after_failure(error).await;
            }
        }
    }

    // ===== Abort =====

    async fn handle_abort(&mut self) -> DaqResult<()> {
        match self.state {
            EngineState::Idle => {
                debug!("abort requested while idle");
                return Ok(());
            }
            EngineState::Aborting => return Ok(()),
            EngineState::Built => {
                // Nothing started yet; just let the hardware go.
                self.generation += 1;
                self.pending = 0;
                self.release_tasks().await;
                self.set_state(EngineState::Idle);
                self.emit(ScanEvent::Aborted);
                info!("built scan discarded");
                return Ok(());
            }
            EngineState::Armed | EngineState::Running | EngineState::Draining => {}
        }

        info!("aborting scan, ramping outputs to park");
        self.set_state(EngineState::Aborting);
        self.generation += 1;
        self.pending = 0;

        let Some(mut tasks) = self.tasks.take() else {
            self.set_state(EngineState::Idle);
            self.emit(ScanEvent::Aborted);
            return Ok(());
        };
        let sample_rate_hz = tasks.sample_rate_hz;
        let lines = tasks.digital_lines.clone();

        // Lasers and triggers go low first.
        if let Some(mut digital) = tasks.digital.take() {
            let _ = digital.stop().await;
            let _ = digital.clear().await;
        }
        // Freeze the scanner and note where it stopped.
        let mut ramp_from = Vec::new();
        if let Some(mut analog) = tasks.analog.take() {
            let position = analog.samples_generated().unwrap_or(0) as usize;
            let _ = analog.stop().await;
            let _ = analog.clear().await;
            let index = position.min(tasks.total_samples.saturating_sub(1));
            for (spec, buffer) in tasks.analog_channels.iter().zip(&tasks.analog_buffers) {
                let value = buffer.get(index).copied().unwrap_or_default();
                ramp_from.push((spec.clone(), value));
            }
            debug!(position, "analog outputs frozen");
        }
        if let Some(mut counter) = tasks.counter.take() {
            let _ = counter.stop().await;
            let _ = counter.clear().await;
        }
        drop(tasks);

        match self.start_park_tasks(ramp_from, lines, sample_rate_hz).await {
            Ok(0) => {
                self.set_state(EngineState::Idle);
                self.emit(ScanEvent::Aborted);
                info!("scan aborted");
                Ok(())
            }
            Ok(started) => {
                // Stay in Aborting until the park playback reports done.
                self.pending = started;
                Ok(())
            }
            Err(error) => {
                error!(%error, "output park failed after abort");
                self.release_tasks().await;
                self.set_state(EngineState::Idle);
                self.emit(ScanEvent::Failed {
                    error: error.clone(),
                });
                Err(error)
            }
        }
    }

    /// Starts the post-abort park playback: a half-sine ramp from the
    /// frozen analog position to zero, and all digital lines low.
    async fn start_park_tasks(
        &mut self,
        ramp_from: Vec<(AnalogChannelSpec, f64)>,
        lines: Vec<DigitalLineSpec>,
        sample_rate_hz: f64,
    ) -> DaqResult<usize> {
        let mut parked = ScanTasks {
            counter: None,
            analog: None,
            digital: None,
            analog_channels: Vec::new(),
            analog_buffers: Vec::new(),
            digital_lines: Vec::new(),
            sample_rate_hz,
            total_samples: ABORT_RAMP_SAMPLES,
            // Park completions never emit Done; the Aborting path ignores
            // the primary entirely.
            primary: TaskKind::AnalogOutput,
        };
        let mut started = 0;

        if !ramp_from.is_empty() {
            let channels: Vec<AnalogChannelSpec> =
                ramp_from.iter().map(|(spec, _)| spec.clone()).collect();
            let config = AnalogTaskConfig {
                channels: channels.clone(),
                sample_rate_hz,
                sample_count: ABORT_RAMP_SAMPLES,
                clock: ClockSource::Internal,
                trigger: StartTrigger::Immediate,
            };
            let mut task = self.device.analog_task(&config).await?;
            let buffers: Vec<Vec<f64>> = ramp_from
                .iter()
                .map(|(_, from)| ramp_to_zero(*from, ABORT_RAMP_SAMPLES))
                .collect();
            task.write(&buffers).await?;
            let waiter = task.take_waiter()?;
            task.start().await?;
            self.spawn_watcher(waiter);
            parked.analog = Some(task);
            parked.analog_channels = channels;
            parked.analog_buffers = buffers;
            started += 1;
        }

        if !lines.is_empty() {
            let config = DigitalTaskConfig {
                lines: lines.clone(),
                sample_rate_hz,
                sample_count: ABORT_RAMP_SAMPLES,
                clock: ClockSource::Internal,
                trigger: StartTrigger::Immediate,
            };
            let mut task = self.device.digital_task(&config).await?;
            let low = vec![vec![false; ABORT_RAMP_SAMPLES]; lines.len()];
            task.write(&low).await?;
            let waiter = task.take_waiter()?;
            task.start().await?;
            self.spawn_watcher(waiter);
            parked.digital = Some(task);
            parked.digital_lines = lines;
            started += 1;
        }

        if started > 0 {
            self.tasks = Some(parked);
        }
        Ok(started)
    }

    // ===== Direct single-channel writes =====

    async fn handle_set_digital(&mut self, target: &str, level: bool) -> DaqResult<()> {
        if self.state != EngineState::Idle {
            warn!(state = %self.state, target, "direct write rejected, engine busy");
            return Err(DaqError::DeviceBusy);
        }
        let spec = self
            .config
            .digital_for_target(target)
            .ok_or_else(|| DaqError::UnknownTarget {
                target: target.to_string(),
            })?
            .clone();

        self.busy.store(true, Ordering::Release);
        let config = DigitalTaskConfig {
            lines: vec![spec],
            sample_rate_hz: self.config.default_sample_rate,
            sample_count: DIRECT_WRITE_SAMPLES,
            clock: ClockSource::Internal,
            trigger: StartTrigger::Immediate,
        };
        let result = match self.device.digital_task(&config).await {
            Ok(mut task) => {
                let played = async {
                    task.write(&[vec![level; DIRECT_WRITE_SAMPLES]]).await?;
                    let waiter = task.take_waiter()?;
                    task.start().await?;
                    waiter.wait().await
                }
                .await;
                let _ = task.stop().await;
                let _ = task.clear().await;
                played
            }
            Err(error) => Err(error),
        };
        self.busy.store(false, Ordering::Release);
        match &result {
            Ok(()) => debug!(target, level, "digital line set"),
            Err(error) => warn!(target, %error, "digital line write failed"),
        }
        result
    }

    async fn handle_set_analog(&mut self, target: &str, voltage: f64) -> DaqResult<()> {
        if self.state != EngineState::Idle {
            warn!(state = %self.state, target, "direct write rejected, engine busy");
            return Err(DaqError::DeviceBusy);
        }
        let spec = self
            .config
            .analog_for_target(target)
            .ok_or_else(|| DaqError::UnknownTarget {
                target: target.to_string(),
            })?
            .clone();

        self.busy.store(true, Ordering::Release);
        let config = AnalogTaskConfig {
            channels: vec![spec],
            sample_rate_hz: self.config.default_sample_rate,
            sample_count: DIRECT_WRITE_SAMPLES,
            clock: ClockSource::Internal,
            trigger: StartTrigger::Immediate,
        };
        let result = match self.device.analog_task(&config).await {
            Ok(mut task) => {
                let played = async {
                    task.write(&[vec![voltage; DIRECT_WRITE_SAMPLES]]).await?;
                    let waiter = task.take_waiter()?;
                    task.start().await?;
                    waiter.wait().await
                }
                .await;
                let _ = task.stop().await;
                let _ = task.clear().await;
                played
            }
            Err(error) => Err(error),
        };
        self.busy.store(false, Ordering::Release);
        match &result {
            Ok(()) => debug!(target, voltage, "analog channel set"),
            Err(error) => warn!(target, %error, "analog channel write failed"),
        }
        result
    }

    // ===== Teardown =====

    async fn teardown_after_failure(&mut self, error: DaqError) {
        self.release_tasks().await;
        self.pending = 0;
        self.generation += 1;
        self.set_state(EngineState::Idle);
        self.emit(ScanEvent::Failed { error });
    }

    /// Stops and clears whatever tasks remain, digital first so the
    /// light sources drop before the scanner stops.
    async fn release_tasks(&mut self) {
        if let Some(mut tasks) = self.tasks.take() {
            if let Some(mut digital) = tasks.digital.take() {
                let _ = digital.stop().await;
                let _ = digital.clear().await;
            }
            if let Some(mut analog) = tasks.analog.take() {
                let _ = analog.stop().await;
                let _ = analog.clear().await;
            }
            if let Some(mut counter) = tasks.counter.take() {
                let _ = counter.stop().await;
                let _ = counter.clear().await;
            }
        }
    }
}

fn gather_waiters(tasks: &mut ScanTasks) -> DaqResult<Vec<CompletionWaiter>> {
    let mut waiters = Vec::with_capacity(3);
    if let Some(counter) = tasks.counter.as_mut() {
        waiters.push(counter.take_waiter()?);
    }
    if let Some(analog) = tasks.analog.as_mut() {
        waiters.push(analog.take_waiter()?);
    }
    if let Some(digital) = tasks.digital.as_mut() {
        waiters.push(digital.take_waiter()?);
    }
    Ok(waiters)
}

/// Counter first, armed on the analog start trigger; digital next,
/// queued on the same trigger; analog last, because its start fires the
/// physical trigger that releases the other two simultaneously.
async fn start_in_order(tasks: &mut ScanTasks) -> DaqResult<()> {
    if let Some(counter) = tasks.counter.as_mut() {
        counter.start().await?;
    }
    if let Some(digital) = tasks.digital.as_mut() {
        digital.start().await?;
    }
    if let Some(analog) = tasks.analog.as_mut() {
        analog.start().await?;
    }
    Ok(())
}

/// Cosine-eased ramp from `from` to zero, ending exactly at zero.
fn ramp_to_zero(from: f64, samples: usize) -> Vec<f64> {
    let mut out = Vec::with_capacity(samples);
    for k in 1..=samples {
        let phase = std::f64::consts::PI * k as f64 / samples as f64;
        out.push(from * 0.5 * (1.0 + phase.cos()));
    }
    out
}
