//! End-to-end integration: TOML scan request through synthesis and a
//! complete run on the simulated DAQ card.
//!
//! Exercises the whole public surface the way the CLI does: parse the
//! request, synthesize signals, spawn the execution engine and follow
//! its event stream to completion.

use std::sync::Arc;
use std::time::Duration;

use microscan::{DaqExecutor, EngineState, ScanEvent, ScanRequest};
use scan_core::hardware::{ClockSource, StartTrigger, TaskKind, VoltageRange};
use scan_core::{AnalogChannelSpec, DeviceConfig, DigitalLineSpec};
use scan_driver_sim::SimDaqDevice;
use tokio::sync::broadcast;

const CUBE_REQUEST: &str = r#"
designer = "stage"

[scan]
target_device = ["vpz x", "vpz y", "vpz z"]
axis_length = [5.0, 5.0, 5.0]
axis_step_size = [1.0, 1.0, 1.0]
axis_startpos = [0.0, 0.0, 0.0]
sequence_time = 0.005
sample_rate = 100000.0
return_time = 0.001

[ttl]
target_device = ["405", "488"]
ttl_start = [[0.0001, 0.004], [0.0, 0.0]]
ttl_end = [[0.0015, 0.005], [0.0, 0.0]]
sequence_time = 0.005
sample_rate = 100000.0
"#;

const RASTER_REQUEST: &str = r#"
designer = "galvo"

[galvo]
max_acceleration_umps2 = 5.0e8

[scan]
target_device = ["galvo fast", "galvo slow"]
axis_length = [100.0, 4.0]
axis_step_size = [1.0, 1.0]
axis_startpos = [0.0, 0.0]
sequence_time = 0.00001
sample_rate = 100000.0

[ttl]
target_device = ["405"]
ttl_start = [[0.0]]
ttl_end = [[0.000005]]
sequence_time = 0.00001
sample_rate = 100000.0
"#;

fn device_config() -> DeviceConfig {
    let analog_targets = ["vpz x", "vpz y", "vpz z", "galvo fast", "galvo slow"];
    let digital_targets = ["405", "488"];
    DeviceConfig {
        name: "sim-6363".to_string(),
        counter_channel: 0,
        default_sample_rate: 100_000.0,
        analog: analog_targets
            .iter()
            .enumerate()
            .map(|(index, target)| AnalogChannelSpec {
                target: (*target).to_string(),
                channel: index as u32,
                range: VoltageRange::Bipolar10V,
            })
            .collect(),
        digital: digital_targets
            .iter()
            .enumerate()
            .map(|(index, target)| DigitalLineSpec {
                target: (*target).to_string(),
                line: index as u32,
            })
            .collect(),
    }
}

async fn next_matching(
    rx: &mut broadcast::Receiver<ScanEvent>,
    want: fn(&ScanEvent) -> bool,
) -> ScanEvent {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for an engine event")
            .expect("event stream closed");
        if want(&event) {
            return event;
        }
    }
}

/// Waits until the done signal has fired and all `tasks` hardware tasks
/// have reported finished, in whatever order they land.
async fn drain_scan(rx: &mut broadcast::Receiver<ScanEvent>, tasks: usize) {
    let mut finished = 0;
    let mut done = false;
    while finished < tasks || !done {
        match next_matching(rx, |_| true).await {
            ScanEvent::TaskFinished { .. } => finished += 1,
            ScanEvent::Done => done = true,
            _ => {}
        }
    }
}

#[tokio::test]
async fn stage_cube_request_runs_to_completion() {
    let request = ScanRequest::from_toml_str(CUBE_REQUEST).unwrap();
    let (signals, info) = request.build().unwrap();
    let info = info.unwrap();
    assert_eq!(info.total_samples, 111_600);

    let device = SimDaqDevice::new("sim");
    device.set_auto_complete(Some(Duration::from_millis(2)));
    let engine = DaqExecutor::spawn(Arc::new(device.clone()), device_config());
    let mut events = engine.subscribe();

    engine.run_scan(signals, Some(&info)).await.unwrap();
    assert_eq!(
        device.started_order(),
        vec![
            TaskKind::Counter,
            TaskKind::DigitalOutput,
            TaskKind::AnalogOutput
        ]
    );

    drain_scan(&mut events, 3).await;
    assert_eq!(engine.state().await.unwrap(), EngineState::Idle);
    assert!(!engine.is_busy());
    assert_eq!(device.active_tasks(), 0);
}

#[tokio::test]
async fn galvo_raster_request_runs_to_completion() {
    let request = ScanRequest::from_toml_str(RASTER_REQUEST).unwrap();
    let (signals, info) = request.build().unwrap();
    let info = info.unwrap();
    assert_eq!(info.pixels_per_line, 100);
    assert_eq!(info.line_count, 4);

    // Trajectory and pulse train share one timeline.
    let total = info.total_samples;
    assert!(signals.analog.values().all(|s| s.len() == total));
    assert!(signals.digital.values().all(|s| s.len() == total));

    let device = SimDaqDevice::new("sim");
    device.set_auto_complete(Some(Duration::from_millis(2)));
    let engine = DaqExecutor::spawn(Arc::new(device.clone()), device_config());
    let mut events = engine.subscribe();

    engine.run_scan(signals, Some(&info)).await.unwrap();
    let digital = device.last_digital_config().unwrap();
    assert_eq!(digital.clock, ClockSource::AnalogSampleClock);
    assert_eq!(digital.trigger, StartTrigger::AnalogStart);
    let counter = device.last_counter_config().unwrap();
    assert_eq!(counter.trigger, StartTrigger::AnalogStart);

    drain_scan(&mut events, 3).await;
    assert_eq!(engine.state().await.unwrap(), EngineState::Idle);
}

#[tokio::test]
async fn static_positioner_request_plays_dwell_cycles_only() {
    let text = CUBE_REQUEST.replace("designer = \"stage\"", "designer = \"stage\"\nstatic_positioner = true");
    let request = ScanRequest::from_toml_str(&text).unwrap();
    assert!(request.static_positioner);
    let (signals, info) = request.build().unwrap();
    assert!(info.is_none());
    assert!(signals.analog.is_empty());
    assert_eq!(signals.digital.len(), 2);

    let device = SimDaqDevice::new("sim");
    device.set_auto_complete(Some(Duration::from_millis(2)));
    let engine = DaqExecutor::spawn(Arc::new(device.clone()), device_config());
    let mut events = engine.subscribe();

    engine.run_scan(signals, None).await.unwrap();
    assert_eq!(
        device.started_order(),
        vec![TaskKind::Counter, TaskKind::DigitalOutput]
    );
    next_matching(&mut events, |e| matches!(e, ScanEvent::Done)).await;
}

#[tokio::test]
async fn abort_parks_the_hardware_from_a_request_run() {
    let request = ScanRequest::from_toml_str(CUBE_REQUEST).unwrap();
    let (signals, _) = request.build().unwrap();

    let device = SimDaqDevice::new("sim");
    let engine = DaqExecutor::spawn(Arc::new(device.clone()), device_config());
    let mut events = engine.subscribe();
    engine.run_scan(signals, None).await.unwrap();

    device.advance(TaskKind::AnalogOutput, 500);
    engine.abort().await.unwrap();
    assert_eq!(engine.state().await.unwrap(), EngineState::Aborting);

    // Park playback: ramp to zero plus digital low.
    device.complete(TaskKind::AnalogOutput);
    device.complete(TaskKind::DigitalOutput);
    next_matching(&mut events, |e| matches!(e, ScanEvent::Aborted)).await;
    assert_eq!(engine.state().await.unwrap(), EngineState::Idle);
    assert_eq!(device.active_tasks(), 0);

    let park = device.last_digital_write().unwrap();
    assert!(park.iter().all(|line| line.iter().all(|&s| !s)));
}

#[tokio::test]
async fn incompatible_request_fails_before_touching_hardware() {
    // Break the TTL dwell so it no longer matches the scan dwell.
    let mut lines: Vec<&str> = CUBE_REQUEST.lines().collect();
    let last_seq = lines
        .iter()
        .rposition(|l| l.starts_with("sequence_time"))
        .unwrap();
    lines[last_seq] = "sequence_time = 0.004";
    let text = lines.join("\n");

    let request = ScanRequest::from_toml_str(&text).unwrap();
    let err = request.build().unwrap_err();
    assert!(err.is_configuration());
}
