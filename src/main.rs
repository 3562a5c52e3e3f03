//! Command-line front end for microscan.
//!
//! Turns a TOML scan request into signals and either reports on them or
//! plays them against the simulated DAQ card.
//!
//! # Usage
//!
//! Check a request without synthesizing:
//! ```bash
//! microscan check scan.toml
//! ```
//!
//! Synthesize and print the signal layout:
//! ```bash
//! microscan synth scan.toml
//! ```
//!
//! Play the scan on the simulated device:
//! ```bash
//! microscan run scan.toml --device device.toml
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use microscan::ScanRequest;
use scan_core::hardware::VoltageRange;
use scan_core::{AnalogChannelSpec, DeviceConfig, DigitalLineSpec, ScanInfo, SignalSet};
use scan_driver_sim::SimDaqDevice;
use scan_engine::{DaqExecutor, ScanEvent};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// How fast the simulated card "plays" a task before reporting done.
const SIM_PLAYBACK: Duration = Duration::from_millis(50);

#[derive(Parser)]
#[command(name = "microscan")]
#[command(about = "Scan-signal synthesis and synchronized DAQ triggering", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a request's parameter sets without synthesizing
    Check {
        /// Path to the scan request TOML
        request: PathBuf,
    },

    /// Synthesize a request and print the signal layout
    Synth {
        /// Path to the scan request TOML
        request: PathBuf,
    },

    /// Play a request on the simulated DAQ device
    Run {
        /// Path to the scan request TOML
        request: PathBuf,

        /// Device map TOML; derived from the request when absent
        #[arg(long)]
        device: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Check { request } => check(&request),
        Commands::Synth { request } => synthesize(&request),
        Commands::Run { request, device } => run(&request, device.as_deref()).await,
    }
}

fn load_request(path: &Path) -> Result<ScanRequest> {
    ScanRequest::load(path).with_context(|| format!("loading scan request {}", path.display()))
}

fn check(path: &Path) -> Result<()> {
    let request = load_request(path)?;
    request.check()?;
    println!("request is compatible");
    Ok(())
}

fn synthesize(path: &Path) -> Result<()> {
    let request = load_request(path)?;
    let (signals, info) = request.build()?;
    print_summary(&signals, info.as_ref());
    Ok(())
}

async fn run(path: &Path, device_path: Option<&Path>) -> Result<()> {
    let request = load_request(path)?;
    let (signals, info) = request.build()?;
    print_summary(&signals, info.as_ref());

    let config = match device_path {
        Some(p) => DeviceConfig::load(p)
            .with_context(|| format!("loading device map {}", p.display()))?,
        None => device_map_for(&signals),
    };
    config.validate()?;

    let device = SimDaqDevice::new(config.name.clone());
    device.set_auto_complete(Some(SIM_PLAYBACK));
    info!(
        device = %config.name,
        analog = config.analog.len(),
        digital = config.digital.len(),
        "playing the scan on the simulated card"
    );
    let engine = DaqExecutor::spawn(Arc::new(device), config);
    let mut events = engine.subscribe();
    engine.run_scan(signals, info.as_ref()).await?;

    loop {
        let event = events.recv().await.context("engine event stream closed")?;
        match event {
            ScanEvent::TaskFinished { kind } => println!("task finished: {kind}"),
            ScanEvent::Done => {
                println!("scan complete");
                break;
            }
            ScanEvent::Aborted => {
                println!("scan aborted");
                break;
            }
            ScanEvent::Failed { error } => return Err(error.into()),
            _ => {}
        }
    }
    Ok(())
}

fn print_summary(signals: &SignalSet, info: Option<&ScanInfo>) {
    println!("sample rate: {} Hz", signals.sample_rate_hz);
    if let Some(info) = info {
        println!(
            "geometry: {} px/line x {} lines, {} samples/pixel, {} samples total",
            info.pixels_per_line, info.line_count, info.samples_per_pixel, info.total_samples
        );
    }
    for (target, samples) in &signals.analog {
        let peak = samples.iter().fold(0.0_f64, |acc, s| acc.max(s.abs()));
        println!(
            "  analog  '{target}': {} samples, peak {peak:.3}",
            samples.len()
        );
    }
    for (target, samples) in &signals.digital {
        let high = samples.iter().filter(|&&s| s).count();
        println!(
            "  digital '{target}': {} samples, {high} high",
            samples.len()
        );
    }
}

/// Builds a simulated device map covering exactly the request's targets,
/// in buffer order.
fn device_map_for(signals: &SignalSet) -> DeviceConfig {
    DeviceConfig {
        name: "sim-6363".to_string(),
        counter_channel: 0,
        default_sample_rate: signals.sample_rate_hz,
        analog: signals
            .analog
            .keys()
            .enumerate()
            .map(|(index, target)| AnalogChannelSpec {
                target: target.clone(),
                channel: index as u32,
                range: VoltageRange::default(),
            })
            .collect(),
        digital: signals
            .digital
            .keys()
            .enumerate()
            .map(|(index, target)| DigitalLineSpec {
                target: target.clone(),
                line: index as u32,
            })
            .collect(),
    }
}
