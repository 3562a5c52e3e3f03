//! Digital pulse-train synthesis for lasers and camera triggers.
//!
//! Both designers start from the same per-target dwell cycle: a boolean
//! vector one sequence long, high inside the configured pulse windows.
//! [`TtlCycleDesigner`] hands that cycle out directly for stationary
//! (non-scanning) acquisition. [`PointScanTtlCycleDesigner`] tiles it
//! pixel-for-pixel across a scan trajectory, reproducing the trajectory's
//! padding blocks as low stretches so every pulse stays aligned with the
//! pixel the scanner is dwelling on.

use std::collections::BTreeMap;

use scan_core::params::keys;
use scan_core::{ParameterSet, Result, ScanError, ScanInfo, TtlParameters};
use tracing::debug;

use crate::waveform::samples_for;

/// Exact parameter keys the TTL designers consume, sorted.
pub const TTL_EXPECTED_PARAMETERS: &[&str] = &[
    keys::SAMPLE_RATE,
    keys::SEQUENCE_TIME,
    keys::TARGET_DEVICE,
    keys::TTL_END,
    keys::TTL_START,
];

/// One dwell cycle per target, high inside the pulse windows.
fn build_cycles(params: &TtlParameters) -> Result<BTreeMap<String, Vec<bool>>> {
    let rate = params.sample_rate_hz;
    let cycle_samples = samples_for(params.dwell_s, rate, "TTL sequence time");
    let mut cycles = BTreeMap::new();
    for target in &params.targets {
        let mut cycle = vec![false; cycle_samples];
        for window in &target.windows {
            if window.is_unused() {
                continue;
            }
            let start = (window.start_s * rate).round() as usize;
            let end = ((window.end_s * rate).round() as usize).min(cycle_samples);
            for sample in cycle[start.min(end)..end].iter_mut() {
                *sample = true;
            }
        }
        if cycles.insert(target.target.clone(), cycle).is_some() {
            return Err(ScanError::invalid_config(format!(
                "TTL target '{}' appears twice",
                target.target
            )));
        }
    }
    Ok(cycles)
}

/// Designs free-running dwell cycles for stationary acquisition.
#[derive(Debug, Clone, Copy, Default)]
pub struct TtlCycleDesigner;

impl TtlCycleDesigner {
    /// Stateless designer; construction never fails.
    pub fn new() -> Self {
        Self
    }

    /// Parameter keys [`Self::make_signal`] requires, sorted.
    pub fn expected_parameters(&self) -> &'static [&'static str] {
        TTL_EXPECTED_PARAMETERS
    }

    /// Builds one dwell cycle per target, meant to be looped by the
    /// playback hardware.
    pub fn make_signal(&self, set: &ParameterSet) -> Result<BTreeMap<String, Vec<bool>>> {
        set.check_keys("TTL cycle", TTL_EXPECTED_PARAMETERS)?;
        let params = TtlParameters::from_set(set)?;
        build_cycles(&params)
    }
}

/// Designs full-scan pulse trains aligned to a point-scan trajectory.
#[derive(Debug, Clone, Copy, Default)]
pub struct PointScanTtlCycleDesigner;

impl PointScanTtlCycleDesigner {
    /// Stateless designer; construction never fails.
    pub fn new() -> Self {
        Self
    }

    /// Parameter keys [`Self::make_signal`] requires, sorted.
    pub fn expected_parameters(&self) -> &'static [&'static str] {
        TTL_EXPECTED_PARAMETERS
    }

    /// Builds the per-target pulse trains for a whole scan.
    ///
    /// Without a trajectory (`scan_info` is `None`) this degrades to the
    /// stationary dwell cycle. With one, the cycle is repeated once per
    /// pixel and interleaved with low stretches mirroring the
    /// trajectory's padding: the leading blocks (sync delay, start
    /// acceleration, settling, initial positioning, start zero), the
    /// flyback after every line but the last, and a trailing pad out to
    /// the exact trajectory length.
    pub fn make_signal(
        &self,
        set: &ParameterSet,
        scan_info: Option<&ScanInfo>,
    ) -> Result<BTreeMap<String, Vec<bool>>> {
        set.check_keys("point-scan TTL cycle", TTL_EXPECTED_PARAMETERS)?;
        let params = TtlParameters::from_set(set)?;
        let cycles = build_cycles(&params)?;
        let Some(info) = scan_info else {
            return Ok(cycles);
        };

        let throws = &info.throws;
        let mut trains = BTreeMap::new();
        for (target, cycle) in cycles {
            if cycle.len() != info.samples_per_pixel {
                return Err(ScanError::incompatibility(format!(
                    "TTL cycle of '{target}' spans {} samples but the scan dwells {} per pixel",
                    cycle.len(),
                    info.samples_per_pixel
                )));
            }

            let mut train = Vec::with_capacity(info.total_samples);
            for pad in [
                throws.sync_delay,
                throws.start_acceleration,
                throws.settling,
                throws.initial_positioning,
                throws.start_zero,
            ] {
                train.extend(std::iter::repeat(false).take(pad));
            }

            let mut line = Vec::with_capacity(info.line_scan_samples());
            for _ in 0..info.pixels_per_line {
                line.extend_from_slice(&cycle);
            }
            for _ in 1..info.line_count {
                train.extend_from_slice(&line);
                train.extend(std::iter::repeat(false).take(throws.flyback));
            }
            train.extend_from_slice(&line);

            if train.len() > info.total_samples {
                return Err(ScanError::incompatibility(format!(
                    "TTL train of '{target}' needs {} samples but the trajectory has {}",
                    train.len(),
                    info.total_samples
                )));
            }
            train.resize(info.total_samples, false);
            trains.insert(target, train);
        }
        debug!(
            targets = trains.len(),
            total = info.total_samples,
            "point-scan TTL trains synthesized"
        );
        Ok(trains)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scan_core::ScanThrows;

    fn two_laser_set() -> ParameterSet {
        ParameterSet::new()
            .with_text_list(keys::TARGET_DEVICE, ["405", "488"])
            .with_number_table(keys::TTL_START, [vec![1e-4, 4e-3], vec![0.0, 0.0]])
            .with_number_table(keys::TTL_END, [vec![1.5e-3, 5e-3], vec![0.0, 0.0]])
            .with_number(keys::SEQUENCE_TIME, 5e-3)
            .with_number(keys::SAMPLE_RATE, 100_000.0)
    }

    #[test]
    fn dwell_cycle_matches_the_pulse_windows() {
        let cycles = TtlCycleDesigner::new().make_signal(&two_laser_set()).unwrap();
        let violet = &cycles["405"];

        assert_eq!(violet.len(), 500);
        assert!(!violet[9]);
        assert!(violet[10]);
        assert!(violet[149]);
        assert!(!violet[150]);
        assert!(!violet[399]);
        assert!(violet[400]);
        assert!(violet[499]);
        assert_eq!(violet.iter().filter(|&&s| s).count(), 140 + 100);

        // Zero-width windows mark an unused target: all low.
        let blue = &cycles["488"];
        assert_eq!(blue.len(), 500);
        assert!(blue.iter().all(|&s| !s));
    }

    #[test]
    fn pulse_window_is_clamped_to_the_cycle_end() {
        let set = two_laser_set()
            .with_number_table(keys::TTL_START, [vec![4.9e-3], vec![0.0]])
            .with_number_table(keys::TTL_END, [vec![4.999e-3], vec![0.0]]);
        let cycles = TtlCycleDesigner::new().make_signal(&set).unwrap();
        let violet = &cycles["405"];
        assert!(violet[490]);
        assert!(violet[499]);
    }

    #[test]
    fn invalid_pulse_interval_surfaces_from_the_designer() {
        let set = two_laser_set()
            .with_number_table(keys::TTL_START, [vec![6e-3], vec![0.0]])
            .with_number_table(keys::TTL_END, [vec![7e-3], vec![0.0]]);
        let err = TtlCycleDesigner::new().make_signal(&set).unwrap_err();
        assert!(matches!(err, ScanError::InvalidPulseInterval { .. }));
    }

    fn tiled_info() -> ScanInfo {
        let throws = ScanThrows {
            sync_delay: 7,
            start_acceleration: 20,
            settling: 30,
            initial_positioning: 40,
            start_zero: 50,
            flyback: 100,
            final_positioning: 200,
        };
        ScanInfo {
            pixels_per_line: 3,
            line_count: 2,
            samples_per_pixel: 500,
            total_samples: 50 + 40 + 30 + 20 + (1500 + 100) + 1500 + 200,
            sample_rate_hz: 100_000.0,
            throws,
        }
    }

    #[test]
    fn tiled_train_reproduces_the_trajectory_blocks() {
        let info = tiled_info();
        let trains = PointScanTtlCycleDesigner::new()
            .make_signal(&two_laser_set(), Some(&info))
            .unwrap();
        let violet = &trains["405"];
        let leading = info.throws.leading();

        assert_eq!(violet.len(), info.total_samples);
        // All leading padding is low, first pulse fires 10 samples into
        // the first pixel.
        assert!(violet[..leading + 10].iter().all(|&s| !s));
        assert!(violet[leading + 10]);
        // Second pixel repeats the cycle.
        assert!(violet[leading + 500 + 10]);
        assert!(!violet[leading + 500 + 9]);
        // Flyback between the lines is low.
        let line = info.line_scan_samples();
        assert!(violet[line + leading..line + leading + 100].iter().all(|&s| !s));
        // Second line starts pulsing again after the flyback.
        assert!(violet[leading + line + 100 + 10]);
        // The last line carries no flyback; the tail is the trailing pad.
        let tail = leading + 2 * line + 100;
        assert!(violet[tail..].iter().all(|&s| !s));
        assert_eq!(info.total_samples - tail, 193);

        let blue = &trains["488"];
        assert!(blue.iter().all(|&s| !s));
        assert_eq!(blue.len(), info.total_samples);
    }

    #[test]
    fn sync_delay_shifts_the_train_without_stretching_it() {
        let mut delayed = tiled_info();
        delayed.throws.sync_delay = 0;
        let trains = PointScanTtlCycleDesigner::new()
            .make_signal(&two_laser_set(), Some(&delayed))
            .unwrap();
        let undelayed_first = trains["405"].iter().position(|&s| s).unwrap();

        let info = tiled_info();
        let trains = PointScanTtlCycleDesigner::new()
            .make_signal(&two_laser_set(), Some(&info))
            .unwrap();
        let delayed_first = trains["405"].iter().position(|&s| s).unwrap();

        assert_eq!(delayed_first - undelayed_first, 7);
        assert_eq!(trains["405"].len(), info.total_samples);
    }

    #[test]
    fn without_a_trajectory_the_train_is_one_cycle() {
        let trains = PointScanTtlCycleDesigner::new()
            .make_signal(&two_laser_set(), None)
            .unwrap();
        assert_eq!(trains["405"].len(), 500);
        assert!(trains["405"][10]);
    }

    #[test]
    fn dwell_mismatch_with_the_scan_is_incompatible() {
        let mut info = tiled_info();
        info.samples_per_pixel = 400;
        let err = PointScanTtlCycleDesigner::new()
            .make_signal(&two_laser_set(), Some(&info))
            .unwrap_err();
        assert!(matches!(err, ScanError::Incompatibility { .. }));
    }

    #[test]
    fn train_longer_than_the_trajectory_is_incompatible() {
        let mut info = tiled_info();
        info.total_samples = 3000;
        let err = PointScanTtlCycleDesigner::new()
            .make_signal(&two_laser_set(), Some(&info))
            .unwrap_err();
        assert!(matches!(err, ScanError::Incompatibility { .. }));
    }

    #[test]
    fn wrong_key_set_is_a_parameter_mismatch() {
        let mut set = two_laser_set();
        set.remove(keys::TTL_END);
        let err = TtlCycleDesigner::new().make_signal(&set).unwrap_err();
        assert!(matches!(err, ScanError::ParameterMismatch { .. }));
    }
}
