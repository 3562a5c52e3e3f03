//! Raster trajectory synthesis for sample-positioning stages.
//!
//! A stage scan covers up to three orthogonal axes. The first axis sweeps
//! a linear ramp once per line and snaps back with a half-sine return;
//! the remaining axes advance one step per line (or per full pass of the
//! faster axis) during that same return window, so the stage never moves
//! between pixels of a line.

use std::collections::BTreeMap;

use scan_core::params::keys;
use scan_core::{ParameterSet, Result, ScanError, ScanInfo, ScanParameters, ScanThrows};
use tracing::debug;

use crate::waveform::{half_sine_step, linear_ramp, samples_for};

/// Exact parameter keys a stage scan consumes, sorted.
pub const STAGE_EXPECTED_PARAMETERS: &[&str] = &[
    keys::AXIS_LENGTH,
    keys::AXIS_STARTPOS,
    keys::AXIS_STEP_SIZE,
    keys::RETURN_TIME,
    keys::SAMPLE_RATE,
    keys::SEQUENCE_TIME,
    keys::TARGET_DEVICE,
];

/// Designs stepwise raster trajectories for slow positioning hardware.
#[derive(Debug, Clone, Copy, Default)]
pub struct StageScanDesigner;

impl StageScanDesigner {
    /// Stateless designer; construction never fails.
    pub fn new() -> Self {
        Self
    }

    /// Parameter keys [`Self::make_signal`] requires, sorted.
    pub fn expected_parameters(&self) -> &'static [&'static str] {
        STAGE_EXPECTED_PARAMETERS
    }

    /// Builds one positioning trajectory per axis target plus the scan
    /// geometry the TTL designer needs to stay aligned with them.
    pub fn make_signal(
        &self,
        set: &ParameterSet,
    ) -> Result<(BTreeMap<String, Vec<f64>>, ScanInfo)> {
        set.check_keys("stage scan", STAGE_EXPECTED_PARAMETERS)?;
        let params = ScanParameters::from_set(set, true)?;
        let Some(return_s) = params.return_time_s else {
            return Err(ScanError::invalid_config("stage scan requires a return time"));
        };
        check_unique_targets(&params)?;

        let rate = params.sample_rate_hz;
        let samples_per_pixel = samples_for(params.dwell_s, rate, "dwell time");
        let return_samples = samples_for(return_s, rate, "return time");
        if samples_per_pixel == 0 {
            return Err(ScanError::invalid_config(
                "dwell time is shorter than one sample",
            ));
        }

        // Positions are fence posts: a 5 um range stepped by 1 um visits
        // 6 positions including both ends.
        let positions: Vec<usize> = params
            .axes
            .iter()
            .map(|axis| (axis.length_um / axis.step_um).round() as usize + 1)
            .collect();
        let pixels_per_line = positions[0];
        let mid_count = positions.get(1).copied().unwrap_or(1);
        let slow_count = positions.get(2).copied().unwrap_or(1);
        let line_count = mid_count * slow_count;
        let line_samples = pixels_per_line * samples_per_pixel;
        let period = line_samples + return_samples;
        let total_samples = line_count * period;

        let mut signals = BTreeMap::new();
        for (index, axis) in params.axes.iter().enumerate() {
            let mut samples = Vec::with_capacity(total_samples);
            let value_at = |step: usize| axis.start_um + axis.step_um * step as f64;
            for line in 0..line_count {
                let step = match index {
                    0 => 0,
                    1 => line % mid_count,
                    _ => line / mid_count,
                };
                let next_step = if line + 1 == line_count {
                    0
                } else {
                    match index {
                        0 => 0,
                        1 => (line + 1) % mid_count,
                        _ => (line + 1) / mid_count,
                    }
                };
                if index == 0 {
                    let end = axis.start_um + axis.length_um;
                    linear_ramp(axis.start_um, end, line_samples, &mut samples);
                    half_sine_step(end, axis.start_um, return_samples, &mut samples);
                } else {
                    let value = value_at(step);
                    samples.extend(std::iter::repeat(value).take(line_samples));
                    // A held axis transitions to the same value, which the
                    // half-sine renders as a constant.
                    half_sine_step(value, value_at(next_step), return_samples, &mut samples);
                }
            }
            signals.insert(axis.target.clone(), samples);
        }

        let info = ScanInfo {
            pixels_per_line,
            line_count,
            samples_per_pixel,
            total_samples,
            sample_rate_hz: rate,
            throws: ScanThrows {
                flyback: return_samples,
                ..ScanThrows::default()
            },
        };
        debug!(
            pixels = pixels_per_line,
            lines = line_count,
            total = total_samples,
            "stage scan synthesized"
        );
        Ok((signals, info))
    }
}

fn check_unique_targets(params: &ScanParameters) -> Result<()> {
    let mut names: Vec<&str> = params.axes.iter().map(|a| a.target.as_str()).collect();
    names.sort_unstable();
    if names.windows(2).any(|pair| pair[0] == pair[1]) {
        return Err(ScanError::invalid_config(
            "scan axes must name distinct targets",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use tracing_test::traced_test;

    fn cube_scan_set() -> ParameterSet {
        ParameterSet::new()
            .with_text_list(keys::TARGET_DEVICE, ["vpz x", "vpz y", "vpz z"])
            .with_number_list(keys::AXIS_LENGTH, [5.0, 5.0, 5.0])
            .with_number_list(keys::AXIS_STEP_SIZE, [1.0, 1.0, 1.0])
            .with_number_list(keys::AXIS_STARTPOS, [0.0, 0.0, 0.0])
            .with_number(keys::SEQUENCE_TIME, 0.005)
            .with_number(keys::SAMPLE_RATE, 100_000.0)
            .with_number(keys::RETURN_TIME, 0.001)
    }

    #[test]
    fn cube_scan_geometry() {
        let designer = StageScanDesigner::new();
        let (signals, info) = designer.make_signal(&cube_scan_set()).unwrap();

        assert_eq!(info.pixels_per_line, 6);
        assert_eq!(info.line_count, 36);
        assert_eq!(info.samples_per_pixel, 500);
        assert_eq!(info.throws.flyback, 100);
        assert_eq!(info.total_samples, 36 * 3100);
        assert_eq!(signals.len(), 3);
        for samples in signals.values() {
            assert_eq!(samples.len(), info.total_samples);
        }
    }

    #[test]
    fn fast_axis_ramps_and_returns() {
        let designer = StageScanDesigner::new();
        let (signals, info) = designer.make_signal(&cube_scan_set()).unwrap();
        let fast = &signals["vpz x"];
        let line = info.line_scan_samples();

        assert_relative_eq!(fast[0], 0.0);
        assert_relative_eq!(fast[line - 1], 5.0);
        for pair in fast[..line].windows(2) {
            assert!(pair[1] >= pair[0]);
        }
        // Half-sine return lands back on the start position.
        assert_relative_eq!(fast[line + info.throws.flyback - 1], 0.0, epsilon = 1e-12);
        // The next line starts over from the beginning of the ramp.
        assert_relative_eq!(fast[line + info.throws.flyback], 0.0);
    }

    #[test]
    fn outer_axes_step_during_the_return_window() {
        let designer = StageScanDesigner::new();
        let (signals, info) = designer.make_signal(&cube_scan_set()).unwrap();
        let mid = &signals["vpz y"];
        let slow = &signals["vpz z"];
        let line = info.line_scan_samples();
        let period = info.line_period_samples();

        // Constant during the first line, stepped up by the second.
        assert!(mid[..line].iter().all(|&v| v == 0.0));
        assert!(mid[period..period + line].iter().all(|&v| v == 1.0));
        // Strictly inside the return window the half-sine is in flight.
        let inside = mid[line + info.throws.flyback / 2];
        assert!(inside > 0.0 && inside < 1.0);

        // The slow axis holds through a full pass of the mid axis, then
        // steps once.
        assert!(slow[..6 * period - info.throws.flyback].iter().all(|&v| v == 0.0));
        assert!(slow[6 * period..7 * period - info.throws.flyback]
            .iter()
            .all(|&v| v == 1.0));

        // The last return window brings every axis home.
        assert_relative_eq!(mid[info.total_samples - 1], 0.0, epsilon = 1e-12);
        assert_relative_eq!(slow[info.total_samples - 1], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn synthesis_is_deterministic() {
        let designer = StageScanDesigner::new();
        let first = designer.make_signal(&cube_scan_set()).unwrap();
        let second = designer.make_signal(&cube_scan_set()).unwrap();
        assert_eq!(first.0, second.0);
        assert_eq!(first.1, second.1);
    }

    #[test]
    #[traced_test]
    fn fractional_dwell_rounds_up_with_warning() {
        let set = cube_scan_set().with_number(keys::SEQUENCE_TIME, 5.5e-5);
        let designer = StageScanDesigner::new();
        let (_, info) = designer.make_signal(&set).unwrap();
        assert_eq!(info.samples_per_pixel, 6);
        assert!(logs_contain("rounding up"));
    }

    #[test]
    fn missing_key_is_a_parameter_mismatch() {
        let mut set = cube_scan_set();
        set.remove(keys::RETURN_TIME);
        let err = StageScanDesigner::new().make_signal(&set).unwrap_err();
        match err {
            ScanError::ParameterMismatch { missing, .. } => {
                assert_eq!(missing, vec![keys::RETURN_TIME.to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn single_axis_scan_has_one_line() {
        let set = ParameterSet::new()
            .with_text_list(keys::TARGET_DEVICE, ["vpz x"])
            .with_number_list(keys::AXIS_LENGTH, [10.0])
            .with_number_list(keys::AXIS_STEP_SIZE, [2.0])
            .with_number_list(keys::AXIS_STARTPOS, [1.0])
            .with_number(keys::SEQUENCE_TIME, 0.001)
            .with_number(keys::SAMPLE_RATE, 100_000.0)
            .with_number(keys::RETURN_TIME, 0.001);
        let (signals, info) = StageScanDesigner::new().make_signal(&set).unwrap();
        assert_eq!(info.pixels_per_line, 6);
        assert_eq!(info.line_count, 1);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals["vpz x"].len(), info.total_samples);
    }

    #[test]
    fn duplicate_targets_are_rejected() {
        let set = cube_scan_set().with_text_list(keys::TARGET_DEVICE, ["vpz x", "vpz x", "vpz z"]);
        let err = StageScanDesigner::new().make_signal(&set).unwrap_err();
        assert!(matches!(err, ScanError::InvalidConfig { .. }));
    }

    #[test]
    fn extra_key_lists_the_unexpected_name() {
        let set = cube_scan_set().with_number("phase_offset", 0.25);
        let err = StageScanDesigner::new().make_signal(&set).unwrap_err();
        match err {
            ScanError::ParameterMismatch { unexpected, .. } => {
                assert_eq!(unexpected, vec!["phase_offset".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn parameter_value_round_trips_through_toml() {
        let set = cube_scan_set();
        let text = toml::to_string(&set).unwrap();
        let parsed: ParameterSet = toml::from_str(&text).unwrap();
        assert_eq!(parsed, set);
    }
}
