//! Trajectory synthesis for galvanometric mirror scanners.
//!
//! Galvos sweep continuously, so the fast axis is built as a piecewise
//! polynomial respecting the mirror's velocity and acceleration limits:
//! a constant-velocity stretch across the line, an acceleration-limited
//! turnaround back to the line start, and smooth run-up, run-down and
//! positioning moves around the scan body. The slow axis steps one line
//! position per turnaround with a half-sine transition.

use std::collections::BTreeMap;

use scan_core::params::keys;
use scan_core::{ParameterSet, Result, ScanError, ScanInfo, ScanParameters, ScanThrows};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::waveform::{
    cubic_segment, half_sine_step, rest_to_rest_points, sample_fix_points, samples_for, FixPoint,
};

/// Exact parameter keys a galvo scan consumes, sorted.
pub const GALVO_EXPECTED_PARAMETERS: &[&str] = &[
    keys::AXIS_LENGTH,
    keys::AXIS_STARTPOS,
    keys::AXIS_STEP_SIZE,
    keys::SAMPLE_RATE,
    keys::SEQUENCE_TIME,
    keys::TARGET_DEVICE,
];

fn default_max_velocity() -> f64 {
    2.0e5
}

fn default_max_acceleration() -> f64 {
    2.0e9
}

fn default_settling_time() -> f64 {
    1.0e-3
}

fn default_start_zero_time() -> f64 {
    5.0e-4
}

/// Mirror limits and fixed timing blocks of the galvo pair.
///
/// The defaults describe a typical resonant-free raster galvo; override
/// them from the device section of the configuration file.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GalvoTuning {
    /// Maximum sweep velocity, micrometers per second.
    #[serde(default = "default_max_velocity")]
    pub max_velocity_umps: f64,
    /// Maximum acceleration, micrometers per second squared.
    #[serde(default = "default_max_acceleration")]
    pub max_acceleration_umps2: f64,
    /// Hold after initial positioning, seconds.
    #[serde(default = "default_settling_time")]
    pub settling_time_s: f64,
    /// Zero hold before anything moves, seconds.
    #[serde(default = "default_start_zero_time")]
    pub start_zero_time_s: f64,
    /// Digital-train shift compensating mirror response lag, seconds.
    #[serde(default)]
    pub sync_delay_s: f64,
}

impl Default for GalvoTuning {
    fn default() -> Self {
        Self {
            max_velocity_umps: default_max_velocity(),
            max_acceleration_umps2: default_max_acceleration(),
            settling_time_s: default_settling_time(),
            start_zero_time_s: default_start_zero_time(),
            sync_delay_s: 0.0,
        }
    }
}

/// Designs acceleration-limited raster trajectories for a galvo pair.
#[derive(Debug, Clone, Copy, Default)]
pub struct GalvoScanDesigner {
    tuning: GalvoTuning,
}

impl GalvoScanDesigner {
    /// Designer honoring the given mirror limits.
    pub fn new(tuning: GalvoTuning) -> Self {
        Self { tuning }
    }

    /// Parameter keys [`Self::make_signal`] requires, sorted.
    pub fn expected_parameters(&self) -> &'static [&'static str] {
        GALVO_EXPECTED_PARAMETERS
    }

    /// Builds the fast and slow mirror trajectories plus the geometry the
    /// TTL designer aligns its pulse trains against.
    pub fn make_signal(
        &self,
        set: &ParameterSet,
    ) -> Result<(BTreeMap<String, Vec<f64>>, ScanInfo)> {
        set.check_keys("galvo scan", GALVO_EXPECTED_PARAMETERS)?;
        let params = ScanParameters::from_set(set, false)?;
        if params.axes.len() != 2 {
            return Err(ScanError::invalid_config(format!(
                "galvo scan drives exactly 2 axes (fast, slow), got {}",
                params.axes.len()
            )));
        }
        let fast_axis = &params.axes[0];
        let slow_axis = &params.axes[1];
        if fast_axis.target == slow_axis.target {
            return Err(ScanError::invalid_config(
                "scan axes must name distinct targets",
            ));
        }

        let rate = params.sample_rate_hz;
        let v_max = self.tuning.max_velocity_umps;
        let a_max = self.tuning.max_acceleration_umps2;
        let samples_per_pixel = samples_for(params.dwell_s, rate, "dwell time");
        if samples_per_pixel == 0 {
            return Err(ScanError::invalid_config(
                "dwell time is shorter than one sample",
            ));
        }
        // A galvo pixel is one step interval of continuous sweep, so a
        // 5 um range stepped by 1 um holds 5 pixels, not 6.
        let pixels_per_line = (fast_axis.length_um / fast_axis.step_um).round() as usize;
        let line_count = (slow_axis.length_um / slow_axis.step_um).round() as usize;
        if pixels_per_line == 0 || line_count == 0 {
            return Err(ScanError::invalid_config(
                "axis length must cover at least one step",
            ));
        }

        let line_scan_samples = pixels_per_line * samples_per_pixel;
        let t_line = line_scan_samples as f64 / rate;
        let v_scan = fast_axis.length_um / t_line;
        if v_scan >= v_max {
            return Err(ScanError::invalid_config(format!(
                "scan velocity {v_scan:.0} um/s exceeds the mirror limit {v_max:.0} um/s, \
                 lengthen the dwell time or shorten the line"
            )));
        }

        let x0 = fast_axis.start_um;
        let x1 = x0 + fast_axis.length_um;

        // One constant-velocity sweep across the line, sampled half-open.
        let mut sweep = Vec::with_capacity(line_scan_samples);
        sample_fix_points(
            &[
                FixPoint::new(0.0, x0, v_scan, 0.0),
                FixPoint::new(t_line, x1, v_scan, 0.0),
            ],
            rate,
            &mut sweep,
        );

        let (turnaround, degraded) = build_turnaround(
            x0, x1,
            fast_axis.length_um,
            v_scan,
            t_line,
            line_scan_samples,
            v_max,
            a_max,
            rate,
        );
        if degraded {
            debug!(
                field_um = fast_axis.length_um,
                "turnaround fits below the velocity limit, using reduced fit"
            );
        }
        let flyback = turnaround.len();

        // Run-up from rest to scan velocity, arriving at the line start.
        let t_ramp = v_scan / a_max;
        let d_ramp = v_scan * v_scan / (2.0 * a_max);
        let scan_entry = x0 - d_ramp;
        let mut run_up = Vec::new();
        sample_fix_points(
            &[
                FixPoint::new(0.0, scan_entry, 0.0, 0.0),
                FixPoint::new(0.0, scan_entry, 0.0, a_max),
                FixPoint::new(t_ramp, x0, v_scan, a_max),
                FixPoint::new(t_ramp, x0, v_scan, 0.0),
            ],
            rate,
            &mut run_up,
        );
        let start_acceleration = run_up.len();

        // Run-down past the line end after the last sweep, then home.
        let mut fast_final = Vec::new();
        sample_fix_points(
            &[
                FixPoint::new(0.0, x1, v_scan, 0.0),
                FixPoint::new(0.0, x1, v_scan, -a_max),
                FixPoint::new(t_ramp, x1 + d_ramp, 0.0, -a_max),
                FixPoint::new(t_ramp, x1 + d_ramp, 0.0, 0.0),
            ],
            rate,
            &mut fast_final,
        );
        sample_fix_points(
            &rest_to_rest_points(x1 + d_ramp, 0.0, v_max, a_max),
            rate,
            &mut fast_final,
        );

        // Positioning moves from rest at zero to the scan entry points.
        let mut fast_move = Vec::new();
        sample_fix_points(
            &rest_to_rest_points(0.0, scan_entry, v_max, a_max),
            rate,
            &mut fast_move,
        );
        let y0 = slow_axis.start_um;
        let mut slow_move = Vec::new();
        sample_fix_points(&rest_to_rest_points(0.0, y0, v_max, a_max), rate, &mut slow_move);
        let y_last = y0 + slow_axis.step_um * (line_count - 1) as f64;
        let mut slow_final = Vec::new();
        sample_fix_points(
            &rest_to_rest_points(y_last, 0.0, v_max, a_max),
            rate,
            &mut slow_final,
        );

        // The two axes share one positioning block; the shorter move is
        // front-padded so both arrive together.
        let initial_positioning = fast_move.len().max(slow_move.len());
        let final_positioning = fast_final.len().max(slow_final.len());
        let settling = samples_for(self.tuning.settling_time_s, rate, "settling time");
        let start_zero = samples_for(self.tuning.start_zero_time_s, rate, "start-zero time");
        let sync_delay = samples_for(self.tuning.sync_delay_s, rate, "sync delay");

        let total_samples = start_zero
            + initial_positioning
            + settling
            + start_acceleration
            + (line_count - 1) * (line_scan_samples + flyback)
            + line_scan_samples
            + final_positioning;

        let mut fast = Vec::with_capacity(total_samples);
        extend_constant(&mut fast, 0.0, start_zero + initial_positioning - fast_move.len());
        fast.extend_from_slice(&fast_move);
        extend_constant(&mut fast, scan_entry, settling);
        fast.extend_from_slice(&run_up);
        for _ in 1..line_count {
            fast.extend_from_slice(&sweep);
            fast.extend_from_slice(&turnaround);
        }
        fast.extend_from_slice(&sweep);
        fast.extend_from_slice(&fast_final);
        let fast_pad = total_samples - fast.len();
        extend_constant(&mut fast, 0.0, fast_pad);

        let mut slow = Vec::with_capacity(total_samples);
        extend_constant(&mut slow, 0.0, start_zero + initial_positioning - slow_move.len());
        slow.extend_from_slice(&slow_move);
        extend_constant(&mut slow, y0, settling + start_acceleration);
        for line in 1..line_count {
            let here = y0 + slow_axis.step_um * (line - 1) as f64;
            let next = y0 + slow_axis.step_um * line as f64;
            extend_constant(&mut slow, here, line_scan_samples);
            half_sine_step(here, next, flyback, &mut slow);
        }
        extend_constant(&mut slow, y_last, line_scan_samples);
        slow.extend_from_slice(&slow_final);
        let slow_pad = total_samples - slow.len();
        extend_constant(&mut slow, 0.0, slow_pad);

        let mut signals = BTreeMap::new();
        signals.insert(fast_axis.target.clone(), fast);
        signals.insert(slow_axis.target.clone(), slow);

        let info = ScanInfo {
            pixels_per_line,
            line_count,
            samples_per_pixel,
            total_samples,
            sample_rate_hz: rate,
            throws: ScanThrows {
                sync_delay,
                start_acceleration,
                settling,
                initial_positioning,
                start_zero,
                flyback,
                final_positioning,
            },
        };
        debug!(
            pixels = pixels_per_line,
            lines = line_count,
            total = total_samples,
            flyback,
            "galvo scan synthesized"
        );
        Ok((signals, info))
    }
}

fn extend_constant(out: &mut Vec<f64>, value: f64, samples: usize) {
    out.extend(std::iter::repeat(value).take(samples));
}

/// Builds the flyback from the line end back to the line start, starting
/// at scan velocity and ending at scan velocity.
///
/// When the field is long enough the mirror decelerates at full thrust to
/// the reverse velocity limit, cruises, and accelerates back. Short
/// fields cannot reach the limit; they get a symmetric two-segment cubic
/// fit through the peak-velocity midpoint instead.
#[allow(clippy::too_many_arguments)]
fn build_turnaround(
    x0: f64,
    x1: f64,
    length: f64,
    v_scan: f64,
    t_line: f64,
    line_scan_samples: usize,
    v_max: f64,
    a_max: f64,
    rate: f64,
) -> (Vec<f64>, bool) {
    let mut out = Vec::new();
    let v_peak_needed = (v_scan * v_scan + a_max * length).sqrt();
    if v_peak_needed <= v_max {
        let t_d = (v_scan + v_peak_needed) / a_max;
        let mid = x1 - length / 2.0;
        let a = FixPoint::new(t_line, x1, v_scan, 0.0);
        let m = FixPoint::new(t_line + t_d, mid, -v_peak_needed, 0.0);
        let b = FixPoint::new(t_line + 2.0 * t_d, x0, v_scan, 0.0);
        let first = line_scan_samples as i64;
        let at_mid = (m.t * rate).round() as i64;
        let last = (b.t * rate).round() as i64;
        cubic_segment(&a, &m, (at_mid - first).max(0) as usize, &mut out);
        cubic_segment(&m, &b, (last - at_mid).max(0) as usize, &mut out);
        return (out, true);
    }

    let t_d = (v_scan + v_max) / a_max;
    let d_d = (v_scan * v_scan - v_max * v_max) / (2.0 * a_max);
    let d_c = -length - 2.0 * d_d;
    let t_c = -d_c / v_max;
    let t1 = t_line + t_d;
    let t2 = t1 + t_c;
    let t3 = t2 + t_d;
    let p1 = x1 + d_d;
    let p2 = p1 + d_c;
    sample_fix_points(
        &[
            FixPoint::new(t_line, x1, v_scan, -a_max),
            FixPoint::new(t1, p1, -v_max, -a_max),
            FixPoint::new(t1, p1, -v_max, 0.0),
            FixPoint::new(t2, p2, -v_max, 0.0),
            FixPoint::new(t2, p2, -v_max, a_max),
            FixPoint::new(t3, x0, v_scan, a_max),
        ],
        rate,
        &mut out,
    );
    (out, false)
}
