//! Low-level waveform construction primitives shared by the designers.

use tracing::warn;

/// Relative tolerance used when deciding whether a duration lands on a
/// whole number of samples. Covers accumulated binary float error in
/// products such as `0.005 * 100_000.0`.
const SAMPLE_COUNT_TOLERANCE: f64 = 1e-6;

// ===== Sample counting =====

/// Number of samples spanning `duration_s` at `rate_hz`.
///
/// Durations that land on a whole sample within tolerance snap to it.
/// Anything else rounds up so the waveform never runs shorter than the
/// requested time, and the adjustment is logged.
pub(crate) fn samples_for(duration_s: f64, rate_hz: f64, quantity: &str) -> usize {
    let exact = duration_s * rate_hz;
    let nearest = exact.round();
    if (exact - nearest).abs() <= SAMPLE_COUNT_TOLERANCE * nearest.abs().max(1.0) {
        nearest as usize
    } else {
        let rounded = exact.ceil() as usize;
        warn!(
            quantity,
            requested = exact,
            rounded,
            "duration is not a whole number of samples, rounding up"
        );
        rounded
    }
}

// ===== Elementary shapes =====

/// Appends a linear ramp from `from` to `to` inclusive of both endpoints.
pub(crate) fn linear_ramp(from: f64, to: f64, samples: usize, out: &mut Vec<f64>) {
    if samples == 0 {
        return;
    }
    if samples == 1 {
        out.push(from);
        return;
    }
    let span = to - from;
    let denom = (samples - 1) as f64;
    for k in 0..samples {
        out.push(from + span * k as f64 / denom);
    }
}

/// Appends a half-sine step from `from` (exclusive) to `to` (inclusive).
///
/// The cosine shape starts and ends at rest, so a step inserted between
/// two constant stretches leaves no velocity discontinuity.
pub(crate) fn half_sine_step(from: f64, to: f64, samples: usize, out: &mut Vec<f64>) {
    let span = to - from;
    for k in 1..=samples {
        let phase = std::f64::consts::PI * k as f64 / samples as f64;
        out.push(from + span * 0.5 * (1.0 - phase.cos()));
    }
}

// ===== Piecewise polynomial trajectories =====

/// A kinematic state the trajectory must pass through at time `t`.
///
/// Two fix points at the same instant encode a discontinuity in
/// acceleration (for example the start or end of a constant-thrust
/// phase); the sampler emits nothing for the zero-length span between
/// them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct FixPoint {
    pub t: f64,
    pub pos: f64,
    pub vel: f64,
    pub acc: f64,
}

impl FixPoint {
    pub(crate) fn new(t: f64, pos: f64, vel: f64, acc: f64) -> Self {
        Self { t, pos, vel, acc }
    }
}

/// Samples the quintic spline through `points` at `rate_hz`, appending
/// to `out`.
///
/// Each span gets the unique fifth-order Bernstein polynomial matching
/// position, velocity and acceleration at both ends. Sample counts come
/// from rounding the absolute fix point times rather than the span
/// durations, so rounding error cannot accumulate across spans. Spans
/// are sampled half-open; the final state is the first sample of
/// whatever follows.
pub(crate) fn sample_fix_points(points: &[FixPoint], rate_hz: f64, out: &mut Vec<f64>) {
    for pair in points.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        let dt = b.t - a.t;
        if dt <= f64::EPSILON {
            continue;
        }
        let first = (a.t * rate_hz).round() as i64;
        let last = (b.t * rate_hz).round() as i64;
        let samples = (last - first).max(0) as usize;
        quintic_segment(&a, &b, dt, samples, out);
    }
}

fn quintic_segment(a: &FixPoint, b: &FixPoint, dt: f64, samples: usize, out: &mut Vec<f64>) {
    let control = [
        a.pos,
        a.pos + a.vel * dt / 5.0,
        a.pos + 2.0 * a.vel * dt / 5.0 + a.acc * dt * dt / 20.0,
        b.pos - 2.0 * b.vel * dt / 5.0 + b.acc * dt * dt / 20.0,
        b.pos - b.vel * dt / 5.0,
        b.pos,
    ];
    for k in 0..samples {
        let u = k as f64 / samples as f64;
        out.push(bernstein5(&control, u));
    }
}

fn bernstein5(c: &[f64; 6], u: f64) -> f64 {
    let v = 1.0 - u;
    let (u2, v2) = (u * u, v * v);
    let (u3, v3) = (u2 * u, v2 * v);
    let (u4, v4) = (u3 * u, v3 * v);
    c[0] * v4 * v
        + 5.0 * c[1] * u * v4
        + 10.0 * c[2] * u2 * v3
        + 10.0 * c[3] * u3 * v2
        + 5.0 * c[4] * u4 * v
        + c[5] * u4 * u
}

/// Samples a cubic Hermite span matching only position and velocity at
/// the ends, half-open like the quintic sampler.
///
/// Used where the boundary conditions over-constrain a quintic, such as
/// turnarounds too short to reach the velocity limit.
pub(crate) fn cubic_segment(a: &FixPoint, b: &FixPoint, samples: usize, out: &mut Vec<f64>) {
    let dt = b.t - a.t;
    if dt <= f64::EPSILON {
        return;
    }
    let control = [
        a.pos,
        a.pos + a.vel * dt / 3.0,
        b.pos - b.vel * dt / 3.0,
        b.pos,
    ];
    for k in 0..samples {
        let u = k as f64 / samples as f64;
        let v = 1.0 - u;
        out.push(
            control[0] * v * v * v
                + 3.0 * control[1] * u * v * v
                + 3.0 * control[2] * u * u * v
                + control[3] * u * u * u,
        );
    }
}

// ===== Point-to-point moves =====

/// Fix points for a rest-to-rest move from `from` to `to` under the
/// given velocity and acceleration limits.
///
/// Short moves produce a triangular velocity profile, long moves a
/// trapezoidal one with a constant-velocity cruise. Returns an empty
/// list when there is nothing to do.
pub(crate) fn rest_to_rest_points(from: f64, to: f64, v_max: f64, a_max: f64) -> Vec<FixPoint> {
    let displacement = to - from;
    if displacement == 0.0 {
        return Vec::new();
    }
    let dir = displacement.signum();
    let dist = displacement.abs();

    let v_peak = v_max.min((a_max * dist).sqrt());
    let t_ramp = v_peak / a_max;
    let d_ramp = v_peak * v_peak / (2.0 * a_max);
    let d_cruise = (dist - 2.0 * d_ramp).max(0.0);
    let t_cruise = d_cruise / v_peak;

    let mut points = vec![
        FixPoint::new(0.0, from, 0.0, 0.0),
        FixPoint::new(0.0, from, 0.0, dir * a_max),
        FixPoint::new(t_ramp, from + dir * d_ramp, dir * v_peak, dir * a_max),
    ];
    if t_cruise > 0.0 {
        let cruise_end = from + dir * (d_ramp + d_cruise);
        points.push(FixPoint::new(t_ramp, from + dir * d_ramp, dir * v_peak, 0.0));
        points.push(FixPoint::new(t_ramp + t_cruise, cruise_end, dir * v_peak, 0.0));
        points.push(FixPoint::new(t_ramp + t_cruise, cruise_end, dir * v_peak, -dir * a_max));
    } else {
        points.push(FixPoint::new(t_ramp, from + dir * d_ramp, dir * v_peak, -dir * a_max));
    }
    let t_end = 2.0 * t_ramp + t_cruise;
    points.push(FixPoint::new(t_end, to, 0.0, -dir * a_max));
    points.push(FixPoint::new(t_end, to, 0.0, 0.0));
    points
}
