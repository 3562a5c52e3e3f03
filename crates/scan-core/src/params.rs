//! Scan and TTL parameter sets.
//!
//! Parameters arrive from the controlling layer as string-keyed maps
//! ([`ParameterSet`]), the shape they have in the installation's
//! configuration. Each designer declares the exact key set it accepts, and
//! [`ParameterSet::check_keys`] enforces set equality as a fail-fast guard
//! against silent misconfiguration: a stray or missing key aborts the build
//! before any signal is synthesized.
//!
//! After the key check, sets are parsed into the typed [`ScanParameters`] /
//! [`TtlParameters`] structs that the designers actually work with.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{Result, ScanError};

/// Well-known parameter keys shared by the scan and TTL parameter sets.
pub mod keys {
    /// Ordered list of target device ids (fast axis first).
    pub const TARGET_DEVICE: &str = "target_device";
    /// Per-axis scan length, micrometers.
    pub const AXIS_LENGTH: &str = "axis_length";
    /// Per-axis step size, micrometers.
    pub const AXIS_STEP_SIZE: &str = "axis_step_size";
    /// Per-axis start position, micrometers.
    pub const AXIS_STARTPOS: &str = "axis_startpos";
    /// Dwell time of one sequence cycle, seconds.
    pub const SEQUENCE_TIME: &str = "sequence_time";
    /// Output sample rate, hertz.
    pub const SAMPLE_RATE: &str = "sample_rate";
    /// Fast-axis smooth-return time, seconds (stage scans only).
    pub const RETURN_TIME: &str = "return_time";
    /// Per-target pulse start times, seconds.
    pub const TTL_START: &str = "ttl_start";
    /// Per-target pulse end times, seconds.
    pub const TTL_END: &str = "ttl_end";
}

// =============================================================================
// Raw parameter sets
// =============================================================================

/// One value in a [`ParameterSet`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    /// Scalar number (times, rates).
    Number(f64),
    /// Scalar text.
    Text(String),
    /// List of numbers (per-axis geometry).
    NumberList(Vec<f64>),
    /// List of text (target ids).
    TextList(Vec<String>),
    /// Table of numbers (per-target pulse times).
    NumberTable(Vec<Vec<f64>>),
}

impl ParameterValue {
    fn kind(&self) -> &'static str {
        match self {
            Self::Number(_) => "number",
            Self::Text(_) => "text",
            Self::NumberList(_) => "number list",
            Self::TextList(_) => "text list",
            Self::NumberTable(_) => "number table",
        }
    }
}

/// String-keyed scan/TTL parameters as supplied by the controlling layer.
///
/// Key order is irrelevant; key *presence* is checked exactly. Values are
/// typed loosely here and converted by the typed accessors, which fail with
/// [`ScanError::InvalidConfig`] on a type mismatch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterSet {
    entries: BTreeMap<String, ParameterValue>,
}

impl ParameterSet {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a scalar number.
    pub fn with_number(mut self, key: impl Into<String>, value: f64) -> Self {
        self.entries.insert(key.into(), ParameterValue::Number(value));
        self
    }

    /// Insert or replace a number list.
    pub fn with_number_list(mut self, key: impl Into<String>, values: impl Into<Vec<f64>>) -> Self {
        self.entries
            .insert(key.into(), ParameterValue::NumberList(values.into()));
        self
    }

    /// Insert or replace a text list.
    pub fn with_text_list(
        mut self,
        key: impl Into<String>,
        values: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        let values = values.into_iter().map(Into::into).collect();
        self.entries
            .insert(key.into(), ParameterValue::TextList(values));
        self
    }

    /// Insert or replace a number table.
    pub fn with_number_table(
        mut self,
        key: impl Into<String>,
        values: impl Into<Vec<Vec<f64>>>,
    ) -> Self {
        self.entries
            .insert(key.into(), ParameterValue::NumberTable(values.into()));
        self
    }

    /// Remove `key`, returning its previous value if present.
    pub fn remove(&mut self, key: &str) -> Option<ParameterValue> {
        self.entries.remove(key)
    }

    /// Iterate over the present keys.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Check that the present keys equal `expected` exactly.
    ///
    /// Any difference fails with [`ScanError::ParameterMismatch`] listing
    /// both the missing and the unexpected keys, sorted.
    pub fn check_keys(&self, designer: &str, expected: &[&str]) -> Result<()> {
        let present: BTreeSet<&str> = self.keys().collect();
        let wanted: BTreeSet<&str> = expected.iter().copied().collect();

        let missing: Vec<String> = wanted
            .difference(&present)
            .map(|k| (*k).to_string())
            .collect();
        let unexpected: Vec<String> = present
            .difference(&wanted)
            .map(|k| (*k).to_string())
            .collect();

        if missing.is_empty() && unexpected.is_empty() {
            Ok(())
        } else {
            Err(ScanError::ParameterMismatch {
                designer: designer.to_string(),
                missing,
                unexpected,
            })
        }
    }

    fn get(&self, key: &str) -> Result<&ParameterValue> {
        self.entries.get(key).ok_or_else(|| {
            ScanError::invalid_config(format!("parameter '{key}' is missing"))
        })
    }

    /// Scalar number under `key`.
    pub fn number(&self, key: &str) -> Result<f64> {
        match self.get(key)? {
            ParameterValue::Number(v) => Ok(*v),
            other => Err(type_mismatch(key, "number", other)),
        }
    }

    /// Number list under `key`.
    pub fn number_list(&self, key: &str) -> Result<&[f64]> {
        match self.get(key)? {
            ParameterValue::NumberList(v) => Ok(v),
            other => Err(type_mismatch(key, "number list", other)),
        }
    }

    /// Text list under `key`.
    pub fn text_list(&self, key: &str) -> Result<&[String]> {
        match self.get(key)? {
            ParameterValue::TextList(v) => Ok(v),
            other => Err(type_mismatch(key, "text list", other)),
        }
    }

    /// Number table under `key`.
    pub fn number_table(&self, key: &str) -> Result<&[Vec<f64>]> {
        match self.get(key)? {
            ParameterValue::NumberTable(v) => Ok(v),
            other => Err(type_mismatch(key, "number table", other)),
        }
    }
}

fn type_mismatch(key: &str, wanted: &str, got: &ParameterValue) -> ScanError {
    ScanError::invalid_config(format!(
        "parameter '{key}' should be a {wanted}, got a {}",
        got.kind()
    ))
}

// =============================================================================
// Typed scan parameters
// =============================================================================

/// Geometry of one scanned axis.
#[derive(Debug, Clone, PartialEq)]
pub struct AxisScanParameters {
    /// Target device id driving this axis.
    pub target: String,
    /// Scan length, micrometers.
    pub length_um: f64,
    /// Step size, micrometers.
    pub step_um: f64,
    /// Start position, micrometers.
    pub start_um: f64,
}

/// Parsed scan-trajectory parameters: ordered axes (fast, mid, slow) plus
/// the shared sample timing.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanParameters {
    /// Axes, fast axis first. At most three.
    pub axes: Vec<AxisScanParameters>,
    /// Dwell time of one pixel, seconds.
    pub dwell_s: f64,
    /// Output sample rate, hertz.
    pub sample_rate_hz: f64,
    /// Fast-axis smooth-return time, seconds. Present for stage scans only.
    pub return_time_s: Option<f64>,
}

impl ScanParameters {
    /// Parse from a key-checked [`ParameterSet`].
    ///
    /// `with_return_time` selects whether the [`keys::RETURN_TIME`] entry is
    /// read (stage designer) or absent by contract (galvo designer).
    pub fn from_set(set: &ParameterSet, with_return_time: bool) -> Result<Self> {
        let targets = set.text_list(keys::TARGET_DEVICE)?;
        let lengths = set.number_list(keys::AXIS_LENGTH)?;
        let steps = set.number_list(keys::AXIS_STEP_SIZE)?;
        let starts = set.number_list(keys::AXIS_STARTPOS)?;

        if lengths.len() != targets.len()
            || steps.len() != targets.len()
            || starts.len() != targets.len()
        {
            return Err(ScanError::invalid_config(format!(
                "axis arrays disagree: {} targets, {} lengths, {} steps, {} start positions",
                targets.len(),
                lengths.len(),
                steps.len(),
                starts.len()
            )));
        }

        let axes = targets
            .iter()
            .zip(lengths.iter().zip(steps.iter().zip(starts.iter())))
            .map(|(target, (&length_um, (&step_um, &start_um)))| AxisScanParameters {
                target: target.clone(),
                length_um,
                step_um,
                start_um,
            })
            .collect();

        let parsed = Self {
            axes,
            dwell_s: set.number(keys::SEQUENCE_TIME)?,
            sample_rate_hz: set.number(keys::SAMPLE_RATE)?,
            return_time_s: if with_return_time {
                Some(set.number(keys::RETURN_TIME)?)
            } else {
                None
            },
        };
        parsed.validate()?;
        Ok(parsed)
    }

    /// Semantic validation of the parsed values.
    pub fn validate(&self) -> Result<()> {
        if self.axes.is_empty() || self.axes.len() > 3 {
            return Err(ScanError::invalid_config(format!(
                "scan needs between 1 and 3 axes, got {}",
                self.axes.len()
            )));
        }
        for axis in &self.axes {
            if axis.length_um <= 0.0 {
                return Err(ScanError::invalid_config(format!(
                    "axis '{}' length must be positive, got {}",
                    axis.target, axis.length_um
                )));
            }
            if axis.step_um <= 0.0 {
                return Err(ScanError::invalid_config(format!(
                    "axis '{}' step size must be positive, got {}",
                    axis.target, axis.step_um
                )));
            }
        }
        if self.dwell_s <= 0.0 {
            return Err(ScanError::invalid_config(format!(
                "sequence time must be positive, got {}",
                self.dwell_s
            )));
        }
        if self.sample_rate_hz <= 0.0 {
            return Err(ScanError::invalid_config(format!(
                "sample rate must be positive, got {}",
                self.sample_rate_hz
            )));
        }
        if let Some(rt) = self.return_time_s {
            if rt <= 0.0 {
                return Err(ScanError::invalid_config(format!(
                    "return time must be positive, got {rt}"
                )));
            }
        }
        Ok(())
    }
}

// =============================================================================
// Typed TTL parameters
// =============================================================================

/// One on/off pulse window, seconds from the start of a dwell cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PulseWindow {
    /// Rising edge, seconds.
    pub start_s: f64,
    /// Falling edge, seconds.
    pub end_s: f64,
}

impl PulseWindow {
    /// A `(0, 0)`-style zero-width window marks an unused target and
    /// contributes no pulse.
    pub fn is_unused(&self) -> bool {
        self.start_s == self.end_s
    }
}

/// Pulse windows for one TTL target.
#[derive(Debug, Clone, PartialEq)]
pub struct TtlTargetPulses {
    /// Digital target id (e.g. a laser line name).
    pub target: String,
    /// Windows within one dwell cycle; need not be sorted.
    pub windows: Vec<PulseWindow>,
}

/// Parsed TTL cycle parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct TtlParameters {
    /// Per-target pulse windows, in target order.
    pub targets: Vec<TtlTargetPulses>,
    /// Dwell time of one cycle, seconds.
    pub dwell_s: f64,
    /// Output sample rate, hertz.
    pub sample_rate_hz: f64,
}

impl TtlParameters {
    /// Parse from a key-checked [`ParameterSet`].
    pub fn from_set(set: &ParameterSet) -> Result<Self> {
        let targets = set.text_list(keys::TARGET_DEVICE)?;
        let starts = set.number_table(keys::TTL_START)?;
        let ends = set.number_table(keys::TTL_END)?;

        if starts.len() != targets.len() || ends.len() != targets.len() {
            return Err(ScanError::invalid_config(format!(
                "TTL tables disagree: {} targets, {} start rows, {} end rows",
                targets.len(),
                starts.len(),
                ends.len()
            )));
        }

        let mut parsed_targets = Vec::with_capacity(targets.len());
        for (idx, target) in targets.iter().enumerate() {
            let row_starts = &starts[idx];
            let row_ends = &ends[idx];
            if row_starts.len() != row_ends.len() {
                return Err(ScanError::invalid_config(format!(
                    "target '{target}' has {} pulse starts but {} pulse ends",
                    row_starts.len(),
                    row_ends.len()
                )));
            }
            let windows = row_starts
                .iter()
                .zip(row_ends.iter())
                .map(|(&start_s, &end_s)| PulseWindow { start_s, end_s })
                .collect();
            parsed_targets.push(TtlTargetPulses {
                target: target.clone(),
                windows,
            });
        }

        let parsed = Self {
            targets: parsed_targets,
            dwell_s: set.number(keys::SEQUENCE_TIME)?,
            sample_rate_hz: set.number(keys::SAMPLE_RATE)?,
        };
        parsed.validate()?;
        Ok(parsed)
    }

    /// Semantic validation: positive timing, well-formed pulse windows.
    ///
    /// A window whose start equals its end is an unused-target marker and
    /// passes; a start after its end, or a start at or past the sequence
    /// end, fails with [`ScanError::InvalidPulseInterval`].
    pub fn validate(&self) -> Result<()> {
        if self.dwell_s <= 0.0 {
            return Err(ScanError::invalid_config(format!(
                "sequence time must be positive, got {}",
                self.dwell_s
            )));
        }
        if self.sample_rate_hz <= 0.0 {
            return Err(ScanError::invalid_config(format!(
                "sample rate must be positive, got {}",
                self.sample_rate_hz
            )));
        }
        for target in &self.targets {
            for window in &target.windows {
                if window.is_unused() {
                    continue;
                }
                if window.start_s > window.end_s || window.start_s >= self.dwell_s {
                    return Err(ScanError::InvalidPulseInterval {
                        target: target.target.clone(),
                        start_s: window.start_s,
                        end_s: window.end_s,
                    });
                }
            }
        }
        Ok(())
    }
}
