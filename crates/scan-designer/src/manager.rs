//! Pairing of trajectory and TTL designers into full scans.
//!
//! [`ScanManager`] is the synthesis entry point the acquisition engine
//! talks to: it validates that the scan and TTL parameter sets fit the
//! configured designers, then builds and merges their signals into one
//! [`SignalSet`] sharing a sample clock.

use std::collections::BTreeMap;

use scan_core::params::keys;
use scan_core::{ParameterSet, Result, ScanError, ScanInfo, SignalSet};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::galvo::{GalvoScanDesigner, GalvoTuning};
use crate::stage::StageScanDesigner;
use crate::ttl::{PointScanTtlCycleDesigner, TtlCycleDesigner, TTL_EXPECTED_PARAMETERS};

/// Trajectory designer choice in the configuration file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DesignerSelection {
    /// Stepwise stage raster ([`StageScanDesigner`]).
    Stage,
    /// Acceleration-limited galvo raster ([`GalvoScanDesigner`]).
    Galvo,
}

/// The configured trajectory designer.
///
/// A closed set: every scanner type this system drives has a variant
/// here, so designer dispatch is exhaustive and a configuration typo
/// fails at parse time rather than at scan time.
#[derive(Debug, Clone, Copy)]
pub enum TrajectoryDesigner {
    /// Stepwise stage raster.
    Stage(StageScanDesigner),
    /// Acceleration-limited galvo raster.
    Galvo(GalvoScanDesigner),
}

impl TrajectoryDesigner {
    /// Human-readable designer name used in error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Stage(_) => "stage scan",
            Self::Galvo(_) => "galvo scan",
        }
    }

    /// Parameter keys [`Self::make_signal`] requires, sorted.
    pub fn expected_parameters(&self) -> &'static [&'static str] {
        match self {
            Self::Stage(designer) => designer.expected_parameters(),
            Self::Galvo(designer) => designer.expected_parameters(),
        }
    }

    /// Builds the positioning trajectories and scan geometry.
    pub fn make_signal(
        &self,
        set: &ParameterSet,
    ) -> Result<(BTreeMap<String, Vec<f64>>, ScanInfo)> {
        match self {
            Self::Stage(designer) => designer.make_signal(set),
            Self::Galvo(designer) => designer.make_signal(set),
        }
    }
}

/// Builds complete scans from validated parameter sets.
#[derive(Debug, Clone, Copy)]
pub struct ScanManager {
    trajectory: TrajectoryDesigner,
    ttl: PointScanTtlCycleDesigner,
    cycle: TtlCycleDesigner,
}

impl ScanManager {
    /// Manager around an already-constructed trajectory designer.
    pub fn new(trajectory: TrajectoryDesigner) -> Self {
        Self {
            trajectory,
            ttl: PointScanTtlCycleDesigner::new(),
            cycle: TtlCycleDesigner::new(),
        }
    }

    /// Instantiates the designer pair selected by the configuration.
    pub fn from_selection(selection: DesignerSelection, tuning: GalvoTuning) -> Self {
        let trajectory = match selection {
            DesignerSelection::Stage => TrajectoryDesigner::Stage(StageScanDesigner::new()),
            DesignerSelection::Galvo => TrajectoryDesigner::Galvo(GalvoScanDesigner::new(tuning)),
        };
        Self::new(trajectory)
    }

    /// The configured trajectory designer.
    pub fn trajectory(&self) -> &TrajectoryDesigner {
        &self.trajectory
    }

    /// Checks both parameter sets against the designers' expected keys
    /// without synthesizing anything.
    ///
    /// Any difference comes back as [`ScanError::Incompatibility`] naming
    /// the offending keys, suitable for display in the controlling UI.
    pub fn check_compatibility(
        &self,
        scan_set: &ParameterSet,
        ttl_set: &ParameterSet,
    ) -> Result<()> {
        scan_set
            .check_keys(self.trajectory.name(), self.trajectory.expected_parameters())
            .map_err(as_incompatibility)?;
        ttl_set
            .check_keys("point-scan TTL cycle", TTL_EXPECTED_PARAMETERS)
            .map_err(as_incompatibility)?;
        Ok(())
    }

    /// Builds the stationary dwell cycles alone, one per TTL target.
    pub fn cycle_signals(&self, ttl_set: &ParameterSet) -> Result<BTreeMap<String, Vec<bool>>> {
        self.cycle.make_signal(ttl_set)
    }

    /// Builds a complete scan: trajectories plus aligned pulse trains.
    ///
    /// With `static_positioner` set the positioners are left untouched
    /// and only the dwell cycles are produced; the returned geometry is
    /// `None` because there is no trajectory to align against.
    pub fn build_full_scan(
        &self,
        scan_set: &ParameterSet,
        ttl_set: &ParameterSet,
        static_positioner: bool,
    ) -> Result<(SignalSet, Option<ScanInfo>)> {
        if static_positioner {
            let digital = self.ttl.make_signal(ttl_set, None)?;
            let sample_rate_hz = ttl_set.number(keys::SAMPLE_RATE)?;
            debug!(targets = digital.len(), "static TTL scan built");
            return Ok((
                SignalSet {
                    sample_rate_hz,
                    analog: BTreeMap::new(),
                    digital,
                },
                None,
            ));
        }

        let (analog, info) = self.trajectory.make_signal(scan_set)?;

        let ttl_rate = ttl_set.number(keys::SAMPLE_RATE)?;
        if ttl_rate != info.sample_rate_hz {
            return Err(ScanError::incompatibility(format!(
                "TTL sample rate {ttl_rate} Hz differs from the scan rate {} Hz",
                info.sample_rate_hz
            )));
        }
        let ttl_dwell = ttl_set.number(keys::SEQUENCE_TIME)?;
        let scan_dwell = scan_set.number(keys::SEQUENCE_TIME)?;
        if ttl_dwell != scan_dwell {
            return Err(ScanError::incompatibility(format!(
                "TTL sequence time {ttl_dwell} s differs from the scan dwell {scan_dwell} s"
            )));
        }

        let digital = self.ttl.make_signal(ttl_set, Some(&info))?;
        debug!(
            analog_targets = analog.len(),
            digital_targets = digital.len(),
            total = info.total_samples,
            "full scan built"
        );
        Ok((
            SignalSet {
                sample_rate_hz: info.sample_rate_hz,
                analog,
                digital,
            },
            Some(info),
        ))
    }
}

fn as_incompatibility(err: ScanError) -> ScanError {
    ScanError::incompatibility(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage_manager() -> ScanManager {
        ScanManager::from_selection(DesignerSelection::Stage, GalvoTuning::default())
    }

    fn scan_set() -> ParameterSet {
        ParameterSet::new()
            .with_text_list(keys::TARGET_DEVICE, ["vpz x", "vpz y", "vpz z"])
            .with_number_list(keys::AXIS_LENGTH, [5.0, 5.0, 5.0])
            .with_number_list(keys::AXIS_STEP_SIZE, [1.0, 1.0, 1.0])
            .with_number_list(keys::AXIS_STARTPOS, [0.0, 0.0, 0.0])
            .with_number(keys::SEQUENCE_TIME, 0.005)
            .with_number(keys::SAMPLE_RATE, 100_000.0)
            .with_number(keys::RETURN_TIME, 0.001)
    }

    fn ttl_set() -> ParameterSet {
        ParameterSet::new()
            .with_text_list(keys::TARGET_DEVICE, ["405", "488"])
            .with_number_table(keys::TTL_START, [vec![1e-4, 4e-3], vec![0.0, 0.0]])
            .with_number_table(keys::TTL_END, [vec![1.5e-3, 5e-3], vec![0.0, 0.0]])
            .with_number(keys::SEQUENCE_TIME, 0.005)
            .with_number(keys::SAMPLE_RATE, 100_000.0)
    }

    #[test]
    fn compatible_sets_pass_the_check() {
        assert!(stage_manager()
            .check_compatibility(&scan_set(), &ttl_set())
            .is_ok());
    }

    #[test]
    fn key_mismatch_reports_incompatibility() {
        let mut bad = scan_set();
        bad.remove(keys::RETURN_TIME);
        let err = stage_manager()
            .check_compatibility(&bad, &ttl_set())
            .unwrap_err();
        assert!(matches!(err, ScanError::Incompatibility { .. }));
        assert!(err.to_string().contains(keys::RETURN_TIME));
    }

    #[test]
    fn full_scan_merges_aligned_signal_families() {
        let (signals, info) = stage_manager()
            .build_full_scan(&scan_set(), &ttl_set(), false)
            .unwrap();
        let info = info.unwrap();

        assert_eq!(signals.analog.len(), 3);
        assert_eq!(signals.digital.len(), 2);
        assert_eq!(signals.sample_rate_hz, 100_000.0);
        for (_, len) in signals.buffer_lengths() {
            assert_eq!(len, info.total_samples);
        }

        // Pixel alignment: the first pulse fires 10 samples into the
        // first pixel while the stage is dwelling at the line start.
        let violet = &signals.digital["405"];
        assert!(violet[10]);
        let fast = &signals.analog["vpz x"];
        assert!(fast[10].abs() < 1.0);
    }

    #[test]
    fn full_scan_is_deterministic() {
        let manager = stage_manager();
        let first = manager.build_full_scan(&scan_set(), &ttl_set(), false).unwrap();
        let second = manager.build_full_scan(&scan_set(), &ttl_set(), false).unwrap();
        assert_eq!(first.0, second.0);
        assert_eq!(first.1, second.1);
    }

    #[test]
    fn static_scan_skips_the_positioners() {
        let (signals, info) = stage_manager()
            .build_full_scan(&scan_set(), &ttl_set(), true)
            .unwrap();
        assert!(info.is_none());
        assert!(signals.analog.is_empty());
        assert_eq!(signals.digital["405"].len(), 500);
        assert_eq!(signals.sample_rate_hz, 100_000.0);
    }

    #[test]
    fn differing_sample_rates_are_incompatible() {
        let ttl = ttl_set().with_number(keys::SAMPLE_RATE, 50_000.0);
        let err = stage_manager()
            .build_full_scan(&scan_set(), &ttl, false)
            .unwrap_err();
        assert!(matches!(err, ScanError::Incompatibility { .. }));
    }

    #[test]
    fn differing_dwell_times_are_incompatible() {
        let ttl = ttl_set().with_number(keys::SEQUENCE_TIME, 0.004);
        let err = stage_manager()
            .build_full_scan(&scan_set(), &ttl, false)
            .unwrap_err();
        assert!(matches!(err, ScanError::Incompatibility { .. }));
    }

    #[test]
    fn galvo_selection_builds_galvo_scans() {
        let manager =
            ScanManager::from_selection(DesignerSelection::Galvo, GalvoTuning::default());
        assert_eq!(manager.trajectory().name(), "galvo scan");

        let scan = ParameterSet::new()
            .with_text_list(keys::TARGET_DEVICE, ["galvo fast", "galvo slow"])
            .with_number_list(keys::AXIS_LENGTH, [100.0, 4.0])
            .with_number_list(keys::AXIS_STEP_SIZE, [1.0, 1.0])
            .with_number_list(keys::AXIS_STARTPOS, [0.0, 0.0])
            .with_number(keys::SEQUENCE_TIME, 0.005)
            .with_number(keys::SAMPLE_RATE, 100_000.0)
        ;
        let ttl = ttl_set();
        let (signals, info) = manager.build_full_scan(&scan, &ttl, false).unwrap();
        let info = info.unwrap();
        assert_eq!(info.pixels_per_line, 100);
        assert!(info.throws.leading() > 0);
        for (_, len) in signals.buffer_lengths() {
            assert_eq!(len, info.total_samples);
        }
    }

    #[test]
    fn selection_parses_from_config_text() {
        #[derive(serde::Deserialize)]
        struct Carrier {
            designer: DesignerSelection,
        }
        let carrier: Carrier = toml::from_str("designer = \"galvo\"").unwrap();
        assert_eq!(carrier.designer, DesignerSelection::Galvo);
    }
}
