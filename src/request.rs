//! One-file description of a scan job.
//!
//! A [`ScanRequest`] is the TOML an operator hands the program: which
//! trajectory designer to use, the scan and TTL parameter sets, and
//! optional galvo tuning overrides.
//!
//! ```toml
//! designer = "stage"
//!
//! [scan]
//! target_device = ["vpz x", "vpz y", "vpz z"]
//! axis_length = [5.0, 5.0, 5.0]
//! axis_step_size = [1.0, 1.0, 1.0]
//! axis_startpos = [0.0, 0.0, 0.0]
//! sequence_time = 0.005
//! sample_rate = 100000.0
//! return_time = 0.001
//!
//! [ttl]
//! target_device = ["405", "488"]
//! ttl_start = [[0.0001], [0.0]]
//! ttl_end = [[0.0015], [0.0]]
//! sequence_time = 0.005
//! sample_rate = 100000.0
//! ```
//!
//! The request does not name physical channels; the separate device map
//! ([`scan_core::DeviceConfig`]) resolves targets to hardware when the
//! scan is executed.

use std::path::Path;

use scan_core::{ParameterSet, Result, ScanError, ScanInfo, SignalSet};
use scan_designer::{DesignerSelection, GalvoTuning, ScanManager};
use serde::Deserialize;

/// A complete scan job as loaded from a TOML request file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScanRequest {
    /// Which trajectory designer synthesizes the scan.
    pub designer: DesignerSelection,
    /// When set, skip trajectory synthesis and emit only the stationary
    /// TTL dwell cycles.
    #[serde(default)]
    pub static_positioner: bool,
    /// Galvo mirror tuning overrides. Stage requests ignore it.
    #[serde(default)]
    pub galvo: GalvoTuning,
    /// Trajectory designer parameters.
    pub scan: ParameterSet,
    /// TTL designer parameters.
    pub ttl: ParameterSet,
}

impl ScanRequest {
    /// Parses a request from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text)
            .map_err(|err| ScanError::invalid_config(format!("scan request: {err}")))
    }

    /// Loads a request from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// The manager that carries out this request.
    pub fn manager(&self) -> ScanManager {
        ScanManager::from_selection(self.designer, self.galvo)
    }

    /// Checks both parameter sets against their designers without
    /// synthesizing anything.
    pub fn check(&self) -> Result<()> {
        self.manager().check_compatibility(&self.scan, &self.ttl)
    }

    /// Synthesizes the full scan described by this request.
    pub fn build(&self) -> Result<(SignalSet, Option<ScanInfo>)> {
        self.manager()
            .build_full_scan(&self.scan, &self.ttl, self.static_positioner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

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

    #[test]
    fn stage_request_parses_and_builds() {
        let request = ScanRequest::from_toml_str(CUBE_REQUEST).unwrap();
        assert_eq!(request.designer, DesignerSelection::Stage);
        assert!(!request.static_positioner);
        request.check().unwrap();

        let (signals, info) = request.build().unwrap();
        let info = info.unwrap();
        assert_eq!(info.total_samples, 111_600);
        assert_eq!(signals.analog.len(), 3);
        assert_eq!(signals.digital.len(), 2);
    }

    #[test]
    fn galvo_tuning_defaults_when_absent() {
        let request = ScanRequest::from_toml_str(CUBE_REQUEST).unwrap();
        let defaults = GalvoTuning::default();
        assert_eq!(request.galvo.settling_time_s, defaults.settling_time_s);
        assert_eq!(request.galvo.max_velocity_umps, defaults.max_velocity_umps);
    }

    #[test]
    fn galvo_tuning_overrides_apply() {
        let text = r#"
designer = "galvo"

[galvo]
settling_time_s = 0.002

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
        let request = ScanRequest::from_toml_str(text).unwrap();
        assert_eq!(request.designer, DesignerSelection::Galvo);
        assert_eq!(request.galvo.settling_time_s, 0.002);
        // Untouched fields keep their defaults.
        let defaults = GalvoTuning::default();
        assert_eq!(request.galvo.max_velocity_umps, defaults.max_velocity_umps);
    }

    #[test]
    fn unknown_top_level_keys_are_rejected() {
        let text = CUBE_REQUEST.replace("designer =", "desinger =");
        let err = ScanRequest::from_toml_str(&text).unwrap_err();
        assert!(err.to_string().contains("scan request"));
    }

    #[test]
    fn loads_from_a_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CUBE_REQUEST.as_bytes()).unwrap();
        let request = ScanRequest::load(file.path()).unwrap();
        assert_eq!(request.designer, DesignerSelection::Stage);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = ScanRequest::load("/nonexistent/scan.toml").unwrap_err();
        assert!(matches!(err, ScanError::Io(_)));
    }
}
