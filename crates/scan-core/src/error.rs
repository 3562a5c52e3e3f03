//! Error types for scan synthesis and orchestration.
//!
//! [`ScanError`] covers everything that can go wrong between receiving a
//! parameter set and handing a finished [`crate::SignalSet`] to the
//! execution engine:
//!
//! - **Configuration errors** (`ParameterMismatch`, `Incompatibility`,
//!   `InvalidConfig`): raised synchronously at build time, never retried;
//!   the caller must fix the configuration.
//! - **Pulse errors** (`InvalidPulseInterval`): a malformed TTL on/off pair
//!   that would otherwise produce an undefined pulse train.
//! - **Hardware errors** (`Hardware`, converted from
//!   [`crate::hardware::DaqError`]): surfaced as a failed scan, never a
//!   crash.
//!
//! A failed build must leave no hardware side effect behind; hardware
//! errors are raised only after synthesis has fully succeeded.

use thiserror::Error;

/// Convenience alias for results using [`ScanError`].
pub type Result<T> = std::result::Result<T, ScanError>;

/// Primary error type for scan building and orchestration.
#[derive(Error, Debug)]
pub enum ScanError {
    /// The supplied parameter keys do not exactly match the designer's
    /// declared expected-parameter set.
    #[error(
        "Parameter set does not match {designer} designer: missing {missing:?}, unexpected {unexpected:?}"
    )]
    ParameterMismatch {
        /// Human-readable designer name.
        designer: String,
        /// Expected keys absent from the supplied set, sorted.
        missing: Vec<String>,
        /// Supplied keys the designer does not know, sorted.
        unexpected: Vec<String>,
    },

    /// The scan and TTL parameter sets cannot be combined into one scan.
    #[error("Incompatible scan configuration: {message}")]
    Incompatibility {
        /// What disagreed.
        message: String,
    },

    /// A TTL pulse interval is malformed (start after end, or start past
    /// the end of the dwell sequence).
    #[error(
        "Invalid pulse interval for target '{target}': start {start_s} s, end {end_s} s"
    )]
    InvalidPulseInterval {
        /// Target the pulse belongs to.
        target: String,
        /// Interval start, seconds.
        start_s: f64,
        /// Interval end, seconds.
        end_s: f64,
    },

    /// Semantically invalid configuration values (bad axis counts, negative
    /// times, duplicate channels and the like).
    #[error("Invalid configuration: {message}")]
    InvalidConfig {
        /// What was wrong.
        message: String,
    },

    /// A hardware-level failure, carried across the engine boundary.
    #[error("Hardware error: {message}")]
    Hardware {
        /// Driver-level description.
        message: String,
    },

    /// File I/O while loading configuration.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ScanError {
    /// Shorthand for an [`ScanError::InvalidConfig`].
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Shorthand for an [`ScanError::Incompatibility`].
    pub fn incompatibility(message: impl Into<String>) -> Self {
        Self::Incompatibility {
            message: message.into(),
        }
    }

    /// True for errors the caller can only fix by changing configuration.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::ParameterMismatch { .. }
                | Self::Incompatibility { .. }
                | Self::InvalidPulseInterval { .. }
                | Self::InvalidConfig { .. }
        )
    }
}

impl From<crate::hardware::DaqError> for ScanError {
    fn from(err: crate::hardware::DaqError) -> Self {
        Self::Hardware {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameter_mismatch_lists_both_sides() {
        let err = ScanError::ParameterMismatch {
            designer: "stage scan".to_string(),
            missing: vec!["return_time".to_string()],
            unexpected: vec!["phase".to_string()],
        };
        let text = err.to_string();
        assert!(text.contains("stage scan"));
        assert!(text.contains("return_time"));
        assert!(text.contains("phase"));
        assert!(err.is_configuration());
    }

    #[test]
    fn hardware_errors_are_not_configuration() {
        let err = ScanError::from(crate::hardware::DaqError::DeviceBusy);
        assert!(!err.is_configuration());
        assert!(err.to_string().contains("busy"));
    }
}
