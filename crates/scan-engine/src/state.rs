//! Engine lifecycle states and broadcast events.

use std::fmt;

use scan_core::hardware::{DaqError, TaskKind};

/// Lifecycle state of the execution engine.
///
/// `Armed` is the window between committing the tasks and releasing the
/// trigger source; with an immediate analog trigger it passes in one
/// actor turn, but a backend gating on an external line can rest there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// No scan in flight, hardware released.
    Idle,
    /// Tasks created and buffers staged, nothing started.
    Built,
    /// Slave tasks started and waiting on the start trigger.
    Armed,
    /// All tasks generating.
    Running,
    /// Some tasks have reported done, the rest are playing out.
    Draining,
    /// Abort in progress, outputs ramping to park.
    Aborting,
}

impl EngineState {
    /// Whether the engine refuses new scans in this state.
    pub fn is_busy(&self) -> bool {
        !matches!(self, Self::Idle)
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Built => "built",
            Self::Armed => "armed",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Aborting => "aborting",
        };
        write!(f, "{label}")
    }
}

/// Engine notifications, broadcast to every subscriber.
#[derive(Debug, Clone)]
pub enum ScanEvent {
    /// Tasks are created and buffers staged.
    Built {
        /// Samples per channel.
        total_samples: usize,
        /// Analog channels driven.
        analog_targets: usize,
        /// Digital lines driven.
        digital_targets: usize,
    },
    /// Generation started.
    Started,
    /// One hardware task reported done.
    TaskFinished {
        /// Which task family finished.
        kind: TaskKind,
    },
    /// The scan's primary task (the trajectory, or the pulse train when
    /// no analog channels exist) finished. Sent exactly once per scan;
    /// secondary tasks may still be draining when it arrives.
    Done,
    /// An abort completed and the outputs are parked.
    Aborted,
    /// The scan failed and was torn down.
    Failed {
        /// The error that ended the scan.
        error: DaqError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_idle_is_not_busy() {
        assert!(!EngineState::Idle.is_busy());
        for state in [
            EngineState::Built,
            EngineState::Armed,
            EngineState::Running,
            EngineState::Draining,
            EngineState::Aborting,
        ] {
            assert!(state.is_busy(), "{state} should count as busy");
        }
    }

    #[test]
    fn states_display_as_lowercase_words() {
        assert_eq!(EngineState::Idle.to_string(), "idle");
        assert_eq!(EngineState::Draining.to_string(), "draining");
        assert_eq!(EngineState::Aborting.to_string(), "aborting");
    }
}
