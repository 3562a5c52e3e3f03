//! Per-target signal buffers for one scan execution.

use std::collections::BTreeMap;

/// The synthesized drive signals of one scan: target id to sample buffer,
/// analog (position voltages) and digital (TTL levels) kept apart.
///
/// One `SignalSet` describes one scan execution on one shared sample
/// timeline; every buffer in a well-formed set has the same length. The
/// execution engine keeps the set staged while the scan runs (the abort
/// ramp needs the analog data) and discards it afterwards.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SignalSet {
    /// Sample rate the buffers are meant to be played at, hertz.
    pub sample_rate_hz: f64,
    /// Analog position signals by target id.
    pub analog: BTreeMap<String, Vec<f64>>,
    /// Digital pulse trains by target id.
    pub digital: BTreeMap<String, Vec<bool>>,
}

impl SignalSet {
    /// Empty set at the given sample rate.
    pub fn new(sample_rate_hz: f64) -> Self {
        Self {
            sample_rate_hz,
            analog: BTreeMap::new(),
            digital: BTreeMap::new(),
        }
    }

    /// Add an analog buffer.
    pub fn insert_analog(&mut self, target: impl Into<String>, samples: Vec<f64>) {
        self.analog.insert(target.into(), samples);
    }

    /// Add a digital buffer.
    pub fn insert_digital(&mut self, target: impl Into<String>, samples: Vec<bool>) {
        self.digital.insert(target.into(), samples);
    }

    /// True when no buffer is present.
    pub fn is_empty(&self) -> bool {
        self.analog.is_empty() && self.digital.is_empty()
    }

    /// Number of targets across both families.
    pub fn target_count(&self) -> usize {
        self.analog.len() + self.digital.len()
    }

    /// Iterate over `(target, length)` for every buffer in the set.
    pub fn buffer_lengths(&self) -> impl Iterator<Item = (&str, usize)> {
        self.analog
            .iter()
            .map(|(k, v)| (k.as_str(), v.len()))
            .chain(self.digital.iter().map(|(k, v)| (k.as_str(), v.len())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_both_signal_families() {
        let mut set = SignalSet::new(100_000.0);
        assert!(set.is_empty());
        set.insert_analog("galvo_x", vec![0.0; 10]);
        set.insert_digital("405", vec![false; 10]);
        assert_eq!(set.target_count(), 2);
        let lengths: Vec<_> = set.buffer_lengths().collect();
        assert!(lengths.contains(&("galvo_x", 10)));
        assert!(lengths.contains(&("405", 10)));
    }
}
