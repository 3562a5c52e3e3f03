//! The alignment contract between trajectory and TTL generation.
//!
//! A trajectory designer decides, once, how many samples every part of a
//! scan occupies: the pixels of a line, the inter-line flyback, and the
//! padding blocks inserted around the scan body. The TTL designer must
//! reproduce those counts *verbatim*; recomputing them independently is
//! how illumination ends up firing while the scanner is still moving.
//! [`ScanInfo`] carries the counts explicitly so the contract is a struct,
//! not a convention.

use serde::{Deserialize, Serialize};

/// Named padding/settling sample counts ("throws") of one scan.
///
/// All counts are in samples at [`ScanInfo::sample_rate_hz`]. A throw of
/// zero means the trajectory has no such block (stage scans only use the
/// flyback throw).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScanThrows {
    /// Right-shift of the digital train relative to the analog one,
    /// compensating scanner response lag.
    pub sync_delay: usize,
    /// Fast-axis run-up from rest to scan velocity before the first line.
    pub start_acceleration: usize,
    /// Hold after initial positioning, letting the hardware settle.
    pub settling: usize,
    /// Smooth move from the rest position to the scan start (both axes,
    /// equalized to the longer one).
    pub initial_positioning: usize,
    /// Leading zero block before anything moves.
    pub start_zero: usize,
    /// Inter-line flyback/turnaround.
    pub flyback: usize,
    /// Smooth move back toward zero after the last line (both axes,
    /// equalized to the longer one).
    pub final_positioning: usize,
}

impl ScanThrows {
    /// Samples before the first pixel of the first line.
    pub fn leading(&self) -> usize {
        self.sync_delay
            + self.start_acceleration
            + self.settling
            + self.initial_positioning
            + self.start_zero
    }
}

/// Sample-count geometry of one synthesized scan.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScanInfo {
    /// Pixels in one scan line.
    pub pixels_per_line: usize,
    /// Total line count across all mid/slow positions.
    pub line_count: usize,
    /// Samples dwelt per pixel.
    pub samples_per_pixel: usize,
    /// Total samples of every axis signal (padding included).
    pub total_samples: usize,
    /// Output sample rate the counts are expressed at, hertz.
    pub sample_rate_hz: f64,
    /// Named padding sample counts.
    pub throws: ScanThrows,
}

impl ScanInfo {
    /// Samples spent scanning the pixels of one line.
    pub fn line_scan_samples(&self) -> usize {
        self.pixels_per_line * self.samples_per_pixel
    }

    /// Samples of one full line period (pixels plus flyback).
    pub fn line_period_samples(&self) -> usize {
        self.line_scan_samples() + self.throws.flyback
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_counts() {
        let info = ScanInfo {
            pixels_per_line: 6,
            line_count: 36,
            samples_per_pixel: 500,
            total_samples: 111_600,
            sample_rate_hz: 100_000.0,
            throws: ScanThrows {
                flyback: 100,
                ..ScanThrows::default()
            },
        };
        assert_eq!(info.line_scan_samples(), 3000);
        assert_eq!(info.line_period_samples(), 3100);
        assert_eq!(info.throws.leading(), 0);
        assert_eq!(
            info.line_period_samples() * info.line_count,
            info.total_samples
        );
    }
}
