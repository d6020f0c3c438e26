// src/delta/metrics.rs

//! Delta generation metrics
//!
//! Tracks bandwidth savings and decides whether a patch is worth shipping.

use std::fmt;

/// Maximum patch size as a fraction of the new file; above it the file is
/// shipped raw instead
pub const MAX_DELTA_RATIO: f64 = 0.9;

/// Sizes and ratio for one diffed file
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeltaMetrics {
    pub old_size: u64,
    pub new_size: u64,
    pub delta_size: u64,
    pub compression_ratio: f64,
    pub bandwidth_saved: i64,
}

impl DeltaMetrics {
    /// Calculate metrics from sizes
    pub fn new(old_size: u64, new_size: u64, delta_size: u64) -> Self {
        let compression_ratio = if new_size > 0 {
            delta_size as f64 / new_size as f64
        } else {
            1.0
        };

        Self {
            old_size,
            new_size,
            delta_size,
            compression_ratio,
            bandwidth_saved: new_size as i64 - delta_size as i64,
        }
    }

    /// Check if the patch is smaller than the threshold
    pub fn is_worthwhile(&self) -> bool {
        self.compression_ratio < MAX_DELTA_RATIO
    }

    /// Percentage of the new file's bytes saved by the patch
    pub fn savings_percentage(&self) -> f64 {
        if self.new_size > 0 {
            (self.bandwidth_saved as f64 / self.new_size as f64) * 100.0
        } else {
            0.0
        }
    }
}

impl fmt::Display for DeltaMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} bytes, patch {} bytes ({:.1}% saved)",
            self.old_size,
            self.new_size,
            self.delta_size,
            self.savings_percentage()
        )
    }
}

/// Running totals over a whole delta build
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeltaTotals {
    pub patched_files: usize,
    /// Modified files shipped raw (never-diff or patch not worthwhile)
    pub raw_files: usize,
    pub new_bytes: u64,
    pub patch_bytes: u64,
}

impl DeltaTotals {
    pub fn record_patch(&mut self, metrics: &DeltaMetrics) {
        self.patched_files += 1;
        self.new_bytes += metrics.new_size;
        self.patch_bytes += metrics.delta_size;
    }

    pub fn record_raw(&mut self) {
        self.raw_files += 1;
    }

    pub fn bytes_saved(&self) -> i64 {
        self.new_bytes as i64 - self.patch_bytes as i64
    }
}
