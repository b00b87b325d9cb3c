//! CPU Feature Extraction
//!
//! Trích xuất các features liên quan đến CPU usage.

use super::snapshot::{FeatureExtractor, FeatureSnapshot};
use crate::logic::ingestion::ProcessMetricsSample;

/// Samples above this count toward `cpu_above_50_ratio` (%)
pub const CPU_BUSY_THRESHOLD: f64 = 50.0;

/// CPU Features từ raw samples
#[derive(Debug, Clone, Default)]
pub struct CpuFeatures {
    pub max_usage: f64,
    pub busy_count: u32,
    pub total_samples: u32,
    sum: f64,
    sum_sq: f64,
}

impl CpuFeatures {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn avg_usage(&self) -> f64 {
        if self.total_samples > 0 {
            self.sum / self.total_samples as f64
        } else {
            0.0
        }
    }

    /// Population standard deviation
    pub fn stddev(&self) -> f64 {
        if self.total_samples == 0 {
            return 0.0;
        }
        let n = self.total_samples as f64;
        let mean = self.sum / n;
        (self.sum_sq / n - mean * mean).max(0.0).sqrt()
    }

    pub fn busy_ratio(&self) -> f64 {
        if self.total_samples > 0 {
            self.busy_count as f64 / self.total_samples as f64
        } else {
            0.0
        }
    }
}

impl FeatureExtractor for CpuFeatures {
    fn add_sample(&mut self, sample: &ProcessMetricsSample) {
        let usage = sample.cpu_percent;
        if self.total_samples == 0 || usage > self.max_usage {
            self.max_usage = usage;
        }
        if usage > CPU_BUSY_THRESHOLD {
            self.busy_count += 1;
        }
        self.total_samples += 1;
        self.sum += usage;
        self.sum_sq += usage * usage;
    }

    fn extract(&self, snapshot: &mut FeatureSnapshot) {
        snapshot.cpu_avg = self.avg_usage();
        snapshot.cpu_max = self.max_usage;
        snapshot.cpu_stddev = self.stddev();
        snapshot.cpu_above_50_ratio = self.busy_ratio();
    }
}
