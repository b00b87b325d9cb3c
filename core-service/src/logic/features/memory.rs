//! Memory Feature Extraction
//!
//! Trích xuất các features liên quan đến Memory usage (MB).

use super::snapshot::{FeatureExtractor, FeatureSnapshot};
use super::trend::TrendAccumulator;
use crate::logic::ingestion::ProcessMetricsSample;

#[derive(Debug, Clone, Default)]
pub struct MemoryFeatures {
    pub max_usage_mb: f64,
    trend: TrendAccumulator,
}

impl MemoryFeatures {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FeatureExtractor for MemoryFeatures {
    fn add_sample(&mut self, sample: &ProcessMetricsSample) {
        let usage_mb = sample.memory_mb();
        if usage_mb > self.max_usage_mb {
            self.max_usage_mb = usage_mb;
        }
        self.trend.push(usage_mb);
    }

    fn extract(&self, snapshot: &mut FeatureSnapshot) {
        snapshot.memory_avg_mb = self.trend.mean();
        snapshot.memory_max_mb = self.max_usage_mb;
        snapshot.memory_trend = self.trend.normalized();
        snapshot.memory_slope_mb = self.trend.slope();
    }
}
