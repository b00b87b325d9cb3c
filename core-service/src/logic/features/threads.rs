//! Thread / Handle Feature Extraction

use super::snapshot::{FeatureExtractor, FeatureSnapshot};
use super::trend::TrendAccumulator;
use crate::logic::ingestion::ProcessMetricsSample;

#[derive(Debug, Clone, Default)]
pub struct ThreadFeatures {
    pub max_threads: u32,
    pub max_open_files: u32,
    pub max_sockets: u32,
    trend: TrendAccumulator,
}

impl ThreadFeatures {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FeatureExtractor for ThreadFeatures {
    fn add_sample(&mut self, sample: &ProcessMetricsSample) {
        self.max_threads = self.max_threads.max(sample.threads);
        self.max_open_files = self.max_open_files.max(sample.open_files);
        self.max_sockets = self.max_sockets.max(sample.socket_count.unwrap_or(0));
        self.trend.push(sample.threads as f64);
    }

    fn extract(&self, snapshot: &mut FeatureSnapshot) {
        snapshot.threads_avg = self.trend.mean();
        snapshot.threads_max = self.max_threads;
        snapshot.threads_trend = self.trend.normalized();
        snapshot.open_files_max = self.max_open_files;
        snapshot.socket_max = self.max_sockets;
    }
}
