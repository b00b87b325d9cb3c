//! I/O Feature Extraction
//!
//! Counters are cumulative, so the rate is last minus first over elapsed time.

use chrono::{DateTime, Utc};

use super::snapshot::{FeatureExtractor, FeatureSnapshot};
use crate::logic::ingestion::ProcessMetricsSample;

#[derive(Debug, Clone, Default)]
pub struct IoFeatures {
    first: Option<(DateTime<Utc>, u64)>,
    last: Option<(DateTime<Utc>, u64)>,
}

impl IoFeatures {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn elapsed_secs(&self) -> f64 {
        match (self.first, self.last) {
            (Some((start, _)), Some((end, _))) => {
                (end - start).num_milliseconds() as f64 / 1000.0
            }
            _ => 0.0,
        }
    }

    pub fn bytes_per_sec(&self) -> f64 {
        let elapsed = self.elapsed_secs();
        match (self.first, self.last) {
            (Some((_, first)), Some((_, last))) if elapsed > 0.0 => {
                last.saturating_sub(first) as f64 / elapsed
            }
            _ => 0.0,
        }
    }
}

impl FeatureExtractor for IoFeatures {
    fn add_sample(&mut self, sample: &ProcessMetricsSample) {
        let point = (sample.timestamp, sample.io_total());
        if self.first.is_none() {
            self.first = Some(point);
        }
        self.last = Some(point);
    }

    fn extract(&self, snapshot: &mut FeatureSnapshot) {
        snapshot.duration_secs = self.elapsed_secs().max(0.0);
        snapshot.io_bytes_per_sec = self.bytes_per_sec();
    }
}
