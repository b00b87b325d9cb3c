//! Feature Snapshot - aggregated statistics over one sample window
//!
//! Every extractor writes its own fields; `extract_features` drives them
//! all in a single pass.

use serde::{Deserialize, Serialize};

use super::{cpu::CpuFeatures, io::IoFeatures, memory::MemoryFeatures, threads::ThreadFeatures};
use crate::logic::ingestion::ProcessMetricsSample;

// ============================================================================
// SNAPSHOT
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureSnapshot {
    pub sample_count: usize,
    pub duration_secs: f64,
    /// samples / second (0 when the window spans no time)
    pub sample_rate: f64,

    pub cpu_avg: f64,
    pub cpu_max: f64,
    pub cpu_stddev: f64,
    pub cpu_above_50_ratio: f64,

    pub memory_avg_mb: f64,
    pub memory_max_mb: f64,
    /// Normalized memory trend (slope / mean, per sample)
    pub memory_trend: f64,
    /// Raw memory slope (MB / sample)
    pub memory_slope_mb: f64,

    pub threads_avg: f64,
    pub threads_max: u32,
    pub threads_trend: f64,

    pub open_files_max: u32,
    pub socket_max: u32,
    pub io_bytes_per_sec: f64,
}

/// Per-metric accumulator
pub trait FeatureExtractor {
    fn add_sample(&mut self, sample: &ProcessMetricsSample);
    fn extract(&self, snapshot: &mut FeatureSnapshot);
}

// ============================================================================
// EXTRACTION
// ============================================================================

/// Aggregate a window of samples. An empty window behaves as a single
/// all-zero sample.
pub fn extract_features(samples: &[ProcessMetricsSample]) -> FeatureSnapshot {
    let zero = [ProcessMetricsSample::zero()];
    let samples = if samples.is_empty() { &zero[..] } else { samples };

    let mut cpu = CpuFeatures::new();
    let mut memory = MemoryFeatures::new();
    let mut threads = ThreadFeatures::new();
    let mut io = IoFeatures::new();

    for sample in samples {
        cpu.add_sample(sample);
        memory.add_sample(sample);
        threads.add_sample(sample);
        io.add_sample(sample);
    }

    let mut snapshot = FeatureSnapshot {
        sample_count: samples.len(),
        ..Default::default()
    };

    let extractors: [&dyn FeatureExtractor; 4] = [&cpu, &memory, &threads, &io];
    for extractor in extractors {
        extractor.extract(&mut snapshot);
    }

    snapshot.sample_rate = if snapshot.duration_secs > 0.0 {
        snapshot.sample_count as f64 / snapshot.duration_secs
    } else {
        0.0
    };

    snapshot
}
