//! Heuristic Rules & Thresholds
//!
//! Định nghĩa các threshold cho local classifier.
//! KHÔNG chứa logic classify - chỉ constants và config.

use serde::{Deserialize, Serialize};

use super::types::AnomalyType;

// ============================================================================
// DEFAULT THRESHOLDS
// ============================================================================

pub const MB: f64 = 1024.0 * 1024.0;

pub const CPU_AVG_THRESHOLD: f64 = 85.0;
/// MB per sample
pub const MEMORY_SLOPE_THRESHOLD_MB: f64 = 10.0;
pub const MEMORY_MAX_THRESHOLD_MB: f64 = 128.0;
pub const THREADS_MAX_THRESHOLD: u32 = 50;
pub const THREADS_TREND_THRESHOLD: f64 = 0.5;
pub const OPEN_FILES_THRESHOLD: u32 = 128;
pub const IO_RATE_THRESHOLD: f64 = 1.0 * MB;
/// I/O rate that maps to score 1.0
pub const IO_RATE_SCORE_CEILING: f64 = 4.0 * MB;

// ============================================================================
// CONFIDENCE (fixed per category)
// ============================================================================

pub fn confidence_for(kind: AnomalyType) -> f64 {
    match kind {
        AnomalyType::CpuSpike => 0.7,
        AnomalyType::MemoryLeak => 0.65,
        AnomalyType::ForkBomb => 0.7,
        AnomalyType::ResourceExhaustion => 0.6,
        AnomalyType::IoStorm => 0.6,
        AnomalyType::Normal => 0.5,
    }
}

pub fn recommendations_for(kind: AnomalyType) -> Vec<String> {
    let items: &[&str] = match kind {
        AnomalyType::CpuSpike => &[
            "Lower the CPU time limit for this command",
            "Look for busy loops or unbounded retries",
            "Profile the hot path before re-running",
        ],
        AnomalyType::MemoryLeak => &[
            "Set a tighter memory limit",
            "Check for buffers or caches that are never released",
            "Run under a heap profiler to locate the growth",
        ],
        AnomalyType::ForkBomb => &[
            "Cap the number of processes for the sandbox",
            "Terminate the process tree",
            "Review code paths that spawn threads or children",
        ],
        AnomalyType::ResourceExhaustion => &[
            "Lower the open file limit",
            "Check that file handles are closed after use",
        ],
        AnomalyType::IoStorm => &[
            "Cap the maximum file size",
            "Batch or buffer writes",
            "Check for runaway logging",
        ],
        AnomalyType::Normal => &[],
    };
    items.iter().map(|s| s.to_string()).collect()
}

// ============================================================================
// CONFIGURABLE THRESHOLDS
// ============================================================================

/// Thresholds for the local classifier (configurable, `[thresholds]`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeuristicThresholds {
    /// cpu avg, percent
    pub cpu_avg: f64,
    /// memory slope, MB per sample
    pub memory_slope_mb: f64,
    pub memory_max_mb: f64,
    pub threads_max: u32,
    pub threads_trend: f64,
    pub open_files_max: u32,
    /// bytes per second
    pub io_bytes_per_sec: f64,
}

impl Default for HeuristicThresholds {
    fn default() -> Self {
        Self {
            cpu_avg: CPU_AVG_THRESHOLD,
            memory_slope_mb: MEMORY_SLOPE_THRESHOLD_MB,
            memory_max_mb: MEMORY_MAX_THRESHOLD_MB,
            threads_max: THREADS_MAX_THRESHOLD,
            threads_trend: THREADS_TREND_THRESHOLD,
            open_files_max: OPEN_FILES_THRESHOLD,
            io_bytes_per_sec: IO_RATE_THRESHOLD,
        }
    }
}
