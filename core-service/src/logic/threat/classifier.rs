//! Local Heuristic Classifier
//!
//! CHỈ chứa logic classify - deterministic, không network.
//! Input: FeatureSnapshot + HeuristicThresholds
//! Output: AnomalyAnalysis
//!
//! Rules are checked in order; the first match wins.

use super::rules::{confidence_for, recommendations_for, HeuristicThresholds, IO_RATE_SCORE_CEILING, MB};
use super::types::{AnomalyAnalysis, AnomalyType};
use crate::logic::features::FeatureSnapshot;

/// Classify with default thresholds
pub fn classify(features: &FeatureSnapshot) -> AnomalyAnalysis {
    classify_with_thresholds(features, &HeuristicThresholds::default())
}

pub fn classify_with_thresholds(
    features: &FeatureSnapshot,
    thresholds: &HeuristicThresholds,
) -> AnomalyAnalysis {
    match first_match(features, thresholds) {
        Some((kind, score, explanation)) => AnomalyAnalysis {
            is_anomalous: true,
            anomaly_score: clamp_unit(score),
            anomaly_type: kind,
            explanation,
            confidence: confidence_for(kind),
            recommendations: recommendations_for(kind),
        },
        None => AnomalyAnalysis {
            confidence: confidence_for(AnomalyType::Normal),
            ..AnomalyAnalysis::normal(format!(
                "No threshold exceeded over {} samples (cpu avg {:.1}%, memory max {:.1} MB)",
                features.sample_count, features.cpu_avg, features.memory_max_mb
            ))
        },
    }
}

fn first_match(
    f: &FeatureSnapshot,
    t: &HeuristicThresholds,
) -> Option<(AnomalyType, f64, String)> {
    if f.cpu_avg > t.cpu_avg {
        return Some((
            AnomalyType::CpuSpike,
            f.cpu_avg / 100.0,
            format!(
                "Average CPU usage {:.1}% exceeds {:.1}% (peak {:.1}%)",
                f.cpu_avg, t.cpu_avg, f.cpu_max
            ),
        ));
    }

    if f.memory_slope_mb > t.memory_slope_mb && f.memory_max_mb > t.memory_max_mb {
        return Some((
            AnomalyType::MemoryLeak,
            f.memory_slope_mb / 100.0,
            format!(
                "Memory grows {:.1} MB per sample and peaked at {:.1} MB",
                f.memory_slope_mb, f.memory_max_mb
            ),
        ));
    }

    if f.threads_max > t.threads_max || f.threads_trend > t.threads_trend {
        return Some((
            AnomalyType::ForkBomb,
            f.threads_max as f64 / 100.0,
            format!(
                "Thread count reached {} (trend {:.2} per sample)",
                f.threads_max, f.threads_trend
            ),
        ));
    }

    if f.open_files_max > t.open_files_max {
        return Some((
            AnomalyType::ResourceExhaustion,
            f.open_files_max as f64 / 256.0,
            format!(
                "{} open files exceeds the limit of {}",
                f.open_files_max, t.open_files_max
            ),
        ));
    }

    if f.io_bytes_per_sec > t.io_bytes_per_sec {
        return Some((
            AnomalyType::IoStorm,
            f.io_bytes_per_sec / IO_RATE_SCORE_CEILING,
            format!(
                "I/O rate {:.2} MB/s exceeds {:.2} MB/s",
                f.io_bytes_per_sec / MB,
                t.io_bytes_per_sec / MB
            ),
        ));
    }

    None
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
