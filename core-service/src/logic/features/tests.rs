//! Integration Tests for Feature Extraction
//!
//! Tests các extractors khi chạy qua `extract_features`.

use chrono::{Duration, TimeZone, Utc};

use super::extract_features;
use crate::logic::ingestion::ProcessMetricsSample;

const MB: u64 = 1024 * 1024;

fn sample_at(secs: i64, cpu: f64, rss_mb: u64, threads: u32) -> ProcessMetricsSample {
    let base = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
    ProcessMetricsSample {
        timestamp: base + Duration::seconds(secs),
        cpu_percent: cpu,
        memory_rss: rss_mb * MB,
        threads,
        open_files: 3,
        ..ProcessMetricsSample::zero()
    }
}

#[test]
fn test_empty_window_is_single_zero_sample() {
    let f = extract_features(&[]);
    assert_eq!(f.sample_count, 1);
    assert_eq!(f.cpu_avg, 0.0);
    assert_eq!(f.memory_trend, 0.0);
    assert_eq!(f.sample_rate, 0.0);
    assert_eq!(f.io_bytes_per_sec, 0.0);
}

#[test]
fn test_single_sample_has_no_trend() {
    let f = extract_features(&[sample_at(0, 40.0, 100, 4)]);
    assert_eq!(f.sample_count, 1);
    assert_eq!(f.memory_trend, 0.0);
    assert_eq!(f.threads_trend, 0.0);
    assert_eq!(f.duration_secs, 0.0);
    assert_eq!(f.cpu_max, 40.0);
}

#[test]
fn test_cpu_spike_window() {
    let samples: Vec<_> = [95.0, 97.0, 92.0, 99.0, 96.0]
        .iter()
        .enumerate()
        .map(|(i, cpu)| sample_at(i as i64, *cpu, 50, 4))
        .collect();

    let f = extract_features(&samples);
    assert!((f.cpu_avg - 95.8).abs() < 1e-9);
    assert_eq!(f.cpu_max, 99.0);
    assert_eq!(f.cpu_above_50_ratio, 1.0);
    assert!(f.cpu_stddev > 0.0 && f.cpu_stddev < 5.0);
    assert_eq!(f.memory_trend, 0.0);
    assert_eq!(f.duration_secs, 4.0);
    assert!((f.sample_rate - 1.25).abs() < 1e-9);
}

#[test]
fn test_linear_memory_growth() {
    let samples: Vec<_> = (0..10)
        .map(|i| sample_at(i, 10.0, 50 + 15 * i as u64, 4))
        .collect();

    let f = extract_features(&samples);
    assert!((f.memory_slope_mb - 15.0).abs() < 1e-6);
    assert!(f.memory_trend > 0.0);
    assert!((f.memory_max_mb - 185.0).abs() < 1e-9);
    assert!((f.memory_avg_mb - 117.5).abs() < 1e-9);
}

#[test]
fn test_thread_and_handle_maxima() {
    let mut samples: Vec<_> = (0..5).map(|i| sample_at(i, 5.0, 10, 2 + 10 * i as u32)).collect();
    samples[2].open_files = 200;
    samples[3].socket_count = Some(7);

    let f = extract_features(&samples);
    assert_eq!(f.threads_max, 42);
    assert!(f.threads_trend > 0.0);
    assert_eq!(f.open_files_max, 200);
    assert_eq!(f.socket_max, 7);
}

#[test]
fn test_io_rate_from_cumulative_counters() {
    let mut first = sample_at(0, 1.0, 10, 1);
    first.read_bytes = Some(1000);
    first.write_bytes = Some(0);
    let mut last = sample_at(4, 1.0, 10, 1);
    last.read_bytes = Some(5000);
    last.write_bytes = Some(4000);

    let f = extract_features(&[first, last]);
    assert!((f.io_bytes_per_sec - 2000.0).abs() < 1e-9);
}

#[test]
fn test_io_counter_reset_does_not_go_negative() {
    let mut first = sample_at(0, 1.0, 10, 1);
    first.read_bytes = Some(9000);
    let mut last = sample_at(2, 1.0, 10, 1);
    last.read_bytes = Some(100);

    let f = extract_features(&[first, last]);
    assert_eq!(f.io_bytes_per_sec, 0.0);
}
