//! Process Metrics Sample
//!
//! Một dòng JSON từ external metrics collector = một sample.
//! Chỉ nhận `event: "sample"`; các event khác (`start`, `stop`) bị bỏ qua.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// One timestamped resource-usage snapshot of the sandboxed process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessMetricsSample {
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    pub cpu_percent: f64,
    /// Resident set size (bytes)
    pub memory_rss: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_vms: Option<u64>,
    #[serde(default)]
    pub threads: u32,
    #[serde(default)]
    pub open_files: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket_count: Option<u32>,
    /// Cumulative bytes read
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_bytes: Option<u64>,
    /// Cumulative bytes written
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_bytes: Option<u64>,
}

impl ProcessMetricsSample {
    /// Synthetic all-zero sample (used when a window is empty)
    pub fn zero() -> Self {
        Self {
            timestamp: DateTime::<Utc>::default(),
            cpu_percent: 0.0,
            memory_rss: 0,
            memory_vms: None,
            threads: 0,
            open_files: 0,
            socket_count: None,
            read_bytes: None,
            write_bytes: None,
        }
    }

    pub fn memory_mb(&self) -> f64 {
        self.memory_rss as f64 / (1024.0 * 1024.0)
    }

    /// read + write counters, missing counters count as 0
    pub fn io_total(&self) -> u64 {
        self.read_bytes.unwrap_or(0).saturating_add(self.write_bytes.unwrap_or(0))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    Epoch(f64),
    Text(String),
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    match RawTimestamp::deserialize(deserializer)? {
        RawTimestamp::Epoch(secs) => {
            if !secs.is_finite() {
                return Err(D::Error::custom("non-finite epoch timestamp"));
            }
            let whole = secs.floor();
            let nanos = ((secs - whole) * 1e9).round().min(999_999_999.0) as u32;
            Utc.timestamp_opt(whole as i64, nanos)
                .single()
                .ok_or_else(|| D::Error::custom("epoch timestamp out of range"))
        }
        RawTimestamp::Text(text) => DateTime::parse_from_rfc3339(&text)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(D::Error::custom),
    }
}

/// Parse one collector line. Returns `None` for blank, malformed or
/// non-sample lines.
pub fn parse_line(line: &str) -> Option<ProcessMetricsSample> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let value: serde_json::Value = serde_json::from_str(line).ok()?;
    match value.get("event").and_then(|e| e.as_str()) {
        Some("sample") => {}
        Some("stop") => {
            log::debug!("Collector stop event: {}", line);
            return None;
        }
        _ => return None,
    }

    serde_json::from_value(value).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sample_line() {
        let line = r#"{"event":"sample","timestamp":"2024-05-01T10:00:00Z","cpu_percent":12.5,"memory_rss":1048576,"threads":4,"open_files":3,"socket_count":0,"read_bytes":10,"write_bytes":20}"#;
        let sample = parse_line(line).unwrap();

        assert_eq!(sample.cpu_percent, 12.5);
        assert_eq!(sample.memory_mb(), 1.0);
        assert_eq!(sample.threads, 4);
        assert_eq!(sample.io_total(), 30);
    }

    #[test]
    fn test_parse_epoch_timestamp() {
        let line = r#"{"event":"sample","timestamp":1714557600.5,"cpu_percent":1.0,"memory_rss":0}"#;
        let sample = parse_line(line).unwrap();

        assert_eq!(sample.timestamp.timestamp(), 1714557600);
        assert_eq!(sample.timestamp.timestamp_subsec_millis(), 500);
        assert_eq!(sample.open_files, 0);
    }

    #[test]
    fn test_non_sample_and_malformed_lines_dropped() {
        assert!(parse_line("").is_none());
        assert!(parse_line("not json").is_none());
        assert!(parse_line(r#"{"event":"stop","samples":10}"#).is_none());
        assert!(parse_line(r#"{"event":"start","timestamp":"2024-05-01T10:00:00Z"}"#).is_none());
        // Missing cpu_percent
        assert!(parse_line(r#"{"event":"sample","timestamp":"2024-05-01T10:00:00Z","memory_rss":1}"#).is_none());
    }
}
