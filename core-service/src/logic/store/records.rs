//! Persisted record types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::logic::features::FeatureSnapshot;
use crate::logic::ingestion::ProcessMetricsSample;
use crate::logic::threat::{AnalysisSource, AnomalyAnalysis};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringRun {
    pub run_id: String,
    pub pid: u32,
    pub command: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
}

impl MonitoringRun {
    /// Fresh run with a unique id, started now
    pub fn start(pid: u32, command: &str) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            pid,
            command: command.to_string(),
            start_time: Utc::now(),
            end_time: None,
            exit_code: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.end_time.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    /// Assigned by the store; 0 before insert
    pub id: i64,
    pub run_id: String,
    pub timestamp: DateTime<Utc>,
    pub source: AnalysisSource,
    pub processing_ms: u64,
    pub analysis: AnomalyAnalysis,
    pub features: FeatureSnapshot,
    /// Samples that triggered this analysis (most recent part of the window)
    pub samples: Vec<ProcessMetricsSample>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisStats {
    pub total: u64,
    pub anomalous: u64,
    /// anomalous / total, 0 when empty
    pub anomaly_rate: f64,
    pub avg_score: f64,
    pub avg_processing_ms: f64,
}
