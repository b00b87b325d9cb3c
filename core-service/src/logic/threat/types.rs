//! Threat Types
//!
//! Core types cho anomaly classification.
//! KHÔNG chứa logic phân loại - chỉ data structures.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ============================================================================
// ANOMALY TYPE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyType {
    Normal,
    CpuSpike,
    MemoryLeak,
    ForkBomb,
    ResourceExhaustion,
    IoStorm,
}

impl AnomalyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyType::Normal => "normal",
            AnomalyType::CpuSpike => "cpu_spike",
            AnomalyType::MemoryLeak => "memory_leak",
            AnomalyType::ForkBomb => "fork_bomb",
            AnomalyType::ResourceExhaustion => "resource_exhaustion",
            AnomalyType::IoStorm => "io_storm",
        }
    }

    pub fn is_anomalous(&self) -> bool {
        !matches!(self, AnomalyType::Normal)
    }
}

impl fmt::Display for AnomalyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AnomalyType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(AnomalyType::Normal),
            "cpu_spike" => Ok(AnomalyType::CpuSpike),
            "memory_leak" => Ok(AnomalyType::MemoryLeak),
            "fork_bomb" => Ok(AnomalyType::ForkBomb),
            "resource_exhaustion" => Ok(AnomalyType::ResourceExhaustion),
            "io_storm" => Ok(AnomalyType::IoStorm),
            other => Err(format!("unknown anomaly type: {}", other)),
        }
    }
}

// ============================================================================
// ANALYSIS RESULT
// ============================================================================

/// Verdict on one sample window. Same shape whether produced locally or
/// returned by the remote service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AnomalyAnalysis {
    pub is_anomalous: bool,
    /// 0.0 - 1.0
    pub anomaly_score: f64,
    pub anomaly_type: AnomalyType,
    pub explanation: String,
    /// 0.0 - 1.0
    pub confidence: f64,
    pub recommendations: Vec<String>,
}

impl AnomalyAnalysis {
    pub fn normal(explanation: impl Into<String>) -> Self {
        Self {
            is_anomalous: false,
            anomaly_score: 0.0,
            anomaly_type: AnomalyType::Normal,
            explanation: explanation.into(),
            confidence: 0.5,
            recommendations: Vec::new(),
        }
    }

    /// Range checks a deserialized analysis
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.anomaly_score) {
            return Err(format!("anomalyScore out of range: {}", self.anomaly_score));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(format!("confidence out of range: {}", self.confidence));
        }
        if self.is_anomalous != self.anomaly_type.is_anomalous() {
            return Err(format!(
                "isAnomalous={} contradicts anomalyType={}",
                self.is_anomalous, self.anomaly_type
            ));
        }
        Ok(())
    }
}

// ============================================================================
// SOURCE-TAGGED VERDICT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisSource {
    Remote,
    Local,
}

impl AnalysisSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisSource::Remote => "remote",
            AnalysisSource::Local => "local",
        }
    }
}

impl FromStr for AnalysisSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "remote" => Ok(AnalysisSource::Remote),
            "local" => Ok(AnalysisSource::Local),
            other => Err(format!("unknown analysis source: {}", other)),
        }
    }
}

/// Exactly one path produces the final result of a pipeline invocation
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Remote(AnomalyAnalysis),
    Local {
        analysis: AnomalyAnalysis,
        /// Why the remote path was not used
        fallback_reason: String,
    },
}

impl Verdict {
    pub fn source(&self) -> AnalysisSource {
        match self {
            Verdict::Remote(_) => AnalysisSource::Remote,
            Verdict::Local { .. } => AnalysisSource::Local,
        }
    }

    pub fn analysis(&self) -> &AnomalyAnalysis {
        match self {
            Verdict::Remote(analysis) => analysis,
            Verdict::Local { analysis, .. } => analysis,
        }
    }

    pub fn into_analysis(self) -> AnomalyAnalysis {
        match self {
            Verdict::Remote(analysis) => analysis,
            Verdict::Local { analysis, .. } => analysis,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anomaly_type_wire_names() {
        let json = serde_json::to_string(&AnomalyType::ResourceExhaustion).unwrap();
        assert_eq!(json, "\"resource_exhaustion\"");
        assert_eq!("io_storm".parse::<AnomalyType>().unwrap(), AnomalyType::IoStorm);
        assert!("melted".parse::<AnomalyType>().is_err());
    }

    #[test]
    fn test_analysis_camel_case_and_strict() {
        let json = r#"{"isAnomalous":true,"anomalyScore":0.9,"anomalyType":"cpu_spike",
            "explanation":"hot","confidence":0.8,"recommendations":["a","b"]}"#;
        let analysis: AnomalyAnalysis = serde_json::from_str(json).unwrap();
        assert_eq!(analysis.anomaly_type, AnomalyType::CpuSpike);
        assert_eq!(analysis.recommendations, vec!["a", "b"]);
        assert!(analysis.validate().is_ok());

        let extra = r#"{"isAnomalous":true,"anomalyScore":0.9,"anomalyType":"cpu_spike",
            "explanation":"hot","confidence":0.8,"recommendations":[],"mood":"bad"}"#;
        assert!(serde_json::from_str::<AnomalyAnalysis>(extra).is_err());
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let mut analysis = AnomalyAnalysis::normal("ok");
        analysis.anomaly_score = 1.5;
        assert!(analysis.validate().is_err());

        let mut analysis = AnomalyAnalysis::normal("ok");
        analysis.is_anomalous = true;
        assert!(analysis.validate().is_err());
    }

    #[test]
    fn test_verdict_source() {
        let local = Verdict::Local {
            analysis: AnomalyAnalysis::normal("fine"),
            fallback_reason: "no credentials".to_string(),
        };
        assert_eq!(local.source(), AnalysisSource::Local);
        assert_eq!(local.analysis().anomaly_type, AnomalyType::Normal);
    }
}
