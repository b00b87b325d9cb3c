//! Analysis request / response shaping
//!
//! The remote service gets the most recent samples, the feature snapshot and
//! the execution context, and must answer with a bare `AnomalyAnalysis`.

use serde::{Deserialize, Serialize};

use super::error::RemoteError;
use crate::constants::REMOTE_SAMPLE_COUNT;
use crate::logic::execution::ResourceLimits;
use crate::logic::features::FeatureSnapshot;
use crate::logic::ingestion::ProcessMetricsSample;
use crate::logic::threat::AnomalyAnalysis;

pub const INSTRUCTIONS: &str = "You classify the resource behaviour of a sandboxed process. \
Answer with one JSON object and nothing else, with exactly these fields: \
isAnomalous (boolean), anomalyScore (number 0..1), \
anomalyType (one of normal, cpu_spike, memory_leak, fork_bomb, resource_exhaustion, io_storm), \
explanation (string), confidence (number 0..1), recommendations (array of strings).";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContext {
    pub run_id: String,
    pub command: String,
    pub limits: ResourceLimits,
    pub elapsed_secs: f64,
    /// File-jail violations observed so far in this run
    pub violation_count: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRequest {
    pub model: String,
    pub samples: Vec<ProcessMetricsSample>,
    pub features: FeatureSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<ExecutionContext>,
}

impl AnalysisRequest {
    /// Keeps only the most recent samples
    pub fn new(
        model: &str,
        samples: &[ProcessMetricsSample],
        features: FeatureSnapshot,
        context: Option<ExecutionContext>,
    ) -> Self {
        let start = samples.len().saturating_sub(REMOTE_SAMPLE_COUNT);
        Self {
            model: model.to_string(),
            samples: samples[start..].to_vec(),
            features,
            context,
        }
    }

    /// User message body: everything except the model name
    pub fn prompt(&self) -> Result<String, RemoteError> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Prompt<'a> {
            recent_samples: &'a [ProcessMetricsSample],
            features: &'a FeatureSnapshot,
            #[serde(skip_serializing_if = "Option::is_none")]
            context: Option<&'a ExecutionContext>,
        }

        serde_json::to_string(&Prompt {
            recent_samples: &self.samples,
            features: &self.features,
            context: self.context.as_ref(),
        })
        .map_err(|e| RemoteError::Malformed(format!("request encoding: {}", e)))
    }
}

/// Strict parse of the service's answer. Tolerates only surrounding
/// whitespace and a single markdown code fence.
pub fn parse_response(text: &str) -> Result<AnomalyAnalysis, RemoteError> {
    let body = strip_fence(text.trim());
    let analysis: AnomalyAnalysis =
        serde_json::from_str(body).map_err(|e| RemoteError::Malformed(e.to_string()))?;
    analysis.validate().map_err(RemoteError::Malformed)?;
    Ok(analysis)
}

fn strip_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
