//! Threat Module
//!
//! Phân loại cửa sổ sample thành normal / anomaly.
//!
//! ## Structure
//! - `types`: AnomalyType, AnomalyAnalysis, Verdict
//! - `rules`: thresholds, confidence và recommendations
//! - `classifier`: local heuristic classifier

pub mod classifier;
pub mod rules;
pub mod types;

pub use classifier::{classify, classify_with_thresholds};
pub use rules::HeuristicThresholds;
pub use types::{AnalysisSource, AnomalyAnalysis, AnomalyType, Verdict};
