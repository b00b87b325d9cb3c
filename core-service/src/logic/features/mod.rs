//! Features Module - Feature Extraction Engine
//!
//! Tách logic trích xuất features từ raw samples.
//! Mỗi extractor lo một nhóm metric, snapshot gom tất cả lại.

pub mod cpu;
pub mod io;
pub mod memory;
pub mod snapshot;
pub mod threads;
pub mod trend;

#[cfg(test)]
mod tests;

pub use snapshot::{extract_features, FeatureExtractor, FeatureSnapshot};
pub use trend::TrendAccumulator;
