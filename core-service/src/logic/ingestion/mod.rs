//! Ingestion Module - Sample Log Tailing & Batching
//!
//! ## Structure
//! - `sample`: sample type + line parser
//! - `tail`: incremental reader over the collector's log
//! - `worker`: isolated worker thread, batches at a fixed cadence

pub mod sample;
pub mod tail;
pub mod worker;

#[cfg(test)]
mod tests;

pub use sample::{parse_line, ProcessMetricsSample};
pub use tail::SampleTail;
pub use worker::{spawn, IngestionHandle, WorkerCommand, WorkerConfig, WorkerMessage};
