//! Logic Module - Business Logic & Engines
//!
//! Chứa các engines xử lý: Execution, File Monitor, Ingestion, Features,
//! Threat (local classifier), AI Bridge (remote classifier), Store.
//!
//! ## Data flow
//! - `execution/` spawn process → external collector ghi sample log
//! - `ingestion/` tail log, gom batch theo nhịp cố định
//! - `analysis_loop` → `features/` → `ai_bridge/` hoặc `threat/` → `store/`
//! - `file_monitor` chạy độc lập, cùng pid

// Shared
pub mod config;
pub mod error;
pub mod events;
pub mod liveness;

// Engines
pub mod ai_bridge;
pub mod analysis_loop;
pub mod execution;
pub mod features;
pub mod file_monitor;
pub mod ingestion;
pub mod store;
pub mod threat;
