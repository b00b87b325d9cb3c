//! Sandbox Monitor Core
//!
//! Execution orchestration, sample ingestion and anomaly classification for a
//! single sandboxed process. Presentation is left to whoever consumes the
//! event channel (see `logic::events`).

pub mod constants;
pub mod logic;
