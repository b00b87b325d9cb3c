//! Event Emitter - outbound messages to the presentation layer
//!
//! Core chỉ nói chuyện với consumer qua `CoreEvent`. Sink clone được, gửi
//! không bao giờ block, consumer đã đóng thì event bị bỏ qua.

use serde::Serialize;
use tokio::sync::mpsc;

use super::ingestion::ProcessMetricsSample;
use super::threat::{AnalysisSource, AnomalyAnalysis};

/// Event names
pub mod events {
    pub const SESSION_STARTED: &str = "session:started";
    pub const SAMPLE_BATCH: &str = "samples:batch";
    pub const FILE_VIOLATION: &str = "jail:violation";
    pub const ANALYSIS: &str = "anomaly:analysis";
    pub const OUTPUT: &str = "process:output";
    pub const PROCESS_EXITED: &str = "process:exited";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CoreEvent {
    SessionStarted {
        run_id: String,
        pid: u32,
        command: String,
    },
    SampleBatch {
        samples: Vec<ProcessMetricsSample>,
    },
    FileViolation {
        pid: u32,
        path: String,
    },
    Analysis {
        run_id: String,
        analysis: AnomalyAnalysis,
        source: AnalysisSource,
        processing_ms: u64,
    },
    Output {
        stream: OutputStream,
        lines: Vec<String>,
    },
    ProcessExited {
        run_id: String,
        pid: u32,
        exit_code: Option<i32>,
    },
}

impl CoreEvent {
    pub fn name(&self) -> &'static str {
        match self {
            CoreEvent::SessionStarted { .. } => events::SESSION_STARTED,
            CoreEvent::SampleBatch { .. } => events::SAMPLE_BATCH,
            CoreEvent::FileViolation { .. } => events::FILE_VIOLATION,
            CoreEvent::Analysis { .. } => events::ANALYSIS,
            CoreEvent::Output { .. } => events::OUTPUT,
            CoreEvent::ProcessExited { .. } => events::PROCESS_EXITED,
        }
    }
}

// ============================================================================
// SINK
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<CoreEvent>>,
}

impl EventSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<CoreEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// Drops every event
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: CoreEvent) {
        let Some(tx) = self.tx.as_ref() else {
            return;
        };
        let name = event.name();
        if tx.send(event).is_err() {
            log::debug!("Event consumer gone, '{}' dropped", name);
        }
    }

    pub fn emit_violation(&self, pid: u32, path: String) {
        self.emit(CoreEvent::FileViolation { pid, path });
    }

    pub fn emit_batch(&self, samples: Vec<ProcessMetricsSample>) {
        self.emit(CoreEvent::SampleBatch { samples });
    }

    pub fn emit_output(&self, stream: OutputStream, lines: Vec<String>) {
        if !lines.is_empty() {
            self.emit(CoreEvent::Output { stream, lines });
        }
    }
}
