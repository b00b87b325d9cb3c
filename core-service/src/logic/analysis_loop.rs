//! Analysis Loop - Pipeline Orchestrator
//!
//! Nhận batch từ ingestion worker, gom vào cửa sổ trượt, và khi đủ số sample
//! mới thì phân loại: thử remote trước, lỗi thì fallback local. Mỗi lần chạy
//! chỉ có đúng một nguồn tạo ra kết quả. Kết quả được lưu rồi emit đúng một lần.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::ai_bridge::{AnalysisRequest, ExecutionContext, RemoteAnalyzer};
use super::config::{AllowListSettings, Settings};
use super::events::{CoreEvent, EventSink};
use super::execution::ResourceLimits;
use super::features::{extract_features, FeatureSnapshot};
use super::ingestion::{ProcessMetricsSample, WorkerMessage};
use super::store::{AnalysisRecord, AnalysisStore};
use super::threat::{classify_with_thresholds, HeuristicThresholds, Verdict};
use crate::constants::REMOTE_SAMPLE_COUNT;

// ============================================================================
// CONFIG & CONTEXT
// ============================================================================

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub min_batch_size: usize,
    pub window_capacity: usize,
    pub thresholds: HeuristicThresholds,
    pub allowlist: AllowListSettings,
}

impl PipelineConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            min_batch_size: settings.pipeline.min_batch_size.max(1),
            window_capacity: settings.pipeline.window_capacity.max(1),
            thresholds: settings.thresholds.clone(),
            allowlist: settings.allowlist.clone(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

/// What the pipeline knows about the run it is analyzing
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: String,
    /// Full command line, arguments included
    pub command: String,
    /// Program as given to the launcher; the allow-list matches on this
    pub executable: String,
    pub limits: ResourceLimits,
    pub started: Instant,
    pub violations: Arc<AtomicU64>,
}

impl RunContext {
    pub fn new(run_id: &str, command: &str, limits: ResourceLimits) -> Self {
        Self {
            run_id: run_id.to_string(),
            command: command.to_string(),
            executable: command.to_string(),
            limits,
            started: Instant::now(),
            violations: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_executable(mut self, executable: &str) -> Self {
        self.executable = executable.to_string();
        self
    }

    pub fn execution_context(&self) -> ExecutionContext {
        ExecutionContext {
            run_id: self.run_id.clone(),
            command: self.command.clone(),
            limits: self.limits.clone(),
            elapsed_secs: self.started.elapsed().as_secs_f64(),
            violation_count: self.violations.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// PIPELINE
// ============================================================================

pub struct Pipeline {
    config: PipelineConfig,
    store: Arc<AnalysisStore>,
    analyzer: Option<Arc<RemoteAnalyzer>>,
    sink: EventSink,
    context: RunContext,
    window: VecDeque<ProcessMetricsSample>,
    /// Samples received since the last classification
    pending: usize,
    skip: bool,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        store: Arc<AnalysisStore>,
        analyzer: Option<Arc<RemoteAnalyzer>>,
        sink: EventSink,
        context: RunContext,
    ) -> Self {
        let skip = config.allowlist.skips(&context.executable);
        if skip {
            log::info!("'{}' is allow-listed, analysis disabled for run {}", context.command, context.run_id);
        }

        Self {
            window: VecDeque::with_capacity(config.window_capacity),
            config,
            store,
            analyzer,
            sink,
            context,
            pending: 0,
            skip,
        }
    }

    /// Add one batch. Classifies once enough new samples have accumulated.
    pub async fn ingest(&mut self, batch: Vec<ProcessMetricsSample>) -> Option<Verdict> {
        if batch.is_empty() {
            return None;
        }

        self.pending += batch.len();
        self.window.extend(batch);
        while self.window.len() > self.config.window_capacity {
            self.window.pop_front();
        }

        if self.skip {
            return None;
        }
        if self.pending < self.config.min_batch_size {
            log::debug!(
                "Batch gate: {}/{} samples, not analyzing yet",
                self.pending,
                self.config.min_batch_size
            );
            return None;
        }

        self.pending = 0;
        Some(self.analyze_window().await)
    }

    async fn analyze_window(&self) -> Verdict {
        let started = Instant::now();
        let samples: Vec<ProcessMetricsSample> = self.window.iter().cloned().collect();

        // 1. Features (diagnostics + local input)
        let features = extract_features(&samples);

        // 2. Remote first, local on any failure
        let verdict = self.classify(&samples, &features).await;
        let processing_ms = started.elapsed().as_millis() as u64;

        let analysis = verdict.analysis();
        log::info!(
            "Run {}: {} score={:.2} source={} ({} ms)",
            self.context.run_id,
            analysis.anomaly_type,
            analysis.anomaly_score,
            verdict.source().as_str(),
            processing_ms
        );

        // 3. Persist (failure is logged, the result is still emitted)
        let tail = samples.len().saturating_sub(REMOTE_SAMPLE_COUNT);
        let record = AnalysisRecord {
            id: 0,
            run_id: self.context.run_id.clone(),
            timestamp: Utc::now(),
            source: verdict.source(),
            processing_ms,
            analysis: analysis.clone(),
            features,
            samples: samples[tail..].to_vec(),
        };
        if let Err(e) = self.store.insert_analysis(&record) {
            log::error!("Failed to persist analysis for run {}: {}", self.context.run_id, e);
        }
        self.persist_credential_usage();

        // 4. Emit once
        self.sink.emit(CoreEvent::Analysis {
            run_id: self.context.run_id.clone(),
            analysis: record.analysis,
            source: record.source,
            processing_ms,
        });

        verdict
    }

    async fn classify(&self, samples: &[ProcessMetricsSample], features: &FeatureSnapshot) -> Verdict {
        let local = |reason: String| Verdict::Local {
            analysis: classify_with_thresholds(features, &self.config.thresholds),
            fallback_reason: reason,
        };

        let Some(analyzer) = self.analyzer.as_ref() else {
            return local("remote analyzer not configured".to_string());
        };

        let request = AnalysisRequest::new(
            analyzer.model(),
            samples,
            features.clone(),
            Some(self.context.execution_context()),
        );
        match analyzer.analyze(&request).await {
            Ok(analysis) => Verdict::Remote(analysis),
            Err(e) => {
                log::warn!("Remote analysis failed ({}), using local classifier", e);
                local(e.to_string())
            }
        }
    }

    fn persist_credential_usage(&self) {
        let Some(analyzer) = self.analyzer.as_ref() else {
            return;
        };
        for usage in analyzer.credential_usage() {
            if let Err(e) = self.store.upsert_credential_usage(&usage) {
                log::warn!("Failed to persist usage for credential {}: {}", usage.credential_id, e);
            }
        }
    }
}

/// Drives a pipeline from the ingestion worker's messages until it stops
pub fn spawn(
    mut pipeline: Pipeline,
    mut messages: mpsc::UnboundedReceiver<WorkerMessage>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(message) = messages.recv().await {
            match message {
                WorkerMessage::Started { path } => {
                    log::debug!("Pipeline for run {} reading {:?}", pipeline.context.run_id, path);
                }
                WorkerMessage::Batch(samples) => {
                    pipeline.sink.emit_batch(samples.clone());
                    pipeline.ingest(samples).await;
                }
                WorkerMessage::Stopped => break,
            }
        }
        log::debug!("Pipeline for run {} finished", pipeline.context.run_id);
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use super::*;
    use crate::logic::ai_bridge::transport::{CompletionTransport, TransportFuture};
    use crate::logic::ai_bridge::{RemoteError, RetryPolicy};
    use crate::logic::store::MonitoringRun;
    use crate::logic::threat::{AnalysisSource, AnomalyType};

    /// Answers every call with the same outcome
    struct Fixed {
        outcome: Result<String, RemoteError>,
        calls: AtomicUsize,
    }

    impl CompletionTransport for Fixed {
        fn provider(&self) -> &str {
            "fixed"
        }

        fn complete<'a>(&'a self, _credential: &'a str, _request: &'a AnalysisRequest) -> TransportFuture<'a> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let outcome = self.outcome.clone();
            Box::pin(async move { outcome })
        }
    }

    fn remote(outcome: Result<String, RemoteError>, keys: usize) -> (Arc<RemoteAnalyzer>, Arc<Fixed>) {
        let transport = Arc::new(Fixed { outcome, calls: AtomicUsize::new(0) });
        let analyzer = RemoteAnalyzer::new(
            transport.clone(),
            (0..keys).map(|i| format!("key-{}", i)).collect(),
            Duration::from_secs(60),
            RetryPolicy {
                max_attempts: 2,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
            },
            "m",
        );
        (Arc::new(analyzer), transport)
    }

    fn hot(n: usize) -> Vec<ProcessMetricsSample> {
        (0..n)
            .map(|_| ProcessMetricsSample {
                timestamp: Utc::now(),
                cpu_percent: 95.0,
                memory_rss: 32 * 1024 * 1024,
                threads: 2,
                ..ProcessMetricsSample::zero()
            })
            .collect()
    }

    struct Harness {
        pipeline: Pipeline,
        store: Arc<AnalysisStore>,
        events: mpsc::UnboundedReceiver<CoreEvent>,
        run_id: String,
    }

    fn harness(analyzer: Option<Arc<RemoteAnalyzer>>, config: PipelineConfig, command: &str) -> Harness {
        let store = Arc::new(AnalysisStore::open_in_memory().unwrap());
        let run = MonitoringRun::start(100, command);
        store.insert_run(&run).unwrap();
        let (sink, events) = EventSink::channel();
        let context = RunContext::new(&run.run_id, command, ResourceLimits::default());
        Harness {
            pipeline: Pipeline::new(config, store.clone(), analyzer, sink, context),
            store,
            events,
            run_id: run.run_id,
        }
    }

    fn analysis_events(rx: &mut mpsc::UnboundedReceiver<CoreEvent>) -> Vec<(AnomalyType, AnalysisSource)> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let CoreEvent::Analysis { analysis, source, .. } = event {
                out.push((analysis.anomaly_type, source));
            }
        }
        out
    }

    const REMOTE_OK: &str = r#"{"isAnomalous":true,"anomalyScore":0.88,"anomalyType":"io_storm",
        "explanation":"disk thrash","confidence":0.9,"recommendations":[]}"#;

    #[tokio::test]
    async fn test_small_batch_is_not_classified() {
        let mut h = harness(None, PipelineConfig::default(), "worker");

        assert!(h.pipeline.ingest(hot(3)).await.is_none());
        assert!(h.store.analyses_for_run(&h.run_id).unwrap().is_empty());
        assert!(analysis_events(&mut h.events).is_empty());

        // accumulated samples reach the gate
        let verdict = h.pipeline.ingest(hot(2)).await.unwrap();
        assert_eq!(verdict.analysis().anomaly_type, AnomalyType::CpuSpike);
        assert_eq!(h.store.analyses_for_run(&h.run_id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_no_credentials_goes_local() {
        let mut h = harness(None, PipelineConfig::default(), "worker");
        let verdict = h.pipeline.ingest(hot(5)).await.unwrap();

        assert!(matches!(verdict, Verdict::Local { .. }));
        assert_eq!(
            analysis_events(&mut h.events),
            vec![(AnomalyType::CpuSpike, AnalysisSource::Local)]
        );
    }

    #[tokio::test]
    async fn test_rate_limited_everywhere_falls_back_to_local() {
        let (analyzer, transport) = remote(Err(RemoteError::RateLimited { retry_after: None }), 3);
        let mut h = harness(Some(analyzer), PipelineConfig::default(), "worker");

        let verdict = h.pipeline.ingest(hot(5)).await.unwrap();
        match &verdict {
            Verdict::Local { analysis, fallback_reason } => {
                assert_eq!(analysis.anomaly_type, AnomalyType::CpuSpike);
                assert!(fallback_reason.contains("credentials"));
            }
            other => panic!("expected local verdict, got {:?}", other),
        }
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);

        let records = h.store.analyses_for_run(&h.run_id).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].source, AnalysisSource::Local);
        assert!(records[0].samples.len() <= REMOTE_SAMPLE_COUNT);

        let usage = h.store.all_credential_usage().unwrap();
        assert_eq!(usage.len(), 3);
        assert!(usage.iter().all(|u| u.rate_limited == 1 && u.cooldown_until.is_some()));
    }

    #[tokio::test]
    async fn test_remote_success_is_tagged_remote() {
        let (analyzer, _) = remote(Ok(REMOTE_OK.to_string()), 1);
        let mut h = harness(Some(analyzer), PipelineConfig::default(), "worker");

        let verdict = h.pipeline.ingest(hot(6)).await.unwrap();
        assert_eq!(verdict.source(), AnalysisSource::Remote);
        assert_eq!(verdict.analysis().anomaly_type, AnomalyType::IoStorm);
        assert_eq!(
            analysis_events(&mut h.events),
            vec![(AnomalyType::IoStorm, AnalysisSource::Remote)]
        );
        assert_eq!(h.store.analyses_for_run(&h.run_id).unwrap()[0].source, AnalysisSource::Remote);
    }

    #[tokio::test]
    async fn test_malformed_remote_falls_back() {
        let (analyzer, transport) = remote(Ok("{\"ok\":true}".to_string()), 2);
        let mut h = harness(Some(analyzer), PipelineConfig::default(), "worker");

        let verdict = h.pipeline.ingest(hot(5)).await.unwrap();
        assert_eq!(verdict.source(), AnalysisSource::Local);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_persistence_failure_still_emits() {
        let store = Arc::new(AnalysisStore::open_in_memory().unwrap());
        let (sink, mut events) = EventSink::channel();
        // run never inserted, so the analysis insert violates the foreign key
        let context = RunContext::new("unknown-run", "worker", ResourceLimits::default());
        let mut pipeline = Pipeline::new(PipelineConfig::default(), store.clone(), None, sink, context);

        assert!(pipeline.ingest(hot(5)).await.is_some());
        assert_eq!(analysis_events(&mut events).len(), 1);
        assert_eq!(store.stats().unwrap().total, 0);
    }

    #[tokio::test]
    async fn test_allow_listed_command_is_never_analyzed() {
        let mut config = PipelineConfig::default();
        config.allowlist = AllowListSettings {
            enabled: true,
            executables: vec!["make".into()],
        };
        let mut h = harness(None, config, "/usr/bin/make");

        assert!(h.pipeline.ingest(hot(20)).await.is_none());
        assert!(analysis_events(&mut h.events).is_empty());
    }

    #[tokio::test]
    async fn test_allow_list_ignores_arguments() {
        let mut config = PipelineConfig::default();
        config.allowlist = AllowListSettings {
            enabled: true,
            executables: vec!["make".into()],
        };
        let store = Arc::new(AnalysisStore::open_in_memory().unwrap());
        let (sink, mut events) = EventSink::channel();
        let context = RunContext::new("run-args", "make all", ResourceLimits::default()).with_executable("make");
        let mut pipeline = Pipeline::new(config, store, None, sink, context);

        assert!(pipeline.ingest(hot(20)).await.is_none());
        assert!(analysis_events(&mut events).is_empty());
    }

    #[tokio::test]
    async fn test_window_is_bounded() {
        let config = PipelineConfig {
            window_capacity: 8,
            ..Default::default()
        };
        let mut h = harness(None, config, "worker");
        for _ in 0..5 {
            h.pipeline.ingest(hot(5)).await;
        }
        assert_eq!(h.pipeline.window.len(), 8);
    }

    #[tokio::test]
    async fn test_spawned_loop_forwards_batches() {
        let h = harness(None, PipelineConfig::default(), "worker");
        let mut events = h.events;
        let (tx, rx) = mpsc::unbounded_channel();
        let task = spawn(h.pipeline, rx);

        tx.send(WorkerMessage::Started { path: "/tmp/x".into() }).unwrap();
        tx.send(WorkerMessage::Batch(hot(2))).unwrap();
        tx.send(WorkerMessage::Batch(hot(3))).unwrap();
        tx.send(WorkerMessage::Stopped).unwrap();
        task.await.unwrap();

        let mut batches = 0;
        let mut analyses = 0;
        while let Ok(event) = events.try_recv() {
            match event {
                CoreEvent::SampleBatch { .. } => batches += 1,
                CoreEvent::Analysis { .. } => analyses += 1,
                _ => {}
            }
        }
        assert_eq!((batches, analyses), (2, 1));
        assert_eq!(h.store.stats().unwrap().total, 1);
    }
}
