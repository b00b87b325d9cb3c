//! Execution Orchestrator
//!
//! Chạy đúng một sandboxed process tại một thời điểm. Mỗi `start()` thay
//! nguyên cả session (process, file monitor, ingestion worker, pipeline),
//! không sửa từng field. Khi process thoát, supervisor dọn dẹp theo thứ tự
//! và đóng MonitoringRun với exit code.
//!
//! ## Structure
//! - `limits`: ResourceLimits, IsolationOptions
//! - `launch`: ProcessLauncher seam + `unshare`/`prlimit` launcher
//! - `output`: stdout/stderr line pump

pub mod launch;
pub mod limits;
pub mod output;


use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;

pub use launch::{find_in_path, CommandLauncher, LaunchSpec, ProcessLauncher};
pub use limits::{IsolationOptions, ResourceLimits};

use super::ai_bridge::RemoteAnalyzer;
use super::analysis_loop::{self, Pipeline, PipelineConfig, RunContext};
use super::config::{CollectorSettings, Settings};
use super::error::{CoreError, CoreResult};
use super::events::{CoreEvent, EventSink, OutputStream};
use super::file_monitor::{self, FileJail, HandleSource, MonitorHandle, ProcFdSource};
use super::ingestion::{self, IngestionHandle, WorkerConfig};
use super::liveness::LiveGuard;
use super::store::{AnalysisStore, MonitoringRun};
use crate::constants;

const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);
const PIPELINE_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);
const TERMINATE_GRACE: Duration = Duration::from_secs(2);

// ============================================================================
// OPTIONS
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    pub command: String,
    pub args: Vec<String>,
    pub limits: ResourceLimits,
    pub isolation: IsolationOptions,
    /// Where the external collector writes samples; defaults to a per-run
    /// file in the temp dir
    pub sample_log: Option<PathBuf>,
}

impl StartOptions {
    pub fn new(command: &str, args: &[&str]) -> Self {
        Self {
            command: command.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn display_command(&self) -> String {
        std::iter::once(self.command.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionInfo {
    pub run_id: String,
    pub pid: u32,
    pub sample_log: PathBuf,
}

// ============================================================================
// SESSION
// ============================================================================

struct Session {
    info: SessionInfo,
    kill: Option<oneshot::Sender<()>>,
    supervisor: JoinHandle<()>,
    exited: watch::Receiver<Option<Option<i32>>>,
}

/// Everything the supervisor tears down once the child is gone
struct SideChannels {
    monitor: Option<MonitorHandle>,
    worker: Option<IngestionHandle>,
    collector: Option<Child>,
    pipeline: Option<JoinHandle<()>>,
    pumps: Vec<JoinHandle<()>>,
}

pub struct Orchestrator {
    settings: Arc<Settings>,
    store: Arc<AnalysisStore>,
    analyzer: Option<Arc<RemoteAnalyzer>>,
    sink: EventSink,
    launcher: Arc<dyn ProcessLauncher>,
    handles: Arc<dyn HandleSource>,
    worker_config: WorkerConfig,
    session: Mutex<Option<Session>>,
    monitors: Arc<AtomicUsize>,
    workers: Arc<AtomicUsize>,
}

impl Orchestrator {
    pub fn new(
        settings: Settings,
        store: Arc<AnalysisStore>,
        analyzer: Option<Arc<RemoteAnalyzer>>,
        sink: EventSink,
    ) -> Self {
        let worker_config = WorkerConfig {
            flush_interval: Duration::from_millis(settings.pipeline.flush_interval_ms.max(1)),
            ..Default::default()
        };
        Self {
            settings: Arc::new(settings),
            store,
            analyzer,
            sink,
            launcher: Arc::new(CommandLauncher),
            handles: Arc::new(ProcFdSource),
            worker_config,
            session: Mutex::new(None),
            monitors: Arc::new(AtomicUsize::new(0)),
            workers: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_launcher(mut self, launcher: Arc<dyn ProcessLauncher>) -> Self {
        self.launcher = launcher;
        self
    }

    pub fn with_handle_source(mut self, handles: Arc<dyn HandleSource>) -> Self {
        self.handles = handles;
        self
    }

    pub fn with_worker_config(mut self, config: WorkerConfig) -> Self {
        self.worker_config = config;
        self
    }

    /// Live file monitors (0 or 1)
    pub fn active_monitors(&self) -> usize {
        self.monitors.load(Ordering::SeqCst)
    }

    /// Live ingestion workers (0 or 1)
    pub fn active_workers(&self) -> usize {
        self.workers.load(Ordering::SeqCst)
    }

    pub async fn current(&self) -> Option<SessionInfo> {
        self.session.lock().await.as_ref().map(|s| s.info.clone())
    }

    pub async fn is_running(&self) -> bool {
        match self.session.lock().await.as_ref() {
            Some(session) => session.exited.borrow().is_none(),
            None => false,
        }
    }

    // ========================================================================
    // START
    // ========================================================================

    /// Tear down any previous session, then launch a new one. Only
    /// validation and launch failures are returned.
    pub async fn start(&self, options: StartOptions) -> CoreResult<SessionInfo> {
        let mut slot = self.session.lock().await;
        if let Some(previous) = slot.take() {
            log::info!("Replacing session {}", previous.info.run_id);
            Self::teardown(previous).await;
        }

        // 1. Validate
        let jail = self.validate(&options)?;

        // 2. Launch
        let spec = LaunchSpec {
            program: &options.command,
            args: &options.args,
            working_dir: jail.as_ref().map(|j| j.root()),
            limits: &options.limits,
            network_isolation: options.isolation.network_isolation,
        };
        let mut child = self.launcher.launch(&spec)?;
        let pid = child
            .id()
            .ok_or_else(|| CoreError::Spawn("process exited before reporting a pid".to_string()))?;

        // 3. Run record
        let command = options.display_command();
        let run = MonitoringRun::start(pid, &command);
        if let Err(e) = self.store.insert_run(&run) {
            log::error!("Failed to persist run {}: {}", run.run_id, e);
        }
        let sample_log = options.sample_log.clone().unwrap_or_else(|| {
            std::env::temp_dir().join(format!("{}-{}.jsonl", constants::APP_NAME, run.run_id))
        });
        log::info!("Session started: run={} pid={} cmd='{}'", run.run_id, pid, command);
        self.sink.emit(CoreEvent::SessionStarted {
            run_id: run.run_id.clone(),
            pid,
            command: command.clone(),
        });

        // 4. Side-channels
        let collector = launch_collector(&self.settings.collector, pid, &sample_log);

        let mut context =
            RunContext::new(&run.run_id, &command, options.limits.clone()).with_executable(&options.command);
        let monitor = jail.map(|jail| {
            let handle = file_monitor::spawn(
                pid,
                jail,
                self.handles.clone(),
                Duration::from_millis(self.settings.monitor.poll_interval_ms.max(1)),
                self.sink.clone(),
                LiveGuard::new(&self.monitors),
            );
            context.violations = handle.violation_counter();
            handle
        });

        let (batch_tx, batch_rx) = mpsc::unbounded_channel();
        let worker = match ingestion::spawn(
            self.worker_config.clone(),
            batch_tx,
            LiveGuard::new(&self.workers),
        ) {
            Ok(handle) => {
                handle.start(sample_log.clone());
                Some(handle)
            }
            Err(e) => {
                log::error!("Ingestion worker failed to start, run continues unmonitored: {}", e);
                None
            }
        };

        let pipeline = Pipeline::new(
            PipelineConfig::from_settings(&self.settings),
            self.store.clone(),
            self.analyzer.clone(),
            self.sink.clone(),
            context,
        );
        let pipeline = analysis_loop::spawn(pipeline, batch_rx);

        let flush_every = Duration::from_millis(constants::OUTPUT_FLUSH_INTERVAL_MS);
        let mut pumps = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            pumps.push(output::spawn_pump(stdout, OutputStream::Stdout, self.sink.clone(), flush_every));
        }
        if let Some(stderr) = child.stderr.take() {
            pumps.push(output::spawn_pump(stderr, OutputStream::Stderr, self.sink.clone(), flush_every));
        }

        // 5. Supervisor
        let (kill_tx, kill_rx) = oneshot::channel();
        let (exit_tx, exit_rx) = watch::channel(None);
        let side = SideChannels {
            monitor,
            worker,
            collector,
            pipeline: Some(pipeline),
            pumps,
        };
        let supervisor = tokio::spawn(supervise(
            child,
            kill_rx,
            side,
            self.store.clone(),
            self.sink.clone(),
            run.run_id.clone(),
            pid,
            exit_tx,
        ));

        let info = SessionInfo {
            run_id: run.run_id,
            pid,
            sample_log,
        };
        *slot = Some(Session {
            info: info.clone(),
            kill: Some(kill_tx),
            supervisor,
            exited: exit_rx,
        });
        Ok(info)
    }

    fn validate(&self, options: &StartOptions) -> CoreResult<Option<FileJail>> {
        if options.command.trim().is_empty() {
            return Err(CoreError::Configuration("empty command".to_string()));
        }

        if options.isolation.network_isolation && !self.launcher.isolation_available() {
            return Err(CoreError::IsolationUnavailable(
                "network isolation requested but the isolation utility is missing".to_string(),
            ));
        }

        let Some(root) = options.isolation.jail_root.as_ref() else {
            return Ok(None);
        };
        match std::fs::metadata(root) {
            Ok(meta) if meta.is_dir() => Ok(Some(FileJail::new(
                root,
                self.settings.monitor.extra_whitelist.clone(),
            ))),
            Ok(_) => Err(CoreError::Configuration(format!(
                "jail root {} is not a directory",
                root.display()
            ))),
            Err(e) => Err(CoreError::Configuration(format!(
                "jail root {}: {}",
                root.display(),
                e
            ))),
        }
    }

    // ========================================================================
    // STOP / WAIT
    // ========================================================================

    /// Terminate the current session. No-op when idle.
    pub async fn stop(&self) {
        let session = self.session.lock().await.take();
        if let Some(session) = session {
            log::info!("Stopping session {}", session.info.run_id);
            Self::teardown(session).await;
        }
    }

    /// Exit code of the current session once its process is gone.
    /// `None` when idle or the process died by signal.
    pub async fn wait(&self) -> Option<i32> {
        let mut exited = {
            let slot = self.session.lock().await;
            slot.as_ref()?.exited.clone()
        };
        let result = match exited.wait_for(|state| state.is_some()).await {
            Ok(state) => (*state).flatten(),
            Err(_) => None,
        };
        result
    }

    async fn teardown(mut session: Session) {
        if let Some(kill) = session.kill.take() {
            let _ = kill.send(());
        }
        if let Err(e) = session.supervisor.await {
            log::warn!("Session supervisor ended abnormally: {}", e);
        }
    }
}

fn launch_collector(settings: &CollectorSettings, pid: u32, output: &std::path::Path) -> Option<Child> {
    if !settings.is_enabled() {
        return None;
    }

    let args = settings.expand_args(pid, output);
    match tokio::process::Command::new(&settings.program)
        .args(&args)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => {
            log::info!("Metrics collector '{}' started for pid {}", settings.program, pid);
            Some(child)
        }
        Err(e) => {
            log::warn!("Metrics collector '{}' failed to start: {}", settings.program, e);
            None
        }
    }
}

// ============================================================================
// SUPERVISOR
// ============================================================================

#[allow(clippy::too_many_arguments)]
async fn supervise(
    mut child: Child,
    kill: oneshot::Receiver<()>,
    mut side: SideChannels,
    store: Arc<AnalysisStore>,
    sink: EventSink,
    run_id: String,
    pid: u32,
    exited: watch::Sender<Option<Option<i32>>>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = kill => {
            log::info!("Terminating process group {}", pid);
            terminate_group(&mut child, pid).await
        }
    };
    // Descendants that outlived the group leader
    signal_group(pid, Signal::SIGKILL);
    let exit_code = match status {
        Ok(status) => status.code(),
        Err(e) => {
            log::warn!("Waiting on pid {} failed: {}", pid, e);
            None
        }
    };

    // 1. Output
    for pump in side.pumps.drain(..) {
        let abort = pump.abort_handle();
        if timeout(OUTPUT_DRAIN_TIMEOUT, pump).await.is_err() {
            abort.abort();
        }
    }

    // 2. File monitor
    if let Some(monitor) = side.monitor.take() {
        monitor.stop().await;
    }

    // 3. Collector
    if let Some(mut collector) = side.collector.take() {
        let _ = collector.start_kill();
        let _ = collector.wait().await;
    }

    // 4. Ingestion worker (final flush within its grace period)
    if let Some(mut worker) = side.worker.take() {
        worker.stop().await;
    }

    // 5. Pipeline drains the last batch
    if let Some(pipeline) = side.pipeline.take() {
        let abort = pipeline.abort_handle();
        if timeout(PIPELINE_DRAIN_TIMEOUT, pipeline).await.is_err() {
            log::warn!("Pipeline for run {} did not drain, aborting", run_id);
            abort.abort();
        }
    }

    // 6. Close the run
    if let Err(e) = store.close_run(&run_id, exit_code) {
        log::error!("Failed to close run {}: {}", run_id, e);
    }
    log::info!("Session ended: run={} pid={} exit={:?}", run_id, pid, exit_code);
    sink.emit(CoreEvent::ProcessExited {
        run_id,
        pid,
        exit_code,
    });
    let _ = exited.send(Some(exit_code));
}

/// SIGTERM to the whole group, SIGKILL once the grace period runs out
async fn terminate_group(child: &mut Child, pid: u32) -> std::io::Result<std::process::ExitStatus> {
    if !signal_group(pid, Signal::SIGTERM) {
        if let Err(e) = child.start_kill() {
            log::debug!("Kill pid {}: {}", pid, e);
        }
    }
    match timeout(TERMINATE_GRACE, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            log::warn!("Process group {} ignored SIGTERM, sending SIGKILL", pid);
            signal_group(pid, Signal::SIGKILL);
            let _ = child.start_kill();
            child.wait().await
        }
    }
}

/// False when the group is already gone or cannot be signalled
fn signal_group(pgid: u32, signal: Signal) -> bool {
    let Ok(raw) = i32::try_from(pgid) else {
        return false;
    };
    match killpg(Pid::from_raw(raw), signal) {
        Ok(()) => true,
        Err(Errno::ESRCH) => false,
        Err(e) => {
            log::debug!("{} to process group {}: {}", signal, pgid, e);
            false
        }
    }
}
