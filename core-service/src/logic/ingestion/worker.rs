//! Sample Ingestion Worker
//!
//! Chạy trên OS thread riêng với tokio runtime riêng, để việc poll file,
//! parse và gom batch không bao giờ chặn phía consumer.
//! Giao tiếp duy nhất qua channel: `WorkerCommand` vào, `WorkerMessage` ra.

use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use notify::{Config as NotifyConfig, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, sleep, timeout, Instant, MissedTickBehavior};

use super::sample::ProcessMetricsSample;
use super::tail::SampleTail;
use crate::constants;
use crate::logic::liveness::LiveGuard;

// ============================================================================
// MESSAGES
// ============================================================================

#[derive(Debug)]
pub enum WorkerCommand {
    Start { path: PathBuf },
    Stop,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WorkerMessage {
    Started { path: PathBuf },
    Batch(Vec<ProcessMetricsSample>),
    Stopped,
}

// ============================================================================
// CONFIG
// ============================================================================

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Outbound batch cadence
    pub flush_interval: Duration,
    /// Total wait for the sample log to appear
    pub wait_for_file: Duration,
    /// Grace period for the final flush on stop
    pub stop_grace: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_millis(constants::DEFAULT_FLUSH_INTERVAL_MS),
            wait_for_file: Duration::from_millis(constants::SAMPLE_LOG_WAIT_MS),
            stop_grace: Duration::from_millis(constants::WORKER_STOP_GRACE_MS),
        }
    }
}

// ============================================================================
// HANDLE
// ============================================================================

pub struct IngestionHandle {
    commands: mpsc::UnboundedSender<WorkerCommand>,
    kill: Option<oneshot::Sender<()>>,
    done: Option<oneshot::Receiver<()>>,
    stop_grace: Duration,
}

impl IngestionHandle {
    pub fn start(&self, path: PathBuf) {
        if self.commands.send(WorkerCommand::Start { path }).is_err() {
            log::warn!("Ingestion worker already gone, start ignored");
        }
    }

    /// Ask for a final flush, then terminate forcibly if the worker does not
    /// confirm within the grace period. Safe to call more than once.
    pub async fn stop(&mut self) {
        let Some(mut done) = self.done.take() else {
            return;
        };

        let _ = self.commands.send(WorkerCommand::Stop);
        if timeout(self.stop_grace, &mut done).await.is_ok() {
            return;
        }

        log::warn!("Ingestion worker unresponsive after {:?}, terminating", self.stop_grace);
        if let Some(kill) = self.kill.take() {
            let _ = kill.send(());
        }
        let _ = timeout(Duration::from_millis(200), done).await;
    }
}

/// Spawn the worker thread. It idles until `IngestionHandle::start`.
pub fn spawn(
    config: WorkerConfig,
    out: mpsc::UnboundedSender<WorkerMessage>,
    live: LiveGuard,
) -> std::io::Result<IngestionHandle> {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (kill_tx, kill_rx) = oneshot::channel::<()>();
    let (done_tx, done_rx) = oneshot::channel::<()>();
    let stop_grace = config.stop_grace;

    thread::Builder::new()
        .name("sample-ingest".to_string())
        .spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                Ok(rt) => rt,
                Err(e) => {
                    log::error!("Failed to create ingestion runtime: {}", e);
                    drop(live);
                    let _ = done_tx.send(());
                    return;
                }
            };

            rt.block_on(async move {
                tokio::select! {
                    _ = run(config, cmd_rx, out) => {}
                    Ok(()) = kill_rx => log::warn!("Ingestion worker terminated"),
                }
            });

            drop(live);
            let _ = done_tx.send(());
        })?;

    Ok(IngestionHandle {
        commands: cmd_tx,
        kill: Some(kill_tx),
        done: Some(done_rx),
        stop_grace,
    })
}

// ============================================================================
// WORKER LOOP
// ============================================================================

async fn run(
    config: WorkerConfig,
    mut commands: mpsc::UnboundedReceiver<WorkerCommand>,
    out: mpsc::UnboundedSender<WorkerMessage>,
) {
    let path = loop {
        match commands.recv().await {
            Some(WorkerCommand::Start { path }) => break path,
            Some(WorkerCommand::Stop) | None => {
                let _ = out.send(WorkerMessage::Stopped);
                return;
            }
        }
    };

    log::info!("Ingestion worker started: {:?}", path);
    let _ = out.send(WorkerMessage::Started { path: path.clone() });

    if !wait_for_file(&path, config.wait_for_file, &mut commands).await {
        // Stop arrived while waiting, nothing was read yet
        let _ = out.send(WorkerMessage::Stopped);
        return;
    }

    let (change_tx, mut change_rx) = mpsc::unbounded_channel::<()>();
    let _watcher = watch_file(&path, change_tx);

    let mut tail = SampleTail::new(path);
    let mut buffer: Vec<ProcessMetricsSample> = Vec::new();
    let mut ticker = interval(config.flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            Some(()) = change_rx.recv() => {
                read_into(&mut tail, &mut buffer);
            }
            _ = ticker.tick() => {
                // Re-check on every tick in case a notification was missed
                read_into(&mut tail, &mut buffer);
                flush(&mut buffer, &out);
            }
            cmd = commands.recv() => match cmd {
                Some(WorkerCommand::Start { path }) => {
                    log::warn!("Ingestion worker already running, ignoring start for {:?}", path);
                }
                Some(WorkerCommand::Stop) | None => break,
            },
        }
    }

    read_into(&mut tail, &mut buffer);
    flush(&mut buffer, &out);
    log::info!("Ingestion worker stopped (offset {})", tail.offset());
    let _ = out.send(WorkerMessage::Stopped);
}

/// Bounded wait with backoff. Returns false only when told to stop.
async fn wait_for_file(
    path: &Path,
    total: Duration,
    commands: &mut mpsc::UnboundedReceiver<WorkerCommand>,
) -> bool {
    let deadline = Instant::now() + total;
    let mut step = Duration::from_millis(100);

    while !path.exists() {
        let now = Instant::now();
        if now >= deadline {
            log::debug!("Sample log {:?} not present yet, continuing on cadence", path);
            return true;
        }

        let wait = step.min(deadline - now);
        tokio::select! {
            _ = sleep(wait) => {}
            cmd = commands.recv() => match cmd {
                Some(WorkerCommand::Stop) | None => return false,
                Some(WorkerCommand::Start { .. }) => {}
            },
        }
        step = (step * 2).min(Duration::from_millis(500));
    }

    true
}

fn watch_file(path: &Path, changes: mpsc::UnboundedSender<()>) -> Option<RecommendedWatcher> {
    let parent = path.parent().filter(|p| !p.as_os_str().is_empty())?.to_path_buf();
    let file_name = path.file_name()?.to_os_string();

    let mut watcher = match RecommendedWatcher::new(
        move |result: notify::Result<notify::Event>| {
            let Ok(event) = result else { return };
            let relevant = matches!(
                event.kind,
                EventKind::Create(_) | EventKind::Modify(_) | EventKind::Any
            ) && event.paths.iter().any(|p| p.file_name() == Some(file_name.as_os_str()));
            if relevant {
                let _ = changes.send(());
            }
        },
        NotifyConfig::default(),
    ) {
        Ok(watcher) => watcher,
        Err(e) => {
            log::warn!("File watcher unavailable ({}), polling on cadence only", e);
            return None;
        }
    };

    if let Err(e) = watcher.watch(&parent, RecursiveMode::NonRecursive) {
        log::warn!("Failed to watch {:?}: {}", parent, e);
        return None;
    }

    Some(watcher)
}

fn read_into(tail: &mut SampleTail, buffer: &mut Vec<ProcessMetricsSample>) {
    match tail.read_new() {
        Ok(samples) => buffer.extend(samples),
        // File not there yet or briefly unreadable
        Err(e) => log::trace!("Sample log read skipped: {}", e),
    }
}

fn flush(buffer: &mut Vec<ProcessMetricsSample>, out: &mpsc::UnboundedSender<WorkerMessage>) {
    if buffer.is_empty() {
        return;
    }
    let batch = std::mem::take(buffer);
    let _ = out.send(WorkerMessage::Batch(batch));
}
