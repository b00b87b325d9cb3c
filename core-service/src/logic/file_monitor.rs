//! File Access Monitor - jail root + whitelist enforcement (detection only)
//!
//! Poll bảng handle đang mở của process theo chu kỳ cố định. Handle nào trỏ
//! ra ngoài jail root và ngoài whitelist hệ thống thì phát một violation.
//! Không bao giờ block hay kill process.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use super::events::EventSink;
use super::liveness::LiveGuard;

/// Always allowed: device, proc, sys and shared-library paths
pub const SYSTEM_WHITELIST: &[&str] = &[
    "/dev",
    "/proc",
    "/sys",
    "/lib",
    "/lib64",
    "/usr/lib",
    "/usr/lib64",
    "/usr/share/locale",
    "/etc/ld.so.cache",
    "/etc/localtime",
];

const DELETED_SUFFIX: &str = " (deleted)";

// ============================================================================
// HANDLE SOURCE
// ============================================================================

/// Lists the paths a process currently holds open.
/// An `Err` means the whole table is gone (process exited).
pub trait HandleSource: Send + Sync {
    fn open_paths(&self, pid: u32) -> io::Result<Vec<PathBuf>>;
}

/// Reads `/proc/<pid>/fd`
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcFdSource;

impl HandleSource for ProcFdSource {
    fn open_paths(&self, pid: u32) -> io::Result<Vec<PathBuf>> {
        let dir = std::fs::read_dir(format!("/proc/{}/fd", pid))?;
        let mut paths = Vec::new();

        for entry in dir.flatten() {
            // fd may close between readdir and readlink
            let Ok(target) = std::fs::read_link(entry.path()) else {
                continue;
            };
            // pipes, sockets, anon inodes
            if !target.is_absolute() {
                continue;
            }
            let target = match target.to_str().and_then(|s| s.strip_suffix(DELETED_SUFFIX)) {
                Some(stripped) => PathBuf::from(stripped),
                None => target,
            };
            paths.push(target);
        }

        Ok(paths)
    }
}

// ============================================================================
// JAIL
// ============================================================================

#[derive(Debug, Clone)]
pub struct FileJail {
    root: PathBuf,
    extra: Vec<PathBuf>,
}

impl FileJail {
    pub fn new(root: impl AsRef<Path>, extra: Vec<PathBuf>) -> Self {
        let root = root.as_ref();
        let root = std::fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
        Self { root, extra }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Component-wise prefix match, so `/tmp/jail2` is not inside `/tmp/jail`
    pub fn is_allowed(&self, path: &Path) -> bool {
        path.starts_with(&self.root)
            || SYSTEM_WHITELIST.iter().any(|p| path.starts_with(p))
            || self.extra.iter().any(|p| path.starts_with(p))
    }
}

/// One poll: distinct paths currently open outside the jail
pub fn scan_once(source: &dyn HandleSource, jail: &FileJail, pid: u32) -> io::Result<Vec<PathBuf>> {
    let mut seen = HashSet::new();
    Ok(source
        .open_paths(pid)?
        .into_iter()
        .filter(|p| !jail.is_allowed(p))
        .filter(|p| seen.insert(p.clone()))
        .collect())
}

// ============================================================================
// BACKGROUND TASK
// ============================================================================

pub struct MonitorHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
    violations: Arc<AtomicU64>,
}

impl MonitorHandle {
    pub fn violation_counter(&self) -> Arc<AtomicU64> {
        self.violations.clone()
    }

    pub fn violations(&self) -> u64 {
        self.violations.load(Ordering::Relaxed)
    }

    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            log::warn!("File monitor task ended abnormally: {}", e);
        }
    }
}

pub fn spawn(
    pid: u32,
    jail: FileJail,
    source: Arc<dyn HandleSource>,
    poll_interval: Duration,
    sink: EventSink,
    live: LiveGuard,
) -> MonitorHandle {
    let (shutdown, mut shutdown_rx) = watch::channel(false);
    let violations = Arc::new(AtomicU64::new(0));
    let counter = violations.clone();

    log::info!("File monitor started: pid={} jail={}", pid, jail.root().display());

    let task = tokio::spawn(async move {
        let mut ticker = interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match scan_once(source.as_ref(), &jail, pid) {
                        Ok(found) => {
                            for path in found {
                                counter.fetch_add(1, Ordering::Relaxed);
                                log::warn!("Jail violation: pid={} path={}", pid, path.display());
                                sink.emit_violation(pid, path.to_string_lossy().into_owned());
                            }
                        }
                        Err(_) => {
                            log::debug!("Handle table for pid {} gone, file monitor ending", pid);
                            break;
                        }
                    }
                }
                _ = shutdown_rx.changed() => break,
            }
        }

        log::info!(
            "File monitor stopped: pid={} violations={}",
            pid,
            counter.load(Ordering::Relaxed)
        );
        drop(live);
    });

    MonitorHandle { shutdown, task, violations }
}
