use std::fs::OpenOptions;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use super::worker::{spawn, WorkerConfig, WorkerMessage};
use crate::logic::liveness::LiveGuard;

fn fast_config() -> WorkerConfig {
    WorkerConfig {
        flush_interval: Duration::from_millis(100),
        wait_for_file: Duration::from_millis(500),
        stop_grace: Duration::from_millis(500),
    }
}

fn sample_line(cpu: f64) -> String {
    format!(
        r#"{{"event":"sample","timestamp":"2024-05-01T10:00:00Z","cpu_percent":{},"memory_rss":1024,"threads":1}}"#,
        cpu
    )
}

async fn collect_until_stopped(rx: &mut mpsc::UnboundedReceiver<WorkerMessage>) -> Vec<WorkerMessage> {
    let mut messages = Vec::new();
    while let Ok(Some(msg)) = timeout(Duration::from_secs(3), rx.recv()).await {
        let stopped = msg == WorkerMessage::Stopped;
        messages.push(msg);
        if stopped {
            break;
        }
    }
    messages
}

#[tokio::test]
async fn test_worker_batches_appended_samples() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("samples.jsonl");
    let counter = Arc::new(AtomicUsize::new(0));
    let (tx, mut rx) = mpsc::unbounded_channel();

    let mut handle = spawn(fast_config(), tx, LiveGuard::new(&counter)).unwrap();
    handle.start(path.clone());

    let mut file = OpenOptions::new().create(true).append(true).open(&path).unwrap();
    for i in 0..4 {
        writeln!(file, "{}", sample_line(i as f64)).unwrap();
    }
    writeln!(file, "{{broken").unwrap();
    file.flush().unwrap();

    tokio::time::sleep(Duration::from_millis(400)).await;
    handle.stop().await;

    let messages = collect_until_stopped(&mut rx).await;
    assert!(matches!(messages.first(), Some(WorkerMessage::Started { .. })));
    assert_eq!(messages.last(), Some(&WorkerMessage::Stopped));

    let samples: Vec<f64> = messages
        .iter()
        .filter_map(|m| match m {
            WorkerMessage::Batch(batch) => Some(batch.iter().map(|s| s.cpu_percent).collect::<Vec<_>>()),
            _ => None,
        })
        .flatten()
        .collect();
    assert_eq!(samples, vec![0.0, 1.0, 2.0, 3.0]);
    assert_eq!(counter.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_stop_flushes_remainder() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("samples.jsonl");
    std::fs::write(&path, "").unwrap();

    let counter = Arc::new(AtomicUsize::new(0));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let config = WorkerConfig {
        flush_interval: Duration::from_secs(60),
        ..fast_config()
    };

    let mut handle = spawn(config, tx, LiveGuard::new(&counter)).unwrap();
    handle.start(path.clone());
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    writeln!(file, "{}", sample_line(42.0)).unwrap();
    file.flush().unwrap();

    handle.stop().await;
    let messages = collect_until_stopped(&mut rx).await;

    let total: usize = messages
        .iter()
        .map(|m| match m {
            WorkerMessage::Batch(batch) => batch.len(),
            _ => 0,
        })
        .sum();
    assert_eq!(total, 1);
    assert_eq!(messages.last(), Some(&WorkerMessage::Stopped));
}

#[tokio::test]
async fn test_stop_while_waiting_for_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("never.jsonl");
    let counter = Arc::new(AtomicUsize::new(0));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let config = WorkerConfig {
        wait_for_file: Duration::from_secs(2),
        ..fast_config()
    };

    let mut handle = spawn(config, tx, LiveGuard::new(&counter)).unwrap();
    handle.start(path);
    assert_eq!(counter.load(Ordering::SeqCst), 1);

    handle.stop().await;
    let messages = collect_until_stopped(&mut rx).await;

    assert_eq!(messages.last(), Some(&WorkerMessage::Stopped));
    assert_eq!(counter.load(Ordering::SeqCst), 0);

    // Second stop is a no-op
    handle.stop().await;
}
