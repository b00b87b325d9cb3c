//! Sandbox Monitor - headless runner
//!
//! Chạy một lệnh trong sandbox, in mọi core event ra stdout (mỗi dòng một
//! JSON), dừng khi process thoát hoặc khi nhận Ctrl-C.
//!
//! ```text
//! SANDBOX_JAIL=/tmp/jail sandbox-monitor python3 job.py
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use sandbox_monitor_core::constants;
use sandbox_monitor_core::logic::ai_bridge::RemoteAnalyzer;
use sandbox_monitor_core::logic::config::Settings;
use sandbox_monitor_core::logic::events::EventSink;
use sandbox_monitor_core::logic::execution::{Orchestrator, StartOptions};
use sandbox_monitor_core::logic::store::AnalysisStore;

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("Starting {} v{}", constants::APP_NAME, constants::APP_VERSION);

    let mut argv: Vec<String> = std::env::args().skip(1).collect();
    if argv.first().map(String::as_str) == Some("--") {
        argv.remove(0);
    }
    if argv.is_empty() {
        eprintln!("usage: {} [--] <command> [args...]", constants::APP_NAME);
        std::process::exit(2);
    }

    // 1. Settings (never fatal)
    let settings = Settings::load_or_default(&constants::get_config_path()).apply_env_overrides();

    // 2. Store + retention
    let store = match AnalysisStore::open(&settings.storage.path) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            log::error!("Cannot open store at {}: {}", settings.storage.path.display(), e);
            std::process::exit(1);
        }
    };
    match store.purge_older_than(settings.storage.retention_days) {
        Ok(0) => {}
        Ok(n) => log::info!("Retention: purged {} runs", n),
        Err(e) => log::warn!("Retention purge failed: {}", e),
    }

    // 3. Remote analyzer (optional)
    let analyzer = match RemoteAnalyzer::from_settings(&settings.remote) {
        Ok(Some(analyzer)) => Some(Arc::new(analyzer)),
        Ok(None) => {
            log::info!("No remote analyzer configured, using local classifier only");
            None
        }
        Err(e) => {
            log::warn!("Remote analyzer unavailable ({}), using local classifier only", e);
            None
        }
    };

    // 4. Event printer (stand-in for the presentation layer)
    let (sink, mut events) = EventSink::channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{}", line),
                Err(e) => log::warn!("Unprintable event {}: {}", event.name(), e),
            }
        }
    });

    // 5. Run
    let orchestrator = Orchestrator::new(settings, store, analyzer, sink);
    let mut options = StartOptions {
        command: argv.remove(0),
        args: argv,
        ..Default::default()
    };
    options.isolation.jail_root = std::env::var_os("SANDBOX_JAIL").map(PathBuf::from);
    options.isolation.network_isolation = env_flag("SANDBOX_NET_ISOLATION");
    options.sample_log = std::env::var_os("SANDBOX_SAMPLE_LOG").map(PathBuf::from);

    if let Err(e) = orchestrator.start(options).await {
        log::error!("{}", e);
        std::process::exit(1);
    }

    let exit_code = tokio::select! {
        code = orchestrator.wait() => code,
        _ = tokio::signal::ctrl_c() => {
            log::info!("Interrupted, stopping");
            orchestrator.stop().await;
            None
        }
    };
    orchestrator.stop().await;

    drop(orchestrator);
    let _ = printer.await;
    std::process::exit(exit_code.unwrap_or(1));
}
