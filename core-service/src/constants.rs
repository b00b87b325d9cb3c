//! Central Configuration Constants
//!
//! Single source of truth for all configuration defaults.
//! The TOML settings document (see `logic::config`) overrides the values
//! below, and environment variables override both.

use std::path::PathBuf;

/// App name (also the data directory name)
pub const APP_NAME: &str = "sandbox-monitor";

/// App version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default remote classification endpoint
///
/// Empty means "no remote service": the pipeline goes straight to the local
/// heuristic classifier.
pub const DEFAULT_AI_ENDPOINT: &str = "";

/// Default model name sent with each classification request
pub const DEFAULT_AI_MODEL: &str = "anomaly-classifier-v1";

/// File access monitor poll interval (ms)
pub const DEFAULT_FILE_POLL_INTERVAL_MS: u64 = 500;

/// Sample batch flush cadence (ms)
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 1_000;

/// Grace period for the ingestion worker's final flush (ms)
pub const WORKER_STOP_GRACE_MS: u64 = 500;

/// Total time to wait for the sample log to appear (ms)
pub const SAMPLE_LOG_WAIT_MS: u64 = 2_000;

/// Output batching cadence (ms)
pub const OUTPUT_FLUSH_INTERVAL_MS: u64 = 100;

/// Minimum accumulated samples before a window is classified
pub const DEFAULT_MIN_BATCH_SIZE: usize = 5;

/// Rolling window kept by the pipeline
pub const DEFAULT_WINDOW_CAPACITY: usize = 240;

/// Samples described to the remote service
pub const REMOTE_SAMPLE_COUNT: usize = 10;

/// Credential cooldown after a rate-limit response (seconds)
pub const DEFAULT_CREDENTIAL_COOLDOWN_SECS: u64 = 60;

/// Retention window for persisted runs (days)
pub const DEFAULT_RETENTION_DAYS: u32 = 30;

// ============================================
// Helper functions to read from env with fallback
// ============================================

/// Default data directory (`<local data dir>/sandbox-monitor`)
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

/// Settings document path from environment or default
pub fn get_config_path() -> PathBuf {
    std::env::var("SANDBOX_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| get_data_dir().join("config.toml"))
}

/// Database path override
pub fn env_db_path() -> Option<PathBuf> {
    std::env::var_os("SANDBOX_DB_PATH").map(PathBuf::from)
}

/// Default database path
pub fn get_db_path() -> PathBuf {
    get_data_dir().join("analysis.db")
}

/// Remote endpoint override
pub fn env_ai_endpoint() -> Option<String> {
    std::env::var("SANDBOX_AI_ENDPOINT")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Remote credentials override (comma separated)
pub fn env_ai_keys() -> Option<Vec<String>> {
    std::env::var("SANDBOX_AI_KEYS")
        .ok()
        .map(|s| parse_key_list(&s))
        .filter(|keys| !keys.is_empty())
}

fn parse_key_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .map(String::from)
        .collect()
}
