//! Settings document (TOML)
//!
//! Mọi section đều `#[serde(default)]`: một file chỉ chứa vài key vẫn được
//! merge lên trên giá trị mặc định. Settings không đổi sau khi load; reload
//! nghĩa là build một `Settings` mới.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ai_bridge::RetryPolicy;
use super::error::{CoreError, CoreResult};
use super::threat::HeuristicThresholds;
use crate::constants;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub thresholds: HeuristicThresholds,
    pub pipeline: PipelineSettings,
    pub monitor: MonitorSettings,
    pub remote: RemoteSettings,
    pub allowlist: AllowListSettings,
    pub storage: StorageSettings,
    pub collector: CollectorSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub min_batch_size: usize,
    pub window_capacity: usize,
    pub flush_interval_ms: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            min_batch_size: constants::DEFAULT_MIN_BATCH_SIZE,
            window_capacity: constants::DEFAULT_WINDOW_CAPACITY,
            flush_interval_ms: constants::DEFAULT_FLUSH_INTERVAL_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    pub poll_interval_ms: u64,
    /// Path prefixes allowed in addition to the built-in system whitelist
    pub extra_whitelist: Vec<PathBuf>,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: constants::DEFAULT_FILE_POLL_INTERVAL_MS,
            extra_whitelist: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteSettings {
    pub endpoint: String,
    pub model: String,
    pub credentials: Vec<String>,
    pub cooldown_secs: u64,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub timeout_secs: u64,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            endpoint: constants::DEFAULT_AI_ENDPOINT.to_string(),
            model: constants::DEFAULT_AI_MODEL.to_string(),
            credentials: Vec::new(),
            cooldown_secs: constants::DEFAULT_CREDENTIAL_COOLDOWN_SECS,
            max_attempts: policy.max_attempts,
            base_delay_ms: policy.base_delay.as_millis() as u64,
            max_delay_ms: policy.max_delay.as_millis() as u64,
            timeout_secs: 30,
        }
    }
}

impl RemoteSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms.max(self.base_delay_ms)),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.endpoint.trim().is_empty() && !self.credentials.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllowListSettings {
    pub enabled: bool,
    /// Executable names whose runs are never analyzed
    pub executables: Vec<String>,
}

impl AllowListSettings {
    /// Matches on the executable's file name, so `/usr/bin/make` matches `make`
    pub fn skips(&self, command: &str) -> bool {
        if !self.enabled {
            return false;
        }
        let name = Path::new(command)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(command);
        self.executables.iter().any(|e| e == name || e == command)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub path: PathBuf,
    pub retention_days: u32,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            path: constants::get_db_path(),
            retention_days: constants::DEFAULT_RETENTION_DAYS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorSettings {
    /// External metrics collector; empty disables the launch
    pub program: String,
    /// `{pid}` and `{output}` are substituted at launch
    pub args: Vec<String>,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            program: String::new(),
            args: ["--pid", "{pid}", "--output", "{output}"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl CollectorSettings {
    pub fn is_enabled(&self) -> bool {
        !self.program.trim().is_empty()
    }

    pub fn expand_args(&self, pid: u32, output: &Path) -> Vec<String> {
        let pid = pid.to_string();
        let output = output.to_string_lossy();
        self.args
            .iter()
            .map(|a| a.replace("{pid}", &pid).replace("{output}", &output))
            .collect()
    }
}

// ============================================================================
// LOADING
// ============================================================================

impl Settings {
    pub fn load(path: &Path) -> CoreResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            CoreError::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        let settings: Settings = toml::from_str(&content)?;
        Ok(settings)
    }

    /// Startup path: a missing or broken document never fails startup
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            log::info!("No settings at {}, using defaults", path.display());
            return Self::default();
        }
        match Self::load(path) {
            Ok(settings) => {
                log::info!("Settings loaded from {}", path.display());
                settings
            }
            Err(e) => {
                log::warn!("Ignoring settings ({}), using defaults", e);
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> CoreResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| CoreError::Configuration(e.to_string()))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        Ok(())
    }

    pub fn apply_env_overrides(self) -> Self {
        self.with_overrides(
            constants::env_ai_endpoint(),
            constants::env_ai_keys(),
            constants::env_db_path(),
        )
    }

    pub fn with_overrides(
        mut self,
        endpoint: Option<String>,
        keys: Option<Vec<String>>,
        db_path: Option<PathBuf>,
    ) -> Self {
        if let Some(endpoint) = endpoint {
            self.remote.endpoint = endpoint;
        }
        if let Some(keys) = keys {
            self.remote.credentials = keys;
        }
        if let Some(path) = db_path {
            self.storage.path = path;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_partial_document_merges_over_defaults() {
        let doc = r#"
            # only override what matters
            [thresholds]
            cpu_avg = 70.0   # stricter

            [allowlist]
            enabled = true
            executables = ["make"]
        "#;
        let settings: Settings = toml::from_str(doc).unwrap();

        assert_eq!(settings.thresholds.cpu_avg, 70.0);
        assert_eq!(settings.thresholds.memory_max_mb, 128.0);
        assert_eq!(settings.pipeline.min_batch_size, 5);
        assert_eq!(settings.remote.cooldown_secs, 60);
        assert!(settings.allowlist.skips("/usr/bin/make"));
        assert!(!settings.allowlist.skips("cargo"));
    }

    #[test]
    fn test_allowlist_disabled_by_default() {
        let mut allow = AllowListSettings::default();
        allow.executables.push("python3".into());
        assert!(!allow.skips("python3"));
    }

    #[test]
    fn test_load_errors_and_fallback() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        assert!(matches!(Settings::load(&missing), Err(CoreError::Configuration(_))));
        assert_eq!(Settings::load_or_default(&missing), Settings::default());

        let broken = dir.path().join("broken.toml");
        fs::write(&broken, "[thresholds\ncpu_avg = ").unwrap();
        assert!(matches!(Settings::load(&broken), Err(CoreError::Configuration(_))));
        assert_eq!(Settings::load_or_default(&broken), Settings::default());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut settings = Settings::default();
        settings.monitor.poll_interval_ms = 250;
        settings.save(&path).unwrap();

        assert_eq!(Settings::load(&path).unwrap(), settings);
    }

    #[test]
    fn test_overrides_and_collector_template() {
        let settings = Settings::default().with_overrides(
            Some("https://ai.example/v1".into()),
            Some(vec!["k1".into()]),
            None,
        );
        assert!(settings.remote.is_configured());
        assert!(!Settings::default().remote.is_configured());

        let args = settings.collector.expand_args(42, Path::new("/tmp/s.jsonl"));
        assert_eq!(args, vec!["--pid", "42", "--output", "/tmp/s.jsonl"]);
    }
}
