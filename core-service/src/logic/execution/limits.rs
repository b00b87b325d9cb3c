//! Resource limits and isolation options
//!
//! Limits are forwarded verbatim to the launch layer (`prlimit`); nothing
//! here enforces them.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResourceLimits {
    /// RLIMIT_CPU (seconds)
    pub cpu_seconds: Option<u64>,
    /// RLIMIT_AS (bytes)
    pub memory_bytes: Option<u64>,
    /// RLIMIT_NPROC
    pub max_processes: Option<u64>,
    /// RLIMIT_NOFILE
    pub max_open_files: Option<u64>,
    /// RLIMIT_FSIZE (bytes)
    pub file_size_bytes: Option<u64>,
}

impl ResourceLimits {
    pub fn is_empty(&self) -> bool {
        self.prlimit_args().is_empty()
    }

    /// `prlimit` flags, soft and hard limit set to the same value
    pub fn prlimit_args(&self) -> Vec<String> {
        [
            ("cpu", self.cpu_seconds),
            ("as", self.memory_bytes),
            ("nproc", self.max_processes),
            ("nofile", self.max_open_files),
            ("fsize", self.file_size_bytes),
        ]
        .iter()
        .filter_map(|(flag, value)| value.map(|v| format!("--{}={}", flag, v)))
        .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IsolationOptions {
    pub network_isolation: bool,
    /// Enables the file jail; must be an existing directory
    pub jail_root: Option<PathBuf>,
}
