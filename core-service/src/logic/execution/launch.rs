//! Process launch layer
//!
//! `CommandLauncher` wraps the user's command with `unshare` (network
//! namespace) and `prlimit` (resource limits) when asked to.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::{Child, Command};

use super::limits::ResourceLimits;
use crate::logic::error::{CoreError, CoreResult};

pub struct LaunchSpec<'a> {
    pub program: &'a str,
    pub args: &'a [String],
    pub working_dir: Option<&'a Path>,
    pub limits: &'a ResourceLimits,
    pub network_isolation: bool,
}

pub trait ProcessLauncher: Send + Sync {
    /// Whether network isolation can be honoured at all
    fn isolation_available(&self) -> bool;

    /// Spawn with stdout/stderr piped, as leader of a new process group
    /// so teardown can signal every descendant
    fn launch(&self, spec: &LaunchSpec<'_>) -> CoreResult<Child>;
}

/// Looks a program up on `PATH`
pub fn find_in_path(name: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

#[derive(Debug, Clone, Default)]
pub struct CommandLauncher;

impl CommandLauncher {
    /// Full argv after wrapping
    pub fn argv(&self, spec: &LaunchSpec<'_>) -> CoreResult<Vec<String>> {
        let mut argv: Vec<String> = Vec::new();

        if spec.network_isolation {
            let unshare = find_in_path("unshare").ok_or_else(|| {
                CoreError::IsolationUnavailable("`unshare` not found on PATH".to_string())
            })?;
            argv.push(unshare.to_string_lossy().into_owned());
            argv.extend(["--net", "--map-root-user", "--"].map(String::from));
        }

        let limit_args = spec.limits.prlimit_args();
        if !limit_args.is_empty() {
            let prlimit = find_in_path("prlimit").ok_or_else(|| {
                CoreError::Configuration("resource limits requested but `prlimit` not found".to_string())
            })?;
            argv.push(prlimit.to_string_lossy().into_owned());
            argv.extend(limit_args);
            argv.push("--".to_string());
        }

        argv.push(spec.program.to_string());
        argv.extend(spec.args.iter().cloned());
        Ok(argv)
    }
}

impl ProcessLauncher for CommandLauncher {
    fn isolation_available(&self) -> bool {
        find_in_path("unshare").is_some()
    }

    fn launch(&self, spec: &LaunchSpec<'_>) -> CoreResult<Child> {
        let argv = self.argv(spec)?;
        let mut command = Command::new(&argv[0]);
        command
            .args(&argv[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);
        if let Some(dir) = spec.working_dir {
            command.current_dir(dir);
        }

        log::debug!("Launching {:?}", argv);
        command
            .spawn()
            .map_err(|e| CoreError::Spawn(format!("{}: {}", spec.program, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_argv() {
        let args = vec!["-c".to_string(), "exit 0".to_string()];
        let limits = ResourceLimits::default();
        let spec = LaunchSpec {
            program: "sh",
            args: &args,
            working_dir: None,
            limits: &limits,
            network_isolation: false,
        };
        assert_eq!(CommandLauncher.argv(&spec).unwrap(), vec!["sh", "-c", "exit 0"]);
    }

    #[test]
    fn test_limits_wrap_with_prlimit() {
        if find_in_path("prlimit").is_none() {
            return;
        }
        let args: Vec<String> = vec![];
        let limits = ResourceLimits {
            max_processes: Some(16),
            ..Default::default()
        };
        let spec = LaunchSpec {
            program: "true",
            args: &args,
            working_dir: None,
            limits: &limits,
            network_isolation: false,
        };
        let argv = CommandLauncher.argv(&spec).unwrap();
        assert!(argv[0].ends_with("prlimit"));
        assert_eq!(&argv[1..], &["--nproc=16", "--", "true"]);
    }

    #[test]
    fn test_find_in_path() {
        assert!(find_in_path("sh").is_some());
        assert!(find_in_path("definitely-not-a-real-binary-name").is_none());
    }
}
