//! Execution guard applied to every worker at spawn time.
//!
//! Hardening is best effort: a fresh process group, a cleared environment,
//! a scratch working directory, rlimits, and a list of interpreter operations
//! the harness nulls out before importing candidate code. None of this stops
//! a determined adversary with a kernel exploit; it keeps buggy or careless
//! generated code from damaging the host.

use std::ffi::OsString;
use std::io;
use std::path::Path;

use nix::sys::resource::{getrlimit, setrlimit, Resource};
use tokio::process::Command;

use crate::domain::models::SandboxConfig;

/// Identifiers that indicate an attempt to build a nested worker pool.
pub const DEFAULT_FORBIDDEN_IDENTIFIERS: &[&str] =
    &["ProcessPool", "multiprocessing.Pool", "WorkerPool"];

/// Destructive interpreter operations disabled inside workers.
pub const DEFAULT_DISABLED_OPERATIONS: &[&str] = &[
    "os.kill",
    "os.killpg",
    "os.system",
    "os.fork",
    "os.forkpty",
    "os.setuid",
    "os.remove",
    "os.removedirs",
    "os.rmdir",
    "os.unlink",
    "os.rename",
    "os.renames",
    "os.replace",
    "os.truncate",
    "os.chmod",
    "os.fchmod",
    "os.chown",
    "os.fchown",
    "os.lchown",
    "os.chroot",
    "os.fchdir",
    "os.chdir",
    "shutil.rmtree",
    "shutil.move",
    "shutil.chown",
    "builtins.exit",
    "builtins.quit",
    "builtins.help",
];

const MB: u64 = 1024 * 1024;

/// OS resource limits installed in each worker before exec.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceLimits {
    pub address_space_bytes: Option<u64>,
    pub cpu_seconds: Option<u64>,
    pub open_files: Option<u64>,
    pub file_size_bytes: Option<u64>,
    pub processes: Option<u64>,
}

impl ResourceLimits {
    /// Limits described by the sandbox configuration.
    pub fn from_config(config: &SandboxConfig) -> Self {
        Self {
            address_space_bytes: config.memory_limit_mb.map(|mb| mb.saturating_mul(MB)),
            cpu_seconds: config.cpu_limit_secs,
            open_files: config.max_open_files,
            file_size_bytes: config.max_file_size_mb.map(|mb| mb.saturating_mul(MB)),
            processes: config.max_processes,
        }
    }

    /// Install the limits in the calling process. Core dumps are always disabled.
    ///
    /// Runs between fork and exec, so it only issues `setrlimit` calls.
    fn install(&self) -> io::Result<()> {
        let limits = [
            (Resource::RLIMIT_CORE, Some(0)),
            (Resource::RLIMIT_AS, self.address_space_bytes),
            (Resource::RLIMIT_CPU, self.cpu_seconds),
            (Resource::RLIMIT_NOFILE, self.open_files),
            (Resource::RLIMIT_FSIZE, self.file_size_bytes),
            (Resource::RLIMIT_NPROC, self.processes),
        ];
        for (resource, limit) in limits {
            if let Some(value) = limit {
                // Never try to raise the hard limit; that needs privileges.
                let (_, hard) = getrlimit(resource).map_err(io::Error::from)?;
                let value = value.min(hard);
                setrlimit(resource, value, value).map_err(io::Error::from)?;
            }
        }
        Ok(())
    }
}

/// Spawn-time hardening shared by every worker of an executor.
#[derive(Debug, Clone)]
pub struct ExecutionGuard {
    limits: ResourceLimits,
    disabled_operations: Vec<String>,
    environment: Vec<(String, OsString)>,
}

impl ExecutionGuard {
    /// Build a guard. Values of `env_passthrough` are captured from the current
    /// environment now; variables that are unset are skipped.
    pub fn new(
        limits: ResourceLimits,
        disabled_operations: Vec<String>,
        env_passthrough: &[String],
    ) -> Self {
        let environment = env_passthrough
            .iter()
            .filter_map(|key| std::env::var_os(key).map(|value| (key.clone(), value)))
            .collect();
        Self {
            limits,
            disabled_operations,
            environment,
        }
    }

    /// Guard described by the sandbox configuration.
    pub fn from_config(config: &SandboxConfig) -> Self {
        Self::new(
            ResourceLimits::from_config(config),
            config.disabled_operations.clone(),
            &config.env_passthrough,
        )
    }

    /// Operations the harness must disable before importing the candidate.
    pub fn disabled_operations(&self) -> &[String] {
        &self.disabled_operations
    }

    pub const fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    /// Apply process-level hardening to a worker command.
    pub fn apply(&self, cmd: &mut Command, workdir: &Path) {
        cmd.env_clear()
            .envs(self.environment.iter().map(|(k, v)| (k, v)))
            .env("TMPDIR", workdir)
            .current_dir(workdir)
            .process_group(0)
            .kill_on_drop(true);

        let limits = self.limits;
        // SAFETY: the hook runs in the forked child before exec and only calls
        // setrlimit, which is async-signal-safe.
        #[allow(unsafe_code)]
        unsafe {
            cmd.pre_exec(move || limits.install());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limits_from_config_convert_megabytes() {
        let config = SandboxConfig {
            memory_limit_mb: Some(512),
            max_file_size_mb: Some(1),
            ..SandboxConfig::default()
        };
        let limits = ResourceLimits::from_config(&config);
        assert_eq!(limits.address_space_bytes, Some(512 * MB));
        assert_eq!(limits.file_size_bytes, Some(MB));
        assert_eq!(limits.open_files, Some(256));
        assert_eq!(limits.processes, None);
    }

    #[test]
    fn test_guard_only_forwards_set_variables() {
        temp_env::with_vars(
            [("METAOPT_GUARD_SET", Some("1")), ("METAOPT_GUARD_UNSET", None)],
            || {
                let guard = ExecutionGuard::new(
                    ResourceLimits::default(),
                    vec![],
                    &["METAOPT_GUARD_SET".to_string(), "METAOPT_GUARD_UNSET".to_string()],
                );
                assert_eq!(guard.environment.len(), 1);
                assert_eq!(guard.environment[0].0, "METAOPT_GUARD_SET");
            },
        );
    }

    #[test]
    fn test_default_disabled_operations_cover_process_and_filesystem_control() {
        for op in ["os.kill", "os.system", "os.remove", "shutil.rmtree", "builtins.exit"] {
            assert!(DEFAULT_DISABLED_OPERATIONS.contains(&op), "{op} missing");
        }
    }
}
