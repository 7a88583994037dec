//! Sandboxed execution of untrusted candidate programs.
//!
//! - [`CodeLoader`]: source text to an isolated, loaded program
//! - [`ExecutionGuard`]: spawn-time hardening for every worker
//! - [`WorkerPool`]: deadline-bounded execution in worker processes
//! - [`protocol`]: the line protocol workers speak

pub mod guard;
pub mod loader;
pub mod pool;
pub mod protocol;
pub mod worker;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::instrument;

pub use guard::{ExecutionGuard, ResourceLimits};
pub use loader::{CodeLoader, LoadedProgram};
pub use pool::{JobHandle, WorkerPool};
pub use protocol::Invocation;
pub use worker::WorkerLauncher;

use crate::domain::errors::SandboxError;
use crate::domain::models::SandboxConfig;
use crate::domain::ports::{HostCapabilities, Runtime};

/// Loads and runs candidates under one runtime and guard.
#[derive(Debug, Clone)]
pub struct SandboxExecutor {
    loader: Arc<CodeLoader>,
    launcher: WorkerLauncher,
    max_workers: usize,
    join_pools: bool,
}

impl SandboxExecutor {
    /// Build an executor from the sandbox configuration.
    pub fn new(runtime: Arc<dyn Runtime>, config: &SandboxConfig, scratch_root: PathBuf) -> Self {
        let guard = Arc::new(ExecutionGuard::from_config(config));
        let loader = CodeLoader::new(Arc::clone(&runtime), Arc::clone(&guard), scratch_root)
            .with_forbidden_identifiers(config.forbidden_identifiers.clone())
            .with_max_attempts(config.load_attempts)
            .with_check_timeout(Duration::from_secs(config.check_timeout_secs));
        Self {
            loader: Arc::new(loader),
            launcher: WorkerLauncher::new(runtime, guard),
            max_workers: config.max_workers.max(1),
            join_pools: config.join_pools,
        }
    }

    pub const fn runtime(&self) -> &Arc<dyn Runtime> {
        self.launcher.runtime()
    }

    pub fn loader(&self) -> &CodeLoader {
        &self.loader
    }

    /// Load `source` for invocation of `entry`.
    pub async fn load(&self, source: &str, entry: &str) -> Result<LoadedProgram, SandboxError> {
        self.loader.load(source, entry).await
    }

    /// A fresh pool sharing this executor's runtime and guard.
    pub fn pool(&self) -> WorkerPool {
        WorkerPool::new(self.launcher.clone(), self.max_workers)
    }

    /// Run one invocation.
    ///
    /// With a deadline the call goes through a one-off pool that is stopped
    /// (and joined when `join_pools` is set) whatever the outcome. Without one
    /// the program runs in a single guarded worker awaited to completion.
    #[instrument(skip_all, fields(entry = program.entry(), ?deadline))]
    pub async fn invoke(
        &self,
        program: Arc<LoadedProgram>,
        invocation: Invocation,
        host: Arc<dyn HostCapabilities>,
        deadline: Option<Duration>,
    ) -> Result<Value, SandboxError> {
        match deadline {
            Some(limit) => {
                let pool = self.pool();
                let outcome = pool.schedule(program, invocation, host).result(Some(limit)).await;
                pool.shutdown(self.join_pools).await;
                outcome
            }
            None => self.launcher.run(&program, &invocation, host.as_ref()).await,
        }
    }
}
