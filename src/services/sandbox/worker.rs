//! Spawning a guarded worker and driving one invocation over the protocol.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin};
use tracing::{debug, trace, warn};

use super::guard::ExecutionGuard;
use super::loader::{tail, LoadedProgram};
use super::protocol::{HostMessage, Invocation, WorkerErrorKind, WorkerMessage};
use crate::domain::errors::{LoadError, SandboxError};
use crate::domain::ports::{HostCapabilities, Runtime};
use crate::infrastructure::logging::config::CANDIDATE_TARGET;

/// Bytes of worker stderr kept for crash reports.
const STDERR_TAIL_BYTES: usize = 4096;

/// How long to wait for the stderr drain once the worker is gone.
const STDERR_GRACE: Duration = Duration::from_secs(1);

/// Starts workers for loaded programs.
#[derive(Debug, Clone)]
pub struct WorkerLauncher {
    runtime: Arc<dyn Runtime>,
    guard: Arc<ExecutionGuard>,
}

impl WorkerLauncher {
    pub const fn new(runtime: Arc<dyn Runtime>, guard: Arc<ExecutionGuard>) -> Self {
        Self { runtime, guard }
    }

    pub const fn runtime(&self) -> &Arc<dyn Runtime> {
        &self.runtime
    }

    pub const fn guard(&self) -> &Arc<ExecutionGuard> {
        &self.guard
    }

    /// Spawn a hardened worker process for `program`.
    pub fn spawn(&self, program: &LoadedProgram) -> Result<Child, SandboxError> {
        let mut cmd = self.runtime.worker_command(program.files());
        self.guard.apply(&mut cmd, program.dir());
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd.spawn().map_err(SandboxError::Spawn)
    }

    /// Run one invocation in a fresh worker and wait for it without a deadline.
    pub async fn run(
        &self,
        program: &LoadedProgram,
        invocation: &Invocation,
        host: &dyn HostCapabilities,
    ) -> Result<Value, SandboxError> {
        let mut child = self.spawn(program)?;
        let pgid = child.id();
        let mut group = GroupGuard(pgid);
        let outcome = self.converse(&mut child, program, invocation, host).await;
        reap(&mut child, pgid).await;
        group.disarm();
        outcome
    }

    /// Drive the protocol until the worker reports a result or error, or exits.
    pub async fn converse(
        &self,
        child: &mut Child,
        program: &LoadedProgram,
        invocation: &Invocation,
        host: &dyn HostCapabilities,
    ) -> Result<Value, SandboxError> {
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| SandboxError::Protocol("worker stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SandboxError::Protocol("worker stdout unavailable".into()))?;
        let stderr_drain = child.stderr.take().map(|stderr| {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                let mut kept = String::new();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: CANDIDATE_TARGET, "{line}");
                    kept.push_str(&line);
                    kept.push('\n');
                    if kept.len() > 2 * STDERR_TAIL_BYTES {
                        kept = tail(&kept, STDERR_TAIL_BYTES).to_string();
                    }
                }
                kept
            })
        });

        let invoke = HostMessage::Invoke {
            entry: program.entry(),
            module: program.module(),
            args: &invocation.args,
            disabled_operations: self.guard.disabled_operations(),
        };
        send(&mut stdin, &invoke).await?;

        let mut lines = BufReader::new(stdout).lines();
        loop {
            let line = lines
                .next_line()
                .await
                .map_err(|e| SandboxError::Protocol(format!("reading worker output: {e}")))?;
            let Some(line) = line else { break };

            let Some(message) = WorkerMessage::parse(&line) else {
                debug!(target: CANDIDATE_TARGET, stdout = %line, "ignoring non-protocol output");
                continue;
            };

            match message {
                WorkerMessage::Call {
                    id,
                    target,
                    method,
                    params,
                } => {
                    trace!(id, %target, %method, "worker callback");
                    let reply = match host.call(&target, &method, params).await {
                        Ok(ok) => HostMessage::ReplyOk { id, ok },
                        Err(error) => {
                            debug!(id, %target, %method, %error, "callback refused");
                            HostMessage::ReplyError { id, error }
                        }
                    };
                    send(&mut stdin, &reply).await?;
                }
                WorkerMessage::Finished { value } => return Ok(value),
                WorkerMessage::Error {
                    kind: WorkerErrorKind::Load,
                    message,
                } => {
                    return Err(LoadError::Import {
                        entry: program.entry().to_string(),
                        detail: message,
                    }
                    .into())
                }
                WorkerMessage::Error {
                    kind: WorkerErrorKind::Raised,
                    message,
                } => return Err(SandboxError::Raised(message)),
            }
        }

        // stdout closed without a result
        drop(stdin);
        let status = child.wait().await.ok().and_then(|s| s.code());
        let stderr = match stderr_drain {
            Some(drain) => tokio::time::timeout(STDERR_GRACE, drain)
                .await
                .ok()
                .and_then(Result::ok)
                .unwrap_or_default(),
            None => String::new(),
        };
        warn!(?status, "worker exited without a result");
        Err(SandboxError::Crashed {
            status,
            stderr: tail(stderr.trim(), STDERR_TAIL_BYTES).to_string(),
        })
    }
}

async fn send(stdin: &mut ChildStdin, message: &HostMessage<'_>) -> Result<(), SandboxError> {
    let line = message
        .to_line()
        .map_err(|e| SandboxError::Protocol(format!("encoding message: {e}")))?;
    stdin
        .write_all(line.as_bytes())
        .await
        .map_err(|e| SandboxError::Protocol(format!("writing to worker: {e}")))?;
    stdin
        .flush()
        .await
        .map_err(|e| SandboxError::Protocol(format!("writing to worker: {e}")))
}

/// Kills a worker's process group if dropped while still armed.
struct GroupGuard(Option<u32>);

impl GroupGuard {
    fn disarm(&mut self) {
        self.0 = None;
    }
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        if let Some(pgid) = self.0 {
            kill_group(pgid);
        }
    }
}

/// Signal a worker's whole process group. Missing groups are ignored.
pub fn kill_group(pgid: u32) {
    let Ok(raw) = i32::try_from(pgid) else { return };
    if let Err(err) = killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        if err != nix::errno::Errno::ESRCH {
            warn!(pgid, error = %err, "failed to signal worker process group");
        }
    }
}

/// Tear down a finished worker and everything it started.
pub async fn reap(child: &mut Child, pgid: Option<u32>) {
    if let Some(pgid) = pgid {
        kill_group(pgid);
    }
    let _ = child.start_kill();
    let _ = child.wait().await;
}
