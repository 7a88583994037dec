//! Deadline-bounded worker pool.
//!
//! Every scheduled job runs in its own worker process, at most `max_workers`
//! at a time. A job that misses its deadline is abandoned: its process group
//! is killed and the caller gets [`SandboxError::Timeout`] without waiting for
//! teardown. The freed slot is filled by the next queued job.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{oneshot, Notify, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::loader::LoadedProgram;
use super::protocol::Invocation;
use super::worker::{kill_group, reap, WorkerLauncher};
use crate::domain::errors::SandboxError;
use crate::domain::ports::HostCapabilities;

type JobResult = Result<Value, SandboxError>;

struct LiveJob {
    pgid: Option<u32>,
    cancel: Arc<Notify>,
}

struct PoolInner {
    launcher: WorkerLauncher,
    permits: Arc<Semaphore>,
    live: Mutex<HashMap<u64, LiveJob>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    next_id: AtomicU64,
    stopped: AtomicBool,
}

impl PoolInner {
    fn live(&self) -> std::sync::MutexGuard<'_, HashMap<u64, LiveJob>> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Kill a job's workers and wake its task. Never blocks on teardown.
    fn terminate(&self, id: u64) {
        if let Some(job) = self.live().get(&id) {
            if let Some(pgid) = job.pgid {
                kill_group(pgid);
            }
            job.cancel.notify_one();
        }
    }

    async fn execute(
        &self,
        id: u64,
        program: &LoadedProgram,
        invocation: &Invocation,
        host: &dyn HostCapabilities,
    ) -> JobResult {
        let _permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| SandboxError::Stopped)?;
        if self.stopped.load(Ordering::SeqCst) {
            return Err(SandboxError::Stopped);
        }

        let mut child = self.launcher.spawn(program)?;
        let pgid = child.id();
        if let Some(job) = self.live().get_mut(&id) {
            job.pgid = pgid;
        }
        debug!(job = id, ?pgid, entry = program.entry(), "worker started");

        let outcome = self
            .launcher
            .converse(&mut child, program, invocation, host)
            .await;
        reap(&mut child, pgid).await;
        outcome
    }
}

/// A pool of single-use worker processes.
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    pub fn new(launcher: WorkerLauncher, max_workers: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                launcher,
                permits: Arc::new(Semaphore::new(max_workers.max(1))),
                live: Mutex::new(HashMap::new()),
                tasks: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(0),
                stopped: AtomicBool::new(false),
            }),
        }
    }

    /// Queue `invocation` of `program`; the job starts when a slot is free.
    pub fn schedule(
        &self,
        program: Arc<LoadedProgram>,
        invocation: Invocation,
        host: Arc<dyn HostCapabilities>,
    ) -> JobHandle {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();

        if self.inner.stopped.load(Ordering::SeqCst) {
            let _ = tx.send(Err(SandboxError::Stopped));
            return JobHandle {
                id,
                rx,
                pool: Arc::clone(&self.inner),
            };
        }

        let cancel = Arc::new(Notify::new());
        self.inner.live().insert(
            id,
            LiveJob {
                pgid: None,
                cancel: Arc::clone(&cancel),
            },
        );

        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            let outcome = tokio::select! {
                biased;
                () = cancel.notified() => Err(SandboxError::Stopped),
                result = inner.execute(id, &program, &invocation, host.as_ref()) => result,
            };
            if let Some(job) = inner.live().remove(&id) {
                if let Some(pgid) = job.pgid {
                    kill_group(pgid);
                }
            }
            let _ = tx.send(outcome);
        });
        self.inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(task);

        JobHandle {
            id,
            rx,
            pool: Arc::clone(&self.inner),
        }
    }

    /// Number of jobs scheduled and not yet finished.
    pub fn live_jobs(&self) -> usize {
        self.inner.live().len()
    }

    /// Refuse new work and kill every running worker. Does not wait.
    pub fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.permits.close();
        let ids: Vec<u64> = self.inner.live().keys().copied().collect();
        for id in ids {
            self.inner.terminate(id);
        }
    }

    /// Wait until every job task has finished tearing down its worker.
    pub async fn join(&self) {
        let tasks: Vec<JoinHandle<()>> = std::mem::take(
            &mut *self
                .inner
                .tasks
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for task in tasks {
            if let Err(err) = task.await {
                warn!(error = %err, "worker task failed");
            }
        }
    }

    /// Stop the pool, optionally joining the workers.
    pub async fn shutdown(&self, join: bool) {
        self.stop();
        if join {
            self.join().await;
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("live_jobs", &self.live_jobs())
            .field("stopped", &self.inner.stopped.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

/// Handle to one scheduled job.
pub struct JobHandle {
    id: u64,
    rx: oneshot::Receiver<JobResult>,
    pool: Arc<PoolInner>,
}

impl JobHandle {
    /// Wait for the job's value.
    ///
    /// With a timeout, a job still running when it elapses is terminated and
    /// [`SandboxError::Timeout`] is returned immediately.
    pub async fn result(mut self, timeout: Option<Duration>) -> JobResult {
        let Some(limit) = timeout else {
            return self.rx.await.unwrap_or(Err(SandboxError::Stopped));
        };
        match tokio::time::timeout(limit, &mut self.rx).await {
            Ok(received) => received.unwrap_or(Err(SandboxError::Stopped)),
            Err(_) => {
                debug!(job = self.id, ?limit, "job exceeded its deadline");
                self.pool.terminate(self.id);
                Err(SandboxError::Timeout(limit))
            }
        }
    }

    pub const fn id(&self) -> u64 {
        self.id
    }
}
