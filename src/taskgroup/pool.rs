//! The worker pool that runs offloaded tasks.

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Instant,
};

use log::info;
use thiserror::Error;
use tokio::{
    select,
    sync::{Mutex as AsyncMutex, mpsc},
    task::JoinHandle,
    time::{MissedTickBehavior, interval, timeout},
};
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use super::{
    Admission,
    GroupPermit,
    GroupStats,
    PoolListener,
    Task,
    TaskGroups,
    task::{Job, JobSender},
};
use crate::{config::PoolConfig, panic::panic_message};

/// Errors returned by [`TaskPool::submit`].
#[derive(Debug, Error)]
pub enum PoolError {
    /// The pool has been shut down and accepts no more work.
    #[error("task pool is shut down")]
    Shutdown,
}

struct Shared {
    config: PoolConfig,
    jobs: JobSender,
    receiver: AsyncMutex<mpsc::UnboundedReceiver<Job>>,
    groups: Arc<TaskGroups<Task>>,
    listener: Arc<dyn PoolListener>,
    shutdown: CancellationToken,
}

/// Fixed-size pool of tokio worker tasks with per-group concurrency limits.
///
/// Ungrouped tasks run on the next free worker. Grouped tasks run only while
/// their group has a free slot and otherwise wait in FIFO order. A monitor
/// replaces workers that died and tasks that outlive
/// [`PoolConfig::slow_task_threshold`] are reported without being cancelled.
///
/// ```
/// use wirechain::{
///     config::PoolConfig,
///     taskgroup::{Task, TaskGroupSpec, TaskPool},
/// };
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), wirechain::taskgroup::PoolError> {
/// let pool = TaskPool::start(PoolConfig::default().workers(2), ());
/// let (tx, rx) = tokio::sync::oneshot::channel();
/// pool.submit(
///     Task::new(async move {
///         let _ = tx.send(42);
///     })
///     .group(TaskGroupSpec::new("db")),
/// )?;
/// assert_eq!(rx.await.ok(), Some(42));
/// pool.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct TaskPool {
    shared: Arc<Shared>,
    workers: Arc<Mutex<Vec<JoinHandle<()>>>>,
    monitor: JoinHandle<()>,
}

impl TaskPool {
    /// Spawn the workers and the health monitor on the current runtime.
    #[must_use]
    pub fn start(config: PoolConfig, listener: impl PoolListener) -> Self {
        let (jobs, receiver) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            jobs,
            receiver: AsyncMutex::new(receiver),
            groups: Arc::new(TaskGroups::new()),
            listener: Arc::new(listener),
            shutdown: CancellationToken::new(),
            config,
        });
        let handles = (0..shared.config.worker_count())
            .map(|id| spawn_worker(id, Arc::clone(&shared)))
            .collect();
        let workers = Arc::new(Mutex::new(handles));
        let monitor = tokio::spawn(monitor(Arc::clone(&shared), Arc::clone(&workers)));
        info!("task pool started: workers={}", shared.config.worker_count());
        Self {
            shared,
            workers,
            monitor,
        }
    }

    /// Queue `task` for execution.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Shutdown`] after [`TaskPool::shutdown`].
    pub fn submit(&self, task: Task) -> Result<(), PoolError> {
        let shared = &self.shared;
        if shared.shutdown.is_cancelled() {
            return Err(PoolError::Shutdown);
        }
        let job = match task.group.as_ref() {
            None => Job { task, permit: None },
            Some(spec) => {
                let name = spec.name().to_owned();
                let limit = spec
                    .limit()
                    .unwrap_or_else(|| shared.config.limit_for(&name));
                match shared.groups.admit(&name, limit, task) {
                    Admission::Queued => return Ok(()),
                    Admission::Run(task) => {
                        let permit =
                            GroupPermit::new(Arc::clone(&shared.groups), name, shared.jobs.clone());
                        Job {
                            task,
                            permit: Some(permit),
                        }
                    }
                }
            }
        };
        shared.jobs.send(job).map_err(|_| PoolError::Shutdown)
    }

    /// Counters of `group`, or `None` when it has no live record.
    #[must_use]
    pub fn group_stats(&self, group: &str) -> Option<GroupStats> {
        self.shared.groups.stats(group)
    }

    /// Number of live worker tasks.
    #[must_use]
    pub fn live_workers(&self) -> usize {
        self.workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|h| !h.is_finished())
            .count()
    }

    /// Pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig { &self.shared.config }

    /// Stop accepting work and wait for workers to finish their current task.
    ///
    /// Tasks still queued are dropped. Later calls return immediately.
    pub async fn shutdown(&self) {
        self.shared.shutdown.cancel();
        self.monitor.abort();
        let handles = std::mem::take(
            &mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for handle in handles {
            let _ = handle.await;
        }
        info!("task pool stopped");
    }
}

impl std::fmt::Debug for TaskPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskPool")
            .field("workers", &self.shared.config.worker_count())
            .field("groups", &self.shared.groups)
            .finish_non_exhaustive()
    }
}

fn spawn_worker(id: usize, shared: Arc<Shared>) -> JoinHandle<()> {
    tokio::spawn(worker(id, shared))
}

async fn worker(id: usize, shared: Arc<Shared>) {
    loop {
        let next = {
            let mut receiver = shared.receiver.lock().await;
            select! {
                biased;

                () = shared.shutdown.cancelled() => None,
                job = receiver.recv() => job,
            }
        };
        let Some(job) = next else { break };
        run_job(id, job, &shared).await;
    }
}

/// Run one job. A panic in the task unwinds through here and kills the
/// worker; the permit is still dropped and the monitor replaces the worker.
async fn run_job(id: usize, job: Job, shared: &Shared) {
    let Job { task, mut permit } = job;
    if let Some(permit) = permit.as_mut() {
        permit.start();
    }
    let Task {
        label,
        group,
        mut future,
    } = task;
    let Some(threshold) = shared.config.get_slow_task_threshold() else {
        future.await;
        drop(permit);
        return;
    };
    let started = Instant::now();
    if timeout(threshold, &mut future).await.is_err() {
        let elapsed = started.elapsed();
        let group = group.as_ref().map(|g| g.name());
        warn!(worker = id, task = %label, ?group, ?elapsed, "slow task");
        shared.listener.on_slow_task(&label, group, elapsed);
        future.await;
    }
    drop(permit);
}

async fn monitor(shared: Arc<Shared>, workers: Arc<Mutex<Vec<JoinHandle<()>>>>) {
    let mut ticker = interval(shared.config.get_monitor_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        select! {
            biased;

            () = shared.shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let dead: Vec<(usize, JoinHandle<()>)> = {
            let mut handles = workers.lock().unwrap_or_else(PoisonError::into_inner);
            let mut dead = Vec::new();
            for (id, slot) in handles.iter_mut().enumerate() {
                if slot.is_finished() && !shared.shutdown.is_cancelled() {
                    let replacement = spawn_worker(id, Arc::clone(&shared));
                    dead.push((id, std::mem::replace(slot, replacement)));
                }
            }
            dead
        };
        for (id, handle) in dead {
            let panic = match handle.await {
                Err(e) if e.is_panic() => Some(panic_message(e.into_panic().as_ref())),
                _ => None,
            };
            error!(worker = id, panic = ?panic, "worker died; respawned");
            shared.listener.on_worker_died(id, panic.as_deref());
        }
    }
}
