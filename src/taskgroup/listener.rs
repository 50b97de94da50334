use std::time::Duration;

/// Operator-facing callbacks for pool health events.
///
/// Both callbacks run on pool tasks and must not block. The pool logs every
/// event itself; the listener is for alerting or counting.
pub trait PoolListener: Send + Sync + 'static {
    /// A worker stopped unexpectedly and is being replaced. `panic` holds the
    /// formatted panic payload when the worker panicked.
    fn on_worker_died(&self, worker: usize, panic: Option<&str>) { let _ = (worker, panic); }

    /// A task has been running longer than the configured threshold. It is
    /// left to run to completion.
    fn on_slow_task(&self, label: &str, group: Option<&str>, elapsed: Duration) {
        let _ = (label, group, elapsed);
    }
}

/// Listener that ignores every event.
impl PoolListener for () {}
