//! Moves decoded messages off the I/O task onto a [`TaskPool`].

use std::{fmt, panic::AssertUnwindSafe, sync::Arc};

use futures::FutureExt;
use tracing::{debug, warn};

use super::{Task, TaskGroupSpec, TaskPool};
use crate::{
    error::{HandlerError, HandlerPanicked, PipelineError},
    message::Message,
    panic::panic_message,
    pipeline::{Filter, FilterContext, FilterResult},
    server::Handler,
};

type Selector = dyn Fn(&Message) -> Option<TaskGroupSpec> + Send + Sync;

/// Chain filter that runs the application [`Handler`] on a [`TaskPool`].
///
/// Each inbound message becomes one pool task. A selector may assign the
/// task to a group; group limits come from the pool's
/// [`crate::config::PoolConfig`] unless the selector sets one. The task
/// skips connections that closed before it started. Handler failures and
/// panics are reported through
/// [`crate::connection::Connection::report_error`] so they reach the chain's
/// error event on the I/O task.
///
/// Place it last in the chain.
pub struct OffloadFilter<H> {
    pool: Arc<TaskPool>,
    handler: Arc<H>,
    selector: Option<Arc<Selector>>,
}

impl<H: Handler> OffloadFilter<H> {
    /// Offload every message to `pool` without grouping.
    #[must_use]
    pub fn new(pool: Arc<TaskPool>, handler: Arc<H>) -> Self {
        Self {
            pool,
            handler,
            selector: None,
        }
    }

    /// Choose a group per message.
    #[must_use]
    pub fn group_by<F>(mut self, selector: F) -> Self
    where
        F: Fn(&Message) -> Option<TaskGroupSpec> + Send + Sync + 'static,
    {
        self.selector = Some(Arc::new(selector));
        self
    }
}

impl<H: Handler> Filter for OffloadFilter<H> {
    fn on_read(&self, ctx: &FilterContext<'_>, message: Message) -> FilterResult {
        let group = self.selector.as_ref().and_then(|select| select(&message));
        let label = message.kind();
        let connection = Arc::clone(ctx.connection());
        let handler = Arc::clone(&self.handler);
        let mut task = Task::new(async move {
            if connection.is_closed() {
                debug!(connection = %connection.id(), "connection closed before task ran");
                return;
            }
            let outcome = AssertUnwindSafe(handler.handle(message, Arc::clone(&connection)))
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(error)) => connection.report_error(error),
                Err(panic) => {
                    let panic_msg = panic_message(panic.as_ref());
                    warn!(connection = %connection.id(), panic = %panic_msg, "handler panicked");
                    let error: HandlerError = Box::new(HandlerPanicked(panic_msg));
                    connection.report_error(error);
                }
            }
        })
        .label(label);
        if let Some(group) = group {
            task = task.group(group);
        }
        self.pool
            .submit(task)
            .map_err(|e| PipelineError::Handler(Box::new(e)))
    }
}

impl<H> fmt::Debug for OffloadFilter<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OffloadFilter")
            .field("pool", &self.pool)
            .field("grouped", &self.selector.is_some())
            .finish_non_exhaustive()
    }
}
