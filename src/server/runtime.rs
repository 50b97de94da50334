//! Runtime control for [`Server`].

mod accept;
mod backoff;

use std::sync::Arc;

pub(super) use accept::{AcceptContext, AcceptListener, accept_loop};
pub use backoff::BackoffConfig;
use futures::Future;
use log::info;
use tokio::signal;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use super::{Handler, Server, ServerError};

impl<H: Handler> Server<H> {
    /// Run the server until Ctrl+C is received.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::NotBound`] if [`Server::bind`] was not called.
    /// Accept failures are retried with back-off and never surface here.
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_with_shutdown(async {
            let _ = signal::ctrl_c().await;
        })
        .await
    }

    /// Run the server until `shutdown` resolves.
    ///
    /// Open connections are asked to stop once `shutdown` resolves, and the
    /// call returns after every connection task has finished.
    ///
    /// ```
    /// use tokio::sync::oneshot;
    /// use wirechain::{
    ///     connection::ConnectionHandle,
    ///     error::HandlerError,
    ///     message::Message,
    ///     pipeline::PipelineBuilder,
    ///     server::Server,
    /// };
    ///
    /// async fn ignore(_: Message, _: ConnectionHandle) -> Result<(), HandlerError> { Ok(()) }
    ///
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), wirechain::server::ServerError> {
    /// let server = Server::new(PipelineBuilder::new(), ignore).bind(([127, 0, 0, 1], 0).into())?;
    /// let (tx, rx) = oneshot::channel::<()>();
    /// let handle = tokio::spawn(server.run_with_shutdown(async {
    ///     let _ = rx.await;
    /// }));
    /// let _ = tx.send(());
    /// handle.await.expect("join server task")?;
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::NotBound`] if [`Server::bind`] was not called.
    pub async fn run_with_shutdown<S>(self, shutdown: S) -> Result<(), ServerError>
    where
        S: Future<Output = ()> + Send,
    {
        let Server {
            builder,
            handler,
            backoff,
            registry,
            listener,
        } = self;
        let listener = listener.ok_or(ServerError::NotBound)?;
        serve(
            Arc::new(listener),
            AcceptContext {
                builder,
                handler,
                registry,
                shutdown: CancellationToken::new(),
                tracker: TaskTracker::new(),
                backoff,
            },
            shutdown,
        )
        .await;
        Ok(())
    }
}

/// Run the accept loop over `listener` until `shutdown` resolves, then wait
/// for every connection task.
pub(super) async fn serve<L, H, S>(listener: Arc<L>, ctx: AcceptContext<H>, shutdown: S)
where
    L: AcceptListener + 'static,
    H: Handler,
    S: Future<Output = ()> + Send,
{
    let token = ctx.shutdown.clone();
    let tracker = ctx.tracker.clone();
    if let Some(addr) = listener.local_addr() {
        info!("listening on {addr}");
    }
    tracker.spawn(accept_loop(listener, ctx));
    shutdown.await;
    token.cancel();
    tracker.close();
    tracker.wait().await;
    info!("server stopped");
}
