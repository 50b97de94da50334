//! The accept loop and per-connection task spawning.

use std::{io, net::SocketAddr, sync::Arc};

use async_trait::async_trait;
use futures::FutureExt as _;
use log::warn;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpListener, TcpStream},
    select,
    time::sleep,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::debug;

use super::backoff::BackoffConfig;
use crate::{
    connection::{Connection, ConnectionId, ConnectionRegistry},
    metrics,
    panic::panic_message,
    pipeline::PipelineBuilder,
    server::{Handler, serve_connection},
};

/// Source of incoming connections consumed by the accept loop.
///
/// Dropping a pending `accept()` future must not leak resources.
#[async_trait]
pub(in crate::server) trait AcceptListener: Send + Sync {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    async fn accept(&self) -> io::Result<(Self::Stream, Option<SocketAddr>)>;

    fn local_addr(&self) -> Option<SocketAddr>;
}

#[async_trait]
impl AcceptListener for TcpListener {
    type Stream = TcpStream;

    async fn accept(&self) -> io::Result<(TcpStream, Option<SocketAddr>)> {
        let (stream, peer) = TcpListener::accept(self).await?;
        Ok((stream, Some(peer)))
    }

    fn local_addr(&self) -> Option<SocketAddr> { TcpListener::local_addr(self).ok() }
}

/// Everything the accept loop shares with the connections it spawns.
pub(in crate::server) struct AcceptContext<H> {
    pub builder: PipelineBuilder,
    pub handler: Arc<H>,
    pub registry: Arc<ConnectionRegistry>,
    pub shutdown: CancellationToken,
    pub tracker: TaskTracker,
    pub backoff: BackoffConfig,
}

/// Accept connections until `ctx.shutdown` is cancelled.
///
/// Accept failures are logged and retried with exponential back-off.
pub(in crate::server) async fn accept_loop<L, H>(listener: Arc<L>, ctx: AcceptContext<H>)
where
    L: AcceptListener + 'static,
    H: Handler,
{
    let backoff = ctx.backoff.normalized();
    let mut delay = backoff.initial_delay;
    loop {
        select! {
            biased;

            () = ctx.shutdown.cancelled() => break,
            res = listener.accept() => match res {
                Ok((stream, peer)) => {
                    spawn_connection(stream, peer, &ctx);
                    delay = backoff.initial_delay;
                }
                Err(e) => {
                    let local_addr = listener.local_addr();
                    warn!("accept error: error={e:?}, local_addr={local_addr:?}");
                    sleep(delay).await;
                    delay = backoff.next_delay(delay);
                }
            },
        }
    }
}

/// Spawn the task serving one connection, containing any panic it raises.
fn spawn_connection<S, H>(stream: S, peer_addr: Option<SocketAddr>, ctx: &AcceptContext<H>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    H: Handler,
{
    let conn = Connection::new(ConnectionId::next(), peer_addr);
    let pipeline = ctx.builder.build(Arc::clone(&conn));
    ctx.registry.insert(&conn);
    metrics::inc_connections();
    let registry = Arc::clone(&ctx.registry);
    let handler = Arc::clone(&ctx.handler);
    let shutdown = ctx.shutdown.clone();
    ctx.tracker.spawn(async move {
        let id = conn.id();
        debug!(connection = %id, ?peer_addr, "connection accepted");
        let served =
            std::panic::AssertUnwindSafe(serve_connection(stream, pipeline, handler, shutdown))
                .catch_unwind()
                .await;
        match served {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(connection = %id, error = %e, "connection closed by I/O error"),
            Err(panic) => {
                let panic_msg = panic_message(panic.as_ref());
                // Emit via both `log` and `tracing` for consumers of either.
                log::error!("connection task panicked: panic={panic_msg}, peer_addr={peer_addr:?}");
                tracing::error!(panic = %panic_msg, ?peer_addr, "connection task panicked");
            }
        }
        conn.mark_closed();
        registry.remove(&id);
        metrics::dec_connections();
    });
}
