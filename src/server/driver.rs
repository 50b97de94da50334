//! Drives one connection's pipeline over an async byte stream.

use std::{io, sync::Arc};

use bytes::BytesMut;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    select,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::Handler;
use crate::{
    connection::ConnectionHandle,
    error::PipelineError,
    message::Message,
    pipeline::Pipeline,
};

const READ_CHUNK: usize = 8 * 1024;

/// Run `pipeline` over `stream` until the connection closes.
///
/// Inbound bytes are fed through the chain as they arrive. Messages reaching
/// the tail are handed to `handler` one at a time in arrival order. Writes
/// queued from other tasks through [`crate::connection::Connection::write`]
/// are encoded here, so the chain is only ever touched by this task.
///
/// End of input from the peer is treated as a full close: pending output is
/// flushed and the connection is torn down.
///
/// # Errors
///
/// Returns the I/O error that ended the connection, if any. Read errors are
/// also dispatched through the chain's error event first.
pub async fn serve_connection<S, H>(
    mut stream: S,
    pipeline: Pipeline,
    handler: Arc<H>,
    shutdown: CancellationToken,
) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
    H: Handler + ?Sized,
{
    let conn = Arc::clone(pipeline.connection());
    pipeline.fire_accept();
    let result = drive(&mut stream, &pipeline, &conn, handler.as_ref(), &shutdown).await;
    if let Err(e) = &result {
        debug!(connection = %conn.id(), error = %e, "connection ended with error");
    }
    pipeline.fire_close();
    conn.mark_closed();
    let _ = stream.shutdown().await;
    result
}

async fn drive<S, H>(
    stream: &mut S,
    pipeline: &Pipeline,
    conn: &ConnectionHandle,
    handler: &H,
    shutdown: &CancellationToken,
) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
    H: Handler + ?Sized,
{
    let mut buf = BytesMut::with_capacity(READ_CHUNK);
    loop {
        while let Some(message) = conn.next_delivered() {
            if let Err(e) = handler.handle(message, Arc::clone(conn)).await {
                pipeline.fire_error(&PipelineError::Handler(e));
            }
        }
        pipeline.process_mailbox();
        if conn.has_outbound() {
            for chunk in conn.drain_outbound() {
                stream.write_all(&chunk).await?;
            }
            stream.flush().await?;
            conn.touch();
            pipeline.fire_send_complete();
            continue;
        }
        if conn.should_close() {
            return Ok(());
        }
        buf.reserve(READ_CHUNK);
        select! {
            biased;

            () = shutdown.cancelled() => {
                debug!(connection = %conn.id(), "shutdown requested");
                return Ok(());
            }
            () = conn.write_requested() => {}
            read = stream.read_buf(&mut buf) => match read {
                Ok(0) => {
                    pipeline.fire_read_eof();
                    conn.close_after_flush();
                }
                Ok(_) => {
                    conn.touch();
                    pipeline.fire_read(Message::Bytes(buf.split().freeze()));
                }
                Err(e) => {
                    warn!(connection = %conn.id(), error = %e, "read failed");
                    let kind = e.kind();
                    pipeline.fire_error(&PipelineError::Io(e));
                    return Err(io::Error::from(kind));
                }
            },
        }
    }
}
