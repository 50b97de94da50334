//! Helpers for feeding pipelines and driving them over in-memory streams.

use std::sync::Arc;

use bytes::Bytes;
use futures::FutureExt as _;
use tokio::io::{self, AsyncReadExt, AsyncWriteExt, duplex};
use tokio_util::sync::CancellationToken;
use wirechain::{
    Connection,
    ConnectionHandle,
    HandlerError,
    Message,
    Pipeline,
    PipelineBuilder,
    panic::panic_message,
    serve_connection,
    server::Handler,
};

const DEFAULT_CAPACITY: usize = 64 * 1024;

/// Fire `chunk` into the head of `pipeline` as one read.
pub fn feed(pipeline: &Pipeline, chunk: &[u8]) {
    pipeline.fire_read(Message::Bytes(Bytes::copy_from_slice(chunk)));
}

/// Split `input` at every offset in `points` (sorted, out-of-range ignored).
#[must_use]
pub fn split_at_points(input: &[u8], points: &[usize]) -> Vec<Vec<u8>> {
    let mut cuts: Vec<usize> = points.iter().copied().filter(|&p| p < input.len()).collect();
    cuts.sort_unstable();
    cuts.dedup();
    let mut chunks = Vec::with_capacity(cuts.len() + 1);
    let mut start = 0;
    for cut in cuts {
        chunks.push(input[start..cut].to_vec());
        start = cut;
    }
    chunks.push(input[start..].to_vec());
    chunks
}

/// Feed `input` split at `points`, one read per chunk.
pub fn feed_split(pipeline: &Pipeline, input: &[u8], points: &[usize]) {
    for chunk in split_at_points(input, points) {
        feed(pipeline, &chunk);
    }
}

/// Concatenate and drain the encoded bytes queued on `conn`.
#[must_use]
pub fn outbound(conn: &ConnectionHandle) -> Vec<u8> { conn.drain_outbound().concat() }

/// Drain every message delivered to the tail of `conn`'s pipeline.
#[must_use]
pub fn delivered(conn: &ConnectionHandle) -> Vec<Message> {
    std::iter::from_fn(|| conn.next_delivered()).collect()
}

/// Handler that drops every message.
///
/// # Errors
///
/// Never fails.
pub async fn ignore(_: Message, _: ConnectionHandle) -> Result<(), HandlerError> { Ok(()) }

/// Serve a fresh pipeline from `builder` over a duplex stream, write each
/// chunk in turn, half-close, and return everything the server wrote.
///
/// # Errors
///
/// Returns any I/O error from either side, or an error describing a panic
/// raised while serving.
pub async fn drive_chunks<H: Handler>(
    builder: &PipelineBuilder,
    handler: H,
    chunks: Vec<Vec<u8>>,
) -> io::Result<Vec<u8>> {
    drive_chunks_with_capacity(builder, handler, chunks, DEFAULT_CAPACITY).await
}

/// As [`drive_chunks`] with a custom duplex buffer size.
///
/// # Errors
///
/// See [`drive_chunks`].
pub async fn drive_chunks_with_capacity<H: Handler>(
    builder: &PipelineBuilder,
    handler: H,
    chunks: Vec<Vec<u8>>,
    capacity: usize,
) -> io::Result<Vec<u8>> {
    let (mut client, server) = duplex(capacity);
    let pipeline = builder.build(Connection::detached());

    let server_fut = async {
        let result = std::panic::AssertUnwindSafe(serve_connection(
            server,
            pipeline,
            Arc::new(handler),
            CancellationToken::new(),
        ))
        .catch_unwind()
        .await;
        match result {
            Ok(served) => served,
            Err(panic) => Err(io::Error::other(format!(
                "server task failed: {}",
                panic_message(panic.as_ref())
            ))),
        }
    };

    let client_fut = async {
        for chunk in &chunks {
            client.write_all(chunk).await?;
        }
        client.shutdown().await?;
        let mut buf = Vec::new();
        client.read_to_end(&mut buf).await?;
        io::Result::Ok(buf)
    };

    let (served, output) = tokio::join!(server_fut, client_fut);
    served?;
    output
}
