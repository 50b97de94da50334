//! Demo echo server built on `wirechain`.
//!
//! HTTP requests are answered with their path from a worker pool; WebSocket
//! data frames are echoed back on the connection's I/O task.

mod cli;

use std::{net::SocketAddr, sync::Arc};

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;
use wirechain::{
    config::{DecoderConfig, PoolConfig, WebSocketConfig},
    connection::ConnectionHandle,
    error::HandlerError,
    http::{HttpDecoder, HttpErrorRenderer, HttpResponse, HttpResponseEncoder},
    message::Message,
    pipeline::PipelineBuilder,
    server::Server,
    taskgroup::{OffloadFilter, TaskPool},
    websocket::{Opcode, WebSocketDecoder, WebSocketEncoder, WebSocketErrorRenderer},
};

use crate::cli::{Cli, Protocol};

async fn echo_path(message: Message, conn: ConnectionHandle) -> Result<(), HandlerError> {
    if let Some(req) = message.into_http_request() {
        let body = format!("{} {}\n", req.method(), req.path());
        conn.write(HttpResponse::text(200, body))?;
    }
    Ok(())
}

async fn echo_frames(message: Message, conn: ConnectionHandle) -> Result<(), HandlerError> {
    match message {
        Message::WebSocketOpen(req) => info!(connection = %conn.id(), path = req.path(), "websocket opened"),
        Message::WebSocket(frame)
            if matches!(frame.opcode, Opcode::Text | Opcode::Binary | Opcode::Continuation) =>
        {
            conn.write(frame)?;
        }
        _ => {}
    }
    Ok(())
}

async fn unreachable_tail(_: Message, _: ConnectionHandle) -> Result<(), HandlerError> { Ok(()) }

#[cfg(feature = "metrics")]
fn install_exporter(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error>> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    info!(%addr, "metrics exporter listening");
    Ok(())
}

#[cfg(not(feature = "metrics"))]
fn install_exporter(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error>> {
    tracing::warn!(%addr, "built without the metrics feature; exporter disabled");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Applications embedding the library should install their own subscriber.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    if let Some(addr) = cli.metrics_addr {
        install_exporter(addr)?;
    }

    let mut decoder = DecoderConfig::default();
    if let Some(len) = cli.max_line_length {
        decoder = decoder.max_line_length(len);
    }
    if let Some(dir) = cli.spill_dir {
        decoder = decoder.spill_dir(dir);
    }

    match cli.protocol {
        Protocol::Http => {
            let mut pool_config = PoolConfig::default();
            if let Some(workers) = cli.workers {
                pool_config = pool_config.workers(workers);
            }
            let pool = Arc::new(TaskPool::start(pool_config, ()));
            let offload = OffloadFilter::new(Arc::clone(&pool), Arc::new(echo_path));
            let builder = PipelineBuilder::new()
                .filter("http-encoder", Arc::new(HttpResponseEncoder))?
                .filter("http", Arc::new(HttpDecoder::new(decoder)))?
                .filter("offload", Arc::new(offload))?
                .error_renderer(HttpErrorRenderer);
            let server = Server::new(builder, unreachable_tail).bind(cli.bind)?;
            info!(addr = ?server.local_addr(), "serving http");
            server.run().await?;
            pool.shutdown().await;
        }
        Protocol::Websocket => {
            let ws = WebSocketDecoder::new(WebSocketConfig::default()).handshake_config(decoder);
            let builder = PipelineBuilder::new()
                .filter("ws-encoder", Arc::new(WebSocketEncoder))?
                .filter("ws", Arc::new(ws))?
                .error_renderer(WebSocketErrorRenderer);
            let server = Server::new(builder, echo_frames).bind(cli.bind)?;
            info!(addr = ?server.local_addr(), "serving websocket");
            server.run().await?;
        }
    }
    Ok(())
}
