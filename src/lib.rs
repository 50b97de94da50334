#![doc(html_root_url = "https://docs.rs/wirechain/latest")]
//! Public API for the `wirechain` library.
//!
//! This crate provides a per-connection filter chain for asynchronous
//! servers: resumable HTTP/1.x and WebSocket decoders that survive
//! arbitrary fragmentation, a tokio connection driver, and a worker pool
//! with per-group concurrency limits for offloading application handlers.

pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod http;
pub mod message;
pub mod metrics;
pub mod panic;
pub mod pipeline;
pub mod server;
pub mod taskgroup;
pub mod websocket;

pub use connection::{Connection, ConnectionHandle, ConnectionId};
pub use error::{HandlerError, ParseError, PipelineError};
pub use message::Message;
pub use pipeline::{Filter, FilterContext, Pipeline, PipelineBuilder};
pub use server::{Handler, Server, serve_connection};
