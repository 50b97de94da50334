//! Utilities for exercising `wirechain` pipelines in tests.
//!
//! Pipelines can be fed byte chunks directly on a detached connection, or
//! driven end to end by [`wirechain::serve_connection`] over a
//! `tokio::io::duplex` stream, collecting every byte written back.
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use wirechain::{
//!     config::DecoderConfig,
//!     http::{HttpDecoder, HttpErrorRenderer, HttpResponseEncoder},
//!     pipeline::PipelineBuilder,
//! };
//! use wirechain_testing::{drive_chunks, ignore};
//!
//! # async fn example() -> std::io::Result<()> {
//! let builder = PipelineBuilder::new()
//!     .filter("http-encoder", Arc::new(HttpResponseEncoder))
//!     .and_then(|b| b.filter("http", Arc::new(HttpDecoder::new(DecoderConfig::default()))))
//!     .expect("unique names")
//!     .error_renderer(HttpErrorRenderer);
//! let out = drive_chunks(&builder, ignore, vec![b"BOGUS\r\n\r\n".to_vec()]).await?;
//! assert!(out.starts_with(b"HTTP/1.1 400"));
//! # Ok(())
//! # }
//! ```

pub mod helpers;
pub mod logging;
pub mod metrics;

pub use helpers::{
    delivered,
    drive_chunks,
    drive_chunks_with_capacity,
    feed,
    feed_split,
    ignore,
    outbound,
    split_at_points,
};
pub use logging::{LoggerHandle, logger};
pub use metrics::{counter_value, gauge_value, recorded};
