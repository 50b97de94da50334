//! Tokio transport for filter chains.
//!
//! [`serve_connection`] drives one pipeline over any async byte stream;
//! [`Server`] accepts TCP connections and runs one pipeline per connection,
//! built from a shared [`PipelineBuilder`].

use std::{
    net::{SocketAddr, TcpListener as StdTcpListener},
    sync::Arc,
};

use tokio::net::TcpListener;

use crate::{connection::ConnectionRegistry, pipeline::PipelineBuilder};

mod driver;
pub mod error;
mod handler;
mod runtime;

pub use driver::serve_connection;
pub use error::ServerError;
pub use handler::Handler;
pub use runtime::BackoffConfig;

/// TCP server running one filter chain per accepted connection.
///
/// Decoded messages reaching the end of a chain are passed to the
/// [`Handler`]. Chains that offload work with
/// [`crate::taskgroup::OffloadFilter`] never deliver to it.
pub struct Server<H> {
    builder: PipelineBuilder,
    handler: Arc<H>,
    backoff: BackoffConfig,
    registry: Arc<ConnectionRegistry>,
    listener: Option<TcpListener>,
}

impl<H: Handler> Server<H> {
    /// Create an unbound server.
    #[must_use]
    pub fn new(builder: PipelineBuilder, handler: H) -> Self {
        Self {
            builder,
            handler: Arc::new(handler),
            backoff: BackoffConfig::default(),
            registry: Arc::new(ConnectionRegistry::default()),
            listener: None,
        }
    }

    /// Override the accept-failure back-off.
    #[must_use]
    pub fn backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Registry of live connections, for idle scanning and inspection.
    #[must_use]
    pub fn registry(&self) -> Arc<ConnectionRegistry> { Arc::clone(&self.registry) }

    /// Bind to `addr`. Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the socket cannot be bound.
    pub fn bind(self, addr: SocketAddr) -> Result<Self, ServerError> {
        let std_listener = StdTcpListener::bind(addr).map_err(ServerError::Bind)?;
        self.bind_existing_listener(std_listener)
    }

    /// Adopt an already bound listener. Must be called inside a tokio
    /// runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the listener cannot be registered
    /// with the runtime.
    pub fn bind_existing_listener(mut self, std_listener: StdTcpListener) -> Result<Self, ServerError> {
        std_listener
            .set_nonblocking(true)
            .map_err(ServerError::Bind)?;
        self.listener = Some(TcpListener::from_std(std_listener).map_err(ServerError::Bind)?);
        Ok(self)
    }

    /// Bound address, once bound.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }
}

impl<H> std::fmt::Debug for Server<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("filters", &self.builder.len())
            .field("backoff", &self.backoff)
            .field("bound", &self.listener.is_some())
            .finish_non_exhaustive()
    }
}
