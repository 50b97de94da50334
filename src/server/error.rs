//! Errors raised by [`super::Server`] operations.

use std::io;

use thiserror::Error;

/// Errors that may occur while binding or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Binding the listening socket failed.
    #[error("bind error: {0}")]
    Bind(#[source] io::Error),

    /// `run` was called before `bind`.
    #[error("server is not bound to a listener")]
    NotBound,
}
