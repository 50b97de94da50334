//! Error types shared by the filter chain and the protocol decoders.
//!
//! Decoders raise a [`ParseError`] that carries the protocol status to
//! report back to the peer. Everything travelling through the chain's error
//! event is a [`PipelineError`].
//!
//! # Error Categories
//!
//! - [`ParseError`]: malformed or unsupported input, plus resource failures (spill-file writes)
//!   that surface while decoding.
//! - [`HandlerError`]: failures raised by application handlers, including offloaded ones.
//! - [`PipelineError`]: top-level enum dispatched through [`crate::pipeline::Filter::on_error`].

use std::{borrow::Cow, io};

use thiserror::Error;

/// Malformed input detected by a resumable decoder.
///
/// Every variant maps to an HTTP status via [`ParseError::status`] and to a
/// WebSocket close code via [`ParseError::close_code`].
///
/// # Examples
///
/// ```
/// use wirechain::error::ParseError;
///
/// let err = ParseError::HeaderLineTooLong { limit: 8192 };
/// assert_eq!(err.status(), 431);
/// assert!(err.is_malformed_input());
/// ```
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// The request line exceeded the configured maximum line length.
    #[error("request line exceeds {limit} bytes")]
    RequestLineTooLong {
        /// Configured maximum line length.
        limit: usize,
    },

    /// A header line exceeded the configured maximum line length.
    #[error("header line exceeds {limit} bytes")]
    HeaderLineTooLong {
        /// Configured maximum line length.
        limit: usize,
    },

    /// The request line could not be split into method, target and version.
    #[error("malformed request line")]
    MalformedRequestLine,

    /// The protocol version is not HTTP/1.0 or HTTP/1.1.
    #[error("unsupported HTTP version: {0}")]
    UnsupportedVersion(String),

    /// A header line had no colon or an empty name.
    #[error("malformed header line")]
    MalformedHeader,

    /// More header lines than allowed.
    #[error("more than {limit} header lines")]
    TooManyHeaders {
        /// Configured header ceiling.
        limit: usize,
    },

    /// `Content-Length` was missing digits, duplicated with different values, or overflowed.
    #[error("invalid content-length")]
    InvalidContentLength,

    /// The declared body exceeds the configured ceiling.
    #[error("body of {size} bytes exceeds limit of {limit}")]
    BodyTooLarge {
        /// Declared body length.
        size: u64,
        /// Configured ceiling.
        limit: u64,
    },

    /// Too many bytes arrived while a request was awaiting its response.
    #[error("more than {limit} bytes pipelined behind an unanswered request")]
    PipelineOverflow {
        /// Configured pipelining ceiling.
        limit: usize,
    },

    /// A transfer coding other than identity was requested.
    #[error("unsupported transfer-encoding: {0}")]
    UnsupportedTransferEncoding(String),

    /// A content coding other than identity was requested.
    #[error("unsupported content-encoding: {0}")]
    UnsupportedContentEncoding(String),

    /// `multipart/form-data` without a usable boundary parameter.
    #[error("multipart boundary missing or invalid")]
    MissingBoundary,

    /// Structural violation inside a multipart body.
    #[error("malformed multipart body: {0}")]
    MalformedMultipart(Cow<'static, str>),

    /// A form carried more fields than allowed.
    #[error("more than {limit} form fields")]
    TooManyFields {
        /// Configured field ceiling.
        limit: usize,
    },

    /// The body could not be decoded as JSON.
    #[error("invalid JSON body: {0}")]
    InvalidJson(String),

    /// The WebSocket upgrade request was not acceptable.
    #[error("invalid websocket handshake: {0}")]
    InvalidHandshake(&'static str),

    /// A frame used an opcode reserved by RFC 6455.
    #[error("reserved websocket opcode {0:#x}")]
    InvalidOpcode(u8),

    /// A frame set RSV bits without a negotiated extension.
    #[error("reserved websocket bits set")]
    ReservedBits,

    /// A client frame arrived without a masking key.
    #[error("client frame is not masked")]
    UnmaskedFrame,

    /// A control frame was fragmented or carried more than 125 bytes.
    #[error("invalid control frame")]
    InvalidControlFrame,

    /// A frame payload exceeded the configured ceiling.
    #[error("frame payload of {size} bytes exceeds limit of {limit}")]
    FrameTooLarge {
        /// Declared payload length.
        size: u64,
        /// Configured ceiling.
        limit: u64,
    },

    /// Writing spilled content to disk failed.
    #[error("spill file error: {0}")]
    Spill(#[source] io::Error),
}

impl ParseError {
    /// HTTP status code used when rendering an error response.
    ///
    /// | Error | Status |
    /// |-------|--------|
    /// | `RequestLineTooLong` | 414 |
    /// | `HeaderLineTooLong`, `TooManyHeaders` | 431 |
    /// | `UnsupportedVersion` | 505 |
    /// | `BodyTooLarge`, `TooManyFields`, `FrameTooLarge`, `PipelineOverflow` | 413 |
    /// | `UnsupportedTransferEncoding` | 501 |
    /// | `UnsupportedContentEncoding` | 415 |
    /// | `Spill` | 500 |
    /// | everything else | 400 |
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            Self::RequestLineTooLong { .. } => 414,
            Self::HeaderLineTooLong { .. } | Self::TooManyHeaders { .. } => 431,
            Self::UnsupportedVersion(_) => 505,
            Self::BodyTooLarge { .. }
            | Self::TooManyFields { .. }
            | Self::FrameTooLarge { .. }
            | Self::PipelineOverflow { .. } => 413,
            Self::UnsupportedTransferEncoding(_) => 501,
            Self::UnsupportedContentEncoding(_) => 415,
            Self::Spill(_) => 500,
            _ => 400,
        }
    }

    /// WebSocket close code used when failing a WebSocket connection.
    #[must_use]
    pub fn close_code(&self) -> u16 {
        match self {
            Self::FrameTooLarge { .. } => 1009,
            Self::Spill(_) => 1011,
            _ => 1002,
        }
    }

    /// Returns `true` for errors caused by the peer's bytes rather than local resources.
    #[must_use]
    pub fn is_malformed_input(&self) -> bool { !matches!(self, Self::Spill(_)) }
}

/// Error produced by an application handler.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// An offloaded handler panicked instead of returning.
#[derive(Debug, Error)]
#[error("handler panicked: {0}")]
pub struct HandlerPanicked(pub String);

/// Errors dispatched through the filter chain's error event.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PipelineError {
    /// A decoder rejected the inbound bytes.
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// Transport I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// An application handler failed.
    #[error("handler error: {0}")]
    Handler(#[source] HandlerError),

    /// A filter callback panicked.
    #[error("filter `{filter}` panicked: {message}")]
    Panicked {
        /// Name of the filter whose callback panicked.
        filter: String,
        /// Formatted panic payload.
        message: String,
    },

    /// A message reached the head of the chain without being encoded to bytes.
    #[error("outbound {kind} message reached the chain head unencoded")]
    UnencodedOutbound {
        /// Kind of the offending message.
        kind: &'static str,
    },

    /// A message of an unexpected kind reached a filter.
    #[error("filter `{filter}` cannot handle {kind} messages")]
    UnexpectedMessage {
        /// Name of the rejecting filter.
        filter: String,
        /// Kind of the offending message.
        kind: &'static str,
    },

    /// A filter with the same name is already registered.
    #[error("filter name `{0}` is already registered")]
    DuplicateName(String),

    /// No filter with the given name is registered.
    #[error("no filter named `{0}`")]
    UnknownName(String),

    /// The connection is closed.
    #[error("connection closed")]
    Closed,
}

impl PipelineError {
    /// Returns the parse error when this error originated in a decoder.
    #[must_use]
    pub fn as_parse(&self) -> Option<&ParseError> {
        match self {
            Self::Parse(e) => Some(e),
            _ => None,
        }
    }

    /// Returns the error category as a string for logging and metrics.
    #[must_use]
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Parse(_) => "parse",
            Self::Io(_) => "io",
            Self::Handler(_) => "handler",
            Self::Panicked { .. } => "panic",
            Self::UnencodedOutbound { .. } | Self::UnexpectedMessage { .. } => "message",
            Self::DuplicateName(_) | Self::UnknownName(_) => "pipeline",
            Self::Closed => "closed",
        }
    }
}
