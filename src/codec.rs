//! Building blocks shared by the resumable protocol decoders.
//!
//! Decoders never block and accept input in chunks of any size, from one
//! byte to megabytes. Each decoder keeps its progress in a per-connection
//! [`DecoderContext`] stored in the connection's attribute store, so the
//! decoder filter itself stays a stateless singleton.
//!
//! - [`LineScanner`] finds CRLF/LF line boundaries with a persistent scan
//!   cursor and a maximum line length.
//! - [`SpillBuffer`] accumulates large payloads in memory and moves them to
//!   a temporary file once a threshold is crossed; the resulting [`Body`]
//!   deletes its file exactly once when dropped.

mod context;
mod line;
mod spill;

pub use context::{DecoderContext, release_context, resume_context, with_context};
pub use line::{Line, LineScanner, LineTooLong};
pub use spill::{Body, SpillBuffer, SpillFile};
