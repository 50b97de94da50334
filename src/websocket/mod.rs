//! WebSocket (RFC 6455) support.
//!
//! [`WebSocketDecoder`] performs the opening handshake and decodes client
//! frames; [`WebSocketEncoder`] serialises outbound frames. Extensions and
//! subprotocol negotiation are not supported.
//!
//! ```
//! use std::sync::Arc;
//!
//! use wirechain::{
//!     config::WebSocketConfig,
//!     pipeline::PipelineBuilder,
//!     websocket::{WebSocketDecoder, WebSocketEncoder, WebSocketErrorRenderer},
//! };
//!
//! let builder = PipelineBuilder::new()
//!     .filter("ws-encoder", Arc::new(WebSocketEncoder))?
//!     .filter("ws", Arc::new(WebSocketDecoder::new(WebSocketConfig::default())))?
//!     .error_renderer(WebSocketErrorRenderer);
//! assert_eq!(builder.len(), 2);
//! # Ok::<(), wirechain::error::PipelineError>(())
//! ```

mod decoder;
mod encoder;
mod frame;
mod handshake;
#[cfg(test)]
mod tests;

pub use decoder::{WebSocketContext, WebSocketDecoder};
pub use encoder::{WebSocketEncoder, WebSocketErrorRenderer};
pub use frame::{MAX_CONTROL_PAYLOAD, Opcode, WsFrame};
pub use handshake::accept_key;
