//! Messages flowing through the filter chain.
//!
//! Raw [`Message::Bytes`] enter at the head, decoders turn them into typed
//! messages, and encoders turn typed outbound messages back into bytes
//! before they reach the head.

use std::{any::Any, fmt};

use bytes::Bytes;

use crate::{
    http::{HttpRequest, HttpResponse},
    websocket::WsFrame,
};

/// A unit of data dispatched through a [`crate::pipeline::Pipeline`].
pub enum Message {
    /// Raw bytes: inbound socket data or fully encoded outbound data.
    Bytes(Bytes),
    /// A fully decoded HTTP request.
    HttpRequest(HttpRequest),
    /// An HTTP response waiting to be encoded.
    HttpResponse(HttpResponse),
    /// A WebSocket upgrade that has been accepted; carries the upgrade request.
    WebSocketOpen(HttpRequest),
    /// A complete WebSocket frame, inbound or outbound.
    WebSocket(WsFrame),
    /// Application-defined payload for custom filters.
    Other(Box<dyn Any + Send>),
}

impl Message {
    /// Short name of the message kind for logs and errors.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Bytes(_) => "bytes",
            Self::HttpRequest(_) => "http-request",
            Self::HttpResponse(_) => "http-response",
            Self::WebSocketOpen(_) => "websocket-open",
            Self::WebSocket(_) => "websocket-frame",
            Self::Other(_) => "other",
        }
    }

    /// Returns the decoded request, if this is one.
    #[must_use]
    pub fn into_http_request(self) -> Option<HttpRequest> {
        match self {
            Self::HttpRequest(req) => Some(req),
            _ => None,
        }
    }

    /// Returns the WebSocket frame, if this is one.
    #[must_use]
    pub fn into_frame(self) -> Option<WsFrame> {
        match self {
            Self::WebSocket(frame) => Some(frame),
            _ => None,
        }
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            Self::HttpRequest(r) => f.debug_tuple("HttpRequest").field(r).finish(),
            Self::HttpResponse(r) => f.debug_tuple("HttpResponse").field(r).finish(),
            Self::WebSocketOpen(r) => f.debug_tuple("WebSocketOpen").field(&r.path()).finish(),
            Self::WebSocket(frame) => f.debug_tuple("WebSocket").field(frame).finish(),
            Self::Other(_) => f.write_str("Other(..)"),
        }
    }
}

impl From<Bytes> for Message {
    fn from(value: Bytes) -> Self { Self::Bytes(value) }
}

impl From<HttpResponse> for Message {
    fn from(value: HttpResponse) -> Self { Self::HttpResponse(value) }
}

impl From<WsFrame> for Message {
    fn from(value: WsFrame) -> Self { Self::WebSocket(value) }
}
