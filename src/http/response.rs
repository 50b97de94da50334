//! HTTP responses and the encoder filter that serialises them.

use std::fmt::Write as _;

use bytes::{BufMut, Bytes, BytesMut};

use super::{Headers, Version};
use crate::{
    error::PipelineError,
    message::Message,
    pipeline::{ErrorRenderer, Filter, FilterContext, FilterResult},
};

/// Canonical reason phrase for common status codes.
#[must_use]
pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        100 => "Continue",
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        413 => "Payload Too Large",
        414 => "URI Too Long",
        415 => "Unsupported Media Type",
        431 => "Request Header Fields Too Large",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        503 => "Service Unavailable",
        505 => "HTTP Version Not Supported",
        _ => "Unknown",
    }
}

/// An HTTP/1.1 response waiting to be encoded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpResponse {
    status: u16,
    version: Version,
    headers: Headers,
    body: Bytes,
}

impl HttpResponse {
    /// Create an empty response with `status`.
    #[must_use]
    pub fn new(status: u16) -> Self {
        Self {
            status,
            version: Version::Http11,
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// `200 OK` with an empty body.
    #[must_use]
    pub fn ok() -> Self { Self::new(200) }

    /// Response with a `text/plain` body.
    #[must_use]
    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self::new(status)
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(body.into())
    }

    /// Append a header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Replace the body.
    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Respond with the protocol version of the request.
    #[must_use]
    pub fn version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    /// Ask for the connection to close once this response is sent.
    #[must_use]
    pub fn close(mut self) -> Self {
        self.headers.set("Connection", "close");
        self
    }

    /// Status code.
    #[must_use]
    pub fn status(&self) -> u16 { self.status }

    /// Response headers.
    #[must_use]
    pub fn headers(&self) -> &Headers { &self.headers }

    /// Response body.
    #[must_use]
    pub fn body_bytes(&self) -> &Bytes { &self.body }

    /// Whether the connection must close after this response.
    #[must_use]
    pub fn closes_connection(&self) -> bool { self.headers.has_token("connection", "close") }

    /// Serialise status line, headers and body into `dst`.
    ///
    /// `Content-Length` is added unless already present or the status
    /// forbids a body.
    pub fn encode(&self, dst: &mut BytesMut) {
        let mut head = String::with_capacity(128);
        let _ = write!(
            head,
            "{} {} {}\r\n",
            self.version,
            self.status,
            reason_phrase(self.status)
        );
        for (name, value) in self.headers.iter() {
            let _ = write!(head, "{name}: {value}\r\n");
        }
        let bodiless = self.status < 200 || self.status == 204 || self.status == 304;
        if !bodiless && !self.headers.contains("content-length") {
            let _ = write!(head, "Content-Length: {}\r\n", self.body.len());
        }
        head.push_str("\r\n");
        dst.reserve(head.len() + self.body.len());
        dst.put_slice(head.as_bytes());
        if !bodiless {
            dst.put_slice(&self.body);
        }
    }
}

/// Encodes [`Message::HttpResponse`] into bytes on the way to the socket.
///
/// A response carrying `Connection: close` closes the connection once it has
/// been flushed. Other messages pass through unchanged.
#[derive(Clone, Copy, Debug, Default)]
pub struct HttpResponseEncoder;

impl Filter for HttpResponseEncoder {
    fn on_write(&self, ctx: &FilterContext<'_>, message: Message) -> FilterResult {
        let Message::HttpResponse(response) = message else {
            ctx.write(message);
            return Ok(());
        };
        let mut dst = BytesMut::new();
        response.encode(&mut dst);
        if response.closes_connection() {
            ctx.connection().close_after_flush();
        }
        ctx.write(Message::Bytes(dst.freeze()));
        Ok(())
    }
}

/// Renders pipeline errors as short `text/plain` HTTP responses.
///
/// Decoder errors use their protocol status; handler failures and panics
/// become `500`. Transport errors are not answered.
#[derive(Clone, Copy, Debug, Default)]
pub struct HttpErrorRenderer;

impl ErrorRenderer for HttpErrorRenderer {
    fn render(&self, error: &PipelineError) -> Option<Message> {
        let status = match error {
            PipelineError::Parse(e) => e.status(),
            PipelineError::Io(_) | PipelineError::Closed => return None,
            _ => 500,
        };
        let body = format!("{status} {}\n", reason_phrase(status));
        Some(Message::HttpResponse(HttpResponse::text(status, body).close()))
    }
}
