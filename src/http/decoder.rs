//! The HTTP/1.x request decoder filter.
//!
//! Bytes are appended to a per-connection [`HttpContext`] and parsed as far
//! as they go. Exactly one request is in flight per connection: once a
//! request is complete, further bytes are buffered until the response has
//! been sent, at which point the context is reset and decoding resumes.
//! Bytes queued behind an unanswered request are capped by
//! [`DecoderConfig::max_pipelined`].
//! This keeps responses in request order without any queueing in the
//! decoder.

use bytes::{Buf, Bytes, BytesMut};
use tracing::debug;

use super::{
    HttpRequest,
    body::{BodyDecoder, decoder_for},
    head::{HeadDecoder, HeadPhase},
};
use crate::{
    codec::{DecoderContext, release_context, resume_context, with_context},
    config::DecoderConfig,
    error::ParseError,
    message::Message,
    metrics::{self, Protocol},
    pipeline::{Filter, FilterContext, FilterResult},
};

const CONTINUE: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\n";

/// Decoder progress for the current request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HttpState {
    /// Waiting for the first byte of a request.
    Init,
    /// Reading the request line.
    RequestLine,
    /// Reading header lines.
    Headers,
    /// Reading a `Content-Length` body.
    Body,
    /// The request was forwarded; waiting for its response to be sent.
    Complete,
}

enum Output {
    Continue,
    Request(HttpRequest),
}

/// Per-connection state of an [`HttpDecoder`].
pub struct HttpContext {
    state: HttpState,
    buffer: BytesMut,
    head: HeadDecoder,
    request: Option<HttpRequest>,
    body: Option<Box<dyn BodyDecoder>>,
    remaining: u64,
    keep_alive: bool,
}

impl HttpContext {
    fn new(config: &DecoderConfig) -> Self {
        Self {
            state: HttpState::Init,
            buffer: BytesMut::new(),
            head: HeadDecoder::new(config.get_max_line_length()),
            request: None,
            body: None,
            remaining: 0,
            keep_alive: true,
        }
    }

    /// Current decoder state.
    #[must_use]
    pub fn state(&self) -> HttpState { self.state }

    /// Bytes received but not yet consumed.
    #[must_use]
    pub fn buffered(&self) -> usize { self.buffer.len() }

    fn decode(&mut self, config: &DecoderConfig) -> Result<Vec<Output>, ParseError> {
        let mut out = Vec::new();
        loop {
            match self.state {
                HttpState::Init if self.buffer.is_empty() => break,
                HttpState::Init => self.state = HttpState::RequestLine,
                HttpState::RequestLine | HttpState::Headers => {
                    match self.head.decode(&mut self.buffer, config)? {
                        Some(request) => self.begin_body(request, config, &mut out)?,
                        None => {
                            self.state = match self.head.phase() {
                                HeadPhase::RequestLine => HttpState::RequestLine,
                                HeadPhase::Headers => HttpState::Headers,
                            };
                            break;
                        }
                    }
                }
                HttpState::Body => {
                    if !self.decode_body(&mut out)? {
                        break;
                    }
                }
                HttpState::Complete => break,
            }
        }
        Ok(out)
    }

    fn begin_body(
        &mut self,
        request: HttpRequest,
        config: &DecoderConfig,
        out: &mut Vec<Output>,
    ) -> Result<(), ParseError> {
        let headers = request.headers();
        if let Some(te) = headers.get("transfer-encoding") {
            return Err(ParseError::UnsupportedTransferEncoding(te.to_owned()));
        }
        match headers.get("content-encoding") {
            Some(ce) if !ce.trim().eq_ignore_ascii_case("identity") => {
                return Err(ParseError::UnsupportedContentEncoding(ce.to_owned()));
            }
            _ => {}
        }
        let length = content_length(&request)?;
        let limit = config.get_max_body_size();
        if length > limit {
            return Err(ParseError::BodyTooLarge {
                size: length,
                limit,
            });
        }
        self.keep_alive = request.keep_alive();
        if length == 0 {
            self.complete(request, out);
            return Ok(());
        }
        self.body = Some(decoder_for(&request, config)?);
        if self.buffer.is_empty() && request.headers().has_token("expect", "100-continue") {
            out.push(Output::Continue);
        }
        self.request = Some(request);
        self.remaining = length;
        self.state = HttpState::Body;
        Ok(())
    }

    /// Feed buffered body bytes to the body decoder. Returns whether any
    /// progress was made.
    fn decode_body(&mut self, out: &mut Vec<Output>) -> Result<bool, ParseError> {
        let (Some(body), Some(request)) = (self.body.as_mut(), self.request.as_mut()) else {
            return Err(ParseError::InvalidContentLength);
        };
        let buffered = self.buffer.len();
        let available = usize::try_from(self.remaining).map_or(buffered, |r| r.min(buffered));
        if available == 0 {
            return Ok(false);
        }
        let last = available as u64 == self.remaining;
        let consumed = body.decode(&self.buffer[..available], last, request)?;
        self.buffer.advance(consumed);
        self.remaining -= consumed as u64;
        if self.remaining == 0 {
            body.finish(request)?;
            self.body = None;
            if let Some(request) = self.request.take() {
                self.complete(request, out);
            }
        }
        Ok(consumed > 0)
    }

    fn complete(&mut self, request: HttpRequest, out: &mut Vec<Output>) {
        metrics::inc_decoded(Protocol::Http);
        self.state = HttpState::Complete;
        out.push(Output::Request(request));
    }
}

impl DecoderContext for HttpContext {
    fn reset(&mut self) {
        self.state = HttpState::Init;
        self.head.reset();
        self.request = None;
        self.body = None;
        self.remaining = 0;
        self.keep_alive = true;
    }

    fn release(&mut self) {
        self.reset();
        self.buffer = BytesMut::new();
    }
}

impl std::fmt::Debug for HttpContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpContext")
            .field("state", &self.state)
            .field("buffered", &self.buffer.len())
            .field("remaining", &self.remaining)
            .finish_non_exhaustive()
    }
}

fn content_length(request: &HttpRequest) -> Result<u64, ParseError> {
    let mut length = None;
    for value in request.headers().get_all("content-length") {
        let parsed: u64 = value
            .trim()
            .parse()
            .map_err(|_| ParseError::InvalidContentLength)?;
        if length.is_some_and(|l| l != parsed) {
            return Err(ParseError::InvalidContentLength);
        }
        length = Some(parsed);
    }
    Ok(length.unwrap_or(0))
}

/// Filter turning inbound bytes into [`Message::HttpRequest`]s.
///
/// Register it under a unique name; the name keys its per-connection state.
#[derive(Clone, Debug, Default)]
pub struct HttpDecoder {
    config: DecoderConfig,
}

impl HttpDecoder {
    /// Create a decoder with the given limits.
    #[must_use]
    pub fn new(config: DecoderConfig) -> Self { Self { config } }

    /// Decoder limits.
    #[must_use]
    pub fn config(&self) -> &DecoderConfig { &self.config }

    fn emit(ctx: &FilterContext<'_>, outputs: Vec<Output>) {
        for output in outputs {
            match output {
                Output::Continue => ctx.write(Message::Bytes(Bytes::from_static(CONTINUE))),
                Output::Request(request) => {
                    debug!(
                        connection = %ctx.connection().id(),
                        method = request.method(),
                        path = request.path(),
                        "decoded HTTP request"
                    );
                    ctx.fire_read(Message::HttpRequest(request));
                }
            }
        }
    }
}

impl Filter for HttpDecoder {
    fn on_read(&self, ctx: &FilterContext<'_>, message: Message) -> FilterResult {
        let Message::Bytes(bytes) = message else {
            ctx.fire_read(message);
            return Ok(());
        };
        let init = || HttpContext::new(&self.config);
        let outputs = with_context(ctx.connection(), ctx.name(), init, |state| {
            state.buffer.extend_from_slice(&bytes);
            let limit = self.config.get_max_pipelined();
            let result = if state.state == HttpState::Complete && state.buffer.len() > limit {
                Err(ParseError::PipelineOverflow { limit })
            } else {
                state.decode(&self.config)
            };
            let keep = result.is_ok();
            (result, keep)
        })?;
        Self::emit(ctx, outputs);
        Ok(())
    }

    fn on_send_complete(&self, ctx: &FilterContext<'_>) -> FilterResult {
        let connection = ctx.connection();
        let resumed = resume_context(connection, ctx.name(), |state: &mut HttpContext| {
            if state.state != HttpState::Complete {
                return (Ok(Vec::new()), true);
            }
            if !state.keep_alive {
                connection.close_after_flush();
                return (Ok(Vec::new()), false);
            }
            state.reset();
            let result = state.decode(&self.config);
            let keep = result.is_ok();
            (result, keep)
        });
        ctx.fire_send_complete();
        if let Some(outputs) = resumed {
            Self::emit(ctx, outputs?);
        }
        Ok(())
    }

    fn on_read_eof(&self, ctx: &FilterContext<'_>) -> FilterResult {
        release_context::<HttpContext>(ctx.connection(), ctx.name());
        ctx.fire_read_eof();
        Ok(())
    }

    fn on_close(&self, ctx: &FilterContext<'_>) -> FilterResult {
        release_context::<HttpContext>(ctx.connection(), ctx.name());
        ctx.fire_close();
        Ok(())
    }
}
