//! The WebSocket decoder filter: opening handshake, then RFC 6455 frames.
//!
//! Every header field is read through a small scratch area, so a frame may
//! arrive split at any byte and decoding resumes where it left off.

use bytes::{Buf, Bytes, BytesMut};
use tracing::debug;

use super::{
    frame::{MAX_CONTROL_PAYLOAD, Opcode, WsFrame},
    handshake,
};
use crate::{
    codec::{DecoderContext, release_context, with_context},
    config::{DecoderConfig, WebSocketConfig},
    error::ParseError,
    http::{HeadDecoder, HttpRequest},
    message::Message,
    metrics::{self, Protocol},
    pipeline::{Filter, FilterContext, FilterResult},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Stage {
    Header,
    Length,
    ExtendedLength,
    MaskKey,
    Payload,
}

enum Output {
    Open { reply: Bytes, request: HttpRequest },
    Frame(WsFrame),
}

/// Per-connection state of a [`WebSocketDecoder`].
pub struct WebSocketContext {
    handshake: Option<HeadDecoder>,
    closed: bool,
    buffer: BytesMut,
    stage: Stage,
    fin: bool,
    opcode: Opcode,
    masked: bool,
    scratch: [u8; 8],
    filled: usize,
    needed: usize,
    mask: [u8; 4],
    length: u64,
    payload: BytesMut,
    fragmented: bool,
}

impl WebSocketContext {
    fn new(http: &DecoderConfig) -> Self {
        Self {
            handshake: Some(HeadDecoder::new(http.get_max_line_length())),
            closed: false,
            buffer: BytesMut::new(),
            stage: Stage::Header,
            fin: true,
            opcode: Opcode::Binary,
            masked: false,
            scratch: [0; 8],
            filled: 0,
            needed: 0,
            mask: [0; 4],
            length: 0,
            payload: BytesMut::new(),
            fragmented: false,
        }
    }

    /// Whether the opening handshake has completed.
    #[must_use]
    pub fn is_open(&self) -> bool { self.handshake.is_none() }

    /// Whether a close frame has been received.
    #[must_use]
    pub fn is_closed(&self) -> bool { self.closed }

    fn decode(
        &mut self,
        http: &DecoderConfig,
        ws: &WebSocketConfig,
    ) -> Result<Vec<Output>, ParseError> {
        let mut out = Vec::new();
        if let Some(head) = self.handshake.as_mut() {
            let Some(request) = head.decode(&mut self.buffer, http)? else {
                return Ok(out);
            };
            let reply = handshake::switching_protocols(handshake::validate(&request)?);
            self.handshake = None;
            out.push(Output::Open { reply, request });
        }
        while !self.closed {
            match self.stage {
                Stage::Header => {
                    let Some(&byte) = self.buffer.first() else { break };
                    self.buffer.advance(1);
                    self.start_frame(byte)?;
                }
                Stage::Length => {
                    let Some(&byte) = self.buffer.first() else { break };
                    self.buffer.advance(1);
                    self.read_length(byte, ws)?;
                }
                Stage::ExtendedLength => {
                    if !self.fill_scratch() {
                        break;
                    }
                    let length = self.scratch[..self.needed]
                        .iter()
                        .fold(0u64, |acc, &b| acc << 8 | u64::from(b));
                    self.set_length(length, ws)?;
                }
                Stage::MaskKey => {
                    if !self.fill_scratch() {
                        break;
                    }
                    self.mask.copy_from_slice(&self.scratch[..4]);
                    self.stage = Stage::Payload;
                }
                Stage::Payload => {
                    let received = self.payload.len();
                    let remaining = self.length - received as u64;
                    if remaining == 0 {
                        out.push(Output::Frame(self.finish_frame()));
                        continue;
                    }
                    if self.buffer.is_empty() {
                        break;
                    }
                    let take = usize::try_from(remaining)
                        .map_or(self.buffer.len(), |r| r.min(self.buffer.len()));
                    let chunk = self.buffer.split_to(take);
                    if self.masked {
                        let mask = self.mask;
                        self.payload.extend(
                            chunk
                                .iter()
                                .enumerate()
                                .map(|(i, b)| b ^ mask[(received + i) % 4]),
                        );
                    } else {
                        self.payload.extend_from_slice(&chunk);
                    }
                }
            }
        }
        if self.closed {
            self.buffer.clear();
        }
        Ok(out)
    }

    fn start_frame(&mut self, byte: u8) -> Result<(), ParseError> {
        if byte & 0x70 != 0 {
            return Err(ParseError::ReservedBits);
        }
        let code = byte & 0x0F;
        let opcode = Opcode::from_u8(code).ok_or(ParseError::InvalidOpcode(code))?;
        let fin = byte & 0x80 != 0;
        if opcode.is_control() {
            if !fin {
                return Err(ParseError::InvalidControlFrame);
            }
        } else {
            match (opcode, self.fragmented) {
                (Opcode::Continuation, false) => return Err(ParseError::InvalidOpcode(code)),
                (Opcode::Text | Opcode::Binary, true) => {
                    return Err(ParseError::InvalidOpcode(code));
                }
                _ => {}
            }
            self.fragmented = !fin;
        }
        self.fin = fin;
        self.opcode = opcode;
        self.stage = Stage::Length;
        Ok(())
    }

    fn read_length(&mut self, byte: u8, ws: &WebSocketConfig) -> Result<(), ParseError> {
        self.masked = byte & 0x80 != 0;
        if !self.masked && ws.require_mask {
            return Err(ParseError::UnmaskedFrame);
        }
        let short = byte & 0x7F;
        if self.opcode.is_control() && usize::from(short) > MAX_CONTROL_PAYLOAD {
            return Err(ParseError::InvalidControlFrame);
        }
        // A close body is either empty or starts with a two-byte code.
        if self.opcode == Opcode::Close && short == 1 {
            return Err(ParseError::InvalidControlFrame);
        }
        match short {
            126 => self.expect_scratch(Stage::ExtendedLength, 2),
            127 => self.expect_scratch(Stage::ExtendedLength, 8),
            len => self.set_length(u64::from(len), ws)?,
        }
        Ok(())
    }

    fn set_length(&mut self, length: u64, ws: &WebSocketConfig) -> Result<(), ParseError> {
        if length > ws.max_payload {
            return Err(ParseError::FrameTooLarge {
                size: length,
                limit: ws.max_payload,
            });
        }
        self.length = length;
        self.payload
            .reserve(usize::try_from(length).map_or(64 * 1024, |l| l.min(64 * 1024)));
        if self.masked {
            self.expect_scratch(Stage::MaskKey, 4);
        } else {
            self.stage = Stage::Payload;
        }
        Ok(())
    }

    fn expect_scratch(&mut self, stage: Stage, needed: usize) {
        self.stage = stage;
        self.needed = needed;
        self.filled = 0;
    }

    /// Copy buffered bytes into the scratch area; `true` once it is full.
    fn fill_scratch(&mut self) -> bool {
        let take = (self.needed - self.filled).min(self.buffer.len());
        self.scratch[self.filled..self.filled + take].copy_from_slice(&self.buffer[..take]);
        self.buffer.advance(take);
        self.filled += take;
        self.filled == self.needed
    }

    fn finish_frame(&mut self) -> WsFrame {
        let frame = WsFrame {
            fin: self.fin,
            opcode: self.opcode,
            payload: self.payload.split().freeze(),
        };
        self.closed = frame.opcode == Opcode::Close;
        self.reset();
        frame
    }
}

impl DecoderContext for WebSocketContext {
    fn reset(&mut self) {
        self.stage = Stage::Header;
        self.filled = 0;
        self.needed = 0;
        self.length = 0;
        self.payload.clear();
    }

    fn release(&mut self) {
        self.reset();
        self.handshake = None;
        self.closed = true;
        self.buffer = BytesMut::new();
        self.payload = BytesMut::new();
    }
}

impl std::fmt::Debug for WebSocketContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketContext")
            .field("open", &self.is_open())
            .field("closed", &self.closed)
            .field("stage", &self.stage)
            .field("buffered", &self.buffer.len())
            .finish_non_exhaustive()
    }
}

/// Filter performing the WebSocket upgrade and decoding client frames.
///
/// The upgrade request is answered with `101 Switching Protocols` and
/// forwarded as [`Message::WebSocketOpen`]; every later frame is forwarded
/// as [`Message::WebSocket`]. Pings are answered automatically when
/// [`WebSocketConfig::auto_pong`] is set. A close frame is forwarded, echoed
/// and the connection closes once the echo is flushed.
///
/// Place a [`super::WebSocketEncoder`] before it in the chain.
#[derive(Clone, Debug, Default)]
pub struct WebSocketDecoder {
    http: DecoderConfig,
    config: WebSocketConfig,
}

impl WebSocketDecoder {
    /// Create a decoder with the given frame limits.
    #[must_use]
    pub fn new(config: WebSocketConfig) -> Self {
        Self {
            http: DecoderConfig::default(),
            config,
        }
    }

    /// Limits applied to the opening handshake request.
    #[must_use]
    pub fn handshake_config(mut self, http: DecoderConfig) -> Self {
        self.http = http;
        self
    }

    /// Frame limits.
    #[must_use]
    pub fn config(&self) -> &WebSocketConfig { &self.config }

    fn emit(&self, ctx: &FilterContext<'_>, outputs: Vec<Output>) {
        for output in outputs {
            match output {
                Output::Open { reply, request } => {
                    debug!(
                        connection = %ctx.connection().id(),
                        path = request.path(),
                        "websocket upgrade accepted"
                    );
                    ctx.write(Message::Bytes(reply));
                    ctx.fire_read(Message::WebSocketOpen(request));
                }
                Output::Frame(frame) => self.emit_frame(ctx, frame),
            }
        }
    }

    fn emit_frame(&self, ctx: &FilterContext<'_>, frame: WsFrame) {
        metrics::inc_decoded(Protocol::WebSocket);
        match frame.opcode {
            Opcode::Ping if self.config.auto_pong => {
                ctx.write(Message::WebSocket(WsFrame::pong(frame.payload)));
            }
            Opcode::Close => {
                let code_len = frame.payload.len().min(2);
                let echo = WsFrame::new(Opcode::Close, frame.payload.slice(..code_len));
                debug!(
                    connection = %ctx.connection().id(),
                    code = frame.close_code(),
                    "websocket close received"
                );
                ctx.fire_read(Message::WebSocket(frame));
                ctx.write(Message::WebSocket(echo));
                ctx.connection().close_after_flush();
            }
            _ => ctx.fire_read(Message::WebSocket(frame)),
        }
    }
}

impl Filter for WebSocketDecoder {
    fn on_read(&self, ctx: &FilterContext<'_>, message: Message) -> FilterResult {
        let Message::Bytes(bytes) = message else {
            ctx.fire_read(message);
            return Ok(());
        };
        let init = || WebSocketContext::new(&self.http);
        let outputs = with_context(ctx.connection(), ctx.name(), init, |state| {
            if state.closed {
                return (Ok(Vec::new()), true);
            }
            state.buffer.extend_from_slice(&bytes);
            let result = state.decode(&self.http, &self.config);
            let keep = result.is_ok();
            (result, keep)
        })?;
        self.emit(ctx, outputs);
        Ok(())
    }

    fn on_read_eof(&self, ctx: &FilterContext<'_>) -> FilterResult {
        release_context::<WebSocketContext>(ctx.connection(), ctx.name());
        ctx.fire_read_eof();
        Ok(())
    }

    fn on_close(&self, ctx: &FilterContext<'_>) -> FilterResult {
        release_context::<WebSocketContext>(ctx.connection(), ctx.name());
        ctx.fire_close();
        Ok(())
    }
}
