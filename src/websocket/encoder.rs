use bytes::BytesMut;

use super::frame::{Opcode, WsFrame};
use crate::{
    error::{ParseError, PipelineError},
    http::HttpResponse,
    message::Message,
    pipeline::{ErrorRenderer, Filter, FilterContext, FilterResult},
};

/// Encodes outbound [`Message::WebSocket`] frames, unmasked as a server
/// must send them.
///
/// Writing a close frame closes the connection once it has been flushed.
#[derive(Clone, Copy, Debug, Default)]
pub struct WebSocketEncoder;

impl Filter for WebSocketEncoder {
    fn on_write(&self, ctx: &FilterContext<'_>, message: Message) -> FilterResult {
        let Message::WebSocket(frame) = message else {
            ctx.write(message);
            return Ok(());
        };
        let mut dst = BytesMut::new();
        frame.encode(&mut dst, None);
        if frame.opcode == Opcode::Close {
            ctx.connection().close_after_flush();
        }
        ctx.write(Message::Bytes(dst.freeze()));
        Ok(())
    }
}

fn is_frame_error(error: &ParseError) -> bool {
    matches!(
        error,
        ParseError::InvalidOpcode(_)
            | ParseError::ReservedBits
            | ParseError::UnmaskedFrame
            | ParseError::InvalidControlFrame
            | ParseError::FrameTooLarge { .. }
    )
}

/// Fails a WebSocket connection with a close frame.
///
/// Frame violations use their close code (`1002` or `1009`); handler
/// failures and panics use `1011`. A rejected upgrade request is answered
/// with an already-encoded HTTP error instead, since the peer is not yet
/// speaking WebSocket.
#[derive(Clone, Copy, Debug, Default)]
pub struct WebSocketErrorRenderer;

impl ErrorRenderer for WebSocketErrorRenderer {
    fn render(&self, error: &PipelineError) -> Option<Message> {
        match error {
            PipelineError::Io(_) | PipelineError::Closed => None,
            PipelineError::Parse(e) if is_frame_error(e) => {
                Some(Message::WebSocket(WsFrame::close(e.close_code(), &e.to_string())))
            }
            PipelineError::Parse(e) => {
                let status = e.status();
                let mut dst = BytesMut::new();
                HttpResponse::text(status, format!("{e}\n")).close().encode(&mut dst);
                Some(Message::Bytes(dst.freeze()))
            }
            _ => Some(Message::WebSocket(WsFrame::close(1011, "internal error"))),
        }
    }
}
