//! End-to-end WebSocket tests: upgrade, echo, control frames and close.

use std::sync::Arc;

use bytes::BytesMut;
use rstest::{fixture, rstest};
use wirechain::{
    ConnectionHandle,
    HandlerError,
    Message,
    PipelineBuilder,
    config::WebSocketConfig,
    websocket::{
        Opcode,
        WebSocketDecoder,
        WebSocketEncoder,
        WebSocketErrorRenderer,
        WsFrame,
        accept_key,
    },
};
use wirechain_testing::drive_chunks;

const KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";
const MASK: [u8; 4] = [0x37, 0xfa, 0x21, 0x3d];

#[fixture]
fn builder() -> PipelineBuilder {
    PipelineBuilder::new()
        .filter("ws-encoder", Arc::new(WebSocketEncoder))
        .and_then(|b| b.filter("ws", Arc::new(WebSocketDecoder::new(WebSocketConfig::default()))))
        .expect("unique names")
        .error_renderer(WebSocketErrorRenderer)
}

async fn echo(message: Message, conn: ConnectionHandle) -> Result<(), HandlerError> {
    if let Message::WebSocket(frame) = message {
        if matches!(frame.opcode, Opcode::Text | Opcode::Binary) {
            conn.write(frame)?;
        }
    }
    Ok(())
}

fn upgrade() -> Vec<u8> {
    format!(
        "GET /chat HTTP/1.1\r\nHost: example.com\r\nUpgrade: websocket\r\n\
Connection: Upgrade\r\nSec-WebSocket-Key: {KEY}\r\nSec-WebSocket-Version: 13\r\n\r\n"
    )
    .into_bytes()
}

fn client_frames(frames: &[WsFrame]) -> Vec<u8> {
    let mut buf = BytesMut::new();
    for frame in frames {
        frame.encode(&mut buf, Some(MASK));
    }
    buf.to_vec()
}

fn server_frames(frames: &[WsFrame]) -> Vec<u8> {
    let mut buf = BytesMut::new();
    for frame in frames {
        frame.encode(&mut buf, None);
    }
    buf.to_vec()
}

/// Split server output into the handshake response and the frame bytes.
fn split_handshake(out: &[u8]) -> (String, &[u8]) {
    let end = out
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|p| p + 4)
        .expect("complete handshake response");
    (
        String::from_utf8_lossy(&out[..end]).into_owned(),
        &out[end..],
    )
}

#[rstest]
#[case::single_chunk(usize::MAX)]
#[case::three_byte_chunks(3)]
#[case::byte_by_byte(1)]
#[tokio::test]
async fn data_frames_are_echoed(builder: PipelineBuilder, #[case] chunk: usize) {
    let mut input = upgrade();
    input.extend(client_frames(&[
        WsFrame::text("hello"),
        WsFrame::binary(vec![0u8; 300]),
    ]));
    let chunks = input.chunks(chunk.min(input.len())).map(<[u8]>::to_vec).collect();
    let out = drive_chunks(&builder, echo, chunks).await.expect("drive");

    let (response, frames) = split_handshake(&out);
    assert!(response.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
    assert!(response.contains(&format!("Sec-WebSocket-Accept: {}\r\n", accept_key(KEY))));
    assert_eq!(
        frames,
        server_frames(&[WsFrame::text("hello"), WsFrame::binary(vec![0u8; 300])])
    );
}

#[rstest]
#[tokio::test]
async fn ping_is_answered_and_close_ends_the_session(builder: PipelineBuilder) {
    let mut input = upgrade();
    input.extend(client_frames(&[
        WsFrame::ping("are you there"),
        WsFrame::close(1000, "bye"),
        WsFrame::text("too late"),
    ]));
    let out = drive_chunks(&builder, echo, vec![input]).await.expect("drive");

    let (_, frames) = split_handshake(&out);
    assert_eq!(
        frames,
        server_frames(&[WsFrame::pong("are you there"), WsFrame::close(1000, "")])
    );
}

#[rstest]
#[tokio::test]
async fn unmasked_client_frame_is_a_protocol_error(builder: PipelineBuilder) {
    let mut input = upgrade();
    input.extend(server_frames(&[WsFrame::text("naked")]));
    let out = drive_chunks(&builder, echo, vec![input]).await.expect("drive");

    let (_, frames) = split_handshake(&out);
    assert_eq!(frames[0], 0x88, "close frame");
    assert_eq!(u16::from_be_bytes([frames[2], frames[3]]), 1002);
}

#[rstest]
#[tokio::test]
async fn plain_http_request_gets_bad_request(builder: PipelineBuilder) {
    let out = drive_chunks(&builder, echo, vec![b"GET / HTTP/1.1\r\n\r\n".to_vec()])
        .await
        .expect("drive");
    assert!(String::from_utf8_lossy(&out).starts_with("HTTP/1.1 400 "));
}
