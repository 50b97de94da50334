//! Chain-level tests for the upgrade and frame decoding.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use proptest::prelude::*;
use rstest::{fixture, rstest};

use super::{Opcode, WebSocketDecoder, WebSocketEncoder, WebSocketErrorRenderer, WsFrame};
use crate::{
    config::WebSocketConfig,
    connection::{Connection, ConnectionHandle},
    message::Message,
    pipeline::{Pipeline, PipelineBuilder},
};

const UPGRADE: &[u8] = b"GET /chat HTTP/1.1\r\n\
    Host: server.example.com\r\n\
    Upgrade: websocket\r\n\
    Connection: Upgrade\r\n\
    Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
    Sec-WebSocket-Version: 13\r\n\r\n";

const MASK: [u8; 4] = [0x37, 0xfa, 0x21, 0x3d];

fn pipeline_with(config: WebSocketConfig) -> Pipeline {
    PipelineBuilder::new()
        .filter("ws-encoder", Arc::new(WebSocketEncoder))
        .expect("unique")
        .filter("ws", Arc::new(WebSocketDecoder::new(config)))
        .expect("unique")
        .error_renderer(WebSocketErrorRenderer)
        .build(Connection::detached())
}

/// A pipeline whose handshake has completed and whose outbound queue is empty.
#[fixture]
fn open() -> Pipeline {
    let pipeline = pipeline_with(WebSocketConfig::default());
    feed(&pipeline, UPGRADE);
    let conn = pipeline.connection();
    assert!(matches!(conn.next_delivered(), Some(Message::WebSocketOpen(_))));
    conn.drain_outbound();
    pipeline
}

fn feed(pipeline: &Pipeline, chunk: &[u8]) {
    pipeline.fire_read(Message::Bytes(Bytes::copy_from_slice(chunk)));
}

fn client_frame(frame: &WsFrame) -> Vec<u8> {
    let mut dst = BytesMut::new();
    frame.encode(&mut dst, Some(MASK));
    dst.to_vec()
}

fn next_frame(conn: &ConnectionHandle) -> Option<WsFrame> {
    conn.next_delivered().and_then(Message::into_frame)
}

fn outbound(conn: &ConnectionHandle) -> Vec<u8> { conn.drain_outbound().concat() }

#[test]
fn upgrade_and_first_frame_in_one_chunk() {
    let pipeline = pipeline_with(WebSocketConfig::default());
    let conn = pipeline.connection().clone();
    let mut bytes = UPGRADE.to_vec();
    bytes.extend(client_frame(&WsFrame::text("hello")));
    feed(&pipeline, &bytes);

    let reply = String::from_utf8(outbound(&conn)).expect("ascii reply");
    assert!(reply.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
    assert!(reply.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
    match conn.next_delivered() {
        Some(Message::WebSocketOpen(req)) => assert_eq!(req.path(), "/chat"),
        other => panic!("expected open, got {other:?}"),
    }
    let frame = next_frame(&conn).expect("text frame");
    assert_eq!(frame.opcode, Opcode::Text);
    assert_eq!(frame.as_text(), Some("hello"));
}

#[test]
fn invalid_upgrade_gets_http_400() {
    let pipeline = pipeline_with(WebSocketConfig::default());
    let conn = pipeline.connection().clone();
    feed(&pipeline, b"GET /chat HTTP/1.1\r\nUpgrade: websocket\r\n\r\n");
    assert!(outbound(&conn).starts_with(b"HTTP/1.1 400 Bad Request\r\n"));
    assert!(conn.should_close());
    assert!(conn.next_delivered().is_none());
}

#[rstest]
fn ping_is_answered_without_forwarding(open: Pipeline) {
    let conn = open.connection().clone();
    feed(&open, &client_frame(&WsFrame::ping("ping")));
    assert_eq!(outbound(&conn), b"\x8a\x04ping");
    assert!(conn.next_delivered().is_none());
}

#[rstest]
fn close_is_forwarded_echoed_and_closes(open: Pipeline) {
    let conn = open.connection().clone();
    let mut bytes = client_frame(&WsFrame::close(1000, "bye"));
    bytes.extend(client_frame(&WsFrame::text("ignored")));
    feed(&open, &bytes);

    let frame = next_frame(&conn).expect("close forwarded");
    assert_eq!(frame.close_code(), Some(1000));
    assert!(conn.next_delivered().is_none(), "frames after close are dropped");
    assert_eq!(outbound(&conn), [0x88u8, 0x02, 0x03, 0xe8]);
    assert!(conn.should_close());
}

#[rstest]
fn unmasked_frame_fails_with_1002(open: Pipeline) {
    let conn = open.connection().clone();
    let mut bytes = BytesMut::new();
    WsFrame::text("hi").encode(&mut bytes, None);
    feed(&open, &bytes);

    let sent = outbound(&conn);
    assert_eq!(sent[0], 0x88);
    assert_eq!(&sent[2..4], &1002u16.to_be_bytes());
    assert!(conn.should_close());
}

#[test]
fn oversized_frame_fails_with_1009() {
    let pipeline = pipeline_with(WebSocketConfig {
        max_payload: 16,
        ..WebSocketConfig::default()
    });
    let conn = pipeline.connection().clone();
    feed(&pipeline, UPGRADE);
    conn.drain_outbound();
    feed(&pipeline, &client_frame(&WsFrame::binary(vec![0u8; 17])));

    let sent = outbound(&conn);
    assert_eq!(&sent[2..4], &1009u16.to_be_bytes());
    assert!(conn.should_close());
}

#[rstest]
#[case::reserved_bits(&[0xC1, 0x80])]
#[case::reserved_opcode(&[0x83, 0x80])]
#[case::fragmented_ping(&[0x09, 0x80])]
#[case::long_ping(&[0x89, 0xFE, 0x00, 0x7E])]
#[case::orphan_continuation(&[0x80, 0x80])]
#[case::one_byte_close(&[0x88, 0x81, 0x37, 0xfa, 0x21, 0x3d, 0x34])]
fn protocol_violations_fail_with_1002(open: Pipeline, #[case] bytes: &[u8]) {
    let conn = open.connection().clone();
    feed(&open, bytes);
    let sent = outbound(&conn);
    assert_eq!(&sent[2..4], &1002u16.to_be_bytes());
    assert!(conn.should_close());
}

#[rstest]
fn fragmented_message_is_forwarded_frame_by_frame(open: Pipeline) {
    let conn = open.connection().clone();
    let first = WsFrame {
        fin: false,
        opcode: Opcode::Text,
        payload: Bytes::from_static(b"hel"),
    };
    let rest = WsFrame::new(Opcode::Continuation, Bytes::from_static(b"lo"));
    let mut bytes = client_frame(&first);
    bytes.extend(client_frame(&WsFrame::ping("")));
    bytes.extend(client_frame(&rest));
    feed(&open, &bytes);

    let frames: Vec<_> = std::iter::from_fn(|| next_frame(&conn)).collect();
    assert_eq!(frames, vec![first, rest]);
}

fn decode_in_chunks(bytes: &[u8], cuts: &[usize]) -> Vec<WsFrame> {
    let pipeline = pipeline_with(WebSocketConfig::default());
    feed(&pipeline, UPGRADE);
    let conn = pipeline.connection().clone();
    assert!(matches!(conn.next_delivered(), Some(Message::WebSocketOpen(_))));
    let mut start = 0;
    for &cut in cuts.iter().chain(std::iter::once(&bytes.len())) {
        let cut = cut.clamp(start, bytes.len());
        feed(&pipeline, &bytes[start..cut]);
        start = cut;
    }
    std::iter::from_fn(|| next_frame(&conn)).collect()
}

#[rstest]
#[case::empty(0)]
#[case::largest_short(125)]
#[case::smallest_extended(126)]
#[case::largest_extended(65_535)]
#[case::eight_byte_length(65_536)]
fn every_length_encoding_decodes(#[case] len: usize) {
    let payload: Vec<u8> = (0..len).map(|i| u8::try_from(i % 251).expect("below 251")).collect();
    let frame = WsFrame::binary(payload);
    let bytes = client_frame(&frame);
    let whole = decode_in_chunks(&bytes, &[]);
    assert_eq!(whole, vec![frame.clone()]);

    let header_cuts: Vec<usize> = (1..=14).collect();
    let frames = decode_in_chunks(&bytes, &header_cuts);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].opcode, Opcode::Binary);
    assert_eq!(frames[0].payload, frame.payload);
}

proptest! {
    #[test]
    fn frames_split_anywhere_decode_identically(
        payload in proptest::collection::vec(any::<u8>(), 0..400),
        mut cuts in proptest::collection::vec(0usize..420, 0..10),
    ) {
        cuts.sort_unstable();
        let frame = WsFrame::binary(payload);
        let mut bytes = client_frame(&frame);
        bytes.extend(client_frame(&WsFrame::text("tail")));
        let frames = decode_in_chunks(&bytes, &cuts);
        prop_assert_eq!(frames, vec![frame, WsFrame::text("tail")]);
    }
}
