//! Tests for the pipeline driving helpers.

use std::sync::Arc;

use rstest::rstest;
use wirechain::{
    ConnectionHandle,
    HandlerError,
    Message,
    PipelineBuilder,
    config::DecoderConfig,
    http::{HttpDecoder, HttpErrorRenderer, HttpResponse, HttpResponseEncoder},
};
use wirechain_testing::{drive_chunks, split_at_points};

#[rstest]
#[case(&[], vec![b"abcdef".to_vec()])]
#[case(&[2, 4], vec![b"ab".to_vec(), b"cd".to_vec(), b"ef".to_vec()])]
#[case(&[4, 2, 2, 99], vec![b"ab".to_vec(), b"cd".to_vec(), b"ef".to_vec()])]
fn splits_at_sorted_unique_points(#[case] points: &[usize], #[case] expected: Vec<Vec<u8>>) {
    assert_eq!(split_at_points(b"abcdef", points), expected);
}

async fn hello(message: Message, conn: ConnectionHandle) -> Result<(), HandlerError> {
    if message.into_http_request().is_some() {
        conn.write(HttpResponse::text(200, "hello"))?;
    }
    Ok(())
}

#[tokio::test]
async fn drive_chunks_collects_server_output() {
    let builder = PipelineBuilder::new()
        .filter("http-encoder", Arc::new(HttpResponseEncoder))
        .and_then(|b| b.filter("http", Arc::new(HttpDecoder::new(DecoderConfig::default()))))
        .expect("unique names")
        .error_renderer(HttpErrorRenderer);
    let out = drive_chunks(
        &builder,
        hello,
        vec![b"GET / HT".to_vec(), b"TP/1.1\r\n\r\n".to_vec()],
    )
    .await
    .expect("drive");
    let text = String::from_utf8(out).expect("utf8");
    assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(text.ends_with("hello"));
}
