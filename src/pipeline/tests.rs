//! Unit tests for filter chain ordering, editing and error policy.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use rstest::{fixture, rstest};

use super::{ErrorRenderer, Filter, FilterContext, FilterResult, Pipeline, PipelineBuilder};
use crate::{
    connection::{Connection, ConnectionHandle},
    error::{ParseError, PipelineError},
    message::Message,
};

type Log = Arc<Mutex<Vec<String>>>;

/// Records every event it sees, then forwards it.
struct Recorder {
    label: &'static str,
    log: Log,
}

impl Recorder {
    fn new(label: &'static str, log: &Log) -> Arc<Self> {
        Arc::new(Self {
            label,
            log: Arc::clone(log),
        })
    }

    fn push(&self, event: &str) {
        self.log
            .lock()
            .expect("log lock")
            .push(format!("{}:{event}", self.label));
    }
}

impl Filter for Recorder {
    fn on_accept(&self, ctx: &FilterContext<'_>) -> FilterResult {
        self.push("accept");
        ctx.fire_accept();
        Ok(())
    }

    fn on_read(&self, ctx: &FilterContext<'_>, message: Message) -> FilterResult {
        self.push("read");
        ctx.fire_read(message);
        Ok(())
    }

    fn on_write(&self, ctx: &FilterContext<'_>, message: Message) -> FilterResult {
        self.push("write");
        ctx.write(message);
        Ok(())
    }

    fn on_error(&self, ctx: &FilterContext<'_>, error: &PipelineError) -> FilterResult {
        self.push("error");
        ctx.fire_error(error);
        Ok(())
    }
}

/// Fails every read, either by returning an error or by panicking.
struct Faulty {
    panic: bool,
}

impl Filter for Faulty {
    fn on_read(&self, _ctx: &FilterContext<'_>, _message: Message) -> FilterResult {
        assert!(!self.panic, "faulty filter exploded");
        Err(ParseError::MalformedRequestLine.into())
    }
}

/// Fails while handling an error event.
struct FailsOnError;

impl Filter for FailsOnError {
    fn on_error(&self, _ctx: &FilterContext<'_>, _error: &PipelineError) -> FilterResult {
        Err(PipelineError::Closed)
    }
}

/// Encodes `HttpResponse`-free test payloads: turns `Other(String)` into bytes.
struct StringEncoder;

impl Filter for StringEncoder {
    fn on_write(&self, ctx: &FilterContext<'_>, message: Message) -> FilterResult {
        match message {
            Message::Other(any) => match any.downcast::<String>() {
                Ok(text) => ctx.write(Message::Bytes(Bytes::from(*text))),
                Err(any) => ctx.write(Message::Other(any)),
            },
            other => ctx.write(other),
        }
        Ok(())
    }
}

struct TextRenderer;

impl ErrorRenderer for TextRenderer {
    fn render(&self, error: &PipelineError) -> Option<Message> {
        Some(Message::Other(Box::new(format!("error: {}", error.error_type()))))
    }
}

#[fixture]
fn log() -> Log { Arc::new(Mutex::new(Vec::new())) }

#[fixture]
fn conn() -> ConnectionHandle { Connection::detached() }

fn entries(log: &Log) -> Vec<String> { log.lock().expect("log lock").clone() }

fn outbound_text(conn: &ConnectionHandle) -> String {
    conn.drain_outbound()
        .iter()
        .map(|b| String::from_utf8_lossy(b).into_owned())
        .collect()
}

#[rstest]
fn inbound_runs_head_to_tail_and_outbound_tail_to_head(log: Log, conn: ConnectionHandle) {
    let pipeline = PipelineBuilder::new()
        .filter("a", Recorder::new("a", &log))
        .expect("unique")
        .filter("b", Recorder::new("b", &log))
        .expect("unique")
        .build(conn.clone());

    pipeline.fire_accept();
    pipeline.fire_read(Message::Bytes(Bytes::from_static(b"in")));
    pipeline.write(Message::Bytes(Bytes::from_static(b"out")));

    assert_eq!(
        entries(&log),
        ["a:accept", "b:accept", "a:read", "b:read", "b:write", "a:write"]
    );
    assert!(matches!(conn.next_delivered(), Some(Message::Bytes(b)) if b == "in"));
    assert_eq!(outbound_text(&conn), "out");
}

#[rstest]
fn duplicate_names_are_rejected(log: Log, conn: ConnectionHandle) {
    let err = PipelineBuilder::new()
        .filter("a", Recorder::new("a", &log))
        .expect("unique")
        .filter("a", Recorder::new("again", &log))
        .err();
    assert!(matches!(err, Some(PipelineError::DuplicateName(name)) if name == "a"));

    let mut pipeline = Pipeline::new(conn);
    pipeline.add_last("x", Recorder::new("x", &log)).expect("unique");
    assert!(matches!(
        pipeline.add_first("x", Recorder::new("x", &log)),
        Err(PipelineError::DuplicateName(_))
    ));
}

#[rstest]
fn editing_positions_filters_relative_to_base(log: Log, conn: ConnectionHandle) {
    let mut pipeline = Pipeline::new(conn);
    pipeline.add_last("m", Recorder::new("m", &log)).expect("add m");
    pipeline.add_first("h", Recorder::new("h", &log)).expect("add h");
    pipeline.add_last("t", Recorder::new("t", &log)).expect("add t");
    pipeline
        .add_before("m", "before-m", Recorder::new("bm", &log))
        .expect("add before");
    pipeline
        .add_after("m", "after-m", Recorder::new("am", &log))
        .expect("add after");
    assert_eq!(pipeline.names(), ["h", "before-m", "m", "after-m", "t"]);

    assert!(matches!(
        pipeline.add_before("missing", "z", Recorder::new("z", &log)),
        Err(PipelineError::UnknownName(name)) if name == "missing"
    ));
}

#[rstest]
fn filters_are_found_and_removed_by_name_identity_and_type(log: Log, conn: ConnectionHandle) {
    let recorder = Recorder::new("r", &log);
    let mut pipeline = Pipeline::new(conn);
    pipeline.add_last("r", Arc::clone(&recorder)).expect("add r");
    pipeline.add_last("enc", Arc::new(StringEncoder)).expect("add enc");

    assert!(pipeline.contains("r"));
    assert!(pipeline.contains_filter(&recorder));
    assert!(pipeline.contains_type::<StringEncoder>());
    assert!(pipeline.get("enc").is_some());
    let found = pipeline.get_type::<Recorder>().expect("recorder registered");
    assert!(Arc::ptr_eq(&found, &recorder));

    assert_eq!(pipeline.remove_filter(&recorder).as_deref(), Some("r"));
    assert!(!pipeline.contains_filter(&recorder));
    assert!(pipeline.remove_type::<StringEncoder>().is_some());
    assert!(pipeline.is_empty());
    assert!(pipeline.remove("r").is_none());
}

#[rstest]
#[case::returned_error(false, "parse")]
#[case::panic(true, "panic")]
fn failing_filter_starts_error_event_at_itself(
    log: Log,
    conn: ConnectionHandle,
    #[case] panic: bool,
    #[case] expected_type: &str,
) {
    let pipeline = PipelineBuilder::new()
        .filter("enc", Arc::new(StringEncoder))
        .expect("unique")
        .filter("before", Recorder::new("before", &log))
        .expect("unique")
        .filter("faulty", Arc::new(Faulty { panic }))
        .expect("unique")
        .filter("after", Recorder::new("after", &log))
        .expect("unique")
        .error_renderer(TextRenderer)
        .build(conn.clone());

    pipeline.fire_read(Message::Bytes(Bytes::from_static(b"x")));

    // Recorders before the faulty filter see the read; only the recorder
    // after it sees the error, then the rendered reply flows back out.
    assert_eq!(
        entries(&log),
        ["before:read", "after:error", "after:write", "before:write"]
    );
    assert!(conn.should_close());
    assert!(conn.next_delivered().is_none());
    assert_eq!(outbound_text(&conn), format!("error: {expected_type}"));
}

#[rstest]
fn failure_during_error_dispatch_is_swallowed(log: Log, conn: ConnectionHandle) {
    let pipeline = PipelineBuilder::new()
        .filter("enc", Arc::new(StringEncoder))
        .expect("unique")
        .filter("faulty", Arc::new(Faulty { panic: false }))
        .expect("unique")
        .filter("fails-on-error", Arc::new(FailsOnError))
        .expect("unique")
        .filter("after", Recorder::new("after", &log))
        .expect("unique")
        .error_renderer(TextRenderer)
        .build(conn.clone());

    pipeline.fire_read(Message::Bytes(Bytes::from_static(b"x")));

    // The original error still reaches the rest of the chain and the tail.
    assert_eq!(entries(&log), ["after:error", "after:write"]);
    assert!(conn.should_close());
    assert_eq!(outbound_text(&conn), "error: parse");
}

#[rstest]
fn unencoded_outbound_closes_without_rendering(conn: ConnectionHandle) {
    let pipeline = PipelineBuilder::new()
        .error_renderer(TextRenderer)
        .build(conn.clone());

    pipeline.write(Message::Other(Box::new(7_u32)));

    assert!(conn.should_close());
    assert!(!conn.has_outbound());
}

#[rstest]
fn tail_does_not_render_twice_for_a_closing_connection(conn: ConnectionHandle) {
    let pipeline = PipelineBuilder::new()
        .filter("enc", Arc::new(StringEncoder))
        .expect("unique")
        .error_renderer(TextRenderer)
        .build(conn.clone());

    pipeline.fire_error(&ParseError::MalformedHeader.into());
    pipeline.fire_error(&ParseError::MalformedHeader.into());

    assert_eq!(outbound_text(&conn), "error: parse");
}

#[rstest]
fn mailbox_items_are_encoded_and_errors_dispatched(conn: ConnectionHandle) {
    let pipeline = PipelineBuilder::new()
        .filter("enc", Arc::new(StringEncoder))
        .expect("unique")
        .error_renderer(TextRenderer)
        .build(conn.clone());

    conn.write(Message::Other(Box::new(String::from("reply"))))
        .expect("connection open");
    conn.report_error("handler exploded".into());

    assert_eq!(pipeline.process_mailbox(), 2);
    assert_eq!(outbound_text(&conn), "replyerror: handler");
    assert!(conn.should_close());
}

#[test]
fn closure_renderers_are_accepted() {
    let renderer = |_: &PipelineError| Some(Message::Bytes(Bytes::from_static(b"bye")));
    assert!(matches!(
        renderer.render(&PipelineError::Closed),
        Some(Message::Bytes(b)) if b == "bye"
    ));
}
