//! Pool-level tests: group ordering, limits, worker recovery and offloading.

use std::{
    sync::{
        Arc,
        Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;
use rstest::{fixture, rstest};
use tokio::{
    sync::{mpsc, oneshot},
    time::{sleep, timeout},
};

use super::{OffloadFilter, PoolError, PoolListener, Task, TaskGroupSpec, TaskPool};
use crate::{
    config::{DecoderConfig, PoolConfig},
    connection::{Connection, ConnectionHandle},
    error::HandlerError,
    http::{HttpDecoder, HttpErrorRenderer, HttpResponse, HttpResponseEncoder},
    message::Message,
    pipeline::{Pipeline, PipelineBuilder},
    server::Handler,
};

#[derive(Clone, Default)]
struct Recorder {
    died: Arc<Mutex<Vec<(usize, Option<String>)>>>,
    slow: Arc<Mutex<Vec<(String, Option<String>)>>>,
}

impl PoolListener for Recorder {
    fn on_worker_died(&self, worker: usize, panic: Option<&str>) {
        self.died
            .lock()
            .expect("recorder lock")
            .push((worker, panic.map(str::to_owned)));
    }

    fn on_slow_task(&self, label: &str, group: Option<&str>, _elapsed: Duration) {
        self.slow
            .lock()
            .expect("recorder lock")
            .push((label.to_owned(), group.map(str::to_owned)));
    }
}

#[fixture]
fn config() -> PoolConfig {
    PoolConfig::default()
        .workers(4)
        .monitor_interval(Duration::from_millis(10))
}

async fn eventually(mut check: impl FnMut() -> bool) {
    timeout(Duration::from_secs(2), async {
        while !check() {
            sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition reached in time");
}

#[rstest]
#[tokio::test]
async fn grouped_tasks_run_in_submission_order(config: PoolConfig) {
    let pool = TaskPool::start(config, ());
    let order = Arc::new(Mutex::new(Vec::new()));
    let (gate_tx, gate_rx) = oneshot::channel::<()>();
    let (done_tx, mut done_rx) = mpsc::unbounded_channel();

    let first = {
        let order = Arc::clone(&order);
        let done = done_tx.clone();
        Task::new(async move {
            let _ = gate_rx.await;
            order.lock().expect("order lock").push("A");
            let _ = done.send(());
        })
    };
    pool.submit(first.group(TaskGroupSpec::with_limit("serial", 1)))
        .expect("pool running");
    for name in ["B", "C"] {
        let order = Arc::clone(&order);
        let done = done_tx.clone();
        let task = Task::new(async move {
            order.lock().expect("order lock").push(name);
            let _ = done.send(());
        });
        pool.submit(task.group(TaskGroupSpec::new("serial")))
            .expect("pool running");
    }

    let stats = pool.group_stats("serial").expect("group record");
    assert_eq!(stats.limit, 1);
    assert_eq!(stats.waiting, 2);

    gate_tx.send(()).expect("first task waiting");
    for _ in 0..3 {
        timeout(Duration::from_secs(2), done_rx.recv())
            .await
            .expect("task finished")
            .expect("sender alive");
    }
    assert_eq!(*order.lock().expect("order lock"), ["A", "B", "C"]);
    eventually(|| pool.group_stats("serial").is_none()).await;
    pool.shutdown().await;
}

#[rstest]
#[tokio::test]
async fn group_never_exceeds_its_limit(config: PoolConfig) {
    let pool = TaskPool::start(config.group_limit("db", 2), ());
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let (done_tx, mut done_rx) = mpsc::unbounded_channel();
    for _ in 0..10 {
        let running = Arc::clone(&running);
        let peak = Arc::clone(&peak);
        let done = done_tx.clone();
        let task = Task::new(async move {
            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            sleep(Duration::from_millis(5)).await;
            running.fetch_sub(1, Ordering::SeqCst);
            let _ = done.send(());
        });
        pool.submit(task.group(TaskGroupSpec::new("db")))
            .expect("pool running");
    }
    for _ in 0..10 {
        timeout(Duration::from_secs(2), done_rx.recv())
            .await
            .expect("task finished")
            .expect("sender alive");
    }
    let peak = peak.load(Ordering::SeqCst);
    assert!((1..=2).contains(&peak), "peak concurrency {peak}");
    pool.shutdown().await;
}

#[rstest]
#[tokio::test]
async fn panicking_task_respawns_worker_and_frees_slot(config: PoolConfig) {
    let recorder = Recorder::default();
    let pool = TaskPool::start(config.workers(1), recorder.clone());
    let doomed = Task::new(async {
        panic!("task exploded");
    });
    pool.submit(doomed.group(TaskGroupSpec::with_limit("fragile", 1)))
        .expect("pool running");

    let died = Arc::clone(&recorder.died);
    eventually(|| !died.lock().expect("recorder lock").is_empty()).await;
    assert_eq!(
        died.lock().expect("recorder lock")[0],
        (0, Some("task exploded".to_owned()))
    );
    assert_eq!(pool.live_workers(), 1);

    let (tx, rx) = oneshot::channel();
    let next = Task::new(async move {
        let _ = tx.send("ran");
    });
    pool.submit(next.group(TaskGroupSpec::new("fragile")))
        .expect("pool running");
    let ran = timeout(Duration::from_secs(2), rx)
        .await
        .expect("slot released after panic");
    assert_eq!(ran.ok(), Some("ran"));
    pool.shutdown().await;
}

#[rstest]
#[tokio::test]
async fn slow_tasks_are_reported_and_finish(config: PoolConfig) {
    let recorder = Recorder::default();
    let pool = TaskPool::start(
        config.slow_task_threshold(Duration::from_millis(10)),
        recorder.clone(),
    );
    let (tx, rx) = oneshot::channel();
    let task = Task::new(async move {
        sleep(Duration::from_millis(50)).await;
        let _ = tx.send(());
    })
    .label("report")
    .group(TaskGroupSpec::new("io"));
    pool.submit(task).expect("pool running");

    timeout(Duration::from_secs(2), rx)
        .await
        .expect("slow task completes")
        .expect("sender alive");
    assert_eq!(
        *recorder.slow.lock().expect("recorder lock"),
        [("report".to_owned(), Some("io".to_owned()))]
    );
    pool.shutdown().await;
}

#[rstest]
#[tokio::test]
async fn submit_after_shutdown_fails(config: PoolConfig) {
    let pool = TaskPool::start(config, ());
    pool.shutdown().await;
    let result = pool.submit(Task::new(async {}));
    assert!(matches!(result, Err(PoolError::Shutdown)));
    assert_eq!(pool.live_workers(), 0);
}

fn offload_pipeline<H: Handler>(pool: &Arc<TaskPool>, handler: H) -> Pipeline {
    let offload = OffloadFilter::new(Arc::clone(pool), Arc::new(handler))
        .group_by(|_| Some(TaskGroupSpec::new("requests")));
    PipelineBuilder::new()
        .filter("http-encoder", Arc::new(HttpResponseEncoder))
        .expect("unique")
        .filter("http", Arc::new(HttpDecoder::new(DecoderConfig::default())))
        .expect("unique")
        .filter("offload", Arc::new(offload))
        .expect("unique")
        .error_renderer(HttpErrorRenderer)
        .build(Connection::detached())
}

fn send_request(pipeline: &Pipeline, path: &str) {
    let raw = format!("GET {path} HTTP/1.1\r\nHost: test\r\n\r\n");
    pipeline.fire_read(Message::Bytes(Bytes::from(raw)));
}

/// Pump the mailbox the way the I/O task would until output appears.
async fn await_output(pipeline: &Pipeline) -> String {
    let conn = Arc::clone(pipeline.connection());
    timeout(Duration::from_secs(2), async {
        loop {
            pipeline.process_mailbox();
            if conn.has_outbound() {
                break;
            }
            sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("offloaded reply");
    conn.drain_outbound()
        .iter()
        .map(|b| String::from_utf8_lossy(b).into_owned())
        .collect()
}

async fn echo(message: Message, conn: ConnectionHandle) -> Result<(), HandlerError> {
    if let Some(req) = message.into_http_request() {
        conn.write(HttpResponse::text(200, req.path().to_owned()))?;
    }
    Ok(())
}

async fn failing(_: Message, _: ConnectionHandle) -> Result<(), HandlerError> {
    Err("database unavailable".into())
}

async fn panicking(_: Message, _: ConnectionHandle) -> Result<(), HandlerError> {
    panic!("handler exploded")
}

#[rstest]
#[tokio::test]
async fn offloaded_handler_replies_through_chain(config: PoolConfig) {
    let pool = Arc::new(TaskPool::start(config, ()));
    let pipeline = offload_pipeline(&pool, echo);
    send_request(&pipeline, "/offloaded");
    let out = await_output(&pipeline).await;
    assert!(out.starts_with("HTTP/1.1 200 OK\r\n"), "got {out:?}");
    assert!(out.ends_with("/offloaded"));
    pool.shutdown().await;
}

#[rstest]
#[tokio::test]
async fn offloaded_handler_error_is_rendered(config: PoolConfig) {
    let pool = Arc::new(TaskPool::start(config, ()));
    let pipeline = offload_pipeline(&pool, failing);
    send_request(&pipeline, "/broken");
    let out = await_output(&pipeline).await;
    assert!(out.starts_with("HTTP/1.1 500 Internal Server Error\r\n"), "got {out:?}");
    assert!(pipeline.connection().should_close());
    pool.shutdown().await;
}

#[rstest]
#[tokio::test]
async fn offloaded_handler_panic_is_rendered(config: PoolConfig) {
    let recorder = Recorder::default();
    let pool = Arc::new(TaskPool::start(config, recorder.clone()));
    let pipeline = offload_pipeline(&pool, panicking);
    send_request(&pipeline, "/boom");
    let out = await_output(&pipeline).await;
    assert!(out.starts_with("HTTP/1.1 500 Internal Server Error\r\n"), "got {out:?}");
    assert!(pipeline.connection().should_close());
    assert!(recorder.died.lock().expect("recorder lock").is_empty());
    assert_eq!(pool.live_workers(), 4);
    pool.shutdown().await;
}

#[rstest]
#[tokio::test]
async fn closed_connection_skips_handler(config: PoolConfig) {
    let pool = Arc::new(TaskPool::start(config.workers(1), ()));
    let (gate_tx, gate_rx) = oneshot::channel::<()>();
    pool.submit(Task::new(async move {
        let _ = gate_rx.await;
    }))
    .expect("pool running");

    let called = Arc::new(AtomicBool::new(false));
    let handler = {
        let called = Arc::clone(&called);
        move |_: Message, _: ConnectionHandle| {
            let called = Arc::clone(&called);
            async move {
                called.store(true, Ordering::SeqCst);
                Ok::<(), HandlerError>(())
            }
        }
    };
    let pipeline = offload_pipeline(&pool, handler);
    send_request(&pipeline, "/late");
    pipeline.connection().mark_closed();
    gate_tx.send(()).expect("gate task waiting");

    eventually(|| pool.group_stats("requests").is_none()).await;
    assert!(!called.load(Ordering::SeqCst));
    pool.shutdown().await;
}
