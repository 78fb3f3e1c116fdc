//! End-to-end: worker writes through the job queue, lines reach the durable
//! store through the reconciler and live subscribers through the fan-out.

use std::sync::Arc;
use std::time::Duration;

use benchstream_core::{keys, Config, DurableStore, EphemeralStore, MemoryStore};
use benchstream_db::Database;
use benchstream_server::{create_app, Pipeline};
use benchstream_types::{JobStatus, LogEvent, LogRecord};
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

fn fast_config() -> Config {
    Config {
        sync_interval: Duration::from_millis(50),
        writer_flush_interval: Duration::from_millis(100),
        log_batch_limit: 7,
        ..Config::default()
    }
}

async fn stores() -> (MemoryStore, Arc<dyn EphemeralStore>, Arc<dyn DurableStore>) {
    let memory = MemoryStore::new();
    let ephemeral: Arc<dyn EphemeralStore> = Arc::new(memory.clone());
    let durable: Arc<dyn DurableStore> = Arc::new(Database::new_in_memory().await.unwrap());
    (memory, ephemeral, durable)
}

async fn wait_listener(store: &MemoryStore) {
    for _ in 0..200 {
        if store.publish(keys::LOG_CHANNEL, "ping").await.unwrap_or(0) > 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("fan-out listener never subscribed");
}

async fn wait_durable_rows(durable: &Arc<dyn DurableStore>, job_id: &str, expected: usize) {
    for _ in 0..300 {
        if durable.query_logs(job_id, 0, 10_000).await.unwrap().len() >= expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("durable store never reached {expected} rows for {job_id}");
}

#[tokio::test]
async fn test_lines_reach_history_and_live_subscribers() {
    let (memory, ephemeral, durable) = stores().await;
    let cancel = CancellationToken::new();
    let pipeline = Pipeline::start(&fast_config(), ephemeral, durable.clone(), &cancel);
    let queue = pipeline.state.queue.clone();

    let job_id = queue
        .start_job(serde_json::json!({"mode": "http", "url": "http://t"}))
        .await
        .unwrap();
    let mut live = pipeline.state.hub.join(&job_id);
    wait_listener(&memory).await;

    let job = queue.claim_next().await.unwrap().unwrap();
    queue.mark_running(&job.id).await.unwrap();
    for i in 0..25 {
        queue.append_log(&job.id, &format!("sample {i}")).await;
    }
    queue.complete(&job.id, 0, None).await.unwrap();

    for i in 0..25 {
        let ev = tokio::time::timeout(Duration::from_secs(2), live.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ev.line, format!("sample {i}"));
    }

    wait_durable_rows(&durable, &job_id, 25).await;
    let rows = durable.query_logs(&job_id, 0, 10_000).await.unwrap();
    let seqs: Vec<u64> = rows.iter().map(|r| r.seq).collect();
    assert_eq!(seqs, (0..25).collect::<Vec<_>>());
    assert_eq!(rows[24].line, "sample 24");

    // metadata follows on the next cycles
    for _ in 0..100 {
        let status = durable.get_job(&job_id).await.unwrap().and_then(|r| r.status);
        if status == Some(JobStatus::Completed) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(
        durable.get_job(&job_id).await.unwrap().unwrap().status,
        Some(JobStatus::Completed)
    );

    cancel.cancel();
    pipeline.join().await;
}

#[tokio::test]
async fn test_restart_without_watermarks_adds_no_duplicates() {
    let (memory, ephemeral, durable) = stores().await;
    let config = fast_config();

    let cancel = CancellationToken::new();
    let first = Pipeline::start(&config, ephemeral.clone(), durable.clone(), &cancel);
    let job_id = first.state.queue.start_job(serde_json::json!({})).await.unwrap();
    for i in 0..30 {
        first.state.queue.append_log(&job_id, &format!("line {i}")).await;
    }
    wait_durable_rows(&durable, &job_id, 30).await;
    cancel.cancel();
    first.join().await;

    // lose the persisted cursor
    memory.set(&keys::sync_key(&job_id), "0").await.unwrap();

    let cancel = CancellationToken::new();
    let second = Pipeline::start(&config, ephemeral, durable.clone(), &cancel);
    second.state.queue.append_log(&job_id, "line 30").await;
    wait_durable_rows(&durable, &job_id, 31).await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    cancel.cancel();
    second.join().await;

    let seqs: Vec<u64> = durable
        .query_logs(&job_id, 0, 10_000)
        .await
        .unwrap()
        .iter()
        .map(|r| r.seq)
        .collect();
    assert_eq!(seqs, (0..31).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_websocket_streams_job_lines() {
    let (memory, ephemeral, durable) = stores().await;
    let cancel = CancellationToken::new();
    let pipeline = Pipeline::start(&fast_config(), ephemeral, durable, &cancel);
    let state = pipeline.state.clone();
    let job_id = state.queue.start_job(serde_json::json!({})).await.unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server_cancel = cancel.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, create_app(state))
            .with_graceful_shutdown(async move { server_cancel.cancelled().await })
            .await
            .unwrap();
    });

    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/api/bench/ws/{job_id}"))
        .await
        .unwrap();
    assert_eq!(pipeline.state.hub.subscriber_count(&job_id), 1);
    wait_listener(&memory).await;

    pipeline.state.queue.append_log(&job_id, "over the wire").await;
    let frame = tokio::time::timeout(Duration::from_secs(2), socket.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let event = LogEvent::parse(frame.to_text().unwrap()).unwrap();
    assert_eq!(event, LogEvent::new(job_id.clone(), "over the wire"));

    socket.close(None).await.unwrap();
    for _ in 0..100 {
        if pipeline.state.hub.subscriber_count(&job_id) == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(pipeline.state.hub.subscriber_count(&job_id), 0);

    cancel.cancel();
    server.await.unwrap();
    pipeline.join().await;
}

#[tokio::test]
async fn test_join_finishes_after_reconciler_dies() {
    let (_memory, ephemeral, durable) = stores().await;
    let cancel = CancellationToken::new();
    let pipeline = Pipeline::start(&fast_config(), ephemeral, durable.clone(), &cancel);

    pipeline.reconciler.abort();
    pipeline.writer.submit(LogRecord {
        job_id: "orphan".into(),
        seq: 0,
        ts: 1,
        line: "buffered".into(),
    });

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(3), pipeline.join())
        .await
        .expect("join must not wait on the pipeline's own writer handle");

    // the writer drained its buffer on the way out
    let rows = durable.query_logs("orphan", 0, 10).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].line, "buffered");
}
