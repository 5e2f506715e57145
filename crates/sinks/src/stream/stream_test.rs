use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use opendal::Operator;

use super::*;
use crate::notify::NoopNotifier;
use crate::object::{ObjectSink, ObjectSinkConfig, json_line};

/// Scripted responses for the mock stream service.
#[derive(Debug, Clone, Copy)]
enum MockResponse {
    /// Every record succeeds
    Ok,
    /// First record fails retriably, the rest succeed
    FailFirstRetriable,
    /// Whole call fails at the transport layer
    Transport,
}

/// Mock stream service recording every call.
struct MockClient {
    script: Mutex<VecDeque<MockResponse>>,
    default: MockResponse,
    calls: Mutex<Vec<Vec<StreamRecord>>>,
}

impl MockClient {
    fn scripted(script: Vec<MockResponse>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            default: MockResponse::Ok,
            calls: Mutex::new(Vec::new()),
        })
    }

    fn always(default: MockResponse) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            default,
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<Vec<StreamRecord>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RecordStreamClient for MockClient {
    async fn put_records(
        &self,
        _stream: &str,
        records: &[StreamRecord],
    ) -> Result<Vec<Result<(), PutError>>, TransportError> {
        self.calls.lock().unwrap().push(records.to_vec());
        let response = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.default);

        match response {
            MockResponse::Ok => Ok(records.iter().map(|_| Ok(())).collect()),
            MockResponse::FailFirstRetriable => Ok(records
                .iter()
                .enumerate()
                .map(|(i, _)| {
                    if i == 0 {
                        Err(PutError {
                            message: "synthetic failure".into(),
                            retriable: true,
                        })
                    } else {
                        Ok(())
                    }
                })
                .collect()),
            MockResponse::Transport => Err(TransportError::Timeout),
        }
    }
}

fn test_config(batch_size: usize, flush_interval: Duration, max_attempts: u32) -> StreamSinkConfig {
    StreamSinkConfig {
        stream_name: "events".into(),
        buffer_size: 100,
        batch_size,
        flush_interval,
        max_attempts,
        retry_delay: Duration::from_millis(10),
        stop_timeout: Duration::from_millis(200),
    }
}

fn test_event(n: u32) -> beacon_protocol::Event {
    beacon_protocol::Event::new(
        Utc::now(),
        None,
        "10.0.0.1",
        format!("uuid-{n}"),
        "eyJ4IjoxfQ==",
        "",
        "internal",
    )
}

fn record_uuid(record: &StreamRecord) -> String {
    let event: beacon_protocol::Event = serde_json::from_slice(&record.data).unwrap();
    event.uuid
}

async fn wait_for(cond: impl Fn() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within 5s");
}

fn fs_fallback(spool: &Path, store: &Path) -> (ObjectSink, ObjectSinkHandle) {
    let builder = opendal::services::Fs::default().root(store.to_str().unwrap());
    let operator = Operator::new(builder).unwrap().finish();
    ObjectSink::new(
        ObjectSinkConfig {
            name: "fallback".into(),
            logging_dir: spool.to_path_buf(),
            max_lines: 1_000_000,
            ..Default::default()
        },
        operator,
        Arc::new(NoopNotifier),
        "edge-01.prod",
        json_line,
        CancellationToken::new(),
    )
}

// =============================================================================
// Publish path
// =============================================================================

#[tokio::test]
async fn test_records_batched_and_published() {
    let client = MockClient::scripted(vec![]);
    let cancel = CancellationToken::new();
    let (sink, handle) = StreamSink::new(
        test_config(3, Duration::from_secs(600), 10),
        Arc::clone(&client) as Arc<dyn RecordStreamClient>,
        None,
        cancel.clone(),
    );

    // Queue everything before the dispatcher starts so the batch
    // composition is deterministic.
    for n in 0..3 {
        handle.log(&test_event(n)).await.unwrap();
    }

    let metrics = Arc::clone(&sink.metrics);
    let task = tokio::spawn(sink.run());
    wait_for(|| metrics.snapshot().records_published == 3).await;

    cancel.cancel();
    task.await.unwrap();

    let calls = client.calls();
    assert_eq!(calls.len(), 1);
    let uuids: Vec<String> = calls[0].iter().map(record_uuid).collect();
    assert_eq!(uuids, vec!["uuid-0", "uuid-1", "uuid-2"]);
}

#[tokio::test]
async fn test_batch_size_triggers_immediate_flush() {
    let client = MockClient::scripted(vec![]);
    let cancel = CancellationToken::new();
    // Flush interval far in the future: only the batch bound can fire.
    let (sink, handle) = StreamSink::new(
        test_config(2, Duration::from_secs(600), 10),
        Arc::clone(&client) as Arc<dyn RecordStreamClient>,
        None,
        cancel.clone(),
    );

    handle.log(&test_event(1)).await.unwrap();
    handle.log(&test_event(2)).await.unwrap();

    let metrics = Arc::clone(&sink.metrics);
    let task = tokio::spawn(sink.run());
    wait_for(|| metrics.snapshot().records_published == 2).await;
    cancel.cancel();
    task.await.unwrap();
    assert_eq!(client.calls().len(), 1);
}

#[tokio::test]
async fn test_partition_keys_are_random_hex() {
    let client = MockClient::scripted(vec![]);
    let cancel = CancellationToken::new();
    let (sink, handle) = StreamSink::new(
        test_config(100, Duration::from_millis(20), 10),
        Arc::clone(&client) as Arc<dyn RecordStreamClient>,
        None,
        cancel.clone(),
    );
    let metrics = Arc::clone(&sink.metrics);
    let task = tokio::spawn(sink.run());

    for n in 0..20 {
        handle.log(&test_event(n)).await.unwrap();
    }
    wait_for(|| metrics.snapshot().records_published == 20).await;
    cancel.cancel();
    task.await.unwrap();

    for call in client.calls() {
        for record in call {
            assert!(
                u32::from_str_radix(&record.partition_key, 16).is_ok(),
                "partition key '{}' is not 32-bit hex",
                record.partition_key
            );
        }
    }
}

// =============================================================================
// Retry and fallback
// =============================================================================

#[tokio::test]
async fn test_retriable_failure_requeued_at_head() {
    let client = MockClient::scripted(vec![MockResponse::FailFirstRetriable]);
    let cancel = CancellationToken::new();
    let (sink, handle) = StreamSink::new(
        test_config(3, Duration::from_millis(20), 10),
        Arc::clone(&client) as Arc<dyn RecordStreamClient>,
        None,
        cancel.clone(),
    );

    for n in 0..3 {
        handle.log(&test_event(n)).await.unwrap();
    }

    let metrics = Arc::clone(&sink.metrics);
    let task = tokio::spawn(sink.run());
    wait_for(|| metrics.snapshot().records_published == 3).await;
    cancel.cancel();
    task.await.unwrap();

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.records_retried, 1);

    let calls = client.calls();
    assert_eq!(calls.len(), 2);
    // The failed record retries from the head of the queue.
    assert_eq!(record_uuid(&calls[1][0]), "uuid-0");
    // Its attempt budget was decremented.
    assert_eq!(calls[1][0].attempts_remaining, 9);
}

#[tokio::test]
async fn test_transport_error_retries_whole_batch() {
    let client = MockClient::scripted(vec![MockResponse::Transport]);
    let cancel = CancellationToken::new();
    let (sink, handle) = StreamSink::new(
        test_config(2, Duration::from_millis(20), 10),
        Arc::clone(&client) as Arc<dyn RecordStreamClient>,
        None,
        cancel.clone(),
    );

    handle.log(&test_event(1)).await.unwrap();
    handle.log(&test_event(2)).await.unwrap();

    let metrics = Arc::clone(&sink.metrics);
    let task = tokio::spawn(sink.run());
    wait_for(|| metrics.snapshot().records_published == 2).await;
    cancel.cancel();
    task.await.unwrap();

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.publish_errors, 1);
    assert_eq!(snapshot.records_retried, 2);

    let calls = client.calls();
    assert_eq!(calls.len(), 2);
    let uuids: Vec<String> = calls[1].iter().map(record_uuid).collect();
    assert_eq!(uuids, vec!["uuid-1", "uuid-2"]);
}

#[tokio::test]
async fn test_exhausted_record_goes_to_fallback() {
    let spool = tempfile::tempdir().unwrap();
    let store = tempfile::tempdir().unwrap();
    let (fallback_sink, fallback_handle) = fs_fallback(spool.path(), store.path());
    let fallback_task = tokio::spawn(fallback_sink.run());

    let client = MockClient::scripted(vec![MockResponse::FailFirstRetriable]);
    let cancel = CancellationToken::new();
    let (sink, handle) = StreamSink::new(
        test_config(2, Duration::from_millis(20), 1),
        Arc::clone(&client) as Arc<dyn RecordStreamClient>,
        Some(fallback_handle.clone()),
        cancel.clone(),
    );

    handle.log(&test_event(1)).await.unwrap();
    handle.log(&test_event(2)).await.unwrap();

    let metrics = Arc::clone(&sink.metrics);
    let task = tokio::spawn(sink.run());
    wait_for(|| {
        let s = metrics.snapshot();
        s.records_published == 1 && s.records_fallback == 1
    })
    .await;
    cancel.cancel();
    task.await.unwrap();

    // Drain the fallback sink and verify the record landed there intact.
    drop(handle);
    drop(fallback_handle);
    fallback_task.await.unwrap();

    let mut contents = String::new();
    let mut stack = vec![store.path().to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(dir).unwrap().flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else {
                contents.push_str(&std::fs::read_to_string(path).unwrap());
            }
        }
    }
    assert!(contents.contains("uuid-1"));
    assert!(!contents.contains("uuid-2"));
}

#[tokio::test]
async fn test_shutdown_drains_survivors_to_fallback() {
    let spool = tempfile::tempdir().unwrap();
    let store = tempfile::tempdir().unwrap();
    let (fallback_sink, fallback_handle) = fs_fallback(spool.path(), store.path());
    let fallback_task = tokio::spawn(fallback_sink.run());

    // Downstream is hard down: every call fails at the transport layer.
    let client = MockClient::always(MockResponse::Transport);
    let cancel = CancellationToken::new();
    let (sink, handle) = StreamSink::new(
        test_config(10, Duration::from_millis(20), 100),
        Arc::clone(&client) as Arc<dyn RecordStreamClient>,
        Some(fallback_handle.clone()),
        cancel.clone(),
    );
    let metrics = Arc::clone(&sink.metrics);
    let task = tokio::spawn(sink.run());

    handle.log(&test_event(1)).await.unwrap();
    handle.log(&test_event(2)).await.unwrap();
    wait_for(|| metrics.snapshot().records_received == 2).await;

    cancel.cancel();
    let snapshot = task.await.unwrap();

    assert_eq!(snapshot.records_published, 0);
    assert_eq!(snapshot.records_fallback, 2);
    assert_eq!(snapshot.records_lost, 0);

    drop(fallback_handle);
    fallback_task.await.unwrap();
}

// =============================================================================
// Back-pressure and fail-fast
// =============================================================================

#[tokio::test]
async fn test_full_buffer_blocks_producer() {
    let client = MockClient::scripted(vec![]);
    let cancel = CancellationToken::new();
    let mut config = test_config(10, Duration::from_secs(600), 10);
    config.buffer_size = 1;

    // The dispatcher is deliberately not running: the buffer fills and
    // the producer must block rather than drop.
    let (sink, handle) = StreamSink::new(
        config,
        Arc::clone(&client) as Arc<dyn RecordStreamClient>,
        None,
        cancel.clone(),
    );

    handle.log(&test_event(1)).await.unwrap();

    let blocked = tokio::time::timeout(Duration::from_millis(100), handle.log(&test_event(2))).await;
    assert!(blocked.is_err(), "producer should block on a full buffer");

    // Once the dispatcher runs, the buffered record drains.
    let metrics = Arc::clone(&sink.metrics);
    let task = tokio::spawn(sink.run());
    wait_for(|| metrics.snapshot().records_received >= 1).await;
    cancel.cancel();
    let snapshot = task.await.unwrap();
    assert_eq!(snapshot.records_lost, 0);
}

#[tokio::test]
async fn test_first_error_latched_and_fails_fast() {
    // No fallback configured: an exhausted record is data loss and must
    // surface to producers.
    let client = MockClient::always(MockResponse::FailFirstRetriable);
    let cancel = CancellationToken::new();
    let (sink, handle) = StreamSink::new(
        test_config(1, Duration::from_millis(20), 1),
        Arc::clone(&client) as Arc<dyn RecordStreamClient>,
        None,
        cancel.clone(),
    );
    let metrics = Arc::clone(&sink.metrics);
    let task = tokio::spawn(sink.run());

    handle.log(&test_event(1)).await.unwrap();
    wait_for(|| metrics.snapshot().records_lost == 1).await;

    let err = handle.log(&test_event(2)).await.unwrap_err();
    assert!(matches!(err, SinkError::Stream(_)));
    assert!(err.to_string().contains("no fallback sink"));

    cancel.cancel();
    task.await.unwrap();
}
