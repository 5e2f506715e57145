use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use super::*;
use crate::notify::NoopNotifier;

/// Notifier that records everything it is asked to send.
#[derive(Default)]
struct RecordingNotifier {
    receipts: Mutex<Vec<String>>,
    errors: Mutex<Vec<String>>,
}

#[async_trait]
impl crate::notify::Notifier for RecordingNotifier {
    async fn send_receipt(&self, key: &str) {
        self.receipts.lock().await.push(key.to_string());
    }

    async fn send_error(&self, message: &str) {
        self.errors.lock().await.push(message.to_string());
    }
}

fn fs_operator(root: &Path) -> Operator {
    let builder = opendal::services::Fs::default().root(root.to_str().unwrap());
    Operator::new(builder).unwrap().finish()
}

fn test_config(spool: &Path, max_lines: usize, max_age: Duration) -> ObjectSinkConfig {
    ObjectSinkConfig {
        name: "events".into(),
        key_prefix: "events".into(),
        max_lines,
        max_age,
        logging_dir: spool.to_path_buf(),
        upload_attempts: 2,
        upload_concurrency: 2,
        flush_interval: Duration::from_millis(20),
        retry_delay: Duration::from_millis(10),
    }
}

fn test_event(n: u32) -> beacon_protocol::Event {
    beacon_protocol::Event::new(
        Utc::now(),
        None,
        "10.0.0.1",
        format!("h.c-00000001-{n:08x}"),
        "eyJ4IjoxfQ==",
        "",
        "internal",
    )
}

/// Collect the contents of every uploaded object under `root`, sorted by path.
fn uploaded_files(root: &Path) -> Vec<String> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else {
                files.push(path);
            }
        }
    }
    files.sort();
    files
        .into_iter()
        .map(|p| std::fs::read_to_string(p).unwrap())
        .collect()
}

fn spool_leftovers(spool: &Path) -> usize {
    std::fs::read_dir(spool)
        .map(|entries| entries.flatten().count())
        .unwrap_or(0)
}

#[tokio::test]
async fn test_events_reach_uploaded_object() {
    let spool = tempfile::tempdir().unwrap();
    let store = tempfile::tempdir().unwrap();

    let (sink, handle) = ObjectSink::new(
        test_config(spool.path(), 2, Duration::from_secs(3600)),
        fs_operator(store.path()),
        Arc::new(NoopNotifier),
        "edge-01.prod",
        json_line,
        CancellationToken::new(),
    );
    let task = tokio::spawn(sink.run());

    handle.log(&test_event(1)).unwrap();
    handle.log(&test_event(2)).unwrap();
    drop(handle);

    let snapshot = task.await.unwrap();
    assert_eq!(snapshot.lines_written, 2);
    assert_eq!(snapshot.files_sealed, 1);
    assert_eq!(snapshot.uploads_completed, 1);

    let files = uploaded_files(store.path());
    assert_eq!(files.len(), 1);
    let lines: Vec<&str> = files[0].lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].contains("h.c-00000001-00000001"));
    assert!(lines[1].contains("h.c-00000001-00000002"));

    // Uploaded spool files are deleted locally.
    assert_eq!(spool_leftovers(spool.path()), 0);
}

#[tokio::test]
async fn test_rotation_bounds_lines_per_file() {
    let spool = tempfile::tempdir().unwrap();
    let store = tempfile::tempdir().unwrap();

    let (sink, handle) = ObjectSink::new(
        test_config(spool.path(), 3, Duration::from_secs(3600)),
        fs_operator(store.path()),
        Arc::new(NoopNotifier),
        "edge-01.prod",
        json_line,
        CancellationToken::new(),
    );
    let task = tokio::spawn(sink.run());

    for n in 0..7 {
        handle.log(&test_event(n)).unwrap();
    }
    drop(handle);
    let snapshot = task.await.unwrap();

    assert_eq!(snapshot.files_sealed, 3);
    let files = uploaded_files(store.path());
    assert_eq!(files.len(), 3);
    let total: usize = files.iter().map(|f| f.lines().count()).sum();
    assert_eq!(total, 7);
    for file in &files {
        assert!(file.lines().count() <= 3, "sealed file exceeds max_lines");
    }
}

#[tokio::test]
async fn test_rotation_by_age() {
    let spool = tempfile::tempdir().unwrap();
    let store = tempfile::tempdir().unwrap();

    let (sink, handle) = ObjectSink::new(
        test_config(spool.path(), 1_000_000, Duration::from_millis(100)),
        fs_operator(store.path()),
        Arc::new(NoopNotifier),
        "edge-01.prod",
        json_line,
        CancellationToken::new(),
    );
    let task = tokio::spawn(sink.run());

    handle.log(&test_event(1)).unwrap();

    // The age check runs on the flush tick; well before this deadline the
    // file must have been sealed and uploaded without any further writes.
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(uploaded_files(store.path()).len(), 1);

    drop(handle);
    task.await.unwrap();
}

#[tokio::test]
async fn test_enqueue_order_is_preserved() {
    let spool = tempfile::tempdir().unwrap();
    let store = tempfile::tempdir().unwrap();

    let (sink, handle) = ObjectSink::new(
        test_config(spool.path(), 1_000_000, Duration::from_secs(3600)),
        fs_operator(store.path()),
        Arc::new(NoopNotifier),
        "edge-01.prod",
        json_line,
        CancellationToken::new(),
    );
    let task = tokio::spawn(sink.run());

    for n in 0..50 {
        handle.log(&test_event(n)).unwrap();
    }
    drop(handle);
    task.await.unwrap();

    let files = uploaded_files(store.path());
    assert_eq!(files.len(), 1);
    let uuids: Vec<String> = files[0]
        .lines()
        .map(|l| {
            let event: beacon_protocol::Event = serde_json::from_str(l).unwrap();
            event.uuid
        })
        .collect();
    let expected: Vec<String> = (0..50).map(|n| format!("h.c-00000001-{n:08x}")).collect();
    assert_eq!(uuids, expected);
}

#[tokio::test]
async fn test_audit_formatter() {
    let spool = tempfile::tempdir().unwrap();
    let store = tempfile::tempdir().unwrap();

    let (sink, handle) = ObjectSink::new(
        test_config(spool.path(), 1_000_000, Duration::from_secs(3600)),
        fs_operator(store.path()),
        Arc::new(NoopNotifier),
        "edge-01.prod",
        audit_line,
        CancellationToken::new(),
    );
    let task = tokio::spawn(sink.run());

    let event = test_event(7);
    handle.log(&event).unwrap();
    drop(handle);
    task.await.unwrap();

    let files = uploaded_files(store.path());
    assert_eq!(
        files[0].trim_end(),
        format!("[{}] {}", event.received_at.timestamp(), event.uuid)
    );
}

#[tokio::test]
async fn test_receipt_notification_carries_key() {
    let spool = tempfile::tempdir().unwrap();
    let store = tempfile::tempdir().unwrap();
    let notifier = Arc::new(RecordingNotifier::default());

    let (sink, handle) = ObjectSink::new(
        test_config(spool.path(), 1, Duration::from_secs(3600)),
        fs_operator(store.path()),
        Arc::clone(&notifier) as Arc<dyn crate::notify::Notifier>,
        "edge-01.prod",
        json_line,
        CancellationToken::new(),
    );
    let task = tokio::spawn(sink.run());

    handle.log(&test_event(1)).unwrap();
    drop(handle);
    task.await.unwrap();

    let receipts = notifier.receipts.lock().await;
    assert_eq!(receipts.len(), 1);
    assert!(receipts[0].starts_with("events/edge-01.prod/"));
    assert!(notifier.errors.lock().await.is_empty());
}

#[tokio::test]
async fn test_upload_failure_notifies_and_retains_file() {
    let spool = tempfile::tempdir().unwrap();
    let store = tempfile::tempdir().unwrap();

    // Root the operator under a regular file so every write fails.
    let blocked = store.path().join("blocked");
    std::fs::write(&blocked, b"not a directory").unwrap();

    let notifier = Arc::new(RecordingNotifier::default());
    let (sink, handle) = ObjectSink::new(
        test_config(spool.path(), 1, Duration::from_secs(3600)),
        fs_operator(&blocked.join("sub")),
        Arc::clone(&notifier) as Arc<dyn crate::notify::Notifier>,
        "edge-01.prod",
        json_line,
        CancellationToken::new(),
    );
    let task = tokio::spawn(sink.run());

    handle.log(&test_event(1)).unwrap();
    drop(handle);
    let snapshot = task.await.unwrap();

    assert_eq!(snapshot.uploads_completed, 0);
    assert_eq!(snapshot.uploads_failed, 1);
    assert!(snapshot.upload_retries >= 1);

    // Error notification was emitted and the spool file is retained.
    assert_eq!(notifier.errors.lock().await.len(), 1);
    assert_eq!(spool_leftovers(spool.path()), 1);
}

#[tokio::test]
async fn test_cancel_seals_and_drains() {
    let spool = tempfile::tempdir().unwrap();
    let store = tempfile::tempdir().unwrap();
    let cancel = CancellationToken::new();

    let (sink, handle) = ObjectSink::new(
        test_config(spool.path(), 1_000_000, Duration::from_secs(3600)),
        fs_operator(store.path()),
        Arc::new(NoopNotifier),
        "edge-01.prod",
        json_line,
        cancel.clone(),
    );
    let task = tokio::spawn(sink.run());

    for n in 0..5 {
        handle.log(&test_event(n)).unwrap();
    }
    cancel.cancel();

    let snapshot = task.await.unwrap();
    assert_eq!(snapshot.lines_written, 5);
    let files = uploaded_files(store.path());
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].lines().count(), 5);

    // The handle outlives the task; further logs fail cleanly.
    assert!(matches!(
        handle.log(&test_event(9)),
        Err(SinkError::ChannelClosed)
    ));
}
