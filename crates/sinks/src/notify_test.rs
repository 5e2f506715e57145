use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use super::*;

/// Minimal one-shot HTTP server that captures a request body.
async fn capture_one_request(listener: TcpListener) -> String {
    let (mut socket, _) = listener.accept().await.expect("accept");

    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = socket.read(&mut chunk).await.expect("read");
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = find_blank_line(&buf) {
            let head = String::from_utf8_lossy(&buf[..pos]).into_owned();
            let content_length = head
                .lines()
                .find_map(|l| l.to_ascii_lowercase().strip_prefix("content-length:").map(str::trim).map(String::from))
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(0);

            let mut body = buf[pos + 4..].to_vec();
            while body.len() < content_length {
                let n = socket.read(&mut chunk).await.expect("read body");
                body.extend_from_slice(&chunk[..n]);
            }

            socket
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n")
                .await
                .expect("write response");

            return String::from_utf8_lossy(&body).into_owned();
        }
    }
}

fn find_blank_line(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

#[tokio::test]
async fn test_http_notifier_receipt_document() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(capture_one_request(listener));

    let notifier = HttpNotifier::new(format!("http://{addr}/receipts"), "", 3);
    notifier.send_receipt("events/edge-01.prod/1736935205_0").await;

    let body = server.await.unwrap();
    let doc: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(doc["version"], 3);
    assert_eq!(doc["keyname"], "events/edge-01.prod/1736935205_0");
}

#[tokio::test]
async fn test_http_notifier_error_document() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(capture_one_request(listener));

    let notifier = HttpNotifier::new("", format!("http://{addr}/errors"), 1);
    notifier.send_error("upload failed after 3 attempts").await;

    let body = server.await.unwrap();
    let doc: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(doc["error"], "upload failed after 3 attempts");
}

#[tokio::test]
async fn test_http_notifier_empty_url_is_noop() {
    // Must complete without attempting a connection.
    let notifier = HttpNotifier::new("", "", 1);
    notifier.send_receipt("key").await;
    notifier.send_error("err").await;
}

#[tokio::test]
async fn test_noop_notifier() {
    let notifier = NoopNotifier;
    notifier.send_receipt("key").await;
    notifier.send_error("err").await;
}
