use std::net::UdpSocket;
use std::time::Duration;

use super::*;
use crate::NoopStats;

/// Bind a local receiver and a client pointed at it.
fn test_pair() -> (UdpSocket, StatsdClient) {
    let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
    receiver
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    let addr = receiver.local_addr().unwrap();
    let client = StatsdClient::new(&addr.to_string(), "edge").unwrap();
    (receiver, client)
}

fn recv_payload(receiver: &UdpSocket) -> String {
    let mut buf = [0u8; 512];
    let n = receiver.recv(&mut buf).unwrap();
    String::from_utf8_lossy(&buf[..n]).into_owned()
}

#[test]
fn test_incr_unsampled_format() {
    let (receiver, client) = test_pair();

    client.incr("status_code.204", 1, 1.0);

    assert_eq!(recv_payload(&receiver), "edge.status_code.204:1|c");
}

#[test]
fn test_incr_sampled_format_carries_rate() {
    let (receiver, client) = test_pair();

    // Send until the sampling gate lets one through.
    for _ in 0..10_000 {
        client.incr("requests.hosts.example_com", 1, 0.5);
    }

    let payload = recv_payload(&receiver);
    assert!(payload.starts_with("edge.requests.hosts.example_com:1|c|@0.5"));
}

#[test]
fn test_timing_format() {
    let (receiver, client) = test_pair();

    client.timing("request_time.http", Duration::from_millis(42), 1.0);

    assert_eq!(recv_payload(&receiver), "edge.request_time.http:42|ms");
}

#[test]
fn test_zero_rate_sends_nothing() {
    let (receiver, client) = test_pair();
    receiver
        .set_read_timeout(Some(Duration::from_millis(100)))
        .unwrap();

    for _ in 0..100 {
        client.incr("never", 1, 0.0);
    }

    let mut buf = [0u8; 64];
    assert!(receiver.recv(&mut buf).is_err());
}

#[test]
fn test_sampled_bounds() {
    assert!(sampled(1.0));
    assert!(sampled(1.5));
    assert!(!sampled(0.0));
}

#[test]
fn test_noop_stats_is_silent() {
    // Just exercises the no-op path.
    let stats = NoopStats;
    stats.incr("anything", 1, 1.0);
    stats.timing("anything", Duration::from_secs(1), 1.0);
}
