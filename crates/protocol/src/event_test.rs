use std::net::{IpAddr, Ipv4Addr};

use chrono::{TimeZone, Utc};

use super::*;

fn test_event() -> Event {
    Event::new(
        Utc.with_ymd_and_hms(2025, 1, 15, 10, 30, 45).unwrap(),
        Some(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 100))),
        "10.0.0.1, 192.168.1.100",
        "host.cluster-67878b25-00000001",
        "eyJ4IjoxfQ==",
        "",
        "internal",
    )
}

#[test]
fn test_to_line_is_single_line() {
    let line = test_event().to_line().unwrap();
    assert!(!line.contains('\n'));
    assert!(line.starts_with('{'));
    assert!(line.ends_with('}'));
}

#[test]
fn test_roundtrip() {
    let event = test_event();
    let line = event.to_line().unwrap();
    let parsed: Event = serde_json::from_str(&line).unwrap();
    assert_eq!(parsed, event);
}

#[test]
fn test_bytes_match_line() {
    let event = test_event();
    assert_eq!(event.to_bytes().unwrap(), event.to_line().unwrap().into_bytes());
}

#[test]
fn test_audit_line_format() {
    let event = test_event();
    let expected = format!(
        "[{}] host.cluster-67878b25-00000001",
        event.received_at.timestamp()
    );
    assert_eq!(event.audit_line(), expected);
}

#[test]
fn test_missing_client_ip_serializes_as_null() {
    let mut event = test_event();
    event.client_ip = None;
    let line = event.to_line().unwrap();
    assert!(line.contains("\"client_ip\":null"));
}
