use std::collections::HashSet;
use std::sync::Arc;

use chrono::{TimeZone, Utc};

use super::*;

#[test]
fn test_instance_id_format() {
    let info = InstanceInfo::new("edge-01", "prod");
    assert_eq!(info.instance_id(), "edge-01.prod");
}

#[test]
fn test_uuid_format() {
    let assigner = UuidAssigner::new(&InstanceInfo::new("edge-01", "prod"));
    let now = Utc.timestamp_opt(0x67878b25, 0).unwrap();

    let uuid = assigner.assign(now);
    assert_eq!(uuid, "edge-01.prod-67878b25-00000001");

    let uuid = assigner.assign(now);
    assert_eq!(uuid, "edge-01.prod-67878b25-00000002");
}

#[test]
fn test_uuid_counter_is_min_width() {
    let assigner = UuidAssigner::new(&InstanceInfo::new("h", "c"));
    // Early unix timestamps still render at least 8 hex digits.
    let now = Utc.timestamp_opt(1, 0).unwrap();
    assert_eq!(assigner.assign(now), "h.c-00000001-00000001");
}

#[test]
fn test_uuids_unique_across_threads() {
    let assigner = Arc::new(UuidAssigner::new(&InstanceInfo::new("h", "c")));
    let now = Utc::now();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let assigner = Arc::clone(&assigner);
        handles.push(std::thread::spawn(move || {
            (0..1000).map(|_| assigner.assign(now)).collect::<Vec<_>>()
        }));
    }

    let mut seen = HashSet::new();
    for handle in handles {
        for uuid in handle.join().unwrap() {
            assert!(seen.insert(uuid), "duplicate uuid assigned");
        }
    }
    assert_eq!(seen.len(), 8000);
    assert_eq!(assigner.assigned(), 8000);
}
