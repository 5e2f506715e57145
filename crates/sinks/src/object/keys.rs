//! Object key generation
//!
//! Keys embed the configured prefix, the instance identity, the seal
//! timestamp and a rotating sequence number, so batch consumers can list
//! a prefix and attribute every file to the process that wrote it:
//!
//! ```text
//! {prefix}/{instance_id}/{unix_seconds}_{sequence}
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// Generates object keys for sealed files.
#[derive(Debug)]
pub struct KeyGenerator {
    prefix: String,
    instance_id: String,
    sequence: AtomicU64,
}

impl KeyGenerator {
    /// Create a generator for the given prefix and instance identity.
    pub fn new(prefix: impl Into<String>, instance_id: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            instance_id: instance_id.into(),
            sequence: AtomicU64::new(0),
        }
    }

    /// Next key, stamped with the given unix timestamp.
    pub fn next_key(&self, unix_seconds: i64) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        if self.prefix.is_empty() {
            format!("{}/{}_{}", self.instance_id, unix_seconds, seq)
        } else {
            format!("{}/{}/{}_{}", self.prefix, self.instance_id, unix_seconds, seq)
        }
    }
}

#[cfg(test)]
#[path = "keys_test.rs"]
mod keys_test;
