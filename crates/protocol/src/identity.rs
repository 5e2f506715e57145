//! Process identity and UUID assignment
//!
//! Each edge process derives an instance id from its host and cluster
//! environment. The id prefixes every UUID so identifiers stay unique
//! across the fleet with high probability; within a process, uniqueness
//! is guaranteed by a monotonically increasing counter.

use std::env;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};

/// Environment variable carrying the host name
const HOST_ENV: &str = "HOST";

/// Environment variable carrying the cluster name
const CLUSTER_ENV: &str = "CLOUD_CLUSTER";

/// Per-process identity derived from the deployment environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceInfo {
    /// Host name, from `HOST` (falls back to "localhost")
    pub host: String,

    /// Cluster name, from `CLOUD_CLUSTER` (falls back to "local-dev")
    pub cluster: String,
}

impl InstanceInfo {
    /// Build the identity from the process environment.
    pub fn from_env() -> Self {
        Self {
            host: env::var(HOST_ENV).unwrap_or_else(|_| "localhost".into()),
            cluster: env::var(CLUSTER_ENV).unwrap_or_else(|_| "local-dev".into()),
        }
    }

    /// Build an identity from explicit values (for tests and tooling).
    pub fn new(host: impl Into<String>, cluster: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            cluster: cluster.into(),
        }
    }

    /// The instance id string used as the UUID prefix and in object keys.
    pub fn instance_id(&self) -> String {
        format!("{}.{}", self.host, self.cluster)
    }
}

/// Assigns fleet-unique UUIDs of the form
/// `{instance_id}-{unix_seconds:08x}-{counter:08x}`.
///
/// The counter is a process-wide atomic; wraparound is acceptable within
/// process lifetime assumptions.
#[derive(Debug)]
pub struct UuidAssigner {
    instance_id: String,
    counter: AtomicU64,
}

impl UuidAssigner {
    /// Create an assigner for the given identity.
    pub fn new(instance: &InstanceInfo) -> Self {
        Self {
            instance_id: instance.instance_id(),
            counter: AtomicU64::new(0),
        }
    }

    /// Assign the next UUID, stamped with the given wall-clock time.
    pub fn assign(&self, now: DateTime<Utc>) -> String {
        let count = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}-{:08x}-{:08x}", self.instance_id, now.timestamp(), count)
    }

    /// Number of UUIDs assigned so far.
    pub fn assigned(&self) -> u64 {
        self.counter.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
#[path = "identity_test.rs"]
mod identity_test;
