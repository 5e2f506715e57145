//! Beacon - Protocol
//!
//! The canonical event record produced by the edge, plus the process
//! identity used to stamp events with fleet-unique UUIDs.
//!
//! Every accepted tracking hit becomes one [`Event`]. Downstream consumers
//! (batch jobs reading the object store, stream consumers) reconcile the
//! two delivery paths by UUID, so UUID assignment lives here next to the
//! event model.

mod event;
mod identity;

pub use event::Event;
pub use identity::{InstanceInfo, UuidAssigner};
