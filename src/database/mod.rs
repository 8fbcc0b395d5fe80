//! The persistent stores: lifetime-partitioned metrics, the append-only
//! event log and the queue of assembled pings, each layered on its own
//! [`Store`](crate::storage::Store) root key.

pub mod events;
pub mod metrics;
pub mod pings;
