//! Transactional key-value plumbing under the schema graph.
//!
//! [`kv`] defines the consumed backing-store interface (snapshot reads,
//! atomic batch commit) and an in-memory reference implementation. [`buffer`]
//! overlays a transaction's write buffer on a snapshot so the graph layer
//! reads its own uncommitted writes.

pub mod buffer;
pub mod kv;

pub use buffer::{MergedScan, SchemaStorage};
pub use kv::{MemStore, SnapshotStore, StoreSnapshot, WriteBatch};
