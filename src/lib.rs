//! Transactional schema graph for a typed knowledge graph.
//!
//! The crate models a database schema as a graph of type vertices (entity,
//! relation, attribute and role types) connected by typed edges (`sub`,
//! `relates`, `owns`, `plays`), layered over an ordered key-value store:
//!
//! - [`encoding`] — the bit-exact key codec shared by every persisted entity.
//! - [`storage`] — the backing-store interface and the transaction's
//!   buffered, read-your-writes view of it.
//! - [`graph`] — the transactional schema graph itself: lazy vertex and edge
//!   loading, mirror-symmetric adjacencies, transitive-closure caches,
//!   structural validation and two-phase commit.

pub mod encoding;
pub mod error;
pub mod graph;
pub mod storage;

pub use crate::encoding::{Annotations, Direction, EdgeKind, Kind, ValueType, VertexId};
pub use crate::error::{Result, SchemaError};
pub use crate::graph::validation::Violation;
pub use crate::graph::{
    IdAllocator, InstanceQuery, NoInstances, Roots, SchemaGraph, SortedVertexIter, TypeEdge,
    TypeRef,
};
pub use crate::storage::{MemStore, SchemaStorage, SnapshotStore};
