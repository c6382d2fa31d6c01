//! The transactional schema graph.
//!
//! A [`SchemaGraph`] is one transaction's view of the type schema: an arena
//! of vertices loaded lazily from storage or created in this transaction, a
//! label index, per-transaction transitive-closure caches, and the buffered
//! mutations that commit flushes to the backing store.
//!
//! Vertices reference each other by id, never by pointer; every edge is held
//! as a pair of mirror records, one in each endpoint's adjacency, and all
//! edge mutations go through the graph so both sides change in one call.

pub mod adjacency;
pub mod edge;
pub mod iter;
pub mod validation;
mod vertex;

pub use adjacency::TypeAdjacency;
pub use edge::{EdgeRecord, EdgeStatus, TypeEdge};
pub use iter::{SortedPairIter, SortedVertexIter};
pub use vertex::{TypeVertex, VertexStatus};

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::encoding::{
    vertex_keyspace_prefix, Annotations, Direction, EdgeKind, EdgeKey, EdgeValue, IndexKey, Kind,
    PropertyKey, PropertyTag, TypeKey, ValueType, VertexId, VERTEX_KEY_LEN,
};
use crate::error::{Result, SchemaError};
use crate::storage::{SchemaStorage, SnapshotStore};

const ALL_EDGE_KINDS: [EdgeKind; 5] = [
    EdgeKind::Sub,
    EdgeKind::Owns,
    EdgeKind::OwnsKey,
    EdgeKind::Plays,
    EdgeKind::Relates,
];

/// Identity of a type: kind, label, and scope for role types. Globally
/// unique by invariant.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct TypeRef {
    pub kind: Kind,
    pub label: String,
    pub scope: Option<String>,
}

impl TypeRef {
    pub fn new(kind: Kind, label: &str, scope: Option<&str>) -> Self {
        Self {
            kind,
            label: label.to_owned(),
            scope: scope.map(str::to_owned),
        }
    }

    fn index_key(&self) -> IndexKey {
        IndexKey::new(self.kind, &self.label, self.scope.as_deref())
    }
}

/// The instance-graph collaborator: the one question the schema layer asks
/// of the data layer.
pub trait InstanceQuery: Send {
    fn has_instances(&self, vertex: VertexId) -> bool;
}

/// Collaborator for schema-only deployments and tests.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoInstances;

impl InstanceQuery for NoInstances {
    fn has_instances(&self, _vertex: VertexId) -> bool {
        false
    }
}

/// Process-wide vertex-id allocator. Ids are handed out by atomic fetch-add
/// and never reused, even when the allocating transaction aborts.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next: AtomicU32,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(next: u32) -> Self {
        Self {
            next: AtomicU32::new(next),
        }
    }

    /// Rebuilds the allocator from persisted state: one past the highest
    /// vertex id found in the store.
    pub fn recover(store: &dyn SnapshotStore) -> Result<Self> {
        let snapshot = store.snapshot();
        let mut next = 0u32;
        for (key, _) in snapshot.scan(&vertex_keyspace_prefix()) {
            if key.len() != VERTEX_KEY_LEN {
                continue;
            }
            let vertex = TypeKey::decode(&key)?;
            next = next.max(vertex.id.0 + 1);
        }
        Ok(Self::starting_at(next))
    }

    pub fn next(&self) -> VertexId {
        VertexId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

/// Ids of the root vertices seeded by [`SchemaGraph::initialise`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Roots {
    pub thing: VertexId,
    pub entity: VertexId,
    pub relation: VertexId,
    pub attribute: VertexId,
    pub role: VertexId,
}

struct CacheEntry {
    epoch: u64,
    ids: Arc<Vec<VertexId>>,
}

/// Per-transaction memoisation of transitive closures, invalidated by the
/// mutation epoch.
#[derive(Default)]
struct ClosureCaches {
    supertypes: HashMap<VertexId, CacheEntry>,
    subtypes: HashMap<VertexId, CacheEntry>,
    related_roles: HashMap<VertexId, CacheEntry>,
    owns: HashMap<VertexId, CacheEntry>,
}

impl ClosureCaches {
    fn clear(&mut self) {
        self.supertypes.clear();
        self.subtypes.clear();
        self.related_roles.clear();
        self.owns.clear();
    }
}

/// One transaction's schema graph.
pub struct SchemaGraph {
    storage: SchemaStorage,
    allocator: Arc<IdAllocator>,
    instances: Box<dyn InstanceQuery>,
    vertices: HashMap<VertexId, TypeVertex>,
    index: HashMap<TypeRef, VertexId>,
    // Encoded index keys of renamed or deleted persisted entries.
    index_tombstones: Vec<Vec<u8>>,
    // Persisted edges removed in this transaction, canonical (from, kind, to).
    deleted_edges: HashSet<(VertexId, EdgeKind, VertexId)>,
    caches: ClosureCaches,
    epoch: u64,
    poisoned: bool,
    roots: Option<Roots>,
}

impl SchemaGraph {
    pub fn new(store: Arc<dyn SnapshotStore>, allocator: Arc<IdAllocator>) -> Self {
        Self::with_instances(store, allocator, Box::new(NoInstances))
    }

    pub fn with_instances(
        store: Arc<dyn SnapshotStore>,
        allocator: Arc<IdAllocator>,
        instances: Box<dyn InstanceQuery>,
    ) -> Self {
        Self {
            storage: SchemaStorage::new(store),
            allocator,
            instances,
            vertices: HashMap::new(),
            index: HashMap::new(),
            index_tombstones: Vec::new(),
            deleted_edges: HashSet::new(),
            caches: ClosureCaches::default(),
            epoch: 0,
            poisoned: false,
            roots: None,
        }
    }

    // ---- lifecycle ------------------------------------------------------

    pub fn is_initialised(&mut self) -> Result<bool> {
        if self.roots.is_some() {
            return Ok(true);
        }
        Ok(self.get_typed(Kind::Thing, "thing", None)?.is_some())
    }

    /// Seeds the root vertices on an empty store. Roots are abstract and
    /// immutable from here on.
    pub fn initialise(&mut self) -> Result<Roots> {
        self.ensure_usable()?;
        if self.is_initialised()? {
            return Err(SchemaError::InvalidArgument(
                "schema graph is already initialised".into(),
            ));
        }
        let thing = self.create_vertex(Kind::Thing, "thing", None, true)?;
        let entity = self.create_vertex(Kind::EntityType, "entity", None, true)?;
        let relation = self.create_vertex(Kind::RelationType, "relation", None, true)?;
        let attribute = self.create_vertex(Kind::AttributeType, "attribute", None, true)?;
        let role = self.create_vertex(Kind::RoleType, "role", Some("relation"), true)?;

        for sub in [entity, relation, attribute] {
            self.put_edge(EdgeKind::Sub, sub, thing, None, Annotations::none())?;
        }
        self.put_edge(EdgeKind::Relates, relation, role, None, Annotations::none())?;

        let roots = Roots {
            thing,
            entity,
            relation,
            attribute,
            role,
        };
        self.roots = Some(roots);
        info!("schema graph initialised");
        Ok(roots)
    }

    pub fn roots(&mut self) -> Result<Roots> {
        if let Some(roots) = self.roots {
            return Ok(roots);
        }
        let missing = || SchemaError::Corruption("schema graph is not initialised".into());
        let thing = self.get_typed(Kind::Thing, "thing", None)?.ok_or_else(missing)?;
        let entity = self
            .get_typed(Kind::EntityType, "entity", None)?
            .ok_or_else(missing)?;
        let relation = self
            .get_typed(Kind::RelationType, "relation", None)?
            .ok_or_else(missing)?;
        let attribute = self
            .get_typed(Kind::AttributeType, "attribute", None)?
            .ok_or_else(missing)?;
        let role = self
            .get_typed(Kind::RoleType, "role", Some("relation"))?
            .ok_or_else(missing)?;
        let roots = Roots {
            thing,
            entity,
            relation,
            attribute,
            role,
        };
        self.roots = Some(roots);
        Ok(roots)
    }

    /// Commits buffered schema changes: a local validation pass over the
    /// mutated state, then an atomic flush to the backing store.
    pub fn commit(&mut self, timeout: Duration) -> Result<u64> {
        self.ensure_usable()?;
        let violations = validation::commit_violations(self)?;
        if !violations.is_empty() {
            warn!(count = violations.len(), "commit validation failed");
            return Err(SchemaError::Validation(violations));
        }
        self.flush()?;
        match self.storage.commit(timeout) {
            Ok(version) => {
                info!(version, "schema graph committed");
                self.finish_commit();
                Ok(version)
            }
            Err(err) => {
                if !err.is_recoverable() {
                    self.poison();
                }
                Err(err)
            }
        }
    }

    /// Discards every buffered change, cache and loaded vertex.
    pub fn rollback(&mut self) {
        self.storage.rollback();
        self.vertices.clear();
        self.index.clear();
        self.index_tombstones.clear();
        self.deleted_edges.clear();
        self.caches.clear();
        self.roots = None;
        self.epoch += 1;
        self.poisoned = false;
        debug!("schema graph rolled back");
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.poisoned {
            return Err(SchemaError::TransactionPoisoned);
        }
        Ok(())
    }

    fn poison(&mut self) {
        self.poisoned = true;
    }

    fn bump_epoch(&mut self) {
        self.epoch += 1;
    }

    // ---- vertex access --------------------------------------------------

    pub(crate) fn vertex(&self, id: VertexId) -> Result<&TypeVertex> {
        self.vertices
            .get(&id)
            .ok_or_else(|| SchemaError::Corruption(format!("vertex {id:?} is not materialised")))
    }

    fn vertex_mut(&mut self, id: VertexId) -> Result<&mut TypeVertex> {
        self.vertices
            .get_mut(&id)
            .ok_or_else(|| SchemaError::Corruption(format!("vertex {id:?} is not materialised")))
    }

    fn materialise(&mut self, key: TypeKey) -> VertexId {
        self.vertices
            .entry(key.id)
            .or_insert_with(|| TypeVertex::stub(key.id, key.kind));
        key.id
    }

    pub fn kind_of(&self, id: VertexId) -> Result<Kind> {
        Ok(self.vertex(id)?.kind())
    }

    pub fn label_of(&mut self, id: VertexId) -> Result<String> {
        self.load_properties(id)?;
        Ok(self.vertex(id)?.label().to_owned())
    }

    pub fn scope_of(&mut self, id: VertexId) -> Result<Option<String>> {
        self.load_properties(id)?;
        Ok(self.vertex(id)?.scope().map(str::to_owned))
    }

    pub fn scoped_label_of(&mut self, id: VertexId) -> Result<String> {
        self.load_properties(id)?;
        Ok(self.vertex(id)?.scoped_label())
    }

    pub fn is_abstract(&mut self, id: VertexId) -> Result<bool> {
        self.load_properties(id)?;
        Ok(self.vertex(id)?.is_abstract())
    }

    pub fn value_type_of(&mut self, id: VertexId) -> Result<Option<ValueType>> {
        self.load_properties(id)?;
        Ok(self.vertex(id)?.value_type())
    }

    pub fn is_root(&mut self, id: VertexId) -> Result<bool> {
        self.load_properties(id)?;
        Ok(self.vertex(id)?.is_root())
    }

    pub(crate) fn has_instances(&self, id: VertexId) -> bool {
        self.instances.has_instances(id)
    }

    /// Fetches persisted scalar properties on first access.
    pub(crate) fn load_properties(&mut self, id: VertexId) -> Result<()> {
        let (loaded, key) = {
            let vertex = self.vertex(id)?;
            (vertex.properties_loaded, vertex.type_key())
        };
        if loaded {
            return Ok(());
        }
        let read_string = |storage: &SchemaStorage, tag| -> Result<Option<String>> {
            storage
                .get(&PropertyKey::new(key, tag).encode())
                .map(|bytes| {
                    String::from_utf8(bytes).map_err(|_| {
                        SchemaError::Corruption("vertex property is not UTF-8".into())
                    })
                })
                .transpose()
        };
        let label = read_string(&self.storage, PropertyTag::Label)?;
        let scope = read_string(&self.storage, PropertyTag::Scope)?;
        let is_abstract = self
            .storage
            .get(&PropertyKey::new(key, PropertyTag::Abstract).encode())
            .is_some();
        let value_type = self
            .storage
            .get(&PropertyKey::new(key, PropertyTag::ValueType).encode())
            .map(|bytes| match bytes.as_slice() {
                [byte] => ValueType::from_u8(*byte),
                _ => Err(SchemaError::Corruption("value type payload malformed".into())),
            })
            .transpose()?;

        let vertex = self.vertex_mut(id)?;
        if let Some(label) = label {
            vertex.label = label;
        }
        vertex.scope = scope;
        vertex.is_abstract = is_abstract;
        vertex.value_type = value_type;
        vertex.properties_loaded = true;

        let reference = TypeRef {
            kind: key.kind,
            label: self.vertex(id)?.label().to_owned(),
            scope: self.vertex(id)?.scope().map(str::to_owned),
        };
        self.index.entry(reference).or_insert(id);
        Ok(())
    }

    // ---- label index ----------------------------------------------------

    /// Looks a type up by label, probing role types when a scope is given
    /// and the thing kinds otherwise. Labels are unique across kinds.
    pub fn get_type(&mut self, label: &str, scope: Option<&str>) -> Result<Option<VertexId>> {
        self.ensure_usable()?;
        let kinds: &[Kind] = if scope.is_some() {
            &[Kind::RoleType]
        } else {
            &[
                Kind::Thing,
                Kind::EntityType,
                Kind::RelationType,
                Kind::AttributeType,
            ]
        };
        for &kind in kinds {
            if let Some(id) = self.get_typed(kind, label, scope)? {
                return Ok(Some(id));
            }
        }
        Ok(None)
    }

    pub(crate) fn get_typed(
        &mut self,
        kind: Kind,
        label: &str,
        scope: Option<&str>,
    ) -> Result<Option<VertexId>> {
        let reference = TypeRef::new(kind, label, scope);
        if let Some(&id) = self.index.get(&reference) {
            return Ok(Some(id));
        }
        let Some(value) = self.storage.get(&reference.index_key().encode()) else {
            return Ok(None);
        };
        let id = VertexId::from_bytes(&value)
            .map_err(|_| SchemaError::Corruption("label index payload malformed".into()))?;
        if let Some(existing) = self.vertices.get(&id) {
            // A persisted entry whose vertex was tombstoned in this
            // transaction no longer resolves.
            if existing.status() == VertexStatus::Deleted {
                return Ok(None);
            }
        }
        self.materialise(TypeKey::new(kind, id));
        self.load_properties(id)?;
        self.index.insert(reference, id);
        Ok(Some(id))
    }

    // ---- edge loading and mutation --------------------------------------

    fn ensure_edges_loaded(
        &mut self,
        id: VertexId,
        direction: Direction,
        kind: EdgeKind,
    ) -> Result<()> {
        let (status, key, loaded) = {
            let vertex = self.vertex(id)?;
            (
                vertex.status(),
                vertex.type_key(),
                vertex.adjacency(direction).is_loaded(kind),
            )
        };
        if loaded {
            return Ok(());
        }
        if status == VertexStatus::Buffered {
            // Created in this transaction: nothing persisted to load.
            self.vertex_mut(id)?.adjacency_mut(direction).mark_loaded(kind);
            return Ok(());
        }
        let prefix = key.edge_prefix(direction, kind);
        let entries = self
            .storage
            .scan(&prefix)
            .map(|(raw_key, raw_value)| {
                Ok((EdgeKey::decode(&raw_key)?, EdgeValue::decode(&raw_value)?))
            })
            .collect::<Result<Vec<_>>>()?;
        for (edge_key, value) in entries {
            let peer = edge_key.peer;
            let (from, to) = match direction {
                Direction::Out => (id, peer.id),
                Direction::In => (peer.id, id),
            };
            if self.deleted_edges.contains(&(from, kind, to)) {
                continue;
            }
            self.materialise(peer);
            if let Some(overridden) = value.overridden {
                self.materialise(overridden);
            }
            let record = EdgeRecord::persisted(value.overridden.map(|k| k.id), value.annotations);
            self.vertex_mut(id)?
                .adjacency_mut(direction)
                .cache(kind, peer.id, record);
            self.vertex_mut(peer.id)?
                .adjacency_mut(direction.reversed())
                .cache(kind, id, record);
        }
        self.vertex_mut(id)?.adjacency_mut(direction).mark_loaded(kind);
        Ok(())
    }

    /// Inserts an edge into both endpoints' adjacencies. Idempotent when an
    /// equal edge already exists; an existing edge with different slots is
    /// rewritten.
    pub(crate) fn put_edge(
        &mut self,
        kind: EdgeKind,
        from: VertexId,
        to: VertexId,
        overridden: Option<VertexId>,
        annotations: Annotations,
    ) -> Result<()> {
        self.ensure_edges_loaded(from, Direction::Out, kind)?;
        self.ensure_edges_loaded(to, Direction::In, kind)?;
        self.deleted_edges.remove(&(from, kind, to));
        if let Some(existing) = self.vertex(from)?.outs.get(kind, to).copied() {
            if existing.overridden == overridden && existing.annotations == annotations {
                return Ok(());
            }
        }
        let record = EdgeRecord::buffered(overridden, annotations);
        self.vertex_mut(from)?.outs.insert(kind, to, record);
        self.vertex_mut(to)?.ins.insert(kind, from, record);
        self.bump_epoch();
        Ok(())
    }

    /// Removes one edge and its mirror. Missing on both sides is a no-op;
    /// missing on exactly one side is a mirror breach and poisons the
    /// transaction.
    pub(crate) fn remove_edge(&mut self, kind: EdgeKind, from: VertexId, to: VertexId) -> Result<()> {
        self.ensure_edges_loaded(from, Direction::Out, kind)?;
        self.ensure_edges_loaded(to, Direction::In, kind)?;
        let out = self.vertex_mut(from)?.outs.remove(kind, to);
        let inn = self.vertex_mut(to)?.ins.remove(kind, from);
        match (out, inn) {
            (Some(_), Some(_)) => {
                // Tombstoned even when the removed record was only buffered:
                // an earlier incarnation of the edge may be persisted, and a
                // delete of an absent key is a no-op.
                self.deleted_edges.insert((from, kind, to));
                self.bump_epoch();
                Ok(())
            }
            (None, None) => Ok(()),
            _ => {
                error!(?from, ?to, ?kind, "adjacency mirror out of sync");
                self.poison();
                Err(SchemaError::MirrorAsymmetry { from, to })
            }
        }
    }

    /// Removes every edge of one kind in one direction, mirrors included.
    pub(crate) fn delete_edges(
        &mut self,
        id: VertexId,
        direction: Direction,
        kind: EdgeKind,
    ) -> Result<()> {
        self.ensure_edges_loaded(id, direction, kind)?;
        let peers: Vec<_> = self.vertex(id)?.adjacency(direction).peers(kind).collect();
        for peer in peers {
            let (from, to) = match direction {
                Direction::Out => (id, peer),
                Direction::In => (peer, id),
            };
            self.remove_edge(kind, from, to)?;
        }
        Ok(())
    }

    /// Removes every incident edge of a vertex.
    pub(crate) fn delete_all_edges(&mut self, id: VertexId) -> Result<()> {
        for kind in ALL_EDGE_KINDS {
            self.delete_edges(id, Direction::Out, kind)?;
            self.delete_edges(id, Direction::In, kind)?;
        }
        Ok(())
    }

    // ---- adjacency reads ------------------------------------------------

    /// Outbound adjacent vertices, ascending by id. The iterator snapshots
    /// its elements and stays valid under later mutation.
    pub fn outs(&mut self, id: VertexId, kind: EdgeKind) -> Result<SortedVertexIter> {
        self.ensure_usable()?;
        self.ensure_edges_loaded(id, Direction::Out, kind)?;
        Ok(self.vertex(id)?.outs.peers(kind))
    }

    /// Inbound adjacent vertices, ascending by id.
    pub fn ins(&mut self, id: VertexId, kind: EdgeKind) -> Result<SortedVertexIter> {
        self.ensure_usable()?;
        self.ensure_edges_loaded(id, Direction::In, kind)?;
        Ok(self.vertex(id)?.ins.peers(kind))
    }

    /// Outbound `(peer, overridden)` pairs, ascending by peer id.
    pub fn outs_with_overridden(&mut self, id: VertexId, kind: EdgeKind) -> Result<SortedPairIter> {
        self.ensure_usable()?;
        self.ensure_edges_loaded(id, Direction::Out, kind)?;
        Ok(self.vertex(id)?.outs.peers_and_overridden(kind))
    }

    /// Inbound `(peer, overridden)` pairs, ascending by peer id.
    pub fn ins_with_overridden(&mut self, id: VertexId, kind: EdgeKind) -> Result<SortedPairIter> {
        self.ensure_usable()?;
        self.ensure_edges_loaded(id, Direction::In, kind)?;
        Ok(self.vertex(id)?.ins.peers_and_overridden(kind))
    }

    /// One edge by kind and adjacent vertex, or absent.
    pub fn edge(
        &mut self,
        id: VertexId,
        direction: Direction,
        kind: EdgeKind,
        peer: VertexId,
    ) -> Result<Option<TypeEdge>> {
        self.ensure_usable()?;
        self.ensure_edges_loaded(id, direction, kind)?;
        let record = self.vertex(id)?.adjacency(direction).get(kind, peer).copied();
        Ok(record.map(|record| {
            let (from, to) = match direction {
                Direction::Out => (id, peer),
                Direction::In => (peer, id),
            };
            TypeEdge::new(kind, from, to, &record)
        }))
    }

    // ---- transitive closures --------------------------------------------

    /// The single direct supertype, or none for a root.
    pub fn supertype(&mut self, id: VertexId) -> Result<Option<VertexId>> {
        self.ensure_edges_loaded(id, Direction::Out, EdgeKind::Sub)?;
        Ok(self.vertex(id)?.outs.peers(EdgeKind::Sub).next())
    }

    /// Strict ancestors in supertype-walk order, memoised per epoch. A cycle
    /// is an invariant breach: the walk fails and poisons the transaction.
    pub fn supertypes(&mut self, id: VertexId) -> Result<Arc<Vec<VertexId>>> {
        self.ensure_usable()?;
        if let Some(entry) = self.caches.supertypes.get(&id) {
            if entry.epoch == self.epoch {
                return Ok(Arc::clone(&entry.ids));
            }
        }
        let mut chain = Vec::new();
        let mut seen: HashSet<VertexId> = HashSet::from([id]);
        let mut current = id;
        while let Some(next) = self.supertype(current)? {
            if !seen.insert(next) {
                let label = self.label_of(next).unwrap_or_default();
                error!(%label, "subtype hierarchy contains a cycle");
                self.poison();
                return Err(SchemaError::SchemaCycle(label));
            }
            chain.push(next);
            current = next;
        }
        let ids = Arc::new(chain);
        self.caches.supertypes.insert(
            id,
            CacheEntry {
                epoch: self.epoch,
                ids: Arc::clone(&ids),
            },
        );
        Ok(ids)
    }

    /// Strict descendants, ascending by id, memoised per epoch.
    pub fn subtypes(&mut self, id: VertexId) -> Result<Arc<Vec<VertexId>>> {
        self.ensure_usable()?;
        if let Some(entry) = self.caches.subtypes.get(&id) {
            if entry.epoch == self.epoch {
                return Ok(Arc::clone(&entry.ids));
            }
        }
        let mut collected = Vec::new();
        let mut seen: HashSet<VertexId> = HashSet::from([id]);
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            self.ensure_edges_loaded(current, Direction::In, EdgeKind::Sub)?;
            let children: Vec<_> = self.vertex(current)?.ins.peers(EdgeKind::Sub).collect();
            for child in children {
                if seen.insert(child) {
                    collected.push(child);
                    stack.push(child);
                }
            }
        }
        collected.sort_unstable();
        let ids = Arc::new(collected);
        self.caches.subtypes.insert(
            id,
            CacheEntry {
                epoch: self.epoch,
                ids: Arc::clone(&ids),
            },
        );
        Ok(ids)
    }

    /// Sorted supertype closure including the vertex itself.
    pub fn get_supertypes(&mut self, id: VertexId) -> Result<SortedVertexIter> {
        let mut ids: Vec<_> = self.supertypes(id)?.iter().copied().collect();
        ids.push(id);
        Ok(SortedVertexIter::from_unsorted(ids))
    }

    /// Sorted subtype closure including the vertex itself.
    pub fn get_subtypes(&mut self, id: VertexId) -> Result<SortedVertexIter> {
        let mut ids: Vec<_> = self.subtypes(id)?.iter().copied().collect();
        ids.push(id);
        Ok(SortedVertexIter::from_unsorted(ids))
    }

    /// The roles a relation type relates, declared and inherited, with
    /// override targets of declared roles excluded. Memoised per epoch.
    pub fn related_role_types(&mut self, relation: VertexId) -> Result<Arc<Vec<VertexId>>> {
        self.ensure_usable()?;
        if self.kind_of(relation)? != Kind::RelationType {
            return Err(SchemaError::InvalidArgument(
                "related roles are only defined for relation types".into(),
            ));
        }
        if let Some(entry) = self.caches.related_roles.get(&relation) {
            if entry.epoch == self.epoch {
                return Ok(Arc::clone(&entry.ids));
            }
        }
        let ancestors = self.supertypes(relation)?;
        let mut chain: Vec<VertexId> = vec![relation];
        for &ancestor in ancestors.iter() {
            if self.kind_of(ancestor)? == Kind::RelationType {
                chain.push(ancestor);
            }
        }
        let mut inherited: BTreeSet<VertexId> = BTreeSet::new();
        for &current in chain.iter().rev() {
            if let Some(entry) = self.caches.related_roles.get(&current) {
                if entry.epoch == self.epoch {
                    inherited = entry.ids.iter().copied().collect();
                    continue;
                }
            }
            let declared = self.declared_relates(current)?;
            for (_, overridden) in &declared {
                if let Some(overridden) = overridden {
                    inherited.remove(overridden);
                }
            }
            for (role, _) in &declared {
                inherited.insert(*role);
            }
            let ids = Arc::new(inherited.iter().copied().collect::<Vec<_>>());
            self.caches.related_roles.insert(
                current,
                CacheEntry {
                    epoch: self.epoch,
                    ids,
                },
            );
        }
        Ok(Arc::clone(&self.caches.related_roles[&relation].ids))
    }

    /// The attributes a type owns, declared and inherited, with override
    /// targets of declared ownerships excluded. Memoised per epoch.
    pub fn owns_closure(&mut self, owner: VertexId) -> Result<Arc<Vec<VertexId>>> {
        self.ensure_usable()?;
        if let Some(entry) = self.caches.owns.get(&owner) {
            if entry.epoch == self.epoch {
                return Ok(Arc::clone(&entry.ids));
            }
        }
        let ancestors = self.supertypes(owner)?;
        let mut chain: Vec<VertexId> = vec![owner];
        for &ancestor in ancestors.iter() {
            if self.kind_of(ancestor)? != Kind::Thing {
                chain.push(ancestor);
            }
        }
        let mut inherited: BTreeSet<VertexId> = BTreeSet::new();
        for &current in chain.iter().rev() {
            if let Some(entry) = self.caches.owns.get(&current) {
                if entry.epoch == self.epoch {
                    inherited = entry.ids.iter().copied().collect();
                    continue;
                }
            }
            let declared = self.declared_owns(current)?;
            for (_, overridden, _) in &declared {
                if let Some(overridden) = overridden {
                    inherited.remove(overridden);
                }
            }
            for (attribute, _, _) in &declared {
                inherited.insert(*attribute);
            }
            let ids = Arc::new(inherited.iter().copied().collect::<Vec<_>>());
            self.caches.owns.insert(
                current,
                CacheEntry {
                    epoch: self.epoch,
                    ids,
                },
            );
        }
        Ok(Arc::clone(&self.caches.owns[&owner].ids))
    }

    /// The roles a type plays, declared and inherited, with override targets
    /// of declared plays excluded. Computed per call.
    pub(crate) fn plays_closure(&mut self, player: VertexId) -> Result<Vec<VertexId>> {
        let ancestors = self.supertypes(player)?;
        let mut chain: Vec<VertexId> = vec![player];
        for &ancestor in ancestors.iter() {
            if self.kind_of(ancestor)? != Kind::Thing {
                chain.push(ancestor);
            }
        }
        let mut inherited: BTreeSet<VertexId> = BTreeSet::new();
        for &current in chain.iter().rev() {
            let declared = self.declared_plays(current)?;
            for (_, overridden) in &declared {
                if let Some(overridden) = overridden {
                    inherited.remove(overridden);
                }
            }
            for (role, _) in &declared {
                inherited.insert(*role);
            }
        }
        Ok(inherited.into_iter().collect())
    }

    // ---- declared-edge helpers ------------------------------------------

    pub(crate) fn declared_relates(
        &mut self,
        relation: VertexId,
    ) -> Result<Vec<(VertexId, Option<VertexId>)>> {
        self.ensure_edges_loaded(relation, Direction::Out, EdgeKind::Relates)?;
        Ok(self
            .vertex(relation)?
            .outs
            .peers_and_overridden(EdgeKind::Relates)
            .collect())
    }

    pub(crate) fn declared_owns(
        &mut self,
        owner: VertexId,
    ) -> Result<Vec<(VertexId, Option<VertexId>, Annotations)>> {
        self.ensure_edges_loaded(owner, Direction::Out, EdgeKind::Owns)?;
        self.ensure_edges_loaded(owner, Direction::Out, EdgeKind::OwnsKey)?;
        let vertex = self.vertex(owner)?;
        let mut declared: Vec<_> = [EdgeKind::Owns, EdgeKind::OwnsKey]
            .into_iter()
            .flat_map(|kind| {
                vertex
                    .outs
                    .range(kind)
                    .map(|((_, peer), record)| (*peer, record.overridden, record.annotations))
                    .collect::<Vec<_>>()
            })
            .collect();
        declared.sort_unstable_by_key(|(peer, _, _)| *peer);
        Ok(declared)
    }

    pub(crate) fn declared_plays(
        &mut self,
        player: VertexId,
    ) -> Result<Vec<(VertexId, Option<VertexId>)>> {
        self.ensure_edges_loaded(player, Direction::Out, EdgeKind::Plays)?;
        Ok(self
            .vertex(player)?
            .outs
            .peers_and_overridden(EdgeKind::Plays)
            .collect())
    }

    /// Annotations of the closest declared ownership of `attribute` on
    /// `owner`'s supertype chain, the owner itself included.
    pub(crate) fn effective_owns_annotations(
        &mut self,
        owner: VertexId,
        attribute: VertexId,
    ) -> Result<Option<Annotations>> {
        let ancestors = self.supertypes(owner)?;
        let chain: Vec<VertexId> = std::iter::once(owner)
            .chain(ancestors.iter().copied())
            .collect();
        for current in chain {
            if self.kind_of(current)? == Kind::Thing {
                continue;
            }
            for (attr, _, annotations) in self.declared_owns(current)? {
                if attr == attribute {
                    return Ok(Some(annotations));
                }
            }
        }
        Ok(None)
    }

    // ---- query surface --------------------------------------------------

    /// The roles related by a relation type: its declared roles, or the full
    /// inherited closure when `transitive`.
    pub fn get_relates(&mut self, relation: VertexId, transitive: bool) -> Result<SortedVertexIter> {
        if transitive {
            let ids = self.related_role_types(relation)?;
            Ok(SortedVertexIter::new(ids.as_ref().clone()))
        } else {
            self.outs(relation, EdgeKind::Relates)
        }
    }

    /// The override target of a declared role, hidden when it is the root
    /// role standing in for "no explicit override".
    pub fn get_relates_overridden(
        &mut self,
        relation: VertexId,
        role_label: &str,
    ) -> Result<Option<VertexId>> {
        self.ensure_usable()?;
        let relation_label = self.label_of(relation)?;
        let Some(role) = self.get_typed(Kind::RoleType, role_label, Some(&relation_label))? else {
            return Ok(None);
        };
        self.ensure_edges_loaded(relation, Direction::Out, EdgeKind::Relates)?;
        let overridden = self
            .vertex(relation)?
            .outs
            .get(EdgeKind::Relates, role)
            .and_then(|record| record.overridden);
        let root_role = self.roots()?.role;
        match overridden {
            Some(id) if id == root_role => Ok(None),
            other => Ok(other),
        }
    }

    /// The attributes owned by a type, optionally transitive, optionally
    /// filtered to ownerships whose annotations cover `filter`.
    pub fn get_owns(
        &mut self,
        owner: VertexId,
        transitive: bool,
        filter: Option<Annotations>,
    ) -> Result<SortedVertexIter> {
        let mut attributes: Vec<VertexId> = if transitive {
            self.owns_closure(owner)?.as_ref().clone()
        } else {
            self.declared_owns(owner)?
                .into_iter()
                .map(|(attr, _, _)| attr)
                .collect()
        };
        if let Some(filter) = filter {
            let mut kept = Vec::with_capacity(attributes.len());
            for attribute in attributes {
                let annotations = self
                    .effective_owns_annotations(owner, attribute)?
                    .unwrap_or_default();
                if annotations.covers(filter) {
                    kept.push(attribute);
                }
            }
            attributes = kept;
        }
        Ok(SortedVertexIter::from_unsorted(attributes))
    }

    /// The roles playable by a type, optionally transitive.
    pub fn get_plays(&mut self, player: VertexId, transitive: bool) -> Result<SortedVertexIter> {
        if transitive {
            let ids = self.plays_closure(player)?;
            Ok(SortedVertexIter::from_unsorted(ids))
        } else {
            self.outs(player, EdgeKind::Plays)
        }
    }

    // ---- mutations ------------------------------------------------------

    fn create_vertex(
        &mut self,
        kind: Kind,
        label: &str,
        scope: Option<&str>,
        is_abstract: bool,
    ) -> Result<VertexId> {
        let id = self.allocator.next();
        let mut vertex = TypeVertex::buffered(id, kind, label.to_owned(), scope.map(str::to_owned));
        vertex.is_abstract = is_abstract;
        self.vertices.insert(id, vertex);
        self.index.insert(TypeRef::new(kind, label, scope), id);
        self.bump_epoch();
        Ok(id)
    }

    /// Creates a fresh entity, relation or attribute type subtyping the root
    /// of its kind.
    pub fn create_type(&mut self, kind: Kind, label: &str) -> Result<VertexId> {
        self.ensure_usable()?;
        if !matches!(
            kind,
            Kind::EntityType | Kind::RelationType | Kind::AttributeType
        ) {
            return Err(SchemaError::InvalidArgument(
                "only entity, relation and attribute types can be created directly".into(),
            ));
        }
        if label.is_empty() {
            return Err(SchemaError::InvalidArgument("label must be non-empty".into()));
        }
        if self.get_type(label, None)?.is_some() {
            return Err(SchemaError::InvalidArgument(format!(
                "label '{label}' is already in use"
            )));
        }
        let roots = self.roots()?;
        let root = match kind {
            Kind::EntityType => roots.entity,
            Kind::RelationType => roots.relation,
            Kind::AttributeType => roots.attribute,
            _ => unreachable!(),
        };
        let id = self.create_vertex(kind, label, None, false)?;
        self.put_edge(EdgeKind::Sub, id, root, None, Annotations::none())?;
        debug!(label, ?kind, "type created");
        Ok(id)
    }

    /// Tombstones a type and removes every incident edge. A relation type
    /// takes its declared roles with it.
    pub fn delete_type(&mut self, id: VertexId) -> Result<()> {
        self.ensure_usable()?;
        let label = self.scoped_label_of(id)?;
        if self.vertex(id)?.is_root() {
            return Err(SchemaError::RootTypeMutation(label));
        }
        let violations = validation::validate_delete(self, id)?;
        if !violations.is_empty() {
            return Err(SchemaError::Validation(violations));
        }
        if self.kind_of(id)? == Kind::RelationType {
            let roles: Vec<_> = self
                .declared_relates(id)?
                .into_iter()
                .map(|(role, _)| role)
                .collect();
            for role in roles {
                self.delete_vertex_internal(role)?;
            }
        }
        self.delete_vertex_internal(id)?;
        debug!(%label, "type deleted");
        Ok(())
    }

    fn delete_vertex_internal(&mut self, id: VertexId) -> Result<()> {
        self.load_properties(id)?;
        self.delete_all_edges(id)?;
        let (reference, status) = {
            let vertex = self.vertex(id)?;
            (
                TypeRef {
                    kind: vertex.kind(),
                    label: vertex.label().to_owned(),
                    scope: vertex.scope().map(str::to_owned),
                },
                vertex.status(),
            )
        };
        self.index.remove(&reference);
        if status == VertexStatus::Buffered {
            // Never persisted: vanish without a tombstone. No edge touching
            // this vertex can be persisted either.
            self.vertices.remove(&id);
            self.deleted_edges
                .retain(|&(from, _, to)| from != id && to != id);
        } else {
            self.index_tombstones.push(reference.index_key().encode());
            self.vertex_mut(id)?.status = VertexStatus::Deleted;
        }
        self.bump_epoch();
        Ok(())
    }

    /// Replaces the single outbound `SUB` edge of `sub` after validating the
    /// new hierarchy.
    pub fn set_supertype(&mut self, sub: VertexId, new_super: VertexId) -> Result<()> {
        self.ensure_usable()?;
        let label = self.label_of(sub)?;
        if self.vertex(sub)?.is_root() {
            return Err(SchemaError::RootTypeMutation(label));
        }
        if self.kind_of(sub)? != self.kind_of(new_super)? {
            return Err(SchemaError::InvalidArgument(
                "subtype and supertype must share a kind".into(),
            ));
        }
        let violations = validation::validate_set_supertype(self, sub, new_super)?;
        if !violations.is_empty() {
            return Err(SchemaError::Validation(violations));
        }
        self.ensure_edges_loaded(sub, Direction::Out, EdgeKind::Sub)?;
        let existing: Vec<_> = self.vertex(sub)?.outs.peers(EdgeKind::Sub).collect();
        for old in existing {
            self.remove_edge(EdgeKind::Sub, sub, old)?;
        }
        self.put_edge(EdgeKind::Sub, sub, new_super, None, Annotations::none())?;
        debug!(%label, "supertype replaced");
        Ok(())
    }

    /// Relabels a type. On a relation type the scopes of its declared roles
    /// follow the new label, since a role's scope is its relation's label.
    pub fn set_label(&mut self, id: VertexId, new_label: &str) -> Result<()> {
        self.ensure_usable()?;
        let old_label = self.label_of(id)?;
        if self.vertex(id)?.is_root() {
            return Err(SchemaError::RootTypeMutation(old_label));
        }
        if new_label.is_empty() {
            return Err(SchemaError::InvalidArgument("label must be non-empty".into()));
        }
        if new_label == old_label {
            return Ok(());
        }
        let scope = self.scope_of(id)?;
        let taken = match &scope {
            Some(scope) => self
                .get_typed(Kind::RoleType, new_label, Some(scope))?
                .is_some(),
            None => self.get_type(new_label, None)?.is_some(),
        };
        if taken {
            return Err(SchemaError::InvalidArgument(format!(
                "label '{new_label}' is already in use"
            )));
        }
        self.rename_vertex(id, new_label, scope.as_deref())?;
        if self.kind_of(id)? == Kind::RelationType {
            let roles: Vec<_> = self
                .declared_relates(id)?
                .into_iter()
                .map(|(role, _)| role)
                .collect();
            for role in roles {
                let role_label = self.label_of(role)?;
                self.rename_vertex(role, &role_label, Some(new_label))?;
            }
        }
        debug!(%old_label, new_label, "type relabelled");
        Ok(())
    }

    fn rename_vertex(
        &mut self,
        id: VertexId,
        new_label: &str,
        new_scope: Option<&str>,
    ) -> Result<()> {
        self.load_properties(id)?;
        let (old_ref, status) = {
            let vertex = self.vertex(id)?;
            (
                TypeRef {
                    kind: vertex.kind(),
                    label: vertex.label().to_owned(),
                    scope: vertex.scope().map(str::to_owned),
                },
                vertex.status(),
            )
        };
        self.index.remove(&old_ref);
        if status != VertexStatus::Buffered {
            self.index_tombstones.push(old_ref.index_key().encode());
        }
        {
            let vertex = self.vertex_mut(id)?;
            vertex.label = new_label.to_owned();
            vertex.scope = new_scope.map(str::to_owned);
            vertex.mark_modified();
        }
        self.index
            .insert(TypeRef::new(old_ref.kind, new_label, new_scope), id);
        self.bump_epoch();
        Ok(())
    }

    /// Marks a type abstract. Rejected while instances of it exist.
    pub fn set_abstract(&mut self, id: VertexId) -> Result<()> {
        self.ensure_usable()?;
        let label = self.label_of(id)?;
        if self.vertex(id)?.is_root() {
            return Err(SchemaError::RootTypeMutation(label));
        }
        if self.vertex(id)?.is_abstract() {
            return Ok(());
        }
        let violations = validation::validate_set_abstract(self, id)?;
        if !violations.is_empty() {
            return Err(SchemaError::Validation(violations));
        }
        let vertex = self.vertex_mut(id)?;
        vertex.is_abstract = true;
        vertex.mark_modified();
        self.bump_epoch();
        Ok(())
    }

    /// Clears abstractness. On a relation type the declared roles follow.
    pub fn unset_abstract(&mut self, id: VertexId) -> Result<()> {
        self.ensure_usable()?;
        let label = self.label_of(id)?;
        if self.vertex(id)?.is_root() {
            return Err(SchemaError::RootTypeMutation(label));
        }
        let violations = validation::validate_unset_abstract(self, id)?;
        if !violations.is_empty() {
            return Err(SchemaError::Validation(violations));
        }
        {
            let vertex = self.vertex_mut(id)?;
            vertex.is_abstract = false;
            vertex.mark_modified();
        }
        if self.kind_of(id)? == Kind::RelationType {
            let roles: Vec<_> = self
                .declared_relates(id)?
                .into_iter()
                .map(|(role, _)| role)
                .collect();
            for role in roles {
                self.load_properties(role)?;
                let vertex = self.vertex_mut(role)?;
                if vertex.is_abstract {
                    vertex.is_abstract = false;
                    vertex.mark_modified();
                }
            }
        }
        self.bump_epoch();
        Ok(())
    }

    /// Sets the value type of an attribute type. Immutable once persisted.
    pub fn set_value_type(&mut self, id: VertexId, value_type: ValueType) -> Result<()> {
        self.ensure_usable()?;
        let label = self.label_of(id)?;
        if self.vertex(id)?.is_root() {
            return Err(SchemaError::RootTypeMutation(label));
        }
        if self.kind_of(id)? != Kind::AttributeType {
            return Err(SchemaError::InvalidArgument(
                "value types apply only to attribute types".into(),
            ));
        }
        match self.vertex(id)?.value_type() {
            Some(existing) if existing == value_type => Ok(()),
            Some(_) => Err(SchemaError::InvalidArgument(format!(
                "value type of '{label}' cannot be changed"
            ))),
            None => {
                let vertex = self.vertex_mut(id)?;
                vertex.value_type = Some(value_type);
                vertex.mark_modified();
                self.bump_epoch();
                Ok(())
            }
        }
    }

    /// Declares that a relation relates a role, creating the role type
    /// scoped by the relation's label, or reusing the existing one. With an
    /// `overridden_label` the new role shadows the named inherited role;
    /// without one it shadows the root role.
    pub fn set_relates(
        &mut self,
        relation: VertexId,
        role_label: &str,
        overridden_label: Option<&str>,
    ) -> Result<()> {
        self.ensure_usable()?;
        let relation_label = self.label_of(relation)?;
        if self.vertex(relation)?.is_root() {
            return Err(SchemaError::RootTypeMutation(relation_label));
        }
        if self.kind_of(relation)? != Kind::RelationType {
            return Err(SchemaError::InvalidArgument(
                "only relation types relate roles".into(),
            ));
        }
        if role_label.is_empty() {
            return Err(SchemaError::InvalidArgument("label must be non-empty".into()));
        }
        let violations =
            validation::validate_relates_add(self, relation, role_label, overridden_label)?;
        if !violations.is_empty() {
            return Err(SchemaError::Validation(violations));
        }
        let overridden = match overridden_label {
            Some(target_label) => {
                Some(self.resolve_inherited_role(relation, target_label)?.ok_or_else(|| {
                    // Unreachable after validation; kept as a hard stop.
                    SchemaError::Corruption("validated override target vanished".into())
                })?)
            }
            None => None,
        };
        let role = match self.get_typed(Kind::RoleType, role_label, Some(&relation_label))? {
            Some(existing) => existing,
            None => self.create_vertex(Kind::RoleType, role_label, Some(&relation_label), false)?,
        };
        let root_role = self.roots()?.role;
        let role_super = overridden.unwrap_or(root_role);
        self.ensure_edges_loaded(role, Direction::Out, EdgeKind::Sub)?;
        let old_supers: Vec<_> = self.vertex(role)?.outs.peers(EdgeKind::Sub).collect();
        for old in old_supers {
            self.remove_edge(EdgeKind::Sub, role, old)?;
        }
        self.put_edge(EdgeKind::Sub, role, role_super, None, Annotations::none())?;
        self.put_edge(
            EdgeKind::Relates,
            relation,
            role,
            Some(overridden.unwrap_or(root_role)),
            Annotations::none(),
        )?;
        debug!(relation = %relation_label, role = role_label, "relates declared");
        Ok(())
    }

    /// Undeclares a role. The role type is deleted with its edges; rejected
    /// while a subtype overrides the role.
    pub fn unset_relates(&mut self, relation: VertexId, role_label: &str) -> Result<()> {
        self.ensure_usable()?;
        let relation_label = self.label_of(relation)?;
        if self.vertex(relation)?.is_root() {
            return Err(SchemaError::RootTypeMutation(relation_label));
        }
        let role = self
            .get_typed(Kind::RoleType, role_label, Some(&relation_label))?
            .ok_or_else(|| {
                SchemaError::TypeNotFound(format!("{relation_label}:{role_label}"))
            })?;
        self.ensure_edges_loaded(relation, Direction::Out, EdgeKind::Relates)?;
        if self.vertex(relation)?.outs.get(EdgeKind::Relates, role).is_none() {
            return Err(SchemaError::TypeNotFound(format!(
                "{relation_label}:{role_label}"
            )));
        }
        let violations = validation::validate_relates_remove(self, relation, role)?;
        if !violations.is_empty() {
            return Err(SchemaError::Validation(violations));
        }
        self.delete_vertex_internal(role)?;
        debug!(relation = %relation_label, role = role_label, "relates removed");
        Ok(())
    }

    /// Declares an attribute ownership, optionally overriding an inherited
    /// one, with `key`/`unique` annotations.
    pub fn set_owns(
        &mut self,
        owner: VertexId,
        attribute: VertexId,
        overridden: Option<VertexId>,
        annotations: Annotations,
    ) -> Result<()> {
        self.ensure_usable()?;
        let owner_label = self.label_of(owner)?;
        if self.vertex(owner)?.is_root() {
            return Err(SchemaError::RootTypeMutation(owner_label));
        }
        if !matches!(self.kind_of(owner)?, Kind::EntityType | Kind::RelationType) {
            return Err(SchemaError::InvalidArgument(
                "only entity and relation types own attributes".into(),
            ));
        }
        if self.kind_of(attribute)? != Kind::AttributeType {
            return Err(SchemaError::InvalidArgument(
                "only attribute types can be owned".into(),
            ));
        }
        let violations =
            validation::validate_owns_add(self, owner, attribute, overridden, annotations)?;
        if !violations.is_empty() {
            return Err(SchemaError::Validation(violations));
        }
        // Redeclaration replaces the previous edge, whichever flavour it had.
        for kind in [EdgeKind::Owns, EdgeKind::OwnsKey] {
            self.ensure_edges_loaded(owner, Direction::Out, kind)?;
            if self.vertex(owner)?.outs.get(kind, attribute).is_some() {
                self.remove_edge(kind, owner, attribute)?;
            }
        }
        let kind = if annotations.is_key() {
            EdgeKind::OwnsKey
        } else {
            EdgeKind::Owns
        };
        self.put_edge(kind, owner, attribute, overridden, annotations)?;
        Ok(())
    }

    /// Undeclares an attribute ownership.
    pub fn unset_owns(&mut self, owner: VertexId, attribute: VertexId) -> Result<()> {
        self.ensure_usable()?;
        let owner_label = self.label_of(owner)?;
        if self.vertex(owner)?.is_root() {
            return Err(SchemaError::RootTypeMutation(owner_label));
        }
        let violations = validation::validate_owns_remove(self, owner, attribute)?;
        if !violations.is_empty() {
            return Err(SchemaError::Validation(violations));
        }
        let mut removed = false;
        for kind in [EdgeKind::Owns, EdgeKind::OwnsKey] {
            self.ensure_edges_loaded(owner, Direction::Out, kind)?;
            if self.vertex(owner)?.outs.get(kind, attribute).is_some() {
                self.remove_edge(kind, owner, attribute)?;
                removed = true;
            }
        }
        if !removed {
            let attribute_label = self.label_of(attribute)?;
            return Err(SchemaError::TypeNotFound(format!(
                "'{owner_label}' does not own '{attribute_label}'"
            )));
        }
        Ok(())
    }

    /// Declares that a type plays a role, optionally overriding an inherited
    /// plays.
    pub fn set_plays(
        &mut self,
        player: VertexId,
        role: VertexId,
        overridden: Option<VertexId>,
    ) -> Result<()> {
        self.ensure_usable()?;
        let player_label = self.label_of(player)?;
        if self.vertex(player)?.is_root() {
            return Err(SchemaError::RootTypeMutation(player_label));
        }
        if !matches!(self.kind_of(player)?, Kind::EntityType | Kind::RelationType) {
            return Err(SchemaError::InvalidArgument(
                "only entity and relation types play roles".into(),
            ));
        }
        if self.kind_of(role)? != Kind::RoleType {
            return Err(SchemaError::InvalidArgument(
                "only role types can be played".into(),
            ));
        }
        let violations = validation::validate_plays_add(self, player, role, overridden)?;
        if !violations.is_empty() {
            return Err(SchemaError::Validation(violations));
        }
        self.put_edge(EdgeKind::Plays, player, role, overridden, Annotations::none())?;
        Ok(())
    }

    /// Undeclares a plays.
    pub fn unset_plays(&mut self, player: VertexId, role: VertexId) -> Result<()> {
        self.ensure_usable()?;
        let player_label = self.label_of(player)?;
        if self.vertex(player)?.is_root() {
            return Err(SchemaError::RootTypeMutation(player_label));
        }
        self.ensure_edges_loaded(player, Direction::Out, EdgeKind::Plays)?;
        if self.vertex(player)?.outs.get(EdgeKind::Plays, role).is_none() {
            let role_label = self.scoped_label_of(role)?;
            return Err(SchemaError::TypeNotFound(format!(
                "'{player_label}' does not play '{role_label}'"
            )));
        }
        let violations = validation::validate_plays_remove(self, player, role)?;
        if !violations.is_empty() {
            return Err(SchemaError::Validation(violations));
        }
        self.remove_edge(EdgeKind::Plays, player, role)?;
        Ok(())
    }

    /// Resolves an inherited role of `relation`'s supertype chain by label.
    pub(crate) fn resolve_inherited_role(
        &mut self,
        relation: VertexId,
        role_label: &str,
    ) -> Result<Option<VertexId>> {
        let Some(supertype) = self.supertype(relation)? else {
            return Ok(None);
        };
        let inherited = self.related_role_types(supertype)?;
        for &role in inherited.iter() {
            if self.label_of(role)? == role_label {
                return Ok(Some(role));
            }
        }
        Ok(None)
    }

    pub(crate) fn relation_vertices(&self) -> Vec<VertexId> {
        self.vertices
            .values()
            .filter(|vertex| {
                vertex.kind() == Kind::RelationType && vertex.status() != VertexStatus::Deleted
            })
            .map(|vertex| vertex.id())
            .collect()
    }

    // ---- flush ----------------------------------------------------------

    fn flush(&mut self) -> Result<()> {
        let Self {
            storage,
            vertices,
            deleted_edges,
            index_tombstones,
            ..
        } = self;

        let kind_of = |id: &VertexId| -> Result<Kind> {
            vertices
                .get(id)
                .map(TypeVertex::kind)
                .ok_or_else(|| SchemaError::Corruption(format!("vertex {id:?} vanished mid-flush")))
        };

        for &(from, kind, to) in deleted_edges.iter() {
            let edge_key = EdgeKey::new(
                TypeKey::new(kind_of(&from)?, from),
                Direction::Out,
                kind,
                TypeKey::new(kind_of(&to)?, to),
            );
            storage.delete(edge_key.encode());
            storage.delete(edge_key.mirror().encode());
        }
        for key in index_tombstones.iter() {
            storage.delete(key.clone());
        }

        for vertex in vertices.values() {
            let key = vertex.type_key();
            match vertex.status() {
                VertexStatus::Persisted => {}
                VertexStatus::Deleted => {
                    storage.delete(key.encode());
                    for tag in [
                        PropertyTag::Label,
                        PropertyTag::Scope,
                        PropertyTag::Abstract,
                        PropertyTag::ValueType,
                    ] {
                        storage.delete(PropertyKey::new(key, tag).encode());
                    }
                }
                VertexStatus::Buffered | VertexStatus::Modified => {
                    if vertex.status() == VertexStatus::Buffered {
                        storage.put(key.encode(), Vec::new());
                    }
                    storage.put(
                        PropertyKey::new(key, PropertyTag::Label).encode(),
                        vertex.label().as_bytes().to_vec(),
                    );
                    if let Some(scope) = vertex.scope() {
                        storage.put(
                            PropertyKey::new(key, PropertyTag::Scope).encode(),
                            scope.as_bytes().to_vec(),
                        );
                    }
                    let abstract_key = PropertyKey::new(key, PropertyTag::Abstract).encode();
                    if vertex.is_abstract() {
                        storage.put(abstract_key, vec![1]);
                    } else if vertex.status() == VertexStatus::Modified {
                        storage.delete(abstract_key);
                    }
                    if let Some(value_type) = vertex.value_type() {
                        storage.put(
                            PropertyKey::new(key, PropertyTag::ValueType).encode(),
                            vec![value_type.into_u8()],
                        );
                    }
                    storage.put(
                        IndexKey::new(vertex.kind(), vertex.label(), vertex.scope()).encode(),
                        vertex.id().to_bytes().to_vec(),
                    );
                }
            }
            // Every live buffered edge is written twice, once per endpoint.
            // Emitting from the out side only visits each edge exactly once.
            if vertex.status() != VertexStatus::Deleted {
                for (kind, peer, record) in vertex.outs.buffered() {
                    let value = EdgeValue {
                        overridden: match record.overridden {
                            Some(overridden) => {
                                Some(TypeKey::new(kind_of(&overridden)?, overridden))
                            }
                            None => None,
                        },
                        annotations: record.annotations,
                    };
                    let edge_key =
                        EdgeKey::new(key, Direction::Out, kind, TypeKey::new(kind_of(&peer)?, peer));
                    storage.put(edge_key.encode(), value.encode());
                    storage.put(edge_key.mirror().encode(), value.encode());
                }
            }
        }
        Ok(())
    }

    fn finish_commit(&mut self) {
        self.vertices
            .retain(|_, vertex| vertex.status() != VertexStatus::Deleted);
        for vertex in self.vertices.values_mut() {
            vertex.status = VertexStatus::Persisted;
            vertex.outs.mark_committed();
            vertex.ins.mark_committed();
        }
        self.deleted_edges.clear();
        self.index_tombstones.clear();
        self.caches.clear();
    }
}
