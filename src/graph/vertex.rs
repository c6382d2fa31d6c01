use crate::encoding::{Direction, Kind, TypeKey, ValueType, VertexId};
use crate::graph::adjacency::TypeAdjacency;

/// Buffer state of a vertex within the transaction.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum VertexStatus {
    /// Loaded from storage, unchanged.
    Persisted,
    /// Created in this transaction; flushed in full on commit.
    Buffered,
    /// Loaded from storage and mutated; property writes flushed on commit.
    Modified,
    /// Tombstoned; deletes flushed on commit.
    Deleted,
}

/// An in-memory type vertex: identity, scalar properties and both adjacency
/// sides. Vertices live in the graph's arena and reference each other by id.
#[derive(Debug)]
pub struct TypeVertex {
    pub(crate) id: VertexId,
    pub(crate) kind: Kind,
    pub(crate) label: String,
    pub(crate) scope: Option<String>,
    pub(crate) is_abstract: bool,
    pub(crate) value_type: Option<ValueType>,
    /// Whether persisted scalar properties have been fetched from storage.
    pub(crate) properties_loaded: bool,
    pub(crate) status: VertexStatus,
    pub(crate) outs: TypeAdjacency,
    pub(crate) ins: TypeAdjacency,
}

impl TypeVertex {
    /// A vertex created by this transaction, fully formed in memory.
    pub(crate) fn buffered(id: VertexId, kind: Kind, label: String, scope: Option<String>) -> Self {
        Self {
            id,
            kind,
            label,
            scope,
            is_abstract: false,
            value_type: None,
            properties_loaded: true,
            status: VertexStatus::Buffered,
            outs: TypeAdjacency::new(Direction::Out),
            ins: TypeAdjacency::new(Direction::In),
        }
    }

    /// A vertex referenced from storage whose scalar properties have not been
    /// fetched yet.
    pub(crate) fn stub(id: VertexId, kind: Kind) -> Self {
        Self {
            id,
            kind,
            label: String::new(),
            scope: None,
            is_abstract: false,
            value_type: None,
            properties_loaded: false,
            status: VertexStatus::Persisted,
            outs: TypeAdjacency::new(Direction::Out),
            ins: TypeAdjacency::new(Direction::In),
        }
    }

    pub fn id(&self) -> VertexId {
        self.id
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    pub fn is_abstract(&self) -> bool {
        self.is_abstract
    }

    pub fn value_type(&self) -> Option<ValueType> {
        self.value_type
    }

    pub fn status(&self) -> VertexStatus {
        self.status
    }

    pub fn type_key(&self) -> TypeKey {
        TypeKey::new(self.kind, self.id)
    }

    /// Roots are fixed at initialisation and immutable thereafter.
    pub fn is_root(&self) -> bool {
        match self.kind {
            Kind::Thing => true,
            Kind::RoleType => {
                self.label == Kind::RoleType.root_label() && self.scope.as_deref() == Some("relation")
            }
            kind => self.label == kind.root_label(),
        }
    }

    /// Display form: `scope:label` for role types, the bare label otherwise.
    pub fn scoped_label(&self) -> String {
        match &self.scope {
            Some(scope) => format!("{scope}:{}", self.label),
            None => self.label.clone(),
        }
    }

    /// Marks a persisted vertex as carrying property changes.
    pub(crate) fn mark_modified(&mut self) {
        if self.status == VertexStatus::Persisted {
            self.status = VertexStatus::Modified;
        }
    }

    pub(crate) fn adjacency(&self, direction: Direction) -> &TypeAdjacency {
        match direction {
            Direction::Out => &self.outs,
            Direction::In => &self.ins,
        }
    }

    pub(crate) fn adjacency_mut(&mut self, direction: Direction) -> &mut TypeAdjacency {
        match direction {
            Direction::Out => &mut self.outs,
            Direction::In => &mut self.ins,
        }
    }
}
