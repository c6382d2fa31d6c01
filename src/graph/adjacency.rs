use std::collections::btree_map::BTreeMap;
use std::collections::HashSet;

use crate::encoding::{Direction, EdgeKind, VertexId};
use crate::graph::edge::{EdgeRecord, EdgeStatus};
use crate::graph::iter::{SortedPairIter, SortedVertexIter};

/// One direction of a vertex's typed adjacency.
///
/// Edge records are keyed by `(edge kind, peer id)`, which sorts identically
/// to the encoded edge keys, so in-memory iteration order matches a storage
/// scan. Records are inserted and removed through the graph so the peer's
/// mirror adjacency is always updated in the same call; this type only reads
/// and holds state.
#[derive(Debug)]
pub struct TypeAdjacency {
    direction: Direction,
    edges: BTreeMap<(EdgeKind, VertexId), EdgeRecord>,
    // Edge kinds whose persisted records have been read from storage.
    loaded: HashSet<EdgeKind>,
}

impl TypeAdjacency {
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            edges: BTreeMap::new(),
            loaded: HashSet::new(),
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn get(&self, kind: EdgeKind, peer: VertexId) -> Option<&EdgeRecord> {
        self.edges.get(&(kind, peer))
    }

    pub(crate) fn get_mut(&mut self, kind: EdgeKind, peer: VertexId) -> Option<&mut EdgeRecord> {
        self.edges.get_mut(&(kind, peer))
    }

    pub(crate) fn insert(&mut self, kind: EdgeKind, peer: VertexId, record: EdgeRecord) {
        self.edges.insert((kind, peer), record);
    }

    /// Inserts a record loaded from storage without touching an existing
    /// in-memory record: a buffered write always wins over a loaded one.
    pub(crate) fn cache(&mut self, kind: EdgeKind, peer: VertexId, record: EdgeRecord) {
        self.edges.entry((kind, peer)).or_insert(record);
    }

    pub(crate) fn remove(&mut self, kind: EdgeKind, peer: VertexId) -> Option<EdgeRecord> {
        self.edges.remove(&(kind, peer))
    }

    /// The adjacent vertices for one edge kind, ascending by id.
    pub fn peers(&self, kind: EdgeKind) -> SortedVertexIter {
        SortedVertexIter::new(self.range(kind).map(|((_, peer), _)| *peer).collect())
    }

    /// The override targets for one edge kind; absent slots are filtered out.
    pub fn overridden(&self, kind: EdgeKind) -> Vec<VertexId> {
        self.range(kind)
            .filter_map(|(_, record)| record.overridden)
            .collect()
    }

    /// `(peer, overridden)` pairs for one edge kind, ascending by peer id.
    pub fn peers_and_overridden(&self, kind: EdgeKind) -> SortedPairIter {
        SortedPairIter::new(
            self.range(kind)
                .map(|((_, peer), record)| (*peer, record.overridden))
                .collect(),
        )
    }

    pub(crate) fn range(
        &self,
        kind: EdgeKind,
    ) -> impl Iterator<Item = (&(EdgeKind, VertexId), &EdgeRecord)> {
        self.edges
            .range((kind, VertexId(u32::MIN))..=(kind, VertexId(u32::MAX)))
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&(EdgeKind, VertexId), &EdgeRecord)> {
        self.edges.iter()
    }

    /// Records this transaction must flush on commit.
    pub(crate) fn buffered(&self) -> impl Iterator<Item = (EdgeKind, VertexId, &EdgeRecord)> {
        self.edges
            .iter()
            .filter(|(_, record)| record.status == EdgeStatus::Buffered)
            .map(|((kind, peer), record)| (*kind, *peer, record))
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Flips every buffered record to persisted after a successful commit.
    pub(crate) fn mark_committed(&mut self) {
        for record in self.edges.values_mut() {
            record.status = EdgeStatus::Persisted;
        }
    }

    pub(crate) fn is_loaded(&self, kind: EdgeKind) -> bool {
        self.loaded.contains(&kind)
    }

    pub(crate) fn mark_loaded(&mut self, kind: EdgeKind) {
        self.loaded.insert(kind);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::Annotations;

    fn record() -> EdgeRecord {
        EdgeRecord::buffered(None, Annotations::none())
    }

    #[test]
    fn peers_are_sorted_within_kind() {
        let mut adjacency = TypeAdjacency::new(Direction::Out);
        for id in [5u32, 2, 9, 7, 3] {
            adjacency.insert(EdgeKind::Relates, VertexId(id), record());
        }
        adjacency.insert(EdgeKind::Sub, VertexId(1), record());

        let relates: Vec<_> = adjacency.peers(EdgeKind::Relates).map(|id| id.0).collect();
        assert_eq!(relates, vec![2, 3, 5, 7, 9]);

        let subs: Vec<_> = adjacency.peers(EdgeKind::Sub).map(|id| id.0).collect();
        assert_eq!(subs, vec![1]);
    }

    #[test]
    fn cache_does_not_clobber_buffered_record() {
        let mut adjacency = TypeAdjacency::new(Direction::Out);
        let buffered = EdgeRecord::buffered(Some(VertexId(42)), Annotations::none());
        adjacency.insert(EdgeKind::Relates, VertexId(1), buffered);

        adjacency.cache(
            EdgeKind::Relates,
            VertexId(1),
            EdgeRecord::persisted(None, Annotations::none()),
        );
        let kept = adjacency.get(EdgeKind::Relates, VertexId(1)).unwrap();
        assert_eq!(kept.overridden, Some(VertexId(42)));
        assert_eq!(kept.status, EdgeStatus::Buffered);
    }

    #[test]
    fn overridden_filters_absent_slots() {
        let mut adjacency = TypeAdjacency::new(Direction::Out);
        adjacency.insert(
            EdgeKind::Relates,
            VertexId(1),
            EdgeRecord::buffered(Some(VertexId(9)), Annotations::none()),
        );
        adjacency.insert(EdgeKind::Relates, VertexId(2), record());

        assert_eq!(adjacency.overridden(EdgeKind::Relates), vec![VertexId(9)]);
        let pairs: Vec<_> = adjacency.peers_and_overridden(EdgeKind::Relates).collect();
        assert_eq!(
            pairs,
            vec![(VertexId(1), Some(VertexId(9))), (VertexId(2), None)]
        );
    }

    #[test]
    fn iteration_survives_mutation() {
        let mut adjacency = TypeAdjacency::new(Direction::Out);
        for id in [1u32, 2, 3] {
            adjacency.insert(EdgeKind::Plays, VertexId(id), record());
        }
        let mut iter = adjacency.peers(EdgeKind::Plays);
        assert_eq!(iter.next(), Some(VertexId(1)));

        adjacency.remove(EdgeKind::Plays, VertexId(2));
        adjacency.insert(EdgeKind::Plays, VertexId(4), record());

        // Snapshot semantics: the pre-mutation view, nothing re-emitted.
        assert_eq!(iter.map(|id| id.0).collect::<Vec<_>>(), vec![2, 3]);
    }
}
