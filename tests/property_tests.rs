use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use typegraph::encoding::{
    decode_key, Annotations, DecodedKey, Direction, EdgeKey, EdgeKind, EdgeValue, IndexKey, Kind,
    TypeKey, VertexId,
};
use typegraph::storage::{MemStore, SchemaStorage, SnapshotStore, WriteBatch};
use typegraph::{IdAllocator, SchemaGraph};

const TIMEOUT: Duration = Duration::from_secs(1);

fn arb_kind() -> impl Strategy<Value = Kind> {
    prop_oneof![
        Just(Kind::Thing),
        Just(Kind::EntityType),
        Just(Kind::RelationType),
        Just(Kind::AttributeType),
        Just(Kind::RoleType),
    ]
}

fn arb_edge_kind() -> impl Strategy<Value = EdgeKind> {
    prop_oneof![
        Just(EdgeKind::Sub),
        Just(EdgeKind::Owns),
        Just(EdgeKind::OwnsKey),
        Just(EdgeKind::Plays),
        Just(EdgeKind::Relates),
    ]
}

fn arb_type_key() -> impl Strategy<Value = TypeKey> {
    (arb_kind(), any::<u32>()).prop_map(|(kind, id)| TypeKey::new(kind, VertexId(id)))
}

fn arb_annotations() -> impl Strategy<Value = Annotations> {
    prop_oneof![
        Just(Annotations::none()),
        Just(Annotations::unique()),
        Just(Annotations::key()),
    ]
}

proptest! {
    #[test]
    fn vertex_keys_round_trip(key in arb_type_key()) {
        let encoded = key.encode();
        prop_assert_eq!(decode_key(&encoded).unwrap(), DecodedKey::Vertex(key));
    }

    #[test]
    fn edge_keys_round_trip(
        vertex in arb_type_key(),
        peer in arb_type_key(),
        kind in arb_edge_kind(),
        out in any::<bool>(),
    ) {
        let direction = if out { Direction::Out } else { Direction::In };
        let key = EdgeKey::new(vertex, direction, kind, peer);
        let encoded = key.encode();
        prop_assert_eq!(decode_key(&encoded).unwrap(), DecodedKey::Edge(key));
        prop_assert_eq!(key.mirror().mirror(), key);
    }

    #[test]
    fn edge_values_round_trip(
        overridden in proptest::option::of(arb_type_key()),
        annotations in arb_annotations(),
    ) {
        let value = EdgeValue { overridden, annotations };
        prop_assert_eq!(EdgeValue::decode(&value.encode()).unwrap(), value);
    }

    #[test]
    fn index_keys_round_trip(
        kind in arb_kind(),
        label in "[a-z][a-z0-9-]{0,14}",
        scope in proptest::option::of("[a-z][a-z0-9-]{0,14}"),
    ) {
        let key = IndexKey::new(kind, &label, scope.as_deref());
        prop_assert_eq!(IndexKey::decode(&key.encode()).unwrap(), key);
    }

    #[test]
    fn key_order_follows_id_order(kind in arb_kind(), a in any::<u32>(), b in any::<u32>()) {
        let key_a = TypeKey::new(kind, VertexId(a)).encode();
        let key_b = TypeKey::new(kind, VertexId(b)).encode();
        prop_assert_eq!(a.cmp(&b), key_a.cmp(&key_b));
    }

    #[test]
    fn merged_scan_matches_model(
        committed in proptest::collection::btree_map("[a-d]{1,3}", "[a-z]{0,4}", 0..12),
        puts in proptest::collection::btree_map("[a-d]{1,3}", "[a-z]{0,4}", 0..12),
        deletes in proptest::collection::btree_set("[a-d]{1,3}", 0..8),
    ) {
        let store = Arc::new(MemStore::new());
        let mut batch = WriteBatch::new();
        for (key, value) in &committed {
            batch.put(key.as_bytes().to_vec(), value.as_bytes().to_vec());
        }
        store.apply(batch, 0, TIMEOUT).unwrap();

        let mut storage = SchemaStorage::new(Arc::clone(&store) as Arc<dyn SnapshotStore>);
        let mut model: BTreeMap<Vec<u8>, Vec<u8>> = committed
            .iter()
            .map(|(k, v)| (k.as_bytes().to_vec(), v.as_bytes().to_vec()))
            .collect();
        for (key, value) in &puts {
            storage.put(key.as_bytes().to_vec(), value.as_bytes().to_vec());
            model.insert(key.as_bytes().to_vec(), value.as_bytes().to_vec());
        }
        for key in &deletes {
            storage.delete(key.as_bytes().to_vec());
            model.remove(key.as_bytes());
        }

        let scanned: Vec<_> = storage.scan(b"").collect();
        let expected: Vec<_> = model.into_iter().collect();
        prop_assert_eq!(scanned, expected);
    }

    #[test]
    fn committed_types_are_readable_in_a_fresh_transaction(
        labels in proptest::collection::btree_set("[a-z]{3,10}", 1..8),
    ) {
        let store = Arc::new(MemStore::new());
        let allocator = Arc::new(IdAllocator::new());
        let mut graph = SchemaGraph::new(
            Arc::clone(&store) as Arc<dyn SnapshotStore>,
            Arc::clone(&allocator),
        );
        graph.initialise().unwrap();
        let mut created = Vec::new();
        for label in &labels {
            if ["thing", "entity", "relation", "attribute", "role"].contains(&label.as_str()) {
                continue;
            }
            created.push((label.clone(), graph.create_type(Kind::EntityType, label).unwrap()));
        }
        graph.commit(TIMEOUT).unwrap();

        let mut fresh = SchemaGraph::new(
            Arc::clone(&store) as Arc<dyn SnapshotStore>,
            Arc::clone(&allocator),
        );
        for (label, id) in created {
            prop_assert_eq!(fresh.get_type(&label, None).unwrap(), Some(id));
            prop_assert_eq!(fresh.label_of(id).unwrap(), label);
        }
    }
}
