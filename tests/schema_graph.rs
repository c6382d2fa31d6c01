use std::sync::Arc;
use std::time::Duration;

use typegraph::{
    Annotations, IdAllocator, InstanceQuery, Kind, MemStore, SchemaError, SchemaGraph,
    SnapshotStore, ValueType, VertexId, Violation,
};

const TIMEOUT: Duration = Duration::from_secs(1);

/// A fresh store with the root types committed.
fn fixture() -> (Arc<MemStore>, Arc<IdAllocator>) {
    let store = Arc::new(MemStore::new());
    let allocator = Arc::new(IdAllocator::new());
    let mut graph = graph_of(&store, &allocator);
    graph.initialise().expect("initialise");
    graph.commit(TIMEOUT).expect("commit roots");
    (store, allocator)
}

fn graph_of(store: &Arc<MemStore>, allocator: &Arc<IdAllocator>) -> SchemaGraph {
    SchemaGraph::new(
        Arc::clone(store) as Arc<dyn SnapshotStore>,
        Arc::clone(allocator),
    )
}

fn violations(err: SchemaError) -> Vec<Violation> {
    match err {
        SchemaError::Validation(violations) => violations,
        other => panic!("expected validation failure, got: {other}"),
    }
}

#[test]
fn create_then_rollback_leaves_no_trace() {
    let (store, allocator) = fixture();

    let mut graph = graph_of(&store, &allocator);
    graph.create_type(Kind::EntityType, "person").unwrap();
    assert!(graph.get_type("person", None).unwrap().is_some());
    graph.rollback();

    let mut fresh = graph_of(&store, &allocator);
    assert_eq!(fresh.get_type("person", None).unwrap(), None);
}

#[test]
fn relates_with_override_hides_the_overridden_role() {
    let (store, allocator) = fixture();

    let mut graph = graph_of(&store, &allocator);
    let marriage = graph.create_type(Kind::RelationType, "marriage").unwrap();
    graph.set_relates(marriage, "spouse", None).unwrap();
    let hetero = graph
        .create_type(Kind::RelationType, "hetero-marriage")
        .unwrap();
    graph.set_supertype(hetero, marriage).unwrap();
    graph.set_relates(hetero, "husband", Some("spouse")).unwrap();

    let spouse = graph.get_type("spouse", Some("marriage")).unwrap().unwrap();
    let husband = graph
        .get_type("husband", Some("hetero-marriage"))
        .unwrap()
        .unwrap();

    let related: Vec<_> = graph.get_relates(hetero, true).unwrap().collect();
    assert_eq!(related, vec![husband]);
    assert_eq!(
        graph.get_relates_overridden(hetero, "husband").unwrap(),
        Some(spouse)
    );
    // No explicit override on the parent's role.
    assert_eq!(graph.get_relates_overridden(marriage, "spouse").unwrap(), None);

    graph.commit(TIMEOUT).unwrap();

    // The override survives the round trip through storage.
    let mut fresh = graph_of(&store, &allocator);
    let hetero = fresh.get_type("hetero-marriage", None).unwrap().unwrap();
    let husband = fresh
        .get_type("husband", Some("hetero-marriage"))
        .unwrap()
        .unwrap();
    let spouse = fresh.get_type("spouse", Some("marriage")).unwrap().unwrap();
    let related: Vec<_> = fresh.get_relates(hetero, true).unwrap().collect();
    assert_eq!(related, vec![husband]);
    assert_eq!(
        fresh.get_relates_overridden(hetero, "husband").unwrap(),
        Some(spouse)
    );
}

#[test]
fn supertype_cycle_is_rejected_and_graph_unchanged() {
    let (store, allocator) = fixture();

    let mut graph = graph_of(&store, &allocator);
    let a = graph.create_type(Kind::EntityType, "a").unwrap();
    let b = graph.create_type(Kind::EntityType, "b").unwrap();
    graph.set_supertype(a, b).unwrap();

    let listed = violations(graph.set_supertype(b, a).unwrap_err());
    assert_eq!(listed.len(), 1);
    assert!(matches!(listed[0], Violation::CyclicSupertype { .. }));

    // The rejected mutation changed nothing.
    let entity_root = graph.roots().unwrap().entity;
    assert_eq!(graph.supertype(b).unwrap(), Some(entity_root));
    assert_eq!(graph.supertype(a).unwrap(), Some(b));
}

struct AllInstances;

impl InstanceQuery for AllInstances {
    fn has_instances(&self, _vertex: VertexId) -> bool {
        true
    }
}

#[test]
fn abstract_with_instances_is_rejected() {
    let (store, allocator) = fixture();

    let mut graph = SchemaGraph::with_instances(
        Arc::clone(&store) as Arc<dyn SnapshotStore>,
        Arc::clone(&allocator),
        Box::new(AllInstances),
    );
    let person = graph.create_type(Kind::EntityType, "person").unwrap();

    let listed = violations(graph.set_abstract(person).unwrap_err());
    assert_eq!(listed.len(), 1);
    assert!(matches!(listed[0], Violation::TypeHasInstances { .. }));
    assert!(!graph.is_abstract(person).unwrap());

    // Deletion is guarded by the same instance check.
    let listed = violations(graph.delete_type(person).unwrap_err());
    assert!(matches!(listed[0], Violation::TypeHasInstances { .. }));
}

#[test]
fn commit_rejects_concrete_relation_without_roles() {
    let (store, allocator) = fixture();

    let mut graph = graph_of(&store, &allocator);
    graph.create_type(Kind::RelationType, "marriage").unwrap();

    let listed = violations(graph.commit(TIMEOUT).unwrap_err());
    assert_eq!(listed.len(), 1);
    assert!(matches!(listed[0], Violation::RelationWithoutRole { .. }));

    // The transaction is still usable: declare the role and retry.
    let marriage = graph.get_type("marriage", None).unwrap().unwrap();
    graph.set_relates(marriage, "spouse", None).unwrap();
    graph.commit(TIMEOUT).unwrap();

    let mut fresh = graph_of(&store, &allocator);
    assert!(fresh.get_type("marriage", None).unwrap().is_some());
}

#[test]
fn commit_rejects_concrete_relation_with_abstract_role() {
    let (store, allocator) = fixture();

    let mut graph = graph_of(&store, &allocator);
    let marriage = graph.create_type(Kind::RelationType, "marriage").unwrap();
    graph.set_relates(marriage, "spouse", None).unwrap();
    let spouse = graph.get_type("spouse", Some("marriage")).unwrap().unwrap();
    graph.set_abstract(spouse).unwrap();

    let listed = violations(graph.commit(TIMEOUT).unwrap_err());
    assert!(matches!(listed[0], Violation::AbstractRole { .. }));

    // An abstract relation may keep its abstract role.
    graph.set_abstract(marriage).unwrap();
    graph.commit(TIMEOUT).unwrap();
}

#[test]
fn owns_iteration_is_sorted_and_forwardable() {
    let (store, allocator) = fixture();

    let mut graph = graph_of(&store, &allocator);
    let person = graph.create_type(Kind::EntityType, "person").unwrap();
    let mut attributes = Vec::new();
    for label in ["name", "age", "email", "phone", "address"] {
        let attribute = graph.create_type(Kind::AttributeType, label).unwrap();
        graph.set_value_type(attribute, ValueType::String).unwrap();
        graph
            .set_owns(person, attribute, None, Annotations::none())
            .unwrap();
        attributes.push(attribute);
    }
    attributes.sort_unstable();

    let owned: Vec<_> = graph.get_owns(person, false, None).unwrap().collect();
    assert_eq!(owned, attributes);

    let mut iter = graph.get_owns(person, false, None).unwrap();
    iter.seek(attributes[2]);
    assert_eq!(iter.collect::<Vec<_>>(), attributes[2..].to_vec());
}

#[test]
fn concurrent_writers_conflict_on_overlap() {
    let (store, allocator) = fixture();

    {
        let mut setup = graph_of(&store, &allocator);
        setup.create_type(Kind::EntityType, "person").unwrap();
        setup.commit(TIMEOUT).unwrap();
    }

    let mut first = graph_of(&store, &allocator);
    let mut second = graph_of(&store, &allocator);
    let person_in_first = first.get_type("person", None).unwrap().unwrap();
    let person_in_second = second.get_type("person", None).unwrap().unwrap();
    assert_eq!(person_in_first, person_in_second);

    first.set_abstract(person_in_first).unwrap();
    second.set_abstract(person_in_second).unwrap();

    first.commit(TIMEOUT).unwrap();
    let err = second.commit(TIMEOUT).unwrap_err();
    assert!(matches!(err, SchemaError::ConcurrentSchemaWrite));

    // The losing transaction is poisoned until rolled back.
    assert!(second.is_poisoned());
    assert!(matches!(
        second.get_type("person", None).unwrap_err(),
        SchemaError::TransactionPoisoned
    ));
    second.rollback();
    assert!(second.get_type("person", None).unwrap().is_some());
}

#[test]
fn disjoint_writers_both_commit() {
    let (store, allocator) = fixture();

    let mut first = graph_of(&store, &allocator);
    let mut second = graph_of(&store, &allocator);
    first.create_type(Kind::EntityType, "person").unwrap();
    second.create_type(Kind::EntityType, "company").unwrap();

    first.commit(TIMEOUT).unwrap();
    second.commit(TIMEOUT).unwrap();

    let mut fresh = graph_of(&store, &allocator);
    assert!(fresh.get_type("person", None).unwrap().is_some());
    assert!(fresh.get_type("company", None).unwrap().is_some());
}

#[test]
fn root_types_reject_every_mutation() {
    let (store, allocator) = fixture();

    let mut graph = graph_of(&store, &allocator);
    let roots = graph.roots().unwrap();
    let person = graph.create_type(Kind::EntityType, "person").unwrap();

    assert!(matches!(
        graph.set_label(roots.entity, "renamed").unwrap_err(),
        SchemaError::RootTypeMutation(_)
    ));
    assert!(matches!(
        graph.delete_type(roots.relation).unwrap_err(),
        SchemaError::RootTypeMutation(_)
    ));
    assert!(matches!(
        graph.set_abstract(roots.attribute).unwrap_err(),
        SchemaError::RootTypeMutation(_)
    ));
    // Subtyping a root is fine; mutating one is not.
    assert!(graph.set_supertype(person, roots.entity).is_ok());
    assert!(matches!(
        graph.set_relates(roots.relation, "extra", None).unwrap_err(),
        SchemaError::RootTypeMutation(_)
    ));
}

#[test]
fn relabelling_a_relation_rewrites_role_scopes() {
    let (store, allocator) = fixture();

    let mut graph = graph_of(&store, &allocator);
    let marriage = graph.create_type(Kind::RelationType, "marriage").unwrap();
    graph.set_relates(marriage, "spouse", None).unwrap();

    graph.set_label(marriage, "wedlock").unwrap();
    assert!(graph.get_type("spouse", Some("wedlock")).unwrap().is_some());
    assert_eq!(graph.get_type("spouse", Some("marriage")).unwrap(), None);
    assert_eq!(graph.get_type("marriage", None).unwrap(), None);

    graph.commit(TIMEOUT).unwrap();

    let mut fresh = graph_of(&store, &allocator);
    let wedlock = fresh.get_type("wedlock", None).unwrap().unwrap();
    let spouse = fresh.get_type("spouse", Some("wedlock")).unwrap().unwrap();
    assert_eq!(fresh.scoped_label_of(spouse).unwrap(), "wedlock:spouse");
    let related: Vec<_> = fresh.get_relates(wedlock, true).unwrap().collect();
    assert_eq!(related, vec![spouse]);
}

#[test]
fn unsetting_an_overridden_role_is_rejected() {
    let (store, allocator) = fixture();

    let mut graph = graph_of(&store, &allocator);
    let marriage = graph.create_type(Kind::RelationType, "marriage").unwrap();
    graph.set_relates(marriage, "spouse", None).unwrap();
    let hetero = graph
        .create_type(Kind::RelationType, "hetero-marriage")
        .unwrap();
    graph.set_supertype(hetero, marriage).unwrap();
    graph.set_relates(hetero, "husband", Some("spouse")).unwrap();

    let listed = violations(graph.unset_relates(marriage, "spouse").unwrap_err());
    assert!(matches!(listed[0], Violation::OverriddenInUse { .. }));

    // Dropping the override first unblocks the removal.
    graph.unset_relates(hetero, "husband").unwrap();
    graph.unset_relates(marriage, "spouse").unwrap();
    assert_eq!(graph.get_type("spouse", Some("marriage")).unwrap(), None);
}

#[test]
fn weakening_inherited_owns_annotations_is_rejected() {
    let (store, allocator) = fixture();

    let mut graph = graph_of(&store, &allocator);
    let person = graph.create_type(Kind::EntityType, "person").unwrap();
    let email = graph.create_type(Kind::AttributeType, "email").unwrap();
    graph.set_value_type(email, ValueType::String).unwrap();
    graph
        .set_owns(person, email, None, Annotations::key())
        .unwrap();
    let customer = graph.create_type(Kind::EntityType, "customer").unwrap();
    graph.set_supertype(customer, person).unwrap();

    let listed = violations(
        graph
            .set_owns(customer, email, None, Annotations::none())
            .unwrap_err(),
    );
    assert!(matches!(listed[0], Violation::OwnsAnnotationConflict { .. }));

    // Redeclaring with equal strength is allowed.
    graph
        .set_owns(customer, email, Some(email), Annotations::key())
        .unwrap();
}

#[test]
fn key_ownership_is_filterable() {
    let (store, allocator) = fixture();

    let mut graph = graph_of(&store, &allocator);
    let person = graph.create_type(Kind::EntityType, "person").unwrap();
    let email = graph.create_type(Kind::AttributeType, "email").unwrap();
    let name = graph.create_type(Kind::AttributeType, "name").unwrap();
    graph.set_value_type(email, ValueType::String).unwrap();
    graph.set_value_type(name, ValueType::String).unwrap();
    graph
        .set_owns(person, email, None, Annotations::key())
        .unwrap();
    graph
        .set_owns(person, name, None, Annotations::none())
        .unwrap();

    let all: Vec<_> = graph.get_owns(person, false, None).unwrap().collect();
    assert_eq!(all.len(), 2);
    let keyed: Vec<_> = graph
        .get_owns(person, false, Some(Annotations::key()))
        .unwrap()
        .collect();
    assert_eq!(keyed, vec![email]);

    graph.commit(TIMEOUT).unwrap();

    let mut fresh = graph_of(&store, &allocator);
    let person = fresh.get_type("person", None).unwrap().unwrap();
    let email = fresh.get_type("email", None).unwrap().unwrap();
    let keyed: Vec<_> = fresh
        .get_owns(person, false, Some(Annotations::key()))
        .unwrap()
        .collect();
    assert_eq!(keyed, vec![email]);
}

#[test]
fn plays_are_inherited_and_overridable() {
    let (store, allocator) = fixture();

    let mut graph = graph_of(&store, &allocator);
    let employment = graph.create_type(Kind::RelationType, "employment").unwrap();
    graph.set_relates(employment, "employee", None).unwrap();
    let employee = graph
        .get_type("employee", Some("employment"))
        .unwrap()
        .unwrap();

    let person = graph.create_type(Kind::EntityType, "person").unwrap();
    graph.set_plays(person, employee, None).unwrap();
    let student = graph.create_type(Kind::EntityType, "student").unwrap();
    graph.set_supertype(student, person).unwrap();

    let played: Vec<_> = graph.get_plays(student, true).unwrap().collect();
    assert_eq!(played, vec![employee]);
    let declared: Vec<_> = graph.get_plays(student, false).unwrap().collect();
    assert!(declared.is_empty());

    // Overriding an inherited plays hides it behind the declared one.
    let internship = graph.create_type(Kind::RelationType, "internship").unwrap();
    graph.set_supertype(internship, employment).unwrap();
    graph.set_relates(internship, "intern", Some("employee")).unwrap();
    let intern = graph.get_type("intern", Some("internship")).unwrap().unwrap();
    graph.set_plays(student, intern, Some(employee)).unwrap();

    let played: Vec<_> = graph.get_plays(student, true).unwrap().collect();
    assert_eq!(played, vec![intern]);
}

#[test]
fn supertype_and_subtype_closures_agree() {
    let (store, allocator) = fixture();

    let mut graph = graph_of(&store, &allocator);
    let person = graph.create_type(Kind::EntityType, "person").unwrap();
    let student = graph.create_type(Kind::EntityType, "student").unwrap();
    let graduate = graph.create_type(Kind::EntityType, "graduate").unwrap();
    graph.set_supertype(student, person).unwrap();
    graph.set_supertype(graduate, student).unwrap();

    let roots = graph.roots().unwrap();
    let ancestors: Vec<_> = graph.get_supertypes(graduate).unwrap().collect();
    for id in [graduate, student, person, roots.entity, roots.thing] {
        assert!(ancestors.contains(&id));
    }

    let descendants: Vec<_> = graph.get_subtypes(person).unwrap().collect();
    assert_eq!(descendants.len(), 3);
    for descendant in [person, student, graduate] {
        assert!(descendants.contains(&descendant));
        let supers = graph.get_supertypes(descendant).unwrap().collect::<Vec<_>>();
        assert!(supers.contains(&person));
    }
}

#[test]
fn retyping_under_a_new_supertype_validates_overrides() {
    let (store, allocator) = fixture();

    let mut graph = graph_of(&store, &allocator);
    let marriage = graph.create_type(Kind::RelationType, "marriage").unwrap();
    graph.set_relates(marriage, "spouse", None).unwrap();
    let hetero = graph
        .create_type(Kind::RelationType, "hetero-marriage")
        .unwrap();
    graph.set_supertype(hetero, marriage).unwrap();
    graph.set_relates(hetero, "husband", Some("spouse")).unwrap();

    // Moving hetero-marriage under a relation without "spouse" orphans the
    // husband override.
    let partnership = graph.create_type(Kind::RelationType, "partnership").unwrap();
    graph.set_relates(partnership, "partner", None).unwrap();
    let listed = violations(graph.set_supertype(hetero, partnership).unwrap_err());
    assert!(matches!(listed[0], Violation::LostOverride { .. }));

    // The failed attempt left the hierarchy alone.
    assert_eq!(graph.supertype(hetero).unwrap(), Some(marriage));
}

#[test]
fn concrete_attribute_under_abstract_supertype_is_rejected() {
    let (store, allocator) = fixture();

    let mut graph = graph_of(&store, &allocator);
    let name = graph.create_type(Kind::AttributeType, "name").unwrap();
    graph.set_value_type(name, ValueType::String).unwrap();
    graph.set_abstract(name).unwrap();
    let nickname = graph.create_type(Kind::AttributeType, "nickname").unwrap();
    graph.set_value_type(nickname, ValueType::String).unwrap();
    graph.set_supertype(nickname, name).unwrap();
    graph.set_abstract(nickname).unwrap();

    let listed = violations(graph.unset_abstract(nickname).unwrap_err());
    assert!(matches!(listed[0], Violation::AbstractSupertype { .. }));

    graph.unset_abstract(name).unwrap();
    graph.unset_abstract(nickname).unwrap();
}

#[test]
fn deleting_a_type_removes_both_edge_mirrors() {
    let (store, allocator) = fixture();

    let mut graph = graph_of(&store, &allocator);
    let person = graph.create_type(Kind::EntityType, "person").unwrap();
    let name = graph.create_type(Kind::AttributeType, "name").unwrap();
    graph.set_value_type(name, ValueType::String).unwrap();
    graph
        .set_owns(person, name, None, Annotations::none())
        .unwrap();
    graph.commit(TIMEOUT).unwrap();

    let mut graph = graph_of(&store, &allocator);
    let person = graph.get_type("person", None).unwrap().unwrap();
    let name = graph.get_type("name", None).unwrap().unwrap();
    graph.delete_type(name).unwrap();
    assert!(graph.get_owns(person, true, None).unwrap().next().is_none());
    graph.commit(TIMEOUT).unwrap();

    let mut fresh = graph_of(&store, &allocator);
    assert_eq!(fresh.get_type("name", None).unwrap(), None);
    let person = fresh.get_type("person", None).unwrap().unwrap();
    assert!(fresh.get_owns(person, true, None).unwrap().next().is_none());
}

#[test]
fn value_types_persist_and_are_immutable() {
    let (store, allocator) = fixture();

    let mut graph = graph_of(&store, &allocator);
    let age = graph.create_type(Kind::AttributeType, "age").unwrap();
    graph.set_value_type(age, ValueType::Long).unwrap();
    // Setting the identical value type is a no-op, a different one an error.
    graph.set_value_type(age, ValueType::Long).unwrap();
    assert!(matches!(
        graph.set_value_type(age, ValueType::String).unwrap_err(),
        SchemaError::InvalidArgument(_)
    ));
    graph.commit(TIMEOUT).unwrap();

    let mut fresh = graph_of(&store, &allocator);
    let age = fresh.get_type("age", None).unwrap().unwrap();
    assert_eq!(fresh.value_type_of(age).unwrap(), Some(ValueType::Long));
}

#[test]
fn allocator_recovery_resumes_past_persisted_ids() {
    let (store, allocator) = fixture();

    let mut graph = graph_of(&store, &allocator);
    let person = graph.create_type(Kind::EntityType, "person").unwrap();
    graph.commit(TIMEOUT).unwrap();

    let recovered = IdAllocator::recover(store.as_ref()).unwrap();
    let next = recovered.next();
    assert!(next > person);
}
