//! Integration tests for generic entity storage
//!
//! Tests schema-validated writes, hierarchy-wide queries, and the derived
//! side of mapping fields.

use strata_foundation::{EntityKey, EnumLiteral, ErrorKind, Type, Value};
use strata_graph::{GenericEntity, GenericEntitySet};
use strata_schema::{EntityDecl, EntityField, EntityTypeSet, EnumDecl};

fn crew_types() -> EntityTypeSet {
    EntityTypeSet::from_declarations(
        vec![
            EntityDecl::new("Person")
                .with_identity("id")
                .with_field(EntityField::new("id", Type::Long))
                .with_field(EntityField::nullable("name", Type::String))
                .with_field(
                    EntityField::nullable("tasks", Type::collection(Type::entity("Task")))
                        .with_mapping("owner")
                        .with_ordering(["title"]),
                ),
            EntityDecl::new("Employee")
                .extending("Person")
                .with_field(EntityField::nullable("badge", Type::Int)),
            EntityDecl::new("Task")
                .with_identity("id")
                .with_field(EntityField::new("id", Type::Long))
                .with_field(EntityField::nullable("title", Type::String))
                .with_field(EntityField::new("owner", Type::entity("Person")))
                .with_field(EntityField::nullable("status", Type::enumeration("Status"))),
        ],
        vec![EnumDecl::new("Status").with_value("Open").with_value("Done")],
    )
    .unwrap()
}

// =============================================================================
// Creation and Queries
// =============================================================================

#[test]
fn queries_span_the_type_hierarchy() {
    let types = crew_types();
    let mut graph = GenericEntitySet::new();
    graph.create(&types, "Person", 1).unwrap();
    graph.create(&types, "Employee", 2).unwrap();

    assert_eq!(graph.len(), 2);
    assert_eq!(graph.count_of("Person"), 1);
    assert_eq!(graph.count_of("Employee"), 1);

    // By-identity lookup sees sub-types.
    let found = graph.query_by_id(&types, "Person", &2.into()).unwrap();
    assert_eq!(found.key(), EntityKey::new("Employee", 2));

    let keys: Vec<EntityKey> = graph
        .query_all(&types, "Person")
        .into_iter()
        .map(GenericEntity::key)
        .collect();
    assert_eq!(
        keys,
        vec![EntityKey::new("Person", 1), EntityKey::new("Employee", 2)]
    );
}

#[test]
fn identities_are_unique_per_hierarchy() {
    let types = crew_types();
    let mut graph = GenericEntitySet::new();
    graph.create(&types, "Person", 1).unwrap();

    let err = graph.create(&types, "Employee", 1).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::IdentityTaken { .. }));

    // Tasks are a separate hierarchy, so the identity is free there.
    graph.create(&types, "Task", 1).unwrap();

    // add() steps over the collision instead of failing.
    let stepped = graph.add(&types, "Employee", Some(1.into())).unwrap();
    assert_eq!(stepped, EntityKey::new("Employee", 2));
    let next = graph.add(&types, "Person", None).unwrap();
    assert_eq!(next, EntityKey::new("Person", 3));
}

#[test]
fn field_equality_queries_skip_absent_fields() {
    let types = crew_types();
    let mut graph = GenericEntitySet::new();
    let ada = graph.create(&types, "Person", 1).unwrap();
    graph.create(&types, "Person", 2).unwrap();
    graph
        .set_value(&types, &ada, "name", Value::from("Ada"))
        .unwrap();

    let named = graph.query(&types, "Person", "name", &Value::from("Ada"));
    assert_eq!(named.len(), 1);
    // Person#2 never wrote a name; it does not match null either.
    assert!(graph.query(&types, "Person", "name", &Value::Null).is_empty());
}

// =============================================================================
// Validated Writes
// =============================================================================

#[test]
fn writes_are_checked_against_the_declared_type() {
    let types = crew_types();
    let mut graph = GenericEntitySet::new();
    let ada = graph.create(&types, "Person", 1).unwrap();
    let task = graph.create(&types, "Task", 10).unwrap();

    let err = graph
        .set_value(&types, &ada, "name", Value::Int(3))
        .unwrap_err();
    assert!(matches!(err.kind, ErrorKind::TypeMismatch { .. }));

    let err = graph
        .set_value(&types, &ada, "shoe_size", Value::Int(44))
        .unwrap_err();
    assert!(matches!(err.kind, ErrorKind::UnknownField { .. }));

    let err = graph
        .set_value(&types, &task, "owner", Value::Null)
        .unwrap_err();
    assert!(matches!(err.kind, ErrorKind::NotNullable { .. }));

    let err = graph
        .set_value(
            &types,
            &task,
            "status",
            Value::Enum(EnumLiteral::new("Status", "Paused")),
        )
        .unwrap_err();
    assert!(matches!(err.kind, ErrorKind::UnknownEnumValue { .. }));

    graph
        .set_value(
            &types,
            &task,
            "status",
            Value::Enum(EnumLiteral::new("Status", "Open")),
        )
        .unwrap();
}

#[test]
fn identity_and_derived_fields_refuse_direct_writes() {
    let types = crew_types();
    let mut graph = GenericEntitySet::new();
    let ada = graph.create(&types, "Person", 1).unwrap();

    let err = graph
        .set_value(&types, &ada, "id", Value::Int(9))
        .unwrap_err();
    assert!(matches!(err.kind, ErrorKind::IdentityWrite { .. }));

    let err = graph
        .set_value(&types, &ada, "tasks", Value::List(im::Vector::new()))
        .unwrap_err();
    assert!(matches!(err.kind, ErrorKind::DerivedField { .. }));
}

#[test]
fn references_must_resolve_at_write_time() {
    let types = crew_types();
    let mut graph = GenericEntitySet::new();
    let task = graph.create(&types, "Task", 10).unwrap();

    let err = graph
        .set_value(
            &types,
            &task,
            "owner",
            Value::Ref(EntityKey::new("Person", 99)),
        )
        .unwrap_err();
    assert!(matches!(err.kind, ErrorKind::EntityNotFound(_)));
}

// =============================================================================
// Derived Fields
// =============================================================================

#[test]
fn authoritative_writes_feed_the_derived_side() {
    let types = crew_types();
    let mut graph = GenericEntitySet::new();
    let ada = graph.create(&types, "Person", 1).unwrap();
    let grace = graph.create(&types, "Person", 2).unwrap();
    let briefing = graph.create(&types, "Task", 10).unwrap();
    let audit = graph.create(&types, "Task", 11).unwrap();
    graph
        .set_value(&types, &briefing, "title", Value::from("briefing"))
        .unwrap();
    graph
        .set_value(&types, &audit, "title", Value::from("audit"))
        .unwrap();
    graph
        .set_value(&types, &briefing, "owner", Value::Ref(ada.clone()))
        .unwrap();
    graph
        .set_value(&types, &audit, "owner", Value::Ref(ada.clone()))
        .unwrap();

    // Ordered by title: audit before briefing.
    let tasks = graph.get(&ada).unwrap().get("tasks").unwrap();
    let expected = vec![Value::Ref(audit.clone()), Value::Ref(briefing.clone())];
    assert_eq!(
        tasks.as_list().unwrap().iter().cloned().collect::<Vec<_>>(),
        expected
    );

    // Moving the reference moves the derived entry.
    graph
        .set_value(&types, &audit, "owner", Value::Ref(grace.clone()))
        .unwrap();
    let remaining = graph.get(&ada).unwrap().get("tasks").unwrap();
    assert_eq!(remaining.as_list().unwrap().len(), 1);
    let gained = graph.get(&grace).unwrap().get("tasks").unwrap();
    assert_eq!(gained.as_list().unwrap().len(), 1);
}

// =============================================================================
// Attach, Detach, Copy
// =============================================================================

#[test]
fn attach_validates_the_whole_instance() {
    let types = crew_types();
    let mut graph = GenericEntitySet::new();
    let ada = graph.create(&types, "Person", 1).unwrap();

    let mut stray = GenericEntity::new("Task", 10);
    stray.set("owner", Value::Ref(ada.clone()));
    stray.set("flavor", Value::from("vanilla"));
    let err = graph.attach(&types, stray).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::UnknownField { .. }));

    let mut task = GenericEntity::new("Task", 10);
    task.set("owner", Value::Ref(ada.clone()));
    task.set("title", Value::from("refit"));
    let key = graph.attach(&types, task).unwrap();

    // The attached instance registered its authoritative reference.
    let tasks = graph.get(&ada).unwrap().get("tasks").unwrap();
    assert_eq!(
        tasks.as_list().unwrap().front(),
        Some(&Value::Ref(key.clone()))
    );

    let lifted = graph.detach(&types, &key).unwrap();
    assert_eq!(lifted.get("title"), Some(&Value::from("refit")));
    assert!(!graph.contains(&key));
    let drained = graph.get(&ada).unwrap().get("tasks").unwrap();
    assert!(drained.as_list().unwrap().is_empty());
}

#[test]
fn copies_take_the_next_identity_and_regrow_derived_data() {
    let types = crew_types();
    let mut graph = GenericEntitySet::new();
    let ada = graph.create(&types, "Person", 1).unwrap();
    graph
        .set_value(&types, &ada, "name", Value::from("Ada"))
        .unwrap();
    let task = graph.create(&types, "Task", 10).unwrap();
    graph
        .set_value(&types, &task, "owner", Value::Ref(ada.clone()))
        .unwrap();

    let twin = graph.copy(&types, &ada).unwrap();
    assert_eq!(twin, EntityKey::new("Person", 2));
    assert_eq!(
        graph.get(&twin).unwrap().get("name"),
        Some(&Value::from("Ada"))
    );
    // The original keeps its task; the copy starts with none.
    assert!(graph.get(&ada).unwrap().get("tasks").is_some());
    assert!(graph.get(&twin).unwrap().get("tasks").is_none());
}
