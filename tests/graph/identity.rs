//! Integration tests for identity maintenance
//!
//! Tests renumbering, type switches, and bucket renames, each of which
//! must leave every inbound reference pointing at the moved instance.

use im::Vector;
use strata_foundation::{EntityKey, ErrorKind, Type, Value};
use strata_graph::GenericEntitySet;
use strata_schema::{EntityDecl, EntityField, EntityTypeSet};

fn crew_types() -> EntityTypeSet {
    EntityTypeSet::from_declarations(
        vec![
            EntityDecl::new("Person")
                .with_identity("id")
                .with_field(EntityField::new("id", Type::Long))
                .with_field(EntityField::nullable("deputy", Type::entity("Person"))),
            EntityDecl::new("Employee").extending("Person"),
            EntityDecl::new("Contractor").extending("Person"),
            EntityDecl::new("Roster")
                .with_identity("id")
                .with_field(EntityField::new("id", Type::Long))
                .with_field(EntityField::nullable(
                    "members",
                    Type::collection(Type::entity("Person")),
                )),
        ],
        vec![],
    )
    .unwrap()
}

// =============================================================================
// Renumbering
// =============================================================================

#[test]
fn renumbering_rewrites_every_inbound_reference() {
    let types = crew_types();
    let mut graph = GenericEntitySet::new();
    let ada = graph.create(&types, "Person", 1).unwrap();
    let grace = graph.create(&types, "Person", 2).unwrap();
    let roster = graph.create(&types, "Roster", 1).unwrap();
    graph
        .set_value(&types, &grace, "deputy", Value::Ref(ada.clone()))
        .unwrap();
    graph
        .set_value(
            &types,
            &roster,
            "members",
            Value::List(Vector::from(vec![
                Value::Ref(ada.clone()),
                Value::Ref(grace.clone()),
            ])),
        )
        .unwrap();

    let renumbered = graph.set_identity(&types, &ada, 40).unwrap();
    assert_eq!(renumbered, EntityKey::new("Person", 40));
    assert!(!graph.contains(&ada));
    assert_eq!(
        graph.get(&grace).unwrap().get("deputy"),
        Some(&Value::Ref(renumbered.clone()))
    );
    let members = graph.get(&roster).unwrap().get("members").unwrap();
    assert_eq!(
        members.as_list().unwrap().front(),
        Some(&Value::Ref(renumbered))
    );
}

#[test]
fn renumbering_follows_self_references() {
    let types = crew_types();
    let mut graph = GenericEntitySet::new();
    let ada = graph.create(&types, "Person", 1).unwrap();
    graph
        .set_value(&types, &ada, "deputy", Value::Ref(ada.clone()))
        .unwrap();

    let renumbered = graph.set_identity(&types, &ada, 9).unwrap();
    assert_eq!(
        graph.get(&renumbered).unwrap().get("deputy"),
        Some(&Value::Ref(renumbered.clone()))
    );
}

#[test]
fn renumbering_rejects_collisions_without_side_effects() {
    let types = crew_types();
    let mut graph = GenericEntitySet::new();
    let ada = graph.create(&types, "Person", 1).unwrap();
    // The collision is hierarchy-wide, not per concrete type.
    graph.create(&types, "Employee", 2).unwrap();
    let grace = graph.create(&types, "Person", 3).unwrap();
    graph
        .set_value(&types, &grace, "deputy", Value::Ref(ada.clone()))
        .unwrap();

    let err = graph.set_identity(&types, &ada, 2).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::IdentityTaken { .. }));
    let err = graph.set_identity(&types, &ada, "p1").unwrap_err();
    assert!(matches!(err.kind, ErrorKind::IdentityKind { .. }));

    // Nothing moved, nothing was rewritten.
    assert!(graph.contains(&ada));
    assert_eq!(
        graph.get(&grace).unwrap().get("deputy"),
        Some(&Value::Ref(ada.clone()))
    );

    // Renumbering to the current identity is a no-op.
    assert_eq!(graph.set_identity(&types, &ada, 1).unwrap(), ada);
}

// =============================================================================
// Type Switches
// =============================================================================

#[test]
fn retagging_moves_an_instance_between_concrete_types() {
    let types = crew_types();
    let mut graph = GenericEntitySet::new();
    let temp = graph.create(&types, "Contractor", 5).unwrap();
    let roster = graph.create(&types, "Roster", 1).unwrap();
    graph
        .set_value(
            &types,
            &roster,
            "members",
            Value::List(Vector::from(vec![Value::Ref(temp.clone())])),
        )
        .unwrap();

    let hired = graph.retag(&types, &temp, "Employee").unwrap();
    assert_eq!(hired, EntityKey::new("Employee", 5));
    assert!(!graph.contains(&temp));
    assert!(graph.contains(&hired));
    let members = graph.get(&roster).unwrap().get("members").unwrap();
    assert_eq!(
        members.as_list().unwrap().front(),
        Some(&Value::Ref(hired.clone()))
    );
    // The identity is still taken hierarchy-wide under the new tag.
    assert!(graph.create(&types, "Person", 5).is_err());
}

// =============================================================================
// Bucket Renames
// =============================================================================

#[test]
fn bucket_renames_rewrite_stored_reference_keys() {
    let types = crew_types();
    let mut graph = GenericEntitySet::new();
    let ada = graph.create(&types, "Person", 1).unwrap();
    let roster = graph.create(&types, "Roster", 1).unwrap();
    graph
        .set_value(
            &types,
            &roster,
            "members",
            Value::List(Vector::from(vec![Value::Ref(ada.clone())])),
        )
        .unwrap();

    let moved = graph.rename_type("Person", "Crewmate").unwrap();
    assert_eq!(moved, 1);
    assert!(!graph.contains(&ada));
    let rekeyed = EntityKey::new("Crewmate", 1);
    assert!(graph.contains(&rekeyed));
    let members = graph.get(&roster).unwrap().get("members").unwrap();
    assert_eq!(
        members.as_list().unwrap().front(),
        Some(&Value::Ref(rekeyed))
    );
}
