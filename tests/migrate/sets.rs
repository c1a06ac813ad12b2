//! Integration tests for migration sets
//!
//! Tests the parts of set behavior that only show up against a live
//! graph or a version timeline: sealing through registration, migrators
//! observing each other's effects, and whole-set reversal.

use strata_foundation::{ErrorKind, Name, PrimitiveRegistry, Type, Value};
use strata_graph::GenericEntitySet;
use strata_migrate::{MigrationOptions, MigrationSet, Migrator, VersionSupport};
use strata_schema::{EntityDecl, EntityField, EntityTypeSet, diff_sets};
use time::macros::date;

fn base_types() -> EntityTypeSet {
    EntityTypeSet::from_declarations(
        vec![
            EntityDecl::new("Person")
                .with_identity("id")
                .with_field(EntityField::new("id", Type::Long)),
        ],
        vec![],
    )
    .unwrap()
}

// =============================================================================
// Sealing
// =============================================================================

#[test]
fn registration_seals_the_set() {
    let mut support = VersionSupport::new(base_types());
    let open = MigrationSet::new("ada", date!(2024 - 02 - 01));
    assert!(!open.is_sealed());
    support.register(open).unwrap();

    let stored = support.registered().next().unwrap().clone();
    assert!(stored.is_sealed());
    let err = stored
        .with_migrator(Migrator::FieldAdded {
            entity: Name::from("Person"),
            field: EntityField::nullable("age", Type::Int),
            default: None,
        })
        .unwrap_err();
    assert!(matches!(err.kind, ErrorKind::Sealed(_)));
}

// =============================================================================
// Application Order
// =============================================================================

#[test]
fn migrators_see_the_effects_of_earlier_ones() {
    let mut types = base_types();
    let mut graph = GenericEntitySet::new();
    graph.create(&types, "Person", 1).unwrap();

    // The second migrator renames the field the first one added, so the
    // default has to land under the final name.
    let set = MigrationSet::new("ada", date!(2024 - 02 - 01))
        .with_migrator(Migrator::FieldAdded {
            entity: Name::from("Person"),
            field: EntityField::nullable("age", Type::Int),
            default: Some(Value::Int(0)),
        })
        .and_then(|set| {
            set.with_migrator(Migrator::FieldRenamed {
                entity: Name::from("Person"),
                from: Name::from("age"),
                to: Name::from("years"),
            })
        })
        .unwrap();

    let source = PrimitiveRegistry::standard();
    set.apply(&mut types, &mut graph, &source, &MigrationOptions::default())
        .unwrap();

    assert!(types.field_of("Person", "age").is_none());
    assert!(types.field_of("Person", "years").is_some());
    let person = graph.query_by_id(&types, "Person", &1.into()).unwrap();
    assert_eq!(person.get("years"), Some(&Value::Int(0)));
}

#[test]
fn mutual_references_added_in_one_set_are_usable_at_once() {
    let mut types = base_types();
    let mut graph = GenericEntitySet::new();

    let set = MigrationSet::new("ada", date!(2024 - 02 - 01))
        .with_migrator(Migrator::EntityAdded {
            definition: EntityDecl::new("Team")
                .with_identity("id")
                .with_field(EntityField::new("id", Type::Long))
                .with_field(EntityField::nullable("lead", Type::entity("Robot"))),
        })
        .and_then(|set| {
            set.with_migrator(Migrator::EntityAdded {
                definition: EntityDecl::new("Robot")
                    .with_identity("id")
                    .with_field(EntityField::new("id", Type::Long))
                    .with_field(EntityField::nullable("crew", Type::entity("Team"))),
            })
        })
        .unwrap();

    let source = PrimitiveRegistry::standard();
    set.apply(&mut types, &mut graph, &source, &MigrationOptions::default())
        .unwrap();

    let team = graph.create(&types, "Team", 1).unwrap();
    let robot = graph.create(&types, "Robot", 1).unwrap();
    graph
        .set_value(&types, &team, "lead", Value::Ref(robot.clone()))
        .unwrap();
    graph
        .set_value(&types, &robot, "crew", Value::Ref(team))
        .unwrap();
}

// =============================================================================
// Reversal
// =============================================================================

#[test]
fn reverting_a_set_restores_the_recorded_shape() {
    let mut types = base_types();
    let pristine = types.clone();
    let set = MigrationSet::new("ada", date!(2024 - 02 - 01))
        .with_migrator(Migrator::EntityAdded {
            definition: EntityDecl::new("Badge")
                .with_identity("id")
                .with_field(EntityField::new("id", Type::Long)),
        })
        .and_then(|set| {
            set.with_migrator(Migrator::FieldAdded {
                entity: Name::from("Badge"),
                field: EntityField::nullable("color", Type::String),
                default: None,
            })
        })
        .unwrap();

    set.apply_types(&mut types).unwrap();
    assert!(types.entity("Badge").is_some());

    set.revert(&mut types).unwrap();
    assert!(diff_sets(&pristine, &types).is_empty());
}
