//! Integration tests for schema-edit migrators
//!
//! Tests migrators end to end through migration sets: the type model, the
//! stored instances, and the mapping-derived data must all land together.

use strata_foundation::{EntityKey, EnumLiteral, Name, PrimitiveRegistry, Type, Value};
use strata_graph::GenericEntitySet;
use strata_migrate::{MigrationOptions, MigrationSet, Migrator};
use strata_schema::{EntityDecl, EntityField, EntityTypeSet, EnumDecl, diff_sets};
use time::macros::date;

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

fn crew_graph(types: &EntityTypeSet) -> GenericEntitySet {
    let mut graph = GenericEntitySet::new();
    let ada = graph.create(types, "Person", 1).unwrap();
    graph
        .set_value(types, &ada, "name", Value::from("Ada"))
        .unwrap();
    let task = graph.create(types, "Task", 10).unwrap();
    graph
        .set_value(types, &task, "title", Value::from("refit"))
        .unwrap();
    graph
        .set_value(types, &task, "owner", Value::Ref(ada))
        .unwrap();
    graph
        .set_value(
            types,
            &task,
            "status",
            Value::Enum(EnumLiteral::new("Status", "Open")),
        )
        .unwrap();
    graph
}

fn apply_set(
    set: &MigrationSet,
    types: &mut EntityTypeSet,
    graph: &mut GenericEntitySet,
) -> strata_migrate::MigrationTally {
    let source = PrimitiveRegistry::standard();
    set.apply(types, graph, &source, &MigrationOptions::default())
        .unwrap()
}

// =============================================================================
// Rename Propagation
// =============================================================================

#[test]
fn field_rename_carries_instances_and_mappings_along() {
    let mut types = crew_types();
    let mut graph = crew_graph(&types);
    let set = MigrationSet::new("ada", date!(2024 - 02 - 01))
        .with_migrator(Migrator::FieldRenamed {
            entity: Name::from("Task"),
            from: Name::from("owner"),
            to: Name::from("assignee"),
        })
        .unwrap();

    let tally = apply_set(&set, &mut types, &mut graph);
    assert_eq!(tally.updated, 1);

    // Type model re-keyed.
    assert!(types.field_of("Task", "owner").is_none());
    assert!(types.field_of("Task", "assignee").is_some());
    // The mapping that resolved to the renamed field followed it.
    assert_eq!(
        types.field_of("Person", "tasks").unwrap().mapping,
        Some(Name::from("assignee"))
    );
    // Live instances re-keyed, derived data intact.
    let task = graph.get(&EntityKey::new("Task", 10)).unwrap();
    assert!(task.get("owner").is_none());
    assert_eq!(
        task.get("assignee"),
        Some(&Value::Ref(EntityKey::new("Person", 1)))
    );
    let tasks = graph
        .get(&EntityKey::new("Person", 1))
        .unwrap()
        .get("tasks")
        .unwrap();
    assert_eq!(
        tasks.as_list().unwrap().front(),
        Some(&Value::Ref(EntityKey::new("Task", 10)))
    );
}

#[test]
fn entity_rename_moves_instances_and_rewrites_references() {
    let mut types = crew_types();
    let mut graph = crew_graph(&types);
    let set = MigrationSet::new("ada", date!(2024 - 02 - 01))
        .with_migrator(Migrator::EntityRenamed {
            from: Name::from("Task"),
            to: Name::from("Chore"),
        })
        .unwrap();

    apply_set(&set, &mut types, &mut graph);

    assert!(types.entity("Task").is_none());
    let chore = graph.get(&EntityKey::new("Chore", 10)).unwrap();
    assert_eq!(
        chore.get("owner"),
        Some(&Value::Ref(EntityKey::new("Person", 1)))
    );
    // The derived list now holds re-tagged keys.
    let tasks = graph
        .get(&EntityKey::new("Person", 1))
        .unwrap()
        .get("tasks")
        .unwrap();
    assert_eq!(
        tasks.as_list().unwrap().front(),
        Some(&Value::Ref(EntityKey::new("Chore", 10)))
    );
}

// =============================================================================
// Round Trips
// =============================================================================

#[test]
fn a_rename_and_its_reversal_cancel_out() {
    let mut types = crew_types();
    let mut graph = crew_graph(&types);
    let pristine_types = types.clone();

    let there = MigrationSet::new("ada", date!(2024 - 02 - 01))
        .with_migrator(Migrator::FieldRenamed {
            entity: Name::from("Person"),
            from: Name::from("name"),
            to: Name::from("label"),
        })
        .unwrap();
    let back = MigrationSet::new("ada", date!(2024 - 02 - 02))
        .with_migrator(Migrator::FieldRenamed {
            entity: Name::from("Person"),
            from: Name::from("label"),
            to: Name::from("name"),
        })
        .unwrap();

    apply_set(&there, &mut types, &mut graph);
    apply_set(&back, &mut types, &mut graph);

    assert!(diff_sets(&pristine_types, &types).is_empty());
    assert_eq!(
        graph
            .get(&EntityKey::new("Person", 1))
            .unwrap()
            .get("name"),
        Some(&Value::from("Ada"))
    );
}

#[test]
fn reversibility_is_reported_per_migrator() {
    let reversible = Migrator::FieldAdded {
        entity: Name::from("Person"),
        field: EntityField::nullable("age", Type::Int),
        default: None,
    };
    assert!(reversible.is_reversible());

    let lossy = Migrator::SuperTypeReplaced {
        entity: Name::from("Task"),
        to: Name::from("Person"),
    };
    assert!(!lossy.is_reversible());
    let mut types = crew_types();
    assert!(lossy.revert(&mut types).is_err());
}

// =============================================================================
// Destructive Edits
// =============================================================================

#[test]
fn enum_value_removal_strips_stored_literals_first() {
    let mut types = crew_types();
    let mut graph = crew_graph(&types);
    let set = MigrationSet::new("ada", date!(2024 - 02 - 01))
        .with_migrator(Migrator::EnumValueRemoved {
            enum_name: Name::from("Status"),
            value: Name::from("Open"),
        })
        .unwrap();

    let tally = apply_set(&set, &mut types, &mut graph);
    assert_eq!(tally.updated, 1);
    let task = graph.get(&EntityKey::new("Task", 10)).unwrap();
    assert!(task.get("status").is_none());
    assert_eq!(types.find_enum_references("Status").len(), 1);
}

#[test]
fn entity_removal_cascades_through_the_graph() {
    let mut types = crew_types();
    let mut graph = crew_graph(&types);
    // Task.owner is non-nullable, so dropping Person dooms the task; the
    // task definition itself must go first in the same set.
    let set = MigrationSet::new("ada", date!(2024 - 02 - 01))
        .with_migrator(Migrator::FieldRemoved {
            entity: Name::from("Person"),
            field: crew_types().field_of("Person", "tasks").unwrap().clone(),
        })
        .and_then(|set| {
            set.with_migrator(Migrator::EntityRemoved {
                definition: EntityDecl::new("Task")
                    .with_identity("id")
                    .with_field(EntityField::new("id", Type::Long))
                    .with_field(EntityField::nullable("title", Type::String))
                    .with_field(EntityField::new("owner", Type::entity("Person")))
                    .with_field(EntityField::nullable("status", Type::enumeration("Status"))),
            })
        })
        .unwrap();

    let tally = apply_set(&set, &mut types, &mut graph);
    assert_eq!(tally.removed, 1);
    assert!(types.entity("Task").is_none());
    assert!(graph.get(&EntityKey::new("Task", 10)).is_none());
    assert!(graph.get(&EntityKey::new("Person", 1)).is_some());
}

// =============================================================================
// Instance Failure Accounting
// =============================================================================

#[test]
fn per_instance_failures_are_tallied_not_fatal() {
    let mut types = crew_types();
    let mut graph = crew_graph(&types);
    graph.create(&types, "Person", 2).unwrap();
    // A default that does not fit the new field fails per instance.
    let set = MigrationSet::new("ada", date!(2024 - 02 - 01))
        .with_migrator(Migrator::FieldAdded {
            entity: Name::from("Person"),
            field: EntityField::nullable("age", Type::Int),
            default: Some(Value::from("old")),
        })
        .unwrap();

    let source = PrimitiveRegistry::standard();
    let tally = set
        .apply(&mut types, &mut graph, &source, &MigrationOptions::default())
        .unwrap();
    assert_eq!(tally.updated, 0);
    assert_eq!(tally.failed, 2);
    assert_eq!(tally.failures.len(), 2);
    // The schema edit stands; the instances were left as they were.
    assert!(types.field_of("Person", "age").is_some());
    assert!(
        graph
            .get(&EntityKey::new("Person", 1))
            .unwrap()
            .get("age")
            .is_none()
    );
}
