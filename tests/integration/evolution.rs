//! A schema timeline evolving over months
//!
//! Walks one data set through three migration sets: a backfilled field,
//! an enum shrink plus an entity rename, and finally a cascading entity
//! removal. Also replays the tail of the timeline from a recorded
//! checkpoint, the way a deployment that aborted mid-run resumes.

use strata_foundation::{EntityKey, EnumLiteral, Name, PrimitiveRegistry, Type, Value};
use strata_graph::GenericEntitySet;
use strata_migrate::{MigrationOptions, MigrationSet, Migrator, VersionSupport};
use strata_schema::{EntityDecl, EntityField, EntityTypeSet, EnumDecl, diff_sets};
use time::macros::date;

fn recorded_types() -> EntityTypeSet {
    EntityTypeSet::from_declarations(
        vec![
            EntityDecl::new("Ticket")
                .with_identity("id")
                .with_field(EntityField::new("id", Type::Long))
                .with_field(EntityField::new("title", Type::String))
                .with_field(EntityField::nullable("status", Type::enumeration("Status")))
                .with_field(EntityField::nullable("assignee", Type::entity("Person"))),
            EntityDecl::new("Person")
                .with_identity("id")
                .with_field(EntityField::new("id", Type::Long))
                .with_field(EntityField::nullable("name", Type::String)),
        ],
        vec![
            EnumDecl::new("Status")
                .with_value("Open")
                .with_value("Stale")
                .with_value("Closed"),
        ],
    )
    .unwrap()
}

fn declared_types() -> EntityTypeSet {
    EntityTypeSet::from_declarations(
        vec![
            EntityDecl::new("Issue")
                .with_identity("id")
                .with_field(EntityField::new("id", Type::Long))
                .with_field(EntityField::new("title", Type::String))
                .with_field(EntityField::nullable("status", Type::enumeration("Status")))
                .with_field(EntityField::nullable("priority", Type::Int)),
        ],
        vec![EnumDecl::new("Status").with_value("Open").with_value("Closed")],
    )
    .unwrap()
}

fn seeded_graph(types: &EntityTypeSet) -> GenericEntitySet {
    let mut graph = GenericEntitySet::new();
    let grace = graph.create(types, "Person", 1).unwrap();
    graph
        .set_value(types, &grace, "name", Value::String("Grace".into()))
        .unwrap();

    let boiler = graph.create(types, "Ticket", 1).unwrap();
    graph
        .set_value(types, &boiler, "title", Value::String("boiler".into()))
        .unwrap();
    graph
        .set_value(
            types,
            &boiler,
            "status",
            Value::Enum(EnumLiteral::new("Status", "Open")),
        )
        .unwrap();
    graph
        .set_value(types, &boiler, "assignee", Value::Ref(grace))
        .unwrap();

    let drain = graph.create(types, "Ticket", 2).unwrap();
    graph
        .set_value(types, &drain, "title", Value::String("drain".into()))
        .unwrap();
    graph
        .set_value(
            types,
            &drain,
            "status",
            Value::Enum(EnumLiteral::new("Status", "Stale")),
        )
        .unwrap();
    graph
}

fn priorities_set() -> MigrationSet {
    MigrationSet::new("ada", date!(2024 - 02 - 01))
        .with_description("triage priorities")
        .and_then(|set| {
            set.with_migrator(Migrator::FieldAdded {
                entity: Name::from("Ticket"),
                field: EntityField::nullable("priority", Type::Int),
                default: Some(Value::Int(3)),
            })
        })
        .unwrap()
}

fn retire_stale_set() -> MigrationSet {
    MigrationSet::new("bob", date!(2024 - 04 - 01))
        .with_description("retire stale tickets, rename the type")
        .and_then(|set| {
            set.with_migrator(Migrator::EnumValueRemoved {
                enum_name: Name::from("Status"),
                value: Name::from("Stale"),
            })
        })
        .and_then(|set| {
            set.with_migrator(Migrator::EntityRenamed {
                from: Name::from("Ticket"),
                to: Name::from("Issue"),
            })
        })
        .unwrap()
}

fn drop_people_set() -> MigrationSet {
    MigrationSet::new("ada", date!(2024 - 06 - 01))
        .with_description("assignment moved out of band")
        .and_then(|set| {
            set.with_migrator(Migrator::FieldRemoved {
                entity: Name::from("Issue"),
                field: EntityField::nullable("assignee", Type::entity("Person")),
            })
        })
        .and_then(|set| {
            set.with_migrator(Migrator::EntityRemoved {
                definition: EntityDecl::new("Person")
                    .with_identity("id")
                    .with_field(EntityField::new("id", Type::Long))
                    .with_field(EntityField::nullable("name", Type::String)),
            })
        })
        .unwrap()
}

// =============================================================================
// Full Timeline
// =============================================================================

#[test]
fn three_sets_carry_the_data_to_the_declared_shape() {
    let recorded = recorded_types();
    let mut graph = seeded_graph(&recorded);
    let mut support = VersionSupport::new(recorded);
    support.register(priorities_set()).unwrap();
    support.register(retire_stale_set()).unwrap();
    support.register(drop_people_set()).unwrap();

    let declared = declared_types();
    let source = PrimitiveRegistry::standard();
    let report = support
        .update(&declared, &mut graph, &source, &MigrationOptions::default())
        .unwrap();

    let dates: Vec<_> = report.applied.iter().map(|set| set.date).collect();
    assert_eq!(
        dates,
        vec![
            date!(2024 - 02 - 01),
            date!(2024 - 04 - 01),
            date!(2024 - 06 - 01)
        ]
    );
    assert_eq!(support.version(), Some(date!(2024 - 06 - 01)));
    assert!(diff_sets(support.types(), &declared).is_empty());

    // Both tickets were backfilled with the default priority.
    assert_eq!(report.applied[0].updated, 2);

    // Ticket 1 became Issue 1 and kept its data, minus the assignee.
    let boiler = graph
        .query_by_id(support.types(), "Issue", &1.into())
        .unwrap();
    assert_eq!(boiler.get("title"), Some(&Value::String("boiler".into())));
    assert_eq!(
        boiler.get("status"),
        Some(&Value::Enum(EnumLiteral::new("Status", "Open")))
    );
    assert_eq!(boiler.get("priority"), Some(&Value::Int(3)));
    assert!(boiler.get("assignee").is_none());

    // Ticket 2 lost its retired status literal.
    let drain = graph
        .query_by_id(support.types(), "Issue", &2.into())
        .unwrap();
    assert!(drain.get("status").is_none());

    // Person went away with its instances.
    assert!(support.types().entity("Person").is_none());
    assert!(graph.get(&EntityKey::new("Person", 1)).is_none());
    assert_eq!(graph.len(), 2);
}

// =============================================================================
// Resuming
// =============================================================================

#[test]
fn the_timeline_resumes_from_a_recorded_checkpoint() {
    // Recreate the state of a run that stopped after the first set.
    let mut types = recorded_types();
    let mut graph = seeded_graph(&types);
    let source = PrimitiveRegistry::standard();
    priorities_set()
        .apply(&mut types, &mut graph, &source, &MigrationOptions::default())
        .unwrap();
    types.set_version(Some(date!(2024 - 02 - 01)));

    let mut support = VersionSupport::new(types);
    support.register(priorities_set()).unwrap();
    support.register(retire_stale_set()).unwrap();
    support.register(drop_people_set()).unwrap();
    assert_eq!(support.pending().len(), 2);

    let declared = declared_types();
    let report = support
        .update(&declared, &mut graph, &source, &MigrationOptions::default())
        .unwrap();

    assert_eq!(report.applied.len(), 2);
    assert_eq!(support.version(), Some(date!(2024 - 06 - 01)));
    assert!(diff_sets(support.types(), &declared).is_empty());
    let drain = graph
        .query_by_id(support.types(), "Issue", &2.into())
        .unwrap();
    assert_eq!(drain.get("priority"), Some(&Value::Int(3)));
    assert!(drain.get("status").is_none());
}
