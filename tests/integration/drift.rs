//! Drift detection at startup
//!
//! A recorded definition document is loaded, diffed against the schema
//! the code declares, and the version timeline refuses to roll forward
//! unless its pending sets explain every difference.

use strata_foundation::{ErrorKind, Name, PrimitiveRegistry, Type, Value};
use strata_graph::GenericEntitySet;
use strata_migrate::{MigrationOptions, MigrationSet, Migrator, VersionSupport};
use strata_schema::codec::{decode, encode};
use strata_schema::{EntityDecl, EntityField, EntityTypeSet};
use time::Date;
use time::macros::date;

/// The schema as last year's code wrote it to storage, read back the way
/// a deployment reads it at startup.
fn recorded_types() -> EntityTypeSet {
    let set = EntityTypeSet::from_declarations(
        vec![
            EntityDecl::new("Person")
                .with_identity("id")
                .with_field(EntityField::new("id", Type::Long))
                .with_field(EntityField::nullable("name", Type::String)),
        ],
        vec![],
    )
    .unwrap();
    let document = encode(&set).unwrap();
    decode(&document).unwrap()
}

fn declared(fields: Vec<EntityField>) -> EntityTypeSet {
    let mut decl = EntityDecl::new("Person")
        .with_identity("id")
        .with_field(EntityField::new("id", Type::Long));
    for field in fields {
        decl = decl.with_field(field);
    }
    EntityTypeSet::from_declarations(vec![decl], vec![]).unwrap()
}

fn seeded_graph(types: &EntityTypeSet) -> GenericEntitySet {
    let mut graph = GenericEntitySet::new();
    let ada = graph.create(types, "Person", 1).unwrap();
    graph
        .set_value(types, &ada, "name", Value::String("Ada".into()))
        .unwrap();
    graph
}

fn add_age(day: Date) -> MigrationSet {
    MigrationSet::new("ada", day)
        .with_migrator(Migrator::FieldAdded {
            entity: Name::from("Person"),
            field: EntityField::nullable("age", Type::Int),
            default: Some(Value::Int(0)),
        })
        .unwrap()
}

// =============================================================================
// Steady State
// =============================================================================

#[test]
fn matching_code_needs_no_migration() {
    let recorded = recorded_types();
    let mut graph = seeded_graph(&recorded);
    let mut support = VersionSupport::new(recorded);

    let code = declared(vec![EntityField::nullable("name", Type::String)]);
    let source = PrimitiveRegistry::standard();
    let report = support
        .update(&code, &mut graph, &source, &MigrationOptions::default())
        .unwrap();

    assert!(report.applied.is_empty());
    assert_eq!(report.summary(), "no migration sets applied");
    assert_eq!(support.version(), None);
    let ada = graph.query_by_id(support.types(), "Person", &1.into()).unwrap();
    assert_eq!(ada.get("name"), Some(&Value::String("Ada".into())));
}

// =============================================================================
// Explained Differences
// =============================================================================

#[test]
fn the_preflight_probe_spans_the_whole_pending_run() {
    let recorded = recorded_types();
    let mut graph = seeded_graph(&recorded);
    let mut support = VersionSupport::new(recorded);

    // Neither set alone lands on the declared shape; the pair does.
    support.register(add_age(date!(2024 - 02 - 01))).unwrap();
    support
        .register(
            MigrationSet::new("ada", date!(2024 - 03 - 01))
                .with_migrator(Migrator::FieldRenamed {
                    entity: Name::from("Person"),
                    from: Name::from("age"),
                    to: Name::from("years"),
                })
                .unwrap(),
        )
        .unwrap();

    let code = declared(vec![
        EntityField::nullable("name", Type::String),
        EntityField::nullable("years", Type::Int),
    ]);
    let source = PrimitiveRegistry::standard();
    let report = support
        .update(&code, &mut graph, &source, &MigrationOptions::default())
        .unwrap();

    assert_eq!(report.applied.len(), 2);
    assert_eq!(support.version(), Some(date!(2024 - 03 - 01)));
    let ada = graph.query_by_id(support.types(), "Person", &1.into()).unwrap();
    assert_eq!(ada.get("years"), Some(&Value::Int(0)));
}

// =============================================================================
// Unexplained Differences
// =============================================================================

#[test]
fn surplus_code_changes_refuse_to_commit() {
    let recorded = recorded_types();
    let mut graph = seeded_graph(&recorded);
    let mut support = VersionSupport::new(recorded);

    // The registered set explains the age field, but the code also
    // renamed name to title without writing a migration for it.
    support.register(add_age(date!(2024 - 02 - 01))).unwrap();
    let code = declared(vec![
        EntityField::nullable("title", Type::String),
        EntityField::nullable("age", Type::Int),
    ]);

    let source = PrimitiveRegistry::standard();
    let err = support
        .update(&code, &mut graph, &source, &MigrationOptions::default())
        .unwrap_err();

    assert!(matches!(err.kind, ErrorKind::SchemaDrift(_)));
    assert!(err.to_string().contains("title"));
    // The valid pending set was not committed either.
    assert_eq!(support.version(), None);
    let ada = graph.query_by_id(support.types(), "Person", &1.into()).unwrap();
    assert!(ada.get("age").is_none());
}

#[test]
fn removals_without_a_set_are_drift() {
    let recorded = recorded_types();
    let mut graph = seeded_graph(&recorded);
    let mut support = VersionSupport::new(recorded);

    // The code silently deleted the name field.
    let code = declared(vec![]);
    let source = PrimitiveRegistry::standard();
    let err = support
        .update(&code, &mut graph, &source, &MigrationOptions::default())
        .unwrap_err();

    assert!(matches!(err.kind, ErrorKind::SchemaDrift(_)));
    assert!(
        err.to_string()
            .contains("field `name` found in recorded data but not in declared code")
    );
}
