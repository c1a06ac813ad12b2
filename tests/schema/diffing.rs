//! Drift detection integration tests
//!
//! Tests the recorded-versus-declared diff across entities, enums, fields,
//! and inheritance edges, and the wording of the drift report.

use strata_foundation::Type;
use strata_schema::{EntityDecl, EntityField, EntityTypeSet, EnumDecl, diff_sets};

fn base() -> Vec<EntityDecl> {
    vec![
        EntityDecl::new("Person")
            .with_identity("id")
            .with_field(EntityField::new("id", Type::Long))
            .with_field(EntityField::new("name", Type::String)),
    ]
}

fn build(entities: Vec<EntityDecl>, enums: Vec<EnumDecl>) -> EntityTypeSet {
    EntityTypeSet::from_declarations(entities, enums).unwrap()
}

// =============================================================================
// Field Drift
// =============================================================================

#[test]
fn added_field_is_reported_as_declared_only() {
    let recorded = build(base(), vec![]);
    let declared = build(
        vec![
            EntityDecl::new("Person")
                .with_identity("id")
                .with_field(EntityField::new("id", Type::Long))
                .with_field(EntityField::new("name", Type::String))
                .with_field(EntityField::nullable("age", Type::Int)),
        ],
        vec![],
    );

    let diff = diff_sets(&recorded, &declared);
    assert!(!diff.is_empty());
    let report = diff.to_string();
    assert!(report.contains("~ entity Person"));
    assert!(
        report.contains("field `age` found in declared code but not in recorded data"),
        "unexpected report: {report}"
    );
}

#[test]
fn type_and_nullability_changes_are_reported() {
    let recorded = build(base(), vec![]);
    let declared = build(
        vec![
            EntityDecl::new("Person")
                .with_identity("id")
                .with_field(EntityField::new("id", Type::Long))
                .with_field(EntityField::nullable("name", Type::collection(Type::String))),
        ],
        vec![],
    );

    let report = diff_sets(&recorded, &declared).to_string();
    assert!(report.contains("field `name` changed type"));
    assert!(report.contains("field `name` changed nullability"));
}

// =============================================================================
// Type and Enum Drift
// =============================================================================

#[test]
fn added_and_removed_types_are_reported() {
    let recorded = build(base(), vec![EnumDecl::new("Status").with_value("Open")]);
    let declared = build(
        {
            let mut decls = base();
            decls.push(
                EntityDecl::new("Task")
                    .with_identity("id")
                    .with_field(EntityField::new("id", Type::Long)),
            );
            decls
        },
        vec![],
    );

    let report = diff_sets(&recorded, &declared).to_string();
    assert!(report.contains("+ entity Task"));
    assert!(report.contains("- enum Status"));
}

#[test]
fn enum_value_drift_is_reported_per_value() {
    let recorded = build(base(), vec![EnumDecl::new("Status").with_value("Open")]);
    let declared = build(
        base(),
        vec![EnumDecl::new("Status").with_value("Open").with_value("Done")],
    );

    let report = diff_sets(&recorded, &declared).to_string();
    assert!(report.contains("~ enum Status"));
    assert!(report.contains("value `Done` found in declared code but not in recorded data"));
}

#[test]
fn super_type_changes_are_reported() {
    let recorded = build(
        {
            let mut decls = base();
            decls.push(EntityDecl::new("Employee").extending("Person"));
            decls
        },
        vec![],
    );
    let declared = build(
        {
            let mut decls = base();
            decls.push(
                EntityDecl::new("Agent")
                    .with_identity("id")
                    .with_field(EntityField::new("id", Type::Long)),
            );
            decls.push(EntityDecl::new("Employee").extending("Agent"));
            decls
        },
        vec![],
    );

    let report = diff_sets(&recorded, &declared).to_string();
    assert!(report.contains("super-type changed"));
    assert!(report.contains("+ entity Agent"));
}

// =============================================================================
// Equivalence
// =============================================================================

#[test]
fn identical_schemas_produce_an_empty_diff() {
    let recorded = build(base(), vec![EnumDecl::new("Status").with_value("Open")]);
    let declared = build(base(), vec![EnumDecl::new("Status").with_value("Open")]);
    assert!(diff_sets(&recorded, &declared).is_empty());
    assert_eq!(diff_sets(&recorded, &declared).to_string(), "");
}
