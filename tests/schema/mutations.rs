//! Schema surgery integration tests
//!
//! Tests a sequence of structural edits against one type set, checking
//! that every dependent definition follows each edit and the set stays
//! valid throughout.

use strata_foundation::{ErrorKind, Name, Type};
use strata_schema::{EntityDecl, EntityField, EntityTypeSet, EnumDecl};

fn fleet_schema() -> EntityTypeSet {
    EntityTypeSet::from_declarations(
        vec![
            EntityDecl::new("Ship")
                .with_identity("id")
                .with_field(EntityField::new("id", Type::Long))
                .with_field(EntityField::new("name", Type::String))
                .with_field(EntityField::nullable("state", Type::enumeration("State"))),
            EntityDecl::new("Tug").extending("Ship"),
            EntityDecl::new("Voyage")
                .with_identity("id")
                .with_field(EntityField::new("id", Type::Long))
                .with_field(EntityField::new("vessel", Type::entity("Ship")))
                .with_field(EntityField::nullable(
                    "ports",
                    Type::map(Type::String, Type::entity("Ship")),
                )),
        ],
        vec![EnumDecl::new("State").with_value("Docked").with_value("AtSea")],
    )
    .unwrap()
}

// =============================================================================
// Renames Follow References
// =============================================================================

#[test]
fn entity_rename_rewrites_every_mention() {
    let mut set = fleet_schema();
    set.rename_entity("Ship", "Vessel").unwrap();
    set.validate().unwrap();

    assert!(set.entity("Ship").is_none());
    assert!(set.entity("Vessel").is_some());
    assert_eq!(
        set.entity("Tug").unwrap().super_type,
        Some(Name::from("Vessel"))
    );
    assert_eq!(
        set.field_of("Voyage", "vessel").unwrap().ty,
        Type::entity("Vessel")
    );
    assert_eq!(
        set.field_of("Voyage", "ports").unwrap().ty,
        Type::map(Type::String, Type::entity("Vessel"))
    );
}

#[test]
fn enum_rename_rewrites_field_types() {
    let mut set = fleet_schema();
    set.rename_enum("State", "Phase").unwrap();
    set.validate().unwrap();

    assert_eq!(
        set.field_of("Ship", "state").unwrap().ty,
        Type::enumeration("Phase")
    );
    assert_eq!(set.find_enum_references("Phase").len(), 1);
}

// =============================================================================
// Removal Guards
// =============================================================================

#[test]
fn referenced_types_refuse_removal() {
    let mut set = fleet_schema();
    let err = set.remove_entity("Ship").unwrap_err();
    assert!(matches!(
        err.kind,
        ErrorKind::TypeInUse { .. } | ErrorKind::HasSubtypes(_)
    ));

    let err = set.remove_enum("State").unwrap_err();
    assert!(matches!(err.kind, ErrorKind::TypeInUse { .. }));

    // Cutting the references first clears the way.
    set.remove_field("Voyage", "vessel").unwrap();
    set.remove_field("Voyage", "ports").unwrap();
    set.remove_field("Ship", "state").unwrap();
    set.remove_entity("Tug").unwrap();
    set.remove_enum("State").unwrap();
    set.remove_entity("Ship").unwrap();
    set.validate().unwrap();
    assert_eq!(set.entity_count(), 1);
}

// =============================================================================
// Surgery Sequences
// =============================================================================

#[test]
fn an_edit_sequence_lands_on_the_declared_shape() {
    let mut set = fleet_schema();

    set.add_field("Ship", EntityField::nullable("tonnage", Type::Int))
        .unwrap();
    set.rename_field("Ship", "name", "title").unwrap();
    set.add_enum_value("State", "Refit").unwrap();
    set.rename_enum_value("State", "AtSea", "Underway").unwrap();
    set.set_field_nullable("Voyage", "vessel", true).unwrap();
    set.validate().unwrap();

    let target = EntityTypeSet::from_declarations(
        vec![
            EntityDecl::new("Ship")
                .with_identity("id")
                .with_field(EntityField::new("id", Type::Long))
                .with_field(EntityField::new("title", Type::String))
                .with_field(EntityField::nullable("state", Type::enumeration("State")))
                .with_field(EntityField::nullable("tonnage", Type::Int)),
            EntityDecl::new("Tug").extending("Ship"),
            EntityDecl::new("Voyage")
                .with_identity("id")
                .with_field(EntityField::new("id", Type::Long))
                .with_field(EntityField::nullable("vessel", Type::entity("Ship")))
                .with_field(EntityField::nullable(
                    "ports",
                    Type::map(Type::String, Type::entity("Ship")),
                )),
        ],
        vec![
            EnumDecl::new("State")
                .with_value("Docked")
                .with_value("Underway")
                .with_value("Refit"),
        ],
    )
    .unwrap();
    assert!(strata_schema::diff_sets(&set, &target).is_empty());
}

#[test]
fn subtype_moves_between_compatible_roots() {
    let mut set = fleet_schema();
    set.insert_entity({
        let mut barge = strata_schema::EntityType::new("Barge");
        barge
            .populate(
                vec![EntityField::new("id", Type::Long)],
                Some(Name::from("id")),
            )
            .unwrap();
        barge
    })
    .unwrap();

    set.set_super_type("Tug", Some(Name::from("Barge"))).unwrap();
    set.validate().unwrap();
    assert!(set.is_subtype_of("Tug", "Barge"));
    assert!(!set.is_subtype_of("Tug", "Ship"));
    assert_eq!(set.root_of("Tug").unwrap().name, Name::from("Barge"));
}
