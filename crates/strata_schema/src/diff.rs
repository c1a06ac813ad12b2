//! Drift detection between two schema snapshots.
//!
//! [`diff_sets`] compares a recorded schema (the one stored alongside
//! persisted data) against a declared schema (the one live code describes)
//! and produces a [`SchemaDiff`]. A non-empty diff that no migration
//! accounts for is schema drift; the diff's `Display` form is the report
//! embedded in the drift error.

use std::collections::BTreeSet;
use std::fmt;

use strata_foundation::{Name, Type};

use crate::entity::EntityType;
use crate::enums::EnumType;
use crate::set::EntityTypeSet;

/// Every difference between a recorded and a declared schema.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct SchemaDiff {
    /// Entity types that differ, in name order.
    pub entities: Vec<EntityDifference>,
    /// Enum types that differ, in name order.
    pub enums: Vec<EnumDifference>,
}

impl SchemaDiff {
    /// Returns true if the two schemas matched.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.enums.is_empty()
    }
}

/// How one entity type differs between the two schemas.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntityDifference {
    /// The entity type name.
    pub name: Name,
    /// Present in the declared schema only.
    pub declared_only: bool,
    /// Present in the recorded schema only.
    pub recorded_only: bool,
    /// The super-type link changed.
    pub super_changed: Option<SuperChange>,
    /// Per-field differences, in field name order.
    pub fields: Vec<FieldDiff>,
}

/// A changed super-type link.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SuperChange {
    /// Super-type in the recorded schema.
    pub recorded: Option<Name>,
    /// Super-type in the declared schema.
    pub declared: Option<Name>,
}

impl EntityDifference {
    /// Returns true if anything differs.
    #[must_use]
    pub fn is_different(&self) -> bool {
        self.declared_only
            || self.recorded_only
            || self.super_changed.is_some()
            || !self.fields.is_empty()
    }
}

/// How one field differs between the two sides of an entity type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldDiff {
    /// The field exists in the declared schema only.
    DeclaredOnly {
        /// The field name.
        field: Name,
    },
    /// The field exists in the recorded schema only.
    RecordedOnly {
        /// The field name.
        field: Name,
    },
    /// The field's type changed.
    TypeChanged {
        /// The field name.
        field: Name,
        /// Type in the recorded schema.
        recorded: Type,
        /// Type in the declared schema.
        declared: Type,
    },
    /// The field's nullability changed.
    NullabilityChanged {
        /// The field name.
        field: Name,
        /// Nullability in the recorded schema.
        recorded: bool,
        /// Nullability in the declared schema.
        declared: bool,
    },
}

/// How one enum type differs between the two schemas.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnumDifference {
    /// The enum type name.
    pub name: Name,
    /// Present in the declared schema only.
    pub declared_only: bool,
    /// Present in the recorded schema only.
    pub recorded_only: bool,
    /// Values present in the declared enum only.
    pub added_values: Vec<Name>,
    /// Values present in the recorded enum only.
    pub removed_values: Vec<Name>,
}

impl EnumDifference {
    /// Returns true if anything differs.
    #[must_use]
    pub fn is_different(&self) -> bool {
        self.declared_only
            || self.recorded_only
            || !self.added_values.is_empty()
            || !self.removed_values.is_empty()
    }
}

/// Compares a recorded schema against a declared one.
#[must_use]
pub fn diff_sets(recorded: &EntityTypeSet, declared: &EntityTypeSet) -> SchemaDiff {
    let mut entities = Vec::new();
    let entity_names: BTreeSet<&Name> = recorded
        .entities()
        .map(|e| &e.name)
        .chain(declared.entities().map(|e| &e.name))
        .collect();
    for name in entity_names {
        match (recorded.entity(name), declared.entity(name)) {
            (None, Some(_)) => entities.push(EntityDifference {
                name: name.clone(),
                declared_only: true,
                recorded_only: false,
                super_changed: None,
                fields: Vec::new(),
            }),
            (Some(_), None) => entities.push(EntityDifference {
                name: name.clone(),
                declared_only: false,
                recorded_only: true,
                super_changed: None,
                fields: Vec::new(),
            }),
            (Some(rec), Some(dec)) => {
                let difference = diff_entity(rec, dec);
                if difference.is_different() {
                    entities.push(difference);
                }
            }
            (None, None) => {}
        }
    }

    let mut enums = Vec::new();
    let enum_names: BTreeSet<&Name> = recorded
        .enums()
        .map(|e| &e.name)
        .chain(declared.enums().map(|e| &e.name))
        .collect();
    for name in enum_names {
        match (recorded.enum_type(name), declared.enum_type(name)) {
            (None, Some(_)) => enums.push(EnumDifference {
                name: name.clone(),
                declared_only: true,
                recorded_only: false,
                added_values: Vec::new(),
                removed_values: Vec::new(),
            }),
            (Some(_), None) => enums.push(EnumDifference {
                name: name.clone(),
                declared_only: false,
                recorded_only: true,
                added_values: Vec::new(),
                removed_values: Vec::new(),
            }),
            (Some(rec), Some(dec)) => {
                let difference = diff_enum(rec, dec);
                if difference.is_different() {
                    enums.push(difference);
                }
            }
            (None, None) => {}
        }
    }

    SchemaDiff { entities, enums }
}

fn diff_entity(recorded: &EntityType, declared: &EntityType) -> EntityDifference {
    let super_changed = if recorded.super_type == declared.super_type {
        None
    } else {
        Some(SuperChange {
            recorded: recorded.super_type.clone(),
            declared: declared.super_type.clone(),
        })
    };
    let mut fields = Vec::new();
    let names: BTreeSet<&Name> = recorded
        .fields()
        .map(|f| &f.name)
        .chain(declared.fields().map(|f| &f.name))
        .collect();
    for name in names {
        match (recorded.field(name), declared.field(name)) {
            (None, Some(_)) => fields.push(FieldDiff::DeclaredOnly {
                field: name.clone(),
            }),
            (Some(_), None) => fields.push(FieldDiff::RecordedOnly {
                field: name.clone(),
            }),
            (Some(rec), Some(dec)) => {
                if rec.ty != dec.ty {
                    fields.push(FieldDiff::TypeChanged {
                        field: name.clone(),
                        recorded: rec.ty.clone(),
                        declared: dec.ty.clone(),
                    });
                }
                if rec.nullable != dec.nullable {
                    fields.push(FieldDiff::NullabilityChanged {
                        field: name.clone(),
                        recorded: rec.nullable,
                        declared: dec.nullable,
                    });
                }
            }
            (None, None) => {}
        }
    }
    EntityDifference {
        name: recorded.name.clone(),
        declared_only: false,
        recorded_only: false,
        super_changed,
        fields,
    }
}

fn diff_enum(recorded: &EnumType, declared: &EnumType) -> EnumDifference {
    let added_values = declared
        .values()
        .filter(|v| !recorded.contains(v.as_str()))
        .cloned()
        .collect();
    let removed_values = recorded
        .values()
        .filter(|v| !declared.contains(v.as_str()))
        .cloned()
        .collect();
    EnumDifference {
        name: recorded.name.clone(),
        declared_only: false,
        recorded_only: false,
        added_values,
        removed_values,
    }
}

impl fmt::Display for FieldDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeclaredOnly { field } => {
                write!(
                    f,
                    "field `{field}` found in declared code but not in recorded data"
                )
            }
            Self::RecordedOnly { field } => {
                write!(
                    f,
                    "field `{field}` found in recorded data but not in declared code"
                )
            }
            Self::TypeChanged {
                field,
                recorded,
                declared,
            } => {
                write!(
                    f,
                    "field `{field}` changed type: recorded {recorded}, declared {declared}"
                )
            }
            Self::NullabilityChanged {
                field,
                recorded,
                declared,
            } => {
                write!(
                    f,
                    "field `{field}` changed nullability: recorded {}, declared {}",
                    nullability(*recorded),
                    nullability(*declared)
                )
            }
        }
    }
}

impl fmt::Display for SchemaDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entity in &self.entities {
            if entity.declared_only {
                writeln!(f, "+ entity {}", entity.name)?;
                continue;
            }
            if entity.recorded_only {
                writeln!(f, "- entity {}", entity.name)?;
                continue;
            }
            writeln!(f, "~ entity {}", entity.name)?;
            if let Some(change) = &entity.super_changed {
                writeln!(
                    f,
                    "    super-type changed: recorded {}, declared {}",
                    super_name(&change.recorded),
                    super_name(&change.declared)
                )?;
            }
            for field in &entity.fields {
                writeln!(f, "    {field}")?;
            }
        }
        for en in &self.enums {
            if en.declared_only {
                writeln!(f, "+ enum {}", en.name)?;
                continue;
            }
            if en.recorded_only {
                writeln!(f, "- enum {}", en.name)?;
                continue;
            }
            writeln!(f, "~ enum {}", en.name)?;
            for value in &en.added_values {
                writeln!(
                    f,
                    "    value `{value}` found in declared code but not in recorded data"
                )?;
            }
            for value in &en.removed_values {
                writeln!(
                    f,
                    "    value `{value}` found in recorded data but not in declared code"
                )?;
            }
        }
        Ok(())
    }
}

fn nullability(nullable: bool) -> &'static str {
    if nullable { "nullable" } else { "non-nullable" }
}

fn super_name(name: &Option<Name>) -> &str {
    name.as_ref().map_or("none", Name::as_str)
}
