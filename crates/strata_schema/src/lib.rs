//! Schema layer for the strata schema-evolution system.
//!
//! Models one version of a schema and the differences between versions:
//!
//! - [`EntityType`] / [`EntityField`] / [`EnumType`]: the declared types
//! - [`EntityTypeSet`]: a versioned snapshot of the whole schema, holding
//!   the inheritance forest, enums, native bindings, and the version date
//! - [`diff_sets`] / [`SchemaDiff`]: drift detection between a recorded
//!   and a declared snapshot, with a rendered report
//! - [`codec`]: the JSON definition-exchange document, which preserves
//!   unresolvable names as [`Type::Unresolved`](strata_foundation::Type)

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod codec;
pub mod diff;
pub mod entity;
pub mod enums;
pub mod field;
pub mod set;

pub use diff::{EntityDifference, EnumDifference, FieldDiff, SchemaDiff, SuperChange, diff_sets};
pub use entity::EntityType;
pub use enums::EnumType;
pub use field::EntityField;
pub use set::{EntityDecl, EntityTypeSet, EnumDecl};
