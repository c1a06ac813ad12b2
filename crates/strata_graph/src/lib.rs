//! Generic entity storage for the strata schema-evolution system.
//!
//! Instances are schema-driven rather than code-driven: a
//! [`GenericEntity`] is a typed bag of values interpreted against an
//! [`EntityTypeSet`](strata_schema::EntityTypeSet) that is passed into every
//! operation, so stored data can outlive the schema version it was written
//! under.
//!
//! - [`GenericEntity`]: one stored instance (concrete type tag, identity,
//!   field values)
//! - [`GenericEntitySet`]: the store, with hierarchy-wide identity
//!   management, validated writes, cascade removal, replacement, and
//!   renumbering
//! - [`EntityReference`]: schema-level reference positions, used to find
//!   referrers and to cut or rewrite references

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod entity;
pub mod reference;
pub mod store;

pub use entity::GenericEntity;
pub use reference::{EntityReference, ReferenceKind};
pub use store::GenericEntitySet;
