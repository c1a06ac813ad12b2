//! Schema migration for the strata schema-evolution system.
//!
//! Migrations are hand-authored, never inferred: each schema edit is a
//! [`Migrator`] that knows how to change the type model and how to carry
//! the stored instances along, and migrators travel in date-keyed
//! [`MigrationSet`]s applied in order by [`VersionSupport`].
//!
//! - [`Migrator`]: the schema edit vocabulary, plus [`CustomMigrator`]
//!   for edits the vocabulary cannot express
//! - [`MigrationSet`]: a sealed bundle of migrators under one
//!   (date, author) key, with tag predicates and ordering preconditions
//! - [`VersionSupport`]: the version timeline; detects unexplained drift
//!   between recorded and declared schemas and rolls the recorded side
//!   forward set by set
//! - [`RollforwardReport`]: per-set instance counts and failure
//!   diagnostics from one update

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod migrator;
pub mod set;
pub mod version;

pub use migrator::{CustomMigrator, MigrationOptions, MigrationTally, Migrator};
pub use set::{MigrationKey, MigrationSet};
pub use version::{AppliedSet, RollforwardReport, VersionSupport};
