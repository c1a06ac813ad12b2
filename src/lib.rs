//! Strata - Schema evolution for generic entity graphs
//!
//! This crate re-exports all layers of the strata system for convenient
//! access. For detailed documentation, see the individual layer crates.
//!
//! # Architecture
//!
//! ```text
//! Layer 3: strata_migrate    — Migrators, migration sets, version rollforward
//! Layer 2: strata_graph      — Generic entity storage, reference integrity
//! Layer 1: strata_schema     — Entity/enum type model, drift detection
//! Layer 0: strata_foundation — Core types (Value, EntityKey, Type, Error)
//! ```

pub use strata_foundation as foundation;
pub use strata_graph as graph;
pub use strata_migrate as migrate;
pub use strata_schema as schema;
