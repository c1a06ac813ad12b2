//! Integration tests for Layer 2: Graph
//!
//! Tests for schema-driven entity storage, cascade removal, and identity
//! maintenance.

mod identity;
mod store;
