//! Integration tests for Layer 3: Migrate
//!
//! Tests for migrators carrying live instances along with schema edits,
//! and for date-keyed migration sets.

mod migrators;
mod sets;
