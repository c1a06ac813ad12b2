//! Integration tests for Layer 1: Schema
//!
//! Tests for the entity/enum type model, definition exchange, and drift
//! detection.

mod diffing;
mod mutations;
