//! Foundation layer for the strata schema-evolution system.
//!
//! Provides the pieces every other layer builds on:
//!
//! - [`Name`]: shared immutable name keys
//! - [`Type`]: the structural type algebra for entity fields
//! - [`Value`]: runtime values held by generic entities
//! - [`Ident`] / [`EntityKey`]: identities and cross-entity references
//! - [`Error`] / [`ErrorKind`] / [`Result`]: the workspace-wide error type
//! - [`PrimitiveRegistry`]: canonical text formats for simple types
//! - [`DissectorSource`] and friends: the capability contract a dissection
//!   layer implements to expose native record types to the core

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod dissect;
pub mod error;
pub mod ident;
pub mod name;
pub mod primitive;
pub mod types;
pub mod value;

pub use dissect::{CollectionDissector, Dissection, Dissector, DissectorSource, TypedField};
pub use error::{Error, ErrorKind, Result};
pub use ident::{EntityKey, Ident};
pub use name::Name;
pub use primitive::{PrimitiveFormat, PrimitiveRegistry};
pub use types::Type;
pub use value::{EnumLiteral, OpaqueValue, Value};
