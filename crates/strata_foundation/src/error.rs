//! Error types for the strata system.
//!
//! Uses `thiserror` for ergonomic error definition. One error type serves
//! every layer; the kinds fall into four families: configuration errors
//! (bad declarations or migration plumbing, always fatal), drift errors
//! (fatal, carrying the full schema diff report), integrity errors
//! (rejected mutations that leave no partial state), and per-instance
//! migration errors (recorded and counted while processing continues).

use thiserror::Error;

use crate::ident::{EntityKey, Ident};
use crate::name::Name;
use crate::types::Type;

/// The main error type for strata operations.
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct Error {
    /// The kind of error that occurred.
    pub kind: ErrorKind,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub fn new(kind: ErrorKind) -> Self {
        Self { kind }
    }

    /// Creates an unknown-type error.
    #[must_use]
    pub fn unknown_type(name: impl Into<Name>) -> Self {
        Self::new(ErrorKind::UnknownType(name.into()))
    }

    /// Creates a duplicate-type error.
    #[must_use]
    pub fn duplicate_type(name: impl Into<Name>) -> Self {
        Self::new(ErrorKind::DuplicateType(name.into()))
    }

    /// Creates an unknown-field error.
    #[must_use]
    pub fn unknown_field(entity: impl Into<Name>, field: impl Into<Name>) -> Self {
        Self::new(ErrorKind::UnknownField {
            entity: entity.into(),
            field: field.into(),
        })
    }

    /// Creates a duplicate-field error.
    #[must_use]
    pub fn duplicate_field(entity: impl Into<Name>, field: impl Into<Name>) -> Self {
        Self::new(ErrorKind::DuplicateField {
            entity: entity.into(),
            field: field.into(),
        })
    }

    /// Creates a type-mismatch error for a field write.
    #[must_use]
    pub fn type_mismatch(expected: Type, actual: impl Into<String>) -> Self {
        Self::new(ErrorKind::TypeMismatch {
            expected,
            actual: actual.into(),
        })
    }

    /// Creates an entity-not-found error.
    #[must_use]
    pub fn entity_not_found(key: EntityKey) -> Self {
        Self::new(ErrorKind::EntityNotFound(key))
    }

    /// Creates an identity-taken error.
    #[must_use]
    pub fn identity_taken(entity: impl Into<Name>, id: Ident) -> Self {
        Self::new(ErrorKind::IdentityTaken {
            entity: entity.into(),
            id,
        })
    }

    /// Creates a schema-drift error from a rendered diff report.
    #[must_use]
    pub fn drift(report: impl Into<String>) -> Self {
        Self::new(ErrorKind::SchemaDrift(report.into()))
    }

    /// Creates an irreversible-migration error.
    #[must_use]
    pub fn irreversible(what: impl Into<String>) -> Self {
        Self::new(ErrorKind::Irreversible(what.into()))
    }

    /// Creates an invalid-definition error.
    #[must_use]
    pub fn invalid_definition(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidDefinition(message.into()))
    }

    /// Creates a value-parse error.
    #[must_use]
    pub fn parse_value(ty: Type, text: impl Into<String>) -> Self {
        Self::new(ErrorKind::ParseValue {
            ty,
            text: text.into(),
        })
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal(message.into()))
    }
}

/// Categorized error kinds for pattern matching.
#[derive(Debug, Error)]
pub enum ErrorKind {
    /// A type name that is not declared in the set.
    #[error("unknown type: {0}")]
    UnknownType(Name),

    /// A type name that is already declared in the set.
    #[error("duplicate type: {0}")]
    DuplicateType(Name),

    /// A field name that is not declared on the entity type.
    #[error("unknown field {field} on {entity}")]
    UnknownField {
        /// The entity type that was queried.
        entity: Name,
        /// The missing field name.
        field: Name,
    },

    /// A field name already declared on (or inherited by) the entity type.
    #[error("duplicate field {field} on {entity}")]
    DuplicateField {
        /// The entity type being changed.
        entity: Name,
        /// The colliding field name.
        field: Name,
    },

    /// An enum value that is not declared on the enum type.
    #[error("unknown value {value} on enum {enum_name}")]
    UnknownEnumValue {
        /// The enum type that was queried.
        enum_name: Name,
        /// The missing value name.
        value: Name,
    },

    /// An enum value already declared on the enum type.
    #[error("duplicate value {value} on enum {enum_name}")]
    DuplicateEnumValue {
        /// The enum type being changed.
        enum_name: Name,
        /// The colliding value name.
        value: Name,
    },

    /// A root entity type left without an identity field.
    #[error("entity type {entity} must designate an identity field")]
    MissingIdentity {
        /// The root entity type.
        entity: Name,
    },

    /// An identity field with a type outside the int/long/string whitelist,
    /// or a nullable identity field.
    #[error("identity field {field} on {entity} must be a non-nullable int, long, or string, got {ty}")]
    InvalidIdentity {
        /// The entity type declaring the identity.
        entity: Name,
        /// The offending field.
        field: Name,
        /// The field's declared type.
        ty: Type,
    },

    /// An identity field declared on a type that already inherits one.
    #[error("entity type {entity} inherits an identity field and may not declare its own")]
    ConflictingIdentity {
        /// The sub-type declaring a second identity.
        entity: Name,
    },

    /// A super-type edge that would close an inheritance cycle.
    #[error("inheritance cycle through {0}")]
    InheritanceCycle(Name),

    /// A removal rejected because a field still references the type.
    #[error("type {name} is still referenced by {holder}.{field}")]
    TypeInUse {
        /// The type being removed.
        name: Name,
        /// The entity type holding the referencing field.
        holder: Name,
        /// The referencing field.
        field: Name,
    },

    /// A removal rejected because sub-types still exist.
    #[error("type {0} still has sub-types")]
    HasSubtypes(Name),

    /// A value that does not fit the field's declared type.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// The declared type.
        expected: Type,
        /// Description of the offered value.
        actual: String,
    },

    /// A null write to a non-nullable field.
    #[error("field {field} on {entity} is not nullable")]
    NotNullable {
        /// The entity type declaring the field.
        entity: Name,
        /// The non-nullable field.
        field: Name,
    },

    /// A key that resolves to no stored entity.
    #[error("entity not found: {0}")]
    EntityNotFound(EntityKey),

    /// An identity already present in the type's hierarchy.
    #[error("identity {id} is already taken in the {entity} hierarchy")]
    IdentityTaken {
        /// The hierarchy root or requested type.
        entity: Name,
        /// The colliding identity.
        id: Ident,
    },

    /// An identity whose kind does not match the identity field type.
    #[error("identity {id} does not match the identity field type of {entity}")]
    IdentityKind {
        /// The entity type.
        entity: Name,
        /// The mismatched identity.
        id: Ident,
    },

    /// A plain field write aimed at the identity field.
    #[error("field {field} is the identity of {entity}; identities change through renumbering")]
    IdentityWrite {
        /// The entity type.
        entity: Name,
        /// The identity field name.
        field: Name,
    },

    /// A direct write to a field that is derived from a mapping.
    #[error("field {field} on {entity} is derived from {source}; write the owning side")]
    DerivedField {
        /// The entity type declaring the derived field.
        entity: Name,
        /// The derived field.
        field: Name,
        /// The authoritative field the mapping names.
        source: Name,
    },

    /// A field removal rejected because another field's mapping or
    /// ordering columns still name it.
    #[error("field {field} on {entity} is still referenced by {holder}.{referrer}")]
    FieldInUse {
        /// The entity type declaring the removed field.
        entity: Name,
        /// The field being removed.
        field: Name,
        /// The entity type holding the referencing field.
        holder: Name,
        /// The referencing field.
        referrer: Name,
    },

    /// A super-type replacement that would change the inherited identity
    /// field.
    #[error("super-type replacement on {entity} must keep the identity field: {had} would become {offered}")]
    IdentityMismatch {
        /// The type whose super-type is being replaced.
        entity: Name,
        /// The identity field inherited before the replacement.
        had: String,
        /// The identity field the new chain provides.
        offered: String,
    },

    /// Unexplained difference between declared and recorded schemas.
    #[error("schema drift detected:\n{0}")]
    SchemaDrift(String),

    /// A reverse application of a forward-only migrator.
    #[error("migration cannot be reversed: {0}")]
    Irreversible(String),

    /// A mutation of a sealed migration set.
    #[error("migration set {0} is sealed")]
    Sealed(String),

    /// Two migration sets registered under the same author and date.
    #[error("duplicate migration set: {0}")]
    DuplicateMigration(String),

    /// A migration set applied before one of its prerequisites.
    #[error("migration set {set} requires {missing}, which has not been applied")]
    MissingPrerequisite {
        /// The set being applied.
        set: String,
        /// The prerequisite that is absent from the applied history.
        missing: String,
    },

    /// A migration set applied after one it must not follow.
    #[error("migration set {set} conflicts with already-applied {applied}")]
    ConflictingMigration {
        /// The set being applied.
        set: String,
        /// The conflicting set found in the applied history.
        applied: String,
    },

    /// Text that does not parse as the given type.
    #[error("cannot parse {text:?} as {ty}")]
    ParseValue {
        /// The target type.
        ty: Type,
        /// The offending text.
        text: String,
    },

    /// A type that has no canonical single-token text form.
    #[error("{0} is not a simple type")]
    NotSimple(Type),

    /// A malformed declaration or definition document.
    #[error("invalid definition: {0}")]
    InvalidDefinition(String),

    /// A migration failure recorded against a single instance.
    #[error("migration failed for {key}: {message}")]
    InstanceMigration {
        /// The instance that failed to migrate.
        key: EntityKey,
        /// What went wrong.
        message: String,
    },

    /// Internal error (should not happen).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type alias using the strata [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
