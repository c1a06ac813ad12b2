//! Field definitions for entity types.

use strata_foundation::{Name, Type};

/// A named, typed field declared on an entity type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntityField {
    /// Field name.
    pub name: Name,
    /// Structural type.
    pub ty: Type,
    /// Whether null is an acceptable stored value.
    pub nullable: bool,
    /// Field on the referenced entity type that holds the authoritative
    /// reverse side of a bidirectional relationship. A mapped field's value
    /// is derived; a linking pass recomputes it from the reverse side.
    pub mapping: Option<Name>,
    /// Sort columns for collection values, named fields of the element type.
    pub ordering: Vec<Name>,
}

impl EntityField {
    /// Creates a non-nullable field.
    #[must_use]
    pub fn new(name: impl Into<Name>, ty: Type) -> Self {
        Self {
            name: name.into(),
            ty,
            nullable: false,
            mapping: None,
            ordering: Vec::new(),
        }
    }

    /// Creates a nullable field.
    #[must_use]
    pub fn nullable(name: impl Into<Name>, ty: Type) -> Self {
        Self {
            nullable: true,
            ..Self::new(name, ty)
        }
    }

    /// Sets the reverse-mapping field on the referenced type.
    #[must_use]
    pub fn with_mapping(mut self, mapping: impl Into<Name>) -> Self {
        self.mapping = Some(mapping.into());
        self
    }

    /// Sets the sort columns for a collection field.
    #[must_use]
    pub fn with_ordering<I, N>(mut self, ordering: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<Name>,
    {
        self.ordering = ordering.into_iter().map(Into::into).collect();
        self
    }

    /// Returns true if the field holds a collection or map.
    #[must_use]
    pub fn is_container(&self) -> bool {
        matches!(self.ty, Type::Collection(_) | Type::Map(..))
    }
}
