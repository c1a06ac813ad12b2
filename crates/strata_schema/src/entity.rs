//! Entity type declarations.
//!
//! An [`EntityType`] is one node of the inheritance forest: a name, an
//! optional super-type link (by name, single inheritance), its own fields
//! ordered by name, and on root types the designation of the identity field.
//! Sub-types never declare an identity; they inherit the root's.

use std::collections::BTreeMap;

use strata_foundation::{Error, ErrorKind, Name, Result};

use crate::field::EntityField;

/// A declared entity type.
///
/// Cloning is deep: all field data is owned, and links to other types are
/// held by name rather than by pointer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntityType {
    /// Type name, unique within a set.
    pub name: Name,
    /// Super-type name, if this is a sub-type.
    pub super_type: Option<Name>,
    fields: BTreeMap<Name, EntityField>,
    identity: Option<Name>,
}

impl EntityType {
    /// Creates an empty root type.
    #[must_use]
    pub fn new(name: impl Into<Name>) -> Self {
        Self {
            name: name.into(),
            super_type: None,
            fields: BTreeMap::new(),
            identity: None,
        }
    }

    /// Creates an empty sub-type of `super_type`.
    #[must_use]
    pub fn subtype(name: impl Into<Name>, super_type: impl Into<Name>) -> Self {
        Self {
            super_type: Some(super_type.into()),
            ..Self::new(name)
        }
    }

    /// Populates an empty type with its fields and identity designation.
    ///
    /// This is a one-time pass: root types must designate exactly one
    /// identity field, which must exist, be non-nullable, and have an
    /// int, long, or string type. Sub-types must not designate one.
    ///
    /// # Errors
    ///
    /// Returns an error if the type was already populated, a field name
    /// repeats, or the identity designation breaks the rules above.
    pub fn populate(&mut self, fields: Vec<EntityField>, identity: Option<Name>) -> Result<()> {
        if !self.fields.is_empty() || self.identity.is_some() {
            return Err(Error::invalid_definition(format!(
                "entity type {} is already populated",
                self.name
            )));
        }
        let mut map = BTreeMap::new();
        for field in fields {
            if map.contains_key(field.name.as_str()) {
                return Err(Error::duplicate_field(self.name.clone(), field.name));
            }
            map.insert(field.name.clone(), field);
        }
        match (&self.super_type, identity) {
            (None, None) => {
                return Err(Error::new(ErrorKind::MissingIdentity {
                    entity: self.name.clone(),
                }));
            }
            (None, Some(identity)) => {
                let Some(field) = map.get(identity.as_str()) else {
                    return Err(Error::unknown_field(self.name.clone(), identity));
                };
                if !field.ty.is_identity_candidate() || field.nullable {
                    return Err(Error::new(ErrorKind::InvalidIdentity {
                        entity: self.name.clone(),
                        field: identity,
                        ty: field.ty.clone(),
                    }));
                }
                self.identity = Some(identity);
            }
            (Some(_), Some(_)) => {
                return Err(Error::new(ErrorKind::ConflictingIdentity {
                    entity: self.name.clone(),
                }));
            }
            (Some(_), None) => {}
        }
        self.fields = map;
        Ok(())
    }

    /// Adds a field.
    ///
    /// Collisions with inherited names are checked at the set level, where
    /// the ancestor chain is known.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is already declared on this type.
    pub fn add_field(&mut self, field: EntityField) -> Result<()> {
        if self.fields.contains_key(field.name.as_str()) {
            return Err(Error::duplicate_field(self.name.clone(), field.name));
        }
        self.fields.insert(field.name.clone(), field);
        Ok(())
    }

    /// Removes a field and returns its definition.
    ///
    /// # Errors
    ///
    /// Returns an error if the field does not exist or is the identity
    /// field.
    pub fn remove_field(&mut self, name: &str) -> Result<EntityField> {
        if self.identity.as_deref() == Some(name) {
            return Err(Error::new(ErrorKind::MissingIdentity {
                entity: self.name.clone(),
            }));
        }
        self.fields
            .remove(name)
            .ok_or_else(|| Error::unknown_field(self.name.clone(), name))
    }

    /// Renames a field, following the identity designation if it points at
    /// the renamed field.
    ///
    /// # Errors
    ///
    /// Returns an error if `from` does not exist or `to` already does.
    pub fn rename_field(&mut self, from: &str, to: impl Into<Name>) -> Result<()> {
        let to = to.into();
        if self.fields.contains_key(to.as_str()) {
            return Err(Error::duplicate_field(self.name.clone(), to));
        }
        let Some(mut field) = self.fields.remove(from) else {
            return Err(Error::unknown_field(self.name.clone(), from));
        };
        field.name = to.clone();
        self.fields.insert(to.clone(), field);
        if self.identity.as_deref() == Some(from) {
            self.identity = Some(to);
        }
        Ok(())
    }

    /// Returns the field declared on this type, not searching ancestors.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&EntityField> {
        self.fields.get(name)
    }

    /// Returns a mutable handle to a declared field.
    ///
    /// The field's name must not be changed through this handle; use
    /// [`EntityType::rename_field`] so the index stays consistent.
    pub fn field_mut(&mut self, name: &str) -> Option<&mut EntityField> {
        self.fields.get_mut(name)
    }

    /// Returns true if the field is declared on this type.
    #[must_use]
    pub fn has_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Iterates the declared fields in name order.
    pub fn fields(&self) -> impl Iterator<Item = &EntityField> {
        self.fields.values()
    }

    pub(crate) fn fields_mut(&mut self) -> impl Iterator<Item = &mut EntityField> {
        self.fields.values_mut()
    }

    /// Returns the number of fields declared on this type.
    #[must_use]
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// Returns the identity field name, if this is a root type.
    #[must_use]
    pub fn identity(&self) -> Option<&Name> {
        self.identity.as_ref()
    }

    /// Returns true if this type has no super-type.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.super_type.is_none()
    }
}
