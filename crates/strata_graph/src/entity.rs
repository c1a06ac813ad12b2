//! Schema-driven entity instances.
//!
//! A [`GenericEntity`] is a bag of field values tagged with the concrete
//! entity-type name it instantiates and the identity it is stored under.
//! Instances carry no behavior of their own; every schema-aware operation
//! (type checking, nullability, reference integrity) lives on the store and
//! takes the type set as an argument, so the same instance data can be
//! interpreted under evolving schemas.

use std::collections::BTreeMap;
use std::fmt;

use strata_foundation::{EntityKey, Ident, Name, Value};

/// A stored entity instance: concrete type tag, identity, and field values.
///
/// The identity lives in its own slot and is never duplicated in the values
/// map, so renumbering an entity touches exactly one place. Absent fields
/// read as null; writing [`Value::Null`] clears the slot, keeping a single
/// canonical representation for absence.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GenericEntity {
    entity: Name,
    id: Ident,
    values: BTreeMap<Name, Value>,
}

impl GenericEntity {
    /// Creates an empty instance of the named concrete type.
    #[must_use]
    pub fn new(entity: impl Into<Name>, id: impl Into<Ident>) -> Self {
        Self {
            entity: entity.into(),
            id: id.into(),
            values: BTreeMap::new(),
        }
    }

    /// The concrete entity-type name this instance belongs to.
    #[must_use]
    pub const fn entity(&self) -> &Name {
        &self.entity
    }

    /// The identity this instance is stored under.
    #[must_use]
    pub const fn id(&self) -> &Ident {
        &self.id
    }

    /// The reference key addressing this instance.
    #[must_use]
    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.entity.clone(), self.id.clone())
    }

    /// Reads a field value. Absent fields (including the identity field,
    /// which is not stored here) read as `None`.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }

    /// Writes a field value, returning the previous one.
    ///
    /// Writing [`Value::Null`] clears the slot instead of storing a null, so
    /// absence has one representation. This is the raw, unvalidated write
    /// used on detached instances; stored instances are written through the
    /// set, which checks the value against the schema first.
    pub fn set(&mut self, field: impl Into<Name>, value: Value) -> Option<Value> {
        let field = field.into();
        if value.is_null() {
            self.values.remove(&field)
        } else {
            self.values.insert(field, value)
        }
    }

    /// Clears a field, returning the previous value if one was set.
    pub fn clear(&mut self, field: &str) -> Option<Value> {
        self.values.remove(field)
    }

    /// Iterates the populated fields in name order.
    pub fn fields(&self) -> impl Iterator<Item = (&Name, &Value)> {
        self.values.iter()
    }

    /// Number of populated fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True if no field is populated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Re-keys the instance under a new identity. The store proves the new
    /// identity free across the hierarchy before calling this.
    pub(crate) fn set_id(&mut self, id: Ident) {
        self.id = id;
    }

    /// Re-tags the instance with a new concrete type name.
    pub(crate) fn set_entity(&mut self, entity: Name) {
        self.entity = entity;
    }

    /// Mutable access to a populated field, for in-place reference surgery.
    pub(crate) fn value_mut(&mut self, field: &str) -> Option<&mut Value> {
        self.values.get_mut(field)
    }
}

impl fmt::Display for GenericEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.entity, self.id)
    }
}
