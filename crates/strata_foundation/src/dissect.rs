//! The dissection capability contract.
//!
//! The core never inspects native (in-language) record types directly; a
//! dissection layer built outside this workspace (reflection, codegen, or
//! hand-written adapters) implements these traits and hands the core a
//! [`DissectorSource`]. The core consumes the contract when building a
//! declared type set from live code and passes it through to custom
//! migrators.

use std::any::Any;
use std::collections::BTreeMap;

use crate::error::Result;
use crate::name::Name;
use crate::types::Type;
use crate::value::Value;

/// One field of a native record type, as reported by the dissection layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypedField {
    /// Field name.
    pub name: Name,
    /// Declared structural type.
    pub ty: Type,
    /// Whether the field accepts null.
    pub nullable: bool,
    /// Authoritative reverse field on the referenced type, when this field
    /// is the derived side of a bidirectional relationship.
    pub mapping: Option<Name>,
    /// Sort columns for collection fields.
    pub ordering: Vec<Name>,
}

impl TypedField {
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

    /// Marks this field as the derived side of a bidirectional
    /// relationship, naming the authoritative field on the referenced type.
    #[must_use]
    pub fn with_mapping(mut self, mapping: impl Into<Name>) -> Self {
        self.mapping = Some(mapping.into());
        self
    }

    /// Sets the sort columns for a collection field.
    #[must_use]
    pub fn with_ordering(mut self, ordering: impl IntoIterator<Item = impl Into<Name>>) -> Self {
        self.ordering = ordering.into_iter().map(Into::into).collect();
        self
    }
}

/// Reads and builds instances of one native record type.
pub trait Dissector {
    /// The fields of the native type this dissector describes.
    fn fields(&self) -> &[TypedField];

    /// Reads one field from a native instance.
    ///
    /// # Errors
    ///
    /// Returns an error if the instance is not of the described type or the
    /// field is unknown.
    fn get_field(&self, instance: &dyn Any, field: &str) -> Result<Value>;

    /// Writes one field on a native instance.
    ///
    /// # Errors
    ///
    /// Returns an error if the instance is not of the described type, the
    /// field is unknown, or the value does not fit it.
    fn set_field(&self, instance: &mut dyn Any, field: &str, value: Value) -> Result<()>;

    /// Builds a native instance from field values.
    ///
    /// # Errors
    ///
    /// Returns an error if required fields are missing or values do not fit.
    fn create(&self, values: &BTreeMap<Name, Value>) -> Result<Box<dyn Any>>;
}

/// Reads and builds instances of one native collection type.
pub trait CollectionDissector {
    /// The element type of the collection.
    fn component_type(&self) -> &Type;

    /// Reads the elements out of a native collection instance.
    ///
    /// # Errors
    ///
    /// Returns an error if the instance is not of the described type.
    fn elements(&self, instance: &dyn Any) -> Result<Vec<Value>>;

    /// Builds a native collection instance from elements.
    ///
    /// # Errors
    ///
    /// Returns an error if an element does not fit the component type.
    fn create_from(&self, elements: Vec<Value>) -> Result<Box<dyn Any>>;
}

/// The dissector for a type: either a record or a collection.
pub enum Dissection<'a> {
    /// A record type dissector.
    Value(&'a dyn Dissector),
    /// A collection type dissector.
    Collection(&'a dyn CollectionDissector),
}

/// The full capability handed to the core by a dissection layer.
pub trait DissectorSource {
    /// Returns true if the type has a canonical single-token text form.
    fn is_simple(&self, ty: &Type) -> bool;

    /// Parses canonical text into a simple value.
    ///
    /// # Errors
    ///
    /// Returns an error if the type is not simple or the text does not
    /// parse as it.
    fn parse_simple(&self, ty: &Type, text: &str) -> Result<Value>;

    /// Renders a simple value as canonical text.
    ///
    /// # Errors
    ///
    /// Returns an error if the type is not simple or the value does not
    /// belong to it.
    fn format_simple(&self, ty: &Type, value: &Value) -> Result<String>;

    /// Returns the dissector for a structured type, when one is known.
    fn dissect(&self, ty: &Type) -> Option<Dissection<'_>>;
}
