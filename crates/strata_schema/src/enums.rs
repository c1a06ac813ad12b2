//! Enum type declarations.

use std::collections::BTreeSet;

use strata_foundation::{Error, ErrorKind, Name, Result};

/// A declared enum type: a closed, ordered set of named values.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnumType {
    /// Enum type name, unique within a set.
    pub name: Name,
    values: BTreeSet<Name>,
}

impl EnumType {
    /// Creates an empty enum type.
    #[must_use]
    pub fn new(name: impl Into<Name>) -> Self {
        Self {
            name: name.into(),
            values: BTreeSet::new(),
        }
    }

    /// Creates an enum type with the given values.
    #[must_use]
    pub fn with_values<I, N>(name: impl Into<Name>, values: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<Name>,
    {
        Self {
            name: name.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Adds a value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is already declared.
    pub fn add_value(&mut self, value: impl Into<Name>) -> Result<()> {
        let value = value.into();
        if self.values.contains(value.as_str()) {
            return Err(Error::new(ErrorKind::DuplicateEnumValue {
                enum_name: self.name.clone(),
                value,
            }));
        }
        self.values.insert(value);
        Ok(())
    }

    /// Removes a value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not declared.
    pub fn remove_value(&mut self, value: &str) -> Result<()> {
        if !self.values.remove(value) {
            return Err(Error::new(ErrorKind::UnknownEnumValue {
                enum_name: self.name.clone(),
                value: Name::from(value),
            }));
        }
        Ok(())
    }

    /// Renames a value.
    ///
    /// # Errors
    ///
    /// Returns an error if `from` is not declared or `to` already is.
    pub fn rename_value(&mut self, from: &str, to: impl Into<Name>) -> Result<()> {
        let to = to.into();
        if !self.values.contains(from) {
            return Err(Error::new(ErrorKind::UnknownEnumValue {
                enum_name: self.name.clone(),
                value: Name::from(from),
            }));
        }
        if self.values.contains(to.as_str()) {
            return Err(Error::new(ErrorKind::DuplicateEnumValue {
                enum_name: self.name.clone(),
                value: to,
            }));
        }
        self.values.remove(from);
        self.values.insert(to);
        Ok(())
    }

    /// Returns true if the value is declared.
    #[must_use]
    pub fn contains(&self, value: &str) -> bool {
        self.values.contains(value)
    }

    /// Iterates the declared values in name order.
    pub fn values(&self) -> impl Iterator<Item = &Name> {
        self.values.iter()
    }

    /// Returns the number of declared values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if no values are declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
