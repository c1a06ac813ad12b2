//! The structural type algebra for entity fields.

use std::fmt;

use crate::name::Name;

/// Structural type of an entity field.
///
/// Types that refer to declared entity or enum types do so by NAME, never by
/// pointer, so two types are equal whenever they render to the same canonical
/// form regardless of which type set they came from. A name that could not be
/// resolved when a definition was read back is preserved as [`Type::Unresolved`]
/// rather than dropped.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Type {
    /// Boolean primitive.
    Bool,
    /// 32-or-fewer-bit integer primitive.
    Int,
    /// 64-bit integer primitive.
    Long,
    /// Floating point primitive.
    Float,
    /// String primitive.
    String,
    /// Custom primitive, formatted and parsed through the registry.
    Opaque(Name),
    /// Reference to a declared entity type.
    Entity(Name),
    /// Reference to a declared enum type.
    Enum(Name),
    /// Homogeneous collection (list or set) of elements.
    Collection(Box<Type>),
    /// Homogeneous key/value pairs.
    Map(Box<Type>, Box<Type>),
    /// A name that could not be resolved against any declared type.
    Unresolved(Name),
}

impl Type {
    /// Creates an entity reference type.
    #[must_use]
    pub fn entity(name: impl Into<Name>) -> Self {
        Self::Entity(name.into())
    }

    /// Creates an enum reference type.
    #[must_use]
    pub fn enumeration(name: impl Into<Name>) -> Self {
        Self::Enum(name.into())
    }

    /// Creates a custom primitive type.
    #[must_use]
    pub fn opaque(name: impl Into<Name>) -> Self {
        Self::Opaque(name.into())
    }

    /// Creates an unresolved placeholder type.
    #[must_use]
    pub fn unresolved(name: impl Into<Name>) -> Self {
        Self::Unresolved(name.into())
    }

    /// Creates a collection type with the given element type.
    #[must_use]
    pub fn collection(element: Type) -> Self {
        Self::Collection(Box::new(element))
    }

    /// Creates a map type with the given key and value types.
    #[must_use]
    pub fn map(key: Type, value: Type) -> Self {
        Self::Map(Box::new(key), Box::new(value))
    }

    /// Returns true if this type may carry an identity value.
    ///
    /// Identity fields are restricted to `int`, `long`, and `string`.
    #[must_use]
    pub const fn is_identity_candidate(&self) -> bool {
        matches!(self, Self::Int | Self::Long | Self::String)
    }

    /// Returns true if this type is a built-in or custom primitive.
    #[must_use]
    pub const fn is_primitive(&self) -> bool {
        matches!(
            self,
            Self::Bool | Self::Int | Self::Long | Self::Float | Self::String | Self::Opaque(_)
        )
    }

    /// Returns the element type of a collection.
    #[must_use]
    pub fn element(&self) -> Option<&Type> {
        match self {
            Self::Collection(t) => Some(t),
            _ => None,
        }
    }

    /// Returns the key and value types of a map.
    #[must_use]
    pub fn entry(&self) -> Option<(&Type, &Type)> {
        match self {
            Self::Map(k, v) => Some((k, v)),
            _ => None,
        }
    }

    /// Returns true if this type references the named entity type anywhere
    /// in its structure.
    #[must_use]
    pub fn mentions_entity(&self, name: &str) -> bool {
        match self {
            Self::Entity(n) => n == name,
            Self::Collection(t) => t.mentions_entity(name),
            Self::Map(k, v) => k.mentions_entity(name) || v.mentions_entity(name),
            _ => false,
        }
    }

    /// Returns true if this type references the named enum type anywhere in
    /// its structure.
    #[must_use]
    pub fn mentions_enum(&self, name: &str) -> bool {
        match self {
            Self::Enum(n) => n == name,
            Self::Collection(t) => t.mentions_enum(name),
            Self::Map(k, v) => k.mentions_enum(name) || v.mentions_enum(name),
            _ => false,
        }
    }

    /// Rewrites every entity reference to `from` into a reference to `to`.
    #[must_use]
    pub fn with_entity_renamed(&self, from: &str, to: &Name) -> Self {
        match self {
            Self::Entity(n) if n == from => Self::Entity(to.clone()),
            Self::Collection(t) => Self::collection(t.with_entity_renamed(from, to)),
            Self::Map(k, v) => Self::map(
                k.with_entity_renamed(from, to),
                v.with_entity_renamed(from, to),
            ),
            other => other.clone(),
        }
    }

    /// Rewrites every enum reference to `from` into a reference to `to`.
    #[must_use]
    pub fn with_enum_renamed(&self, from: &str, to: &Name) -> Self {
        match self {
            Self::Enum(n) if n == from => Self::Enum(to.clone()),
            Self::Collection(t) => Self::collection(t.with_enum_renamed(from, to)),
            Self::Map(k, v) => {
                Self::map(k.with_enum_renamed(from, to), v.with_enum_renamed(from, to))
            }
            other => other.clone(),
        }
    }
}

impl fmt::Debug for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool => write!(f, "bool"),
            Self::Int => write!(f, "int"),
            Self::Long => write!(f, "long"),
            Self::Float => write!(f, "float"),
            Self::String => write!(f, "string"),
            Self::Opaque(n) | Self::Entity(n) | Self::Enum(n) => write!(f, "{n}"),
            Self::Collection(t) => write!(f, "list<{t:?}>"),
            Self::Map(k, v) => write!(f, "map<{k:?}, {v:?}>"),
            Self::Unresolved(n) => write!(f, "?{n}"),
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
