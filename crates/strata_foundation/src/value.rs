//! Runtime values held by generic entities.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use im::{OrdMap, Vector};

use crate::ident::EntityKey;
use crate::name::Name;

/// A named value of a named enum type.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EnumLiteral {
    /// The enum type this value belongs to.
    pub enum_name: Name,
    /// The value's own name.
    pub value: Name,
}

impl EnumLiteral {
    /// Creates an enum literal.
    #[must_use]
    pub fn new(enum_name: impl Into<Name>, value: impl Into<Name>) -> Self {
        Self {
            enum_name: enum_name.into(),
            value: value.into(),
        }
    }
}

impl fmt::Debug for EnumLiteral {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.enum_name, self.value)
    }
}

impl fmt::Display for EnumLiteral {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

/// A value of a custom primitive type, held in its canonical text form.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OpaqueValue {
    /// The primitive's declared name.
    pub kind: Name,
    /// Canonical text rendering.
    pub text: Arc<str>,
}

impl OpaqueValue {
    /// Creates an opaque primitive value.
    #[must_use]
    pub fn new(kind: impl Into<Name>, text: impl Into<Arc<str>>) -> Self {
        Self {
            kind: kind.into(),
            text: text.into(),
        }
    }
}

impl fmt::Debug for OpaqueValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.kind, self.text)
    }
}

impl fmt::Display for OpaqueValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text)
    }
}

/// Runtime value stored in a generic entity field.
///
/// Values are immutable and cheaply cloneable; composite values use
/// structural sharing via persistent collections. `Value` carries a total
/// order (discriminant rank first, then contents, floats by
/// [`f64::total_cmp`]) so values can key ordered maps, and its equality and
/// hashing agree with that order (floats compare by bits, so NaN equals
/// itself).
#[derive(Clone)]
pub enum Value {
    /// The null value (absence).
    Null,
    /// Boolean value.
    Bool(bool),
    /// Integer value, covering both `int` and `long` fields.
    Int(i64),
    /// Floating point value.
    Float(f64),
    /// String value.
    String(Arc<str>),
    /// Custom primitive value in canonical text form.
    Opaque(OpaqueValue),
    /// Enum value.
    Enum(EnumLiteral),
    /// Reference to a stored entity.
    Ref(EntityKey),
    /// Ordered collection of values (lists and sets share this shape).
    List(Vector<Value>),
    /// Key/value pairs ordered by key.
    Map(OrdMap<Value, Value>),
}

impl Value {
    /// Returns a short description of this value's shape for diagnostics.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Opaque(_) => "opaque",
            Self::Enum(_) => "enum",
            Self::Ref(_) => "reference",
            Self::List(_) => "list",
            Self::Map(_) => "map",
        }
    }

    /// Returns true if this value is null.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Attempts to extract a boolean value.
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Attempts to extract an integer value.
    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Attempts to extract a float value.
    #[must_use]
    pub const fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(n) => Some(*n),
            _ => None,
        }
    }

    /// Attempts to extract a string reference.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Attempts to extract an enum literal.
    #[must_use]
    pub const fn as_enum(&self) -> Option<&EnumLiteral> {
        match self {
            Self::Enum(e) => Some(e),
            _ => None,
        }
    }

    /// Attempts to extract an entity reference key.
    #[must_use]
    pub const fn as_ref_key(&self) -> Option<&EntityKey> {
        match self {
            Self::Ref(key) => Some(key),
            _ => None,
        }
    }

    /// Attempts to extract a list reference.
    #[must_use]
    pub const fn as_list(&self) -> Option<&Vector<Value>> {
        match self {
            Self::List(v) => Some(v),
            _ => None,
        }
    }

    /// Attempts to extract a map reference.
    #[must_use]
    pub const fn as_map(&self) -> Option<&OrdMap<Value, Value>> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Discriminant rank used as the first key of the total order.
    const fn rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Bool(_) => 1,
            Self::Int(_) => 2,
            Self::Float(_) => 3,
            Self::String(_) => 4,
            Self::Opaque(_) => 5,
            Self::Enum(_) => 6,
            Self::Ref(_) => 7,
            Self::List(_) => 8,
            Self::Map(_) => 9,
        }
    }
}

// Implement PartialEq manually to handle float comparison
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Opaque(a), Self::Opaque(b)) => a == b,
            (Self::Enum(a), Self::Enum(b)) => a == b,
            (Self::Ref(a), Self::Ref(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Map(a), Self::Map(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Null => {}
            Self::Bool(b) => b.hash(state),
            Self::Int(n) => n.hash(state),
            Self::Float(n) => n.to_bits().hash(state),
            Self::String(s) => s.hash(state),
            Self::Opaque(o) => o.hash(state),
            Self::Enum(e) => e.hash(state),
            Self::Ref(key) => key.hash(state),
            Self::List(v) => v.hash(state),
            Self::Map(m) => m.hash(state),
        }
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Float(a), Self::Float(b)) => a.total_cmp(b),
            (Self::String(a), Self::String(b)) => a.cmp(b),
            (Self::Opaque(a), Self::Opaque(b)) => a.cmp(b),
            (Self::Enum(a), Self::Enum(b)) => a.cmp(b),
            (Self::Ref(a), Self::Ref(b)) => a.cmp(b),
            (Self::List(a), Self::List(b)) => a.cmp(b),
            (Self::Map(a), Self::Map(b)) => a.cmp(b),
            // Different discriminants (and Null = Null) order by rank.
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Float(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::Opaque(o) => write!(f, "{o:?}"),
            Self::Enum(e) => write!(f, "{e:?}"),
            Self::Ref(key) => write!(f, "{key:?}"),
            Self::List(v) => {
                write!(f, "[")?;
                for (i, item) in v.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item:?}")?;
                }
                write!(f, "]")
            }
            Self::Map(m) => {
                write!(f, "{{")?;
                for (i, (k, v)) in m.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k:?}: {v:?}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => write!(f, "{s}"),
            Self::Opaque(o) => write!(f, "{o}"),
            Self::Enum(e) => write!(f, "{e}"),
            other => write!(f, "{other:?}"),
        }
    }
}

// Convenience From implementations

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Int(i64::from(n))
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Float(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.into())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s.into())
    }
}

impl From<Arc<str>> for Value {
    fn from(s: Arc<str>) -> Self {
        Self::String(s)
    }
}

impl From<EntityKey> for Value {
    fn from(key: EntityKey) -> Self {
        Self::Ref(key)
    }
}

impl From<EnumLiteral> for Value {
    fn from(e: EnumLiteral) -> Self {
        Self::Enum(e)
    }
}

impl From<OpaqueValue> for Value {
    fn from(o: OpaqueValue) -> Self {
        Self::Opaque(o)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Self::List(v.into_iter().map(Into::into).collect())
    }
}
