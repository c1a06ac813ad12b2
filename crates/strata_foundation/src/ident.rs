//! Entity identities and cross-entity reference keys.

use std::fmt;
use std::sync::Arc;

use crate::name::Name;
use crate::types::Type;

/// The identity value of a stored entity.
///
/// Identities come in two kinds matching the identity-field whitelist:
/// integer (covering `int` and `long` fields) and text (covering `string`
/// fields). Identities order entities within a type's storage and are the
/// stable half of an [`EntityKey`].
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Ident {
    /// Integer identity.
    Int(i64),
    /// Text identity.
    Text(Arc<str>),
}

impl Ident {
    /// Returns the next identity after this one.
    ///
    /// Integer identities increment by one. Text identities treat the
    /// maximal trailing run of ASCII digits as a base-10 numeral and
    /// increment it with carry, growing the run by one digit when it is all
    /// nines (`"9"` becomes `"10"`, `"a09"` becomes `"a10"`). A value with
    /// no trailing digit, including the empty string, appends `"0"` to
    /// bootstrap a run.
    #[must_use]
    pub fn next(&self) -> Self {
        match self {
            Self::Int(n) => Self::Int(n + 1),
            Self::Text(s) => Self::Text(increment_text(s).into()),
        }
    }

    /// Returns the first identity generated for an empty hierarchy.
    #[must_use]
    pub fn initial(text: bool) -> Self {
        if text {
            Self::Text("1".into())
        } else {
            Self::Int(1)
        }
    }

    /// Returns true if this identity kind matches the given identity-field
    /// type (`int`/`long` for integer identities, `string` for text).
    #[must_use]
    pub const fn matches_type(&self, ty: &Type) -> bool {
        match self {
            Self::Int(_) => matches!(ty, Type::Int | Type::Long),
            Self::Text(_) => matches!(ty, Type::String),
        }
    }

    /// Extracts the integer identity, if this is one.
    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            Self::Text(_) => None,
        }
    }

    /// Extracts the text identity, if this is one.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Int(_) => None,
            Self::Text(s) => Some(s),
        }
    }
}

/// Increments the trailing digit run of `s`, appending `"0"` when there is
/// no run to increment.
fn increment_text(s: &str) -> String {
    let run_start = s
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit())
        .last()
        .map(|(i, _)| i);

    let Some(start) = run_start else {
        let mut out = String::with_capacity(s.len() + 1);
        out.push_str(s);
        out.push('0');
        return out;
    };

    let (prefix, run) = s.split_at(start);
    let mut digits: Vec<u8> = run.bytes().collect();
    let mut carry = true;
    for digit in digits.iter_mut().rev() {
        if !carry {
            break;
        }
        if *digit == b'9' {
            *digit = b'0';
        } else {
            *digit += 1;
            carry = false;
        }
    }

    let mut out = String::with_capacity(s.len() + 1);
    out.push_str(prefix);
    if carry {
        out.push('1');
    }
    for digit in digits {
        out.push(char::from(digit));
    }
    out
}

impl From<i64> for Ident {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<i32> for Ident {
    fn from(n: i32) -> Self {
        Self::Int(i64::from(n))
    }
}

impl From<&str> for Ident {
    fn from(s: &str) -> Self {
        Self::Text(s.into())
    }
}

impl From<String> for Ident {
    fn from(s: String) -> Self {
        Self::Text(s.into())
    }
}

impl fmt::Debug for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(n) => write!(f, "{n}"),
            Self::Text(s) => write!(f, "{s:?}"),
        }
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(n) => write!(f, "{n}"),
            Self::Text(s) => write!(f, "{s}"),
        }
    }
}

/// Reference to a stored entity: the entity's CONCRETE type name plus its
/// identity.
///
/// Keys, not pointers, are the unit of cross-entity reference; every key is
/// produced from the instance it points at, so two keys are equal exactly
/// when they address the same stored entity.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityKey {
    /// Concrete type name of the referenced entity.
    pub entity: Name,
    /// Identity of the referenced entity.
    pub id: Ident,
}

impl EntityKey {
    /// Creates a key from a concrete type name and identity.
    #[must_use]
    pub fn new(entity: impl Into<Name>, id: impl Into<Ident>) -> Self {
        Self {
            entity: entity.into(),
            id: id.into(),
        }
    }
}

impl fmt::Debug for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.entity, self.id)
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.entity, self.id)
    }
}
