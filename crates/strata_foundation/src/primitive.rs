//! Canonical text formatting for simple types.
//!
//! The registry is an explicit object, constructed once with the built-in
//! primitives and passed to whoever needs to format or parse simple values.
//! User-registered formats take precedence over the built-ins; primitive
//! names with no registered format pass through as opaque values.

use std::collections::BTreeMap;

use crate::dissect::{Dissection, DissectorSource};
use crate::error::{Error, ErrorKind, Result};
use crate::name::Name;
use crate::types::Type;
use crate::value::{EnumLiteral, OpaqueValue, Value};

/// Renders a value of the named primitive as canonical text.
pub type FormatFn = fn(&str, &Value) -> Result<String>;

/// Parses canonical text back into a value of the named primitive.
pub type ParseFn = fn(&str, &str) -> Result<Value>;

/// A format/parse pair for one primitive type.
#[derive(Clone)]
pub struct PrimitiveFormat {
    /// Value-to-text direction.
    pub format: FormatFn,
    /// Text-to-value direction.
    pub parse: ParseFn,
}

/// Registry of canonical text formats for primitive types.
#[derive(Clone)]
pub struct PrimitiveRegistry {
    entries: BTreeMap<Name, PrimitiveFormat>,
}

impl PrimitiveRegistry {
    /// Creates a registry seeded with the built-in primitives.
    #[must_use]
    pub fn standard() -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(
            Name::from("bool"),
            PrimitiveFormat {
                format: format_bool,
                parse: parse_bool,
            },
        );
        for name in ["int", "long"] {
            entries.insert(
                Name::from(name),
                PrimitiveFormat {
                    format: format_int,
                    parse: parse_int,
                },
            );
        }
        entries.insert(
            Name::from("float"),
            PrimitiveFormat {
                format: format_float,
                parse: parse_float,
            },
        );
        entries.insert(
            Name::from("string"),
            PrimitiveFormat {
                format: format_string,
                parse: parse_string,
            },
        );
        Self { entries }
    }

    /// Registers (or overrides) the format for a primitive name.
    #[must_use]
    pub fn with_format(mut self, name: impl Into<Name>, format: PrimitiveFormat) -> Self {
        self.entries.insert(name.into(), format);
        self
    }

    /// Returns true if the type has a canonical single-token text form.
    #[must_use]
    pub fn is_simple(&self, ty: &Type) -> bool {
        ty.is_primitive() || matches!(ty, Type::Enum(_))
    }

    /// Renders a simple value as its canonical text.
    ///
    /// # Errors
    ///
    /// Returns an error if the type is not simple or the value does not
    /// belong to it.
    pub fn format(&self, ty: &Type, value: &Value) -> Result<String> {
        match ty {
            Type::Bool | Type::Int | Type::Long | Type::Float | Type::String | Type::Opaque(_) => {
                let name = primitive_name(ty);
                match self.entries.get(name) {
                    Some(entry) => (entry.format)(name, value),
                    None => format_opaque(name, value),
                }
            }
            Type::Enum(enum_name) => match value {
                Value::Enum(lit) if lit.enum_name == *enum_name => Ok(lit.value.to_string()),
                other => Err(Error::type_mismatch(ty.clone(), other.type_name())),
            },
            other => Err(Error::new(ErrorKind::NotSimple(other.clone()))),
        }
    }

    /// Parses canonical text into a simple value.
    ///
    /// # Errors
    ///
    /// Returns an error if the type is not simple or the text does not
    /// parse as it.
    pub fn parse(&self, ty: &Type, text: &str) -> Result<Value> {
        match ty {
            Type::Bool | Type::Int | Type::Long | Type::Float | Type::String | Type::Opaque(_) => {
                let name = primitive_name(ty);
                match self.entries.get(name) {
                    Some(entry) => (entry.parse)(name, text),
                    None => Ok(Value::Opaque(OpaqueValue::new(name, text))),
                }
            }
            Type::Enum(enum_name) => {
                Ok(Value::Enum(EnumLiteral::new(enum_name.clone(), text)))
            }
            other => Err(Error::new(ErrorKind::NotSimple(other.clone()))),
        }
    }
}

impl Default for PrimitiveRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl DissectorSource for PrimitiveRegistry {
    fn is_simple(&self, ty: &Type) -> bool {
        Self::is_simple(self, ty)
    }

    fn parse_simple(&self, ty: &Type, text: &str) -> Result<Value> {
        self.parse(ty, text)
    }

    fn format_simple(&self, ty: &Type, value: &Value) -> Result<String> {
        self.format(ty, value)
    }

    fn dissect(&self, _ty: &Type) -> Option<Dissection<'_>> {
        None
    }
}

/// The registry key for a primitive type.
fn primitive_name(ty: &Type) -> &str {
    match ty {
        Type::Bool => "bool",
        Type::Int => "int",
        Type::Long => "long",
        Type::Float => "float",
        Type::String => "string",
        Type::Opaque(n) => n.as_str(),
        _ => "",
    }
}

/// The built-in type named by a registry key, for error reporting.
fn named_type(name: &str) -> Type {
    match name {
        "bool" => Type::Bool,
        "int" => Type::Int,
        "long" => Type::Long,
        "float" => Type::Float,
        "string" => Type::String,
        other => Type::opaque(other),
    }
}

fn format_bool(name: &str, value: &Value) -> Result<String> {
    value
        .as_bool()
        .map(|b| b.to_string())
        .ok_or_else(|| Error::type_mismatch(named_type(name), value.type_name()))
}

fn parse_bool(name: &str, text: &str) -> Result<Value> {
    match text {
        "true" => Ok(Value::Bool(true)),
        "false" => Ok(Value::Bool(false)),
        _ => Err(Error::parse_value(named_type(name), text)),
    }
}

fn format_int(name: &str, value: &Value) -> Result<String> {
    value
        .as_int()
        .map(|n| n.to_string())
        .ok_or_else(|| Error::type_mismatch(named_type(name), value.type_name()))
}

fn parse_int(name: &str, text: &str) -> Result<Value> {
    text.parse::<i64>()
        .map(Value::Int)
        .map_err(|_| Error::parse_value(named_type(name), text))
}

fn format_float(name: &str, value: &Value) -> Result<String> {
    match value {
        Value::Float(n) => Ok(n.to_string()),
        Value::Int(n) => Ok(n.to_string()),
        other => Err(Error::type_mismatch(named_type(name), other.type_name())),
    }
}

fn parse_float(name: &str, text: &str) -> Result<Value> {
    text.parse::<f64>()
        .map(Value::Float)
        .map_err(|_| Error::parse_value(named_type(name), text))
}

fn format_string(name: &str, value: &Value) -> Result<String> {
    value
        .as_str()
        .map(ToOwned::to_owned)
        .ok_or_else(|| Error::type_mismatch(named_type(name), value.type_name()))
}

fn parse_string(_name: &str, text: &str) -> Result<Value> {
    Ok(Value::from(text))
}

fn format_opaque(name: &str, value: &Value) -> Result<String> {
    match value {
        Value::Opaque(o) if o.kind == *name => Ok(o.text.to_string()),
        other => Err(Error::type_mismatch(named_type(name), other.type_name())),
    }
}
