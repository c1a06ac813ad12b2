//! Definition-exchange codec for schema snapshots.
//!
//! [`encode`] renders an [`EntityTypeSet`] as a JSON definition document;
//! [`decode`] reads one back. The document is self-contained: field types
//! are written in canonical text form and resolved against the names the
//! document itself declares. A name declared nowhere in the document
//! decodes to [`Type::Unresolved`] rather than failing, so a definition
//! recorded by older code can still be loaded, diffed, and migrated.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use strata_foundation::{Error, Name, Result, Type};
use time::Date;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;

use crate::entity::EntityType;
use crate::enums::EnumType;
use crate::field::EntityField;
use crate::set::{EntityTypeSet, parse_type_text};

const DATE_FORMAT: &[BorrowedFormatItem<'_>] = format_description!("[year]-[month]-[day]");

#[derive(Serialize, Deserialize)]
struct SchemaDef {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    version: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    primitives: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    entities: Vec<EntityDef>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    enums: Vec<EnumDef>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    natives: Vec<NativeDef>,
}

#[derive(Serialize, Deserialize)]
struct EntityDef {
    name: String,
    #[serde(rename = "extends", skip_serializing_if = "Option::is_none", default)]
    super_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    identity: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    fields: Vec<FieldDef>,
}

#[derive(Serialize, Deserialize)]
struct FieldDef {
    name: String,
    #[serde(rename = "type")]
    ty: String,
    #[serde(default)]
    nullable: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    mapping: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    ordering: Vec<String>,
}

#[derive(Serialize, Deserialize)]
struct EnumDef {
    name: String,
    values: Vec<String>,
}

#[derive(Serialize, Deserialize)]
struct NativeDef {
    name: String,
    path: String,
}

/// Renders a schema snapshot as a JSON definition document.
///
/// The document carries the version date, every custom primitive name the
/// snapshot declares or mentions, each entity with its super-type, identity
/// designation and fields (canonical type text, nullability, mapping,
/// ordering), each enum with its values, and the native bindings.
///
/// # Errors
///
/// Returns an error if the document cannot be rendered.
pub fn encode(set: &EntityTypeSet) -> Result<String> {
    let mut primitives: BTreeSet<Name> = set.primitives().cloned().collect();
    for entity in set.entities() {
        for field in entity.fields() {
            collect_opaques(&field.ty, &mut primitives);
        }
    }
    let version = match set.version() {
        Some(date) => Some(date.format(DATE_FORMAT).map_err(|e| {
            Error::internal(format!("version date rendering failed: {e}"))
        })?),
        None => None,
    };
    let def = SchemaDef {
        version,
        primitives: primitives
            .into_iter()
            .map(|n| n.as_str().to_owned())
            .collect(),
        entities: set.entities().map(entity_def).collect(),
        enums: set.enums().map(enum_def).collect(),
        natives: set
            .native_bindings()
            .map(|(name, path)| NativeDef {
                name: name.as_str().to_owned(),
                path: path.as_str().to_owned(),
            })
            .collect(),
    };
    serde_json::to_string_pretty(&def)
        .map_err(|e| Error::internal(format!("definition encoding failed: {e}")))
}

/// Reads a schema snapshot back from a JSON definition document.
///
/// Type names resolve against the document itself; names declared nowhere
/// in it become [`Type::Unresolved`]. Structural problems are still
/// errors: unparsable JSON, malformed type text, duplicate names, broken
/// identity designations, or a super-type chain that never resolves.
///
/// # Errors
///
/// Returns an error for any of the structural problems above.
pub fn decode(text: &str) -> Result<EntityTypeSet> {
    let def: SchemaDef = serde_json::from_str(text)
        .map_err(|e| Error::invalid_definition(format!("definition document: {e}")))?;
    let entity_names: BTreeSet<&str> = def.entities.iter().map(|e| e.name.as_str()).collect();
    let enum_names: BTreeSet<&str> = def.enums.iter().map(|e| e.name.as_str()).collect();
    let primitive_names: BTreeSet<&str> = def.primitives.iter().map(String::as_str).collect();
    let resolve = |name: &str| -> Type {
        match name {
            "bool" => Type::Bool,
            "int" => Type::Int,
            "long" => Type::Long,
            "float" => Type::Float,
            "string" => Type::String,
            name if primitive_names.contains(name) => Type::opaque(name),
            name if entity_names.contains(name) => Type::entity(name),
            name if enum_names.contains(name) => Type::enumeration(name),
            name => Type::unresolved(name),
        }
    };

    let mut set = EntityTypeSet::new();
    for primitive in &def.primitives {
        set.declare_primitive(primitive.as_str());
    }
    for en in &def.enums {
        let mut decoded = EnumType::new(en.name.as_str());
        for value in &en.values {
            decoded.add_value(value.as_str())?;
        }
        set.insert_enum(decoded)?;
    }
    let mut pending: Vec<&EntityDef> = def.entities.iter().collect();
    while !pending.is_empty() {
        let before = pending.len();
        let mut next = Vec::new();
        for e in pending {
            let ready = match &e.super_type {
                None => true,
                Some(sup) => set.entity(sup).is_some(),
            };
            if !ready {
                next.push(e);
                continue;
            }
            let mut entity = match &e.super_type {
                Some(sup) => EntityType::subtype(e.name.as_str(), sup.as_str()),
                None => EntityType::new(e.name.as_str()),
            };
            let mut fields = Vec::with_capacity(e.fields.len());
            for fd in &e.fields {
                let ty = parse_type_text(&fd.ty, &resolve)?;
                let mut field = if fd.nullable {
                    EntityField::nullable(fd.name.as_str(), ty)
                } else {
                    EntityField::new(fd.name.as_str(), ty)
                };
                if let Some(mapping) = &fd.mapping {
                    field = field.with_mapping(mapping.as_str());
                }
                if !fd.ordering.is_empty() {
                    field = field.with_ordering(fd.ordering.iter().map(String::as_str));
                }
                fields.push(field);
            }
            entity.populate(fields, e.identity.as_ref().map(|i| Name::from(i.as_str())))?;
            set.insert_entity(entity)?;
        }
        if next.len() == before {
            let stalled = next.first().map_or("", |e| e.name.as_str());
            return Err(Error::invalid_definition(format!(
                "unresolvable super-type chain at {stalled}"
            )));
        }
        pending = next;
    }
    for native in &def.natives {
        set.bind_native(&native.name, native.path.as_str())?;
    }
    if let Some(version) = &def.version {
        let date = Date::parse(version, DATE_FORMAT).map_err(|e| {
            Error::invalid_definition(format!("version date {version:?}: {e}"))
        })?;
        set.set_version(Some(date));
    }
    Ok(set)
}

fn entity_def(entity: &EntityType) -> EntityDef {
    EntityDef {
        name: entity.name.as_str().to_owned(),
        super_type: entity.super_type.as_ref().map(|n| n.as_str().to_owned()),
        identity: entity.identity().map(|n| n.as_str().to_owned()),
        fields: entity.fields().map(field_def).collect(),
    }
}

fn field_def(field: &EntityField) -> FieldDef {
    FieldDef {
        name: field.name.as_str().to_owned(),
        ty: field.ty.to_string(),
        nullable: field.nullable,
        mapping: field.mapping.as_ref().map(|n| n.as_str().to_owned()),
        ordering: field
            .ordering
            .iter()
            .map(|n| n.as_str().to_owned())
            .collect(),
    }
}

fn enum_def(en: &EnumType) -> EnumDef {
    EnumDef {
        name: en.name.as_str().to_owned(),
        values: en.values().map(|v| v.as_str().to_owned()).collect(),
    }
}

fn collect_opaques(ty: &Type, out: &mut BTreeSet<Name>) {
    match ty {
        Type::Opaque(n) => {
            out.insert(n.clone());
        }
        Type::Collection(t) => collect_opaques(t, out),
        Type::Map(k, v) => {
            collect_opaques(k, out);
            collect_opaques(v, out);
        }
        _ => {}
    }
}
