//! The entity type set: one versioned snapshot of a whole schema.
//!
//! An [`EntityTypeSet`] holds a forest of entity types (explicit super-type
//! links by name plus a derived children index), the declared enum types,
//! the declared custom primitives, bidirectional name/native-path bindings,
//! and an optional version date equal to the date of the last migration set
//! applied to it.
//!
//! Mutations uphold the structural invariants: duplicate names are rejected
//! across both namespaces, super-type edges may not form cycles, removals
//! are rejected while other types still reference the removed name, and
//! renames rewrite every reference in the set. A mutation that returns an
//! error leaves the set unchanged.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use strata_foundation::{Error, ErrorKind, Name, Result, Type};
use time::Date;

use crate::entity::EntityType;
use crate::enums::EnumType;
use crate::field::EntityField;

/// A versioned snapshot of the declared schema.
///
/// Cloning is deep in the sense that matters: the clone can be mutated
/// freely without affecting the original, which is how a version timeline
/// obtains an independent working copy.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EntityTypeSet {
    entities: BTreeMap<Name, EntityType>,
    enums: BTreeMap<Name, EnumType>,
    primitives: BTreeSet<Name>,
    children: BTreeMap<Name, BTreeSet<Name>>,
    natives: BTreeMap<Name, Name>,
    native_names: BTreeMap<Name, Name>,
    version: Option<Date>,
}

impl EntityTypeSet {
    /// Creates an empty, unversioned set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a validated set from code-side declarations.
    ///
    /// Declarations are inserted in dependency order (super-types before
    /// sub-types, in as many passes as needed), then the whole set is
    /// validated. Unlike the definition codec, which preserves unresolvable
    /// names as [`Type::Unresolved`], any name a declaration mentions must
    /// resolve here.
    ///
    /// # Errors
    ///
    /// Returns an error for duplicate names, unknown or cyclic super-types,
    /// identity designations that break the rules, or field types that
    /// mention undeclared names.
    pub fn from_declarations(entities: Vec<EntityDecl>, enums: Vec<EnumDecl>) -> Result<Self> {
        let mut set = Self::new();
        for decl in enums {
            let mut en = EnumType::new(decl.name.clone());
            for value in decl.values {
                en.add_value(value)?;
            }
            set.insert_enum(en)?;
            if let Some(path) = decl.native {
                set.bind_native(decl.name.as_str(), path)?;
            }
        }
        let declared: BTreeSet<Name> = entities.iter().map(|d| d.name.clone()).collect();
        let mut pending = entities;
        while !pending.is_empty() {
            let before = pending.len();
            let mut next = Vec::new();
            for decl in pending {
                let ready = match &decl.super_type {
                    None => true,
                    Some(sup) => set.entities.contains_key(sup.as_str()),
                };
                if !ready {
                    next.push(decl);
                    continue;
                }
                let EntityDecl {
                    name,
                    super_type,
                    native,
                    identity,
                    fields,
                } = decl;
                let mut entity = match super_type {
                    Some(sup) => EntityType::subtype(name.clone(), sup),
                    None => EntityType::new(name.clone()),
                };
                entity.populate(fields, identity)?;
                set.insert_entity(entity)?;
                if let Some(path) = native {
                    set.bind_native(name.as_str(), path)?;
                }
            }
            if next.len() == before {
                if let Some(decl) = next.first() {
                    if let Some(sup) = &decl.super_type {
                        return Err(if declared.contains(sup.as_str()) {
                            Error::new(ErrorKind::InheritanceCycle(decl.name.clone()))
                        } else {
                            Error::unknown_type(sup.clone())
                        });
                    }
                }
                return Err(Error::internal("declaration resolution stalled"));
            }
            pending = next;
        }
        set.validate()?;
        Ok(set)
    }

    /// Inserts an entity type.
    ///
    /// Field types are not resolved here; [`EntityTypeSet::validate`] checks
    /// them once every type is present, so mutually-referencing types can be
    /// inserted in any order.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is taken in either namespace, the type
    /// names itself as its super-type, or the super-type does not exist.
    pub fn insert_entity(&mut self, entity: EntityType) -> Result<()> {
        if self.has_type(&entity.name) {
            return Err(Error::duplicate_type(entity.name));
        }
        if let Some(sup) = &entity.super_type {
            if *sup == entity.name {
                return Err(Error::new(ErrorKind::InheritanceCycle(entity.name.clone())));
            }
            if !self.entities.contains_key(sup.as_str()) {
                return Err(Error::unknown_type(sup.clone()));
            }
            self.children
                .entry(sup.clone())
                .or_default()
                .insert(entity.name.clone());
        }
        self.entities.insert(entity.name.clone(), entity);
        Ok(())
    }

    /// Inserts an enum type.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is taken in either namespace.
    pub fn insert_enum(&mut self, en: EnumType) -> Result<()> {
        if self.has_type(&en.name) {
            return Err(Error::duplicate_type(en.name));
        }
        self.enums.insert(en.name.clone(), en);
        Ok(())
    }

    /// Declares a custom primitive name, resolvable to [`Type::Opaque`].
    ///
    /// Redeclaring a name is a no-op.
    pub fn declare_primitive(&mut self, name: impl Into<Name>) {
        self.primitives.insert(name.into());
    }

    /// Returns the entity type by name.
    #[must_use]
    pub fn entity(&self, name: &str) -> Option<&EntityType> {
        self.entities.get(name)
    }

    /// Returns the enum type by name.
    #[must_use]
    pub fn enum_type(&self, name: &str) -> Option<&EnumType> {
        self.enums.get(name)
    }

    /// Returns true if the name is taken by an entity or enum type.
    #[must_use]
    pub fn has_type(&self, name: &str) -> bool {
        self.entities.contains_key(name) || self.enums.contains_key(name)
    }

    /// Returns true if the name is a declared custom primitive.
    #[must_use]
    pub fn is_primitive_declared(&self, name: &str) -> bool {
        self.primitives.contains(name)
    }

    /// Iterates entity types in name order.
    pub fn entities(&self) -> impl Iterator<Item = &EntityType> {
        self.entities.values()
    }

    /// Iterates enum types in name order.
    pub fn enums(&self) -> impl Iterator<Item = &EnumType> {
        self.enums.values()
    }

    /// Iterates declared custom primitive names in order.
    pub fn primitives(&self) -> impl Iterator<Item = &Name> {
        self.primitives.iter()
    }

    /// Returns the number of entity types.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Returns the number of enum types.
    #[must_use]
    pub fn enum_count(&self) -> usize {
        self.enums.len()
    }

    /// Returns true if no types are declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.enums.is_empty()
    }

    /// Iterates the direct sub-types of the named type.
    pub fn children_of(&self, name: &str) -> impl Iterator<Item = &Name> {
        self.children.get(name).into_iter().flatten()
    }

    /// Returns the named type and its transitive sub-types, parents before
    /// children and siblings in name order. Empty if the name is unknown.
    #[must_use]
    pub fn subtree(&self, name: &str) -> Vec<&EntityType> {
        let mut out = Vec::new();
        let Some(root) = self.entities.get(name) else {
            return out;
        };
        let mut queue = VecDeque::from([root]);
        while let Some(node) = queue.pop_front() {
            out.push(node);
            for child in self.children_of(node.name.as_str()) {
                if let Some(entity) = self.entities.get(child.as_str()) {
                    queue.push_back(entity);
                }
            }
        }
        out
    }

    /// Returns the ancestor chain of the named type, nearest first, not
    /// including the type itself. Stops if a link is dangling or cyclic.
    #[must_use]
    pub fn ancestors(&self, name: &str) -> Vec<&EntityType> {
        let mut out = Vec::new();
        let mut seen = BTreeSet::new();
        seen.insert(name);
        let mut cur = self.entities.get(name);
        while let Some(entity) = cur {
            let Some(sup_name) = &entity.super_type else {
                break;
            };
            if !seen.insert(sup_name.as_str()) {
                break;
            }
            let Some(sup) = self.entities.get(sup_name.as_str()) else {
                break;
            };
            out.push(sup);
            cur = Some(sup);
        }
        out
    }

    /// Returns the root of the named type's inheritance chain.
    #[must_use]
    pub fn root_of(&self, name: &str) -> Option<&EntityType> {
        let entity = self.entities.get(name)?;
        Some(self.ancestors(name).into_iter().last().unwrap_or(entity))
    }

    /// Returns the identity field of the named type, resolved through the
    /// ancestor chain to the root that declares it.
    #[must_use]
    pub fn identity_field_of(&self, name: &str) -> Option<&EntityField> {
        let root = self.root_of(name)?;
        root.field(root.identity()?.as_str())
    }

    /// Returns true if `name` is `ancestor` or one of its transitive
    /// sub-types.
    #[must_use]
    pub fn is_subtype_of(&self, name: &str, ancestor: &str) -> bool {
        name == ancestor || self.ancestors(name).iter().any(|a| a.name == ancestor)
    }

    /// Returns the field as seen from the named type: its own declaration
    /// or the nearest inherited one.
    #[must_use]
    pub fn field_of(&self, entity: &str, field: &str) -> Option<&EntityField> {
        if let Some(found) = self.entities.get(entity).and_then(|e| e.field(field)) {
            return Some(found);
        }
        self.ancestors(entity)
            .into_iter()
            .find_map(|a| a.field(field))
    }

    /// Returns every field the named type carries, root-most declarations
    /// first, each type's own fields in name order.
    #[must_use]
    pub fn fields_of(&self, entity: &str) -> Vec<&EntityField> {
        let mut out = Vec::new();
        for ancestor in self.ancestors(entity).into_iter().rev() {
            out.extend(ancestor.fields());
        }
        if let Some(own) = self.entities.get(entity) {
            out.extend(own.fields());
        }
        out
    }

    /// Returns every `(holder, field)` pair whose field type mentions the
    /// named entity type.
    #[must_use]
    pub fn find_references(&self, name: &str) -> Vec<(Name, Name)> {
        let mut out = Vec::new();
        for entity in self.entities.values() {
            for field in entity.fields() {
                if field.ty.mentions_entity(name) {
                    out.push((entity.name.clone(), field.name.clone()));
                }
            }
        }
        out
    }

    /// Returns every `(holder, field)` pair whose field type mentions the
    /// named enum type.
    #[must_use]
    pub fn find_enum_references(&self, name: &str) -> Vec<(Name, Name)> {
        let mut out = Vec::new();
        for entity in self.entities.values() {
            for field in entity.fields() {
                if field.ty.mentions_enum(name) {
                    out.push((entity.name.clone(), field.name.clone()));
                }
            }
        }
        out
    }

    /// Removes an entity type and returns its definition.
    ///
    /// The removed type's own fields are not counted as blocking
    /// references, so a type that references its own super-type can still
    /// be removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the type is unknown, still has sub-types, or is
    /// referenced by a field of another type.
    pub fn remove_entity(&mut self, name: &str) -> Result<EntityType> {
        if !self.entities.contains_key(name) {
            return Err(Error::unknown_type(name));
        }
        if self.children.get(name).is_some_and(|kids| !kids.is_empty()) {
            return Err(Error::new(ErrorKind::HasSubtypes(Name::from(name))));
        }
        for entity in self.entities.values() {
            if entity.name == name {
                continue;
            }
            for field in entity.fields() {
                if field.ty.mentions_entity(name) {
                    return Err(Error::new(ErrorKind::TypeInUse {
                        name: Name::from(name),
                        holder: entity.name.clone(),
                        field: field.name.clone(),
                    }));
                }
            }
        }
        let Some(removed) = self.entities.remove(name) else {
            return Err(Error::unknown_type(name));
        };
        self.children.remove(name);
        if let Some(sup) = &removed.super_type {
            if let Some(kids) = self.children.get_mut(sup.as_str()) {
                kids.remove(name);
            }
        }
        self.unbind_native(name);
        Ok(removed)
    }

    /// Removes an enum type and returns its definition.
    ///
    /// # Errors
    ///
    /// Returns an error if the type is unknown or referenced by any field.
    pub fn remove_enum(&mut self, name: &str) -> Result<EnumType> {
        if !self.enums.contains_key(name) {
            return Err(Error::unknown_type(name));
        }
        if let Some((holder, field)) = self.find_enum_references(name).into_iter().next() {
            return Err(Error::new(ErrorKind::TypeInUse {
                name: Name::from(name),
                holder,
                field,
            }));
        }
        let Some(removed) = self.enums.remove(name) else {
            return Err(Error::unknown_type(name));
        };
        self.unbind_native(name);
        Ok(removed)
    }

    /// Renames an entity type, rewriting every reference in the set: the
    /// forest entry, sub-type super links, field types that mention the old
    /// name, and the native binding.
    ///
    /// # Errors
    ///
    /// Returns an error if the old name is unknown or the new one is taken.
    pub fn rename_entity(&mut self, old: &str, new: impl Into<Name>) -> Result<()> {
        let new = new.into();
        if !self.entities.contains_key(old) {
            return Err(Error::unknown_type(old));
        }
        if new == old {
            return Ok(());
        }
        if self.has_type(&new) {
            return Err(Error::duplicate_type(new));
        }
        let Some(mut entity) = self.entities.remove(old) else {
            return Err(Error::unknown_type(old));
        };
        entity.name = new.clone();
        let parent = entity.super_type.clone();
        self.entities.insert(new.clone(), entity);
        if let Some(kids) = self.children.remove(old) {
            for kid in &kids {
                if let Some(child) = self.entities.get_mut(kid.as_str()) {
                    child.super_type = Some(new.clone());
                }
            }
            self.children.insert(new.clone(), kids);
        }
        if let Some(parent) = parent {
            if let Some(kids) = self.children.get_mut(parent.as_str()) {
                kids.remove(old);
                kids.insert(new.clone());
            }
        }
        for entity in self.entities.values_mut() {
            for field in entity.fields_mut() {
                if field.ty.mentions_entity(old) {
                    field.ty = field.ty.with_entity_renamed(old, &new);
                }
            }
        }
        self.rebind_native(old, &new);
        Ok(())
    }

    /// Renames an enum type, rewriting every field type that mentions the
    /// old name and the native binding.
    ///
    /// # Errors
    ///
    /// Returns an error if the old name is unknown or the new one is taken.
    pub fn rename_enum(&mut self, old: &str, new: impl Into<Name>) -> Result<()> {
        let new = new.into();
        if !self.enums.contains_key(old) {
            return Err(Error::unknown_type(old));
        }
        if new == old {
            return Ok(());
        }
        if self.has_type(&new) {
            return Err(Error::duplicate_type(new));
        }
        let Some(mut en) = self.enums.remove(old) else {
            return Err(Error::unknown_type(old));
        };
        en.name = new.clone();
        self.enums.insert(new.clone(), en);
        for entity in self.entities.values_mut() {
            for field in entity.fields_mut() {
                if field.ty.mentions_enum(old) {
                    field.ty = field.ty.with_enum_renamed(old, &new);
                }
            }
        }
        self.rebind_native(old, &new);
        Ok(())
    }

    /// Replaces the super-type link of a type.
    ///
    /// Identity designations never move: a type that declares an identity
    /// must stay a root, and a type that inherits one must keep a
    /// super-type.
    ///
    /// # Errors
    ///
    /// Returns an error if either name is unknown, the edge would form a
    /// cycle, the identity rules above are broken, or a field of the moved
    /// subtree collides with a field of the new ancestor chain.
    pub fn set_super_type(&mut self, entity: &str, super_type: Option<Name>) -> Result<()> {
        let Some(node) = self.entities.get(entity) else {
            return Err(Error::unknown_type(entity));
        };
        match (&super_type, node.identity()) {
            (Some(_), Some(_)) => {
                return Err(Error::new(ErrorKind::ConflictingIdentity {
                    entity: node.name.clone(),
                }));
            }
            (None, None) => {
                return Err(Error::new(ErrorKind::MissingIdentity {
                    entity: node.name.clone(),
                }));
            }
            _ => {}
        }
        let old = node.super_type.clone();
        if let Some(sup) = &super_type {
            if *sup == entity {
                return Err(Error::new(ErrorKind::InheritanceCycle(Name::from(entity))));
            }
            if !self.entities.contains_key(sup.as_str()) {
                return Err(Error::unknown_type(sup.clone()));
            }
            if self.is_subtype_of(sup.as_str(), entity) {
                return Err(Error::new(ErrorKind::InheritanceCycle(Name::from(entity))));
            }
            if old.is_some() {
                self.check_identity_preserved(entity, sup.as_str())?;
            }
            let mut chain: BTreeSet<&Name> = BTreeSet::new();
            if let Some(sup_entity) = self.entities.get(sup.as_str()) {
                for field in sup_entity.fields() {
                    chain.insert(&field.name);
                }
            }
            for ancestor in self.ancestors(sup.as_str()) {
                for field in ancestor.fields() {
                    chain.insert(&field.name);
                }
            }
            for node in self.subtree(entity) {
                for field in node.fields() {
                    if chain.contains(&field.name) {
                        return Err(Error::duplicate_field(
                            node.name.clone(),
                            field.name.clone(),
                        ));
                    }
                }
            }
        }
        if let Some(old) = &old {
            if let Some(kids) = self.children.get_mut(old.as_str()) {
                kids.remove(entity);
            }
        }
        if let Some(sup) = &super_type {
            self.children
                .entry(sup.clone())
                .or_default()
                .insert(Name::from(entity));
        }
        if let Some(node) = self.entities.get_mut(entity) {
            node.super_type = super_type;
        }
        Ok(())
    }

    /// Adds a field to a type, checking for name collisions across the
    /// whole inheritance chain: ancestors the type inherits from and
    /// sub-types that would inherit the new field.
    ///
    /// # Errors
    ///
    /// Returns an error if the type is unknown or the name collides.
    pub fn add_field(&mut self, entity: &str, field: EntityField) -> Result<()> {
        if !self.entities.contains_key(entity) {
            return Err(Error::unknown_type(entity));
        }
        self.check_chain_collision(entity, &field.name)?;
        let Some(node) = self.entities.get_mut(entity) else {
            return Err(Error::unknown_type(entity));
        };
        node.add_field(field)
    }

    /// Removes a field from a type and returns its definition.
    ///
    /// # Errors
    ///
    /// Returns an error if the type or field is unknown, the field is the
    /// identity field, or another field's mapping or ordering columns
    /// still name it.
    pub fn remove_field(&mut self, entity: &str, field: &str) -> Result<EntityField> {
        if !self.entities.contains_key(entity) {
            return Err(Error::unknown_type(entity));
        }
        if let Some((holder, referrer)) = self.find_field_dependents(entity, field).into_iter().next()
        {
            return Err(Error::new(ErrorKind::FieldInUse {
                entity: Name::from(entity),
                field: Name::from(field),
                holder,
                referrer,
            }));
        }
        let Some(node) = self.entities.get_mut(entity) else {
            return Err(Error::unknown_type(entity));
        };
        node.remove_field(field)
    }

    /// Returns every `(holder, field)` pair whose mapping or ordering
    /// columns resolve to the named field, excluding the field itself.
    fn find_field_dependents(&self, entity: &str, field: &str) -> Vec<(Name, Name)> {
        let mut out = Vec::new();
        for holder in self.entities.values() {
            for candidate in holder.fields() {
                if holder.name == entity && candidate.name == field {
                    continue;
                }
                let Some(target) = referenced_entity(&candidate.ty) else {
                    continue;
                };
                if !self.is_subtype_of(target.as_str(), entity) {
                    continue;
                }
                let named = candidate.mapping.as_deref() == Some(field)
                    || candidate.ordering.iter().any(|column| *column == field);
                if named {
                    out.push((holder.name.clone(), candidate.name.clone()));
                }
            }
        }
        out
    }

    /// Renames a field on a type, checking the new name against the whole
    /// inheritance chain. Mapping references and ordering columns that
    /// resolve to the renamed field follow it.
    ///
    /// # Errors
    ///
    /// Returns an error if the type or field is unknown or the new name
    /// collides.
    pub fn rename_field(&mut self, entity: &str, from: &str, to: impl Into<Name>) -> Result<()> {
        let to = to.into();
        if !self.entities.contains_key(entity) {
            return Err(Error::unknown_type(entity));
        }
        self.check_chain_collision(entity, &to)?;
        let dependents = self.find_field_dependents(entity, from);
        let Some(node) = self.entities.get_mut(entity) else {
            return Err(Error::unknown_type(entity));
        };
        node.rename_field(from, to.clone())?;
        for (holder, referrer) in dependents {
            let Some(dependent) = self
                .entities
                .get_mut(holder.as_str())
                .and_then(|node| node.field_mut(referrer.as_str()))
            else {
                continue;
            };
            if dependent.mapping.as_deref() == Some(from) {
                dependent.mapping = Some(to.clone());
            }
            for column in &mut dependent.ordering {
                if *column == from {
                    *column = to.clone();
                }
            }
        }
        Ok(())
    }

    /// Sets the nullability of a field. The identity field must stay
    /// non-nullable.
    ///
    /// # Errors
    ///
    /// Returns an error if the type or field is unknown, or the field is
    /// the identity field and `nullable` is true.
    pub fn set_field_nullable(&mut self, entity: &str, field: &str, nullable: bool) -> Result<()> {
        let Some(node) = self.entities.get_mut(entity) else {
            return Err(Error::unknown_type(entity));
        };
        if !node.has_field(field) {
            return Err(Error::unknown_field(node.name.clone(), field));
        }
        if nullable && node.identity().is_some_and(|id| id == field) {
            let ty = node.field(field).map_or(Type::String, |f| f.ty.clone());
            return Err(Error::new(ErrorKind::InvalidIdentity {
                entity: node.name.clone(),
                field: Name::from(field),
                ty,
            }));
        }
        if let Some(f) = node.field_mut(field) {
            f.nullable = nullable;
        }
        Ok(())
    }

    /// Adds a value to an enum type.
    ///
    /// # Errors
    ///
    /// Returns an error if the enum is unknown or the value is declared.
    pub fn add_enum_value(&mut self, enum_name: &str, value: impl Into<Name>) -> Result<()> {
        let Some(en) = self.enums.get_mut(enum_name) else {
            return Err(Error::unknown_type(enum_name));
        };
        en.add_value(value)
    }

    /// Removes a value from an enum type.
    ///
    /// # Errors
    ///
    /// Returns an error if the enum or value is unknown.
    pub fn remove_enum_value(&mut self, enum_name: &str, value: &str) -> Result<()> {
        let Some(en) = self.enums.get_mut(enum_name) else {
            return Err(Error::unknown_type(enum_name));
        };
        en.remove_value(value)
    }

    /// Renames a value on an enum type.
    ///
    /// # Errors
    ///
    /// Returns an error if the enum or old value is unknown, or the new
    /// value is declared.
    pub fn rename_enum_value(
        &mut self,
        enum_name: &str,
        from: &str,
        to: impl Into<Name>,
    ) -> Result<()> {
        let Some(en) = self.enums.get_mut(enum_name) else {
            return Err(Error::unknown_type(enum_name));
        };
        en.rename_value(from, to)
    }

    /// Binds a declared type name to a native type path. Rebinding a name
    /// replaces its previous path.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is not a declared type or the path is
    /// already bound to a different name.
    pub fn bind_native(&mut self, name: &str, path: impl Into<Name>) -> Result<()> {
        let path = path.into();
        if !self.has_type(name) {
            return Err(Error::unknown_type(name));
        }
        if let Some(existing) = self.native_names.get(path.as_str()) {
            if existing != name {
                return Err(Error::invalid_definition(format!(
                    "native path {path} is already bound to {existing}"
                )));
            }
        }
        let name = Name::from(name);
        if let Some(old_path) = self.natives.insert(name.clone(), path.clone()) {
            self.native_names.remove(old_path.as_str());
        }
        self.native_names.insert(path, name);
        Ok(())
    }

    /// Returns the native path bound to a type name.
    #[must_use]
    pub fn native_of(&self, name: &str) -> Option<&Name> {
        self.natives.get(name)
    }

    /// Returns the type name bound to a native path.
    #[must_use]
    pub fn name_of_native(&self, path: &str) -> Option<&Name> {
        self.native_names.get(path)
    }

    /// Iterates `(type name, native path)` bindings in name order.
    pub fn native_bindings(&self) -> impl Iterator<Item = (&Name, &Name)> {
        self.natives.iter()
    }

    fn unbind_native(&mut self, name: &str) {
        if let Some(path) = self.natives.remove(name) {
            self.native_names.remove(path.as_str());
        }
    }

    fn rebind_native(&mut self, old: &str, new: &Name) {
        if let Some(path) = self.natives.remove(old) {
            self.native_names.insert(path.clone(), new.clone());
            self.natives.insert(new.clone(), path);
        }
    }

    /// Returns the version date: the date of the last migration set applied
    /// to this schema, or `None` for a freshly declared one.
    #[must_use]
    pub fn version(&self) -> Option<Date> {
        self.version
    }

    /// Sets the version date.
    pub fn set_version(&mut self, version: Option<Date>) {
        self.version = version;
    }

    /// Resolves a bare type name: builtin primitives, declared custom
    /// primitives, entity types, enum types, and otherwise
    /// [`Type::Unresolved`].
    #[must_use]
    pub fn resolve_type_name(&self, text: &str) -> Type {
        match text {
            "bool" => Type::Bool,
            "int" => Type::Int,
            "long" => Type::Long,
            "float" => Type::Float,
            "string" => Type::String,
            name if self.primitives.contains(name) => Type::opaque(name),
            name if self.entities.contains_key(name) => Type::entity(name),
            name if self.enums.contains_key(name) => Type::enumeration(name),
            name => Type::unresolved(name),
        }
    }

    /// Parses the canonical text form of a type: `list<T>`, `map<K, V>`,
    /// `?Name` for unresolved placeholders, and bare names resolved via
    /// [`EntityTypeSet::resolve_type_name`].
    ///
    /// # Errors
    ///
    /// Returns an error for malformed text. Unknown bare names are not an
    /// error; they parse to [`Type::Unresolved`].
    pub fn parse_type(&self, text: &str) -> Result<Type> {
        parse_type_text(text, &|name| self.resolve_type_name(name))
    }

    /// Checks every structural invariant of the set: super-type links
    /// resolve and are acyclic, each chain designates exactly one sound
    /// identity field on its root, no field shadows an inherited name,
    /// every entity and enum name mentioned by a field type is declared
    /// (unresolved placeholders are rejected), mappings point at a field of
    /// the referenced type that references back, and ordering columns exist
    /// on the element type.
    ///
    /// # Errors
    ///
    /// Returns the first violation found.
    pub fn validate(&self) -> Result<()> {
        for entity in self.entities.values() {
            self.validate_chain(entity)?;
            for field in entity.fields() {
                self.check_type(&field.ty)?;
                self.validate_mapping(entity, field)?;
                self.validate_ordering(entity, field)?;
            }
        }
        Ok(())
    }

    fn validate_chain(&self, entity: &EntityType) -> Result<()> {
        let mut seen = BTreeSet::new();
        seen.insert(entity.name.as_str());
        let mut cur = entity;
        while let Some(sup_name) = &cur.super_type {
            let Some(sup) = self.entities.get(sup_name.as_str()) else {
                return Err(Error::unknown_type(sup_name.clone()));
            };
            if !seen.insert(sup.name.as_str()) {
                return Err(Error::new(ErrorKind::InheritanceCycle(entity.name.clone())));
            }
            cur = sup;
        }
        let root = cur;
        if !entity.is_root() && entity.identity().is_some() {
            return Err(Error::new(ErrorKind::ConflictingIdentity {
                entity: entity.name.clone(),
            }));
        }
        let Some(id) = root.identity() else {
            return Err(Error::new(ErrorKind::MissingIdentity {
                entity: root.name.clone(),
            }));
        };
        let Some(id_field) = root.field(id.as_str()) else {
            return Err(Error::unknown_field(root.name.clone(), id.clone()));
        };
        if !id_field.ty.is_identity_candidate() || id_field.nullable {
            return Err(Error::new(ErrorKind::InvalidIdentity {
                entity: root.name.clone(),
                field: id.clone(),
                ty: id_field.ty.clone(),
            }));
        }
        for ancestor in self.ancestors(entity.name.as_str()) {
            for field in entity.fields() {
                if ancestor.has_field(&field.name) {
                    return Err(Error::duplicate_field(
                        entity.name.clone(),
                        field.name.clone(),
                    ));
                }
            }
        }
        Ok(())
    }

    fn check_type(&self, ty: &Type) -> Result<()> {
        match ty {
            Type::Entity(n) => {
                if self.entities.contains_key(n.as_str()) {
                    Ok(())
                } else {
                    Err(Error::unknown_type(n.clone()))
                }
            }
            Type::Enum(n) => {
                if self.enums.contains_key(n.as_str()) {
                    Ok(())
                } else {
                    Err(Error::unknown_type(n.clone()))
                }
            }
            Type::Unresolved(n) => Err(Error::unknown_type(n.clone())),
            Type::Collection(t) => self.check_type(t),
            Type::Map(k, v) => {
                self.check_type(k)?;
                self.check_type(v)
            }
            _ => Ok(()),
        }
    }

    /// Rejects a super-type replacement that would hand the moved subtree
    /// a different identity field. Stored instances are keyed by identity,
    /// so the chain's identity must keep its name, type, and nullability.
    fn check_identity_preserved(&self, entity: &str, sup: &str) -> Result<()> {
        let had = self.identity_field_of(entity);
        let offered = self.identity_field_of(sup);
        let describe = |field: Option<&EntityField>| {
            field.map_or_else(
                || String::from("none"),
                |f| format!("{} ({})", f.name, f.ty),
            )
        };
        let compatible = match (had, offered) {
            (Some(had), Some(offered)) => {
                had.name == offered.name
                    && had.ty == offered.ty
                    && had.nullable == offered.nullable
            }
            _ => false,
        };
        if compatible {
            Ok(())
        } else {
            Err(Error::new(ErrorKind::IdentityMismatch {
                entity: Name::from(entity),
                had: describe(had),
                offered: describe(offered),
            }))
        }
    }

    fn validate_mapping(&self, entity: &EntityType, field: &EntityField) -> Result<()> {
        let Some(mapping) = &field.mapping else {
            return Ok(());
        };
        let Some(target) = referenced_entity(&field.ty) else {
            return Err(Error::invalid_definition(format!(
                "field {}.{} declares a mapping but is not an entity reference",
                entity.name, field.name
            )));
        };
        let Some(back) = self.field_of(target.as_str(), mapping.as_str()) else {
            return Err(Error::unknown_field(target.clone(), mapping.clone()));
        };
        let points_back = back.ty.mentions_entity(entity.name.as_str())
            || self
                .ancestors(entity.name.as_str())
                .iter()
                .any(|a| back.ty.mentions_entity(a.name.as_str()));
        if !points_back {
            return Err(Error::invalid_definition(format!(
                "mapping {}.{} -> {target}.{mapping} does not reference back",
                entity.name, field.name
            )));
        }
        Ok(())
    }

    fn validate_ordering(&self, entity: &EntityType, field: &EntityField) -> Result<()> {
        if field.ordering.is_empty() {
            return Ok(());
        }
        let element = match &field.ty {
            Type::Collection(t) => match t.as_ref() {
                Type::Entity(n) => n,
                _ => {
                    return Err(Error::invalid_definition(format!(
                        "field {}.{} declares ordering columns but its elements are not entities",
                        entity.name, field.name
                    )));
                }
            },
            _ => {
                return Err(Error::invalid_definition(format!(
                    "field {}.{} declares ordering columns but is not a collection",
                    entity.name, field.name
                )));
            }
        };
        for column in &field.ordering {
            if self.field_of(element.as_str(), column.as_str()).is_none() {
                return Err(Error::unknown_field(element.clone(), column.clone()));
            }
        }
        Ok(())
    }

    fn check_chain_collision(&self, entity: &str, field: &Name) -> Result<()> {
        for ancestor in self.ancestors(entity) {
            if ancestor.has_field(field) {
                return Err(Error::duplicate_field(ancestor.name.clone(), field.clone()));
            }
        }
        for node in self.subtree(entity) {
            if node.name != entity && node.has_field(field) {
                return Err(Error::duplicate_field(node.name.clone(), field.clone()));
            }
        }
        Ok(())
    }
}

/// Returns the entity type a field's type directly references, looking
/// through one collection layer.
fn referenced_entity(ty: &Type) -> Option<&Name> {
    match ty {
        Type::Entity(n) => Some(n),
        Type::Collection(t) => match t.as_ref() {
            Type::Entity(n) => Some(n),
            _ => None,
        },
        _ => None,
    }
}

/// Parses canonical type text with a caller-supplied leaf resolver.
pub(crate) fn parse_type_text(text: &str, resolve: &dyn Fn(&str) -> Type) -> Result<Type> {
    let text = text.trim();
    if text.is_empty() {
        return Err(Error::invalid_definition("empty type text"));
    }
    if let Some(rest) = text.strip_prefix('?') {
        let name = rest.trim();
        if name.is_empty() {
            return Err(Error::invalid_definition("empty unresolved type name"));
        }
        return Ok(Type::unresolved(name));
    }
    if let Some(inner) = text.strip_prefix("list<").and_then(|r| r.strip_suffix('>')) {
        return Ok(Type::collection(parse_type_text(inner, resolve)?));
    }
    if let Some(inner) = text.strip_prefix("map<").and_then(|r| r.strip_suffix('>')) {
        let Some((key, value)) = split_map_entry(inner) else {
            return Err(Error::invalid_definition(format!(
                "malformed map type: {text}"
            )));
        };
        return Ok(Type::map(
            parse_type_text(key, resolve)?,
            parse_type_text(value, resolve)?,
        ));
    }
    if text.contains(['<', '>', ',']) {
        return Err(Error::invalid_definition(format!("malformed type: {text}")));
    }
    Ok(resolve(text))
}

/// Splits `K, V` at the top-level comma, ignoring commas nested inside
/// angle brackets.
fn split_map_entry(inner: &str) -> Option<(&str, &str)> {
    let mut depth = 0usize;
    for (i, c) in inner.char_indices() {
        match c {
            '<' => depth += 1,
            '>' => depth = depth.checked_sub(1)?,
            ',' if depth == 0 => return Some((&inner[..i], &inner[i + 1..])),
            _ => {}
        }
    }
    None
}

/// A code-side entity declaration for [`EntityTypeSet::from_declarations`].
#[derive(Clone, Debug)]
pub struct EntityDecl {
    /// Declared type name.
    pub name: Name,
    /// Super-type name, if any.
    pub super_type: Option<Name>,
    /// Native type path to bind, if any.
    pub native: Option<Name>,
    /// Identity field designation (root types only).
    pub identity: Option<Name>,
    /// Declared fields.
    pub fields: Vec<EntityField>,
}

impl EntityDecl {
    /// Creates an empty declaration.
    #[must_use]
    pub fn new(name: impl Into<Name>) -> Self {
        Self {
            name: name.into(),
            super_type: None,
            native: None,
            identity: None,
            fields: Vec::new(),
        }
    }

    /// Sets the super-type.
    #[must_use]
    pub fn extending(mut self, super_type: impl Into<Name>) -> Self {
        self.super_type = Some(super_type.into());
        self
    }

    /// Sets the native type path.
    #[must_use]
    pub fn with_native(mut self, path: impl Into<Name>) -> Self {
        self.native = Some(path.into());
        self
    }

    /// Designates the identity field.
    #[must_use]
    pub fn with_identity(mut self, field: impl Into<Name>) -> Self {
        self.identity = Some(field.into());
        self
    }

    /// Adds a field.
    #[must_use]
    pub fn with_field(mut self, field: EntityField) -> Self {
        self.fields.push(field);
        self
    }
}

/// A code-side enum declaration for [`EntityTypeSet::from_declarations`].
#[derive(Clone, Debug)]
pub struct EnumDecl {
    /// Declared type name.
    pub name: Name,
    /// Declared values.
    pub values: Vec<Name>,
    /// Native type path to bind, if any.
    pub native: Option<Name>,
}

impl EnumDecl {
    /// Creates an empty declaration.
    #[must_use]
    pub fn new(name: impl Into<Name>) -> Self {
        Self {
            name: name.into(),
            values: Vec::new(),
            native: None,
        }
    }

    /// Adds a value.
    #[must_use]
    pub fn with_value(mut self, value: impl Into<Name>) -> Self {
        self.values.push(value.into());
        self
    }

    /// Sets the native type path.
    #[must_use]
    pub fn with_native(mut self, path: impl Into<Name>) -> Self {
        self.native = Some(path.into());
        self
    }
}
