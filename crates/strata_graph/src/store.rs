//! Schema-driven entity storage.
//!
//! A [`GenericEntitySet`] stores instances in one identity-ordered bucket
//! per concrete type name. The set owns no schema: every operation that
//! needs type information takes the [`EntityTypeSet`] as an argument, so
//! one store can be read and migrated under successive schema versions.
//!
//! Integrity rules enforced here:
//!
//! - Identities are unique across a type's whole inheritance hierarchy and
//!   match the identity field's declared kind.
//! - Field writes are type-checked, including enum membership, nullability,
//!   and the existence and type of referenced instances.
//! - Mapping-derived fields are maintained automatically from their
//!   authoritative side and refuse direct writes.
//! - Removal cascades: references to the removed instance are cut, and
//!   holders left without a non-nullable direct reference are removed too.

use std::collections::{BTreeMap, BTreeSet};

use im::OrdMap;
use strata_foundation::{EntityKey, Error, ErrorKind, Ident, Name, Result, Type, Value};
use strata_schema::{EntityField, EntityTypeSet};
use tracing::debug;

use crate::entity::GenericEntity;
use crate::reference::{EntityReference, referenced};

/// Generic entity storage, bucketed by concrete type name and ordered by
/// identity within each bucket.
///
/// Buckets are persistent maps, so cloning a whole store is cheap and the
/// clone is independent of the original.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GenericEntitySet {
    storage: BTreeMap<Name, OrdMap<Ident, GenericEntity>>,
}

impl GenericEntitySet {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.storage.values().map(OrdMap::len).sum()
    }

    /// True if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.storage.values().all(OrdMap::is_empty)
    }

    /// Number of instances stored under exactly the named type.
    #[must_use]
    pub fn count_of(&self, name: &str) -> usize {
        self.storage.get(name).map_or(0, OrdMap::len)
    }

    /// Iterates every stored instance, grouped by type name and ordered by
    /// identity within each type.
    pub fn iter(&self) -> impl Iterator<Item = &GenericEntity> {
        self.storage.values().flat_map(OrdMap::values)
    }

    /// Iterates the instances stored under exactly the named type, in
    /// identity order. Sub-types are not included.
    pub fn iter_exact(&self, name: &str) -> impl Iterator<Item = &GenericEntity> {
        self.storage.get(name).into_iter().flat_map(OrdMap::values)
    }

    /// Looks up an instance by its exact key.
    #[must_use]
    pub fn get(&self, key: &EntityKey) -> Option<&GenericEntity> {
        self.storage.get(&key.entity)?.get(&key.id)
    }

    /// True if the key resolves to a stored instance.
    #[must_use]
    pub fn contains(&self, key: &EntityKey) -> bool {
        self.get(key).is_some()
    }

    /// Finds an instance by identity under the named type or any of its
    /// sub-types.
    #[must_use]
    pub fn query_by_id(
        &self,
        types: &EntityTypeSet,
        name: &str,
        id: &Ident,
    ) -> Option<&GenericEntity> {
        types
            .subtree(name)
            .into_iter()
            .find_map(|node| self.storage.get(node.name.as_str())?.get(id))
    }

    /// Returns the instances of the named type and its sub-types whose
    /// `field` equals `value`. Absent fields never match, including against
    /// null.
    #[must_use]
    pub fn query(
        &self,
        types: &EntityTypeSet,
        name: &str,
        field: &str,
        value: &Value,
    ) -> Vec<&GenericEntity> {
        self.query_all(types, name)
            .into_iter()
            .filter(|instance| instance.get(field) == Some(value))
            .collect()
    }

    /// Returns every instance of the named type and its sub-types: the
    /// named type's bucket first, then sub-type buckets parents before
    /// children and siblings in name order, each bucket in identity order.
    #[must_use]
    pub fn query_all(&self, types: &EntityTypeSet, name: &str) -> Vec<&GenericEntity> {
        let mut out = Vec::new();
        for node in types.subtree(name) {
            out.extend(self.iter_exact(node.name.as_str()));
        }
        out
    }

    /// Stores a new empty instance of the named type under the given
    /// identity.
    ///
    /// # Errors
    ///
    /// Returns an error if the type is unknown, the identity's kind does
    /// not match the identity field, or the identity is already taken
    /// anywhere in the type's hierarchy.
    pub fn create(
        &mut self,
        types: &EntityTypeSet,
        name: &str,
        id: impl Into<Ident>,
    ) -> Result<EntityKey> {
        let id = id.into();
        let identity = self.identity_of(types, name)?;
        if !id.matches_type(&identity.ty) {
            return Err(Error::new(ErrorKind::IdentityKind {
                entity: Name::from(name),
                id,
            }));
        }
        if self.identity_taken(types, name, &id) {
            return Err(Error::identity_taken(name, id));
        }
        let key = EntityKey::new(name, id);
        let instance = GenericEntity::new(key.entity.clone(), key.id.clone());
        self.storage
            .entry(key.entity.clone())
            .or_default()
            .insert(key.id.clone(), instance);
        Ok(key)
    }

    /// Stores a new empty instance, taking the suggested identity when it
    /// is free across the hierarchy and generating the next one otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if the type is unknown or the suggested identity's
    /// kind does not match the identity field.
    pub fn add(
        &mut self,
        types: &EntityTypeSet,
        name: &str,
        suggested: Option<Ident>,
    ) -> Result<EntityKey> {
        let identity = self.identity_of(types, name)?;
        if let Some(id) = suggested {
            if !id.matches_type(&identity.ty) {
                return Err(Error::new(ErrorKind::IdentityKind {
                    entity: Name::from(name),
                    id,
                }));
            }
            if !self.identity_taken(types, name, &id) {
                return self.create(types, name, id);
            }
        }
        let id = self.next_identity(types, name)?;
        self.create(types, name, id)
    }

    /// Generates the next free identity for the named type's hierarchy: the
    /// increment of the largest identity stored anywhere in the hierarchy,
    /// advanced past any collisions, or the initial identity when the
    /// hierarchy holds nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if the type is unknown.
    pub fn next_identity(&self, types: &EntityTypeSet, name: &str) -> Result<Ident> {
        let identity = self.identity_of(types, name)?;
        let text = matches!(identity.ty, Type::String);
        let root = types.root_of(name).map_or(name, |node| node.name.as_str());
        let mut max: Option<Ident> = None;
        for node in types.subtree(root) {
            if let Some(bucket) = self.storage.get(node.name.as_str()) {
                if let Some((id, _)) = bucket.get_max() {
                    if max.as_ref().is_none_or(|current| id > current) {
                        max = Some(id.clone());
                    }
                }
            }
        }
        let Some(seed) = max else {
            return Ok(Ident::initial(text));
        };
        // Text increments are not monotonic in text order ("9" steps to
        // "10"), so walk forward until the candidate is free.
        let mut candidate = seed.next();
        while self.identity_taken(types, name, &candidate) {
            candidate = candidate.next();
        }
        Ok(candidate)
    }

    /// Writes one field of a stored instance, after checking the value
    /// against the field's declared type.
    ///
    /// Writing null clears the field. A write to the authoritative side of
    /// a mapping also updates the derived field on the affected targets.
    ///
    /// # Errors
    ///
    /// Returns an error if the instance or field is unknown, the field is
    /// the identity or a mapping-derived field, the value is null on a
    /// non-nullable field, the value does not fit the declared type, or a
    /// referenced instance does not exist.
    pub fn set_value(
        &mut self,
        types: &EntityTypeSet,
        key: &EntityKey,
        field: &str,
        value: Value,
    ) -> Result<()> {
        if !self.contains(key) {
            return Err(Error::entity_not_found(key.clone()));
        }
        let declared = types
            .field_of(&key.entity, field)
            .ok_or_else(|| Error::unknown_field(key.entity.clone(), field))?
            .clone();
        if let Some(identity) = types.identity_field_of(&key.entity) {
            if identity.name == field {
                return Err(Error::new(ErrorKind::IdentityWrite {
                    entity: key.entity.clone(),
                    field: declared.name,
                }));
            }
        }
        if let Some(source) = &declared.mapping {
            return Err(Error::new(ErrorKind::DerivedField {
                entity: key.entity.clone(),
                field: declared.name.clone(),
                source: source.clone(),
            }));
        }
        if value.is_null() {
            if !declared.nullable {
                return Err(Error::new(ErrorKind::NotNullable {
                    entity: key.entity.clone(),
                    field: declared.name,
                }));
            }
        } else {
            self.check_value(types, &declared.ty, &value)?;
        }
        let old = self.get(key).and_then(|instance| instance.get(field)).cloned();
        let stored = if value.is_null() { None } else { Some(value) };
        if let Some(instance) = self.get_mut(key) {
            match &stored {
                Some(value) => instance.set(declared.name.clone(), value.clone()),
                None => instance.clear(field),
            };
        }
        self.maintain_derived(types, key, &declared, old.as_ref(), stored.as_ref());
        Ok(())
    }

    /// Stores a copy of an instance under a freshly generated identity and
    /// returns the copy's key.
    ///
    /// Mapping-derived fields are not copied; the copy's derived data grows
    /// from its own authoritative references.
    ///
    /// # Errors
    ///
    /// Returns an error if the source instance does not exist.
    pub fn copy(&mut self, types: &EntityTypeSet, key: &EntityKey) -> Result<EntityKey> {
        let source = self
            .get(key)
            .ok_or_else(|| Error::entity_not_found(key.clone()))?
            .clone();
        let id = self.next_identity(types, &key.entity)?;
        let copied = self.create(types, &key.entity, id)?;
        for (name, value) in source.fields() {
            let derived = types
                .field_of(&key.entity, name)
                .is_some_and(|declared| declared.mapping.is_some());
            if derived {
                continue;
            }
            self.set_value(types, &copied, name, value.clone())?;
        }
        Ok(copied)
    }

    /// Lifts an instance out of storage without touching references to it.
    ///
    /// The instance's own authoritative references are unregistered from
    /// the derived side; inbound references stay in place, expecting the
    /// instance (or a transformed successor under the same key) to be
    /// attached again.
    ///
    /// # Errors
    ///
    /// Returns an error if the key resolves to no stored instance.
    pub fn detach(&mut self, types: &EntityTypeSet, key: &EntityKey) -> Result<GenericEntity> {
        let Some(instance) = self.get(key) else {
            return Err(Error::entity_not_found(key.clone()));
        };
        let mut registered: Vec<(EntityField, Value)> = Vec::new();
        for (name, value) in instance.fields() {
            if let Some(declared) = types.field_of(&key.entity, name) {
                if declared.mapping.is_none() {
                    registered.push((declared.clone(), value.clone()));
                }
            }
        }
        for (declared, value) in registered {
            self.maintain_derived(types, key, &declared, Some(&value), None);
        }
        self.storage
            .get_mut(&key.entity)
            .and_then(|bucket| bucket.remove(&key.id))
            .ok_or_else(|| Error::entity_not_found(key.clone()))
    }

    /// Stores a detached instance, validating it as a whole first.
    ///
    /// # Errors
    ///
    /// Returns an error if the instance's type is unknown, its identity is
    /// mismatched or taken, a populated field is undeclared or holds the
    /// identity, or a value does not fit its declared type.
    pub fn attach(&mut self, types: &EntityTypeSet, instance: GenericEntity) -> Result<EntityKey> {
        let name = instance.entity().clone();
        let identity = self.identity_of(types, &name)?.clone();
        if !instance.id().matches_type(&identity.ty) {
            return Err(Error::new(ErrorKind::IdentityKind {
                entity: name,
                id: instance.id().clone(),
            }));
        }
        if self.identity_taken(types, &name, instance.id()) {
            return Err(Error::identity_taken(name, instance.id().clone()));
        }
        for (field, value) in instance.fields() {
            let declared = types
                .field_of(&name, field)
                .ok_or_else(|| Error::unknown_field(name.clone(), field.clone()))?;
            if *field == identity.name {
                return Err(Error::new(ErrorKind::IdentityWrite {
                    entity: name.clone(),
                    field: declared.name.clone(),
                }));
            }
            self.check_value(types, &declared.ty, value)?;
        }
        let key = instance.key();
        let registered: Vec<(EntityField, Value)> = instance
            .fields()
            .filter_map(|(field, value)| {
                types
                    .field_of(&name, field)
                    .filter(|declared| declared.mapping.is_none())
                    .map(|declared| (declared.clone(), value.clone()))
            })
            .collect();
        self.storage
            .entry(key.entity.clone())
            .or_default()
            .insert(key.id.clone(), instance);
        for (declared, value) in registered {
            self.maintain_derived(types, &key, &declared, None, Some(&value));
        }
        Ok(key)
    }

    /// Removes an instance and cascades through the reference graph.
    ///
    /// Every reference to a removed instance is cut: nullable direct
    /// references are nulled, collection and map positions drop the
    /// matching entries, and a holder whose non-nullable direct reference
    /// was cut is removed the same way. Cycles are handled; each instance
    /// is processed once. Returns the removed keys in removal order.
    ///
    /// # Errors
    ///
    /// Returns an error if the initial key resolves to no stored instance.
    pub fn remove(&mut self, types: &EntityTypeSet, key: &EntityKey) -> Result<Vec<EntityKey>> {
        if !self.contains(key) {
            return Err(Error::entity_not_found(key.clone()));
        }
        let mut removed = Vec::new();
        let mut pending = vec![key.clone()];
        let mut seen = BTreeSet::new();
        while let Some(victim) = pending.pop() {
            if !seen.insert(victim.clone()) {
                continue;
            }
            if !self.contains(&victim) {
                continue;
            }
            for reference in EntityReference::to(types, &victim.entity) {
                for holder_key in reference.referrers(types, self, &victim) {
                    if holder_key == victim {
                        continue;
                    }
                    let Some(holder) = self.get_mut(&holder_key) else {
                        continue;
                    };
                    if reference.delete_reference(holder, &victim) {
                        debug!(holder = %holder_key, via = %reference, "cascade dooms referrer");
                        pending.push(holder_key);
                    }
                }
            }
            if let Some(bucket) = self.storage.get_mut(&victim.entity) {
                bucket.remove(&victim.id);
            }
            debug!(entity = %victim, "removed");
            removed.push(victim);
        }
        Ok(removed)
    }

    /// Redirects every reference from `old` to `new`, then deletes `old`
    /// without cascading. Returns the number of rewritten occurrences.
    ///
    /// Collection elements keep their positions and map entries are
    /// re-keyed. No rewrite lands unless `new` is acceptable at every
    /// referencing position.
    ///
    /// # Errors
    ///
    /// Returns an error if either instance does not exist, or if `new`'s
    /// type does not satisfy a position's declared target type.
    pub fn replace(
        &mut self,
        types: &EntityTypeSet,
        old: &EntityKey,
        new: &EntityKey,
    ) -> Result<usize> {
        if !self.contains(old) {
            return Err(Error::entity_not_found(old.clone()));
        }
        if !self.contains(new) {
            return Err(Error::entity_not_found(new.clone()));
        }
        let mut planned: Vec<(EntityReference, Vec<EntityKey>)> = Vec::new();
        for reference in EntityReference::to(types, &old.entity) {
            let holders = reference.referrers(types, self, old);
            if holders.is_empty() {
                continue;
            }
            if !types.is_subtype_of(&new.entity, &reference.target) {
                return Err(Error::type_mismatch(
                    Type::entity(reference.target.clone()),
                    format!("reference to {new}"),
                ));
            }
            planned.push((reference, holders));
        }
        let mut rewritten = 0;
        for (reference, holders) in planned {
            let authoritative = types
                .field_of(&reference.holder, &reference.field)
                .is_some_and(|declared| declared.mapping.is_none());
            let back = reference
                .reverse
                .as_ref()
                .and_then(|reverse| types.field_of(&new.entity, reverse))
                .cloned();
            for holder_key in holders {
                let count = match self.get_mut(&holder_key) {
                    Some(holder) => reference.replace_reference(holder, old, new),
                    None => 0,
                };
                rewritten += count;
                if count > 0 && authoritative {
                    if let Some(back) = &back {
                        self.add_back_entry(new, back, &holder_key);
                    }
                }
            }
        }
        if let Some(bucket) = self.storage.get_mut(&old.entity) {
            bucket.remove(&old.id);
        }
        debug!(old = %old, new = %new, rewritten, "replaced entity");
        Ok(rewritten)
    }

    /// Renumbers an instance, rewriting every reference to it. Returns the
    /// instance's new key.
    ///
    /// The new identity must match the identity field's kind and be free
    /// across the hierarchy; nothing changes otherwise. Renumbering to the
    /// current identity is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the instance does not exist, the identity's
    /// kind is mismatched, or the identity is taken.
    pub fn set_identity(
        &mut self,
        types: &EntityTypeSet,
        key: &EntityKey,
        id: impl Into<Ident>,
    ) -> Result<EntityKey> {
        let id = id.into();
        if !self.contains(key) {
            return Err(Error::entity_not_found(key.clone()));
        }
        let identity = self.identity_of(types, &key.entity)?;
        if !id.matches_type(&identity.ty) {
            return Err(Error::new(ErrorKind::IdentityKind {
                entity: key.entity.clone(),
                id,
            }));
        }
        if id == key.id {
            return Ok(key.clone());
        }
        if self.identity_taken(types, &key.entity, &id) {
            return Err(Error::identity_taken(key.entity.clone(), id));
        }
        // Plan the rewrites first; the reverse shortcut reads the instance
        // being renumbered.
        let mut planned: Vec<(EntityReference, Vec<EntityKey>)> = Vec::new();
        for reference in EntityReference::to(types, &key.entity) {
            let holders = reference.referrers(types, self, key);
            if !holders.is_empty() {
                planned.push((reference, holders));
            }
        }
        let renumbered = EntityKey::new(key.entity.clone(), id.clone());
        let Some(mut instance) = self
            .storage
            .get_mut(&key.entity)
            .and_then(|bucket| bucket.remove(&key.id))
        else {
            return Err(Error::entity_not_found(key.clone()));
        };
        instance.set_id(id.clone());
        if let Some(bucket) = self.storage.get_mut(&key.entity) {
            bucket.insert(id, instance);
        }
        let mut rewritten = 0;
        for (reference, holders) in planned {
            for holder_key in holders {
                // The instance may reference itself under its old key.
                let holder_key = if holder_key == *key {
                    renumbered.clone()
                } else {
                    holder_key
                };
                if let Some(holder) = self.get_mut(&holder_key) {
                    rewritten += reference.replace_reference(holder, key, &renumbered);
                }
            }
        }
        debug!(old = %key, new = %renumbered, rewritten, "renumbered entity");
        Ok(renumbered)
    }

    /// Moves a whole bucket to a new type name, re-tagging its instances
    /// and rewriting the type name inside every stored reference key.
    /// Returns the number of instances moved.
    ///
    /// This is the storage half of an entity-type rename; the schema half
    /// renames the declared type. No schema is consulted here.
    ///
    /// # Errors
    ///
    /// Returns an error if instances are already stored under the new name.
    pub fn rename_type(&mut self, old: &str, new: &str) -> Result<usize> {
        if old == new {
            return Ok(0);
        }
        if self.storage.get(new).is_some_and(|bucket| !bucket.is_empty()) {
            return Err(Error::duplicate_type(new));
        }
        let Some(bucket) = self.storage.remove(old) else {
            return Ok(0);
        };
        let moved = bucket.len();
        let renamed: OrdMap<Ident, GenericEntity> = bucket
            .iter()
            .map(|(id, instance)| {
                let mut instance = instance.clone();
                instance.set_entity(Name::from(new));
                (id.clone(), instance)
            })
            .collect();
        self.storage.insert(Name::from(new), renamed);
        let rewritten = self.rewrite_entity_names(old, new);
        debug!(old, new, moved, rewritten, "renamed stored type");
        Ok(moved)
    }

    /// Moves one instance to another concrete type under the same
    /// identity, rewriting every reference to it. Returns the new key.
    ///
    /// This is the storage half of a type switch; the caller is
    /// responsible for the instance's fields making sense under the new
    /// type. Within one hierarchy the identity stays valid by
    /// construction; across hierarchies it must be free on the other side.
    ///
    /// # Errors
    ///
    /// Returns an error if the instance or the target type is unknown, the
    /// identity kind does not fit the target hierarchy, or the identity is
    /// taken there.
    pub fn retag(
        &mut self,
        types: &EntityTypeSet,
        key: &EntityKey,
        to: &str,
    ) -> Result<EntityKey> {
        if !self.contains(key) {
            return Err(Error::entity_not_found(key.clone()));
        }
        let identity = self.identity_of(types, to)?;
        if !key.id.matches_type(&identity.ty) {
            return Err(Error::new(ErrorKind::IdentityKind {
                entity: Name::from(to),
                id: key.id.clone(),
            }));
        }
        if key.entity == to {
            return Ok(key.clone());
        }
        let same_hierarchy = match (types.root_of(&key.entity), types.root_of(to)) {
            (Some(from_root), Some(to_root)) => from_root.name == to_root.name,
            _ => false,
        };
        if !same_hierarchy && self.identity_taken(types, to, &key.id) {
            return Err(Error::identity_taken(to, key.id.clone()));
        }
        let mut planned: Vec<(EntityReference, Vec<EntityKey>)> = Vec::new();
        for reference in EntityReference::to(types, &key.entity) {
            let holders = reference.referrers(types, self, key);
            if !holders.is_empty() {
                planned.push((reference, holders));
            }
        }
        let Some(mut instance) = self
            .storage
            .get_mut(&key.entity)
            .and_then(|bucket| bucket.remove(&key.id))
        else {
            return Err(Error::entity_not_found(key.clone()));
        };
        instance.set_entity(Name::from(to));
        let retagged = instance.key();
        self.storage
            .entry(retagged.entity.clone())
            .or_default()
            .insert(retagged.id.clone(), instance);
        for (reference, holders) in planned {
            for holder_key in holders {
                let holder_key = if holder_key == *key {
                    retagged.clone()
                } else {
                    holder_key
                };
                if let Some(holder) = self.get_mut(&holder_key) {
                    reference.replace_reference(holder, key, &retagged);
                }
            }
        }
        debug!(old = %key, new = %retagged, "retagged entity");
        Ok(retagged)
    }

    /// Rebuilds every mapping-derived field from its authoritative side.
    ///
    /// Each derived field is cleared on every instance of its declaring
    /// subtree, then repopulated by scanning the authoritative instances,
    /// ordering collection entries by the field's ordering columns (key
    /// order where columns tie or are absent). Used after schema surgery
    /// that may have invalidated derived data.
    pub fn relink(&mut self, types: &EntityTypeSet) {
        let mut derived: Vec<(Name, EntityField)> = Vec::new();
        for entity in types.entities() {
            for field in entity.fields() {
                if field.mapping.is_some() {
                    derived.push((entity.name.clone(), field.clone()));
                }
            }
        }
        for (home, field) in &derived {
            let names: Vec<Name> = types
                .subtree(home)
                .into_iter()
                .map(|node| node.name.clone())
                .collect();
            for name in names {
                if let Some(bucket) = self.storage.get_mut(&name) {
                    // `im::OrdMap` has no `iter_mut`; walk collected keys.
                    let ids: Vec<Ident> = bucket.keys().cloned().collect();
                    for id in ids {
                        if let Some(instance) = bucket.get_mut(&id) {
                            instance.clear(&field.name);
                        }
                    }
                }
            }
        }
        let mut rebuilt = 0;
        for (home, field) in &derived {
            let Some(source_type) = referenced(&field.ty) else {
                continue;
            };
            let Some(source_field) = field.mapping.as_ref() else {
                continue;
            };
            let mut gathered: BTreeMap<EntityKey, Vec<EntityKey>> = BTreeMap::new();
            for source in self.query_all(types, source_type) {
                for held in keys_in(source.get(source_field)) {
                    if types.is_subtype_of(&held.entity, home) {
                        gathered.entry(held).or_default().push(source.key());
                    }
                }
            }
            let writes: Vec<(EntityKey, Value)> = gathered
                .into_iter()
                .map(|(target, keys)| {
                    let keys = self.ordered_keys(keys, &field.ordering);
                    let value = if field.is_container() {
                        Value::List(keys.into_iter().map(Value::Ref).collect())
                    } else {
                        keys.into_iter().next().map_or(Value::Null, Value::Ref)
                    };
                    (target, value)
                })
                .collect();
            for (target, value) in writes {
                if let Some(instance) = self.get_mut(&target) {
                    instance.set(field.name.clone(), value);
                    rebuilt += 1;
                }
            }
        }
        debug!(fields = derived.len(), rebuilt, "relinked derived fields");
    }

    fn get_mut(&mut self, key: &EntityKey) -> Option<&mut GenericEntity> {
        self.storage.get_mut(&key.entity)?.get_mut(&key.id)
    }

    /// Resolves the hierarchy's identity field, proving the type exists.
    fn identity_of<'t>(
        &self,
        types: &'t EntityTypeSet,
        name: &str,
    ) -> Result<&'t EntityField> {
        if types.entity(name).is_none() {
            return Err(Error::unknown_type(name));
        }
        types
            .identity_field_of(name)
            .ok_or_else(|| Error::internal(format!("no identity field in the {name} hierarchy")))
    }

    /// True if the identity is stored anywhere in the named type's
    /// hierarchy.
    fn identity_taken(&self, types: &EntityTypeSet, name: &str, id: &Ident) -> bool {
        let root = types.root_of(name).map_or(name, |node| node.name.as_str());
        types.subtree(root).iter().any(|node| {
            self.storage
                .get(node.name.as_str())
                .is_some_and(|bucket| bucket.contains_key(id))
        })
    }

    /// Checks a non-null value against a declared type, honoring subtype
    /// acceptance for references and requiring referenced instances to
    /// exist.
    fn check_value(&self, types: &EntityTypeSet, ty: &Type, value: &Value) -> Result<()> {
        match (ty, value) {
            (Type::Bool, Value::Bool(_))
            | (Type::Int | Type::Long, Value::Int(_))
            | (Type::Float, Value::Float(_))
            | (Type::String, Value::String(_)) => Ok(()),
            (Type::Opaque(kind), Value::Opaque(opaque)) if opaque.kind == *kind => Ok(()),
            (Type::Enum(name), Value::Enum(literal)) if literal.enum_name == *name => {
                let declared = types
                    .enum_type(name)
                    .ok_or_else(|| Error::unknown_type(name.clone()))?;
                if declared.contains(&literal.value) {
                    Ok(())
                } else {
                    Err(Error::new(ErrorKind::UnknownEnumValue {
                        enum_name: name.clone(),
                        value: literal.value.clone(),
                    }))
                }
            }
            (Type::Entity(name), Value::Ref(key)) => {
                if !types.is_subtype_of(&key.entity, name) {
                    return Err(Error::type_mismatch(
                        ty.clone(),
                        format!("reference to {key}"),
                    ));
                }
                if !self.contains(key) {
                    return Err(Error::entity_not_found(key.clone()));
                }
                Ok(())
            }
            (Type::Collection(element), Value::List(items)) => {
                for item in items {
                    self.check_value(types, element, item)?;
                }
                Ok(())
            }
            (Type::Map(key_ty, value_ty), Value::Map(entries)) => {
                for (key, held) in entries {
                    self.check_value(types, key_ty, key)?;
                    self.check_value(types, value_ty, held)?;
                }
                Ok(())
            }
            (Type::Unresolved(name), _) => Err(Error::unknown_type(name.clone())),
            _ => Err(Error::type_mismatch(ty.clone(), value.type_name())),
        }
    }

    /// Propagates a write to an authoritative field into the derived
    /// fields mapped onto it: holders leave the derived side of targets no
    /// longer referenced and join the derived side of newly referenced
    /// ones, at their ordered position.
    fn maintain_derived(
        &mut self,
        types: &EntityTypeSet,
        holder: &EntityKey,
        field: &EntityField,
        old: Option<&Value>,
        new: Option<&Value>,
    ) {
        let Some(target_type) = referenced(&field.ty) else {
            return;
        };
        let backs: Vec<EntityField> = types
            .fields_of(target_type)
            .into_iter()
            .filter(|back| back.mapping.as_deref() == Some(field.name.as_str()))
            .cloned()
            .collect();
        if backs.is_empty() {
            return;
        }
        let old_keys = keys_in(old);
        let new_keys = keys_in(new);
        for back in &backs {
            for gone in old_keys.difference(&new_keys) {
                self.drop_back_entry(gone, back, holder);
            }
            for added in new_keys.difference(&old_keys) {
                self.add_back_entry(added, back, holder);
            }
        }
    }

    /// Removes the holder's key from a target's derived field.
    fn drop_back_entry(&mut self, target: &EntityKey, back: &EntityField, holder: &EntityKey) {
        let Some(instance) = self.get_mut(target) else {
            return;
        };
        if back.is_container() {
            if let Some(Value::List(items)) = instance.value_mut(&back.name) {
                items.retain(|item| item.as_ref_key() != Some(holder));
            }
        } else if instance.get(&back.name).and_then(Value::as_ref_key) == Some(holder) {
            instance.clear(&back.name);
        }
    }

    /// Inserts the holder's key into a target's derived field at its
    /// ordered position.
    fn add_back_entry(&mut self, target: &EntityKey, back: &EntityField, holder: &EntityKey) {
        if !self.contains(target) {
            return;
        }
        if back.is_container() {
            let mut keys: Vec<EntityKey> = self
                .get(target)
                .and_then(|instance| instance.get(&back.name))
                .and_then(Value::as_list)
                .map(|items| items.iter().filter_map(Value::as_ref_key).cloned().collect())
                .unwrap_or_default();
            if keys.contains(holder) {
                return;
            }
            keys.push(holder.clone());
            let keys = self.ordered_keys(keys, &back.ordering);
            let rebuilt = Value::List(keys.into_iter().map(Value::Ref).collect());
            if let Some(instance) = self.get_mut(target) {
                instance.set(back.name.clone(), rebuilt);
            }
        } else if let Some(instance) = self.get_mut(target) {
            instance.set(back.name.clone(), Value::Ref(holder.clone()));
        }
    }

    /// Sorts keys by their instances' ordering-column values, falling back
    /// to key order.
    fn ordered_keys(&self, keys: Vec<EntityKey>, ordering: &[Name]) -> Vec<EntityKey> {
        let mut decorated: Vec<(Vec<Value>, EntityKey)> = keys
            .into_iter()
            .map(|key| {
                let columns: Vec<Value> = ordering
                    .iter()
                    .map(|column| {
                        self.get(&key)
                            .and_then(|instance| instance.get(column))
                            .cloned()
                            .unwrap_or(Value::Null)
                    })
                    .collect();
                (columns, key)
            })
            .collect();
        decorated.sort();
        decorated.into_iter().map(|(_, key)| key).collect()
    }

    /// Rewrites the entity name inside every stored reference key.
    fn rewrite_entity_names(&mut self, old: &str, new: &str) -> usize {
        let mut rewritten = 0;
        for bucket in self.storage.values_mut() {
            // `im::OrdMap` has no `iter_mut`; walk collected keys.
            let ids: Vec<Ident> = bucket.keys().cloned().collect();
            for id in ids {
                let Some(instance) = bucket.get_mut(&id) else {
                    continue;
                };
                let fields: Vec<Name> = instance.fields().map(|(name, _)| name.clone()).collect();
                for field in fields {
                    if let Some(value) = instance.value_mut(&field) {
                        rewritten += rewrite_value(value, old, new);
                    }
                }
            }
        }
        rewritten
    }
}

/// Collects the entity keys held directly or as collection elements.
fn keys_in(value: Option<&Value>) -> BTreeSet<EntityKey> {
    let mut out = BTreeSet::new();
    match value {
        Some(Value::Ref(key)) => {
            out.insert(key.clone());
        }
        Some(Value::List(items)) => {
            for item in items {
                if let Value::Ref(key) = item {
                    out.insert(key.clone());
                }
            }
        }
        _ => {}
    }
    out
}

/// Rewrites the type-name half of every reference key inside a value,
/// returning the number of keys touched.
fn rewrite_value(value: &mut Value, old: &str, new: &str) -> usize {
    match value {
        Value::Ref(key) => {
            if key.entity == old {
                key.entity = Name::from(new);
                1
            } else {
                0
            }
        }
        Value::List(items) => {
            let mut count = 0;
            for item in items.iter_mut() {
                count += rewrite_value(item, old, new);
            }
            count
        }
        Value::Map(entries) => {
            let mut count = 0;
            let rebuilt: OrdMap<Value, Value> = entries
                .iter()
                .map(|(key, held)| {
                    let mut key = key.clone();
                    let mut held = held.clone();
                    count += rewrite_value(&mut key, old, new);
                    count += rewrite_value(&mut held, old, new);
                    (key, held)
                })
                .collect();
            *entries = rebuilt;
            count
        }
        _ => 0,
    }
}
