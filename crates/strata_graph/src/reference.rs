//! Schema-level resolution of cross-entity references.
//!
//! An [`EntityReference`] names one position in the schema where instances
//! of one entity type can hold keys of another: a direct field, a collection
//! element, or one side of a map entry. The resolver enumerates these
//! positions from the type set alone; the store then uses them to find
//! referrers, cut references during cascade removal, and rewrite keys during
//! replacement and renumbering.

use std::collections::BTreeSet;
use std::fmt;

use im::OrdMap;
use strata_foundation::{EntityKey, Name, Type, Value};
use strata_schema::{EntityField, EntityTypeSet};

use crate::entity::GenericEntity;
use crate::store::GenericEntitySet;

/// The position within a field's type where a reference occurs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReferenceKind {
    /// The field holds a single key.
    Direct,
    /// The field is a collection of keys.
    Collection,
    /// The field is a map whose keys are entity keys.
    MapKey,
    /// The field is a map whose values are entity keys.
    MapValue,
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Direct => "direct",
            Self::Collection => "collection",
            Self::MapKey => "map-key",
            Self::MapValue => "map-value",
        };
        write!(f, "{text}")
    }
}

/// One schema position where instances of `holder` reference instances of
/// `target`.
///
/// `reverse` names the field on the target side that lists or points back at
/// the holders: the field's own mapping when the field is derived, or the
/// target's mapping-carrying field when this is the authoritative side. When
/// present it lets referrer lookups read one instance instead of scanning
/// the holder subtree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntityReference {
    /// The entity type declaring the referencing field.
    pub holder: Name,
    /// The referencing field.
    pub field: Name,
    /// The entity type being referenced.
    pub target: Name,
    /// Where in the field's type the reference occurs.
    pub kind: ReferenceKind,
    /// Whether the referencing field tolerates null.
    pub nullable: bool,
    /// Field on the target type holding the reverse side, if one exists.
    pub reverse: Option<Name>,
}

impl EntityReference {
    /// Enumerates every reference position declared in the type set.
    ///
    /// Fields are attributed to the type that declares them; instances of
    /// sub-types are reached by scanning the holder's subtree. A map field
    /// with entity keys on both sides yields two references.
    #[must_use]
    pub fn all(types: &EntityTypeSet) -> Vec<Self> {
        let mut out = Vec::new();
        for entity in types.entities() {
            for field in entity.fields() {
                for (kind, target) in positions(&field.ty) {
                    let reverse = match kind {
                        ReferenceKind::Direct | ReferenceKind::Collection => {
                            reverse_of(types, &entity.name, field, target)
                        }
                        ReferenceKind::MapKey | ReferenceKind::MapValue => None,
                    };
                    out.push(Self {
                        holder: entity.name.clone(),
                        field: field.name.clone(),
                        target: target.clone(),
                        kind,
                        nullable: field.nullable,
                        reverse,
                    });
                }
            }
        }
        out
    }

    /// Enumerates the reference positions that can hold keys of `target`
    /// instances: positions whose declared target is `target` itself or one
    /// of its ancestors.
    #[must_use]
    pub fn to(types: &EntityTypeSet, target: &str) -> Vec<Self> {
        Self::all(types)
            .into_iter()
            .filter(|reference| types.is_subtype_of(target, &reference.target))
            .collect()
    }

    /// Finds the keys of every stored instance referencing `target`,
    /// restricted to direct positions, collection/map positions, or both.
    ///
    /// Positions with a reverse side are answered by reading the target
    /// instance's reverse field; the rest scan the holder subtree. The
    /// result is deduplicated and key-ordered.
    #[must_use]
    pub fn find_referrers(
        types: &EntityTypeSet,
        graph: &GenericEntitySet,
        target: &EntityKey,
        with_direct: bool,
        with_collection: bool,
    ) -> Vec<EntityKey> {
        let mut found = BTreeSet::new();
        for reference in Self::to(types, &target.entity) {
            let wanted = match reference.kind {
                ReferenceKind::Direct => with_direct,
                ReferenceKind::Collection | ReferenceKind::MapKey | ReferenceKind::MapValue => {
                    with_collection
                }
            };
            if wanted {
                reference.referrers_into(types, graph, target, &mut found);
            }
        }
        found.into_iter().collect()
    }

    /// Finds the keys of stored instances referencing `target` through this
    /// position alone, reading the reverse side when one exists and scanning
    /// the holder subtree otherwise. Deduplicated and key-ordered.
    #[must_use]
    pub fn referrers(
        &self,
        types: &EntityTypeSet,
        graph: &GenericEntitySet,
        target: &EntityKey,
    ) -> Vec<EntityKey> {
        let mut found = BTreeSet::new();
        self.referrers_into(types, graph, target, &mut found);
        found.into_iter().collect()
    }

    fn referrers_into(
        &self,
        types: &EntityTypeSet,
        graph: &GenericEntitySet,
        target: &EntityKey,
        found: &mut BTreeSet<EntityKey>,
    ) {
        if let Some(reverse) = &self.reverse {
            if let Some(instance) = graph.get(target) {
                match instance.get(reverse) {
                    Some(Value::Ref(key)) => {
                        found.insert(key.clone());
                    }
                    Some(Value::List(items)) => {
                        for item in items {
                            if let Value::Ref(key) = item {
                                found.insert(key.clone());
                            }
                        }
                    }
                    _ => {}
                }
                return;
            }
        }
        for holder in graph.query_all(types, &self.holder) {
            if self.value_references(holder.get(&self.field), target) {
                found.insert(holder.key());
            }
        }
    }

    /// True if `value`, read from this reference's field, holds `target` at
    /// this reference's position.
    #[must_use]
    pub fn value_references(&self, value: Option<&Value>, target: &EntityKey) -> bool {
        let Some(value) = value else {
            return false;
        };
        match (self.kind, value) {
            (ReferenceKind::Direct, Value::Ref(key)) => key == target,
            (ReferenceKind::Collection, Value::List(items)) => {
                items.iter().any(|item| item.as_ref_key() == Some(target))
            }
            (ReferenceKind::MapKey, Value::Map(entries)) => {
                entries.keys().any(|key| key.as_ref_key() == Some(target))
            }
            (ReferenceKind::MapValue, Value::Map(entries)) => {
                entries.values().any(|held| held.as_ref_key() == Some(target))
            }
            _ => false,
        }
    }

    /// Cuts every occurrence of `target` out of the holder's referencing
    /// field.
    ///
    /// Nullable direct positions are cleared and collection and map
    /// positions drop the matching elements or entries. A match in a
    /// non-nullable direct position cannot be cut; the holder has lost a
    /// field it must carry, and `true` says the holder itself must go.
    pub fn delete_reference(&self, holder: &mut GenericEntity, target: &EntityKey) -> bool {
        match self.kind {
            ReferenceKind::Direct => {
                let hit = holder.get(&self.field).and_then(Value::as_ref_key) == Some(target);
                if !hit {
                    return false;
                }
                if self.nullable {
                    holder.clear(&self.field);
                    false
                } else {
                    true
                }
            }
            ReferenceKind::Collection => {
                if let Some(Value::List(items)) = holder.value_mut(&self.field) {
                    items.retain(|item| item.as_ref_key() != Some(target));
                }
                false
            }
            ReferenceKind::MapKey => {
                self.rebuild_map(holder, |key, _| key.as_ref_key() != Some(target));
                false
            }
            ReferenceKind::MapValue => {
                self.rebuild_map(holder, |_, held| held.as_ref_key() != Some(target));
                false
            }
        }
    }

    /// Substitutes `new` for every occurrence of `old` in the holder's
    /// referencing field, returning the number of occurrences rewritten.
    ///
    /// Collection elements keep their positions and map entries are
    /// re-keyed in place.
    pub fn replace_reference(
        &self,
        holder: &mut GenericEntity,
        old: &EntityKey,
        new: &EntityKey,
    ) -> usize {
        match self.kind {
            ReferenceKind::Direct => {
                if holder.get(&self.field).and_then(Value::as_ref_key) == Some(old) {
                    holder.set(self.field.clone(), Value::Ref(new.clone()));
                    1
                } else {
                    0
                }
            }
            ReferenceKind::Collection => {
                let mut count = 0;
                if let Some(Value::List(items)) = holder.value_mut(&self.field) {
                    for item in items.iter_mut() {
                        if item.as_ref_key() == Some(old) {
                            *item = Value::Ref(new.clone());
                            count += 1;
                        }
                    }
                }
                count
            }
            ReferenceKind::MapKey => {
                let mut count = 0;
                if let Some(Value::Map(entries)) = holder.value_mut(&self.field) {
                    let rebuilt: OrdMap<Value, Value> = entries
                        .iter()
                        .map(|(key, held)| {
                            if key.as_ref_key() == Some(old) {
                                count += 1;
                                (Value::Ref(new.clone()), held.clone())
                            } else {
                                (key.clone(), held.clone())
                            }
                        })
                        .collect();
                    *entries = rebuilt;
                }
                count
            }
            ReferenceKind::MapValue => {
                let mut count = 0;
                if let Some(Value::Map(entries)) = holder.value_mut(&self.field) {
                    let rebuilt: OrdMap<Value, Value> = entries
                        .iter()
                        .map(|(key, held)| {
                            if held.as_ref_key() == Some(old) {
                                count += 1;
                                (key.clone(), Value::Ref(new.clone()))
                            } else {
                                (key.clone(), held.clone())
                            }
                        })
                        .collect();
                    *entries = rebuilt;
                }
                count
            }
        }
    }

    fn rebuild_map(&self, holder: &mut GenericEntity, mut keep: impl FnMut(&Value, &Value) -> bool) {
        if let Some(Value::Map(entries)) = holder.value_mut(&self.field) {
            let kept: OrdMap<Value, Value> = entries
                .iter()
                .filter(|(key, held)| keep(key, held))
                .map(|(key, held)| (key.clone(), held.clone()))
                .collect();
            *entries = kept;
        }
    }
}

impl fmt::Display for EntityReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{} -> {} ({})",
            self.holder, self.field, self.target, self.kind
        )
    }
}

/// Extracts the reference positions of a field type. Positions nested more
/// than one level down (a list of lists of entities, say) are not tracked.
fn positions(ty: &Type) -> Vec<(ReferenceKind, &Name)> {
    match ty {
        Type::Entity(name) => vec![(ReferenceKind::Direct, name)],
        Type::Collection(element) => match element.as_ref() {
            Type::Entity(name) => vec![(ReferenceKind::Collection, name)],
            _ => Vec::new(),
        },
        Type::Map(key, value) => {
            let mut out = Vec::new();
            if let Type::Entity(name) = key.as_ref() {
                out.push((ReferenceKind::MapKey, name));
            }
            if let Type::Entity(name) = value.as_ref() {
                out.push((ReferenceKind::MapValue, name));
            }
            out
        }
        _ => Vec::new(),
    }
}

/// The single entity type a direct or collection field references.
pub(crate) fn referenced(ty: &Type) -> Option<&Name> {
    match ty {
        Type::Entity(name) => Some(name),
        Type::Collection(element) => match element.as_ref() {
            Type::Entity(name) => Some(name),
            _ => None,
        },
        _ => None,
    }
}

/// Resolves the reverse field of a direct or collection reference: the
/// field's own mapping when it has one, otherwise the target-side field
/// whose mapping names this field and whose type reaches back to the
/// holder.
fn reverse_of(
    types: &EntityTypeSet,
    holder: &Name,
    field: &EntityField,
    target: &Name,
) -> Option<Name> {
    if let Some(mapping) = &field.mapping {
        return Some(mapping.clone());
    }
    types
        .fields_of(target)
        .into_iter()
        .find(|back| {
            back.mapping.as_deref() == Some(field.name.as_str())
                && referenced(&back.ty).is_some_and(|named| types.is_subtype_of(holder, named))
        })
        .map(|back| back.name.clone())
}
