//! The schema edit vocabulary.
//!
//! A [`Migrator`] is one explicit, reviewable edit to a recorded schema.
//! Structural migrators rewrite the type model only; data-transform
//! migrators additionally visit every live instance of the targeted type
//! and its subtypes. Each migrator knows its structural inverse, so a
//! migration set can be reversed as long as every step is reversible.
//!
//! [`Migrator::run`] follows one ordering rule: the type model changes
//! before instance data for additive edits (instances must validate
//! against the new definitions) and after it for removals (instances are
//! cleaned up while the old definitions still resolve).

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use im::{OrdMap, Vector};
use strata_foundation::{
    DissectorSource, EntityKey, EnumLiteral, Error, ErrorKind, Name, Result, Type, Value,
};
use strata_graph::{GenericEntity, GenericEntitySet};
use strata_schema::{EntityDecl, EntityField, EntityType, EntityTypeSet, EnumDecl, EnumType};
use tracing::{debug, warn};

// =============================================================================
// Migration Options
// =============================================================================

/// Behavior switches for an instance migration pass.
#[derive(Clone, Copy, Debug)]
pub struct MigrationOptions {
    /// Escalate the first per-instance failure into a fatal error.
    pub fail_fast: bool,
    /// Cap on retained per-instance failure diagnostics.
    pub max_failures: usize,
}

impl MigrationOptions {
    /// Creates the default options: keep going past instance failures,
    /// retaining up to 100 diagnostics.
    #[must_use]
    pub fn new() -> Self {
        Self {
            fail_fast: false,
            max_failures: 100,
        }
    }

    /// Sets whether the first instance failure aborts the pass.
    #[must_use]
    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    /// Sets the cap on retained failure diagnostics.
    #[must_use]
    pub fn with_max_failures(mut self, max_failures: usize) -> Self {
        self.max_failures = max_failures;
        self
    }
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Migration Tally
// =============================================================================

/// Instance counts accumulated across one migration pass.
#[derive(Clone, Debug, Default)]
pub struct MigrationTally {
    /// Instances rewritten in place.
    pub updated: usize,
    /// Instances replaced under a different key, inbound references
    /// rewritten.
    pub replaced: usize,
    /// Instances removed, cascade casualties included.
    pub removed: usize,
    /// Instances whose transformation failed.
    pub failed: usize,
    /// Failure diagnostics, capped by [`MigrationOptions::max_failures`].
    pub failures: Vec<String>,
}

impl MigrationTally {
    fn record_failure(
        &mut self,
        key: &EntityKey,
        error: &Error,
        options: &MigrationOptions,
    ) -> Result<()> {
        warn!(instance = %key, %error, "instance migration failed");
        self.failed += 1;
        if self.failures.len() < options.max_failures {
            self.failures.push(format!("{key}: {error}"));
        }
        if options.fail_fast {
            return Err(Error::new(ErrorKind::InstanceMigration {
                key: key.clone(),
                message: error.to_string(),
            }));
        }
        Ok(())
    }
}

// =============================================================================
// Custom Migrations
// =============================================================================

/// An escape-hatch migration step with hand-written semantics.
///
/// Implementations mutate the type model in [`CustomMigrator::apply`] and
/// transform instances in [`CustomMigrator::migrate`], which the pipeline
/// calls once per live instance of [`CustomMigrator::target`] and its
/// subtypes. The instance under transformation is still stored, so the
/// graph argument sees the whole data set.
pub trait CustomMigrator {
    /// A short name for reports and logs.
    fn name(&self) -> &str;

    /// The entity type whose instances this migrator visits.
    fn target(&self) -> &str;

    /// Applies the schema-level change.
    ///
    /// # Errors
    ///
    /// Returns an error if the type model rejects the change.
    fn apply(&self, types: &mut EntityTypeSet) -> Result<()>;

    /// Reverses the schema-level change.
    ///
    /// # Errors
    ///
    /// Returns an irreversible-migration error unless overridden.
    fn revert(&self, types: &mut EntityTypeSet) -> Result<()> {
        let _ = types;
        Err(Error::irreversible(self.name().to_string()))
    }

    /// Whether [`CustomMigrator::revert`] is supported.
    fn reversible(&self) -> bool {
        false
    }

    /// Transforms one live instance.
    ///
    /// Returning `None` removes the instance with reference cascade, a
    /// same-key instance updates it in place, and a different-key instance
    /// replaces the original with all inbound references rewritten.
    ///
    /// # Errors
    ///
    /// Returns an error to record a per-instance failure; the pass moves
    /// on to the next instance.
    fn migrate(
        &self,
        instance: GenericEntity,
        types: &EntityTypeSet,
        graph: &GenericEntitySet,
        source: &dyn DissectorSource,
    ) -> Result<Option<GenericEntity>> {
        let _ = (types, graph, source);
        Ok(Some(instance))
    }
}

// =============================================================================
// Migrator
// =============================================================================

/// One explicit, reviewable edit to a recorded schema.
///
/// Structural variants rewrite the type model only. Data-transform
/// variants additionally visit every live instance of the targeted type
/// and its subtypes when driven through [`Migrator::run`].
#[derive(Clone)]
pub enum Migrator {
    /// Introduces a new entity type.
    EntityAdded {
        /// The complete declaration of the new type.
        definition: EntityDecl,
    },
    /// Drops an entity type, cascading its live instances first.
    EntityRemoved {
        /// The dropped type's declaration, kept so the edit can reverse.
        definition: EntityDecl,
    },
    /// Renames an entity type, moving stored instances with it.
    EntityRenamed {
        /// Current name.
        from: Name,
        /// New name.
        to: Name,
    },
    /// Introduces a new enum type.
    EnumAdded {
        /// The complete declaration of the new enum.
        definition: EnumDecl,
    },
    /// Drops an enum type that nothing references any more.
    EnumRemoved {
        /// The dropped enum's declaration, kept so the edit can reverse.
        definition: EnumDecl,
    },
    /// Renames an enum type, rewriting stored literals to match.
    EnumRenamed {
        /// Current name.
        from: Name,
        /// New name.
        to: Name,
    },
    /// Adds a value to an enum.
    EnumValueAdded {
        /// The enum to extend.
        enum_name: Name,
        /// The new value.
        value: Name,
    },
    /// Removes a value from an enum, stripping stored literals that carry
    /// it: direct fields null out, collection elements and map entries
    /// mentioning the literal are deleted.
    EnumValueRemoved {
        /// The enum to shrink.
        enum_name: Name,
        /// The removed value.
        value: Name,
    },
    /// Renames an enum value, rewriting stored literals to match.
    EnumValueRenamed {
        /// The enum holding the value.
        enum_name: Name,
        /// Current value name.
        from: Name,
        /// New value name.
        to: Name,
    },
    /// Adds a field, optionally filling existing instances with a default.
    FieldAdded {
        /// The entity gaining the field.
        entity: Name,
        /// The new field's definition.
        field: EntityField,
        /// Value stored on every existing instance, when given. Ignored
        /// for derived fields, which the linking pass fills.
        default: Option<Value>,
    },
    /// Removes a field, stripping its values from live instances first.
    FieldRemoved {
        /// The entity losing the field.
        entity: Name,
        /// The removed field's definition, kept so the edit can reverse.
        field: EntityField,
    },
    /// Renames a field, re-keying live instance values and following
    /// mapping references.
    FieldRenamed {
        /// The entity holding the field.
        entity: Name,
        /// Current field name.
        from: Name,
        /// New field name.
        to: Name,
    },
    /// Flips a field's nullability.
    NullabilityChanged {
        /// The entity holding the field.
        entity: Name,
        /// The field to change.
        field: Name,
        /// The new nullability.
        nullable: bool,
    },
    /// Moves an entity under a new super-type with a compatible identity
    /// field. Forward-only: the old super-type is not recorded.
    SuperTypeReplaced {
        /// The entity to move.
        entity: Name,
        /// The new super-type.
        to: Name,
    },
    /// Fills a missing field value on every live instance.
    DefaultValue {
        /// The entity holding the field.
        entity: Name,
        /// The field to fill.
        field: Name,
        /// The value stored where none is present.
        value: Value,
    },
    /// Rewrites field values through a value-to-value map. Collection
    /// elements and map values are rewritten individually.
    ValueMapped {
        /// The entity holding the field.
        entity: Name,
        /// The field to rewrite.
        field: Name,
        /// Old value to new value.
        mapping: BTreeMap<Value, Value>,
    },
    /// Moves a field definition from a referenced type onto the referrer;
    /// every instance copies the value from its reference target.
    PullField {
        /// The entity gaining the field.
        entity: Name,
        /// The direct reference field naming the source type.
        via: Name,
        /// The field to move.
        field: Name,
    },
    /// Moves a field definition from the referrer onto the referenced
    /// type; values follow the reference, last writer wins on shared
    /// targets.
    PushField {
        /// The entity losing the field.
        entity: Name,
        /// The direct reference field naming the destination type.
        via: Name,
        /// The field to move.
        field: Name,
    },
    /// Hoists a field definition onto the super-type. Values stay where
    /// they are; sibling instances read null.
    FieldAscended {
        /// The subtype currently declaring the field.
        entity: Name,
        /// The field to hoist.
        field: Name,
    },
    /// Pushes a field definition down to one subtype, stripping values
    /// from instances outside that subtree.
    FieldDescended {
        /// The entity currently declaring the field.
        entity: Name,
        /// The field to push down.
        field: Name,
        /// The subtype that keeps the field.
        to: Name,
    },
    /// Re-tags every exact instance of one type as another, moving
    /// storage and rewriting inbound references.
    TypeSwitched {
        /// The type whose instances move.
        from: Name,
        /// The type they become.
        to: Name,
    },
    /// A hand-written migration step.
    Custom(Arc<dyn CustomMigrator>),
}

impl Migrator {
    /// Applies the schema-level half of this edit.
    ///
    /// # Errors
    ///
    /// Returns an error if the type model rejects the edit or a
    /// non-creation migrator names an unknown target.
    pub fn apply(&self, types: &mut EntityTypeSet) -> Result<()> {
        match self {
            Self::EntityAdded { definition } => realize_entity(types, definition),
            Self::EntityRemoved { definition } => {
                types.remove_entity(definition.name.as_str())?;
                Ok(())
            }
            Self::EntityRenamed { from, to } => types.rename_entity(from.as_str(), to.clone()),
            Self::EnumAdded { definition } => realize_enum(types, definition),
            Self::EnumRemoved { definition } => {
                types.remove_enum(definition.name.as_str())?;
                Ok(())
            }
            Self::EnumRenamed { from, to } => types.rename_enum(from.as_str(), to.clone()),
            Self::EnumValueAdded { enum_name, value } => {
                types.add_enum_value(enum_name.as_str(), value.clone())
            }
            Self::EnumValueRemoved { enum_name, value } => {
                types.remove_enum_value(enum_name.as_str(), value.as_str())
            }
            Self::EnumValueRenamed {
                enum_name,
                from,
                to,
            } => types.rename_enum_value(enum_name.as_str(), from.as_str(), to.clone()),
            Self::FieldAdded { entity, field, .. } => {
                types.add_field(entity.as_str(), field.clone())
            }
            Self::FieldRemoved { entity, field } => {
                types.remove_field(entity.as_str(), field.name.as_str())?;
                Ok(())
            }
            Self::FieldRenamed { entity, from, to } => {
                types.rename_field(entity.as_str(), from.as_str(), to.clone())
            }
            Self::NullabilityChanged {
                entity,
                field,
                nullable,
            } => types.set_field_nullable(entity.as_str(), field.as_str(), *nullable),
            Self::SuperTypeReplaced { entity, to } => {
                types.set_super_type(entity.as_str(), Some(to.clone()))
            }
            Self::DefaultValue { entity, field, .. } | Self::ValueMapped { entity, field, .. } => {
                ensure_field(types, entity, field)
            }
            Self::PullField { entity, via, field } => {
                let source_type = via_target(types, entity.as_str(), via.as_str())?;
                move_field(types, source_type.as_str(), entity.as_str(), field.as_str())
            }
            Self::PushField { entity, via, field } => {
                let target_type = via_target(types, entity.as_str(), via.as_str())?;
                move_field(types, entity.as_str(), target_type.as_str(), field.as_str())
            }
            Self::FieldAscended { entity, field } => {
                let sup = super_of(types, entity.as_str())?;
                move_field(types, entity.as_str(), sup.as_str(), field.as_str())
            }
            Self::FieldDescended { entity, field, to } => {
                ensure_strict_subtype(types, entity.as_str(), to.as_str())?;
                move_field(types, entity.as_str(), to.as_str(), field.as_str())
            }
            Self::TypeSwitched { from, to } => {
                if types.entity(from.as_str()).is_none() {
                    return Err(Error::unknown_type(from.clone()));
                }
                if types.entity(to.as_str()).is_none() {
                    return Err(Error::unknown_type(to.clone()));
                }
                Ok(())
            }
            Self::Custom(custom) => custom.apply(types),
        }
    }

    /// Applies the structural inverse of this edit.
    ///
    /// # Errors
    ///
    /// Returns an irreversible-migration error for
    /// [`Migrator::SuperTypeReplaced`] and for customs that do not
    /// override [`CustomMigrator::revert`]; other failures mirror
    /// [`Migrator::apply`].
    pub fn revert(&self, types: &mut EntityTypeSet) -> Result<()> {
        match self {
            Self::EntityAdded { definition } => {
                types.remove_entity(definition.name.as_str())?;
                Ok(())
            }
            Self::EntityRemoved { definition } => realize_entity(types, definition),
            Self::EntityRenamed { from, to } => types.rename_entity(to.as_str(), from.clone()),
            Self::EnumAdded { definition } => {
                types.remove_enum(definition.name.as_str())?;
                Ok(())
            }
            Self::EnumRemoved { definition } => realize_enum(types, definition),
            Self::EnumRenamed { from, to } => types.rename_enum(to.as_str(), from.clone()),
            Self::EnumValueAdded { enum_name, value } => {
                types.remove_enum_value(enum_name.as_str(), value.as_str())
            }
            Self::EnumValueRemoved { enum_name, value } => {
                types.add_enum_value(enum_name.as_str(), value.clone())
            }
            Self::EnumValueRenamed {
                enum_name,
                from,
                to,
            } => types.rename_enum_value(enum_name.as_str(), to.as_str(), from.clone()),
            Self::FieldAdded { entity, field, .. } => {
                types.remove_field(entity.as_str(), field.name.as_str())?;
                Ok(())
            }
            Self::FieldRemoved { entity, field } => types.add_field(entity.as_str(), field.clone()),
            Self::FieldRenamed { entity, from, to } => {
                types.rename_field(entity.as_str(), to.as_str(), from.clone())
            }
            Self::NullabilityChanged {
                entity,
                field,
                nullable,
            } => types.set_field_nullable(entity.as_str(), field.as_str(), !*nullable),
            Self::SuperTypeReplaced { entity, .. } => Err(Error::irreversible(format!(
                "super-type replacement on {entity} does not record the old super-type"
            ))),
            Self::DefaultValue { entity, field, .. } | Self::ValueMapped { entity, field, .. } => {
                ensure_field(types, entity, field)
            }
            Self::PullField { entity, via, field } => {
                let source_type = via_target(types, entity.as_str(), via.as_str())?;
                move_field(types, entity.as_str(), source_type.as_str(), field.as_str())
            }
            Self::PushField { entity, via, field } => {
                let target_type = via_target(types, entity.as_str(), via.as_str())?;
                move_field(types, target_type.as_str(), entity.as_str(), field.as_str())
            }
            Self::FieldAscended { entity, field } => {
                let sup = super_of(types, entity.as_str())?;
                move_field(types, sup.as_str(), entity.as_str(), field.as_str())
            }
            Self::FieldDescended { entity, field, to } => {
                ensure_strict_subtype(types, entity.as_str(), to.as_str())?;
                move_field(types, to.as_str(), entity.as_str(), field.as_str())
            }
            Self::TypeSwitched { from, to } => {
                if types.entity(from.as_str()).is_none() {
                    return Err(Error::unknown_type(from.clone()));
                }
                if types.entity(to.as_str()).is_none() {
                    return Err(Error::unknown_type(to.clone()));
                }
                Ok(())
            }
            Self::Custom(custom) => custom.revert(types),
        }
    }

    /// Whether [`Migrator::revert`] can undo this edit.
    #[must_use]
    pub fn is_reversible(&self) -> bool {
        match self {
            Self::SuperTypeReplaced { .. } => false,
            Self::Custom(custom) => custom.reversible(),
            _ => true,
        }
    }

    /// Runs the full edit: type-model mutation plus the instance pass.
    ///
    /// Additive edits mutate the type model first so transformed
    /// instances validate against the new definitions; removals transform
    /// instances while the old definitions still resolve, then drop them.
    /// Instance failures are recorded in `tally` and the pass continues,
    /// unless `options` demands fail-fast.
    ///
    /// # Errors
    ///
    /// Returns an error if the type-model half fails, if restoring an
    /// instance after a failed reattachment fails, or if `options`
    /// escalates an instance failure.
    pub fn run(
        &self,
        types: &mut EntityTypeSet,
        graph: &mut GenericEntitySet,
        source: &dyn DissectorSource,
        options: &MigrationOptions,
        tally: &mut MigrationTally,
    ) -> Result<()> {
        debug!(migrator = %self, "running migrator");
        match self {
            Self::EntityAdded { .. }
            | Self::EnumAdded { .. }
            | Self::EnumRemoved { .. }
            | Self::EnumValueAdded { .. }
            | Self::NullabilityChanged { .. }
            | Self::FieldAscended { .. } => self.apply(types),
            Self::EntityRemoved { definition } => {
                // Probe on a clone so a rejected removal cascades nothing.
                self.apply(&mut types.clone())?;
                transform_instances(
                    types,
                    graph,
                    definition.name.as_str(),
                    options,
                    tally,
                    |_, _| Ok(None),
                )?;
                self.apply(types)
            }
            Self::EntityRenamed { from, to } => {
                types.rename_entity(from.as_str(), to.clone())?;
                tally.updated += graph.rename_type(from.as_str(), to.as_str())?;
                Ok(())
            }
            Self::EnumRenamed { from, to } => {
                self.apply(types)?;
                edit_enum_holders(types, graph, to.as_str(), options, tally, &|value| {
                    map_literals(value, &|literal| {
                        (literal.enum_name == *from)
                            .then(|| EnumLiteral::new(to.clone(), literal.value.clone()))
                    })
                })
            }
            Self::EnumValueRemoved { enum_name, value } => {
                self.apply(&mut types.clone())?;
                edit_enum_holders(types, graph, enum_name.as_str(), options, tally, &|held| {
                    strip_enum_value(held, enum_name.as_str(), value.as_str())
                })?;
                self.apply(types)
            }
            Self::EnumValueRenamed {
                enum_name,
                from,
                to,
            } => {
                self.apply(types)?;
                edit_enum_holders(types, graph, enum_name.as_str(), options, tally, &|value| {
                    map_literals(value, &|literal| {
                        (literal.enum_name == *enum_name && literal.value == *from)
                            .then(|| EnumLiteral::new(literal.enum_name.clone(), to.clone()))
                    })
                })
            }
            Self::FieldAdded {
                entity,
                field,
                default,
            } => {
                self.apply(types)?;
                let Some(value) = default else {
                    return Ok(());
                };
                if field.mapping.is_some() {
                    // derived side, filled by the linking pass
                    return Ok(());
                }
                let name = field.name.clone();
                transform_instances(
                    types,
                    graph,
                    entity.as_str(),
                    options,
                    tally,
                    move |mut instance, _| {
                        if instance.get(name.as_str()).is_none() {
                            instance.set(name.clone(), value.clone());
                        }
                        Ok(Some(instance))
                    },
                )
            }
            Self::FieldRemoved { entity, field } => {
                self.apply(&mut types.clone())?;
                let name = field.name.clone();
                transform_instances(
                    types,
                    graph,
                    entity.as_str(),
                    options,
                    tally,
                    move |mut instance, _| {
                        instance.set(name.clone(), Value::Null);
                        Ok(Some(instance))
                    },
                )?;
                self.apply(types)
            }
            Self::FieldRenamed { entity, from, to } => {
                self.apply(types)?;
                let (from, to) = (from.clone(), to.clone());
                transform_instances(
                    types,
                    graph,
                    entity.as_str(),
                    options,
                    tally,
                    move |mut instance, _| {
                        if let Some(value) = instance.set(from.clone(), Value::Null) {
                            instance.set(to.clone(), value);
                        }
                        Ok(Some(instance))
                    },
                )
            }
            Self::SuperTypeReplaced { entity, .. } => {
                self.apply(types)?;
                // Values for fields the new chain no longer declares are
                // dropped.
                let types: &EntityTypeSet = types;
                transform_instances(
                    types,
                    graph,
                    entity.as_str(),
                    options,
                    tally,
                    |mut instance, _| {
                        let stale: Vec<Name> = instance
                            .fields()
                            .filter(|(name, _)| {
                                types.field_of(instance.entity().as_str(), name).is_none()
                            })
                            .map(|(name, _)| name.clone())
                            .collect();
                        for name in stale {
                            instance.set(name, Value::Null);
                        }
                        Ok(Some(instance))
                    },
                )
            }
            Self::DefaultValue {
                entity,
                field,
                value,
            } => {
                self.apply(types)?;
                let name = field.clone();
                transform_instances(
                    types,
                    graph,
                    entity.as_str(),
                    options,
                    tally,
                    move |mut instance, _| {
                        if instance.get(name.as_str()).is_none() {
                            instance.set(name.clone(), value.clone());
                        }
                        Ok(Some(instance))
                    },
                )
            }
            Self::ValueMapped {
                entity,
                field,
                mapping,
            } => {
                self.apply(types)?;
                let name = field.clone();
                transform_instances(
                    types,
                    graph,
                    entity.as_str(),
                    options,
                    tally,
                    move |mut instance, _| {
                        let next = instance
                            .get(name.as_str())
                            .and_then(|current| remap_value(current, mapping));
                        if let Some(next) = next {
                            instance.set(name.clone(), next);
                        }
                        Ok(Some(instance))
                    },
                )
            }
            Self::PullField { entity, via, field } => {
                let source_type = via_target(types, entity.as_str(), via.as_str())?;
                self.apply(types)?;
                let (via, name) = (via.clone(), field.clone());
                transform_instances(
                    types,
                    graph,
                    entity.as_str(),
                    options,
                    tally,
                    move |mut instance, graph| {
                        let pulled = instance
                            .get(via.as_str())
                            .and_then(Value::as_ref_key)
                            .and_then(|target| graph.get(target))
                            .and_then(|target| target.get(name.as_str()))
                            .cloned();
                        if let Some(value) = pulled {
                            instance.set(name.clone(), value);
                        }
                        Ok(Some(instance))
                    },
                )?;
                // The old owner's instances lose the moved values.
                let name = field.clone();
                transform_instances(
                    types,
                    graph,
                    source_type.as_str(),
                    options,
                    tally,
                    move |mut instance, _| {
                        instance.set(name.clone(), Value::Null);
                        Ok(Some(instance))
                    },
                )
            }
            Self::PushField { entity, via, field } => {
                self.apply(types)?;
                let pushes: Vec<(EntityKey, Value)> = graph
                    .query_all(types, entity.as_str())
                    .into_iter()
                    .filter_map(|instance| {
                        let target = instance.get(via.as_str()).and_then(Value::as_ref_key)?;
                        let value = instance.get(field.as_str())?;
                        Some((target.clone(), value.clone()))
                    })
                    .collect();
                let mut written: BTreeSet<EntityKey> = BTreeSet::new();
                for (target, value) in pushes {
                    match graph.set_value(types, &target, field.as_str(), value) {
                        Ok(()) => {
                            if written.insert(target) {
                                tally.updated += 1;
                            }
                        }
                        Err(error) => tally.record_failure(&target, &error, options)?,
                    }
                }
                let name = field.clone();
                transform_instances(
                    types,
                    graph,
                    entity.as_str(),
                    options,
                    tally,
                    move |mut instance, _| {
                        instance.set(name.clone(), Value::Null);
                        Ok(Some(instance))
                    },
                )
            }
            Self::FieldDescended { entity, field, to } => {
                self.apply(types)?;
                let types: &EntityTypeSet = types;
                let (keep, name) = (to.clone(), field.clone());
                transform_instances(
                    types,
                    graph,
                    entity.as_str(),
                    options,
                    tally,
                    move |mut instance, _| {
                        if !types.is_subtype_of(instance.entity().as_str(), keep.as_str()) {
                            instance.set(name.clone(), Value::Null);
                        }
                        Ok(Some(instance))
                    },
                )
            }
            Self::TypeSwitched { from, to } => {
                self.apply(types)?;
                let doomed: Vec<EntityKey> = graph
                    .iter_exact(from.as_str())
                    .map(GenericEntity::key)
                    .collect();
                for key in doomed {
                    match graph.retag(types, &key, to.as_str()) {
                        Ok(_) => tally.replaced += 1,
                        Err(error) if matches!(error.kind, ErrorKind::Internal(_)) => {
                            return Err(error);
                        }
                        Err(error) => tally.record_failure(&key, &error, options)?,
                    }
                }
                Ok(())
            }
            Self::Custom(custom) => {
                custom.apply(types)?;
                let types: &EntityTypeSet = types;
                transform_instances(
                    types,
                    graph,
                    custom.target(),
                    options,
                    tally,
                    |instance, graph| custom.migrate(instance, types, graph, source),
                )
            }
        }
    }
}

impl fmt::Display for Migrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EntityAdded { definition } => write!(f, "entity-added {}", definition.name),
            Self::EntityRemoved { definition } => write!(f, "entity-removed {}", definition.name),
            Self::EntityRenamed { from, to } => write!(f, "entity-renamed {from} to {to}"),
            Self::EnumAdded { definition } => write!(f, "enum-added {}", definition.name),
            Self::EnumRemoved { definition } => write!(f, "enum-removed {}", definition.name),
            Self::EnumRenamed { from, to } => write!(f, "enum-renamed {from} to {to}"),
            Self::EnumValueAdded { enum_name, value } => {
                write!(f, "enum-value-added {enum_name}.{value}")
            }
            Self::EnumValueRemoved { enum_name, value } => {
                write!(f, "enum-value-removed {enum_name}.{value}")
            }
            Self::EnumValueRenamed {
                enum_name,
                from,
                to,
            } => write!(f, "enum-value-renamed {enum_name}.{from} to {to}"),
            Self::FieldAdded { entity, field, .. } => {
                write!(f, "field-added {entity}.{}", field.name)
            }
            Self::FieldRemoved { entity, field } => {
                write!(f, "field-removed {entity}.{}", field.name)
            }
            Self::FieldRenamed { entity, from, to } => {
                write!(f, "field-renamed {entity}.{from} to {to}")
            }
            Self::NullabilityChanged {
                entity,
                field,
                nullable,
            } => {
                let target = if *nullable { "nullable" } else { "required" };
                write!(f, "nullability-changed {entity}.{field} to {target}")
            }
            Self::SuperTypeReplaced { entity, to } => {
                write!(f, "super-type-replaced {entity} under {to}")
            }
            Self::DefaultValue { entity, field, .. } => {
                write!(f, "default-value {entity}.{field}")
            }
            Self::ValueMapped { entity, field, .. } => write!(f, "value-mapped {entity}.{field}"),
            Self::PullField { entity, via, field } => {
                write!(f, "field-pulled {entity}.{field} via {via}")
            }
            Self::PushField { entity, via, field } => {
                write!(f, "field-pushed {entity}.{field} via {via}")
            }
            Self::FieldAscended { entity, field } => {
                write!(f, "field-ascended {entity}.{field}")
            }
            Self::FieldDescended { entity, field, to } => {
                write!(f, "field-descended {entity}.{field} to {to}")
            }
            Self::TypeSwitched { from, to } => write!(f, "type-switched {from} to {to}"),
            Self::Custom(custom) => write!(f, "custom {} on {}", custom.name(), custom.target()),
        }
    }
}

impl fmt::Debug for Migrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Migrator({self})")
    }
}

// =============================================================================
// Instance Pipeline
// =============================================================================

/// Drives one transform over every live instance of `target` and its
/// subtypes, interpreting the outcome per instance: `None` removes with
/// cascade, a same-key result updates in place, a different-key result
/// replaces the original.
fn transform_instances<F>(
    types: &EntityTypeSet,
    graph: &mut GenericEntitySet,
    target: &str,
    options: &MigrationOptions,
    tally: &mut MigrationTally,
    mut transform: F,
) -> Result<()>
where
    F: FnMut(GenericEntity, &GenericEntitySet) -> Result<Option<GenericEntity>>,
{
    if types.entity(target).is_none() {
        return Err(Error::unknown_type(target));
    }
    let keys: Vec<EntityKey> = graph
        .query_all(types, target)
        .into_iter()
        .map(GenericEntity::key)
        .collect();
    for key in keys {
        let Some(snapshot) = graph.get(&key).cloned() else {
            // removed by an earlier cascade in this same pass
            continue;
        };
        match transform(snapshot.clone(), &*graph) {
            Ok(None) => match graph.remove(types, &key) {
                Ok(gone) => tally.removed += gone.len(),
                Err(error) => tally.record_failure(&key, &error, options)?,
            },
            Ok(Some(next)) if next.key() == key => {
                if next == snapshot {
                    continue;
                }
                match reattach(types, graph, &key, snapshot, next) {
                    Ok(()) => tally.updated += 1,
                    Err(error) if matches!(error.kind, ErrorKind::Internal(_)) => {
                        return Err(error);
                    }
                    Err(error) => tally.record_failure(&key, &error, options)?,
                }
            }
            Ok(Some(next)) => match supplant(types, graph, &key, next) {
                Ok(()) => tally.replaced += 1,
                Err(error) if matches!(error.kind, ErrorKind::Internal(_)) => return Err(error),
                Err(error) => tally.record_failure(&key, &error, options)?,
            },
            Err(error) => tally.record_failure(&key, &error, options)?,
        }
    }
    Ok(())
}

/// Swaps a stored instance for a transformed successor under the same
/// key, restoring the original if the successor is rejected.
fn reattach(
    types: &EntityTypeSet,
    graph: &mut GenericEntitySet,
    key: &EntityKey,
    snapshot: GenericEntity,
    next: GenericEntity,
) -> Result<()> {
    graph.detach(types, key)?;
    if let Err(error) = graph.attach(types, next) {
        graph
            .attach(types, snapshot)
            .map_err(|undo| Error::internal(format!("could not restore {key}: {undo}")))?;
        return Err(error);
    }
    Ok(())
}

/// Stores a transformed successor under a new key and redirects every
/// reference from the original to it, detaching the successor again if
/// the replacement is rejected.
fn supplant(
    types: &EntityTypeSet,
    graph: &mut GenericEntitySet,
    key: &EntityKey,
    next: GenericEntity,
) -> Result<()> {
    let replacement = graph.attach(types, next)?;
    if let Err(error) = graph.replace(types, key, &replacement) {
        graph.detach(types, &replacement).map_err(|undo| {
            Error::internal(format!("could not undo replacement {replacement}: {undo}"))
        })?;
        return Err(error);
    }
    Ok(())
}

// =============================================================================
// Enum Literal Rewrites
// =============================================================================

/// Runs a value edit over every field that mentions an enum, across every
/// entity type declaring such a field.
fn edit_enum_holders(
    types: &EntityTypeSet,
    graph: &mut GenericEntitySet,
    enum_name: &str,
    options: &MigrationOptions,
    tally: &mut MigrationTally,
    edit: &dyn Fn(&Value) -> Option<Value>,
) -> Result<()> {
    let mut holders: BTreeMap<Name, Vec<Name>> = BTreeMap::new();
    for (holder, field) in types.find_enum_references(enum_name) {
        holders.entry(holder).or_default().push(field);
    }
    for (holder, fields) in holders {
        transform_instances(
            types,
            graph,
            holder.as_str(),
            options,
            tally,
            |mut instance, _| {
                for field in &fields {
                    let next = instance.get(field.as_str()).and_then(edit);
                    if let Some(next) = next {
                        instance.set(field.clone(), next);
                    }
                }
                Ok(Some(instance))
            },
        )?;
    }
    Ok(())
}

/// Rewrites enum literals anywhere inside a value, returning the rebuilt
/// value only when something changed.
fn map_literals(
    value: &Value,
    rewrite: &dyn Fn(&EnumLiteral) -> Option<EnumLiteral>,
) -> Option<Value> {
    match value {
        Value::Enum(literal) => rewrite(literal).map(Value::Enum),
        Value::List(items) => {
            let mut changed = false;
            let rebuilt: Vector<Value> = items
                .iter()
                .map(|item| {
                    map_literals(item, rewrite).map_or_else(
                        || item.clone(),
                        |next| {
                            changed = true;
                            next
                        },
                    )
                })
                .collect();
            changed.then_some(Value::List(rebuilt))
        }
        Value::Map(entries) => {
            let mut changed = false;
            let mut rebuilt = OrdMap::new();
            for (key, held) in entries {
                let key = map_literals(key, rewrite).map_or_else(
                    || key.clone(),
                    |next| {
                        changed = true;
                        next
                    },
                );
                let held = map_literals(held, rewrite).map_or_else(
                    || held.clone(),
                    |next| {
                        changed = true;
                        next
                    },
                );
                rebuilt.insert(key, held);
            }
            changed.then_some(Value::Map(rebuilt))
        }
        _ => None,
    }
}

/// Strips one enum value out of a stored value: a matching literal
/// becomes null, matching collection elements and map entries are
/// deleted. Returns the rebuilt value only when something changed.
fn strip_enum_value(value: &Value, enum_name: &str, doomed: &str) -> Option<Value> {
    match value {
        Value::Enum(_) if is_doomed_literal(value, enum_name, doomed) => Some(Value::Null),
        Value::List(items) => {
            let rebuilt: Vector<Value> = items
                .iter()
                .filter(|item| !is_doomed_literal(item, enum_name, doomed))
                .cloned()
                .collect();
            (rebuilt.len() != items.len()).then_some(Value::List(rebuilt))
        }
        Value::Map(entries) => {
            let rebuilt: OrdMap<Value, Value> = entries
                .iter()
                .filter(|(key, held)| {
                    !is_doomed_literal(key, enum_name, doomed)
                        && !is_doomed_literal(held, enum_name, doomed)
                })
                .map(|(key, held)| (key.clone(), held.clone()))
                .collect();
            (rebuilt.len() != entries.len()).then_some(Value::Map(rebuilt))
        }
        _ => None,
    }
}

fn is_doomed_literal(value: &Value, enum_name: &str, doomed: &str) -> bool {
    value
        .as_enum()
        .is_some_and(|literal| literal.enum_name == enum_name && literal.value == doomed)
}

/// Rewrites scalar values, collection elements, and map values through a
/// value-to-value map. Returns the rebuilt value only when something
/// changed.
fn remap_value(value: &Value, mapping: &BTreeMap<Value, Value>) -> Option<Value> {
    match value {
        Value::List(items) => {
            let mut changed = false;
            let rebuilt: Vector<Value> = items
                .iter()
                .map(|item| {
                    mapping.get(item).map_or_else(
                        || item.clone(),
                        |next| {
                            changed = true;
                            next.clone()
                        },
                    )
                })
                .collect();
            changed.then_some(Value::List(rebuilt))
        }
        Value::Map(entries) => {
            let mut changed = false;
            let mut rebuilt = OrdMap::new();
            for (key, held) in entries {
                let held = mapping.get(held).map_or_else(
                    || held.clone(),
                    |next| {
                        changed = true;
                        next.clone()
                    },
                );
                rebuilt.insert(key.clone(), held);
            }
            changed.then_some(Value::Map(rebuilt))
        }
        scalar => mapping.get(scalar).cloned(),
    }
}

// =============================================================================
// Definition Helpers
// =============================================================================

/// Builds and inserts the entity type a bundled declaration describes.
fn realize_entity(types: &mut EntityTypeSet, definition: &EntityDecl) -> Result<()> {
    let mut entity = match &definition.super_type {
        Some(sup) => EntityType::subtype(definition.name.clone(), sup.clone()),
        None => EntityType::new(definition.name.clone()),
    };
    entity.populate(definition.fields.clone(), definition.identity.clone())?;
    types.insert_entity(entity)?;
    if let Some(path) = &definition.native {
        types.bind_native(definition.name.as_str(), path.clone())?;
    }
    Ok(())
}

/// Builds and inserts the enum type a bundled declaration describes.
fn realize_enum(types: &mut EntityTypeSet, definition: &EnumDecl) -> Result<()> {
    let mut en = EnumType::new(definition.name.clone());
    for value in &definition.values {
        en.add_value(value.clone())?;
    }
    types.insert_enum(en)?;
    if let Some(path) = &definition.native {
        types.bind_native(definition.name.as_str(), path.clone())?;
    }
    Ok(())
}

/// Moves a field definition between two entity types, putting it back if
/// the destination rejects it.
fn move_field(types: &mut EntityTypeSet, from: &str, to: &str, field: &str) -> Result<()> {
    let definition = types.remove_field(from, field)?;
    if let Err(error) = types.add_field(to, definition.clone()) {
        types
            .add_field(from, definition)
            .map_err(|undo| Error::internal(format!("could not restore {from}.{field}: {undo}")))?;
        return Err(error);
    }
    Ok(())
}

/// Resolves the entity type a direct reference field points at.
fn via_target(types: &EntityTypeSet, entity: &str, via: &str) -> Result<Name> {
    if types.entity(entity).is_none() {
        return Err(Error::unknown_type(entity));
    }
    let Some(declared) = types.field_of(entity, via) else {
        return Err(Error::unknown_field(entity, via));
    };
    match &declared.ty {
        Type::Entity(name) => Ok(name.clone()),
        other => Err(Error::invalid_definition(format!(
            "{entity}.{via} is {other}, not a direct entity reference"
        ))),
    }
}

/// Resolves an entity's super-type name.
fn super_of(types: &EntityTypeSet, entity: &str) -> Result<Name> {
    let Some(node) = types.entity(entity) else {
        return Err(Error::unknown_type(entity));
    };
    node.super_type.clone().ok_or_else(|| {
        Error::invalid_definition(format!("{entity} has no super-type to lift a field onto"))
    })
}

fn ensure_field(types: &EntityTypeSet, entity: &Name, field: &Name) -> Result<()> {
    if types.entity(entity.as_str()).is_none() {
        return Err(Error::unknown_type(entity.clone()));
    }
    if types.field_of(entity.as_str(), field.as_str()).is_none() {
        return Err(Error::unknown_field(entity.clone(), field.clone()));
    }
    Ok(())
}

fn ensure_strict_subtype(types: &EntityTypeSet, entity: &str, to: &str) -> Result<()> {
    if types.entity(to).is_none() {
        return Err(Error::unknown_type(to));
    }
    if to == entity || !types.is_subtype_of(to, entity) {
        return Err(Error::invalid_definition(format!(
            "{to} is not a proper subtype of {entity}"
        )));
    }
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
