//! The version timeline: rolling a recorded schema forward.
//!
//! [`VersionSupport`] owns the recorded type set and the registered
//! migration sets keyed by (date, author). An update runs in two phases:
//!
//! 1. Preflight: apply every pending set's type-model half to a clone of
//!    the recorded schema and diff the result against the schema declared
//!    by live code. Any residual difference is unexplained drift, and the
//!    update refuses to run; migrations are hand-authored, never guessed.
//! 2. Commit: after checking ordering preconditions across the whole
//!    pending run, apply each set to the real type set and graph in key
//!    order, stamping the version date and collecting per-set counts.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write;

use im::OrdSet;
use strata_foundation::{DissectorSource, Error, ErrorKind, Name, Result};
use strata_graph::GenericEntitySet;
use strata_schema::{EntityTypeSet, diff_sets};
use time::Date;
use tracing::info;

use crate::migrator::MigrationOptions;
use crate::set::{MigrationKey, MigrationSet};

// =============================================================================
// Rollforward Report
// =============================================================================

/// Counts and diagnostics for one applied migration set.
#[derive(Clone, Debug)]
pub struct AppliedSet {
    /// The set's author.
    pub author: Name,
    /// The set's date, now the recorded version.
    pub date: Date,
    /// The set's description.
    pub description: String,
    /// Instances rewritten in place.
    pub updated: usize,
    /// Instances replaced under a different key.
    pub replaced: usize,
    /// Instances removed, cascade casualties included.
    pub removed: usize,
    /// Instances whose transformation failed.
    pub failed: usize,
    /// Retained per-instance failure diagnostics.
    pub failures: Vec<String>,
}

/// The outcome of one rollforward.
#[derive(Clone, Debug, Default)]
pub struct RollforwardReport {
    /// Every applied set, in application order.
    pub applied: Vec<AppliedSet>,
}

impl RollforwardReport {
    /// Renders the per-set counts as diagnostic text for batch callers.
    #[must_use]
    pub fn summary(&self) -> String {
        if self.applied.is_empty() {
            return String::from("no migration sets applied");
        }
        let mut out = String::new();
        for set in &self.applied {
            let _ = write!(
                out,
                "{}/{}: {} updated, {} replaced, {} removed, {} failed",
                set.date, set.author, set.updated, set.replaced, set.removed, set.failed
            );
            if !set.description.is_empty() {
                let _ = write!(out, " ({})", set.description);
            }
            let _ = writeln!(out);
            for failure in &set.failures {
                let _ = writeln!(out, "  {failure}");
            }
        }
        out
    }
}

// =============================================================================
// Version Support
// =============================================================================

/// A recorded type set plus the ordered migration sets that evolve it.
#[derive(Clone, Debug, Default)]
pub struct VersionSupport {
    types: EntityTypeSet,
    registered: BTreeMap<MigrationKey, MigrationSet>,
    tags: OrdSet<Name>,
}

impl VersionSupport {
    /// Wraps a recorded type set with an empty timeline.
    #[must_use]
    pub fn new(recorded: EntityTypeSet) -> Self {
        Self {
            types: recorded,
            registered: BTreeMap::new(),
            tags: OrdSet::new(),
        }
    }

    /// Adds a free-form tag describing the data set, consulted by each
    /// migration set's applicability predicate.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<Name>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// The data set's tags.
    #[must_use]
    pub fn tags(&self) -> &OrdSet<Name> {
        &self.tags
    }

    /// The recorded type set in its current state.
    #[must_use]
    pub fn types(&self) -> &EntityTypeSet {
        &self.types
    }

    /// The recorded version date, equal to the date of the last applied
    /// migration set.
    #[must_use]
    pub fn version(&self) -> Option<Date> {
        self.types.version()
    }

    /// Seals a migration set and adds it to the timeline.
    ///
    /// # Errors
    ///
    /// Returns an error if a set with the same (date, author) key is
    /// already registered.
    pub fn register(&mut self, mut set: MigrationSet) -> Result<()> {
        set.seal();
        let key = set.key();
        if self.registered.contains_key(&key) {
            return Err(Error::new(ErrorKind::DuplicateMigration(key.to_string())));
        }
        self.registered.insert(key, set);
        Ok(())
    }

    /// Every registered set, in key order.
    pub fn registered(&self) -> impl Iterator<Item = &MigrationSet> {
        self.registered.values()
    }

    /// The registered sets still to be applied: dated after the recorded
    /// version and applicable to this data set's tags, in key order.
    /// Sets dated at or before the recorded version count as already
    /// applied.
    #[must_use]
    pub fn pending(&self) -> Vec<&MigrationSet> {
        let version = self.types.version();
        self.registered
            .values()
            .filter(|set| version.is_none_or(|version| set.date() > version))
            .filter(|set| set.applies_to(&self.tags))
            .collect()
    }

    /// Rolls the recorded schema and the live graph forward to the
    /// declared schema.
    ///
    /// # Errors
    ///
    /// Returns an unexplained-drift error, committing nothing, if the
    /// pending sets do not explain every difference between the recorded
    /// and declared schemas. Returns an ordering error, committing
    /// nothing, if a pending set's requirements or conflicts are not
    /// satisfied. Migrator failures during commit surface as errors after
    /// the sets already applied have been stamped.
    pub fn update(
        &mut self,
        declared: &EntityTypeSet,
        graph: &mut GenericEntitySet,
        source: &dyn DissectorSource,
        options: &MigrationOptions,
    ) -> Result<RollforwardReport> {
        // Phase 1: preflight. Prove the pending sets explain every
        // difference before touching anything.
        let mut probe = self.types.clone();
        for set in self.pending() {
            set.apply_types(&mut probe)?;
        }
        let diff = diff_sets(&probe, declared);
        if !diff.is_empty() {
            return Err(Error::drift(diff.to_string()));
        }

        // Phase 2: check ordering preconditions across the whole run.
        let pending: Vec<MigrationSet> = self.pending().into_iter().cloned().collect();
        let applied_keys: BTreeSet<MigrationKey> = self
            .registered
            .keys()
            .filter(|key| {
                self.types
                    .version()
                    .is_some_and(|version| key.date <= version)
            })
            .cloned()
            .collect();
        let mut will_apply = applied_keys;
        for set in &pending {
            for required in set.requires() {
                if !will_apply.contains(required) {
                    return Err(Error::new(ErrorKind::MissingPrerequisite {
                        set: set.key().to_string(),
                        missing: required.to_string(),
                    }));
                }
            }
            for conflict in set.conflicts() {
                if will_apply.contains(conflict) {
                    return Err(Error::new(ErrorKind::ConflictingMigration {
                        set: set.key().to_string(),
                        applied: conflict.to_string(),
                    }));
                }
            }
            will_apply.insert(set.key());
        }

        // Phase 3: commit set by set, stamping the version after each so
        // an aborted run resumes where it stopped.
        let mut report = RollforwardReport::default();
        for set in pending {
            let tally = set.apply(&mut self.types, graph, source, options)?;
            self.types.set_version(Some(set.date()));
            info!(
                set = %set.key(),
                updated = tally.updated,
                replaced = tally.replaced,
                removed = tally.removed,
                failed = tally.failed,
                "rolled forward"
            );
            report.applied.push(AppliedSet {
                author: set.author().clone(),
                date: set.date(),
                description: set.description().to_string(),
                updated: tally.updated,
                replaced: tally.replaced,
                removed: tally.removed,
                failed: tally.failed,
                failures: tally.failures,
            });
        }
        Ok(report)
    }
}

// =============================================================================
// Tests
// =============================================================================
