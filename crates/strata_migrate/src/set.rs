//! Migration sets: sealed, date-keyed bundles of migrators.
//!
//! A [`MigrationSet`] is the unit of review and application: one author,
//! one date, an ordered list of [`Migrator`]s, tag predicates deciding
//! which data sets it applies to, and references to other sets that must
//! or must not already be applied. Once sealed, a set never changes;
//! registration with a version timeline seals implicitly.

use std::collections::BTreeSet;
use std::fmt;

use im::OrdSet;
use strata_foundation::{DissectorSource, Error, ErrorKind, Name, Result};
use strata_graph::GenericEntitySet;
use strata_schema::EntityTypeSet;
use time::Date;
use tracing::debug;

use crate::migrator::{MigrationOptions, MigrationTally, Migrator};

// =============================================================================
// Migration Key
// =============================================================================

/// The unique key of a migration set.
///
/// Keys order by date first, then author, so same-day sets from
/// different authors apply in a deterministic order.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct MigrationKey {
    /// The set's date.
    pub date: Date,
    /// The set's author.
    pub author: Name,
}

impl MigrationKey {
    /// Creates a key.
    #[must_use]
    pub fn new(date: Date, author: impl Into<Name>) -> Self {
        Self {
            date,
            author: author.into(),
        }
    }
}

impl fmt::Display for MigrationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.date, self.author)
    }
}

// =============================================================================
// Migration Set
// =============================================================================

/// One hand-authored bundle of schema edits.
#[derive(Clone, Debug)]
pub struct MigrationSet {
    author: Name,
    date: Date,
    description: String,
    migrators: Vec<Migrator>,
    include_tags: BTreeSet<Name>,
    exclude_tags: BTreeSet<Name>,
    requires: Vec<MigrationKey>,
    conflicts: Vec<MigrationKey>,
    sealed: bool,
}

impl MigrationSet {
    /// Creates an empty, unsealed set.
    #[must_use]
    pub fn new(author: impl Into<Name>, date: Date) -> Self {
        Self {
            author: author.into(),
            date,
            description: String::new(),
            migrators: Vec::new(),
            include_tags: BTreeSet::new(),
            exclude_tags: BTreeSet::new(),
            requires: Vec::new(),
            conflicts: Vec::new(),
            sealed: false,
        }
    }

    /// Sets the human-readable description.
    ///
    /// # Errors
    ///
    /// Returns an error if the set is sealed.
    pub fn with_description(mut self, description: impl Into<String>) -> Result<Self> {
        self.ensure_unsealed()?;
        self.description = description.into();
        Ok(self)
    }

    /// Appends a migrator; migrators run in insertion order.
    ///
    /// # Errors
    ///
    /// Returns an error if the set is sealed.
    pub fn with_migrator(mut self, migrator: Migrator) -> Result<Self> {
        self.ensure_unsealed()?;
        self.migrators.push(migrator);
        Ok(self)
    }

    /// Adds an inclusion tag; a non-empty inclusion set restricts the set
    /// to data sets carrying at least one of them.
    ///
    /// # Errors
    ///
    /// Returns an error if the set is sealed.
    pub fn with_include_tag(mut self, tag: impl Into<Name>) -> Result<Self> {
        self.ensure_unsealed()?;
        self.include_tags.insert(tag.into());
        Ok(self)
    }

    /// Adds an exclusion tag; data sets carrying it are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the set is sealed.
    pub fn with_exclude_tag(mut self, tag: impl Into<Name>) -> Result<Self> {
        self.ensure_unsealed()?;
        self.exclude_tags.insert(tag.into());
        Ok(self)
    }

    /// Names a set that must already be applied when this one runs.
    ///
    /// # Errors
    ///
    /// Returns an error if the set is sealed.
    pub fn with_requirement(mut self, key: MigrationKey) -> Result<Self> {
        self.ensure_unsealed()?;
        self.requires.push(key);
        Ok(self)
    }

    /// Names a set that must not have been applied when this one runs.
    ///
    /// # Errors
    ///
    /// Returns an error if the set is sealed.
    pub fn with_conflict(mut self, key: MigrationKey) -> Result<Self> {
        self.ensure_unsealed()?;
        self.conflicts.push(key);
        Ok(self)
    }

    /// Finalizes the set; every later mutation attempt is rejected.
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    /// The set's unique key.
    #[must_use]
    pub fn key(&self) -> MigrationKey {
        MigrationKey::new(self.date, self.author.clone())
    }

    /// The set's author.
    #[must_use]
    pub fn author(&self) -> &Name {
        &self.author
    }

    /// The set's date.
    #[must_use]
    pub fn date(&self) -> Date {
        self.date
    }

    /// The human-readable description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// The migrators in application order.
    #[must_use]
    pub fn migrators(&self) -> &[Migrator] {
        &self.migrators
    }

    /// The keys of sets that must already be applied.
    #[must_use]
    pub fn requires(&self) -> &[MigrationKey] {
        &self.requires
    }

    /// The keys of sets that must not have been applied.
    #[must_use]
    pub fn conflicts(&self) -> &[MigrationKey] {
        &self.conflicts
    }

    /// Whether the set has been sealed.
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Whether every contained migrator can be reversed.
    #[must_use]
    pub fn is_reversible(&self) -> bool {
        self.migrators.iter().all(Migrator::is_reversible)
    }

    /// Whether this set applies to a data set carrying `tags`.
    ///
    /// It applies iff the inclusion set is empty or shares at least one
    /// tag, and no exclusion tag is present.
    #[must_use]
    pub fn applies_to(&self, tags: &OrdSet<Name>) -> bool {
        let included = self.include_tags.is_empty()
            || self.include_tags.iter().any(|tag| tags.contains(tag));
        let excluded = self.exclude_tags.iter().any(|tag| tags.contains(tag));
        included && !excluded
    }

    /// Runs every migrator in order against the type model and the live
    /// graph, then validates the result and rebuilds derived fields.
    ///
    /// Validation runs once at the end, so migrators within one set may
    /// depend on each other (two added entities referencing one another,
    /// for example).
    ///
    /// # Errors
    ///
    /// Returns an error if a migrator fails, the resulting type set does
    /// not validate, or `options` escalates an instance failure.
    pub fn apply(
        &self,
        types: &mut EntityTypeSet,
        graph: &mut GenericEntitySet,
        source: &dyn DissectorSource,
        options: &MigrationOptions,
    ) -> Result<MigrationTally> {
        let mut tally = MigrationTally::default();
        for migrator in &self.migrators {
            migrator.run(types, graph, source, options, &mut tally)?;
        }
        types.validate()?;
        graph.relink(types);
        debug!(
            set = %self.key(),
            updated = tally.updated,
            replaced = tally.replaced,
            removed = tally.removed,
            failed = tally.failed,
            "applied migration set"
        );
        Ok(tally)
    }

    /// Applies only the type-model half of every migrator, in order.
    ///
    /// This drives the preflight drift check, which probes what the
    /// recorded schema will look like without touching instance data.
    ///
    /// # Errors
    ///
    /// Returns an error if a migrator fails or the resulting type set
    /// does not validate.
    pub fn apply_types(&self, types: &mut EntityTypeSet) -> Result<()> {
        for migrator in &self.migrators {
            migrator.apply(types)?;
        }
        types.validate()
    }

    /// Reverses the type-model half of every migrator, in reverse order.
    ///
    /// # Errors
    ///
    /// Returns an error if any migrator is irreversible or the resulting
    /// type set does not validate.
    pub fn revert(&self, types: &mut EntityTypeSet) -> Result<()> {
        for migrator in self.migrators.iter().rev() {
            migrator.revert(types)?;
        }
        types.validate()
    }

    fn ensure_unsealed(&self) -> Result<()> {
        if self.sealed {
            return Err(Error::new(ErrorKind::Sealed(self.key().to_string())));
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
