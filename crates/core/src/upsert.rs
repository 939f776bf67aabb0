//! Find-or-create of directory entries keyed by a natural key.
//!
//! Convergence is create-only: an entry found by its lookup filter is
//! returned untouched. Between the lookup and the add another writer may
//! create the same entry; the store rejects our add as "already exists",
//! which is treated as success.

use tracing::{debug, info, warn};

use crate::directory::{AddOutcome, DirectoryClient, Filter};
use crate::errors::DirectoryError;
use crate::models::{Attributes, EntryId, EntryKind};

/// An entry ready to be added.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEntry {
    pub dn: EntryId,
    pub kind: EntryKind,
    pub attributes: Attributes,
}

/// How an entry came to exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Upsert {
    /// The lookup found it; nothing was written.
    Existing(EntryId),
    /// This call added it.
    Created(EntryId),
    /// The add lost a race with another writer. Holds the winner's id when
    /// a second lookup could find it.
    Raced(Option<EntryId>),
}

impl Upsert {
    pub fn into_id(self) -> Option<EntryId> {
        match self {
            Self::Existing(id) | Self::Created(id) => Some(id),
            Self::Raced(id) => id,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

/// Owns the directory client and applies the find-or-create policy.
pub struct EntryUpserter<D> {
    dir: D,
}

impl<D: DirectoryClient> EntryUpserter<D> {
    pub fn new(dir: D) -> Self {
        Self { dir }
    }

    pub fn directory(&self) -> &D {
        &self.dir
    }

    pub fn into_inner(self) -> D {
        self.dir
    }

    /// DN of the first entry under `base` matching `filter`.
    pub fn find(&mut self, base: &str, filter: &Filter) -> Result<Option<EntryId>, DirectoryError> {
        let hits = self.dir.search(base, filter)?;
        if hits.len() > 1 {
            warn!(base, filter = %filter, count = hits.len(), "lookup matched several entries, using the first");
        }
        Ok(hits.into_iter().next().map(|hit| hit.dn))
    }

    /// DNs of every entry under `base` matching `filter`.
    pub fn find_all(&mut self, base: &str, filter: &Filter) -> Result<Vec<EntryId>, DirectoryError> {
        Ok(self
            .dir
            .search(base, filter)?
            .into_iter()
            .map(|hit| hit.dn)
            .collect())
    }

    /// Return the entry under `base` matching `lookup`, or add the entry
    /// produced by `build`.
    ///
    /// `build` runs only when the lookup finds nothing, so identifiers and
    /// attribute values are only generated for entries actually added.
    pub fn find_or_create<E, F>(&mut self, base: &str, lookup: &Filter, build: F) -> Result<Upsert, E>
    where
        F: FnOnce() -> Result<NewEntry, E>,
        E: From<DirectoryError>,
    {
        if let Some(dn) = self.find(base, lookup)? {
            debug!(dn = %dn, filter = %lookup, "entry already present");
            return Ok(Upsert::Existing(dn));
        }
        let entry = build()?;
        Ok(self.create(base, lookup, entry)?)
    }

    /// Add `entry`; on "already exists" repeat the lookup once to learn the
    /// id of whoever created it.
    pub fn create(&mut self, base: &str, lookup: &Filter, entry: NewEntry) -> Result<Upsert, DirectoryError> {
        match self.add(&entry)? {
            AddOutcome::Added => {
                info!(kind = %entry.kind, dn = %entry.dn, "created entry");
                Ok(Upsert::Created(entry.dn))
            }
            AddOutcome::AlreadyExists => {
                let winner = self.find(base, lookup)?;
                warn!(
                    kind = %entry.kind,
                    dn = %entry.dn,
                    winner = winner.as_deref().unwrap_or("<not found>"),
                    "entry was created concurrently"
                );
                Ok(Upsert::Raced(winner))
            }
        }
    }

    /// Side-effect-only create: add `entry` unless it already exists.
    /// Returns whether this call added it.
    pub fn ensure(&mut self, entry: &NewEntry) -> Result<bool, DirectoryError> {
        match self.add(entry)? {
            AddOutcome::Added => {
                info!(kind = %entry.kind, dn = %entry.dn, "created entry");
                Ok(true)
            }
            AddOutcome::AlreadyExists => {
                debug!(kind = %entry.kind, dn = %entry.dn, "entry already exists");
                Ok(false)
            }
        }
    }

    /// Replace the named attributes of an existing entry.
    pub fn replace(&mut self, dn: &str, replacements: &Attributes) -> Result<(), DirectoryError> {
        self.dir.modify(dn, replacements)
    }

    fn add(&mut self, entry: &NewEntry) -> Result<AddOutcome, DirectoryError> {
        self.dir
            .add(&entry.dn, entry.kind.object_classes(), &entry.attributes)
    }
}
