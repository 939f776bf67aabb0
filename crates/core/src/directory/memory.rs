//! In-memory [`DirectoryClient`] used by tests and for inspecting what a
//! migration would write.
//!
//! Like a real server it rejects a second add of the same DN with
//! [`AddOutcome::AlreadyExists`]. It can also hide an entry from searches to
//! reproduce the race where another writer creates an entry between our
//! lookup and our add.

use std::collections::{BTreeMap, HashSet};

use tracing::debug;

use super::{AddOutcome, DirectoryClient, Filter, SearchHit};
use crate::errors::DirectoryError;
use crate::models::{Attributes, EntryId};

/// A stored entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    pub object_classes: Vec<String>,
    pub attributes: Attributes,
}

/// Counters of write operations, useful for idempotence checks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteCounts {
    pub adds: usize,
    pub rejected_adds: usize,
    pub modifies: usize,
}

#[derive(Debug, Default)]
pub struct MemoryDirectory {
    entries: BTreeMap<EntryId, StoredEntry>,
    /// `mail` values whose entries the next matching search will not see.
    hidden_once: HashSet<String>,
    /// DNs whose add fails with a server error.
    failing_adds: HashSet<EntryId>,
    /// `mail` values whose next add is rejected as already existing.
    rejected_once: HashSet<String>,
    counts: WriteCounts,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an entry without counting it as a write.
    pub fn insert(&mut self, dn: &str, object_classes: &[&str], attributes: Attributes) {
        self.entries.insert(
            dn.to_string(),
            StoredEntry {
                object_classes: object_classes.iter().map(|c| c.to_string()).collect(),
                attributes,
            },
        );
    }

    /// Hide entries whose `mail` equals `mail` from the next search that
    /// would return them.
    pub fn hide_once(&mut self, mail: &str) {
        self.hidden_once.insert(mail.to_string());
    }

    /// Make adds of `dn` fail with a non-benign result code.
    pub fn fail_add(&mut self, dn: &str) {
        self.failing_adds.insert(dn.to_string());
    }

    /// Stop failing the adds registered with [`fail_add`](Self::fail_add).
    pub fn clear_failures(&mut self) {
        self.failing_adds.clear();
    }

    /// Reject the next add of an entry whose `mail` equals `mail` with
    /// [`AddOutcome::AlreadyExists`], as if another writer had just created
    /// it. Pair with [`hide_once`](Self::hide_once) and a seeded winner to
    /// let the follow-up lookup find it.
    pub fn reject_next_add_for_mail(&mut self, mail: &str) {
        self.rejected_once.insert(mail.to_string());
    }

    pub fn get(&self, dn: &str) -> Option<&StoredEntry> {
        self.entries.get(dn)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn counts(&self) -> WriteCounts {
        self.counts
    }

    /// All entries carrying `object_class`, keyed by DN.
    pub fn entries_of_class(&self, object_class: &str) -> Vec<(&str, &StoredEntry)> {
        self.entries
            .iter()
            .filter(|(_, e)| {
                e.object_classes
                    .iter()
                    .any(|c| c.eq_ignore_ascii_case(object_class))
            })
            .map(|(dn, e)| (dn.as_str(), e))
            .collect()
    }

    /// Entries whose `mail` attribute contains `mail`.
    pub fn find_by_mail(&self, mail: &str) -> Vec<(&str, &StoredEntry)> {
        self.entries
            .iter()
            .filter(|(_, e)| {
                e.attributes
                    .get("mail")
                    .is_some_and(|values| values.contains(mail))
            })
            .map(|(dn, e)| (dn.as_str(), e))
            .collect()
    }
}

/// Subtree scope: the base itself or anything below it.
fn in_subtree(dn: &str, base: &str) -> bool {
    let dn = dn.to_ascii_lowercase();
    let base = base.to_ascii_lowercase();
    dn == base || dn.ends_with(&format!(",{base}"))
}

impl DirectoryClient for MemoryDirectory {
    fn search(&mut self, base: &str, filter: &Filter) -> Result<Vec<SearchHit>, DirectoryError> {
        let mut hits = Vec::new();
        let mut revealed = Vec::new();

        for (dn, entry) in &self.entries {
            if !in_subtree(dn, base) || !filter.matches(&entry.object_classes, &entry.attributes) {
                continue;
            }
            let hidden = entry
                .attributes
                .get("mail")
                .and_then(|values| values.iter().find(|m| self.hidden_once.contains(*m)));
            if let Some(mail) = hidden {
                revealed.push(mail.clone());
                continue;
            }
            hits.push(SearchHit {
                dn: dn.clone(),
                attributes: entry.attributes.clone(),
            });
        }

        for mail in revealed {
            self.hidden_once.remove(&mail);
        }
        debug!(base, filter = %filter, hits = hits.len(), "memory directory search");
        Ok(hits)
    }

    fn add(
        &mut self,
        dn: &str,
        object_classes: &[&str],
        attributes: &Attributes,
    ) -> Result<AddOutcome, DirectoryError> {
        if self.failing_adds.contains(dn) {
            return Err(DirectoryError::OperationFailed {
                op: "add",
                dn: dn.to_string(),
                rc: 53,
                text: "unwilling to perform".into(),
            });
        }
        let raced = attributes
            .get("mail")
            .and_then(|values| values.iter().find(|m| self.rejected_once.contains(*m)))
            .cloned();
        if let Some(mail) = raced {
            self.rejected_once.remove(&mail);
            self.counts.rejected_adds += 1;
            return Ok(AddOutcome::AlreadyExists);
        }
        if self.entries.contains_key(dn) {
            self.counts.rejected_adds += 1;
            return Ok(AddOutcome::AlreadyExists);
        }

        self.counts.adds += 1;
        self.insert(dn, object_classes, attributes.clone());
        Ok(AddOutcome::Added)
    }

    fn modify(&mut self, dn: &str, replacements: &Attributes) -> Result<(), DirectoryError> {
        let entry = self
            .entries
            .get_mut(dn)
            .ok_or_else(|| DirectoryError::NoSuchEntry(dn.to_string()))?;
        entry.attributes.replace_from(replacements);
        self.counts.modifies += 1;
        Ok(())
    }
}
