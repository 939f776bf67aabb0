//! Alias groups, created in two phases.
//!
//! Aliases may list other aliases as members, including ones not created
//! yet. Phase one therefore creates an empty group for every alias, and
//! phase two writes membership once every group has an id.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::{debug, info, warn};
use uuid::Uuid;

use super::Migrator;
use crate::directory::{child_dn, DirectoryClient, Filter};
use crate::errors::{DirectoryError, MigrateError};
use crate::models::{AliasRecord, Attributes, EntryId, EntryKind, IdentityMap};
use crate::names::split_tokens;
use crate::source::RecordSource;
use crate::upsert::{NewEntry, Upsert};

/// Members of one alias, split by category.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Members {
    /// DNs of local users and local aliases (`member`).
    pub internal: BTreeSet<EntryId>,
    /// Addresses outside the directory (`rfc822MailMember`).
    pub external: BTreeSet<String>,
}

impl Members {
    pub fn is_empty(&self) -> bool {
        self.internal.is_empty() && self.external.is_empty()
    }

    /// Attribute replacements for the alias entry. An empty category is left
    /// out rather than written as an empty list.
    pub fn to_replacements(&self) -> Attributes {
        Attributes::new()
            .with_all("member", self.internal.iter().map(String::as_str))
            .with_all("rfc822MailMember", self.external.iter().map(String::as_str))
    }
}

/// Classify every address of a comma-separated destination list. Users take
/// precedence over aliases; anything in neither map is external.
pub fn classify_members(destination: &str, users: &IdentityMap, aliases: &IdentityMap) -> Members {
    let mut members = Members::default();
    for address in split_tokens(destination, &[',']) {
        match users.get(&address).or_else(|| aliases.get(&address)) {
            Some(id) => {
                members.internal.insert(id.to_string());
            }
            None => {
                members.external.insert(address);
            }
        }
    }
    members
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    OnPath,
    Done,
}

/// Cycles in alias-to-alias membership, each listed from the alias where
/// the walk entered it. An alias listing itself is a cycle of one.
pub fn find_alias_cycles(
    records: &[AliasRecord],
    users: &IdentityMap,
    aliases: &IdentityMap,
) -> Vec<Vec<String>> {
    let graph: BTreeMap<&str, Vec<String>> = records
        .iter()
        .map(|record| {
            let targets = split_tokens(&record.destination, &[','])
                .into_iter()
                .filter(|address| !users.contains(address) && aliases.contains(address))
                .collect();
            (record.source.as_str(), targets)
        })
        .collect();

    let mut marks = HashMap::new();
    let mut path = Vec::new();
    let mut cycles = Vec::new();
    for start in graph.keys() {
        walk(start, &graph, &mut marks, &mut path, &mut cycles);
    }
    cycles
}

fn walk<'a>(
    node: &'a str,
    graph: &'a BTreeMap<&'a str, Vec<String>>,
    marks: &mut HashMap<&'a str, Mark>,
    path: &mut Vec<&'a str>,
    cycles: &mut Vec<Vec<String>>,
) {
    match marks.get(node) {
        Some(Mark::Done) => return,
        Some(Mark::OnPath) => {
            if let Some(pos) = path.iter().position(|n| *n == node) {
                cycles.push(path[pos..].iter().map(|n| n.to_string()).collect());
            }
            return;
        }
        None => {}
    }

    marks.insert(node, Mark::OnPath);
    path.push(node);
    if let Some(targets) = graph.get(node) {
        for target in targets {
            walk(target, graph, marks, path, cycles);
        }
    }
    path.pop();
    marks.insert(node, Mark::Done);
}

fn alias_group_entry(aliases_base: &str, source: &str) -> NewEntry {
    let cn = Uuid::new_v4().to_string();
    NewEntry {
        dn: child_dn("cn", &cn, aliases_base),
        kind: EntryKind::AliasGroup,
        attributes: Attributes::new()
            .with("cn", cn)
            .with("mail", source)
            .with("description", format!("Mail group {source}")),
    }
}

impl<S: RecordSource, D: DirectoryClient> Migrator<S, D> {
    /// Phase one: find or create an empty group for every alias with a
    /// destination. Returns the alias->DN map.
    pub fn create_alias_groups(
        &mut self,
        records: &[AliasRecord],
    ) -> Result<IdentityMap, MigrateError> {
        let mut aliases = IdentityMap::new();
        let base = &self.bases.aliases_base;

        for record in records.iter().filter(|r| !r.destination.is_empty()) {
            let lookup = Filter::mail_with_class(&record.source, "mailGroup");
            let upsert = self
                .upserter
                .find_or_create::<DirectoryError, _>(base, &lookup, || {
                    info!(alias = %record.source, "adding alias");
                    Ok(alias_group_entry(base, &record.source))
                })?;

            let stats = &mut self.report.aliases;
            match &upsert {
                Upsert::Existing(dn) => {
                    info!(alias = %record.source, dn = %dn, "alias already exists");
                    stats.existing += 1;
                }
                Upsert::Created(_) => stats.created += 1,
                Upsert::Raced(_) => stats.raced += 1,
            }
            if let Some(dn) = upsert.into_id() {
                aliases.insert(record.source.as_str(), dn);
            }
        }
        Ok(aliases)
    }

    /// Log alias membership cycles. They are valid directory-level
    /// recursion and are written unchanged.
    pub fn report_alias_cycles(
        &mut self,
        records: &[AliasRecord],
        users: &IdentityMap,
        aliases: &IdentityMap,
    ) {
        let cycles = find_alias_cycles(records, users, aliases);
        for cycle in &cycles {
            warn!(cycle = %cycle.join(" -> "), "alias membership cycle");
        }
        self.report.aliases.cycles = cycles.len();
    }

    /// Phase two: replace the membership of every alias group with its
    /// classified destination list.
    pub fn populate_alias_groups(
        &mut self,
        records: &[AliasRecord],
        users: &IdentityMap,
        aliases: &IdentityMap,
    ) -> Result<(), MigrateError> {
        for record in records {
            let Some(alias_dn) = aliases.get(&record.source) else {
                if !record.destination.is_empty() {
                    warn!(alias = %record.source, "alias group has no known id, membership not written");
                }
                self.report.aliases.skipped += 1;
                continue;
            };

            let members = classify_members(&record.destination, users, aliases);
            if members.is_empty() {
                debug!(alias = %record.source, "destination lists no addresses");
                self.report.aliases.skipped += 1;
                continue;
            }

            info!(
                alias = %record.source,
                internal = members.internal.len(),
                external = members.external.len(),
                "populating alias group"
            );
            self.upserter.replace(alias_dn, &members.to_replacements())?;
            self.report.aliases.populated += 1;
        }
        Ok(())
    }
}
