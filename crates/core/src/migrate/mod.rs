//! One-shot migration of users, aliases and permitted senders.
//!
//! [`Migrator::run`] executes the phases strictly in data-flow order:
//!
//! 1. Users (plus one domain marker per domain) -> email->DN map.
//! 2. Alias group shells -> alias->DN map.
//! 3. Alias membership, classified against both maps.
//! 4. Permitted-senders groups, resolved against user entries.
//!
//! The first fatal error aborts the run. Whatever was written before it stays
//! in the directory, and because every write path is idempotent a re-run
//! completes the migration.

mod aliases;
mod permitted_senders;
mod users;

pub use aliases::{classify_members, find_alias_cycles, Members};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::DirectoryBases;
use crate::directory::DirectoryClient;
use crate::errors::MigrateError;
use crate::source::RecordSource;
use crate::upsert::EntryUpserter;

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Per-phase counts of one migration run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationReport {
    pub users: UserStats,
    pub aliases: AliasStats,
    pub permitted_senders: PermittedSendersStats,
    pub started_at: String,
    pub completed_at: Option<String>,
}

impl MigrationReport {
    /// Number of entries this run added.
    pub fn entries_created(&self) -> usize {
        self.users.created
            + self.users.domains_created
            + self.aliases.created
            + self.permitted_senders.created
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserStats {
    pub created: usize,
    pub existing: usize,
    pub raced: usize,
    pub domains_created: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasStats {
    pub created: usize,
    pub existing: usize,
    pub raced: usize,
    /// Aliases whose membership was written.
    pub populated: usize,
    /// Aliases skipped in the membership phase.
    pub skipped: usize,
    /// Alias membership cycles found (accepted as-is).
    pub cycles: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermittedSendersStats {
    pub created: usize,
    pub existing: usize,
    pub raced: usize,
    /// Policies with no sender resolving to a user; no group is written.
    pub empty: usize,
}

// ---------------------------------------------------------------------------
// Migrator
// ---------------------------------------------------------------------------

/// Drives a migration from a [`RecordSource`] into a [`DirectoryClient`].
pub struct Migrator<S, D> {
    source: S,
    upserter: EntryUpserter<D>,
    bases: DirectoryBases,
    report: MigrationReport,
}

impl<S: RecordSource, D: DirectoryClient> Migrator<S, D> {
    pub fn new(source: S, directory: D, bases: DirectoryBases) -> Self {
        info!(search_base = %bases.search_base, "initializing migrator");
        Self {
            source,
            upserter: EntryUpserter::new(directory),
            bases,
            report: MigrationReport::default(),
        }
    }

    pub fn directory(&self) -> &D {
        self.upserter.directory()
    }

    pub fn into_directory(self) -> D {
        self.upserter.into_inner()
    }

    /// Counts accumulated since the last [`run`](Self::run) began.
    pub fn report(&self) -> &MigrationReport {
        &self.report
    }

    /// Execute every phase once.
    pub fn run(&mut self) -> Result<MigrationReport, MigrateError> {
        self.report = MigrationReport {
            started_at: Utc::now().to_rfc3339(),
            ..Default::default()
        };
        info!("starting migration");

        let users = self.migrate_users()?;

        let alias_records = self.source.aliases()?;
        info!(count = alias_records.len(), "migrating aliases");
        let aliases = self.create_alias_groups(&alias_records)?;
        self.report_alias_cycles(&alias_records, &users, &aliases);
        self.populate_alias_groups(&alias_records, &users, &aliases)?;

        self.migrate_permitted_senders()?;

        self.report.completed_at = Some(Utc::now().to_rfc3339());
        info!(
            created = self.report.entries_created(),
            users = users.len(),
            aliases = aliases.len(),
            "migration complete"
        );
        Ok(self.report.clone())
    }
}
