//! Permitted-senders groups: the users allowed to send as an address.

use std::collections::BTreeSet;

use tracing::{debug, info};
use uuid::Uuid;

use super::Migrator;
use crate::directory::{child_dn, DirectoryClient, Filter};
use crate::errors::MigrateError;
use crate::models::{Attributes, EntryId, EntryKind, IdentityMap};
use crate::names::split_tokens;
use crate::source::RecordSource;
use crate::upsert::{NewEntry, Upsert};

const GROUP_DESCRIPTION: &str = "Permitted to MAIL FROM this address";

impl<S: RecordSource, D: DirectoryClient> Migrator<S, D> {
    /// Create a group for every alias whose permitted-senders column is set.
    /// Returns source address -> group DN for the groups that exist
    /// afterwards.
    pub fn migrate_permitted_senders(&mut self) -> Result<IdentityMap, MigrateError> {
        let records = self.source.permitted_senders()?;
        info!(count = records.len(), "migrating permitted senders");

        let mut groups = IdentityMap::new();
        for record in &records {
            let Some(text) = record.permitted_senders.as_deref() else {
                continue;
            };
            let senders = split_tokens(text, &['\n', ',']);
            if let Some(dn) = self.add_permitted_senders_group(&record.source, &senders)? {
                groups.insert(record.source.as_str(), dn);
            }
        }
        Ok(groups)
    }

    /// Create the permitted-senders group for `source` unless one exists.
    ///
    /// Senders that match no user entry are ignored. When none match, no
    /// group is written and `None` is returned.
    pub fn add_permitted_senders_group(
        &mut self,
        source: &str,
        senders: &[String],
    ) -> Result<Option<EntryId>, MigrateError> {
        let base = &self.bases.permitted_senders_base;
        let lookup = Filter::mail_with_class(source, "mailGroup");

        if let Some(dn) = self.upserter.find(base, &lookup)? {
            debug!(source, dn = %dn, "permitted senders group already exists");
            self.report.permitted_senders.existing += 1;
            return Ok(Some(dn));
        }

        let mut permitted = BTreeSet::new();
        for sender in senders {
            let found = self
                .upserter
                .find_all(&self.bases.users_base, &Filter::mail_with_class(sender, "mailUser"))?;
            if found.is_empty() {
                debug!(source, sender = %sender, "permitted sender is not a local user");
            }
            permitted.extend(found);
        }

        if permitted.is_empty() {
            info!(source, "no permitted sender resolves to a user, no group written");
            self.report.permitted_senders.empty += 1;
            return Ok(None);
        }

        let gid = Uuid::new_v4().to_string();
        let entry = NewEntry {
            dn: child_dn("cn", &gid, base),
            kind: EntryKind::PolicySenderGroup,
            attributes: Attributes::new()
                .with("cn", gid.as_str())
                .with("mail", source)
                .with_all("member", permitted.iter().map(String::as_str))
                .with("description", GROUP_DESCRIPTION),
        };
        info!(source, members = permitted.len(), "adding permitted senders group");

        let stats = &mut self.report.permitted_senders;
        let dn = match self.upserter.create(base, &lookup, entry)? {
            Upsert::Created(dn) => {
                stats.created += 1;
                Some(dn)
            }
            Upsert::Raced(winner) => {
                stats.raced += 1;
                winner
            }
            Upsert::Existing(dn) => {
                stats.existing += 1;
                Some(dn)
            }
        };
        Ok(dn)
    }
}
