//! User entries and domain markers.

use std::collections::HashSet;

use tracing::{info, warn};
use uuid::Uuid;

use super::Migrator;
use crate::directory::{child_dn, DirectoryClient, Filter};
use crate::errors::MigrateError;
use crate::models::{Attributes, EntryId, EntryKind, IdentityMap, UserRecord};
use crate::names::{common_name_from_email, split_address, surname_of, transcode_password_hash};
use crate::source::RecordSource;
use crate::upsert::{NewEntry, Upsert};

impl<S: RecordSource, D: DirectoryClient> Migrator<S, D> {
    /// Migrate every user and return the email->DN map, including users that
    /// were already in the directory.
    pub fn migrate_users(&mut self) -> Result<IdentityMap, MigrateError> {
        let records = self.source.users()?;
        info!(count = records.len(), "migrating users");

        let mut users = IdentityMap::new();
        let mut domains = HashSet::new();
        for record in &records {
            if let Some(dn) = self.add_user(record, None)? {
                users.insert(record.email.as_str(), dn);
            }
            if let (_, Some(domain)) = split_address(&record.email) {
                if domains.insert(domain.to_string()) {
                    self.ensure_domain(domain)?;
                }
            } else {
                warn!(email = %record.email, "address has no domain part, no domain marker written");
            }
        }
        Ok(users)
    }

    /// Find or create the entry for one user.
    ///
    /// `common_name` overrides the display-name lookup. Returns `None` only
    /// when a concurrent writer created the user and it could not be found
    /// again.
    pub fn add_user(
        &mut self,
        record: &UserRecord,
        common_name: Option<&str>,
    ) -> Result<Option<EntryId>, MigrateError> {
        let lookup = Filter::mail_with_class(&record.email, "mailUser");
        let source = &self.source;
        let users_base = &self.bases.users_base;

        let upsert = self
            .upserter
            .find_or_create(&self.bases.search_base, &lookup, || {
                info!(email = %record.email, "adding user");
                build_user_entry(source, users_base, record, common_name)
            })?;

        let stats = &mut self.report.users;
        match &upsert {
            Upsert::Existing(dn) => {
                info!(email = %record.email, dn = %dn, "user already exists");
                stats.existing += 1;
            }
            Upsert::Created(_) => stats.created += 1,
            Upsert::Raced(_) => stats.raced += 1,
        }
        Ok(upsert.into_id())
    }

    /// Make sure the marker entry for `domain` exists. It is never updated.
    fn ensure_domain(&mut self, domain: &str) -> Result<(), MigrateError> {
        let marker = NewEntry {
            dn: child_dn("dc", domain, &self.bases.domains_base),
            kind: EntryKind::Domain,
            attributes: Attributes::new()
                .with("dc", domain)
                .with("businessCategory", "mail"),
        };
        if self.upserter.ensure(&marker)? {
            self.report.users.domains_created += 1;
        }
        Ok(())
    }
}

fn build_user_entry<S: RecordSource>(
    source: &S,
    users_base: &str,
    record: &UserRecord,
    common_name: Option<&str>,
) -> Result<NewEntry, MigrateError> {
    let uid = Uuid::new_v4().to_string();

    let mut attributes = Attributes::new()
        .with("mail", record.email.as_str())
        .with("maildrop", record.email.as_str())
        .with("uid", uid.as_str())
        .with("userPassword", transcode_password_hash(&record.password_hash))
        .with_all("mailaccess", record.privileges.iter().map(String::as_str));

    let cn = match common_name {
        Some(cn) => cn.to_string(),
        None => match source.display_name(&record.email)? {
            Some(name) => {
                attributes.set("displayName", name.as_str());
                name
            }
            None => common_name_from_email(&record.email),
        },
    };
    let surname = surname_of(&cn);
    if surname.is_empty() {
        warn!(
            email = %record.email,
            cn = %cn,
            "common name has no surname part, writing an empty sn"
        );
    }
    attributes.set("sn", surname);
    attributes.set("cn", cn);

    Ok(NewEntry {
        dn: child_dn("uid", &uid, users_base),
        kind: EntryKind::User,
        attributes,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use tracing_subscriber::fmt::MakeWriter;

    use crate::config::DirectoryBases;
    use crate::directory::MemoryDirectory;
    use crate::migrate::Migrator;
    use crate::models::Attributes;
    use crate::source::MemorySource;

    fn migrator(source: MemorySource) -> Migrator<MemorySource, MemoryDirectory> {
        Migrator::new(source, MemoryDirectory::new(), DirectoryBases::under("dc=mailinabox"))
    }

    fn user_attrs<'a>(m: &'a Migrator<MemorySource, MemoryDirectory>, dn: &str) -> &'a Attributes {
        &m.directory().get(dn).expect("user entry").attributes
    }

    #[test]
    fn test_user_entry_attributes() {
        let source = MemorySource::new().with_user(
            "jane.doe@x.com",
            "{SHA512-CRYPT}$6$salt$hash",
            "admin\nadmin\n\n",
        );
        let mut m = migrator(source);

        let users = m.migrate_users().unwrap();
        let dn = users.get("jane.doe@x.com").unwrap().to_string();
        assert!(dn.starts_with("uid="));
        assert!(dn.ends_with(",ou=Users,dc=mailinabox"));

        let attrs = user_attrs(&m, &dn);
        assert_eq!(attrs.first("mail"), Some("jane.doe@x.com"));
        assert_eq!(attrs.first("maildrop"), Some("jane.doe@x.com"));
        assert_eq!(attrs.first("userPassword"), Some("{CRYPT}$6$salt$hash"));
        assert_eq!(attrs.get("mailaccess").unwrap().len(), 1);
        assert_eq!(attrs.first("cn"), Some("jane doe"));
        assert_eq!(attrs.first("sn"), Some("doe"));
        assert!(attrs.get("displayName").is_none());
        assert_eq!(
            dn,
            format!("uid={},ou=Users,dc=mailinabox", attrs.first("uid").unwrap())
        );

        let entry = m.directory().get(&dn).unwrap();
        assert!(entry.object_classes.iter().any(|c| c == "inetOrgPerson"));
    }

    #[test]
    fn test_display_name_preferred_over_local_part() {
        let source = MemorySource::new()
            .with_user("jd@x.com", "{BLF-CRYPT}$2y$05$abc", "")
            .with_display_name("jd@x.com", "Jane Q Doe");
        let mut m = migrator(source);

        let users = m.migrate_users().unwrap();
        let attrs = user_attrs(&m, users.get("jd@x.com").unwrap());
        assert_eq!(attrs.first("cn"), Some("Jane Q Doe"));
        assert_eq!(attrs.first("displayName"), Some("Jane Q Doe"));
        assert_eq!(attrs.first("sn"), Some("Q Doe"));
        assert_eq!(attrs.first("userPassword"), Some("{BLF-CRYPT}$2y$05$abc"));
        assert!(attrs.get("mailaccess").is_none());
    }

    #[test]
    fn test_explicit_common_name_wins() {
        let source = MemorySource::new().with_display_name("jd@x.com", "From Webmail");
        let mut m = migrator(source);
        let record = crate::models::UserRecord {
            email: "jd@x.com".into(),
            password_hash: "{SHA512-CRYPT}x".into(),
            privileges: Default::default(),
        };

        let dn = m.add_user(&record, Some("Explicit")).unwrap().unwrap();
        let attrs = user_attrs(&m, &dn);
        assert_eq!(attrs.first("cn"), Some("Explicit"));
        assert_eq!(attrs.first("sn"), Some(""));
        assert!(attrs.get("displayName").is_none());
    }

    #[test]
    fn test_existing_user_is_skipped() {
        let mut dir = MemoryDirectory::new();
        dir.insert(
            "uid=existing,ou=Users,dc=mailinabox",
            &["inetOrgPerson", "mailUser", "shadowAccount"],
            Attributes::new().with("mail", "a@x.com").with("cn", "Kept"),
        );
        let source = MemorySource::new().with_user("a@x.com", "{SHA512-CRYPT}new", "");
        let mut m = Migrator::new(source, dir, DirectoryBases::under("dc=mailinabox"));

        let users = m.migrate_users().unwrap();

        assert_eq!(users.get("a@x.com"), Some("uid=existing,ou=Users,dc=mailinabox"));
        assert_eq!(m.report().users.existing, 1);
        assert_eq!(m.report().users.created, 0);
        let attrs = user_attrs(&m, "uid=existing,ou=Users,dc=mailinabox");
        assert_eq!(attrs.first("cn"), Some("Kept"));
        assert!(attrs.get("userPassword").is_none());
    }

    #[test]
    fn test_one_domain_marker_per_domain() {
        let source = MemorySource::new()
            .with_user("a@x.com", "h", "")
            .with_user("b@x.com", "h", "")
            .with_user("c@y.org", "h", "");
        let mut m = migrator(source);

        m.migrate_users().unwrap();

        let domains = m.directory().entries_of_class("domain");
        let dns: Vec<_> = domains.iter().map(|(dn, _)| *dn).collect();
        assert_eq!(
            dns,
            vec!["dc=x.com,ou=domains,dc=mailinabox", "dc=y.org,ou=domains,dc=mailinabox"]
        );
        assert_eq!(domains[0].1.attributes.first("businessCategory"), Some("mail"));
        assert_eq!(m.report().users.domains_created, 2);
        assert_eq!(m.report().users.created, 3);
    }

    #[test]
    fn test_existing_domain_marker_is_left_alone() {
        let mut dir = MemoryDirectory::new();
        dir.insert(
            "dc=x.com,ou=domains,dc=mailinabox",
            &["domain"],
            Attributes::new().with("businessCategory", "other"),
        );
        let source = MemorySource::new().with_user("a@x.com", "h", "");
        let mut m = Migrator::new(source, dir, DirectoryBases::under("dc=mailinabox"));

        m.migrate_users().unwrap();

        let marker = m.directory().get("dc=x.com,ou=domains,dc=mailinabox").unwrap();
        assert_eq!(marker.attributes.first("businessCategory"), Some("other"));
        assert_eq!(m.report().users.domains_created, 0);
    }

    #[test]
    fn test_lost_race_returns_winning_user() {
        let winner = "uid=winner,ou=Users,dc=mailinabox";
        let mut dir = MemoryDirectory::new();
        dir.insert(
            winner,
            &["inetOrgPerson", "mailUser", "shadowAccount"],
            Attributes::new().with("mail", "a@x.com"),
        );
        dir.hide_once("a@x.com");
        dir.reject_next_add_for_mail("a@x.com");
        let source = MemorySource::new().with_user("a@x.com", "h", "");
        let mut m = Migrator::new(source, dir, DirectoryBases::under("dc=mailinabox"));

        let users = m.migrate_users().unwrap();

        assert_eq!(users.get("a@x.com"), Some(winner));
        assert_eq!(m.report().users.raced, 1);
        assert_eq!(m.report().users.created, 0);
        assert_eq!(m.directory().entries_of_class("mailUser").len(), 1);
    }

    #[test]
    fn test_lost_race_without_winner_does_not_abort() {
        let mut dir = MemoryDirectory::new();
        dir.reject_next_add_for_mail("a@x.com");
        let source = MemorySource::new()
            .with_user("a@x.com", "h", "")
            .with_user("b@x.com", "h", "")
            .with_alias("team@x.com", "a@x.com, b@x.com", None);
        let mut m = Migrator::new(source, dir, DirectoryBases::under("dc=mailinabox"));

        let report = m.run().unwrap();

        assert_eq!(report.users.raced, 1);
        assert_eq!(report.users.created, 1);
        assert_eq!(report.users.domains_created, 1);
        assert!(report.completed_at.is_some());
        // The unknown user is kept as an external address.
        let (dn, _) = m.directory().find_by_mail("team@x.com")[0];
        let attrs = &m.directory().get(dn).unwrap().attributes;
        assert_eq!(attrs.first("rfc822MailMember"), Some("a@x.com"));
        assert_eq!(attrs.get("member").unwrap().len(), 1);
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for CapturedLogs {
        type Writer = CapturedLogs;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[test]
    fn test_empty_surname_is_warned_before_add() {
        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .with_ansi(false)
            .finish();
        let source = MemorySource::new().with_user("postmaster@x.com", "h", "");
        let mut m = migrator(source);

        let users = tracing::subscriber::with_default(subscriber, || m.migrate_users().unwrap());

        let attrs = user_attrs(&m, users.get("postmaster@x.com").unwrap());
        assert_eq!(attrs.first("sn"), Some(""));
        let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        let warning = output
            .lines()
            .find(|line| line.contains("empty sn"))
            .expect("warning logged");
        assert!(warning.contains("WARN"));
        assert!(warning.contains("postmaster@x.com"));
    }
}
