//! End-to-end tests for the full migration.
//!
//! These tests exercise the real `Migrator` with:
//! - Real SQLite users and identities databases in a temp directory
//! - The read-only `SqliteSource`
//! - The in-memory directory standing in for the LDAP server
//!
//! No network I/O.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use rusqlite::{params, Connection};
use tempfile::TempDir;

use ldapmigrate_core::config::DirectoryBases;
use ldapmigrate_core::directory::memory::StoredEntry;
use ldapmigrate_core::directory::MemoryDirectory;
use ldapmigrate_core::errors::{DirectoryError, MigrateError, SourceError};
use ldapmigrate_core::migrate::Migrator;
use ldapmigrate_core::source::SqliteSource;

// ===========================================================================
// Helpers
// ===========================================================================

const SUFFIX: &str = "dc=mailinabox";

struct Fixture {
    _dir: TempDir,
    users_db: PathBuf,
    identities_db: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let users_db = dir.path().join("users.sqlite");
        let identities_db = dir.path().join("roundcube.sqlite");

        let conn = Connection::open(&users_db).unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email TEXT NOT NULL UNIQUE,
                password TEXT NOT NULL,
                extra,
                privileges TEXT NOT NULL DEFAULT ''
            );
            CREATE TABLE aliases (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source TEXT NOT NULL UNIQUE,
                destination TEXT NOT NULL,
                permitted_senders TEXT
            );
            "#,
        )
        .unwrap();

        let conn = Connection::open(&identities_db).unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE identities (
                identity_id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL DEFAULT 0,
                changed DATETIME NOT NULL DEFAULT '1000-01-01 00:00:00',
                del INTEGER NOT NULL DEFAULT 0,
                standard INTEGER NOT NULL DEFAULT 0,
                name TEXT NOT NULL,
                email TEXT NOT NULL
            );
            "#,
        )
        .unwrap();

        Self {
            _dir: dir,
            users_db,
            identities_db,
        }
    }

    fn user(&self, email: &str, password: &str, privileges: &str) -> &Self {
        Connection::open(&self.users_db)
            .unwrap()
            .execute(
                "INSERT INTO users (email, password, privileges) VALUES (?1, ?2, ?3)",
                params![email, password, privileges],
            )
            .unwrap();
        self
    }

    fn alias(&self, source: &str, destination: &str, permitted: Option<&str>) -> &Self {
        Connection::open(&self.users_db)
            .unwrap()
            .execute(
                "INSERT INTO aliases (source, destination, permitted_senders) VALUES (?1, ?2, ?3)",
                params![source, destination, permitted],
            )
            .unwrap();
        self
    }

    fn identity(&self, email: &str, name: &str, changed: &str) -> &Self {
        Connection::open(&self.identities_db)
            .unwrap()
            .execute(
                "INSERT INTO identities (email, name, changed, standard, del) VALUES (?1, ?2, ?3, 1, 0)",
                params![email, name, changed],
            )
            .unwrap();
        self
    }

    fn source(&self) -> SqliteSource {
        SqliteSource::open(&self.users_db, Some(&self.identities_db)).unwrap()
    }

    /// The mail server's typical data set.
    fn populated() -> Self {
        let f = Self::new();
        f.user("jane.doe@x.com", "{SHA512-CRYPT}$6$a$b", "admin")
            .user("a@x.com", "{SHA512-CRYPT}$6$c$d", "")
            .user("bob@y.org", "{BLF-CRYPT}$2y$05$e", "")
            .identity("bob@y.org", "Old Name", "2020-01-01 00:00:00")
            .identity("bob@y.org", "Robert Smith", "2023-06-01 00:00:00")
            .alias("team@x.com", "a@x.com, b@x.com,, a@x.com", None)
            .alias("all@x.com", "team@x.com, jane.doe@x.com", None)
            .alias("external@x.com", "someone@elsewhere.net", None)
            .alias("noreply@x.com", "", Some("a@x.com\nbob@y.org,ghost@x.com"))
            .alias("nobody@x.com", "a@x.com", Some("ghost@x.com"));
        f
    }
}

fn user_dn(dir: &MemoryDirectory, email: &str) -> String {
    let hits: Vec<_> = dir
        .find_by_mail(email)
        .into_iter()
        .filter(|(_, e)| e.object_classes.iter().any(|c| c == "mailUser"))
        .collect();
    assert_eq!(hits.len(), 1, "expected exactly one user entry for {email}");
    hits[0].0.to_string()
}

fn group<'a>(dir: &'a MemoryDirectory, mail: &str, base: &str) -> &'a StoredEntry {
    let hits: Vec<_> = dir
        .find_by_mail(mail)
        .into_iter()
        .filter(|(dn, _)| dn.ends_with(base))
        .collect();
    assert_eq!(hits.len(), 1, "expected exactly one group for {mail} under {base}");
    hits[0].1
}

fn values(entry: &StoredEntry, attr: &str) -> BTreeSet<String> {
    entry.attributes.get(attr).cloned().unwrap_or_default()
}

fn snapshot(dir: &MemoryDirectory) -> Vec<(String, StoredEntry)> {
    ["mailUser", "mailGroup", "domain"]
        .iter()
        .flat_map(|class| dir.entries_of_class(class))
        .map(|(dn, e)| (dn.to_string(), e.clone()))
        .collect()
}

fn bases() -> DirectoryBases {
    DirectoryBases::under(SUFFIX)
}

// ===========================================================================
// Tests
// ===========================================================================

#[test]
fn test_full_migration_writes_expected_entries() {
    let f = Fixture::populated();
    let mut dir = MemoryDirectory::new();

    let report = Migrator::new(f.source(), &mut dir, bases()).run().unwrap();

    assert_eq!(report.users.created, 3);
    assert_eq!(report.users.domains_created, 2);
    assert_eq!(report.aliases.created, 4);
    assert_eq!(report.aliases.populated, 4);
    assert_eq!(report.permitted_senders.created, 1);
    assert_eq!(report.permitted_senders.empty, 1);
    assert!(report.completed_at.is_some());
    assert_eq!(dir.entries_of_class("mailUser").len(), 3);

    // jane.doe has no webmail identity.
    let jane = dir.get(&user_dn(&dir, "jane.doe@x.com")).unwrap();
    assert_eq!(jane.attributes.first("cn"), Some("jane doe"));
    assert_eq!(jane.attributes.first("sn"), Some("doe"));
    assert_eq!(jane.attributes.first("userPassword"), Some("{CRYPT}$6$a$b"));
    assert_eq!(values(jane, "mailaccess"), BTreeSet::from(["admin".to_string()]));

    // bob takes the most recent identity name.
    let bob = dir.get(&user_dn(&dir, "bob@y.org")).unwrap();
    assert_eq!(bob.attributes.first("cn"), Some("Robert Smith"));
    assert_eq!(bob.attributes.first("displayName"), Some("Robert Smith"));
    assert_eq!(bob.attributes.first("sn"), Some("Smith"));
    assert_eq!(bob.attributes.first("userPassword"), Some("{BLF-CRYPT}$2y$05$e"));

    let domains: Vec<_> = dir.entries_of_class("domain").into_iter().map(|(dn, _)| dn).collect();
    assert_eq!(
        domains,
        vec!["dc=x.com,ou=domains,dc=mailinabox", "dc=y.org,ou=domains,dc=mailinabox"]
    );
}

#[test]
fn test_alias_membership_is_classified() {
    let f = Fixture::populated();
    let mut dir = MemoryDirectory::new();
    Migrator::new(f.source(), &mut dir, bases()).run().unwrap();
    let aliases_base = bases().aliases_base;

    let team = group(&dir, "team@x.com", &aliases_base);
    assert_eq!(values(team, "member"), BTreeSet::from([user_dn(&dir, "a@x.com")]));
    assert_eq!(values(team, "rfc822MailMember"), BTreeSet::from(["b@x.com".to_string()]));
    assert_eq!(team.attributes.first("description"), Some("Mail group team@x.com"));

    // Alias-to-alias membership points at the nested group's DN.
    let team_dn = dir
        .find_by_mail("team@x.com")
        .into_iter()
        .find(|(dn, _)| dn.ends_with(&aliases_base))
        .map(|(dn, _)| dn.to_string())
        .unwrap();
    let all = group(&dir, "all@x.com", &aliases_base);
    assert_eq!(
        values(all, "member"),
        BTreeSet::from([team_dn, user_dn(&dir, "jane.doe@x.com")])
    );
    assert!(all.attributes.get("rfc822MailMember").is_none());

    let external = group(&dir, "external@x.com", &aliases_base);
    assert!(external.attributes.get("member").is_none());
    assert_eq!(
        values(external, "rfc822MailMember"),
        BTreeSet::from(["someone@elsewhere.net".to_string()])
    );
}

#[test]
fn test_permitted_senders_are_resolved_users() {
    let f = Fixture::populated();
    let mut dir = MemoryDirectory::new();
    Migrator::new(f.source(), &mut dir, bases()).run().unwrap();
    let senders_base = bases().permitted_senders_base;

    let noreply = group(&dir, "noreply@x.com", &senders_base);
    assert_eq!(
        values(noreply, "member"),
        BTreeSet::from([user_dn(&dir, "a@x.com"), user_dn(&dir, "bob@y.org")])
    );
    assert_eq!(
        noreply.attributes.first("description"),
        Some("Permitted to MAIL FROM this address")
    );

    // Only unresolvable senders: no group at all.
    assert!(dir
        .find_by_mail("nobody@x.com")
        .iter()
        .all(|(dn, _)| !dn.ends_with(&senders_base)));
    // An alias with an empty destination gets no alias group.
    assert!(dir
        .find_by_mail("noreply@x.com")
        .iter()
        .all(|(dn, _)| !dn.ends_with(&bases().aliases_base)));
}

#[test]
fn test_second_run_creates_nothing() {
    let f = Fixture::populated();
    let mut dir = MemoryDirectory::new();

    Migrator::new(f.source(), &mut dir, bases()).run().unwrap();
    let before = snapshot(&dir);
    let adds = dir.counts().adds;

    let report = Migrator::new(f.source(), &mut dir, bases()).run().unwrap();

    assert_eq!(report.entries_created(), 0);
    assert_eq!(report.users.existing, 3);
    assert_eq!(report.aliases.existing, 4);
    assert_eq!(report.permitted_senders.existing, 1);
    assert_eq!(dir.counts().adds, adds);
    assert_eq!(snapshot(&dir), before);
}

#[test]
fn test_rerun_completes_partial_migration() {
    let f = Fixture::new();
    f.user("a@x.com", "{SHA512-CRYPT}x", "")
        .alias("team@x.com", "a@x.com", None);
    let mut dir = MemoryDirectory::new();
    Migrator::new(f.source(), &mut dir, bases()).run().unwrap();

    f.user("b@x.com", "{SHA512-CRYPT}y", "")
        .alias("staff@x.com", "b@x.com, team@x.com", None);
    let report = Migrator::new(f.source(), &mut dir, bases()).run().unwrap();

    assert_eq!(report.users.created, 1);
    assert_eq!(report.users.existing, 1);
    assert_eq!(report.aliases.created, 1);
    let staff = group(&dir, "staff@x.com", &bases().aliases_base);
    assert_eq!(values(staff, "member").len(), 2);
}

#[test]
fn test_fatal_error_aborts_and_rerun_converges() {
    let f = Fixture::populated();
    let mut dir = MemoryDirectory::new();
    // bob@y.org is the last user, so its domain marker is the last user-phase write.
    dir.fail_add("dc=y.org,ou=domains,dc=mailinabox");

    let err = Migrator::new(f.source(), &mut dir, bases()).run().unwrap_err();

    assert!(matches!(
        err,
        MigrateError::Directory(DirectoryError::OperationFailed { op: "add", rc: 53, .. })
    ));
    assert_eq!(dir.entries_of_class("mailUser").len(), 3);
    assert_eq!(dir.entries_of_class("domain").len(), 1);
    assert!(dir.entries_of_class("mailGroup").is_empty());

    dir.clear_failures();
    let report = Migrator::new(f.source(), &mut dir, bases()).run().unwrap();

    assert_eq!(report.users.created, 0);
    assert_eq!(report.users.existing, 3);
    assert_eq!(report.users.domains_created, 1);
    assert_eq!(report.aliases.created, 4);
    assert_eq!(report.permitted_senders.created, 1);
    for email in ["jane.doe@x.com", "a@x.com", "bob@y.org"] {
        user_dn(&dir, email);
    }
    assert_eq!(dir.entries_of_class("domain").len(), 2);

    let noreply = group(&dir, "noreply@x.com", &bases().permitted_senders_base);
    assert_eq!(
        values(noreply, "member"),
        BTreeSet::from([user_dn(&dir, "a@x.com"), user_dn(&dir, "bob@y.org")])
    );
}

#[test]
fn test_alias_cycle_is_accepted() {
    let f = Fixture::new();
    f.alias("a@x.com", "b@x.com", None)
        .alias("b@x.com", "a@x.com", None);
    let mut dir = MemoryDirectory::new();

    let report = Migrator::new(f.source(), &mut dir, bases()).run().unwrap();

    assert_eq!(report.aliases.cycles, 1);
    assert_eq!(report.aliases.populated, 2);
}

#[test]
fn test_missing_users_database_is_reported() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("nope.sqlite");

    let err = SqliteSource::open::<&Path>(&missing, None).err().unwrap();
    assert!(matches!(err, SourceError::NotFound(_)));
    let err: MigrateError = err.into();
    assert!(err.to_string().contains("nope.sqlite"));
}
