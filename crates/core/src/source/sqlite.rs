//! [`RecordSource`] over the mail server's SQLite databases.
//!
//! Users and aliases come from `users.sqlite`; display names come from the
//! webmail client's `identities` table when that database is configured.

use std::path::Path;

use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use tracing::{debug, info};

use super::RecordSource;
use crate::config::SourceConfig;
use crate::errors::SourceError;
use crate::models::{AliasRecord, UserRecord};
use crate::names::parse_privileges;

const USERS_SQL: &str = "SELECT email, password, privileges FROM users";

const ALIASES_SQL: &str =
    "SELECT source, destination, permitted_senders FROM aliases WHERE destination <> ''";

const PERMITTED_SENDERS_SQL: &str =
    "SELECT source, destination, permitted_senders FROM aliases WHERE permitted_senders IS NOT NULL";

const DISPLAY_NAME_SQL: &str = "SELECT name FROM identities \
     WHERE email = ?1 AND standard = 1 AND del = 0 AND name <> '' \
     ORDER BY changed DESC LIMIT 1";

/// Read-only handle on the users database and, optionally, the
/// display-name database.
pub struct SqliteSource {
    users: Connection,
    display_names: Option<Connection>,
}

impl SqliteSource {
    /// Open both databases read-only.
    pub fn open<P: AsRef<Path>>(
        users_db: P,
        display_names_db: Option<P>,
    ) -> Result<Self, SourceError> {
        let users = open_read_only(users_db.as_ref())?;
        let display_names = display_names_db
            .map(|path| open_read_only(path.as_ref()))
            .transpose()?;
        Ok(Self::from_connections(users, display_names))
    }

    /// Open the databases named in the `[source]` configuration section.
    pub fn from_config(config: &SourceConfig) -> Result<Self, SourceError> {
        Self::open(&config.users_db, config.display_names_db.as_ref())
    }

    /// Wrap already-open connections.
    pub fn from_connections(users: Connection, display_names: Option<Connection>) -> Self {
        Self {
            users,
            display_names,
        }
    }

    fn query_aliases(&self, sql: &str) -> Result<Vec<AliasRecord>, SourceError> {
        let mut stmt = self.users.prepare(sql)?;
        let rows = stmt.query_map([], |row| {
            Ok(AliasRecord {
                source: row.get(0)?,
                destination: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                permitted_senders: row.get(2)?,
            })
        })?;
        let aliases = rows.collect::<Result<Vec<_>, _>>()?;
        debug!(count = aliases.len(), "read alias rows");
        Ok(aliases)
    }
}

fn open_read_only(path: &Path) -> Result<Connection, SourceError> {
    info!(path = %path.display(), "opening source database");
    if !path.exists() {
        return Err(SourceError::NotFound(path.display().to_string()));
    }
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    conn.execute_batch("PRAGMA busy_timeout = 5000;")?;
    Ok(conn)
}

impl RecordSource for SqliteSource {
    fn users(&self) -> Result<Vec<UserRecord>, SourceError> {
        let mut stmt = self.users.prepare(USERS_SQL)?;
        let rows = stmt.query_map([], |row| {
            let privileges: Option<String> = row.get(2)?;
            Ok(UserRecord {
                email: row.get(0)?,
                password_hash: row.get(1)?,
                privileges: parse_privileges(privileges.as_deref().unwrap_or_default()),
            })
        })?;
        let users = rows.collect::<Result<Vec<_>, _>>()?;
        debug!(count = users.len(), "read user rows");
        Ok(users)
    }

    fn aliases(&self) -> Result<Vec<AliasRecord>, SourceError> {
        self.query_aliases(ALIASES_SQL)
    }

    fn permitted_senders(&self) -> Result<Vec<AliasRecord>, SourceError> {
        self.query_aliases(PERMITTED_SENDERS_SQL)
    }

    fn display_name(&self, email: &str) -> Result<Option<String>, SourceError> {
        let Some(conn) = &self.display_names else {
            return Ok(None);
        };
        let name = conn
            .query_row(DISPLAY_NAME_SQL, params![email], |row| row.get(0))
            .optional()?;
        Ok(name)
    }
}
