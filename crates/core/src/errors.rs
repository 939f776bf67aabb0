//! Error types for the ldapmigrate core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`MigrateError`] enum unifies them for callers that want a single
//! error type. Every variant here is fatal to a migration run: the benign
//! "entry already exists" outcome of a directory add is reported as
//! [`AddOutcome::AlreadyExists`](crate::directory::AddOutcome), never as an
//! error.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum MigrateError {
    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

// ---------------------------------------------------------------------------
// Directory errors
// ---------------------------------------------------------------------------

/// Errors from the directory (LDAP) client.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// The directory server could not be reached.
    #[error("failed to connect to directory at '{url}': {detail}")]
    Connect {
        url: String,
        detail: String,
    },

    /// The bind credentials were rejected.
    #[error("directory bind failed for '{bind_dn}' (rc {rc}): {text}")]
    Bind {
        bind_dn: String,
        rc: u32,
        text: String,
    },

    /// Protocol-level error raised by the `ldap3` client.
    #[error("ldap error: {0}")]
    Ldap(#[from] ldap3::LdapError),

    /// The server answered an operation with a non-success result code.
    #[error("directory {op} failed for '{dn}' (rc {rc}): {text}")]
    OperationFailed {
        op: &'static str,
        dn: String,
        rc: u32,
        text: String,
    },

    /// A modify targeted an entry that does not exist.
    #[error("no such directory entry: {0}")]
    NoSuchEntry(String),
}

// ---------------------------------------------------------------------------
// Record source errors
// ---------------------------------------------------------------------------

/// Errors from the relational record source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Underlying rusqlite error.
    #[error("source database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The database file does not exist.
    #[error("source database not found: {0}")]
    NotFound(String),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A required environment variable is not set.
    #[error("required environment variable '{var}' is not set (referenced by config field '{field}')")]
    EnvVarMissing {
        var: String,
        field: String,
    },

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue {
        field: String,
        detail: String,
    },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
