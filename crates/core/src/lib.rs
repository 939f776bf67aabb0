//! ldapmigrate core library.
//!
//! This crate moves mail users, aliases and permitted-senders policies from
//! the relational user store into an LDAP directory: configuration, record
//! sources, directory clients, the find-or-create upserter and the
//! migration phases themselves.

pub mod config;
pub mod directory;
pub mod errors;
pub mod migrate;
pub mod models;
pub mod names;
pub mod source;
pub mod upsert;

// Re-exports for convenience.
pub use config::MigrateConfig;
pub use directory::{DirectoryClient, LdapDirectory, MemoryDirectory};
pub use errors::MigrateError;
pub use migrate::{MigrationReport, Migrator};
pub use source::{MemorySource, RecordSource, SqliteSource};
pub use upsert::EntryUpserter;
