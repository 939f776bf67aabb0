//! Read-only access to the relational records being migrated.

pub mod memory;
pub mod sqlite;

pub use memory::MemorySource;
pub use sqlite::SqliteSource;

use crate::errors::SourceError;
use crate::models::{AliasRecord, UserRecord};

/// The queries a migration runs against the relational store.
pub trait RecordSource {
    /// Every user.
    fn users(&self) -> Result<Vec<UserRecord>, SourceError>;

    /// Aliases whose destination is not empty.
    fn aliases(&self) -> Result<Vec<AliasRecord>, SourceError>;

    /// Aliases whose permitted-senders column is set, even to an empty string.
    fn permitted_senders(&self) -> Result<Vec<AliasRecord>, SourceError>;

    /// Most recent active, non-deleted, non-empty display name for exactly
    /// this address.
    fn display_name(&self, email: &str) -> Result<Option<String>, SourceError>;
}
