//! [`RecordSource`] holding fixture rows in memory.

use std::collections::HashMap;

use super::RecordSource;
use crate::errors::SourceError;
use crate::models::{AliasRecord, UserRecord};
use crate::names::parse_privileges;

#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    pub users: Vec<UserRecord>,
    pub aliases: Vec<AliasRecord>,
    pub display_names: HashMap<String, String>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a user; `privileges` is parsed like the newline-separated column.
    pub fn with_user(mut self, email: &str, password_hash: &str, privileges: &str) -> Self {
        self.users.push(UserRecord {
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            privileges: parse_privileges(privileges),
        });
        self
    }

    pub fn with_alias(
        mut self,
        source: &str,
        destination: &str,
        permitted_senders: Option<&str>,
    ) -> Self {
        self.aliases.push(AliasRecord {
            source: source.to_string(),
            destination: destination.to_string(),
            permitted_senders: permitted_senders.map(str::to_string),
        });
        self
    }

    pub fn with_display_name(mut self, email: &str, name: &str) -> Self {
        self.display_names
            .insert(email.to_string(), name.to_string());
        self
    }
}

impl RecordSource for MemorySource {
    fn users(&self) -> Result<Vec<UserRecord>, SourceError> {
        Ok(self.users.clone())
    }

    fn aliases(&self) -> Result<Vec<AliasRecord>, SourceError> {
        Ok(self
            .aliases
            .iter()
            .filter(|a| !a.destination.is_empty())
            .cloned()
            .collect())
    }

    fn permitted_senders(&self) -> Result<Vec<AliasRecord>, SourceError> {
        Ok(self
            .aliases
            .iter()
            .filter(|a| a.permitted_senders.is_some())
            .cloned()
            .collect())
    }

    fn display_name(&self, email: &str) -> Result<Option<String>, SourceError> {
        Ok(self
            .display_names
            .get(email)
            .filter(|name| !name.is_empty())
            .cloned())
    }
}
