//! Domain model types shared by the record source, the directory client and
//! the migrators.

use std::collections::{btree_map, BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

/// Identifier of a directory entry: its distinguished name.
pub type EntryId = String;

// ---------------------------------------------------------------------------
// Source records
// ---------------------------------------------------------------------------

/// A row from the `users` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    /// Email address, IDNA-encoded ASCII, used as-is.
    pub email: String,
    /// Tagged password hash, e.g. `{SHA512-CRYPT}$6$...`.
    pub password_hash: String,
    /// Privilege names, trimmed and deduplicated, never empty strings.
    pub privileges: BTreeSet<String>,
}

/// A row from the `aliases` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasRecord {
    /// The aliased address.
    pub source: String,
    /// Raw comma-separated destination list.
    pub destination: String,
    /// Raw newline/comma-separated permitted senders, `None` when NULL.
    pub permitted_senders: Option<String>,
}

// ---------------------------------------------------------------------------
// Directory entries
// ---------------------------------------------------------------------------

/// The kinds of directory entry a migration produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    User,
    AliasGroup,
    PolicySenderGroup,
    Domain,
}

impl EntryKind {
    /// Object classes an entry of this kind is created with.
    pub fn object_classes(self) -> &'static [&'static str] {
        match self {
            Self::User => &["inetOrgPerson", "mailUser", "shadowAccount"],
            Self::AliasGroup | Self::PolicySenderGroup => &["mailGroup"],
            Self::Domain => &["domain"],
        }
    }
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::AliasGroup => write!(f, "alias_group"),
            Self::PolicySenderGroup => write!(f, "permitted_senders_group"),
            Self::Domain => write!(f, "domain"),
        }
    }
}

/// Multi-valued entry attributes.
///
/// Values are kept as sets, so duplicates collapse, and an attribute never
/// holds an empty value set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes(BTreeMap<String, BTreeSet<String>>);

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`set`](Self::set).
    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set(name, value);
        self
    }

    /// Builder form of [`set_all`](Self::set_all).
    pub fn with_all<I, V>(mut self, name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        self.set_all(name, values);
        self
    }

    /// Set a single-valued attribute, replacing any previous values.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.0
            .insert(name.to_string(), BTreeSet::from([value.into()]));
    }

    /// Set a multi-valued attribute. An empty iterator leaves the attribute
    /// absent.
    pub fn set_all<I, V>(&mut self, name: &str, values: I)
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        let values: BTreeSet<String> = values.into_iter().map(Into::into).collect();
        if values.is_empty() {
            self.0.remove(name);
        } else {
            self.0.insert(name.to_string(), values);
        }
    }

    /// Values of an attribute. Names compare ASCII case-insensitively, as
    /// LDAP attribute descriptions do.
    pub fn get(&self, name: &str) -> Option<&BTreeSet<String>> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    /// First value of an attribute, in sort order.
    pub fn first(&self, name: &str) -> Option<&str> {
        self.get(name)
            .and_then(|values| values.iter().next())
            .map(String::as_str)
    }

    /// Merge `other` into `self`, each attribute of `other` replacing the
    /// attribute of the same name.
    pub fn replace_from(&mut self, other: &Attributes) {
        for (name, values) in other.iter() {
            self.0.retain(|k, _| !k.eq_ignore_ascii_case(name));
            self.0.insert(name.to_string(), values.clone());
        }
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, BTreeSet<String>> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl<'a> IntoIterator for &'a Attributes {
    type Item = (&'a String, &'a BTreeSet<String>);
    type IntoIter = btree_map::Iter<'a, String, BTreeSet<String>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

// ---------------------------------------------------------------------------
// Identity map
// ---------------------------------------------------------------------------

/// Email address -> directory entry id, built up while a phase runs and
/// read by the phases after it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityMap(HashMap<String, EntryId>);

impl IdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, email: impl Into<String>, id: impl Into<EntryId>) {
        self.0.insert(email.into(), id.into());
    }

    pub fn get(&self, email: &str) -> Option<&str> {
        self.0.get(email).map(String::as_str)
    }

    pub fn contains(&self, email: &str) -> bool {
        self.0.contains_key(email)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}
