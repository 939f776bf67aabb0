//! Synchronous request/response access to the target directory.
//!
//! [`DirectoryClient`] is the seam between the migrators and the store:
//! [`LdapDirectory`] talks to a real server through `ldap3`, while
//! [`MemoryDirectory`] keeps entries in a map for tests.

pub mod ldap;
pub mod memory;

pub use ldap::LdapDirectory;
pub use memory::MemoryDirectory;

use ldap3::{dn_escape, ldap_escape};

use crate::errors::DirectoryError;
use crate::models::{Attributes, EntryId};

/// Result of an add that did not fail fatally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    /// The store rejected the add because the entry is already there.
    AlreadyExists,
}

/// One entry returned by a search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub dn: EntryId,
    pub attributes: Attributes,
}

/// Operations the migrators need from a directory store.
pub trait DirectoryClient {
    /// Subtree search below `base`.
    fn search(&mut self, base: &str, filter: &Filter) -> Result<Vec<SearchHit>, DirectoryError>;

    /// Create an entry. "Already exists" is an outcome, not an error.
    fn add(
        &mut self,
        dn: &str,
        object_classes: &[&str],
        attributes: &Attributes,
    ) -> Result<AddOutcome, DirectoryError>;

    /// Replace every attribute named in `replacements` with the given values.
    fn modify(&mut self, dn: &str, replacements: &Attributes) -> Result<(), DirectoryError>;
}

impl<D: DirectoryClient + ?Sized> DirectoryClient for &mut D {
    fn search(&mut self, base: &str, filter: &Filter) -> Result<Vec<SearchHit>, DirectoryError> {
        (**self).search(base, filter)
    }

    fn add(
        &mut self,
        dn: &str,
        object_classes: &[&str],
        attributes: &Attributes,
    ) -> Result<AddOutcome, DirectoryError> {
        (**self).add(dn, object_classes, attributes)
    }

    fn modify(&mut self, dn: &str, replacements: &Attributes) -> Result<(), DirectoryError> {
        (**self).modify(dn, replacements)
    }
}

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

/// The subset of LDAP search filters the migration uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    Equals { attribute: String, value: String },
    And(Vec<Filter>),
}

impl Filter {
    pub fn equals(attribute: &str, value: &str) -> Self {
        Self::Equals {
            attribute: attribute.to_string(),
            value: value.to_string(),
        }
    }

    /// `(mail=<address>)`
    pub fn mail(address: &str) -> Self {
        Self::equals("mail", address)
    }

    /// `(&(objectClass=<class>)(mail=<address>))`
    pub fn mail_with_class(address: &str, object_class: &str) -> Self {
        Self::And(vec![
            Self::equals("objectClass", object_class),
            Self::mail(address),
        ])
    }

    /// Render as an RFC 4515 string with escaped assertion values.
    pub fn to_ldap_string(&self) -> String {
        match self {
            Self::Equals { attribute, value } => {
                format!("({}={})", attribute, ldap_escape(value.as_str()))
            }
            Self::And(filters) => {
                let inner: String = filters.iter().map(Self::to_ldap_string).collect();
                format!("(&{inner})")
            }
        }
    }

    /// Evaluate against an entry held in memory. Attribute names and
    /// `objectClass` values compare case-insensitively; other values exactly.
    pub fn matches(&self, object_classes: &[String], attributes: &Attributes) -> bool {
        match self {
            Self::Equals { attribute, value } if attribute.eq_ignore_ascii_case("objectClass") => {
                object_classes
                    .iter()
                    .any(|class| class.eq_ignore_ascii_case(value))
            }
            Self::Equals { attribute, value } => attributes
                .get(attribute)
                .is_some_and(|values| values.contains(value)),
            Self::And(filters) => filters
                .iter()
                .all(|f| f.matches(object_classes, attributes)),
        }
    }
}

impl std::fmt::Display for Filter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_ldap_string())
    }
}

/// Build `<attr>=<escaped value>,<base>`.
pub fn child_dn(attribute: &str, value: &str, base: &str) -> String {
    format!("{}={},{}", attribute, dn_escape(value), base)
}
