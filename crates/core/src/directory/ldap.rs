//! [`DirectoryClient`] backed by a synchronous `ldap3` connection.

use std::collections::HashSet;
use std::time::Duration;

use ldap3::{LdapConn, LdapConnSettings, LdapResult, Mod, Scope, SearchEntry, SearchResult};
use tracing::{debug, info, warn};

use super::{AddOutcome, DirectoryClient, Filter, SearchHit};
use crate::config::DirectoryConfig;
use crate::errors::DirectoryError;
use crate::models::Attributes;

/// LDAP result code: success.
const RC_SUCCESS: u32 = 0;
/// LDAP result code: noSuchObject.
const RC_NO_SUCH_OBJECT: u32 = 32;
/// LDAP result code: entryAlreadyExists.
const RC_ALREADY_EXISTS: u32 = 68;

/// Attributes requested from searches; callers only need the DN and the
/// natural key.
const SEARCH_ATTRS: &[&str] = &["mail", "objectClass"];

/// A bound LDAP connection.
pub struct LdapDirectory {
    conn: LdapConn,
    url: String,
}

impl LdapDirectory {
    /// Connect and perform a simple bind.
    pub fn connect(
        url: &str,
        bind_dn: &str,
        bind_password: &str,
        starttls: bool,
        timeout: Duration,
    ) -> Result<Self, DirectoryError> {
        info!(url, bind_dn, starttls, "connecting to directory");

        let settings = LdapConnSettings::new()
            .set_conn_timeout(timeout)
            .set_starttls(starttls);
        let mut conn =
            LdapConn::with_settings(settings, url).map_err(|e| DirectoryError::Connect {
                url: url.to_string(),
                detail: e.to_string(),
            })?;

        let result = conn.simple_bind(bind_dn, bind_password)?;
        if result.rc != RC_SUCCESS {
            return Err(DirectoryError::Bind {
                bind_dn: bind_dn.to_string(),
                rc: result.rc,
                text: result.text,
            });
        }

        debug!(url, "directory bind successful");
        Ok(Self {
            conn,
            url: url.to_string(),
        })
    }

    /// Connect using the `[directory]` section of the configuration. The bind
    /// password must already be resolved.
    pub fn from_config(config: &DirectoryConfig) -> Result<Self, DirectoryError> {
        let password = config.bind_password.as_deref().unwrap_or_default();
        Self::connect(
            &config.url,
            &config.bind_dn,
            password,
            config.starttls,
            Duration::from_secs(config.timeout_secs),
        )
    }

    /// Close the connection.
    pub fn unbind(mut self) -> Result<(), DirectoryError> {
        debug!(url = %self.url, "unbinding from directory");
        self.conn.unbind()?;
        Ok(())
    }
}

fn check(op: &'static str, dn: &str, result: LdapResult) -> Result<(), DirectoryError> {
    match result.rc {
        RC_SUCCESS => Ok(()),
        RC_NO_SUCH_OBJECT if op == "modify" => Err(DirectoryError::NoSuchEntry(dn.to_string())),
        rc => Err(DirectoryError::OperationFailed {
            op,
            dn: dn.to_string(),
            rc,
            text: result.text,
        }),
    }
}

impl DirectoryClient for LdapDirectory {
    fn search(&mut self, base: &str, filter: &Filter) -> Result<Vec<SearchHit>, DirectoryError> {
        let filter = filter.to_ldap_string();
        debug!(base, filter = %filter, "directory search");

        let SearchResult(entries, result) =
            self.conn
                .search(base, Scope::Subtree, &filter, SEARCH_ATTRS.to_vec())?;

        // A missing base simply holds nothing yet.
        if result.rc == RC_NO_SUCH_OBJECT {
            warn!(base, "search base does not exist");
            return Ok(Vec::new());
        }
        check("search", base, result)?;

        Ok(entries
            .into_iter()
            .map(|entry| {
                let entry = SearchEntry::construct(entry);
                let mut attributes = Attributes::new();
                for (name, values) in entry.attrs {
                    attributes.set_all(&name, values);
                }
                SearchHit {
                    dn: entry.dn,
                    attributes,
                }
            })
            .collect())
    }

    fn add(
        &mut self,
        dn: &str,
        object_classes: &[&str],
        attributes: &Attributes,
    ) -> Result<AddOutcome, DirectoryError> {
        let mut ldap_attrs: Vec<(&str, HashSet<&str>)> =
            vec![("objectClass", object_classes.iter().copied().collect())];
        for (name, values) in attributes {
            ldap_attrs.push((name.as_str(), values.iter().map(String::as_str).collect()));
        }

        let result = self.conn.add(dn, ldap_attrs)?;
        if result.rc == RC_ALREADY_EXISTS {
            debug!(dn, "directory add: entry already exists");
            return Ok(AddOutcome::AlreadyExists);
        }
        check("add", dn, result)?;
        Ok(AddOutcome::Added)
    }

    fn modify(&mut self, dn: &str, replacements: &Attributes) -> Result<(), DirectoryError> {
        let mods: Vec<Mod<&str>> = replacements
            .iter()
            .map(|(name, values)| {
                Mod::Replace(name.as_str(), values.iter().map(String::as_str).collect())
            })
            .collect();
        if mods.is_empty() {
            return Ok(());
        }

        let result = self.conn.modify(dn, mods)?;
        check("modify", dn, result)
    }
}
