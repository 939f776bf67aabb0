//! TOML-based configuration for ldapmigrate.
//!
//! The LDAP bind password is never written in the file. The `[directory]`
//! section names an environment variable through `bind_password_env`, and
//! the secret is resolved at runtime via [`MigrateConfig::resolve_env_vars`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::ConfigError;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level migration configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrateConfig {
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Relational source databases.
    pub source: SourceConfig,

    /// Target directory connection and layout.
    pub directory: DirectoryConfig,
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

/// Locations of the SQLite databases the records are read from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Path to the mail users database (tables `users` and `aliases`).
    #[serde(default = "default_users_db")]
    pub users_db: PathBuf,

    /// Optional webmail database holding the `identities` table used to
    /// look up display names.
    #[serde(default)]
    pub display_names_db: Option<PathBuf>,
}

fn default_users_db() -> PathBuf {
    PathBuf::from("/home/user-data/mail/users.sqlite")
}

// ---------------------------------------------------------------------------
// Directory
// ---------------------------------------------------------------------------

/// LDAP connection settings and the base DNs entries are written under.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// Server URL (`ldap://` or `ldaps://`).
    #[serde(default = "default_ldap_url")]
    pub url: String,

    /// DN used for the simple bind.
    pub bind_dn: String,

    /// Environment variable holding the bind password.
    pub bind_password_env: String,

    /// Upgrade a plain `ldap://` connection with StartTLS.
    #[serde(default)]
    pub starttls: bool,

    /// Connection timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Base DNs for searches and new entries.
    #[serde(flatten)]
    pub bases: DirectoryBases,

    /// Resolved bind password (populated by `resolve_env_vars`).
    #[serde(skip)]
    pub bind_password: Option<String>,
}

fn default_ldap_url() -> String {
    "ldap://127.0.0.1".into()
}
fn default_timeout() -> u64 {
    30
}

/// The five base DNs a migration needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryBases {
    /// Subtree searched when checking whether a user already exists.
    pub search_base: String,
    /// Container for user entries.
    pub users_base: String,
    /// Container for domain markers.
    pub domains_base: String,
    /// Container for alias groups.
    pub aliases_base: String,
    /// Container for permitted-senders groups.
    pub permitted_senders_base: String,
}

impl DirectoryBases {
    /// Derive the conventional `ou=` containers below a single suffix.
    pub fn under(suffix: &str) -> Self {
        Self {
            search_base: suffix.to_string(),
            users_base: format!("ou=Users,{suffix}"),
            domains_base: format!("ou=domains,{suffix}"),
            aliases_base: format!("ou=aliases,ou=Users,{suffix}"),
            permitted_senders_base: format!("ou=permitted-senders,ou=Config,{suffix}"),
        }
    }

    fn fields(&self) -> [(&'static str, &str); 5] {
        [
            ("directory.search_base", &self.search_base),
            ("directory.users_base", &self.users_base),
            ("directory.domains_base", &self.domains_base),
            ("directory.aliases_base", &self.aliases_base),
            (
                "directory.permitted_senders_base",
                &self.permitted_senders_base,
            ),
        ]
    }
}

// ---------------------------------------------------------------------------
// Loading & resolving
// ---------------------------------------------------------------------------

impl MigrateConfig {
    /// Load a [`MigrateConfig`] from a TOML file at the given path.
    ///
    /// This does **not** resolve environment variables -- call
    /// [`resolve_env_vars`](Self::resolve_env_vars) afterwards.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: MigrateConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Resolve the bind password from the environment.
    ///
    /// Unlike optional secrets, the bind password is required: a missing or
    /// empty variable is an error.
    pub fn resolve_env_vars(&mut self) -> Result<(), ConfigError> {
        info!("resolving environment variable references in config");

        let env_name = &self.directory.bind_password_env;
        match resolve_optional_env(env_name, "directory.bind_password_env") {
            Some(password) => self.directory.bind_password = Some(password),
            None => {
                return Err(ConfigError::EnvVarMissing {
                    var: env_name.clone(),
                    field: "directory.bind_password_env".into(),
                })
            }
        }

        debug!("environment variable resolution complete");
        Ok(())
    }

    /// Validate that all required fields are present and sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = &self.directory.url;
        if !(url.starts_with("ldap://") || url.starts_with("ldaps://") || url.starts_with("ldapi://"))
        {
            return Err(ConfigError::InvalidValue {
                field: "directory.url".into(),
                detail: format!("'{url}' is not an ldap://, ldaps:// or ldapi:// URL"),
            });
        }
        if self.directory.starttls && !url.starts_with("ldap://") {
            return Err(ConfigError::InvalidValue {
                field: "directory.starttls".into(),
                detail: "StartTLS only applies to ldap:// URLs".into(),
            });
        }
        if self.directory.bind_dn.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "directory.bind_dn".into(),
                detail: "bind DN must not be empty".into(),
            });
        }
        if self.directory.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "directory.timeout_secs".into(),
                detail: "timeout must be > 0".into(),
            });
        }
        for (field, value) in self.directory.bases.fields() {
            if value.trim().is_empty() || !value.contains('=') {
                return Err(ConfigError::InvalidValue {
                    field: field.into(),
                    detail: format!("'{value}' is not a distinguished name"),
                });
            }
        }
        if self.source.users_db.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "source.users_db".into(),
                detail: "users database path must not be empty".into(),
            });
        }

        Ok(())
    }

    /// Convenience: load, resolve, and validate in one call.
    pub fn load_and_resolve<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.resolve_env_vars()?;
        config.validate()?;
        Ok(config)
    }
}

/// Try to read an environment variable by name. Returns `Some(value)` on
/// success; logs a warning and returns `None` if the variable is unset.
fn resolve_optional_env(env_name: &str, field: &str) -> Option<String> {
    match std::env::var(env_name) {
        Ok(val) if !val.is_empty() => {
            debug!(field, env_name, "resolved env var");
            Some(val)
        }
        Ok(_) => {
            warn!(field, env_name, "env var is set but empty");
            None
        }
        Err(_) => {
            warn!(field, env_name, "env var not set");
            None
        }
    }
}
