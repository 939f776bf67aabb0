//! ldapmigrate command-line tool.
//!
//! Runs the one-shot migration of mail users, aliases and permitted senders
//! into LDAP, and generates / validates its configuration file.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, reload, EnvFilter, Registry};

use ldapmigrate_core::config::MigrateConfig;
use ldapmigrate_core::migrate::{MigrationReport, Migrator};
use ldapmigrate_core::{LdapDirectory, SqliteSource};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// ldapmigrate command-line tool.
#[derive(Parser, Debug)]
#[command(
    name = "ldapmigrate",
    version,
    about = "Migrate mail users, aliases and permitted senders into LDAP"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(
        short,
        long,
        global = true,
        default_value = "/etc/ldapmigrate/config.toml"
    )]
    config: PathBuf,

    /// Log filter (overrides `logging.level` from the config file).
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the migration once.
    Run {
        /// Print the report as JSON instead of a summary.
        #[arg(long)]
        json: bool,
    },

    /// Generate a default configuration file.
    Init {
        /// Output path for the generated config file.
        #[arg(short, long, default_value = "./ldapmigrate.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file.
    Validate,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Init { output } => {
            init_logging(cli.log_level.as_deref().unwrap_or("warn"));
            cmd_init(&output)
        }
        Commands::Validate => {
            init_logging(cli.log_level.as_deref().unwrap_or("warn"));
            cmd_validate(&cli.config)
        }
        Commands::Run { json } => {
            let filter = init_logging(cli.log_level.as_deref().unwrap_or("info"));
            let config = load_config(&cli.config)?;
            if cli.log_level.is_none() {
                if let Err(e) = filter.reload(parse_filter(&config.logging.level)) {
                    warn!(error = %e, "failed to apply configured log level");
                }
            }
            cmd_run(&config, json)
        }
    }
}

/// Install the subscriber. The returned handle swaps the filter once the
/// configured level is known.
fn init_logging(level: &str) -> reload::Handle<EnvFilter, Registry> {
    let (filter, handle) = reload::Layer::new(parse_filter(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .init();
    handle
}

fn parse_filter(level: &str) -> EnvFilter {
    EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
}

// ---------------------------------------------------------------------------
// Config helpers
// ---------------------------------------------------------------------------

fn load_config(path: &Path) -> Result<MigrateConfig> {
    MigrateConfig::load_and_resolve(path).context("failed to load configuration")
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

fn cmd_run(config: &MigrateConfig, json: bool) -> Result<()> {
    let source = SqliteSource::from_config(&config.source).context("failed to open source databases")?;
    let directory =
        LdapDirectory::from_config(&config.directory).context("failed to connect to directory")?;

    let mut migrator = Migrator::new(source, directory, config.directory.bases.clone());
    let report = migrator.run().context("migration failed")?;

    if let Err(e) = migrator.into_directory().unbind() {
        warn!(error = %e, "unbind failed");
    }

    if json {
        let rendered =
            serde_json::to_string_pretty(&report).context("failed to serialize report")?;
        println!("{rendered}");
    } else {
        print_summary(&report);
    }
    info!(created = report.entries_created(), "done");
    Ok(())
}

fn print_summary(report: &MigrationReport) {
    let users = &report.users;
    let aliases = &report.aliases;
    let senders = &report.permitted_senders;

    println!("Migration Summary");
    println!("=================");
    println!();
    println!("  Started at        : {}", report.started_at);
    println!(
        "  Completed at      : {}",
        report.completed_at.as_deref().unwrap_or("-")
    );
    println!();
    println!(
        "  Users             : {} created, {} existing, {} raced",
        users.created, users.existing, users.raced
    );
    println!("  Domains           : {} created", users.domains_created);
    println!(
        "  Aliases           : {} created, {} existing, {} raced",
        aliases.created, aliases.existing, aliases.raced
    );
    println!(
        "  Alias members     : {} populated, {} skipped, {} cycles",
        aliases.populated, aliases.skipped, aliases.cycles
    );
    println!(
        "  Permitted senders : {} created, {} existing, {} raced, {} empty",
        senders.created, senders.existing, senders.raced, senders.empty
    );
    println!();
    println!("  Entries created   : {}", report.entries_created());
}

fn cmd_init(output: &Path) -> Result<()> {
    let default_config = r#"# ldapmigrate Configuration

[logging]
level = "info"

[source]
users_db = "/home/user-data/mail/users.sqlite"
# display_names_db = "/home/user-data/mail/roundcube/roundcube.sqlite"

[directory]
url = "ldap://127.0.0.1"
bind_dn = "cn=admin,dc=mailinabox"
bind_password_env = "LDAP_ADMIN_PASSWORD"
starttls = false
timeout_secs = 30
search_base = "dc=mailinabox"
users_base = "ou=Users,dc=mailinabox"
domains_base = "ou=domains,dc=mailinabox"
aliases_base = "ou=aliases,ou=Users,dc=mailinabox"
permitted_senders_base = "ou=permitted-senders,ou=Config,dc=mailinabox"
"#;

    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }

    std::fs::write(output, default_config).context("failed to write config file")?;

    println!("Default configuration written to {}", output.display());
    println!();
    println!("Next steps:");
    println!("  1. Edit the config file with your directory details");
    println!("  2. Set the bind password variable (LDAP_ADMIN_PASSWORD)");
    println!(
        "  3. Validate with: ldapmigrate validate --config {}",
        output.display()
    );
    println!(
        "  4. Migrate with: ldapmigrate run --config {}",
        output.display()
    );

    Ok(())
}

fn cmd_validate(config_path: &Path) -> Result<()> {
    println!("Validating configuration: {}", config_path.display());
    println!();

    let mut config =
        MigrateConfig::load_from_file(config_path).context("failed to parse configuration")?;
    println!("  [OK] TOML structure is valid");

    match config.resolve_env_vars() {
        Ok(()) => println!("  [OK] Bind password resolved"),
        Err(e) => println!("  [WARN] {}", e),
    }

    match config.validate() {
        Ok(()) => {
            println!("  [OK] All required fields are valid");
        }
        Err(e) => {
            println!("  [FAIL] Validation error: {}", e);
            anyhow::bail!("configuration validation failed");
        }
    }

    let dir = &config.directory;
    println!();
    println!("Configuration summary:");
    println!("  Directory URL   : {}", dir.url);
    println!("  Bind DN         : {}", dir.bind_dn);
    println!(
        "  Bind password   : {}",
        if dir.bind_password.is_some() {
            "set"
        } else {
            "NOT SET"
        }
    );
    println!("  StartTLS        : {}", dir.starttls);
    println!("  Users DB        : {}", config.source.users_db.display());
    println!(
        "  Display names DB: {}",
        config
            .source
            .display_names_db
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "none".to_string())
    );
    println!("  Search base     : {}", dir.bases.search_base);
    println!("  Users base      : {}", dir.bases.users_base);
    println!("  Domains base    : {}", dir.bases.domains_base);
    println!("  Aliases base    : {}", dir.bases.aliases_base);
    println!("  Senders base    : {}", dir.bases.permitted_senders_base);
    println!();
    println!("Configuration is valid.");

    Ok(())
}
