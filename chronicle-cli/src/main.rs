//! CLI entry point for the chronicle migration tool.
//! Provides clap-based command routing, production consent prompts, and
//! exit code mapping based on error type.

mod output;

use std::io::{BufRead, IsTerminal, Write};
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::Colorize;
use serde::Serialize;

use chronicle_core::config::{ChronicleConfig, CliOverrides};
use chronicle_core::error::ChronicleError;
use chronicle_core::migration::MigratorHook;
use chronicle_core::Chronicle;

/// Top-level CLI definition with global flags and subcommand dispatch.
#[derive(Parser)]
#[command(
    name = "chronicle",
    about = "Schema migrations and seeders for ClickHouse",
    version,
    propagate_version = true
)]
struct Cli {
    /// Config file path
    #[arg(short, long, value_name = "PATH", global = true)]
    config: Option<String>,

    /// Connection to use (overrides config)
    #[arg(long, value_name = "NAME", global = true)]
    connection: Option<String>,

    /// Runtime environment; "production" enables safety prompts
    #[arg(long, value_name = "ENV", global = true)]
    environment: Option<String>,

    /// Server URL of the selected connection (overrides config)
    #[arg(long, value_name = "URL", global = true)]
    url: Option<String>,

    /// Database of the selected connection (overrides config)
    #[arg(long, value_name = "DATABASE", global = true)]
    database: Option<String>,

    /// Log every statement sent to the server
    #[arg(long, global = true)]
    debug: bool,

    /// Output results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Enable verbose/debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// All available chronicle subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Apply pending schema files
    #[command(name = "migration:run")]
    MigrationRun {
        /// Skip the production confirmation prompt
        #[arg(long)]
        force: bool,
        /// Print the SQL that would run without changing anything
        #[arg(long)]
        dry_run: bool,
        /// Print a one-line summary instead of per-file progress
        #[arg(long)]
        compact_output: bool,
    },

    /// Roll back schema files
    #[command(name = "migration:rollback")]
    MigrationRollback {
        /// Skip the production confirmation prompt
        #[arg(long)]
        force: bool,
        /// Print the SQL that would run without changing anything
        #[arg(long)]
        dry_run: bool,
        /// Roll back every batch above this one (default: latest batch only)
        #[arg(long, value_name = "N")]
        batch: Option<u32>,
        /// Roll back at most this many files of the latest batch
        #[arg(long, value_name = "N", allow_negative_numbers = true)]
        step: Option<i64>,
        /// Print a one-line summary instead of per-file progress
        #[arg(long)]
        compact_output: bool,
    },

    /// Show schema file status
    #[command(name = "migration:status")]
    MigrationStatus,

    /// Roll back every batch
    #[command(name = "migration:reset")]
    MigrationReset {
        /// Skip the production confirmation prompt
        #[arg(long)]
        force: bool,
        /// Print the SQL that would run without changing anything
        #[arg(long)]
        dry_run: bool,
        /// Print a one-line summary instead of per-file progress
        #[arg(long)]
        compact_output: bool,
    },

    /// Roll back every batch and migrate again
    #[command(name = "migration:refresh")]
    MigrationRefresh {
        /// Skip the production confirmation prompt
        #[arg(long)]
        force: bool,
        /// Run seeders afterwards
        #[arg(long)]
        seed: bool,
        /// Print a one-line summary instead of per-file progress
        #[arg(long)]
        compact_output: bool,
    },

    /// Drop every table and migrate from scratch
    #[command(name = "migration:fresh")]
    MigrationFresh {
        /// Skip the production confirmation prompt
        #[arg(long)]
        force: bool,
        /// Run seeders afterwards
        #[arg(long)]
        seed: bool,
        /// Print a one-line summary instead of per-file progress
        #[arg(long)]
        compact_output: bool,
    },

    /// Run seeder files
    #[command(name = "db:seed")]
    DbSeed {
        /// Only run these seeders, comma-separated
        #[arg(long, value_name = "FILES", value_delimiter = ',')]
        files: Vec<String>,
        /// Print a one-line summary instead of per-file results
        #[arg(long)]
        compact_output: bool,
    },

    /// Empty every table except the schema tables
    #[command(name = "db:truncate")]
    DbTruncate {
        /// Skip the production confirmation prompt
        #[arg(long)]
        force: bool,
    },

    /// Drop every table of the database
    #[command(name = "db:wipe")]
    DbWipe {
        /// Skip the production confirmation prompt
        #[arg(long)]
        force: bool,
    },

    /// Check the server is reachable
    #[command(name = "db:check")]
    DbCheck,

    /// Create a new schema file
    #[command(name = "make:migration")]
    MakeMigration {
        /// Name of the schema file
        name: String,
        /// Directory to create the file in (default: first configured path)
        #[arg(long, value_name = "DIR")]
        folder: Option<String>,
    },

    /// Create a new seeder file
    #[command(name = "make:seeder")]
    MakeSeeder {
        /// Name of the seeder file
        name: String,
        /// Directory to create the file in (default: first configured path)
        #[arg(long, value_name = "DIR")]
        folder: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Set up logging (suppress when JSON output is requested)
    let filter = if cli.json || cli.quiet {
        "error"
    } else if cli.verbose || cli.debug {
        "debug"
    } else {
        "warn"
    };

    env_logger::Builder::new()
        .parse_env(env_logger::Env::default().default_filter_or(filter))
        .format_target(false)
        .format_timestamp(None)
        .init();

    match run(cli).await {
        Ok(0) => {}
        Ok(code) => process::exit(code),
        Err(e) => {
            log::debug!("Command failed; exit_code={}, error={:?}", exit_code(&e), e);
            print_error(&e);
            process::exit(exit_code(&e));
        }
    }
}

/// Map error types to differentiated exit codes.
fn exit_code(error: &ChronicleError) -> i32 {
    match error {
        ChronicleError::ConfigError(_) | ChronicleError::InvalidIdentifier(_) => 2,
        ChronicleError::UnmanagedConnection { .. }
        | ChronicleError::ConnectionClosed { .. }
        | ChronicleError::HttpError(_) => 3,
        ChronicleError::RollbackDisabled => 4,
        _ => 1,
    }
}

/// Exit code for a runner failure stored on a report.
fn failure_code(failure: Option<&ChronicleError>) -> i32 {
    failure.map(exit_code).unwrap_or(0)
}

/// Exit code when the user declines a production prompt.
const CONSENT_DENIED: i32 = 4;

/// Build configuration, open the primary connection lazily, dispatch the
/// chosen subcommand, and close every connection before returning.
async fn run(cli: Cli) -> Result<i32, ChronicleError> {
    let overrides = CliOverrides {
        connection: cli.connection.clone(),
        environment: cli.environment.clone(),
        url: cli.url.clone(),
        database: cli.database.clone(),
        debug: cli.debug.then_some(true),
    };

    let mut config = ChronicleConfig::load(cli.config.as_deref(), &overrides)?;
    if cli.debug {
        config.pretty_print_debug_queries = true;
    }

    log::debug!(
        "Dispatching command; connection={}, environment={}",
        config.connection,
        config.environment
    );
    let chronicle = Chronicle::new(config);
    let result = dispatch(&cli, &chronicle).await;
    chronicle.close().await;
    result
}

/// Ask before a destructive command touches a production database.
///
/// A non-interactive stdin counts as a refusal.
fn confirm_production(chronicle: &Chronicle, force: bool, action: &str) -> bool {
    if force || !chronicle.config.in_production() {
        return true;
    }
    if !std::io::stdin().is_terminal() {
        log::warn!("Production prompt skipped, stdin is not a terminal; action={}", action);
        eprintln!(
            "{}",
            format!("Refusing to {} in production without --force.", action).red()
        );
        return false;
    }

    eprint!(
        "{} ",
        format!(
            "You are in production environment. Want to continue to {}? [y/N]",
            action
        )
        .yellow()
        .bold()
    );
    // An unflushed prompt still leaves the answer readable.
    std::io::stderr().flush().ok();

    let mut answer = String::new();
    if let Err(e) = std::io::stdin().lock().read_line(&mut answer) {
        log::warn!("Could not read production prompt answer; error={}", e);
        return false;
    }
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

fn print_json<T: Serialize>(value: &T) -> Result<(), ChronicleError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Progress hooks for runner output; none when printing JSON or compact output.
fn hooks(json: bool, compact: bool, dry_run: bool) -> Vec<Arc<dyn MigratorHook>> {
    if json || compact {
        Vec::new()
    } else {
        vec![output::progress_hook(dry_run)]
    }
}

/// Execute a subcommand against the primary connection.
async fn dispatch(cli: &Cli, chronicle: &Chronicle) -> Result<i32, ChronicleError> {
    let json = cli.json;

    match &cli.command {
        Commands::MigrationRun {
            force,
            dry_run,
            compact_output,
        } => {
            if !dry_run && !confirm_production(chronicle, *force, "run migrations") {
                return Ok(CONSENT_DENIED);
            }
            let hooks = hooks(json, *compact_output, *dry_run);
            let report = chronicle.migrate(*dry_run, &hooks).await?;
            if json {
                print_json(&report)?;
            } else {
                output::print_migration_report(&report, *compact_output);
            }
            Ok(failure_code(report.failure.as_ref()))
        }
        Commands::MigrationRollback {
            force,
            dry_run,
            batch,
            step,
            compact_output,
        } => {
            if !dry_run && !confirm_production(chronicle, *force, "rollback migrations") {
                return Ok(CONSENT_DENIED);
            }
            let hooks = hooks(json, *compact_output, *dry_run);
            let report = chronicle.rollback(*batch, *step, *dry_run, &hooks).await?;
            if json {
                print_json(&report)?;
            } else {
                output::print_migration_report(&report, *compact_output);
            }
            Ok(failure_code(report.failure.as_ref()))
        }
        Commands::MigrationStatus => {
            let report = chronicle.status().await?;
            if json {
                print_json(&report)?;
            } else {
                output::print_status_table(&report);
            }
            Ok(0)
        }
        Commands::MigrationReset {
            force,
            dry_run,
            compact_output,
        } => {
            if !dry_run && !confirm_production(chronicle, *force, "reset migrations") {
                return Ok(CONSENT_DENIED);
            }
            let hooks = hooks(json, *compact_output, *dry_run);
            let report = chronicle.reset(*dry_run, &hooks).await?;
            if json {
                print_json(&report)?;
            } else {
                output::print_migration_report(&report, *compact_output);
            }
            Ok(failure_code(report.failure.as_ref()))
        }
        Commands::MigrationRefresh {
            force,
            seed,
            compact_output,
        } => {
            if !confirm_production(chronicle, *force, "refresh migrations") {
                return Ok(CONSENT_DENIED);
            }
            let hooks = hooks(json, *compact_output, false);
            let report = chronicle.refresh(*seed, &hooks).await?;
            if json {
                print_json(&report)?;
            } else {
                output::print_refresh_report(&report, *compact_output);
            }
            Ok(refresh_code(&report))
        }
        Commands::MigrationFresh {
            force,
            seed,
            compact_output,
        } => {
            if !confirm_production(chronicle, *force, "drop all tables and migrate") {
                return Ok(CONSENT_DENIED);
            }
            let hooks = hooks(json, *compact_output, false);
            let report = chronicle.fresh(*seed, &hooks).await?;
            if json {
                print_json(&report)?;
            } else {
                output::print_refresh_report(&report, *compact_output);
            }
            Ok(refresh_code(&report))
        }
        Commands::DbSeed {
            files,
            compact_output,
        } => {
            let selected = (!files.is_empty()).then_some(files.as_slice());
            let report = chronicle.seed(selected).await?;
            if json {
                print_json(&report)?;
            } else {
                output::print_seed_report(&report, *compact_output);
            }
            Ok(if report.failed() > 0 { 1 } else { 0 })
        }
        Commands::DbTruncate { force } => {
            if !confirm_production(chronicle, *force, "truncate all tables") {
                return Ok(CONSENT_DENIED);
            }
            let report = chronicle.truncate().await?;
            if json {
                print_json(&report)?;
            } else {
                output::print_truncate_report(&report);
            }
            Ok(0)
        }
        Commands::DbWipe { force } => {
            if !confirm_production(chronicle, *force, "drop all tables") {
                return Ok(CONSENT_DENIED);
            }
            let report = chronicle.wipe().await?;
            if json {
                print_json(&report)?;
            } else {
                output::print_wipe_report(&report);
            }
            Ok(0)
        }
        Commands::DbCheck => {
            let report = chronicle.check().await?;
            if json {
                print_json(&report)?;
            } else {
                output::print_health_report(&report);
            }
            Ok(if report.healthy { 0 } else { 3 })
        }
        Commands::MakeMigration { name, folder } => {
            let report = chronicle.make_migration(name, folder.as_deref())?;
            if json {
                print_json(&report)?;
            } else {
                output::print_make_report(&report);
            }
            Ok(0)
        }
        Commands::MakeSeeder { name, folder } => {
            let report = chronicle.make_seeder(name, folder.as_deref())?;
            if json {
                print_json(&report)?;
            } else {
                output::print_make_report(&report);
            }
            Ok(0)
        }
    }
}

/// Exit code of a refresh/fresh run: the first failing step decides.
fn refresh_code(report: &chronicle_core::RefreshReport) -> i32 {
    if let Some(code) = report
        .reset
        .as_ref()
        .and_then(|r| r.failure.as_ref())
        .map(exit_code)
    {
        return code;
    }
    if let Some(code) = report
        .migrate
        .as_ref()
        .and_then(|m| m.failure.as_ref())
        .map(exit_code)
    {
        return code;
    }
    if report.seed.as_ref().is_some_and(|s| s.failed() > 0) {
        return 1;
    }
    0
}

/// Print a formatted error message with actionable hints to stderr.
fn print_error(error: &ChronicleError) {
    eprintln!("{} {}", "ERROR:".red().bold(), error);

    // Provide actionable guidance
    match error {
        ChronicleError::ConfigError(_) => {
            eprintln!(
                "{}",
                "Hint: Check your chronicle.toml or set CHRONICLE_URL / CHRONICLE_DATABASE environment variables."
                    .dimmed()
            );
        }
        ChronicleError::UnmanagedConnection { .. } => {
            eprintln!(
                "{}",
                "Hint: Add the connection under [connections.<name>] in chronicle.toml or pick one with --connection."
                    .dimmed()
            );
        }
        ChronicleError::HttpError(_) | ChronicleError::ConnectionClosed { .. } => {
            eprintln!(
                "{}",
                "Hint: Verify the server is running and the URL and credentials are correct. Try 'chronicle db:check'."
                    .dimmed()
            );
        }
        ChronicleError::RollbackDisabled => {
            eprintln!(
                "{}",
                "Hint: Set disable_rollbacks_in_production = false under [connections.<name>.migrations]."
                    .dimmed()
            );
        }
        ChronicleError::PlaceholderNotFound { .. } => {
            eprintln!(
                "{}",
                "Hint: Available placeholders are ${database}, ${cluster}, ${on_cluster} and ${connection}."
                    .dimmed()
            );
        }
        _ => {}
    }
}
