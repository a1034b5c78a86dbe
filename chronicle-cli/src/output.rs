//! Terminal output formatting for all chronicle commands.
//! Uses comfy-table for tabular output and colored for
//! status-aware terminal styling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use colored::Colorize;
use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, ContentArrangement, Table};

use chronicle_core::commands::make::MakeReport;
use chronicle_core::migration::{
    FileStatus, MigrationDirection, MigrationListStatus, MigratorEvent, MigratorHook,
    MigratorStatus,
};
use chronicle_core::seeds::SeederStatus;
use chronicle_core::{
    HealthReport, MigrationReport, RefreshReport, SeedReport, StatusReport, TruncateReport,
    WipeReport,
};

/// Per-file progress lines driven by runner events.
///
/// The verb follows the direction announced by each run's start event, so
/// one hook serves the reset and migrate halves of a refresh.
pub fn progress_hook(dry_run: bool) -> Arc<dyn MigratorHook> {
    let down = AtomicBool::new(false);
    Arc::new(move |event: &MigratorEvent<'_>| match event {
        MigratorEvent::Start(direction) => {
            down.store(
                matches!(direction, MigrationDirection::Down { .. }),
                Ordering::SeqCst,
            );
        }
        MigratorEvent::CreateSchemaTable => {
            println!("{} {}", "❯".dimmed(), "created schema table".dimmed());
        }
        MigratorEvent::CreateSchemaVersionsTable => {
            println!("{} {}", "❯".dimmed(), "created schema versions table".dimmed());
        }
        MigratorEvent::MigrationStart(file) => {
            let verb = if down.load(Ordering::SeqCst) { "reverting" } else { "migrating" };
            println!("{} {} {}", "❯".cyan(), verb.dimmed(), file.name);
        }
        MigratorEvent::MigrationCompleted(file) => {
            let verb = match (down.load(Ordering::SeqCst), dry_run) {
                (_, true) => "dry-run",
                (true, false) => "reverted",
                (false, false) => "migrated",
            };
            println!("{} {} {}", "❯".green(), verb.green(), file.name);
            for query in &file.queries {
                println!("{}", indent(query).dimmed());
            }
        }
        MigratorEvent::MigrationError(file, error) => {
            println!("{} {} {}", "❯".red(), "error".red().bold(), file.name);
            println!("  {}", error.to_string().red());
        }
        MigratorEvent::End => {}
    })
}

fn indent(sql: &str) -> String {
    sql.lines()
        .map(|l| format!("    {}", l))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Print the outcome of an up or down run.
pub fn print_migration_report(report: &MigrationReport, compact: bool) {
    let down = report.direction == "down";
    let completed = report
        .files
        .iter()
        .filter(|f| f.status == FileStatus::Completed)
        .count();

    match report.status {
        MigratorStatus::Skipped => {
            let message = if down {
                "Already at the latest batch. Nothing to roll back."
            } else {
                "Already up to date. No migration necessary."
            };
            println!("{}", message.green());
            return;
        }
        MigratorStatus::Error | MigratorStatus::Pending => {}
        MigratorStatus::Completed => {
            let verb = if down { "Reverted" } else { "Migrated" };
            let suffix = if report.dry_run { " (dry run)" } else { "" };
            println!(
                "{}",
                format!("{} {} schema file(s){}", verb, completed, suffix)
                    .green()
                    .bold()
            );
            return;
        }
    }

    if let Some(ref error) = report.error {
        if compact {
            println!("{} {}", "❯".red(), error.red());
        } else {
            println!("{} {}", "ERROR:".red().bold(), error);
        }
    }
    if completed > 0 {
        println!(
            "{}",
            format!("Completed {} schema file(s) before the failure", completed).yellow()
        );
    }
    for name in &report.not_attempted {
        println!("  {} {}", "skipped".dimmed(), name.dimmed());
    }
}

/// Format schema file status as a colored table.
pub fn print_status_table(report: &StatusReport) {
    if report.files.is_empty() {
        println!("{}", "No schema files found.".yellow());
        return;
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Name"),
            Cell::new("Status"),
            Cell::new("Batch"),
            Cell::new("Migrated At"),
        ]);

    for file in &report.files {
        table.add_row(vec![
            Cell::new(&file.name),
            Cell::new(format_list_status(file.status)),
            Cell::new(file.batch.map(|b| b.to_string()).unwrap_or_default()),
            Cell::new(file.migration_time.as_deref().unwrap_or("")),
        ]);
    }

    println!("{table}");

    let corrupt = report.count(MigrationListStatus::Corrupt);
    if corrupt > 0 {
        println!(
            "{}",
            format!(
                "{} recorded schema file(s) are missing from disk.",
                corrupt
            )
            .red()
        );
    }
}

/// Return a colored string representation of a list status.
fn format_list_status(status: MigrationListStatus) -> String {
    match status {
        MigrationListStatus::Pending => "pending".yellow().to_string(),
        MigrationListStatus::Migrated => "migrated".green().to_string(),
        MigrationListStatus::Corrupt => "corrupt".red().bold().to_string(),
    }
}

/// Print seeder results.
pub fn print_seed_report(report: &SeedReport, compact: bool) {
    if report.seeders.is_empty() {
        println!("{}", "No seeders found.".yellow());
        return;
    }

    if compact {
        let completed = report
            .seeders
            .iter()
            .filter(|s| s.status == SeederStatus::Completed)
            .count();
        let line = format!(
            "Ran {} seeder(s), {} failed",
            completed,
            report.failed()
        );
        if report.failed() > 0 {
            println!("{}", line.red());
        } else {
            println!("{}", line.green());
        }
        return;
    }

    for seeder in &report.seeders {
        match seeder.status {
            SeederStatus::Completed => println!("{} {} {}", "❯".green(), "completed".green(), seeder.name),
            SeederStatus::Ignored => println!(
                "{} {} {} {}",
                "❯".dimmed(),
                "ignored".dimmed(),
                seeder.name,
                format!("(not enabled for {})", report.environment).dimmed()
            ),
            SeederStatus::Failed => {
                println!("{} {} {}", "❯".red(), "failed".red().bold(), seeder.name);
                if let Some(ref error) = seeder.error {
                    println!("  {}", error.red());
                }
            }
            SeederStatus::Pending => println!("{} {} {}", "❯".dimmed(), "pending".dimmed(), seeder.name),
        }
    }
}

/// Print a refresh or fresh report step by step.
pub fn print_refresh_report(report: &RefreshReport, compact: bool) {
    if let Some(ref wipe) = report.wipe {
        print_wipe_report(wipe);
    }
    if let Some(ref reset) = report.reset {
        print_migration_report(reset, compact);
    }
    if let Some(ref migrate) = report.migrate {
        print_migration_report(migrate, compact);
    }
    if let Some(ref seed) = report.seed {
        print_seed_report(seed, compact);
    }
}

/// Print tables emptied by truncate.
pub fn print_truncate_report(report: &TruncateReport) {
    if report.tables.is_empty() {
        println!("{}", "Nothing to truncate.".green());
        return;
    }
    println!(
        "{}",
        format!(
            "Truncated {} table(s) in {}:",
            report.tables.len(),
            report.database
        )
        .green()
        .bold()
    );
    for table in &report.tables {
        println!("  {} {}", "→".green(), table);
    }
}

/// Print tables dropped by wipe.
pub fn print_wipe_report(report: &WipeReport) {
    if report.tables.is_empty() {
        println!("{}", "Nothing to drop.".green());
        return;
    }
    println!(
        "{}",
        format!(
            "Dropped {} table(s) in {}:",
            report.tables.len(),
            report.database
        )
        .green()
        .bold()
    );
    for table in &report.tables {
        println!("  {} {}", "✗".red(), table);
    }
}

/// Print a health check result.
pub fn print_health_report(report: &HealthReport) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Connection"),
            Cell::new("URL"),
            Cell::new("Database"),
            Cell::new("Cluster"),
            Cell::new("Status"),
        ]);
    let status = if report.healthy {
        "healthy".green().to_string()
    } else {
        "unreachable".red().bold().to_string()
    };
    table.add_row(vec![
        Cell::new(&report.connection),
        Cell::new(&report.url),
        Cell::new(&report.database),
        Cell::new(report.cluster.as_deref().unwrap_or("")),
        Cell::new(status),
    ]);
    println!("{table}");

    if let Some(ref error) = report.error {
        println!("{} {}", "ERROR:".red().bold(), error);
    }
}

/// Print the file created by a make command.
pub fn print_make_report(report: &MakeReport) {
    println!(
        "{} {}",
        "CREATE:".green().bold(),
        report.path.display()
    );
}
