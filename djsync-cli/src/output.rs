//! Terminal output formatting for reset and resequence.
//! Uses comfy-table for the migration plan and colored for
//! status-aware terminal styling.

use std::path::Path;

use colored::Colorize;
use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, ContentArrangement, Table};
use serde::Serialize;

use djsync_core::migration::MigrationTarget;
use djsync_core::{
    CheckoutStatus, ResequenceOutcome, ResequencePlan, ResequenceReport, ResetPlan, ResetReport,
};

/// Print any report as pretty JSON.
pub fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => log::error!("Failed to serialize report: {}", e),
    }
}

/// Format migration targets as a table.
fn targets_table(targets: &[MigrationTarget]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![Cell::new("App"), Cell::new("Migration")]);

    for target in targets {
        table.add_row(vec![Cell::new(&target.app), Cell::new(&target.migration)]);
    }
    table
}

/// Printed when INSTALLED_APPS could not be loaded and nothing is filtered.
fn print_fallback_warning() {
    println!(
        "{}",
        "WARNING: Could not load INSTALLED_APPS. Including all repo apps.".yellow()
    );
}

/// Print the reset plan before any migrate command runs.
pub fn print_reset_plan(plan: &ResetPlan, project_root: &Path, dry_run: bool) {
    if plan.already_on_branch {
        println!(
            "{}",
            format!(
                "Already on {}. Nothing to do. Use --force to reset anyway.",
                plan.branch
            )
            .green()
        );
        return;
    }

    println!("Project root: {}", project_root.display());
    println!("Current branch: {}", plan.current_branch);
    println!("Target branch: {}", plan.branch);
    if dry_run {
        println!("{}", "(dry run - no changes will be made)".dimmed());
    }
    if plan.included_all_apps() {
        print_fallback_warning();
    }
    println!();

    if plan.targets.is_empty() {
        println!(
            "{}",
            format!("No migrations found on {}. Nothing to reset.", plan.branch).yellow()
        );
    } else {
        let heading = if dry_run {
            format!("Would reset migrations to match {}:", plan.branch)
        } else {
            format!("Resetting migrations to match {}:", plan.branch)
        };
        println!("{}", heading.bold());
        println!("{}", targets_table(&plan.targets));

        if dry_run {
            for command in &plan.commands {
                println!("  {} would run: {}", "[dry-run]".cyan(), command);
            }
        }
    }
    println!();
}

/// Print how a reset ended.
pub fn print_reset_report(report: &ResetReport) {
    match &report.checkout {
        CheckoutStatus::Skipped => println!("Skipping checkout (--skip-checkout)."),
        CheckoutStatus::Planned { command } => println!("Would run: {}", command),
        CheckoutStatus::Completed => {
            println!("Checked out {}.", report.plan.branch);
            println!("{}", "Done.".green().bold());
        }
        CheckoutStatus::NotNeeded => {}
    }
}

/// Print the files a resequence would delete.
pub fn print_resequence_plan(plan: &ResequencePlan) {
    if plan.already_on_branch {
        println!(
            "{}",
            format!(
                "Already on {}. Nothing to resequence. Use --force to check anyway.",
                plan.branch
            )
            .green()
        );
        return;
    }

    if plan.included_all_apps() {
        print_fallback_warning();
    }

    if plan.is_empty() {
        println!(
            "{}",
            "No feature-only migrations found. Nothing to resequence.".green()
        );
        return;
    }

    println!(
        "{}",
        format!(
            "Found {} migration(s) on this branch that are not on '{}':",
            plan.total(),
            plan.branch
        )
        .yellow()
        .bold()
    );
    for path in plan.relative_paths() {
        println!("  {} {}", "✗".red(), path);
    }
    println!();
}

/// Print the deletion count before makemigrations runs.
pub fn print_resequence_deleted(report: &ResequenceReport) {
    if report.outcome == ResequenceOutcome::Deleted {
        println!("Deleted {} file(s).", report.deleted.len());
        println!("Running: {}", report.plan.regenerate_command);
    }
}

/// Print the outcome of a resequence run.
pub fn print_resequence_report(report: &ResequenceReport) {
    match report.outcome {
        ResequenceOutcome::AlreadyOnBranch
        | ResequenceOutcome::NothingToDo
        | ResequenceOutcome::Deleted => {}
        ResequenceOutcome::DryRun => {
            println!("{}", "(dry run - no files will be deleted)".dimmed());
            println!(
                "Would delete the above files, then run: {}",
                report.plan.regenerate_command
            );
            println!("To apply, run with --apply and confirm when prompted (or --yes).");
        }
        ResequenceOutcome::Applied => {
            println!(
                "{}",
                "Done. Review the new migration(s) and commit as needed."
                    .green()
                    .bold()
            );
        }
    }
}
