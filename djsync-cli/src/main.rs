//! CLI entry point for django-sync-migrations.
//! Provides clap-based routing for the reset and resequence commands,
//! logging setup, and error reporting.

mod output;

use std::io::{self, ErrorKind, Write};
use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use colored::Colorize;

use djsync_core::config::{CliOverrides, SyncConfig};
use djsync_core::error::SyncError;
use djsync_core::{DjangoSync, ResequenceOptions, ResequencePlan, ResetOptions, StdoutTarget};

/// Top-level CLI definition with global flags and subcommand dispatch.
#[derive(Parser)]
#[command(
    name = "django-sync-migrations",
    about = "Reset Django migrations to a target branch's state, then check it out",
    version = concat!(
        env!("CARGO_PKG_VERSION"),
        " (", env!("GIT_HASH"), " ", env!("BUILD_TIME"), ")"
    ),
    propagate_version = true
)]
struct Cli {
    /// Config file path
    #[arg(short, long, value_name = "PATH", global = true)]
    config: Option<String>,

    /// Target branch (default: dev or DEV_BRANCH env)
    #[arg(short, long, value_name = "NAME", global = true)]
    branch: Option<String>,

    /// Print what would be done without executing
    #[arg(long, global = true)]
    dry_run: bool,

    /// Only reset migrations, do not checkout branch
    #[arg(long, global = true)]
    skip_checkout: bool,

    /// Run even when already on the target branch
    #[arg(long, global = true)]
    force: bool,

    /// Python interpreter used to run manage.py
    #[arg(long, value_name = "PATH", global = true)]
    python: Option<PathBuf>,

    /// Django settings module (overrides manage.py)
    #[arg(long, value_name = "MODULE", global = true)]
    settings: Option<String>,

    /// Output results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Enable verbose/debug output (shows how INSTALLED_APPS was loaded)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands. `reset` runs when none is given.
#[derive(Subcommand)]
enum Commands {
    /// Migrate each app back to its latest migration on the target branch, then checkout
    Reset,

    /// Delete feature-only migrations and regenerate them after the target's numbering
    Resequence {
        /// Delete and regenerate (default is a dry run)
        #[arg(long)]
        apply: bool,

        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    let json_output = cli.json;

    // Set up logging (suppress when JSON output is requested)
    let filter = if cli.json || cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };

    env_logger::Builder::new()
        .parse_env(env_logger::Env::default().default_filter_or(filter))
        .format_target(false)
        .format_timestamp(None)
        .init();

    if let Err(e) = run(cli) {
        print_error(&e, json_output);
        process::exit(1);
    }
}

/// Build configuration, discover the project, and dispatch the chosen command.
fn run(cli: Cli) -> Result<(), SyncError> {
    let json_output = cli.json;

    let overrides = CliOverrides {
        branch: cli.branch,
        skip_checkout: cli.skip_checkout.then_some(true),
        python: cli.python,
        settings_module: cli.settings,
    };
    let config = SyncConfig::load(cli.config.as_deref(), &overrides)?;

    let cwd = std::env::current_dir()?;
    let mut sync = DjangoSync::discover(config, &cwd)?;
    if json_output {
        // stdout carries only the JSON report
        sync = sync.with_child_stdout(StdoutTarget::Stderr);
    }
    let branch = sync.config.sync.branch.clone();

    match cli.command.unwrap_or(Commands::Reset) {
        Commands::Reset => {
            let options = ResetOptions {
                branch,
                dry_run: cli.dry_run,
                skip_checkout: sync.config.sync.skip_checkout,
                force: cli.force,
            };
            let plan = sync.plan_reset(&options)?;
            if !json_output {
                output::print_reset_plan(&plan, sync.project_root(), options.dry_run);
            }
            let report = sync.execute_reset(plan, &options)?;
            if json_output {
                output::print_json(&report);
            } else {
                output::print_reset_report(&report);
            }
        }
        Commands::Resequence { apply, yes } => {
            // --dry-run always wins over --apply
            let options = ResequenceOptions {
                branch,
                dry_run: cli.dry_run || !apply,
                yes,
                force: cli.force,
            };
            let plan = sync.plan_resequence(&options)?;
            if !json_output {
                output::print_resequence_plan(&plan);
            }
            let report = sync.delete_resequenced(plan, &options, |plan| {
                confirm_on_stdin(plan, json_output)
            })?;
            if !json_output {
                output::print_resequence_deleted(&report);
            }
            let report = sync.regenerate_migrations(report)?;
            if json_output {
                output::print_json(&report);
            } else {
                output::print_resequence_report(&report);
            }
        }
    }

    Ok(())
}

/// Ask on stdin whether to go ahead. EOF or an interrupted read counts as "no".
///
/// The prompt goes to stderr when stdout is reserved for JSON.
fn confirm_on_stdin(_plan: &ResequencePlan, to_stderr: bool) -> Result<bool, SyncError> {
    let mut prompt: Box<dyn Write> = if to_stderr {
        Box::new(io::stderr())
    } else {
        Box::new(io::stdout())
    };
    write!(prompt, "Delete these migrations and run makemigrations? [y/N]: ")?;
    prompt.flush()?;

    let mut input = String::new();
    match io::stdin().read_line(&mut input) {
        Ok(0) => {
            writeln!(prompt)?;
            return Ok(false);
        }
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::Interrupted => {
            writeln!(prompt)?;
            return Ok(false);
        }
        Err(e) => return Err(e.into()),
    }

    let reply = input.trim().to_lowercase();
    Ok(matches!(reply.as_str(), "y" | "yes"))
}

/// Print a formatted error message with actionable hints to stderr.
fn print_error(error: &SyncError, json_output: bool) {
    if let SyncError::UserAborted = error {
        if json_output {
            eprintln!("Aborted.");
        } else {
            println!("{}", "Aborted.".yellow());
        }
        return;
    }

    eprintln!("{} {}", "ERROR:".red().bold(), error);

    match error {
        SyncError::ConfigError(_) => {
            eprintln!(
                "{}",
                "Hint: Check your django-sync.toml or the DEV_BRANCH environment variable."
                    .dimmed()
            );
        }
        SyncError::BranchNotFound { .. } => {
            eprintln!(
                "{}",
                "Hint: Pass --branch <name> or set DEV_BRANCH to an existing branch.".dimmed()
            );
        }
        SyncError::CommandTimedOut { .. } => {
            eprintln!(
                "{}",
                "Hint: Raise [project] settings_timeout in django-sync.toml, \
                 or pass --settings so INSTALLED_APPS can be read directly."
                    .dimmed()
            );
        }
        SyncError::CommandFailed { command, .. } if command.contains("makemigrations") => {
            eprintln!(
                "{}",
                "Hint: Feature-only migrations were already deleted. \
                 Fix the error and run 'python manage.py makemigrations'."
                    .dimmed()
            );
        }
        SyncError::CommandFailed { .. } => {
            eprintln!(
                "{}",
                "Hint: Check that the database is reachable \
                 and the project's virtualenv is set up (or pass --python)."
                    .dimmed()
            );
        }
        _ => {}
    }
}
