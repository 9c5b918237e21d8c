//! Reset the database's migration state to the target branch, then check it out.

use serde::Serialize;

use crate::error::Result;
use crate::git::VersionControl;
use crate::manage::{self, ManagementRunner};
use crate::migration::MigrationTarget;
use crate::DjangoSync;

/// Options for the reset command.
#[derive(Debug, Clone)]
pub struct ResetOptions {
    /// Branch whose latest migrations define the desired state.
    pub branch: String,
    /// Report planned commands without running anything.
    pub dry_run: bool,
    /// Leave the working tree on the current branch.
    pub skip_checkout: bool,
    /// Run even when already on the target branch.
    pub force: bool,
}

/// What happened to the final checkout step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CheckoutStatus {
    /// Not attempted because of `--skip-checkout`.
    Skipped,
    /// Dry run; the command that would have been run.
    Planned { command: String },
    /// The working tree is now on the target branch.
    Completed,
    /// Nothing ran because the current branch is already the target.
    NotNeeded,
}

/// Migrate commands needed to reach the target branch's state.
#[derive(Debug, Clone, Serialize)]
pub struct ResetPlan {
    /// Target branch.
    pub branch: String,
    /// Branch checked out when the plan was made.
    pub current_branch: String,
    /// Whether the run is a no-op because the target is already checked out.
    pub already_on_branch: bool,
    /// Whether INSTALLED_APPS restricted the app list. `false` after a
    /// failed settings load means every app in the repository is included.
    pub apps_filtered: bool,
    /// Latest migration per app on the target branch, sorted by app.
    pub targets: Vec<MigrationTarget>,
    /// Migrate command line for each target, in order.
    pub commands: Vec<String>,
}

impl ResetPlan {
    /// Whether every app in the repository was included because
    /// INSTALLED_APPS could not be loaded.
    pub fn included_all_apps(&self) -> bool {
        !self.already_on_branch && !self.apps_filtered
    }
}

/// Result of a reset run.
#[derive(Debug, Serialize)]
pub struct ResetReport {
    #[serde(flatten)]
    pub plan: ResetPlan,
    /// Whether this was a dry run.
    pub dry_run: bool,
    /// Outcome of the checkout step.
    pub checkout: CheckoutStatus,
}

/// Work out which migration each app goes back to.
///
/// Verifies the target branch and skips everything else if it is already
/// checked out (unless forced).
pub fn plan<V: VersionControl, M: ManagementRunner>(
    sync: &DjangoSync<V, M>,
    options: &ResetOptions,
) -> Result<ResetPlan> {
    let branch = options.branch.as_str();
    sync.verify_branch(branch)?;

    let current_branch = sync.current_branch()?;
    if current_branch == branch && !options.force {
        log::info!("Already on target branch, nothing to do; branch={}", branch);
        return Ok(ResetPlan {
            branch: branch.to_string(),
            current_branch,
            already_on_branch: true,
            apps_filtered: false,
            targets: Vec::new(),
            commands: Vec::new(),
        });
    }

    let filter = sync.installed_apps();
    let targets = sync.branch_index(branch, filter.as_ref())?.latest();
    if targets.is_empty() {
        log::info!("No migrations found on target branch; branch={}", branch);
    }

    let commands = targets
        .iter()
        .map(|t| sync.manage().command_line(&manage::migrate_args(&t.app, &t.migration)))
        .collect();

    Ok(ResetPlan {
        branch: branch.to_string(),
        current_branch,
        already_on_branch: false,
        apps_filtered: filter.is_some(),
        targets,
        commands,
    })
}

/// Carry out a plan.
///
/// 1. Run `manage.py migrate <app> <migration> --noinput` for each target,
///    stopping at the first failure
/// 2. Check out the target branch
pub fn execute<V: VersionControl, M: ManagementRunner>(
    sync: &DjangoSync<V, M>,
    plan: ResetPlan,
    options: &ResetOptions,
) -> Result<ResetReport> {
    if plan.already_on_branch {
        return Ok(ResetReport {
            plan,
            dry_run: options.dry_run,
            checkout: CheckoutStatus::NotNeeded,
        });
    }

    let branch = plan.branch.as_str();
    log::info!(
        "Resetting migrations; project_root={}, current_branch={}, target_branch={}, dry_run={}",
        sync.project_root().display(),
        plan.current_branch,
        branch,
        options.dry_run
    );

    if !options.dry_run {
        for target in &plan.targets {
            log::info!(
                "Migrating app; app={}, migration={}",
                target.app,
                target.migration
            );
            let args = manage::migrate_args(&target.app, &target.migration);
            if let Err(e) = sync.manage().run(&args) {
                log::error!("Migrate failed; app={}, error={}", target.app, e);
                return Err(e);
            }
        }
    }

    let checkout = if options.skip_checkout {
        CheckoutStatus::Skipped
    } else if options.dry_run {
        CheckoutStatus::Planned {
            command: format!("git checkout {}", branch),
        }
    } else {
        log::info!("Checking out target branch; branch={}", branch);
        sync.vcs().checkout(branch)?;
        CheckoutStatus::Completed
    };

    Ok(ResetReport {
        plan,
        dry_run: options.dry_run,
        checkout,
    })
}
