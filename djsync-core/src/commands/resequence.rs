//! Resequence feature-only migrations against the target branch.
//!
//! After rebasing onto the target branch, migrations that exist only on the
//! feature branch can carry numbers that collide with or trail the target's
//! latest migration. They are deleted and regenerated with `makemigrations`
//! so the new files follow the target's numbering.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{Result, SyncError};
use crate::git::VersionControl;
use crate::manage::{self, ManagementRunner};
use crate::migration;
use crate::DjangoSync;

/// Options for the resequence command.
#[derive(Debug, Clone)]
pub struct ResequenceOptions {
    /// Branch whose migrations are authoritative.
    pub branch: String,
    /// Report what would be deleted without touching anything.
    pub dry_run: bool,
    /// Skip the confirmation prompt.
    pub yes: bool,
    /// Examine the working tree even when already on the target branch.
    /// Applying always examines it.
    pub force: bool,
}

impl Default for ResequenceOptions {
    fn default() -> Self {
        Self {
            branch: "dev".to_string(),
            dry_run: true,
            yes: false,
            force: false,
        }
    }
}

/// Feature-only migrations found for a target branch.
#[derive(Debug, Clone, Serialize)]
pub struct ResequencePlan {
    /// Target branch.
    pub branch: String,
    /// Branch checked out when the plan was made.
    pub current_branch: String,
    /// Whether the plan is empty because the target is already checked out.
    pub already_on_branch: bool,
    /// Whether INSTALLED_APPS restricted the app list.
    pub apps_filtered: bool,
    /// Migration file names to delete, per app directory.
    pub to_remove: BTreeMap<String, BTreeSet<String>>,
    /// Command run after deletion to regenerate migrations.
    pub regenerate_command: String,
}

impl ResequencePlan {
    pub fn total(&self) -> usize {
        self.to_remove.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// Whether every app in the repository was included because
    /// INSTALLED_APPS could not be loaded.
    pub fn included_all_apps(&self) -> bool {
        !self.already_on_branch && !self.apps_filtered
    }

    /// `<app>/migrations/<file>` for every planned deletion, sorted.
    pub fn relative_paths(&self) -> Vec<String> {
        self.to_remove
            .iter()
            .flat_map(|(app, files)| files.iter().map(move |f| format!("{}/migrations/{}", app, f)))
            .collect()
    }
}

/// How a resequence run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResequenceOutcome {
    /// The target branch is checked out; nothing was examined.
    AlreadyOnBranch,
    /// No feature-only migrations conflict with the target branch.
    NothingToDo,
    /// Dry run; nothing was deleted.
    DryRun,
    /// Files were deleted; makemigrations has not run yet.
    Deleted,
    /// Files were deleted and makemigrations succeeded.
    Applied,
}

/// Result of a resequence run.
#[derive(Debug, Serialize)]
pub struct ResequenceReport {
    pub plan: ResequencePlan,
    pub outcome: ResequenceOutcome,
    /// Files removed from disk.
    pub deleted: Vec<PathBuf>,
}

/// Compute the feature-only migrations for the target branch.
///
/// A dry run while the target branch is checked out is a no-op unless
/// forced.
pub fn plan<V: VersionControl, M: ManagementRunner>(
    sync: &DjangoSync<V, M>,
    options: &ResequenceOptions,
) -> Result<ResequencePlan> {
    let branch = options.branch.as_str();
    sync.verify_branch(branch)?;

    let current_branch = sync.current_branch()?;
    let regenerate_command = sync
        .manage()
        .command_line(&manage::makemigrations_args());

    if current_branch == branch && options.dry_run && !options.force {
        log::info!("Already on target branch, nothing to resequence; branch={}", branch);
        return Ok(ResequencePlan {
            branch: branch.to_string(),
            current_branch,
            already_on_branch: true,
            apps_filtered: false,
            to_remove: BTreeMap::new(),
            regenerate_command,
        });
    }

    let filter = sync.installed_apps();
    let on_branch = sync.branch_index(branch, filter.as_ref())?.file_sets();
    let in_tree = sync.working_tree_index(filter.as_ref())?.file_sets();
    let to_remove = migration::feature_only(&in_tree, &on_branch);

    log::debug!(
        "Computed feature-only migrations; branch={}, apps={}, files={}",
        branch,
        to_remove.len(),
        to_remove.values().map(BTreeSet::len).sum::<usize>()
    );

    Ok(ResequencePlan {
        branch: branch.to_string(),
        current_branch,
        already_on_branch: false,
        apps_filtered: filter.is_some(),
        to_remove,
        regenerate_command,
    })
}

/// Carry out a plan: confirm, delete, regenerate.
///
/// A dry run returns before `confirm` is called and never touches the
/// filesystem. If makemigrations fails after deletion the files stay
/// deleted.
pub fn apply<V, M, F>(
    sync: &DjangoSync<V, M>,
    plan: ResequencePlan,
    options: &ResequenceOptions,
    confirm: F,
) -> Result<ResequenceReport>
where
    V: VersionControl,
    M: ManagementRunner,
    F: FnOnce(&ResequencePlan) -> Result<bool>,
{
    let report = delete(sync, plan, options, confirm)?;
    regenerate(sync, report)
}

/// Confirm and delete the planned files, without regenerating.
///
/// Returns an early outcome (already on branch, nothing to do, dry run)
/// untouched, or [`ResequenceOutcome::Deleted`] once the files are gone.
pub fn delete<V, M, F>(
    sync: &DjangoSync<V, M>,
    plan: ResequencePlan,
    options: &ResequenceOptions,
    confirm: F,
) -> Result<ResequenceReport>
where
    V: VersionControl,
    M: ManagementRunner,
    F: FnOnce(&ResequencePlan) -> Result<bool>,
{
    let outcome = if plan.already_on_branch {
        Some(ResequenceOutcome::AlreadyOnBranch)
    } else if plan.is_empty() {
        Some(ResequenceOutcome::NothingToDo)
    } else if options.dry_run {
        Some(ResequenceOutcome::DryRun)
    } else {
        None
    };
    if let Some(outcome) = outcome {
        return Ok(ResequenceReport {
            plan,
            outcome,
            deleted: Vec::new(),
        });
    }

    if !options.yes && !confirm(&plan)? {
        return Err(SyncError::UserAborted);
    }

    let deleted = delete_migration_files(sync.project_root(), &plan.to_remove)?;
    log::info!("Deleted feature-only migrations; count={}", deleted.len());

    Ok(ResequenceReport {
        plan,
        outcome: ResequenceOutcome::Deleted,
        deleted,
    })
}

/// Run makemigrations after [`delete`]. Other outcomes pass through.
pub fn regenerate<V: VersionControl, M: ManagementRunner>(
    sync: &DjangoSync<V, M>,
    report: ResequenceReport,
) -> Result<ResequenceReport> {
    if report.outcome != ResequenceOutcome::Deleted {
        return Ok(report);
    }

    if let Err(e) = sync.manage().run(&manage::makemigrations_args()) {
        log::error!(
            "makemigrations failed after deleting migrations; deleted={}, error={}",
            report.deleted.len(),
            e
        );
        return Err(e);
    }

    Ok(ResequenceReport {
        outcome: ResequenceOutcome::Applied,
        ..report
    })
}

/// Delete the given migration files. Files already gone are skipped.
pub fn delete_migration_files(
    project_root: &Path,
    to_remove: &BTreeMap<String, BTreeSet<String>>,
) -> Result<Vec<PathBuf>> {
    let mut deleted = Vec::new();
    for (app, files) in to_remove {
        let dir = project_root.join(app).join("migrations");
        if !dir.is_dir() {
            log::debug!("Migration directory missing, skipping; dir={}", dir.display());
            continue;
        }
        for name in files {
            let path = dir.join(name);
            if !path.exists() {
                continue;
            }
            std::fs::remove_file(&path)?;
            log::debug!("Deleted migration; path={}", path.display());
            deleted.push(path);
        }
    }
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn plan_with(files: &[(&str, &[&str])]) -> ResequencePlan {
        ResequencePlan {
            branch: "dev".to_string(),
            current_branch: "feature".to_string(),
            already_on_branch: false,
            apps_filtered: true,
            to_remove: files
                .iter()
                .map(|(app, names)| {
                    (
                        app.to_string(),
                        names.iter().map(|n| n.to_string()).collect(),
                    )
                })
                .collect(),
            regenerate_command: "python3 manage.py makemigrations".to_string(),
        }
    }

    #[test]
    fn test_plan_totals_and_paths() {
        let plan = plan_with(&[
            ("shop", &["0002_price.py"]),
            ("blog", &["0003_tags.py", "0002_slug.py"]),
        ]);
        assert_eq!(plan.total(), 3);
        assert!(!plan.is_empty());
        assert_eq!(
            plan.relative_paths(),
            vec![
                "blog/migrations/0002_slug.py",
                "blog/migrations/0003_tags.py",
                "shop/migrations/0002_price.py",
            ]
        );
    }

    #[test]
    fn test_delete_migration_files_skips_missing() {
        let dir = TempDir::new().unwrap();
        let mig = dir.path().join("blog/migrations");
        std::fs::create_dir_all(&mig).unwrap();
        std::fs::write(mig.join("0001_initial.py"), "").unwrap();
        std::fs::write(mig.join("0002_feature.py"), "").unwrap();

        let plan = plan_with(&[
            ("blog", &["0002_feature.py", "0003_gone.py"]),
            ("nosuchapp", &["0001_initial.py"]),
        ]);
        let deleted = delete_migration_files(dir.path(), &plan.to_remove).unwrap();

        assert_eq!(deleted, vec![mig.join("0002_feature.py")]);
        assert!(mig.join("0001_initial.py").exists());
        assert!(!mig.join("0002_feature.py").exists());
    }
}
