//! Reconcile a feature branch's Django migration state with a target branch.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use djsync_core::config::{CliOverrides, SyncConfig};
//! use djsync_core::{DjangoSync, ResetOptions};
//!
//! # fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SyncConfig::load(None, &CliOverrides::default())?;
//! let sync = DjangoSync::discover(config, &std::env::current_dir()?)?;
//! let options = ResetOptions {
//!     branch: sync.config.sync.branch.clone(),
//!     dry_run: true,
//!     skip_checkout: false,
//!     force: false,
//! };
//! let report = sync.reset(&options)?;
//! for target in &report.plan.targets {
//!     println!("{} -> {}", target.app, target.migration);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - [`config`] - Configuration loading (TOML, env vars, CLI overrides)
//! - [`project`] - Project root, interpreter and settings module discovery
//! - [`apps`] - INSTALLED_APPS discovery
//! - [`migration`] - Migration file listing from a branch or the working tree
//! - [`git`] - Git access behind the [`VersionControl`] trait
//! - [`manage`] - `manage.py` access behind the [`ManagementRunner`] trait
//! - [`process`] - Subprocess helpers
//! - [`commands`] - Reset and resequence implementations
//! - [`error`] - Error types

pub mod apps;
pub mod commands;
pub mod config;
pub mod error;
pub mod git;
pub mod manage;
pub mod migration;
pub mod process;
pub mod project;

use std::path::{Path, PathBuf};

use config::SyncConfig;
use error::{Result, SyncError};

pub use apps::InstalledApps;
pub use commands::resequence::{
    ResequenceOptions, ResequenceOutcome, ResequencePlan, ResequenceReport,
};
pub use commands::reset::{CheckoutStatus, ResetOptions, ResetPlan, ResetReport};
pub use git::{Git, VersionControl};
pub use manage::{ManagePy, ManagementRunner};
pub use migration::{MigrationIndex, MigrationTarget};
pub use process::StdoutTarget;

/// Main entry point for the library.
///
/// Bundles the resolved configuration, the discovered project and
/// repository roots, and the two external tools. `DjangoSync::discover`
/// wires up real `git` and `manage.py`; `with_tools` accepts any
/// implementations of the tool traits.
pub struct DjangoSync<V = Git, M = ManagePy> {
    pub config: SyncConfig,
    project_root: PathBuf,
    repo_root: PathBuf,
    vcs: V,
    manage: M,
}

impl DjangoSync<Git, ManagePy> {
    /// Locate the project from `start`, its git repository, and its interpreter.
    pub fn discover(config: SyncConfig, start: &Path) -> Result<Self> {
        let project_root = project::find_project_root(start, &config.project.marker)?;
        let git = Git::discover(&project_root)?;
        let repo_root = git.repo_root().to_path_buf();
        let python = project::python_for(&project_root, &config.project);
        let manage = ManagePy::new(python, &project_root, &config.project.marker);
        log::debug!(
            "Discovered project; project_root={}, repo_root={}, python={}",
            project_root.display(),
            repo_root.display(),
            manage.python().display()
        );
        Ok(Self::with_tools(config, project_root, repo_root, git, manage))
    }

    /// Choose where migrate, makemigrations and checkout write their output.
    pub fn with_child_stdout(self, target: StdoutTarget) -> Self {
        Self {
            vcs: self.vcs.with_stdout_target(target),
            manage: self.manage.with_stdout_target(target),
            ..self
        }
    }
}

impl<V: VersionControl, M: ManagementRunner> DjangoSync<V, M> {
    /// Create an instance with explicit roots and tool implementations.
    pub fn with_tools(
        config: SyncConfig,
        project_root: PathBuf,
        repo_root: PathBuf,
        vcs: V,
        manage: M,
    ) -> Self {
        Self {
            config,
            project_root,
            repo_root,
            vcs,
            manage,
        }
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    pub fn vcs(&self) -> &V {
        &self.vcs
    }

    pub fn manage(&self) -> &M {
        &self.manage
    }

    /// Fail with [`SyncError::BranchNotFound`] unless `branch` exists.
    pub fn verify_branch(&self, branch: &str) -> Result<()> {
        if self.vcs.branch_exists(branch)? {
            Ok(())
        } else {
            Err(SyncError::BranchNotFound {
                branch: branch.to_string(),
            })
        }
    }

    pub fn current_branch(&self) -> Result<String> {
        self.vcs.current_branch()
    }

    /// INSTALLED_APPS filter, or `None` when it cannot be determined.
    ///
    /// Plans record the fallback as `apps_filtered: false` so callers can
    /// warn that every app in the repository is included.
    pub fn installed_apps(&self) -> Option<InstalledApps> {
        match apps::load_installed_apps(&self.project_root, &self.config.project, &self.manage) {
            Ok(apps) => Some(apps),
            Err(e) => {
                log::debug!("INSTALLED_APPS unavailable, not filtering; error={}", e);
                None
            }
        }
    }

    /// Migrations tracked on `branch`, keyed by project-relative app directory.
    pub fn branch_index(
        &self,
        branch: &str,
        filter: Option<&InstalledApps>,
    ) -> Result<MigrationIndex> {
        let files = self.vcs.list_files(branch)?;
        let Some(prefix) = git::project_prefix(&self.repo_root, &self.project_root) else {
            return Err(SyncError::NotAGitRepository(format!(
                "{} is outside {}",
                self.project_root.display(),
                self.repo_root.display()
            )));
        };
        Ok(MigrationIndex::from_paths(
            migration::strip_project_prefix(&files, &prefix),
            filter,
            &self.config.project.excluded_dirs,
        ))
    }

    /// Migrations present on disk.
    pub fn working_tree_index(&self, filter: Option<&InstalledApps>) -> Result<MigrationIndex> {
        migration::scan_working_tree(
            &self.project_root,
            filter,
            &self.config.project.excluded_dirs,
        )
    }

    /// Roll migrations back to the target branch's state, then check it out.
    pub fn reset(&self, options: &ResetOptions) -> Result<ResetReport> {
        let plan = self.plan_reset(options)?;
        self.execute_reset(plan, options)
    }

    /// Find the migration each app goes back to, without running anything.
    pub fn plan_reset(&self, options: &ResetOptions) -> Result<ResetPlan> {
        commands::reset::plan(self, options)
    }

    /// Run the migrate commands of a plan, then check out the target branch.
    pub fn execute_reset(&self, plan: ResetPlan, options: &ResetOptions) -> Result<ResetReport> {
        commands::reset::execute(self, plan, options)
    }

    /// Find feature-only migrations that would be deleted and regenerated.
    pub fn plan_resequence(&self, options: &ResequenceOptions) -> Result<ResequencePlan> {
        commands::resequence::plan(self, options)
    }

    /// Delete the planned migrations and run makemigrations.
    ///
    /// `confirm` is asked before anything is deleted unless `options.yes` is set.
    pub fn apply_resequence<F>(
        &self,
        plan: ResequencePlan,
        options: &ResequenceOptions,
        confirm: F,
    ) -> Result<ResequenceReport>
    where
        F: FnOnce(&ResequencePlan) -> Result<bool>,
    {
        commands::resequence::apply(self, plan, options, confirm)
    }

    /// First half of [`apply_resequence`](Self::apply_resequence): confirm and delete.
    pub fn delete_resequenced<F>(
        &self,
        plan: ResequencePlan,
        options: &ResequenceOptions,
        confirm: F,
    ) -> Result<ResequenceReport>
    where
        F: FnOnce(&ResequencePlan) -> Result<bool>,
    {
        commands::resequence::delete(self, plan, options, confirm)
    }

    /// Second half of [`apply_resequence`](Self::apply_resequence): run makemigrations.
    pub fn regenerate_migrations(&self, report: ResequenceReport) -> Result<ResequenceReport> {
        commands::resequence::regenerate(self, report)
    }
}
