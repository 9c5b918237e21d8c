//! Integration tests for djsync-core.
//!
//! The reset and resequence flows run against a temporary project tree with
//! in-memory stand-ins for git and manage.py, so neither tool needs to be
//! installed.
//!
//! Run with: cargo test --test integration_test

use std::cell::{Cell, RefCell};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::time::Duration;

use djsync_core::config::SyncConfig;
use djsync_core::error::{Result, SyncError};
use djsync_core::{
    CheckoutStatus, DjangoSync, ManagementRunner, ResequenceOptions, ResequenceOutcome,
    ResetOptions, VersionControl,
};
use tempfile::TempDir;

/// In-memory git: branch -> tracked files.
struct FakeGit {
    branches: HashMap<String, Vec<String>>,
    current: String,
    checkouts: RefCell<Vec<String>>,
}

impl FakeGit {
    fn new(current: &str) -> Self {
        Self {
            branches: HashMap::new(),
            current: current.to_string(),
            checkouts: RefCell::new(Vec::new()),
        }
    }

    fn with_branch(mut self, name: &str, files: &[&str]) -> Self {
        self.branches
            .insert(name.to_string(), files.iter().map(|f| f.to_string()).collect());
        self
    }
}

impl VersionControl for FakeGit {
    fn branch_exists(&self, branch: &str) -> Result<bool> {
        Ok(self.branches.contains_key(branch))
    }

    fn current_branch(&self) -> Result<String> {
        Ok(self.current.clone())
    }

    fn list_files(&self, branch: &str) -> Result<Vec<String>> {
        Ok(self.branches.get(branch).cloned().unwrap_or_default())
    }

    fn checkout(&self, branch: &str) -> Result<()> {
        self.checkouts.borrow_mut().push(branch.to_string());
        Ok(())
    }
}

/// Records every management command; optionally fails some of them.
struct RecordingRunner {
    runs: RefCell<Vec<Vec<String>>>,
    captures: Cell<usize>,
    fail_when_arg: Option<String>,
    shell_output: Option<String>,
}

impl RecordingRunner {
    fn new() -> Self {
        Self {
            runs: RefCell::new(Vec::new()),
            captures: Cell::new(0),
            fail_when_arg: None,
            shell_output: None,
        }
    }

    fn failing_on(arg: &str) -> Self {
        Self {
            fail_when_arg: Some(arg.to_string()),
            ..Self::new()
        }
    }

    fn with_shell_output(output: &str) -> Self {
        Self {
            shell_output: Some(output.to_string()),
            ..Self::new()
        }
    }

    fn runs(&self) -> Vec<Vec<String>> {
        self.runs.borrow().clone()
    }
}

impl ManagementRunner for RecordingRunner {
    fn command_line(&self, args: &[String]) -> String {
        format!("python manage.py {}", args.join(" "))
    }

    fn run(&self, args: &[String]) -> Result<()> {
        self.runs.borrow_mut().push(args.to_vec());
        if let Some(ref bad) = self.fail_when_arg {
            if args.iter().any(|a| a == bad) {
                return Err(SyncError::CommandFailed {
                    command: self.command_line(args),
                    reason: "exit status 1".to_string(),
                });
            }
        }
        Ok(())
    }

    fn capture(&self, args: &[String], _timeout: Duration) -> Result<String> {
        self.captures.set(self.captures.get() + 1);
        self.shell_output
            .clone()
            .ok_or_else(|| SyncError::CommandFailed {
                command: self.command_line(args),
                reason: "exit status 1".to_string(),
            })
    }
}

const MANAGE_PY: &str = r#"import os, sys
if __name__ == "__main__":
    os.environ.setdefault("DJANGO_SETTINGS_MODULE", "mysite.settings")
"#;

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

/// A project whose settings list the given apps.
fn project_with_apps(apps: &[&str]) -> TempDir {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "manage.py", MANAGE_PY);
    let list: Vec<String> = apps.iter().map(|a| format!("    \"{}\",\n", a)).collect();
    write(
        dir.path(),
        "mysite/settings.py",
        &format!("INSTALLED_APPS = [\n{}]\n", list.concat()),
    );
    dir
}

/// A project whose settings cannot be read statically.
fn project_without_settings() -> TempDir {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "manage.py", "print('no settings module here')\n");
    dir
}

fn sync_for(
    dir: &TempDir,
    git: FakeGit,
    runner: RecordingRunner,
) -> DjangoSync<FakeGit, RecordingRunner> {
    let root = dir.path().canonicalize().unwrap();
    DjangoSync::with_tools(SyncConfig::default(), root.clone(), root, git, runner)
}

fn reset_options(dry_run: bool) -> ResetOptions {
    ResetOptions {
        branch: "dev".to_string(),
        dry_run,
        skip_checkout: false,
        force: false,
    }
}

fn dev_branch_files() -> Vec<&'static str> {
    vec![
        "manage.py",
        "a/migrations/__init__.py",
        "a/migrations/0001_initial.py",
        "a/migrations/0003_x.py",
        "a/migrations/0002_w.py",
        "b/migrations/0001_y.py",
        ".venv/lib/python3.12/site-packages/a/migrations/0099_vendor.py",
    ]
}

// ── Reset ──

#[test]
fn test_reset_dry_run_plans_commands_without_running() {
    let dir = project_with_apps(&["a", "b.apps.BConfig"]);
    let git = FakeGit::new("feature").with_branch("dev", &dev_branch_files());
    let sync = sync_for(&dir, git, RecordingRunner::new());

    let report = sync.reset(&reset_options(true)).unwrap();

    assert!(report.dry_run);
    assert!(report.plan.apps_filtered);
    assert_eq!(report.plan.targets.len(), 2);
    assert_eq!(report.plan.targets[0].app, "a");
    assert_eq!(report.plan.targets[0].migration, "0003_x");
    assert_eq!(report.plan.targets[1].app, "b");
    assert_eq!(report.plan.targets[1].migration, "0001_y");
    assert_eq!(
        report.plan.commands,
        vec![
            "python manage.py migrate a 0003_x --noinput",
            "python manage.py migrate b 0001_y --noinput",
        ]
    );
    assert_eq!(
        report.checkout,
        CheckoutStatus::Planned {
            command: "git checkout dev".to_string()
        }
    );
    assert!(sync.manage().runs().is_empty());
    assert!(sync.vcs().checkouts.borrow().is_empty());
}

#[test]
fn test_reset_runs_migrations_then_checks_out() {
    let dir = project_with_apps(&["a", "b"]);
    let git = FakeGit::new("feature").with_branch("dev", &dev_branch_files());
    let sync = sync_for(&dir, git, RecordingRunner::new());

    let report = sync.reset(&reset_options(false)).unwrap();

    assert_eq!(
        sync.manage().runs(),
        vec![
            vec!["migrate", "a", "0003_x", "--noinput"],
            vec!["migrate", "b", "0001_y", "--noinput"],
        ]
    );
    assert_eq!(*sync.vcs().checkouts.borrow(), vec!["dev".to_string()]);
    assert_eq!(report.checkout, CheckoutStatus::Completed);
}

#[test]
fn test_reset_stops_at_first_failure() {
    let dir = project_with_apps(&["a", "b"]);
    let git = FakeGit::new("feature").with_branch("dev", &dev_branch_files());
    let sync = sync_for(&dir, git, RecordingRunner::failing_on("a"));

    let err = sync.reset(&reset_options(false)).unwrap_err();

    assert!(matches!(err, SyncError::CommandFailed { .. }));
    assert_eq!(sync.manage().runs().len(), 1);
    assert!(sync.vcs().checkouts.borrow().is_empty());
}

#[test]
fn test_reset_noop_when_already_on_target() {
    let dir = project_with_apps(&["a", "b"]);
    let git = FakeGit::new("dev").with_branch("dev", &dev_branch_files());
    let sync = sync_for(&dir, git, RecordingRunner::new());

    let report = sync.reset(&reset_options(false)).unwrap();

    assert!(report.plan.already_on_branch);
    assert_eq!(report.checkout, CheckoutStatus::NotNeeded);
    assert!(report.plan.targets.is_empty());
    assert!(sync.manage().runs().is_empty());
    assert!(sync.vcs().checkouts.borrow().is_empty());
}

#[test]
fn test_reset_force_runs_on_target_branch() {
    let dir = project_with_apps(&["a", "b"]);
    let git = FakeGit::new("dev").with_branch("dev", &dev_branch_files());
    let sync = sync_for(&dir, git, RecordingRunner::new());

    let options = ResetOptions {
        force: true,
        skip_checkout: true,
        ..reset_options(false)
    };
    let report = sync.reset(&options).unwrap();

    assert!(!report.plan.already_on_branch);
    assert_eq!(sync.manage().runs().len(), 2);
    assert_eq!(report.checkout, CheckoutStatus::Skipped);
    assert!(sync.vcs().checkouts.borrow().is_empty());
}

#[test]
fn test_reset_missing_branch() {
    let dir = project_with_apps(&["a"]);
    let git = FakeGit::new("feature").with_branch("main", &[]);
    let sync = sync_for(&dir, git, RecordingRunner::new());

    let err = sync.reset(&reset_options(true)).unwrap_err();
    match err {
        SyncError::BranchNotFound { branch } => assert_eq!(branch, "dev"),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_reset_with_no_migrations_still_checks_out() {
    let dir = project_with_apps(&["a"]);
    let git = FakeGit::new("feature").with_branch("dev", &["manage.py", "README.md"]);
    let sync = sync_for(&dir, git, RecordingRunner::new());

    let report = sync.reset(&reset_options(false)).unwrap();

    assert!(report.plan.targets.is_empty());
    assert!(sync.manage().runs().is_empty());
    assert_eq!(report.checkout, CheckoutStatus::Completed);
}

#[test]
fn test_reset_filter_excludes_uninstalled_apps() {
    let dir = project_with_apps(&["a"]);
    let git = FakeGit::new("feature").with_branch("dev", &dev_branch_files());
    let sync = sync_for(&dir, git, RecordingRunner::new());

    let report = sync.reset(&reset_options(true)).unwrap();

    let apps: Vec<&str> = report.plan.targets.iter().map(|t| t.app.as_str()).collect();
    assert_eq!(apps, vec!["a"]);
}

#[test]
fn test_reset_falls_back_to_manage_shell() {
    let dir = project_without_settings();
    let git = FakeGit::new("feature").with_branch("dev", &dev_branch_files());
    let runner =
        RecordingRunner::with_shell_output("Loading...\n[{\"label\": \"b\", \"name\": \"b\"}]\n");
    let sync = sync_for(&dir, git, runner);

    let report = sync.reset(&reset_options(true)).unwrap();

    assert_eq!(sync.manage().captures.get(), 1);
    assert!(report.plan.apps_filtered);
    let apps: Vec<&str> = report.plan.targets.iter().map(|t| t.app.as_str()).collect();
    assert_eq!(apps, vec!["b"]);
}

#[test]
fn test_reset_unfiltered_when_settings_unavailable() {
    let dir = project_without_settings();
    let git = FakeGit::new("feature").with_branch(
        "dev",
        &["a/migrations/0001_initial.py", "legacy/migrations/0004_old.py"],
    );
    let sync = sync_for(&dir, git, RecordingRunner::new());

    let report = sync.reset(&reset_options(true)).unwrap();

    assert!(!report.plan.apps_filtered);
    let apps: Vec<&str> = report.plan.targets.iter().map(|t| t.app.as_str()).collect();
    assert_eq!(apps, vec!["a", "legacy"]);
}

#[test]
fn test_reset_plan_is_available_before_migrate_fails() {
    let dir = project_with_apps(&["a", "b"]);
    let git = FakeGit::new("feature").with_branch("dev", &dev_branch_files());
    let sync = sync_for(&dir, git, RecordingRunner::failing_on("b"));

    let options = reset_options(false);
    let plan = sync.plan_reset(&options).unwrap();
    assert_eq!(plan.targets.len(), 2);
    assert_eq!(plan.commands.len(), 2);
    assert!(sync.manage().runs().is_empty());

    let err = sync.execute_reset(plan, &options).unwrap_err();
    assert!(matches!(err, SyncError::CommandFailed { .. }));
    assert_eq!(sync.manage().runs().len(), 2);
    assert!(sync.vcs().checkouts.borrow().is_empty());
}

#[test]
fn test_unfiltered_fallback_is_flagged_on_plans() {
    let dir = project_without_settings();
    write(dir.path(), "a/migrations/0001_initial.py", "");
    write(dir.path(), "a/migrations/0002_feature.py", "");
    let git = FakeGit::new("feature").with_branch("dev", &["a/migrations/0001_initial.py"]);
    let sync = sync_for(&dir, git, RecordingRunner::new());

    let reset_plan = sync.plan_reset(&reset_options(true)).unwrap();
    assert!(reset_plan.included_all_apps());

    let resequence_plan = sync.plan_resequence(&resequence_options(true, false)).unwrap();
    assert!(resequence_plan.included_all_apps());
}

#[test]
fn test_filtered_plans_do_not_flag_fallback() {
    let dir = project_with_apps(&["a"]);
    let git = FakeGit::new("feature").with_branch("dev", &dev_branch_files());
    let sync = sync_for(&dir, git, RecordingRunner::new());

    assert!(!sync.plan_reset(&reset_options(true)).unwrap().included_all_apps());

    let on_target = sync_for(
        &dir,
        FakeGit::new("dev").with_branch("dev", &dev_branch_files()),
        RecordingRunner::new(),
    );
    let plan = on_target.plan_reset(&reset_options(false)).unwrap();
    assert!(plan.already_on_branch);
    assert!(!plan.included_all_apps());
}

#[test]
fn test_reset_nested_project_uses_project_relative_apps() {
    let repo = TempDir::new().unwrap();
    let project = repo.path().join("backend");
    write(&project, "manage.py", MANAGE_PY);
    write(&project, "mysite/settings.py", "INSTALLED_APPS = ['blog']\n");

    let git = FakeGit::new("feature").with_branch(
        "dev",
        &[
            "backend/blog/migrations/0001_initial.py",
            "backend/blog/migrations/0002_tags.py",
            "tools/blog/migrations/0009_other.py",
        ],
    );
    let sync = DjangoSync::with_tools(
        SyncConfig::default(),
        project.canonicalize().unwrap(),
        repo.path().canonicalize().unwrap(),
        git,
        RecordingRunner::new(),
    );

    let report = sync.reset(&reset_options(true)).unwrap();
    assert_eq!(report.plan.targets.len(), 1);
    assert_eq!(report.plan.targets[0].app, "blog");
    assert_eq!(report.plan.targets[0].migration, "0002_tags");
}

// ── Resequence ──

fn resequence_project() -> TempDir {
    let dir = project_with_apps(&["blog", "shop"]);
    write(dir.path(), "blog/migrations/__init__.py", "");
    write(dir.path(), "blog/migrations/0001_init.py", "");
    write(dir.path(), "blog/migrations/0002_add_field.py", "");
    write(dir.path(), "shop/migrations/0001_init.py", "");
    dir
}

fn resequence_git(current: &str) -> FakeGit {
    FakeGit::new(current).with_branch(
        "dev",
        &["manage.py", "blog/migrations/__init__.py", "blog/migrations/0001_init.py"],
    )
}

fn resequence_options(dry_run: bool, yes: bool) -> ResequenceOptions {
    ResequenceOptions {
        branch: "dev".to_string(),
        dry_run,
        yes,
        force: false,
    }
}

#[test]
fn test_resequence_plan_only_includes_apps_with_branch_migrations() {
    let dir = resequence_project();
    let sync = sync_for(&dir, resequence_git("feature"), RecordingRunner::new());

    let plan = sync.plan_resequence(&resequence_options(true, false)).unwrap();

    assert_eq!(plan.total(), 1);
    assert_eq!(
        plan.to_remove["blog"],
        BTreeSet::from(["0002_add_field.py".to_string()])
    );
    assert!(!plan.to_remove.contains_key("shop"));
    assert_eq!(plan.relative_paths(), vec!["blog/migrations/0002_add_field.py"]);
}

#[test]
fn test_resequence_dry_run_never_deletes() {
    let dir = resequence_project();
    let sync = sync_for(&dir, resequence_git("feature"), RecordingRunner::new());

    // yes=true must not override a dry run
    let options = resequence_options(true, true);
    let plan = sync.plan_resequence(&options).unwrap();
    let report = sync
        .apply_resequence(plan, &options, |_| panic!("confirm must not be asked"))
        .unwrap();

    assert_eq!(report.outcome, ResequenceOutcome::DryRun);
    assert!(report.deleted.is_empty());
    assert!(dir.path().join("blog/migrations/0002_add_field.py").exists());
    assert!(sync.manage().runs().is_empty());
}

#[test]
fn test_resequence_apply_with_yes_deletes_and_regenerates() {
    let dir = resequence_project();
    let sync = sync_for(&dir, resequence_git("feature"), RecordingRunner::new());

    let options = resequence_options(false, true);
    let plan = sync.plan_resequence(&options).unwrap();
    let report = sync
        .apply_resequence(plan, &options, |_| panic!("confirm must not be asked"))
        .unwrap();

    assert_eq!(report.outcome, ResequenceOutcome::Applied);
    assert_eq!(report.deleted.len(), 1);
    assert!(!dir.path().join("blog/migrations/0002_add_field.py").exists());
    assert!(dir.path().join("blog/migrations/0001_init.py").exists());
    assert!(dir.path().join("shop/migrations/0001_init.py").exists());
    assert_eq!(sync.manage().runs(), vec![vec!["makemigrations".to_string()]]);
}

#[test]
fn test_resequence_confirm_accepted() {
    let dir = resequence_project();
    let sync = sync_for(&dir, resequence_git("feature"), RecordingRunner::new());

    let options = resequence_options(false, false);
    let plan = sync.plan_resequence(&options).unwrap();
    let asked = Cell::new(false);
    let report = sync
        .apply_resequence(plan, &options, |plan| {
            asked.set(true);
            assert_eq!(plan.total(), 1);
            Ok(true)
        })
        .unwrap();

    assert!(asked.get());
    assert_eq!(report.outcome, ResequenceOutcome::Applied);
}

#[test]
fn test_resequence_declined_leaves_files() {
    let dir = resequence_project();
    let sync = sync_for(&dir, resequence_git("feature"), RecordingRunner::new());

    let options = resequence_options(false, false);
    let plan = sync.plan_resequence(&options).unwrap();
    let err = sync.apply_resequence(plan, &options, |_| Ok(false)).unwrap_err();

    assert!(matches!(err, SyncError::UserAborted));
    assert!(dir.path().join("blog/migrations/0002_add_field.py").exists());
    assert!(sync.manage().runs().is_empty());
}

#[test]
fn test_resequence_makemigrations_failure_leaves_files_deleted() {
    let dir = resequence_project();
    let sync = sync_for(
        &dir,
        resequence_git("feature"),
        RecordingRunner::failing_on("makemigrations"),
    );

    let options = resequence_options(false, true);
    let plan = sync.plan_resequence(&options).unwrap();
    let err = sync.apply_resequence(plan, &options, |_| Ok(true)).unwrap_err();

    assert!(matches!(err, SyncError::CommandFailed { .. }));
    assert!(!dir.path().join("blog/migrations/0002_add_field.py").exists());
}

#[test]
fn test_resequence_nothing_to_do() {
    let dir = project_with_apps(&["blog"]);
    write(dir.path(), "blog/migrations/0001_init.py", "");
    let sync = sync_for(&dir, resequence_git("feature"), RecordingRunner::new());

    let options = resequence_options(false, true);
    let plan = sync.plan_resequence(&options).unwrap();
    assert!(plan.is_empty());
    let report = sync.apply_resequence(plan, &options, |_| Ok(true)).unwrap();

    assert_eq!(report.outcome, ResequenceOutcome::NothingToDo);
    assert!(sync.manage().runs().is_empty());
}

#[test]
fn test_resequence_dry_run_noop_on_target_branch() {
    let dir = resequence_project();
    let sync = sync_for(&dir, resequence_git("dev"), RecordingRunner::new());

    let options = resequence_options(true, false);
    let plan = sync.plan_resequence(&options).unwrap();
    assert!(plan.already_on_branch);
    assert!(!plan.included_all_apps());
    let report = sync
        .apply_resequence(plan, &options, |_| panic!("confirm must not be asked"))
        .unwrap();

    assert_eq!(report.outcome, ResequenceOutcome::AlreadyOnBranch);
    assert!(dir.path().join("blog/migrations/0002_add_field.py").exists());
    assert!(sync.manage().runs().is_empty());
}

#[test]
fn test_resequence_apply_on_target_branch_still_runs() {
    let dir = resequence_project();
    let sync = sync_for(&dir, resequence_git("dev"), RecordingRunner::new());

    let options = resequence_options(false, true);
    let plan = sync.plan_resequence(&options).unwrap();
    assert!(!plan.already_on_branch);
    let report = sync.apply_resequence(plan, &options, |_| Ok(true)).unwrap();

    assert_eq!(report.outcome, ResequenceOutcome::Applied);
    assert!(!dir.path().join("blog/migrations/0002_add_field.py").exists());
    assert_eq!(sync.manage().runs(), vec![vec!["makemigrations".to_string()]]);
}

#[test]
fn test_resequence_delete_reports_count_before_regenerating() {
    let dir = resequence_project();
    let sync = sync_for(
        &dir,
        resequence_git("feature"),
        RecordingRunner::failing_on("makemigrations"),
    );

    let options = resequence_options(false, true);
    let plan = sync.plan_resequence(&options).unwrap();
    let report = sync.delete_resequenced(plan, &options, |_| Ok(true)).unwrap();

    assert_eq!(report.outcome, ResequenceOutcome::Deleted);
    assert_eq!(
        report.deleted,
        vec![dir
            .path()
            .canonicalize()
            .unwrap()
            .join("blog/migrations/0002_add_field.py")]
    );
    assert!(sync.manage().runs().is_empty());

    let err = sync.regenerate_migrations(report).unwrap_err();
    assert!(matches!(err, SyncError::CommandFailed { .. }));
    assert_eq!(sync.manage().runs(), vec![vec!["makemigrations".to_string()]]);
}

#[test]
fn test_resequence_regenerate_passes_early_outcomes_through() {
    let dir = resequence_project();
    let sync = sync_for(&dir, resequence_git("feature"), RecordingRunner::new());

    let options = resequence_options(true, false);
    let plan = sync.plan_resequence(&options).unwrap();
    let report = sync.delete_resequenced(plan, &options, |_| Ok(true)).unwrap();
    let report = sync.regenerate_migrations(report).unwrap();

    assert_eq!(report.outcome, ResequenceOutcome::DryRun);
    assert!(sync.manage().runs().is_empty());
}

#[test]
fn test_resequence_missing_branch() {
    let dir = resequence_project();
    let git = FakeGit::new("feature");
    let sync = sync_for(&dir, git, RecordingRunner::new());

    let err = sync
        .plan_resequence(&resequence_options(true, false))
        .unwrap_err();
    assert!(matches!(err, SyncError::BranchNotFound { .. }));
}

#[test]
fn test_working_tree_index_ignores_uninstalled_dirs() {
    let dir = resequence_project();
    write(dir.path(), "scratch/migrations/0001_tmp.py", "");
    let sync = sync_for(&dir, resequence_git("feature"), RecordingRunner::new());

    let filter = sync.installed_apps();
    let index = sync.working_tree_index(filter.as_ref()).unwrap();
    let apps: Vec<&str> = index.apps().collect();
    assert_eq!(apps, vec!["blog", "shop"]);
}
