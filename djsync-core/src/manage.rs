//! Running Django management commands through `manage.py`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;
use crate::process::{self, StdoutTarget};

/// The management-command operations the resetter and resequencer need.
pub trait ManagementRunner {
    /// Shell-like rendering of the command line for `args`, used in
    /// dry-run output and error messages.
    fn command_line(&self, args: &[String]) -> String;

    /// Run a management command with inherited stdio.
    fn run(&self, args: &[String]) -> Result<()>;

    /// Run a management command and return its stdout, killing it after `timeout`.
    fn capture(&self, args: &[String], timeout: Duration) -> Result<String>;
}

/// Arguments for `manage.py migrate <app> <migration> --noinput`.
pub fn migrate_args(app: &str, migration: &str) -> Vec<String> {
    vec![
        "migrate".to_string(),
        app.to_string(),
        migration.to_string(),
        "--noinput".to_string(),
    ]
}

/// Arguments for `manage.py makemigrations`.
pub fn makemigrations_args() -> Vec<String> {
    vec!["makemigrations".to_string()]
}

/// `manage.py` invoked with a specific interpreter, from the project root.
#[derive(Debug, Clone)]
pub struct ManagePy {
    python: PathBuf,
    manage_py: PathBuf,
    project_root: PathBuf,
    stdout: StdoutTarget,
}

impl ManagePy {
    pub fn new(python: PathBuf, project_root: &Path, marker: &str) -> Self {
        Self {
            python,
            manage_py: project_root.join(marker),
            project_root: project_root.to_path_buf(),
            stdout: StdoutTarget::Inherit,
        }
    }

    /// Where migrate/makemigrations output goes.
    pub fn with_stdout_target(mut self, target: StdoutTarget) -> Self {
        self.stdout = target;
        self
    }

    pub fn python(&self) -> &Path {
        &self.python
    }

    fn full_args(&self, args: &[String]) -> Vec<String> {
        let mut full = Vec::with_capacity(args.len() + 1);
        full.push(self.manage_py.display().to_string());
        full.extend(args.iter().cloned());
        full
    }

    fn program(&self) -> String {
        self.python.display().to_string()
    }
}

impl ManagementRunner for ManagePy {
    fn command_line(&self, args: &[String]) -> String {
        process::display_command(&self.program(), &self.full_args(args))
    }

    fn run(&self, args: &[String]) -> Result<()> {
        process::run_inherited(
            &self.program(),
            &self.full_args(args),
            &self.project_root,
            self.stdout,
        )
    }

    fn capture(&self, args: &[String], timeout: Duration) -> Result<String> {
        process::capture_with_timeout(
            &self.program(),
            &self.full_args(args),
            &self.project_root,
            timeout,
        )
    }
}
