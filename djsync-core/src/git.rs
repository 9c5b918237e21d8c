//! Git access used for branch verification, file listing and checkout.

use std::path::{Path, PathBuf};

use crate::error::{Result, SyncError};
use crate::process::{self, StdoutTarget};

/// The version-control operations the resetter and resequencer need.
pub trait VersionControl {
    /// Whether `branch` resolves to a commit.
    fn branch_exists(&self, branch: &str) -> Result<bool>;

    /// Name of the currently checked-out branch (`HEAD` when detached).
    fn current_branch(&self) -> Result<String>;

    /// All file paths tracked on `branch`, relative to the repository root.
    fn list_files(&self, branch: &str) -> Result<Vec<String>>;

    /// Switch the working tree to `branch`.
    fn checkout(&self, branch: &str) -> Result<()>;
}

/// `git` command-line client bound to a repository root.
#[derive(Debug, Clone)]
pub struct Git {
    repo_root: PathBuf,
    checkout_stdout: StdoutTarget,
}

impl Git {
    /// Resolve the repository containing `dir` via `git rev-parse --show-toplevel`.
    pub fn discover(dir: &Path) -> Result<Self> {
        let output = process::capture("git", &args(&["rev-parse", "--show-toplevel"]), dir)
            .map_err(|e| SyncError::GitError(e.to_string()))?;
        if !output.status.success() {
            return Err(SyncError::NotAGitRepository(dir.display().to_string()));
        }
        let top = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let repo_root = PathBuf::from(&top);
        if top.is_empty() || !repo_root.is_dir() {
            return Err(SyncError::NotAGitRepository(dir.display().to_string()));
        }
        Ok(Self {
            repo_root,
            checkout_stdout: StdoutTarget::Inherit,
        })
    }

    /// Where `git checkout` writes its progress.
    pub fn with_stdout_target(mut self, target: StdoutTarget) -> Self {
        self.checkout_stdout = target;
        self
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    fn stdout(&self, cmd_args: &[&str]) -> Result<String> {
        let cmd_args = args(cmd_args);
        let output = process::capture("git", &cmd_args, &self.repo_root)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SyncError::CommandFailed {
                command: process::display_command("git", &cmd_args),
                reason: match stderr.trim() {
                    "" => process::describe_status(output.status.code()),
                    msg => msg.to_string(),
                },
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl VersionControl for Git {
    fn branch_exists(&self, branch: &str) -> Result<bool> {
        let output = process::capture(
            "git",
            &args(&["rev-parse", "--verify", "--quiet", branch]),
            &self.repo_root,
        )?;
        Ok(output.status.success())
    }

    fn current_branch(&self) -> Result<String> {
        let out = self.stdout(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        let branch = out.trim();
        if branch.is_empty() {
            return Err(SyncError::GitError(
                "git rev-parse --abbrev-ref HEAD returned nothing".to_string(),
            ));
        }
        Ok(branch.to_string())
    }

    fn list_files(&self, branch: &str) -> Result<Vec<String>> {
        let out = self.stdout(&["ls-tree", "-r", branch, "--name-only"])?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }

    fn checkout(&self, branch: &str) -> Result<()> {
        process::run_inherited(
            "git",
            &args(&["checkout", branch]),
            &self.repo_root,
            self.checkout_stdout,
        )
    }
}

fn args(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

/// Path of `project_root` relative to `repo_root`, using `/` separators.
///
/// Returns an empty string when they are the same directory, and `None`
/// when the project lies outside the repository.
pub fn project_prefix(repo_root: &Path, project_root: &Path) -> Option<String> {
    let repo = repo_root
        .canonicalize()
        .unwrap_or_else(|_| repo_root.to_path_buf());
    let project = project_root
        .canonicalize()
        .unwrap_or_else(|_| project_root.to_path_buf());
    let rel = project.strip_prefix(&repo).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}
