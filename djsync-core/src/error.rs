//! Error types for migration sync operations.

use thiserror::Error;

/// All error types that sync operations can produce.
#[derive(Error, Debug)]
pub enum SyncError {
    /// No project marker file was found walking up from the working directory.
    #[error("Could not find {marker}. Run from project root or subdirectory.")]
    ProjectNotFound { marker: String },

    /// The project directory is not inside a git work tree.
    #[error("Not a git repository: {0}")]
    NotAGitRepository(String),

    /// The requested target branch does not resolve to a commit.
    #[error("Branch '{branch}' does not exist.")]
    BranchNotFound { branch: String },

    /// INSTALLED_APPS could not be determined. Recovered by including all apps.
    #[error("Could not load INSTALLED_APPS: {0}")]
    SettingsLoadFailed(String),

    /// An external command exited with a non-zero status.
    #[error("{command} failed: {reason}")]
    CommandFailed { command: String, reason: String },

    /// An external command did not finish within its time limit.
    #[error("{command} timed out after {secs}s")]
    CommandTimedOut { command: String, secs: u64 },

    /// The user declined or interrupted the confirmation prompt.
    #[error("Aborted.")]
    UserAborted,

    /// Invalid or missing configuration (TOML parse errors, bad values, etc.).
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A filesystem I/O operation failed (reading settings, deleting migrations, etc.).
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// git could not be run or produced output that could not be interpreted.
    #[error("Git error: {0}")]
    GitError(String),
}

/// Convenience type alias for `Result<T, SyncError>`.
pub type Result<T> = std::result::Result<T, SyncError>;
