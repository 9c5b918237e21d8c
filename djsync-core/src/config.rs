//! Configuration loading and resolution.
//!
//! Supports a TOML config file, environment variables, and CLI overrides
//! with a defined priority order (CLI > env > TOML > defaults).

use std::path::PathBuf;

use serde::Deserialize;

use crate::error::{Result, SyncError};

/// Default config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "django-sync.toml";

/// Helper macro to apply an optional owned value directly to a target field.
macro_rules! apply_option {
    ($opt:expr => $target:expr) => {
        if let Some(v) = $opt {
            $target = v;
        }
    };
}

/// Helper macro to clone a borrowed optional value directly to a target field.
macro_rules! apply_option_clone {
    ($opt:expr => $target:expr) => {
        if let Some(ref v) = $opt {
            $target = v.clone();
        }
    };
}

/// Top-level configuration.
#[derive(Debug, Clone, Default)]
pub struct SyncConfig {
    /// Branch selection and checkout behavior.
    pub sync: SyncSettings,
    /// How the Django project is located and introspected.
    pub project: ProjectSettings,
}

/// Branch selection and checkout behavior.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Branch whose migration state is treated as authoritative.
    pub branch: String,
    /// Whether the resetter leaves the working tree on the current branch.
    pub skip_checkout: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            branch: "dev".to_string(),
            skip_checkout: false,
        }
    }
}

/// Project discovery and settings introspection.
#[derive(Debug, Clone)]
pub struct ProjectSettings {
    /// File that marks the project root (searched upward from the working directory).
    pub marker: String,
    /// Interpreter used to run the management entry point. Relative paths
    /// are resolved against the project root.
    pub python: Option<PathBuf>,
    /// Dotted settings module. Parsed from the marker file when unset.
    pub settings_module: Option<String>,
    /// Path segments that mark vendored code; migrations under them are ignored.
    pub excluded_dirs: Vec<String>,
    /// Time limit for the `manage.py shell` settings introspection.
    pub settings_timeout_secs: u64,
}

impl Default for ProjectSettings {
    fn default() -> Self {
        Self {
            marker: "manage.py".to_string(),
            python: None,
            settings_module: None,
            excluded_dirs: vec![".venv".to_string(), "site-packages".to_string()],
            settings_timeout_secs: 30,
        }
    }
}

// ── TOML deserialization structs ──

#[derive(Deserialize, Default)]
struct TomlConfig {
    sync: Option<TomlSyncSettings>,
    project: Option<TomlProjectSettings>,
}

#[derive(Deserialize, Default)]
struct TomlSyncSettings {
    branch: Option<String>,
    skip_checkout: Option<bool>,
}

#[derive(Deserialize, Default)]
struct TomlProjectSettings {
    marker: Option<String>,
    python: Option<String>,
    settings_module: Option<String>,
    excluded_dirs: Option<Vec<String>>,
    settings_timeout: Option<u64>,
}

/// CLI overrides that take highest priority.
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    /// Override the target branch.
    pub branch: Option<String>,
    /// Override checkout skipping.
    pub skip_checkout: Option<bool>,
    /// Override the interpreter path.
    pub python: Option<PathBuf>,
    /// Override the settings module.
    pub settings_module: Option<String>,
}

impl SyncConfig {
    /// Load configuration with the following priority (highest wins):
    /// 1. CLI arguments
    /// 2. Environment variables
    /// 3. TOML config file
    /// 4. Built-in defaults
    pub fn load(config_path: Option<&str>, overrides: &CliOverrides) -> Result<Self> {
        let mut config = SyncConfig::default();

        // Layer 3: TOML config file
        let toml_path = config_path.unwrap_or(DEFAULT_CONFIG_FILE);
        if let Ok(content) = std::fs::read_to_string(toml_path) {
            let toml_config: TomlConfig = toml::from_str(&content).map_err(|e| {
                SyncError::ConfigError(format!(
                    "Failed to parse config file '{}': {}",
                    toml_path, e
                ))
            })?;
            config.apply_toml(toml_config);
            log::debug!("Loaded config file; path={}", toml_path);
        } else if config_path.is_some() {
            return Err(SyncError::ConfigError(format!(
                "Config file '{}' not found",
                toml_path
            )));
        }

        // Layer 2: Environment variables
        config.apply_env();

        // Layer 1: CLI overrides
        config.apply_cli(overrides);

        config.validate()?;
        Ok(config)
    }

    fn apply_toml(&mut self, toml: TomlConfig) {
        if let Some(s) = toml.sync {
            apply_option!(s.branch => self.sync.branch);
            apply_option!(s.skip_checkout => self.sync.skip_checkout);
        }

        if let Some(p) = toml.project {
            apply_option!(p.marker => self.project.marker);
            apply_option!(p.python.map(|v| Some(PathBuf::from(v))) => self.project.python);
            apply_option!(p.settings_module.map(Some) => self.project.settings_module);
            apply_option!(p.excluded_dirs => self.project.excluded_dirs);
            apply_option!(p.settings_timeout => self.project.settings_timeout_secs);
        }
    }

    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("DEV_BRANCH") {
            self.sync.branch = v;
        }
        if let Ok(v) = std::env::var("DJANGO_SYNC_PYTHON") {
            self.project.python = Some(PathBuf::from(v));
        }
        if let Ok(v) = std::env::var("DJANGO_SETTINGS_MODULE") {
            self.project.settings_module = Some(v);
        }
        if let Ok(v) = std::env::var("DJANGO_SYNC_SETTINGS_TIMEOUT") {
            match v.parse::<u64>() {
                Ok(n) => self.project.settings_timeout_secs = n,
                Err(_) => log::warn!(
                    "Ignoring invalid DJANGO_SYNC_SETTINGS_TIMEOUT; value={}",
                    v
                ),
            }
        }
    }

    fn apply_cli(&mut self, overrides: &CliOverrides) {
        apply_option_clone!(overrides.branch => self.sync.branch);
        apply_option!(overrides.skip_checkout => self.sync.skip_checkout);
        apply_option!(overrides.python.clone().map(Some) => self.project.python);
        apply_option!(overrides.settings_module.clone().map(Some) => self.project.settings_module);
    }

    fn validate(&self) -> Result<()> {
        if self.sync.branch.trim().is_empty() {
            return Err(SyncError::ConfigError(
                "Target branch must not be empty".to_string(),
            ));
        }
        if self.sync.branch.starts_with('-') {
            return Err(SyncError::ConfigError(format!(
                "Invalid branch name '{}'",
                self.sync.branch
            )));
        }
        if self.project.marker.is_empty() || self.project.marker.contains('/') {
            return Err(SyncError::ConfigError(format!(
                "Invalid project marker '{}'. Use a bare file name such as manage.py.",
                self.project.marker
            )));
        }
        Ok(())
    }
}
