//! Django project discovery: root directory, interpreter, settings module.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex_lite::Regex;

use crate::config::ProjectSettings;
use crate::error::{Result, SyncError};

/// Walk up from `start` to find the directory containing `marker`.
pub fn find_project_root(start: &Path, marker: &str) -> Result<PathBuf> {
    let start = start
        .canonicalize()
        .unwrap_or_else(|_| start.to_path_buf());
    start
        .ancestors()
        .find(|dir| dir.join(marker).is_file())
        .map(Path::to_path_buf)
        .ok_or_else(|| SyncError::ProjectNotFound {
            marker: marker.to_string(),
        })
}

/// Pick the interpreter used to run `manage.py`.
///
/// An explicit setting wins. Otherwise the project's own `.venv` is
/// preferred so Django and the project's dependencies are importable,
/// falling back to whatever `python3` is on `PATH`.
pub fn python_for(project_root: &Path, settings: &ProjectSettings) -> PathBuf {
    if let Some(ref python) = settings.python {
        return if python.is_absolute() || python.components().count() == 1 {
            python.clone()
        } else {
            project_root.join(python)
        };
    }

    let unix_venv = project_root.join(".venv").join("bin").join("python");
    if unix_venv.exists() {
        return unix_venv;
    }
    let windows_venv = project_root
        .join(".venv")
        .join("Scripts")
        .join("python.exe");
    if windows_venv.exists() {
        return windows_venv;
    }

    if cfg!(windows) {
        PathBuf::from("python")
    } else {
        PathBuf::from("python3")
    }
}

static SETTINGS_DEFAULT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"setdefault\s*\(\s*['"]DJANGO_SETTINGS_MODULE['"]\s*,\s*['"]([^'"]+)['"]"#)
        .unwrap()
});

/// Extract the settings module from `manage.py` source.
pub fn parse_settings_module(manage_py_source: &str) -> Option<String> {
    SETTINGS_DEFAULT_RE
        .captures(manage_py_source)
        .map(|c| c[1].to_string())
}

/// Resolve the dotted settings module for the project.
pub fn settings_module(project_root: &Path, settings: &ProjectSettings) -> Option<String> {
    if let Some(ref module) = settings.settings_module {
        return Some(module.clone());
    }
    let source = std::fs::read_to_string(project_root.join(&settings.marker)).ok()?;
    parse_settings_module(&source)
}

/// Locate the source file of a dotted module under the project root.
pub fn module_source_path(project_root: &Path, module: &str) -> Option<PathBuf> {
    let rel: PathBuf = module.split('.').collect();
    let as_file = project_root.join(&rel).with_extension("py");
    if as_file.is_file() {
        return Some(as_file);
    }
    let as_package = project_root.join(&rel).join("__init__.py");
    as_package.is_file().then_some(as_package)
}
