//! Migration file discovery.
//!
//! Migration files follow `<app>/migrations/<NNNN>_<name>.py`. They are
//! listed either from a branch's git tree or from the working tree, and
//! grouped by app directory.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::LazyLock;

use regex_lite::Regex;
use serde::Serialize;
use walkdir::WalkDir;

use crate::apps::{self, InstalledApps};
use crate::error::Result;

static MIGRATION_PATH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.+)/migrations/(\d{4})_([^/]+)\.py$").unwrap());

static MIGRATION_FILE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{4})_([^/]+)\.py$").unwrap());

/// A single migration file belonging to an app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationFile {
    /// App directory, relative to the project root.
    pub app: String,
    /// Numeric prefix used for ordering.
    pub number: u32,
    /// Migration name without the `.py` suffix, e.g. `0003_add_tags`.
    pub name: String,
}

impl MigrationFile {
    /// File name on disk, e.g. `0003_add_tags.py`.
    pub fn file_name(&self) -> String {
        format!("{}.py", self.name)
    }
}

/// Parse a `/`-separated relative path into a migration file.
pub fn parse_migration_path(path: &str) -> Option<MigrationFile> {
    let caps = MIGRATION_PATH_RE.captures(path.trim())?;
    let number = caps[2].parse().ok()?;
    Some(MigrationFile {
        app: caps[1].to_string(),
        number,
        name: format!("{}_{}", &caps[2], &caps[3]),
    })
}

/// Parse a bare file name found inside `<app>/migrations/`.
pub fn parse_migration_file_name(app: &str, file_name: &str) -> Option<MigrationFile> {
    let caps = MIGRATION_FILE_RE.captures(file_name)?;
    let number = caps[1].parse().ok()?;
    Some(MigrationFile {
        app: app.to_string(),
        number,
        name: format!("{}_{}", &caps[1], &caps[2]),
    })
}

/// Whether any path segment is one of the excluded vendor directories.
pub fn is_excluded(path: &str, excluded_dirs: &[String]) -> bool {
    path.split('/')
        .any(|segment| excluded_dirs.iter().any(|ex| ex == segment))
}

/// The app and migration an app should be migrated to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationTarget {
    pub app: String,
    pub migration: String,
}

/// Migration files grouped by app, in listing order.
#[derive(Debug, Clone, Default)]
pub struct MigrationIndex {
    by_app: BTreeMap<String, Vec<MigrationFile>>,
}

impl MigrationIndex {
    /// Build from relative paths, keeping migrations of allowed, non-vendored apps.
    pub fn from_paths<I, S>(
        paths: I,
        filter: Option<&InstalledApps>,
        excluded_dirs: &[String],
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut index = MigrationIndex::default();
        for path in paths {
            let path = path.as_ref();
            if is_excluded(path, excluded_dirs) {
                continue;
            }
            if let Some(file) = parse_migration_path(path) {
                if apps::is_allowed(filter, &file.app) {
                    index.push(file);
                }
            }
        }
        index
    }

    pub fn push(&mut self, file: MigrationFile) {
        self.by_app.entry(file.app.clone()).or_default().push(file);
    }

    pub fn is_empty(&self) -> bool {
        self.by_app.is_empty()
    }

    pub fn apps(&self) -> impl Iterator<Item = &str> {
        self.by_app.keys().map(String::as_str)
    }

    /// Latest migration per app by numeric prefix, sorted by app.
    ///
    /// When two files share a prefix the one listed last wins.
    pub fn latest(&self) -> Vec<MigrationTarget> {
        self.by_app
            .iter()
            .filter_map(|(app, files)| {
                let mut latest: Option<&MigrationFile> = None;
                for file in files {
                    match latest {
                        Some(current) if file.number < current.number => {}
                        Some(current) if file.number == current.number => {
                            log::warn!(
                                "Duplicate migration number, using the later file; \
                                 app={}, kept={}, ignored={}",
                                app,
                                file.name,
                                current.name
                            );
                            latest = Some(file);
                        }
                        _ => latest = Some(file),
                    }
                }
                latest.map(|file| MigrationTarget {
                    app: app.clone(),
                    migration: file.name.clone(),
                })
            })
            .collect()
    }

    /// All migration file names per app.
    pub fn file_sets(&self) -> BTreeMap<String, BTreeSet<String>> {
        self.by_app
            .iter()
            .map(|(app, files)| {
                (
                    app.clone(),
                    files.iter().map(MigrationFile::file_name).collect(),
                )
            })
            .collect()
    }
}

/// Restrict repository-relative paths to those under `prefix` and make them
/// project-relative. An empty prefix keeps every path.
pub fn strip_project_prefix<'a>(
    paths: &'a [String],
    prefix: &'a str,
) -> impl Iterator<Item = &'a str> + 'a {
    paths.iter().filter_map(move |p| {
        if prefix.is_empty() {
            Some(p.as_str())
        } else {
            p.strip_prefix(prefix).and_then(|rest| rest.strip_prefix('/'))
        }
    })
}

/// List migrations present on disk under the project root.
///
/// With a filter, only `<app>/migrations/` of each installed app is read.
/// Without one, the whole project tree is walked, skipping vendored
/// directories and dot-directories such as `.git`.
pub fn scan_working_tree(
    project_root: &Path,
    filter: Option<&InstalledApps>,
    excluded_dirs: &[String],
) -> Result<MigrationIndex> {
    let mut index = MigrationIndex::default();

    match filter {
        Some(installed) => {
            for app in installed.labels() {
                let dir = project_root.join(app).join("migrations");
                if !dir.is_dir() {
                    continue;
                }
                let mut names: Vec<String> = std::fs::read_dir(&dir)?
                    .filter_map(|entry| entry.ok())
                    .filter(|entry| entry.path().is_file())
                    .filter_map(|entry| entry.file_name().to_str().map(String::from))
                    .collect();
                names.sort();
                for name in names {
                    if let Some(file) = parse_migration_file_name(app, &name) {
                        index.push(file);
                    }
                }
            }
        }
        None => {
            let walker = WalkDir::new(project_root)
                .sort_by_file_name()
                .into_iter()
                .filter_entry(|entry| {
                    entry.depth() == 0
                        || !entry.file_type().is_dir()
                        || entry.file_name().to_str().is_some_and(|name| {
                            !name.starts_with('.') && !excluded_dirs.iter().any(|ex| ex == name)
                        })
                });
            for entry in walker {
                let entry = entry.map_err(|e| {
                    std::io::Error::other(format!("failed to walk project tree: {}", e))
                })?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let Ok(rel) = entry.path().strip_prefix(project_root) else {
                    continue;
                };
                let rel: Vec<String> = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect();
                if let Some(file) = parse_migration_path(&rel.join("/")) {
                    index.push(file);
                }
            }
        }
    }

    Ok(index)
}

/// Migration files present in the working tree but not on the target
/// branch, per app.
///
/// An app is included only when it has at least one such file and the
/// branch has at least one migration for it; otherwise there is no
/// numbering to conflict with.
pub fn feature_only(
    in_tree: &BTreeMap<String, BTreeSet<String>>,
    on_branch: &BTreeMap<String, BTreeSet<String>>,
) -> BTreeMap<String, BTreeSet<String>> {
    let empty = BTreeSet::new();
    in_tree
        .iter()
        .filter_map(|(app, tree_files)| {
            let branch_files = on_branch.get(app).unwrap_or(&empty);
            let only: BTreeSet<String> = tree_files.difference(branch_files).cloned().collect();
            (!only.is_empty() && !branch_files.is_empty()).then(|| (app.clone(), only))
        })
        .collect()
}
