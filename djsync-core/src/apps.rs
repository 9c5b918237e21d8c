//! INSTALLED_APPS discovery.
//!
//! Determines which top-level app directories belong to the project so that
//! vendored or unrelated directories with a `migrations/` folder are ignored.
//! Two attempts are made, in order:
//!
//! 1. Read the settings module source and take the string literals of
//!    `INSTALLED_APPS`. Any non-literal entry makes this attempt fail.
//! 2. Run `manage.py shell -c` and parse the JSON array it prints.
//!
//! If both fail the caller includes every app found in the repository.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use regex_lite::Regex;
use serde::{Deserialize, Serialize};

use crate::config::ProjectSettings;
use crate::error::{Result, SyncError};
use crate::manage::ManagementRunner;
use crate::project;

/// Python executed inside `manage.py shell` to dump INSTALLED_APPS as JSON.
pub const SHELL_CODE: &str = "import json; from django.conf import settings; \
print(json.dumps([x if isinstance(x, str) else \
{'label': getattr(x, 'label', None), 'name': getattr(x, 'name', None)} \
for x in settings.INSTALLED_APPS]))";

/// One INSTALLED_APPS entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum AppEntry {
    /// A dotted path such as `"blog"` or `"blog.apps.BlogConfig"`.
    PlainName(String),
    /// An app config object reduced to its label and name.
    StructuredName {
        label: Option<String>,
        name: Option<String>,
    },
}

impl AppEntry {
    /// Resolve to the app directory identifier, if the entry names one.
    pub fn identifier(&self) -> Option<String> {
        let raw = match self {
            AppEntry::PlainName(path) => Some(path.as_str()),
            AppEntry::StructuredName { label, name } => label
                .as_deref()
                .filter(|l| !l.is_empty())
                .or(name.as_deref()),
        }?;
        let segment = first_segment(raw);
        (!segment.is_empty()).then(|| segment.to_string())
    }
}

/// Leading segment of a dotted path: `"blog.apps.BlogConfig"` -> `"blog"`.
pub fn first_segment(path: &str) -> &str {
    path.split('.').next().unwrap_or(path).trim()
}

/// Where the installed app list came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AppSource {
    SettingsFile,
    ManagementShell,
}

impl std::fmt::Display for AppSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppSource::SettingsFile => write!(f, "settings file"),
            AppSource::ManagementShell => write!(f, "manage.py shell"),
        }
    }
}

/// The set of app directories allowed by INSTALLED_APPS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstalledApps {
    labels: BTreeSet<String>,
    source: AppSource,
}

impl InstalledApps {
    /// Build from raw entries. Returns `None` when no entry resolves to an identifier.
    pub fn from_entries(entries: &[AppEntry], source: AppSource) -> Option<Self> {
        let labels: BTreeSet<String> = entries.iter().filter_map(AppEntry::identifier).collect();
        (!labels.is_empty()).then_some(Self { labels, source })
    }

    pub fn contains(&self, app_dir: &str) -> bool {
        self.labels.contains(app_dir)
    }

    pub fn labels(&self) -> &BTreeSet<String> {
        &self.labels
    }

    pub fn source(&self) -> AppSource {
        self.source
    }
}

/// Whether `app_dir` passes an optional filter. No filter allows everything.
pub fn is_allowed(filter: Option<&InstalledApps>, app_dir: &str) -> bool {
    filter.map_or(true, |apps| apps.contains(app_dir))
}

static ASSIGN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*INSTALLED_APPS[ \t]*(\+=|=|\.)").unwrap());

/// Statements that can rebind settings names behind the parser's back.
static DYNAMIC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?m)^[ \t]*from[ \t]+\S+[ \t]+import[ \t]+\*",
        r"|\b(exec|execfile|globals|setattr|include)[ \t]*\(",
    ))
    .unwrap()
});

/// Extract INSTALLED_APPS from settings source when it is a plain literal.
///
/// Handles `INSTALLED_APPS = [...]` / `(...)` and later `+= [...]`
/// extensions. Returns `None` for anything computed (names, splats,
/// concatenation, method calls, item assignment) and when a star import
/// or dynamic statement follows the first assignment, since the result
/// could be incomplete.
pub fn parse_installed_apps_literal(source: &str) -> Option<Vec<AppEntry>> {
    let first = ASSIGN_RE.find(source)?;
    if DYNAMIC_RE.is_match(&source[first.start()..]) {
        return None;
    }
    // Every mention must be one of the assignments handled below.
    if mentions_outside_comments(source) != ASSIGN_RE.find_iter(source).count() {
        return None;
    }

    let mut apps: Option<Vec<String>> = None;

    for caps in ASSIGN_RE.captures_iter(source) {
        let whole = caps.get(0)?;
        let op = caps.get(1)?.as_str();
        if op == "." {
            return None;
        }

        let rest = source[whole.end()..].trim_start();
        let (items, after) = scan_literal_sequence(rest)?;
        if after.trim_start_matches([' ', '\t']).starts_with(['+', '\\']) {
            return None;
        }

        match op {
            "=" => apps = Some(items),
            _ => apps.as_mut()?.extend(items),
        }
    }

    apps.filter(|a| !a.is_empty())
        .map(|a| a.into_iter().map(AppEntry::PlainName).collect())
}

fn mentions_outside_comments(source: &str) -> usize {
    source
        .lines()
        .filter(|line| !line.trim_start().starts_with('#'))
        .map(|line| line.matches("INSTALLED_APPS").count())
        .sum()
}

/// Scan a `[...]` or `(...)` of string literals. Returns the strings and
/// the text following the closing bracket.
fn scan_literal_sequence(text: &str) -> Option<(Vec<String>, &str)> {
    let mut chars = text.char_indices().peekable();
    let (_, open) = chars.next()?;
    let close = match open {
        '[' => ']',
        '(' => ')',
        _ => return None,
    };

    let mut items = Vec::new();
    while let Some((i, c)) = chars.next() {
        match c {
            c if c.is_whitespace() || c == ',' => {}
            '#' => {
                while chars.next_if(|&(_, n)| n != '\n').is_some() {}
            }
            '\'' | '"' => {
                let quote = c;
                let mut value = String::new();
                loop {
                    let (_, n) = chars.next()?;
                    match n {
                        '\\' => value.push(chars.next()?.1),
                        '\n' => return None,
                        n if n == quote => break,
                        n => value.push(n),
                    }
                }
                // "" followed by a quote is the start of a triple-quoted string
                if value.is_empty() && chars.peek().is_some_and(|&(_, n)| n == quote) {
                    return None;
                }
                items.push(value);
            }
            c if c == close => return Some((items, &text[i + c.len_utf8()..])),
            _ => return None,
        }
    }
    None
}

/// Parse the stdout of [`SHELL_CODE`]. Django may print banners or
/// warnings first, so the first line that starts with `[` is used.
pub fn parse_shell_output(stdout: &str) -> std::result::Result<Vec<AppEntry>, String> {
    let line = stdout
        .lines()
        .map(str::trim)
        .find(|l| l.starts_with('['))
        .ok_or_else(|| "no JSON array in manage.py shell output".to_string())?;
    serde_json::from_str(line).map_err(|e| format!("invalid JSON from manage.py shell: {}", e))
}

fn from_settings_file(
    project_root: &Path,
    settings: &ProjectSettings,
) -> std::result::Result<InstalledApps, String> {
    let module = project::settings_module(project_root, settings)
        .ok_or_else(|| "DJANGO_SETTINGS_MODULE not found".to_string())?;
    let path = project::module_source_path(project_root, &module)
        .ok_or_else(|| format!("settings module '{}' not found under project root", module))?;
    let source = std::fs::read_to_string(&path)
        .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    let entries = parse_installed_apps_literal(&source)
        .ok_or_else(|| format!("INSTALLED_APPS in {} is not a plain literal", path.display()))?;
    InstalledApps::from_entries(&entries, AppSource::SettingsFile)
        .ok_or_else(|| "INSTALLED_APPS is empty".to_string())
}

fn from_management_shell<M: ManagementRunner + ?Sized>(
    runner: &M,
    timeout: Duration,
) -> std::result::Result<InstalledApps, String> {
    let args = vec!["shell".to_string(), "-c".to_string(), SHELL_CODE.to_string()];
    let stdout = runner.capture(&args, timeout).map_err(|e| e.to_string())?;
    let entries = parse_shell_output(&stdout)?;
    InstalledApps::from_entries(&entries, AppSource::ManagementShell)
        .ok_or_else(|| "INSTALLED_APPS is empty".to_string())
}

/// Determine the installed app directories, trying each method in turn.
///
/// Fails with [`SyncError::SettingsLoadFailed`] when no method succeeds;
/// callers recover by not filtering.
pub fn load_installed_apps<M: ManagementRunner + ?Sized>(
    project_root: &Path,
    settings: &ProjectSettings,
    runner: &M,
) -> Result<InstalledApps> {
    let file_err = match from_settings_file(project_root, settings) {
        Ok(apps) => {
            log::debug!(
                "INSTALLED_APPS: using direct settings read; apps={}",
                apps.labels().len()
            );
            return Ok(apps);
        }
        Err(reason) => {
            log::debug!(
                "INSTALLED_APPS: direct settings read failed, trying manage.py shell; reason={}",
                reason
            );
            reason
        }
    };

    let timeout = Duration::from_secs(settings.settings_timeout_secs);
    match from_management_shell(runner, timeout) {
        Ok(apps) => {
            log::debug!(
                "INSTALLED_APPS: using manage.py shell; apps={}",
                apps.labels().len()
            );
            Ok(apps)
        }
        Err(shell_err) => Err(SyncError::SettingsLoadFailed(format!(
            "{}; {}",
            file_err, shell_err
        ))),
    }
}
