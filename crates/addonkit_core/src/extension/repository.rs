//! One-shot discovery of extension packages beneath a root directory.
//!
//! # Responsibility
//! - Walk the immediate subdirectories of the extensions root.
//! - Read each `manifest.json` and a snapshot of the package contents.
//!
//! # Invariants
//! - Directories are visited in sorted name order, so "first discovered"
//!   is deterministic.
//! - A duplicate manifest name never replaces an earlier package.
//! - Scanning never fails as a whole once the root is readable; per-package
//!   problems are recorded as skipped entries.

use crate::extension::manifest::MANIFEST_FILE_NAME;
use crate::extension::package::PackageListing;
use log::{info, warn};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Directory holding per-extension configuration files.
pub const CONFIG_DIR_NAME: &str = "config";

const IGNORED_DIRS: &[&str] = &[CONFIG_DIR_NAME, ".git", "__pycache__"];

/// Package found during a scan.
#[derive(Debug, Clone)]
pub struct DiscoveredPackage {
    /// Manifest `name`, or the directory name when the manifest lacks one.
    pub name: String,
    pub path: PathBuf,
    pub raw_manifest: Value,
    pub listing: PackageListing,
}

/// Reason a directory did not produce a package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    UnreadableManifest(String),
    MalformedManifest(String),
    UnreadablePackage(String),
    DuplicateName { name: String, kept: PathBuf },
}

impl SkipReason {
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnreadableManifest(_) => "manifest_unreadable",
            Self::MalformedManifest(_) => "manifest_malformed",
            Self::UnreadablePackage(_) => "package_unreadable",
            Self::DuplicateName { .. } => "duplicate_name",
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnreadableManifest(err) => write!(f, "manifest could not be read: {err}"),
            Self::MalformedManifest(err) => write!(f, "manifest is not valid JSON: {err}"),
            Self::UnreadablePackage(err) => write!(f, "package could not be listed: {err}"),
            Self::DuplicateName { name, kept } => write!(
                f,
                "extension name `{name}` already provided by {}",
                kept.display()
            ),
        }
    }
}

/// Directory that was looked at but not turned into a package.
#[derive(Debug, Clone)]
pub struct SkippedPackage {
    pub path: PathBuf,
    pub reason: SkipReason,
}

/// Result of one repository scan.
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    pub discovered: Vec<DiscoveredPackage>,
    pub skipped: Vec<SkippedPackage>,
}

impl ScanReport {
    /// Human-readable warnings for skipped packages.
    pub fn warnings(&self) -> Vec<String> {
        self.skipped
            .iter()
            .map(|skipped| format!("{}: {}", skipped.path.display(), skipped.reason))
            .collect()
    }
}

/// Filesystem scanner for extension packages.
#[derive(Debug, Clone)]
pub struct ExtensionRepository {
    root: PathBuf,
}

impl ExtensionRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the optional config file for extension `name`.
    pub fn config_path(&self, name: &str) -> PathBuf {
        self.root.join(CONFIG_DIR_NAME).join(format!("{name}.json"))
    }

    /// Takes one snapshot of the root directory.
    ///
    /// # Errors
    /// - Returns the I/O error when the root itself cannot be listed.
    pub fn scan(&self) -> io::Result<ScanReport> {
        let started_at = Instant::now();
        info!(
            "event=repository_scan module=extension status=start root={}",
            self.root.display()
        );

        let mut report = ScanReport::default();
        let mut seen = BTreeSet::new();
        for dir in self.package_dirs()? {
            match read_package(&dir) {
                Ok(package) => {
                    if seen.insert(package.name.clone()) {
                        report.discovered.push(package);
                        continue;
                    }
                    let kept = report
                        .discovered
                        .iter()
                        .find(|existing| existing.name == package.name)
                        .map(|existing| existing.path.clone())
                        .unwrap_or_default();
                    warn!(
                        "event=repository_scan module=extension status=warn error_code=duplicate_name name={} path={} kept={}",
                        package.name,
                        dir.display(),
                        kept.display()
                    );
                    report.skipped.push(SkippedPackage {
                        path: dir,
                        reason: SkipReason::DuplicateName {
                            name: package.name,
                            kept,
                        },
                    });
                }
                Err(reason) => {
                    warn!(
                        "event=repository_scan module=extension status=warn error_code={} path={} error={}",
                        reason.code(),
                        dir.display(),
                        reason
                    );
                    report.skipped.push(SkippedPackage { path: dir, reason });
                }
            }
        }

        info!(
            "event=repository_scan module=extension status=ok duration_ms={} discovered={} skipped={}",
            started_at.elapsed().as_millis(),
            report.discovered.len(),
            report.skipped.len()
        );
        Ok(report)
    }

    fn package_dirs(&self) -> io::Result<Vec<PathBuf>> {
        let mut dirs = Vec::new();
        for item in fs::read_dir(&self.root)? {
            let item = item?;
            if !item.file_type()?.is_dir() {
                continue;
            }
            let name = item.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') || IGNORED_DIRS.contains(&name.as_str()) {
                continue;
            }
            if item.path().join(MANIFEST_FILE_NAME).is_file() {
                dirs.push(item.path());
            }
        }
        dirs.sort();
        Ok(dirs)
    }
}

fn read_package(dir: &Path) -> Result<DiscoveredPackage, SkipReason> {
    let text = fs::read_to_string(dir.join(MANIFEST_FILE_NAME))
        .map_err(|err| SkipReason::UnreadableManifest(err.to_string()))?;
    let raw_manifest: Value = serde_json::from_str(&text)
        .map_err(|err| SkipReason::MalformedManifest(err.to_string()))?;
    let listing =
        PackageListing::read(dir).map_err(|err| SkipReason::UnreadablePackage(err.to_string()))?;

    let name = raw_manifest
        .get("name")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| {
            dir.file_name()
                .map(|value| value.to_string_lossy().into_owned())
                .unwrap_or_default()
        });

    Ok(DiscoveredPackage {
        name,
        path: dir.to_path_buf(),
        raw_manifest,
        listing,
    })
}

#[cfg(test)]
mod tests {
    use super::{ExtensionRepository, SkipReason};
    use std::fs;
    use std::path::Path;

    fn write_package(root: &Path, dir: &str, manifest: &str) {
        let path = root.join(dir);
        fs::create_dir_all(&path).expect("create package dir");
        fs::write(path.join("manifest.json"), manifest).expect("write manifest");
    }

    #[test]
    fn discovers_packages_in_sorted_order() {
        let root = tempfile::tempdir().expect("tempdir");
        write_package(root.path(), "zeta", r#"{"name": "zeta_tool"}"#);
        write_package(root.path(), "alpha", r#"{"name": "alpha_tool"}"#);

        let report = ExtensionRepository::new(root.path()).scan().expect("scan");
        let names: Vec<&str> = report.discovered.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["alpha_tool", "zeta_tool"]);
        assert!(report.skipped.is_empty());
    }

    #[test]
    fn ignores_reserved_hidden_and_manifestless_dirs() {
        let root = tempfile::tempdir().expect("tempdir");
        write_package(root.path(), "config", r#"{"name": "config_pkg"}"#);
        write_package(root.path(), ".hidden", r#"{"name": "hidden_pkg"}"#);
        write_package(root.path(), "__pycache__", r#"{"name": "cache_pkg"}"#);
        fs::create_dir(root.path().join("empty")).expect("create empty dir");
        fs::write(root.path().join("stray.json"), "{}").expect("write stray file");

        let report = ExtensionRepository::new(root.path()).scan().expect("scan");
        assert!(report.discovered.is_empty());
        assert!(report.skipped.is_empty());
    }

    #[test]
    fn keeps_first_duplicate_and_records_later_ones() {
        let root = tempfile::tempdir().expect("tempdir");
        write_package(root.path(), "a_echo", r#"{"name": "echo"}"#);
        write_package(root.path(), "b_echo", r#"{"name": "echo"}"#);

        let report = ExtensionRepository::new(root.path()).scan().expect("scan");
        assert_eq!(report.discovered.len(), 1);
        assert!(report.discovered[0].path.ends_with("a_echo"));
        assert_eq!(report.skipped.len(), 1);
        assert!(matches!(
            report.skipped[0].reason,
            SkipReason::DuplicateName { .. }
        ));
        assert_eq!(report.warnings().len(), 1);
    }

    #[test]
    fn records_malformed_manifest_and_falls_back_to_dir_name() {
        let root = tempfile::tempdir().expect("tempdir");
        write_package(root.path(), "broken", "{ not json");
        write_package(root.path(), "nameless", r#"{"version": "1.0.0"}"#);

        let report = ExtensionRepository::new(root.path()).scan().expect("scan");
        assert_eq!(report.discovered.len(), 1);
        assert_eq!(report.discovered[0].name, "nameless");
        assert_eq!(report.skipped[0].reason.code(), "manifest_malformed");
    }

    #[test]
    fn missing_root_is_an_error() {
        let root = tempfile::tempdir().expect("tempdir");
        let missing = root.path().join("does_not_exist");
        assert!(ExtensionRepository::new(missing).scan().is_err());
    }

    #[test]
    fn builds_config_path_under_config_dir() {
        let repo = ExtensionRepository::new("/opt/host/extensions");
        assert!(repo
            .config_path("echo")
            .ends_with(Path::new("config").join("echo.json")));
    }
}
