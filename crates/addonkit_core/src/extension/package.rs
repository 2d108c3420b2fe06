//! Package directory snapshots and content checksums.
//!
//! # Responsibility
//! - Capture one read-only listing of an extension package directory.
//! - Compute the package checksum compared against `security.checksum`.
//!
//! # Invariants
//! - Entries are sorted by file name so checksums are stable across platforms.
//! - The manifest file never contributes to the checksum.

use crate::extension::manifest::MANIFEST_FILE_NAME;
use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::Path;

/// One top-level entry in a package directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageEntry {
    pub name: String,
    pub is_dir: bool,
    /// File contents; empty for directories.
    pub contents: Vec<u8>,
}

/// Snapshot of a package directory taken once during the repository scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageListing {
    entries: Vec<PackageEntry>,
}

impl PackageListing {
    /// Builds a listing from in-memory entries.
    pub fn from_entries(mut entries: Vec<PackageEntry>) -> Self {
        entries.sort_by(|left, right| left.name.cmp(&right.name));
        Self { entries }
    }

    /// Reads the top level of `dir`. Nested directories are listed by name only.
    pub fn read(dir: &Path) -> io::Result<Self> {
        let mut entries = Vec::new();
        for item in fs::read_dir(dir)? {
            let item = item?;
            let name = item.file_name().to_string_lossy().into_owned();
            let file_type = item.file_type()?;
            if file_type.is_dir() {
                entries.push(PackageEntry {
                    name,
                    is_dir: true,
                    contents: Vec::new(),
                });
            } else if file_type.is_file() {
                let contents = fs::read(item.path())?;
                entries.push(PackageEntry {
                    name,
                    is_dir: false,
                    contents,
                });
            }
        }
        Ok(Self::from_entries(entries))
    }

    pub fn entries(&self) -> &[PackageEntry] {
        &self.entries
    }

    /// Lowercase hex SHA-256 over `name NUL contents` of every non-manifest file.
    pub fn checksum(&self) -> String {
        let mut hasher = Sha256::new();
        for entry in self
            .entries
            .iter()
            .filter(|entry| !entry.is_dir && entry.name != MANIFEST_FILE_NAME)
        {
            hasher.update(entry.name.as_bytes());
            hasher.update([0u8]);
            hasher.update(&entry.contents);
        }
        hex::encode(hasher.finalize())
    }
}
