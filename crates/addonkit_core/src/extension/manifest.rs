//! Extension manifest declaration model.
//!
//! # Responsibility
//! - Define the typed shape of `manifest.json`.
//! - Provide defaults for optional fields.
//!
//! # Invariants
//! - A typed manifest is only built from raw JSON that already passed
//!   `ManifestValidator`; this module does not re-check semantics.

use crate::extension::permission::Permission;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};

/// File name of the manifest inside every extension package directory.
pub const MANIFEST_FILE_NAME: &str = "manifest.json";

/// Declarative extension manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionManifest {
    /// Unique key, e.g. `email_reports`.
    pub name: String,
    /// Human-readable label. Defaults to `name`.
    #[serde(default)]
    pub display_name: String,
    /// Semantic version string.
    pub version: String,
    #[serde(default)]
    pub addon_type: AddonType,
    /// `module.Type` reference resolved by the loader catalog.
    pub entry_point: String,
    #[serde(default)]
    pub requires_license: LicenseTier,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub permissions: BTreeSet<Permission>,
    #[serde(default)]
    pub menu_items: Vec<MenuAction>,
    #[serde(default)]
    pub security: SecurityPolicy,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub homepage: Option<String>,
    #[serde(default)]
    pub repository: Option<String>,
    /// Oldest host version this extension supports (inclusive).
    #[serde(default)]
    pub min_host_version: Option<String>,
    /// Newest host version this extension supports (inclusive).
    #[serde(default)]
    pub max_host_version: Option<String>,
}

impl ExtensionManifest {
    /// Builds a typed manifest from validated raw JSON.
    pub fn from_value(raw: &serde_json::Value) -> Result<Self, serde_json::Error> {
        let mut manifest = Self::deserialize(raw)?;
        if manifest.display_name.trim().is_empty() {
            manifest.display_name = manifest.name.clone();
        }
        Ok(manifest)
    }

    pub fn declares(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }

    /// Returns the parsed entry point, if well formed.
    pub fn entry_point(&self) -> Option<EntryPoint> {
        EntryPoint::parse(&self.entry_point)
    }
}

/// Parsed `module.Type` entry point.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryPoint {
    pub module: String,
    pub type_name: String,
}

impl EntryPoint {
    pub fn parse(value: &str) -> Option<Self> {
        let (module, type_name) = value.trim().split_once('.')?;
        if !is_identifier(module) || !is_identifier(type_name) {
            return None;
        }
        Some(Self {
            module: module.to_string(),
            type_name: type_name.to_string(),
        })
    }
}

impl Display for EntryPoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.module, self.type_name)
    }
}

/// Extension category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddonType {
    #[default]
    Utility,
    Integration,
    Report,
    Analysis,
}

impl AddonType {
    pub const ALL: [AddonType; 4] = [
        Self::Utility,
        Self::Integration,
        Self::Report,
        Self::Analysis,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Utility => "utility",
            Self::Integration => "integration",
            Self::Report => "report",
            Self::Analysis => "analysis",
        }
    }
}

/// Host license tier, ordered from least to most privileged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LicenseTier {
    #[default]
    #[serde(alias = "FREE")]
    Free,
    #[serde(alias = "PROFESSIONAL")]
    Professional,
    #[serde(alias = "ENTERPRISE")]
    Enterprise,
}

impl LicenseTier {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Professional => "professional",
            Self::Enterprise => "enterprise",
        }
    }

    /// Parses either the lowercase or the uppercase manifest spelling.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "free" => Some(Self::Free),
            "professional" => Some(Self::Professional),
            "enterprise" => Some(Self::Enterprise),
            _ => None,
        }
    }
}

/// File system access mode granted by the security policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileAccess {
    None,
    #[default]
    ReadOnly,
    ReadWrite,
}

impl FileAccess {
    pub const ALL: [FileAccess; 3] = [Self::None, Self::ReadOnly, Self::ReadWrite];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::ReadOnly => "read_only",
            Self::ReadWrite => "read_write",
        }
    }

    pub fn allows_read(self) -> bool {
        !matches!(self, Self::None)
    }

    pub fn allows_write(self) -> bool {
        matches!(self, Self::ReadWrite)
    }
}

/// Per-extension security policy block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityPolicy {
    pub sandbox: bool,
    pub network_access: bool,
    pub file_access: FileAccess,
    /// Lowercase hex SHA-256 of the package contents.
    pub checksum: Option<String>,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            sandbox: true,
            network_access: false,
            file_access: FileAccess::ReadOnly,
            checksum: None,
        }
    }
}

/// One menu action declared by an extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuAction {
    /// Menu item id, unique within its manifest.
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub icon: Option<String>,
    /// Action name dispatched to the extension's command table.
    pub action: String,
    #[serde(default)]
    pub requires_confirmation: bool,
    #[serde(default)]
    pub description: Option<String>,
}

pub(crate) fn is_identifier(value: &str) -> bool {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::{AddonType, EntryPoint, ExtensionManifest, FileAccess, LicenseTier};
    use crate::extension::permission::Permission;
    use serde_json::json;

    #[test]
    fn applies_defaults_for_minimal_manifest() {
        let manifest = ExtensionManifest::from_value(&json!({
            "name": "echo",
            "version": "1.0.0",
            "entry_point": "echo_addon.Echo",
            "permissions": ["file_read"]
        }))
        .expect("minimal manifest should parse");

        assert_eq!(manifest.display_name, "echo");
        assert_eq!(manifest.addon_type, AddonType::Utility);
        assert_eq!(manifest.requires_license, LicenseTier::Free);
        assert!(manifest.security.sandbox);
        assert_eq!(manifest.security.file_access, FileAccess::ReadOnly);
        assert!(manifest.declares(Permission::FileRead));
        assert!(manifest.menu_items.is_empty());
    }

    #[test]
    fn accepts_uppercase_license_spelling() {
        let manifest = ExtensionManifest::from_value(&json!({
            "name": "email_reports",
            "version": "1.2.0",
            "entry_point": "email_reports_addon.EmailReportsAddon",
            "requires_license": "PROFESSIONAL"
        }))
        .expect("uppercase license should parse");
        assert_eq!(manifest.requires_license, LicenseTier::Professional);
    }

    #[test]
    fn parses_entry_points() {
        let entry = EntryPoint::parse("echo_addon.Echo").expect("valid entry point");
        assert_eq!(entry.module, "echo_addon");
        assert_eq!(entry.type_name, "Echo");
        assert_eq!(entry.to_string(), "echo_addon.Echo");

        assert!(EntryPoint::parse("echo").is_none());
        assert!(EntryPoint::parse("a.b.c").is_none());
        assert!(EntryPoint::parse("9mod.Type").is_none());
    }

    #[test]
    fn orders_license_tiers() {
        assert!(LicenseTier::Free < LicenseTier::Professional);
        assert!(LicenseTier::Professional < LicenseTier::Enterprise);
        assert_eq!(LicenseTier::parse("Enterprise"), Some(LicenseTier::Enterprise));
        assert_eq!(LicenseTier::parse("gold"), None);
    }

    #[test]
    fn file_access_modes_gate_read_and_write() {
        assert!(!FileAccess::None.allows_read());
        assert!(FileAccess::ReadOnly.allows_read());
        assert!(!FileAccess::ReadOnly.allows_write());
        assert!(FileAccess::ReadWrite.allows_write());
    }
}
