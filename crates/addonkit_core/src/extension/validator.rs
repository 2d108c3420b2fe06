//! Static manifest validation.
//!
//! # Responsibility
//! - Check a raw `manifest.json` value and its package snapshot before any
//!   extension code is resolved.
//! - Collect every violation instead of stopping at the first one.
//!
//! # Invariants
//! - Validation is a pure function of `(raw manifest, package listing)`.
//! - A report with zero errors always carries a typed manifest.

use crate::extension::error::{ValidationError, ValidationErrorKind};
use crate::extension::manifest::{
    is_identifier, AddonType, EntryPoint, ExtensionManifest, FileAccess, LicenseTier,
};
use crate::extension::package::PackageListing;
use crate::extension::permission::{parse_permission, Permission};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::BTreeSet;

static NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9_]{2,49}$").expect("static name pattern"));
static DEPENDENCY_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9_-]+((>=|<=|==|~=|!=)[0-9][0-9.]*)?$")
        .expect("static dependency pattern")
});
static MENU_ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("static menu id pattern"));
static SUSPICIOUS_URL_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)\.(tk|ml|ga|cf)(/|$)",
        r"(?i)bit\.ly",
        r"(?i)tinyurl\.com",
        r"[0-9]+\.[0-9]+\.[0-9]+\.[0-9]+",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("static url pattern"))
    .collect()
});

/// Dependency names that are never allowed in a manifest.
pub const DEFAULT_DEPENDENCY_DENYLIST: &[&str] = &[
    "subprocess32",
    "os",
    "sys",
    "eval",
    "exec",
    "requests",
    "urllib",
    "socket",
    "threading",
];

const PROHIBITED_EXTENSIONS: &[&str] = &["exe", "bat", "cmd", "sh", "dll", "so"];
const PROHIBITED_NAMES: &[&str] = &[".git", ".svn", "__pycache__"];

/// Result of validating one manifest.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub errors: Vec<ValidationError>,
    /// Advisory findings that do not fail validation.
    pub warnings: Vec<String>,
    manifest: Option<ExtensionManifest>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn errors_of(&self, kind: ValidationErrorKind) -> impl Iterator<Item = &ValidationError> {
        self.errors.iter().filter(move |err| err.kind == kind)
    }

    pub fn has_error(&self, kind: ValidationErrorKind, field: &str) -> bool {
        self.errors_of(kind).any(|err| err.field == field)
    }

    /// Typed manifest, present only when validation passed.
    pub fn manifest(&self) -> Option<&ExtensionManifest> {
        self.manifest.as_ref()
    }

    pub fn into_manifest(self) -> Option<ExtensionManifest> {
        self.manifest
    }
}

/// Manifest validator with a configurable dependency denylist.
#[derive(Debug, Clone)]
pub struct ManifestValidator {
    dependency_denylist: BTreeSet<String>,
}

impl Default for ManifestValidator {
    fn default() -> Self {
        Self {
            dependency_denylist: DEFAULT_DEPENDENCY_DENYLIST
                .iter()
                .map(|value| value.to_string())
                .collect(),
        }
    }
}

impl ManifestValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one dependency name to the denylist (compared case-insensitively).
    pub fn deny_dependency(mut self, name: &str) -> Self {
        self.dependency_denylist
            .insert(name.trim().to_ascii_lowercase());
        self
    }

    /// Validates `raw` against schema, semantic, security and integrity rules.
    pub fn validate(&self, raw: &Value, listing: &PackageListing) -> ValidationReport {
        let mut report = ValidationReport::default();
        let Some(root) = raw.as_object() else {
            report
                .errors
                .push(ValidationError::schema("$", "manifest must be a JSON object"));
            return report;
        };

        check_schema(root, &mut report.errors);
        check_semantics(root, &mut report.errors);
        self.check_security(root, &mut report);
        check_integrity(root, listing, &mut report.errors);

        if report.is_valid() {
            match ExtensionManifest::from_value(raw) {
                Ok(manifest) => report.manifest = Some(manifest),
                Err(err) => report
                    .errors
                    .push(ValidationError::schema("$", format!("manifest does not decode: {err}"))),
            }
        }
        report
    }

    fn check_security(&self, root: &Map<String, Value>, report: &mut ValidationReport) {
        let security = root.get("security").and_then(Value::as_object);
        let network_allowed = security
            .and_then(|block| block.get("network_access"))
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let file_access = security
            .and_then(|block| block.get("file_access"))
            .and_then(Value::as_str)
            .and_then(parse_file_access)
            .unwrap_or_default();

        if let Some(false) = security
            .and_then(|block| block.get("sandbox"))
            .and_then(Value::as_bool)
        {
            report.errors.push(ValidationError::security(
                "security.sandbox",
                "disabling the sandbox requires manual review",
            ));
        }

        let mut seen = BTreeSet::new();
        for (index, value) in string_items(root, "permissions") {
            let field = format!("permissions[{index}]");
            let permission = match parse_permission(value) {
                Ok(permission) => permission,
                Err(err) => {
                    report.errors.push(ValidationError::security(field, err.to_string()));
                    continue;
                }
            };
            if !seen.insert(permission) {
                report
                    .warnings
                    .push(format!("permission declared twice: {permission}"));
                continue;
            }
            if permission.is_sensitive() {
                report
                    .warnings
                    .push(format!("sensitive permission requested: {permission}"));
            }

            let exceeds_policy = match permission {
                Permission::NetworkAccess => !network_allowed,
                Permission::FileRead => !file_access.allows_read(),
                Permission::FileWrite => !file_access.allows_write(),
                _ => false,
            };
            if exceeds_policy {
                report.errors.push(ValidationError::security(
                    field,
                    format!(
                        "permission `{permission}` exceeds security policy (network_access={network_allowed}, file_access={})",
                        file_access.as_str()
                    ),
                ));
            }
        }

        for (index, value) in string_items(root, "dependencies") {
            let name = dependency_name(value).to_ascii_lowercase();
            if self.dependency_denylist.contains(&name) {
                report.errors.push(ValidationError::security(
                    format!("dependencies[{index}]"),
                    format!("dependency is on the denylist: {value}"),
                ));
            }
        }

        for key in ["homepage", "repository"] {
            if let Some(url) = root.get(key).and_then(Value::as_str) {
                if SUSPICIOUS_URL_PATTERNS.iter().any(|pattern| pattern.is_match(url)) {
                    report.warnings.push(format!("suspicious {key} url: {url}"));
                }
            }
        }
    }
}

fn check_schema(root: &Map<String, Value>, errors: &mut Vec<ValidationError>) {
    for field in ["name", "version", "entry_point"] {
        match root.get(field) {
            None | Some(Value::Null) => {
                errors.push(ValidationError::schema(field, "required field is missing"))
            }
            Some(Value::String(_)) => {}
            Some(_) => errors.push(ValidationError::schema(field, "expected a string")),
        }
    }

    for field in [
        "display_name",
        "description",
        "author",
        "homepage",
        "repository",
        "min_host_version",
        "max_host_version",
    ] {
        expect_optional(root, field, field, JsonKind::String, errors);
    }

    if let Some(Value::String(value)) = root.get("addon_type") {
        if !AddonType::ALL.iter().any(|kind| kind.as_str() == value) {
            errors.push(ValidationError::schema(
                "addon_type",
                format!("unknown addon type `{value}`"),
            ));
        }
    } else {
        expect_optional(root, "addon_type", "addon_type", JsonKind::String, errors);
    }

    if let Some(Value::String(value)) = root.get("requires_license") {
        if LicenseTier::parse(value).is_none() {
            errors.push(ValidationError::schema(
                "requires_license",
                format!("unknown license tier `{value}`"),
            ));
        }
    } else {
        expect_optional(root, "requires_license", "requires_license", JsonKind::String, errors);
    }

    for field in ["dependencies", "permissions"] {
        if let Some(items) = array_field(root, field, errors) {
            for (index, item) in items.iter().enumerate() {
                if !item.is_string() {
                    errors.push(ValidationError::schema(
                        format!("{field}[{index}]"),
                        "expected a string",
                    ));
                }
            }
        }
    }

    if let Some(items) = array_field(root, "menu_items", errors) {
        for (index, item) in items.iter().enumerate() {
            let prefix = format!("menu_items[{index}]");
            let Some(object) = item.as_object() else {
                errors.push(ValidationError::schema(prefix, "expected an object"));
                continue;
            };
            for key in ["id", "label", "action"] {
                let field = format!("{prefix}.{key}");
                match object.get(key) {
                    None | Some(Value::Null) => {
                        errors.push(ValidationError::schema(field, "required field is missing"))
                    }
                    Some(Value::String(_)) => {}
                    Some(_) => errors.push(ValidationError::schema(field, "expected a string")),
                }
            }
            for key in ["icon", "description"] {
                expect_optional(object, key, &format!("{prefix}.{key}"), JsonKind::String, errors);
            }
            expect_optional(
                object,
                "requires_confirmation",
                &format!("{prefix}.requires_confirmation"),
                JsonKind::Bool,
                errors,
            );
        }
    }

    match root.get("security") {
        None | Some(Value::Null) => {}
        Some(Value::Object(block)) => {
            for key in ["sandbox", "network_access"] {
                expect_optional(block, key, &format!("security.{key}"), JsonKind::Bool, errors);
            }
            expect_optional(block, "checksum", "security.checksum", JsonKind::String, errors);
            match block.get("file_access") {
                None | Some(Value::Null) => {}
                Some(Value::String(value)) if parse_file_access(value).is_some() => {}
                Some(Value::String(value)) => errors.push(ValidationError::schema(
                    "security.file_access",
                    format!("unknown file access mode `{value}`"),
                )),
                Some(_) => errors.push(ValidationError::schema(
                    "security.file_access",
                    "expected a string",
                )),
            }
        }
        Some(_) => errors.push(ValidationError::schema("security", "expected an object")),
    }
}

fn check_semantics(root: &Map<String, Value>, errors: &mut Vec<ValidationError>) {
    if let Some(name) = root.get("name").and_then(Value::as_str) {
        if !NAME_PATTERN.is_match(name) {
            errors.push(ValidationError::semantic(
                "name",
                format!("`{name}` must be snake_case, 3-50 chars, starting with a letter"),
            ));
        }
    }

    if let Some(version) = root.get("version").and_then(Value::as_str) {
        if let Err(err) = semver::Version::parse(version) {
            errors.push(ValidationError::semantic(
                "version",
                format!("`{version}` is not a semantic version: {err}"),
            ));
        }
    }

    if let Some(entry_point) = root.get("entry_point").and_then(Value::as_str) {
        if EntryPoint::parse(entry_point).is_none() {
            errors.push(ValidationError::semantic(
                "entry_point",
                format!("`{entry_point}` must have the form `module.Type`"),
            ));
        }
    }

    for (index, value) in string_items(root, "dependencies") {
        if !DEPENDENCY_PATTERN.is_match(value) {
            errors.push(ValidationError::semantic(
                format!("dependencies[{index}]"),
                format!("malformed dependency `{value}`"),
            ));
        }
    }

    let min_host = host_version_field(root, "min_host_version", errors);
    let max_host = host_version_field(root, "max_host_version", errors);
    if let (Some(min), Some(max)) = (min_host, max_host) {
        if min > max {
            errors.push(ValidationError::semantic(
                "max_host_version",
                format!("host range is empty: {min} > {max}"),
            ));
        }
    }

    if let Some(items) = root.get("menu_items").and_then(Value::as_array) {
        let mut seen = BTreeSet::new();
        for (index, item) in items.iter().enumerate() {
            let Some(object) = item.as_object() else {
                continue;
            };
            if let Some(id) = object.get("id").and_then(Value::as_str) {
                if !MENU_ID_PATTERN.is_match(id) {
                    errors.push(ValidationError::semantic(
                        format!("menu_items[{index}].id"),
                        format!("`{id}` may only contain letters, digits, `_` and `-`"),
                    ));
                }
                if !seen.insert(id) {
                    errors.push(ValidationError::semantic(
                        format!("menu_items[{index}].id"),
                        format!("duplicate menu item id `{id}`"),
                    ));
                }
            }
            if let Some(action) = object.get("action").and_then(Value::as_str) {
                if !is_identifier(action) {
                    errors.push(ValidationError::semantic(
                        format!("menu_items[{index}].action"),
                        format!("`{action}` is not a valid action name"),
                    ));
                }
            }
        }
    }
}

fn check_integrity(
    root: &Map<String, Value>,
    listing: &PackageListing,
    errors: &mut Vec<ValidationError>,
) {
    if let Some(expected) = root
        .get("security")
        .and_then(|block| block.get("checksum"))
        .and_then(Value::as_str)
    {
        let actual = listing.checksum();
        if !expected.trim().eq_ignore_ascii_case(&actual) {
            errors.push(ValidationError::integrity(
                "security.checksum",
                format!("checksum mismatch: expected {expected}, computed {actual}"),
            ));
        }
    }

    for entry in listing.entries() {
        let prohibited_name = PROHIBITED_NAMES.contains(&entry.name.as_str());
        let prohibited_extension = !entry.is_dir
            && entry
                .name
                .rsplit_once('.')
                .map(|(_, extension)| {
                    PROHIBITED_EXTENSIONS.contains(&extension.to_ascii_lowercase().as_str())
                })
                .unwrap_or(false);
        if prohibited_name || prohibited_extension {
            errors.push(ValidationError::integrity(
                "$package",
                format!("prohibited artifact in package: {}", entry.name),
            ));
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum JsonKind {
    String,
    Bool,
}

fn expect_optional(
    object: &Map<String, Value>,
    key: &str,
    field: &str,
    kind: JsonKind,
    errors: &mut Vec<ValidationError>,
) {
    let matches = match (object.get(key), kind) {
        (None | Some(Value::Null), _) => true,
        (Some(Value::String(_)), JsonKind::String) => true,
        (Some(Value::Bool(_)), JsonKind::Bool) => true,
        _ => false,
    };
    if !matches {
        let expected = match kind {
            JsonKind::String => "expected a string",
            JsonKind::Bool => "expected a boolean",
        };
        errors.push(ValidationError::schema(field, expected));
    }
}

fn array_field<'a>(
    root: &'a Map<String, Value>,
    field: &str,
    errors: &mut Vec<ValidationError>,
) -> Option<&'a Vec<Value>> {
    match root.get(field) {
        None | Some(Value::Null) => None,
        Some(Value::Array(items)) => Some(items),
        Some(_) => {
            errors.push(ValidationError::schema(field, "expected a list"));
            None
        }
    }
}

fn string_items<'a>(
    root: &'a Map<String, Value>,
    field: &str,
) -> impl Iterator<Item = (usize, &'a str)> {
    root.get(field)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .enumerate()
        .filter_map(|(index, item)| item.as_str().map(|value| (index, value)))
}

fn host_version_field(
    root: &Map<String, Value>,
    field: &str,
    errors: &mut Vec<ValidationError>,
) -> Option<semver::Version> {
    let value = root.get(field).and_then(Value::as_str)?;
    match semver::Version::parse(value) {
        Ok(version) => Some(version),
        Err(err) => {
            errors.push(ValidationError::semantic(
                field,
                format!("`{value}` is not a semantic version: {err}"),
            ));
            None
        }
    }
}

fn parse_file_access(value: &str) -> Option<FileAccess> {
    FileAccess::ALL
        .iter()
        .copied()
        .find(|mode| mode.as_str() == value)
}

fn dependency_name(value: &str) -> &str {
    let end = value
        .find(|c: char| matches!(c, '<' | '>' | '=' | '~' | '!'))
        .unwrap_or(value.len());
    value[..end].trim()
}
