//! Fixed permission vocabulary for extension security gates.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Capability an extension must declare before the host grants access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    FileRead,
    FileWrite,
    ApiAccess,
    NetworkAccess,
    SystemInfo,
    UiModify,
    MenuAdd,
    DataExport,
    DataImport,
    EmailSend,
    NotificationSend,
}

impl Permission {
    /// Every permission in declaration order.
    pub const ALL: [Permission; 11] = [
        Self::FileRead,
        Self::FileWrite,
        Self::ApiAccess,
        Self::NetworkAccess,
        Self::SystemInfo,
        Self::UiModify,
        Self::MenuAdd,
        Self::DataExport,
        Self::DataImport,
        Self::EmailSend,
        Self::NotificationSend,
    ];

    /// Stable string id used in manifest declarations.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FileRead => "file_read",
            Self::FileWrite => "file_write",
            Self::ApiAccess => "api_access",
            Self::NetworkAccess => "network_access",
            Self::SystemInfo => "system_info",
            Self::UiModify => "ui_modify",
            Self::MenuAdd => "menu_add",
            Self::DataExport => "data_export",
            Self::DataImport => "data_import",
            Self::EmailSend => "email_send",
            Self::NotificationSend => "notification_send",
        }
    }

    /// User-facing short description.
    pub fn description(self) -> &'static str {
        match self {
            Self::FileRead => "Read files from the local file system.",
            Self::FileWrite => "Create or modify files on the local file system.",
            Self::ApiAccess => "Call the host's accounting API client.",
            Self::NetworkAccess => "Open outbound network connections.",
            Self::SystemInfo => "Inspect operating system and machine information.",
            Self::UiModify => "Change host UI elements beyond the extension's own menu.",
            Self::MenuAdd => "Add entries to the host menu.",
            Self::DataExport => "Export host data to external formats.",
            Self::DataImport => "Import external data into the host.",
            Self::EmailSend => "Send email on behalf of the user.",
            Self::NotificationSend => "Post desktop notifications.",
        }
    }

    /// Permissions surfaced as advisory warnings during validation.
    pub fn is_sensitive(self) -> bool {
        matches!(
            self,
            Self::FileWrite | Self::SystemInfo | Self::NetworkAccess
        )
    }
}

impl Display for Permission {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returns supported permission declaration strings.
pub fn supported_permission_strings() -> Vec<&'static str> {
    Permission::ALL.iter().map(|value| value.as_str()).collect()
}

/// Parses one permission from a manifest string value.
///
/// Matching is exact: surrounding whitespace or a different case is rejected,
/// the same way manifest deserialization rejects it.
pub fn parse_permission(value: &str) -> Result<Permission, PermissionError> {
    if value.is_empty() {
        return Err(PermissionError::EmptyPermission);
    }

    Permission::ALL
        .iter()
        .copied()
        .find(|permission| permission.as_str() == value)
        .ok_or_else(|| PermissionError::UnsupportedPermission(value.to_string()))
}

/// Returns the permissions of `required` that `granted` does not contain.
pub fn missing_permissions(
    granted: &BTreeSet<Permission>,
    required: &BTreeSet<Permission>,
) -> Vec<Permission> {
    required.difference(granted).copied().collect()
}

/// Permission parse errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionError {
    EmptyPermission,
    UnsupportedPermission(String),
}

impl Display for PermissionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyPermission => write!(f, "permission value must not be empty"),
            Self::UnsupportedPermission(value) => write!(
                f,
                "permission `{value}` is not in the supported vocabulary ({})",
                supported_permission_strings().join(", ")
            ),
        }
    }
}

impl Error for PermissionError {}

#[cfg(test)]
mod tests {
    use super::{
        missing_permissions, parse_permission, supported_permission_strings, Permission,
        PermissionError,
    };
    use std::collections::BTreeSet;

    #[test]
    fn parses_every_vocabulary_entry() {
        for permission in Permission::ALL {
            assert_eq!(
                parse_permission(permission.as_str()).expect("vocabulary parse"),
                permission
            );
        }
        assert_eq!(supported_permission_strings().len(), 11);
    }

    #[test]
    fn rejects_empty_permission() {
        let err = parse_permission("").expect_err("empty permission must fail");
        assert_eq!(err, PermissionError::EmptyPermission);
    }

    #[test]
    fn rejects_padded_values() {
        let err = parse_permission(" file_read ").expect_err("padding must fail");
        assert_eq!(
            err,
            PermissionError::UnsupportedPermission(" file_read ".to_string())
        );
        assert!(err.to_string().contains("notification_send"));
    }

    #[test]
    fn rejects_case_variants_and_unknown_values() {
        let err = parse_permission("FILE_READ").expect_err("uppercase must fail");
        assert_eq!(
            err,
            PermissionError::UnsupportedPermission("FILE_READ".to_string())
        );
        let err = parse_permission("kernel_module").expect_err("unknown must fail");
        assert!(matches!(err, PermissionError::UnsupportedPermission(_)));
    }

    #[test]
    fn serde_uses_manifest_strings() {
        let value = serde_json::to_value(Permission::NotificationSend).expect("serialize");
        assert_eq!(value, serde_json::json!("notification_send"));
    }

    #[test]
    fn computes_missing_permissions() {
        let granted = BTreeSet::from([Permission::FileRead]);
        let required = BTreeSet::from([Permission::FileRead, Permission::EmailSend]);
        assert_eq!(
            missing_permissions(&granted, &required),
            vec![Permission::EmailSend]
        );
        assert!(missing_permissions(&required, &granted).is_empty());
    }

    #[test]
    fn flags_sensitive_permissions() {
        assert!(Permission::FileWrite.is_sensitive());
        assert!(!Permission::MenuAdd.is_sensitive());
    }
}
