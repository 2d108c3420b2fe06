//! Error taxonomy for the extension runtime.
//!
//! # Invariants
//! - Validation, load and init errors move an instance to `Failed`.
//! - Action errors never change the lifecycle state.
//! - `PermissionDenied` is reported apart from action errors: the extension
//!   code was never entered.
//! - Every error exposes a stable `code()` used in log lines.

use crate::extension::manifest::LicenseTier;
use crate::extension::permission::Permission;
use crate::extension::runtime::LifecycleState;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Group a validation error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ValidationErrorKind {
    Schema,
    Semantic,
    Security,
    Integrity,
}

impl ValidationErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Schema => "schema",
            Self::Semantic => "semantic",
            Self::Security => "security",
            Self::Integrity => "integrity",
        }
    }
}

/// One manifest violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub kind: ValidationErrorKind,
    /// Dotted path of the offending field, e.g. `security.checksum`.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(kind: ValidationErrorKind, field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn schema(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ValidationErrorKind::Schema, field, message)
    }

    pub fn semantic(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ValidationErrorKind::Semantic, field, message)
    }

    pub fn security(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ValidationErrorKind::Security, field, message)
    }

    pub fn integrity(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ValidationErrorKind::Integrity, field, message)
    }
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} error at `{}`: {}", self.kind.as_str(), self.field, self.message)
    }
}

impl Error for ValidationError {}

/// Entry point resolution or instantiation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    LicenseRequired {
        required: LicenseTier,
        available: LicenseTier,
    },
    IncompatibleHost {
        host_version: String,
        reason: String,
    },
    UnknownEntryPoint(String),
    ProtocolMismatch(String),
    Faulted(String),
}

impl LoadError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::LicenseRequired { .. } => "license_required",
            Self::IncompatibleHost { .. } => "incompatible_host",
            Self::UnknownEntryPoint(_) => "unknown_entry_point",
            Self::ProtocolMismatch(_) => "protocol_mismatch",
            Self::Faulted(_) => "load_faulted",
        }
    }
}

impl Display for LoadError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LicenseRequired {
                required,
                available,
            } => write!(
                f,
                "extension requires license `{}` but host runs `{}`",
                required.as_str(),
                available.as_str()
            ),
            Self::IncompatibleHost {
                host_version,
                reason,
            } => write!(f, "extension incompatible with host {host_version}: {reason}"),
            Self::UnknownEntryPoint(value) => {
                write!(f, "entry point is not registered in the catalog: {value}")
            }
            Self::ProtocolMismatch(message) => {
                write!(f, "entry point does not honor the extension protocol: {message}")
            }
            Self::Faulted(message) => write!(f, "extension factory faulted: {message}"),
        }
    }
}

impl Error for LoadError {}

/// Failure of `Extension::initialize`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitError {
    Rejected,
    Faulted(String),
}

impl InitError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Rejected => "init_rejected",
            Self::Faulted(_) => "init_faulted",
        }
    }
}

impl Display for InitError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rejected => write!(f, "extension initializer returned false"),
            Self::Faulted(message) => write!(f, "extension initializer faulted: {message}"),
        }
    }
}

impl Error for InitError {}

/// Failure of one action call. The instance stays `Active`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionError {
    UnknownAction(String),
    Rejected(String),
    Faulted { action: String, message: String },
    TimedOut(String),
    Cancelled(String),
    QueueFull,
    WorkerLost,
}

impl ActionError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownAction(_) => "unknown_action",
            Self::Rejected(_) => "action_rejected",
            Self::Faulted { .. } => "action_faulted",
            Self::TimedOut(_) => "action_timed_out",
            Self::Cancelled(_) => "action_cancelled",
            Self::QueueFull => "action_queue_full",
            Self::WorkerLost => "action_worker_lost",
        }
    }
}

impl Display for ActionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownAction(action) => write!(f, "action is not registered: {action}"),
            Self::Rejected(action) => write!(f, "action returned false: {action}"),
            Self::Faulted { action, message } => write!(f, "action `{action}` faulted: {message}"),
            Self::TimedOut(action) => write!(f, "action timed out: {action}"),
            Self::Cancelled(action) => write!(f, "action cancelled: {action}"),
            Self::QueueFull => write!(f, "action queue is full"),
            Self::WorkerLost => write!(f, "action worker stopped before reporting a result"),
        }
    }
}

impl Error for ActionError {}

/// Outcome of a failed action dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    UnknownExtension(String),
    NotActive {
        extension: String,
        state: LifecycleState,
    },
    PermissionDenied {
        extension: String,
        action: String,
        missing: Vec<Permission>,
    },
    Action(ActionError),
}

impl DispatchError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownExtension(_) => "unknown_extension",
            Self::NotActive { .. } => "extension_not_active",
            Self::PermissionDenied { .. } => "permission_denied",
            Self::Action(err) => err.code(),
        }
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Self::PermissionDenied { .. })
    }
}

impl Display for DispatchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownExtension(name) => write!(f, "extension not found: {name}"),
            Self::NotActive { extension, state } => {
                write!(f, "extension `{extension}` is not active (state={})", state.as_str())
            }
            Self::PermissionDenied {
                extension,
                action,
                missing,
            } => {
                let names: Vec<&str> = missing.iter().map(|p| p.as_str()).collect();
                write!(
                    f,
                    "permission denied for `{extension}.{action}`: missing {}",
                    names.join(", ")
                )
            }
            Self::Action(err) => write!(f, "{err}"),
        }
    }
}

impl Error for DispatchError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Action(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ActionError> for DispatchError {
    fn from(value: ActionError) -> Self {
        Self::Action(value)
    }
}

/// Requested lifecycle transition is not allowed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    UnknownExtension(String),
    InvalidTransition {
        extension: String,
        from: LifecycleState,
        to: LifecycleState,
    },
}

impl Display for LifecycleError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownExtension(name) => write!(f, "extension not found: {name}"),
            Self::InvalidTransition {
                extension,
                from,
                to,
            } => write!(
                f,
                "extension `{extension}` cannot move from {} to {}",
                from.as_str(),
                to.as_str()
            ),
        }
    }
}

impl Error for LifecycleError {}

/// Last error recorded on an extension instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtensionError {
    Validation(Vec<ValidationError>),
    Load(LoadError),
    Init(InitError),
    Action(ActionError),
    Shutdown(String),
}

impl ExtensionError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_failed",
            Self::Load(err) => err.code(),
            Self::Init(err) => err.code(),
            Self::Action(err) => err.code(),
            Self::Shutdown(_) => "shutdown_faulted",
        }
    }
}

impl Display for ExtensionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(errors) => {
                write!(f, "manifest validation failed with {} error(s)", errors.len())?;
                if let Some(first) = errors.first() {
                    write!(f, "; first: {first}")?;
                }
                Ok(())
            }
            Self::Load(err) => write!(f, "{err}"),
            Self::Init(err) => write!(f, "{err}"),
            Self::Action(err) => write!(f, "{err}"),
            Self::Shutdown(message) => write!(f, "extension shutdown faulted: {message}"),
        }
    }
}

impl Error for ExtensionError {}

#[cfg(test)]
mod tests {
    use super::{ActionError, DispatchError, ExtensionError, ValidationError};
    use crate::extension::permission::Permission;

    #[test]
    fn permission_denied_is_distinct_from_action_errors() {
        let denied = DispatchError::PermissionDenied {
            extension: "echo".to_string(),
            action: "read_file".to_string(),
            missing: vec![Permission::FileRead],
        };
        assert!(denied.is_permission_denied());
        assert_eq!(denied.code(), "permission_denied");
        assert!(denied.to_string().contains("file_read"));

        let rejected = DispatchError::from(ActionError::Rejected("ping".to_string()));
        assert!(!rejected.is_permission_denied());
        assert_eq!(rejected.code(), "action_rejected");
    }

    #[test]
    fn validation_summary_mentions_first_error() {
        let err = ExtensionError::Validation(vec![
            ValidationError::schema("name", "required field is missing"),
            ValidationError::semantic("version", "bad"),
        ]);
        let text = err.to_string();
        assert!(text.contains("2 error(s)"));
        assert!(text.contains("`name`"));
    }
}
