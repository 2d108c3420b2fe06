//! Extension runtime for a desktop host.
//! Discovers extension packages, validates their manifests, loads them from a
//! compile-time catalog and dispatches their actions behind permission gates.

pub mod config;
pub mod extension;
pub mod logging;
pub mod menu;

pub use config::{ConfigError, RuntimeConfig};
pub use extension::builtin::builtin_catalog;
pub use extension::dispatch::ActionTicket;
pub use extension::error::{
    ActionError, DispatchError, ExtensionError, InitError, LifecycleError, LoadError,
    ValidationError, ValidationErrorKind,
};
pub use extension::loader::{DynamicLoader, ExtensionCatalog};
pub use extension::manifest::{
    AddonType, ExtensionManifest, FileAccess, LicenseTier, MenuAction, SecurityPolicy,
};
pub use extension::package::PackageListing;
pub use extension::permission::Permission;
pub use extension::protocol::{
    ActionParams, ActionRequest, CancellationToken, ConfigReader, Extension, ExtensionContext,
    ExtensionLogger, MenuRegistrar,
};
pub use extension::repository::{ExtensionRepository, ScanReport};
pub use extension::runtime::{
    ExtensionInfo, ExtensionRuntime, InstanceId, LifecycleState, LoadOutcome, LoadReport,
};
pub use extension::validator::{ManifestValidator, ValidationReport};
pub use logging::{default_log_level, init_from_config, init_logging, logging_status};
pub use menu::bridge::{HostMenuEntry, MenuBridge, MenuCommand, MenuDescriptor, MenuInvokeError};

/// Returns the runtime crate version.
pub fn runtime_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
