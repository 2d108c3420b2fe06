//! Menu bridge between the host menu and active extensions.
//!
//! # Responsibility
//! - Merge host-native entries with the menu items of active extensions.
//! - Route a projected extension entry back to `ExtensionRuntime`.
//!
//! # Invariants
//! - Extension entries use ids of the form `addon.<extension>.<menu id>`.
//! - Host ids never start with `addon.` and are unique, so projected ids
//!   never collide.
//! - Projection reads runtime state only; it never calls extension code.

use crate::extension::dispatch::ActionTicket;
use crate::extension::error::DispatchError;
use crate::extension::protocol::ActionParams;
use crate::extension::runtime::ExtensionRuntime;
use log::debug;
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Prefix reserved for extension menu ids.
pub const EXTENSION_ID_PREFIX: &str = "addon.";

/// Menu entry owned by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostMenuEntry {
    pub id: String,
    pub label: String,
    pub icon: Option<String>,
    pub category: String,
    /// Host action id run when the entry is selected.
    pub action: String,
}

/// What selecting a menu entry runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MenuCommand {
    Host { action: String },
    Extension { extension: String, action: String },
}

/// One entry of the combined host menu.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuDescriptor {
    pub id: String,
    pub label: String,
    pub icon: Option<String>,
    /// Host category, or the extension's display name.
    pub category: String,
    /// Prompt to show before running, for items requiring confirmation.
    pub confirmation: Option<String>,
    pub description: Option<String>,
    pub command: MenuCommand,
}

impl MenuDescriptor {
    pub fn is_extension_entry(&self) -> bool {
        matches!(self.command, MenuCommand::Extension { .. })
    }
}

/// Counts over one projection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MenuStats {
    pub host_entries: usize,
    pub extension_categories: usize,
    pub extension_entries: usize,
}

/// Host menu registration errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MenuBridgeError {
    EmptyHostId,
    ReservedHostId(String),
    DuplicateHostId(String),
}

impl Display for MenuBridgeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyHostId => write!(f, "host menu id must not be empty"),
            Self::ReservedHostId(id) => write!(
                f,
                "host menu id uses the reserved `{EXTENSION_ID_PREFIX}` prefix: {id}"
            ),
            Self::DuplicateHostId(id) => write!(f, "host menu id registered twice: {id}"),
        }
    }
}

impl Error for MenuBridgeError {}

/// Failure to run a projected entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MenuInvokeError {
    UnknownMenuId(String),
    /// The id belongs to a host entry; the host runs its own actions.
    HostEntry { id: String, action: String },
    Dispatch(DispatchError),
}

impl MenuInvokeError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownMenuId(_) => "unknown_menu_id",
            Self::HostEntry { .. } => "host_menu_entry",
            Self::Dispatch(err) => err.code(),
        }
    }
}

impl Display for MenuInvokeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownMenuId(id) => write!(f, "menu id not found: {id}"),
            Self::HostEntry { id, action } => {
                write!(f, "menu id `{id}` is a host entry for action `{action}`")
            }
            Self::Dispatch(err) => write!(f, "{err}"),
        }
    }
}

impl Error for MenuInvokeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Dispatch(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DispatchError> for MenuInvokeError {
    fn from(value: DispatchError) -> Self {
        Self::Dispatch(value)
    }
}

/// Builds `addon.<extension>.<menu id>`.
pub fn extension_menu_id(extension: &str, menu_id: &str) -> String {
    format!("{EXTENSION_ID_PREFIX}{extension}.{menu_id}")
}

/// Splits an extension menu id into `(extension, menu id)`.
pub fn parse_extension_menu_id(id: &str) -> Option<(&str, &str)> {
    let rest = id.strip_prefix(EXTENSION_ID_PREFIX)?;
    let (extension, menu_id) = rest.split_once('.')?;
    if extension.is_empty() || menu_id.is_empty() || menu_id.contains('.') {
        return None;
    }
    Some((extension, menu_id))
}

/// Combines host entries with active extension menus.
#[derive(Debug, Clone, Default)]
pub struct MenuBridge {
    host_entries: Vec<HostMenuEntry>,
}

impl MenuBridge {
    /// Registers the host-native entries, in display order.
    pub fn new(host_entries: Vec<HostMenuEntry>) -> Result<Self, MenuBridgeError> {
        let mut seen = BTreeSet::new();
        for entry in &host_entries {
            if entry.id.trim().is_empty() {
                return Err(MenuBridgeError::EmptyHostId);
            }
            if entry.id.starts_with(EXTENSION_ID_PREFIX) {
                return Err(MenuBridgeError::ReservedHostId(entry.id.clone()));
            }
            if !seen.insert(entry.id.as_str()) {
                return Err(MenuBridgeError::DuplicateHostId(entry.id.clone()));
            }
        }
        Ok(Self { host_entries })
    }

    pub fn host_entries(&self) -> &[HostMenuEntry] {
        &self.host_entries
    }

    /// Host entries followed by every active extension's items, ordered by
    /// extension name and then manifest order.
    pub fn project(&self, runtime: &ExtensionRuntime) -> Vec<MenuDescriptor> {
        let mut descriptors: Vec<MenuDescriptor> = self
            .host_entries
            .iter()
            .map(|entry| MenuDescriptor {
                id: entry.id.clone(),
                label: entry.label.clone(),
                icon: entry.icon.clone(),
                category: entry.category.clone(),
                confirmation: None,
                description: None,
                command: MenuCommand::Host {
                    action: entry.action.clone(),
                },
            })
            .collect();

        for name in runtime.active_extensions() {
            let Some(manifest) = runtime.manifest(&name) else {
                continue;
            };
            for item in &manifest.menu_items {
                descriptors.push(MenuDescriptor {
                    id: extension_menu_id(&name, &item.id),
                    label: item.label.clone(),
                    icon: item.icon.clone(),
                    category: manifest.display_name.clone(),
                    confirmation: item.requires_confirmation.then(|| {
                        format!(
                            "Run '{}' from extension {}?",
                            item.label, manifest.display_name
                        )
                    }),
                    description: item.description.clone(),
                    command: MenuCommand::Extension {
                        extension: name.clone(),
                        action: item.action.clone(),
                    },
                });
            }
        }

        debug!(
            "event=menu_project module=menu status=ok host_entries={} total_entries={}",
            self.host_entries.len(),
            descriptors.len()
        );
        descriptors
    }

    pub fn stats(&self, runtime: &ExtensionRuntime) -> MenuStats {
        let descriptors = self.project(runtime);
        let categories: BTreeSet<&str> = descriptors
            .iter()
            .filter_map(|descriptor| match &descriptor.command {
                MenuCommand::Extension { extension, .. } => Some(extension.as_str()),
                MenuCommand::Host { .. } => None,
            })
            .collect();
        MenuStats {
            host_entries: self.host_entries.len(),
            extension_categories: categories.len(),
            extension_entries: descriptors.len() - self.host_entries.len(),
        }
    }

    /// Resolves a projected id to its command without running it.
    pub fn resolve(&self, runtime: &ExtensionRuntime, id: &str) -> Option<MenuCommand> {
        if let Some(entry) = self.host_entries.iter().find(|entry| entry.id == id) {
            return Some(MenuCommand::Host {
                action: entry.action.clone(),
            });
        }
        let (extension, menu_id) = parse_extension_menu_id(id)?;
        let manifest = runtime.manifest(extension)?;
        manifest
            .menu_items
            .iter()
            .find(|item| item.id == menu_id)
            .map(|item| MenuCommand::Extension {
                extension: extension.to_string(),
                action: item.action.clone(),
            })
    }

    /// Runs the extension action behind `id` synchronously.
    pub fn invoke(
        &self,
        runtime: &ExtensionRuntime,
        id: &str,
        params: ActionParams,
    ) -> Result<(), MenuInvokeError> {
        let (extension, action) = self.extension_command(runtime, id)?;
        runtime
            .execute_action(&extension, &action, params)
            .map_err(MenuInvokeError::from)
    }

    /// Queues the extension action behind `id` on the runtime's worker pool.
    pub fn dispatch(
        &self,
        runtime: &ExtensionRuntime,
        id: &str,
        params: ActionParams,
    ) -> Result<ActionTicket, MenuInvokeError> {
        let (extension, action) = self.extension_command(runtime, id)?;
        Ok(runtime.dispatch_action(&extension, &action, params))
    }

    fn extension_command(
        &self,
        runtime: &ExtensionRuntime,
        id: &str,
    ) -> Result<(String, String), MenuInvokeError> {
        match self.resolve(runtime, id) {
            Some(MenuCommand::Extension { extension, action }) => Ok((extension, action)),
            Some(MenuCommand::Host { action }) => Err(MenuInvokeError::HostEntry {
                id: id.to_string(),
                action,
            }),
            None => Err(MenuInvokeError::UnknownMenuId(id.to_string())),
        }
    }
}
