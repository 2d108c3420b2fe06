//! Host/extension protocol.
//!
//! # Responsibility
//! - Define the `Extension` trait every catalog entry implements.
//! - Define the narrow `ExtensionContext` handed to `initialize`.
//!
//! # Invariants
//! - The context exposes a logger, an action registrar and a read-only
//!   config view. Nothing else from the host is reachable.
//! - Commands registered through the registrar form the only dispatch
//!   surface of an extension.

use crate::config::ConfigError;
use crate::extension::manifest::is_identifier;
use crate::extension::permission::Permission;
use log::Level;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::fs;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Action parameters as passed from the menu or an API caller.
pub type ActionParams = BTreeMap<String, Value>;

/// Behavior every extension provides to the runtime.
///
/// Calls are serialized per instance; implementations need `Send` but not
/// `Sync`.
pub trait Extension: Send {
    fn name(&self) -> &str;

    fn version(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// Registers commands through `context.registrar()`. Returning `false`
    /// fails the instance.
    fn initialize(&mut self, context: &mut ExtensionContext) -> bool;

    /// Runs one registered action. Returning `false` reports a rejection.
    fn execute_action(&mut self, action: &str, request: &ActionRequest) -> bool;

    /// Releases resources before the handle is dropped.
    fn shutdown(&mut self) {}
}

/// Logger scoped to one extension (`target = extension::<name>`).
#[derive(Debug, Clone)]
pub struct ExtensionLogger {
    target: String,
}

impl ExtensionLogger {
    pub fn new(extension_name: &str) -> Self {
        Self {
            target: format!("extension::{extension_name}"),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn log(&self, level: Level, message: &str) {
        log::log!(target: self.target.as_str(), level, "{}", message);
    }

    pub fn debug(&self, message: &str) {
        self.log(Level::Debug, message);
    }

    pub fn info(&self, message: &str) {
        self.log(Level::Info, message);
    }

    pub fn warn(&self, message: &str) {
        self.log(Level::Warn, message);
    }

    pub fn error(&self, message: &str) {
        self.log(Level::Error, message);
    }
}

/// Read-only view of `<root>/config/<name>.json`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigReader {
    values: Map<String, Value>,
}

impl ConfigReader {
    pub fn from_map(values: Map<String, Value>) -> Self {
        Self { values }
    }

    /// Reads a config file. A missing file yields an empty reader.
    ///
    /// # Errors
    /// - `ConfigError::Read` on I/O failures other than "not found".
    /// - `ConfigError::Parse` when the file is not JSON.
    /// - `ConfigError::Invalid` when the top-level value is not an object.
    pub fn read(path: &Path) -> Result<Self, ConfigError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    message: err.to_string(),
                })
            }
        };
        match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(values)) => Ok(Self { values }),
            Ok(_) => Err(ConfigError::Invalid {
                field: path.display().to_string(),
                message: "extension config must be a JSON object".to_string(),
            }),
            Err(err) => Err(ConfigError::Parse {
                path: path.to_path_buf(),
                message: err.to_string(),
            }),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Value::as_bool)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Value::as_i64)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

/// Registered actions and the permissions each one requires.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandTable {
    commands: BTreeMap<String, BTreeSet<Permission>>,
}

impl CommandTable {
    pub fn required_permissions(&self, action: &str) -> Option<&BTreeSet<Permission>> {
        self.commands.get(action)
    }

    pub fn contains(&self, action: &str) -> bool {
        self.commands.contains_key(action)
    }

    pub fn actions(&self) -> impl Iterator<Item = &str> {
        self.commands.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Command registration errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    InvalidActionName(String),
    DuplicateAction(String),
}

impl Display for RegistrationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidActionName(name) => write!(f, "action name is not an identifier: {name}"),
            Self::DuplicateAction(name) => write!(f, "action registered twice: {name}"),
        }
    }
}

impl Error for RegistrationError {}

/// Collects the command table while `initialize` runs.
#[derive(Debug, Default)]
pub struct MenuRegistrar {
    table: CommandTable,
}

impl MenuRegistrar {
    /// Registers `action` with the permissions it needs at dispatch time.
    pub fn register_action(
        &mut self,
        action: &str,
        required: &[Permission],
    ) -> Result<(), RegistrationError> {
        if !is_identifier(action) {
            return Err(RegistrationError::InvalidActionName(action.to_string()));
        }
        if self.table.contains(action) {
            return Err(RegistrationError::DuplicateAction(action.to_string()));
        }
        self.table
            .commands
            .insert(action.to_string(), required.iter().copied().collect());
        Ok(())
    }

    pub fn registered(&self) -> &CommandTable {
        &self.table
    }
}

/// Capabilities handed to `Extension::initialize`.
#[derive(Debug)]
pub struct ExtensionContext {
    logger: ExtensionLogger,
    registrar: MenuRegistrar,
    config: ConfigReader,
}

impl ExtensionContext {
    pub fn new(extension_name: &str, config: ConfigReader) -> Self {
        Self {
            logger: ExtensionLogger::new(extension_name),
            registrar: MenuRegistrar::default(),
            config,
        }
    }

    pub fn logger(&self) -> &ExtensionLogger {
        &self.logger
    }

    pub fn registrar(&mut self) -> &mut MenuRegistrar {
        &mut self.registrar
    }

    pub fn config(&self) -> &ConfigReader {
        &self.config
    }

    pub fn into_command_table(self) -> CommandTable {
        self.registrar.table
    }
}

/// Cooperative cancellation flag shared between a ticket and its job.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Input of one action call.
#[derive(Debug, Clone, Default)]
pub struct ActionRequest {
    params: ActionParams,
    cancellation: CancellationToken,
}

impl ActionRequest {
    pub fn new(params: ActionParams) -> Self {
        Self {
            params,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(params: ActionParams, cancellation: CancellationToken) -> Self {
        Self {
            params,
            cancellation,
        }
    }

    pub fn params(&self) -> &ActionParams {
        &self.params
    }

    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    /// Long-running actions should poll this and return early.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }
}
