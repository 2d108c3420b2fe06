//! Extension lifecycle, permission registry and action dispatch.
//!
//! # Responsibility
//! - Drive every discovered package through validate, load and initialize.
//! - Own every `ExtensionInstance` and the per-instance command tables.
//! - Gate every action call on lifecycle state and declared permissions.
//!
//! # Invariants
//! - The name and instance maps change only inside `load_pass`.
//! - Lifecycle transitions are monotonic; `Failed` and `Unloaded` are terminal.
//! - Extension code is never entered for unknown, inactive or unpermitted
//!   calls.
//! - A panic in extension code never escapes the runtime and never affects
//!   sibling instances.

use crate::config::RuntimeConfig;
use crate::extension::boundary::contain;
use crate::extension::dispatch::{ActionPool, ActionTicket};
use crate::extension::error::{
    ActionError, DispatchError, ExtensionError, InitError, LifecycleError,
};
use crate::extension::loader::{DynamicLoader, ExtensionCatalog};
use crate::extension::manifest::{AddonType, ExtensionManifest};
use crate::extension::permission::{missing_permissions, Permission};
use crate::extension::protocol::{
    ActionParams, ActionRequest, CancellationToken, CommandTable, ConfigReader, Extension,
    ExtensionContext,
};
use crate::extension::repository::{DiscoveredPackage, ExtensionRepository, SkippedPackage};
use crate::extension::validator::ManifestValidator;
use log::{debug, error, info, warn};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use uuid::Uuid;

/// Stable identity of one extension instance.
pub type InstanceId = Uuid;

/// Lifecycle state of an extension instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LifecycleState {
    Discovered,
    Validated,
    Loaded,
    Active,
    Failed,
    Unloaded,
}

impl LifecycleState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Discovered => "discovered",
            Self::Validated => "validated",
            Self::Loaded => "loaded",
            Self::Active => "active",
            Self::Failed => "failed",
            Self::Unloaded => "unloaded",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Unloaded)
    }

    /// Returns whether `self -> next` is an edge of the lifecycle graph.
    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        matches!(
            (self, next),
            (Self::Discovered, Self::Validated | Self::Failed)
                | (Self::Validated, Self::Loaded | Self::Failed)
                | (Self::Loaded, Self::Active | Self::Failed)
                | (Self::Active, Self::Active | Self::Unloaded)
        )
    }
}

/// Lifecycle metadata of one instance. Held only for short reads and updates.
#[derive(Debug)]
pub(crate) struct InstanceRecord {
    id: InstanceId,
    name: String,
    path: PathBuf,
    config_path: PathBuf,
    manifest: Option<Arc<ExtensionManifest>>,
    state: LifecycleState,
    commands: CommandTable,
    last_error: Option<ExtensionError>,
}

impl InstanceRecord {
    fn discovered(name: &str, path: &Path, config_path: PathBuf) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            path: path.to_path_buf(),
            config_path,
            manifest: None,
            state: LifecycleState::Discovered,
            commands: CommandTable::default(),
            last_error: None,
        }
    }

    fn transition(&mut self, next: LifecycleState) -> Result<(), LifecycleError> {
        if !self.state.can_transition_to(next) {
            return Err(LifecycleError::InvalidTransition {
                extension: self.name.clone(),
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    fn fail(&mut self, err: ExtensionError) {
        if self.state.can_transition_to(LifecycleState::Failed) {
            self.state = LifecycleState::Failed;
        }
        self.last_error = Some(err);
        self.commands = CommandTable::default();
    }
}

type ExtensionHandle = Option<Box<dyn Extension>>;

/// Runtime-owned slot of one discovered package.
///
/// Lock order is `handle` then `record`. The record lock is never held while
/// waiting for `handle` or while extension code runs.
pub(crate) struct ExtensionInstance {
    record: Mutex<InstanceRecord>,
    handle: Mutex<ExtensionHandle>,
}

impl std::fmt::Debug for ExtensionInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionInstance")
            .field("record", &*lock(&self.record))
            .finish_non_exhaustive()
    }
}

impl ExtensionInstance {
    fn new(record: InstanceRecord, handle: ExtensionHandle) -> Self {
        Self {
            record: Mutex::new(record),
            handle: Mutex::new(handle),
        }
    }

    fn record(&self) -> MutexGuard<'_, InstanceRecord> {
        lock(&self.record)
    }

    fn handle(&self) -> MutexGuard<'_, ExtensionHandle> {
        lock(&self.handle)
    }
}

/// Read-only summary of one extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionInfo {
    pub id: InstanceId,
    pub name: String,
    pub display_name: String,
    pub version: Option<String>,
    pub addon_type: Option<AddonType>,
    pub description: String,
    pub author: Option<String>,
    pub state: LifecycleState,
    pub path: PathBuf,
    /// Declared permissions, in vocabulary order.
    pub permissions: Vec<Permission>,
    /// Registered action names; empty unless active.
    pub actions: Vec<String>,
}

/// Outcome of one package in a load pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadOutcome {
    pub id: InstanceId,
    pub name: String,
    pub state: LifecycleState,
    pub error: Option<ExtensionError>,
    /// Advisory validation warnings.
    pub warnings: Vec<String>,
}

/// Result of `ExtensionRuntime::load_pass`.
#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    pub outcomes: Vec<LoadOutcome>,
    pub skipped: Vec<SkippedPackage>,
    /// Pass-level warnings: skipped packages and an unreadable root.
    pub warnings: Vec<String>,
}

impl LoadReport {
    pub fn outcome(&self, name: &str) -> Option<&LoadOutcome> {
        self.outcomes.iter().find(|outcome| outcome.name == name)
    }

    pub fn active_count(&self) -> usize {
        self.count(LifecycleState::Active)
    }

    pub fn failed_count(&self) -> usize {
        self.count(LifecycleState::Failed)
    }

    fn count(&self, state: LifecycleState) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.state == state)
            .count()
    }
}

/// Owner of every extension instance.
#[derive(Debug)]
pub struct ExtensionRuntime {
    config: RuntimeConfig,
    validator: ManifestValidator,
    names: BTreeMap<String, InstanceId>,
    instances: BTreeMap<InstanceId, Arc<ExtensionInstance>>,
    pool: ActionPool,
}

impl ExtensionRuntime {
    /// `config` is expected to have passed `RuntimeConfig::validate`.
    pub fn new(config: RuntimeConfig) -> Self {
        let pool = ActionPool::new(
            config.action_workers,
            config.action_queue_capacity,
            config.action_timeout(),
        );
        Self {
            config,
            validator: ManifestValidator::default(),
            names: BTreeMap::new(),
            instances: BTreeMap::new(),
            pool,
        }
    }

    pub fn with_validator(mut self, validator: ManifestValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Runs the load pass over `config.extensions_dir`.
    pub fn load_configured(&mut self, catalog: &ExtensionCatalog) -> LoadReport {
        let root = self.config.extensions_dir.clone();
        self.load_pass(&root, catalog)
    }

    /// Scans `root` once and drives every package to `Active` or `Failed`.
    ///
    /// Per-package failures are recorded in the report and never abort the
    /// pass. Names already registered by an earlier pass count as duplicates.
    pub fn load_pass(&mut self, root: &Path, catalog: &ExtensionCatalog) -> LoadReport {
        let started_at = Instant::now();
        info!(
            "event=load_pass module=runtime status=start root={}",
            root.display()
        );

        let mut report = LoadReport::default();
        let repository = ExtensionRepository::new(root);
        let scan = match repository.scan() {
            Ok(scan) => scan,
            Err(err) => {
                error!(
                    "event=load_pass module=runtime status=error error_code=root_unreadable root={} error={}",
                    root.display(),
                    err
                );
                report.warnings.push(format!(
                    "extensions root `{}` could not be read: {err}",
                    root.display()
                ));
                return report;
            }
        };
        report.warnings.extend(scan.warnings());
        report.skipped = scan.skipped;

        let host_version = self
            .config
            .host_semver()
            .unwrap_or_else(|| semver::Version::new(0, 0, 0));
        let loader = DynamicLoader::new(catalog.clone(), host_version, self.config.license_tier);

        for package in scan.discovered {
            if let Some(existing) = self.names.get(&package.name) {
                let warning = format!(
                    "{}: extension name `{}` already registered as instance {}",
                    package.path.display(),
                    package.name,
                    existing
                );
                warn!(
                    "event=load_pass module=runtime status=warn error_code=duplicate_name name={} path={}",
                    package.name,
                    package.path.display()
                );
                report.warnings.push(warning);
                continue;
            }
            let outcome = self.load_package(&repository, &loader, package);
            report.outcomes.push(outcome);
        }

        info!(
            "event=load_pass module=runtime status=ok duration_ms={} active={} failed={} skipped={}",
            started_at.elapsed().as_millis(),
            report.active_count(),
            report.failed_count(),
            report.skipped.len()
        );
        report
    }

    fn load_package(
        &mut self,
        repository: &ExtensionRepository,
        loader: &DynamicLoader,
        package: DiscoveredPackage,
    ) -> LoadOutcome {
        let mut record = InstanceRecord::discovered(
            &package.name,
            &package.path,
            repository.config_path(&package.name),
        );
        let validation = self
            .validator
            .validate(&package.raw_manifest, &package.listing);
        let errors = validation.errors.clone();
        let warnings = validation.warnings.clone();
        for warning in &warnings {
            warn!(
                "event=manifest_validate module=extension status=warn name={} warning={}",
                package.name, warning
            );
        }

        match validation.into_manifest() {
            Some(manifest) => {
                record.manifest = Some(Arc::new(manifest));
                debug!(
                    "event=manifest_validate module=extension status=ok name={}",
                    package.name
                );
                // Discovered -> Validated is always a legal edge.
                let _ = record.transition(LifecycleState::Validated);
            }
            None => {
                warn!(
                    "event=manifest_validate module=extension status=error name={} error_code=validation_failed errors={}",
                    package.name,
                    errors.len()
                );
                record.fail(ExtensionError::Validation(errors));
            }
        }

        let mut handle = None;
        if let Some(manifest) = record.manifest.clone() {
            if record.state == LifecycleState::Validated {
                match loader.load(&manifest, &record.path) {
                    Ok(loaded) => {
                        handle = Some(loaded);
                        let _ = record.transition(LifecycleState::Loaded);
                    }
                    Err(err) => record.fail(ExtensionError::Load(err)),
                }
            }
        }

        let id = record.id;
        let name = record.name.clone();
        let loaded = record.state == LifecycleState::Loaded;
        self.names.insert(name.clone(), id);
        self.instances
            .insert(id, Arc::new(ExtensionInstance::new(record, handle)));

        if loaded {
            self.initialize(&name);
        }

        let (state, error) = self
            .instance(&name)
            .map(|instance| {
                let record = instance.record();
                (record.state, record.last_error.clone())
            })
            .unwrap_or((LifecycleState::Failed, None));
        LoadOutcome {
            id,
            name,
            state,
            error,
            warnings,
        }
    }

    /// Moves a `Loaded` instance to `Active` by running its initializer.
    ///
    /// Returns `false` when the instance is unknown, not `Loaded`, or its
    /// initializer fails; failures move the instance to `Failed`.
    pub fn initialize(&self, name: &str) -> bool {
        let Some(instance) = self.instance(name) else {
            warn!(
                "event=extension_init module=runtime status=error name={} error_code=unknown_extension",
                name
            );
            return false;
        };
        let mut handle = instance.handle();
        let config_path = {
            let record = instance.record();
            if record.state != LifecycleState::Loaded {
                warn!(
                    "event=extension_init module=runtime status=error name={} error_code=invalid_transition state={}",
                    name,
                    record.state.as_str()
                );
                return false;
            }
            record.config_path.clone()
        };

        let started_at = Instant::now();
        let config = match ConfigReader::read(&config_path) {
            Ok(config) => config,
            Err(err) => {
                warn!(
                    "event=extension_config module=runtime status=warn name={} error_code={} error={}",
                    name,
                    err.code(),
                    err
                );
                ConfigReader::default()
            }
        };
        let mut context = ExtensionContext::new(name, config);

        let outcome = match handle.as_mut() {
            Some(extension) => match contain(|| extension.initialize(&mut context)) {
                Ok(true) => Ok(()),
                Ok(false) => Err(InitError::Rejected),
                Err(message) => Err(InitError::Faulted(message)),
            },
            None => Err(InitError::Faulted(
                "loaded instance has no handle".to_string(),
            )),
        };

        match outcome {
            Ok(()) => {
                let mut record = instance.record();
                record.commands = context.into_command_table();
                let _ = record.transition(LifecycleState::Active);
                if let Some(manifest) = record.manifest.clone() {
                    warn_on_unusable_commands(&record.commands, &manifest);
                }
                info!(
                    "event=extension_init module=runtime status=ok name={} duration_ms={} actions={}",
                    name,
                    started_at.elapsed().as_millis(),
                    record.commands.len()
                );
                true
            }
            Err(err) => {
                error!(
                    "event=extension_init module=runtime status=error name={} duration_ms={} error_code={} error={}",
                    name,
                    started_at.elapsed().as_millis(),
                    err.code(),
                    err
                );
                instance.record().fail(ExtensionError::Init(err));
                release_handle(handle.take());
                false
            }
        }
    }

    /// Runs `action` on the calling thread.
    pub fn execute_action(
        &self,
        name: &str,
        action: &str,
        params: ActionParams,
    ) -> Result<(), DispatchError> {
        let Some(instance) = self.instance(name) else {
            return Err(log_dispatch_error(
                name,
                action,
                DispatchError::UnknownExtension(name.to_string()),
            ));
        };
        run_action(&instance, action, &ActionRequest::new(params))
    }

    /// Queues `action` on the worker pool.
    ///
    /// The ticket resolves to the same results as `execute_action`, plus
    /// `TimedOut`, `Cancelled` and `QueueFull`.
    pub fn dispatch_action(&self, name: &str, action: &str, params: ActionParams) -> ActionTicket {
        let label = format!("{name}.{action}");
        let Some(instance) = self.instance(name) else {
            let err = log_dispatch_error(
                name,
                action,
                DispatchError::UnknownExtension(name.to_string()),
            );
            return ActionTicket::resolved(&label, Err(err));
        };
        let token = CancellationToken::new();
        let request = ActionRequest::with_cancellation(params, token.clone());
        let action = action.to_string();
        self.pool
            .submit(&label, token, move || run_action(&instance, &action, &request))
    }

    /// Shuts an `Active` extension down and releases its handle.
    ///
    /// The state is `Unloaded` as soon as this is called; shutdown itself
    /// waits for an in-flight action on the same instance to return.
    pub fn unload(&self, name: &str) -> Result<(), LifecycleError> {
        let instance = self
            .instance(name)
            .ok_or_else(|| LifecycleError::UnknownExtension(name.to_string()))?;
        {
            let mut record = instance.record();
            record.transition(LifecycleState::Unloaded)?;
            record.commands = CommandTable::default();
        }

        let mut handle = instance.handle();
        if let Some(mut extension) = handle.take() {
            if let Err(message) = contain(|| extension.shutdown()) {
                error!(
                    "event=extension_unload module=runtime status=error name={} error_code=shutdown_faulted error={}",
                    name, message
                );
                instance.record().last_error = Some(ExtensionError::Shutdown(message));
            }
            release_handle(Some(extension));
        }
        info!(
            "event=extension_unload module=runtime status=ok name={}",
            name
        );
        Ok(())
    }

    /// Unloads every active extension. Returns how many were unloaded.
    pub fn shutdown_all(&self) -> usize {
        self.active_extensions()
            .iter()
            .filter(|name| self.unload(name).is_ok())
            .count()
    }

    pub fn state(&self, name: &str) -> Option<LifecycleState> {
        self.instance(name).map(|instance| instance.record().state)
    }

    pub fn last_error(&self, name: &str) -> Option<ExtensionError> {
        self.instance(name)
            .and_then(|instance| instance.record().last_error.clone())
    }

    pub fn manifest(&self, name: &str) -> Option<Arc<ExtensionManifest>> {
        self.instance(name)
            .and_then(|instance| instance.record().manifest.clone())
    }

    pub fn instance_id(&self, name: &str) -> Option<InstanceId> {
        self.names.get(name).copied()
    }

    /// Every known extension name, sorted.
    pub fn extension_names(&self) -> Vec<String> {
        self.names.keys().cloned().collect()
    }

    /// Names of `Active` extensions, sorted.
    pub fn active_extensions(&self) -> Vec<String> {
        self.names
            .keys()
            .filter(|name| self.state(name) == Some(LifecycleState::Active))
            .cloned()
            .collect()
    }

    /// Names of loaded or active extensions declaring `addon_type`.
    pub fn by_type(&self, addon_type: AddonType) -> Vec<String> {
        self.names
            .keys()
            .filter(|name| {
                self.instance(name).is_some_and(|instance| {
                    let record = instance.record();
                    matches!(record.state, LifecycleState::Loaded | LifecycleState::Active)
                        && record
                            .manifest
                            .as_ref()
                            .is_some_and(|manifest| manifest.addon_type == addon_type)
                })
            })
            .cloned()
            .collect()
    }

    pub fn info(&self, name: &str) -> Option<ExtensionInfo> {
        let instance = self.instance(name)?;
        let record = instance.record();
        let manifest = record.manifest.as_deref();
        Some(ExtensionInfo {
            id: record.id,
            name: record.name.clone(),
            display_name: manifest
                .map(|manifest| manifest.display_name.clone())
                .unwrap_or_else(|| record.name.clone()),
            version: manifest.map(|manifest| manifest.version.clone()),
            addon_type: manifest.map(|manifest| manifest.addon_type),
            description: manifest
                .map(|manifest| manifest.description.clone())
                .unwrap_or_default(),
            author: manifest.and_then(|manifest| manifest.author.clone()),
            state: record.state,
            path: record.path.clone(),
            permissions: manifest
                .map(|manifest| manifest.permissions.iter().copied().collect())
                .unwrap_or_default(),
            actions: record.commands.actions().map(str::to_string).collect(),
        })
    }

    fn instance(&self, name: &str) -> Option<Arc<ExtensionInstance>> {
        let id = self.names.get(name)?;
        self.instances.get(id).cloned()
    }
}

/// Permission and lifecycle gates, checked under the record lock only.
fn check_gates(record: &InstanceRecord, action: &str) -> Result<(), DispatchError> {
    if record.state != LifecycleState::Active {
        return Err(DispatchError::NotActive {
            extension: record.name.clone(),
            state: record.state,
        });
    }
    let Some(required) = record.commands.required_permissions(action) else {
        return Err(ActionError::UnknownAction(action.to_string()).into());
    };
    let granted = record
        .manifest
        .as_ref()
        .map(|manifest| manifest.permissions.clone())
        .unwrap_or_default();
    let missing = missing_permissions(&granted, required);
    if !missing.is_empty() {
        return Err(DispatchError::PermissionDenied {
            extension: record.name.clone(),
            action: action.to_string(),
            missing,
        });
    }
    Ok(())
}

fn run_action(
    instance: &ExtensionInstance,
    action: &str,
    request: &ActionRequest,
) -> Result<(), DispatchError> {
    let started_at = Instant::now();
    let name = {
        let record = instance.record();
        check_gates(&record, action)
            .map_err(|err| log_dispatch_error(&record.name, action, err))?;
        record.name.clone()
    };

    // Calls on one instance serialize here; the record stays readable.
    let mut handle = instance.handle();
    // Unload may have won the race for the handle.
    check_gates(&instance.record(), action)
        .map_err(|err| log_dispatch_error(&name, action, err))?;
    if request.is_cancelled() {
        return Err(ActionError::Cancelled(format!("{name}.{action}")).into());
    }

    let Some(extension) = handle.as_mut() else {
        return Err(log_dispatch_error(
            &name,
            action,
            ActionError::Faulted {
                action: action.to_string(),
                message: "active instance has no handle".to_string(),
            }
            .into(),
        ));
    };
    let outcome = match contain(|| extension.execute_action(action, request)) {
        Ok(true) => Ok(()),
        Ok(false) => Err(ActionError::Rejected(action.to_string())),
        Err(message) => Err(ActionError::Faulted {
            action: action.to_string(),
            message,
        }),
    };

    match outcome {
        Ok(()) => {
            info!(
                "event=action_execute module=runtime status=ok name={} action={} duration_ms={}",
                name,
                action,
                started_at.elapsed().as_millis()
            );
            Ok(())
        }
        Err(err) => {
            instance.record().last_error = Some(ExtensionError::Action(err.clone()));
            Err(log_dispatch_error(&name, action, err.into()))
        }
    }
}

fn log_dispatch_error(name: &str, action: &str, err: DispatchError) -> DispatchError {
    warn!(
        "event=action_execute module=runtime status=error name={} action={} error_code={} error={}",
        name,
        action,
        err.code(),
        err
    );
    err
}

fn warn_on_unusable_commands(commands: &CommandTable, manifest: &ExtensionManifest) {
    for action in commands.actions() {
        let missing = commands
            .required_permissions(action)
            .map(|required| missing_permissions(&manifest.permissions, required))
            .unwrap_or_default();
        if !missing.is_empty() {
            warn!(
                "event=extension_init module=runtime status=warn name={} action={} error_code=undeclared_permission missing={}",
                manifest.name,
                action,
                missing
                    .iter()
                    .map(|permission| permission.as_str())
                    .collect::<Vec<_>>()
                    .join(",")
            );
        }
    }
    for item in &manifest.menu_items {
        if !commands.contains(&item.action) {
            warn!(
                "event=extension_init module=runtime status=warn name={} menu_id={} action={} error_code=unregistered_menu_action",
                manifest.name, item.id, item.action
            );
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn release_handle(handle: ExtensionHandle) {
    if let Some(handle) = handle {
        if let Err(message) = contain(move || drop(handle)) {
            error!(
                "event=extension_release module=runtime status=error error_code=drop_faulted error={}",
                message
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::LifecycleState;

    #[test]
    fn lifecycle_edges_are_monotonic() {
        use LifecycleState::*;
        let allowed = [
            (Discovered, Validated),
            (Discovered, Failed),
            (Validated, Loaded),
            (Validated, Failed),
            (Loaded, Active),
            (Loaded, Failed),
            (Active, Active),
            (Active, Unloaded),
        ];
        let all = [Discovered, Validated, Loaded, Active, Failed, Unloaded];
        for from in all {
            for to in all {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "{} -> {}",
                    from.as_str(),
                    to.as_str()
                );
            }
        }
    }

    #[test]
    fn terminal_states_have_no_exits() {
        assert!(LifecycleState::Failed.is_terminal());
        assert!(LifecycleState::Unloaded.is_terminal());
        assert!(!LifecycleState::Active.is_terminal());
    }
}
