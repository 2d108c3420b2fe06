use addonkit_core::{
    ActionError, ActionParams, ActionRequest, DispatchError, Extension, ExtensionCatalog,
    ExtensionContext, ExtensionError, ExtensionRuntime, LifecycleError, LifecycleState,
    Permission, RuntimeConfig,
};
use serde_json::{json, Value};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Counts every entry into extension action code.
struct Spy {
    accept_init: bool,
    calls: Arc<AtomicUsize>,
    shutdowns: Arc<AtomicUsize>,
}

impl Extension for Spy {
    fn name(&self) -> &str {
        "spy"
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn initialize(&mut self, context: &mut ExtensionContext) -> bool {
        if !self.accept_init {
            return false;
        }
        let registrar = context.registrar();
        registrar.register_action("ping", &[]).is_ok()
            && registrar
                .register_action("export", &[Permission::DataExport])
                .is_ok()
            && registrar.register_action("refuse", &[]).is_ok()
            && registrar.register_action("explode", &[]).is_ok()
    }

    fn execute_action(&mut self, action: &str, _request: &ActionRequest) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match action {
            "refuse" => false,
            "explode" => panic!("spy action exploded"),
            _ => true,
        }
    }

    fn shutdown(&mut self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

struct Harness {
    runtime: ExtensionRuntime,
    calls: Arc<AtomicUsize>,
    shutdowns: Arc<AtomicUsize>,
    _root: tempfile::TempDir,
}

fn harness(permissions: Value, accept_init: bool) -> Harness {
    let root = tempfile::tempdir().expect("tempdir");
    write_manifest(
        root.path(),
        &json!({
            "name": "spy",
            "version": "1.0.0",
            "entry_point": "spy_addon.Spy",
            "permissions": permissions,
            "menu_items": [
                {"id": "ping", "label": "Ping", "action": "ping"},
                {"id": "export", "label": "Export", "action": "export"}
            ]
        }),
    );

    let calls = Arc::new(AtomicUsize::new(0));
    let shutdowns = Arc::new(AtomicUsize::new(0));
    let mut catalog = ExtensionCatalog::new();
    let factory_calls = Arc::clone(&calls);
    let factory_shutdowns = Arc::clone(&shutdowns);
    catalog
        .register("spy_addon.Spy", move || {
            Box::new(Spy {
                accept_init,
                calls: Arc::clone(&factory_calls),
                shutdowns: Arc::clone(&factory_shutdowns),
            })
        })
        .expect("register spy");

    let mut runtime = ExtensionRuntime::new(RuntimeConfig {
        host_version: "1.0.0".to_string(),
        ..RuntimeConfig::default()
    });
    runtime.load_pass(root.path(), &catalog);
    Harness {
        runtime,
        calls,
        shutdowns,
        _root: root,
    }
}

fn write_manifest(root: &Path, manifest: &Value) {
    let dir = root.join("spy");
    fs::create_dir_all(&dir).expect("create package dir");
    fs::write(dir.join("manifest.json"), manifest.to_string()).expect("write manifest");
}

#[test]
fn failed_instance_is_never_entered() {
    let harness = harness(json!([]), false);
    assert_eq!(
        harness.runtime.state("spy"),
        Some(LifecycleState::Failed)
    );

    let err = harness
        .runtime
        .execute_action("spy", "ping", ActionParams::new())
        .expect_err("failed instance must reject");
    assert_eq!(
        err,
        DispatchError::NotActive {
            extension: "spy".to_string(),
            state: LifecycleState::Failed,
        }
    );
    assert_eq!(harness.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn undeclared_permission_is_denied_before_entering_extension() {
    let harness = harness(json!([]), true);

    let err = harness
        .runtime
        .execute_action("spy", "export", ActionParams::new())
        .expect_err("export needs data_export");
    assert!(err.is_permission_denied());
    assert_eq!(
        err,
        DispatchError::PermissionDenied {
            extension: "spy".to_string(),
            action: "export".to_string(),
            missing: vec![Permission::DataExport],
        }
    );
    assert_eq!(harness.calls.load(Ordering::SeqCst), 0);
    assert_eq!(harness.runtime.last_error("spy"), None);
    assert_eq!(harness.runtime.state("spy"), Some(LifecycleState::Active));
}

#[test]
fn declared_permission_allows_the_action() {
    let harness = harness(json!(["data_export"]), true);

    harness
        .runtime
        .execute_action("spy", "export", ActionParams::new())
        .expect("declared permission");
    assert_eq!(harness.calls.load(Ordering::SeqCst), 1);
}

#[test]
fn unknown_extension_and_action_are_reported() {
    let harness = harness(json!([]), true);

    assert_eq!(
        harness
            .runtime
            .execute_action("ghost", "ping", ActionParams::new())
            .expect_err("unknown extension"),
        DispatchError::UnknownExtension("ghost".to_string())
    );
    assert_eq!(
        harness
            .runtime
            .execute_action("spy", "teleport", ActionParams::new())
            .expect_err("unknown action"),
        DispatchError::Action(ActionError::UnknownAction("teleport".to_string()))
    );
    assert_eq!(harness.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn rejected_and_panicking_actions_keep_instance_active() {
    let harness = harness(json!([]), true);

    assert_eq!(
        harness
            .runtime
            .execute_action("spy", "refuse", ActionParams::new())
            .expect_err("refuse returns false"),
        DispatchError::Action(ActionError::Rejected("refuse".to_string()))
    );
    assert_eq!(
        harness
            .runtime
            .execute_action("spy", "explode", ActionParams::new())
            .expect_err("explode panics"),
        DispatchError::Action(ActionError::Faulted {
            action: "explode".to_string(),
            message: "spy action exploded".to_string(),
        })
    );
    assert_eq!(harness.runtime.state("spy"), Some(LifecycleState::Active));
    assert_eq!(
        harness.runtime.last_error("spy").map(|err| err.code()),
        Some("action_faulted")
    );

    harness
        .runtime
        .execute_action("spy", "ping", ActionParams::new())
        .expect("instance still serves actions");
    assert_eq!(harness.calls.load(Ordering::SeqCst), 3);
}

#[test]
fn unload_is_terminal() {
    let harness = harness(json!([]), true);

    harness.runtime.unload("spy").expect("unload active spy");
    assert_eq!(harness.shutdowns.load(Ordering::SeqCst), 1);
    assert_eq!(harness.runtime.state("spy"), Some(LifecycleState::Unloaded));
    assert!(harness.runtime.active_extensions().is_empty());

    let err = harness.runtime.unload("spy").expect_err("second unload");
    assert_eq!(
        err,
        LifecycleError::InvalidTransition {
            extension: "spy".to_string(),
            from: LifecycleState::Unloaded,
            to: LifecycleState::Unloaded,
        }
    );
    assert_eq!(
        harness.runtime.unload("ghost").expect_err("unknown"),
        LifecycleError::UnknownExtension("ghost".to_string())
    );

    let err = harness
        .runtime
        .execute_action("spy", "ping", ActionParams::new())
        .expect_err("unloaded instance");
    assert!(matches!(
        err,
        DispatchError::NotActive {
            state: LifecycleState::Unloaded,
            ..
        }
    ));
    assert_eq!(harness.calls.load(Ordering::SeqCst), 0);
    assert!(!harness.runtime.initialize("spy"));
}

#[test]
fn failed_instances_cannot_be_unloaded() {
    let harness = harness(json!([]), false);
    assert!(matches!(
        harness.runtime.unload("spy"),
        Err(LifecycleError::InvalidTransition {
            from: LifecycleState::Failed,
            ..
        })
    ));
    assert_eq!(harness.shutdowns.load(Ordering::SeqCst), 0);
    assert!(matches!(
        harness.runtime.last_error("spy"),
        Some(ExtensionError::Init(_))
    ));
}

#[test]
fn shutdown_all_unloads_active_extensions() {
    let harness = harness(json!([]), true);
    assert_eq!(harness.runtime.shutdown_all(), 1);
    assert_eq!(harness.shutdowns.load(Ordering::SeqCst), 1);
    assert_eq!(harness.runtime.shutdown_all(), 0);
}
