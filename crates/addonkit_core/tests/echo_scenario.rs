use addonkit_core::{
    builtin_catalog, ActionParams, DispatchError, ExtensionRuntime, LifecycleState, Permission,
    RuntimeConfig,
};
use serde_json::{json, Value};
use std::fs;
use std::path::Path;

fn echo_manifest(permissions: Value) -> Value {
    json!({
        "name": "echo",
        "display_name": "Echo",
        "version": "1.0.0",
        "entry_point": "echo_addon.Echo",
        "permissions": permissions,
        "menu_items": [
            {"id": "ping", "label": "Ping", "action": "ping"},
            {"id": "read_file", "label": "Read file", "action": "read_file"}
        ]
    })
}

fn load_echo(root: &Path, permissions: Value) -> ExtensionRuntime {
    let dir = root.join("echo");
    fs::create_dir_all(&dir).expect("create echo dir");
    fs::write(dir.join("manifest.json"), echo_manifest(permissions).to_string())
        .expect("write manifest");

    let mut runtime = ExtensionRuntime::new(RuntimeConfig {
        host_version: "1.0.0".to_string(),
        ..RuntimeConfig::default()
    });
    let report = runtime.load_pass(root, &builtin_catalog());
    assert_eq!(report.active_count(), 1, "report: {report:?}");
    runtime
}

fn path_params(path: &Path) -> ActionParams {
    [("path".to_string(), json!(path.to_string_lossy()))]
        .into_iter()
        .collect()
}

#[test]
fn echo_ping_and_permitted_read_succeed() {
    let root = tempfile::tempdir().expect("tempdir");
    let data = root.path().join("data.txt");
    fs::write(&data, "hello").expect("write data");
    let runtime = load_echo(root.path(), json!(["file_read"]));

    assert_eq!(runtime.state("echo"), Some(LifecycleState::Active));
    runtime
        .execute_action(
            "echo",
            "ping",
            [("message".to_string(), json!("hi"))].into_iter().collect(),
        )
        .expect("ping succeeds");
    runtime
        .execute_action("echo", "read_file", path_params(&data))
        .expect("read_file with file_read succeeds");
}

#[test]
fn echo_without_file_read_is_denied_without_side_effects() {
    let root = tempfile::tempdir().expect("tempdir");
    let data = root.path().join("data.txt");
    fs::write(&data, "hello").expect("write data");
    let runtime = load_echo(root.path(), json!([]));

    runtime
        .execute_action("echo", "ping", ActionParams::new())
        .expect("ping needs no permission");

    let err = runtime
        .execute_action("echo", "read_file", path_params(&data))
        .expect_err("read_file needs file_read");
    assert_eq!(
        err,
        DispatchError::PermissionDenied {
            extension: "echo".to_string(),
            action: "read_file".to_string(),
            missing: vec![Permission::FileRead],
        }
    );
    assert_eq!(runtime.state("echo"), Some(LifecycleState::Active));
    assert_eq!(runtime.last_error("echo"), None);
    assert_eq!(fs::read_to_string(&data).expect("data intact"), "hello");
}
