//! Extensions compiled into the host.

use crate::extension::loader::ExtensionCatalog;
use crate::extension::permission::Permission;
use crate::extension::protocol::{ActionRequest, Extension, ExtensionContext, ExtensionLogger};
use log::error;
use serde_json::Value;
use std::fs;

pub const ECHO_ENTRY_POINT: &str = "echo_addon.Echo";

/// Returns the catalog of every built-in extension.
pub fn builtin_catalog() -> ExtensionCatalog {
    let mut catalog = ExtensionCatalog::new();
    if let Err(err) = catalog.register(ECHO_ENTRY_POINT, || Box::new(Echo::default())) {
        error!(
            "event=catalog_register module=extension status=error entry_point={} error={}",
            ECHO_ENTRY_POINT, err
        );
    }
    catalog
}

/// Diagnostic extension: `ping` answers with the configured greeting,
/// `read_file` reports the size of a file and needs `file_read`.
#[derive(Debug, Default)]
pub struct Echo {
    logger: Option<ExtensionLogger>,
    greeting: String,
}

impl Echo {
    fn log(&self, message: &str) {
        if let Some(logger) = &self.logger {
            logger.info(message);
        }
    }
}

impl Extension for Echo {
    fn name(&self) -> &str {
        "echo"
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn description(&self) -> &str {
        "Answers ping requests and reports file sizes."
    }

    fn initialize(&mut self, context: &mut ExtensionContext) -> bool {
        self.greeting = context
            .config()
            .get_str("greeting")
            .unwrap_or("pong")
            .to_string();
        self.logger = Some(context.logger().clone());
        let registrar = context.registrar();
        registrar.register_action("ping", &[]).is_ok()
            && registrar
                .register_action("read_file", &[Permission::FileRead])
                .is_ok()
    }

    fn execute_action(&mut self, action: &str, request: &ActionRequest) -> bool {
        match action {
            "ping" => {
                let message = request
                    .param("message")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                self.log(format!("{} {}", self.greeting, message).trim_end());
                true
            }
            "read_file" => {
                let Some(path) = request.param("path").and_then(Value::as_str) else {
                    return false;
                };
                match fs::metadata(path) {
                    Ok(metadata) if metadata.is_file() => {
                        self.log(&format!("read_file path={} bytes={}", path, metadata.len()));
                        true
                    }
                    _ => false,
                }
            }
            _ => false,
        }
    }
}
