//! Command-line front end for the extension runtime.
//!
//! # Responsibility
//! - Run one load pass over an extensions directory with the builtin catalog.
//! - Print lifecycle states, declared permissions, pass warnings and the projected menu.

use addonkit_core::{
    builtin_catalog, init_from_config, ExtensionRuntime, HostMenuEntry, MenuBridge,
    RuntimeConfig,
};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "addonkit")]
#[command(version, about = "Discover, validate and load extensions from a directory")]
struct Args {
    /// Extensions directory; overrides `extensions_dir` from the config file.
    extensions_dir: Option<PathBuf>,

    /// Runtime configuration JSON file.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => match RuntimeConfig::from_json_file(path) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("config error [{}]: {err}", err.code());
                return ExitCode::FAILURE;
            }
        },
        None => RuntimeConfig::default(),
    };
    if let Some(root) = args.extensions_dir {
        config.extensions_dir = root;
    }
    if let Err(err) = init_from_config(&config) {
        eprintln!("logging disabled: {err}");
    }
    log::info!(
        "event=cli_start module=cli status=ok root={} version={}",
        config.extensions_dir.display(),
        addonkit_core::runtime_version()
    );

    let mut runtime = ExtensionRuntime::new(config);
    let report = runtime.load_configured(&builtin_catalog());

    for outcome in &report.outcomes {
        match &outcome.error {
            Some(err) => println!(
                "{} state={} error_code={} error={err}",
                outcome.name,
                outcome.state.as_str(),
                err.code()
            ),
            None => println!("{} state={}", outcome.name, outcome.state.as_str()),
        }
        if let Some(info) = runtime.info(&outcome.name) {
            for permission in &info.permissions {
                println!("  permission {}: {}", permission.as_str(), permission.description());
            }
        }
        for warning in &outcome.warnings {
            println!("  warning: {warning}");
        }
    }
    for warning in &report.warnings {
        println!("warning: {warning}");
    }

    let host_entries = vec![HostMenuEntry {
        id: "quit".to_string(),
        label: "Quit".to_string(),
        icon: None,
        category: "File".to_string(),
        action: "host_quit".to_string(),
    }];
    match MenuBridge::new(host_entries) {
        Ok(bridge) => {
            for descriptor in bridge.project(&runtime) {
                println!(
                    "menu [{}] {} -> {}",
                    descriptor.category, descriptor.id, descriptor.label
                );
            }
        }
        Err(err) => eprintln!("menu error: {err}"),
    }

    let unloaded = runtime.shutdown_all();
    println!(
        "active={} failed={} unloaded={unloaded}",
        report.active_count(),
        report.failed_count()
    );
    ExitCode::SUCCESS
}
