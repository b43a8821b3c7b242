// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Plugin lifecycle commands
//!
//! Commands: list, load-all, reload, unload, exec, history
//!
//! Every invocation starts a fresh loader, so commands that address a
//! plugin by id load the plugin directory first.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use serde_json::Value;

use nightframe_core::plugin::{PluginId, PluginInfo, PluginStatus};

use crate::embedded::EmbeddedEngine;

#[derive(Subcommand)]
pub enum PluginsCommand {
    /// Load the plugin directory and list what is registered
    List {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Load every new or changed plugin module
    #[command(name = "load-all")]
    LoadAll,

    /// Reload a plugin from its module file
    Reload {
        /// Plugin id (module file stem)
        id: String,
    },

    /// Unload a plugin; its record is kept as disabled
    Unload {
        /// Plugin id (module file stem)
        id: String,
    },

    /// Execute a plugin, or every plugin providing a capability
    Exec {
        /// Plugin id (module file stem)
        #[arg(required_unless_present = "capability")]
        id: Option<String>,

        /// Execute all active providers of this capability instead
        #[arg(long, conflicts_with = "id")]
        capability: Option<String>,

        /// JSON input passed to the entry point
        #[arg(short, long, default_value = "{}")]
        input: String,
    },

    /// Show stored plugin records, including unloaded ones
    History {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

pub async fn handle_command(
    command: PluginsCommand,
    config_override: Option<PathBuf>,
) -> Result<()> {
    let host = EmbeddedEngine::open(config_override)?;
    let result = dispatch(&host, command);
    host.close()?;
    result
}

fn dispatch(host: &EmbeddedEngine, command: PluginsCommand) -> Result<()> {
    let loader = host.engine.loader();
    match command {
        PluginsCommand::List { json } => {
            loader.load_all();
            let plugins = loader.registry().all();
            if json {
                println!("{}", serde_json::to_string_pretty(&plugins)?);
            } else {
                print_plugins(&plugins, loader.plugin_dir());
            }
        }
        PluginsCommand::LoadAll => {
            let results = loader.load_all();
            if results.is_empty() {
                println!(
                    "{}",
                    format!("No new or changed modules in {}", loader.plugin_dir().display())
                        .dimmed()
                );
            }
            for (id, ok) in &results {
                if *ok {
                    println!("{} {}", "✓".green(), id);
                } else {
                    let reason = loader
                        .registry()
                        .get(id)
                        .and_then(|info| info.last_error)
                        .unwrap_or_default();
                    println!("{} {} {}", "✗".red(), id, reason.dimmed());
                }
            }
            let stats = loader.stats();
            println!(
                "Loaded {}/{} plugins",
                stats.active_plugins, stats.total_plugins
            );
        }
        PluginsCommand::Reload { id } => {
            let id = PluginId::new(id);
            loader.load_all();
            if !loader.reload(&id) {
                anyhow::bail!("Failed to reload plugin '{}'", id);
            }
            let version = loader
                .registry()
                .get(&id)
                .map(|info| info.version)
                .unwrap_or_default();
            println!("{}", format!("✓ Reloaded {} ({})", id, version).green());
        }
        PluginsCommand::Unload { id } => {
            let id = PluginId::new(id);
            loader.load_all();
            if !loader.unload(&id) {
                anyhow::bail!("Plugin '{}' is not loaded", id);
            }
            println!("{}", format!("✓ Unloaded {}", id).green());
        }
        PluginsCommand::Exec {
            id,
            capability,
            input,
        } => {
            let input: Value = serde_json::from_str(&input).context("--input is not valid JSON")?;
            loader.load_all();
            match (id, capability) {
                (_, Some(capability)) => {
                    let records = loader.execute_capability(&capability, input);
                    if records.is_empty() {
                        println!(
                            "{}",
                            format!("No active plugin provides '{}'", capability).yellow()
                        );
                    }
                    println!("{}", serde_json::to_string_pretty(&records)?);
                }
                (Some(id), None) => {
                    let id = PluginId::new(id);
                    let output = loader
                        .execute(&id, input)
                        .with_context(|| format!("Execution of '{}' failed", id))?;
                    println!("{}", serde_json::to_string_pretty(&output)?);
                }
                (None, None) => anyhow::bail!("Either a plugin id or --capability is required"),
            }
        }
        PluginsCommand::History { json } => {
            let history = loader.history()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&history)?);
            } else {
                print_plugins(&history, loader.plugin_dir());
            }
        }
    }
    Ok(())
}

fn print_plugins(plugins: &[PluginInfo], plugin_dir: &std::path::Path) {
    if plugins.is_empty() {
        println!(
            "{}",
            format!("No plugins found in {}", plugin_dir.display()).dimmed()
        );
        return;
    }

    println!(
        "{}",
        format!(
            "{:<24} {:<10} {:<12} {:>6} {:>6}  {}",
            "ID", "STATUS", "VERSION", "RUNS", "ERRS", "CAPABILITIES"
        )
        .bold()
    );
    for info in plugins {
        let status = format!("{:<10}", info.status.to_string());
        let status = match info.status {
            PluginStatus::Active => status.green(),
            PluginStatus::Error => status.red(),
            _ => status.dimmed(),
        };
        println!(
            "{:<24} {} {:<12} {:>6} {:>6}  {}",
            info.id.as_str(),
            status,
            info.version,
            info.execution_count,
            info.error_count,
            info.capabilities.join(", ")
        );
        if let Some(error) = &info.last_error {
            println!("  {}", error.red());
        }
    }
}
