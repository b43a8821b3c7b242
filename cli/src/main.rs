// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # NIGHTFRAME Engine CLI
//!
//! The `nightframe` binary hosts an adaptation engine in-process: every
//! command opens the configured storage, does its work and closes the engine
//! so state is flushed before exit.
//!
//! ## Commands
//!
//! - `nightframe cycle` - Run one training cycle and print its JSON report
//! - `nightframe run` - Run the learning loop until Ctrl-C or the cycle limit
//! - `nightframe status` - Engine, capability and plugin overview
//! - `nightframe discover --input <json> --domain <d>` - Cluster a feature batch
//! - `nightframe capabilities show|set` - Inspect or seed confidence values
//! - `nightframe plugins list|load-all|reload|unload|exec|history` - Plugin lifecycle
//! - `nightframe config show|validate|generate` - Configuration management

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

use nightframe_core::config::{EngineConfigManifest, ObservabilityConfig};

mod commands;
mod embedded;

use commands::{CapabilityCommand, ConfigCommand, PluginsCommand};

/// NIGHTFRAME - Self-directed capability adaptation engine
#[derive(Parser)]
#[command(name = "nightframe")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "NIGHTFRAME_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); defaults to the config value
    #[arg(long, global = true, env = "NIGHTFRAME_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format (text, json); defaults to the config value
    #[arg(long, global = true, env = "NIGHTFRAME_LOG_FORMAT")]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one training cycle
    #[command(name = "cycle")]
    Cycle {
        #[command(flatten)]
        batch: commands::engine::BatchArgs,

        /// Print a readable summary instead of the JSON report
        #[arg(long)]
        summary: bool,
    },

    /// Run the learning loop continuously
    #[command(name = "run")]
    Run {
        #[command(flatten)]
        batch: commands::engine::BatchArgs,

        /// Stop after this many cycles (default: config value)
        #[arg(long)]
        max_cycles: Option<u64>,

        /// Seconds between cycles (default: config value)
        #[arg(long)]
        interval: Option<u64>,

        /// Stream engine events while the loop runs
        #[arg(short, long)]
        watch: bool,
    },

    /// Show engine status
    #[command(name = "status")]
    Status {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Cluster a feature batch and propose skill candidates
    #[command(name = "discover")]
    Discover {
        /// JSON file with `features` (and optional `labels`)
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,

        /// Capability domain the batch belongs to
        #[arg(short, long)]
        domain: String,

        /// Register candidates whose utility clears the configured threshold
        #[arg(long)]
        register: bool,
    },

    /// Capability confidence
    #[command(name = "capabilities")]
    Capabilities {
        #[command(subcommand)]
        command: CapabilityCommand,
    },

    /// Plugin management
    #[command(name = "plugins")]
    Plugins {
        #[command(subcommand)]
        command: PluginsCommand,
    },

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let observability = observability_defaults(cli.config.clone());
    let level = cli.log_level.as_deref().unwrap_or(&observability.log_level);
    let format = cli.log_format.as_deref().unwrap_or(&observability.log_format);
    init_logging(level, format)?;

    match cli.command {
        Some(Commands::Cycle { batch, summary }) => {
            commands::engine::cycle(cli.config, batch, summary).await
        }
        Some(Commands::Run {
            batch,
            max_cycles,
            interval,
            watch,
        }) => commands::engine::run(cli.config, batch, max_cycles, interval, watch).await,
        Some(Commands::Status { json }) => commands::engine::status(cli.config, json).await,
        Some(Commands::Discover {
            input,
            domain,
            register,
        }) => commands::discover::handle(cli.config, input, domain, register).await,
        Some(Commands::Capabilities { command }) => {
            commands::capabilities::handle_command(command, cli.config).await
        }
        Some(Commands::Plugins { command }) => {
            commands::plugins::handle_command(command, cli.config).await
        }
        Some(Commands::Config { command }) => {
            commands::config::handle_command(command, cli.config).await
        }
        None => {
            // No command provided - show help
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}

/// Logging defaults from the config file, before the subscriber exists.
fn observability_defaults(config_path: Option<PathBuf>) -> ObservabilityConfig {
    EngineConfigManifest::load_or_default(config_path)
        .map(|config| config.spec.observability)
        .unwrap_or_default()
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str, format: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    match format {
        "json" => builder.json().init(),
        "text" => builder.compact().init(),
        other => anyhow::bail!("Unknown log format '{}'. Expected text or json", other),
    }

    Ok(())
}
