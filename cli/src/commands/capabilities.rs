// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Capability confidence commands

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;

use nightframe_core::capability::CapabilityDomain;

use crate::commands::engine::print_capabilities;
use crate::embedded::EmbeddedEngine;

#[derive(Subcommand)]
pub enum CapabilityCommand {
    /// Show confidence for every domain
    Show {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Record a confidence value for one domain
    Set {
        /// Domain name, e.g. `rf_fingerprinting`
        domain: String,

        /// Confidence in [0, 1]
        value: f64,
    },
}

pub async fn handle_command(
    command: CapabilityCommand,
    config_override: Option<PathBuf>,
) -> Result<()> {
    let host = EmbeddedEngine::open(config_override)?;
    let result = match command {
        CapabilityCommand::Show { json } => show(&host, json),
        CapabilityCommand::Set { domain, value } => set(&host, &domain, value),
    };
    host.close()?;
    result
}

fn show(host: &EmbeddedEngine, json: bool) -> Result<()> {
    let capabilities = host.engine.capability_store().all();
    if json {
        println!("{}", serde_json::to_string_pretty(&capabilities)?);
    } else {
        println!("{}", "Capabilities:".bold());
        print_capabilities(&capabilities);
    }
    Ok(())
}

fn set(host: &EmbeddedEngine, domain: &str, value: f64) -> Result<()> {
    let domain: CapabilityDomain = domain.parse().context("Unknown capability domain")?;
    let store = host.engine.capability_store();
    let previous = store.get(domain);
    let stored = store
        .update(domain, value, "cli")
        .with_context(|| format!("Failed to update {}", domain))?;
    println!(
        "{}",
        format!("✓ {}: {:.3} → {:.3}", domain, previous, stored).green()
    );
    Ok(())
}
