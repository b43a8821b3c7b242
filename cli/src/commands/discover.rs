// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Skill discovery over a single feature batch

use std::path::PathBuf;

use anyhow::{Context, Result};
use colored::Colorize;

use nightframe_core::capability::CapabilityDomain;
use nightframe_cortex::PatternCluster;

use crate::embedded::{read_batch, EmbeddedEngine};

pub async fn handle(
    config_path: Option<PathBuf>,
    input: PathBuf,
    domain: String,
    register: bool,
) -> Result<()> {
    let domain: CapabilityDomain = domain.parse().context("Unknown capability domain")?;
    let batch = read_batch(&input)?;

    let host = EmbeddedEngine::open(config_path)?;
    let result = discover(&host, &batch.features, batch.labels.as_deref(), domain, register);
    host.close()?;
    result
}

fn discover(
    host: &EmbeddedEngine,
    features: &[Vec<f64>],
    labels: Option<&[f64]>,
    domain: CapabilityDomain,
    register: bool,
) -> Result<()> {
    let discovery = host.engine.discovery();
    let threshold = host.engine.config().spec.discovery.utility_threshold;

    let clusters = discovery
        .analyze_patterns(features, domain.as_str(), labels)
        .context("Pattern analysis failed")?;

    if clusters.is_empty() {
        println!(
            "{}",
            format!(
                "No clusters: {} samples (minimum {})",
                features.len(),
                discovery.config().min_samples
            )
            .yellow()
        );
        return Ok(());
    }

    println!("{}", format!("Clusters for {}:", domain).bold());
    for cluster in &clusters {
        print_cluster(cluster);
    }
    println!();

    let candidates = discovery.identify_skill_candidates(Some(&clusters));
    if candidates.is_empty() {
        println!("{}", "No new skill candidates".dimmed());
        return Ok(());
    }

    println!("{}", "Skill candidates:".bold());
    for candidate in candidates {
        let utility = discovery.evaluate_utility(&candidate);
        let marker = if utility > threshold {
            "✓".green()
        } else {
            "·".dimmed()
        };
        println!("  {} {} utility {:.3}", marker, candidate.name, utility);

        if register && utility > threshold {
            let registered = discovery.register_skill(&candidate)?;
            println!("    {} {}", "registered".green(), registered.id);
        }
    }

    if !register {
        println!();
        println!(
            "{}",
            format!("Use --register to activate candidates with utility above {:.2}", threshold)
                .dimmed()
        );
    }
    Ok(())
}

fn print_cluster(cluster: &PatternCluster) {
    let novelty = if cluster.is_novel {
        "novel".green()
    } else {
        "known".dimmed()
    };
    let label = cluster
        .label_mean
        .map(|mean| format!(" label {:.3}", mean))
        .unwrap_or_default();
    println!(
        "  {} size {:<4} variance {:.4}{} [{}]",
        cluster.signature.as_str().dimmed(),
        cluster.size,
        cluster.variance,
        label,
        novelty
    );
}
