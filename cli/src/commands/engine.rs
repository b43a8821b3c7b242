// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Engine lifecycle commands
//!
//! Commands: cycle, run, status

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use nightframe_core::application::{LearningLoopRunner, RunnerConfig, TrainingCycleReport};
use nightframe_core::capability::CapabilityDomain;
use nightframe_core::collaborators::{FeatureBatch, FeatureSource};
use nightframe_core::events::EngineEvent;
use nightframe_core::infrastructure::event_bus::EventBusError;
use nightframe_core::infrastructure::synthetic::SyntheticFeatureSource;

use crate::embedded::{read_batch, EmbeddedEngine, RepeatingSource};

/// Where a cycle's feature batch comes from
#[derive(Args, Debug, Clone, Default)]
pub struct BatchArgs {
    /// Generate a synthetic I/Q batch with this many samples
    #[arg(long, value_name = "SAMPLES", conflicts_with = "input")]
    pub synthetic: Option<usize>,

    /// Time steps per synthetic sample
    #[arg(long, default_value_t = 16, requires = "synthetic")]
    pub steps: usize,

    /// JSON file with `features` (and optional `labels`)
    #[arg(short, long, value_name = "FILE")]
    pub input: Option<PathBuf>,
}

impl BatchArgs {
    fn source(&self, seed: Option<u64>) -> Result<Option<Arc<dyn FeatureSource>>> {
        if let Some(samples) = self.synthetic {
            return Ok(Some(Arc::new(SyntheticFeatureSource::new(
                samples, self.steps, seed,
            ))));
        }
        match &self.input {
            Some(path) => Ok(Some(Arc::new(RepeatingSource::new(read_batch(path)?)))),
            None => Ok(None),
        }
    }

    fn batch(&self, seed: Option<u64>) -> Result<Option<FeatureBatch>> {
        if let Some(samples) = self.synthetic {
            return Ok(Some(
                SyntheticFeatureSource::new(samples, self.steps, seed).generate(),
            ));
        }
        self.input.as_deref().map(read_batch).transpose()
    }
}

pub async fn cycle(config_path: Option<PathBuf>, batch: BatchArgs, summary: bool) -> Result<()> {
    let host = EmbeddedEngine::open(config_path)?;
    let seed = host.engine.config().spec.discovery.seed;
    let batch = batch.batch(seed)?;

    let learning_loop = host.learning_loop();
    let result = learning_loop.run_training_cycle(batch).await;
    host.close()?;
    let report = result.context("Training cycle failed")?;

    if summary {
        print_report(&report);
    } else {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(())
}

pub async fn run(
    config_path: Option<PathBuf>,
    batch: BatchArgs,
    max_cycles: Option<u64>,
    interval: Option<u64>,
    watch: bool,
) -> Result<()> {
    let host = EmbeddedEngine::open(config_path)?;
    let scheduler_config = &host.engine.config().spec.scheduler;
    let mut runner_config = RunnerConfig::from(scheduler_config);
    if let Some(limit) = max_cycles {
        runner_config.max_cycles = Some(limit);
    }
    if let Some(seconds) = interval {
        anyhow::ensure!(seconds > 0, "--interval must be greater than zero");
        runner_config.interval = Duration::from_secs(seconds);
    }

    let source = batch.source(host.engine.config().spec.discovery.seed)?;
    let learning_loop = host.learning_loop();
    let runner = Arc::new(LearningLoopRunner::new(
        learning_loop.clone(),
        source,
        runner_config.clone(),
    ));

    let watcher = watch.then(|| {
        let mut events = host.engine.event_bus().subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => println!("{}", describe_event(&event)),
                    Err(EventBusError::Lagged(missed)) => {
                        println!("{}", format!("… {} events dropped", missed).dimmed())
                    }
                    Err(_) => break,
                }
            }
        })
    });

    println!(
        "{} every {}s{} ({})",
        "Running learning loop".bold(),
        runner_config.interval.as_secs(),
        runner_config
            .max_cycles
            .map(|n| format!(", {} cycles", n))
            .unwrap_or_default(),
        "Ctrl-C to stop".dimmed()
    );

    let token = runner.shutdown_token();
    let mut handle = runner.clone().start();
    let finished = tokio::select! {
        result = &mut handle => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };
    let joined = match finished {
        Some(result) => result,
        None => {
            println!("{}", "Stopping after the current cycle...".yellow());
            token.cancel();
            handle.await
        }
    };

    if let Some(watcher) = watcher {
        watcher.abort();
    }
    host.close()?;
    joined.context("Learning loop task panicked")?;

    let stats = learning_loop.stats();
    println!(
        "{}",
        format!(
            "✓ {} cycles completed, {} failed",
            runner.cycles_completed(),
            runner.cycles_failed()
        )
        .green()
    );
    println!(
        "  Skills registered: {}  generated: {}  deployed: {}",
        stats.skills_registered, stats.skills_generated, stats.plugins_deployed
    );
    Ok(())
}

pub async fn status(config_path: Option<PathBuf>, json: bool) -> Result<()> {
    let host = EmbeddedEngine::open(config_path)?;
    let status = host.engine.status();
    let recent = host.engine.capability_store().recent_metrics(5);
    let history = host.engine.loader().history()?;
    host.close()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("{}", "NIGHTFRAME Engine".bold());
    println!("  Name: {}", status.name);
    match &status.storage_path {
        Some(path) => println!("  Storage: {:?} ({})", status.storage_backend, path.display()),
        None => println!("  Storage: {:?}", status.storage_backend),
    }
    println!(
        "  Mode: {}",
        if status.autonomous {
            "autonomous".green()
        } else {
            "supervised".yellow()
        }
    );
    println!("  Phase: {}", status.metacognition.phase);
    println!("  Cycles this session: {}", status.metacognition.cycles_completed);
    println!();

    println!("{}", "Capabilities:".bold());
    print_capabilities(&status.metacognition.capabilities);
    println!();

    println!("{}", "Metacognition:".bold());
    println!("  Open gaps: {}", status.metacognition.open_gaps.len());
    println!(
        "  Active objectives: {}",
        status.metacognition.active_objectives.len()
    );
    println!(
        "  Active strategies: {}",
        status.metacognition.active_strategies.len()
    );
    println!();

    println!("{}", "Skills:".bold());
    println!("  Active: {}", status.active_skills);
    println!("  Candidates: {}", status.candidate_skills);
    println!("  Known patterns: {}", status.known_patterns);
    println!();

    // Persisted records; this process has loaded nothing yet
    println!("{}", "Plugins:".bold());
    println!("  Loaded in this process: {}", status.plugins.total_plugins);
    println!("  Recorded: {}", history.len());
    for info in &history {
        println!("    {:<24} {:<10} {}", info.id.as_str(), info.status, info.version.dimmed());
    }

    if !recent.is_empty() {
        println!();
        println!("{}", "Recent metrics:".bold());
        for metric in recent {
            println!(
                "  {} {} = {:.3}",
                metric.recorded_at.format("%Y-%m-%d %H:%M:%S").to_string().dimmed(),
                metric.metric_name,
                metric.value
            );
        }
    }
    Ok(())
}

pub(crate) fn print_capabilities(
    capabilities: &std::collections::BTreeMap<CapabilityDomain, f64>,
) {
    for (domain, confidence) in capabilities {
        let value = format!("{:.3}", confidence);
        match domain.priority_target() {
            Some(target) if *confidence >= target => {
                println!("  {:<24} {} / {:.2}", domain.as_str(), value.green(), target)
            }
            Some(target) => {
                println!("  {:<24} {} / {:.2}", domain.as_str(), value.yellow(), target)
            }
            None => println!("  {:<24} {}", domain.as_str(), value.dimmed()),
        }
    }
}

fn print_report(report: &TrainingCycleReport) {
    let header = format!("Training cycle #{}", report.cycle);
    if report.is_clean() {
        println!("{} {}", "✓".green(), header.bold());
    } else {
        println!("{} {}", "!".yellow(), header.bold());
    }
    println!("  Duration: {:.2}s", report.duration_seconds);

    let meta = &report.metacognition;
    println!(
        "  Gaps: {}  Objectives: {}  Adaptations: {}",
        meta.gaps_identified.len(),
        meta.objectives_created.len(),
        meta.adaptations_made.len()
    );
    for gap in &meta.gaps_identified {
        println!(
            "    {} {:.3} → {:.2} (severity {:.2})",
            gap.domain, gap.current, gap.target, gap.severity
        );
    }

    println!(
        "  Clusters: {}  Candidates: {}",
        report.clusters_analyzed, report.candidates_proposed
    );
    for name in report.skills_registered.iter().chain(&report.threshold_skills) {
        println!("    + {}", name.green());
    }
    for path in &report.deployed {
        println!("    deployed {}", path.display().to_string().dimmed());
    }

    if let Some(training) = &report.training {
        println!(
            "  Training: accuracy {:.3}, loss {:.4}, {} epochs",
            training.accuracy, training.loss, training.epochs_completed
        );
    }
    println!(
        "  Plugins: {} loaded, {} total",
        report.plugins_loaded, report.plugins_total
    );

    if let Some(error) = &meta.error {
        println!("  {} {}", "Metacognition failed:".red(), error);
    }
    for error in &report.errors {
        println!("  {} {}", "Error:".red(), error);
    }
}

fn describe_event(event: &EngineEvent) -> String {
    let kind = format!("[{}]", event.kind()).cyan();
    let detail = match event {
        EngineEvent::GapIdentified { domain, severity, .. } => {
            format!("{} severity {:.2}", domain, severity)
        }
        EngineEvent::SkillThresholdCrossed {
            domain,
            previous,
            confidence,
            ..
        } => format!("{} {:.3} → {:.3}", domain, previous, confidence),
        EngineEvent::AdaptationCreated {
            name, target_domain, ..
        } => match target_domain {
            Some(domain) => format!("{} for {}", name, domain),
            None => name.clone(),
        },
        EngineEvent::CycleCompleted {
            cycle,
            gaps,
            adaptations,
            error,
            ..
        } => match error {
            Some(error) => format!("#{} failed: {}", cycle, error),
            None => format!("#{} gaps {} adaptations {}", cycle, gaps, adaptations),
        },
        EngineEvent::PluginLoaded {
            plugin_id,
            capabilities,
            ..
        } => format!("{} [{}]", plugin_id, capabilities.join(", ")),
        EngineEvent::PluginFailed {
            plugin_id, error, ..
        } => format!("{} {}", plugin_id, error.red()),
        EngineEvent::PluginUnloaded { plugin_id, .. } => plugin_id.to_string(),
        EngineEvent::Discovery(inner) => serde_json::to_string(inner).unwrap_or_default(),
    };
    format!("{} {}", kind, detail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use nightframe_core::plugin::PluginId;

    #[test]
    fn test_describe_event_names_the_plugin() {
        let line = describe_event(&EngineEvent::PluginUnloaded {
            plugin_id: PluginId::new("ap_locator"),
            unloaded_at: Utc::now(),
        });
        assert!(line.contains("plugin_unloaded"));
        assert!(line.contains("ap_locator"));
    }

    #[test]
    fn test_batch_args_without_input_yield_nothing() {
        let args = BatchArgs::default();
        assert!(args.batch(Some(1)).unwrap().is_none());
        assert!(args.source(Some(1)).unwrap().is_none());
    }

    #[test]
    fn test_synthetic_batch_has_one_row_per_sample() {
        let args = BatchArgs {
            synthetic: Some(12),
            steps: 8,
            input: None,
        };
        let batch = args.batch(Some(7)).unwrap().unwrap();
        assert_eq!(batch.features.len(), 12);
        assert_eq!(batch.features[0].len(), 16);
    }
}
