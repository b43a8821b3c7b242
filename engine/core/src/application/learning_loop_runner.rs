// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Learning Loop Runner - Background driver for continuous training
//!
//! Pulls a batch from the feature source and runs one training cycle per
//! tick. A failed cycle is logged and the loop pauses for the error backoff
//! before the next tick. The runner stops when the shutdown token fires, the
//! cycle limit is reached or the source is exhausted.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Periodic scheduling of `LearningLoop::run_training_cycle`

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::application::learning_loop::LearningLoop;
use crate::domain::collaborators::FeatureSource;
use crate::domain::config::SchedulerConfig;

/// Configuration for the learning loop runner
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Time between cycle starts
    pub interval: Duration,

    /// Stop after this many successful cycles; `None` runs until cancelled
    pub max_cycles: Option<u64>,

    /// Pause after a failed cycle
    pub error_backoff: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            max_cycles: None,
            error_backoff: Duration::from_secs(10),
        }
    }
}

impl From<&SchedulerConfig> for RunnerConfig {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.interval_seconds),
            max_cycles: config.max_cycles,
            error_backoff: Duration::from_secs(config.error_backoff_seconds),
        }
    }
}

pub struct LearningLoopRunner {
    learning_loop: Arc<LearningLoop>,
    source: Option<Arc<dyn FeatureSource>>,
    config: RunnerConfig,
    completed: AtomicU64,
    failed: AtomicU64,
    shutdown_token: CancellationToken,
}

impl LearningLoopRunner {
    pub fn new(
        learning_loop: Arc<LearningLoop>,
        source: Option<Arc<dyn FeatureSource>>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            learning_loop,
            source,
            config,
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Get a handle to trigger shutdown
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub fn cycles_completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn cycles_failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Start the runner background task
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    /// Run the loop until shutdown, the cycle limit or source exhaustion
    pub async fn run(&self) {
        info!(
            interval_seconds = self.config.interval.as_secs_f64(),
            max_cycles = ?self.config.max_cycles,
            "Starting learning loop runner"
        );

        let mut tick = interval(self.config.interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if self.limit_reached() {
                info!(cycles = self.cycles_completed(), "Cycle limit reached");
                break;
            }

            tokio::select! {
                _ = tick.tick() => {
                    if !self.step().await {
                        break;
                    }
                }
                _ = self.shutdown_token.cancelled() => {
                    info!("Shutdown signal received, stopping learning loop runner");
                    break;
                }
            }
        }

        info!(
            completed = self.cycles_completed(),
            failed = self.cycles_failed(),
            "Learning loop runner stopped"
        );
    }

    fn limit_reached(&self) -> bool {
        self.config
            .max_cycles
            .is_some_and(|max| self.cycles_completed() >= max)
    }

    /// One tick. Returns false when the runner should stop.
    async fn step(&self) -> bool {
        let batch = match &self.source {
            None => None,
            Some(source) => match source.next_batch().await {
                Ok(Some(batch)) => Some(batch),
                Ok(None) => {
                    info!("Feature source exhausted");
                    return false;
                }
                Err(e) => {
                    warn!(error = %e, "Feature source failed");
                    self.failed.fetch_add(1, Ordering::Relaxed);
                    return self.backoff().await;
                }
            },
        };

        debug!(samples = batch.as_ref().map(|b| b.features.len()), "Running training cycle");
        match self.learning_loop.run_training_cycle(batch).await {
            Ok(report) => {
                self.completed.fetch_add(1, Ordering::Relaxed);
                info!(
                    cycle = report.cycle,
                    skills = report.skills_registered.len(),
                    plugins_loaded = report.plugins_loaded,
                    errors = report.errors.len(),
                    "Learning loop cycle completed"
                );
                true
            }
            Err(e) => {
                error!(error = %e, "Learning loop cycle failed");
                self.failed.fetch_add(1, Ordering::Relaxed);
                self.backoff().await
            }
        }
    }

    /// Sleep for the error backoff; false if shutdown arrived meanwhile.
    async fn backoff(&self) -> bool {
        tokio::select! {
            _ = sleep(self.config.error_backoff) => true,
            _ = self.shutdown_token.cancelled() => false,
        }
    }
}
