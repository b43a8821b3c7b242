// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Bounded retry for repository writes.
//!
//! Every write-behind path goes through [`PersistencePolicy::run`]. Once the
//! attempts are exhausted the last error is returned and the caller keeps its
//! in-memory state, retrying on its next flush.

use std::time::Duration;

use tracing::warn;

use crate::domain::config::PersistenceConfig;
use crate::domain::repository::RepositoryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistencePolicy {
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for PersistencePolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay: Duration::from_millis(50),
        }
    }
}

impl From<&PersistenceConfig> for PersistencePolicy {
    fn from(config: &PersistenceConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        }
    }
}

impl PersistencePolicy {
    /// Single attempt, no delay
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            retry_delay: Duration::ZERO,
        }
    }

    /// Blocks the calling thread for up to `(max_attempts - 1) * retry_delay`.
    /// The capability store and scheduler release their state locks first;
    /// the plugin loader keeps its mutation lock, so a retrying save delays
    /// other loads but not plugin execution.
    pub fn run<T>(
        &self,
        operation: &str,
        mut op: impl FnMut() -> Result<T, RepositoryError>,
    ) -> Result<T, RepositoryError> {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) => {
                    metrics::counter!("nightframe_persistence_failures_total", "operation" => operation.to_string())
                        .increment(1);
                    if attempt >= attempts {
                        warn!(operation, attempts, error = %e, "Persistence failed, keeping in-memory state");
                        return Err(e);
                    }
                    warn!(operation, attempt, error = %e, "Persistence attempt failed, retrying");
                    if !self.retry_delay.is_zero() {
                        std::thread::sleep(self.retry_delay);
                    }
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retries_until_success() {
        let policy = PersistencePolicy {
            max_attempts: 3,
            retry_delay: Duration::ZERO,
        };
        let mut calls = 0;
        let result = policy.run("save", || {
            calls += 1;
            if calls < 3 {
                Err(RepositoryError::Database("locked".into()))
            } else {
                Ok(calls)
            }
        });
        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn test_gives_up_after_max_attempts() {
        let policy = PersistencePolicy {
            max_attempts: 2,
            retry_delay: Duration::ZERO,
        };
        let mut calls = 0;
        let result: Result<(), _> = policy.run("save", || {
            calls += 1;
            Err(RepositoryError::Database("disk full".into()))
        });
        assert!(result.is_err());
        assert_eq!(calls, 2);
    }
}
