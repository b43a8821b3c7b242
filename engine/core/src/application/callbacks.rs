// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Synchronous notification channels.
//!
//! A [`Callbacks`] channel delivers each emitted value to its handlers in
//! registration order on the emitting thread. A handler that returns an
//! error or panics is logged and recorded; the remaining handlers still run.
//! Handlers are snapshotted before delivery, so a handler may register new
//! handlers without deadlocking. These take effect from the next emit.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::error;

const MAX_RECORDED_FAILURES: usize = 100;

pub type Handler<T> = Arc<dyn Fn(&T) -> anyhow::Result<()> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackFailure {
    pub channel: String,
    pub handler_index: usize,
    pub message: String,
    pub panicked: bool,
    pub at: DateTime<Utc>,
}

pub struct Callbacks<T> {
    channel: &'static str,
    handlers: RwLock<Vec<Handler<T>>>,
    failures: Mutex<VecDeque<CallbackFailure>>,
    failure_count: AtomicU64,
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

impl<T> Callbacks<T> {
    pub fn new(channel: &'static str) -> Self {
        Self {
            channel,
            handlers: RwLock::new(Vec::new()),
            failures: Mutex::new(VecDeque::new()),
            failure_count: AtomicU64::new(0),
        }
    }

    pub fn channel(&self) -> &'static str {
        self.channel
    }

    pub fn subscribe<F>(&self, handler: F)
    where
        F: Fn(&T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.handlers.write().push(Arc::new(handler));
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `value` to every handler. Returns the number that failed.
    pub fn emit(&self, value: &T) -> usize {
        let handlers: Vec<Handler<T>> = self.handlers.read().clone();
        let mut failed = 0;

        for (index, handler) in handlers.iter().enumerate() {
            let outcome = catch_unwind(AssertUnwindSafe(|| handler(value)));
            let failure = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => (e.to_string(), false),
                Err(payload) => (panic_message(payload.as_ref()), true),
            };
            failed += 1;
            self.record(index, failure.0, failure.1);
        }

        failed
    }

    fn record(&self, handler_index: usize, message: String, panicked: bool) {
        error!(
            channel = self.channel,
            handler_index,
            panicked,
            error = %message,
            "Callback failed"
        );
        metrics::counter!("nightframe_callback_failures_total", "channel" => self.channel).increment(1);
        self.failure_count.fetch_add(1, Ordering::Relaxed);

        let mut failures = self.failures.lock();
        if failures.len() == MAX_RECORDED_FAILURES {
            failures.pop_front();
        }
        failures.push_back(CallbackFailure {
            channel: self.channel.to_string(),
            handler_index,
            message,
            panicked,
            at: Utc::now(),
        });
    }

    /// Most recent failures, oldest first
    pub fn failures(&self) -> Vec<CallbackFailure> {
        self.failures.lock().iter().cloned().collect()
    }

    /// Failures since construction, including those evicted from the log
    pub fn failure_count(&self) -> u64 {
        self.failure_count.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_failures_do_not_block_later_handlers() {
        let callbacks: Callbacks<u32> = Callbacks::new("test");
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s = seen.clone();
        callbacks.subscribe(move |v| {
            s.lock().push(("first", *v));
            Ok(())
        });
        callbacks.subscribe(|_| anyhow::bail!("rejected"));
        callbacks.subscribe(|_| panic!("handler exploded"));
        let s = seen.clone();
        callbacks.subscribe(move |v| {
            s.lock().push(("last", *v));
            Ok(())
        });

        assert_eq!(callbacks.emit(&7), 2);
        assert_eq!(*seen.lock(), vec![("first", 7), ("last", 7)]);

        let failures = callbacks.failures();
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].handler_index, 1);
        assert!(!failures[0].panicked);
        assert_eq!(failures[1].message, "handler exploded");
        assert!(failures[1].panicked);
    }

    #[test]
    fn test_handler_can_subscribe_during_emit() {
        let callbacks: Arc<Callbacks<()>> = Arc::new(Callbacks::new("reentrant"));
        let calls = Arc::new(AtomicUsize::new(0));

        let inner = callbacks.clone();
        let c = calls.clone();
        callbacks.subscribe(move |_| {
            let c = c.clone();
            inner.subscribe(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
            Ok(())
        });

        callbacks.emit(&());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        callbacks.emit(&());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(callbacks.len(), 3);
    }

    #[test]
    fn test_failure_log_is_bounded() {
        let callbacks: Callbacks<()> = Callbacks::new("bounded");
        callbacks.subscribe(|_| anyhow::bail!("nope"));
        for _ in 0..(MAX_RECORDED_FAILURES + 5) {
            callbacks.emit(&());
        }
        assert_eq!(callbacks.failures().len(), MAX_RECORDED_FAILURES);
        assert_eq!(callbacks.failure_count(), (MAX_RECORDED_FAILURES + 5) as u64);
    }
}
