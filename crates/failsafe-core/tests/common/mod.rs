//! Common test utilities for failsafe-core integration tests
//!
//! - Tracing setup honoring `RUST_LOG`
//! - Operations that fail a set number of times
//! - A scheduler that refuses work after a budget

#![allow(dead_code)]

use failsafe_core::scheduler::{ScheduledTask, Scheduler, Task, TokioScheduler};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

static TRACING: Once = Once::new();

/// Install a test-friendly subscriber once per test binary
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::registry()
            .with(fmt::layer().with_target(false).with_test_writer())
            .with(filter)
            .try_init();
    });
}

/// An operation that fails until a given attempt
#[derive(Debug, Clone)]
pub struct Flaky {
    calls: Arc<AtomicU32>,
    succeed_on: u32,
}

impl Flaky {
    pub fn succeeding_on(attempt: u32) -> Self {
        Self {
            calls: Arc::new(AtomicU32::new(0)),
            succeed_on: attempt,
        }
    }

    pub fn always_failing() -> Self {
        Self::succeeding_on(u32::MAX)
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Run once, returning the attempt number on success
    pub fn call(&self) -> Result<u32, String> {
        let attempt = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt >= self.succeed_on {
            Ok(attempt)
        } else {
            Err(format!("attempt {} failed", attempt))
        }
    }
}

/// A tokio scheduler that rejects every task after the first `budget`
pub struct BudgetScheduler {
    inner: TokioScheduler,
    remaining: AtomicU32,
}

impl BudgetScheduler {
    pub fn new(budget: u32) -> Self {
        Self {
            inner: TokioScheduler::current().expect("tests run inside a tokio runtime"),
            remaining: AtomicU32::new(budget),
        }
    }
}

impl Scheduler for BudgetScheduler {
    fn schedule(
        &self,
        task: Task,
        delay: Duration,
    ) -> failsafe_core::Result<Box<dyn ScheduledTask>> {
        let granted = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if !granted {
            return Err(failsafe_core::Error::scheduler_rejected("budget exhausted"));
        }
        self.inner.schedule(task, delay)
    }
}

/// Poll `condition` until it holds or a second passes
pub async fn eventually(condition: impl Fn() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
