//! Circuit breaker integration tests
//!
//! Drives breakers through real executions: fast-fail while open, recovery
//! through half-open probes, and sharing one breaker across many calls.

mod common;

use common::*;
use failsafe_core::execution::StatsListener;
use failsafe_core::{
    CircuitBreaker, CircuitBreakerSettings, CircuitState, ExecutionError, Failsafe, ManualClock,
    RetryPolicy, RollingWindow, SharedClock, TokioScheduler,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Config = Failsafe<u32, String>;

fn tight_settings() -> CircuitBreakerSettings {
    CircuitBreakerSettings::default()
        .with_minimum_executions(2)
        .with_window(RollingWindow::Count { size: 4 })
        .with_delay(Duration::from_secs(30))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_open_breaker_fails_fast() {
    init_tracing();
    let breaker = Arc::new(CircuitBreaker::new(tight_settings()).unwrap());
    breaker.open();
    let stats = Arc::new(StatsListener::new());

    let calls = Arc::new(AtomicU32::new(0));
    let counted = calls.clone();
    let result = Config::new(TokioScheduler::current().unwrap())
        .with_circuit_breaker(breaker.clone())
        .unwrap()
        .with_listener(stats.clone())
        .execute(move || {
            counted.fetch_add(1, Ordering::SeqCst);
            Ok(1)
        });

    assert!(matches!(result, Err(ExecutionError::CircuitOpen)));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(stats.circuit_rejections(), 1);
    assert_eq!(breaker.metrics().rejections, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failures_trip_breaker_mid_execution() {
    init_tracing();
    let breaker = Arc::new(CircuitBreaker::new(tight_settings()).unwrap());
    let opened = Arc::new(AtomicU32::new(0));
    let counted = opened.clone();
    breaker.on_open(move || {
        counted.fetch_add(1, Ordering::SeqCst);
    });

    let op = Flaky::always_failing();
    let attempt = op.clone();
    let err = Config::new(TokioScheduler::current().unwrap())
        .with_retry_policy(RetryPolicy::new().with_max_retries(10))
        .unwrap()
        .with_circuit_breaker(breaker.clone())
        .unwrap()
        .execute(move || attempt.call())
        .unwrap()
        .await
        .unwrap_err();

    assert!(err.is_circuit_open());
    assert_eq!(op.calls(), 2);
    assert_eq!(breaker.state(), CircuitState::Open);
    assert_eq!(opened.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_recovers_through_half_open_probe() {
    init_tracing();
    let clock = ManualClock::new();
    let shared: SharedClock = Arc::new(clock.clone());
    let breaker =
        Arc::new(CircuitBreaker::with_clock(tight_settings(), shared.clone()).unwrap());
    let transitions = Arc::new(Mutex::new(Vec::new()));
    for (state, log) in [
        (CircuitState::Open, transitions.clone()),
        (CircuitState::HalfOpen, transitions.clone()),
        (CircuitState::Closed, transitions.clone()),
    ] {
        let hook = move || log.lock().unwrap().push(state);
        match state {
            CircuitState::Open => breaker.on_open(hook),
            CircuitState::HalfOpen => breaker.on_half_open(hook),
            CircuitState::Closed => breaker.on_close(hook),
        };
    }

    let failsafe = Config::new(TokioScheduler::current().unwrap())
        .with_circuit_breaker(breaker.clone())
        .unwrap()
        .with_clock(shared);

    breaker.record_failure();
    breaker.record_failure();
    assert!(breaker.is_open());
    assert!(failsafe.execute(|| Ok(1)).unwrap_err().is_circuit_open());

    clock.advance(Duration::from_secs(29));
    assert!(failsafe.execute(|| Ok(1)).unwrap_err().is_circuit_open());
    assert!(breaker.is_open());

    clock.advance(Duration::from_secs(1));
    let value = failsafe.execute(|| Ok(5)).unwrap().await.unwrap();
    assert_eq!(value, 5);
    assert!(breaker.is_closed());
    assert_eq!(
        *transitions.lock().unwrap(),
        vec![CircuitState::Open, CircuitState::HalfOpen, CircuitState::Closed]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shared_breaker_across_concurrent_executions() {
    init_tracing();
    let breaker = Arc::new(
        CircuitBreaker::new(
            CircuitBreakerSettings::default().with_window(RollingWindow::Count { size: 100 }),
        )
        .unwrap(),
    );
    let failsafe = Config::new(TokioScheduler::current().unwrap())
        .with_retry_policy(RetryPolicy::new().with_max_retries(2))
        .unwrap()
        .with_circuit_breaker(breaker.clone())
        .unwrap();

    let futures: Vec<_> = (0..50u32)
        .map(|i| {
            let op = Flaky::succeeding_on(if i % 10 == 0 { 2 } else { 1 });
            failsafe.execute(move || op.call()).unwrap()
        })
        .collect();
    let values = futures::future::join_all(futures).await;

    assert!(values.iter().all(Result::is_ok));
    let metrics = breaker.metrics();
    assert_eq!(metrics.total_successes, 50);
    assert_eq!(metrics.total_failures, 5);
    assert!(breaker.is_closed());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_slow_success_counts_as_failure() {
    init_tracing();
    let breaker = Arc::new(
        CircuitBreaker::new(tight_settings().with_timeout(Duration::from_millis(5))).unwrap(),
    );
    let failsafe = Config::new(TokioScheduler::current().unwrap())
        .with_circuit_breaker(breaker.clone())
        .unwrap();

    for _ in 0..2 {
        let value = failsafe
            .execute(|| {
                std::thread::sleep(Duration::from_millis(20));
                Ok(1)
            })
            .unwrap()
            .await
            .unwrap();
        assert_eq!(value, 1);
    }

    assert!(breaker.is_open());
    assert_eq!(breaker.metrics().total_failures, 2);
}
