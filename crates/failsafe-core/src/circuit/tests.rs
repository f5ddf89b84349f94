//! Tests for circuit breaker transitions

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::circuit::{CircuitBreaker, CircuitBreakerSettings, CircuitState, RollingWindow};
use crate::clock::ManualClock;

fn settings() -> CircuitBreakerSettings {
    CircuitBreakerSettings::default()
        .with_failure_rate_threshold(0.5)
        .with_minimum_executions(4)
        .with_window(RollingWindow::Count { size: 4 })
        .with_delay(Duration::from_secs(30))
}

fn breaker_with_clock(settings: CircuitBreakerSettings) -> (CircuitBreaker, ManualClock) {
    let clock = ManualClock::new();
    let breaker = CircuitBreaker::with_clock(settings, Arc::new(clock.clone())).unwrap();
    (breaker, clock)
}

fn trip(breaker: &CircuitBreaker) {
    for _ in 0..4 {
        breaker.record_failure();
    }
    assert_eq!(breaker.state(), CircuitState::Open);
}

// ============================================================================
// Closed -> Open
// ============================================================================

#[test]
fn test_half_failures_keep_breaker_closed() {
    let orders: [[bool; 4]; 3] = [
        [true, true, false, false],
        [false, false, true, true],
        [true, false, true, false],
    ];
    for order in orders {
        let breaker = CircuitBreaker::new(settings()).unwrap();
        for failed in order {
            breaker.record_execution(failed, Duration::ZERO);
        }
        assert_eq!(breaker.state(), CircuitState::Closed, "order {:?}", order);
    }
}

#[test]
fn test_three_of_four_failures_open_breaker() {
    let orders: [[bool; 4]; 3] = [
        [true, true, true, false],
        [false, true, true, true],
        [true, false, true, true],
    ];
    for order in orders {
        let breaker = CircuitBreaker::new(settings()).unwrap();
        for failed in order {
            breaker.record_execution(failed, Duration::ZERO);
        }
        assert_eq!(breaker.state(), CircuitState::Open, "order {:?}", order);
        assert!(!breaker.allows_execution());
    }
}

#[test]
fn test_minimum_executions_floor() {
    let breaker = CircuitBreaker::new(settings()).unwrap();
    for _ in 0..3 {
        breaker.record_failure();
    }
    assert!(breaker.is_closed());

    breaker.record_failure();
    assert!(breaker.is_open());
}

#[test]
fn test_slow_success_counts_as_failure() {
    let breaker = CircuitBreaker::new(settings().with_timeout(Duration::from_millis(100))).unwrap();
    for _ in 0..4 {
        breaker.record_execution(false, Duration::from_millis(150));
    }
    assert!(breaker.is_open());
    assert_eq!(breaker.metrics().total_failures, 4);
}

#[test]
fn test_time_window_forgets_old_failures() {
    let (breaker, clock) = breaker_with_clock(
        settings().with_window(RollingWindow::Time {
            duration: Duration::from_secs(10),
        }),
    );
    for _ in 0..3 {
        breaker.record_failure();
    }
    clock.advance(Duration::from_secs(11));
    breaker.record_failure();
    breaker.record_success();
    breaker.record_success();
    breaker.record_success();

    assert!(breaker.is_closed());
    let metrics = breaker.metrics();
    assert_eq!(metrics.window_failures, 1);
    assert_eq!(metrics.window_successes, 3);
}

// ============================================================================
// Open -> Half-open -> Closed/Open
// ============================================================================

#[test]
fn test_half_open_only_after_delay() {
    let (breaker, clock) = breaker_with_clock(settings());
    trip(&breaker);

    clock.advance(Duration::from_secs(29));
    assert!(!breaker.allows_execution());
    assert!(breaker.is_open());

    clock.advance(Duration::from_secs(1));
    assert!(breaker.allows_execution());
    assert!(breaker.is_half_open());
}

#[test]
fn test_state_query_does_not_transition() {
    let (breaker, clock) = breaker_with_clock(settings());
    trip(&breaker);

    clock.advance(Duration::from_secs(60));
    assert!(breaker.is_open());
}

#[test]
fn test_half_open_success_threshold_closes() {
    let (breaker, clock) = breaker_with_clock(settings().with_success_threshold(2));
    trip(&breaker);
    clock.advance(Duration::from_secs(30));
    assert!(breaker.allows_execution());

    breaker.record_success();
    assert!(breaker.is_half_open());
    breaker.record_success();
    assert!(breaker.is_closed());

    let metrics = breaker.metrics();
    assert_eq!(metrics.window_successes + metrics.window_failures, 0);
}

#[test]
fn test_half_open_failure_reopens_and_restarts_delay() {
    let (breaker, clock) = breaker_with_clock(settings());
    trip(&breaker);
    clock.advance(Duration::from_secs(30));
    assert!(breaker.allows_execution());

    clock.advance(Duration::from_secs(5));
    breaker.record_failure();
    assert!(breaker.is_open());

    clock.advance(Duration::from_secs(29));
    assert!(!breaker.allows_execution());
    clock.advance(Duration::from_secs(1));
    assert!(breaker.allows_execution());
}

#[test]
fn test_half_open_probe_budget() {
    let (breaker, clock) = breaker_with_clock(settings().with_half_open_max_probes(2));
    trip(&breaker);
    clock.advance(Duration::from_secs(30));

    assert!(breaker.allows_execution());
    breaker.before_execution();
    assert!(breaker.allows_execution());
    breaker.before_execution();
    assert!(!breaker.allows_execution());

    breaker.record_success();
    assert!(breaker.is_closed());
    assert!(breaker.allows_execution());
}

#[test]
fn test_released_slot_restores_half_open_budget() {
    let breaker = CircuitBreaker::new(settings()).unwrap();
    breaker.half_open();

    let slot = breaker.acquire_slot().unwrap();
    assert!(!breaker.allows_execution());
    breaker.release_slot(slot);
    assert!(breaker.allows_execution());
    assert!(breaker.is_half_open());
    assert_eq!(breaker.metrics().total_successes, 0);
    assert_eq!(breaker.metrics().total_failures, 0);
}

#[test]
fn test_slot_from_earlier_half_open_period_is_stale() {
    let breaker = CircuitBreaker::new(settings().with_success_threshold(2)).unwrap();
    breaker.half_open();
    let stale = breaker.acquire_slot().unwrap();

    breaker.open();
    breaker.half_open();
    let current = breaker.acquire_slot().unwrap();
    assert_ne!(stale, current);

    breaker.release_slot(stale);
    assert!(!breaker.allows_execution());

    // A late outcome from the earlier period counts but frees nothing
    breaker.record_attempt(false, Duration::ZERO, Some(stale));
    assert!(breaker.is_half_open());
    assert!(!breaker.allows_execution());

    breaker.record_attempt(false, Duration::ZERO, Some(current));
    assert!(breaker.is_closed());
}

#[test]
fn test_closed_breaker_hands_out_no_slot() {
    let breaker = CircuitBreaker::new(settings()).unwrap();
    assert!(breaker.acquire_slot().is_none());
}

#[test]
fn test_late_outcome_while_open_is_ignored_by_window() {
    let breaker = CircuitBreaker::new(settings()).unwrap();
    trip(&breaker);
    breaker.record_success();

    assert!(breaker.is_open());
    let metrics = breaker.metrics();
    assert_eq!(metrics.total_successes, 1);
    assert_eq!(metrics.window_successes, 0);
}

// ============================================================================
// Manual control, initialization and listeners
// ============================================================================

#[test]
fn test_manual_transitions() {
    let breaker = CircuitBreaker::new(settings()).unwrap();
    breaker.open();
    assert!(breaker.is_open());
    breaker.half_open();
    assert!(breaker.is_half_open());
    breaker.close();
    assert!(breaker.is_closed());
}

#[test]
fn test_initialize_is_idempotent() {
    let breaker = CircuitBreaker::new(settings()).unwrap();
    breaker.initialize();
    breaker.record_failure();
    breaker.record_failure();
    breaker.initialize();

    assert_eq!(breaker.metrics().window_failures, 2);
    assert!(breaker.is_closed());
}

#[test]
fn test_state_listeners_fire_on_change_only() {
    let (breaker, clock) = breaker_with_clock(settings());
    let opened = Arc::new(AtomicU32::new(0));
    let half_opened = Arc::new(AtomicU32::new(0));
    let closed = Arc::new(AtomicU32::new(0));
    {
        let (o, h, c) = (opened.clone(), half_opened.clone(), closed.clone());
        breaker
            .on_open(move || {
                o.fetch_add(1, Ordering::SeqCst);
            })
            .on_half_open(move || {
                h.fetch_add(1, Ordering::SeqCst);
            })
            .on_close(move || {
                c.fetch_add(1, Ordering::SeqCst);
            });
    }

    trip(&breaker);
    breaker.open();
    clock.advance(Duration::from_secs(30));
    assert!(breaker.allows_execution());
    breaker.record_success();

    assert_eq!(opened.load(Ordering::SeqCst), 1);
    assert_eq!(half_opened.load(Ordering::SeqCst), 1);
    assert_eq!(closed.load(Ordering::SeqCst), 1);
}

#[test]
fn test_listener_may_query_breaker() {
    let breaker = Arc::new(CircuitBreaker::new(settings()).unwrap());
    let seen = Arc::new(parking_lot::Mutex::new(None));
    {
        let inner = Arc::downgrade(&breaker);
        let seen = seen.clone();
        breaker.on_open(move || {
            if let Some(breaker) = inner.upgrade() {
                *seen.lock() = Some(breaker.state());
            }
        });
    }

    trip(&breaker);
    assert_eq!(*seen.lock(), Some(CircuitState::Open));
}

#[test]
fn test_panicking_state_listener_is_isolated() {
    let breaker = CircuitBreaker::new(settings()).unwrap();
    let opened = Arc::new(AtomicU32::new(0));
    {
        let counted = opened.clone();
        breaker
            .on_open(|| panic!("listener bug"))
            .on_open(move || {
                counted.fetch_add(1, Ordering::SeqCst);
            });
    }

    trip(&breaker);
    assert!(breaker.is_open());
    assert_eq!(opened.load(Ordering::SeqCst), 1);

    breaker.close();
    assert!(breaker.allows_execution());
}

#[test]
fn test_rejections_are_counted() {
    let breaker = CircuitBreaker::new(settings()).unwrap();
    trip(&breaker);
    assert!(!breaker.allows_execution());
    assert!(!breaker.allows_execution());
    assert_eq!(breaker.metrics().rejections, 2);
}

#[test]
fn test_invalid_settings_rejected() {
    assert!(CircuitBreaker::new(settings().with_failure_rate_threshold(1.0)).is_err());
    assert!(CircuitBreaker::new(settings().with_failure_rate_threshold(-0.1)).is_err());
    assert!(CircuitBreaker::new(settings().with_success_threshold(0)).is_err());
    assert!(CircuitBreaker::new(settings().with_half_open_max_probes(0)).is_err());
    assert!(CircuitBreaker::new(settings().with_window(RollingWindow::Count { size: 2 })).is_err());
    assert!(CircuitBreaker::new(settings().with_window(RollingWindow::Time {
        duration: Duration::ZERO
    }))
    .is_err());
}

// ============================================================================
// Concurrency
// ============================================================================

#[test]
fn test_concurrent_records_are_all_counted() {
    let breaker = Arc::new(
        CircuitBreaker::new(
            CircuitBreakerSettings::default()
                .with_failure_rate_threshold(0.99)
                .with_minimum_executions(1000)
                .with_window(RollingWindow::Count { size: 1000 }),
        )
        .unwrap(),
    );

    let handles: Vec<_> = (0..8)
        .map(|worker| {
            let breaker = breaker.clone();
            thread::spawn(move || {
                for i in 0..500 {
                    if (worker + i) % 2 == 0 {
                        breaker.record_failure();
                    } else {
                        breaker.record_success();
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let metrics = breaker.metrics();
    assert_eq!(metrics.total_failures + metrics.total_successes, 4000);
    assert_eq!(metrics.total_failures, 2000);
    assert_eq!(metrics.window_failures + metrics.window_successes, 1000);
}
