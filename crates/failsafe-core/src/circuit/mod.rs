//! Circuit breaking
//!
//! A [`CircuitBreaker`] tracks the failure rate of the executions it guards
//! and stops new executions from starting while the rate is too high.
//!
//! - **Closed**: executions run; outcomes fill a rolling window. Once the
//!   window holds `minimum_executions` outcomes and the failure rate rises
//!   above the threshold, the breaker opens.
//! - **Open**: executions are rejected. After `delay`, the next
//!   `allows_execution` check moves the breaker to half-open.
//! - **Half-open**: up to `half_open_max_probes` executions run at once.
//!   `success_threshold` consecutive successes close the breaker; any
//!   failure reopens it.

mod breaker;
mod window;

pub use breaker::{CircuitBreaker, CircuitBreakerMetrics, CircuitBreakerSettings, CircuitState};
pub(crate) use breaker::HalfOpenSlot;
pub use window::RollingWindow;

#[cfg(test)]
mod tests;
