//! # Circuit Breaker
//!
//! Failure isolation for externally provided async operations (the
//! caller's LLM or I/O calls). The engine itself never drives these; it
//! only manages the state machine.
//!
//! ## State machine
//!
//! ```text
//!            failures >= failure_threshold
//!   CLOSED ────────────────────────────────► OPEN
//!     ▲                                        │
//!     │ successes >= success_threshold         │ timeout elapsed
//!     │                                        ▼
//!     └──────────────────────────────────  HALF-OPEN
//!                    any failure: back to OPEN
//! ```
//!
//! An idle breaker (no activity for `reset_timeout_ms`) resets itself to
//! closed. Callers that bypass [`CircuitBreaker::execute`] by polling
//! [`CircuitBreaker::allows_requests`] must honor its boolean.

use std::future::Future;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation; failures are counted.
    Closed,
    /// Requests rejected until the timeout elapses.
    Open,
    /// Probation: limited successes close, any failure reopens.
    HalfOpen,
}

/// Breaker configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CircuitConfig {
    /// Consecutive failures that trip the breaker.
    pub failure_threshold: u32,
    /// Consecutive half-open successes that close it again.
    pub success_threshold: u32,
    /// How long the breaker stays open before probation.
    pub timeout_ms: u64,
    /// Idle period after which the breaker resets to closed.
    pub reset_timeout_ms: u64,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout_ms: 30_000,
            reset_timeout_ms: 300_000,
        }
    }
}

/// Rejection or passthrough error from [`CircuitBreaker::execute`].
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// The breaker is open; retry after the deadline.
    #[error("circuit open: retry after {retry_after_ms} ms")]
    Open {
        /// Milliseconds until the breaker enters probation.
        retry_after_ms: u64,
    },
    /// The wrapped operation itself failed.
    #[error("{0}")]
    Inner(E),
}

/// The circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitConfig,
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
    last_activity: Instant,
}

impl CircuitBreaker {
    /// A closed breaker.
    pub fn new(config: CircuitConfig) -> Self {
        Self {
            config,
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            opened_at: None,
            last_activity: Instant::now(),
        }
    }

    /// The current state, after applying time-based transitions.
    pub fn state(&mut self) -> CircuitState {
        self.advance(Instant::now());
        self.state
    }

    /// Whether a request may proceed right now.
    pub fn allows_requests(&mut self) -> bool {
        self.advance(Instant::now());
        self.state != CircuitState::Open
    }

    /// Run `f` under the breaker.
    ///
    /// In open state with the timeout not yet elapsed, rejects with
    /// [`BreakerError::Open`] without invoking `f`. Otherwise invokes `f`
    /// and records the outcome.
    ///
    /// # Example
    ///
    /// ```rust
    /// use cord_vigil::{CircuitBreaker, CircuitConfig};
    ///
    /// tokio_test::block_on(async {
    ///     let mut breaker = CircuitBreaker::new(CircuitConfig::default());
    ///     let out: Result<i32, _> = breaker
    ///         .execute(|| async { Ok::<_, std::io::Error>(7) })
    ///         .await;
    ///     assert_eq!(out.unwrap(), 7);
    /// });
    /// ```
    pub async fn execute<F, Fut, T, E>(&mut self, f: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let now = Instant::now();
        self.advance(now);
        if self.state == CircuitState::Open {
            let retry_after_ms = self
                .opened_at
                .map(|at| {
                    Duration::from_millis(self.config.timeout_ms)
                        .saturating_sub(now.duration_since(at))
                        .as_millis() as u64
                })
                .unwrap_or(self.config.timeout_ms);
            return Err(BreakerError::Open { retry_after_ms });
        }

        match f().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure();
                Err(BreakerError::Inner(e))
            }
        }
    }

    /// Record a success observed outside `execute`.
    pub fn record_success(&mut self) {
        self.touch();
        self.consecutive_failures = 0;
        match self.state {
            CircuitState::HalfOpen => {
                self.consecutive_successes += 1;
                if self.consecutive_successes >= self.config.success_threshold {
                    self.close();
                }
            }
            CircuitState::Closed => {}
            CircuitState::Open => {}
        }
    }

    /// Record a failure observed outside `execute`.
    pub fn record_failure(&mut self) {
        self.touch();
        self.consecutive_successes = 0;
        match self.state {
            CircuitState::HalfOpen => self.trip(),
            CircuitState::Closed => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= self.config.failure_threshold {
                    self.trip();
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Trip the breaker regardless of counters.
    pub fn force_open(&mut self) {
        self.touch();
        self.trip();
    }

    /// Return to closed and zero all counters.
    pub fn reset(&mut self) {
        self.touch();
        self.close();
    }

    fn advance(&mut self, now: Instant) {
        // Idle auto-reset comes first; a long-dormant breaker should not
        // greet its next caller with a stale open state.
        if now.duration_since(self.last_activity)
            >= Duration::from_millis(self.config.reset_timeout_ms)
        {
            self.close();
            self.last_activity = now;
            return;
        }
        if self.state == CircuitState::Open {
            if let Some(at) = self.opened_at {
                if now.duration_since(at) >= Duration::from_millis(self.config.timeout_ms) {
                    self.state = CircuitState::HalfOpen;
                    self.consecutive_successes = 0;
                }
            }
        }
    }

    fn trip(&mut self) {
        self.state = CircuitState::Open;
        self.opened_at = Some(Instant::now());
        self.consecutive_failures = 0;
        self.consecutive_successes = 0;
    }

    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.opened_at = None;
        self.consecutive_failures = 0;
        self.consecutive_successes = 0;
    }

    fn touch(&mut self) {
        self.last_activity = Instant::now();
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> CircuitConfig {
        CircuitConfig {
            failure_threshold: 3,
            success_threshold: 2,
            timeout_ms: 30,
            reset_timeout_ms: 60_000,
        }
    }

    async fn ok() -> Result<u32, &'static str> {
        Ok(1)
    }

    async fn fail() -> Result<u32, &'static str> {
        Err("boom")
    }

    #[test]
    fn test_starts_closed() {
        let mut breaker = CircuitBreaker::new(fast_config());
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.allows_requests());
    }

    #[test]
    fn test_trips_after_threshold_failures() {
        tokio_test::block_on(async {
            let mut breaker = CircuitBreaker::new(fast_config());
            for _ in 0..3 {
                let _ = breaker.execute(fail).await;
            }
            assert_eq!(breaker.state(), CircuitState::Open);
            assert!(!breaker.allows_requests());
        });
    }

    #[test]
    fn test_open_rejects_without_invoking() {
        tokio_test::block_on(async {
            let mut breaker = CircuitBreaker::new(fast_config());
            breaker.force_open();
            let result = breaker.execute(ok).await;
            match result {
                Err(BreakerError::Open { retry_after_ms }) => {
                    assert!(retry_after_ms <= 30);
                }
                other => panic!("expected Open rejection, got {other:?}"),
            }
        });
    }

    #[test]
    fn test_half_open_after_timeout_then_closes() {
        tokio_test::block_on(async {
            let mut breaker = CircuitBreaker::new(fast_config());
            breaker.force_open();
            std::thread::sleep(Duration::from_millis(40));
            assert_eq!(breaker.state(), CircuitState::HalfOpen);

            assert!(breaker.execute(ok).await.is_ok());
            assert_eq!(breaker.state(), CircuitState::HalfOpen);
            assert!(breaker.execute(ok).await.is_ok());
            assert_eq!(breaker.state(), CircuitState::Closed);
        });
    }

    #[test]
    fn test_half_open_failure_reopens() {
        tokio_test::block_on(async {
            let mut breaker = CircuitBreaker::new(fast_config());
            breaker.force_open();
            std::thread::sleep(Duration::from_millis(40));
            assert_eq!(breaker.state(), CircuitState::HalfOpen);

            let _ = breaker.execute(fail).await;
            assert_eq!(breaker.state(), CircuitState::Open);
        });
    }

    #[test]
    fn test_success_resets_failure_streak() {
        tokio_test::block_on(async {
            let mut breaker = CircuitBreaker::new(fast_config());
            let _ = breaker.execute(fail).await;
            let _ = breaker.execute(fail).await;
            let _ = breaker.execute(ok).await;
            let _ = breaker.execute(fail).await;
            let _ = breaker.execute(fail).await;
            // Never three in a row: still closed.
            assert_eq!(breaker.state(), CircuitState::Closed);
        });
    }

    #[test]
    fn test_idle_auto_reset() {
        let mut breaker = CircuitBreaker::new(CircuitConfig {
            failure_threshold: 1,
            success_threshold: 1,
            timeout_ms: 60_000,
            reset_timeout_ms: 20,
        });
        breaker.force_open();
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_manual_reset() {
        let mut breaker = CircuitBreaker::new(fast_config());
        breaker.force_open();
        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }
}
