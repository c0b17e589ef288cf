//! # Rate Limiter
//!
//! Token bucket plus two sliding windows (per-session and global) with a
//! per-session cooldown. Enforcement happens BEFORE the guarded
//! evaluation; a denied check must halt the caller.
//!
//! ## Model
//!
//! - The bucket refills continuously at `refill_rate` tokens/second up to
//!   `bucket_size`; every check costs one token.
//! - The per-session window allows `session_limit` events per
//!   `session_window_ms`; exceeding it places the session in cooldown for
//!   `cooldown_ms`, during which every check is denied with
//!   `reason = cooldown` and a `retry_after_ms` deadline.
//! - The global window allows `global_limit` events per `global_window_ms`
//!   across all sessions.
//!
//! Denials are state errors for the caller to retry, never policy blocks;
//! they are not written to the audit chain.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Rate limiter configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Token bucket capacity.
    pub bucket_size: f64,
    /// Bucket refill rate in tokens per second.
    pub refill_rate: f64,
    /// Events allowed per session inside the session window.
    pub session_limit: usize,
    /// Width of the per-session sliding window in milliseconds.
    pub session_window_ms: u64,
    /// Events allowed globally inside the global window.
    pub global_limit: usize,
    /// Width of the global sliding window in milliseconds.
    pub global_window_ms: u64,
    /// Cooldown imposed on a session that exceeds its window.
    pub cooldown_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            bucket_size: 32.0,
            refill_rate: 4.0,
            session_limit: 30,
            session_window_ms: 60_000,
            global_limit: 200,
            global_window_ms: 60_000,
            cooldown_ms: 30_000,
        }
    }
}

/// Why a check was denied (or `Ok`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateReason {
    /// Allowed.
    Ok,
    /// The token bucket is empty.
    BucketEmpty,
    /// The per-session sliding window is full.
    SessionLimit,
    /// The global sliding window is full.
    GlobalLimit,
    /// The session is in cooldown after exceeding its window.
    Cooldown,
}

impl RateReason {
    /// The snake_case wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            RateReason::Ok => "ok",
            RateReason::BucketEmpty => "bucket_empty",
            RateReason::SessionLimit => "session_limit",
            RateReason::GlobalLimit => "global_limit",
            RateReason::Cooldown => "cooldown",
        }
    }
}

/// The outcome of one `check`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateDecision {
    /// Whether the caller may proceed.
    pub allowed: bool,
    /// Why, when denied; `Ok` when allowed.
    pub reason: RateReason,
    /// Tokens remaining in the bucket after this check.
    pub remaining: f64,
    /// Deadline hint for a denied caller, when one exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

/// Counters updated on every check. Atomics so that observers reading
/// them concurrently never see torn values.
#[derive(Debug, Default)]
pub struct RateStats {
    /// Total checks performed.
    pub checks: AtomicU64,
    /// Checks that were allowed.
    pub allowed: AtomicU64,
    /// Checks that were denied, any reason.
    pub denied: AtomicU64,
}

impl RateStats {
    /// Snapshot `(checks, allowed, denied)`.
    pub fn snapshot(&self) -> (u64, u64, u64) {
        (
            self.checks.load(Ordering::Relaxed),
            self.allowed.load(Ordering::Relaxed),
            self.denied.load(Ordering::Relaxed),
        )
    }

    fn record(&self, allowed: bool) {
        self.checks.fetch_add(1, Ordering::Relaxed);
        if allowed {
            self.allowed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.denied.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn reset(&self) {
        self.checks.store(0, Ordering::Relaxed);
        self.allowed.store(0, Ordering::Relaxed);
        self.denied.store(0, Ordering::Relaxed);
    }
}

/// The rate limiter.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    tokens: f64,
    last_refill: Instant,
    session_events: HashMap<String, VecDeque<Instant>>,
    global_events: VecDeque<Instant>,
    cooldown_until: HashMap<String, Instant>,
    stats: RateStats,
}

impl RateLimiter {
    /// Limiter with a full bucket.
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            tokens: config.bucket_size,
            last_refill: Instant::now(),
            session_events: HashMap::new(),
            global_events: VecDeque::new(),
            cooldown_until: HashMap::new(),
            stats: RateStats::default(),
        }
    }

    /// Check whether one evaluation may proceed for `session_id`.
    ///
    /// Single unit cost. Checks run in order: cooldown, bucket, session
    /// window, global window. A session-window denial starts the cooldown.
    pub fn check(&mut self, session_id: &str) -> RateDecision {
        let now = Instant::now();

        // Cooldown takes precedence: the deadline was already set.
        if let Some(until) = self.cooldown_until.get(session_id) {
            if now < *until {
                let retry = until.duration_since(now).as_millis() as u64;
                return self.deny(RateReason::Cooldown, Some(retry.max(1)));
            }
            self.cooldown_until.remove(session_id);
        }

        self.refill(now);
        if self.tokens < 1.0 {
            let deficit = 1.0 - self.tokens;
            let retry = ((deficit / self.config.refill_rate) * 1000.0).ceil() as u64;
            return self.deny(RateReason::BucketEmpty, Some(retry.max(1)));
        }

        let session_window = Duration::from_millis(self.config.session_window_ms);
        let events = self.session_events.entry(session_id.to_string()).or_default();
        prune(events, now, session_window);
        if events.len() >= self.config.session_limit {
            self.cooldown_until.insert(
                session_id.to_string(),
                now + Duration::from_millis(self.config.cooldown_ms),
            );
            let retry = self.config.cooldown_ms;
            return self.deny(RateReason::SessionLimit, Some(retry));
        }

        let global_window = Duration::from_millis(self.config.global_window_ms);
        prune(&mut self.global_events, now, global_window);
        if self.global_events.len() >= self.config.global_limit {
            let retry = self
                .global_events
                .front()
                .map(|oldest| {
                    global_window
                        .saturating_sub(now.duration_since(*oldest))
                        .as_millis() as u64
                })
                .unwrap_or(self.config.global_window_ms);
            return self.deny(RateReason::GlobalLimit, Some(retry.max(1)));
        }

        self.tokens -= 1.0;
        self.session_events
            .get_mut(session_id)
            .expect("entry created above")
            .push_back(now);
        self.global_events.push_back(now);
        self.stats.record(true);
        RateDecision {
            allowed: true,
            reason: RateReason::Ok,
            remaining: self.tokens,
            retry_after_ms: None,
        }
    }

    /// The stats counters.
    pub fn stats(&self) -> &RateStats {
        &self.stats
    }

    /// Zero counters and forget window state. Configuration is untouched.
    pub fn reset(&mut self) {
        self.stats.reset();
        self.session_events.clear();
        self.global_events.clear();
        self.cooldown_until.clear();
        self.tokens = self.config.bucket_size;
        self.last_refill = Instant::now();
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.config.refill_rate).min(self.config.bucket_size);
        self.last_refill = now;
    }

    fn deny(&self, reason: RateReason, retry_after_ms: Option<u64>) -> RateDecision {
        self.stats.record(false);
        RateDecision {
            allowed: false,
            reason,
            remaining: self.tokens,
            retry_after_ms,
        }
    }
}

fn prune(events: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(front) = events.front() {
        if now.duration_since(*front) > window {
            events.pop_front();
        } else {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(session_limit: usize, cooldown_ms: u64) -> RateLimitConfig {
        RateLimitConfig {
            bucket_size: 100.0,
            refill_rate: 100.0,
            session_limit,
            session_window_ms: 60_000,
            global_limit: 1_000,
            global_window_ms: 60_000,
            cooldown_ms,
        }
    }

    #[test]
    fn test_allows_up_to_session_limit() {
        let mut limiter = RateLimiter::new(config(5, 1_000));
        for i in 0..5 {
            let d = limiter.check("s");
            assert!(d.allowed, "check {i} should pass");
            assert_eq!(d.reason, RateReason::Ok);
        }
    }

    #[test]
    fn test_session_limit_then_cooldown() {
        let mut limiter = RateLimiter::new(config(5, 1_000));
        for _ in 0..5 {
            assert!(limiter.check("s").allowed);
        }

        let sixth = limiter.check("s");
        assert!(!sixth.allowed);
        assert_eq!(sixth.reason, RateReason::SessionLimit);
        assert_eq!(sixth.retry_after_ms, Some(1_000));

        let seventh = limiter.check("s");
        assert!(!seventh.allowed);
        assert_eq!(seventh.reason, RateReason::Cooldown);
        assert!(seventh.retry_after_ms.unwrap() <= 1_000);
    }

    #[test]
    fn test_sessions_do_not_share_windows() {
        let mut limiter = RateLimiter::new(config(2, 1_000));
        assert!(limiter.check("a").allowed);
        assert!(limiter.check("a").allowed);
        assert!(!limiter.check("a").allowed);
        // A different session is untouched.
        assert!(limiter.check("b").allowed);
    }

    #[test]
    fn test_bucket_empties() {
        let mut limiter = RateLimiter::new(RateLimitConfig {
            bucket_size: 2.0,
            refill_rate: 0.001,
            session_limit: 100,
            session_window_ms: 60_000,
            global_limit: 1_000,
            global_window_ms: 60_000,
            cooldown_ms: 1_000,
        });
        assert!(limiter.check("s").allowed);
        assert!(limiter.check("s").allowed);
        let d = limiter.check("s");
        assert!(!d.allowed);
        assert_eq!(d.reason, RateReason::BucketEmpty);
        assert!(d.retry_after_ms.is_some());
    }

    #[test]
    fn test_global_limit() {
        let mut limiter = RateLimiter::new(RateLimitConfig {
            bucket_size: 100.0,
            refill_rate: 100.0,
            session_limit: 100,
            session_window_ms: 60_000,
            global_limit: 3,
            global_window_ms: 60_000,
            cooldown_ms: 1_000,
        });
        assert!(limiter.check("a").allowed);
        assert!(limiter.check("b").allowed);
        assert!(limiter.check("c").allowed);
        let d = limiter.check("d");
        assert!(!d.allowed);
        assert_eq!(d.reason, RateReason::GlobalLimit);
    }

    #[test]
    fn test_stats_count_allowed_and_denied() {
        let mut limiter = RateLimiter::new(config(1, 1_000));
        limiter.check("s");
        limiter.check("s");
        let (checks, allowed, denied) = limiter.stats().snapshot();
        assert_eq!(checks, 2);
        assert_eq!(allowed, 1);
        assert_eq!(denied, 1);
    }

    #[test]
    fn test_reset_clears_windows_and_stats() {
        let mut limiter = RateLimiter::new(config(1, 60_000));
        limiter.check("s");
        limiter.check("s"); // denied, cooldown armed
        limiter.reset();
        assert!(limiter.check("s").allowed);
        let (checks, ..) = limiter.stats().snapshot();
        assert_eq!(checks, 1);
    }
}
