//! Error types for the CORD engine.

use cord_audit::AuditError;
use cord_vigil::{Decision, VigilError};
use thiserror::Error;

/// Engine error surface.
///
/// Policy outcomes (`PolicyBlocked`) only arise through the guarded entry
/// point; plain evaluation reports blocks in the verdict, not as errors.
/// Rate and circuit rejections are retryable state errors and are never
/// written to the audit chain.
#[derive(Debug, Error)]
pub enum CordError {
    /// A guarded evaluation reached a `Block` decision.
    #[error("policy blocked: {decision} (score {score:.1})")]
    PolicyBlocked {
        /// The blocking decision (always `Block`).
        decision: Decision,
        /// The verdict score.
        score: f64,
        /// The verdict reasons.
        reasons: Vec<String>,
    },

    /// The rate limiter denied this evaluation. Retry after the deadline.
    #[error("rate limited ({reason}): retry after {retry_after_ms} ms")]
    RateLimited {
        /// Limiter reason string (`bucket_empty`, `session_limit`, ...).
        reason: String,
        /// Milliseconds until a retry can succeed.
        retry_after_ms: u64,
    },

    /// The circuit breaker is open. Retry after the deadline.
    #[error("circuit open: retry after {retry_after_ms} ms")]
    CircuitOpen {
        /// Milliseconds until the breaker enters probation.
        retry_after_ms: u64,
    },

    /// Persistence failure, including chain verification breaks.
    #[error(transparent)]
    Audit(#[from] AuditError),

    /// Patrol configuration failure.
    #[error(transparent)]
    Vigil(#[from] VigilError),

    /// Invalid engine configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Result alias for engine operations.
pub type Result<T> = std::result::Result<T, CordError>;
