//! Error types for the audit and intent-lock stores.

use thiserror::Error;

/// Errors surfaced by the persistence layer.
///
/// Recoverable conditions (missing intent lock, unparseable trailing log
/// line) degrade to benign defaults at the call sites and never surface
/// here. What remains would corrupt integrity invariants if ignored.
#[derive(Debug, Error)]
pub enum AuditError {
    /// The journal or lock file could not be read or written.
    #[error("audit I/O failure: {0}")]
    Io(#[from] std::io::Error),

    /// An entry could not be serialized.
    #[error("audit serialization failure: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Chain verification found a broken link. Never silently repaired.
    #[error("audit chain broken at line {line}: expected {expected}, got {got}")]
    ChainBroken {
        /// 1-based line number of the offending entry.
        line: usize,
        /// The hash the chain required.
        expected: String,
        /// The hash actually present.
        got: String,
    },

    /// The configured encryption key is not 32 bytes of hex.
    #[error("invalid log key: {0}")]
    BadKey(String),

    /// Encryption or decryption of a journal line failed.
    #[error("log encryption failure: {0}")]
    Crypto(String),
}

/// Result alias for audit operations.
pub type Result<T> = std::result::Result<T, AuditError>;
