//! # CORD Audit - Persistence and Integrity
//!
//! The durable half of the CORD governance layer: a tamper-evident
//! journal of every decision, the PII redaction that runs in front of it,
//! optional encryption at rest, and the intent-lock store that binds a
//! session to its declared scope.
//!
//! ## Guarantees
//!
//! | Property | Mechanism |
//! |----------|-----------|
//! | Tamper evidence | SHA-256 hash chain over canonical JSON |
//! | Total order | Append-only JSONL; prev hash re-read per append |
//! | Privacy | `none`/`pii`/`full` redaction before hashing |
//! | Confidentiality at rest | AES-256-GCM, fresh IV per line |
//! | Scope binding | Single lock file with passphrase hash |
//!
//! ## Usage
//!
//! ```rust
//! use cord_audit::{AuditLog, AuditRecord, RedactionLevel};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let mut log = AuditLog::new(dir.path().join("audit.jsonl"), RedactionLevel::Pii, None);
//!
//! let record = AuditRecord {
//!     decision: "BLOCK".to_string(),
//!     score: 12.0,
//!     hard_block: false,
//!     ..Default::default()
//! };
//! let log_id = log.append(&record).unwrap();
//! assert_eq!(log.verify_chain().unwrap(), 1);
//! assert_eq!(log_id.len(), 64);
//! ```
//!
//! ## References
//!
//! - **RFC 8785** - JSON Canonicalization Scheme
//! - **RFC 6962** - Certificate Transparency (append-only verifiable logs)
//! - **NIST SP 800-38D** - GCM mode

pub mod canonicalize;
pub mod chain;
pub mod crypto;
pub mod error;
pub mod intent;
pub mod redact;

pub use chain::{AuditEntry, AuditLog, AuditRecord, GENESIS};
pub use crypto::{EncryptedRecord, LogCipher};
pub use error::{AuditError, Result};
pub use intent::{hash_passphrase, CommandRule, IntentLock, IntentScope, IntentStore};
pub use redact::{RedactionLevel, Redactor};
