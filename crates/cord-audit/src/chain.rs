//! # Hash-Chained Audit Journal
//!
//! Append-only JSONL file where every entry commits to its predecessor:
//!
//! ```text
//! entry_hash = SHA-256(prev_hash || canonical_json(entry \ {entry_hash}))
//! prev_hash  = previous entry's entry_hash, or "GENESIS" for the first
//! ```
//!
//! Any reordering, deletion or edit of a line breaks every hash after it,
//! so tampering is detectable by a single pass with no external trust
//! anchor beyond the file itself.
//!
//! ## Write path
//!
//! String fields are redacted before the entry is built, the entry is
//! hashed over its canonical JSON, and the line (optionally wrapped with
//! AES-256-GCM) is appended. The previous hash is re-read from the file
//! tail just before each append, so multiple openers of the same file
//! stay chained.
//!
//! ## Environment
//!
//! - `CORD_LOG_PATH` - journal location
//! - `CORD_LOG_REDACTION` - `none` | `pii` | `full` (default `pii`)
//! - `CORD_LOG_KEY` - 64 hex chars enabling encryption at rest

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::canonicalize::hash_with_prefix;
use crate::crypto::{EncryptedRecord, LogCipher};
use crate::error::{AuditError, Result};
use crate::redact::{RedactionLevel, Redactor};

/// Chain anchor for the first entry.
pub const GENESIS: &str = "GENESIS";

/// What the engine hands the journal for one decision.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Decision string (`ALLOW` | `CONTAIN` | `CHALLENGE` | `BLOCK`).
    pub decision: String,
    /// Final score.
    pub score: f64,
    /// Per-dimension risk values.
    pub risks: BTreeMap<String, f64>,
    /// Reason strings accumulated by the pipeline.
    pub reasons: Vec<String>,
    /// Proposal text (redacted before storage).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proposal: Option<String>,
    /// Filesystem target, if any (redacted before storage).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Network target, if any (redacted before storage).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_target: Option<String>,
    /// Whether a hard-block gate produced this decision.
    pub hard_block: bool,
}

/// One persisted journal entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Milliseconds since the epoch at append time.
    pub timestamp: u64,
    /// The previous entry's hash, or [`GENESIS`].
    pub prev_hash: String,
    /// Decision string.
    pub decision: String,
    /// Final score.
    pub score: f64,
    /// Per-dimension risk values.
    pub risks: BTreeMap<String, f64>,
    /// Reason strings.
    pub reasons: Vec<String>,
    /// Redacted proposal text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proposal: Option<String>,
    /// Redacted filesystem target.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Redacted network target.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_target: Option<String>,
    /// Whether a hard-block gate produced this decision.
    pub hard_block: bool,
    /// This entry's chain hash.
    pub entry_hash: String,
}

/// The append-only journal.
pub struct AuditLog {
    path: PathBuf,
    redactor: Redactor,
    cipher: Option<LogCipher>,
}

impl AuditLog {
    /// Journal at an explicit path with explicit settings.
    pub fn new(path: impl Into<PathBuf>, level: RedactionLevel, cipher: Option<LogCipher>) -> Self {
        Self {
            path: path.into(),
            redactor: Redactor::new(level),
            cipher,
        }
    }

    /// Journal configured from the environment, with `default_path` used
    /// when `CORD_LOG_PATH` is unset.
    ///
    /// # Errors
    ///
    /// A malformed `CORD_LOG_KEY` is a configuration error and is raised;
    /// an unknown redaction level degrades to the `pii` default.
    pub fn from_env(default_path: impl Into<PathBuf>) -> Result<Self> {
        let path = std::env::var("CORD_LOG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_path.into());
        let level = std::env::var("CORD_LOG_REDACTION")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or_default();
        let cipher = match std::env::var("CORD_LOG_KEY") {
            Ok(key) if !key.trim().is_empty() => Some(LogCipher::from_hex(&key)?),
            _ => None,
        };
        Ok(Self::new(path, level, cipher))
    }

    /// The journal path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether entries are encrypted at rest.
    pub fn is_encrypted(&self) -> bool {
        self.cipher.is_some()
    }

    /// Append one record; returns the new entry's hash (the caller's
    /// `log_id`).
    pub fn append(&mut self, record: &AuditRecord) -> Result<String> {
        let prev_hash = self.read_last_hash()?;

        let entry = AuditEntry {
            timestamp: now_ms(),
            prev_hash: prev_hash.clone(),
            decision: record.decision.clone(),
            score: record.score,
            risks: record.risks.clone(),
            reasons: record.reasons.clone(),
            proposal: record.proposal.as_deref().map(|v| self.redactor.redact(v)),
            path: record.path.as_deref().map(|v| self.redactor.redact(v)),
            network_target: record
                .network_target
                .as_deref()
                .map(|v| self.redactor.redact(v)),
            hard_block: record.hard_block,
            entry_hash: String::new(),
        };

        let entry_hash = hash_entry(&entry)?;
        let entry = AuditEntry { entry_hash: entry_hash.clone(), ..entry };

        let plaintext = serde_json::to_string(&entry)?;
        let line = match &self.cipher {
            Some(cipher) => serde_json::to_string(&cipher.encrypt(&plaintext)?)?,
            None => plaintext,
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{line}")?;
        Ok(entry_hash)
    }

    /// Walk the whole journal and verify every link.
    ///
    /// Returns the number of verified entries. Fails on the first hash
    /// mismatch or unparseable line; a broken chain is surfaced, never
    /// silently repaired.
    pub fn verify_chain(&self) -> Result<usize> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            // An absent journal is an empty, valid chain.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut expected_prev = GENESIS.to_string();
        let mut count = 0usize;

        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry = self.parse_line(&line, idx + 1)?;

            if entry.prev_hash != expected_prev {
                return Err(AuditError::ChainBroken {
                    line: idx + 1,
                    expected: expected_prev,
                    got: entry.prev_hash,
                });
            }
            let recomputed = hash_entry(&AuditEntry {
                entry_hash: String::new(),
                ..entry.clone()
            })?;
            if recomputed != entry.entry_hash {
                return Err(AuditError::ChainBroken {
                    line: idx + 1,
                    expected: recomputed,
                    got: entry.entry_hash,
                });
            }
            expected_prev = entry.entry_hash;
            count += 1;
        }
        Ok(count)
    }

    /// Read all entries (decrypting if keyed). Intended for operational
    /// tooling; the engine itself only appends.
    pub fn read_entries(&self) -> Result<Vec<AuditEntry>> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut entries = Vec::new();
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            entries.push(self.parse_line(&line, idx + 1)?);
        }
        Ok(entries)
    }

    fn parse_line(&self, line: &str, line_no: usize) -> Result<AuditEntry> {
        if let Ok(record) = serde_json::from_str::<EncryptedRecord>(line) {
            if record.encrypted {
                let cipher = self.cipher.as_ref().ok_or_else(|| {
                    AuditError::Crypto(format!("line {line_no} is encrypted but no key is configured"))
                })?;
                let plain = cipher.decrypt(&record)?;
                return Ok(serde_json::from_str(&plain)?);
            }
        }
        Ok(serde_json::from_str(line)?)
    }

    /// The hash the next entry must chain from.
    ///
    /// Re-reads the file tail so that independent openers stay chained.
    /// An unparseable trailing line degrades to [`GENESIS`] rather than
    /// failing the append.
    fn read_last_hash(&self) -> Result<String> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(GENESIS.to_string()),
            Err(e) => return Err(e.into()),
        };
        let mut last = None;
        for line in BufReader::new(file).lines() {
            let line = line?;
            if !line.trim().is_empty() {
                last = Some(line);
            }
        }
        let Some(line) = last else {
            return Ok(GENESIS.to_string());
        };
        match self.parse_line(&line, 0) {
            Ok(entry) => Ok(entry.entry_hash),
            Err(_) => Ok(GENESIS.to_string()),
        }
    }
}

/// Hash an entry whose `entry_hash` field is empty.
fn hash_entry(entry: &AuditEntry) -> Result<String> {
    let mut value = serde_json::to_value(entry)?;
    if let Some(map) = value.as_object_mut() {
        map.remove("entry_hash");
    }
    Ok(hash_with_prefix(&entry.prev_hash, &value))
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
