//! # Intent Lock Store
//!
//! A session declares its goal and scope up front; the declaration is
//! persisted as one JSON file bound to a passphrase hash. While the lock
//! file exists the session is "locked": evaluation enforces the declared
//! scope, and removing the file ends the session.
//!
//! Readers tolerate a missing or corrupt file by reporting "absent";
//! the engine treats absence as a reason to challenge, not to trust.
//!
//! ## Security Notes
//!
//! - The passphrase is stored only as a SHA-256 hash.
//! - Passphrase verification compares hashes in constant time.
//! - Scope checks are lexical; the path check normalizes `.`/`..`
//!   components before prefix testing so traversal cannot slip past the
//!   allow list.

use std::path::{Component, Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::Result;

/// One allow-listed command shape: a literal substring, or a regex when
/// tagged as such in the scope JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandRule {
    /// Plain substring match.
    Literal(String),
    /// Tagged regex match: `{"regex": "^git\\s"}`.
    Regex {
        /// The expression, compiled per check.
        regex: String,
    },
}

impl CommandRule {
    /// Whether the rule admits `text`.
    ///
    /// A regex that fails to compile admits nothing; scope stays closed.
    pub fn matches(&self, text: &str) -> bool {
        match self {
            CommandRule::Literal(lit) => text.contains(lit.as_str()),
            CommandRule::Regex { regex } => Regex::new(regex)
                .map(|re| re.is_match(text))
                .unwrap_or(false),
        }
    }
}

/// The allow-lists bound to a locked session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntentScope {
    /// Filesystem prefixes the session may touch.
    #[serde(default)]
    pub allow_paths: Vec<String>,
    /// Command shapes the session may run.
    #[serde(default)]
    pub allow_commands: Vec<CommandRule>,
    /// Host substrings the session may reach.
    #[serde(default)]
    pub allow_network_targets: Vec<String>,
}

impl IntentScope {
    /// Path check: the target, made absolute against `repo_root` and
    /// lexically normalized, must stay under `repo_root` and under at
    /// least one allow-listed prefix.
    pub fn permits_path(&self, target: &str, repo_root: &Path) -> bool {
        let root = normalize(repo_root);
        let candidate = Path::new(target);
        let absolute = if candidate.is_absolute() {
            normalize(candidate)
        } else {
            normalize(&repo_root.join(candidate))
        };
        if !absolute.starts_with(&root) {
            return false;
        }
        self.allow_paths.iter().any(|allowed| {
            let allowed_path = Path::new(allowed);
            let allowed_abs = if allowed_path.is_absolute() {
                normalize(allowed_path)
            } else {
                normalize(&repo_root.join(allowed_path))
            };
            absolute.starts_with(&allowed_abs)
        })
    }

    /// Network check: the target must contain at least one allow-listed
    /// host substring.
    pub fn permits_network(&self, target: &str) -> bool {
        self.allow_network_targets
            .iter()
            .any(|host| target.contains(host.as_str()))
    }

    /// Command check: the text must match at least one rule.
    pub fn permits_command(&self, text: &str) -> bool {
        self.allow_commands.iter().any(|rule| rule.matches(text))
    }
}

/// The persisted lock record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentLock {
    /// Who locked the session.
    pub user_id: String,
    /// The declared goal.
    pub intent_text: String,
    /// The allow-lists.
    pub scope: IntentScope,
    /// Hex SHA-256 of the passphrase.
    pub passphrase_hash: String,
    /// Milliseconds since the epoch at lock time.
    pub created_at: u64,
}

/// File-backed store for the single process-wide lock.
#[derive(Debug, Clone)]
pub struct IntentStore {
    path: PathBuf,
}

impl IntentStore {
    /// Store at the given lock-file path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The lock-file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the lock. Overwrites any existing lock.
    pub fn set(
        &self,
        user_id: &str,
        passphrase: &str,
        intent_text: &str,
        scope: IntentScope,
    ) -> Result<IntentLock> {
        let lock = IntentLock {
            user_id: user_id.to_string(),
            intent_text: intent_text.to_string(),
            scope,
            passphrase_hash: hash_passphrase(passphrase),
            created_at: now_ms(),
        };
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(&self.path, serde_json::to_vec_pretty(&lock)?)?;
        Ok(lock)
    }

    /// Read the lock; a missing or unparseable file is "absent".
    pub fn load(&self) -> Option<IntentLock> {
        let bytes = std::fs::read(&self.path).ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    /// Remove the lock file. Missing file is fine.
    pub fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Compare an attempt against the stored hash in constant time.
    /// Absent lock verifies false.
    pub fn verify_passphrase(&self, attempt: &str) -> bool {
        match self.load() {
            Some(lock) => constant_time_eq(&hash_passphrase(attempt), &lock.passphrase_hash),
            None => false,
        }
    }
}

/// Hex SHA-256 of a passphrase.
pub fn hash_passphrase(passphrase: &str) -> String {
    hex::encode(Sha256::digest(passphrase.as_bytes()))
}

/// Byte-wise constant-time equality over the two hex digests.
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes()
        .zip(b.bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

/// Lexical normalization: resolve `.` and `..` without touching the
/// filesystem, so nonexistent targets still check correctly.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
