//! # PII Redaction
//!
//! Journal entries carry proposal text, paths and network targets; all
//! three may contain personal data the log must not retain in the clear.
//! Redaction runs before the entry is hashed, so the chain commits to the
//! redacted form and verification never needs the original.
//!
//! ## Levels
//!
//! - `none` - passthrough
//! - `pii` - substitute SSN, credit card, email and phone matches with
//!   fixed tokens (the default)
//! - `full` - replace the whole string with a hash stub

use std::fmt;
use std::str::FromStr;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// How much of a string field survives into the journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedactionLevel {
    /// Store the field verbatim.
    None,
    /// Substitute recognizable PII with fixed tokens.
    #[default]
    Pii,
    /// Replace the whole field with `<16 hex of SHA-256>…[redacted]`.
    Full,
}

impl FromStr for RedactionLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(RedactionLevel::None),
            "pii" => Ok(RedactionLevel::Pii),
            "full" => Ok(RedactionLevel::Full),
            other => Err(format!("unknown redaction level '{other}'")),
        }
    }
}

impl fmt::Display for RedactionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RedactionLevel::None => "none",
            RedactionLevel::Pii => "pii",
            RedactionLevel::Full => "full",
        })
    }
}

/// PII substitution engine. Regexes compile once at construction.
#[derive(Debug)]
pub struct Redactor {
    level: RedactionLevel,
    ssn: Regex,
    credit_card: Regex,
    email: Regex,
    phone: Regex,
}

impl Redactor {
    /// Redactor for the given level.
    pub fn new(level: RedactionLevel) -> Self {
        Self {
            level,
            ssn: Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").expect("fixed regex"),
            credit_card: Regex::new(r"\b\d{4}[- ]?\d{4}[- ]?\d{4}[- ]?\d{4}\b")
                .expect("fixed regex"),
            email: Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}")
                .expect("fixed regex"),
            phone: Regex::new(r"\b(?:\+?\d{1,2}[-. ])?\(?\d{3}\)?[-. ]?\d{3}[-. ]?\d{4}\b")
                .expect("fixed regex"),
        }
    }

    /// The active level.
    pub fn level(&self) -> RedactionLevel {
        self.level
    }

    /// Redact one string field according to the active level.
    ///
    /// # Example
    ///
    /// ```rust
    /// use cord_audit::redact::{RedactionLevel, Redactor};
    ///
    /// let redactor = Redactor::new(RedactionLevel::Pii);
    /// let out = redactor.redact("mail bob@example.com about 123-45-6789");
    /// assert_eq!(out, "mail [EMAIL] about [SSN]");
    /// ```
    pub fn redact(&self, value: &str) -> String {
        match self.level {
            RedactionLevel::None => value.to_string(),
            RedactionLevel::Pii => {
                // SSN before phone: the two shapes overlap and the more
                // specific token should win.
                let step = self.ssn.replace_all(value, "[SSN]");
                let step = self.credit_card.replace_all(&step, "[CC]");
                let step = self.email.replace_all(&step, "[EMAIL]");
                self.phone.replace_all(&step, "[PHONE]").into_owned()
            }
            RedactionLevel::Full => {
                let digest = hex::encode(Sha256::digest(value.as_bytes()));
                format!("{}…[redacted]", &digest[..16])
            }
        }
    }
}
