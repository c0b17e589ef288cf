//! # Core Types for the Threat Patrol
//!
//! This module defines the fundamental data types shared across the patrol
//! subsystem and the CORD engine: the four-valued policy decision, the threat
//! taxonomy, individual threat records, and the scan result contract.
//!
//! ## Threat Model
//!
//! The taxonomy encodes the attack classes the patrol detects:
//!
//! - **OWASP LLM Top 10 (2023)** - Industry-standard vulnerability classification
//! - **MITRE ATLAS** - Adversarial Threat Landscape for AI Systems
//! - **Academic Literature** - Perez & Ribeiro, Greshake et al. prompt injection research
//!
//! A fixed subset of categories is *critical*: their mere detection forces a
//! `Block` decision regardless of the aggregate severity score.
//!
//! ## Design Principles
//!
//! 1. **Exhaustive Classification** - Every detected threat maps to a category
//! 2. **Ordered Decisions** - `Decision` is totally ordered by restrictiveness,
//!    so escalation is `decision.max(Decision::Challenge)`
//! 3. **Serializable** - All types derive Serde traits for audit trails
//!
//! ## References
//!
//! - OWASP LLM Top 10: <https://owasp.org/www-project-top-10-for-large-language-model-applications/>
//! - MITRE ATLAS: <https://atlas.mitre.org/>

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::memory::MemoryAssessment;

/// Score assigned to hard-blocked verdicts in place of the weighted sum.
pub const SENTINEL_SCORE: f64 = 99.0;

/// A policy decision, ordered from least to most restrictive.
///
/// Exactly four values exist, serialized as the uppercase strings
/// `ALLOW`, `CONTAIN`, `CHALLENGE`, `BLOCK`.
///
/// The ordering is load-bearing: upgrading a decision to "at least
/// challenge" is expressed as `decision.max(Decision::Challenge)`, which
/// leaves a `Block` untouched.
///
/// # Example
///
/// ```rust
/// use cord_vigil::Decision;
///
/// let d = Decision::Contain;
/// assert_eq!(d.max(Decision::Challenge), Decision::Challenge);
/// assert_eq!(Decision::Block.max(Decision::Challenge), Decision::Block);
/// assert_eq!(serde_json::to_string(&Decision::Allow).unwrap(), "\"ALLOW\"");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Decision {
    /// Proposal is safe to execute as-is.
    #[serde(rename = "ALLOW")]
    Allow,

    /// Proposal may proceed only inside a restricted container.
    #[serde(rename = "CONTAIN")]
    Contain,

    /// Proposal requires an out-of-band confirmation before proceeding.
    #[serde(rename = "CHALLENGE")]
    Challenge,

    /// Proposal must not execute.
    #[serde(rename = "BLOCK")]
    Block,
}

impl Decision {
    /// The canonical uppercase wire string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Allow => "ALLOW",
            Decision::Contain => "CONTAIN",
            Decision::Challenge => "CHALLENGE",
            Decision::Block => "BLOCK",
        }
    }

    /// Returns true for `Block`.
    #[inline]
    pub fn is_block(&self) -> bool {
        matches!(self, Decision::Block)
    }

    /// Returns true for `Allow`.
    #[inline]
    pub fn is_allow(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Threat categories detected by the pattern scanner and the patrol.
///
/// The set is closed. Four categories are *critical* (see
/// [`ThreatCategory::is_critical`]): detecting any of them forces the scan
/// decision to `Block` regardless of severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatCategory {
    /// Prompt/SQL/shell injection keywords and instruction-override phrases.
    Injection,
    /// Outbound transfer verbs, post/beacon APIs, netcat/scp to remote hosts.
    Exfil,
    /// Deception, coercion and social engineering verbs.
    Manipulation,
    /// Active usage of decode/eval functions and escape sequences.
    Obfuscation,
    /// Destructive shell and SQL patterns, system file paths, fork bombs.
    DangerousOps,
    /// Domain keywords, raw-IP URLs, `.onion`, known tunnel hosts.
    SuspiciousUrls,
    /// Multi-agent manipulation, tool-chain hijack, sandbox escape.
    AgentAttacks,
    /// Instructions targeting the AI embedded inside untrusted data.
    IndirectInjection,
    /// Agent-to-agent, tool chain, MCP poisoning, autonomous-agent patterns.
    EmergingThreat,
    /// A planted canary token surfaced in an output.
    Canary,
    /// Content fingerprint-matched a known attack string.
    KnownAttack,
}

/// The categories whose mere detection forces a `Block`.
pub const CRITICAL_CATEGORIES: [ThreatCategory; 4] = [
    ThreatCategory::Injection,
    ThreatCategory::Exfil,
    ThreatCategory::Manipulation,
    ThreatCategory::AgentAttacks,
];

impl ThreatCategory {
    /// Whether this category is in the critical set.
    ///
    /// ```rust
    /// use cord_vigil::ThreatCategory;
    ///
    /// assert!(ThreatCategory::Injection.is_critical());
    /// assert!(!ThreatCategory::Obfuscation.is_critical());
    /// ```
    #[inline]
    pub fn is_critical(&self) -> bool {
        CRITICAL_CATEGORIES.contains(self)
    }

    /// The snake_case wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreatCategory::Injection => "injection",
            ThreatCategory::Exfil => "exfil",
            ThreatCategory::Manipulation => "manipulation",
            ThreatCategory::Obfuscation => "obfuscation",
            ThreatCategory::DangerousOps => "dangerous_ops",
            ThreatCategory::SuspiciousUrls => "suspicious_urls",
            ThreatCategory::AgentAttacks => "agent_attacks",
            ThreatCategory::IndirectInjection => "indirect_injection",
            ThreatCategory::EmergingThreat => "emerging_threat",
            ThreatCategory::Canary => "canary",
            ThreatCategory::KnownAttack => "known_attack",
        }
    }
}

impl std::fmt::Display for ThreatCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single detected threat.
///
/// Created by the scanner, owned by the resulting [`ScanResult`], and
/// discarded after logging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Threat {
    /// The category this threat belongs to.
    pub category: ThreatCategory,
    /// Identifier of the pattern that fired.
    pub pattern_id: String,
    /// Distinct trimmed slices of the input that matched.
    pub matches: Vec<String>,
    /// This threat's contribution to the category score.
    pub severity_contribution: f64,
}

/// The outcome of one patrol scan.
///
/// # Invariant
///
/// `has_critical_threat` implies `decision == Decision::Block`. The scanner
/// and the patrol both enforce this before returning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    /// Aggregate severity on a 0-10 scale.
    pub severity: f64,
    /// All detected threats.
    pub threats: Vec<Threat>,
    /// Whether the normalizer found obfuscation constructs in the input.
    pub was_obfuscated: bool,
    /// Whether any detected category is in the critical set.
    pub has_critical_threat: bool,
    /// The patrol-level decision for this input.
    pub decision: Decision,
    /// Short human-readable description of the outcome.
    pub summary: String,
    /// Cross-turn behavioral assessment, when a session was tracked.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_assessment: Option<MemoryAssessment>,
    /// Which subsystem escalated the decision, if any
    /// (`"memory"`, `"canary"`, `"velocity"`, `"fingerprint"`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub escalated_by: Option<String>,
}

impl ScanResult {
    /// A result for input that produced no findings.
    pub fn clean() -> Self {
        Self {
            severity: 0.0,
            threats: Vec::new(),
            was_obfuscated: false,
            has_critical_threat: false,
            decision: Decision::Allow,
            summary: "No threats detected.".to_string(),
            memory_assessment: None,
            escalated_by: None,
        }
    }

    /// Returns true if the decision is `Block`.
    #[inline]
    pub fn is_blocked(&self) -> bool {
        self.decision.is_block()
    }

    /// The distinct categories present in `threats`, in taxonomy order.
    pub fn categories(&self) -> Vec<ThreatCategory> {
        let mut cats: Vec<ThreatCategory> = self.threats.iter().map(|t| t.category).collect();
        cats.sort();
        cats.dedup();
        cats
    }

    /// Whether a planted canary was triggered by this scan.
    pub fn canary_triggered(&self) -> bool {
        self.threats
            .iter()
            .any(|t| t.category == ThreatCategory::Canary)
    }
}

/// Errors surfaced by the patrol subsystem.
///
/// Recoverable conditions (no-match, decode failure) never surface here;
/// they degrade to benign defaults. What remains is configuration damage
/// that would corrupt detection invariants if ignored.
#[derive(Debug, Error)]
pub enum VigilError {
    /// A configured detection pattern does not compile on the host regex
    /// dialect. The patrol fails fast rather than silently dropping it.
    #[error("invalid detection pattern '{pattern_id}': {source}")]
    InvalidPattern {
        /// Identifier of the offending pattern.
        pattern_id: String,
        /// Underlying regex compile error.
        #[source]
        source: regex::Error,
    },

    /// Pattern configuration named a category outside the closed set.
    #[error("unknown threat category '{0}' in pattern configuration")]
    UnknownCategory(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_ordering() {
        assert!(Decision::Allow < Decision::Contain);
        assert!(Decision::Contain < Decision::Challenge);
        assert!(Decision::Challenge < Decision::Block);
    }

    #[test]
    fn test_decision_escalation_via_max() {
        assert_eq!(Decision::Allow.max(Decision::Challenge), Decision::Challenge);
        assert_eq!(Decision::Contain.max(Decision::Challenge), Decision::Challenge);
        assert_eq!(Decision::Block.max(Decision::Challenge), Decision::Block);
    }

    #[test]
    fn test_decision_wire_format() {
        for (d, s) in [
            (Decision::Allow, "\"ALLOW\""),
            (Decision::Contain, "\"CONTAIN\""),
            (Decision::Challenge, "\"CHALLENGE\""),
            (Decision::Block, "\"BLOCK\""),
        ] {
            assert_eq!(serde_json::to_string(&d).unwrap(), s);
            let back: Decision = serde_json::from_str(s).unwrap();
            assert_eq!(back, d);
        }
    }

    #[test]
    fn test_critical_set() {
        assert!(ThreatCategory::Injection.is_critical());
        assert!(ThreatCategory::Exfil.is_critical());
        assert!(ThreatCategory::Manipulation.is_critical());
        assert!(ThreatCategory::AgentAttacks.is_critical());
        assert!(!ThreatCategory::Canary.is_critical());
        assert!(!ThreatCategory::IndirectInjection.is_critical());
    }

    #[test]
    fn test_category_wire_names() {
        assert_eq!(
            serde_json::to_string(&ThreatCategory::DangerousOps).unwrap(),
            "\"dangerous_ops\""
        );
        assert_eq!(ThreatCategory::SuspiciousUrls.as_str(), "suspicious_urls");
    }

    #[test]
    fn test_clean_scan_result() {
        let r = ScanResult::clean();
        assert_eq!(r.decision, Decision::Allow);
        assert!(!r.is_blocked());
        assert!(r.categories().is_empty());
        assert!(!r.canary_triggered());
    }
}
