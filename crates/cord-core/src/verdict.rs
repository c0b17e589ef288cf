//! Verdict types: the output of one engine evaluation.

use std::collections::BTreeMap;

use cord_vigil::{Decision, ProactiveScanResult, ScanResult, SENTINEL_SCORE};
use serde::{Deserialize, Serialize};

/// The engine's answer for one proposal.
///
/// # Invariants
///
/// - `decision` is one of the four [`Decision`] values
/// - `0 <= score <= 99`
/// - `hard_block` implies `decision == Block` and `score == 99`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    /// The policy decision.
    pub decision: Decision,
    /// Weighted score, or the sentinel 99 for hard blocks.
    pub score: f64,
    /// Whether a hard-block gate (or patrol pre-scan) produced this.
    pub hard_block: bool,
    /// Per-dimension risk values.
    pub risks: BTreeMap<String, f64>,
    /// Reason strings accumulated through the pipeline.
    pub reasons: Vec<String>,
    /// Hash of the journal entry recording this verdict.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_id: Option<String>,
    /// The patrol pre-scan result, when the patrol ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patrol_result: Option<ScanResult>,
    /// The indirect-injection screen result, when raw input was present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proactive_result: Option<ProactiveScanResult>,
    /// Rendered human-readable explanation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    /// True on a verdict served from the evaluation cache.
    #[serde(default)]
    pub cached: bool,
}

impl Verdict {
    /// A scored verdict before logging and explanation.
    pub fn scored(
        decision: Decision,
        score: f64,
        risks: BTreeMap<String, f64>,
        reasons: Vec<String>,
    ) -> Self {
        Self {
            decision,
            score: score.clamp(0.0, SENTINEL_SCORE),
            hard_block: false,
            risks,
            reasons,
            log_id: None,
            patrol_result: None,
            proactive_result: None,
            explanation: None,
            cached: false,
        }
    }

    /// A hard-block verdict: decision `Block`, sentinel score.
    pub fn hard_block(reason: impl Into<String>, risks: BTreeMap<String, f64>) -> Self {
        Self {
            decision: Decision::Block,
            score: SENTINEL_SCORE,
            hard_block: true,
            risks,
            reasons: vec![reason.into()],
            log_id: None,
            patrol_result: None,
            proactive_result: None,
            explanation: None,
            cached: false,
        }
    }

    /// Returns true for `Block`.
    #[inline]
    pub fn is_blocked(&self) -> bool {
        self.decision.is_block()
    }

    /// Returns true for `Allow`.
    #[inline]
    pub fn is_allowed(&self) -> bool {
        self.decision.is_allow()
    }

    /// Render the explanation block: one summary line for hard blocks,
    /// a summary plus one bullet per reason otherwise.
    pub fn explain(&self) -> String {
        if self.hard_block {
            return self
                .reasons
                .first()
                .cloned()
                .unwrap_or_else(|| "HARD BLOCK".to_string());
        }
        let mut out = format!("{} (score {:.1})", self.decision, self.score);
        for reason in &self.reasons {
            out.push_str("\n  - ");
            out.push_str(reason);
        }
        out
    }
}
