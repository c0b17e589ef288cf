//! # Hard-Block Gates
//!
//! Three gates run ahead of scoring, in order, over the normalized
//! combined text. Each gate matches an enumerated family of definitive
//! violations; a hit bypasses scoring entirely and returns a sentinel-99
//! verdict carrying exactly one article-named reason.
//!
//! | Gate | Family | Reason |
//! |------|--------|--------|
//! | Moral | extortion, fraud, coercion | `HARD BLOCK — moral violation (Article I)` |
//! | Drift | disable/bypass the governor | `HARD BLOCK — protocol drift attempt (Article III)` |
//! | Prompt injection | definitive jailbreaks | `HARD BLOCK — prompt injection attempt (Article VII)` |
//!
//! Gates are deliberately narrow: a gate that fires on borderline text
//! would bypass the scored dimensions that exist to weigh it.

use regex::Regex;

/// Reason string for the moral gate.
pub const MORAL_REASON: &str = "HARD BLOCK — moral violation (Article I)";
/// Reason string for the drift gate.
pub const DRIFT_REASON: &str = "HARD BLOCK — protocol drift attempt (Article III)";
/// Reason string for the prompt-injection gate.
pub const PROMPT_INJECTION_REASON: &str = "HARD BLOCK — prompt injection attempt (Article VII)";

/// A gate hit: which dimension to report and which reason to carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateHit {
    /// Risk-map key for the hit (`moral_check`, `intent_drift`,
    /// `prompt_injection`).
    pub dimension: &'static str,
    /// The article-named reason string.
    pub reason: &'static str,
}

/// The three compiled gates.
#[derive(Debug)]
pub struct HardBlockGates {
    moral: Vec<Regex>,
    drift: Vec<Regex>,
    prompt_injection: Vec<Regex>,
}

impl HardBlockGates {
    /// Compile the gate families. The expressions are fixed and
    /// known-good.
    pub fn new() -> Self {
        Self {
            moral: compile(&[
                r"(?i)\b(blackmail|extort(ion)?)\b",
                r"(?i)ransom\s+(demand|note|payment)",
                r"(?i)threaten\s+to\s+(expose|release|leak|publish)",
                r"(?i)pay\s+(me|us)\s+or\s+(else|i|we)",
                r"(?i)launder(ing)?\s+(the\s+)?money",
                r"(?i)steal\s+(his|her|their|someone'?s?)\s+identity",
                r"(?i)\bdefraud\b",
            ]),
            drift: compile(&[
                r"(?i)(bypass|disable|override|circumvent|turn\s+off)\s+(the\s+)?(governor|guard\s*rails?|safety\s+(checks?|layer|rails?)|policy\s+engine)",
                r"(?i)(run|execute|act)\s+without\s+(the\s+)?(governor|oversight|supervision)",
                r"(?i)evaluate\s+nothing|skip\s+(all\s+)?(the\s+)?(checks?|evaluation)",
            ]),
            prompt_injection: compile(&[
                r"(?i)ignore\s+(all\s+)?(previous|prior|above)\s+(instructions?|prompts?|rules?)",
                r"(?i)disregard\s+(all\s+)?(your\s+)?(previous|prior|system)\s+(instructions?|prompts?|rules?|guidelines?)",
                r"(?i)(reveal|show|print|repeat|output)\s+(me\s+)?(your|the)\s+(hidden\s+|system\s+)prompt",
                // The DAN acronym stays case-sensitive; "dan" is a name.
                r"\bDAN\b",
                r"(?i)do\s+anything\s+now",
                r"(?i)developer\s+mode\s+(enabled|activated)|enable\s+developer\s+mode",
                r"(?i)you\s+are\s+now\s+(unrestricted|unfiltered|free\s+of\s+(all\s+)?restrictions)",
            ]),
        }
    }

    /// Run the gates in order over the normalized combined text.
    pub fn check(&self, combined: &str) -> Option<GateHit> {
        if self.moral.iter().any(|re| re.is_match(combined)) {
            return Some(GateHit {
                dimension: "moral_check",
                reason: MORAL_REASON,
            });
        }
        if self.drift.iter().any(|re| re.is_match(combined)) {
            return Some(GateHit {
                dimension: "intent_drift",
                reason: DRIFT_REASON,
            });
        }
        if self.prompt_injection.iter().any(|re| re.is_match(combined)) {
            return Some(GateHit {
                dimension: "prompt_injection",
                reason: PROMPT_INJECTION_REASON,
            });
        }
        None
    }
}

impl Default for HardBlockGates {
    fn default() -> Self {
        Self::new()
    }
}

fn compile(exprs: &[&str]) -> Vec<Regex> {
    exprs
        .iter()
        .map(|e| Regex::new(e).expect("gate pattern is known-good"))
        .collect()
}
