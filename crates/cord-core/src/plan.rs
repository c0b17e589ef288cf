//! # Plan Validator
//!
//! Cross-item validation over a list of sub-proposals. Per-task scope and
//! intent-lock checks are deliberately skipped here; they run per task at
//! execution time. What the plan view adds is exactly what per-task
//! evaluation cannot see: patterns that only exist across tasks.
//!
//! ## Cross-item signals
//!
//! | Signal | Adjustment |
//! |--------|-----------|
//! | >= 3 distinct network targets | +2 |
//! | any elevated grant (admin/root/sudo) | +3 |
//! | write task + read task + network task | +2 (exfiltration chain) |
//! | >= 10 distinct file paths | +1 |

use std::collections::BTreeSet;

use cord_vigil::{Decision, Normalizer};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::CordConfig;
use crate::dimensions::DimensionScorer;
use crate::error::Result;
use crate::gates::HardBlockGates;
use crate::proposal::Proposal;

/// The validator's answer for one plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanVerdict {
    /// The decision for the plan as a whole.
    pub decision: Decision,
    /// Weighted score including cross-item adjustments.
    pub score: f64,
    /// Whether a hard-block gate fired on the concatenated plan.
    pub hard_block: bool,
    /// Per-dimension risks from the restricted scored set.
    pub risks: std::collections::BTreeMap<String, f64>,
    /// Reason strings, including cross-item findings.
    pub reasons: Vec<String>,
    /// Number of tasks validated.
    pub task_count: usize,
}

impl PlanVerdict {
    /// Returns true for `Block`.
    pub fn is_blocked(&self) -> bool {
        self.decision.is_block()
    }
}

pub(crate) fn validate_plan_inner(
    tasks: &[Proposal],
    session_intent: Option<&str>,
    gates: &HardBlockGates,
    dimensions: &DimensionScorer,
    normalizer: &Normalizer,
    config: &CordConfig,
) -> Result<PlanVerdict> {
    let combined_text: String = tasks
        .iter()
        .map(|t| t.text.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    let normalized = normalizer.normalize(&combined_text);

    // Hard-block gates run over the whole plan first.
    if let Some(hit) = gates.check(&normalized.combined) {
        return Ok(PlanVerdict {
            decision: Decision::Block,
            score: cord_vigil::SENTINEL_SCORE,
            hard_block: true,
            risks: std::collections::BTreeMap::from([(hit.dimension.to_string(), 5.0)]),
            reasons: vec![hit.reason.to_string()],
            task_count: tasks.len(),
        });
    }

    // Restricted scored set over the concatenation, privilege over the
    // union of grants.
    let grant_union: Vec<String> = tasks.iter().flat_map(|t| t.grants.clone()).collect();
    let scores = dimensions.score_restricted(&normalized.combined, &grant_union, config);
    let mut total = scores.weighted_total(config);
    let mut reasons = scores.reasons.clone();

    // Cross-item signals.
    let network_targets: BTreeSet<&str> = tasks
        .iter()
        .filter_map(|t| t.network_target.as_deref())
        .collect();
    if network_targets.len() >= 3 {
        total += 2.0;
        reasons.push(format!(
            "plan reaches {} distinct network targets",
            network_targets.len()
        ));
    }

    let elevated = grant_union.iter().any(|g| {
        let g = g.to_lowercase();
        g.contains("admin") || g.contains("root") || g.contains("sudo")
    });
    if elevated {
        total += 3.0;
        reasons.push("plan carries an elevated grant".to_string());
    }

    let has_write = tasks.iter().any(|t| {
        t.path.is_some()
            && (matches_any(&t.text, &["write", "save", "create", "append", "dump"])
                || matches!(
                    t.action_type,
                    crate::proposal::ActionType::Write | crate::proposal::ActionType::FileOp
                ))
    });
    let has_read = tasks
        .iter()
        .any(|t| matches_any(&t.text, &["read", "cat", "load", "open", "collect"]));
    let has_network = tasks.iter().any(|t| t.network_target.is_some());
    if has_write && has_read && has_network {
        total += 2.0;
        reasons.push("write→read→network exfiltration chain".to_string());
    }

    let file_paths: BTreeSet<&str> = tasks.iter().filter_map(|t| t.path.as_deref()).collect();
    if file_paths.len() >= 10 {
        total += 1.0;
        reasons.push(format!("plan touches {} distinct files", file_paths.len()));
    }

    if let Some(intent) = session_intent {
        if !combined_text.to_lowercase().contains(&intent.to_lowercase()) {
            reasons.push("plan does not reference the declared goal".to_string());
        }
    }

    let t = &config.thresholds;
    let decision = if total < t.allow {
        Decision::Allow
    } else if total < t.contain {
        Decision::Contain
    } else if total < t.challenge {
        Decision::Challenge
    } else {
        Decision::Block
    };
    debug!(total, tasks = tasks.len(), "plan validated");

    Ok(PlanVerdict {
        decision,
        score: total.clamp(0.0, cord_vigil::SENTINEL_SCORE),
        hard_block: false,
        risks: scores.risks,
        reasons,
        task_count: tasks.len(),
    })
}

fn matches_any(text: &str, verbs: &[&str]) -> bool {
    let lowered = text.to_lowercase();
    verbs.iter().any(|v| lowered.contains(v))
}
