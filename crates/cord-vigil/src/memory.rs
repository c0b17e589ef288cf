//! # Session Memory - Cross-Turn Behavioral Tracking
//!
//! Single-turn scanning misses the attacker who stays under the severity
//! threshold on every individual message. This module keeps a bounded
//! rolling window per session and recomputes a behavioral assessment after
//! every turn: cumulative decayed score, consecutive risky streak,
//! escalation, category spread, and a named multi-turn trajectory.
//!
//! ## Trajectories
//!
//! | Pattern | Signature |
//! |---------|-----------|
//! | `sudden_spike` | last turn severity >= 8 after a uniformly quiet window |
//! | `slow_burn` | strictly increasing severities over >= 4 turns |
//! | `trust_building` | alternating clean/risky turns (>= 4 parity shifts) |
//! | `persistence` | >= 5 low-severity (2-4) non-clean turns |
//! | `recon_sweep` | >= 4 distinct categories within the last 6 turns |
//!
//! Patterns are evaluated in that order; the first match wins.
//!
//! ## References
//!
//! - **Hutchins et al. (2011)** - "Intelligence-Driven Computer Network
//!   Defense Informed by Analysis of Adversary Campaigns and Intrusion
//!   Kill Chains" (the staged-attack framing behind trajectory analysis)

use std::collections::{HashMap, VecDeque};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::models::{Decision, ScanResult, ThreatCategory};

/// Configuration for the per-session rolling window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Maximum entries retained per session.
    pub window_size: usize,
    /// Decay factor applied per step of age in the cumulative score.
    pub decay: f64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            window_size: 20,
            decay: 0.85,
        }
    }
}

/// One recorded turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMemoryEntry {
    /// Record time, milliseconds since the epoch.
    pub timestamp_ms: u64,
    /// Scan severity of the turn.
    pub severity: f64,
    /// Patrol decision of the turn.
    pub decision: Decision,
    /// Distinct categories detected in the turn.
    pub categories: Vec<ThreatCategory>,
    /// severity >= 3 or any non-allow decision.
    pub is_risky: bool,
}

/// Named multi-turn behavioral pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrajectoryPattern {
    /// No recognized pattern.
    None,
    /// Severities ramp up gradually across turns.
    SlowBurn,
    /// Clean and risky turns alternate to build credibility.
    TrustBuilding,
    /// Repeated low-severity probing that never quite blocks.
    Persistence,
    /// Many distinct categories probed in a short span.
    ReconSweep,
    /// A quiet session turns hostile in one step.
    SuddenSpike,
}

/// A classified trajectory with supporting evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    /// The recognized pattern.
    pub pattern: TrajectoryPattern,
    /// Classifier confidence in [0, 1]. At or above 0.7 is "high".
    pub confidence: f64,
    /// Human-readable evidence for the classification.
    pub evidence: String,
    /// Pattern-level recommendation, if the pattern alone warrants one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<Decision>,
}

impl Trajectory {
    fn none() -> Self {
        Self {
            pattern: TrajectoryPattern::None,
            confidence: 0.0,
            evidence: String::new(),
            recommendation: None,
        }
    }

    /// Whether confidence reaches the "high" band.
    pub fn is_high_confidence(&self) -> bool {
        self.confidence >= 0.7
    }
}

/// The assessment recomputed after each recorded turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryAssessment {
    /// Session this assessment belongs to.
    pub session_id: String,
    /// Total turns ever recorded for the session (not capped by window).
    pub turn_count: usize,
    /// Decay-weighted severity sum over the window, newest weighted 1.0.
    pub cumulative_score: f64,
    /// Most-recent consecutive risky turns; reset by any clean turn.
    pub consecutive_risky: usize,
    /// Window holds >= 3 non-decreasing severities with net rise >= 3.
    pub escalating: bool,
    /// Category counts over the window, sorted descending.
    pub top_categories: Vec<(ThreatCategory, usize)>,
    /// Classified multi-turn trajectory.
    pub trajectory: Trajectory,
    /// Overall recommendation: `Block`, `Challenge`, or none.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<Decision>,
}

/// One session's rolling window.
#[derive(Debug)]
struct SessionMemory {
    window: VecDeque<SessionMemoryEntry>,
    turn_count: usize,
}

/// All session memories, keyed by session id.
#[derive(Debug)]
pub struct MemoryStore {
    sessions: HashMap<String, SessionMemory>,
    config: MemoryConfig,
}

impl MemoryStore {
    /// Store with the given window configuration.
    pub fn new(config: MemoryConfig) -> Self {
        Self {
            sessions: HashMap::new(),
            config,
        }
    }

    /// Append a turn to a session's window and recompute its assessment.
    pub fn record_turn(&mut self, session_id: &str, scan: &ScanResult) -> MemoryAssessment {
        let entry = SessionMemoryEntry {
            timestamp_ms: now_ms(),
            severity: scan.severity,
            decision: scan.decision,
            categories: scan.categories(),
            is_risky: scan.severity >= 3.0 || scan.decision != Decision::Allow,
        };

        let session = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionMemory {
                window: VecDeque::new(),
                turn_count: 0,
            });
        session.turn_count += 1;
        session.window.push_back(entry);
        while session.window.len() > self.config.window_size {
            session.window.pop_front();
        }

        assess(session_id, session, self.config.decay)
    }

    /// The current assessment of a session, if any turns were recorded.
    pub fn assessment(&self, session_id: &str) -> Option<MemoryAssessment> {
        self.sessions
            .get(session_id)
            .map(|s| assess(session_id, s, self.config.decay))
    }

    /// Number of tracked sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Drop all session windows.
    pub fn clear(&mut self) {
        self.sessions.clear();
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(MemoryConfig::default())
    }
}

fn assess(session_id: &str, session: &SessionMemory, decay: f64) -> MemoryAssessment {
    let window: Vec<&SessionMemoryEntry> = session.window.iter().collect();

    // Newest entry weight 1.0, each predecessor multiplied by the decay.
    let cumulative_score: f64 = window
        .iter()
        .rev()
        .enumerate()
        .map(|(age, e)| e.severity * decay.powi(age as i32))
        .sum();

    let consecutive_risky = window.iter().rev().take_while(|e| e.is_risky).count();

    let escalating = has_escalating_run(&window);

    let mut counts: HashMap<ThreatCategory, usize> = HashMap::new();
    for entry in &window {
        for category in &entry.categories {
            *counts.entry(*category).or_insert(0) += 1;
        }
    }
    let mut top_categories: Vec<(ThreatCategory, usize)> = counts.into_iter().collect();
    top_categories.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

    let trajectory = classify_trajectory(&window);

    let recommendation = recommend(cumulative_score, consecutive_risky, escalating, &trajectory);

    MemoryAssessment {
        session_id: session_id.to_string(),
        turn_count: session.turn_count,
        cumulative_score,
        consecutive_risky,
        escalating,
        top_categories,
        trajectory,
        recommendation,
    }
}

/// True when the window contains a run of >= 3 consecutive entries with
/// monotonically non-decreasing severities and a net rise >= 3.
fn has_escalating_run(window: &[&SessionMemoryEntry]) -> bool {
    if window.len() < 3 {
        return false;
    }
    let mut start = 0;
    for i in 1..=window.len() {
        let broken = i == window.len() || window[i].severity < window[i - 1].severity;
        if broken {
            let len = i - start;
            if len >= 3 && window[i - 1].severity - window[start].severity >= 3.0 {
                return true;
            }
            start = i;
        }
    }
    false
}

fn classify_trajectory(window: &[&SessionMemoryEntry]) -> Trajectory {
    if window.len() < 2 {
        return Trajectory::none();
    }
    let last = window[window.len() - 1];
    let prior = &window[..window.len() - 1];

    // sudden_spike: a quiet window turning hostile in one step.
    if last.severity >= 8.0 && prior.iter().all(|e| e.severity <= 2.0) {
        return Trajectory {
            pattern: TrajectoryPattern::SuddenSpike,
            confidence: 0.9,
            evidence: format!(
                "severity jumped to {:.0} after {} quiet turns",
                last.severity,
                prior.len()
            ),
            recommendation: Some(Decision::Block),
        };
    }

    // slow_burn: the longest strictly-increasing suffix spans >= 4 turns.
    let mut suffix = 1;
    while suffix < window.len()
        && window[window.len() - suffix - 1].severity < window[window.len() - suffix].severity
    {
        suffix += 1;
    }
    if suffix >= 4 {
        let rise = last.severity - window[window.len() - suffix].severity;
        let confidence = (rise / 8.0).clamp(0.3, 1.0);
        return Trajectory {
            pattern: TrajectoryPattern::SlowBurn,
            confidence,
            evidence: format!("severity rose {rise:.0} points over {suffix} turns"),
            recommendation: Some(if confidence >= 0.7 {
                Decision::Block
            } else {
                Decision::Challenge
            }),
        };
    }

    // trust_building: clean and risky turns alternating.
    let shifts = window
        .windows(2)
        .filter(|pair| pair[0].is_risky != pair[1].is_risky)
        .count();
    if shifts >= 4 {
        return Trajectory {
            pattern: TrajectoryPattern::TrustBuilding,
            confidence: 0.6,
            evidence: format!("{shifts} clean/risky alternations in the window"),
            recommendation: Some(Decision::Challenge),
        };
    }

    // persistence: sustained low-grade probing.
    let low_grade = window
        .iter()
        .filter(|e| e.severity >= 2.0 && e.severity <= 4.0 && e.is_risky)
        .count();
    if low_grade >= 5 {
        return Trajectory {
            pattern: TrajectoryPattern::Persistence,
            confidence: 0.6,
            evidence: format!("{low_grade} low-severity risky turns"),
            recommendation: Some(Decision::Challenge),
        };
    }

    // recon_sweep: broad category probing inside the last six turns.
    let recent = &window[window.len().saturating_sub(6)..];
    let mut distinct: Vec<ThreatCategory> = recent
        .iter()
        .flat_map(|e| e.categories.iter().copied())
        .collect();
    distinct.sort();
    distinct.dedup();
    if distinct.len() >= 4 {
        return Trajectory {
            pattern: TrajectoryPattern::ReconSweep,
            confidence: 0.7,
            evidence: format!("{} distinct categories within 6 turns", distinct.len()),
            recommendation: Some(Decision::Challenge),
        };
    }

    Trajectory::none()
}

fn recommend(
    cumulative_score: f64,
    consecutive_risky: usize,
    escalating: bool,
    trajectory: &Trajectory,
) -> Option<Decision> {
    let spike = trajectory.pattern == TrajectoryPattern::SuddenSpike;
    let burn_high =
        trajectory.pattern == TrajectoryPattern::SlowBurn && trajectory.is_high_confidence();
    if cumulative_score > 15.0 || spike || burn_high {
        return Some(Decision::Block);
    }

    let soft_pattern = matches!(
        trajectory.pattern,
        TrajectoryPattern::TrustBuilding
            | TrajectoryPattern::Persistence
            | TrajectoryPattern::ReconSweep
            | TrajectoryPattern::SlowBurn
    );
    if consecutive_risky >= 3 || escalating || soft_pattern {
        return Some(Decision::Challenge);
    }
    None
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(severity: f64, decision: Decision, categories: &[ThreatCategory]) -> ScanResult {
        let threats = categories
            .iter()
            .map(|c| crate::models::Threat {
                category: *c,
                pattern_id: "test".to_string(),
                matches: vec!["m".to_string()],
                severity_contribution: severity,
            })
            .collect();
        ScanResult {
            severity,
            threats,
            was_obfuscated: false,
            has_critical_threat: false,
            decision,
            summary: String::new(),
            memory_assessment: None,
            escalated_by: None,
        }
    }

    fn clean() -> ScanResult {
        scan(0.0, Decision::Allow, &[])
    }

    #[test]
    fn test_clean_session_has_no_recommendation() {
        let mut store = MemoryStore::default();
        for _ in 0..5 {
            let a = store.record_turn("s", &clean());
            assert_eq!(a.recommendation, None);
            assert_eq!(a.trajectory.pattern, TrajectoryPattern::None);
        }
    }

    #[test]
    fn test_window_is_bounded() {
        let mut store = MemoryStore::new(MemoryConfig {
            window_size: 3,
            decay: 0.85,
        });
        for _ in 0..10 {
            store.record_turn("s", &clean());
        }
        let a = store.assessment("s").unwrap();
        assert_eq!(a.turn_count, 10);
        // Cumulative over a 3-entry window of zeros stays zero.
        assert_eq!(a.cumulative_score, 0.0);
    }

    #[test]
    fn test_cumulative_score_decays() {
        let mut store = MemoryStore::default();
        store.record_turn("s", &scan(4.0, Decision::Challenge, &[]));
        let a = store.record_turn("s", &scan(4.0, Decision::Challenge, &[]));
        // 4.0 * 1.0 + 4.0 * 0.85
        assert!((a.cumulative_score - 7.4).abs() < 1e-9);
    }

    #[test]
    fn test_consecutive_risky_resets_on_clean_turn() {
        let mut store = MemoryStore::default();
        store.record_turn("s", &scan(5.0, Decision::Challenge, &[]));
        store.record_turn("s", &scan(5.0, Decision::Challenge, &[]));
        let a = store.record_turn("s", &clean());
        assert_eq!(a.consecutive_risky, 0);
        let a = store.record_turn("s", &scan(5.0, Decision::Challenge, &[]));
        assert_eq!(a.consecutive_risky, 1);
    }

    #[test]
    fn test_three_risky_turns_recommend_challenge() {
        let mut store = MemoryStore::default();
        store.record_turn("s", &scan(3.0, Decision::Challenge, &[]));
        store.record_turn("s", &scan(3.0, Decision::Challenge, &[]));
        let a = store.record_turn("s", &scan(3.0, Decision::Challenge, &[]));
        assert_eq!(a.consecutive_risky, 3);
        assert_eq!(a.recommendation, Some(Decision::Challenge));
    }

    #[test]
    fn test_sudden_spike() {
        let mut store = MemoryStore::default();
        for _ in 0..4 {
            store.record_turn("s", &clean());
        }
        let a = store.record_turn("s", &scan(9.0, Decision::Block, &[ThreatCategory::Injection]));
        assert_eq!(a.trajectory.pattern, TrajectoryPattern::SuddenSpike);
        assert!(a.trajectory.is_high_confidence());
        assert_eq!(a.recommendation, Some(Decision::Block));
    }

    #[test]
    fn test_slow_burn_over_four_turns() {
        let mut store = MemoryStore::default();
        store.record_turn("s", &scan(1.0, Decision::Allow, &[]));
        store.record_turn("s", &scan(3.0, Decision::Challenge, &[]));
        store.record_turn("s", &scan(5.0, Decision::Challenge, &[]));
        let a = store.record_turn("s", &scan(7.0, Decision::Challenge, &[]));
        assert_eq!(a.trajectory.pattern, TrajectoryPattern::SlowBurn);
        assert!(a.escalating);
        // rise of 6 over the run: high confidence, block-grade
        assert_eq!(a.recommendation, Some(Decision::Block));
    }

    #[test]
    fn test_trust_building_alternation() {
        let mut store = MemoryStore::default();
        let mut last = None;
        for i in 0..6 {
            let r = if i % 2 == 0 {
                clean()
            } else {
                scan(4.0, Decision::Challenge, &[])
            };
            last = Some(store.record_turn("s", &r));
        }
        let a = last.unwrap();
        assert_eq!(a.trajectory.pattern, TrajectoryPattern::TrustBuilding);
        assert_eq!(a.recommendation, Some(Decision::Challenge));
    }

    #[test]
    fn test_persistence_low_grade_probing() {
        let mut store = MemoryStore::default();
        let mut last = None;
        for _ in 0..5 {
            last = Some(store.record_turn("s", &scan(3.0, Decision::Challenge, &[])));
        }
        let a = last.unwrap();
        assert_eq!(a.trajectory.pattern, TrajectoryPattern::Persistence);
    }

    #[test]
    fn test_recon_sweep_category_spread() {
        let mut store = MemoryStore::default();
        let cats = [
            ThreatCategory::Obfuscation,
            ThreatCategory::SuspiciousUrls,
            ThreatCategory::DangerousOps,
            ThreatCategory::IndirectInjection,
        ];
        let mut last = None;
        for c in cats {
            last = Some(store.record_turn("s", &scan(2.0, Decision::Allow, &[c])));
        }
        let a = last.unwrap();
        assert_eq!(a.trajectory.pattern, TrajectoryPattern::ReconSweep);
        assert_eq!(a.top_categories.len(), 4);
    }

    #[test]
    fn test_cumulative_block_threshold() {
        let mut store = MemoryStore::default();
        let mut last = None;
        for _ in 0..4 {
            last = Some(store.record_turn("s", &scan(6.0, Decision::Challenge, &[])));
        }
        let a = last.unwrap();
        // 6 * (1 + .85 + .7225 + .614125) > 15
        assert!(a.cumulative_score > 15.0);
        assert_eq!(a.recommendation, Some(Decision::Block));
    }

    #[test]
    fn test_sessions_are_isolated() {
        let mut store = MemoryStore::default();
        store.record_turn("a", &scan(9.0, Decision::Block, &[]));
        let b = store.record_turn("b", &clean());
        assert_eq!(b.consecutive_risky, 0);
        assert_eq!(store.session_count(), 2);
    }
}
