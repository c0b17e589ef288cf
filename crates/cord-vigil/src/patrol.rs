//! # VIGIL Patrol - the Stateful Screening Facade
//!
//! The patrol owns all long-lived detection state (session memory, canary
//! registry, proactive scanner, rate limiter, circuit breaker) and exposes
//! four distinct entry points rather than a generic mutable surface:
//!
//! - [`Patrol::scan`] - pre-screen an inbound proposal text
//! - [`Patrol::scan_output`] - scan a model output for canary extraction
//! - [`Patrol::scan_input`] - screen untrusted external content for
//!   indirect injection
//! - [`Patrol::assess_threat_posture`] - forecast a session's threat level
//!
//! The CORD engine uses the patrol as an outer gate and as an amplifier;
//! the patrol never calls back into the engine.
//!
//! ## Events
//!
//! Decision notifications are pushed onto subscriber channels in FIFO
//! order. Dropping a receiver silently cancels that subscription without
//! affecting the patrol.
//!
//! ## Lifecycle
//!
//! `reset_stats` zeroes counters and clears behavioral memory but does NOT
//! clear planted canaries: canaries are persistent traps, and forgetting
//! them would retroactively unarm every protected prompt already in the
//! field.

use std::sync::mpsc;

use serde::{Deserialize, Serialize};

use crate::breaker::{CircuitBreaker, CircuitConfig};
use crate::canary::{CanaryRegistry, CanaryType, PlantedCanary};
use crate::memory::{MemoryAssessment, MemoryConfig, MemoryStore};
use crate::models::{Decision, ScanResult, Threat, ThreatCategory, VigilError};
use crate::normalize::Normalizer;
use crate::proactive::{
    ProactiveConfig, ProactiveScanResult, ProactiveScanner, ThreatForecast,
};
use crate::ratelimit::{RateDecision, RateLimitConfig, RateLimiter};
use crate::scanner::{PatrolThresholds, Scanner};

/// Default session key for callers that do not track sessions.
pub const DEFAULT_SESSION: &str = "default";

/// Patrol configuration, one section per owned component.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VigilConfig {
    /// Severity thresholds for scan decisions.
    pub thresholds: PatrolThresholds,
    /// Session memory window settings.
    pub memory: MemoryConfig,
    /// Rate limiter settings.
    pub rate_limit: RateLimitConfig,
    /// Circuit breaker settings.
    pub circuit: CircuitConfig,
    /// Proactive scanner settings.
    pub proactive: ProactiveConfig,
    /// Extra detection patterns per category name.
    #[serde(default, skip_serializing_if = "std::collections::BTreeMap::is_empty")]
    pub extra_patterns: std::collections::BTreeMap<String, Vec<String>>,
}

/// Observable patrol notifications, in FIFO order per subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PatrolEvent {
    /// Non-critical threats were detected.
    Threat {
        /// Session that produced the input.
        session_id: String,
        /// Scan severity.
        severity: f64,
        /// Detected categories.
        categories: Vec<ThreatCategory>,
    },
    /// A critical category was detected; the input was blocked.
    Critical {
        /// Session that produced the input.
        session_id: String,
        /// Scan severity.
        severity: f64,
        /// Detected categories.
        categories: Vec<ThreatCategory>,
    },
    /// A planted canary surfaced in an output.
    CanaryTriggered {
        /// Id of the triggered canary.
        canary_id: String,
        /// Caller-supplied context label.
        context: String,
    },
    /// Untrusted content carried instructions aimed at the AI.
    IndirectInjection {
        /// Content source label.
        source: String,
        /// Screen severity.
        severity: f64,
    },
}

/// Monotonic counters. Cleared by `reset_stats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatrolStats {
    /// Inbound scans performed.
    pub scans: u64,
    /// Scans that ended in `Block`.
    pub blocks: u64,
    /// Scans that ended in `Challenge`.
    pub challenges: u64,
    /// Canaries planted.
    pub canaries_planted: u64,
    /// Canary triggers observed.
    pub canaries_triggered: u64,
    /// Indirect-injection screens that blocked.
    pub indirect_hits: u64,
    /// Scan bursts observed by the velocity tracker.
    pub velocity_alerts: u64,
}

/// The patrol facade.
pub struct Patrol {
    scanner: Scanner,
    normalizer: Normalizer,
    canaries: CanaryRegistry,
    memory: MemoryStore,
    proactive: ProactiveScanner,
    rate_limiter: RateLimiter,
    breaker: CircuitBreaker,
    subscribers: Vec<mpsc::Sender<PatrolEvent>>,
    stats: PatrolStats,
}

impl Patrol {
    /// Patrol with default configuration.
    pub fn new() -> Self {
        Self::with_config(VigilConfig::default()).expect("default configuration is known-good")
    }

    /// Patrol with caller configuration.
    ///
    /// # Errors
    ///
    /// Fails fast when an `extra_patterns` expression does not compile or
    /// names an unknown category.
    pub fn with_config(config: VigilConfig) -> Result<Self, VigilError> {
        let mut scanner = Scanner::with_library(Default::default(), config.thresholds);
        for (name, exprs) in &config.extra_patterns {
            let category = category_by_name(name)
                .ok_or_else(|| VigilError::UnknownCategory(name.clone()))?;
            scanner.library_mut().add_patterns(category, exprs)?;
        }
        Ok(Self {
            scanner,
            normalizer: Normalizer::new(),
            canaries: CanaryRegistry::new(),
            memory: MemoryStore::new(config.memory),
            proactive: ProactiveScanner::new(config.proactive),
            rate_limiter: RateLimiter::new(config.rate_limit),
            breaker: CircuitBreaker::new(config.circuit),
            subscribers: Vec::new(),
            stats: PatrolStats::default(),
        })
    }

    /// Pre-screen an inbound text for a session.
    ///
    /// Runs normalization and pattern scanning, checks the fingerprint
    /// registry, feeds the velocity and phase trackers, records the turn
    /// in session memory, and applies memory escalation to the decision.
    pub fn scan(&mut self, text: &str, session_id: &str) -> ScanResult {
        self.stats.scans += 1;

        let burst = self.proactive.record_scan(session_id);
        if burst {
            self.stats.velocity_alerts += 1;
        }

        let normalized = self.normalizer.normalize(text);
        let mut result = self.scanner.scan_normalized(&normalized);

        // Fingerprint lookup runs on the raw text: known attacks are
        // registered verbatim, before any mangling.
        if let Some(fingerprint) = self.proactive.check_fingerprint(text) {
            result.threats.push(Threat {
                category: fingerprint.category,
                pattern_id: format!("fingerprint:{}", fingerprint.label),
                matches: vec![text.chars().take(80).collect()],
                severity_contribution: 10.0,
            });
            result.severity = 10.0;
            result.decision = Decision::Block;
            result.escalated_by = Some("fingerprint".to_string());
            result.summary = format!("Known attack fingerprint: {}", fingerprint.label);
        }

        self.proactive.observe_phase(session_id, &normalized.combined);

        if burst && result.decision == Decision::Allow {
            result.decision = Decision::Challenge;
            result.escalated_by = Some("velocity".to_string());
        }

        let assessment = self.memory.record_turn(session_id, &result);
        match assessment.recommendation {
            Some(Decision::Block) if result.decision != Decision::Block => {
                result.decision = Decision::Block;
                result.escalated_by = Some("memory".to_string());
            }
            Some(Decision::Challenge) if result.decision == Decision::Allow => {
                result.decision = Decision::Challenge;
                result.escalated_by = Some("memory".to_string());
            }
            _ => {}
        }
        result.memory_assessment = Some(assessment);

        // Critical detection always blocks, whatever came before.
        if result.has_critical_threat {
            result.decision = Decision::Block;
        }

        match result.decision {
            Decision::Block => self.stats.blocks += 1,
            Decision::Challenge => self.stats.challenges += 1,
            _ => {}
        }

        let categories = result.categories();
        if result.has_critical_threat || result.decision == Decision::Block {
            self.emit(PatrolEvent::Critical {
                session_id: session_id.to_string(),
                severity: result.severity,
                categories,
            });
        } else if !result.threats.is_empty() {
            self.emit(PatrolEvent::Threat {
                session_id: session_id.to_string(),
                severity: result.severity,
                categories,
            });
        }

        result
    }

    /// Scan a model output for canary extraction.
    ///
    /// Any trigger forces severity 10 and `Block` with a `canary` threat;
    /// otherwise the output goes through the standard scanner so that
    /// exfil payloads in outputs are still caught.
    pub fn scan_output(&mut self, text: &str, context: &str) -> ScanResult {
        let canary_scan = self.canaries.scan(text, context);
        if canary_scan.any_triggered() {
            self.stats.canaries_triggered += canary_scan.triggered.len() as u64;
            for t in &canary_scan.triggered {
                self.emit(PatrolEvent::CanaryTriggered {
                    canary_id: t.canary_id.clone(),
                    context: t.context.clone(),
                });
            }
            let threats = canary_scan
                .triggered
                .iter()
                .map(|t| Threat {
                    category: ThreatCategory::Canary,
                    pattern_id: format!("canary:{}", t.canary_id),
                    matches: vec![context.to_string()],
                    severity_contribution: 10.0,
                })
                .collect();
            return ScanResult {
                severity: 10.0,
                threats,
                was_obfuscated: false,
                has_critical_threat: false,
                decision: Decision::Block,
                summary: format!(
                    "Canary extraction detected in {context}: protected prompt has leaked"
                ),
                memory_assessment: None,
                escalated_by: Some("canary".to_string()),
            };
        }
        self.scanner.scan(text)
    }

    /// Screen untrusted external content for indirect injection.
    pub fn scan_input(&mut self, content: &str, source: &str) -> ProactiveScanResult {
        let result = self.proactive.scan_for_indirect_injection(content, source);
        if result.is_blocked() {
            self.stats.indirect_hits += 1;
            self.emit(PatrolEvent::IndirectInjection {
                source: source.to_string(),
                severity: result.severity,
            });
        }
        result
    }

    /// Plant a canary for a session.
    pub fn plant_canary(&mut self, types: &[CanaryType], session_id: &str) -> PlantedCanary {
        self.stats.canaries_planted += 1;
        self.canaries.plant(types, session_id)
    }

    /// The kill-chain phase a session has reached.
    pub fn attack_phase(&self, session_id: &str) -> crate::proactive::AttackPhase {
        self.proactive.phase(session_id)
    }

    /// Forecast a session's threat level from phase, memory and velocity.
    pub fn assess_threat_posture(&self, session_id: &str) -> ThreatForecast {
        let assessment = self.memory.assessment(session_id);
        self.proactive
            .predict_threat_level(session_id, assessment.as_ref())
    }

    /// Rate-limit check for a session. One unit cost.
    pub fn check_rate(&mut self, session_id: &str) -> RateDecision {
        self.rate_limiter.check(session_id)
    }

    /// The circuit breaker guarding the caller's external operations.
    pub fn breaker(&mut self) -> &mut CircuitBreaker {
        &mut self.breaker
    }

    /// The session memory assessment, if the session has recorded turns.
    pub fn memory_assessment(&self, session_id: &str) -> Option<MemoryAssessment> {
        self.memory.assessment(session_id)
    }

    /// Register a known-attack fingerprint.
    pub fn add_fingerprint(&mut self, text: &str, label: &str) {
        self.proactive
            .add_fingerprint(text, label, ThreatCategory::KnownAttack);
    }

    /// Subscribe to patrol events. Dropping the receiver unsubscribes.
    pub fn subscribe(&mut self) -> mpsc::Receiver<PatrolEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.push(tx);
        rx
    }

    /// Current counters.
    pub fn stats(&self) -> PatrolStats {
        self.stats
    }

    /// Number of planted canaries (triggered or not).
    pub fn canary_count(&self) -> usize {
        self.canaries.len()
    }

    /// Zero counters and clear behavioral state. Planted canaries are
    /// preserved.
    pub fn reset_stats(&mut self) {
        self.stats = PatrolStats::default();
        self.memory.clear();
        self.proactive.clear_sessions();
        self.rate_limiter.reset();
    }

    fn emit(&mut self, event: PatrolEvent) {
        self.subscribers
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}

impl Default for Patrol {
    fn default() -> Self {
        Self::new()
    }
}

fn category_by_name(name: &str) -> Option<ThreatCategory> {
    serde_json::from_value(serde_json::Value::String(name.to_string())).ok()
}
