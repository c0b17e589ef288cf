//! # The CORD Engine
//!
//! `evaluate_proposal` runs five phases:
//!
//! ```text
//! Phase 0  Patrol pre-scan      indirect-injection screen + stateful scan
//! Phase 1  Hard-block gates     moral / drift / prompt-injection articles
//! Phase 2  Scored dimensions    thirteen weighted risks (+ patrol boost)
//! Phase 3  Intent lock          absent lock upgrades to Challenge
//! Phase 4  Scope enforcement    path / network / command allow-lists
//! Phase 5  Audit log            hash-chained journal entry, log_id
//! ```
//!
//! Phases 0 and 1 may short-circuit to a hard block (sentinel score 99).
//! The pipeline is fail-closed: scope failures block, and an absent
//! intent lock never improves a decision.
//!
//! One evaluation proceeds without yielding; there are no suspension
//! points inside the engine and no network calls. Callers impose their
//! own timeouts.

use std::collections::BTreeMap;
use std::path::PathBuf;

use cord_audit::{AuditLog, AuditRecord, IntentScope, IntentStore};
use cord_vigil::{
    BreakerError, CanaryType, Decision, Normalizer, Patrol, PatrolStats, PlantedCanary,
    ProactiveScanResult, ScanResult, ThreatForecast, VigilConfig,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cache::{CacheStats, EvalCache};
use crate::config::CordConfig;
use crate::dimensions::DimensionScorer;
use crate::error::{CordError, Result};
use crate::gates::HardBlockGates;
use crate::plan::{validate_plan_inner, PlanVerdict};
use crate::proposal::Proposal;
use crate::verdict::Verdict;

/// Handle returned by `start_session`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionHandle {
    /// Session key to put on subsequent proposals.
    pub session_id: String,
    /// The declared goal now bound in the intent lock.
    pub goal: String,
}

/// The decision engine. Owns the patrol singleton, the evaluation cache,
/// the audit journal and the intent store for one process.
///
/// Callers may share the engine behind a mutex; each evaluation is
/// sequential and observes a consistent patrol state.
pub struct CordEngine {
    config: CordConfig,
    gates: HardBlockGates,
    dimensions: DimensionScorer,
    normalizer: Normalizer,
    patrol: Option<Patrol>,
    cache: EvalCache,
    audit: AuditLog,
    intent: IntentStore,
}

impl CordEngine {
    /// Build an engine from configuration.
    ///
    /// # Errors
    ///
    /// Fails on a malformed `CORD_LOG_KEY` or an invalid extra detection
    /// pattern; both would silently weaken the pipeline if coerced.
    pub fn new(config: CordConfig) -> Result<Self> {
        let audit = AuditLog::from_env(config.log_path.clone())?;
        let patrol = if config.use_patrol {
            Some(Patrol::with_config(VigilConfig {
                thresholds: config.patrol_thresholds,
                memory: config.memory,
                rate_limit: config.rate_limit,
                circuit: config.circuit,
                proactive: config.proactive,
                extra_patterns: config.patterns.clone(),
            })?)
        } else {
            None
        };
        let cache = EvalCache::new(config.cache);
        let intent = IntentStore::new(config.intent_lock_path.clone());
        info!(
            patrol = config.use_patrol,
            log = %audit.path().display(),
            "CORD engine initialized"
        );
        Ok(Self {
            config,
            gates: HardBlockGates::new(),
            dimensions: DimensionScorer::new(),
            normalizer: Normalizer::new(),
            patrol,
            cache,
            audit,
            intent,
        })
    }

    /// Public evaluation entry point: rate limiting, cache, pipeline.
    ///
    /// Accepts a bare string or a full [`Proposal`]. Rate rejections are
    /// retryable errors, never audit entries.
    pub fn evaluate(&mut self, input: impl Into<Proposal>) -> Result<Verdict> {
        let proposal = input.into();

        if proposal.use_patrol {
            if let Some(patrol) = &mut self.patrol {
                let decision = patrol.check_rate(proposal.session_key());
                if !decision.allowed {
                    return Err(CordError::RateLimited {
                        reason: decision.reason.as_str().to_string(),
                        retry_after_ms: decision.retry_after_ms.unwrap_or(0),
                    });
                }
            }
        }

        if let Some(hit) = self.cache.get(&proposal.text) {
            debug!("cache hit for proposal text");
            return Ok(hit);
        }

        let verdict = self.evaluate_proposal(&proposal)?;
        self.cache.insert(&proposal.text, &verdict);
        Ok(verdict)
    }

    /// Evaluate and raise [`CordError::PolicyBlocked`] on a `Block`.
    pub fn evaluate_guarded(&mut self, input: impl Into<Proposal>) -> Result<Verdict> {
        let verdict = self.evaluate(input)?;
        if verdict.is_blocked() {
            return Err(CordError::PolicyBlocked {
                decision: verdict.decision,
                score: verdict.score,
                reasons: verdict.reasons,
            });
        }
        Ok(verdict)
    }

    /// Evaluate a batch sequentially, sharing the cache.
    pub fn evaluate_batch(&mut self, proposals: Vec<Proposal>) -> Result<Vec<Verdict>> {
        proposals.into_iter().map(|p| self.evaluate(p)).collect()
    }

    /// Run the five-phase pipeline, bypassing rate limiting and cache.
    pub fn evaluate_proposal(&mut self, proposal: &Proposal) -> Result<Verdict> {
        // Input coercion: an empty proposal is a zero-risk evaluation,
        // never an error.
        if proposal.text.trim().is_empty() && proposal.raw_input.is_none() {
            let mut verdict = Verdict::scored(
                Decision::Allow,
                0.0,
                BTreeMap::new(),
                vec!["empty proposal".to_string()],
            );
            self.apply_intent_phases(proposal, &mut verdict);
            return self.log_and_finish(proposal, verdict);
        }

        let session = proposal.session_key().to_string();

        // Phase 0: patrol pre-scan. Scan first, then act, so the patrol
        // borrow is released before anything else touches the engine.
        let mut patrol_result: Option<ScanResult> = None;
        let mut proactive_result: Option<ProactiveScanResult> = None;
        let mut pre_block: Option<Verdict> = None;
        if proposal.use_patrol {
            if let Some(patrol) = &mut self.patrol {
                // 0a: untrusted external content is screened first.
                if let Some(raw) = &proposal.raw_input {
                    let screen = patrol.scan_input(raw, "raw_input");
                    if screen.is_blocked() {
                        warn!(severity = screen.severity, "indirect injection blocked");
                        let mut verdict = Verdict::hard_block(
                            format!("VIGIL INDIRECT INJECTION — {}", screen.summary),
                            BTreeMap::from([(
                                "indirect_injection".to_string(),
                                screen.severity,
                            )]),
                        );
                        verdict.proactive_result = Some(screen);
                        pre_block = Some(verdict);
                    } else {
                        proactive_result = Some(screen);
                    }
                }

                // 0b: stateful scan over every text-bearing field.
                if pre_block.is_none() {
                    let scan = patrol.scan(&proposal.combined_scan_text(), &session);
                    if scan.is_blocked() {
                        warn!(severity = scan.severity, "patrol pre-scan blocked");
                        let mut reason = format!("VIGIL BLOCK — {}", scan.summary);
                        if let Some(by) = &scan.escalated_by {
                            reason.push_str(&format!(" (escalated by {by})"));
                        }
                        let mut verdict = Verdict::hard_block(
                            reason,
                            BTreeMap::from([("patrol".to_string(), scan.severity)]),
                        );
                        verdict.patrol_result = Some(scan);
                        verdict.proactive_result = proactive_result.take();
                        pre_block = Some(verdict);
                    } else {
                        patrol_result = Some(scan);
                    }
                }
            }
        }
        if let Some(verdict) = pre_block {
            return self.log_and_finish(proposal, verdict);
        }

        // Phase 1: hard-block gates over the normalized combined text.
        let normalized = self.normalizer.normalize(&proposal.text);
        if let Some(hit) = self.gates.check(&normalized.combined) {
            warn!(article = hit.reason, "hard-block gate fired");
            let mut verdict = Verdict::hard_block(
                hit.reason,
                BTreeMap::from([(hit.dimension.to_string(), 5.0)]),
            );
            verdict.patrol_result = patrol_result;
            verdict.proactive_result = proactive_result;
            return self.log_and_finish(proposal, verdict);
        }

        // Phase 2: scored dimensions.
        let scores = self
            .dimensions
            .score(proposal, &normalized.combined, &self.config);
        let mut total = scores.weighted_total(&self.config);
        let mut reasons = scores.reasons.clone();
        debug!(total, "dimension scoring complete");

        // Phase 2b: patrol amplification.
        if let Some(scan) = &patrol_result {
            if scan.decision == Decision::Challenge {
                total += 0.5 * scan.severity;
                reasons.push("VIGIL suspicious".to_string());
            }
            if scan.was_obfuscated {
                total += 2.0;
                reasons.push("Obfuscated content detected by VIGIL".to_string());
            }
        }
        if let Some(screen) = &proactive_result {
            if screen.decision == Decision::Challenge {
                total += 0.3 * screen.severity;
            }
        }

        let decision = self.map_score(total);
        let mut verdict = Verdict::scored(decision, total, scores.risks, reasons);
        verdict.patrol_result = patrol_result;
        verdict.proactive_result = proactive_result;

        // Phases 3 and 4.
        self.apply_intent_phases(proposal, &mut verdict);

        // Phase 5.
        self.log_and_finish(proposal, verdict)
    }

    /// Cross-item validation over a list of sub-proposals.
    pub fn validate_plan(
        &mut self,
        tasks: &[Proposal],
        session_intent: Option<&str>,
    ) -> Result<PlanVerdict> {
        validate_plan_inner(
            tasks,
            session_intent,
            &self.gates,
            &self.dimensions,
            &self.normalizer,
            &self.config,
        )
    }

    /// Start a locked session: writes the intent lock.
    pub fn start_session(
        &mut self,
        user_id: &str,
        goal: &str,
        scope: IntentScope,
        passphrase: &str,
    ) -> Result<SessionHandle> {
        self.intent.set(user_id, passphrase, goal, scope)?;
        info!(user_id, "intent lock written");
        Ok(SessionHandle {
            session_id: format!("{user_id}:{}", &EvalCache::key_for(goal)[..8]),
            goal: goal.to_string(),
        })
    }

    /// End the locked session: removes the intent lock file.
    pub fn end_session(&mut self) -> Result<()> {
        self.intent.clear()?;
        info!("intent lock removed");
        Ok(())
    }

    /// Verify a passphrase against the current lock.
    pub fn verify_session(&self, passphrase: &str) -> bool {
        self.intent.verify_passphrase(passphrase)
    }

    /// Plant a canary through the patrol.
    pub fn plant_canary(
        &mut self,
        types: &[CanaryType],
        session_id: &str,
    ) -> Option<PlantedCanary> {
        self.patrol
            .as_mut()
            .map(|p| p.plant_canary(types, session_id))
    }

    /// Scan a model output for canary extraction and threats.
    pub fn scan_output(&mut self, text: &str, context: &str) -> Option<ScanResult> {
        self.patrol.as_mut().map(|p| p.scan_output(text, context))
    }

    /// Screen untrusted content for indirect injection.
    pub fn scan_input(&mut self, content: &str, source: &str) -> Option<ProactiveScanResult> {
        self.patrol.as_mut().map(|p| p.scan_input(content, source))
    }

    /// Forecast a session's threat posture.
    pub fn threat_posture(&self, session_id: &str) -> Option<ThreatForecast> {
        self.patrol.as_ref().map(|p| p.assess_threat_posture(session_id))
    }

    /// Run a caller-supplied async operation (an LLM or I/O call) under
    /// the patrol's circuit breaker.
    ///
    /// An open circuit surfaces as [`CordError::CircuitOpen`]; the
    /// operation's own failure passes back in the inner result and counts
    /// against the breaker. Without a patrol the operation runs bare.
    pub async fn execute_protected<F, Fut, T, E>(
        &mut self,
        f: F,
    ) -> Result<std::result::Result<T, E>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = std::result::Result<T, E>>,
    {
        let Some(patrol) = &mut self.patrol else {
            return Ok(f().await);
        };
        match patrol.breaker().execute(f).await {
            Ok(value) => Ok(Ok(value)),
            Err(BreakerError::Open { retry_after_ms }) => {
                Err(CordError::CircuitOpen { retry_after_ms })
            }
            Err(BreakerError::Inner(e)) => Ok(Err(e)),
        }
    }

    /// Walk and verify the audit chain; returns the entry count.
    pub fn verify_chain(&self) -> Result<usize> {
        Ok(self.audit.verify_chain()?)
    }

    /// Patrol counters, when the patrol is installed.
    pub fn patrol_stats(&self) -> Option<PatrolStats> {
        self.patrol.as_ref().map(|p| p.stats())
    }

    /// Cache counters.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Zero patrol counters and behavioral memory (canaries persist) and
    /// drop the evaluation cache.
    pub fn reset_stats(&mut self) {
        if let Some(patrol) = &mut self.patrol {
            patrol.reset_stats();
        }
        self.cache.clear();
    }

    /// Mutable patrol access for callers wiring up subscriptions or the
    /// circuit breaker.
    pub fn patrol_mut(&mut self) -> Option<&mut Patrol> {
        self.patrol.as_mut()
    }

    /// The audit journal path.
    pub fn audit_path(&self) -> PathBuf {
        self.audit.path().to_path_buf()
    }

    fn map_score(&self, total: f64) -> Decision {
        let t = &self.config.thresholds;
        if total < t.allow {
            Decision::Allow
        } else if total < t.contain {
            Decision::Contain
        } else if total < t.challenge {
            Decision::Challenge
        } else {
            Decision::Block
        }
    }

    /// Phases 3 and 4: intent lock and scope enforcement.
    fn apply_intent_phases(&self, proposal: &Proposal, verdict: &mut Verdict) {
        let Some(lock) = self.intent.load() else {
            verdict.reasons.push("Intent not locked".to_string());
            verdict.decision = verdict.decision.max(Decision::Challenge);
            return;
        };

        let scope = &lock.scope;
        let mut out_of_scope = false;

        if let Some(path) = &proposal.path {
            if !scope.permits_path(path, &self.config.repo_root) {
                debug!(%path, "path outside declared scope");
                out_of_scope = true;
            }
        }
        if let Some(target) = &proposal.network_target {
            if !scope.permits_network(target) {
                debug!(%target, "network target outside declared scope");
                out_of_scope = true;
            }
        }
        if !scope.allow_commands.is_empty() && !scope.permits_command(&proposal.text) {
            debug!("command outside declared scope");
            out_of_scope = true;
        }

        if out_of_scope {
            verdict.reasons.push("Out of scope".to_string());
            verdict.decision = Decision::Block;
        }
    }

    /// Phase 5: journal the verdict and attach log id + explanation.
    fn log_and_finish(&mut self, proposal: &Proposal, mut verdict: Verdict) -> Result<Verdict> {
        let record = AuditRecord {
            decision: verdict.decision.as_str().to_string(),
            score: verdict.score,
            risks: verdict.risks.clone(),
            reasons: verdict.reasons.clone(),
            proposal: Some(proposal.text.clone()),
            path: proposal.path.clone(),
            network_target: proposal.network_target.clone(),
            hard_block: verdict.hard_block,
        };
        let log_id = self.audit.append(&record)?;
        verdict.log_id = Some(log_id);
        let explanation = verdict.explain();
        verdict.explanation = Some(explanation);
        debug!(decision = %verdict.decision, score = verdict.score, "verdict logged");
        Ok(verdict)
    }
}
