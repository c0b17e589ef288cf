//! Configuration types for the CORD engine.

use std::collections::BTreeMap;
use std::path::PathBuf;

use cord_vigil::{
    CircuitConfig, MemoryConfig, PatrolThresholds, ProactiveConfig, RateLimitConfig,
};
use serde::{Deserialize, Serialize};

/// Per-dimension weights for the scored phase.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DimensionWeights {
    /// Injection regex family.
    pub injection: f64,
    /// Exfiltration regex family.
    pub exfil: f64,
    /// Dangerous verbs or elevated grants.
    pub privilege: f64,
    /// Proposal drifting from the declared session intent.
    pub intent_drift: f64,
    /// High-impact verb classification.
    pub irreversibility: f64,
    /// Breadth of simultaneously elevated dimensions.
    pub anomaly: f64,
    /// Deception signal count.
    pub moral_check: f64,
    /// Soft override imperatives.
    pub prompt_injection: f64,
    /// PII presence, amplified on outbound actions.
    pub pii_leakage: f64,
    /// Identity-claim family.
    pub identity_check: f64,
    /// Tool tier lookup.
    pub tool_risk: f64,
    /// Financial pattern set.
    pub financial_risk: f64,
    /// Suspicious network target features.
    pub network_target_risk: f64,
}

impl Default for DimensionWeights {
    fn default() -> Self {
        Self {
            injection: 4.0,
            exfil: 4.0,
            privilege: 4.0,
            intent_drift: 3.0,
            irreversibility: 4.0,
            anomaly: 2.0,
            moral_check: 5.0,
            prompt_injection: 5.0,
            pii_leakage: 4.0,
            identity_check: 3.0,
            tool_risk: 1.0,
            financial_risk: 4.0,
            network_target_risk: 3.0,
        }
    }
}

/// Score-to-decision thresholds, inclusive-lower reals.
///
/// `score < allow` allows, `< contain` contains, `< challenge`
/// challenges, and everything at or above blocks.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DecisionThresholds {
    /// Upper bound (exclusive) of the allow band.
    pub allow: f64,
    /// Upper bound (exclusive) of the contain band.
    pub contain: f64,
    /// Upper bound (exclusive) of the challenge band.
    pub challenge: f64,
    /// Lower bound (inclusive) of the block band.
    pub block: f64,
}

impl Default for DecisionThresholds {
    fn default() -> Self {
        Self {
            allow: 3.0,
            contain: 5.0,
            challenge: 7.0,
            block: 7.0,
        }
    }
}

/// Evaluation cache settings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum cached verdicts.
    pub max_size: usize,
    /// Entry lifetime in milliseconds.
    pub ttl_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            ttl_ms: 60_000,
        }
    }
}

/// The engine configuration. Every field has a production default; a
/// caller overrides only what it needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CordConfig {
    /// Dimension weights.
    pub weights: DimensionWeights,
    /// Score-to-decision thresholds.
    pub thresholds: DecisionThresholds,
    /// Patrol severity thresholds.
    pub patrol_thresholds: PatrolThresholds,
    /// Tool tier key to risk value.
    pub tool_risk_tiers: BTreeMap<String, f64>,
    /// Verbs that mark a proposal irreversible.
    pub high_impact_verbs: Vec<String>,
    /// Keywords that mark a proposal read-only safe.
    pub allowlist_keywords: Vec<String>,
    /// Extra patrol patterns per category name.
    pub patterns: BTreeMap<String, Vec<String>>,
    /// Rate limiter settings.
    pub rate_limit: RateLimitConfig,
    /// Circuit breaker settings.
    pub circuit: CircuitConfig,
    /// Evaluation cache settings.
    pub cache: CacheConfig,
    /// Session memory settings.
    pub memory: MemoryConfig,
    /// Proactive scanner settings.
    pub proactive: ProactiveConfig,
    /// Whether the patrol is installed at all.
    pub use_patrol: bool,
    /// Audit journal path (`CORD_LOG_PATH` overrides).
    pub log_path: PathBuf,
    /// Intent lock file path.
    pub intent_lock_path: PathBuf,
    /// Root every path-scoped target must stay under.
    pub repo_root: PathBuf,
}

impl Default for CordConfig {
    fn default() -> Self {
        Self {
            weights: DimensionWeights::default(),
            thresholds: DecisionThresholds::default(),
            patrol_thresholds: PatrolThresholds::default(),
            tool_risk_tiers: default_tool_risk_tiers(),
            high_impact_verbs: default_high_impact_verbs(),
            allowlist_keywords: default_allowlist_keywords(),
            patterns: BTreeMap::new(),
            rate_limit: RateLimitConfig::default(),
            circuit: CircuitConfig::default(),
            cache: CacheConfig::default(),
            memory: MemoryConfig::default(),
            proactive: ProactiveConfig::default(),
            use_patrol: true,
            log_path: PathBuf::from("cord_audit.jsonl"),
            intent_lock_path: PathBuf::from("cord_intent.lock"),
            repo_root: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }
}

fn default_tool_risk_tiers() -> BTreeMap<String, f64> {
    BTreeMap::from([
        ("exec".to_string(), 3.0),
        ("network".to_string(), 2.5),
        ("browser".to_string(), 2.0),
        ("message".to_string(), 1.5),
        ("write".to_string(), 1.5),
        ("edit".to_string(), 1.0),
        ("read".to_string(), 0.0),
        ("query".to_string(), 0.0),
    ])
}

fn default_high_impact_verbs() -> Vec<String> {
    [
        "rm -rf", "rmdir", "drop table", "drop database", "truncate", "format",
        "mkfs", "shred", "dd if=", "overwrite", "wipe", "destroy", "revoke all",
    ]
    .map(String::from)
    .to_vec()
}

fn default_allowlist_keywords() -> Vec<String> {
    [
        "status", "log", "diff", "list", "read", "show", "view", "get", "help",
        "version", "info", "query", "search", "explain", "summarize", "describe",
        "inspect", "review",
    ]
    .map(String::from)
    .to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CordConfig::default();
        assert_eq!(config.thresholds.allow, 3.0);
        assert_eq!(config.thresholds.challenge, 7.0);
        assert_eq!(config.tool_risk_tiers["exec"], 3.0);
        assert_eq!(config.tool_risk_tiers["read"], 0.0);
        assert!(config.use_patrol);
        assert_eq!(config.cache.max_size, 1000);
        assert_eq!(config.memory.window_size, 20);
    }

    #[test]
    fn test_partial_override_from_json() {
        let config: CordConfig =
            serde_json::from_str(r#"{"thresholds": {"allow": 2.0, "contain": 4.0, "challenge": 6.0, "block": 6.0}, "use_patrol": false}"#)
                .unwrap();
        assert_eq!(config.thresholds.allow, 2.0);
        assert!(!config.use_patrol);
        // Untouched sections keep their defaults.
        assert_eq!(config.weights.moral_check, 5.0);
    }

    #[test]
    fn test_round_trip() {
        let config = CordConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: CordConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.cache.max_size, config.cache.max_size);
    }
}
