//! # Pattern Library
//!
//! Category-organized regular expression signatures for the scanner. Each
//! category carries a weight used by the severity math, and a fixed subset
//! of categories is critical (see [`crate::models::CRITICAL_CATEGORIES`]).
//!
//! All expressions compile once at construction and are case-insensitive.
//! Construction with the built-in set cannot fail; adding caller-supplied
//! patterns fails fast on the first expression the host dialect rejects,
//! rather than silently dropping a detection rule.

use std::collections::BTreeMap;

use regex::Regex;

use crate::models::{ThreatCategory, VigilError};

/// One compiled detection pattern.
#[derive(Debug)]
pub struct PatternDef {
    /// Stable identifier, used in threat records and logs.
    pub id: String,
    /// The compiled expression.
    pub regex: Regex,
}

/// The category-to-patterns map with per-category weights.
#[derive(Debug)]
pub struct PatternLibrary {
    categories: BTreeMap<ThreatCategory, Vec<PatternDef>>,
    weights: BTreeMap<ThreatCategory, f64>,
}

/// `(category, id, expression)` rows for the built-in signature set.
///
/// Sources: instruction-override families from Perez & Ribeiro (2022),
/// exfiltration verbs from Liu et al. (2023), agent-attack families from
/// Greshake et al. (2023).
const BUILTIN: &[(ThreatCategory, &str, &str)] = &[
    // ============================================================
    // INJECTION - instruction override, shell and SQL injection
    // ============================================================
    (
        ThreatCategory::Injection,
        "ignore_previous",
        r"(?i)ignore\s+(all\s+)?(previous|prior|above)\s+(instructions?|prompts?|rules?)",
    ),
    (
        ThreatCategory::Injection,
        "disregard_instructions",
        r"(?i)disregard\s+(all\s+)?(your\s+)?(previous|prior|above|system)\s+(instructions?|prompts?|rules?|guidelines?)",
    ),
    (
        ThreatCategory::Injection,
        "forget_everything",
        r"(?i)forget\s+(everything|all)\s+(you|your|i)\b",
    ),
    (
        ThreatCategory::Injection,
        "new_instructions",
        r"(?i)\bnew\s+instructions?\s*:",
    ),
    (
        ThreatCategory::Injection,
        "reveal_system_prompt",
        r"(?i)(reveal|show|display|print|repeat|output)\s+(me\s+)?(your|the)\s+(system\s+)?(prompt|instructions?)",
    ),
    (
        ThreatCategory::Injection,
        "shell_chain",
        r"(?i)(;|&&|\|\|)\s*(rm|curl|wget|nc|ncat|bash|sh|python|perl)\b",
    ),
    (
        ThreatCategory::Injection,
        "sql_injection",
        r"(?i)('\s*or\s+'?1'?\s*=\s*'?1|union\s+select|;\s*drop\s+table)",
    ),
    // ============================================================
    // EXFIL - outbound transfer verbs and beacon endpoints
    // ============================================================
    (
        ThreatCategory::Exfil,
        "send_data_to",
        r"(?i)(send|post|upload|transmit|exfiltrate|forward|leak)\s+(this\s+|all\s+|the\s+)?(data|info|information|contents?|files?|secrets?|it)\s+to\b",
    ),
    (
        ThreatCategory::Exfil,
        "beacon_endpoint",
        r"(?i)\b(webhook\.site|pastebin\.com|requestbin|burpcollaborator|interactsh)\b",
    ),
    (
        ThreatCategory::Exfil,
        "netcat_remote",
        r"(?i)\b(nc|ncat|netcat)\s+(-\w+\s+)*\d{1,3}(\.\d{1,3}){3}",
    ),
    (
        ThreatCategory::Exfil,
        "scp_remote",
        r"(?i)\b(scp|rsync)\s+\S+\s+\S*@\S+:",
    ),
    (
        ThreatCategory::Exfil,
        "curl_upload",
        r"(?i)\bcurl\s+(-\w+\s+)*(--data|--form|--upload-file|-d\b|-F\b|-T\b)",
    ),
    // ============================================================
    // MANIPULATION - deception, coercion, social engineering
    // ============================================================
    (
        ThreatCategory::Manipulation,
        "keep_secret",
        r"(?i)(don'?t\s+tell|do\s+not\s+tell|keep\s+(this|it)\s+(a\s+)?secret|(just\s+)?between\s+us)",
    ),
    (
        ThreatCategory::Manipulation,
        "coercion",
        r"(?i)(you\s+must\s+comply|or\s+else\b|comply\s+immediately|you\s+have\s+no\s+choice)",
    ),
    (
        ThreatCategory::Manipulation,
        "false_memory",
        r"(?i)(you\s+already\s+agreed|as\s+we\s+(already\s+)?discussed|you\s+promised\s+to)",
    ),
    (
        ThreatCategory::Manipulation,
        "pretend_not_ai",
        r"(?i)(pretend|act|imagine|roleplay)\s+(that\s+)?(you('?re| are))\s+(not\s+)?(an?\s+)?(ai|human)",
    ),
    // ============================================================
    // OBFUSCATION - active decode/eval usage
    // ============================================================
    (
        ThreatCategory::Obfuscation,
        "decode_call",
        r"(?i)\b(atob|btoa|base64_decode|b64decode|fromCharCode)\b",
    ),
    (
        ThreatCategory::Obfuscation,
        "eval_call",
        r"(?i)\b(eval|exec|execfile)\s*\(",
    ),
    (
        ThreatCategory::Obfuscation,
        "hex_escape_run",
        r"(\\x[0-9a-fA-F]{2}){4,}",
    ),
    (
        ThreatCategory::Obfuscation,
        "unicode_escape_run",
        r"(\\u[0-9a-fA-F]{4}){3,}",
    ),
    // ============================================================
    // DANGEROUS_OPS - destructive shell/SQL, system paths
    // ============================================================
    (
        ThreatCategory::DangerousOps,
        "rm_recursive_force",
        r"(?i)\brm\s+-[a-z]*r[a-z]*f|\brm\s+-[a-z]*f[a-z]*r",
    ),
    (
        ThreatCategory::DangerousOps,
        "fork_bomb",
        r":\(\)\s*\{\s*:\|:\s*&\s*\}\s*;",
    ),
    (
        ThreatCategory::DangerousOps,
        "drop_database",
        r"(?i)\b(drop|truncate)\s+(table|database|schema)\b",
    ),
    (
        ThreatCategory::DangerousOps,
        "system_file_paths",
        r"(?i)(/etc/passwd|/etc/shadow|\.ssh/id_rsa|/etc/sudoers|C:\\Windows\\System32)",
    ),
    (
        ThreatCategory::DangerousOps,
        "disk_destroy",
        r"(?i)\b(mkfs(\.\w+)?|dd\s+if=|shred\s+-|diskpart)\b",
    ),
    (
        ThreatCategory::DangerousOps,
        "world_writable",
        r"(?i)chmod\s+(-R\s+)?777\b",
    ),
    // ============================================================
    // SUSPICIOUS_URLS - hostile targets
    // ============================================================
    (
        ThreatCategory::SuspiciousUrls,
        "raw_ip_url",
        r"https?://\d{1,3}(\.\d{1,3}){3}",
    ),
    (ThreatCategory::SuspiciousUrls, "onion_service", r"(?i)\.onion\b"),
    (
        ThreatCategory::SuspiciousUrls,
        "tunnel_host",
        r"(?i)(ngrok\.io|ngrok-free\.app|serveo\.net|localhost\.run|trycloudflare\.com|loca\.lt)",
    ),
    (
        ThreatCategory::SuspiciousUrls,
        "hostile_domain_keyword",
        r"(?i)https?://\S*\b(evil|attacker|malicious|phish|c2server|exfil)\S*",
    ),
    // ============================================================
    // AGENT_ATTACKS - multi-agent manipulation, sandbox escape
    // ============================================================
    (
        ThreatCategory::AgentAttacks,
        "agent_impersonation",
        r"(?i)(as\s+the\s+(orchestrator|supervisor|lead)\s+agent|i\s+am\s+the\s+(orchestrator|supervisor))",
    ),
    (
        ThreatCategory::AgentAttacks,
        "agent_relay",
        r"(?i)(tell\s+the\s+other\s+agents?|relay\s+this\s+to|propagate\s+this\s+(message|instruction))",
    ),
    (
        ThreatCategory::AgentAttacks,
        "tool_hijack",
        r"(?i)(override\s+the\s+tool\s+(output|result)|replace\s+the\s+tool\s+description)",
    ),
    (
        ThreatCategory::AgentAttacks,
        "sandbox_escape",
        r"(?i)(escape\s+(the\s+)?sandbox|break\s+out\s+of\s+(the\s+)?(container|sandbox|vm))",
    ),
];

/// Built-in per-category weights for the severity math.
const BUILTIN_WEIGHTS: &[(ThreatCategory, f64)] = &[
    (ThreatCategory::Injection, 3.0),
    (ThreatCategory::Exfil, 3.0),
    (ThreatCategory::Manipulation, 2.0),
    (ThreatCategory::Obfuscation, 1.5),
    (ThreatCategory::DangerousOps, 2.5),
    (ThreatCategory::SuspiciousUrls, 1.5),
    (ThreatCategory::AgentAttacks, 3.0),
    (ThreatCategory::IndirectInjection, 3.0),
    (ThreatCategory::EmergingThreat, 2.5),
    (ThreatCategory::Canary, 10.0),
    (ThreatCategory::KnownAttack, 10.0),
];

impl PatternLibrary {
    /// The built-in signature set.
    pub fn new() -> Self {
        let mut categories: BTreeMap<ThreatCategory, Vec<PatternDef>> = BTreeMap::new();
        for (category, id, expr) in BUILTIN {
            let regex = Regex::new(expr).expect("built-in pattern is known-good");
            categories.entry(*category).or_default().push(PatternDef {
                id: (*id).to_string(),
                regex,
            });
        }
        let weights = BUILTIN_WEIGHTS.iter().copied().collect();
        Self { categories, weights }
    }

    /// Add caller-supplied expressions to a category.
    ///
    /// Fails fast on the first expression that does not compile; patterns
    /// added before the failure are kept.
    pub fn add_patterns(
        &mut self,
        category: ThreatCategory,
        exprs: &[String],
    ) -> Result<(), VigilError> {
        for (i, expr) in exprs.iter().enumerate() {
            let id = format!("{}_custom_{}", category.as_str(), i);
            let regex = Regex::new(expr).map_err(|source| VigilError::InvalidPattern {
                pattern_id: id.clone(),
                source,
            })?;
            self.categories
                .entry(category)
                .or_default()
                .push(PatternDef { id, regex });
        }
        Ok(())
    }

    /// Override the weight of a category.
    pub fn set_weight(&mut self, category: ThreatCategory, weight: f64) {
        self.weights.insert(category, weight);
    }

    /// The weight of a category (1.0 for categories without an entry).
    pub fn weight(&self, category: ThreatCategory) -> f64 {
        self.weights.get(&category).copied().unwrap_or(1.0)
    }

    /// Iterate `(category, patterns)` in taxonomy order.
    pub fn iter(&self) -> impl Iterator<Item = (ThreatCategory, &[PatternDef])> {
        self.categories.iter().map(|(c, v)| (*c, v.as_slice()))
    }

    /// Patterns of a single category.
    pub fn patterns(&self, category: ThreatCategory) -> &[PatternDef] {
        self.categories
            .get(&category)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

impl Default for PatternLibrary {
    fn default() -> Self {
        Self::new()
    }
}
