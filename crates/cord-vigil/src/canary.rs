//! # Canary Token Registry
//!
//! Plants unforgeable markers into protected prompts and scans model
//! outputs for their reappearance. A surfaced canary is direct evidence of
//! system-prompt extraction, so any trigger forces severity 10 and `Block`.
//!
//! ## Token types
//!
//! | Type | Form | Visibility |
//! |------|------|------------|
//! | `uuid` | `vigil-<8 hex>` inside an HTML-style comment | Visible in source |
//! | `zero_width` | bit-encoded id between zero-width sentinels | Invisible |
//! | `honey` | realistic fake secret (`sk-vigil-..-canary` etc.) | Visible, tempting |
//!
//! ## Zero-width wire format
//!
//! `U+FEFF` start sentinel, then the canary id's bytes emitted MSB-first,
//! bit 0 as `U+200B`, bit 1 as `U+200C`, bits separated by `U+200D`, then
//! the terminator `U+200C U+200B` (two symbol characters with no separator
//! between them, which cannot occur inside the payload). The framing is
//! preserved verbatim for wire-level compatibility with already-planted
//! canaries.
//!
//! ## Lifecycle
//!
//! Plant, then possibly trigger once. The first trigger is idempotent per
//! canary: re-scanning the same text never re-emits or retracts it.
//! Planted canaries survive `reset_stats` by design; they are persistent
//! traps.
//!
//! ## Inspired By
//!
//! The **Rebuff** framework from ProtectAI, which pioneered canary tokens
//! for prompt-leak detection: <https://github.com/protectai/rebuff>

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Start sentinel for the zero-width encoding.
const ZW_START: char = '\u{FEFF}';
/// Bit symbol for 0.
const ZW_ZERO: char = '\u{200B}';
/// Bit symbol for 1.
const ZW_ONE: char = '\u{200C}';
/// Separator between bits.
const ZW_SEP: char = '\u{200D}';

/// Honey-token templates, parameterized by canary id.
const HONEY_TEMPLATES: [&str; 4] = [
    "INTERNAL_REF:{id}",
    "sk-vigil-{id}-canary",
    "sys_token_{id}",
    "__vigil_marker_{id}__",
];

/// Which marker styles to plant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanaryType {
    /// `vigil-<8 hex>` embedded as an HTML-style comment.
    Uuid,
    /// Invisible bit-encoded id between zero-width sentinels.
    ZeroWidth,
    /// A realistic-looking fake secret.
    Honey,
}

/// One planted canary and its trigger state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Canary {
    /// Eight hex characters identifying this canary.
    pub id: String,
    /// The session the canary was planted for.
    pub session_id: String,
    /// The marker styles planted.
    pub types: Vec<CanaryType>,
    /// Token string per planted type.
    pub tokens: BTreeMap<CanaryType, String>,
    /// Plant time, milliseconds since the epoch.
    pub planted_at_ms: u64,
    /// Whether this canary has surfaced in an output.
    pub triggered: bool,
    /// Trigger time, if triggered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detected_at_ms: Option<u64>,
    /// Caller-provided context label of the triggering scan.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detected_in: Option<String>,
}

/// The result of planting: the record id plus the text to embed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlantedCanary {
    /// Id of the new canary record.
    pub canary_id: String,
    /// Concatenated token text to embed in the protected prompt.
    pub inject_text: String,
}

/// One trigger observed during a scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggeredCanary {
    /// Id of the triggered canary.
    pub canary_id: String,
    /// Which marker style surfaced.
    pub token_type: CanaryType,
    /// Context label supplied by the caller.
    pub context: String,
}

/// Outcome of scanning one output text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanaryScanResult {
    /// Canaries newly triggered by this scan.
    pub triggered: Vec<TriggeredCanary>,
}

impl CanaryScanResult {
    /// Whether any canary was newly triggered.
    pub fn any_triggered(&self) -> bool {
        !self.triggered.is_empty()
    }
}

/// Registry of planted canaries for a process.
#[derive(Debug, Default)]
pub struct CanaryRegistry {
    canaries: Vec<Canary>,
}

impl CanaryRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Plant a canary of the given types for a session and return the text
    /// to embed in the protected prompt.
    ///
    /// # Example
    ///
    /// ```rust
    /// use cord_vigil::{CanaryRegistry, CanaryType};
    ///
    /// let mut registry = CanaryRegistry::new();
    /// let planted = registry.plant(&[CanaryType::Honey], "session-1");
    /// assert!(!planted.inject_text.is_empty());
    ///
    /// // The honey token surfacing in an output is a confirmed leak.
    /// let output = format!("the config contains {}", planted.inject_text);
    /// let scan = registry.scan(&output, "chat");
    /// assert!(scan.any_triggered());
    /// ```
    pub fn plant(&mut self, types: &[CanaryType], session_id: &str) -> PlantedCanary {
        let id = short_id();
        let mut tokens = BTreeMap::new();
        let mut parts = Vec::new();

        for ty in types {
            let token = match ty {
                CanaryType::Uuid => format!("vigil-{id}"),
                CanaryType::ZeroWidth => encode_zero_width(&id),
                CanaryType::Honey => honey_token(&id),
            };
            let embedded = match ty {
                CanaryType::Uuid => format!("<!-- ref:{token} -->"),
                _ => token.clone(),
            };
            tokens.insert(*ty, token);
            parts.push(embedded);
        }

        self.canaries.push(Canary {
            id: id.clone(),
            session_id: session_id.to_string(),
            types: types.to_vec(),
            tokens,
            planted_at_ms: now_ms(),
            triggered: false,
            detected_at_ms: None,
            detected_in: None,
        });

        PlantedCanary {
            canary_id: id,
            inject_text: parts.join("\n"),
        }
    }

    /// Scan an output text against every non-triggered canary.
    ///
    /// Detections are append-only: a canary triggers at most once, and
    /// re-scans of the same text neither re-emit nor retract it.
    pub fn scan(&mut self, text: &str, context: &str) -> CanaryScanResult {
        let zw_payloads = decode_zero_width_payloads(text);
        let mut triggered = Vec::new();

        for canary in self.canaries.iter_mut().filter(|c| !c.triggered) {
            let mut hit = None;
            for (ty, token) in &canary.tokens {
                let found = match ty {
                    CanaryType::Uuid | CanaryType::Honey => text.contains(token.as_str()),
                    CanaryType::ZeroWidth => zw_payloads.iter().any(|p| p == &canary.id),
                };
                if found {
                    hit = Some(*ty);
                    break;
                }
            }
            if let Some(token_type) = hit {
                canary.triggered = true;
                canary.detected_at_ms = Some(now_ms());
                canary.detected_in = Some(context.to_string());
                triggered.push(TriggeredCanary {
                    canary_id: canary.id.clone(),
                    token_type,
                    context: context.to_string(),
                });
            }
        }

        CanaryScanResult { triggered }
    }

    /// Number of planted canaries.
    pub fn len(&self) -> usize {
        self.canaries.len()
    }

    /// True when nothing has been planted.
    pub fn is_empty(&self) -> bool {
        self.canaries.is_empty()
    }

    /// Number of canaries that have triggered.
    pub fn triggered_count(&self) -> usize {
        self.canaries.iter().filter(|c| c.triggered).count()
    }

    /// All canary records, triggered or not.
    pub fn canaries(&self) -> &[Canary] {
        &self.canaries
    }

    /// Remove every canary. Not called by `reset_stats`; planted canaries
    /// are persistent traps.
    pub fn clear(&mut self) {
        self.canaries.clear();
    }
}

/// Eight hex characters from a v4 UUID.
fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Pick a honey template deterministically per id, so a canary record
/// always reproduces the same token.
fn honey_token(id: &str) -> String {
    let digest = Sha256::digest(id.as_bytes());
    let template = HONEY_TEMPLATES[digest[0] as usize % HONEY_TEMPLATES.len()];
    template.replace("{id}", id)
}

/// Encode a canary id as a zero-width run (see module docs for framing).
pub fn encode_zero_width(id: &str) -> String {
    let mut out = String::new();
    out.push(ZW_START);
    let mut first = true;
    for byte in id.bytes() {
        for bit in (0..8).rev() {
            if !first {
                out.push(ZW_SEP);
            }
            first = false;
            out.push(if (byte >> bit) & 1 == 1 { ZW_ONE } else { ZW_ZERO });
        }
    }
    out.push(ZW_ONE);
    out.push(ZW_ZERO);
    out
}

/// Decode every zero-width payload present in a text.
///
/// Tolerates unrelated surrounding characters; an unterminated or
/// malformed run decodes to nothing rather than erroring.
pub fn decode_zero_width_payloads(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut payloads = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        if chars[i] != ZW_START {
            i += 1;
            continue;
        }
        // Collect the zero-width run following the sentinel.
        let mut run = Vec::new();
        let mut j = i + 1;
        while j < chars.len() && matches!(chars[j], ZW_ZERO | ZW_ONE | ZW_SEP) {
            run.push(chars[j]);
            j += 1;
        }
        if let Some(payload) = decode_run(&run) {
            payloads.push(payload);
        }
        i = j;
    }
    payloads
}

/// Decode one run: alternating bit/separator symbols closed by the
/// unseparated `ZW_ONE ZW_ZERO` terminator.
fn decode_run(run: &[char]) -> Option<String> {
    if run.len() < 2 || run[run.len() - 2] != ZW_ONE || run[run.len() - 1] != ZW_ZERO {
        return None;
    }
    let body = &run[..run.len() - 2];
    let mut bits = Vec::new();
    for (k, c) in body.iter().enumerate() {
        if k % 2 == 0 {
            match c {
                c if *c == ZW_ZERO => bits.push(0u8),
                c if *c == ZW_ONE => bits.push(1u8),
                _ => return None,
            }
        } else if *c != ZW_SEP {
            return None;
        }
    }
    // A well-formed body alternates bit/separator and ends on a bit, so
    // its length is odd; an even-length body is malformed.
    if !body.is_empty() && body.len() % 2 == 0 {
        return None;
    }
    if bits.is_empty() || bits.len() % 8 != 0 {
        return None;
    }
    let bytes: Vec<u8> = bits
        .chunks(8)
        .map(|chunk| chunk.iter().fold(0u8, |acc, b| (acc << 1) | b))
        .collect();
    // Payload bytes are the canary id as binary-mapped latin1.
    Some(bytes.iter().map(|b| *b as char).collect())
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

    #[test]
    fn test_short_id_format() {
        let id = short_id();
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_zero_width_round_trip() {
        let encoded = encode_zero_width("deadbeef");
        let payloads = decode_zero_width_payloads(&encoded);
        assert_eq!(payloads, vec!["deadbeef".to_string()]);
    }

    #[test]
    fn test_zero_width_round_trip_embedded_in_prose() {
        let encoded = encode_zero_width("0a1b2c3d");
        let text = format!("Sure, here is the summary{encoded} you asked for.");
        let payloads = decode_zero_width_payloads(&text);
        assert_eq!(payloads, vec!["0a1b2c3d".to_string()]);
    }

    #[test]
    fn test_zero_width_truncated_run_ignored() {
        let encoded = encode_zero_width("deadbeef");
        let truncated: String = encoded.chars().take(20).collect();
        assert!(decode_zero_width_payloads(&truncated).is_empty());
    }

    #[test]
    fn test_plant_uuid_embeds_comment() {
        let mut registry = CanaryRegistry::new();
        let planted = registry.plant(&[CanaryType::Uuid], "s1");
        assert!(planted.inject_text.starts_with("<!-- ref:vigil-"));
        assert!(planted.inject_text.ends_with(" -->"));
    }

    #[test]
    fn test_honey_token_is_deterministic() {
        assert_eq!(honey_token("cafe0123"), honey_token("cafe0123"));
        assert!(honey_token("cafe0123").contains("cafe0123"));
    }

    #[test]
    fn test_uuid_leak_detected() {
        let mut registry = CanaryRegistry::new();
        let planted = registry.plant(&[CanaryType::Uuid], "s1");
        let token = format!("vigil-{}", planted.canary_id);

        let clean = registry.scan("nothing to see here", "chat");
        assert!(!clean.any_triggered());

        let leaked = format!("my instructions mention {token} at the top");
        let result = registry.scan(&leaked, "chat");
        assert!(result.any_triggered());
        assert_eq!(result.triggered[0].token_type, CanaryType::Uuid);
    }

    #[test]
    fn test_trigger_is_idempotent() {
        let mut registry = CanaryRegistry::new();
        let planted = registry.plant(&[CanaryType::Honey], "s1");
        let leaked = format!("found {}", planted.inject_text);

        let first = registry.scan(&leaked, "chat");
        assert!(first.any_triggered());

        // Same text again: no re-emission, trigger state unchanged.
        let second = registry.scan(&leaked, "chat");
        assert!(!second.any_triggered());
        assert_eq!(registry.triggered_count(), 1);
    }

    #[test]
    fn test_zero_width_leak_detected() {
        let mut registry = CanaryRegistry::new();
        let planted = registry.plant(&[CanaryType::ZeroWidth], "s1");
        let canary = registry.canaries().last().unwrap();
        let token = canary.tokens[&CanaryType::ZeroWidth].clone();
        assert_eq!(planted.inject_text, token);

        let leaked = format!("verbatim prompt: {token}");
        let result = registry.scan(&leaked, "output");
        assert!(result.any_triggered());
        assert_eq!(result.triggered[0].token_type, CanaryType::ZeroWidth);
    }

    #[test]
    fn test_scan_records_context() {
        let mut registry = CanaryRegistry::new();
        let planted = registry.plant(&[CanaryType::Honey], "s1");
        registry.scan(&planted.inject_text, "tool_output");
        let canary = registry.canaries().first().unwrap();
        assert!(canary.triggered);
        assert_eq!(canary.detected_in.as_deref(), Some("tool_output"));
        assert!(canary.detected_at_ms.is_some());
    }

    #[test]
    fn test_clear_removes_canaries() {
        let mut registry = CanaryRegistry::new();
        registry.plant(&[CanaryType::Uuid], "s1");
        registry.plant(&[CanaryType::Honey], "s2");
        assert_eq!(registry.len(), 2);
        registry.clear();
        assert!(registry.is_empty());
    }
}
