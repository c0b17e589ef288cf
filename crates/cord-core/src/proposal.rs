//! Proposal types: the input record evaluated in one engine call.

use serde::{Deserialize, Serialize};

/// Classification tag for the action a proposal represents.
///
/// Closed set; unrecognized callers land on `Unknown` and get neutral
/// treatment from the action-sensitive dimensions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Outbound network activity.
    Network,
    /// Messaging a human or external system.
    Communication,
    /// Filesystem operation.
    FileOp,
    /// Posting a message into a channel.
    Message,
    /// Moving money or financial records.
    Financial,
    /// Read-only lookup.
    Query,
    /// Process or shell execution.
    Exec,
    /// Writing data.
    Write,
    /// Reading data.
    Read,
    /// No classification supplied.
    #[default]
    Unknown,
}

impl ActionType {
    /// Whether this action can move data out of the boundary; outbound
    /// actions raise the weight of PII findings.
    pub fn is_outbound(&self) -> bool {
        matches!(
            self,
            ActionType::Network | ActionType::Communication | ActionType::Message
        )
    }
}

/// The input under evaluation. Immutable for the duration of one call.
///
/// A bare string lifts into `Proposal { text, ..defaults }` via `From`, so
/// callers with no structured context still get full screening.
///
/// # Example
///
/// ```rust
/// use cord_core::{ActionType, Proposal};
///
/// let simple: Proposal = "git status".into();
/// assert_eq!(simple.text, "git status");
/// assert!(simple.use_patrol);
///
/// let structured = Proposal::new("upload the report")
///     .with_network_target("https://api.example.com")
///     .with_action_type(ActionType::Network)
///     .with_session_id("session-7");
/// assert_eq!(structured.action_type, ActionType::Network);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    /// Primary body under evaluation.
    pub text: String,
    /// Untrusted external content, screened separately for indirect
    /// injection before the main pipeline runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_input: Option<String>,
    /// Filesystem target, if the action touches one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Host or URL the action reaches for, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_target: Option<String>,
    /// Capability tokens the caller claims.
    #[serde(default)]
    pub grants: Vec<String>,
    /// Tool tier key for the tool-risk dimension.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// Action classification.
    #[serde(default)]
    pub action_type: ActionType,
    /// The session's declared goal, when one was stated inline.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_intent: Option<String>,
    /// Session key for memory, velocity and rate limiting.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Whether the patrol pre-scan runs for this proposal.
    #[serde(default = "default_true")]
    pub use_patrol: bool,
}

fn default_true() -> bool {
    true
}

impl Proposal {
    /// Proposal with only a text body.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            raw_input: None,
            path: None,
            network_target: None,
            grants: Vec::new(),
            tool_name: None,
            action_type: ActionType::Unknown,
            session_intent: None,
            session_id: None,
            use_patrol: true,
        }
    }

    /// Attach untrusted external content.
    #[must_use]
    pub fn with_raw_input(mut self, raw: impl Into<String>) -> Self {
        self.raw_input = Some(raw.into());
        self
    }

    /// Attach a filesystem target.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Attach a network target.
    #[must_use]
    pub fn with_network_target(mut self, target: impl Into<String>) -> Self {
        self.network_target = Some(target.into());
        self
    }

    /// Attach capability grants.
    #[must_use]
    pub fn with_grants(mut self, grants: Vec<String>) -> Self {
        self.grants = grants;
        self
    }

    /// Attach a tool tier key.
    #[must_use]
    pub fn with_tool_name(mut self, tool: impl Into<String>) -> Self {
        self.tool_name = Some(tool.into());
        self
    }

    /// Set the action classification.
    #[must_use]
    pub fn with_action_type(mut self, action_type: ActionType) -> Self {
        self.action_type = action_type;
        self
    }

    /// Declare the session intent inline.
    #[must_use]
    pub fn with_session_intent(mut self, intent: impl Into<String>) -> Self {
        self.session_intent = Some(intent.into());
        self
    }

    /// Set the session key.
    #[must_use]
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Disable the patrol pre-scan for this proposal.
    #[must_use]
    pub fn without_patrol(mut self) -> Self {
        self.use_patrol = false;
        self
    }

    /// The session key, falling back to the shared default session.
    pub fn session_key(&self) -> &str {
        self.session_id.as_deref().unwrap_or(cord_vigil::DEFAULT_SESSION)
    }

    /// The text the patrol pre-scan sees: text, untrusted input and
    /// network target joined, so cross-field payloads cannot hide.
    pub fn combined_scan_text(&self) -> String {
        let mut parts = vec![self.text.as_str()];
        if let Some(raw) = &self.raw_input {
            parts.push(raw);
        }
        if let Some(target) = &self.network_target {
            parts.push(target);
        }
        parts.join("\n")
    }
}

impl From<&str> for Proposal {
    fn from(text: &str) -> Self {
        Proposal::new(text)
    }
}

impl From<String> for Proposal {
    fn from(text: String) -> Self {
        Proposal::new(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_string_lifts_to_proposal() {
        let p: Proposal = "hello".into();
        assert_eq!(p.text, "hello");
        assert!(p.use_patrol);
        assert_eq!(p.action_type, ActionType::Unknown);
        assert_eq!(p.session_key(), cord_vigil::DEFAULT_SESSION);
    }

    #[test]
    fn test_use_patrol_defaults_true_in_json() {
        let p: Proposal = serde_json::from_str(r#"{"text": "hi"}"#).unwrap();
        assert!(p.use_patrol);
    }

    #[test]
    fn test_combined_scan_text_joins_fields() {
        let p = Proposal::new("body")
            .with_raw_input("external")
            .with_network_target("https://host.example");
        assert_eq!(p.combined_scan_text(), "body\nexternal\nhttps://host.example");
    }

    #[test]
    fn test_outbound_classification() {
        assert!(ActionType::Network.is_outbound());
        assert!(ActionType::Message.is_outbound());
        assert!(!ActionType::Read.is_outbound());
        assert!(!ActionType::Unknown.is_outbound());
    }
}
