//! Session-level types: status, usage, and side-channel metadata

use serde::{Deserialize, Serialize};

use super::error::FailureKind;

/// Lifecycle of a chat session
///
/// ```text
/// initializing -> ready <-> submitted -> streaming -> ready
/// any -> error
/// error -> initializing   (explicit reconnect)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Initializing,
    Ready,
    Submitted,
    Streaming,
    Error,
}

impl SessionStatus {
    /// Check a transition against the lifecycle table
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        match (self, next) {
            (_, Error) => true,
            (Initializing, Ready)
            | (Ready, Submitted)
            | (Submitted, Ready | Streaming)
            | (Streaming, Ready)
            | (Error, Initializing) => true,
            _ => false,
        }
    }

    /// Whether a turn is in flight
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Submitted | Self::Streaming)
    }

    /// Get the wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Submitted => "submitted",
            Self::Streaming => "streaming",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a session is in the `error` status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl SessionFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Context-window usage reported by the agent
///
/// Always replaced wholesale; never merged field-by-field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSnapshot {
    pub used_tokens: u64,
    pub max_tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<Cost>,
}

impl UsageSnapshot {
    pub fn new(used_tokens: u64, max_tokens: u64) -> Self {
        Self {
            used_tokens,
            max_tokens,
            cost: None,
        }
    }

    /// Fraction of the context window in use, if the window size is known
    pub fn ratio(&self) -> Option<f64> {
        if self.max_tokens == 0 {
            return None;
        }
        Some(self.used_tokens as f64 / self.max_tokens as f64)
    }
}

/// Accumulated spend for a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cost {
    pub amount: f64,
    pub currency: String,
}

/// A selectable agent mode (e.g. "default", "plan")
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeInfo {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A selectable model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Available entries plus the current selection
///
/// Once `available` is non-empty, `current_id` is always one of its ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selection<T> {
    pub available: Vec<T>,
    pub current_id: Option<String>,
}

impl<T> Default for Selection<T> {
    fn default() -> Self {
        Self {
            available: Vec::new(),
            current_id: None,
        }
    }
}

/// Entries that carry an id
pub trait HasId {
    fn id(&self) -> &str;
}

impl HasId for ModeInfo {
    fn id(&self) -> &str {
        &self.id
    }
}

impl HasId for ModelInfo {
    fn id(&self) -> &str {
        &self.id
    }
}

impl<T: HasId> Selection<T> {
    /// Check whether `id` is selectable
    pub fn contains(&self, id: &str) -> bool {
        self.available.iter().any(|entry| entry.id() == id)
    }

    /// Replace the whole snapshot
    ///
    /// An unknown `current_id` falls back to the first available entry.
    pub fn replace(&mut self, available: Vec<T>, current_id: Option<String>) {
        self.available = available;
        self.current_id = match current_id {
            Some(id) if self.contains(&id) => Some(id),
            Some(id) => {
                tracing::warn!(current_id = %id, "Current id not in available set, using first entry");
                self.available.first().map(|entry| entry.id().to_string())
            }
            None => self.available.first().map(|entry| entry.id().to_string()),
        };
    }

    /// Switch the current selection; returns false if `id` is not available
    pub fn select(&mut self, id: &str) -> bool {
        if !self.contains(id) {
            return false;
        }
        self.current_id = Some(id.to_string());
        true
    }

    /// The currently selected entry
    pub fn current(&self) -> Option<&T> {
        let id = self.current_id.as_deref()?;
        self.available.iter().find(|entry| entry.id() == id)
    }
}

/// A configurable agent option
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigOption {
    pub id: String,
    pub name: String,
    pub value: serde_json::Value,
    /// Allowed values; empty means free-form
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<serde_json::Value>,
}

impl ConfigOption {
    /// Check whether `value` is acceptable for this option
    pub fn accepts(&self, value: &serde_json::Value) -> bool {
        self.choices.is_empty() || self.choices.contains(value)
    }
}

/// Status of a plan entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanEntryStatus {
    Pending,
    InProgress,
    Completed,
}

/// One line of the agent's plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanEntry {
    pub content: String,
    pub status: PlanEntryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
}

/// A slash command the agent advertises
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailableCommand {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_hint: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn mode(id: &str) -> ModeInfo {
        ModeInfo {
            id: id.to_string(),
            name: id.to_uppercase(),
            description: None,
        }
    }

    #[test]
    fn test_status_transitions() {
        use super::SessionStatus::*;
        assert!(Initializing.can_transition_to(Ready));
        assert!(Ready.can_transition_to(Submitted));
        assert!(Submitted.can_transition_to(Streaming));
        assert!(Submitted.can_transition_to(Ready));
        assert!(Streaming.can_transition_to(Ready));
        assert!(Streaming.can_transition_to(Error));
        assert!(Error.can_transition_to(Initializing));

        assert!(!Ready.can_transition_to(Streaming));
        assert!(!Error.can_transition_to(Ready));
        assert!(!Initializing.can_transition_to(Submitted));
    }

    #[test]
    fn test_usage_ratio() {
        assert_eq!(UsageSnapshot::new(91, 100).ratio(), Some(0.91));
        assert_eq!(UsageSnapshot::new(10, 0).ratio(), None);
    }

    #[test]
    fn test_selection_replace_keeps_membership() {
        let mut modes = Selection::default();
        assert!(modes.current_id.is_none());

        modes.replace(vec![mode("default"), mode("plan")], Some("plan".into()));
        assert_eq!(modes.current_id.as_deref(), Some("plan"));

        modes.replace(vec![mode("default")], Some("plan".into()));
        assert_eq!(modes.current_id.as_deref(), Some("default"));

        modes.replace(Vec::new(), Some("plan".into()));
        assert!(modes.current_id.is_none());
    }

    #[test]
    fn test_selection_select() {
        let mut modes = Selection::default();
        modes.replace(vec![mode("default"), mode("plan")], None);
        assert_eq!(modes.current_id.as_deref(), Some("default"));
        assert!(!modes.select("yolo"));
        assert!(modes.select("plan"));
        assert_eq!(modes.current().map(|m| m.name.as_str()), Some("PLAN"));
    }

    #[test]
    fn test_config_option_accepts() {
        let option = ConfigOption {
            id: "effort".into(),
            name: "Effort".into(),
            value: serde_json::json!("medium"),
            choices: vec![serde_json::json!("low"), serde_json::json!("high")],
        };
        assert!(option.accepts(&serde_json::json!("low")));
        assert!(!option.accepts(&serde_json::json!("extreme")));

        let free = ConfigOption {
            choices: Vec::new(),
            ..option
        };
        assert!(free.accepts(&serde_json::json!(42)));
    }
}
