//! Cross-session status aggregation for indicators
//!
//! Read-only with respect to sessions: the aggregator is told about status
//! changes and never reaches back into a session.

use dashmap::DashMap;
use serde::Serialize;

use crate::types::SessionStatus;

/// Latest known status of one session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEntry {
    pub session_key: String,
    pub conversation_id: String,
    pub provider_id: String,
    pub status: SessionStatus,
}

/// Process-wide map of session key to status
#[derive(Debug, Default)]
pub struct StatusAggregator {
    entries: DashMap<String, StatusEntry>,
}

impl StatusAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a session
    pub fn register(&self, session_key: &str, conversation_id: &str, provider_id: &str) {
        self.entries.insert(
            session_key.to_string(),
            StatusEntry {
                session_key: session_key.to_string(),
                conversation_id: conversation_id.to_string(),
                provider_id: provider_id.to_string(),
                status: SessionStatus::Initializing,
            },
        );
    }

    /// Stop tracking a session; returns false if it was not registered
    pub fn unregister(&self, session_key: &str) -> bool {
        self.entries.remove(session_key).is_some()
    }

    /// Record a status change
    ///
    /// Updates for unregistered sessions are dropped, so a late update from a
    /// closing session cannot resurrect it.
    pub fn update(&self, session_key: &str, status: SessionStatus) {
        match self.entries.get_mut(session_key) {
            Some(mut entry) => entry.status = status,
            None => {
                tracing::debug!(session_key = %session_key, %status, "Status update for unregistered session");
            }
        }
    }

    pub fn status_of(&self, session_key: &str) -> Option<SessionStatus> {
        self.entries.get(session_key).map(|e| e.status)
    }

    /// All tracked sessions, sorted by conversation id
    pub fn snapshot(&self) -> Vec<StatusEntry> {
        let mut entries: Vec<StatusEntry> = self.entries.iter().map(|r| r.value().clone()).collect();
        entries.sort_by(|a, b| a.conversation_id.cmp(&b.conversation_id));
        entries
    }

    /// Number of sessions currently in `status`
    pub fn count_in(&self, status: SessionStatus) -> usize {
        self.entries.iter().filter(|r| r.status == status).count()
    }

    /// Whether any session has a turn in flight
    pub fn any_busy(&self) -> bool {
        self.entries.iter().any(|r| r.status.is_busy())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_update_unregister() {
        let aggregator = StatusAggregator::new();
        aggregator.register("s1", "conv-1", "claude");
        aggregator.register("s2", "conv-2", "codex");

        aggregator.update("s1", SessionStatus::Streaming);
        assert_eq!(aggregator.status_of("s1"), Some(SessionStatus::Streaming));
        assert_eq!(aggregator.count_in(SessionStatus::Initializing), 1);
        assert!(aggregator.any_busy());

        assert!(aggregator.unregister("s1"));
        assert!(!aggregator.unregister("s1"));
        assert_eq!(aggregator.len(), 1);
        assert!(!aggregator.any_busy());
    }

    #[test]
    fn test_update_after_unregister_is_dropped() {
        let aggregator = StatusAggregator::new();
        aggregator.register("s1", "conv-1", "claude");
        aggregator.unregister("s1");

        aggregator.update("s1", SessionStatus::Ready);
        assert!(aggregator.status_of("s1").is_none());
        assert!(aggregator.is_empty());
    }

    #[test]
    fn test_snapshot_sorted() {
        let aggregator = StatusAggregator::new();
        aggregator.register("b", "conv-b", "claude");
        aggregator.register("a", "conv-a", "gemini");

        let ids: Vec<String> = aggregator
            .snapshot()
            .into_iter()
            .map(|e| e.conversation_id)
            .collect();
        assert_eq!(ids, vec!["conv-a", "conv-b"]);
    }
}
