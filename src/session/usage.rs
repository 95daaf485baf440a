//! Context-window usage tracking and the auto-prune rule

use crate::types::{PruneConfig, UsageSnapshot};

/// Holds the latest usage snapshot for a session
///
/// Snapshots are replaced whole. A partial or stale update is never layered
/// on top of a newer one.
#[derive(Debug, Default)]
pub struct UsageTracker {
    snapshot: Option<UsageSnapshot>,
    prune: PruneConfig,
}

impl UsageTracker {
    /// Create a tracker with the given prune thresholds
    pub fn new(prune: PruneConfig) -> Self {
        Self {
            snapshot: None,
            prune,
        }
    }

    /// Replace the current snapshot, returning the previous one
    pub fn replace(&mut self, snapshot: UsageSnapshot) -> Option<UsageSnapshot> {
        self.snapshot.replace(snapshot)
    }

    /// Get the current snapshot
    pub fn snapshot(&self) -> Option<&UsageSnapshot> {
        self.snapshot.as_ref()
    }

    /// Fraction of the context window in use
    pub fn ratio(&self) -> Option<f64> {
        self.snapshot.as_ref().and_then(UsageSnapshot::ratio)
    }

    /// Forget usage, e.g. after a reconnect
    pub fn reset(&mut self) {
        self.snapshot = None;
    }

    /// How many of the oldest messages to drop, if pruning should fire
    ///
    /// `in_flight` is the index of the streaming message. If it would fall
    /// outside the kept window the prune is skipped for this check.
    pub fn prune_count(&self, message_count: usize, in_flight: Option<usize>) -> Option<usize> {
        if !self.prune.enabled {
            return None;
        }
        let ratio = self.ratio()?;
        if ratio <= self.prune.threshold_ratio || message_count <= self.prune.min_messages {
            return None;
        }

        let drop = message_count.saturating_sub(self.prune.keep_messages);
        if drop == 0 {
            return None;
        }
        if in_flight.is_some_and(|index| index < drop) {
            tracing::debug!(
                message_count,
                drop,
                "Skipping prune that would drop the streaming message"
            );
            return None;
        }
        Some(drop)
    }
}
