//! Typed session event bus
//!
//! Subscribers pick the channels they care about and get their own unbounded
//! queue. Events are delivered in publish order per subscriber, so within a
//! channel (for example successive usage updates) ordering is preserved.
//! Nothing is promised about ordering between a channel and the message
//! stream beyond that.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::queue::OutgoingEntry;
use crate::types::{
    AvailableCommand, ConfigOption, Message, ModeInfo, ModelInfo, PlanEntry, Selection,
    SessionFailure, SessionStatus, ToolKind, UsageSnapshot,
};

/// Identifier returned by [`EventBus::subscribe`]
pub type SubscriptionId = u64;

/// Event categories a subscriber can select
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionChannel {
    Status,
    Messages,
    Approvals,
    Usage,
    Plan,
    Commands,
    Modes,
    Models,
    Config,
    Info,
    Queue,
}

impl SessionChannel {
    pub const ALL: [SessionChannel; 11] = [
        SessionChannel::Status,
        SessionChannel::Messages,
        SessionChannel::Approvals,
        SessionChannel::Usage,
        SessionChannel::Plan,
        SessionChannel::Commands,
        SessionChannel::Modes,
        SessionChannel::Models,
        SessionChannel::Config,
        SessionChannel::Info,
        SessionChannel::Queue,
    ];
}

/// Something observable happened to a session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Status {
        status: SessionStatus,
        failure: Option<SessionFailure>,
    },
    MessageAppended(Message),
    /// A message changed in place (parts streamed, tool call moved)
    MessageUpdated(Message),
    MessagesPruned {
        removed: usize,
        remaining: usize,
    },
    ApprovalRequested {
        message_id: String,
        tool_call_id: String,
        tool_name: String,
        kind: ToolKind,
        title: Option<String>,
        input: serde_json::Value,
    },
    Usage(UsageSnapshot),
    Plan(Vec<PlanEntry>),
    Commands(Vec<AvailableCommand>),
    Modes(Selection<ModeInfo>),
    Models(Selection<ModelInfo>),
    ConfigOptions(Vec<ConfigOption>),
    Info {
        title: Option<String>,
    },
    Queue {
        queued: Vec<OutgoingEntry>,
        interrupt: Option<OutgoingEntry>,
    },
}

impl SessionEvent {
    /// The channel this event is published on
    pub fn channel(&self) -> SessionChannel {
        match self {
            SessionEvent::Status { .. } => SessionChannel::Status,
            SessionEvent::MessageAppended(_)
            | SessionEvent::MessageUpdated(_)
            | SessionEvent::MessagesPruned { .. } => SessionChannel::Messages,
            SessionEvent::ApprovalRequested { .. } => SessionChannel::Approvals,
            SessionEvent::Usage(_) => SessionChannel::Usage,
            SessionEvent::Plan(_) => SessionChannel::Plan,
            SessionEvent::Commands(_) => SessionChannel::Commands,
            SessionEvent::Modes(_) => SessionChannel::Modes,
            SessionEvent::Models(_) => SessionChannel::Models,
            SessionEvent::ConfigOptions(_) => SessionChannel::Config,
            SessionEvent::Info { .. } => SessionChannel::Info,
            SessionEvent::Queue { .. } => SessionChannel::Queue,
        }
    }
}

#[derive(Debug)]
struct Subscriber {
    id: SubscriptionId,
    channels: HashSet<SessionChannel>,
    tx: mpsc::UnboundedSender<SessionEvent>,
}

/// Receiving end of a subscription
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    rx: mpsc::UnboundedReceiver<SessionEvent>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Wait for the next event; `None` once the session is gone
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        self.rx.recv().await
    }

    /// Next event if one is already queued
    pub fn try_recv(&mut self) -> Option<SessionEvent> {
        self.rx.try_recv().ok()
    }
}

/// Fan-out of session events to subscribers
#[derive(Debug, Default)]
pub struct EventBus {
    next_id: SubscriptionId,
    subscribers: Vec<Subscriber>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to the given channels; an empty slice means all of them
    pub fn subscribe(&mut self, channels: &[SessionChannel]) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        self.next_id += 1;
        let id = self.next_id;
        let channels = if channels.is_empty() {
            SessionChannel::ALL.into_iter().collect()
        } else {
            channels.iter().copied().collect()
        };
        self.subscribers.push(Subscriber { id, channels, tx });
        Subscription { id, rx }
    }

    /// Drop a subscription; returns false if it was unknown
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|s| s.id != id);
        self.subscribers.len() != before
    }

    /// Deliver an event to every subscriber of its channel
    ///
    /// Subscribers whose receiver was dropped are removed.
    pub fn publish(&mut self, event: &SessionEvent) {
        let channel = event.channel();
        self.subscribers.retain(|subscriber| {
            if !subscriber.channels.contains(&channel) {
                return true;
            }
            subscriber.tx.send(event.clone()).is_ok()
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}
