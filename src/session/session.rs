//! Session aggregate
//!
//! A `Session` is a synchronous state machine. It owns the message history,
//! the side-channel metadata, the outgoing queue, and the [`Transport`]. All
//! mutation goes through `&mut self`, so it needs no locking; the
//! [`SessionHandle`](super::SessionHandle) actor serializes callers and agent
//! events onto it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::time::Instant;

use super::events::{EventBus, SessionChannel, SessionEvent, Subscription, SubscriptionId};
use super::queue::{InputHistory, NextSource, OutgoingEntry, OutgoingQueue};
use super::usage::UsageTracker;
use crate::provider::ProviderDescriptor;
use crate::transport::{
    AgentConnection, AgentEvent, ApprovalOutcome, ClientCommand, PartOutcome, SideChannelEvent,
    Transport, TurnEnd,
};
use crate::types::{
    AvailableCommand, ClientConfig, ClientError, ConfigOption, FailureKind, Message, ModeInfo,
    ModelInfo, PlanEntry, Result, Selection, SessionFailure, SessionStatus, UsageSnapshot,
};

/// What happened to a submitted entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Sent,
    Queued,
}

/// What happened to an interrupt request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptOutcome {
    /// The session was idle, so the entry went out immediately
    Sent,
    /// The entry will be sent on the next `ready`
    Stashed,
}

/// Everything needed to build a session
#[derive(Debug, Clone)]
pub struct SessionParams {
    pub conversation_id: String,
    pub provider: ProviderDescriptor,
    pub cwd: PathBuf,
    /// Prior external session id when resuming
    pub resumed_from_id: Option<String>,
    /// Persisted messages to seed the history with
    pub history: Vec<Message>,
}

/// Serializable view of a session for UIs
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_key: String,
    pub conversation_id: String,
    pub provider_id: String,
    pub status: SessionStatus,
    pub failure: Option<SessionFailure>,
    pub messages: Vec<Message>,
    pub queued: Vec<OutgoingEntry>,
    pub pending_interrupt: Option<OutgoingEntry>,
    pub usage: Option<UsageSnapshot>,
    pub modes: Selection<ModeInfo>,
    pub models: Selection<ModelInfo>,
    pub config_options: Vec<ConfigOption>,
    pub plan: Vec<PlanEntry>,
    pub commands: Vec<AvailableCommand>,
    pub title: Option<String>,
    pub agent_session_id: Option<String>,
    pub resumed: bool,
}

/// One chat session with one agent
#[derive(Debug)]
pub struct Session {
    key: String,
    conversation_id: String,
    provider: ProviderDescriptor,
    cwd: PathBuf,
    status: SessionStatus,
    failure: Option<SessionFailure>,
    messages: Vec<Message>,
    modes: Selection<ModeInfo>,
    models: Selection<ModelInfo>,
    config_options: BTreeMap<String, ConfigOption>,
    plan: Vec<PlanEntry>,
    commands: Vec<AvailableCommand>,
    title: Option<String>,
    agent_session_id: Option<String>,
    resumed_from_id: Option<String>,
    transport: Transport,
    queue: OutgoingQueue,
    history: InputHistory,
    usage: UsageTracker,
    bus: EventBus,
    /// Finished messages waiting to be persisted
    outbox: Vec<Message>,
    /// Connections that were detached and still need killing
    retired: Vec<Box<dyn AgentConnection>>,
    /// Status transitions not yet published outside the session
    transitions: Vec<SessionStatus>,
}

impl Session {
    /// Create a session in the `initializing` status
    pub fn new(params: SessionParams, config: &ClientConfig) -> Self {
        let key = params
            .resumed_from_id
            .clone()
            .unwrap_or_else(|| format!("sess_{}", uuid::Uuid::new_v4().simple()));

        tracing::info!(
            session_key = %key,
            conversation_id = %params.conversation_id,
            provider = %params.provider.id,
            resumed = params.resumed_from_id.is_some(),
            seeded_messages = params.history.len(),
            "Session created"
        );

        Self {
            key,
            conversation_id: params.conversation_id,
            provider: params.provider,
            cwd: params.cwd,
            status: SessionStatus::Initializing,
            failure: None,
            messages: params.history,
            modes: Selection::default(),
            models: Selection::default(),
            config_options: BTreeMap::new(),
            plan: Vec::new(),
            commands: Vec::new(),
            title: None,
            agent_session_id: None,
            resumed_from_id: params.resumed_from_id,
            transport: Transport::new(config.cancel_timeout),
            queue: OutgoingQueue::new(),
            history: InputHistory::new(config.history_limit),
            usage: UsageTracker::new(config.prune),
            bus: EventBus::new(),
            outbox: Vec::new(),
            retired: Vec::new(),
            transitions: Vec::new(),
        }
    }

    // === Accessors ===

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn provider(&self) -> &ProviderDescriptor {
        &self.provider
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn failure(&self) -> Option<&SessionFailure> {
        self.failure.as_ref()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn modes(&self) -> &Selection<ModeInfo> {
        &self.modes
    }

    pub fn models(&self) -> &Selection<ModelInfo> {
        &self.models
    }

    pub fn config_option(&self, id: &str) -> Option<&ConfigOption> {
        self.config_options.get(id)
    }

    pub fn usage(&self) -> Option<&UsageSnapshot> {
        self.usage.snapshot()
    }

    pub fn agent_session_id(&self) -> Option<&str> {
        self.agent_session_id.as_deref()
    }

    pub fn is_resumed(&self) -> bool {
        self.resumed_from_id.is_some()
    }

    pub fn queue(&self) -> &OutgoingQueue {
        &self.queue
    }

    pub fn history_mut(&mut self) -> &mut InputHistory {
        &mut self.history
    }

    /// Id of the message currently streaming
    pub fn in_flight(&self) -> Option<&str> {
        self.transport.in_flight()
    }

    /// When a pending cancel will force the `error` status
    pub fn cancel_deadline(&self) -> Option<Instant> {
        self.transport.cancel_deadline()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_key: self.key.clone(),
            conversation_id: self.conversation_id.clone(),
            provider_id: self.provider.id.clone(),
            status: self.status,
            failure: self.failure.clone(),
            messages: self.messages.clone(),
            queued: self.queue.entries().cloned().collect(),
            pending_interrupt: self.queue.pending_interrupt().cloned(),
            usage: self.usage.snapshot().cloned(),
            modes: self.modes.clone(),
            models: self.models.clone(),
            config_options: self.config_options.values().cloned().collect(),
            plan: self.plan.clone(),
            commands: self.commands.clone(),
            title: self.title.clone(),
            agent_session_id: self.agent_session_id.clone(),
            resumed: self.resumed_from_id.is_some(),
        }
    }

    // === Subscriptions ===

    pub fn subscribe(&mut self, channels: &[SessionChannel]) -> Subscription {
        self.bus.subscribe(channels)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.bus.unsubscribe(id)
    }

    // === Side effects for the driver ===

    /// Messages finished since the last call, oldest first
    pub fn take_outbox(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.outbox)
    }

    /// Connections detached since the last call
    pub fn take_retired(&mut self) -> Vec<Box<dyn AgentConnection>> {
        std::mem::take(&mut self.retired)
    }

    /// Every status entered since the last call, in order
    ///
    /// A turn that ends with work queued passes through `ready` and back to
    /// `submitted` within one event; both transitions are reported.
    pub fn take_transitions(&mut self) -> Vec<SessionStatus> {
        std::mem::take(&mut self.transitions)
    }

    // === Lifecycle ===

    /// Attach a launched connection; readiness arrives as an agent event
    pub fn attach(&mut self, connection: Box<dyn AgentConnection>) {
        if let Some(old) = self.transport.attach(connection) {
            self.retired.push(old);
        }
    }

    /// Move to `error`, closing any in-flight turn
    pub fn fail(&mut self, kind: FailureKind, message: impl Into<String>) {
        let message = message.into();
        self.close_turn(TurnEnd::Failed, Some(&message));
        tracing::warn!(
            session_key = %self.key,
            kind = %kind,
            error = %message,
            "Session failed"
        );
        self.failure = Some(SessionFailure::new(kind, message));
        self.set_status(SessionStatus::Error);
    }

    /// Fail with the classification of `error`
    pub fn fail_with(&mut self, error: &ClientError) {
        self.fail(error.failure_kind(), error.to_string());
    }

    /// Leave `error` for `initializing` so a new connection can be attached
    ///
    /// The old connection is retired. Sessions that failed with `no_support`
    /// cannot reconnect.
    pub fn begin_reconnect(&mut self) -> Result<()> {
        if self.status != SessionStatus::Error {
            return Err(ClientError::invalid_state(format!(
                "reconnect requires error status, session is {}",
                self.status
            )));
        }
        if let Some(failure) = &self.failure {
            if !failure.kind.allows_reconnect() {
                return Err(ClientError::NoSupport(self.provider.id.clone()));
            }
        }

        if let Some(old) = self.transport.detach() {
            self.retired.push(old);
        }
        self.usage.reset();
        self.failure = None;
        tracing::info!(session_key = %self.key, "Reconnecting");
        self.set_status(SessionStatus::Initializing);
        Ok(())
    }

    /// Detach the transport for teardown
    pub fn close(&mut self) {
        self.close_turn(TurnEnd::Failed, None);
        if let Some(connection) = self.transport.detach() {
            self.retired.push(connection);
        }
        self.queue.clear();
        tracing::info!(session_key = %self.key, "Session closed");
    }

    // === User actions ===

    /// Send now if ready, otherwise queue
    ///
    /// An entry that fails to send goes to the front of the queue and is
    /// sent again once a reconnect brings the session back to `ready`.
    pub fn submit(&mut self, entry: OutgoingEntry) -> Result<SubmitOutcome> {
        self.history.record(&entry.text);

        if self.status == SessionStatus::Ready {
            self.dispatch_or_restore(entry, NextSource::Queue)?;
            return Ok(SubmitOutcome::Sent);
        }

        tracing::debug!(session_key = %self.key, status = %self.status, "Queueing message");
        self.queue.push(entry);
        self.publish_queue();
        Ok(SubmitOutcome::Queued)
    }

    /// Cancel the current turn and send `entry` as soon as the session is
    /// ready again
    pub fn interrupt_and_send(&mut self, entry: OutgoingEntry) -> Result<InterruptOutcome> {
        self.history.record(&entry.text);

        if self.status == SessionStatus::Ready {
            self.dispatch_or_restore(entry, NextSource::Interrupt)?;
            return Ok(InterruptOutcome::Sent);
        }

        if let Some(replaced) = self.queue.stash_interrupt(entry) {
            tracing::debug!(
                session_key = %self.key,
                replaced = %replaced.text,
                "Interrupt payload replaced"
            );
        }
        self.publish_queue();

        if self.status.is_busy() {
            self.cancel()?;
        }
        Ok(InterruptOutcome::Stashed)
    }

    /// Ask the agent to stop the current turn
    ///
    /// Returns false when no turn is in flight. The session stays busy until
    /// the agent acknowledges or the cancel deadline passes.
    pub fn cancel(&mut self) -> Result<bool> {
        if !self.status.is_busy() {
            return Ok(false);
        }
        self.transport.cancel()
    }

    /// Remove a queued entry
    pub fn remove_queued(&mut self, index: usize) -> Option<OutgoingEntry> {
        let removed = self.queue.remove(index);
        if removed.is_some() {
            self.publish_queue();
        }
        removed
    }

    /// Answer a tool call approval request
    pub fn approve(&mut self, tool_call_id: &str, granted: bool) -> Result<ApprovalOutcome> {
        let index = self.in_flight_index();
        let message = index.and_then(|i| self.messages.get_mut(i));
        let outcome = self.transport.approve(message, tool_call_id, granted)?;
        if outcome != ApprovalOutcome::Ignored {
            self.publish_in_flight(index);
        }
        Ok(outcome)
    }

    /// Ask the agent to switch mode
    pub fn set_mode(&mut self, mode_id: &str) -> Result<()> {
        if !self.provider.capabilities.supports_modes {
            return Err(ClientError::InvalidMode(format!(
                "{} does not support modes",
                self.provider.id
            )));
        }
        if !self.modes.contains(mode_id) {
            return Err(ClientError::InvalidMode(mode_id.to_string()));
        }
        self.transport.command(ClientCommand::SetMode {
            mode_id: mode_id.to_string(),
        })
    }

    /// Ask the agent to switch model
    pub fn set_model(&mut self, model_id: &str) -> Result<()> {
        if !self.provider.capabilities.supports_models {
            return Err(ClientError::InvalidModel(format!(
                "{} does not support model selection",
                self.provider.id
            )));
        }
        if !self.models.contains(model_id) {
            return Err(ClientError::InvalidModel(model_id.to_string()));
        }
        self.transport.command(ClientCommand::SetModel {
            model_id: model_id.to_string(),
        })
    }

    /// Ask the agent to change a config option
    pub fn set_config_option(&mut self, option_id: &str, value: serde_json::Value) -> Result<()> {
        if !self.provider.capabilities.supports_config_options {
            return Err(ClientError::InvalidConfigOption(format!(
                "{} does not support config options",
                self.provider.id
            )));
        }
        let Some(option) = self.config_options.get(option_id) else {
            return Err(ClientError::InvalidConfigOption(option_id.to_string()));
        };
        if !option.accepts(&value) {
            return Err(ClientError::InvalidConfigOption(format!(
                "{} does not accept {}",
                option_id, value
            )));
        }
        self.transport.command(ClientCommand::SetConfigOption {
            option_id: option_id.to_string(),
            value,
        })
    }

    // === Agent events ===

    /// Apply one event from the agent
    pub fn handle_event(&mut self, event: AgentEvent) {
        match event {
            AgentEvent::SessionReady { agent_session_id } => {
                if self.status != SessionStatus::Initializing {
                    tracing::debug!(session_key = %self.key, status = %self.status, "Ignoring duplicate ready");
                    return;
                }
                tracing::info!(
                    session_key = %self.key,
                    agent_session_id = %agent_session_id,
                    "Agent ready"
                );
                self.agent_session_id = Some(agent_session_id);
                self.set_status(SessionStatus::Ready);
            }

            AgentEvent::Part(part) => {
                let Some(index) = self.in_flight_index() else {
                    tracing::debug!(session_key = %self.key, part_id = %part.part_id(), "Part with no turn in flight");
                    return;
                };
                if self.status == SessionStatus::Submitted {
                    self.set_status(SessionStatus::Streaming);
                }
                let outcome = self.transport.apply(&mut self.messages[index], part);
                match outcome {
                    PartOutcome::Ignored => {}
                    PartOutcome::Applied => self.publish_in_flight(Some(index)),
                    PartOutcome::ApprovalRequested { tool_call_id, kind } => {
                        if self.provider.capabilities.requires_approval(kind) {
                            self.publish_in_flight(Some(index));
                            self.publish_approval(index, &tool_call_id);
                        } else {
                            tracing::info!(
                                session_key = %self.key,
                                tool_call_id = %tool_call_id,
                                kind = %kind.as_str(),
                                "Auto-approving tool call"
                            );
                            if let Err(e) = self.approve(&tool_call_id, true) {
                                self.fail_with(&e);
                            }
                        }
                    }
                }
            }

            AgentEvent::TurnComplete { stop_reason } => {
                if !self.status.is_busy() {
                    tracing::debug!(session_key = %self.key, status = %self.status, "Turn complete with no turn in flight");
                    return;
                }
                tracing::info!(session_key = %self.key, ?stop_reason, "Turn complete");
                self.close_turn(TurnEnd::Completed, None);
                self.maybe_prune();
                self.set_status(SessionStatus::Ready);
            }

            AgentEvent::TurnError { message } => {
                if !self.status.is_busy() {
                    tracing::warn!(session_key = %self.key, error = %message, "Turn error with no turn in flight");
                    return;
                }
                self.fail_with(&ClientError::streaming_error(message));
            }

            AgentEvent::SideChannel(event) => self.apply_side_channel(event),

            AgentEvent::Exited { code, message } => {
                if self.status != SessionStatus::Error {
                    let detail = message.unwrap_or_else(|| "agent exited".to_string());
                    let text = match code {
                        Some(code) => format!("{} (exit code {})", detail, code),
                        None => detail,
                    };
                    let kind = if self.status.is_busy() {
                        FailureKind::MidStream
                    } else {
                        FailureKind::Other
                    };
                    self.fail(kind, ClientError::AgentExited(text).to_string());
                }
                if let Some(connection) = self.transport.detach() {
                    self.retired.push(connection);
                }
            }
        }
    }

    /// Force `error` if a cancel has gone unacknowledged past its deadline
    ///
    /// Returns true when the session was failed.
    pub fn check_cancel_timeout(&mut self, now: Instant) -> bool {
        let Some(deadline) = self.transport.cancel_deadline() else {
            return false;
        };
        if now < deadline {
            return false;
        }

        let timeout_ms = u64::try_from(self.transport.cancel_timeout().as_millis()).unwrap_or(u64::MAX);
        let error = ClientError::CancelTimeout(timeout_ms);
        self.fail_with(&error);
        if let Some(connection) = self.transport.detach() {
            self.retired.push(connection);
        }
        true
    }

    // === Internals ===

    fn set_status(&mut self, next: SessionStatus) {
        if self.status == next {
            return;
        }
        if !self.status.can_transition_to(next) {
            tracing::warn!(
                session_key = %self.key,
                from = %self.status,
                to = %next,
                "Invalid status transition"
            );
            return;
        }

        tracing::info!(session_key = %self.key, from = %self.status, to = %next, "Status changed");
        self.status = next;
        self.transitions.push(next);
        if next != SessionStatus::Error {
            self.failure = None;
        }
        self.bus.publish(&SessionEvent::Status {
            status: next,
            failure: self.failure.clone(),
        });

        if next == SessionStatus::Ready {
            self.drain();
        }
    }

    /// Send whatever should go next after entering `ready`
    fn drain(&mut self) {
        let Some((entry, source)) = self.queue.take_next() else {
            return;
        };
        tracing::debug!(session_key = %self.key, ?source, "Draining outgoing message");
        self.publish_queue();

        if let Err(e) = self.dispatch_or_restore(entry, source) {
            tracing::warn!(session_key = %self.key, error = %e, "Failed to send drained message");
        }
    }

    fn dispatch_or_restore(&mut self, entry: OutgoingEntry, source: NextSource) -> Result<()> {
        if let Err(e) = self.dispatch(entry.clone()) {
            self.queue.restore(entry, source);
            self.publish_queue();
            return Err(e);
        }
        Ok(())
    }

    /// Hand an entry to the transport; the session must be `ready`
    fn dispatch(&mut self, entry: OutgoingEntry) -> Result<()> {
        debug_assert_eq!(self.status, SessionStatus::Ready);
        self.history.reset_cursor();

        let assistant = match self.transport.send(&entry.text, &entry.files) {
            Ok(message) => message,
            Err(e) => {
                self.fail_with(&e);
                return Err(e);
            }
        };

        let user = Message::user(entry.text, &entry.files);
        self.outbox.push(user.clone());
        self.bus.publish(&SessionEvent::MessageAppended(user.clone()));
        self.messages.push(user);

        self.bus
            .publish(&SessionEvent::MessageAppended(assistant.clone()));
        self.messages.push(assistant);

        self.set_status(SessionStatus::Submitted);
        Ok(())
    }

    fn in_flight_index(&self) -> Option<usize> {
        let id = self.transport.in_flight()?;
        self.messages.iter().rposition(|m| m.id == id)
    }

    /// Close the in-flight turn, if any, and queue its message for saving
    fn close_turn(&mut self, end: TurnEnd, error: Option<&str>) {
        let Some(index) = self.in_flight_index() else {
            return;
        };
        let message = &mut self.messages[index];
        self.transport.finish_turn(message, end);
        if let Some(error) = error {
            message.error = Some(error.to_string());
        }
        let finished = message.clone();
        self.outbox.push(finished.clone());
        self.bus.publish(&SessionEvent::MessageUpdated(finished));
    }

    fn maybe_prune(&mut self) {
        let in_flight = self.in_flight_index();
        let Some(drop) = self.usage.prune_count(self.messages.len(), in_flight) else {
            return;
        };
        self.messages.drain(..drop);
        tracing::info!(
            session_key = %self.key,
            removed = drop,
            remaining = self.messages.len(),
            ratio = self.usage.ratio().unwrap_or_default(),
            "Auto-pruned message history"
        );
        self.bus.publish(&SessionEvent::MessagesPruned {
            removed: drop,
            remaining: self.messages.len(),
        });
    }

    fn apply_side_channel(&mut self, event: SideChannelEvent) {
        tracing::trace!(session_key = %self.key, ?event, "Side-channel event");
        let published = match event {
            SideChannelEvent::Usage(snapshot) => {
                self.usage.replace(snapshot.clone());
                self.bus.publish(&SessionEvent::Usage(snapshot));
                self.maybe_prune();
                return;
            }
            SideChannelEvent::Plan { entries } => {
                self.plan.clone_from(&entries);
                SessionEvent::Plan(entries)
            }
            SideChannelEvent::AvailableCommands { commands } => {
                self.commands.clone_from(&commands);
                SessionEvent::Commands(commands)
            }
            SideChannelEvent::Modes {
                available,
                current_id,
            } => {
                self.modes.replace(available, current_id);
                SessionEvent::Modes(self.modes.clone())
            }
            SideChannelEvent::ModeChanged { current_id } => {
                if !self.modes.select(&current_id) {
                    tracing::warn!(session_key = %self.key, mode = %current_id, "Agent switched to unknown mode");
                    return;
                }
                SessionEvent::Modes(self.modes.clone())
            }
            SideChannelEvent::Models {
                available,
                current_id,
            } => {
                self.models.replace(available, current_id);
                SessionEvent::Models(self.models.clone())
            }
            SideChannelEvent::ModelChanged { current_id } => {
                if !self.models.select(&current_id) {
                    tracing::warn!(session_key = %self.key, model = %current_id, "Agent switched to unknown model");
                    return;
                }
                SessionEvent::Models(self.models.clone())
            }
            SideChannelEvent::ConfigOptions { options } => {
                self.config_options = options
                    .into_iter()
                    .map(|option| (option.id.clone(), option))
                    .collect();
                SessionEvent::ConfigOptions(self.config_options.values().cloned().collect())
            }
            SideChannelEvent::ConfigOptionChanged { option } => {
                self.config_options.insert(option.id.clone(), option);
                SessionEvent::ConfigOptions(self.config_options.values().cloned().collect())
            }
            SideChannelEvent::SessionInfo { title } => {
                self.title.clone_from(&title);
                SessionEvent::Info { title }
            }
        };
        self.bus.publish(&published);
    }

    fn publish_in_flight(&mut self, index: Option<usize>) {
        if let Some(message) = index.and_then(|i| self.messages.get(i)) {
            self.bus
                .publish(&SessionEvent::MessageUpdated(message.clone()));
        }
    }

    fn publish_approval(&mut self, index: usize, tool_call_id: &str) {
        let Some(message) = self.messages.get(index) else {
            return;
        };
        let Some(call) = message.tool_call(tool_call_id) else {
            return;
        };
        let event = SessionEvent::ApprovalRequested {
            message_id: message.id.clone(),
            tool_call_id: call.tool_call_id.clone(),
            tool_name: call.tool_name.clone(),
            kind: call.kind,
            title: call.title.clone(),
            input: call.input.clone(),
        };
        self.bus.publish(&event);
    }

    fn publish_queue(&mut self) {
        let event = SessionEvent::Queue {
            queued: self.queue.entries().cloned().collect(),
            interrupt: self.queue.pending_interrupt().cloned(),
        };
        self.bus.publish(&event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderRegistry;
    use crate::transport::{AgentHarness, InProcessConnection, PartEvent, PartStart, StopReason};
    use crate::types::{ToolCallState, ToolKind};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn session_for(provider: &str) -> (Session, AgentHarness) {
        let params = SessionParams {
            conversation_id: "conv-1".into(),
            provider: ProviderRegistry::builtin().resolve(provider).unwrap(),
            cwd: std::env::temp_dir(),
            resumed_from_id: None,
            history: Vec::new(),
        };
        let mut session = Session::new(params, &ClientConfig::default());
        let (connection, harness) = InProcessConnection::pair_for_tests();
        session.attach(Box::new(connection));
        (session, harness)
    }

    fn ready_session() -> (Session, AgentHarness) {
        let (mut session, harness) = session_for("claude");
        session.handle_event(AgentEvent::SessionReady {
            agent_session_id: "agent-1".into(),
        });
        (session, harness)
    }

    fn prompts(harness: &mut AgentHarness) -> Vec<String> {
        harness
            .take_commands()
            .into_iter()
            .filter_map(|c| match c {
                ClientCommand::Prompt { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    fn complete(session: &mut Session) {
        session.handle_event(AgentEvent::TurnComplete {
            stop_reason: StopReason::EndTurn,
        });
    }

    fn part(session: &mut Session, event: PartEvent) {
        session.handle_event(AgentEvent::Part(event));
    }

    fn tool_awaiting_approval(session: &mut Session, id: &str, name: &str) {
        part(
            session,
            PartEvent::Start {
                part_id: id.into(),
                part: PartStart::ToolCall {
                    tool_name: name.into(),
                    kind: None,
                    title: None,
                },
            },
        );
        part(
            session,
            PartEvent::Finalize {
                part_id: id.into(),
                input: Some(serde_json::json!({"command": "ls"})),
            },
        );
        part(
            session,
            PartEvent::ApprovalRequested {
                tool_call_id: id.into(),
            },
        );
    }

    #[test]
    fn test_ready_and_send() {
        let (mut session, mut harness) = session_for("claude");
        assert_eq!(session.status(), SessionStatus::Initializing);

        assert_eq!(
            session.submit("early".into()).unwrap(),
            SubmitOutcome::Queued
        );
        session.handle_event(AgentEvent::SessionReady {
            agent_session_id: "agent-1".into(),
        });

        assert_eq!(session.status(), SessionStatus::Submitted);
        assert_eq!(session.agent_session_id(), Some("agent-1"));
        assert_eq!(prompts(&mut harness), vec!["early"]);
        assert_eq!(session.messages().len(), 2);
        assert_eq!(session.take_outbox().len(), 1);
    }

    #[test]
    fn test_queued_message_sent_after_turn() {
        let (mut session, mut harness) = ready_session();
        assert_eq!(session.submit("a".into()).unwrap(), SubmitOutcome::Sent);
        assert_eq!(session.submit("b".into()).unwrap(), SubmitOutcome::Queued);
        assert_eq!(prompts(&mut harness), vec!["a"]);

        complete(&mut session);

        assert_eq!(prompts(&mut harness), vec!["b"]);
        assert_eq!(session.status(), SessionStatus::Submitted);
        assert!(session.queue().is_empty());
    }

    #[test]
    fn test_queue_drains_in_submission_order() {
        let (mut session, mut harness) = ready_session();
        session.submit("first".into()).unwrap();
        for text in ["a", "b", "c"] {
            assert_eq!(session.submit(text.into()).unwrap(), SubmitOutcome::Queued);
        }
        assert_eq!(prompts(&mut harness), vec!["first"]);

        let mut sent = Vec::new();
        for _ in 0..3 {
            complete(&mut session);
            sent.extend(prompts(&mut harness));
        }
        assert_eq!(sent, vec!["a", "b", "c"]);
        assert!(session.queue().is_empty());

        complete(&mut session);
        assert!(prompts(&mut harness).is_empty());
        assert_eq!(session.status(), SessionStatus::Ready);
    }

    #[test]
    fn test_transitions_include_ready_before_drain() {
        let (mut session, _harness) = ready_session();
        session.submit("a".into()).unwrap();
        session.submit("b".into()).unwrap();
        session.take_transitions();

        complete(&mut session);

        assert_eq!(
            session.take_transitions(),
            vec![SessionStatus::Ready, SessionStatus::Submitted]
        );
        assert!(session.take_transitions().is_empty());
    }

    #[test]
    fn test_failed_send_keeps_entry_for_reconnect() {
        let (mut session, harness) = ready_session();
        drop(harness);

        let err = session.submit("lost".into()).unwrap_err();
        assert!(matches!(err, ClientError::AgentExited(_)));
        assert_eq!(session.status(), SessionStatus::Error);
        let queued: Vec<&str> = session.queue().entries().map(|e| e.text.as_str()).collect();
        assert_eq!(queued, vec!["lost"]);

        session.begin_reconnect().unwrap();
        let (connection, mut harness) = InProcessConnection::pair_for_tests();
        session.attach(Box::new(connection));
        session.handle_event(AgentEvent::SessionReady {
            agent_session_id: "agent-1".into(),
        });

        assert_eq!(prompts(&mut harness), vec!["lost"]);
        assert_eq!(session.status(), SessionStatus::Submitted);
    }

    #[test]
    fn test_interrupt_precedes_queue() {
        let (mut session, mut harness) = ready_session();
        session.submit("first".into()).unwrap();
        session.submit("a".into()).unwrap();
        session.submit("b".into()).unwrap();

        assert_eq!(
            session.interrupt_and_send("x".into()).unwrap(),
            InterruptOutcome::Stashed
        );
        assert!(session.cancel_deadline().is_some());
        complete(&mut session);

        let sent = prompts(&mut harness);
        assert_eq!(sent, vec!["first", "x"]);
        let queued: Vec<&str> = session.queue().entries().map(|e| e.text.as_str()).collect();
        assert_eq!(queued, vec!["a", "b"]);
    }

    #[test]
    fn test_interrupt_when_ready_sends_now() {
        let (mut session, mut harness) = ready_session();
        assert_eq!(
            session.interrupt_and_send("now".into()).unwrap(),
            InterruptOutcome::Sent
        );
        assert_eq!(prompts(&mut harness), vec!["now"]);
    }

    #[test]
    fn test_deny_leaves_message_intact() {
        let (mut session, mut harness) = ready_session();
        session.submit("list files".into()).unwrap();
        part(
            &mut session,
            PartEvent::Start {
                part_id: "t1".into(),
                part: PartStart::Text,
            },
        );
        part(
            &mut session,
            PartEvent::Append {
                part_id: "t1".into(),
                delta: "Let me look.".into(),
            },
        );
        part(
            &mut session,
            PartEvent::Finalize {
                part_id: "t1".into(),
                input: None,
            },
        );
        tool_awaiting_approval(&mut session, "call_1", "Bash");
        assert_eq!(session.status(), SessionStatus::Streaming);

        let outcome = session.approve("call_1", false).unwrap();
        assert_eq!(outcome, ApprovalOutcome::Denied);

        let message = session.messages().last().unwrap();
        assert_eq!(message.text(), "Let me look.");
        let call = message.tool_call("call_1").unwrap();
        assert_eq!(call.state, ToolCallState::OutputDenied);
        assert!(call.output.is_none());
        assert!(harness.take_commands().contains(&ClientCommand::PermissionResponse {
            tool_call_id: "call_1".into(),
            granted: false,
        }));
    }

    #[test]
    fn test_ungated_kinds_auto_approve() {
        let (mut session, mut harness) = ready_session();
        session.submit("read it".into()).unwrap();
        tool_awaiting_approval(&mut session, "call_r", "Read");

        let call = session.messages().last().unwrap().tool_call("call_r").unwrap();
        assert_eq!(call.kind, ToolKind::Read);
        assert_eq!(call.state, ToolCallState::Approved);
        assert!(harness.take_commands().contains(&ClientCommand::PermissionResponse {
            tool_call_id: "call_r".into(),
            granted: true,
        }));
    }

    #[test]
    fn test_prune_boundary() {
        let (mut session, _harness) = ready_session();
        for i in 0..6 {
            session.submit(format!("m{i}").as_str().into()).unwrap();
            complete(&mut session);
        }
        session.submit("last".into()).unwrap();
        assert_eq!(session.messages().len(), 14);

        session.handle_event(AgentEvent::SideChannel(SideChannelEvent::Usage(
            UsageSnapshot::new(910, 1000),
        )));
        assert_eq!(session.messages().len(), 10);
        assert!(session.in_flight_index().is_some());
    }

    #[test]
    fn test_no_prune_at_or_below_min_messages() {
        let (mut session, _harness) = ready_session();
        for i in 0..5 {
            session.submit(format!("m{i}").as_str().into()).unwrap();
            complete(&mut session);
        }
        assert_eq!(session.messages().len(), 10);

        session.handle_event(AgentEvent::SideChannel(SideChannelEvent::Usage(
            UsageSnapshot::new(910, 1000),
        )));
        assert_eq!(session.messages().len(), 10);
    }

    #[test]
    fn test_mid_stream_error_and_reconnect() {
        let (mut session, _harness) = ready_session();
        session.submit("go".into()).unwrap();
        session.handle_event(AgentEvent::TurnError {
            message: "rate limited".into(),
        });

        assert_eq!(session.status(), SessionStatus::Error);
        assert_eq!(session.failure().unwrap().kind, FailureKind::MidStream);
        assert_eq!(
            session.messages().last().unwrap().error.as_deref(),
            Some("Streaming error: rate limited")
        );
        assert!(session.in_flight().is_none());

        session.begin_reconnect().unwrap();
        assert_eq!(session.status(), SessionStatus::Initializing);
        assert!(session.failure().is_none());
        assert_eq!(session.take_retired().len(), 1);
    }

    #[test]
    fn test_no_support_cannot_reconnect() {
        let (mut session, _harness) = session_for("aider");
        session.fail_with(&ClientError::NoSupport("aider".into()));

        let err = session.begin_reconnect().unwrap_err();
        assert!(matches!(err, ClientError::NoSupport(_)));
        assert_eq!(session.status(), SessionStatus::Error);
    }

    #[test]
    fn test_agent_exit_while_idle() {
        let (mut session, _harness) = ready_session();
        session.handle_event(AgentEvent::Exited {
            code: Some(1),
            message: None,
        });

        assert_eq!(session.status(), SessionStatus::Error);
        let failure = session.failure().unwrap();
        assert_eq!(failure.kind, FailureKind::Other);
        assert!(failure.message.contains("exit code 1"));
        assert_eq!(session.take_retired().len(), 1);
    }

    #[test]
    fn test_modes_fall_back_and_validate() {
        let (mut session, mut harness) = ready_session();
        let mode = |id: &str| ModeInfo {
            id: id.into(),
            name: id.into(),
            description: None,
        };
        session.handle_event(AgentEvent::SideChannel(SideChannelEvent::Modes {
            available: vec![mode("default"), mode("plan")],
            current_id: Some("missing".into()),
        }));
        assert_eq!(session.modes().current_id.as_deref(), Some("default"));

        assert!(matches!(
            session.set_mode("yolo"),
            Err(ClientError::InvalidMode(_))
        ));
        session.set_mode("plan").unwrap();
        assert!(harness.take_commands().contains(&ClientCommand::SetMode {
            mode_id: "plan".into()
        }));

        session.handle_event(AgentEvent::SideChannel(SideChannelEvent::ModeChanged {
            current_id: "plan".into(),
        }));
        assert_eq!(session.modes().current_id.as_deref(), Some("plan"));
    }

    #[test]
    fn test_config_option_validation() {
        let (mut session, _harness) = ready_session();
        session.handle_event(AgentEvent::SideChannel(SideChannelEvent::ConfigOptions {
            options: vec![ConfigOption {
                id: "effort".into(),
                name: "Effort".into(),
                value: serde_json::json!("low"),
                choices: vec![serde_json::json!("low"), serde_json::json!("high")],
            }],
        }));

        assert!(session
            .set_config_option("effort", serde_json::json!("high"))
            .is_ok());
        assert!(matches!(
            session.set_config_option("effort", serde_json::json!("max")),
            Err(ClientError::InvalidConfigOption(_))
        ));
        assert!(matches!(
            session.set_config_option("nope", serde_json::json!(1)),
            Err(ClientError::InvalidConfigOption(_))
        ));
    }

    #[test]
    fn test_config_options_need_provider_support() {
        let (mut session, mut harness) = session_for("gemini");
        session.handle_event(AgentEvent::SessionReady {
            agent_session_id: "agent-1".into(),
        });
        session.handle_event(AgentEvent::SideChannel(SideChannelEvent::ConfigOptions {
            options: vec![ConfigOption {
                id: "effort".into(),
                name: "Effort".into(),
                value: serde_json::json!("low"),
                choices: vec![serde_json::json!("low"), serde_json::json!("high")],
            }],
        }));

        assert!(matches!(
            session.set_config_option("effort", serde_json::json!("high")),
            Err(ClientError::InvalidConfigOption(_))
        ));
        assert!(harness.take_commands().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_timeout_forces_error() {
        let (mut session, _harness) = ready_session();
        session.submit("long task".into()).unwrap();
        assert!(session.cancel().unwrap());

        assert!(!session.check_cancel_timeout(Instant::now()));
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(session.check_cancel_timeout(Instant::now()));

        assert_eq!(session.status(), SessionStatus::Error);
        assert_eq!(session.failure().unwrap().kind, FailureKind::MidStream);
        assert!(session.failure().unwrap().message.contains("10000ms"));
    }

    #[test]
    fn test_subscribers_see_status_changes() {
        let (mut session, _harness) = session_for("claude");
        let mut sub = session.subscribe(&[SessionChannel::Status]);
        session.handle_event(AgentEvent::SessionReady {
            agent_session_id: "a".into(),
        });

        assert_eq!(
            sub.try_recv(),
            Some(SessionEvent::Status {
                status: SessionStatus::Ready,
                failure: None
            })
        );
        assert!(sub.try_recv().is_none());
    }
}
