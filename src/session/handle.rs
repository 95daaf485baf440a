//! Actor driving one [`Session`]
//!
//! The session runs on its own task. Callers talk to it through a cloneable
//! [`SessionHandle`]; every command carries a oneshot for the reply. The task
//! interleaves caller commands, agent events, and the cancel deadline, then
//! flushes side effects (persistence, killing retired connections, status
//! updates) after each step.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;

use super::events::{SessionChannel, Subscription, SubscriptionId};
use super::queue::OutgoingEntry;
use super::session::{InterruptOutcome, Session, SessionSnapshot, SubmitOutcome};
use crate::coordinator::{MessageStore, StatusAggregator};
use crate::transport::{AgentEvent, AgentLauncher, ApprovalOutcome, LaunchRequest};
use crate::types::{ClientError, Result, SessionStatus};

type Reply<T> = oneshot::Sender<T>;

/// Transitions kept for waiters that wake after several happened at once
const TRAIL_LEN: usize = 16;

/// Recent status transitions, newest last, each with a sequence number
#[derive(Debug, Clone)]
struct StatusTrail {
    seq: u64,
    recent: VecDeque<(u64, SessionStatus)>,
}

impl StatusTrail {
    fn new(status: SessionStatus) -> Self {
        Self {
            seq: 0,
            recent: VecDeque::from([(0, status)]),
        }
    }

    fn current(&self) -> SessionStatus {
        self.recent
            .back()
            .map(|(_, status)| *status)
            .unwrap_or(SessionStatus::Initializing)
    }

    fn push(&mut self, status: SessionStatus) {
        self.seq += 1;
        self.recent.push_back((self.seq, status));
        while self.recent.len() > TRAIL_LEN {
            self.recent.pop_front();
        }
    }

    /// Statuses entered after `seq`, oldest first
    fn since(&self, seq: u64) -> impl Iterator<Item = SessionStatus> + '_ {
        self.recent
            .iter()
            .filter(move |(n, _)| *n > seq)
            .map(|(_, status)| *status)
    }
}

#[derive(Debug)]
enum SessionCommand {
    Submit(OutgoingEntry, Reply<Result<SubmitOutcome>>),
    Interrupt(OutgoingEntry, Reply<Result<InterruptOutcome>>),
    Cancel(Reply<Result<bool>>),
    Approve {
        tool_call_id: String,
        granted: bool,
        reply: Reply<Result<ApprovalOutcome>>,
    },
    RemoveQueued(usize, Reply<Option<OutgoingEntry>>),
    SetMode(String, Reply<Result<()>>),
    SetModel(String, Reply<Result<()>>),
    SetConfigOption(String, serde_json::Value, Reply<Result<()>>),
    Subscribe(Vec<SessionChannel>, Reply<Subscription>),
    Unsubscribe(SubscriptionId),
    Snapshot(Reply<SessionSnapshot>),
    RecallPrevious(Reply<Option<String>>),
    RecallNext(Reply<Option<String>>),
    Reconnect(Reply<Result<()>>),
    Close(Reply<()>),
}

/// Collaborators a session task needs
#[derive(Debug, Clone)]
pub struct SessionDeps {
    pub launcher: Arc<dyn AgentLauncher>,
    pub store: Arc<dyn MessageStore>,
    pub aggregator: Arc<StatusAggregator>,
}

/// Cloneable handle to a running session
#[derive(Debug, Clone)]
pub struct SessionHandle {
    key: String,
    conversation_id: String,
    commands: mpsc::UnboundedSender<SessionCommand>,
    status: watch::Receiver<StatusTrail>,
}

impl SessionHandle {
    /// Start a session task
    ///
    /// The agent is launched from inside the task, so this returns
    /// immediately with the session in `initializing`. A launch failure shows
    /// up as the `error` status.
    pub fn spawn(session: Session, launch: LaunchRequest, deps: SessionDeps) -> Self {
        let key = session.key().to_string();
        let conversation_id = session.conversation_id().to_string();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(StatusTrail::new(session.status()));

        deps.aggregator
            .register(&key, &conversation_id, &session.provider().id);

        let driver = SessionDriver {
            session,
            launch,
            deps,
            commands: command_rx,
            events: None,
            status: status_tx,
        };
        tokio::spawn(driver.run());

        Self {
            key,
            conversation_id,
            commands: command_tx,
            status: status_rx,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Latest published status
    pub fn status(&self) -> SessionStatus {
        self.status.borrow().current()
    }

    /// Wait until the status satisfies `predicate`
    ///
    /// Checks the current status, then every status entered after the call,
    /// including ones the session only passed through.
    pub async fn wait_for_status<F>(&self, mut predicate: F) -> Result<SessionStatus>
    where
        F: FnMut(SessionStatus) -> bool,
    {
        let mut rx = self.status.clone();
        let mut seen = {
            let trail = rx.borrow_and_update();
            let current = trail.current();
            if predicate(current) {
                return Ok(current);
            }
            trail.seq
        };

        loop {
            rx.changed()
                .await
                .map_err(|_| ClientError::SessionClosed(self.key.clone()))?;
            let trail = rx.borrow_and_update();
            if let Some(status) = trail.since(seen).find(|s| predicate(*s)) {
                return Ok(status);
            }
            seen = trail.seq;
        }
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> SessionCommand) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .map_err(|_| ClientError::SessionClosed(self.key.clone()))?;
        rx.await
            .map_err(|_| ClientError::SessionClosed(self.key.clone()))
    }

    /// Send now if ready, otherwise queue
    pub async fn submit(&self, entry: impl Into<OutgoingEntry>) -> Result<SubmitOutcome> {
        let entry = entry.into();
        self.request(|r| SessionCommand::Submit(entry, r)).await?
    }

    /// Cancel the current turn and send `entry` next
    pub async fn interrupt_and_send(
        &self,
        entry: impl Into<OutgoingEntry>,
    ) -> Result<InterruptOutcome> {
        let entry = entry.into();
        self.request(|r| SessionCommand::Interrupt(entry, r)).await?
    }

    /// Request cancellation of the in-flight turn
    pub async fn cancel(&self) -> Result<bool> {
        self.request(SessionCommand::Cancel).await?
    }

    /// Answer a tool call approval request
    pub async fn approve(&self, tool_call_id: &str, granted: bool) -> Result<ApprovalOutcome> {
        let tool_call_id = tool_call_id.to_string();
        self.request(|reply| SessionCommand::Approve {
            tool_call_id,
            granted,
            reply,
        })
        .await?
    }

    pub async fn remove_queued(&self, index: usize) -> Result<Option<OutgoingEntry>> {
        self.request(|r| SessionCommand::RemoveQueued(index, r))
            .await
    }

    pub async fn set_mode(&self, mode_id: &str) -> Result<()> {
        let mode_id = mode_id.to_string();
        self.request(|r| SessionCommand::SetMode(mode_id, r)).await?
    }

    pub async fn set_model(&self, model_id: &str) -> Result<()> {
        let model_id = model_id.to_string();
        self.request(|r| SessionCommand::SetModel(model_id, r))
            .await?
    }

    pub async fn set_config_option(&self, option_id: &str, value: serde_json::Value) -> Result<()> {
        let option_id = option_id.to_string();
        self.request(|r| SessionCommand::SetConfigOption(option_id, value, r))
            .await?
    }

    /// Subscribe to session events; an empty slice subscribes to everything
    pub async fn subscribe(&self, channels: &[SessionChannel]) -> Result<Subscription> {
        let channels = channels.to_vec();
        self.request(|r| SessionCommand::Subscribe(channels, r))
            .await
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        drop(self.commands.send(SessionCommand::Unsubscribe(id)));
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot> {
        self.request(SessionCommand::Snapshot).await
    }

    /// Step back through submitted inputs
    pub async fn recall_previous(&self) -> Result<Option<String>> {
        self.request(SessionCommand::RecallPrevious).await
    }

    /// Step forward through submitted inputs
    pub async fn recall_next(&self) -> Result<Option<String>> {
        self.request(SessionCommand::RecallNext).await
    }

    /// Re-create the transport after a recoverable failure
    pub async fn reconnect(&self) -> Result<()> {
        self.request(SessionCommand::Reconnect).await?
    }

    /// Kill the agent and stop the session task
    pub async fn close(&self) -> Result<()> {
        self.request(SessionCommand::Close).await
    }

    /// Whether the session task has stopped
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}

struct SessionDriver {
    session: Session,
    launch: LaunchRequest,
    deps: SessionDeps,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    events: Option<mpsc::UnboundedReceiver<AgentEvent>>,
    status: watch::Sender<StatusTrail>,
}

impl SessionDriver {
    async fn run(mut self) {
        self.connect(None).await;
        self.flush().await;

        loop {
            let deadline = self.session.cancel_deadline();
            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        tracing::debug!(session_key = %self.session.key(), "All handles dropped");
                        break;
                    };
                    if let Some(reply) = self.handle_command(command).await {
                        self.shutdown().await;
                        drop(reply.send(()));
                        return;
                    }
                }
                event = next_event(&mut self.events) => match event {
                    Some(event) => self.session.handle_event(event),
                    None => {
                        self.events = None;
                        self.session.handle_event(AgentEvent::Exited {
                            code: None,
                            message: Some("agent event stream closed".to_string()),
                        });
                    }
                },
                () = sleep_until(deadline) => {
                    self.session.check_cancel_timeout(Instant::now());
                }
            }
            self.flush().await;
        }

        self.shutdown().await;
    }

    /// Returns the close reply when the session should stop
    async fn handle_command(&mut self, command: SessionCommand) -> Option<Reply<()>> {
        match command {
            SessionCommand::Submit(entry, reply) => {
                drop(reply.send(self.session.submit(entry)));
            }
            SessionCommand::Interrupt(entry, reply) => {
                drop(reply.send(self.session.interrupt_and_send(entry)));
            }
            SessionCommand::Cancel(reply) => {
                drop(reply.send(self.session.cancel()));
            }
            SessionCommand::Approve {
                tool_call_id,
                granted,
                reply,
            } => {
                drop(reply.send(self.session.approve(&tool_call_id, granted)));
            }
            SessionCommand::RemoveQueued(index, reply) => {
                drop(reply.send(self.session.remove_queued(index)));
            }
            SessionCommand::SetMode(id, reply) => {
                drop(reply.send(self.session.set_mode(&id)));
            }
            SessionCommand::SetModel(id, reply) => {
                drop(reply.send(self.session.set_model(&id)));
            }
            SessionCommand::SetConfigOption(id, value, reply) => {
                drop(reply.send(self.session.set_config_option(&id, value)));
            }
            SessionCommand::Subscribe(channels, reply) => {
                drop(reply.send(self.session.subscribe(&channels)));
            }
            SessionCommand::Unsubscribe(id) => {
                self.session.unsubscribe(id);
            }
            SessionCommand::Snapshot(reply) => {
                drop(reply.send(self.session.snapshot()));
            }
            SessionCommand::RecallPrevious(reply) => {
                drop(reply.send(self.session.history_mut().recall_previous().map(str::to_string)));
            }
            SessionCommand::RecallNext(reply) => {
                drop(reply.send(self.session.history_mut().recall_next().map(str::to_string)));
            }
            SessionCommand::Reconnect(reply) => {
                let result = self.reconnect().await;
                drop(reply.send(result));
            }
            SessionCommand::Close(reply) => return Some(reply),
        }
        None
    }

    async fn reconnect(&mut self) -> Result<()> {
        self.session.begin_reconnect()?;
        self.events = None;
        self.flush().await;

        let resume = self
            .session
            .provider()
            .capabilities
            .supports_resume
            .then(|| self.session.agent_session_id().map(str::to_string))
            .flatten();
        self.connect(resume).await;
        Ok(())
    }

    /// Launch the agent and attach it, or fail the session
    async fn connect(&mut self, resume_session_id: Option<String>) {
        let mut request = self.launch.clone();
        if resume_session_id.is_some() {
            request.resume_session_id = resume_session_id;
        }

        match self.deps.launcher.launch(request).await {
            Ok(channel) => {
                self.session.attach(channel.connection);
                self.events = Some(channel.events);
            }
            Err(e) => {
                tracing::error!(
                    session_key = %self.session.key(),
                    provider = %self.session.provider().id,
                    error = %e,
                    "Agent launch failed"
                );
                self.session.fail_with(&e);
            }
        }
    }

    /// Persist finished messages, kill retired connections, publish every
    /// status transition in order
    async fn flush(&mut self) {
        let conversation_id = self.session.conversation_id().to_string();
        for message in self.session.take_outbox() {
            if let Err(e) = self.deps.store.append(&conversation_id, &message).await {
                tracing::warn!(
                    conversation_id = %conversation_id,
                    message_id = %message.id,
                    error = %e,
                    "Failed to persist message"
                );
            }
        }

        for mut connection in self.session.take_retired() {
            if let Err(e) = connection.kill().await {
                tracing::warn!(session_key = %self.session.key(), error = %e, "Failed to kill agent");
            }
        }

        let transitions = self.session.take_transitions();
        if transitions.is_empty() {
            return;
        }
        for status in &transitions {
            self.deps.aggregator.update(self.session.key(), *status);
        }
        self.status.send_modify(|trail| {
            for status in transitions {
                trail.push(status);
            }
        });
    }

    async fn shutdown(&mut self) {
        self.session.close();
        self.flush().await;
        self.deps.aggregator.unregister(self.session.key());
        tracing::info!(session_key = %self.session.key(), "Session task stopped");
    }
}

async fn next_event(events: &mut Option<mpsc::UnboundedReceiver<AgentEvent>>) -> Option<AgentEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_trail_reports_transitions_after_seq() {
        let mut trail = StatusTrail::new(SessionStatus::Ready);
        trail.push(SessionStatus::Submitted);
        let seen = trail.seq;
        trail.push(SessionStatus::Ready);
        trail.push(SessionStatus::Submitted);

        assert_eq!(trail.current(), SessionStatus::Submitted);
        assert_eq!(
            trail.since(seen).collect::<Vec<_>>(),
            vec![SessionStatus::Ready, SessionStatus::Submitted]
        );
    }

    #[test]
    fn test_trail_is_bounded() {
        let mut trail = StatusTrail::new(SessionStatus::Initializing);
        for _ in 0..TRAIL_LEN {
            trail.push(SessionStatus::Ready);
            trail.push(SessionStatus::Submitted);
        }
        assert_eq!(trail.recent.len(), TRAIL_LEN);
        assert_eq!(trail.current(), SessionStatus::Submitted);
    }
}
