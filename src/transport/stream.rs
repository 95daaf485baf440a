//! Streaming part state machine for the in-flight assistant message

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tokio::time::Instant;

use super::connection::AgentConnection;
use super::event::{ClientCommand, PartEvent, PartStart};
use crate::types::{
    ClientError, FileAttachment, Message, Part, Result, ToolCallPart, ToolCallState, ToolKind,
};

/// Error text for tool calls still open when their turn ends
pub const TURN_ENDED_TEXT: &str = "turn ended before tool call completed";

/// Result of applying one part event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartOutcome {
    /// The message changed
    Applied,
    /// The event was out of order, duplicated, or for an unknown part
    Ignored,
    /// A tool call is now waiting on consent
    ApprovalRequested {
        tool_call_id: String,
        kind: ToolKind,
    },
}

/// Result of an approval action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalOutcome {
    Approved,
    Denied,
    /// Late or duplicate action; nothing happened
    Ignored,
}

/// How the in-flight turn ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnEnd {
    Completed,
    Failed,
}

#[derive(Debug)]
struct OpenPart {
    index: usize,
    input_text: String,
}

#[derive(Debug)]
struct Turn {
    message_id: String,
    open: HashMap<String, OpenPart>,
    closed: HashSet<String>,
    cancel_deadline: Option<Instant>,
}

/// Protocol driver for one session
///
/// Owns the agent connection and tracks which parts of the in-flight
/// assistant message are still open. The message itself lives in the
/// session's history and is passed in by reference.
#[derive(Debug)]
pub struct Transport {
    connection: Option<Box<dyn AgentConnection>>,
    cancel_timeout: Duration,
    turn: Option<Turn>,
    seen_tool_calls: HashSet<String>,
}

impl Transport {
    pub fn new(cancel_timeout: Duration) -> Self {
        Self {
            connection: None,
            cancel_timeout,
            turn: None,
            seen_tool_calls: HashSet::new(),
        }
    }

    /// Attach a freshly launched connection, replacing any previous one
    pub fn attach(&mut self, connection: Box<dyn AgentConnection>) -> Option<Box<dyn AgentConnection>> {
        self.turn = None;
        self.connection.replace(connection)
    }

    /// Detach the connection so it can be killed
    pub fn detach(&mut self) -> Option<Box<dyn AgentConnection>> {
        self.turn = None;
        self.connection.take()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Forward a command to the agent
    pub fn command(&self, command: ClientCommand) -> Result<()> {
        self.connection
            .as_ref()
            .ok_or(ClientError::NotConnected)?
            .send(command)
    }

    /// Start a turn; returns the empty assistant message to stream into
    pub fn send(&mut self, text: &str, files: &[FileAttachment]) -> Result<Message> {
        if let Some(turn) = &self.turn {
            return Err(ClientError::invalid_state(format!(
                "turn already in flight for message {}",
                turn.message_id
            )));
        }

        self.command(ClientCommand::Prompt {
            text: text.to_string(),
            files: files.to_vec(),
        })?;

        let message = Message::assistant();
        tracing::debug!(message_id = %message.id, "Turn started");
        self.turn = Some(Turn {
            message_id: message.id.clone(),
            open: HashMap::new(),
            closed: HashSet::new(),
            cancel_deadline: None,
        });
        Ok(message)
    }

    /// Id of the message currently streaming
    pub fn in_flight(&self) -> Option<&str> {
        self.turn.as_ref().map(|t| t.message_id.as_str())
    }

    /// When a pending cancel gives up
    pub fn cancel_deadline(&self) -> Option<Instant> {
        self.turn.as_ref().and_then(|t| t.cancel_deadline)
    }

    /// Ask the agent to stop the in-flight turn
    ///
    /// Returns false when there is nothing to cancel. A second cancel keeps
    /// the first deadline.
    pub fn cancel(&mut self) -> Result<bool> {
        let Some(turn) = &self.turn else {
            return Ok(false);
        };
        if turn.cancel_deadline.is_some() {
            return Ok(true);
        }

        self.command(ClientCommand::Cancel)?;
        let deadline = Instant::now() + self.cancel_timeout;
        if let Some(turn) = self.turn.as_mut() {
            turn.cancel_deadline = Some(deadline);
        }
        tracing::info!(
            timeout_ms = u64::try_from(self.cancel_timeout.as_millis()).unwrap_or(u64::MAX),
            "Cancel requested"
        );
        Ok(true)
    }

    pub fn cancel_timeout(&self) -> Duration {
        self.cancel_timeout
    }

    /// Apply one part event to the in-flight message
    pub fn apply(&mut self, message: &mut Message, event: PartEvent) -> PartOutcome {
        let Some(turn) = self.turn.as_mut() else {
            tracing::debug!(part_id = %event.part_id(), "Part event with no turn in flight");
            return PartOutcome::Ignored;
        };
        if turn.message_id != message.id {
            tracing::warn!(part_id = %event.part_id(), "Part event for a message that is not streaming");
            return PartOutcome::Ignored;
        }
        tracing::trace!(?event, "Part event");

        match event {
            PartEvent::Start { part_id, part } => {
                if turn.open.contains_key(&part_id) || turn.closed.contains(&part_id) {
                    tracing::warn!(part_id = %part_id, "Duplicate part start");
                    return PartOutcome::Ignored;
                }
                let (new_part, streams) = match part {
                    PartStart::Text => (Part::text(""), true),
                    PartStart::Reasoning => (
                        Part::Reasoning {
                            content: String::new(),
                            streaming: true,
                        },
                        true,
                    ),
                    PartStart::ToolCall {
                        tool_name,
                        kind,
                        title,
                    } => {
                        if !self.seen_tool_calls.insert(part_id.clone()) {
                            tracing::warn!(tool_call_id = %part_id, "Tool call id reused within session");
                            return PartOutcome::Ignored;
                        }
                        let kind = kind.unwrap_or_else(|| ToolKind::infer(&tool_name));
                        let mut call = ToolCallPart::streaming(part_id.clone(), tool_name, kind);
                        call.title = title;
                        (Part::ToolCall(call), true)
                    }
                    PartStart::File(file) => (Part::File(file), false),
                    PartStart::Source { url, title } => (Part::Source { url, title }, false),
                };

                if streams {
                    turn.open.insert(
                        part_id,
                        OpenPart {
                            index: message.parts.len(),
                            input_text: String::new(),
                        },
                    );
                } else {
                    turn.closed.insert(part_id);
                }
                message.parts.push(new_part);
                PartOutcome::Applied
            }

            PartEvent::Append { part_id, delta } => {
                let Some(open) = turn.open.get_mut(&part_id) else {
                    if turn.closed.contains(&part_id) {
                        tracing::warn!(part_id = %part_id, "Append after finalize");
                    } else {
                        tracing::debug!(part_id = %part_id, "Append to unknown part");
                    }
                    return PartOutcome::Ignored;
                };
                match message.parts.get_mut(open.index) {
                    Some(Part::Text { content }) | Some(Part::Reasoning { content, .. }) => {
                        content.push_str(&delta);
                    }
                    Some(Part::ToolCall(_)) => open.input_text.push_str(&delta),
                    _ => return PartOutcome::Ignored,
                }
                PartOutcome::Applied
            }

            PartEvent::Finalize { part_id, input } => {
                let Some(open) = turn.open.remove(&part_id) else {
                    tracing::debug!(part_id = %part_id, "Finalize for a part that is not open");
                    return PartOutcome::Ignored;
                };
                turn.closed.insert(part_id.clone());
                match message.parts.get_mut(open.index) {
                    Some(Part::Reasoning { streaming, .. }) => *streaming = false,
                    Some(Part::ToolCall(call)) => {
                        call.input = input.unwrap_or_else(|| parse_input(&open.input_text));
                        if let Err(e) = call.transition(ToolCallState::InputAvailable) {
                            tracing::warn!(tool_call_id = %part_id, transition = %e, "Invalid tool call transition");
                        }
                    }
                    _ => {}
                }
                PartOutcome::Applied
            }

            PartEvent::ApprovalRequested { tool_call_id } => {
                let Some(call) = message.tool_call_mut(&tool_call_id) else {
                    tracing::warn!(tool_call_id = %tool_call_id, "Approval requested for unknown tool call");
                    return PartOutcome::Ignored;
                };
                match call.transition(ToolCallState::ApprovalRequested) {
                    Ok(()) => PartOutcome::ApprovalRequested {
                        kind: call.kind,
                        tool_call_id,
                    },
                    Err(e) => {
                        tracing::warn!(tool_call_id = %tool_call_id, transition = %e, "Invalid tool call transition");
                        PartOutcome::Ignored
                    }
                }
            }

            PartEvent::ToolOutput {
                tool_call_id,
                output,
            } => apply_tool_result(message, &tool_call_id, |call| call.complete(output)),

            PartEvent::ToolError {
                tool_call_id,
                error_text,
            } => apply_tool_result(message, &tool_call_id, |call| call.fail(error_text)),

            PartEvent::ToolDenied { tool_call_id } => {
                apply_tool_result(message, &tool_call_id, ToolCallPart::deny)
            }
        }
    }

    /// Answer a pending approval request
    ///
    /// Unknown ids and calls that are not waiting on consent are ignored, so
    /// late or repeated clicks are harmless.
    pub fn approve(
        &mut self,
        message: Option<&mut Message>,
        tool_call_id: &str,
        granted: bool,
    ) -> Result<ApprovalOutcome> {
        let Some(call) = message.and_then(|m| m.tool_call_mut(tool_call_id)) else {
            tracing::debug!(tool_call_id = %tool_call_id, "Approval for unknown tool call ignored");
            return Ok(ApprovalOutcome::Ignored);
        };
        if call.state != ToolCallState::ApprovalRequested {
            tracing::debug!(
                tool_call_id = %tool_call_id,
                state = %call.state,
                "Approval for tool call not awaiting consent ignored"
            );
            return Ok(ApprovalOutcome::Ignored);
        }

        self.command(ClientCommand::PermissionResponse {
            tool_call_id: tool_call_id.to_string(),
            granted,
        })?;

        if granted {
            call.transition(ToolCallState::Approved)
                .map_err(|e| ClientError::internal(e.to_string()))?;
            tracing::info!(tool_call_id = %tool_call_id, "Tool call approved");
            Ok(ApprovalOutcome::Approved)
        } else {
            call.deny().map_err(|e| ClientError::internal(e.to_string()))?;
            tracing::info!(tool_call_id = %tool_call_id, "Tool call denied");
            Ok(ApprovalOutcome::Denied)
        }
    }

    /// Close the in-flight turn
    ///
    /// Open parts are closed and every non-terminal tool call is forced to a
    /// terminal state: denied if it was waiting on consent during a cancel,
    /// otherwise errored. Returns the number of tool calls closed this way.
    pub fn finish_turn(&mut self, message: &mut Message, end: TurnEnd) -> usize {
        let Some(turn) = self.turn.take() else {
            return 0;
        };
        if turn.message_id != message.id {
            tracing::warn!(message_id = %message.id, "Finishing a turn for a different message");
        }
        let cancelled = turn.cancel_deadline.is_some();

        let mut closed = 0;
        for part in &mut message.parts {
            match part {
                Part::Reasoning { streaming, .. } => *streaming = false,
                Part::ToolCall(call) if !call.state.is_terminal() => {
                    if cancelled && call.state == ToolCallState::ApprovalRequested {
                        call.state = ToolCallState::OutputDenied;
                        call.output = None;
                    } else {
                        call.abort(TURN_ENDED_TEXT);
                    }
                    closed += 1;
                }
                _ => {}
            }
        }

        tracing::debug!(
            message_id = %message.id,
            ?end,
            cancelled,
            closed_tool_calls = closed,
            "Turn finished"
        );
        closed
    }
}

fn apply_tool_result<F>(message: &mut Message, tool_call_id: &str, apply: F) -> PartOutcome
where
    F: FnOnce(&mut ToolCallPart) -> std::result::Result<(), crate::types::InvalidTransition>,
{
    let Some(call) = message.tool_call_mut(tool_call_id) else {
        tracing::warn!(tool_call_id = %tool_call_id, "Result for unknown tool call");
        return PartOutcome::Ignored;
    };
    match apply(call) {
        Ok(()) => PartOutcome::Applied,
        Err(e) => {
            tracing::warn!(tool_call_id = %tool_call_id, transition = %e, "Invalid tool call transition");
            PartOutcome::Ignored
        }
    }
}

fn parse_input(text: &str) -> serde_json::Value {
    if text.trim().is_empty() {
        return serde_json::Value::Object(serde_json::Map::new());
    }
    serde_json::from_str(text).unwrap_or_else(|_| serde_json::Value::String(text.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::in_process::InProcessConnection;
    use crate::transport::AgentHarness;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn connected() -> (Transport, AgentHarness) {
        let (connection, harness) = InProcessConnection::pair_for_tests();
        let mut transport = Transport::new(Duration::from_secs(10));
        transport.attach(Box::new(connection));
        (transport, harness)
    }

    fn start_tool(transport: &mut Transport, message: &mut Message, id: &str, name: &str) {
        transport.apply(
            message,
            PartEvent::Start {
                part_id: id.into(),
                part: PartStart::ToolCall {
                    tool_name: name.into(),
                    kind: None,
                    title: None,
                },
            },
        );
    }

    fn finalize(transport: &mut Transport, message: &mut Message, id: &str) {
        transport.apply(
            message,
            PartEvent::Finalize {
                part_id: id.into(),
                input: None,
            },
        );
    }

    #[test]
    fn test_send_requires_connection() {
        let mut transport = Transport::new(Duration::from_secs(1));
        let err = transport.send("hi", &[]).unwrap_err();
        assert!(matches!(err, ClientError::NotConnected));
        assert!(transport.in_flight().is_none());
    }

    #[test]
    fn test_single_turn_in_flight() {
        let (mut transport, mut harness) = connected();
        let message = transport.send("hi", &[]).unwrap();
        assert_eq!(transport.in_flight(), Some(message.id.as_str()));
        assert!(transport.send("again", &[]).is_err());
        assert_eq!(
            harness.take_commands(),
            vec![ClientCommand::Prompt {
                text: "hi".into(),
                files: vec![]
            }]
        );
    }

    #[test]
    fn test_text_streaming_and_append_after_finalize() {
        let (mut transport, _harness) = connected();
        let mut message = transport.send("hi", &[]).unwrap();

        transport.apply(
            &mut message,
            PartEvent::Start {
                part_id: "t1".into(),
                part: PartStart::Text,
            },
        );
        for delta in ["Hel", "lo"] {
            transport.apply(
                &mut message,
                PartEvent::Append {
                    part_id: "t1".into(),
                    delta: delta.into(),
                },
            );
        }
        finalize(&mut transport, &mut message, "t1");
        let late = transport.apply(
            &mut message,
            PartEvent::Append {
                part_id: "t1".into(),
                delta: "!".into(),
            },
        );

        assert_eq!(late, PartOutcome::Ignored);
        assert_eq!(message.text(), "Hello");
    }

    #[test]
    fn test_concurrent_tool_calls_stream_independently() {
        let (mut transport, _harness) = connected();
        let mut message = transport.send("go", &[]).unwrap();

        start_tool(&mut transport, &mut message, "a", "Read");
        start_tool(&mut transport, &mut message, "b", "Bash");
        transport.apply(
            &mut message,
            PartEvent::Append {
                part_id: "b".into(),
                delta: r#"{"command":"#.into(),
            },
        );
        transport.apply(
            &mut message,
            PartEvent::Append {
                part_id: "a".into(),
                delta: "not json".into(),
            },
        );
        transport.apply(
            &mut message,
            PartEvent::Append {
                part_id: "b".into(),
                delta: r#""ls"}"#.into(),
            },
        );
        finalize(&mut transport, &mut message, "b");
        finalize(&mut transport, &mut message, "a");

        let a = message.tool_call("a").unwrap();
        assert_eq!(a.kind, ToolKind::Read);
        assert_eq!(a.state, ToolCallState::InputAvailable);
        assert_eq!(a.input, json!("not json"));

        let b = message.tool_call("b").unwrap();
        assert_eq!(b.kind, ToolKind::Execute);
        assert_eq!(b.input, json!({"command": "ls"}));
    }

    #[test]
    fn test_tool_call_id_unique_per_session() {
        let (mut transport, _harness) = connected();
        let mut first = transport.send("one", &[]).unwrap();
        start_tool(&mut transport, &mut first, "call_1", "Read");
        transport.finish_turn(&mut first, TurnEnd::Completed);

        let mut second = transport.send("two", &[]).unwrap();
        start_tool(&mut transport, &mut second, "call_1", "Read");
        assert!(second.parts.is_empty());
    }

    #[test]
    fn test_approve_and_idempotence() {
        let (mut transport, mut harness) = connected();
        let mut message = transport.send("go", &[]).unwrap();
        start_tool(&mut transport, &mut message, "c1", "Bash");
        finalize(&mut transport, &mut message, "c1");
        let outcome = transport.apply(
            &mut message,
            PartEvent::ApprovalRequested {
                tool_call_id: "c1".into(),
            },
        );
        assert_eq!(
            outcome,
            PartOutcome::ApprovalRequested {
                tool_call_id: "c1".into(),
                kind: ToolKind::Execute
            }
        );
        harness.take_commands();

        let first = transport.approve(Some(&mut message), "c1", true).unwrap();
        let after_first = message.clone();
        let second = transport.approve(Some(&mut message), "c1", true).unwrap();

        assert_eq!(first, ApprovalOutcome::Approved);
        assert_eq!(second, ApprovalOutcome::Ignored);
        assert_eq!(message, after_first);
        assert_eq!(harness.take_commands().len(), 1);
    }

    #[test]
    fn test_terminal_tool_call_never_changes() {
        let (mut transport, _harness) = connected();
        let mut message = transport.send("go", &[]).unwrap();
        start_tool(&mut transport, &mut message, "c1", "Read");
        finalize(&mut transport, &mut message, "c1");
        transport.apply(
            &mut message,
            PartEvent::ToolOutput {
                tool_call_id: "c1".into(),
                output: "ok".into(),
            },
        );

        let late = transport.apply(
            &mut message,
            PartEvent::ToolError {
                tool_call_id: "c1".into(),
                error_text: "boom".into(),
            },
        );
        assert_eq!(late, PartOutcome::Ignored);
        assert_eq!(
            transport.approve(Some(&mut message), "c1", false).unwrap(),
            ApprovalOutcome::Ignored
        );

        let call = message.tool_call("c1").unwrap();
        assert_eq!(call.state, ToolCallState::OutputAvailable);
        assert_eq!(call.output.as_deref(), Some("ok"));
        assert!(call.error_text.is_none());
    }

    #[test]
    fn test_finish_turn_closes_open_calls() {
        let (mut transport, _harness) = connected();
        let mut message = transport.send("go", &[]).unwrap();
        start_tool(&mut transport, &mut message, "open", "Read");
        start_tool(&mut transport, &mut message, "waiting", "Bash");
        finalize(&mut transport, &mut message, "waiting");
        transport.apply(
            &mut message,
            PartEvent::ApprovalRequested {
                tool_call_id: "waiting".into(),
            },
        );

        let closed = transport.finish_turn(&mut message, TurnEnd::Completed);

        assert_eq!(closed, 2);
        assert!(transport.in_flight().is_none());
        let open = message.tool_call("open").unwrap();
        assert_eq!(open.state, ToolCallState::OutputError);
        assert_eq!(open.error_text.as_deref(), Some(TURN_ENDED_TEXT));
        assert_eq!(
            message.tool_call("waiting").unwrap().state,
            ToolCallState::OutputError
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_denies_pending_approvals() {
        let (mut transport, mut harness) = connected();
        let mut message = transport.send("go", &[]).unwrap();
        start_tool(&mut transport, &mut message, "c1", "Bash");
        finalize(&mut transport, &mut message, "c1");
        transport.apply(
            &mut message,
            PartEvent::ApprovalRequested {
                tool_call_id: "c1".into(),
            },
        );

        let before = Instant::now();
        assert!(transport.cancel().unwrap());
        let deadline = transport.cancel_deadline().unwrap();
        assert_eq!(deadline - before, Duration::from_secs(10));

        assert!(transport.cancel().unwrap());
        assert_eq!(transport.cancel_deadline(), Some(deadline));

        transport.finish_turn(&mut message, TurnEnd::Completed);
        let call = message.tool_call("c1").unwrap();
        assert_eq!(call.state, ToolCallState::OutputDenied);
        assert!(call.output.is_none());

        let cancels = harness
            .take_commands()
            .into_iter()
            .filter(|c| *c == ClientCommand::Cancel)
            .count();
        assert_eq!(cancels, 1);
    }

    #[test]
    fn test_cancel_without_turn() {
        let (mut transport, _harness) = connected();
        assert!(!transport.cancel().unwrap());
        assert!(transport.cancel_deadline().is_none());
    }
}
