//! Read-side grouping of consecutive tool calls
//!
//! Three or more adjacent tool calls that have all finished collapse into one
//! "tool run" for summaries. This never touches the message itself.

use serde::Serialize;

use crate::types::{Message, Part, ToolCallState};

/// Minimum number of adjacent tool calls that form a run
pub const MIN_RUN_LEN: usize = 3;

/// A span of `message.parts` eligible for grouping
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolRun {
    /// Index of the first tool call
    pub start: usize,
    /// Number of tool calls in the run
    pub len: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub denied: usize,
}

impl ToolRun {
    /// Part index range covered by the run
    pub fn range(&self) -> std::ops::Range<usize> {
        self.start..self.start + self.len
    }
}

/// Find every groupable run in a message
///
/// Runs are maximal: a non-tool part ends a run, and a run containing any
/// non-terminal call is not reported until that call finishes.
pub fn tool_runs(message: &Message) -> Vec<ToolRun> {
    let mut runs = Vec::new();
    let mut start = 0;

    while start < message.parts.len() {
        let len = message.parts[start..]
            .iter()
            .take_while(|p| matches!(p, Part::ToolCall(_)))
            .count();
        if len == 0 {
            start += 1;
            continue;
        }

        let calls = message.parts[start..start + len]
            .iter()
            .filter_map(Part::as_tool_call);
        let mut run = ToolRun {
            start,
            len,
            succeeded: 0,
            failed: 0,
            denied: 0,
        };
        let mut complete = true;
        for call in calls {
            match call.state {
                ToolCallState::OutputAvailable => run.succeeded += 1,
                ToolCallState::OutputError => run.failed += 1,
                ToolCallState::OutputDenied => run.denied += 1,
                _ => complete = false,
            }
        }
        if complete && len >= MIN_RUN_LEN {
            runs.push(run);
        }
        start += len;
    }
    runs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ToolCallPart, ToolKind};
    use pretty_assertions::assert_eq;

    fn call(id: &str, state: ToolCallState) -> Part {
        let mut call = ToolCallPart::streaming(id, "Read", ToolKind::Read);
        call.state = state;
        Part::ToolCall(call)
    }

    fn message(parts: Vec<Part>) -> Message {
        let mut message = Message::assistant();
        message.parts = parts;
        message
    }

    #[test]
    fn test_three_terminal_calls_group() {
        let m = message(vec![
            Part::text("looking"),
            call("a", ToolCallState::OutputAvailable),
            call("b", ToolCallState::OutputError),
            call("c", ToolCallState::OutputDenied),
            Part::text("done"),
        ]);

        let runs = tool_runs(&m);
        assert_eq!(
            runs,
            vec![ToolRun {
                start: 1,
                len: 3,
                succeeded: 1,
                failed: 1,
                denied: 1
            }]
        );
        assert_eq!(runs[0].range(), 1..4);
    }

    #[test]
    fn test_two_calls_do_not_group() {
        let m = message(vec![
            call("a", ToolCallState::OutputAvailable),
            call("b", ToolCallState::OutputAvailable),
        ]);
        assert!(tool_runs(&m).is_empty());
    }

    #[test]
    fn test_pending_call_blocks_run() {
        let mut m = message(vec![
            call("a", ToolCallState::OutputAvailable),
            call("b", ToolCallState::ApprovalRequested),
            call("c", ToolCallState::OutputAvailable),
        ]);
        assert!(tool_runs(&m).is_empty());

        if let Some(b) = m.tool_call_mut("b") {
            b.state = ToolCallState::OutputDenied;
        }
        assert_eq!(tool_runs(&m).len(), 1);
    }

    #[test]
    fn test_text_splits_runs() {
        let m = message(vec![
            call("a", ToolCallState::OutputAvailable),
            call("b", ToolCallState::OutputAvailable),
            Part::text("between"),
            call("c", ToolCallState::OutputAvailable),
            call("d", ToolCallState::OutputAvailable),
            call("e", ToolCallState::OutputAvailable),
        ]);
        let runs = tool_runs(&m);
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].start, 3);
    }
}
