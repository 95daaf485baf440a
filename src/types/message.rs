//! Conversation messages and their streamed parts

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::tool::ToolKind;

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// A file attached to an outgoing message or produced by the agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileAttachment {
    pub url: String,
    pub media_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

impl FileAttachment {
    /// Create an attachment with no filename
    pub fn new(url: impl Into<String>, media_type: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            media_type: media_type.into(),
            filename: None,
        }
    }

    /// Set the display filename
    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }
}

/// Tool call lifecycle
///
/// ```text
/// input-streaming -> input-available
/// input-available -> approval-requested | output-available | output-error
/// approval-requested -> approved | output-available | output-error | output-denied
/// approved -> output-available | output-error
/// ```
///
/// The three `output-*` states are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolCallState {
    InputStreaming,
    InputAvailable,
    ApprovalRequested,
    Approved,
    OutputAvailable,
    OutputError,
    OutputDenied,
}

impl ToolCallState {
    /// Whether no further transition is possible
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::OutputAvailable | Self::OutputError | Self::OutputDenied
        )
    }

    /// Check a transition against the lifecycle table
    pub fn can_transition_to(&self, next: ToolCallState) -> bool {
        use ToolCallState::*;
        matches!(
            (self, next),
            (InputStreaming, InputAvailable)
                | (InputAvailable, ApprovalRequested | OutputAvailable | OutputError)
                | (
                    ApprovalRequested,
                    Approved | OutputAvailable | OutputError | OutputDenied
                )
                | (Approved, OutputAvailable | OutputError)
        )
    }

    /// Get the wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InputStreaming => "input-streaming",
            Self::InputAvailable => "input-available",
            Self::ApprovalRequested => "approval-requested",
            Self::Approved => "approved",
            Self::OutputAvailable => "output-available",
            Self::OutputError => "output-error",
            Self::OutputDenied => "output-denied",
        }
    }
}

impl std::fmt::Display for ToolCallState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected tool-call transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: ToolCallState,
    pub to: ToolCallState,
}

impl std::fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {}", self.from, self.to)
    }
}

/// A tool invocation requested by the agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallPart {
    pub tool_call_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub kind: ToolKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub input: serde_json::Value,
    pub state: ToolCallState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_text: Option<String>,
}

impl ToolCallPart {
    /// Create a tool call that is still receiving its input
    pub fn streaming(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        kind: ToolKind,
    ) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            kind,
            title: None,
            input: serde_json::Value::Null,
            state: ToolCallState::InputStreaming,
            output: None,
            error_text: None,
        }
    }

    /// Move to `next` if the lifecycle allows it
    pub fn transition(&mut self, next: ToolCallState) -> Result<(), InvalidTransition> {
        if !self.state.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    /// Terminate with a successful output
    pub fn complete(&mut self, output: impl Into<String>) -> Result<(), InvalidTransition> {
        self.transition(ToolCallState::OutputAvailable)?;
        self.output = Some(output.into());
        Ok(())
    }

    /// Terminate with an error
    pub fn fail(&mut self, error_text: impl Into<String>) -> Result<(), InvalidTransition> {
        self.transition(ToolCallState::OutputError)?;
        self.error_text = Some(error_text.into());
        Ok(())
    }

    /// Terminate as denied; a denied call never carries output
    pub fn deny(&mut self) -> Result<(), InvalidTransition> {
        self.transition(ToolCallState::OutputDenied)?;
        self.output = None;
        Ok(())
    }

    /// Force an error terminal state from any non-terminal state
    ///
    /// Used when the turn ends underneath an open tool call. Returns false if
    /// the call was already terminal.
    pub fn abort(&mut self, error_text: impl Into<String>) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.state = ToolCallState::OutputError;
        self.error_text = Some(error_text.into());
        true
    }
}

/// One unit of message content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Part {
    Text {
        content: String,
    },
    Reasoning {
        content: String,
        streaming: bool,
    },
    ToolCall(ToolCallPart),
    File(FileAttachment),
    Source {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },
}

impl Part {
    /// Create a text part
    pub fn text(content: impl Into<String>) -> Self {
        Part::Text {
            content: content.into(),
        }
    }

    /// Borrow the tool call if this is one
    pub fn as_tool_call(&self) -> Option<&ToolCallPart> {
        match self {
            Part::ToolCall(call) => Some(call),
            _ => None,
        }
    }

    /// Mutably borrow the tool call if this is one
    pub fn as_tool_call_mut(&mut self) -> Option<&mut ToolCallPart> {
        match self {
            Part::ToolCall(call) => Some(call),
            _ => None,
        }
    }
}

/// A conversation message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub parts: Vec<Part>,
    pub created_at: DateTime<Utc>,
    /// Inline error for an assistant turn that failed mid-stream
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Message {
    /// Create a user message from text and attachments
    pub fn user(text: impl Into<String>, files: &[FileAttachment]) -> Self {
        let mut parts = vec![Part::text(text)];
        parts.extend(files.iter().cloned().map(Part::File));
        Self {
            id: new_message_id(),
            role: Role::User,
            parts,
            created_at: Utc::now(),
            error: None,
        }
    }

    /// Create an empty assistant message ready to receive parts
    pub fn assistant() -> Self {
        Self {
            id: new_message_id(),
            role: Role::Assistant,
            parts: Vec::new(),
            created_at: Utc::now(),
            error: None,
        }
    }

    /// Concatenated text content, ignoring other parts
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                Part::Text { content } => Some(content.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Find a tool call by id
    pub fn tool_call(&self, tool_call_id: &str) -> Option<&ToolCallPart> {
        self.parts
            .iter()
            .filter_map(Part::as_tool_call)
            .find(|call| call.tool_call_id == tool_call_id)
    }

    /// Find a tool call by id, mutably
    pub fn tool_call_mut(&mut self, tool_call_id: &str) -> Option<&mut ToolCallPart> {
        self.parts
            .iter_mut()
            .filter_map(Part::as_tool_call_mut)
            .find(|call| call.tool_call_id == tool_call_id)
    }
}

fn new_message_id() -> String {
    format!("msg_{}", uuid::Uuid::new_v4().simple())
}
