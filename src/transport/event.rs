//! Messages exchanged with an agent process
//!
//! `AgentEvent` is everything the agent can tell us; `ClientCommand` is
//! everything we can ask of it. Both are serde-tagged so a stdio bridge can
//! carry them as newline-delimited JSON.

use serde::{Deserialize, Serialize};

use crate::types::{
    AvailableCommand, ConfigOption, FileAttachment, ModeInfo, ModelInfo, PlanEntry, ToolKind,
    UsageSnapshot,
};

/// Events emitted by an agent process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Handshake finished; the agent accepts prompts
    SessionReady { agent_session_id: String },
    /// Incremental content for the in-flight assistant message
    Part(PartEvent),
    /// The in-flight turn ended normally (or after a cancel)
    TurnComplete {
        #[serde(default)]
        stop_reason: StopReason,
    },
    /// The in-flight turn failed
    TurnError { message: String },
    /// Out-of-band metadata; may arrive at any time
    SideChannel(SideChannelEvent),
    /// The agent process is gone
    Exited {
        #[serde(default)]
        code: Option<i32>,
        #[serde(default)]
        message: Option<String>,
    },
}

/// Why a turn ended
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    #[default]
    EndTurn,
    Cancelled,
    MaxTokens,
    Refusal,
}

/// Incremental part updates
///
/// For one `part_id` the agent emits `start`, any number of `append`, then
/// `finalize`. Tool calls use their tool call id as `part_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PartEvent {
    Start { part_id: String, part: PartStart },
    Append { part_id: String, delta: String },
    Finalize {
        part_id: String,
        /// Complete tool input; overrides streamed input text
        #[serde(default, skip_serializing_if = "Option::is_none")]
        input: Option<serde_json::Value>,
    },
    ApprovalRequested { tool_call_id: String },
    ToolOutput { tool_call_id: String, output: String },
    ToolError { tool_call_id: String, error_text: String },
    ToolDenied { tool_call_id: String },
}

impl PartEvent {
    /// The part this event targets
    pub fn part_id(&self) -> &str {
        match self {
            PartEvent::Start { part_id, .. }
            | PartEvent::Append { part_id, .. }
            | PartEvent::Finalize { part_id, .. } => part_id,
            PartEvent::ApprovalRequested { tool_call_id }
            | PartEvent::ToolOutput { tool_call_id, .. }
            | PartEvent::ToolError { tool_call_id, .. }
            | PartEvent::ToolDenied { tool_call_id } => tool_call_id,
        }
    }
}

/// The shape of a newly started part
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PartStart {
    Text,
    Reasoning,
    ToolCall {
        tool_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        kind: Option<ToolKind>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },
    File(FileAttachment),
    Source {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },
}

/// Out-of-band session metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SideChannelEvent {
    Usage(UsageSnapshot),
    Plan {
        entries: Vec<PlanEntry>,
    },
    AvailableCommands {
        commands: Vec<AvailableCommand>,
    },
    Modes {
        available: Vec<ModeInfo>,
        #[serde(default)]
        current_id: Option<String>,
    },
    ModeChanged {
        current_id: String,
    },
    Models {
        available: Vec<ModelInfo>,
        #[serde(default)]
        current_id: Option<String>,
    },
    ModelChanged {
        current_id: String,
    },
    ConfigOptions {
        options: Vec<ConfigOption>,
    },
    ConfigOptionChanged {
        option: ConfigOption,
    },
    SessionInfo {
        #[serde(default)]
        title: Option<String>,
    },
}

/// Commands sent to an agent process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    /// First command after spawn
    Initialize {
        cwd: std::path::PathBuf,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        resume_session_id: Option<String>,
    },
    Prompt {
        text: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        files: Vec<FileAttachment>,
    },
    PermissionResponse {
        tool_call_id: String,
        granted: bool,
    },
    Cancel,
    SetMode {
        mode_id: String,
    },
    SetModel {
        model_id: String,
    },
    SetConfigOption {
        option_id: String,
        value: serde_json::Value,
    },
    Shutdown,
}
