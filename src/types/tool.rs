//! Tool classification shared by tool-call parts and provider capabilities

use serde::{Deserialize, Serialize};

/// Tool kind for categorizing tool calls
///
/// Agents usually send a kind with each tool call. When they don't, the kind
/// is inferred from the tool name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    /// File read operations
    Read,
    /// File edit/write operations
    Edit,
    /// Command execution
    Execute,
    /// Search operations (grep, glob)
    Search,
    /// Network fetch operations
    Fetch,
    /// Thinking/planning operations
    Think,
    /// Mode switching operations
    SwitchMode,
    /// Other/unknown tool types
    #[default]
    Other,
}

impl ToolKind {
    /// Every kind, in declaration order
    pub const ALL: [ToolKind; 8] = [
        ToolKind::Read,
        ToolKind::Edit,
        ToolKind::Execute,
        ToolKind::Search,
        ToolKind::Fetch,
        ToolKind::Think,
        ToolKind::SwitchMode,
        ToolKind::Other,
    ];

    /// Infer a kind from a tool name
    ///
    /// MCP prefixes (`mcp__<server>__`) are ignored.
    pub fn infer(tool_name: &str) -> Self {
        let name = tool_name
            .strip_prefix("mcp__")
            .and_then(|rest| rest.split_once("__").map(|(_, tool)| tool))
            .unwrap_or(tool_name)
            .to_ascii_lowercase();

        match name.as_str() {
            "read" | "read_file" | "notebookread" | "ls" | "list_directory" => ToolKind::Read,
            "edit" | "write" | "multiedit" | "write_file" | "notebookedit" | "apply_patch" => {
                ToolKind::Edit
            }
            "bash" | "shell" | "run_shell_command" | "exec" | "killshell" => ToolKind::Execute,
            "grep" | "glob" | "search" | "find" | "search_file_content" => ToolKind::Search,
            "webfetch" | "websearch" | "web_fetch" | "fetch" => ToolKind::Fetch,
            "think" | "todowrite" | "task" => ToolKind::Think,
            "exitplanmode" | "switch_mode" => ToolKind::SwitchMode,
            _ => ToolKind::Other,
        }
    }

    /// Get the wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Edit => "edit",
            Self::Execute => "execute",
            Self::Search => "search",
            Self::Fetch => "fetch",
            Self::Think => "think",
            Self::SwitchMode => "switch_mode",
            Self::Other => "other",
        }
    }

    /// Whether the tool can change files or run programs
    pub fn is_mutating(&self) -> bool {
        matches!(self, Self::Edit | Self::Execute | Self::Other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_kind_serialization() {
        assert_eq!(serde_json::to_string(&ToolKind::Read).unwrap(), "\"read\"");
        assert_eq!(
            serde_json::to_string(&ToolKind::SwitchMode).unwrap(),
            "\"switch_mode\""
        );
        let parsed: ToolKind = serde_json::from_str("\"execute\"").unwrap();
        assert_eq!(parsed, ToolKind::Execute);
    }

    #[test]
    fn test_infer_from_name() {
        assert_eq!(ToolKind::infer("Read"), ToolKind::Read);
        assert_eq!(ToolKind::infer("mcp__acp__Bash"), ToolKind::Execute);
        assert_eq!(ToolKind::infer("Glob"), ToolKind::Search);
        assert_eq!(ToolKind::infer("apply_patch"), ToolKind::Edit);
        assert_eq!(ToolKind::infer("mystery_tool"), ToolKind::Other);
    }

    #[test]
    fn test_is_mutating() {
        assert!(ToolKind::Execute.is_mutating());
        assert!(ToolKind::Edit.is_mutating());
        assert!(!ToolKind::Read.is_mutating());
        assert!(!ToolKind::Search.is_mutating());
    }
}
