//! Agent transport
//!
//! The [`Transport`] turns a raw bidirectional agent connection into an
//! ordered stream of part updates on one assistant message at a time, and
//! carries approval and cancel signals back to the agent.
//!
//! Launchers produce connections: [`ProcessLauncher`] spawns a child process
//! speaking newline-delimited JSON, [`InProcessLauncher`] wires an agent
//! living in the same process.

mod connection;
mod event;
mod grouping;
mod in_process;
mod process;
mod stream;

pub use connection::{AgentChannel, AgentConnection, AgentLauncher, LaunchRequest};
pub use event::{AgentEvent, ClientCommand, PartEvent, PartStart, SideChannelEvent, StopReason};
pub use grouping::{MIN_RUN_LEN, ToolRun, tool_runs};
pub use in_process::{AgentHarness, InProcessConnection, InProcessLauncher};
pub use process::{ProcessConnection, ProcessLauncher};
pub use stream::{ApprovalOutcome, PartOutcome, TURN_ENDED_TEXT, Transport, TurnEnd};
