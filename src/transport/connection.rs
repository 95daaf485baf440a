//! Seams between a session and the agent process it talks to

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::event::{AgentEvent, ClientCommand};
use crate::provider::ProviderDescriptor;
use crate::types::Result;

/// Outgoing half of a live agent connection
///
/// `send` only hands the command off; its effects are observed later as
/// `AgentEvent`s. It must not block, so it is safe to call from inside
/// event handling.
#[async_trait]
pub trait AgentConnection: Send + Sync + std::fmt::Debug {
    /// Queue a command for the agent
    fn send(&self, command: ClientCommand) -> Result<()>;

    /// Stop the agent and release its process resources
    ///
    /// Must be safe to call more than once.
    async fn kill(&mut self) -> Result<()>;
}

/// Everything needed to start one agent process
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub provider: ProviderDescriptor,
    pub cwd: PathBuf,
    /// External session id to reload, for resume
    pub resume_session_id: Option<String>,
    /// Extra environment on top of the provider's own
    pub env: HashMap<String, String>,
}

/// A started agent: the command sink plus its event stream
#[derive(Debug)]
pub struct AgentChannel {
    pub connection: Box<dyn AgentConnection>,
    pub events: mpsc::UnboundedReceiver<AgentEvent>,
}

/// Starts agent processes
///
/// Launch failures should be classified (`AgentUnavailable` for a missing
/// binary, `NoSupport` for a provider that cannot host a chat session) so the
/// session can surface them without retrying.
#[async_trait]
pub trait AgentLauncher: Send + Sync + std::fmt::Debug {
    async fn launch(&self, request: LaunchRequest) -> Result<AgentChannel>;
}
