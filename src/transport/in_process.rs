//! In-process agent connections
//!
//! Lets an agent implemented in the same process (or a scripted test driver)
//! stand in for a child process. Each launch hands an [`AgentHarness`] to the
//! owner of the launcher: commands the session sends come out of
//! `harness.commands`, and events pushed into `harness.events` reach the
//! session.

use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::connection::{AgentChannel, AgentConnection, AgentLauncher, LaunchRequest};
use super::event::{AgentEvent, ClientCommand};
use crate::types::{ClientError, Result};

/// The agent side of an in-process connection
#[derive(Debug)]
pub struct AgentHarness {
    pub request: LaunchRequest,
    pub commands: mpsc::UnboundedReceiver<ClientCommand>,
    pub events: mpsc::UnboundedSender<AgentEvent>,
}

impl AgentHarness {
    /// Push an event to the session; returns false once the session is gone
    pub fn emit(&self, event: AgentEvent) -> bool {
        self.events.send(event).is_ok()
    }

    /// Drain every command received so far without waiting
    pub fn take_commands(&mut self) -> Vec<ClientCommand> {
        let mut out = Vec::new();
        while let Ok(command) = self.commands.try_recv() {
            out.push(command);
        }
        out
    }
}

/// Client side of an in-process connection
#[derive(Debug)]
pub struct InProcessConnection {
    commands: Option<mpsc::UnboundedSender<ClientCommand>>,
}

impl InProcessConnection {
    #[cfg(test)]
    pub(crate) fn pair_for_tests() -> (Self, AgentHarness) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, _event_rx) = mpsc::unbounded_channel();
        let request = LaunchRequest {
            provider: crate::provider::ProviderRegistry::builtin()
                .resolve("claude")
                .expect("builtin provider"),
            cwd: std::env::temp_dir(),
            resume_session_id: None,
            env: std::collections::HashMap::new(),
        };
        (
            Self {
                commands: Some(command_tx),
            },
            AgentHarness {
                request,
                commands: command_rx,
                events: event_tx,
            },
        )
    }
}

#[async_trait]
impl AgentConnection for InProcessConnection {
    fn send(&self, command: ClientCommand) -> Result<()> {
        let tx = self.commands.as_ref().ok_or(ClientError::NotConnected)?;
        tx.send(command)
            .map_err(|_| ClientError::AgentExited("in-process agent dropped".to_string()))
    }

    async fn kill(&mut self) -> Result<()> {
        self.commands = None;
        Ok(())
    }
}

/// Launcher producing in-process connections
#[derive(Debug)]
pub struct InProcessLauncher {
    harnesses: mpsc::UnboundedSender<AgentHarness>,
    fail_next: Mutex<Option<String>>,
}

impl InProcessLauncher {
    /// Create a launcher and the stream of harnesses it will produce
    pub fn new() -> (Self, mpsc::UnboundedReceiver<AgentHarness>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                harnesses: tx,
                fail_next: Mutex::new(None),
            },
            rx,
        )
    }

    /// Make the next launch fail as if the agent binary were missing
    pub fn fail_next_launch(&self, reason: impl Into<String>) {
        if let Ok(mut slot) = self.fail_next.lock() {
            *slot = Some(reason.into());
        }
    }
}

#[async_trait]
impl AgentLauncher for InProcessLauncher {
    async fn launch(&self, request: LaunchRequest) -> Result<AgentChannel> {
        let failure = self.fail_next.lock().ok().and_then(|mut slot| slot.take());
        if let Some(reason) = failure {
            return Err(ClientError::unavailable(reason));
        }

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        self.harnesses
            .send(AgentHarness {
                request,
                commands: command_rx,
                events: event_tx,
            })
            .map_err(|_| ClientError::LaunchFailed("no harness receiver".to_string()))?;

        Ok(AgentChannel {
            connection: Box::new(InProcessConnection {
                commands: Some(command_tx),
            }),
            events: event_rx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderRegistry;
    use std::collections::HashMap;

    fn request() -> LaunchRequest {
        LaunchRequest {
            provider: ProviderRegistry::builtin().resolve("claude").unwrap(),
            cwd: std::env::temp_dir(),
            resume_session_id: None,
            env: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_commands_reach_harness() {
        let (launcher, mut harnesses) = InProcessLauncher::new();
        let channel = launcher.launch(request()).await.unwrap();
        let mut harness = harnesses.recv().await.unwrap();

        channel.connection.send(ClientCommand::Cancel).unwrap();
        assert_eq!(harness.take_commands(), vec![ClientCommand::Cancel]);
    }

    #[tokio::test]
    async fn test_send_after_kill_fails() {
        let (launcher, _harnesses) = InProcessLauncher::new();
        let mut channel = launcher.launch(request()).await.unwrap();

        channel.connection.kill().await.unwrap();
        let err = channel.connection.send(ClientCommand::Cancel).unwrap_err();
        assert!(matches!(err, ClientError::NotConnected));
    }

    #[tokio::test]
    async fn test_fail_next_launch_is_one_shot() {
        let (launcher, _harnesses) = InProcessLauncher::new();
        launcher.fail_next_launch("not installed");

        let err = launcher.launch(request()).await.unwrap_err();
        assert!(matches!(err, ClientError::AgentUnavailable(_)));
        assert!(launcher.launch(request()).await.is_ok());
    }
}
