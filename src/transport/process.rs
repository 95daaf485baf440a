//! Agent processes speaking newline-delimited JSON over stdio
//!
//! Each agent runs in its own process group so that killing a session also
//! kills any tools the agent spawned.

use std::io;
use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use process_wrap::tokio::{ChildWrapper, CommandWrap, KillOnDrop};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use super::connection::{AgentChannel, AgentConnection, AgentLauncher, LaunchRequest};
use super::event::{AgentEvent, ClientCommand};
use crate::types::{ClientError, Result};

/// Time an agent gets to exit after `shutdown` before its group is killed
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Child process handle that signals the whole process group
#[derive(Debug)]
struct AgentProcess {
    inner: Box<dyn ChildWrapper>,
}

impl AgentProcess {
    fn id(&self) -> u32 {
        self.inner.id().unwrap_or(0)
    }

    /// Kill the process group and wait for exit
    async fn kill(&mut self) -> io::Result<()> {
        Pin::from(self.inner.kill()).await
    }

    async fn wait(&mut self) -> io::Result<std::process::ExitStatus> {
        Pin::from(self.inner.wait()).await
    }

    fn try_wait(&mut self) -> io::Result<Option<std::process::ExitStatus>> {
        self.inner.try_wait()
    }
}

/// Connection to a spawned agent process
#[derive(Debug)]
pub struct ProcessConnection {
    provider_id: String,
    commands: Option<mpsc::UnboundedSender<ClientCommand>>,
    child: Option<AgentProcess>,
}

#[async_trait]
impl AgentConnection for ProcessConnection {
    fn send(&self, command: ClientCommand) -> Result<()> {
        let tx = self.commands.as_ref().ok_or(ClientError::NotConnected)?;
        tx.send(command)
            .map_err(|_| ClientError::AgentExited(format!("{} stdin closed", self.provider_id)))
    }

    async fn kill(&mut self) -> Result<()> {
        if let Some(tx) = self.commands.take() {
            drop(tx.send(ClientCommand::Shutdown));
        }
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        if let Ok(Some(status)) = child.try_wait() {
            tracing::debug!(provider = %self.provider_id, ?status, "Agent already exited");
            return Ok(());
        }

        match tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::info!(provider = %self.provider_id, ?status, "Agent exited after shutdown");
                Ok(())
            }
            Ok(Err(e)) => Err(ClientError::Io(e)),
            Err(_) => {
                tracing::warn!(
                    provider = %self.provider_id,
                    pid = child.id(),
                    "Agent ignored shutdown, killing process group"
                );
                child.kill().await.map_err(ClientError::Io)
            }
        }
    }
}

/// Launches agents as child processes
#[derive(Debug, Default)]
pub struct ProcessLauncher;

impl ProcessLauncher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AgentLauncher for ProcessLauncher {
    async fn launch(&self, request: LaunchRequest) -> Result<AgentChannel> {
        let provider = &request.provider;
        if provider.capabilities.terminal_only {
            return Err(ClientError::NoSupport(provider.id.clone()));
        }

        let mut command = CommandWrap::with_new(&provider.command, |cmd| {
            cmd.args(&provider.args)
                .current_dir(&request.cwd)
                .envs(&provider.env)
                .envs(&request.env)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped());
        });
        #[cfg(unix)]
        command.wrap(process_wrap::tokio::ProcessGroup::leader());
        command.wrap(KillOnDrop);

        let mut child = command.spawn().map_err(|e| classify_spawn_error(&provider.command, e))?;

        let stdin = child
            .stdin()
            .take()
            .ok_or_else(|| ClientError::LaunchFailed("agent stdin unavailable".to_string()))?;
        let stdout = child
            .stdout()
            .take()
            .ok_or_else(|| ClientError::LaunchFailed("agent stdout unavailable".to_string()))?;
        let stderr = child.stderr().take();

        let process = AgentProcess { inner: child };
        tracing::info!(
            provider = %provider.id,
            pid = process.id(),
            cwd = %request.cwd.display(),
            resume = request.resume_session_id.is_some(),
            "Agent process started"
        );

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        tokio::spawn(write_commands(provider.id.clone(), stdin, command_rx));
        tokio::spawn(read_events(provider.id.clone(), stdout, event_tx));
        if let Some(stderr) = stderr {
            tokio::spawn(log_stderr(provider.id.clone(), stderr));
        }

        command_tx
            .send(ClientCommand::Initialize {
                cwd: request.cwd.clone(),
                resume_session_id: request.resume_session_id.clone(),
            })
            .map_err(|_| ClientError::LaunchFailed("agent writer stopped".to_string()))?;

        Ok(AgentChannel {
            connection: Box::new(ProcessConnection {
                provider_id: provider.id.clone(),
                commands: Some(command_tx),
                child: Some(process),
            }),
            events: event_rx,
        })
    }
}

fn classify_spawn_error(command: &str, error: io::Error) -> ClientError {
    match error.kind() {
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => {
            ClientError::unavailable(format!("{}: {}", command, error))
        }
        _ => ClientError::LaunchFailed(format!("{}: {}", command, error)),
    }
}

async fn write_commands<W>(
    provider: String,
    mut stdin: W,
    mut commands: mpsc::UnboundedReceiver<ClientCommand>,
) where
    W: tokio::io::AsyncWrite + Unpin,
{
    while let Some(command) = commands.recv().await {
        let mut line = match serde_json::to_string(&command) {
            Ok(line) => line,
            Err(e) => {
                tracing::error!(provider = %provider, error = %e, "Failed to encode command");
                continue;
            }
        };
        line.push('\n');

        if let Err(e) = stdin.write_all(line.as_bytes()).await {
            tracing::warn!(provider = %provider, error = %e, "Agent stdin closed");
            break;
        }
        if let Err(e) = stdin.flush().await {
            tracing::warn!(provider = %provider, error = %e, "Agent stdin flush failed");
            break;
        }
        if matches!(command, ClientCommand::Shutdown) {
            break;
        }
    }
}

async fn read_events<R>(provider: String, stdout: R, events: mpsc::UnboundedSender<AgentEvent>)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stdout).lines();
    let exit_message = loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<AgentEvent>(&line) {
                    Ok(event) => {
                        if events.send(event).is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(provider = %provider, error = %e, "Malformed agent event");
                    }
                }
            }
            Ok(None) => break "agent closed its output".to_string(),
            Err(e) => break format!("agent output unreadable: {}", e),
        }
    };

    tracing::debug!(provider = %provider, reason = %exit_message, "Agent event stream ended");
    drop(events.send(AgentEvent::Exited {
        code: None,
        message: Some(exit_message),
    }));
}

async fn log_stderr<R>(provider: String, stderr: R)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!(provider = %provider, "agent stderr: {}", line);
    }
}
