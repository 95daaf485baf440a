//! ACP Session Client
//!
//! Client-side session protocol for driving ACP coding agents: one session
//! per conversation, streamed message parts, tool-call approvals, a FIFO
//! outgoing queue with interrupt, and context-window auto-prune.
//!
//! ## Overview
//!
//! - [`SessionCoordinator`] creates, resumes and closes sessions and persists
//!   finished messages through a [`MessageStore`].
//! - [`SessionHandle`] drives one session on its own task. Callers submit
//!   text, approve or deny tool calls, cancel, and subscribe to typed events.
//! - [`Transport`] applies streamed part events to the in-flight assistant
//!   message and enforces the tool-call state machine.
//! - [`ProviderRegistry`] describes what each agent supports; nothing
//!   downstream switches on provider ids.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use acp_session::{
//!     ClientConfig, JsonlMessageStore, ProcessLauncher, ProviderRegistry, SessionChannel,
//!     SessionCoordinator,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ClientConfig::default();
//!     let coordinator = SessionCoordinator::new(
//!         ProviderRegistry::builtin(),
//!         config.clone(),
//!         Arc::new(ProcessLauncher::new()),
//!         Arc::new(JsonlMessageStore::new(config.store_dir.clone())),
//!     );
//!
//!     let session = coordinator.create_session("conv-1", "claude", ".").await?;
//!     let mut events = session.subscribe(&[SessionChannel::Messages]).await?;
//!     session.submit("explain this repository").await?;
//!     while let Some(event) = events.recv().await {
//!         println!("{:?}", event);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Environment Variables
//!
//! - `ACP_CHAT_PROVIDER`: default provider id
//! - `ACP_CHAT_CANCEL_TIMEOUT_MS`: how long a cancelled turn may take to settle
//! - `ACP_CHAT_STORE_DIR`: directory for persisted conversations
//!
//! ## Configuration Loading Priority
//!
//! 1. **Environment Variables** - Override all other sources
//! 2. **Settings Files** - `~/.acp-chat/settings.json`, `.acp-chat/settings.json`,
//!    `.acp-chat/settings.local.json` (later files win)
//! 3. **Defaults**
//!
//! ### Example settings.json
//!
//! ```json
//! {
//!   "defaultProvider": "codex",
//!   "cancelTimeoutMs": 5000,
//!   "autoPrune": { "thresholdRatio": 0.85, "keepMessages": 20 },
//!   "providers": {
//!     "claude": { "command": "/opt/bin/claude-code-acp", "capabilities": { "supportsResume": true } }
//!   }
//! }
//! ```

pub mod cli;
pub mod coordinator;
pub mod provider;
pub mod runner;
pub mod session;
pub mod settings;
pub mod tracing;
pub mod transport;
pub mod types;

pub use cli::Cli;
pub use coordinator::{
    JsonlMessageStore, MemoryMessageStore, MessageStore, SessionCoordinator, StatusAggregator,
    StatusEntry,
};
pub use provider::{ProviderCapabilities, ProviderDescriptor, ProviderRegistry};
pub use runner::run_with_cli;
pub use session::{
    InterruptOutcome, SessionChannel, SessionEvent, SessionHandle, SessionSnapshot,
    SubmitOutcome, Subscription,
};
pub use settings::{Settings, SettingsManager};
pub use transport::{
    AgentConnection, AgentEvent, AgentLauncher, ApprovalOutcome, ClientCommand,
    InProcessLauncher, ProcessLauncher, Transport,
};
pub use types::{
    ClientConfig, ClientError, FailureKind, Message, Part, Result, SessionStatus, ToolCallState,
};
