//! Session coordinator: one session per conversation
//!
//! Uses DashMap with the entry API so that two concurrent creates for the same
//! conversation cannot both win. Session keys are reserved the same way: a
//! resumed session takes its prior id as key, and two live sessions must never
//! share one.

use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;

use super::aggregator::StatusAggregator;
use super::store::MessageStore;
use crate::provider::ProviderRegistry;
use crate::session::{Session, SessionDeps, SessionHandle, SessionParams};
use crate::transport::{AgentLauncher, LaunchRequest};
use crate::types::{ClientConfig, ClientError, Result};

/// Creates, looks up and tears down sessions
#[derive(Debug)]
pub struct SessionCoordinator {
    /// Live sessions keyed by conversation id
    sessions: DashMap<String, SessionHandle>,
    /// Session key to owning conversation id
    keys: DashMap<String, String>,
    registry: ProviderRegistry,
    config: ClientConfig,
    deps: SessionDeps,
}

impl SessionCoordinator {
    pub fn new(
        registry: ProviderRegistry,
        config: ClientConfig,
        launcher: Arc<dyn AgentLauncher>,
        store: Arc<dyn MessageStore>,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            keys: DashMap::new(),
            registry,
            config,
            deps: SessionDeps {
                launcher,
                store,
                aggregator: Arc::new(StatusAggregator::new()),
            },
        }
    }

    /// Start a fresh session for a conversation
    ///
    /// Returns as soon as the session task is running; the agent launch
    /// happens in the background and a failure shows up as the `error`
    /// status rather than as an `Err` here.
    pub async fn create_session(
        &self,
        conversation_id: &str,
        provider_id: &str,
        cwd: impl Into<PathBuf>,
    ) -> Result<SessionHandle> {
        self.start(conversation_id, provider_id, cwd.into(), None)
            .await
    }

    /// Start a session bound to a previously recorded agent session
    ///
    /// The session key becomes `prior_session_id`, persisted history for the
    /// conversation is loaded, and the agent is asked to resume. Fails with
    /// `SessionAlreadyExists` while another live session holds that key.
    pub async fn resume_session(
        &self,
        conversation_id: &str,
        provider_id: &str,
        cwd: impl Into<PathBuf>,
        prior_session_id: &str,
    ) -> Result<SessionHandle> {
        self.start(
            conversation_id,
            provider_id,
            cwd.into(),
            Some(prior_session_id.to_string()),
        )
        .await
    }

    async fn start(
        &self,
        conversation_id: &str,
        provider_id: &str,
        cwd: PathBuf,
        resume: Option<String>,
    ) -> Result<SessionHandle> {
        if self.has_session(conversation_id) {
            return Err(ClientError::SessionAlreadyExists(conversation_id.to_string()));
        }
        let provider = self.registry.resolve(provider_id)?;

        let history = match &resume {
            Some(key) => {
                self.reserve_key(key, conversation_id)?;
                self.load_history(conversation_id).await
            }
            None => Vec::new(),
        };

        // The store load above awaited, so check again under the entry lock
        match self.sessions.entry(conversation_id.to_string()) {
            dashmap::Entry::Occupied(_) => {
                if let Some(key) = &resume {
                    self.keys.remove(key);
                }
                Err(ClientError::SessionAlreadyExists(conversation_id.to_string()))
            }
            dashmap::Entry::Vacant(vacant) => {
                let launch = LaunchRequest {
                    provider: provider.clone(),
                    cwd: cwd.clone(),
                    resume_session_id: resume.clone(),
                    env: self.config.agent_env.clone(),
                };
                let session = Session::new(
                    SessionParams {
                        conversation_id: conversation_id.to_string(),
                        provider,
                        cwd,
                        resumed_from_id: resume,
                        history,
                    },
                    &self.config,
                );
                let handle = SessionHandle::spawn(session, launch, self.deps.clone());
                self.keys
                    .insert(handle.key().to_string(), conversation_id.to_string());
                vacant.insert(handle.clone());
                Ok(handle)
            }
        }
    }

    fn reserve_key(&self, key: &str, conversation_id: &str) -> Result<()> {
        match self.keys.entry(key.to_string()) {
            dashmap::Entry::Occupied(held) => {
                tracing::warn!(
                    session_key = %key,
                    conversation_id = %conversation_id,
                    held_by = %held.get(),
                    "Session key already in use"
                );
                Err(ClientError::SessionAlreadyExists(key.to_string()))
            }
            dashmap::Entry::Vacant(vacant) => {
                vacant.insert(conversation_id.to_string());
                Ok(())
            }
        }
    }

    async fn load_history(&self, conversation_id: &str) -> Vec<crate::types::Message> {
        match self.deps.store.load(conversation_id).await {
            Ok(messages) => messages,
            Err(e) => {
                tracing::warn!(
                    conversation_id = %conversation_id,
                    error = %e,
                    "Failed to load persisted history, starting empty"
                );
                Vec::new()
            }
        }
    }

    /// Get the session for a conversation
    pub fn get(&self, conversation_id: &str) -> Option<SessionHandle> {
        self.sessions.get(conversation_id).map(|r| r.clone())
    }

    /// Get the session for a conversation or return `SessionNotFound`
    pub fn get_or_error(&self, conversation_id: &str) -> Result<SessionHandle> {
        self.get(conversation_id)
            .ok_or_else(|| ClientError::SessionNotFound(conversation_id.to_string()))
    }

    pub fn has_session(&self, conversation_id: &str) -> bool {
        self.sessions.contains_key(conversation_id)
    }

    /// Close a conversation's session
    ///
    /// Kills the agent and unregisters from the aggregator before returning.
    pub async fn close_session(&self, conversation_id: &str) -> Result<()> {
        let (_, handle) = self
            .sessions
            .remove(conversation_id)
            .ok_or_else(|| ClientError::SessionNotFound(conversation_id.to_string()))?;

        let result = match handle.close().await {
            Ok(()) | Err(ClientError::SessionClosed(_)) => Ok(()),
            Err(e) => Err(e),
        };
        self.keys.remove(handle.key());
        result
    }

    /// Close every session
    pub async fn shutdown_all(&self) {
        let ids = self.session_ids();
        tracing::info!(count = ids.len(), "Closing all sessions");
        for id in ids {
            if let Err(e) = self.close_session(&id).await {
                tracing::warn!(conversation_id = %id, error = %e, "Failed to close session");
            }
        }
    }

    /// Conversation ids with a live session
    pub fn session_ids(&self) -> Vec<String> {
        self.sessions.iter().map(|r| r.key().clone()).collect()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Cross-session status view for indicators
    pub fn aggregator(&self) -> &Arc<StatusAggregator> {
        &self.deps.aggregator
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}
