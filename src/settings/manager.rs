//! Settings manager implementation
//!
//! Handles loading, merging, and accessing settings from multiple sources.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::types::ToolKind;

/// Settings file names
const USER_SETTINGS_DIR: &str = ".acp-chat";
const PROJECT_SETTINGS_DIR: &str = ".acp-chat";
const SETTINGS_FILE: &str = "settings.json";
const LOCAL_SETTINGS_FILE: &str = "settings.local.json";

/// Client settings structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Provider used when none is given on the command line
    #[serde(default)]
    pub default_provider: Option<String>,

    /// Per-provider launch and capability overrides
    #[serde(default)]
    pub providers: Option<HashMap<String, ProviderSettings>>,

    /// How long to wait for a cancelled turn to settle
    #[serde(default)]
    pub cancel_timeout_ms: Option<u64>,

    /// Auto-prune thresholds
    #[serde(default)]
    pub auto_prune: Option<AutoPruneSettings>,

    /// Maximum entries kept in the input history
    #[serde(default)]
    pub history_limit: Option<usize>,

    /// Directory for persisted conversations
    #[serde(default)]
    pub store_dir: Option<PathBuf>,

    /// Environment variables passed to every agent process
    #[serde(default)]
    pub env: Option<HashMap<String, String>>,

    /// Additional settings as raw JSON
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Launch and capability overrides for one provider
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSettings {
    /// Display name
    #[serde(default)]
    pub display_name: Option<String>,

    /// Command to start the agent
    #[serde(default)]
    pub command: Option<String>,

    /// Arguments for the command
    #[serde(default)]
    pub args: Option<Vec<String>>,

    /// Environment variables for the agent
    #[serde(default)]
    pub env: Option<HashMap<String, String>>,

    /// Capability overrides
    #[serde(default)]
    pub capabilities: Option<CapabilitySettings>,
}

/// Capability overrides; unset fields keep the built-in value
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilitySettings {
    #[serde(default)]
    pub supports_modes: Option<bool>,
    #[serde(default)]
    pub supports_models: Option<bool>,
    #[serde(default)]
    pub supports_config_options: Option<bool>,
    #[serde(default)]
    pub supports_resume: Option<bool>,
    #[serde(default)]
    pub terminal_only: Option<bool>,
    #[serde(default)]
    pub requires_approval_for: Option<Vec<ToolKind>>,
}

/// Auto-prune overrides
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoPruneSettings {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub threshold_ratio: Option<f64>,
    #[serde(default)]
    pub min_messages: Option<usize>,
    #[serde(default)]
    pub keep_messages: Option<usize>,
}

impl Settings {
    /// Create empty settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge another settings into this one
    ///
    /// Values from `other` take precedence over `self`.
    pub fn merge(&mut self, other: Settings) {
        if other.default_provider.is_some() {
            self.default_provider = other.default_provider;
        }
        if other.cancel_timeout_ms.is_some() {
            self.cancel_timeout_ms = other.cancel_timeout_ms;
        }
        if other.history_limit.is_some() {
            self.history_limit = other.history_limit;
        }
        if other.store_dir.is_some() {
            self.store_dir = other.store_dir;
        }
        if let Some(other_prune) = other.auto_prune {
            let prune = self.auto_prune.get_or_insert_with(AutoPruneSettings::default);
            if other_prune.enabled.is_some() {
                prune.enabled = other_prune.enabled;
            }
            if other_prune.threshold_ratio.is_some() {
                prune.threshold_ratio = other_prune.threshold_ratio;
            }
            if other_prune.min_messages.is_some() {
                prune.min_messages = other_prune.min_messages;
            }
            if other_prune.keep_messages.is_some() {
                prune.keep_messages = other_prune.keep_messages;
            }
        }
        if let Some(other_providers) = other.providers {
            // Later sources replace a provider entry wholesale
            let providers = self.providers.get_or_insert_with(HashMap::new);
            for (id, provider) in other_providers {
                providers.insert(id, provider);
            }
        }
        if let Some(other_env) = other.env {
            let env = self.env.get_or_insert_with(HashMap::new);
            for (key, value) in other_env {
                env.insert(key, value);
            }
        }
        for (key, value) in other.extra {
            self.extra.insert(key, value);
        }
    }

    /// Look up overrides for a provider
    pub fn provider(&self, id: &str) -> Option<&ProviderSettings> {
        self.providers.as_ref()?.get(id)
    }
}

/// Settings manager for loading and accessing settings
#[derive(Debug)]
pub struct SettingsManager {
    /// The merged settings
    settings: Settings,
    /// Project working directory
    project_dir: PathBuf,
}

impl SettingsManager {
    /// Create a new settings manager and load settings
    ///
    /// Priority: Local > Project > User
    pub fn new(project_dir: impl AsRef<Path>) -> Self {
        let project_dir = project_dir.as_ref().to_path_buf();
        let settings = Self::load_all_settings(&project_dir);

        Self {
            settings,
            project_dir,
        }
    }

    /// Wrap already-built settings
    pub fn with_settings(settings: Settings, project_dir: impl AsRef<Path>) -> Self {
        Self {
            settings,
            project_dir: project_dir.as_ref().to_path_buf(),
        }
    }

    fn load_all_settings(project_dir: &Path) -> Settings {
        let mut settings = Settings::new();

        if let Some(user_settings) = Self::load_user_settings() {
            tracing::debug!("Loaded user settings");
            settings.merge(user_settings);
        }

        let project_path = project_dir.join(PROJECT_SETTINGS_DIR).join(SETTINGS_FILE);
        if let Some(project_settings) = Self::load_settings_file(&project_path) {
            tracing::debug!("Loaded project settings from {:?}", project_path);
            settings.merge(project_settings);
        }

        let local_path = project_dir
            .join(PROJECT_SETTINGS_DIR)
            .join(LOCAL_SETTINGS_FILE);
        if let Some(local_settings) = Self::load_settings_file(&local_path) {
            tracing::debug!("Loaded local settings from {:?}", local_path);
            settings.merge(local_settings);
        }

        settings
    }

    fn load_user_settings() -> Option<Settings> {
        let home = dirs::home_dir()?;
        let path = home.join(USER_SETTINGS_DIR).join(SETTINGS_FILE);
        Self::load_settings_file(&path)
    }

    /// Load settings from a file; missing or malformed files yield `None`
    fn load_settings_file(path: &Path) -> Option<Settings> {
        if !path.exists() {
            return None;
        }

        match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(settings) => Some(settings),
                Err(e) => {
                    tracing::warn!("Failed to parse settings file {:?}: {}", path, e);
                    None
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read settings file {:?}: {}", path, e);
                None
            }
        }
    }

    /// Get the merged settings
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Get the project directory
    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    /// Reload settings from all sources
    pub fn reload(&mut self) {
        self.settings = Self::load_all_settings(&self.project_dir);
    }
}
