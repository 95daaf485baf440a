//! Client configuration resolved from environment variables and settings

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::settings::Settings;

/// Default time a cancelled turn has to settle before the session errors
pub const DEFAULT_CANCEL_TIMEOUT: Duration = Duration::from_secs(10);
/// Default input history capacity
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Auto-prune thresholds
///
/// Prune fires when `used / max > threshold_ratio` and the history holds
/// strictly more than `min_messages` messages; it keeps the newest
/// `keep_messages`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PruneConfig {
    pub enabled: bool,
    pub threshold_ratio: f64,
    pub min_messages: usize,
    pub keep_messages: usize,
}

impl Default for PruneConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold_ratio: 0.9,
            min_messages: 12,
            keep_messages: 10,
        }
    }
}

/// Client configuration
///
/// Resolution order: environment variables > settings files > defaults.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Provider used when none is requested explicitly
    /// Environment variable: `ACP_CHAT_PROVIDER`
    pub default_provider: Option<String>,

    /// Bounded wait after `cancel()` before forcing the `error` status
    /// Environment variable: `ACP_CHAT_CANCEL_TIMEOUT_MS`
    pub cancel_timeout: Duration,

    /// Auto-prune thresholds
    pub prune: PruneConfig,

    /// Input history capacity
    pub history_limit: usize,

    /// Directory for persisted conversations
    /// Environment variable: `ACP_CHAT_STORE_DIR`
    pub store_dir: PathBuf,

    /// Environment variables passed to every agent process
    pub agent_env: HashMap<String, String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            default_provider: None,
            cancel_timeout: DEFAULT_CANCEL_TIMEOUT,
            prune: PruneConfig::default(),
            history_limit: DEFAULT_HISTORY_LIMIT,
            store_dir: default_store_dir(),
            agent_env: HashMap::new(),
        }
    }
}

/// Values read from the environment, before merging with settings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvOverrides {
    pub provider: Option<String>,
    pub cancel_timeout_ms: Option<u64>,
    pub store_dir: Option<PathBuf>,
}

impl EnvOverrides {
    /// Read `ACP_CHAT_*` variables
    pub fn from_env() -> Self {
        Self {
            provider: std::env::var("ACP_CHAT_PROVIDER")
                .ok()
                .filter(|s| !s.is_empty()),
            cancel_timeout_ms: std::env::var("ACP_CHAT_CANCEL_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse::<u64>().ok()),
            store_dir: std::env::var_os("ACP_CHAT_STORE_DIR").map(PathBuf::from),
        }
    }
}

impl ClientConfig {
    /// Resolve configuration from the process environment and settings
    pub fn from_env(settings: &Settings) -> Self {
        Self::resolve(&EnvOverrides::from_env(), settings)
    }

    /// Resolve configuration from explicit overrides and settings
    pub fn resolve(env: &EnvOverrides, settings: &Settings) -> Self {
        let defaults = Self::default();
        let prune_settings = settings.auto_prune.clone().unwrap_or_default();
        let prune_defaults = PruneConfig::default();

        let cancel_timeout = env
            .cancel_timeout_ms
            .or(settings.cancel_timeout_ms)
            .map(Duration::from_millis)
            .unwrap_or(defaults.cancel_timeout);

        Self {
            default_provider: env
                .provider
                .clone()
                .or_else(|| settings.default_provider.clone()),
            cancel_timeout,
            prune: PruneConfig {
                enabled: prune_settings.enabled.unwrap_or(prune_defaults.enabled),
                threshold_ratio: prune_settings
                    .threshold_ratio
                    .unwrap_or(prune_defaults.threshold_ratio),
                min_messages: prune_settings
                    .min_messages
                    .unwrap_or(prune_defaults.min_messages),
                keep_messages: prune_settings
                    .keep_messages
                    .unwrap_or(prune_defaults.keep_messages),
            },
            history_limit: settings.history_limit.unwrap_or(defaults.history_limit),
            store_dir: env
                .store_dir
                .clone()
                .or_else(|| settings.store_dir.clone())
                .unwrap_or(defaults.store_dir),
            agent_env: settings.env.clone().unwrap_or_default(),
        }
    }
}

fn default_store_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("acp-chat")
        .join("conversations")
}
