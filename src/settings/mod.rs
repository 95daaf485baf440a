//! Settings management
//!
//! Loads and merges settings from multiple sources:
//! - User settings: `~/.acp-chat/settings.json`
//! - Project settings: `.acp-chat/settings.json`
//! - Local settings: `.acp-chat/settings.local.json`
//!
//! Priority: Local > Project > User

mod manager;

pub use manager::{
    AutoPruneSettings, CapabilitySettings, ProviderSettings, Settings, SettingsManager,
};
