//! Built-in provider descriptors and settings overlays

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::settings::{CapabilitySettings, ProviderSettings, Settings};
use crate::types::{ClientError, Result, ToolKind};

/// What a provider's agent can do
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderCapabilities {
    /// Agent publishes and accepts session modes
    pub supports_modes: bool,
    /// Agent publishes and accepts model selection
    pub supports_models: bool,
    /// Agent publishes configurable options
    pub supports_config_options: bool,
    /// Agent can reload a prior session by id
    pub supports_resume: bool,
    /// Provider only runs inside a PTY and cannot host a chat session
    pub terminal_only: bool,
    /// Tool kinds the user must approve; other approval requests are
    /// answered automatically
    pub requires_approval_for: HashSet<ToolKind>,
}

impl Default for ProviderCapabilities {
    fn default() -> Self {
        Self {
            supports_modes: false,
            supports_models: false,
            supports_config_options: false,
            supports_resume: false,
            terminal_only: false,
            requires_approval_for: ToolKind::ALL.into_iter().collect(),
        }
    }
}

impl ProviderCapabilities {
    /// Whether an approval request for `kind` must be shown to the user
    pub fn requires_approval(&self, kind: ToolKind) -> bool {
        self.requires_approval_for.contains(&kind)
    }

    fn apply(&mut self, overrides: &CapabilitySettings) {
        if let Some(v) = overrides.supports_modes {
            self.supports_modes = v;
        }
        if let Some(v) = overrides.supports_models {
            self.supports_models = v;
        }
        if let Some(v) = overrides.supports_config_options {
            self.supports_config_options = v;
        }
        if let Some(v) = overrides.supports_resume {
            self.supports_resume = v;
        }
        if let Some(v) = overrides.terminal_only {
            self.terminal_only = v;
        }
        if let Some(kinds) = &overrides.requires_approval_for {
            self.requires_approval_for = kinds.iter().copied().collect();
        }
    }
}

/// How to launch a provider's agent and what it supports
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderDescriptor {
    pub id: String,
    pub display_name: String,
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub capabilities: ProviderCapabilities,
}

impl ProviderDescriptor {
    fn new(id: &str, display_name: &str, command: &str) -> Self {
        Self {
            id: id.to_string(),
            display_name: display_name.to_string(),
            command: command.to_string(),
            args: Vec::new(),
            env: HashMap::new(),
            capabilities: ProviderCapabilities::default(),
        }
    }

    fn apply(&mut self, overrides: &ProviderSettings) {
        if let Some(name) = &overrides.display_name {
            self.display_name.clone_from(name);
        }
        if let Some(command) = &overrides.command {
            self.command.clone_from(command);
        }
        if let Some(args) = &overrides.args {
            self.args.clone_from(args);
        }
        if let Some(env) = &overrides.env {
            self.env.extend(env.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        if let Some(caps) = &overrides.capabilities {
            self.capabilities.apply(caps);
        }
    }
}

fn gated_kinds() -> HashSet<ToolKind> {
    [
        ToolKind::Edit,
        ToolKind::Execute,
        ToolKind::Fetch,
        ToolKind::Other,
    ]
    .into_iter()
    .collect()
}

fn builtin_providers() -> Vec<ProviderDescriptor> {
    let mut claude = ProviderDescriptor::new("claude", "Claude Code", "claude-code-acp");
    claude.capabilities = ProviderCapabilities {
        supports_modes: true,
        supports_models: true,
        supports_config_options: true,
        supports_resume: true,
        requires_approval_for: gated_kinds(),
        ..Default::default()
    };

    let mut codex = ProviderDescriptor::new("codex", "Codex", "codex-acp");
    codex.capabilities = ProviderCapabilities {
        supports_modes: true,
        supports_models: true,
        supports_config_options: true,
        requires_approval_for: gated_kinds(),
        ..Default::default()
    };

    let mut gemini = ProviderDescriptor::new("gemini", "Gemini CLI", "gemini");
    gemini.args = vec!["--experimental-acp".to_string()];
    gemini.capabilities = ProviderCapabilities {
        supports_modes: true,
        requires_approval_for: gated_kinds(),
        ..Default::default()
    };

    let mut aider = ProviderDescriptor::new("aider", "Aider", "aider");
    aider.capabilities = ProviderCapabilities {
        terminal_only: true,
        ..Default::default()
    };

    vec![claude, codex, gemini, aider]
}

/// Known providers, keyed by id
#[derive(Debug, Clone)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, ProviderDescriptor>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ProviderRegistry {
    /// Registry with the built-in providers only
    pub fn builtin() -> Self {
        Self {
            providers: builtin_providers()
                .into_iter()
                .map(|p| (p.id.clone(), p))
                .collect(),
        }
    }

    /// Built-in providers overlaid with settings
    ///
    /// A settings entry for an unknown id defines a new provider; it needs a
    /// `command` and gets default capabilities.
    pub fn from_settings(settings: &Settings) -> Self {
        let mut registry = Self::builtin();
        let Some(overrides) = &settings.providers else {
            return registry;
        };

        for (id, provider_settings) in overrides {
            match registry.providers.get_mut(id) {
                Some(descriptor) => descriptor.apply(provider_settings),
                None => {
                    let Some(command) = &provider_settings.command else {
                        tracing::warn!(provider = %id, "Ignoring custom provider without a command");
                        continue;
                    };
                    let mut descriptor = ProviderDescriptor::new(id, id, command);
                    descriptor.apply(provider_settings);
                    registry.insert(descriptor);
                }
            }
        }
        registry
    }

    /// Add or replace a provider
    pub fn insert(&mut self, descriptor: ProviderDescriptor) {
        self.providers.insert(descriptor.id.clone(), descriptor);
    }

    /// Look up a provider
    pub fn get(&self, id: &str) -> Option<&ProviderDescriptor> {
        self.providers.get(id)
    }

    /// Look up a provider or fail with `ProviderNotFound`
    pub fn resolve(&self, id: &str) -> Result<ProviderDescriptor> {
        self.get(id)
            .cloned()
            .ok_or_else(|| ClientError::ProviderNotFound(id.to_string()))
    }

    /// All provider ids, sorted
    pub fn ids(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_builtin_registry() {
        let registry = ProviderRegistry::builtin();
        assert_eq!(registry.ids(), vec!["aider", "claude", "codex", "gemini"]);

        let claude = registry.get("claude").unwrap();
        assert!(claude.capabilities.supports_resume);
        assert!(claude.capabilities.requires_approval(ToolKind::Execute));
        assert!(!claude.capabilities.requires_approval(ToolKind::Read));

        let aider = registry.get("aider").unwrap();
        assert!(aider.capabilities.terminal_only);
    }

    #[test]
    fn test_resolve_unknown_provider() {
        let registry = ProviderRegistry::builtin();
        let err = registry.resolve("copilot").unwrap_err();
        assert!(matches!(err, ClientError::ProviderNotFound(ref id) if id == "copilot"));
    }

    #[test]
    fn test_default_capabilities_gate_everything() {
        let caps = ProviderCapabilities::default();
        for kind in ToolKind::ALL {
            assert!(caps.requires_approval(kind));
        }
    }

    #[test]
    fn test_settings_overlay() {
        let settings: Settings = serde_json::from_value(serde_json::json!({
            "providers": {
                "gemini": {
                    "command": "/opt/gemini",
                    "env": { "GEMINI_API_KEY": "k" },
                    "capabilities": { "requiresApprovalFor": ["execute"], "supportsModels": true }
                },
                "local": { "command": "./my-agent", "args": ["--acp"] },
                "broken": { "args": ["--acp"] }
            }
        }))
        .unwrap();

        let registry = ProviderRegistry::from_settings(&settings);

        let gemini = registry.get("gemini").unwrap();
        assert_eq!(gemini.command, "/opt/gemini");
        assert_eq!(gemini.args, vec!["--experimental-acp".to_string()]);
        assert_eq!(gemini.env.get("GEMINI_API_KEY").map(String::as_str), Some("k"));
        assert!(gemini.capabilities.supports_models);
        assert!(!gemini.capabilities.requires_approval(ToolKind::Edit));
        assert!(gemini.capabilities.requires_approval(ToolKind::Execute));

        let local = registry.get("local").unwrap();
        assert_eq!(local.command, "./my-agent");
        assert_eq!(local.args, vec!["--acp".to_string()]);
        assert_eq!(local.capabilities, ProviderCapabilities::default());

        assert!(registry.get("broken").is_none());
    }
}
