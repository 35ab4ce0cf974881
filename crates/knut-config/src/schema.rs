// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Default provider/model used when the caller does not override.
    #[serde(default)]
    pub model: ModelSelection,

    /// Override for the data directory holding `auth.json` and `sessions/`.
    /// Defaults to the platform user-data dir (`~/.local/share/knut`).
    pub data_dir: Option<PathBuf>,

    /// Extra instruction files appended to the system prompt, resolved
    /// relative to the workspace root.  Shell expansion (`~`) is applied.
    #[serde(default)]
    pub instructions: Vec<String>,

    /// Custom interaction modes.  A custom mode with the same name as a
    /// built-in replaces it.
    ///
    /// ```yaml
    /// modes:
    ///   docs:
    ///     description: Documentation writing mode
    ///     system_prompt: You write documentation.
    ///     tools: [read, grep, write]
    /// ```
    #[serde(default)]
    pub modes: HashMap<String, ModeConfig>,

    /// Per-provider credential / endpoint overrides keyed by provider id.
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
}

/// Default provider/model pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSelection {
    pub provider: String,
    pub model: String,
}

impl Default for ModelSelection {
    fn default() -> Self {
        Self {
            provider: "openai".into(),
            model: "gpt-4o".into(),
        }
    }
}

impl ModelSelection {
    /// Parse a `"provider/model"` override string.  A bare string without a
    /// slash is treated as a model name on the openai provider.
    pub fn parse(s: &str) -> Self {
        match s.split_once('/') {
            Some((provider, model)) => Self {
                provider: provider.to_string(),
                model: model.to_string(),
            },
            None => Self {
                provider: "openai".into(),
                model: s.to_string(),
            },
        }
    }
}

/// A custom mode definition from the config file.  Field meanings mirror the
/// built-in mode table; `tools` lists allowed tool ids.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModeConfig {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub tools: Vec<String>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Explicit API key; prefer `api_key_env` in version-controlled files.
    pub api_key: Option<String>,
    /// Environment variable that holds the API key (read at runtime).
    pub api_key_env: Option<String>,
    /// Base URL override for proxies and compatible gateways.
    pub base_url: Option<String>,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_model_selection_is_openai() {
        let sel = ModelSelection::default();
        assert_eq!(sel.provider, "openai");
        assert_eq!(sel.model, "gpt-4o");
    }

    #[test]
    fn parse_slash_form_sets_both() {
        let sel = ModelSelection::parse("anthropic/claude-sonnet-4-5");
        assert_eq!(sel.provider, "anthropic");
        assert_eq!(sel.model, "claude-sonnet-4-5");
    }

    #[test]
    fn parse_bare_model_assumes_openai() {
        let sel = ModelSelection::parse("gpt-4o-mini");
        assert_eq!(sel.provider, "openai");
        assert_eq!(sel.model, "gpt-4o-mini");
    }

    #[test]
    fn config_deserializes_from_empty_mapping() {
        let cfg: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(cfg.model.provider, "openai");
        assert!(cfg.modes.is_empty());
    }

    #[test]
    fn custom_mode_roundtrips() {
        let yaml = "modes:\n  docs:\n    description: Docs mode\n    tools: [read, write]\n";
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        let mode = cfg.modes.get("docs").unwrap();
        assert_eq!(mode.description, "Docs mode");
        assert_eq!(mode.tools, vec!["read", "write"]);
    }

    #[test]
    fn provider_config_reads_api_key_env() {
        let yaml = "providers:\n  openai:\n    api_key_env: MY_OPENAI_KEY\n";
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            cfg.providers.get("openai").unwrap().api_key_env.as_deref(),
            Some("MY_OPENAI_KEY")
        );
    }
}
