// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod anthropic;
mod copilot;
mod mock;
mod openai;
mod provider;
mod registry;
mod types;
pub(crate) mod wire;

pub use anthropic::AnthropicProvider;
pub use copilot::CopilotProvider;
pub use mock::ScriptedProvider;
pub use openai::OpenAiProvider;
pub use provider::{Provider, ProviderStream};
pub use registry::ProviderRegistry;
pub use types::*;

use std::sync::Arc;

use knut_auth::{CopilotTokenManager, CredentialStore};
use knut_config::Config;

/// Build a registry holding the three built-in providers, wired to the given
/// credential store and any per-provider config overrides.
pub fn build_registry(config: &Config, store: Arc<CredentialStore>) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    registry.register(Arc::new(OpenAiProvider::new(
        Arc::clone(&store),
        config.providers.get("openai").cloned().unwrap_or_default(),
    )));
    registry.register(Arc::new(AnthropicProvider::new(
        Arc::clone(&store),
        config.providers.get("anthropic").cloned().unwrap_or_default(),
    )));
    registry.register(Arc::new(CopilotProvider::new(CopilotTokenManager::new(
        store,
    ))));
    registry
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
