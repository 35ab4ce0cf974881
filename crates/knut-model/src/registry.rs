// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;

use knut_config::Config;

use crate::Provider;

/// Process-lifetime registry mapping provider id → implementation.
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
        }
    }

    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        self.providers.insert(provider.id().to_string(), provider);
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(id).cloned()
    }

    /// All providers sorted by id for stable display.
    pub fn list(&self) -> Vec<Arc<dyn Provider>> {
        let mut providers: Vec<_> = self.providers.values().cloned().collect();
        providers.sort_by(|a, b| a.id().cmp(b.id()));
        providers
    }

    /// Split a `"provider/model"` string; a bare model name defaults to the
    /// openai provider.
    pub fn parse_model(s: &str) -> (String, String) {
        match s.split_once('/') {
            Some((p, m)) => (p.to_string(), m.to_string()),
            None => ("openai".to_string(), s.to_string()),
        }
    }

    /// Default provider/model pair: the configured selection when that
    /// provider is registered, otherwise the first authenticated provider's
    /// first model, otherwise the hardcoded openai fallback.
    pub async fn default_model(&self, config: &Config) -> (String, String) {
        if self.providers.contains_key(&config.model.provider) {
            return (config.model.provider.clone(), config.model.model.clone());
        }
        for provider in self.list() {
            if provider.is_authenticated().await {
                if let Some(model) = provider.info().models.first() {
                    return (provider.id().to_string(), model.id.clone());
                }
            }
        }
        ("openai".to_string(), "gpt-4o".to_string())
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
