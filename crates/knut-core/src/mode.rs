// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;

use knut_config::Config;

/// A named bundle of system prompt, allowed tool ids, and model hints.
#[derive(Debug, Clone)]
pub struct ModeInfo {
    pub name: String,
    pub description: String,
    pub system_prompt: String,
    pub allowed_tools: Vec<String>,
    pub model_hint: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// Name → mode registry.  Four built-in modes; custom modes from config merge
/// over them (same name replaces the built-in).
pub struct ModeRegistry {
    modes: HashMap<String, ModeInfo>,
    builtin_names: Vec<String>,
}

impl ModeRegistry {
    pub fn with_builtins() -> Self {
        let mut modes = HashMap::new();
        for mode in builtin_modes() {
            modes.insert(mode.name.clone(), mode);
        }
        let builtin_names = modes.keys().cloned().collect();
        Self {
            modes,
            builtin_names,
        }
    }

    /// Built-ins plus custom modes from the config file.
    pub fn from_config(config: &Config) -> Self {
        let mut registry = Self::with_builtins();
        for (name, custom) in &config.modes {
            registry.modes.insert(
                name.clone(),
                ModeInfo {
                    name: name.clone(),
                    description: custom.description.clone(),
                    system_prompt: custom.system_prompt.clone(),
                    allowed_tools: custom.tools.clone(),
                    model_hint: custom.model.clone(),
                    temperature: custom.temperature,
                    max_tokens: custom.max_tokens,
                },
            );
        }
        registry
    }

    pub fn get(&self, name: &str) -> Option<&ModeInfo> {
        self.modes.get(name)
    }

    pub fn list(&self) -> Vec<&ModeInfo> {
        let mut modes: Vec<&ModeInfo> = self.modes.values().collect();
        modes.sort_by(|a, b| a.name.cmp(&b.name));
        modes
    }

    pub fn add(&mut self, mode: ModeInfo) {
        self.modes.insert(mode.name.clone(), mode);
    }

    /// Remove a custom mode.  Built-in modes cannot be deleted.
    pub fn delete(&mut self, name: &str) -> anyhow::Result<()> {
        if self.builtin_names.iter().any(|n| n == name) {
            anyhow::bail!("cannot delete built-in mode '{name}'");
        }
        if self.modes.remove(name).is_none() {
            anyhow::bail!("mode '{name}' not found");
        }
        Ok(())
    }
}

fn builtin_modes() -> Vec<ModeInfo> {
    let mode = |name: &str, description: &str, system_prompt: &str, tools: &[&str]| ModeInfo {
        name: name.into(),
        description: description.into(),
        system_prompt: system_prompt.into(),
        allowed_tools: tools.iter().map(|s| s.to_string()).collect(),
        model_hint: None,
        temperature: None,
        max_tokens: None,
    };

    vec![
        mode(
            "default",
            "Default coding assistant mode",
            "You are an AI coding assistant. You help users with programming tasks, code \
             review, debugging, and software development. You have access to various tools \
             to read, write, and modify files, execute commands, and search through \
             codebases.\n\n\
             Key principles:\n\
             - Be helpful, accurate, and concise\n\
             - Always explain your reasoning\n\
             - Ask for clarification when needed\n\
             - Use tools appropriately to gather information\n\
             - Follow best practices and coding standards\n\
             - Be security-conscious",
            &["bash", "read", "write", "edit", "grep"],
        ),
        mode(
            "review",
            "Code review and analysis mode",
            "You are a code reviewer focused on analyzing code quality, identifying \
             issues, and suggesting improvements. You examine code for:\n\n\
             - Logic errors and bugs\n\
             - Performance issues\n\
             - Security vulnerabilities\n\
             - Code style and best practices\n\
             - Architecture and design patterns\n\
             - Documentation and comments\n\n\
             Provide constructive feedback with specific suggestions for improvement.",
            &["read", "grep"],
        ),
        mode(
            "debug",
            "Debugging and troubleshooting mode",
            "You are a debugging specialist. Help users identify and fix issues in their \
             code. Your approach:\n\n\
             1. Understand the problem and symptoms\n\
             2. Analyze relevant code and logs\n\
             3. Form hypotheses about the cause\n\
             4. Test hypotheses systematically\n\
             5. Provide clear explanations and solutions\n\n\
             Use tools to examine code, run tests, and gather diagnostic information.",
            &["bash", "read", "edit", "grep"],
        ),
        mode(
            "refactor",
            "Code refactoring and improvement mode",
            "You are a refactoring specialist focused on improving code structure, \
             readability, and maintainability while preserving functionality. You help \
             with:\n\n\
             - Extracting functions and classes\n\
             - Reducing code duplication\n\
             - Improving naming and organization\n\
             - Applying design patterns\n\
             - Optimizing performance\n\
             - Modernizing legacy code\n\n\
             Always ensure changes maintain the original behavior.",
            &["read", "write", "edit", "grep", "bash"],
        ),
    ]
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
