// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! System prompt assembly.
//!
//! Each turn's system-message list is built from four ordered sources:
//! a model-family preamble, an environment block, any custom instruction
//! files, and the mode prompt.  Lists longer than two entries collapse to
//! two so providers that cache the first system messages keep a stable
//! prefix.

use std::path::{Path, PathBuf};

use chrono::Local;
use walkdir::WalkDir;

use knut_config::Config;

/// Maximum directory depth rendered in the `<project>` tree.
const TREE_MAX_DEPTH: usize = 3;
/// Total line cap for the project tree.
const TREE_MAX_LINES: usize = 200;

const GPT_PREAMBLE: &str = "\
You are an autonomous coding agent. Keep going until the user's request is \
completely resolved before ending your turn. Only stop when you are sure the \
problem is solved.\n\
Use the tools available to you to gather information instead of guessing: \
read files before editing them, run commands to verify behaviour, and search \
the codebase rather than assuming structure.\n\
Plan before each tool call and reflect on the outcome after. Make code \
changes in small, verifiable steps, and run the relevant tests or commands \
after each change.";

const GEMINI_PREAMBLE: &str = "\
You are a capable software engineering agent working inside the user's \
repository. Ground every statement in what you actually observed through \
tools; never invent file contents or command output.\n\
Prefer minimal, focused changes. When a request is ambiguous, state your \
assumption and proceed.";

const ANTHROPIC_PREAMBLE: &str = "\
You are an interactive agent that helps users with software engineering \
tasks. Use the available tools to read, search, and modify the codebase and \
to run commands.\n\
Be concise and direct. Keep responses short; the user reads them in a \
terminal. Explain non-obvious decisions, skip restating what the code \
already shows.\n\
When making changes, follow the conventions already present in the file you \
are editing. Never commit changes unless explicitly asked to.";

const SUMMARIZE_PROMPT: &str = "\
Summarize the conversation so far for a fresh context window. Preserve: the \
user's goal, decisions made, files touched with a one-line note each, and \
any unresolved problems. Omit pleasantries and dead ends. Write it as notes \
for the assistant, not prose for the user.";

const TITLE_PROMPT: &str = "\
Generate a short title (at most 50 characters) for the conversation based on \
the user's first message. Reply with the title only: no quotes, no trailing \
punctuation.";

/// Short fixed preamble the Anthropic provider expects ahead of auxiliary
/// prompt sets.
const ANTHROPIC_SPOOF: &str =
    "You are Claude, operating inside an agentic coding harness.";

/// Model-family preamble selected by substring of the model id.
pub fn provider_prompt(model_id: &str) -> &'static str {
    if ["gpt-", "o1", "o3"].iter().any(|m| model_id.contains(m)) {
        GPT_PREAMBLE
    } else if model_id.contains("gemini-") {
        GEMINI_PREAMBLE
    } else {
        ANTHROPIC_PREAMBLE
    }
}

/// Environment block: cwd, git-repo flag, OS family, date, and a
/// depth-capped project tree.
pub fn environment(workspace_root: &Path) -> String {
    let is_git = workspace_root.join(".git").exists();
    let tree = project_tree(workspace_root);
    format!(
        "Here is some useful information about the environment you are running in:\n\
         <env>\n\
         \x20 Working directory: {}\n\
         \x20 Is directory a git repo: {}\n\
         \x20 Platform: {}\n\
         \x20 Today's date: {}\n\
         </env>\n\
         <project>\n\
         {}\n\
         </project>",
        workspace_root.display(),
        if is_git { "yes" } else { "no" },
        std::env::consts::OS,
        Local::now().format("%A, %B %d, %Y"),
        tree,
    )
}

/// Indented listing of the workspace, [`TREE_MAX_DEPTH`] deep and capped at
/// [`TREE_MAX_LINES`] lines.  Dotfiles and dependency/build directories are
/// skipped.
fn project_tree(root: &Path) -> String {
    let mut lines: Vec<String> = Vec::new();
    let walker = WalkDir::new(root)
        .min_depth(1)
        .max_depth(TREE_MAX_DEPTH)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            let name = e.file_name().to_string_lossy();
            !name.starts_with('.') && !knut_tools::is_ignored_dir(&name)
        });
    for entry in walker.filter_map(|e| e.ok()) {
        if lines.len() >= TREE_MAX_LINES {
            break;
        }
        let depth = entry.depth();
        let name = entry.file_name().to_string_lossy();
        let suffix = if entry.file_type().is_dir() { "/" } else { "" };
        lines.push(format!("{}{name}{suffix}", "  ".repeat(depth - 1)));
    }
    lines.join("\n")
}

/// Verbatim contents of every discovered instruction file, one entry each.
///
/// Sources, in order: `AGENTS.md`/`CLAUDE.md`/`CONTEXT.md` found by walking
/// up from the workspace root, the global `AGENTS.md` under the config dir,
/// `~/.claude/CLAUDE.md`, and explicit `instructions` paths from config.
pub fn custom_instructions(workspace_root: &Path, config: &Config) -> Vec<String> {
    let mut found = Vec::new();

    for filename in ["AGENTS.md", "CLAUDE.md", "CONTEXT.md"] {
        if let Some(path) = find_up(filename, workspace_root) {
            push_nonempty(&mut found, &path);
        }
    }

    push_nonempty(&mut found, &knut_config::paths::config_dir().join("AGENTS.md"));

    if let Some(home) = dirs::home_dir() {
        push_nonempty(&mut found, &home.join(".claude/CLAUDE.md"));
    }

    for instruction in &config.instructions {
        let expanded = PathBuf::from(shellexpand::tilde(instruction).as_ref());
        let path = if expanded.is_absolute() {
            expanded
        } else {
            workspace_root.join(expanded)
        };
        push_nonempty(&mut found, &path);
    }

    found
}

fn push_nonempty(found: &mut Vec<String>, path: &Path) {
    if let Ok(content) = std::fs::read_to_string(path) {
        let trimmed = content.trim();
        if !trimmed.is_empty() {
            found.push(trimmed.to_string());
        }
    }
}

/// Walk up from `start` looking for `filename`.
fn find_up(filename: &str, start: &Path) -> Option<PathBuf> {
    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(filename);
        if candidate.is_file() {
            return Some(candidate);
        }
        if !dir.pop() {
            return None;
        }
    }
}

/// Assemble the ordered system-message list for a turn and collapse it to at
/// most two entries: the first stays alone, everything else is joined by
/// blank lines.  (Providers that cache the first system messages get a
/// stable two-block prefix.)
pub fn assemble(
    model_id: &str,
    mode_prompt: &str,
    workspace_root: &Path,
    config: &Config,
) -> Vec<String> {
    let mut parts: Vec<String> = vec![provider_prompt(model_id).to_string()];
    parts.push(environment(workspace_root));
    parts.extend(custom_instructions(workspace_root, config));
    if !mode_prompt.is_empty() {
        parts.push(mode_prompt.to_string());
    }
    collapse(parts)
}

pub(crate) fn collapse(parts: Vec<String>) -> Vec<String> {
    if parts.len() <= 2 {
        return parts;
    }
    let mut iter = parts.into_iter();
    let first = iter.next().unwrap();
    let rest: Vec<String> = iter.collect();
    vec![first, rest.join("\n\n")]
}

/// Prompt set for conversation summarisation.
pub fn summarize(provider_id: &str) -> Vec<String> {
    if provider_id == "anthropic" {
        vec![ANTHROPIC_SPOOF.to_string(), SUMMARIZE_PROMPT.to_string()]
    } else {
        vec![SUMMARIZE_PROMPT.to_string()]
    }
}

/// Prompt set for session title generation.
pub fn title(provider_id: &str) -> Vec<String> {
    if provider_id == "anthropic" {
        vec![ANTHROPIC_SPOOF.to_string(), TITLE_PROMPT.to_string()]
    } else {
        vec![TITLE_PROMPT.to_string()]
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
