// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Platform path resolution for knut's on-disk state.

use std::path::PathBuf;

use crate::Config;

/// User data directory holding `auth.json` and `sessions/`.
///
/// The config's `data_dir` wins when set (tests point it at a tempdir);
/// otherwise the platform user-data dir is used with `knut/` appended.
pub fn data_dir(config: &Config) -> PathBuf {
    if let Some(dir) = &config.data_dir {
        return dir.clone();
    }
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("knut")
}

/// User config directory, home of the global `AGENTS.md`.
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("knut")
}

/// The credential file path under the data directory.
pub fn auth_file(config: &Config) -> PathBuf {
    data_dir(config).join("auth.json")
}

/// The sessions directory under the data directory.
pub fn sessions_dir(config: &Config) -> PathBuf {
    data_dir(config).join("sessions")
}

/// Workspace root for tool execution: the enclosing git repository root, or
/// the given cwd when not inside a repo.
pub fn workspace_root(cwd: &std::path::Path) -> PathBuf {
    let mut dir = cwd.to_path_buf();
    loop {
        if dir.join(".git").exists() {
            return dir;
        }
        match dir.parent() {
            Some(parent) => dir = parent.to_path_buf(),
            None => return cwd.to_path_buf(),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
