// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "knut", about = "An interactive AI coding agent", version)]
pub struct Cli {
    /// Explicit config file, merged over the discovered layers.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log to stderr (RUST_LOG controls the filter).
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one prompt through the agent and stream the result
    Run {
        prompt: String,

        /// Override the model as "provider/model" or a bare model name.
        #[arg(long)]
        model: Option<String>,

        /// Interaction mode (default, review, debug, refactor, or custom).
        #[arg(long, default_value = "default")]
        mode: String,

        /// Resume an existing session instead of creating a new one.
        #[arg(long)]
        session: Option<String>,
    },

    /// Manage provider authentication
    Auth {
        #[command(subcommand)]
        command: AuthCommands,
    },

    /// List or delete stored sessions
    Sessions {
        /// Delete the session with this id instead of listing.
        #[arg(long)]
        delete: Option<String>,
    },

    /// List providers and their models
    Models,

    /// List interaction modes
    Modes,

    /// Print the merged configuration
    Config,
}

#[derive(Subcommand)]
pub enum AuthCommands {
    /// Log in to a provider: device flow for github-copilot, --api-key otherwise
    Login {
        provider: String,

        /// API key to store (key-based providers).
        #[arg(long)]
        api_key: Option<String>,
    },

    /// Remove the stored credential for a provider
    Logout { provider: String },

    /// Show stored credentials
    List,
}
