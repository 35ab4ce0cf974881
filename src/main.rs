// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{AuthCommands, Cli, Commands};
use knut_auth::{CopilotTokenManager, Credential, CredentialStore, DeviceFlow, PollOutcome};
use knut_config::paths;
use knut_core::{ModeRegistry, Orchestrator, StreamChunk, TurnRequest};
use knut_model::ProviderRegistry;
use knut_session::SessionStore;
use knut_tools::{register_builtins, ToolRegistry, ToolState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env().add_directive("knut=debug".parse()?))
            .with_writer(std::io::stderr)
            .init();
    }

    let config = Arc::new(knut_config::load(cli.config.as_deref())?);
    let store = Arc::new(CredentialStore::new(paths::auth_file(&config)));

    match cli.command {
        Commands::Run {
            prompt,
            model,
            mode,
            session,
        } => run_turn(config, store, prompt, model, mode, session).await,
        Commands::Auth { command } => run_auth(store, command).await,
        Commands::Sessions { delete } => run_sessions(config, delete).await,
        Commands::Models => run_models(config, store).await,
        Commands::Modes => {
            let modes = ModeRegistry::from_config(&config);
            for mode in modes.list() {
                println!("{:<10} {}", mode.name, mode.description);
                println!("           tools: {}", mode.allowed_tools.join(", "));
            }
            Ok(())
        }
        Commands::Config => {
            println!("{}", serde_yaml::to_string(config.as_ref()).unwrap_or_default());
            Ok(())
        }
    }
}

async fn run_turn(
    config: Arc<knut_config::Config>,
    store: Arc<CredentialStore>,
    prompt: String,
    model: Option<String>,
    mode: String,
    session: Option<String>,
) -> anyhow::Result<()> {
    let cwd = std::env::current_dir()?;
    let workspace_root = paths::workspace_root(&cwd);

    let providers = Arc::new(knut_model::build_registry(&config, store));
    let mut tools = ToolRegistry::new();
    register_builtins(&mut tools, &ToolState::default());
    let sessions = Arc::new(SessionStore::new(paths::sessions_dir(&config)));
    let modes = Arc::new(ModeRegistry::from_config(&config));

    let (provider_id, model_id) = match model {
        Some(m) => ProviderRegistry::parse_model(&m),
        None => providers.default_model(&config).await,
    };

    let session_id = match session {
        Some(id) => match sessions.get(&id).await {
            Some(info) => info.id,
            None => anyhow::bail!("session not found: {id}"),
        },
        None => sessions.create(&mode).await?.id,
    };

    let orchestrator = Orchestrator::new(
        providers,
        Arc::new(tools),
        sessions,
        modes,
        Arc::clone(&config),
        workspace_root,
    );

    let mut handle = orchestrator.chat(TurnRequest {
        session_id: session_id.clone(),
        provider_id,
        model_id,
        mode,
        message: prompt,
    });

    // Ctrl-C triggers the turn's cancellation token; the stream then ends
    // with error("cancelled") followed by the terminal complete.
    let cancel = handle.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let mut stdout = std::io::stdout();
    let mut failed = false;
    while let Some(chunk) = handle.chunks.recv().await {
        match chunk {
            StreamChunk::Content(text) => {
                print!("{text}");
                stdout.flush().ok();
            }
            StreamChunk::Status(note) => eprintln!("[{note}]"),
            StreamChunk::ToolStart { name, .. } => eprintln!("[tool {name} ...]"),
            StreamChunk::ToolResult { output, .. } => {
                eprintln!("[tool done]\n{output}");
            }
            StreamChunk::ToolError { message, .. } => eprintln!("[tool error] {message}"),
            StreamChunk::Error(msg) => {
                failed = true;
                eprintln!("error: {msg}");
            }
            StreamChunk::Complete(usage) => {
                println!();
                if let Some(u) = usage {
                    eprintln!("[tokens: {} in, {} out]", u.prompt, u.completion);
                }
            }
        }
    }
    eprintln!("[session {session_id}]");

    if failed {
        std::process::exit(1);
    }
    Ok(())
}

async fn run_auth(store: Arc<CredentialStore>, command: AuthCommands) -> anyhow::Result<()> {
    match command {
        AuthCommands::Login { provider, api_key } => {
            if provider == CopilotTokenManager::PROVIDER_ID {
                return copilot_device_login(store).await;
            }
            let Some(key) = api_key else {
                anyhow::bail!("provider {provider} needs --api-key");
            };
            store.set(&provider, Credential::Api { key }).await?;
            println!("stored API key for {provider}");
            Ok(())
        }
        AuthCommands::Logout { provider } => {
            store.remove(&provider).await?;
            println!("removed credential for {provider}");
            Ok(())
        }
        AuthCommands::List => {
            let all = store.all().await;
            if all.is_empty() {
                println!("no stored credentials ({})", store.path().display());
                return Ok(());
            }
            let mut ids: Vec<&String> = all.keys().collect();
            ids.sort();
            for id in ids {
                let kind = match &all[id] {
                    Credential::Api { .. } => "api key",
                    Credential::Oauth { .. } => "oauth",
                };
                println!("{id:<16} {kind}");
            }
            Ok(())
        }
    }
}

async fn copilot_device_login(store: Arc<CredentialStore>) -> anyhow::Result<()> {
    let manager = CopilotTokenManager::with_flow(store, DeviceFlow::new());
    let auth = manager.flow().authorize().await?;

    println!("Open {} and enter code: {}", auth.verification_url, auth.user_code);

    let deadline = std::time::Instant::now() + Duration::from_secs(auth.expires_in_s);
    loop {
        if std::time::Instant::now() > deadline {
            anyhow::bail!("device flow expired; run `knut auth login github-copilot` again");
        }
        tokio::time::sleep(Duration::from_secs(auth.interval_s)).await;
        match manager.complete_device_flow(&auth.device_code).await? {
            PollOutcome::Pending => continue,
            PollOutcome::Success { .. } => {
                println!("github-copilot authenticated");
                return Ok(());
            }
            PollOutcome::Failed => anyhow::bail!("device flow failed"),
        }
    }
}

async fn run_sessions(
    config: Arc<knut_config::Config>,
    delete: Option<String>,
) -> anyhow::Result<()> {
    let sessions = SessionStore::new(paths::sessions_dir(&config));
    if let Some(id) = delete {
        sessions.delete(&id).await?;
        println!("deleted {id}");
        return Ok(());
    }
    for info in sessions.list().await {
        println!(
            "{}  {:<20} [{}] {} messages  {}",
            info.id,
            info.title.as_deref().unwrap_or("(untitled)"),
            info.mode,
            info.message_count,
            info.updated.format("%Y-%m-%d %H:%M"),
        );
    }
    Ok(())
}

async fn run_models(
    config: Arc<knut_config::Config>,
    store: Arc<CredentialStore>,
) -> anyhow::Result<()> {
    let providers = knut_model::build_registry(&config, store);
    for provider in providers.list() {
        let info = provider.info();
        let authed = if provider.is_authenticated().await {
            "authenticated"
        } else {
            "not authenticated"
        };
        println!("{} — {} ({authed})", info.id, info.name);
        for model in &info.models {
            println!("  {:<28} {}k context", model.id, model.context_length / 1000);
        }
    }
    Ok(())
}
