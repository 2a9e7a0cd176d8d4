//! crawlab-mcp — Crawlab API tools for LLMs.
//!
//! Usage:
//!   crawlab-mcp tools                  List the synthesized tool catalog
//!   crawlab-mcp tags                   List API tags and the tools under each
//!   crawlab-mcp call <name> --args {}  Invoke one tool
//!   crawlab-mcp chat [--message TEXT]  Talk to the configured LLM
//!   crawlab-mcp init                   Write a default config file

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crawlab_mcp::agent::{ConversationSession, SessionOutcome, SessionSettings};
use crawlab_mcp::config::{self, AppConfig};
use crawlab_mcp::openapi::{load_spec, ApiSpec};
use crawlab_mcp::providers::{create_provider, ToolSupportTable};
use crawlab_mcp::tools::tags::{tag_index, tag_names};
use crawlab_mcp::tools::{HttpDispatcher, ToolRegistry};
use crawlab_mcp::types::{ChatMessage, ChatRole, ToolOutcome};

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "crawlab-mcp")]
#[command(version)]
#[command(about = "Expose the Crawlab API as LLM tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the config file.
    #[arg(long, global = true)]
    config: Option<String>,

    /// Log level (debug, info, warn, error). Overrides the config file.
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the tool catalog synthesized from the OpenAPI document.
    Tools {
        /// Print full JSON definitions.
        #[arg(long)]
        json: bool,
    },

    /// Print API tags with the tools under each.
    Tags,

    /// Invoke one tool and print its result.
    Call {
        /// Tool name.
        name: String,

        /// Arguments as a JSON object.
        #[arg(long, default_value = "{}")]
        args: String,
    },

    /// Chat with the configured LLM, letting it call tools.
    Chat {
        /// Ask one question and exit.
        #[arg(long, short)]
        message: Option<String>,

        /// Print every tool invocation.
        #[arg(long)]
        trace: bool,
    },

    /// Write a default config file.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("{} failed to load .env: {}", "Warning:".yellow().bold(), e);
        }
    }

    let config_path = match &cli.config {
        Some(path) => PathBuf::from(shellexpand::tilde(path).into_owned()),
        None => config::default_config_path(),
    };
    let mut cfg = config::load_config(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    config::apply_env_overrides(&mut cfg, |key| std::env::var(key).ok());

    // Initialize logging
    let level = cli.log_level.clone().unwrap_or_else(|| cfg.log_level.clone());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Init { force } => cmd_init(&config_path, force),
        Commands::Tools { json } => cmd_tools(&cfg, json).await,
        Commands::Tags => cmd_tags(&cfg).await,
        Commands::Call { name, args } => cmd_call(&cfg, &name, &args).await,
        Commands::Chat { message, trace } => cmd_chat(&cfg, message, trace).await,
    }
}

// ---------------------------------------------------------------------------
// Command implementations
// ---------------------------------------------------------------------------

fn cmd_init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    config::save_config(&AppConfig::default(), path)?;
    println!("{} Wrote {}", ">>>".green().bold(), path.display());
    Ok(())
}

async fn cmd_tools(cfg: &AppConfig, json: bool) -> Result<()> {
    let (_, registry) = bootstrap(cfg).await?;
    let tools = registry.list_tools();

    if json {
        println!("{}", serde_json::to_string_pretty(&tools)?);
        return Ok(());
    }

    println!();
    println!("{}", format!("=== {} tools ===", tools.len()).bold());
    for tool in &tools {
        let route = registry
            .operation(&tool.name)
            .map(|op| format!("{} {}", op.method, op.path))
            .unwrap_or_else(|| "utility".to_string());
        let summary = tool.description.lines().next().unwrap_or_default();
        println!("  {}  {}", tool.name.green().bold(), route.dimmed());
        if !summary.is_empty() {
            println!("      {}", summary);
        }
    }
    println!();
    Ok(())
}

async fn cmd_tags(cfg: &AppConfig) -> Result<()> {
    let (spec, _) = bootstrap(cfg).await?;
    let index = tag_index(&spec);

    println!();
    for tag in index["tags"].as_array().into_iter().flatten() {
        println!(
            "{}  {}",
            tag["name"].as_str().unwrap_or_default().cyan().bold(),
            tag["description"].as_str().unwrap_or_default().dimmed()
        );
        for tool in tag["tools"].as_array().into_iter().flatten() {
            println!(
                "    {:<7} {}  {}",
                tool["method"].as_str().unwrap_or_default(),
                tool["name"].as_str().unwrap_or_default().green(),
                tool["summary"].as_str().unwrap_or_default()
            );
        }
    }
    println!();
    Ok(())
}

async fn cmd_call(cfg: &AppConfig, name: &str, args: &str) -> Result<()> {
    let arguments: Value = serde_json::from_str(args).context("--args must be a JSON object")?;
    let (_, registry) = bootstrap(cfg).await?;

    let result = registry.invoke(name, arguments).await;
    println!("{}", serde_json::to_string_pretty(&result)?);

    if let ToolOutcome::Failure { error } = &result.outcome {
        bail!("{} failed: {} ({})", name, error.message, error.kind);
    }
    Ok(())
}

async fn cmd_chat(cfg: &AppConfig, message: Option<String>, show_trace: bool) -> Result<()> {
    let (spec, registry) = bootstrap(cfg).await?;

    let table = ToolSupportTable::with_overrides(&cfg.tool_support)
        .context("Invalid [[tool_support]] pattern in config")?;
    let provider = create_provider(&cfg.llm, Arc::new(table))?;
    provider.initialize().await?;

    let settings = SessionSettings {
        max_tool_rounds: cfg.max_tool_rounds,
        model: None,
        intent_routing: cfg.intent_routing,
        system_prompt: (!cfg.system_prompt.trim().is_empty()).then(|| cfg.system_prompt.clone()),
        tags: tag_names(&spec),
    };
    let session = ConversationSession::new(Arc::clone(&provider), Arc::new(registry), settings);

    println!(
        "{} Chatting with {} ({} tools, tool calls {})",
        ">>>".green().bold(),
        provider.model_name(),
        session.registry().len(),
        if provider.has_tool_support(None) { "enabled" } else { "disabled" },
    );

    if let Some(message) = message {
        let outcome = session.ask(&[], &message).await?;
        print_outcome(&outcome, show_trace);
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_cancel.cancel();
        }
    });

    let mut history: Vec<ChatMessage> = Vec::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"\nyou> ").await?;
        stdout.flush().await?;

        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else { break };
        let query = line.trim();
        if query.is_empty() {
            continue;
        }
        if matches!(query, "quit" | "exit") {
            break;
        }

        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            result = session.ask(&history, query) => result,
        };
        match result {
            Ok(outcome) => {
                print_outcome(&outcome, show_trace);
                history = outcome
                    .messages
                    .into_iter()
                    .filter(|m| m.role != ChatRole::System)
                    .collect();
            }
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                warn!("Request failed: {}", e);
                println!("{} {}", "Error:".red().bold(), e);
            }
        }
    }

    println!("\n{} Bye.", "<<<".red().bold());
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Load the OpenAPI document and build the tool registry.
async fn bootstrap(cfg: &AppConfig) -> Result<(ApiSpec, ToolRegistry)> {
    let source = cfg.resolved_openapi_spec();
    let spec = load_spec(&source, cfg.request_timeout())
        .await
        .with_context(|| format!("Failed to load OpenAPI document from {source}"))?;
    info!(
        "Loaded {} v{} ({} operations)",
        spec.title,
        spec.version,
        spec.operations.len()
    );

    let dispatcher = HttpDispatcher::new(&cfg.api_base_url, &cfg.api_token, cfg.request_timeout())
        .context("Failed to build HTTP client for the Crawlab API")?;
    let registry = ToolRegistry::from_spec(&spec, Arc::new(dispatcher));
    Ok((spec, registry))
}

fn print_outcome(outcome: &SessionOutcome, show_trace: bool) {
    if show_trace {
        for invocation in &outcome.trace {
            let status = if invocation.result.is_success() {
                "ok".green()
            } else {
                "failed".red()
            };
            println!(
                "  {} {}({}) {} in {} ms",
                "tool".dimmed(),
                invocation.call.name.cyan(),
                invocation.call.arguments,
                status,
                invocation.result.elapsed_ms
            );
        }
    }
    println!("\n{} {}", "assistant>".blue().bold(), outcome.final_message.content);
    if outcome.usage.total_tokens > 0 {
        println!(
            "{}",
            format!(
                "({} prompt + {} completion tokens)",
                outcome.usage.prompt_tokens, outcome.usage.completion_tokens
            )
            .dimmed()
        );
    }
}
