//! Warden - streamed security-assistant sessions from the terminal
//!
//! - `warden tools ...` manages the tool connection registry
//! - `warden ask ...` runs one streamed session, printing wire messages as
//!   JSON lines on stdout
//!
//! Logs go to stderr so stdout stays machine-readable.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::info;

use warden_core::config::WardenConfig;
use warden_core::store::MemoryConversationStore;
use warden_core::stream::{serve_session, JsonLinesSink, SessionStatus, StreamSession};
use warden_core::tools::{ConnectionSnapshot, McpConnector, ProbeOptions, ToolConnectivityManager};
use warden_core::{AgentExecutor, OpenAiCompatibleGenerator, Task};

/// Warden - streamed agent sessions and tool connectivity
#[derive(Parser)]
#[command(name = "warden", version)]
#[command(about = "Streamed security-assistant sessions and tool connection management", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to ~/.warden/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Tool server registry (defaults to ~/.warden/mcp.json)
    #[arg(long, global = true)]
    servers: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage tool connections
    Tools {
        #[command(subcommand)]
        action: ToolsCommands,
    },

    /// Ask a question and stream the answer as JSON lines
    Ask {
        question: String,

        /// Call a tool first, as CONNECTION/TOOL
        #[arg(long, conflicts_with = "inspect")]
        tool: Option<String>,

        /// JSON arguments for --tool
        #[arg(long, requires = "tool")]
        args: Option<String>,

        /// Probe every tool connection first
        #[arg(long)]
        inspect: bool,
    },
}

#[derive(Subcommand)]
enum ToolsCommands {
    /// Cached status of every connection (no network)
    List,
    /// Status of one or all connections
    Status {
        name: Option<String>,
        /// Probe instead of reading the cache
        #[arg(long)]
        probe: bool,
        /// Also fetch each connection's tools (implies a probe)
        #[arg(long)]
        include_tools: bool,
    },
    /// Import an `mcpServers` JSON document into the registry
    Import { file: PathBuf },
    /// Print the registry as an `mcpServers` JSON document
    Export,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let cli = Cli::parse();
    let config = WardenConfig::load(cli.config.as_deref())
        .context("failed to load configuration")?;
    let servers_path = cli
        .servers
        .clone()
        .unwrap_or_else(|| config.tools.servers_path());

    let manager = Arc::new(load_registry(&config, &servers_path)?);

    match cli.command {
        Commands::Tools { action } => run_tools(action, &config, &manager, &servers_path).await,
        Commands::Ask {
            question,
            tool,
            args,
            inspect,
        } => {
            let task = build_task(question, tool, args, inspect)?;
            run_ask(task, &config, manager).await
        }
    }
}

fn load_registry(config: &WardenConfig, servers_path: &Path) -> Result<ToolConnectivityManager> {
    let connector = McpConnector::new().context("failed to build tool connector")?;
    let manager = ToolConnectivityManager::new(Arc::new(connector))
        .with_timeouts(config.tools.probe_timeout(), config.tools.call_timeout());
    let report = manager
        .load_file(servers_path)
        .with_context(|| format!("failed to read {}", servers_path.display()))?;
    for (name, reason) in &report.invalid {
        tracing::warn!(connection = %name, "Skipping invalid server entry: {}", reason);
    }
    info!(
        connections = report.imported.len(),
        "Loaded tool registry from {}",
        servers_path.display()
    );
    Ok(manager)
}

async fn run_tools(
    action: ToolsCommands,
    config: &WardenConfig,
    manager: &ToolConnectivityManager,
    servers_path: &Path,
) -> Result<()> {
    match action {
        ToolsCommands::List => {
            print_snapshots(&manager.cached_statuses());
        }
        ToolsCommands::Status {
            name,
            probe,
            include_tools,
        } => {
            let options = if probe || include_tools {
                ProbeOptions::full(include_tools)
            } else {
                config.tools.default_probe_options(include_tools)
            };
            let snapshots = match name {
                Some(name) => vec![manager.status(&name, options).await?],
                None => manager.statuses(options).await,
            };
            println!("{}", serde_json::to_string_pretty(&snapshots)?);
        }
        ToolsCommands::Import { file } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let document: Value = serde_json::from_str(&content)
                .with_context(|| format!("{} is not valid JSON", file.display()))?;
            let report = manager.import_json(&document)?;
            manager.save_file(servers_path)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        ToolsCommands::Export => {
            println!("{}", serde_json::to_string_pretty(&manager.export_json()?)?);
        }
    }
    Ok(())
}

fn print_snapshots(snapshots: &[ConnectionSnapshot]) {
    if snapshots.is_empty() {
        println!("No tool connections configured.");
        return;
    }
    for snapshot in snapshots {
        let checked = snapshot
            .last_checked
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".to_string());
        match &snapshot.error {
            Some(error) => println!(
                "  {:<20} {:<16} {:<9} {}  ({})",
                snapshot.name, snapshot.transport, snapshot.status, checked, error
            ),
            None => println!(
                "  {:<20} {:<16} {:<9} {}",
                snapshot.name, snapshot.transport, snapshot.status, checked
            ),
        }
    }
}

fn build_task(
    question: String,
    tool: Option<String>,
    args: Option<String>,
    inspect: bool,
) -> Result<Task> {
    if inspect {
        return Ok(Task::inspect_connections(question, true));
    }
    let Some(tool) = tool else {
        return Ok(Task::answer(question));
    };
    let (connection, tool) = tool
        .split_once('/')
        .filter(|(c, t)| !c.is_empty() && !t.is_empty())
        .ok_or_else(|| anyhow!("--tool must look like CONNECTION/TOOL, got '{}'", tool))?;
    let arguments = match args {
        Some(raw) => serde_json::from_str(&raw).context("--args is not valid JSON")?,
        None => Value::Null,
    };
    Ok(Task::invoke_tool(question, connection, tool, arguments))
}

async fn run_ask(task: Task, config: &WardenConfig, manager: Arc<ToolConnectivityManager>) -> Result<()> {
    let generator = OpenAiCompatibleGenerator::from_config(&config.generation)?;
    let executor = Arc::new(
        AgentExecutor::new(manager, Arc::new(generator))
            .with_min_chunk_size(config.streaming.min_chunk_size),
    );
    let store = Arc::new(MemoryConversationStore::new());
    let session = StreamSession::new(
        uuid::Uuid::new_v4().to_string(),
        uuid::Uuid::new_v4().to_string(),
    );
    let bridge_config = config.bridge_config();
    let handle = tokio::runtime::Handle::current();

    let session_store = store.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        let sink = JsonLinesSink::new(std::io::stdout());
        serve_session(
            &handle,
            executor,
            task,
            bridge_config,
            session,
            sink,
            session_store,
        )
    })
    .await
    .context("stream consumer thread failed")?;

    info!(
        session_id = %outcome.session_id,
        messages = outcome.messages_delivered,
        chars = outcome.chars_accumulated,
        stored = store.len(),
        "Session complete"
    );
    if let Some(error) = &outcome.persist_error {
        tracing::warn!(session_id = %outcome.session_id, "Answer was not stored: {}", error);
    }
    if outcome.status != SessionStatus::Completed {
        bail!("session {} ended with an error", outcome.session_id);
    }
    Ok(())
}
