mod config;

use anyhow::Context;
use clap::{Parser, Subcommand};
use config::ToolgateConfig;
use std::path::PathBuf;
use std::sync::Arc;
use toolgate_gateway::GatewayServer;
use toolgate_mcp::{register_mcp_tools, ClientManager, McpServer};
use toolgate_skills::SkillRegistry;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "toolgate", about = "Toolgate: MCP client and tool gateway", version)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "toolgate.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect or call tools of the configured MCP servers
    Tools {
        #[command(subcommand)]
        action: ToolsAction,
    },
    /// Connect to every configured server and print its status as JSON
    Status,
    /// Re-export every configured server's tools as one MCP server
    Serve {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
        /// Speak MCP on stdin/stdout instead of HTTP
        #[arg(long, conflicts_with_all = ["host", "port"])]
        stdio: bool,
    },
}

#[derive(Subcommand)]
enum ToolsAction {
    /// List the tools of every reachable server
    List,
    /// Call one tool, either `server:tool` or a bare tool name
    Call {
        /// Tool name
        name: String,
        /// JSON object with the tool arguments
        #[arg(long, default_value = "{}")]
        args: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();

    // Logs go to stderr: in stdio mode stdout carries protocol data.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .json()
        .init();

    let cli = Cli::parse();
    let config = ToolgateConfig::load(&cli.config)?;
    let manager = Arc::new(ClientManager::new(
        config.servers.clone(),
        config.client_options(),
    ));

    let outcome = run(cli.command, &config, &manager).await;
    manager.close_all().await;
    outcome
}

async fn run(
    command: Commands,
    config: &ToolgateConfig,
    manager: &Arc<ClientManager>,
) -> anyhow::Result<()> {
    match command {
        Commands::Tools { action } => match action {
            ToolsAction::List => {
                connect_all(manager).await;
                let tools = manager.list_all_tools();
                if tools.is_empty() {
                    println!("No tools available.");
                    println!("Configure MCP servers in toolgate.toml under [servers.<name>]");
                } else {
                    for (server, tool) in &tools {
                        println!("  {server}:{} - {}", tool.name, tool.description);
                    }
                    println!("\nTotal: {} tool(s)", tools.len());
                }
            }
            ToolsAction::Call { name, args } => {
                let arguments: serde_json::Value =
                    serde_json::from_str(&args).context("--args must be valid JSON")?;
                let result = manager.call_tool(&name, arguments).await?;
                println!("{}", result.text());
                if let Some(structured) = &result.structured_content {
                    println!("{}", serde_json::to_string_pretty(structured)?);
                }
            }
        },
        Commands::Status => {
            connect_all(manager).await;
            println!("{}", serde_json::to_string_pretty(&manager.status())?);
        }
        Commands::Serve { host, port, stdio } => {
            connect_all(manager).await;
            let mut registry = SkillRegistry::new();
            let count = register_mcp_tools(manager, &mut registry);
            info!(tools = count, "Bridged MCP tools into the server host");

            let host_config = config.host_config();
            if !stdio && host_config.auth_token.is_none() {
                warn!("No auth token configured; the MCP endpoint is open to anyone who can reach it");
            }
            let server = Arc::new(McpServer::new(host_config, Arc::new(registry)));

            if stdio {
                info!("Serving MCP on stdio");
                server
                    .serve_io(tokio::io::stdin(), tokio::io::stdout())
                    .await?;
            } else {
                let host = host.unwrap_or_else(|| config.server.host.clone());
                let port = port.unwrap_or(config.server.port);
                let addr = format!("{host}:{port}");
                let listener = tokio::net::TcpListener::bind(&addr)
                    .await
                    .with_context(|| format!("Failed to bind {addr}"))?;
                GatewayServer::serve(listener, server, shutdown_signal()).await?;
            }
        }
    }
    Ok(())
}

/// Connects every configured server. Failures are logged and the remaining
/// servers stay usable.
async fn connect_all(manager: &ClientManager) {
    for err in manager.connect_all().await {
        warn!(error = %err, "MCP server unavailable");
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
