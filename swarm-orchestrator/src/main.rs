use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use swarm_orchestrator::config::OrchestratorConfig;
use swarm_orchestrator::orchestrator::Orchestrator;
use swarm_orchestrator::session::HttpSessionService;
use swarm_orchestrator::tools::create_orchestrator_tool_server;
use swarm_orchestrator_sdk::log_info;

#[derive(Parser, Debug)]
#[command(
    name = "swarm-orchestrator",
    about = "Multi-agent workflow orchestration engine"
)]
struct Args {
    /// Path to a YAML config file (env vars override it)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve tool invocations over stdin/stdout, one JSON object per line
    Serve,
    /// List the exposed tools and exit
    ListTools,
}

/// One tool invocation read from stdin
#[derive(Debug, serde::Deserialize)]
struct Invocation {
    #[serde(default)]
    id: Option<serde_json::Value>,
    tool: String,
    #[serde(default)]
    params: serde_json::Value,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => OrchestratorConfig::load(path)?,
        None => OrchestratorConfig::from_env(),
    };

    let service = Arc::new(HttpSessionService::new(&config.session_service_url));
    let orchestrator = Arc::new(Orchestrator::new(config, service));
    let server = create_orchestrator_tool_server(orchestrator);

    match args.command.unwrap_or(Command::Serve) {
        Command::ListTools => {
            for (name, description, _) in server.list_tools() {
                println!("{}: {}", name, description);
            }
            Ok(())
        }
        Command::Serve => serve(server).await,
    }
}

/// Read one JSON invocation per line, dispatch it, write one JSON result
/// per line. Malformed lines produce an error object instead of killing
/// the loop.
async fn serve(server: swarm_orchestrator_sdk::ToolServer) -> Result<()> {
    log_info!(
        "{} v{} serving {} tools on stdio",
        server.name(),
        server.server_version(),
        server.list_tools().len()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<Invocation>(&line) {
            Ok(invocation) => {
                let result = server
                    .call(&invocation.tool, invocation.params)
                    .await
                    .unwrap_or_else(|e| {
                        swarm_orchestrator_sdk::ToolResult::error(format!(
                            "Tool '{}' failed: {}",
                            invocation.tool, e
                        ))
                    });
                serde_json::json!({
                    "id": invocation.id,
                    "tool": invocation.tool,
                    "is_error": result.is_error,
                    "content": result.content,
                })
            }
            Err(e) => serde_json::json!({
                "id": null,
                "is_error": true,
                "content": format!("Invalid invocation: {}", e),
            }),
        };

        let mut out = serde_json::to_string(&response)?;
        out.push('\n');
        stdout.write_all(out.as_bytes()).await?;
        stdout.flush().await?;
    }

    Ok(())
}
