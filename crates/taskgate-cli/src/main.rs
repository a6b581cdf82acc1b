//! taskgate CLI: command-line interface for the task gateway.
//!
//! Reuses the same core domain logic (taskgate-core) and server bootstrap
//! (taskgate-server) as the HTTP API.

use clap::{Parser, Subcommand};

use taskgate_cli::commands;

/// taskgate: route tasks to agents or workflows
#[derive(Parser)]
#[command(name = "taskgate", version, about = "taskgate: route tasks to agents or workflows")]
pub struct Cli {
    /// Path to a YAML gateway config (engine, router, gateway sections)
    #[arg(long, env = "TASKGATE_CONFIG", global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the taskgate HTTP server
    Server {
        /// Host to bind to
        #[arg(long, env = "TASKGATE_HOST", default_value = "127.0.0.1")]
        host: String,
        /// Port to listen on
        #[arg(long, env = "TASKGATE_PORT", default_value_t = 3220)]
        port: u16,
        /// Forward tool calls to this base URL instead of the in-process registry
        #[arg(long, env = "TASKGATE_TOOLS_URL")]
        tools_url: Option<String>,
    },

    /// Validate and run workflow definitions
    Workflow {
        #[command(subcommand)]
        action: WorkflowAction,
    },
}

#[derive(Subcommand)]
enum WorkflowAction {
    /// Check a YAML/JSON workflow for structural errors and cycles
    Validate {
        /// Path to the workflow file
        file: String,
    },
    /// Execute a workflow and report per-step results
    Run {
        /// Path to the workflow file
        file: String,
        /// Forward tool calls to this base URL instead of the in-process registry
        #[arg(long, env = "TASKGATE_TOOLS_URL")]
        tools_url: Option<String>,
        /// Print the full run record as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "taskgate_core=warn,taskgate_server=warn,taskgate_cli=info".into()),
        )
        .init();

    let result = match cli.command {
        Commands::Server {
            host,
            port,
            tools_url,
        } => commands::server::run(host, port, cli.config, tools_url).await,

        Commands::Workflow { action } => match action {
            WorkflowAction::Validate { file } => commands::workflow::validate(&file),
            WorkflowAction::Run {
                file,
                tools_url,
                json,
            } => {
                commands::workflow::run(&file, tools_url.as_deref(), cli.config.as_deref(), json)
                    .await
            }
        },
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
