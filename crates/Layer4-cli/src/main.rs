//! berth CLI - Main entry point

mod api;
mod cli;

use anyhow::Context;
use berth_foundation::{BerthConfig, ConfigLayer, RuntimeKind};
use berth_task::WorkspaceService;
use clap::{Parser, Subcommand};
use cli::{ProjectArgs, ProvisionArgs};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// berth - containerized workspaces for local code directories
#[derive(Parser, Debug)]
#[command(name = "berth")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Container runtime (docker-cli, podman-cli, docker-api)
    #[arg(long, global = true)]
    runtime: Option<RuntimeKind>,

    /// Extra config file applied after the global and project files
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP API
    Serve {
        /// Listen address (overrides config)
        #[arg(short, long)]
        listen: Option<String>,

        /// Seconds between background reconciliations
        #[arg(long, default_value = "30")]
        reconcile_secs: u64,
    },
    /// Start a workspace container for a directory
    Provision(ProvisionArgs),
    /// List workspaces
    List,
    /// Run a shortcut (test, save, create-pr, build-jar) or a shell command
    Run {
        /// Shortcut key or command line
        command: String,

        #[command(flatten)]
        project: ProjectArgs,
    },
    /// Show the execution status of a workspace
    Status {
        #[command(flatten)]
        project: ProjectArgs,
    },
    /// Print the log of a workspace
    Logs {
        #[command(flatten)]
        project: ProjectArgs,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    // Load configuration
    let mut config =
        BerthConfig::load_with_file(args.config.as_deref()).context("failed to load config")?;
    if let Some(runtime) = args.runtime {
        config.merge(ConfigLayer::default().runtime(runtime));
    }
    if let Command::Serve {
        listen: Some(listen),
        ..
    } = &args.command
    {
        config.merge(ConfigLayer::default().listen(listen.clone()));
    }

    tracing::debug!("Using runtime: {}", config.runtime);
    let listen = config.listen.clone();
    let service = WorkspaceService::connect(config).await?;

    match args.command {
        Command::Serve { reconcile_secs, .. } => {
            api::serve(service, &listen, Duration::from_secs(reconcile_secs)).await
        }
        Command::Provision(provision) => cli::provision(&service, provision).await,
        Command::List => cli::list(&service).await,
        Command::Run { command, project } => cli::run(&service, &project, &command).await,
        Command::Status { project } => cli::status(&service, &project).await,
        Command::Logs { project } => cli::logs(&service, &project).await,
    }
}
