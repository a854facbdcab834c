//! CLI entry and dispatch.

use anyhow::{Context, Result};
use clap::Parser;

use abx_core::config::{self, ProtocolMode};
use abx_core::interrupt;

mod commands;

#[derive(Parser)]
#[command(name = "abx")]
#[command(version = "0.1")]
#[command(about = "Bridge CLI for interactive agent processes")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Work directory for the agent session (default: current directory)
    #[arg(long, default_value = ".")]
    root: String,

    /// Override the agent executable from config
    #[arg(long)]
    agent: Option<String>,

    /// Override the wire protocol from config (line, rpc)
    #[arg(long)]
    protocol: Option<String>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Execute a single task and print the streamed response
    Exec {
        /// The input sent to the agent
        #[arg(short, long)]
        prompt: String,
    },

    /// Interactive chat over one long-lived agent session
    Chat,

    /// List the tools the agent exposes (rpc protocol only)
    Tools,

    /// Chat against a remote agent server
    Remote {
        /// The message to send
        #[arg(short, long)]
        message: String,

        /// Conversation to continue (a new one is created when omitted)
        #[arg(long, value_name = "ID")]
        conversation: Option<String>,

        /// Override the remote base URL from config
        #[arg(long)]
        url: Option<String>,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(clap::Subcommand)]
enum ConfigCommands {
    /// Show the path to the config file
    Path,
    /// Initialize a default config file (if not present)
    Init,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    interrupt::init();

    // one tokio runtime for everything
    let rt = tokio::runtime::Runtime::new().context("create tokio runtime")?;

    rt.block_on(async move { dispatch(cli).await })
}

async fn dispatch(cli: Cli) -> Result<()> {
    let mut config = config::Config::load().context("load config")?;

    if let Some(agent) = cli.agent.as_deref() {
        config.agent.executable = Some(agent.to_string());
    }
    if let Some(protocol) = cli.protocol.as_deref() {
        config.agent.protocol = parse_protocol(protocol)?;
    }

    // default to chat mode
    let Some(command) = cli.command else {
        return commands::chat::run(&cli.root, &config).await;
    };

    match command {
        Commands::Exec { prompt } => commands::exec::run(&cli.root, &prompt, &config).await,

        Commands::Chat => commands::chat::run(&cli.root, &config).await,

        Commands::Tools => commands::tools::run(&cli.root, &config).await,

        Commands::Remote {
            message,
            conversation,
            url,
        } => {
            if let Some(url) = url {
                config.remote.base_url = Some(url);
            }
            commands::remote::run(&message, conversation.as_deref(), &config).await
        }

        Commands::Config { command } => match command {
            ConfigCommands::Path => commands::config::path(),
            ConfigCommands::Init => commands::config::init(),
        },
    }
}

fn parse_protocol(s: &str) -> Result<ProtocolMode> {
    match s.to_lowercase().as_str() {
        "line" => Ok(ProtocolMode::Line),
        "rpc" => Ok(ProtocolMode::Rpc),
        _ => anyhow::bail!("Invalid protocol '{}'. Valid options: line, rpc", s),
    }
}
