mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{catalog::CatalogSubcommand, config::ConfigSubcommand, trigger::TriggerArgs};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "bulkops",
    about = "Run one action across every environment of a project, streamed over WebSocket",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from .bulkops/)
    #[arg(long, global = true, env = "BULKOPS_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the bulk-action server
    Serve {
        /// Port to listen on (default: server.port from config)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Create, inspect and validate .bulkops/config.yaml
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },

    /// Inspect the environment catalog
    Catalog {
        #[command(subcommand)]
        subcommand: CatalogSubcommand,
    },

    /// Start a bulk run on a server and stream its frames
    Trigger(TriggerArgs),
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Serve { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Serve { port } => cmd::serve::run(&root, port),
        Commands::Config { subcommand } => cmd::config::run(&root, subcommand, cli.json),
        Commands::Catalog { subcommand } => cmd::catalog::run(&root, subcommand, cli.json),
        Commands::Trigger(args) => cmd::trigger::run(&root, args, cli.json),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
