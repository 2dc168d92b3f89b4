mod archive;
mod listen;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tot_core::MindMapReasoner;
use tot_mind::SessionConfig;
use tot_reasoner::{AnthropicConfig, AnthropicReasoner, HubReasoner};
use tot_storage::{default_db_path, ConversationArchive, ConversationStore};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tot")]
#[command(about = "Train of Thought: live transcript to mind map", long_about = None)]
struct Cli {
    /// Conversation archive (SQLite)
    #[arg(long, env = "TOT_DB", global = true)]
    db: Option<PathBuf>,
    #[arg(long, value_enum, env = "TOT_REASONER", default_value_t = ReasonerKind::Anthropic, global = true)]
    reasoner: ReasonerKind,
    /// Hub base url, used by the hub reasoner and for AssemblyAI tokens
    #[arg(long, env = "TOT_HUB_URL", global = true)]
    hub_url: Option<String>,
    #[arg(long, default_value_t = false, global = true)]
    debug: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum ReasonerKind {
    Anthropic,
    Hub,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a live session reading control lines from stdin
    Listen(listen::ListenArgs),
    #[command(flatten)]
    Archive(archive::ArchiveCommand),
}

fn init_logging(debug: bool) {
    let level = if debug {
        "debug".to_string()
    } else {
        std::env::var("TOT_LOG_LEVEL").unwrap_or_else(|_| "info".to_string())
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn build_reasoner(kind: ReasonerKind, hub_url: Option<&str>) -> Result<Arc<dyn MindMapReasoner>> {
    match kind {
        ReasonerKind::Anthropic => {
            let config = AnthropicConfig::from_env()?;
            let wake_word = SessionConfig::from_env().wake_word;
            Ok(Arc::new(
                AnthropicReasoner::new(config).with_assistant_name(&wake_word),
            ))
        }
        ReasonerKind::Hub => {
            let url = hub_url.context("--hub-url is required with --reasoner hub")?;
            Ok(Arc::new(HubReasoner::new(url)))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let db_path = cli.db.clone().unwrap_or_else(default_db_path);
    let store: Arc<dyn ConversationArchive> = Arc::new(
        ConversationStore::open(&db_path)
            .with_context(|| format!("Failed to open archive at {}", db_path.display()))?,
    );
    let hub_url = cli.hub_url.as_deref();

    match cli.command {
        Commands::Listen(args) => {
            let reasoner = build_reasoner(cli.reasoner, hub_url)?;
            listen::run(args, store, reasoner, hub_url).await?;
        }
        Commands::Archive(command) => {
            archive::run(command, store.as_ref(), || {
                build_reasoner(cli.reasoner, hub_url)
            })
            .await?;
        }
    }

    Ok(())
}
