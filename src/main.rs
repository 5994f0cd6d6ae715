//! # Context Queue server (`ctxq`)
//!
//! ## Usage
//!
//! ```bash
//! ctxq --config ./config/ctxq.toml serve
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ctxq serve` | Start the task processor and the HTTP API |
//! | `ctxq config` | Print the effective configuration |
//! | `ctxq completions <shell>` | Generate shell completions |
//!
//! Without `--config`, built-in defaults are used. `PORT`, `CTXQ_BIND` and
//! `MCP_API_KEY` override the file in either case.

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

use context_queue::{config, logging, server};

/// Context Queue — an in-memory document and context store with a
/// rate-limited ingestion queue.
#[derive(Parser)]
#[command(name = "ctxq", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the task processor and the HTTP server.
    ///
    /// Runs until interrupted. All state is held in memory and lost on exit.
    Serve,

    /// Print the effective configuration as TOML.
    ///
    /// Shows the result of merging the config file (if any) with
    /// environment overrides. The API key is masked.
    Config,

    /// Generate shell completion scripts.
    Completions {
        /// Target shell.
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "ctxq", &mut std::io::stdout());
        return Ok(());
    }

    let mut cfg = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => config::default_config()?,
    };

    match cli.command {
        Commands::Serve => {
            logging::init(&cfg.logging);
            server::run_server(&cfg).await?;
        }
        Commands::Config => {
            cfg.server.api_key = "*".repeat(cfg.server.api_key.len().min(8));
            print!("{}", toml::to_string_pretty(&cfg)?);
        }
        Commands::Completions { .. } => unreachable!(),
    }

    Ok(())
}
