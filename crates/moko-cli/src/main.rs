mod cmd_github;
mod cmd_prune;
mod cmd_serve;
mod config;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "moko", version, about = "Document store and CI failure-log backend")]
struct Cli {
    /// Data directory (overrides DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    #[command(subcommand)]
    cmd: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Initialize the data directory and serve the HTTP API (default)
    Serve {
        /// Bind address (overrides MOKO_BIND)
        #[arg(long)]
        bind: Option<String>,
        /// Port (overrides PORT)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Remove failure records older than 48 hours
    Prune,
    /// List repositories of the authenticated GitHub user
    Repos {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the tail of the first failing job's log for a workflow run
    FailureLog {
        /// Repository owner
        owner: String,
        /// Repository name
        repo: String,
        /// Workflow run ID
        run_id: u64,
        /// Number of trailing log lines
        #[arg(long, default_value_t = moko_github::DEFAULT_TAIL_LINES)]
        tail: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Logs go to stderr so `--json` output stays clean. `RUST_LOG` overrides
/// the default `info` level.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let mut config = config::Config::from_env()?;
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }

    let cmd = cli.cmd.unwrap_or(Command::Serve {
        bind: None,
        port: None,
    });

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        match cmd {
            Command::Serve { bind, port } => {
                if let Some(bind) = bind {
                    config.bind = bind;
                }
                if let Some(port) = port {
                    config.port = port;
                }
                cmd_serve::execute(config).await
            }
            Command::Prune => cmd_prune::execute(&config).await,
            Command::Repos { json } => cmd_github::repos(&config, json).await,
            Command::FailureLog {
                owner,
                repo,
                run_id,
                tail,
                json,
            } => cmd_github::failure_log(&config, &owner, &repo, run_id, tail, json).await,
        }
    })
}
