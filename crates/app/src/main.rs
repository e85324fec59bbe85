use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use commands::{LearnArgs, ReconcileArgs};
use config::AppConfig;

#[derive(Parser)]
#[command(name = "dockmark", version, about = "Match shipping labels to a dock manifest")]
struct Cli {
    /// Config file (defaults to the per-user dockmark.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Read every label, match it to the manifest and emit a JSON report
    Reconcile {
        /// Manifest as CSV/TSV or free text
        #[arg(long)]
        manifest: PathBuf,
        /// Label images or directories of them
        #[arg(long, num_args = 1.., required = true)]
        labels: Vec<PathBuf>,
        /// Write the report here instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Learn manifest columns from one example row and print the rows as CSV
    Learn {
        /// Token JSON files or page images, one per page
        #[arg(long = "tokens", num_args = 1.., required = true)]
        pages: Vec<PathBuf>,
        /// Order number as printed on the example row
        #[arg(long)]
        order: String,
        /// Reference as printed on the example row
        #[arg(long)]
        reference: String,
        /// Package count as printed on the example row
        #[arg(long)]
        packages: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Reconcile { manifest, labels, out } => {
            let report =
                commands::reconcile(ReconcileArgs { config, manifest, labels, out }).await?;
            if let Some(abort) = &report.aborted {
                tracing::warn!("run stopped early: {abort}");
            }
        }
        Command::Learn { pages, order, reference, packages } => {
            commands::learn(LearnArgs { config, pages, order, reference, packages }).await?;
        }
    }
    Ok(())
}
