mod crawl;
mod reconcile;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::crawl::CrawlArgs;

#[derive(Debug, Parser)]
#[command(name = "bizdb")]
#[command(about = "Enrich the business registry with scraped place data")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Crawl place pages for a slice of the registry
    Crawl(CrawlArgs),
    /// Merge crawl result files with the registry
    Reconcile {
        /// Directory holding `*.json` crawl result files; defaults to the data dir
        #[arg(long)]
        input: Option<PathBuf>,

        /// File that receives the merged records as JSON
        #[arg(long, default_value = "merged_data.json")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = bizdb_core::load_app_config()?;
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();
    match cli.command {
        Some(Commands::Crawl(args)) => {
            let totals = crawl::run_crawl(&config, &args).await?;
            println!(
                "crawl finished: success={} fail={} needs_review={}",
                totals.success, totals.failed, totals.needs_review
            );
        }
        Some(Commands::Reconcile { input, output }) => {
            let input = input.unwrap_or_else(|| config.data_dir.clone());
            let summary = reconcile::run_reconcile(&config, &input, &output).await?;
            println!(
                "reconcile finished: files={} merged={} unmatched={}",
                summary.files, summary.merged, summary.unmatched
            );
        }
        None => println!("bizdb ready; see --help for commands"),
    }

    Ok(())
}
