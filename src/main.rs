use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};

use bankmail::gmail::GmailClient;
use bankmail::sync::{run_sync, SyncOutcome};
use bankmail::{config, queue};

#[derive(Debug, Parser)]
#[command(author, version, about = "Ingest bank notification emails into the transaction queue")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Stable user id owning the queue
    #[arg(long)]
    user: String,

    /// OAuth bearer token with read-only mailbox scope; falls back to the
    /// GMAIL_ACCESS_TOKEN environment variable
    #[arg(long)]
    token: Option<String>,

    /// Override the configured candidate message cap
    #[arg(long)]
    max_results: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| format!("sqlite://{}/bankmail.db", cfg.app.data_dir));

    let pool = queue::init_pool(&database_url).await?;
    queue::run_migrations(&pool).await?;

    let token = args
        .token
        .or_else(|| std::env::var("GMAIL_ACCESS_TOKEN").ok())
        .unwrap_or_default();
    let max_results = args.max_results.unwrap_or(cfg.app.max_results);

    let gmail = GmailClient::from_config(&cfg)?;

    info!(user = %args.user, "starting mailbox sync");
    match run_sync(&pool, &gmail, &args.user, &token, max_results).await {
        Ok(SyncOutcome::NoCandidates) => info!("no new bank emails found"),
        Ok(SyncOutcome::Queued { queued, failed }) => {
            info!(queued, failed, "sync finished");
        }
        Err(err) => {
            error!(?err, "sync failed");
            return Err(err);
        }
    }

    Ok(())
}
