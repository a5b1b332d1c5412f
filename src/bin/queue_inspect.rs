use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use serde_json::to_string_pretty;

use bankmail::{config, queue};

#[derive(Parser, Debug)]
#[command(about = "Inspect (and optionally drain) a user's staged transaction queue")]
struct Args {
    /// Path to YAML config
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// User id whose queue to inspect
    #[arg(long)]
    user: String,

    /// Remove one entry by id after listing, the way the downstream
    /// consumer does once an entry is applied to the ledger
    #[arg(long)]
    remove: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let cfg = config::load(Some(&args.config))?;
    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| format!("sqlite://{}/bankmail.db", cfg.app.data_dir));
    let pool = queue::init_pool(&database_url).await?;
    queue::run_migrations(&pool).await?;

    let entries = queue::list(&pool, &args.user).await?;
    println!("{} staged entries for {}", entries.len(), args.user);
    for entry in &entries {
        println!("{}", to_string_pretty(entry)?);
    }

    if let Some(entry_id) = args.remove {
        queue::remove(&pool, &args.user, &entry_id).await?;
        println!("removed {}", entry_id);
    }

    Ok(())
}
