use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;

use portal_notify::config;
use portal_notify::db;
use portal_notify::push::WebPushClient;
use portal_notify::tracker;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Notify subscribers about new comments and views since the last check"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
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

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    let push = WebPushClient::from_config(&cfg.push)?;
    let report = tracker::check_updates(&pool, &push, Utc::now()).await?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
