use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;

use portal_notify::config;
use portal_notify::db;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Print the delivery slot the next queued notification would get"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Pretend the current time is this (RFC 3339, or local ISO-8601)
    #[arg(long)]
    now: Option<String>,
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
    let policy = cfg.slot_policy();

    let now = match args.now.as_deref() {
        Some(raw) => policy.parse_timestamp(raw)?,
        None => Utc::now(),
    };

    cfg.ensure_dirs()?;
    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    let last = db::latest_scheduled_since(&pool, now - policy.lookback).await?;
    let slot = policy.next_slot(now, last);

    match last {
        Some(last) => println!(
            "last scheduled: {}",
            last.with_timezone(&policy.offset).to_rfc3339()
        ),
        None => println!("last scheduled: none in lookback window"),
    }
    println!("next slot:      {}", slot.to_rfc3339());
    Ok(())
}
