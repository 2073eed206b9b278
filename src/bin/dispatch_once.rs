use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use portal_notify::config;
use portal_notify::db;
use portal_notify::dispatch::{self, DispatchOptions, DispatchReport};
use portal_notify::push::WebPushClient;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Deliver due queued notifications to all active subscriptions and exit"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Keep running batches until a batch makes no progress
    #[arg(long)]
    drain: bool,
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
    let options = DispatchOptions {
        batch_size: i64::from(cfg.dispatch.batch_size),
        icon: cfg.push.icon.clone(),
    };

    let mut total = DispatchReport::default();
    loop {
        let report = dispatch::run(&pool, &push, &options, Utc::now()).await?;
        info!(?report, "dispatch batch finished");

        total.entries_sent += report.entries_sent;
        total.entries_deferred += report.entries_deferred;
        total.entries_failed += report.entries_failed;
        total.delivered += report.delivered;
        total.failed += report.failed;
        total.deactivated += report.deactivated;

        // Deferred entries stay due, so stop once a batch makes no progress.
        if !args.drain || report.entries_sent + report.entries_failed == 0 {
            break;
        }
    }

    println!("{}", serde_json::to_string_pretty(&total)?);
    Ok(())
}
