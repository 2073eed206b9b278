use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use portal_notify::api::{create_router, AppState};
use portal_notify::{config, db, dispatch};

#[derive(Debug, Parser)]
#[command(author, version, about = "Push notification service for the city news portal")]
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

    let addr: SocketAddr = cfg
        .app
        .bind_addr
        .parse()
        .with_context(|| format!("invalid app.bind_addr {}", cfg.app.bind_addr))?;
    let poll_interval = Duration::from_millis(cfg.app.poll_interval_ms);
    let state = AppState::new(pool.clone(), cfg);

    // Background dispatcher (single task); external triggers still work alongside it.
    if poll_interval.is_zero() {
        info!("background dispatch disabled");
    } else {
        match state.push() {
            Ok(push) => {
                let options = state.dispatch_options();
                tokio::spawn(async move {
                    loop {
                        match dispatch::run(&pool, push.as_ref(), &options, Utc::now()).await {
                            Ok(report) if report != Default::default() => {
                                info!(?report, "dispatch run finished");
                            }
                            Ok(_) => {}
                            Err(err) => error!(?err, "dispatch run failed"),
                        }
                        tokio::time::sleep(poll_interval).await;
                    }
                });
            }
            Err(err) => warn!(%err, "background dispatch disabled"),
        }
    }

    let app = create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    info!(%addr, "starting notification API");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
