//! Shared application state for the axum server.

use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::warn;

use crate::api::error::AppError;
use crate::config::Config;
use crate::dispatch::DispatchOptions;
use crate::push::{PushService, WebPushClient};
use crate::schedule::SlotPolicy;

/// Application state shared across all route handlers via axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub config: Arc<Config>,
    /// The push client, or why it could not be built.
    push: Result<Arc<dyn PushService>, String>,
}

impl AppState {
    /// Builds the web push client from configuration. Missing credentials do
    /// not stop the server; push-using requests fail with a 500 instead.
    pub fn new(pool: SqlitePool, config: Config) -> Self {
        let push = match WebPushClient::from_config(&config.push) {
            Ok(client) => Ok(Arc::new(client) as Arc<dyn PushService>),
            Err(err) => {
                warn!(%err, "web push disabled");
                Err(err.to_string())
            }
        };
        Self {
            pool,
            config: Arc::new(config),
            push,
        }
    }

    pub fn with_push(pool: SqlitePool, config: Config, push: Arc<dyn PushService>) -> Self {
        Self {
            pool,
            config: Arc::new(config),
            push: Ok(push),
        }
    }

    pub fn push(&self) -> Result<Arc<dyn PushService>, AppError> {
        self.push.clone().map_err(AppError::Config)
    }

    pub fn slot_policy(&self) -> SlotPolicy {
        self.config.slot_policy()
    }

    pub fn dispatch_options(&self) -> DispatchOptions {
        DispatchOptions {
            batch_size: i64::from(self.config.dispatch.batch_size),
            icon: self.config.push.icon.clone(),
        }
    }
}
