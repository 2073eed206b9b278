pub mod error;
pub mod health;
pub mod notifications;
pub mod state;

use axum::Router;

pub use error::{AppError, AppResult};
pub use state::AppState;

/// Build the complete API router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .merge(notifications::router())
        .with_state(state)
}
