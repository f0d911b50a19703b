pub mod callback;
pub mod rest;
pub mod state;

use axum::{routing::get, Router};
use std::sync::Arc;

pub use callback::{auth_callback_handler, login_redirect_handler};
pub use state::AppState;

/// Routes served by the callback server, without documentation or tracing layers.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/auth/callback", get(auth_callback_handler))
        .route("/auth/login", get(login_redirect_handler))
        .with_state(state)
}
