//! services/client/src/web/state.rs
//!
//! Shared state of the callback server.

use crate::adapters::auth::SupabaseAuth;
use crate::config::Config;
use std::sync::Arc;

/// Created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<SupabaseAuth>,
    pub config: Arc<Config>,
}
