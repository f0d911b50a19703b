//! services/client/src/bin/callback.rs

use axum::Router;
use client_lib::{
    adapters::auth::SupabaseAuth,
    config::Config,
    error::ClientError,
    web::{rest::ApiDoc, router, state::AppState},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() -> Result<(), ClientError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting callback server...");

    // --- 2. Initialize the Identity Provider Adapter ---
    let auth = Arc::new(SupabaseAuth::new(
        &config.supabase_url,
        config.supabase_anon_key.clone(),
        config.request_timeout,
    )?);

    // --- 3. Build the Shared AppState & Router ---
    let app_state = Arc::new(AppState {
        auth,
        config: config.clone(),
    });

    let app = Router::new()
        .merge(router(app_state))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http());

    // --- 4. Start the Server ---
    info!("Starting server on {}", config.callback_bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.callback_bind_address
    );
    let listener = tokio::net::TcpListener::bind(config.callback_bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
