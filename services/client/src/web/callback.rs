//! services/client/src/web/callback.rs
//!
//! Redirect endpoints of the browser sign-in flow.

use crate::web::state::AppState;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Redirect,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use url::Url;
use utoipa::IntoParams;

/// Where users land after signing in when no `next` is given.
pub const DEFAULT_NEXT_PATH: &str = "/home";
const CALLBACK_FAILED_PATH: &str = "/login?error=auth_callback_failed";

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CallbackParams {
    /// Authorization code issued by the identity provider.
    pub code: Option<String>,
    /// Site-relative path to continue to.
    pub next: Option<String>,
    /// Identifies the sign-in flow started by `/auth/login`.
    pub state: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct LoginParams {
    /// OAuth provider name, e.g. `google` or `github`.
    pub provider: String,
    pub next: Option<String>,
}

/// Accepts `next` only when it is a path on this site.
fn safe_next(next: Option<&str>) -> &str {
    match next {
        Some(path) if path.starts_with('/') && !path.starts_with("//") && !path.contains('\\') => {
            path
        }
        Some(path) => {
            warn!(next = %path, "Ignoring non-relative redirect target");
            DEFAULT_NEXT_PATH
        }
        None => DEFAULT_NEXT_PATH,
    }
}

fn site_redirect(origin: &Url, path: &str) -> Redirect {
    match origin.join(path) {
        Ok(url) => Redirect::temporary(url.as_str()),
        Err(e) => {
            error!(path = %path, error = %e, "Failed to resolve redirect target");
            Redirect::temporary(DEFAULT_NEXT_PATH)
        }
    }
}

/// Completes a redirect sign-in.
///
/// Exchanges `code` for a session, then sends the browser on to `next`.
#[utoipa::path(
    get,
    path = "/auth/callback",
    params(CallbackParams),
    responses(
        (status = 307, description = "Redirect to `next`, or to the login page when the exchange failed")
    )
)]
pub async fn auth_callback_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CallbackParams>,
) -> Redirect {
    let next = safe_next(params.next.as_deref());

    if let Some(code) = params.code.as_deref() {
        let flow = params.state.as_deref().unwrap_or_default();
        match state.auth.exchange_code_for_session(code, flow).await {
            Ok(session) => info!(user_id = %session.user.id, "Sign-in completed"),
            Err(e) => {
                error!("Failed to exchange authorization code: {}", e);
                return site_redirect(&state.config.site_origin, CALLBACK_FAILED_PATH);
            }
        }
    }

    site_redirect(&state.config.site_origin, next)
}

/// Starts a redirect sign-in with the given provider.
#[utoipa::path(
    get,
    path = "/auth/login",
    params(LoginParams),
    responses(
        (status = 307, description = "Redirect to the provider's authorization page"),
        (status = 500, description = "Authorization URL could not be built")
    )
)]
pub async fn login_redirect_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LoginParams>,
) -> Result<Redirect, (StatusCode, String)> {
    let mut callback = state
        .config
        .site_origin
        .join("/auth/callback")
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    callback
        .query_pairs_mut()
        .append_pair("next", safe_next(params.next.as_deref()));

    let url = state
        .auth
        .authorize_url(&params.provider, &callback)
        .await
        .map_err(|e| {
            error!("Failed to build authorization URL: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })?;

    info!(provider = %params.provider, "Redirecting to identity provider");
    Ok(Redirect::temporary(url.as_str()))
}
